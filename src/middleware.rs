//! Authorization gates layered on the auth session.
//!
//! Decisions are pure functions over a [`Session`] snapshot; thin
//! adapters wire them into axum layers and into a reactive stream that
//! re-evaluates whenever the session changes.

use crate::auth::{Auth, Session};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use std::sync::Arc;
use tokio::sync::watch;

/// Outcome of evaluating a gate against the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Redirect(String),
}

/// Build the login redirect target, carrying the originally requested
/// path in the `redirect` query parameter.
pub fn login_redirect(login_path: &str, requested_path: &str) -> String {
    format!(
        "{login_path}?redirect={}",
        percent_encode(requested_path)
    )
}

/// Hard gate: the session must be authenticated.
pub fn evaluate_auth_gate(
    session: &Session,
    login_path: &str,
    requested_path: &str,
) -> GuardDecision {
    if session.authenticated() {
        GuardDecision::Allow
    } else {
        GuardDecision::Redirect(login_redirect(login_path, requested_path))
    }
}

/// Per-role gate: authenticated and holding the required role, compared
/// case-insensitively by name.
pub fn evaluate_role_gate(
    session: &Session,
    required_role: &str,
    login_path: &str,
    requested_path: &str,
) -> GuardDecision {
    let matches = session
        .role
        .as_ref()
        .is_some_and(|role| role.name.eq_ignore_ascii_case(required_role));

    if session.authenticated() && matches {
        GuardDecision::Allow
    } else {
        GuardDecision::Redirect(login_redirect(login_path, requested_path))
    }
}

/// Re-evaluate a gate whenever the session changes, for consumers that
/// stay mounted across auth transitions. The returned receiver always
/// holds the decision for the latest session.
pub fn watch_guard(
    mut session_rx: watch::Receiver<Session>,
    evaluate: impl Fn(&Session) -> GuardDecision + Send + 'static,
) -> watch::Receiver<GuardDecision> {
    let initial = evaluate(&session_rx.borrow());
    let (tx, rx) = watch::channel(initial);

    tokio::spawn(async move {
        while session_rx.changed().await.is_ok() {
            let decision = evaluate(&session_rx.borrow());
            if tx.send(decision).is_err() {
                break;
            }
        }
    });

    rx
}

/// Shared state for the axum gate middlewares.
#[derive(Clone)]
pub struct Gate {
    session_rx: watch::Receiver<Session>,
    login_path: String,
    required_role: Option<String>,
}

impl Gate {
    /// Gate requiring any authenticated session.
    pub fn authenticated(session_rx: watch::Receiver<Session>, login_path: impl Into<String>) -> Self {
        Self {
            session_rx,
            login_path: login_path.into(),
            required_role: None,
        }
    }

    /// Gate requiring a specific role by name.
    pub fn role(
        session_rx: watch::Receiver<Session>,
        required_role: impl Into<String>,
        login_path: impl Into<String>,
    ) -> Self {
        Self {
            session_rx,
            login_path: login_path.into(),
            required_role: Some(required_role.into()),
        }
    }

    pub fn evaluate(&self, session: &Session, requested_path: &str) -> GuardDecision {
        match &self.required_role {
            Some(role) => evaluate_role_gate(session, role, &self.login_path, requested_path),
            None => evaluate_auth_gate(session, &self.login_path, requested_path),
        }
    }
}

/// Axum middleware enforcing a [`Gate`]; denied navigations get a 307 to
/// the login path.
pub async fn gate_middleware(State(gate): State<Gate>, request: Request, next: Next) -> Response {
    let requested_path = request.uri().path().to_string();
    let session = gate.session_rx.borrow().clone();

    match gate.evaluate(&session, &requested_path) {
        GuardDecision::Allow => next.run(request).await,
        GuardDecision::Redirect(target) => Redirect::temporary(&target).into_response(),
    }
}

/// Axum middleware running the soft auth check on every navigation
/// without ever blocking it.
pub async fn soft_check_middleware(
    State(auth): State<Arc<Auth>>,
    request: Request,
    next: Next,
) -> Response {
    auth.check().await;
    next.run(request).await
}

/// Percent-encode a path for use inside a query parameter value.
fn percent_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                encoded.push(byte as char)
            }
            other => {
                encoded.push('%');
                encoded.push_str(&format!("{other:02X}"));
            }
        }
    }
    encoded
}
