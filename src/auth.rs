use crate::client::{BackendClient, Credentials, Role, TokenStore, User};
use crate::error::ClientError;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, warn};

/// Current authentication state, shared by every consumer of the auth
/// composable.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub user: Option<User>,
    pub role: Option<Role>,
    pub logging_in: bool,
    pub refreshing: bool,
    pub logging_out: bool,
}

impl Session {
    /// A session is authenticated exactly when a user is present, i.e.
    /// the most recent auth operation succeeded.
    pub fn authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn loading(&self) -> bool {
        self.logging_in || self.refreshing || self.logging_out
    }

    /// Identity of the current user, used by composables that refetch
    /// when the signed-in user changes.
    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }
}

/// Auth state composable.
///
/// Operations mutate the shared [`Session`] and publish it through a
/// watch channel. Overlapping calls are not serialized; they race
/// last-write-wins, which is acceptable because consumers only render the
/// final state.
pub struct Auth {
    client: BackendClient,
    tokens: Arc<TokenStore>,
    session: watch::Sender<Session>,
}

impl Auth {
    pub fn new(client: BackendClient, tokens: Arc<TokenStore>) -> Self {
        let (session, _) = watch::channel(Session::default());
        Self {
            client,
            tokens,
            session,
        }
    }

    /// Subscribe to session changes.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Session {
        self.session.borrow().clone()
    }

    pub fn authenticated(&self) -> bool {
        self.session.borrow().authenticated()
    }

    pub fn tokens(&self) -> Arc<TokenStore> {
        Arc::clone(&self.tokens)
    }

    /// Log in with credentials. On success the session holds the user and
    /// their role; on failure the session is cleared and the error is
    /// logged. The logging-in flag clears on every path.
    pub async fn login(&self, credentials: &Credentials) -> Option<User> {
        self.session.send_modify(|s| s.logging_in = true);

        if let Err(e) = self.try_login(credentials).await {
            error!("login failed: {e}");
            self.clear_user();
        }

        self.session.send_modify(|s| s.logging_in = false);
        self.session.borrow().user.clone()
    }

    /// Exchange the stored refresh token for a new session. Failure clears
    /// the session, same as a failed login.
    pub async fn refresh(&self) -> Option<User> {
        self.session.send_modify(|s| s.refreshing = true);

        if let Err(e) = self.try_refresh().await {
            error!("session refresh failed: {e}");
            self.clear_user();
        }

        self.session.send_modify(|s| s.refreshing = false);
        self.session.borrow().user.clone()
    }

    /// Log out. A failed backend call is logged but never blocks the
    /// local session from being cleared.
    pub async fn logout(&self) {
        self.session.send_modify(|s| s.logging_out = true);

        if let Some(refresh_token) = self.tokens.refresh_token() {
            if let Err(e) = self.client.logout(&refresh_token).await {
                warn!("logout request failed: {e}");
            }
        }

        self.tokens.clear();
        self.session.send_modify(|s| {
            s.user = None;
            s.role = None;
            s.logging_out = false;
        });
    }

    /// Reconcile the session with whatever token is stored. No token is a
    /// no-op; a token that no longer works falls back to a refresh.
    /// Never fails: the worst outcome is an anonymous session.
    pub async fn check(&self) {
        if !self.tokens.has_token() {
            return;
        }

        if self.load_user().await.is_err() {
            self.refresh().await;
        }
    }

    async fn try_login(&self, credentials: &Credentials) -> Result<(), ClientError> {
        let tokens = self.client.login(credentials).await?;
        self.tokens.set(tokens);
        self.load_user().await
    }

    async fn try_refresh(&self) -> Result<(), ClientError> {
        let refresh_token = self
            .tokens
            .refresh_token()
            .ok_or(ClientError::NotAuthenticated)?;
        let tokens = self.client.refresh(&refresh_token).await?;
        self.tokens.set(tokens);
        self.load_user().await
    }

    /// Populate the session from `/users/me`, resolving the user's role
    /// when one is assigned.
    async fn load_user(&self) -> Result<(), ClientError> {
        let user = self.client.me().await?;
        let role = match user.role.as_deref() {
            Some(role_id) => Some(self.client.read_role(role_id).await?),
            None => None,
        };

        self.session.send_modify(|s| {
            s.user = Some(user);
            s.role = role;
        });
        Ok(())
    }

    fn clear_user(&self) {
        self.tokens.clear();
        self.session.send_modify(|s| {
            s.user = None;
            s.role = None;
        });
    }
}
