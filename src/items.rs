//! Reactive query wrappers over collections.
//!
//! [`ItemsQuery`] and [`ItemQuery`] fetch into a [`QueryState`] published
//! through a watch channel. Inputs may be static values, accessor
//! functions or observable references ([`Arg`]); optional observers
//! refetch when an input or the signed-in user changes. Backend failures
//! never propagate to the caller: they land in the state's error field.

use crate::auth::{Auth, Session};
use crate::client::{BackendClient, ItemQueryOptions};
use crate::error::ClientError;
use crate::shared::SharedHandle;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::debug;

/// A query input that is either a constant, an accessor function, or an
/// observable reference. All read sites go through [`Arg::resolve`].
pub enum Arg<T> {
    Value(T),
    Getter(Arc<dyn Fn() -> T + Send + Sync>),
    Watched(watch::Receiver<T>),
}

impl<T: Clone> Arg<T> {
    /// Create an accessor-function input.
    pub fn getter(f: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Arg::Getter(Arc::new(f))
    }

    /// Resolve the current value of the input.
    pub fn resolve(&self) -> T {
        match self {
            Arg::Value(value) => value.clone(),
            Arg::Getter(f) => f(),
            Arg::Watched(rx) => rx.borrow().clone(),
        }
    }

    /// The change stream behind an observable input, if there is one.
    pub(crate) fn receiver(&self) -> Option<watch::Receiver<T>> {
        match self {
            Arg::Watched(rx) => Some(rx.clone()),
            _ => None,
        }
    }
}

impl<T: Clone> Clone for Arg<T> {
    fn clone(&self) -> Self {
        match self {
            Arg::Value(value) => Arg::Value(value.clone()),
            Arg::Getter(f) => Arg::Getter(Arc::clone(f)),
            Arg::Watched(rx) => Arg::Watched(rx.clone()),
        }
    }
}

impl<T> From<T> for Arg<T> {
    fn from(value: T) -> Self {
        Arg::Value(value)
    }
}

impl From<&str> for Arg<String> {
    fn from(value: &str) -> Self {
        Arg::Value(value.to_string())
    }
}

impl<T> From<watch::Receiver<T>> for Arg<T> {
    fn from(rx: watch::Receiver<T>) -> Self {
        Arg::Watched(rx)
    }
}

/// One fetch cycle's reactive result.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
    pub data: T,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T: Default> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: T::default(),
            loading: false,
            error: None,
        }
    }
}

/// Behavior flags for a query composable, each independently togglable.
#[derive(Clone)]
pub struct QueryOptions {
    /// Fetch immediately on construction.
    pub auto_fetch: bool,
    /// Refetch whenever an observable input changes.
    pub watch: bool,
    /// Refetch whenever the signed-in user changes.
    pub refresh_on_auth_change: bool,
    /// Backend query options (fields, filter, sort, limit, search).
    pub query: ItemQueryOptions,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            auto_fetch: true,
            watch: true,
            refresh_on_auth_change: true,
            query: ItemQueryOptions::default(),
        }
    }
}

/// Keeps the shared auth composable alive for as long as a query that
/// subscribed to it exists, and hands observers the session stream.
pub(crate) struct AuthBinding {
    handle: SharedHandle<Auth>,
}

impl AuthBinding {
    pub(crate) fn new(handle: SharedHandle<Auth>) -> Self {
        Self { handle }
    }

    fn session_rx(&self) -> watch::Receiver<Session> {
        self.handle.subscribe()
    }
}

struct ItemsInner<T> {
    client: BackendClient,
    collection: Arg<String>,
    query: ItemQueryOptions,
    state: watch::Sender<QueryState<Vec<T>>>,
    generation: AtomicU64,
    _auth: Option<AuthBinding>,
}

/// Reactive list query over a collection.
pub struct ItemsQuery<T> {
    inner: Arc<ItemsInner<T>>,
}

impl<T> Clone for ItemsQuery<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> ItemsQuery<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(
        client: BackendClient,
        collection: impl Into<Arg<String>>,
        options: QueryOptions,
    ) -> Self {
        Self::build(client, collection.into(), options, None)
    }

    /// Like [`ItemsQuery::new`], but bound to the shared auth composable
    /// so the query refetches when the signed-in user changes.
    pub fn with_auth(
        client: BackendClient,
        collection: impl Into<Arg<String>>,
        options: QueryOptions,
        auth: SharedHandle<Auth>,
    ) -> Self {
        Self::build(client, collection.into(), options, Some(AuthBinding::new(auth)))
    }

    fn build(
        client: BackendClient,
        collection: Arg<String>,
        options: QueryOptions,
        auth: Option<AuthBinding>,
    ) -> Self {
        let (state, _) = watch::channel(QueryState::default());
        let session_rx = auth.as_ref().map(|a| a.session_rx());

        let query = Self {
            inner: Arc::new(ItemsInner {
                client,
                collection,
                query: options.query.clone(),
                state,
                generation: AtomicU64::new(0),
                _auth: auth,
            }),
        };

        spawn_observers(
            &options,
            Arc::downgrade(&query.inner),
            query.inner.collection.receiver(),
            session_rx,
            |inner| ItemsQuery { inner },
        );

        if options.auto_fetch {
            // Mark loading before the task starts so `settled` callers
            // cannot observe the pre-fetch empty state.
            query.inner.state.send_modify(|s| s.loading = true);
            let q = query.clone();
            tokio::spawn(async move { q.fetch().await });
        }

        query
    }

    /// Run one fetch cycle: set loading, clear the previous error, issue
    /// the request, then commit data or error and clear loading. Only the
    /// most recently issued fetch commits; a superseded request completes
    /// but its result is discarded.
    pub async fn fetch(&self) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });

        let collection = self.inner.collection.resolve();
        let result = self
            .inner
            .client
            .list_items::<T>(&collection, &self.inner.query)
            .await;

        if self.inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        commit(&self.inner.state, result, Vec::new(), &collection);
    }

    pub fn state(&self) -> QueryState<Vec<T>> {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueryState<Vec<T>>> {
        self.inner.state.subscribe()
    }

    /// Wait until no fetch is in flight and return the settled state.
    pub async fn settled(&self) -> QueryState<Vec<T>> {
        settle(self.subscribe()).await
    }

    /// The settled data, for callers that don't need controls.
    pub async fn data(&self) -> Vec<T> {
        self.settled().await.data
    }
}

struct ItemInner<T> {
    client: BackendClient,
    collection: Arg<String>,
    id: Arg<String>,
    query: ItemQueryOptions,
    state: watch::Sender<QueryState<Option<T>>>,
    generation: AtomicU64,
    _auth: Option<AuthBinding>,
}

/// Reactive single-item query.
pub struct ItemQuery<T> {
    inner: Arc<ItemInner<T>>,
}

impl<T> Clone for ItemQuery<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> ItemQuery<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(
        client: BackendClient,
        collection: impl Into<Arg<String>>,
        id: impl Into<Arg<String>>,
        options: QueryOptions,
    ) -> Self {
        Self::build(client, collection.into(), id.into(), options, None)
    }

    pub fn with_auth(
        client: BackendClient,
        collection: impl Into<Arg<String>>,
        id: impl Into<Arg<String>>,
        options: QueryOptions,
        auth: SharedHandle<Auth>,
    ) -> Self {
        Self::build(
            client,
            collection.into(),
            id.into(),
            options,
            Some(AuthBinding::new(auth)),
        )
    }

    fn build(
        client: BackendClient,
        collection: Arg<String>,
        id: Arg<String>,
        options: QueryOptions,
        auth: Option<AuthBinding>,
    ) -> Self {
        let (state, _) = watch::channel(QueryState::default());
        let session_rx = auth.as_ref().map(|a| a.session_rx());

        let query = Self {
            inner: Arc::new(ItemInner {
                client,
                collection,
                id,
                query: options.query.clone(),
                state,
                generation: AtomicU64::new(0),
                _auth: auth,
            }),
        };

        spawn_observers(
            &options,
            Arc::downgrade(&query.inner),
            query.inner.collection.receiver(),
            session_rx,
            |inner| ItemQuery { inner },
        );

        // The id is an input of its own: changing it refetches too.
        if options.watch {
            if let Some(rx) = query.inner.id.receiver() {
                spawn_input_observer(Arc::downgrade(&query.inner), rx, |inner| ItemQuery { inner });
            }
        }

        if options.auto_fetch {
            query.inner.state.send_modify(|s| s.loading = true);
            let q = query.clone();
            tokio::spawn(async move { q.fetch().await });
        }

        query
    }

    pub async fn fetch(&self) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });

        let collection = self.inner.collection.resolve();
        let id = self.inner.id.resolve();
        let result = self
            .inner
            .client
            .read_item::<T>(&collection, &id, &self.inner.query)
            .await
            .map(Some);

        if self.inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        commit(&self.inner.state, result, None, &collection);
    }

    pub fn state(&self) -> QueryState<Option<T>> {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueryState<Option<T>>> {
        self.inner.state.subscribe()
    }

    pub async fn settled(&self) -> QueryState<Option<T>> {
        settle(self.subscribe()).await
    }

    pub async fn data(&self) -> Option<T> {
        self.settled().await.data
    }
}

/// Lazily resolved handle to a collection, for imperative access outside
/// the reactive wrappers.
pub struct Collection {
    client: BackendClient,
    name: Arg<String>,
}

impl Collection {
    pub fn new(client: BackendClient, name: impl Into<Arg<String>>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }

    /// The collection name as currently resolved.
    pub fn name(&self) -> String {
        self.name.resolve()
    }

    pub async fn list<T: DeserializeOwned>(
        &self,
        query: &ItemQueryOptions,
    ) -> Result<Vec<T>, ClientError> {
        self.client.list_items(&self.name.resolve(), query).await
    }

    pub async fn read<T: DeserializeOwned>(
        &self,
        id: &str,
        query: &ItemQueryOptions,
    ) -> Result<T, ClientError> {
        self.client.read_item(&self.name.resolve(), id, query).await
    }
}

/// Commit a fetch result. Error and data are mutually exclusive: a failed
/// fetch resets data to the empty value.
fn commit<D: Clone>(
    state: &watch::Sender<QueryState<D>>,
    result: Result<D, ClientError>,
    empty: D,
    collection: &str,
) {
    match result {
        Ok(data) => state.send_modify(|s| {
            s.data = data;
            s.loading = false;
        }),
        Err(e) => {
            debug!("fetch of {collection} failed: {e}");
            let message = e.to_string();
            state.send_modify(|s| {
                s.data = empty;
                s.error = Some(message);
                s.loading = false;
            });
        }
    }
}

async fn settle<S: Clone>(mut rx: watch::Receiver<QueryState<S>>) -> QueryState<S> {
    loop {
        {
            let state = rx.borrow_and_update();
            if !state.loading {
                return state.clone();
            }
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone();
        }
    }
}

/// Spawn the input-change and auth-change observers for a query. The
/// observers hold only a weak reference so they never keep a dropped
/// query (or the shared auth composable it subscribes to) alive.
fn spawn_observers<I, Q>(
    options: &QueryOptions,
    inner: Weak<I>,
    input_rx: Option<watch::Receiver<String>>,
    session_rx: Option<watch::Receiver<Session>>,
    make: fn(Arc<I>) -> Q,
) where
    I: Send + Sync + 'static,
    Q: Fetches + Send + 'static,
{
    if options.watch {
        if let Some(rx) = input_rx {
            spawn_input_observer(inner.clone(), rx, make);
        }
    }

    if options.refresh_on_auth_change {
        if let Some(mut rx) = session_rx {
            tokio::spawn(async move {
                let mut last = rx.borrow().user_id().map(str::to_string);
                while rx.changed().await.is_ok() {
                    let current = rx.borrow().user_id().map(str::to_string);
                    if current == last {
                        continue;
                    }
                    last = current;
                    let Some(inner) = inner.upgrade() else { break };
                    make(inner).fetch_once().await;
                }
            });
        }
    }
}

fn spawn_input_observer<I, Q>(inner: Weak<I>, mut rx: watch::Receiver<String>, make: fn(Arc<I>) -> Q)
where
    I: Send + Sync + 'static,
    Q: Fetches + Send + 'static,
{
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let Some(inner) = inner.upgrade() else { break };
            make(inner).fetch_once().await;
        }
    });
}

/// Object-safe fetch entry point for the observer tasks.
trait Fetches {
    fn fetch_once(self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;
}

impl<T> Fetches for ItemsQuery<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn fetch_once(self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move { self.fetch().await })
    }
}

impl<T> Fetches for ItemQuery<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn fetch_once(self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move { self.fetch().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_value_resolves_constant() {
        let arg: Arg<String> = "projects".into();
        assert_eq!(arg.resolve(), "projects");
        assert!(arg.receiver().is_none());
    }

    #[test]
    fn test_arg_getter_resolves_each_call() {
        let counter = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&counter);
        let arg = Arg::getter(move || format!("gen-{}", c.fetch_add(1, Ordering::SeqCst)));

        assert_eq!(arg.resolve(), "gen-0");
        assert_eq!(arg.resolve(), "gen-1");
    }

    #[test]
    fn test_arg_watched_resolves_current_value() {
        let (tx, rx) = watch::channel("projects".to_string());
        let arg: Arg<String> = rx.into();

        assert_eq!(arg.resolve(), "projects");
        tx.send("tasks".to_string()).unwrap();
        assert_eq!(arg.resolve(), "tasks");
        assert!(arg.receiver().is_some());
    }

    #[test]
    fn test_arg_clone_shares_watch_stream() {
        let (tx, rx) = watch::channel(1u32);
        let arg: Arg<u32> = rx.into();
        let clone = arg.clone();

        tx.send(2).unwrap();
        assert_eq!(arg.resolve(), 2);
        assert_eq!(clone.resolve(), 2);
    }

    #[test]
    fn test_query_state_default() {
        let state: QueryState<Vec<serde_json::Value>> = QueryState::default();
        assert!(state.data.is_empty());
        assert!(!state.loading);
        assert!(state.error.is_none());
    }

    #[test]
    fn test_query_options_defaults() {
        let options = QueryOptions::default();
        assert!(options.auto_fetch);
        assert!(options.watch);
        assert!(options.refresh_on_auth_change);
    }
}
