//! Module setup: validates configuration, builds the clients, the shared
//! auth composable and the HTTP router, and exposes the integration
//! surface the binaries and consumers use.
//!
//! Nothing here is fatal: missing configuration is logged and the
//! affected features degrade.

use crate::auth::Auth;
use crate::client::{BackendClient, TokenStore};
use crate::config::ModuleConfig;
use crate::error::ClientError;
use crate::items::{Arg, ItemQuery, ItemsQuery, QueryOptions};
use crate::server::{self, ServerState};
use crate::shared::{Shared, SharedHandle};
use crate::translations;
use crate::typegen::{self, RenameRule};
use anyhow::{Context, Result};
use axum::Router;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// The composable surface, available when the backend URL resolves and
/// composables are enabled.
struct Composables {
    client: BackendClient,
    auth: Shared<Auth>,
}

/// The wired-up integration module.
pub struct Module {
    config: Arc<ModuleConfig>,
    server_client: Option<BackendClient>,
    tokens: Arc<TokenStore>,
    composables: Option<Composables>,
}

impl Module {
    pub fn new(config: ModuleConfig) -> Self {
        for problem in config.validate() {
            error!("{problem}");
        }

        let config = Arc::new(config);

        let server_client = match BackendClient::server(&config) {
            Ok(client) => Some(client),
            Err(e) => {
                error!("backend client unavailable: {e}");
                None
            }
        };

        let tokens = TokenStore::new();

        let composables = if config.composables_enabled {
            match BackendClient::session(&config, None, Arc::clone(&tokens)) {
                Ok(client) => {
                    let auth_client = client.clone();
                    let auth_tokens = Arc::clone(&tokens);
                    let auth = Shared::new(move || {
                        Auth::new(auth_client.clone(), Arc::clone(&auth_tokens))
                    });
                    Some(Composables { client, auth })
                }
                Err(e) => {
                    error!("composables unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        info!(
            url = %config.url,
            i18n = config.i18n_enabled,
            proxy = config.proxy_enabled,
            composables = composables.is_some(),
            "module configured"
        );

        Self {
            config,
            server_client,
            tokens,
            composables,
        }
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// The server-context client, if the backend URL resolved.
    pub fn client(&self) -> Option<&BackendClient> {
        self.server_client.as_ref()
    }

    pub fn tokens(&self) -> Arc<TokenStore> {
        Arc::clone(&self.tokens)
    }

    /// Acquire the shared auth composable. Every live handle shares one
    /// session; the composable is rebuilt after the last handle drops.
    pub fn auth(&self) -> Option<SharedHandle<Auth>> {
        self.composables.as_ref().map(|c| c.auth.acquire())
    }

    /// Reactive list query bound to the shared session, with default
    /// options (auto-fetch, input watch, refetch on auth change).
    pub fn items<T>(&self, collection: impl Into<Arg<String>>) -> Option<ItemsQuery<T>>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.items_with_options(collection, QueryOptions::default())
    }

    pub fn items_with_options<T>(
        &self,
        collection: impl Into<Arg<String>>,
        options: QueryOptions,
    ) -> Option<ItemsQuery<T>>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let composables = self.composables.as_ref()?;
        Some(ItemsQuery::with_auth(
            composables.client.clone(),
            collection,
            options,
            composables.auth.acquire(),
        ))
    }

    /// Reactive single-item query bound to the shared session.
    pub fn item<T>(
        &self,
        collection: impl Into<Arg<String>>,
        id: impl Into<Arg<String>>,
    ) -> Option<ItemQuery<T>>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.item_with_options(collection, id, QueryOptions::default())
    }

    pub fn item_with_options<T>(
        &self,
        collection: impl Into<Arg<String>>,
        id: impl Into<Arg<String>>,
        options: QueryOptions,
    ) -> Option<ItemQuery<T>>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let composables = self.composables.as_ref()?;
        Some(ItemQuery::with_auth(
            composables.client.clone(),
            collection,
            id,
            options,
            composables.auth.acquire(),
        ))
    }

    /// Router for the enabled server features. Without a backend client
    /// the router is empty, which is the degraded-but-alive behavior.
    pub fn router(&self) -> Router {
        match &self.server_client {
            Some(client) => server::router(ServerState::new(
                client.clone(),
                Arc::clone(&self.config),
            )),
            None => {
                error!("no backend client available, serving an empty router");
                Router::new()
            }
        }
    }

    /// Locale-loader surface: the key→value map for one locale, honoring
    /// the configured key prefix.
    pub async fn load_locale(&self, locale: &str) -> Result<BTreeMap<String, String>, ClientError> {
        let client = self.server_client.as_ref().ok_or(ClientError::MissingUrl)?;
        let records = translations::fetch_translations(
            client,
            locale,
            self.config.i18n_prefix.as_deref(),
        )
        .await?;
        Ok(translations::translations_to_map(&records))
    }

    /// Push a local target map for a locale to the backend. Returns
    /// whether anything changed.
    pub async fn sync_locale(
        &self,
        locale: &str,
        target: &BTreeMap<String, String>,
    ) -> Result<bool, ClientError> {
        let client = self.server_client.as_ref().ok_or(ClientError::MissingUrl)?;
        translations::sync_translations(
            client,
            locale,
            self.config.i18n_prefix.as_deref(),
            target,
        )
        .await
    }

    /// Generate the type-definitions text from the backend schema, with
    /// the built-in and configured rename rules applied.
    pub async fn generate_types(&self) -> Result<String> {
        let client = self
            .server_client
            .as_ref()
            .context("no backend client available")?;
        let schema = client
            .read_schema()
            .await
            .context("failed to read backend schema")?;
        let rules = RenameRule::compile(&self.config.rename_patterns)?;
        Ok(typegen::generate(
            &schema,
            self.config.image_alias.as_deref(),
            &rules,
        ))
    }

    /// Generate and write the types file to the configured output path.
    pub async fn write_types(&self) -> Result<()> {
        let text = self.generate_types().await?;
        typegen::write_types_file(Path::new(&self.config.types_output), &text)?;
        info!("wrote generated types to {}", self.config.types_output);
        Ok(())
    }
}
