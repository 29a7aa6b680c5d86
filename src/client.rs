use crate::config::{ClientMode, ModuleConfig};
use crate::error::{api_error, ClientError};
use crate::translations::{TranslationDiff, TranslationRecord};
use crate::typegen::{CollectionInfo, FieldInfo, Schema};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

/// Tokens issued by the backend's auth endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access token lifetime in milliseconds.
    #[serde(default)]
    pub expires: Option<i64>,
}

#[derive(Debug, Clone)]
struct StoredTokens {
    tokens: AuthTokens,
    obtained_at: DateTime<Utc>,
}

/// Shared slot holding the current session's tokens.
///
/// Written by login/refresh, cleared on logout or auth failure. All
/// session-context clients created from the same store observe the same
/// credentials.
#[derive(Debug, Default)]
pub struct TokenStore {
    inner: Mutex<Option<StoredTokens>>,
}

impl TokenStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, tokens: AuthTokens) {
        let mut slot = self.inner.lock().expect("token store lock poisoned");
        *slot = Some(StoredTokens {
            tokens,
            obtained_at: Utc::now(),
        });
    }

    pub fn clear(&self) {
        let mut slot = self.inner.lock().expect("token store lock poisoned");
        *slot = None;
    }

    pub fn access_token(&self) -> Option<String> {
        let slot = self.inner.lock().expect("token store lock poisoned");
        slot.as_ref().map(|s| s.tokens.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        let slot = self.inner.lock().expect("token store lock poisoned");
        slot.as_ref().and_then(|s| s.tokens.refresh_token.clone())
    }

    pub fn has_token(&self) -> bool {
        let slot = self.inner.lock().expect("token store lock poisoned");
        slot.is_some()
    }

    /// When the stored access token expires, if the backend reported a
    /// lifetime.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let slot = self.inner.lock().expect("token store lock poisoned");
        slot.as_ref().and_then(|s| {
            s.tokens
                .expires
                .map(|ms| s.obtained_at + Duration::milliseconds(ms))
        })
    }
}

/// Where the access token for a request comes from.
#[derive(Debug, Clone)]
enum TokenSource {
    /// Server context: the statically configured token.
    Static(Option<String>),
    /// Browser context: whatever the session currently holds.
    Session(Arc<TokenStore>),
}

/// Login credentials.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            otp: None,
        }
    }
}

/// A backend user, as returned by `/users/me`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    /// Role id, resolved to a [`Role`] separately.
    #[serde(default)]
    pub role: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A backend role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub admin_access: bool,
    #[serde(default)]
    pub app_access: bool,
}

/// Query options for item requests.
#[derive(Debug, Clone, Default)]
pub struct ItemQueryOptions {
    pub fields: Vec<String>,
    pub filter: Option<Value>,
    pub sort: Vec<String>,
    pub limit: Option<i64>,
    pub search: Option<String>,
}

impl ItemQueryOptions {
    pub(crate) fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if !self.fields.is_empty() {
            params.push(("fields".to_string(), self.fields.join(",")));
        }
        if let Some(filter) = &self.filter {
            params.push(("filter".to_string(), filter.to_string()));
        }
        if !self.sort.is_empty() {
            params.push(("sort".to_string(), self.sort.join(",")));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(search) = &self.search {
            params.push(("search".to_string(), search.clone()));
        }
        params
    }
}

/// Response envelope the backend wraps payloads in.
#[derive(Debug, Deserialize)]
struct Data<T> {
    data: T,
}

/// Configured request-executing client for the backend.
///
/// Built per execution context (server vs. browser) and protocol (REST vs.
/// GraphQL). Cheap to clone; clones share the HTTP connection pool and,
/// for session clients, the token store.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    mode: ClientMode,
    tokens: TokenSource,
}

impl BackendClient {
    /// Server-context client, authenticated with the configured static
    /// access token.
    pub fn server(config: &ModuleConfig) -> Result<Self, ClientError> {
        let base_url = resolve_base_url(&config.url, None)?;
        let token = (!config.access_token.is_empty()).then(|| config.access_token.clone());
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            mode: config.mode,
            tokens: TokenSource::Static(token),
        })
    }

    /// Browser-context client: requests carry the session's current token,
    /// and a host-relative backend URL is resolved against `origin`.
    pub fn session(
        config: &ModuleConfig,
        origin: Option<&str>,
        tokens: Arc<TokenStore>,
    ) -> Result<Self, ClientError> {
        let base_url = resolve_base_url(&config.url, origin)?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            mode: config.mode,
            tokens: TokenSource::Session(tokens),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn mode(&self) -> ClientMode {
        self.mode
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bearer(&self) -> Option<String> {
        match &self.tokens {
            TokenSource::Static(token) => token.clone(),
            TokenSource::Session(store) => store.access_token(),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let request = match self.bearer() {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &body));
        }

        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = self.send(request).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn send_data<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        Ok(self.send_json::<Data<T>>(request).await?.data)
    }

    // ---- Items ----

    /// List the items of a collection.
    pub async fn list_items<T: DeserializeOwned>(
        &self,
        collection: &str,
        query: &ItemQueryOptions,
    ) -> Result<Vec<T>, ClientError> {
        match self.mode {
            ClientMode::Rest => {
                let request = self
                    .http
                    .get(self.url(&collection_path(collection)))
                    .query(&query.to_params());
                self.send_data(request).await
            }
            ClientMode::Graphql => {
                let data = self
                    .graphql(&items_query(collection, &query.fields), Value::Null)
                    .await?;
                let items = data
                    .get(collection)
                    .cloned()
                    .unwrap_or_else(|| Value::Array(Vec::new()));
                serde_json::from_value(items).map_err(|e| ClientError::Decode(e.to_string()))
            }
        }
    }

    /// Read a single item by id.
    pub async fn read_item<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
        query: &ItemQueryOptions,
    ) -> Result<T, ClientError> {
        match self.mode {
            ClientMode::Rest => {
                let request = self
                    .http
                    .get(self.url(&format!("{}/{}", collection_path(collection), id)))
                    .query(&query.to_params());
                self.send_data(request).await
            }
            ClientMode::Graphql => {
                let field = format!("{collection}_by_id");
                let data = self
                    .graphql(&item_query(collection, id, &query.fields), Value::Null)
                    .await?;
                let item = data.get(&field).cloned().unwrap_or(Value::Null);
                serde_json::from_value(item).map_err(|e| ClientError::Decode(e.to_string()))
            }
        }
    }

    /// Execute a raw GraphQL query and return its `data` payload.
    ///
    /// GraphQL-level errors surface as [`ClientError::Api`] with the first
    /// reported message.
    pub async fn graphql(&self, query: &str, variables: Value) -> Result<Value, ClientError> {
        let mut body = json!({ "query": query });
        if !variables.is_null() {
            body["variables"] = variables;
        }

        let envelope: Value = self
            .send_json(self.http.post(self.url("/graphql")).json(&body))
            .await?;

        if let Some(first) = envelope
            .get("errors")
            .and_then(|e| e.as_array())
            .and_then(|errors| errors.first())
        {
            let message = first
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("GraphQL error")
                .to_string();
            return Err(ClientError::Api { status: 200, message });
        }

        Ok(envelope.get("data").cloned().unwrap_or(Value::Null))
    }

    // ---- Auth ----

    pub async fn login(&self, credentials: &Credentials) -> Result<AuthTokens, ClientError> {
        self.send_data(self.http.post(self.url("/auth/login")).json(credentials))
            .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, ClientError> {
        let body = json!({ "refresh_token": refresh_token, "mode": "json" });
        self.send_data(self.http.post(self.url("/auth/refresh")).json(&body))
            .await
    }

    pub async fn logout(&self, refresh_token: &str) -> Result<(), ClientError> {
        let body = json!({ "refresh_token": refresh_token });
        self.send(self.http.post(self.url("/auth/logout")).json(&body))
            .await?;
        Ok(())
    }

    pub async fn me(&self) -> Result<User, ClientError> {
        self.send_data(self.http.get(self.url("/users/me"))).await
    }

    pub async fn read_role(&self, id: &str) -> Result<Role, ClientError> {
        self.send_data(self.http.get(self.url(&format!("/roles/{id}"))))
            .await
    }

    // ---- Translations ----

    /// Read translation records, optionally narrowed by a filter built
    /// with the helpers in [`crate::translations`].
    pub async fn read_translations(
        &self,
        filter: Option<&Value>,
    ) -> Result<Vec<TranslationRecord>, ClientError> {
        let mut params = vec![
            ("limit".to_string(), "-1".to_string()),
            ("fields".to_string(), "id,key,value,language".to_string()),
        ];
        if let Some(filter) = filter {
            params.push(("filter".to_string(), filter.to_string()));
        }

        self.send_data(self.http.get(self.url("/translations")).query(&params))
            .await
    }

    /// Apply a translation changeset as one batch: the create, update and
    /// remove requests run concurrently and the batch fails if any does.
    pub async fn apply_translation_batch(&self, diff: &TranslationDiff) -> Result<(), ClientError> {
        let create = async {
            if diff.create.is_empty() {
                return Ok(());
            }
            self.send(self.http.post(self.url("/translations")).json(&diff.create))
                .await
                .map(|_| ())
        };
        let update = async {
            if diff.update.is_empty() {
                return Ok(());
            }
            self.send(self.http.patch(self.url("/translations")).json(&diff.update))
                .await
                .map(|_| ())
        };
        let remove = async {
            if diff.remove.is_empty() {
                return Ok(());
            }
            self.send(self.http.delete(self.url("/translations")).json(&diff.remove))
                .await
                .map(|_| ())
        };

        futures::future::try_join3(create, update, remove).await?;
        Ok(())
    }

    // ---- Schema ----

    /// Read the backend schema (collections plus their fields) for type
    /// generation.
    pub async fn read_schema(&self) -> Result<Schema, ClientError> {
        let collections: Vec<CollectionInfo> =
            self.send_data(self.http.get(self.url("/collections"))).await?;
        let fields: Vec<FieldInfo> = self.send_data(self.http.get(self.url("/fields"))).await?;
        Ok(Schema::assemble(collections, fields))
    }
}

/// REST path for a collection. System collections live at the API root,
/// application collections under `/items`.
fn collection_path(collection: &str) -> String {
    match collection {
        "users" | "roles" | "files" | "translations" => format!("/{collection}"),
        other => format!("/items/{other}"),
    }
}

/// GraphQL items query for a collection with the given field selection.
/// The backend rejects empty selection sets, so `id` is the fallback.
fn items_query(collection: &str, fields: &[String]) -> String {
    format!("query {{ {collection} {{ {} }} }}", selection(fields))
}

fn item_query(collection: &str, id: &str, fields: &[String]) -> String {
    format!(
        "query {{ {collection}_by_id(id: {}) {{ {} }} }}",
        Value::String(id.to_string()),
        selection(fields)
    )
}

fn selection(fields: &[String]) -> String {
    if fields.is_empty() {
        "id".to_string()
    } else {
        fields.join(" ")
    }
}

/// Resolve the configured backend URL. Host-relative paths are joined to
/// `origin` (browser context); server context requires an absolute URL.
fn resolve_base_url(url: &str, origin: Option<&str>) -> Result<String, ClientError> {
    if url.is_empty() {
        return Err(ClientError::MissingUrl);
    }

    if url.contains("://") {
        return Ok(url.trim_end_matches('/').to_string());
    }

    match origin {
        Some(origin) => Ok(format!(
            "{}/{}",
            origin.trim_end_matches('/'),
            url.trim_start_matches('/').trim_end_matches('/')
        )),
        None => Err(ClientError::MissingUrl),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModuleConfig;

    fn test_config(url: &str) -> ModuleConfig {
        ModuleConfig {
            url: url.to_string(),
            access_token: "static-token".to_string(),
            ..ModuleConfig::default()
        }
    }

    // ==================== URL Resolution Tests ====================

    #[test]
    fn test_resolve_absolute_url() {
        let url = resolve_base_url("https://cms.example.com", None).unwrap();
        assert_eq!(url, "https://cms.example.com");
    }

    #[test]
    fn test_resolve_strips_trailing_slash() {
        let url = resolve_base_url("https://cms.example.com/", None).unwrap();
        assert_eq!(url, "https://cms.example.com");
    }

    #[test]
    fn test_resolve_relative_against_origin() {
        let url = resolve_base_url("/cms", Some("https://app.example.com")).unwrap();
        assert_eq!(url, "https://app.example.com/cms");
    }

    #[test]
    fn test_resolve_relative_without_origin_fails() {
        let err = resolve_base_url("/cms", None).unwrap_err();
        assert!(matches!(err, ClientError::MissingUrl));
    }

    #[test]
    fn test_resolve_empty_url_fails() {
        let err = resolve_base_url("", Some("https://app.example.com")).unwrap_err();
        assert!(matches!(err, ClientError::MissingUrl));
    }

    // ==================== Collection Path Tests ====================

    #[test]
    fn test_collection_path_application_collection() {
        assert_eq!(collection_path("projects"), "/items/projects");
    }

    #[test]
    fn test_collection_path_system_collections() {
        assert_eq!(collection_path("users"), "/users");
        assert_eq!(collection_path("roles"), "/roles");
        assert_eq!(collection_path("files"), "/files");
        assert_eq!(collection_path("translations"), "/translations");
    }

    // ==================== Query Param Tests ====================

    #[test]
    fn test_query_params_empty() {
        let query = ItemQueryOptions::default();
        assert!(query.to_params().is_empty());
    }

    #[test]
    fn test_query_params_full() {
        let query = ItemQueryOptions {
            fields: vec!["id".to_string(), "name".to_string()],
            filter: Some(json!({ "status": { "_eq": "published" } })),
            sort: vec!["-date_created".to_string()],
            limit: Some(25),
            search: Some("term".to_string()),
        };

        let params = query.to_params();
        assert!(params.contains(&("fields".to_string(), "id,name".to_string())));
        assert!(params.contains(&("sort".to_string(), "-date_created".to_string())));
        assert!(params.contains(&("limit".to_string(), "25".to_string())));
        assert!(params.contains(&("search".to_string(), "term".to_string())));
        let filter = params.iter().find(|(k, _)| k == "filter").unwrap();
        assert!(filter.1.contains("published"));
    }

    // ==================== GraphQL Query Builder Tests ====================

    #[test]
    fn test_items_query_default_selection() {
        assert_eq!(items_query("projects", &[]), "query { projects { id } }");
    }

    #[test]
    fn test_items_query_with_fields() {
        let fields = vec!["id".to_string(), "name".to_string()];
        assert_eq!(
            items_query("projects", &fields),
            "query { projects { id name } }"
        );
    }

    #[test]
    fn test_item_query_quotes_id() {
        let query = item_query("projects", "42", &[]);
        assert_eq!(query, "query { projects_by_id(id: \"42\") { id } }");
    }

    // ==================== Token Store Tests ====================

    #[test]
    fn test_token_store_starts_empty() {
        let store = TokenStore::new();
        assert!(!store.has_token());
        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_none());
        assert!(store.expires_at().is_none());
    }

    #[test]
    fn test_token_store_set_and_clear() {
        let store = TokenStore::new();
        store.set(AuthTokens {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires: Some(900_000),
        });

        assert!(store.has_token());
        assert_eq!(store.access_token().as_deref(), Some("access"));
        assert_eq!(store.refresh_token().as_deref(), Some("refresh"));
        let expires_at = store.expires_at().expect("expiry should be set");
        assert!(expires_at > Utc::now());

        store.clear();
        assert!(!store.has_token());
        assert!(store.access_token().is_none());
    }

    #[test]
    fn test_token_store_without_expiry() {
        let store = TokenStore::new();
        store.set(AuthTokens {
            access_token: "access".to_string(),
            refresh_token: None,
            expires: None,
        });
        assert!(store.expires_at().is_none());
    }

    // ==================== Factory Tests ====================

    #[test]
    fn test_server_client_requires_absolute_url() {
        let err = BackendClient::server(&test_config("/cms")).unwrap_err();
        assert!(matches!(err, ClientError::MissingUrl));
    }

    #[test]
    fn test_server_client_from_config() {
        let client = BackendClient::server(&test_config("http://localhost:8055/")).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8055");
        assert_eq!(client.bearer().as_deref(), Some("static-token"));
    }

    #[test]
    fn test_server_client_without_token_sends_no_bearer() {
        let mut config = test_config("http://localhost:8055");
        config.access_token = String::new();
        let client = BackendClient::server(&config).unwrap();
        assert!(client.bearer().is_none());
    }

    #[test]
    fn test_session_client_tracks_store() {
        let store = TokenStore::new();
        let client = BackendClient::session(
            &test_config("/cms"),
            Some("https://app.example.com"),
            store.clone(),
        )
        .unwrap();

        assert_eq!(client.base_url(), "https://app.example.com/cms");
        assert!(client.bearer().is_none());

        store.set(AuthTokens {
            access_token: "session-token".to_string(),
            refresh_token: None,
            expires: None,
        });
        assert_eq!(client.bearer().as_deref(), Some("session-token"));
    }

    // ==================== Credentials Tests ====================

    #[test]
    fn test_credentials_serialization_skips_missing_otp() {
        let credentials = Credentials::new("admin@example.com", "password");
        let json = serde_json::to_value(&credentials).unwrap();
        assert_eq!(json["email"], "admin@example.com");
        assert!(json.get("otp").is_none());
    }

    #[test]
    fn test_user_deserialization_keeps_extra_fields() {
        let json = r#"{
            "id": "user-1",
            "email": "admin@example.com",
            "role": "role-1",
            "title": "Editor in chief"
        }"#;

        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.id, "user-1");
        assert_eq!(user.role.as_deref(), Some("role-1"));
        assert_eq!(user.extra["title"], "Editor in chief");
    }

    #[test]
    fn test_role_deserialization_defaults_flags() {
        let json = r#"{ "id": "role-1", "name": "Editor" }"#;
        let role: Role = serde_json::from_str(json).unwrap();
        assert_eq!(role.name, "Editor");
        assert!(!role.admin_access);
        assert!(!role.app_access);
    }
}
