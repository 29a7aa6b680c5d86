use std::env;

/// Protocol the data composables speak to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientMode {
    #[default]
    Rest,
    Graphql,
}

impl ClientMode {
    /// Parse a mode string ("rest"/"graphql", case-insensitive).
    /// Unknown values fall back to REST.
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "graphql" => ClientMode::Graphql,
            _ => ClientMode::Rest,
        }
    }
}

/// A post-generation rename applied to the generated types file.
///
/// `pattern` is a regular expression; `replacement` may use capture
/// groups (`$1`, `$name`).
#[derive(Debug, Clone)]
pub struct RenamePattern {
    pub pattern: String,
    pub replacement: String,
}

/// Module configuration. Every feature is independently toggleable.
#[derive(Debug, Clone)]
pub struct ModuleConfig {
    // Backend
    pub url: String,
    pub access_token: String,

    // i18n
    pub i18n_enabled: bool,
    pub i18n_sync: bool,
    pub i18n_prefix: Option<String>,
    pub translations_endpoint: String,

    // Type generation
    pub types_enabled: bool,
    pub types_output: String,
    pub rename_patterns: Vec<RenamePattern>,

    // Reverse proxy
    pub proxy_enabled: bool,
    pub proxy_path: String,

    // System files collection alias (e.g. "images")
    pub image_alias: Option<String>,

    // Composables
    pub composables_enabled: bool,
    pub mode: ClientMode,

    // Gateway server
    pub port: u16,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8055".to_string(),
            access_token: String::new(),
            i18n_enabled: true,
            i18n_sync: false,
            i18n_prefix: None,
            translations_endpoint: "/api/cms/translations".to_string(),
            types_enabled: false,
            types_output: "generated/cms_types.rs".to_string(),
            rename_patterns: Vec::new(),
            proxy_enabled: false,
            proxy_path: "/cms".to_string(),
            image_alias: None,
            composables_enabled: true,
            mode: ClientMode::Rest,
            port: 8080,
        }
    }
}

impl ModuleConfig {
    /// Load configuration from the environment, with defaults for anything
    /// unset. Never fails: missing url/token degrade at setup time instead
    /// of aborting (see [`ModuleConfig::validate`]).
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            url: env::var("CMS_URL").unwrap_or(defaults.url),
            access_token: env::var("CMS_ACCESS_TOKEN").unwrap_or_default(),

            i18n_enabled: env_flag("CMS_I18N_ENABLED", defaults.i18n_enabled),
            i18n_sync: env_flag("CMS_I18N_SYNC", defaults.i18n_sync),
            i18n_prefix: env::var("CMS_I18N_PREFIX").ok().filter(|s| !s.is_empty()),
            translations_endpoint: env::var("CMS_TRANSLATIONS_ENDPOINT")
                .unwrap_or(defaults.translations_endpoint),

            types_enabled: env_flag("CMS_TYPES_ENABLED", defaults.types_enabled),
            types_output: env::var("CMS_TYPES_OUTPUT").unwrap_or(defaults.types_output),
            rename_patterns: Vec::new(),

            proxy_enabled: env_flag("CMS_PROXY_ENABLED", defaults.proxy_enabled),
            proxy_path: env::var("CMS_PROXY_PATH").unwrap_or(defaults.proxy_path),

            image_alias: env::var("CMS_IMAGE_ALIAS").ok().filter(|s| !s.is_empty()),

            composables_enabled: env_flag("CMS_COMPOSABLES_ENABLED", defaults.composables_enabled),
            mode: env::var("CMS_CLIENT_MODE")
                .map(|v| ClientMode::parse(&v))
                .unwrap_or(defaults.mode),

            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
        }
    }

    /// Return the configuration problems worth logging at setup.
    /// None of these are fatal; features degrade instead.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.url.is_empty() {
            problems.push("no backend URL configured (set CMS_URL)".to_string());
        }
        if self.access_token.is_empty() {
            problems.push("no access token configured (set CMS_ACCESS_TOKEN)".to_string());
        }
        problems
    }
}

/// Parse a boolean environment variable ("true"/"1" vs "false"/"0").
fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}
