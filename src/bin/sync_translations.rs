//! Translation sync binary - pushes a local locale file to the backend
//!
//! The locale file is a JSON object; nested objects are flattened to
//! dotted keys (`{"nav": {"home": "Home"}}` becomes `nav.home`).
//!
//! Usage:
//!   cargo run --bin sync-translations -- <locale> <file.json>
//!
//! Required environment variables:
//! - CMS_URL
//! - CMS_ACCESS_TOKEN
//!
//! Optional:
//! - CMS_I18N_PREFIX (only sync keys under this prefix)

use anyhow::{bail, Context, Result};
use cms_connect::config::ModuleConfig;
use cms_connect::module::Module;
use cms_connect::translations::flatten_locale_json;
use std::fs;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cms_connect=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let (locale, path) = match args.as_slice() {
        [_, locale, path] => (locale.clone(), path.clone()),
        _ => bail!("usage: sync-translations <locale> <file.json>"),
    };

    let raw = fs::read_to_string(&path).with_context(|| format!("failed to read {path}"))?;
    let json: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("{path} is not valid JSON"))?;
    let target = flatten_locale_json(&json);

    if target.is_empty() {
        bail!("{path} contains no translatable entries");
    }

    info!("Syncing {} keys for locale {locale}", target.len());

    let config = ModuleConfig::from_env();
    let module = Module::new(config);

    let changed = module.sync_locale(&locale, &target).await?;
    if changed {
        info!("Locale {locale} synced");
    } else {
        info!("Locale {locale} already up to date");
    }

    Ok(())
}
