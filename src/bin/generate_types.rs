//! Type generation binary - introspects the backend schema and writes
//! Rust type definitions for the collections it finds
//!
//! Usage:
//!   cargo run --bin typegen                 # Write to the configured output path
//!   cargo run --bin typegen -- --print      # Print to stdout instead
//!
//! Required environment variables:
//! - CMS_URL
//! - CMS_ACCESS_TOKEN
//!
//! Optional:
//! - CMS_TYPES_OUTPUT (defaults to generated/cms_types.rs)
//! - CMS_IMAGE_ALIAS (rename the system files collection in output)

use anyhow::Result;
use cms_connect::config::ModuleConfig;
use cms_connect::module::Module;
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

    let print_only = std::env::args().any(|arg| arg == "--print");

    let config = ModuleConfig::from_env();
    let module = Module::new(config);

    if print_only {
        let text = module.generate_types().await?;
        println!("{text}");
    } else {
        module.write_types().await?;
        info!("Type generation complete");
    }

    Ok(())
}
