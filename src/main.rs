use anyhow::Result;
use cms_connect::config::ModuleConfig;
use cms_connect::module::Module;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cms_connect=info".parse()?),
        )
        .init();

    info!("Starting CMS integration server");

    let config = ModuleConfig::from_env();
    let port = config.port;
    let module = Module::new(config);

    if module.config().types_enabled {
        if let Err(e) = module.write_types().await {
            // Type generation is a convenience, not a prerequisite for serving
            tracing::error!("type generation failed: {e:#}");
        }
    }

    let app = module.router();

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Listening on port {port}");
    axum::serve(listener, app).await?;

    Ok(())
}
