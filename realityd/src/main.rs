mod cli;

use actix_cors::Cors;
use actix_web::web::Data;
use actix_web::{web, App, HttpServer};
use clap::Parser;
use reality::{http, rate_limit, validate_config, Config, Registry};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: &std::path::Path) -> anyhow::Result<Config> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
    let config: Config = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;
    Ok(config)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let mut config = load_config(&cli.config)?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    init_tracing(config.debug);

    if let Err(errors) = validate_config(&config) {
        anyhow::bail!("{errors}");
    }

    let bind_addr = format!("{}:{}", config.host, config.port);
    let base_path = config.base_path.clone();
    let cors_origins = config.cors.origins.clone();
    let cors_credentials = config.cors.credentials;
    let rate_limit_enabled = config.rate_limit.enabled;
    let rate_limit_max = config.rate_limit.max_requests;
    let rate_limit_window = Duration::from_millis(config.rate_limit.window_ms);

    let registry = Arc::new(Registry::build(config).await?);
    let _decay_handle = registry.spawn_decay_loop(Duration::from_secs(30));
    let _retry_handle = registry.spawn_retry_loop(Duration::from_secs(5));

    tracing::info!(target: "http", %bind_addr, base_path = %base_path, "starting reality server");

    HttpServer::new(move || {
        let mut cors = Cors::default()
            .allowed_methods(reality_protocol::headers::CORS_ALLOWED_METHODS)
            .allowed_headers(reality_protocol::headers::CORS_ALLOWED_HEADERS.map(|h| h.to_string()));
        cors = if cors_origins.iter().any(|o| o == "*") {
            cors.allow_any_origin()
        } else {
            cors_origins.iter().fold(cors, |cors, origin| cors.allowed_origin(origin))
        };
        if cors_credentials {
            cors = cors.supports_credentials();
        }

        App::new()
            .app_data(Data::new(registry.clone()))
            .wrap(cors)
            .wrap(rate_limit::RateLimit::new(rate_limit_enabled, rate_limit_max, rate_limit_window))
            .service(
                web::scope(&base_path)
                    .route("/sync", web::post().to(http::sync))
                    .route("/invalidate", web::post().to(http::invalidate))
                    .route("/update", web::post().to(http::update))
                    .route("/versions", web::get().to(http::versions))
                    .route("/health", web::get().to(http::health))
                    .default_service(web::to(http::not_found)),
            )
    })
    .bind(bind_addr)?
    .run()
    .await?;

    Ok(())
}
