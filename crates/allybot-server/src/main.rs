mod config;
mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use allybot_db::Database;
use allybot_engine::Engine;
use allybot_engine::roles::RoleStore;
use allybot_engine::translate::Translator;
use allybot_gateway::{DiscordRest, Dispatcher, HttpTranslator};

use crate::config::BotConfig;
use crate::routes::AppState;

/// Ingress tokens that MUST NOT be used.
const PLACEHOLDER_TOKENS: &[&str] = &["change-me", "changeme", "secret"];

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "allybot=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let ingress_token = std::env::var("ALLYBOT_INGRESS_TOKEN").unwrap_or_default();
    if ingress_token.is_empty() || PLACEHOLDER_TOKENS.contains(&ingress_token.as_str()) {
        eprintln!("FATAL: ALLYBOT_INGRESS_TOKEN is unset or still a placeholder.");
        eprintln!("       The platform bridge must send it as a bearer token.");
        eprintln!("       Set it in your .env file and restart.");
        std::process::exit(1);
    }

    let config_path: PathBuf = std::env::var("ALLYBOT_CONFIG")
        .unwrap_or_else(|_| "config.json".into())
        .into();
    let db_path: PathBuf = std::env::var("ALLYBOT_DB_PATH")
        .unwrap_or_else(|_| "allybot.db".into())
        .into();
    let host = std::env::var("ALLYBOT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("ALLYBOT_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let api_base =
        std::env::var("ALLYBOT_API_BASE").unwrap_or_else(|_| "https://discord.com/api/v10".into());

    let config = BotConfig::load(&config_path)?;
    let secrets = config.resolve_secrets(|name| std::env::var(name).ok())?;
    info!(
        "Loaded {} ({} environment, application {:?})",
        config_path.display(),
        config.bot_params.env,
        config.bot_params.application_id
    );

    // Store
    let db = Arc::new(Database::open(&db_path)?);
    let imported = config::import_legacy_servers(&RoleStore::new(db.clone()), &config.servers).await?;
    if imported > 0 {
        info!("Imported reaction-role setup for {} community(ies) from config", imported);
    }

    // Remote services
    let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
    let platform = Arc::new(DiscordRest::new(client.clone(), &api_base, secrets.bot_token)?);
    let translator: Option<Arc<dyn Translator>> = match std::env::var("ALLYBOT_TRANSLATE_URL") {
        Ok(url) if !url.is_empty() => {
            let key = std::env::var("ALLYBOT_TRANSLATE_KEY").ok();
            Some(Arc::new(HttpTranslator::new(client, url, key)) as Arc<dyn Translator>)
        }
        _ => {
            warn!("ALLYBOT_TRANSLATE_URL not set; /translate will report a failure");
            None
        }
    };

    let engine = Arc::new(Engine::new(db, platform, translator, config.engine_settings()));
    let (dispatcher, event_loop) = Dispatcher::new(engine);
    let events = tokio::spawn(event_loop.run());

    let app = routes::router(AppState {
        dispatcher,
        ingress_token,
    });

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Allybot listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router held the last dispatcher; the loop now finishes queued events
    events.await?;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
