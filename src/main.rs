use std::sync::Arc;

use anyhow::{anyhow, Context};
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{info, warn};

mod access;
mod config;
mod db;
mod error;
mod handlers;
mod llm;
mod prompt;
mod state;
mod storage;
mod utils;

use access::{resolve_feature_access, SubscriptionTier};
use config::{Config, ConfigSource, ProcessEnv};
use db::database::Database;
use handlers::access::limit_as_i64;
use llm::GeminiClient;
use state::AppState;
use storage::ImageStore;
use utils::logging::init_logging;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliCommand {
    Serve,
    Policy { tier: SubscriptionTier },
    SetTier { user_id: String, tier: SubscriptionTier },
}

fn usage() -> &'static str {
    "Usage: headshot_maker [policy --tier <guest|free|premium|professional>] [set-tier --user <id> --tier <tier>]"
}

fn parse_tier_value(value: &str) -> anyhow::Result<SubscriptionTier> {
    SubscriptionTier::parse_strict(value).ok_or_else(|| anyhow!("Invalid --tier value: {value}"))
}

fn parse_cli_args(args: &[String]) -> anyhow::Result<CliCommand> {
    let command = match args.get(1).map(|value| value.as_str()) {
        None | Some("serve") => return Ok(CliCommand::Serve),
        Some("--help") | Some("-h") => return Err(anyhow!(usage())),
        Some(command @ ("policy" | "set-tier")) => command,
        Some(other) => return Err(anyhow!("Unknown command: {other}\n{}", usage())),
    };

    let mut tier: Option<SubscriptionTier> = None;
    let mut user_id: Option<String> = None;

    let mut index = 2;
    while index < args.len() {
        match args[index].as_str() {
            "--tier" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --tier"))?;
                tier = Some(parse_tier_value(value)?);
            }
            "--user" if command == "set-tier" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --user"))?;
                if value.trim().is_empty() {
                    return Err(anyhow!("--user must not be empty"));
                }
                user_id = Some(value.trim().to_string());
            }
            other => {
                return Err(anyhow!("Unknown {command} argument: {other}\n{}", usage()));
            }
        }
        index += 1;
    }

    let tier = tier.ok_or_else(|| anyhow!("--tier is required"))?;
    if command == "policy" {
        return Ok(CliCommand::Policy { tier });
    }
    let user_id = user_id.ok_or_else(|| anyhow!("--user is required"))?;
    Ok(CliCommand::SetTier { user_id, tier })
}

fn warn_about_unknown_styles(config: &Config, source: &dyn ConfigSource) {
    for tier in SubscriptionTier::ALL {
        let policy = resolve_feature_access(tier, source);
        let unknown = config
            .prompt_templates
            .unknown_styles(policy.allowed_styles.iter());
        if !unknown.is_empty() {
            warn!(
                "Tier {} allows styles without a built-in phrase: {}",
                tier,
                unknown.join(", ")
            );
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {err}");
    }
    info!("Shutdown signal received");
}

async fn serve(config: Config) -> anyhow::Result<()> {
    if config.gemini_api_key.trim().is_empty() {
        return Err(anyhow!("GEMINI_API_KEY is required to serve requests"));
    }

    let source: Arc<dyn ConfigSource> = Arc::new(ProcessEnv);
    warn_about_unknown_styles(&config, source.as_ref());

    let model = GeminiClient::new(&config)?;
    let db = Database::init(&config.database_url).await?;
    let store = ImageStore::new(config.storage_dir.clone(), &config.public_storage_url)?;
    tokio::fs::create_dir_all(store.dir())
        .await
        .with_context(|| format!("Failed to create {}", store.dir().display()))?;

    info!(
        "Starting Headshot Maker (model={}, storage={})",
        config.gemini_image_model,
        store.dir().display()
    );

    let state = AppState::new(
        db,
        Arc::new(model),
        config.prompt_templates.clone(),
        source,
        store.clone(),
        config.rate_limit_seconds,
    );

    let app = handlers::api_router()
        .nest_service("/storage", ServeDir::new(store.dir()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state);

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    info!("HTTP listening on http://{}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Config::load()?;
    let _guards = init_logging(&config);
    for warning in &config.warnings {
        warn!("{warning}");
    }

    let args: Vec<String> = std::env::args().collect();
    match parse_cli_args(&args)? {
        CliCommand::Serve => serve(config).await,
        CliCommand::Policy { tier } => {
            let policy = resolve_feature_access(tier, &ProcessEnv);
            println!("{}", serde_json::to_string_pretty(&policy)?);
            Ok(())
        }
        CliCommand::SetTier { user_id, tier } => {
            let db = Database::init(&config.database_url).await?;
            let policy = resolve_feature_access(tier, &ProcessEnv);
            let profile = db
                .set_tier(&user_id, tier, limit_as_i64(policy.generation_limit))
                .await?;
            info!("Set tier of {} to {}", user_id, tier);
            println!("{}", serde_json::to_string_pretty(&profile)?);
            Ok(())
        }
    }
}
