//! # Webhook listener
//!
//! Serves a CRC challenge endpoint next to a signed webhook event: a POST to
//! `/webhooks/twitter` fires the task only when its `X-Webhook-Signature`
//! header carries `hex(sha256(secret + body))` and the body mentions a
//! favorited tweet.
//!
//! Usage:
//!   cargo run --example webhook_listener -- --port 5000 --secret s3cret
//!   curl -X POST localhost:5000/webhooks/twitter \
//!        -H "X-Webhook-Signature: <hex>" -d '{"favorite_events":[...]}'

use anyhow::Result;
use clap::Parser;
use david::{
    David, DavidConfig, Event, Occurrence, Router, Task, Verifier, WebhookConfig, WebhookRequest,
    WebhookSpec,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "webhook_listener", version, about = "🌐 David webhook listener")]
struct Cli {
    /// Listener port
    #[arg(short, long, default_value = "5000")]
    port: u16,

    /// Shared signing secret (recommended: set WEBHOOK_SECRET env var)
    #[arg(long, default_value = "")]
    secret: String,

    /// Require this API key on webhook requests
    #[arg(long, default_value = "")]
    api_key: String,

    /// Load the listener config from a TOML file instead of flags
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn liked_a_tweet(request: &WebhookRequest) -> bool {
    request
        .json::<serde_json::Value>()
        .ok()
        .and_then(|body| body.get("favorite_events").cloned())
        .and_then(|events| events.as_array().map(|events| !events.is_empty()))
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "david=debug,david_gateway=debug,tower_http=debug"
    } else {
        "david=info,david_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => DavidConfig::load_from(path)?,
        None => DavidConfig::with_webhook(WebhookConfig {
            api_key: cli.api_key.clone(),
            ..WebhookConfig::on_port(cli.port)
        }),
    };

    let secret = std::env::var("WEBHOOK_SECRET").unwrap_or(cli.secret.clone());
    if secret.is_empty() {
        tracing::warn!("⚠️  No signing secret set, signatures will never match");
    }
    let signed = Verifier::sha256_signature(secret, "X-Webhook-Signature");
    let verifier = Verifier::new_async(move |request| {
        let signed = signed.clone();
        async move { signed.verify(request.clone()).await && liked_a_tweet(&request) }
    });

    let crc = Router::new().route(
        "/webhooks/twitter",
        axum::routing::get(|| async { "crc ok" }),
    );

    let liked = Event::webhook(
        WebhookSpec::new("liked a tweet", "POST", "/webhooks/twitter").with_verifier(verifier),
    );
    let react = Task::from_fn("something", |occurrence: Occurrence| {
        if let Some(request) = occurrence.as_webhook() {
            tracing::info!("👍 Liked a tweet ({} bytes)", request.body.len());
        }
        Ok(())
    });

    let mut dave = David::new(config).with_routes(crc);
    dave.on(liked, react);
    dave.start().await?;

    tokio::signal::ctrl_c().await?;
    dave.shutdown().await;
    Ok(())
}
