// tiptag Backend Server
// Tip ledger API + pending-payment reconciler

use anyhow::Result;
use std::sync::Arc;
use tiptag_backend::config::{Config, LogFormat};
use tiptag_backend::database::Database;
use tiptag_backend::ledger::Ledger;
use tiptag_backend::notify::{LogNotifier, Notifier, WebhookNotifier};
use tiptag_backend::payment::{HttpPaymentProvider, PaymentProvider, UnconfiguredProvider};
use tiptag_backend::reconciler::Reconciler;
use tiptag_backend::{app, AppState};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("tiptag_backend=info,sqlx=warn,tower_http=info"))?;
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }

    info!("Starting tiptag Backend Server");
    config.log_summary();

    // Initialize database
    let db = Database::init(&config.database_url).await?;

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())?),
        None => Arc::new(LogNotifier),
    };
    let provider: Arc<dyn PaymentProvider> = match &config.payment_api_url {
        Some(url) => Arc::new(HttpPaymentProvider::new(
            url.clone(),
            config.payment_api_key.clone(),
            config.provider_timeout,
        )?),
        None => Arc::new(UnconfiguredProvider),
    };

    let ledger = Ledger::new(db, notifier, config.settlement);

    // Create app state
    let state = Arc::new(AppState {
        ledger: ledger.clone(),
        provider: provider.clone(),
        webhook_secret: config.webhook_secret.clone(),
        allow_unsigned_callbacks: config.allow_unsigned_callbacks,
    });

    // Start pending-tip reconciler in background
    let reconciler = Reconciler::new(
        ledger,
        provider,
        config.reconcile_interval,
        config.pending_tip_ttl,
    );
    tokio::spawn(async move {
        reconciler.run().await;
    });

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = app(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("tiptag Backend listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))
}
