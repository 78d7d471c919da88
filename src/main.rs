use crypto_alert_engine::channels::{
    AudibleChannel,
    ChannelRegistry,
    HistoryFileChannel,
    TelegramChannel,
    VisualChannel,
    WebhookChannel,
};
use crypto_alert_engine::providers::BinanceMarketData;
use crypto_alert_engine::services::{
    InMemoryRuleRepository,
    NotificationDispatcher,
    NotificationHistoryStore,
    RuleRepository,
    RuleSetEvaluator,
};
use crypto_alert_engine::{ AlertChecker, AppError, Config, Result };
use std::sync::Arc;
use tokio::sync::{ watch, RwLock };
use tracing_subscriber::{ layer::SubscriberExt, util::SubscriberInitExt };

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber
        ::registry()
        .with(
            tracing_subscriber::EnvFilter
                ::try_from_default_env()
                .unwrap_or_else(|_| "crypto_alert_engine=debug,tower_http=debug".into())
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().map_err(|e| AppError::Config(e.to_string()))?;
    let settings = config.engine.clone();

    tracing::info!(
        interval_secs = settings.check_interval.as_secs(),
        grouping_secs = settings.grouping_window.as_secs(),
        "Starting crypto-alert-engine"
    );

    // Market data
    let provider = Arc::new(
        BinanceMarketData::new(config.binance_api_base.clone(), settings.market_data_timeout)?
    );

    // Rule storage
    let repository: Arc<dyn RuleRepository> = match &config.rules_file {
        Some(path) => Arc::new(InMemoryRuleRepository::with_file(path).await?),
        None => Arc::new(InMemoryRuleRepository::new()),
    };

    // Notification history, restored from the last shutdown
    let history = match &config.history_file {
        Some(path) => NotificationHistoryStore::load_from(path, settings.history_capacity).await?,
        None => NotificationHistoryStore::new(settings.history_capacity),
    };
    let history = Arc::new(RwLock::new(history));

    // Channels
    let mut channels = ChannelRegistry::new()
        .with(Arc::new(VisualChannel::new()))
        .with(Arc::new(AudibleChannel::stdout()));
    if let Some(path) = &config.notification_log_file {
        channels.register(Arc::new(HistoryFileChannel::new(path)));
    }
    if let Some(url) = &config.system_webhook_url {
        channels.register(Arc::new(WebhookChannel::new(url, settings.market_data_timeout)?));
    }
    if let Some(telegram) = &config.telegram {
        channels.register(
            Arc::new(TelegramChannel::from_token(telegram.bot_token.clone(), telegram.chat_id))
        );
    }
    tracing::info!(channels = ?channels.kinds(), "Notification channels ready");

    // Engine
    let evaluator = RuleSetEvaluator::new(provider).with_fetch_timeout(settings.market_data_timeout);
    let grouping_window = chrono::Duration
        ::from_std(settings.grouping_window)
        .map_err(|e| AppError::Config(format!("GROUPING_WINDOW_SECS out of range: {}", e)))?;
    let dispatcher = NotificationDispatcher::new(history.clone(), channels).with_grouping_window(
        grouping_window
    );

    let mut checker = AlertChecker::new(repository.clone(), evaluator, dispatcher).with_interval(
        settings.check_interval
    );
    if let Some(path) = &config.history_file {
        checker = checker.with_history_file(path);
    }
    let checker = Arc::new(checker);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let checker_task = tokio::spawn(checker.clone().start(shutdown_rx));

    // HTTP API
    let app_state = crypto_alert_engine::api::AppState::new(repository, history, checker);
    let app = crypto_alert_engine::api::router(app_state);

    let addr = config.server_addr();
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener
        ::bind(&addr).await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    axum
        ::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        }).await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    // Stop the checker; it flushes history on the way out
    let _ = shutdown_tx.send(true);
    if let Err(e) = checker_task.await {
        tracing::error!(error = %e, "Alert checker task failed");
    }

    Ok(())
}
