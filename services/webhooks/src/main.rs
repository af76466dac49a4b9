use std::sync::Arc;
use std::time::Duration;

use sea_orm::Database;
use tokio_util::sync::CancellationToken;
use tracing::info;

use veganbase_core::tracing::init_tracing;
use veganbase_domain::event::{WEBHOOK_PROCESS_TOPIC, WEBHOOK_RECEIVE_TOPIC};
use veganbase_pubsub::{Discipline, PubSub, RedisPubSub, RedisPubSubConfig};
use veganbase_webhooks::config::WebhooksConfig;
use veganbase_webhooks::dispatcher::Dispatcher;
use veganbase_webhooks::domain::types::RetryPolicy;
use veganbase_webhooks::infra::db::{DbEventRepository, DbWebhookRepository};
use veganbase_webhooks::infra::delivery::ReqwestTransport;
use veganbase_webhooks::router::build_router;
use veganbase_webhooks::state::AppState;
use veganbase_webhooks::workers::{
    DISPATCHER_SUBSCRIPTION, run_process_loop, run_receive_loop, run_retry_loop,
};

#[tokio::main]
async fn main() {
    init_tracing("info,sqlx=warn");

    let config = WebhooksConfig::from_env();

    let db = Database::connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let redis = deadpool_redis::Config::from_url(&config.redis_url)
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .expect("failed to create Redis pool");

    let broker: Arc<dyn PubSub> = Arc::new(RedisPubSub::new(
        redis,
        RedisPubSubConfig {
            app_name: config.app_name.clone(),
            stream_max_len: config.pubsub_stream_max_len,
            ..Default::default()
        },
    ));

    let transport = ReqwestTransport::new(Duration::from_secs(config.delivery_timeout_secs))
        .expect("failed to build delivery client");

    let dispatcher = Arc::new(Dispatcher::new(
        DbWebhookRepository { db: db.clone() },
        DbEventRepository { db: db.clone() },
        transport,
        broker.clone(),
        RetryPolicy::with_max_attempts(config.max_delivery_attempts),
    ));

    let received = broker
        .subscribe(
            WEBHOOK_RECEIVE_TOPIC,
            DISPATCHER_SUBSCRIPTION,
            Discipline::CompetingConsumers,
        )
        .await
        .expect("failed to subscribe to receive topic");
    let to_process = broker
        .subscribe(
            WEBHOOK_PROCESS_TOPIC,
            DISPATCHER_SUBSCRIPTION,
            Discipline::CompetingConsumers,
        )
        .await
        .expect("failed to subscribe to process topic");

    // Stopped in pipeline order so each stage drains into one that is still running.
    let receive_stop = CancellationToken::new();
    let process_stop = CancellationToken::new();
    let retry_stop = CancellationToken::new();
    let loops = [
        (
            "receive",
            receive_stop.clone(),
            tokio::spawn(run_receive_loop(
                dispatcher.clone(),
                received,
                receive_stop.clone(),
            )),
        ),
        (
            "process",
            process_stop.clone(),
            tokio::spawn(run_process_loop(
                dispatcher.clone(),
                to_process,
                process_stop.clone(),
            )),
        ),
        (
            "retry",
            retry_stop.clone(),
            tokio::spawn(run_retry_loop(
                dispatcher,
                Duration::from_secs(config.retry_interval_secs),
                retry_stop,
            )),
        ),
    ];

    let state = AppState {
        db,
        broker: broker.clone(),
    };
    let router = build_router(state);
    let http_addr = format!("0.0.0.0:{}", config.webhooks_port);
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .expect("failed to bind");

    info!("webhooks service listening on {http_addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await
        .expect("server error");

    for (name, stop, handle) in loops {
        stop.cancel();
        if let Err(e) = handle.await {
            tracing::error!(dispatcher_loop = name, error = %e, "dispatcher loop panicked");
        }
    }
    if let Err(e) = broker.close().await {
        tracing::error!(error = %e, "failed to close broker client");
    }
    info!("webhooks service stopped");
}
