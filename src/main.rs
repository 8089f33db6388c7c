use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use storefront_api as api;
use api::services::{
    flash_sale_scheduler::FlashSaleScheduler,
    payment_gateway::{HttpPaymentGateway, PaymentGateway},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    if cfg.payment_server_key.is_none() {
        info!("No payment server key configured; webhook signatures are not verified");
    }
    let gateway: Arc<dyn PaymentGateway> = Arc::new(
        HttpPaymentGateway::new(
            cfg.payment_gateway_base_url.clone(),
            cfg.payment_server_key.clone(),
            cfg.payment_gateway_timeout(),
        )
        .context("failed to build payment gateway client")?,
    );

    let scheduler = FlashSaleScheduler::new(db_arc.clone(), event_sender.clone())
        .spawn(cfg.flash_sale_sweep_interval());

    let services = api::handlers::AppServices::new(
        db_arc.clone(),
        &cfg,
        gateway,
        event_sender.clone(),
    );
    let app_state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        event_sender,
        services,
    };

    let mut app = api::build_app(app_state);
    if cfg.is_development() {
        info!("Using permissive CORS in development");
        app = app.layer(CorsLayer::permissive());
    }

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.host, cfg.port))?;
    info!("storefront-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.abort();
    info!("storefront-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
