use crate::cli::ServeArgs;
use crate::infra::{
    AppState, InMemoryCommentStore, InMemoryDossierRepository, InMemoryInvoiceStore,
    InMemoryMeetingStore, InMemoryTimelineStore, LoggingNotificationChannel, RecordActorDirectory,
};
use crate::routes::with_dossier_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use claimflow::config::AppConfig;
use claimflow::error::AppError;
use claimflow::telemetry;
use claimflow::workflows::dossier::{DossierLifecycleService, StatusRegistry, TimelineLog};

const SWEEP_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let repository = Arc::new(InMemoryDossierRepository::default());
    let timeline = Arc::new(TimelineLog::new(
        Arc::new(InMemoryTimelineStore::default()),
        Arc::new(InMemoryCommentStore::default()),
        Arc::new(InMemoryMeetingStore::default()),
    ));
    let service = Arc::new(DossierLifecycleService::new(
        repository,
        Arc::new(LoggingNotificationChannel),
        Arc::new(StatusRegistry::standard()),
        timeline,
        Arc::new(InMemoryInvoiceStore::new(
            config.billing.invoice_prefix.clone(),
        )),
        Arc::new(RecordActorDirectory),
        config.billing.clone(),
    ));

    // Periodic reminder sweep for dossiers stuck on a client action.
    let sweeper = service.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match sweeper.sweep_stale_dossiers(chrono::Utc::now()) {
                Ok(flagged) if !flagged.is_empty() => {
                    info!(count = flagged.len(), "reminder sweep flagged idle dossiers");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "reminder sweep failed"),
            }
        }
    });

    let app = with_dossier_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "dossier lifecycle service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
