//! livedub-sts: STS service binary

use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use livedub_pipeline::{
    create_asr_engine, create_translation_engine, create_tts_engine, ArtifactConfig,
    ArtifactLogger, AsrComponent, AsrConfig, CoordinatorConfig, PipelineCoordinator,
    TranslationComponent, TranslationConfig, TtsComponent, TtsConfig,
};
use livedub_service::{router, AppState, EventHandler, ServiceSettings, SessionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = ServiceSettings::load().context("failed to load settings")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if settings.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    let asr_engine =
        create_asr_engine(&settings.asr_engine).context("failed to create ASR engine")?;
    let translation_engine = create_translation_engine(&settings.translation_engine);
    let tts_engine = create_tts_engine(&settings.tts_engine);

    let mut coordinator = PipelineCoordinator::new(
        AsrComponent::new(asr_engine, AsrConfig::default()),
        TranslationComponent::new(translation_engine, TranslationConfig::default()),
        TtsComponent::new(tts_engine, TtsConfig::default()),
        CoordinatorConfig::default(),
    );

    if settings.artifacts_enabled {
        let mut artifact_config = ArtifactConfig::default();
        if let Some(path) = &settings.artifacts_path {
            artifact_config.root = path.clone();
        }
        coordinator = coordinator.with_artifacts(Arc::new(ArtifactLogger::new(artifact_config)));
    }

    let store = Arc::new(SessionStore::new());
    let handler = Arc::new(EventHandler::new(store, Arc::new(coordinator)));

    let app = router(AppState {
        handler,
        prometheus,
    });

    let listener = tokio::net::TcpListener::bind(&settings.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.listen_addr))?;
    tracing::info!(addr = %settings.listen_addr, "STS service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    Ok(())
}
