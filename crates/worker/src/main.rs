//! livedub-worker: media worker binary
//!
//! The RTSP/RTMP muxer elements live in the external media framework, which
//! feeds segment pairs into the worker's source seam and consumes sync pairs
//! from its sink seam. Demo mode substitutes synthetic segments so the
//! dispatch/flow-control path can run standalone.

use std::process::ExitCode;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use livedub_media::{ChannelEgressSink, ChannelSegmentSource, SegmentPair};
use livedub_worker::{run, WorkerError, WorkerSettings};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let settings = WorkerSettings::load().context("failed to load settings")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if settings.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    PrometheusBuilder::new()
        .with_http_listener(
            settings
                .metrics_addr
                .parse::<std::net::SocketAddr>()
                .context("invalid metrics_addr")?,
        )
        .install()
        .context("failed to install Prometheus exporter")?;

    tracing::info!(
        ingest = %settings.ingest.url(),
        egress = %settings.egress.url(),
        sts = %settings.sts_url,
        "worker starting"
    );

    let (source_tx, source) = ChannelSegmentSource::new(16);
    let (sink, mut egress_rx) = ChannelEgressSink::new(16);

    // Demo feeder: synthetic tone segments at the configured chunk boundary.
    if let Some(count) = settings.demo_segments {
        let chunk_ms = settings.segmenter.chunk_duration_ms;
        let rate = settings.stream.sample_rate_hz;
        tokio::spawn(async move {
            for batch in 0..count {
                let samples: Vec<f32> = (0..(rate as u64 * chunk_ms / 1000))
                    .map(|i| (i as f32 * 330.0 * std::f32::consts::TAU / rate as f32).sin() * 0.4)
                    .collect();
                let audio = livedub_core::audio::samples_to_f32le(&samples);
                let pair = SegmentPair::new(
                    batch,
                    batch * chunk_ms * 1_000_000,
                    chunk_ms * 1_000_000,
                    vec![0u8; 4096],
                    audio,
                );
                if source_tx.send(pair).await.is_err() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(chunk_ms)).await;
            }
        });
    }

    // Egress consumer: hands pairs to the external muxer bridge; demo mode
    // just accounts for them.
    tokio::spawn(async move {
        while let Some(pair) = egress_rx.recv().await {
            tracing::info!(
                batch = pair.video.batch_number,
                pts_ns = pair.pts_ns,
                audio_bytes = pair.audio_data.len(),
                "sync pair ready for egress"
            );
        }
    });

    match run(settings.worker_config(), source, sink).await {
        Ok(()) => {
            tracing::info!("worker finished");
            Ok(ExitCode::SUCCESS)
        }
        Err(WorkerError::PeerExhausted) => {
            // Non-zero exit so the supervisor restarts us.
            tracing::error!("exiting after reconnection exhaustion");
            Ok(ExitCode::FAILURE)
        }
    }
}
