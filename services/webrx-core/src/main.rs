//! WebRX core daemon
//!
//! Starts the capture chain from environment configuration, keeps the shared
//! spectrum and CPU workers alive with logging clients, and tears everything
//! down on Ctrl+C.

use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webrx_core::dsp::SpectrumClient;
use webrx_core::features::PathFeatureDetector;
use webrx_core::{Config, CpuUsageClient, CpuUsageThread, CsdrFactory, RtlNmuxSource, SpectrumThread};

/// Frames between spectrum progress log lines
const SPECTRUM_LOG_EVERY: u64 = 100;

struct CpuLogger;

impl CpuUsageClient for CpuLogger {
    fn write_cpu_usage(&self, usage: f64) {
        info!("[cpu] usage {:.1}%", usage * 100.0);
    }
}

#[derive(Default)]
struct SpectrumMonitor {
    frames: AtomicU64,
}

impl SpectrumClient for SpectrumMonitor {
    fn write_spectrum_data(&self, data: &[u8]) {
        let n = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if n % SPECTRUM_LOG_EVERY == 0 {
            debug!("[spectrum] {} frames received, last {} bytes", n, data.len());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("webrx_core=info".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("===========================================");
    info!("   WebRX core - SDR receiver runtime");
    info!("===========================================");

    let config = Config::from_env();
    info!("Configuration:");
    info!("  Device type: {}", config.rtl_type);
    info!("  Sample rate: {} S/s", config.samp_rate);
    info!("  Center frequency: {} Hz", config.center_freq);
    info!("  IQ server port: {}", config.iq_server_port);
    info!("  nmux memory: {} MB", config.nmux_memory);
    let props = config.into_properties();

    let source = RtlNmuxSource::new(&props, PathFeatureDetector);
    source.setup();

    let cpu = CpuUsageThread::new();
    let cpu_client: Arc<dyn CpuUsageClient> = Arc::new(CpuLogger);
    cpu.add_client(&cpu_client)?;

    let spectrum = SpectrumThread::new(&props, Arc::new(CsdrFactory));
    let spectrum_client: Arc<dyn SpectrumClient> = Arc::new(SpectrumMonitor::default());
    spectrum.add_client(&spectrum_client)?;

    info!("Running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    spectrum.remove_client(&spectrum_client);
    cpu.remove_client(&cpu_client);
    source.stop();
    info!("Shutdown complete");
    Ok(())
}
