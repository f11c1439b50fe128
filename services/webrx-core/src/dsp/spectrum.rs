//! Shared wideband spectrum broadcaster
//!
//! One FFT pipeline serves every connected client. It is started when the
//! first client subscribes and torn down when the last one leaves.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{Compression, Demodulator, Dsp, DspFactory, PipeOptions, SpectrumClient};
use crate::error::Result;
use crate::props::PropertyManager;
use crate::worker::{SharedWorker, WorkerContext};

/// Shared keys read once when the pipeline starts
pub const SPECTRUM_PROPERTIES: &[&str] = &[
    "samp_rate",
    "fft_size",
    "fft_fps",
    "fft_voverlap_factor",
    "fft_compression",
    "csdr_dynamic_bufsize",
    "csdr_print_bufsizes",
    "csdr_through",
    "iq_server_port",
];

/// Back-off after an empty read
const READ_RETRY: Duration = Duration::from_secs(1);

/// Bytes of bufsize preamble csdr emits with dynamic buffer sizing
const PREAMBLE_BYTES: usize = 8;

/// FFT frames averaged per output line for a given vertical overlap.
/// No averaging without overlap.
pub fn fft_averages(samp_rate: f64, fft_size: f64, fft_fps: f64, overlap: f64) -> u32 {
    if overlap <= 0.0 || overlap >= 1.0 || fft_size <= 0.0 || fft_fps <= 0.0 {
        return 0;
    }
    (samp_rate / fft_size / fft_fps / (1.0 - overlap)).round() as u32
}

pub struct SpectrumThread {
    worker: SharedWorker<dyn SpectrumClient>,
}

impl SpectrumThread {
    pub fn new(props: &PropertyManager, factory: Arc<dyn DspFactory>) -> Self {
        let props = props.clone();
        let worker = SharedWorker::new("spectrum", move |ctx: WorkerContext<dyn SpectrumClient>| {
            run(&props, factory.as_ref(), ctx)
        });
        Self { worker }
    }

    pub fn add_client(&self, client: &Arc<dyn SpectrumClient>) -> io::Result<()> {
        self.worker.add_client(client)
    }

    pub fn remove_client(&self, client: &Arc<dyn SpectrumClient>) {
        self.worker.remove_client(client);
    }

    pub fn shutdown(&self) {
        self.worker.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    pub fn client_count(&self) -> usize {
        self.worker.listener_count()
    }
}

fn configure(props: &PropertyManager, dsp: &dyn Dsp) -> Result<()> {
    let samp_rate = props.get_i64("samp_rate")?;
    let fft_size = props.get_i64("fft_size")?;
    let fft_fps = props.get_i64("fft_fps")?;
    let overlap = props.get_f64("fft_voverlap_factor").unwrap_or(0.0);

    dsp.set_pipe_options(PipeOptions {
        nc_port: u16::try_from(props.get_i64("iq_server_port")?).unwrap_or_default(),
        dynamic_bufsize: props.get_bool("csdr_dynamic_bufsize").unwrap_or(false),
        print_bufsizes: props.get_bool("csdr_print_bufsizes").unwrap_or(false),
        through: props.get_bool("csdr_through").unwrap_or(false),
    });
    dsp.set_demodulator(Demodulator::Fft);
    dsp.set_samp_rate(u32::try_from(samp_rate).unwrap_or_default());
    dsp.set_fft_size(u32::try_from(fft_size).unwrap_or_default());
    dsp.set_fft_fps(u32::try_from(fft_fps).unwrap_or_default());
    dsp.set_fft_averages(fft_averages(
        samp_rate as f64,
        fft_size as f64,
        fft_fps as f64,
        overlap,
    ));

    let compression = match props.get_str("fft_compression") {
        Ok(s) => s.parse()?,
        Err(_) => Compression::None,
    };
    dsp.set_fft_compression(compression);
    Ok(())
}

fn run(shared: &PropertyManager, factory: &dyn DspFactory, ctx: WorkerContext<dyn SpectrumClient>) {
    let props = shared.collect(SPECTRUM_PROPERTIES);
    let dsp = factory.create();

    if let Err(e) = configure(&props, dsp.as_ref()) {
        error!("[spectrum] cannot configure FFT pipeline: {}", e);
        return;
    }
    info!("[spectrum] spectrum thread initialized");

    if let Err(e) = dsp.start() {
        error!("[spectrum] failed to start FFT pipeline: {:#}", e);
        return;
    }
    if props.get_bool("csdr_dynamic_bufsize").unwrap_or(false) {
        dsp.read(PREAMBLE_BYTES);
        info!("[spectrum] CSDR_DYNAMIC_BUFSIZE_ON = 1");
    }

    let bytes_to_read = dsp.fft_bytes_to_read();
    info!("[spectrum] started, {} bytes per frame", bytes_to_read);
    while ctx.is_running() {
        let data = dsp.read(bytes_to_read);
        if data.is_empty() {
            thread::sleep(READ_RETRY);
            continue;
        }
        if ctx.listeners.broadcast(|c| c.write_spectrum_data(&data)) == 0 {
            warn!("[spectrum] frame dropped, no listeners");
        }
    }

    dsp.stop();
    info!("[spectrum] spectrum thread shut down");
}
