//! Per-session demodulation pipeline
//!
//! A `DspManager` owns one engine and the reader threads pushing its output
//! to the session handler. Property changes reconfigure the engine in place
//! where it can be tuned live, and stop/reconfigure/restart it where the
//! change is structural (primary or secondary mode).

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{
    Compression, Demodulator, Dsp, DspFactory, DspHandler, Modulation, PipeOptions,
    SecondaryDspConfig, SecondaryModulation,
};
use crate::props::{Property, PropertyManager, Subscription, Value};

/// Shared keys a session depends on
pub const SESSION_PROPERTIES: &[&str] = &[
    "audio_compression",
    "fft_compression",
    "digimodes_fft_size",
    "csdr_dynamic_bufsize",
    "csdr_print_bufsizes",
    "csdr_through",
    "iq_server_port",
    "digimodes_enable",
    "samp_rate",
];

/// Demodulated audio is pushed in chunks of this size
pub const AUDIO_CHUNK_SIZE: usize = 256;

/// Back-off after a short read from the engine
const READ_RETRY: Duration = Duration::from_secs(1);

const DEFAULT_NC_PORT: u16 = 4951;

/// Initial bandpass edges in Hz
const DEFAULT_BPF: (f64, f64) = (-4000.0, 4000.0);

pub struct DspManager {
    inner: Arc<ManagerInner>,
    props: PropertyManager,
    subscriptions: Vec<Subscription>,
}

struct ManagerInner {
    handler: Arc<dyn DspHandler>,
    dsp: Arc<dyn Dsp>,
    /// Run flag of the current primary readers, `None` while stopped
    primary: Mutex<Option<Arc<AtomicBool>>>,
    /// Run flag of the current secondary readers, `None` while stopped
    secondary: Mutex<Option<Arc<AtomicBool>>>,
}

impl DspManager {
    pub fn new(
        handler: Arc<dyn DspHandler>,
        props: &PropertyManager,
        factory: &dyn DspFactory,
    ) -> Self {
        let local = props.collect(SESSION_PROPERTIES);
        let dsp = factory.create();

        dsp.set_offset_freq(0);
        dsp.set_bpf(DEFAULT_BPF.0, DEFAULT_BPF.1);
        dsp.set_pipe_options(PipeOptions {
            nc_port: local
                .get_i64("iq_server_port")
                .ok()
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(DEFAULT_NC_PORT),
            dynamic_bufsize: local.get_bool("csdr_dynamic_bufsize").unwrap_or(false),
            print_bufsizes: local.get_bool("csdr_print_bufsizes").unwrap_or(false),
            through: local.get_bool("csdr_through").unwrap_or(false),
        });

        let mut manager = Self {
            inner: Arc::new(ManagerInner {
                handler,
                dsp,
                primary: Mutex::new(None),
                secondary: Mutex::new(None),
            }),
            props: local,
            subscriptions: Vec::new(),
        };
        manager.wire_properties();
        manager
    }

    fn wire_properties(&mut self) {
        // Shared keys already carry a value; apply it right away
        self.wire("audio_compression", true, |inner, v| {
            if let Some(c) = compression("audio_compression", v) {
                inner.dsp.set_audio_compression(c);
            }
        });
        self.wire("fft_compression", true, |inner, v| {
            if let Some(c) = compression("fft_compression", v) {
                inner.dsp.set_fft_compression(c);
            }
        });
        self.wire("digimodes_fft_size", true, |inner, v| {
            if let Some(size) = unsigned("digimodes_fft_size", v) {
                inner.dsp.set_secondary_fft_size(size);
            }
        });
        self.wire("samp_rate", true, |inner, v| {
            if let Some(rate) = unsigned("samp_rate", v) {
                inner.dsp.set_samp_rate(rate);
            }
        });

        self.wire("output_rate", false, |inner, v| {
            if let Some(rate) = unsigned("output_rate", v) {
                inner.dsp.set_output_rate(rate);
            }
        });
        self.wire("offset_freq", false, |inner, v| {
            if let Some(offset) = integer("offset_freq", v) {
                inner.dsp.set_offset_freq(offset);
            }
        });
        self.wire("squelch_level", false, |inner, v| {
            if let Some(level) = number("squelch_level", v) {
                inner.dsp.set_squelch_level(level);
            }
        });
        self.wire("low_cut", false, |inner, v| {
            if let Some(cut) = number("low_cut", v) {
                let (_, high) = inner.dsp.get_bpf();
                inner.dsp.set_bpf(cut, high);
            }
        });
        self.wire("high_cut", false, |inner, v| {
            if let Some(cut) = number("high_cut", v) {
                let (low, _) = inner.dsp.get_bpf();
                inner.dsp.set_bpf(low, cut);
            }
        });
        self.wire("mod", false, |inner, v| match v.as_str().map(str::parse::<Modulation>) {
            Some(Ok(modulation)) => inner.set_mod(modulation),
            Some(Err(e)) => warn!("[dsp] ignoring mod change: {}", e),
            None => warn!("[dsp] ignoring non-string mod value {}", v),
        });

        if self.props.get_bool("digimodes_enable").unwrap_or(false) {
            let fft_size = self.props.get_property("digimodes_fft_size");
            self.wire("secondary_mod", false, move |inner, v| {
                inner.set_secondary_mod(v, &fft_size);
            });
            self.wire("secondary_offset_freq", false, |inner, v| {
                if let Some(offset) = integer("secondary_offset_freq", v) {
                    inner.dsp.set_secondary_offset_freq(offset);
                }
            });
        }
    }

    fn wire<F>(&mut self, key: &str, apply_current: bool, f: F)
    where
        F: Fn(&ManagerInner, &Value) + Send + Sync + 'static,
    {
        let property = self.props.get_property(key);
        if apply_current {
            if let Some(value) = property.get() {
                f(&*self.inner, &value);
            }
        }
        let inner = self.inner.clone();
        let subscription = property.wire(move |value| f(&*inner, value));
        self.subscriptions.push(subscription);
    }

    /// Start the engine and the audio and S-meter readers
    pub fn start(&self) -> Result<()> {
        self.inner.start()
    }

    /// Flag every reader to exit and stop the engine
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn start_secondary_threads(&self) -> Result<()> {
        self.inner.start_secondary_threads()
    }

    pub fn stop_secondary_threads(&self) {
        self.inner.stop_secondary_threads();
    }

    /// Sole mutation entry point; fires the wired reconfiguration inline
    pub fn set_property(&self, key: &str, value: impl Into<Value>) {
        self.props.set(key, value);
    }

    pub fn is_running(&self) -> bool {
        self.inner.primary.lock().is_some()
    }

    pub fn secondary_running(&self) -> bool {
        self.inner.secondary.lock().is_some()
    }

    pub fn dsp(&self) -> &Arc<dyn Dsp> {
        &self.inner.dsp
    }
}

impl Drop for DspManager {
    fn drop(&mut self) {
        self.subscriptions.clear();
        if self.is_running() {
            self.stop();
        }
    }
}

impl ManagerInner {
    fn start(&self) -> Result<()> {
        let mut primary = self.primary.lock();
        if primary.is_some() {
            debug!("[dsp] already started");
            return Ok(());
        }

        self.dsp.start().context("Failed to start DSP engine")?;

        let running = Arc::new(AtomicBool::new(true));
        if let Err(e) = self.spawn_primary_readers(&running) {
            running.store(false, Ordering::SeqCst);
            self.dsp.stop();
            return Err(e);
        }
        *primary = Some(running);
        drop(primary);

        if self.dsp.get_secondary_demodulator().is_some() {
            self.start_secondary_threads()?;
        }
        info!("[dsp] started {}", self.dsp.get_demodulator());
        Ok(())
    }

    fn spawn_primary_readers(&self, running: &Arc<AtomicBool>) -> Result<()> {
        let (dsp, handler, flag) = (self.dsp.clone(), self.handler.clone(), running.clone());
        thread::Builder::new()
            .name("dsp-audio".to_string())
            .spawn(move || {
                while flag.load(Ordering::SeqCst) {
                    let data = dsp.read(AUDIO_CHUNK_SIZE);
                    if data.len() != AUDIO_CHUNK_SIZE {
                        thread::sleep(READ_RETRY);
                    } else {
                        handler.write_dsp_data(&data);
                    }
                }
                debug!("[dsp] audio reader exited");
            })
            .context("Failed to spawn audio reader")?;

        let (dsp, handler, flag) = (self.dsp.clone(), self.handler.clone(), running.clone());
        thread::Builder::new()
            .name("dsp-smeter".to_string())
            .spawn(move || {
                // Paced by the engine's blocking reads
                while flag.load(Ordering::SeqCst) {
                    if let Some(level) = dsp.smeter_level() {
                        handler.write_s_meter_level(level);
                    }
                }
                debug!("[dsp] s-meter reader exited");
            })
            .context("Failed to spawn s-meter reader")?;
        Ok(())
    }

    fn stop(&self) {
        if let Some(running) = self.primary.lock().take() {
            running.store(false, Ordering::SeqCst);
        }
        self.stop_secondary_threads();
        self.dsp.stop();
        info!("[dsp] stopped");
    }

    fn start_secondary_threads(&self) -> Result<()> {
        let mut secondary = self.secondary.lock();
        if let Some(old) = secondary.take() {
            old.store(false, Ordering::SeqCst);
        }
        let running = Arc::new(AtomicBool::new(true));

        let (dsp, handler, flag) = (self.dsp.clone(), self.handler.clone(), running.clone());
        let demod = thread::Builder::new()
            .name("dsp-secondary-demod".to_string())
            .spawn(move || {
                while flag.load(Ordering::SeqCst) {
                    let data = dsp.read_secondary_demod(1);
                    if data.is_empty() {
                        thread::sleep(READ_RETRY);
                    } else {
                        handler.write_secondary_demod(&data);
                    }
                }
            });

        let (dsp, handler, flag) = (self.dsp.clone(), self.handler.clone(), running.clone());
        let fft = thread::Builder::new()
            .name("dsp-secondary-fft".to_string())
            .spawn(move || {
                while flag.load(Ordering::SeqCst) {
                    let data = dsp.read_secondary_fft(dsp.secondary_fft_bytes_to_read());
                    if data.is_empty() {
                        thread::sleep(READ_RETRY);
                    } else {
                        handler.write_secondary_fft(&data);
                    }
                }
            });

        if let Err(e) = demod.and(fft) {
            running.store(false, Ordering::SeqCst);
            return Err(e).context("Failed to spawn secondary readers");
        }
        *secondary = Some(running);
        Ok(())
    }

    fn stop_secondary_threads(&self) {
        if let Some(running) = self.secondary.lock().take() {
            running.store(false, Ordering::SeqCst);
        }
    }

    fn is_started(&self) -> bool {
        self.primary.lock().is_some()
    }

    /// Structural change: stop, switch mode, restart
    fn set_mod(&self, modulation: Modulation) {
        let demodulator = Demodulator::Audio(modulation);
        if self.dsp.get_demodulator() == demodulator {
            return;
        }
        if !self.is_started() {
            self.dsp.set_demodulator(demodulator);
            return;
        }
        self.dsp.stop();
        self.dsp.set_demodulator(demodulator);
        if let Err(e) = self.dsp.start() {
            error!("[dsp] failed to restart with {}: {:#}", demodulator, e);
        }
    }

    /// Stop decoding before touching engine state shared with the readers,
    /// announce the new stream layout, then restart
    fn set_secondary_mod(&self, value: &Value, fft_size: &Property) {
        let requested = if value.is_falsy() {
            None
        } else {
            match value.as_str().map(str::parse::<SecondaryModulation>) {
                Some(Ok(modulation)) => Some(modulation),
                Some(Err(e)) => {
                    warn!("[dsp] ignoring secondary_mod change: {}", e);
                    return;
                }
                None => {
                    warn!("[dsp] ignoring non-string secondary_mod value {}", value);
                    return;
                }
            }
        };
        if self.dsp.get_secondary_demodulator() == requested {
            return;
        }

        let started = self.is_started();
        self.stop_secondary_threads();
        if started {
            self.dsp.stop();
        }

        self.dsp.set_secondary_demodulator(requested);
        if requested.is_some() {
            self.handler.write_secondary_dsp_config(&SecondaryDspConfig {
                secondary_fft_size: fft_size.get().and_then(|v| v.as_i64()).unwrap_or(0),
                if_samp_rate: self.dsp.if_samp_rate(),
                secondary_bw: self.dsp.secondary_bw(),
            });
        }

        if !started {
            return;
        }
        if let Err(e) = self.dsp.start() {
            error!("[dsp] failed to restart after secondary mode change: {:#}", e);
            return;
        }
        if requested.is_some() {
            if let Err(e) = self.start_secondary_threads() {
                error!("[dsp] {:#}", e);
            }
        }
    }
}

fn compression(key: &str, value: &Value) -> Option<Compression> {
    match value.as_str().map(str::parse::<Compression>) {
        Some(Ok(c)) => Some(c),
        Some(Err(e)) => {
            warn!("[dsp] ignoring {}: {}", key, e);
            None
        }
        None => {
            warn!("[dsp] ignoring non-string {} value {}", key, value);
            None
        }
    }
}

fn integer(key: &str, value: &Value) -> Option<i64> {
    let v = value.as_i64();
    if v.is_none() {
        warn!("[dsp] ignoring non-integer {} value {}", key, value);
    }
    v
}

fn unsigned(key: &str, value: &Value) -> Option<u32> {
    let v = u32::try_from(integer(key, value)?).ok();
    if v.is_none() {
        warn!("[dsp] {} out of range: {}", key, value);
    }
    v
}

fn number(key: &str, value: &Value) -> Option<f64> {
    let v = value.as_f64();
    if v.is_none() {
        warn!("[dsp] ignoring non-numeric {} value {}", key, value);
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::testing::{wait_until, FakeFactory, RecordingHandler};

    fn shared_props(digimodes: bool) -> PropertyManager {
        let props = PropertyManager::new();
        props.set("samp_rate", 2_400_000);
        props.set("audio_compression", "adpcm");
        props.set("fft_compression", "none");
        props.set("digimodes_enable", digimodes);
        props.set("digimodes_fft_size", 1024);
        props.set("iq_server_port", 4952);
        props.set("csdr_dynamic_bufsize", false);
        props.set("csdr_print_bufsizes", false);
        props.set("csdr_through", true);
        props
    }

    fn session(digimodes: bool) -> (DspManager, Arc<RecordingHandler>, FakeFactory, PropertyManager) {
        let props = shared_props(digimodes);
        let handler = Arc::new(RecordingHandler::default());
        let factory = FakeFactory::default();
        let manager = DspManager::new(handler.clone(), &props, &factory);
        (manager, handler, factory, props)
    }

    #[test]
    fn test_initial_configuration() {
        let (_manager, _handler, factory, _props) = session(false);
        let state = factory.last().snapshot();

        assert_eq!(state.samp_rate, 2_400_000);
        assert_eq!(state.audio_compression, Compression::Adpcm);
        assert_eq!(state.fft_compression, Compression::None);
        assert_eq!(state.secondary_fft_size, 1024);
        assert_eq!(state.offset_freq, 0);
        assert_eq!(state.bpf, (-4000.0, 4000.0));
        assert_eq!(
            state.pipe_options,
            PipeOptions {
                nc_port: 4952,
                dynamic_bufsize: false,
                print_bufsizes: false,
                through: true,
            }
        );
        assert_eq!(state.starts, 0);
    }

    #[test]
    fn test_mode_switch_restarts_once() {
        let (manager, _handler, factory, _props) = session(false);
        manager.start().unwrap();
        let dsp = factory.last();

        manager.set_property("mod", "am");
        manager.set_property("mod", "am");

        let state = dsp.snapshot();
        assert_eq!(state.demodulator, Demodulator::Audio(Modulation::Am));
        assert_eq!(state.starts, 2);
        assert_eq!(state.stops, 1);
        assert!(state.running);
        manager.stop();
    }

    #[test]
    fn test_mode_matching_engine_is_noop() {
        let (manager, _handler, factory, _props) = session(false);
        manager.start().unwrap();
        // engine default is nfm
        manager.set_property("mod", "nfm");
        assert_eq!(factory.last().snapshot().stops, 0);
        manager.stop();
    }

    #[test]
    fn test_mode_change_while_stopped_does_not_start() {
        let (manager, _handler, factory, _props) = session(false);
        manager.set_property("mod", "usb");
        let state = factory.last().snapshot();
        assert_eq!(state.demodulator, Demodulator::Audio(Modulation::Usb));
        assert_eq!(state.starts, 0);
        assert!(!state.running);
    }

    #[test]
    fn test_unknown_mode_ignored() {
        let (manager, _handler, factory, _props) = session(false);
        manager.start().unwrap();
        manager.set_property("mod", "wfm-stereo");
        let state = factory.last().snapshot();
        assert_eq!(state.demodulator, Demodulator::Audio(Modulation::Nfm));
        assert_eq!(state.stops, 0);
        manager.stop();
    }

    #[test]
    fn test_bandpass_edges_in_any_order() {
        let (manager, _handler, factory, _props) = session(false);
        manager.start().unwrap();
        let dsp = factory.last();

        manager.set_property("low_cut", -2500);
        manager.set_property("high_cut", 2800);
        assert_eq!(dsp.get_bpf(), (-2500.0, 2800.0));

        manager.set_property("high_cut", 150.0);
        manager.set_property("low_cut", -150.0);
        assert_eq!(dsp.get_bpf(), (-150.0, 150.0));

        let state = dsp.snapshot();
        assert_eq!(state.starts, 1);
        assert_eq!(state.stops, 0);
        manager.stop();
    }

    #[test]
    fn test_live_tunables_forwarded() {
        let (manager, _handler, factory, props) = session(false);
        manager.set_property("offset_freq", -12_500);
        manager.set_property("squelch_level", 0.5);
        manager.set_property("output_rate", 11_025);
        props.set("samp_rate", 2_048_000);
        props.set("audio_compression", "none");

        let state = factory.last().snapshot();
        assert_eq!(state.offset_freq, -12_500);
        assert_eq!(state.squelch_level, 0.5);
        assert_eq!(state.output_rate, 11_025);
        assert_eq!(state.samp_rate, 2_048_000);
        assert_eq!(state.audio_compression, Compression::None);
        assert_eq!(state.starts, 0);
    }

    #[test]
    fn test_session_keys_stay_local() {
        let props = shared_props(false);
        let factory = FakeFactory::default();
        let a = DspManager::new(Arc::new(RecordingHandler::default()), &props, &factory);
        let b = DspManager::new(Arc::new(RecordingHandler::default()), &props, &factory);

        a.set_property("offset_freq", 1000);
        let created = factory.created.lock().clone();
        assert_eq!(created[0].snapshot().offset_freq, 1000);
        assert_eq!(created[1].snapshot().offset_freq, 0);
        drop(b);
    }

    #[test]
    fn test_secondary_round_trip() {
        let (manager, handler, factory, _props) = session(true);
        manager.start().unwrap();
        let dsp = factory.last();

        manager.set_property("secondary_mod", "bpsk31");
        assert_eq!(dsp.get_secondary_demodulator(), Some(SecondaryModulation::Bpsk31));
        assert!(manager.secondary_running());
        assert_eq!(
            *handler.configs.lock(),
            vec![SecondaryDspConfig {
                secondary_fft_size: 1024,
                if_samp_rate: 12_000.0,
                secondary_bw: 31.25,
            }]
        );
        assert!(wait_until(|| *handler.secondary_demod.lock() > 0));
        assert!(wait_until(|| *handler.secondary_fft.lock() > 0));

        manager.set_property("secondary_mod", false);
        assert_eq!(dsp.get_secondary_demodulator(), None);
        assert!(!manager.secondary_running());
        assert_eq!(handler.configs.lock().len(), 1);

        let state = dsp.snapshot();
        assert_eq!(state.starts, 3);
        assert_eq!(state.stops, 2);
        assert!(state.running);
        manager.stop();
    }

    #[test]
    fn test_secondary_offset_forwarded() {
        let (manager, _handler, factory, _props) = session(true);
        manager.set_property("secondary_offset_freq", 1500);
        assert_eq!(factory.last().snapshot().secondary_offset_freq, 1500);
    }

    #[test]
    fn test_secondary_not_wired_without_digimodes() {
        let (manager, handler, factory, _props) = session(false);
        manager.start().unwrap();
        manager.set_property("secondary_mod", "bpsk31");

        assert_eq!(factory.last().get_secondary_demodulator(), None);
        assert!(!manager.secondary_running());
        assert!(handler.configs.lock().is_empty());
        manager.stop();
    }

    #[test]
    fn test_readers_push_audio_and_smeter() {
        let (manager, handler, factory, _props) = session(false);
        let dsp = factory.last();
        dsp.push_output(vec![7; AUDIO_CHUNK_SIZE]);
        dsp.smeter.lock().extend([0.25, 0.5]);

        manager.start().unwrap();
        assert!(wait_until(|| handler.dsp_data.lock().len() == 1));
        assert!(wait_until(|| handler.smeter.lock().len() == 2));
        assert_eq!(handler.dsp_data.lock()[0], vec![7; AUDIO_CHUNK_SIZE]);
        assert_eq!(*handler.smeter.lock(), vec![0.25, 0.5]);
        assert!(dsp.read_sizes.lock().iter().all(|&n| n == AUDIO_CHUNK_SIZE));

        manager.stop();
        assert!(!manager.is_running());
        assert!(!dsp.snapshot().running);
    }

    #[test]
    fn test_engine_start_failure_is_reported() {
        let props = shared_props(false);
        let factory = FakeFactory {
            fail_start: true,
            ..FakeFactory::default()
        };
        let manager = DspManager::new(Arc::new(RecordingHandler::default()), &props, &factory);
        assert!(manager.start().is_err());
        assert!(!manager.is_running());
    }

    #[test]
    fn test_drop_unwires_shared_keys() {
        let (manager, _handler, _factory, props) = session(true);
        assert_eq!(props.get_property("samp_rate").subscriber_count(), 1);
        drop(manager);
        assert_eq!(props.get_property("samp_rate").subscriber_count(), 0);
    }
}
