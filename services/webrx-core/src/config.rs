//! Configuration loaded from environment variables

use crate::props::PropertyManager;

/// Receiver configuration, seeded into the shared property store at startup
#[derive(Debug, Clone)]
pub struct Config {
    /// Device type key (`rtl_sdr`, `hackrf`, `sdrplay`)
    pub rtl_type: String,

    /// IQ sample rate in samples/s
    pub samp_rate: i64,

    /// Tuned center frequency in Hz
    pub center_freq: i64,

    /// Frequency correction
    pub ppm: i64,

    /// Tuner gain (0 for auto on rtl_sdr)
    pub rf_gain: i64,

    pub lna_gain: i64,

    pub rf_amp: bool,

    /// nmux ring buffer budget in MB
    pub nmux_memory: f64,

    /// Local port nmux serves IQ samples on
    pub iq_server_port: u16,

    pub fft_size: i64,

    pub fft_fps: i64,

    /// Waterfall vertical overlap in [0, 1)
    pub fft_voverlap_factor: f64,

    /// `none` or `adpcm`
    pub fft_compression: String,

    /// `none` or `adpcm`
    pub audio_compression: String,

    pub digimodes_enable: bool,

    pub digimodes_fft_size: i64,

    pub csdr_dynamic_bufsize: bool,

    pub csdr_print_bufsizes: bool,

    pub csdr_through: bool,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rtl_type: "rtl_sdr".to_string(),
            samp_rate: 2_400_000,
            center_freq: 145_525_000,
            ppm: 0,
            rf_gain: 30,
            lna_gain: 30,
            rf_amp: false,
            nmux_memory: 50.0,
            iq_server_port: 4951,
            fft_size: 4096,
            fft_fps: 9,
            fft_voverlap_factor: 0.3,
            fft_compression: "adpcm".to_string(),
            audio_compression: "adpcm".to_string(),
            digimodes_enable: true,
            digimodes_fft_size: 1024,
            csdr_dynamic_bufsize: false,
            csdr_print_bufsizes: false,
            csdr_through: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            rtl_type: std::env::var("RTL_TYPE").unwrap_or(d.rtl_type),
            samp_rate: env_or("SAMP_RATE", d.samp_rate),
            center_freq: env_or("CENTER_FREQ", d.center_freq),
            ppm: env_or("PPM", d.ppm),
            rf_gain: env_or("RF_GAIN", d.rf_gain),
            lna_gain: env_or("LNA_GAIN", d.lna_gain),
            rf_amp: env_flag("RF_AMP", d.rf_amp),
            nmux_memory: env_or("NMUX_MEMORY", d.nmux_memory),
            iq_server_port: env_or("IQ_SERVER_PORT", d.iq_server_port),
            fft_size: env_or("FFT_SIZE", d.fft_size),
            fft_fps: env_or("FFT_FPS", d.fft_fps),
            fft_voverlap_factor: env_or("FFT_VOVERLAP_FACTOR", d.fft_voverlap_factor),
            fft_compression: std::env::var("FFT_COMPRESSION").unwrap_or(d.fft_compression),
            audio_compression: std::env::var("AUDIO_COMPRESSION").unwrap_or(d.audio_compression),
            digimodes_enable: env_flag("DIGIMODES_ENABLE", d.digimodes_enable),
            digimodes_fft_size: env_or("DIGIMODES_FFT_SIZE", d.digimodes_fft_size),
            csdr_dynamic_bufsize: env_flag("CSDR_DYNAMIC_BUFSIZE", d.csdr_dynamic_bufsize),
            csdr_print_bufsizes: env_flag("CSDR_PRINT_BUFSIZES", d.csdr_print_bufsizes),
            csdr_through: env_flag("CSDR_THROUGH", d.csdr_through),
        }
    }

    /// Shared property store holding every configured key
    pub fn into_properties(self) -> PropertyManager {
        let props = PropertyManager::new();
        props.set("rtl_type", self.rtl_type);
        props.set("samp_rate", self.samp_rate);
        props.set("center_freq", self.center_freq);
        props.set("ppm", self.ppm);
        props.set("rf_gain", self.rf_gain);
        props.set("lna_gain", self.lna_gain);
        props.set("rf_amp", self.rf_amp);
        props.set("nmux_memory", self.nmux_memory);
        props.set("iq_server_port", self.iq_server_port);
        props.set("fft_size", self.fft_size);
        props.set("fft_fps", self.fft_fps);
        props.set("fft_voverlap_factor", self.fft_voverlap_factor);
        props.set("fft_compression", self.fft_compression);
        props.set("audio_compression", self.audio_compression);
        props.set("digimodes_enable", self.digimodes_enable);
        props.set("digimodes_fft_size", self.digimodes_fft_size);
        props.set("csdr_dynamic_bufsize", self.csdr_dynamic_bufsize);
        props.set("csdr_print_bufsizes", self.csdr_print_bufsizes);
        props.set("csdr_through", self.csdr_through);
        props
    }
}
