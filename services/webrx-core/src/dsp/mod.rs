//! DSP engine contract, demodulator modes and output sinks
//!
//! The signal processing itself happens in external csdr processes. This
//! module defines how the core drives them (`Dsp`) and where their output
//! goes (`DspHandler`, `SpectrumClient`).

pub mod csdr;
pub mod manager;
pub mod spectrum;

#[cfg(test)]
pub(crate) mod testing;

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::Error;

pub use csdr::{CsdrDsp, CsdrFactory};
pub use manager::DspManager;
pub use spectrum::SpectrumThread;

/// Primary audio demodulators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulation {
    Nfm,
    Am,
    Usb,
    Lsb,
    Cw,
}

impl Modulation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nfm => "nfm",
            Self::Am => "am",
            Self::Usb => "usb",
            Self::Lsb => "lsb",
            Self::Cw => "cw",
        }
    }
}

impl FromStr for Modulation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nfm" => Ok(Self::Nfm),
            "am" => Ok(Self::Am),
            "usb" => Ok(Self::Usb),
            "lsb" => Ok(Self::Lsb),
            "cw" => Ok(Self::Cw),
            _ => Err(Error::UnknownMode {
                kind: "modulation",
                value: s.to_string(),
            }),
        }
    }
}

/// What a pipeline produces: the wideband spectrum or demodulated audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demodulator {
    Fft,
    Audio(Modulation),
}

impl fmt::Display for Demodulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fft => f.write_str("fft"),
            Self::Audio(m) => f.write_str(m.as_str()),
        }
    }
}

/// Digital modes decoded on top of the primary output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondaryModulation {
    Bpsk31,
}

impl SecondaryModulation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bpsk31 => "bpsk31",
        }
    }

    /// Signal bandwidth in Hz
    pub fn bandwidth(&self) -> f64 {
        match self {
            Self::Bpsk31 => 31.25,
        }
    }
}

impl FromStr for SecondaryModulation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bpsk31" => Ok(Self::Bpsk31),
            _ => Err(Error::UnknownMode {
                kind: "secondary modulation",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Adpcm,
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "adpcm" => Ok(Self::Adpcm),
            _ => Err(Error::UnknownMode {
                kind: "compression",
                value: s.to_string(),
            }),
        }
    }
}

/// Options shaping how the engine's pipes are built
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipeOptions {
    /// nmux port the pipeline reads IQ samples from
    pub nc_port: u16,
    pub dynamic_bufsize: bool,
    pub print_bufsizes: bool,
    /// Insert `csdr through` (throughput diagnostics)
    pub through: bool,
}

/// Parameters the remote side needs to decode the secondary streams
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecondaryDspConfig {
    pub secondary_fft_size: i64,
    pub if_samp_rate: f64,
    pub secondary_bw: f64,
}

/// Control surface of a DSP engine.
///
/// Setters take effect immediately while running where the engine supports
/// live tuning; structural changes (modes, rates) apply on the next `start`.
/// Reads block until data is available and return an empty buffer once the
/// engine is stopped.
pub trait Dsp: Send + Sync {
    fn set_pipe_options(&self, options: PipeOptions);

    fn set_samp_rate(&self, samp_rate: u32);
    fn set_output_rate(&self, output_rate: u32);
    fn set_offset_freq(&self, offset: i64);
    fn set_bpf(&self, low_cut: f64, high_cut: f64);
    fn get_bpf(&self) -> (f64, f64);
    fn set_squelch_level(&self, level: f64);

    fn set_demodulator(&self, demodulator: Demodulator);
    fn get_demodulator(&self) -> Demodulator;
    fn set_secondary_demodulator(&self, demodulator: Option<SecondaryModulation>);
    fn get_secondary_demodulator(&self) -> Option<SecondaryModulation>;
    fn set_secondary_fft_size(&self, size: u32);
    fn set_secondary_offset_freq(&self, offset: i64);

    fn set_fft_size(&self, size: u32);
    fn set_fft_fps(&self, fps: u32);
    fn set_fft_averages(&self, averages: u32);
    fn set_fft_compression(&self, compression: Compression);
    fn set_audio_compression(&self, compression: Compression);

    /// Intermediate sample rate after decimation
    fn if_samp_rate(&self) -> f64;
    fn secondary_bw(&self) -> f64;
    fn fft_bytes_to_read(&self) -> usize;
    fn secondary_fft_bytes_to_read(&self) -> usize;

    fn start(&self) -> anyhow::Result<()>;
    fn stop(&self);
    fn is_running(&self) -> bool;

    fn read(&self, size: usize) -> Vec<u8>;
    fn read_secondary_demod(&self, size: usize) -> Vec<u8>;
    fn read_secondary_fft(&self, size: usize) -> Vec<u8>;
    /// Next signal strength report; `None` if none arrived in time
    fn smeter_level(&self) -> Option<f32>;
}

/// Creates engines for new pipelines
pub trait DspFactory: Send + Sync {
    fn create(&self) -> Arc<dyn Dsp>;
}

/// Session sink for a `DspManager`'s output
pub trait DspHandler: Send + Sync {
    fn write_dsp_data(&self, data: &[u8]);
    fn write_s_meter_level(&self, level: f32);
    fn write_secondary_demod(&self, data: &[u8]);
    fn write_secondary_fft(&self, data: &[u8]);
    fn write_secondary_dsp_config(&self, config: &SecondaryDspConfig);
}

/// Receiver of wideband spectrum frames
pub trait SpectrumClient: Send + Sync {
    fn write_spectrum_data(&self, data: &[u8]);
}
