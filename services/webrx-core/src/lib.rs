//! WebRX core - receiver runtime
//!
//! Owns the SDR capture process, shares one spectrum pipeline across
//! clients, runs one demodulation pipeline per listening session and
//! reports host CPU load. All of it is driven by a reactive property store.

pub mod config;
pub mod cpu;
pub mod dsp;
pub mod error;
pub mod features;
pub mod props;
pub mod sdr;
pub mod worker;

pub use config::Config;
pub use cpu::{CpuUsageClient, CpuUsageThread};
pub use dsp::{CsdrFactory, DspManager, SpectrumThread};
pub use error::{Error, Result};
pub use props::PropertyManager;
pub use sdr::RtlNmuxSource;
