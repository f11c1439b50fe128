//! Error types for the receiver core

use thiserror::Error;

/// Errors raised by the property store and the capture source
#[derive(Error, Debug)]
pub enum Error {
    #[error("missing property: {0}")]
    MissingProperty(String),

    #[error("property {name} is not {expected}")]
    PropertyType { name: String, expected: &'static str },

    #[error("unknown device type: {0}")]
    UnknownDevice(String),

    #[error("the device type {0} is not available, please check requirements")]
    DeviceUnavailable(String),

    #[error(
        "nmux_bufsize or nmux_bufcnt is zero (samp_rate={samp_rate}, nmux_memory={memory_mb} MB)"
    )]
    BufferSizing { samp_rate: f64, memory_mb: f64 },

    #[error("unknown {kind}: {value}")]
    UnknownMode { kind: &'static str, value: String },

    #[error("failed to launch pipeline: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
