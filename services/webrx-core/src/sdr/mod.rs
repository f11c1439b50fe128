//! Hardware capture chain
//!
//! 1. Render the capture command for the configured device type
//! 2. Append the sample format conversion stage if needed
//! 3. Size the nmux ring buffers from sample rate and memory budget
//! 4. Launch capture → conversion → nmux as one process group

pub mod device;
pub mod process;
pub mod source;

pub use device::{DeviceType, NmuxBuffers, DEVICE_TYPES};
pub use process::{ProcessGroup, ProcessState};
pub use source::{RtlNmuxSource, SOURCE_PROPERTIES};
