//! Capability detection for capture device types

use std::env;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::debug;

use crate::sdr::DeviceType;

/// Answers whether the tool chain for a device type is installed
pub trait FeatureDetector: Send + Sync {
    fn is_available(&self, device_type: &str) -> bool;
}

/// Looks up every executable of the device's pipeline on `PATH`
#[derive(Debug, Default, Clone, Copy)]
pub struct PathFeatureDetector;

impl FeatureDetector for PathFeatureDetector {
    fn is_available(&self, device_type: &str) -> bool {
        let Some(device) = DeviceType::lookup(device_type) else {
            return false;
        };
        device.required_commands().into_iter().all(|command| {
            let found = command_exists(command);
            if !found {
                debug!("{} requires {}, not found on PATH", device_type, command);
            }
            found
        })
    }
}

fn command_exists(command: &str) -> bool {
    let Some(path) = env::var_os("PATH") else {
        return false;
    };
    env::split_paths(&path).any(|dir| is_executable(&dir.join(command)))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
