//! Hardware capture source: capture tool → format conversion → nmux
//!
//! The whole chain is replaced whenever a capture property changes, since
//! every consumer depends on the sample rate of the hardware stage.

use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::device::{DeviceType, NmuxBuffers};
use super::process::{ProcessGroup, ProcessState};
use crate::error::{Error, Result};
use crate::features::FeatureDetector;
use crate::props::{PropertyManager, Subscription};

/// Properties the capture chain depends on
pub const SOURCE_PROPERTIES: &[&str] = &[
    "rtl_type",
    "samp_rate",
    "nmux_memory",
    "iq_server_port",
    "center_freq",
    "ppm",
    "rf_gain",
    "lna_gain",
    "rf_amp",
];

/// How long `stop` waits for the old chain to release the nmux port
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Owner of the capture process group
pub struct RtlNmuxSource {
    inner: Arc<SourceInner>,
    subscriptions: Mutex<Vec<Subscription>>,
}

struct SourceInner {
    props: PropertyManager,
    detector: Box<dyn FeatureDetector>,
    process: Mutex<Option<ProcessGroup>>,
}

impl RtlNmuxSource {
    pub fn new(props: &PropertyManager, detector: impl FeatureDetector + 'static) -> Self {
        Self {
            inner: Arc::new(SourceInner {
                props: props.collect(SOURCE_PROPERTIES),
                detector: Box::new(detector),
                process: Mutex::new(None),
            }),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Wire the restart callback to every collected key, then start
    pub fn setup(&self) {
        let inner = self.inner.clone();
        let subscriptions = self.inner.props.wire(move |name, value| {
            info!(
                "[RtlNmuxSource] restarting due to property change: {} changed to {}",
                name, value
            );
            inner.restart();
        });
        *self.subscriptions.lock() = subscriptions;

        self.start();
    }

    /// Launch the capture chain. Failures are logged; the server keeps
    /// running without a live source.
    pub fn start(&self) {
        let mut process = self.inner.process.lock();
        self.inner.start_locked(&mut process);
    }

    /// Terminate the whole capture process group
    pub fn stop(&self) {
        let mut process = self.inner.process.lock();
        SourceInner::stop_locked(&mut process);
    }

    /// Command line of the current chain
    pub fn command(&self) -> Option<String> {
        self.inner
            .process
            .lock()
            .as_ref()
            .map(|p| p.command().to_string())
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .process
            .lock()
            .as_ref()
            .is_some_and(|p| p.state() == ProcessState::Running)
    }

    /// Full pipeline command for the current property values
    pub fn build_command(&self) -> Result<String> {
        self.inner.build_command()
    }
}

impl SourceInner {
    fn restart(&self) {
        let mut process = self.process.lock();
        Self::stop_locked(&mut process);
        self.start_locked(&mut process);
    }

    fn start_locked(&self, process: &mut Option<ProcessGroup>) {
        match process.as_ref().map(ProcessGroup::state) {
            Some(ProcessState::Running) => {
                warn!("[RtlNmuxSource] already started");
                return;
            }
            Some(ProcessState::Stopped) => {
                if let Some(group) = process.take() {
                    info!(
                        "[RtlNmuxSource] process group {} has exited, relaunching",
                        group.pgid()
                    );
                }
            }
            None => {}
        }
        match self.try_start() {
            Ok(group) => *process = Some(group),
            Err(e @ Error::BufferSizing { .. }) => error!(
                "[RtlNmuxSource] Error: {}. These depend on nmux_memory and samp_rate options",
                e
            ),
            Err(e) => error!("[RtlNmuxSource] not starting: {}", e),
        }
    }

    fn try_start(&self) -> Result<ProcessGroup> {
        let rtl_type = self.props.get_str("rtl_type")?;
        if !self.detector.is_available(&rtl_type) {
            return Err(Error::DeviceUnavailable(rtl_type));
        }

        let command = self.build_command()?;
        let (group, _) = ProcessGroup::spawn("RtlNmuxSource", &command, &[], Stdio::inherit())?;
        info!("[RtlNmuxSource] Started rtl source: {}", command);
        Ok(group)
    }

    fn build_command(&self) -> Result<String> {
        let rtl_type = self.props.get_str("rtl_type")?;
        let device =
            DeviceType::lookup(&rtl_type).ok_or_else(|| Error::UnknownDevice(rtl_type.clone()))?;
        let capture = device.render(&self.props)?;

        let buffers = NmuxBuffers::compute(
            self.props.get_f64("samp_rate")?,
            self.props.get_f64("nmux_memory")?,
        )?;
        info!(
            "[RtlNmuxSource] nmux_bufsize = {}, nmux_bufcnt = {}",
            buffers.bufsize, buffers.bufcnt
        );

        let port = self.props.get_i64("iq_server_port")?;
        let port = u16::try_from(port).map_err(|_| Error::PropertyType {
            name: "iq_server_port".to_string(),
            expected: "a port number",
        })?;
        Ok(format!("{} | {}", capture, buffers.mux_command(port)))
    }

    fn stop_locked(process: &mut Option<ProcessGroup>) {
        let Some(group) = process.take() else {
            return;
        };
        group.terminate();
        if !group.wait_exit(STOP_TIMEOUT) {
            warn!(
                "[RtlNmuxSource] process group {} did not exit within {:?}",
                group.pgid(),
                STOP_TIMEOUT
            );
        }
    }
}

impl Drop for RtlNmuxSource {
    fn drop(&mut self) {
        self.subscriptions.lock().clear();
        self.stop();
    }
}
