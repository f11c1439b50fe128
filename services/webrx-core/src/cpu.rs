//! Host CPU load broadcaster
//!
//! Samples the aggregate `cpu` line of `/proc/stat` on a fixed interval and
//! pushes the busy fraction since the previous sample to every listener.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

use crate::worker::{SharedWorker, WorkerContext};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);
pub const PROC_STAT: &str = "/proc/stat";

/// Receiver of CPU load reports in `[0, 1]`
pub trait CpuUsageClient: Send + Sync {
    fn write_cpu_usage(&self, usage: f64);
}

/// `(work, idle)` jiffies from the aggregate `cpu` line.
/// work = user + nice + system.
pub fn parse_stat(stat: &str) -> Option<(u64, u64)> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(4)
        .map(|f| f.parse().ok())
        .collect::<Option<_>>()?;
    if fields.len() < 4 {
        return None;
    }
    Some((fields[0] + fields[1] + fields[2], fields[3]))
}

/// Busy fraction between two samples, 0 when no time has passed
pub fn usage_between(last: (u64, u64), current: (u64, u64)) -> f64 {
    let work = current.0.saturating_sub(last.0);
    let idle = current.1.saturating_sub(last.1);
    if work + idle == 0 {
        return 0.0;
    }
    work as f64 / (work + idle) as f64
}

/// Stateful sampler; the first reading only establishes a baseline
pub struct CpuSampler {
    path: PathBuf,
    last: Option<(u64, u64)>,
}

impl CpuSampler {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last: None,
        }
    }

    /// Load since the previous sample; read or parse failures yield 0
    pub fn sample(&mut self) -> f64 {
        let current = match fs::read_to_string(&self.path) {
            Ok(stat) => parse_stat(&stat),
            Err(e) => {
                debug!("[cpu] cannot read {}: {}", self.path.display(), e);
                None
            }
        };
        let Some(current) = current else {
            return 0.0;
        };
        match self.last.replace(current) {
            Some(last) => usage_between(last, current),
            None => 0.0,
        }
    }
}

pub struct CpuUsageThread {
    worker: SharedWorker<dyn CpuUsageClient>,
}

impl Default for CpuUsageThread {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuUsageThread {
    pub fn new() -> Self {
        Self::with_source(PROC_STAT, DEFAULT_INTERVAL)
    }

    /// Sampler reading `path` every `interval`
    pub fn with_source(path: impl Into<PathBuf>, interval: Duration) -> Self {
        let path: PathBuf = path.into();
        let worker = SharedWorker::new("cpu", move |ctx: WorkerContext<dyn CpuUsageClient>| {
            let mut sampler = CpuSampler::new(path.clone());
            while ctx.is_running() {
                thread::sleep(interval);
                let usage = sampler.sample();
                ctx.listeners.broadcast(|c| c.write_cpu_usage(usage));
            }
            info!("[cpu] cpu usage thread shut down");
        });
        Self { worker }
    }

    pub fn add_client(&self, client: &Arc<dyn CpuUsageClient>) -> io::Result<()> {
        self.worker.add_client(client)
    }

    pub fn remove_client(&self, client: &Arc<dyn CpuUsageClient>) {
        self.worker.remove_client(client);
    }

    pub fn shutdown(&self) {
        self.worker.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }
}
