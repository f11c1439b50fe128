//! Recording fakes for engine and sinks

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::*;

const IDLE: Duration = Duration::from_millis(5);

pub(crate) fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[derive(Debug, Clone)]
pub(crate) struct FakeState {
    pub samp_rate: u32,
    pub output_rate: u32,
    pub offset_freq: i64,
    pub bpf: (f64, f64),
    pub squelch_level: f64,
    pub demodulator: Demodulator,
    pub secondary: Option<SecondaryModulation>,
    pub secondary_fft_size: u32,
    pub secondary_offset_freq: i64,
    pub fft_size: u32,
    pub fft_fps: u32,
    pub fft_averages: u32,
    pub fft_compression: Compression,
    pub audio_compression: Compression,
    pub pipe_options: PipeOptions,
    pub running: bool,
    pub starts: usize,
    pub stops: usize,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            samp_rate: 0,
            output_rate: 0,
            offset_freq: 0,
            bpf: (0.0, 0.0),
            squelch_level: 0.0,
            demodulator: Demodulator::Audio(Modulation::Nfm),
            secondary: None,
            secondary_fft_size: 0,
            secondary_offset_freq: 0,
            fft_size: 0,
            fft_fps: 0,
            fft_averages: 0,
            fft_compression: Compression::None,
            audio_compression: Compression::None,
            pipe_options: PipeOptions::default(),
            running: false,
            starts: 0,
            stops: 0,
        }
    }
}

/// Engine double: records configuration, serves queued output
#[derive(Default)]
pub(crate) struct FakeDsp {
    pub state: Mutex<FakeState>,
    pub audio: Mutex<VecDeque<Vec<u8>>>,
    pub smeter: Mutex<VecDeque<f32>>,
    pub read_sizes: Mutex<Vec<usize>>,
    pub fail_start: bool,
}

impl FakeDsp {
    pub fn snapshot(&self) -> FakeState {
        self.state.lock().clone()
    }

    pub fn push_output(&self, chunk: Vec<u8>) {
        self.audio.lock().push_back(chunk);
    }

    fn secondary_active(&self) -> bool {
        let state = self.state.lock();
        state.running && state.secondary.is_some()
    }
}

impl Dsp for FakeDsp {
    fn set_pipe_options(&self, options: PipeOptions) {
        self.state.lock().pipe_options = options;
    }
    fn set_samp_rate(&self, samp_rate: u32) {
        self.state.lock().samp_rate = samp_rate;
    }
    fn set_output_rate(&self, output_rate: u32) {
        self.state.lock().output_rate = output_rate;
    }
    fn set_offset_freq(&self, offset: i64) {
        self.state.lock().offset_freq = offset;
    }
    fn set_bpf(&self, low_cut: f64, high_cut: f64) {
        self.state.lock().bpf = (low_cut, high_cut);
    }
    fn get_bpf(&self) -> (f64, f64) {
        self.state.lock().bpf
    }
    fn set_squelch_level(&self, level: f64) {
        self.state.lock().squelch_level = level;
    }
    fn set_demodulator(&self, demodulator: Demodulator) {
        self.state.lock().demodulator = demodulator;
    }
    fn get_demodulator(&self) -> Demodulator {
        self.state.lock().demodulator
    }
    fn set_secondary_demodulator(&self, demodulator: Option<SecondaryModulation>) {
        self.state.lock().secondary = demodulator;
    }
    fn get_secondary_demodulator(&self) -> Option<SecondaryModulation> {
        self.state.lock().secondary
    }
    fn set_secondary_fft_size(&self, size: u32) {
        self.state.lock().secondary_fft_size = size;
    }
    fn set_secondary_offset_freq(&self, offset: i64) {
        self.state.lock().secondary_offset_freq = offset;
    }
    fn set_fft_size(&self, size: u32) {
        self.state.lock().fft_size = size;
    }
    fn set_fft_fps(&self, fps: u32) {
        self.state.lock().fft_fps = fps;
    }
    fn set_fft_averages(&self, averages: u32) {
        self.state.lock().fft_averages = averages;
    }
    fn set_fft_compression(&self, compression: Compression) {
        self.state.lock().fft_compression = compression;
    }
    fn set_audio_compression(&self, compression: Compression) {
        self.state.lock().audio_compression = compression;
    }
    fn if_samp_rate(&self) -> f64 {
        12_000.0
    }
    fn secondary_bw(&self) -> f64 {
        self.state
            .lock()
            .secondary
            .map(|m| m.bandwidth())
            .unwrap_or(0.0)
    }
    fn fft_bytes_to_read(&self) -> usize {
        self.state.lock().fft_size as usize * 4
    }
    fn secondary_fft_bytes_to_read(&self) -> usize {
        self.state.lock().secondary_fft_size as usize * 2
    }
    fn start(&self) -> anyhow::Result<()> {
        if self.fail_start {
            anyhow::bail!("engine unavailable");
        }
        let mut state = self.state.lock();
        state.running = true;
        state.starts += 1;
        Ok(())
    }
    fn stop(&self) {
        let mut state = self.state.lock();
        state.running = false;
        state.stops += 1;
    }
    fn is_running(&self) -> bool {
        self.state.lock().running
    }
    fn read(&self, size: usize) -> Vec<u8> {
        self.read_sizes.lock().push(size);
        match self.audio.lock().pop_front() {
            Some(chunk) => chunk,
            None => {
                thread::sleep(IDLE);
                Vec::new()
            }
        }
    }
    fn read_secondary_demod(&self, size: usize) -> Vec<u8> {
        thread::sleep(IDLE);
        if self.secondary_active() {
            vec![b'e'; size]
        } else {
            Vec::new()
        }
    }
    fn read_secondary_fft(&self, size: usize) -> Vec<u8> {
        thread::sleep(IDLE);
        if self.secondary_active() {
            vec![0; size]
        } else {
            Vec::new()
        }
    }
    fn smeter_level(&self) -> Option<f32> {
        let level = self.smeter.lock().pop_front();
        if level.is_none() {
            thread::sleep(IDLE);
        }
        level
    }
}

/// Hands out `FakeDsp`s and keeps them for inspection
#[derive(Default)]
pub(crate) struct FakeFactory {
    pub created: Mutex<Vec<Arc<FakeDsp>>>,
    pub fail_start: bool,
}

impl FakeFactory {
    pub fn last(&self) -> Arc<FakeDsp> {
        self.created
            .lock()
            .last()
            .cloned()
            .expect("no engine created")
    }
}

impl DspFactory for FakeFactory {
    fn create(&self) -> Arc<dyn Dsp> {
        let dsp = Arc::new(FakeDsp {
            fail_start: self.fail_start,
            ..FakeDsp::default()
        });
        self.created.lock().push(dsp.clone());
        dsp
    }
}

/// Records everything pushed to a session or spectrum sink
#[derive(Default)]
pub(crate) struct RecordingHandler {
    pub dsp_data: Mutex<Vec<Vec<u8>>>,
    pub smeter: Mutex<Vec<f32>>,
    pub secondary_demod: Mutex<usize>,
    pub secondary_fft: Mutex<usize>,
    pub configs: Mutex<Vec<SecondaryDspConfig>>,
    pub spectrum: Mutex<Vec<Vec<u8>>>,
}

impl DspHandler for RecordingHandler {
    fn write_dsp_data(&self, data: &[u8]) {
        self.dsp_data.lock().push(data.to_vec());
    }
    fn write_s_meter_level(&self, level: f32) {
        self.smeter.lock().push(level);
    }
    fn write_secondary_demod(&self, _data: &[u8]) {
        *self.secondary_demod.lock() += 1;
    }
    fn write_secondary_fft(&self, _data: &[u8]) {
        *self.secondary_fft.lock() += 1;
    }
    fn write_secondary_dsp_config(&self, config: &SecondaryDspConfig) {
        self.configs.lock().push(config.clone());
    }
}

impl SpectrumClient for RecordingHandler {
    fn write_spectrum_data(&self, data: &[u8]) {
        self.spectrum.lock().push(data.to_vec());
    }
}
