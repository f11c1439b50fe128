//! csdr-backed DSP engine
//!
//! Every pipeline is a shell chain of `csdr` stages fed by `nc` from the
//! nmux IQ server. Parameters that csdr can retune while running are sent
//! over named pipes ("control FIFOs"); everything else is baked into the
//! command line and applies on the next start.

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process::{ChildStdout, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    Compression, Demodulator, Dsp, DspFactory, Modulation, PipeOptions, SecondaryModulation,
};
use crate::sdr::ProcessGroup;

/// Attempts to open a control FIFO before giving up on the pipeline
const CONTROL_OPEN_ATTEMPTS: usize = 50;
const CONTROL_OPEN_RETRY: Duration = Duration::from_millis(100);

/// Poll interval while no S-meter report is pending
const SMETER_POLL: Duration = Duration::from_millis(50);

/// Padding added by `compress_fft_adpcm_f_u8` per frame, in bytes
const ADPCM_FFT_PAD: usize = 5;

static FIFO_DIR_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Largest integer decimation keeping at least `output_rate` samples/s
pub fn decimation(samp_rate: u32, output_rate: u32) -> u32 {
    if output_rate == 0 {
        return 1;
    }
    (samp_rate / output_rate).max(1)
}

/// Bytes per FFT frame as produced by the chain's final stage
pub fn fft_bytes(fft_size: u32, compression: Compression) -> usize {
    let size = fft_size as usize;
    match compression {
        Compression::None => size * 4,
        Compression::Adpcm => size / 2 + ADPCM_FFT_PAD,
    }
}

#[derive(Debug, Clone)]
struct Params {
    pipe: PipeOptions,
    samp_rate: u32,
    output_rate: u32,
    offset_freq: i64,
    bpf: (f64, f64),
    squelch_level: f64,
    demodulator: Demodulator,
    secondary: Option<SecondaryModulation>,
    secondary_fft_size: u32,
    secondary_offset_freq: i64,
    fft_size: u32,
    fft_fps: u32,
    fft_averages: u32,
    fft_compression: Compression,
    audio_compression: Compression,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            pipe: PipeOptions::default(),
            samp_rate: 0,
            output_rate: 11025,
            offset_freq: 0,
            bpf: (-4000.0, 4000.0),
            squelch_level: 0.0,
            demodulator: Demodulator::Audio(Modulation::Nfm),
            secondary: None,
            secondary_fft_size: 1024,
            secondary_offset_freq: 0,
            fft_size: 1024,
            fft_fps: 9,
            fft_averages: 0,
            fft_compression: Compression::None,
            audio_compression: Compression::None,
        }
    }
}

impl Params {
    fn decimation(&self) -> u32 {
        decimation(self.samp_rate, self.output_rate)
    }

    fn if_samp_rate(&self) -> f64 {
        match self.demodulator {
            Demodulator::Fft => self.samp_rate as f64,
            Demodulator::Audio(_) => self.samp_rate as f64 / self.decimation() as f64,
        }
    }

    fn envs(&self) -> Vec<(&'static str, &'static str)> {
        let mut envs = Vec::new();
        if self.pipe.dynamic_bufsize {
            envs.push(("CSDR_DYNAMIC_BUFSIZE_ON", "1"));
        }
        if self.pipe.print_bufsizes {
            envs.push(("CSDR_PRINT_BUFSIZES", "1"));
        }
        envs
    }

    fn source(&self) -> String {
        let mut chain = format!("nc -v 127.0.0.1 {} | ", self.pipe.nc_port);
        if self.pipe.through {
            chain.push_str("csdr through | ");
        }
        chain
    }

    // Control FIFO payloads

    fn shift_value(&self) -> Option<String> {
        (self.samp_rate > 0).then(|| format!("{}", -(self.offset_freq as f64) / self.samp_rate as f64))
    }

    fn bpf_value(&self) -> Option<String> {
        let if_rate = self.if_samp_rate();
        (if_rate > 0.0).then(|| format!("{} {}", self.bpf.0 / if_rate, self.bpf.1 / if_rate))
    }

    fn squelch_value(&self) -> String {
        format!("{}", self.squelch_level)
    }

    fn secondary_shift_value(&self) -> Option<String> {
        let if_rate = self.if_samp_rate();
        (if_rate > 0.0).then(|| format!("{}", -(self.secondary_offset_freq as f64) / if_rate))
    }
}

/// Wideband spectrum chain
fn fft_chain(p: &Params) -> String {
    let frames = p.samp_rate / p.fft_fps.max(1);
    let block = if p.fft_averages == 0 {
        frames
    } else {
        frames / p.fft_averages
    };
    let mut chain = p.source();
    chain.push_str(&format!("csdr fft_cc {} {} | ", p.fft_size, block));
    if p.fft_averages == 0 {
        chain.push_str("csdr logpower_cf -70 | ");
    } else {
        chain.push_str(&format!(
            "csdr logaveragepower_cf -70 {} {} | ",
            p.fft_size, p.fft_averages
        ));
    }
    chain.push_str(&format!("csdr fft_exchange_sides_ff {}", p.fft_size));
    if p.fft_compression == Compression::Adpcm {
        chain.push_str(&format!(" | csdr compress_fft_adpcm_f_u8 {}", p.fft_size));
    }
    chain
}

/// Channelizer, squelch and demodulator for one audio mode
fn demod_chain(p: &Params, modulation: Modulation, f: &FifoPaths) -> String {
    let d = p.decimation();
    let if_rate = p.if_samp_rate();
    let fraction = if p.output_rate > 0 {
        if_rate / p.output_rate as f64
    } else {
        1.0
    };
    let ddc_transition_bw = 0.15 * if_rate / p.samp_rate.max(1) as f64;
    let bpf_transition_bw = 320.0 / if_rate;
    let smeter_every = ((if_rate / 6000.0) as u32).max(1);

    let mut chain = p.source();
    chain.push_str(&format!(
        "csdr shift_addition_cc --fifo {} | csdr fir_decimate_cc {} {} HAMMING | \
         csdr bandpass_fir_fft_cc --fifo {} {} HAMMING | \
         csdr squelch_and_smeter_cc --fifo {} --outfifo {} 5 {} | ",
        f.shift.display(),
        d,
        ddc_transition_bw,
        f.bpf.display(),
        bpf_transition_bw,
        f.squelch.display(),
        f.smeter.display(),
        smeter_every,
    ));
    if p.secondary.is_some() {
        chain.push_str(&format!(
            "csdr tee {} | csdr tee {} | ",
            f.iqtee.display(),
            f.iqtee2.display()
        ));
    }
    chain.push_str(&match modulation {
        Modulation::Nfm => format!(
            "csdr fmdemod_quadri_cf | csdr limit_ff | csdr fractional_decimator_ff {} | \
             csdr deemphasis_nfm_ff {} | csdr convert_f_s16",
            fraction, p.output_rate
        ),
        Modulation::Am => format!(
            "csdr amdemod_cf | csdr fastdcblock_ff | csdr fractional_decimator_ff {} | \
             csdr agc_ff | csdr limit_ff | csdr convert_f_s16",
            fraction
        ),
        Modulation::Usb | Modulation::Lsb | Modulation::Cw => format!(
            "csdr realpart_cf | csdr fractional_decimator_ff {} | csdr agc_ff | \
             csdr limit_ff | csdr convert_f_s16",
            fraction
        ),
    });
    if p.audio_compression == Compression::Adpcm {
        chain.push_str(" | csdr encode_ima_adpcm_i16_u8");
    }
    chain
}

/// Waterfall of the channel the digital decoder listens to
fn secondary_fft_chain(p: &Params, f: &FifoPaths) -> String {
    let block = (p.if_samp_rate() / (p.fft_fps.max(1) * 2) as f64) as u32;
    let mut chain = format!(
        "cat {} | csdr realpart_cf | csdr fft_fc {} {} | csdr logpower_cf -70",
        f.iqtee.display(),
        p.secondary_fft_size,
        block
    );
    if p.fft_compression == Compression::Adpcm {
        chain.push_str(&format!(
            " | csdr compress_fft_adpcm_f_u8 {}",
            p.secondary_fft_size
        ));
    }
    chain
}

fn secondary_demod_chain(p: &Params, modulation: SecondaryModulation, f: &FifoPaths) -> String {
    let if_rate = p.if_samp_rate();
    match modulation {
        SecondaryModulation::Bpsk31 => {
            let cutoff = 0.65 * modulation.bandwidth() / if_rate;
            let samples_per_bit = ((if_rate / modulation.bandwidth()).round() as u32) & !3;
            format!(
                "cat {} | csdr shift_addition_cc --fifo {} | \
                 csdr bandpass_fir_fft_cc -{cutoff} {cutoff} {cutoff} | \
                 csdr simple_agc_cc 0.001 0.5 | \
                 csdr timing_recovery_cc GARDNER {} 0.5 2 --add_q | \
                 CSDR_FIXED_BUFSIZE=1 csdr dbpsk_decoder_c_u8 | \
                 CSDR_FIXED_BUFSIZE=1 csdr psk31_varicode_decoder_u8_u8",
                f.iqtee2.display(),
                f.secondary_shift.display(),
                samples_per_bit,
            )
        }
    }
}

#[derive(Debug, Clone)]
struct FifoPaths {
    shift: PathBuf,
    bpf: PathBuf,
    squelch: PathBuf,
    smeter: PathBuf,
    iqtee: PathBuf,
    iqtee2: PathBuf,
    secondary_shift: PathBuf,
}

impl FifoPaths {
    fn in_dir(dir: &Path) -> Self {
        Self {
            shift: dir.join("shift"),
            bpf: dir.join("bpf"),
            squelch: dir.join("squelch"),
            smeter: dir.join("smeter"),
            iqtee: dir.join("iqtee"),
            iqtee2: dir.join("iqtee2"),
            secondary_shift: dir.join("secondary_shift"),
        }
    }
}

/// Private directory of named pipes, removed on drop
struct FifoDir {
    dir: PathBuf,
    paths: FifoPaths,
}

impl FifoDir {
    fn create(with_secondary: bool) -> io::Result<Self> {
        let dir = std::env::temp_dir().join(format!(
            "webrx-core-{}-{}",
            std::process::id(),
            FIFO_DIR_SEQ.fetch_add(1, Ordering::SeqCst)
        ));
        fs::create_dir(&dir)?;
        let fifo_dir = Self {
            paths: FifoPaths::in_dir(&dir),
            dir,
        };

        let p = &fifo_dir.paths;
        let mut pipes = vec![&p.shift, &p.bpf, &p.squelch, &p.smeter];
        if with_secondary {
            pipes.extend([&p.iqtee, &p.iqtee2, &p.secondary_shift]);
        }
        for path in pipes {
            mkfifo(path.as_path(), Mode::S_IRUSR | Mode::S_IWUSR)?;
        }
        Ok(fifo_dir)
    }
}

impl Drop for FifoDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            warn!("[csdr] failed to remove {}: {}", self.dir.display(), e);
        }
    }
}

/// Open the write side of a control FIFO once csdr has opened its end
fn open_control(path: &Path) -> io::Result<File> {
    for _ in 0..CONTROL_OPEN_ATTEMPTS {
        match OpenOptions::new()
            .write(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(path)
        {
            Ok(file) => return Ok(file),
            Err(e) if e.raw_os_error() == Some(Errno::ENXIO as i32) => {
                thread::sleep(CONTROL_OPEN_RETRY)
            }
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("no reader on {}", path.display()),
    ))
}

/// Line-oriented S-meter reports from `squelch_and_smeter_cc`
struct SmeterReader<R> {
    source: R,
    pending: Vec<u8>,
}

impl SmeterReader<File> {
    /// Non-blocking, so it never waits for csdr to open the other end
    fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(path)?;
        Ok(Self::new(file))
    }
}

impl<R: Read> SmeterReader<R> {
    fn new(source: R) -> Self {
        Self {
            source,
            pending: Vec::new(),
        }
    }

    /// Next complete report; `None` when nothing is buffered
    fn next_level(&mut self) -> Option<f32> {
        loop {
            while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.pending.drain(..=pos).collect();
                match std::str::from_utf8(&line).ok().map(str::trim) {
                    Some(text) if !text.is_empty() => match text.parse() {
                        Ok(level) => return Some(level),
                        Err(_) => debug!("[csdr] unparseable s-meter line {:?}", text),
                    },
                    _ => {}
                }
            }
            let mut buf = [0u8; 256];
            match self.source.read(&mut buf) {
                Ok(0) => return None,
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) => {
                    debug!("[csdr] s-meter read failed: {}", e);
                    return None;
                }
            }
        }
    }
}

/// Fill up to `size` bytes, stopping early at end of stream
fn read_up_to(source: &mut impl Read, size: usize) -> Vec<u8> {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("[csdr] read failed: {}", e);
                break;
            }
        }
    }
    buf.truncate(filled);
    buf
}

#[derive(Clone, Copy)]
enum Control {
    Shift,
    Bpf,
    Squelch,
    SecondaryShift,
}

#[derive(Default)]
struct Controls {
    shift: Option<File>,
    bpf: Option<File>,
    squelch: Option<File>,
    secondary_shift: Option<File>,
}

impl Controls {
    fn send(&mut self, control: Control, line: &str) {
        let (name, file) = match control {
            Control::Shift => ("shift", &mut self.shift),
            Control::Bpf => ("bpf", &mut self.bpf),
            Control::Squelch => ("squelch", &mut self.squelch),
            Control::SecondaryShift => ("secondary_shift", &mut self.secondary_shift),
        };
        if let Some(file) = file {
            if let Err(e) = writeln!(file, "{}", line) {
                warn!("[csdr] failed to write {} control: {}", name, e);
            }
        }
    }
}

/// Process groups of one running configuration
struct Pipeline {
    processes: Vec<ProcessGroup>,
    controls: Controls,
    // Dropped last: the processes may still hold the pipes open
    _fifos: Option<FifoDir>,
}

#[derive(Default)]
struct Outputs {
    primary: Option<ChildStdout>,
    secondary_fft: Option<ChildStdout>,
    secondary_demod: Option<ChildStdout>,
    smeter: Option<SmeterReader<File>>,
}

impl Pipeline {
    fn launch(p: &Params) -> Result<(Self, Outputs)> {
        let envs = p.envs();
        let modulation = match p.demodulator {
            Demodulator::Fft => {
                let (group, stdout) =
                    ProcessGroup::spawn("csdr-fft", &fft_chain(p), &envs, Stdio::piped())
                        .context("Failed to launch FFT chain")?;
                let pipeline = Self {
                    processes: vec![group],
                    controls: Controls::default(),
                    _fifos: None,
                };
                let outputs = Outputs {
                    primary: stdout,
                    ..Outputs::default()
                };
                return Ok((pipeline, outputs));
            }
            Demodulator::Audio(m) => m,
        };

        let fifos = FifoDir::create(p.secondary.is_some()).context("Failed to create FIFOs")?;
        let paths = fifos.paths.clone();
        let mut outputs = Outputs {
            smeter: Some(SmeterReader::open(&paths.smeter).context("Failed to open s-meter FIFO")?),
            ..Outputs::default()
        };

        let (group, stdout) = ProcessGroup::spawn(
            "csdr-demod",
            &demod_chain(p, modulation, &paths),
            &envs,
            Stdio::piped(),
        )
        .context("Failed to launch demodulator chain")?;
        outputs.primary = stdout;
        let mut pipeline = Self {
            processes: vec![group],
            controls: Controls::default(),
            _fifos: Some(fifos),
        };

        if let Some(secondary) = p.secondary {
            let (group, stdout) = ProcessGroup::spawn(
                "csdr-secondary-fft",
                &secondary_fft_chain(p, &paths),
                &envs,
                Stdio::piped(),
            )
            .context("Failed to launch secondary FFT chain")?;
            pipeline.processes.push(group);
            outputs.secondary_fft = stdout;

            let (group, stdout) = ProcessGroup::spawn(
                "csdr-secondary-demod",
                &secondary_demod_chain(p, secondary, &paths),
                &envs,
                Stdio::piped(),
            )
            .context("Failed to launch secondary decoder chain")?;
            pipeline.processes.push(group);
            outputs.secondary_demod = stdout;
        }

        // Dropping `pipeline` on error terminates what was already spawned
        let controls = &mut pipeline.controls;
        controls.shift = Some(open_control(&paths.shift).context("shift control")?);
        controls.bpf = Some(open_control(&paths.bpf).context("bandpass control")?);
        controls.squelch = Some(open_control(&paths.squelch).context("squelch control")?);
        if p.secondary.is_some() {
            controls.secondary_shift =
                Some(open_control(&paths.secondary_shift).context("secondary shift control")?);
        }

        if let Some(v) = p.shift_value() {
            controls.send(Control::Shift, &v);
        }
        if let Some(v) = p.bpf_value() {
            controls.send(Control::Bpf, &v);
        }
        controls.send(Control::Squelch, &p.squelch_value());
        if let Some(v) = p.secondary_shift_value() {
            controls.send(Control::SecondaryShift, &v);
        }

        Ok((pipeline, outputs))
    }
}

/// Shared handle on a pipeline's stdout. Readers clone it out of its slot,
/// so clearing the slot never waits for a read in progress.
type Stream = Arc<Mutex<Box<dyn Read + Send>>>;

fn stream(stdout: Option<ChildStdout>) -> Option<Stream> {
    stdout.map(|s| Arc::new(Mutex::new(Box::new(s) as Box<dyn Read + Send>)))
}

enum Engine {
    Stopped,
    Running(Pipeline),
}

/// `Dsp` implementation driving csdr process chains
pub struct CsdrDsp {
    params: Mutex<Params>,
    engine: Mutex<Engine>,
    primary: Mutex<Option<Stream>>,
    secondary_fft: Mutex<Option<Stream>>,
    secondary_demod: Mutex<Option<Stream>>,
    smeter: Mutex<Option<SmeterReader<File>>>,
}

impl Default for CsdrDsp {
    fn default() -> Self {
        Self::new()
    }
}

impl CsdrDsp {
    pub fn new() -> Self {
        Self {
            params: Mutex::new(Params::default()),
            engine: Mutex::new(Engine::Stopped),
            primary: Mutex::new(None),
            secondary_fft: Mutex::new(None),
            secondary_demod: Mutex::new(None),
            smeter: Mutex::new(None),
        }
    }

    /// Update parameters, then forward a live value if the engine is running
    fn update(&self, control: Control, f: impl FnOnce(&mut Params) -> Option<String>) {
        let line = f(&mut *self.params.lock());
        if let (Some(line), Engine::Running(pipeline)) = (line, &mut *self.engine.lock()) {
            pipeline.controls.send(control, &line);
        }
    }

    fn read_from(slot: &Mutex<Option<Stream>>, size: usize) -> Vec<u8> {
        // Slot lock is released before blocking on the pipe
        let stream = slot.lock().clone();
        match stream {
            Some(stream) => read_up_to(&mut *stream.lock(), size),
            None => Vec::new(),
        }
    }

    /// Detach every output; blocked readers finish on end of stream
    fn release_outputs(&self) {
        self.primary.lock().take();
        self.secondary_fft.lock().take();
        self.secondary_demod.lock().take();
        self.smeter.lock().take();
    }
}

impl Dsp for CsdrDsp {
    fn set_pipe_options(&self, options: PipeOptions) {
        self.params.lock().pipe = options;
    }

    fn set_samp_rate(&self, samp_rate: u32) {
        self.params.lock().samp_rate = samp_rate;
    }

    fn set_output_rate(&self, output_rate: u32) {
        self.params.lock().output_rate = output_rate;
    }

    fn set_offset_freq(&self, offset: i64) {
        self.update(Control::Shift, |p| {
            p.offset_freq = offset;
            p.shift_value()
        });
    }

    fn set_bpf(&self, low_cut: f64, high_cut: f64) {
        self.update(Control::Bpf, |p| {
            p.bpf = (low_cut, high_cut);
            p.bpf_value()
        });
    }

    fn get_bpf(&self) -> (f64, f64) {
        self.params.lock().bpf
    }

    fn set_squelch_level(&self, level: f64) {
        self.update(Control::Squelch, |p| {
            p.squelch_level = level;
            Some(p.squelch_value())
        });
    }

    fn set_demodulator(&self, demodulator: Demodulator) {
        self.params.lock().demodulator = demodulator;
    }

    fn get_demodulator(&self) -> Demodulator {
        self.params.lock().demodulator
    }

    fn set_secondary_demodulator(&self, demodulator: Option<SecondaryModulation>) {
        self.params.lock().secondary = demodulator;
    }

    fn get_secondary_demodulator(&self) -> Option<SecondaryModulation> {
        self.params.lock().secondary
    }

    fn set_secondary_fft_size(&self, size: u32) {
        self.params.lock().secondary_fft_size = size;
    }

    fn set_secondary_offset_freq(&self, offset: i64) {
        self.update(Control::SecondaryShift, |p| {
            p.secondary_offset_freq = offset;
            p.secondary_shift_value()
        });
    }

    fn set_fft_size(&self, size: u32) {
        self.params.lock().fft_size = size;
    }

    fn set_fft_fps(&self, fps: u32) {
        self.params.lock().fft_fps = fps;
    }

    fn set_fft_averages(&self, averages: u32) {
        self.params.lock().fft_averages = averages;
    }

    fn set_fft_compression(&self, compression: Compression) {
        self.params.lock().fft_compression = compression;
    }

    fn set_audio_compression(&self, compression: Compression) {
        self.params.lock().audio_compression = compression;
    }

    fn if_samp_rate(&self) -> f64 {
        self.params.lock().if_samp_rate()
    }

    fn secondary_bw(&self) -> f64 {
        self.params
            .lock()
            .secondary
            .map(|m| m.bandwidth())
            .unwrap_or(0.0)
    }

    fn fft_bytes_to_read(&self) -> usize {
        let p = self.params.lock();
        fft_bytes(p.fft_size, p.fft_compression)
    }

    fn secondary_fft_bytes_to_read(&self) -> usize {
        let p = self.params.lock();
        fft_bytes(p.secondary_fft_size, p.fft_compression)
    }

    fn start(&self) -> Result<()> {
        let mut engine = self.engine.lock();
        if matches!(*engine, Engine::Running(_)) {
            return Ok(());
        }
        let params = self.params.lock().clone();
        let (pipeline, outputs) = Pipeline::launch(&params)?;

        *self.primary.lock() = stream(outputs.primary);
        *self.secondary_fft.lock() = stream(outputs.secondary_fft);
        *self.secondary_demod.lock() = stream(outputs.secondary_demod);
        *self.smeter.lock() = outputs.smeter;
        *engine = Engine::Running(pipeline);
        info!("[csdr] started {} pipeline", params.demodulator);
        Ok(())
    }

    fn stop(&self) {
        let pipeline = match std::mem::replace(&mut *self.engine.lock(), Engine::Stopped) {
            Engine::Running(pipeline) => pipeline,
            Engine::Stopped => return,
        };
        for process in &pipeline.processes {
            process.terminate();
        }
        // Readers see end of stream once the groups are gone
        self.release_outputs();
        drop(pipeline);
        debug!("[csdr] pipeline stopped");
    }

    fn is_running(&self) -> bool {
        matches!(*self.engine.lock(), Engine::Running(_))
    }

    fn read(&self, size: usize) -> Vec<u8> {
        Self::read_from(&self.primary, size)
    }

    fn read_secondary_demod(&self, size: usize) -> Vec<u8> {
        Self::read_from(&self.secondary_demod, size)
    }

    fn read_secondary_fft(&self, size: usize) -> Vec<u8> {
        Self::read_from(&self.secondary_fft, size)
    }

    fn smeter_level(&self) -> Option<f32> {
        let level = self.smeter.lock().as_mut().and_then(SmeterReader::next_level);
        if level.is_none() {
            thread::sleep(SMETER_POLL);
        }
        level
    }
}

impl Drop for CsdrDsp {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Creates `CsdrDsp` engines
#[derive(Debug, Default, Clone, Copy)]
pub struct CsdrFactory;

impl DspFactory for CsdrFactory {
    fn create(&self) -> Arc<dyn Dsp> {
        Arc::new(CsdrDsp::new())
    }
}
