//! Sound card devices through cpal
//!
//! cpal drives its own callback thread. Each device bridges that callback
//! and the pipeline's stage thread with a lock-free SPSC ring (rtrb): the
//! capture callback pushes, `read` pops; `write` pushes, the playback
//! callback pops.
//!
//! `cpal::Stream` cannot move between threads on every platform, so the
//! stream is built, played and dropped on a small holder thread of its own.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel::{bounded, Sender};

use crate::dsp::sample::{to_fixed, to_float};
use crate::engine::device::{AudioDevice, DeviceError, DeviceResult, DeviceState, Direction, SampleFormat, StreamParams};

/// Give up waiting on the ring after this long and report `WouldBlock`
const IO_TIMEOUT: Duration = Duration::from_millis(500);

/// Ring capacity in periods
const RING_PERIODS: usize = 8;

fn backend_error(context: &str, error: impl std::fmt::Display) -> DeviceError {
    DeviceError::Backend {
        reason: format!("{}: {}", context, error),
    }
}

fn find_device(name: &str, direction: Direction) -> DeviceResult<cpal::Device> {
    let host = cpal::default_host();
    if name == "default" {
        let device = match direction {
            Direction::Capture => host.default_input_device(),
            Direction::Playback => host.default_output_device(),
        };
        return device.ok_or_else(|| DeviceError::NotFound {
            name: format!("default {} device", direction),
        });
    }

    let mut devices = match direction {
        Direction::Capture => host.input_devices(),
        Direction::Playback => host.output_devices(),
    }
    .map_err(|e| backend_error("enumerating devices", e))?;

    devices
        .find(|d| d.name().ok().as_deref() == Some(name))
        .ok_or_else(|| DeviceError::NotFound {
            name: name.to_string(),
        })
}

/// Pick the requested rate and channel count if supported, else the
/// device default
fn negotiate(device: &cpal::Device, direction: Direction, requested: &StreamParams) -> DeviceResult<StreamParams> {
    let supports = |ranges: Vec<cpal::SupportedStreamConfigRange>| {
        ranges.iter().any(|r| {
            r.channels() == requested.channels
                && r.min_sample_rate().0 <= requested.sample_rate
                && requested.sample_rate <= r.max_sample_rate().0
        })
    };

    let (supported, default) = match direction {
        Direction::Capture => (
            device.supported_input_configs().map(|c| c.collect::<Vec<_>>()),
            device.default_input_config(),
        ),
        Direction::Playback => (
            device.supported_output_configs().map(|c| c.collect::<Vec<_>>()),
            device.default_output_config(),
        ),
    };

    if supported.map(supports).unwrap_or(false) {
        return Ok(StreamParams {
            format: SampleFormat::F32,
            ..*requested
        });
    }

    let default = default.map_err(|e| DeviceError::Config {
        reason: e.to_string(),
    })?;
    log::warn!(
        "{} Hz x {} not supported, using device default {} Hz x {}",
        requested.sample_rate,
        requested.channels,
        default.sample_rate().0,
        default.channels()
    );
    Ok(StreamParams {
        sample_rate: default.sample_rate().0,
        channels: default.channels(),
        format: SampleFormat::F32,
        ..*requested
    })
}

fn stream_config(params: &StreamParams) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: params.channels,
        sample_rate: cpal::SampleRate(params.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Owns the thread that keeps a cpal stream alive
struct StreamHolder {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl StreamHolder {
    fn spawn<F>(label: &str, build: F) -> DeviceResult<Self>
    where
        F: FnOnce() -> Result<cpal::Stream, String> + Send + 'static,
    {
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let thread = thread::Builder::new()
            .name(format!("echoline-cpal-{}", label))
            .spawn(move || {
                let stream = match build().and_then(|s| s.play().map(|_| s).map_err(|e| e.to_string())) {
                    Ok(stream) => stream,
                    Err(reason) => {
                        let _ = ready_tx.send(Err(reason));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        let mut holder = Self {
            stop_tx,
            thread: Some(thread),
        };
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(holder),
            Ok(Err(reason)) => {
                holder.shutdown();
                Err(DeviceError::Backend { reason })
            }
            Err(_) => {
                holder.shutdown();
                Err(backend_error(label, "stream thread exited"))
            }
        }
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for StreamHolder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Flags raised by the cpal callbacks
#[derive(Debug, Default)]
struct CallbackFlags {
    overrun: AtomicBool,
    failed: AtomicBool,
    underruns: AtomicU64,
}

/// Wait until `ready()` holds, sleeping a fraction of a period between polls
fn wait_for(params: &StreamParams, mut ready: impl FnMut() -> bool) -> DeviceResult<()> {
    let poll = params.period_duration() / 4;
    let deadline = Instant::now() + IO_TIMEOUT;
    while !ready() {
        if Instant::now() >= deadline {
            return Err(DeviceError::WouldBlock);
        }
        thread::sleep(poll);
    }
    Ok(())
}

// ============================================================================
// Capture
// ============================================================================

/// Sound card input
pub struct CpalCapture {
    name: String,
    device: cpal::Device,
    params: Option<StreamParams>,
    state: DeviceState,
    consumer: Option<rtrb::Consumer<i32>>,
    holder: Option<StreamHolder>,
    flags: Arc<CallbackFlags>,
}

impl CpalCapture {
    pub fn open(name: &str) -> DeviceResult<Self> {
        let device = find_device(name, Direction::Capture)?;
        log::info!(
            "capture device: {}",
            device.name().unwrap_or_else(|_| name.to_string())
        );
        Ok(Self {
            name: name.to_string(),
            device,
            params: None,
            state: DeviceState::Open,
            consumer: None,
            holder: None,
            flags: Arc::new(CallbackFlags::default()),
        })
    }

    fn launch(&mut self) -> DeviceResult<()> {
        let params = self.params.ok_or(DeviceError::InvalidState { state: self.state })?;
        let (mut producer, consumer) = rtrb::RingBuffer::<i32>::new(params.period_samples() * RING_PERIODS);
        let flags = Arc::new(CallbackFlags::default());
        let device = self.device.clone();
        let config = stream_config(&params);
        let cb_flags = Arc::clone(&flags);
        let err_flags = Arc::clone(&flags);

        let holder = StreamHolder::spawn("capture", move || {
            device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        for &sample in data {
                            if producer.push(to_fixed(sample)).is_err() {
                                cb_flags.overrun.store(true, Ordering::Relaxed);
                                break;
                            }
                        }
                    },
                    move |err| {
                        log::error!("capture stream error: {}", err);
                        err_flags.failed.store(true, Ordering::Relaxed);
                    },
                    None,
                )
                .map_err(|e| e.to_string())
        })?;

        self.consumer = Some(consumer);
        self.holder = Some(holder);
        self.flags = flags;
        self.state = DeviceState::Running;
        Ok(())
    }

    fn halt(&mut self) {
        if let Some(mut holder) = self.holder.take() {
            holder.shutdown();
        }
        self.consumer = None;
    }
}

impl AudioDevice for CpalCapture {
    fn name(&self) -> &str {
        &self.name
    }

    fn direction(&self) -> Direction {
        Direction::Capture
    }

    fn configure(&mut self, requested: &StreamParams) -> DeviceResult<StreamParams> {
        let params = negotiate(&self.device, Direction::Capture, requested)?;
        self.params = Some(params);
        Ok(params)
    }

    fn prepare(&mut self) -> DeviceResult<()> {
        if self.params.is_none() || self.state == DeviceState::Closed {
            return Err(DeviceError::InvalidState { state: self.state });
        }
        self.state = DeviceState::Prepared;
        Ok(())
    }

    fn start(&mut self) -> DeviceResult<()> {
        match self.state {
            DeviceState::Running => Ok(()),
            DeviceState::Prepared => self.launch(),
            state => Err(DeviceError::InvalidState { state }),
        }
    }

    fn read(&mut self, buf: &mut [i32], frames: usize) -> DeviceResult<usize> {
        let params = match (self.state, self.params) {
            (DeviceState::Running, Some(p)) => p,
            (state, _) => return Err(DeviceError::InvalidState { state }),
        };
        if self.flags.failed.load(Ordering::Relaxed) {
            self.state = DeviceState::Disconnected;
            return Err(DeviceError::Disconnected);
        }
        if self.flags.overrun.swap(false, Ordering::Relaxed) {
            self.state = DeviceState::Xrun;
            return Err(DeviceError::Xrun);
        }

        let consumer = self
            .consumer
            .as_mut()
            .ok_or(DeviceError::InvalidState { state: self.state })?;
        let channels = params.channels as usize;
        let wanted = (frames * channels).min(buf.len()) / channels * channels;
        wait_for(&params, || consumer.slots() >= wanted)?;
        for slot in &mut buf[..wanted] {
            *slot = consumer.pop().unwrap_or(0);
        }
        Ok(wanted / channels)
    }

    fn recover(&mut self, error: &DeviceError) -> DeviceResult<()> {
        match error {
            DeviceError::Xrun | DeviceError::WouldBlock => {
                self.state = DeviceState::Running;
                Ok(())
            }
            DeviceError::Suspended => {
                self.halt();
                self.state = DeviceState::Prepared;
                self.launch()
            }
            other => Err(backend_error("capture recovery", other)),
        }
    }

    fn state(&self) -> DeviceState {
        self.state
    }

    fn stop(&mut self) -> DeviceResult<()> {
        self.halt();
        if self.state != DeviceState::Closed {
            self.state = DeviceState::Prepared;
        }
        Ok(())
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.halt();
        self.state = DeviceState::Closed;
        Ok(())
    }
}

// ============================================================================
// Playback
// ============================================================================

/// Sound card output
pub struct CpalPlayback {
    name: String,
    device: cpal::Device,
    params: Option<StreamParams>,
    state: DeviceState,
    producer: Option<rtrb::Producer<i32>>,
    holder: Option<StreamHolder>,
    flags: Arc<CallbackFlags>,
}

impl CpalPlayback {
    pub fn open(name: &str) -> DeviceResult<Self> {
        let device = find_device(name, Direction::Playback)?;
        log::info!(
            "playback device: {}",
            device.name().unwrap_or_else(|_| name.to_string())
        );
        Ok(Self {
            name: name.to_string(),
            device,
            params: None,
            state: DeviceState::Open,
            producer: None,
            holder: None,
            flags: Arc::new(CallbackFlags::default()),
        })
    }

    fn launch(&mut self) -> DeviceResult<()> {
        let params = self.params.ok_or(DeviceError::InvalidState { state: self.state })?;
        let (producer, mut consumer) = rtrb::RingBuffer::<i32>::new(params.period_samples() * RING_PERIODS);
        let flags = Arc::new(CallbackFlags::default());
        let device = self.device.clone();
        let config = stream_config(&params);
        let cb_flags = Arc::clone(&flags);
        let err_flags = Arc::clone(&flags);

        let holder = StreamHolder::spawn("playback", move || {
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut starved = false;
                        for slot in data.iter_mut() {
                            *slot = match consumer.pop() {
                                Ok(sample) => to_float(sample),
                                Err(_) => {
                                    starved = true;
                                    0.0
                                }
                            };
                        }
                        if starved {
                            cb_flags.underruns.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    move |err| {
                        log::error!("playback stream error: {}", err);
                        err_flags.failed.store(true, Ordering::Relaxed);
                    },
                    None,
                )
                .map_err(|e| e.to_string())
        })?;

        self.producer = Some(producer);
        self.holder = Some(holder);
        self.flags = flags;
        self.state = DeviceState::Running;
        Ok(())
    }

    fn halt(&mut self) {
        if let Some(mut holder) = self.holder.take() {
            holder.shutdown();
        }
        self.producer = None;
        let underruns = self.flags.underruns.load(Ordering::Relaxed);
        if underruns > 0 {
            log::debug!("playback callback starved {} time(s)", underruns);
        }
    }
}

impl AudioDevice for CpalPlayback {
    fn name(&self) -> &str {
        &self.name
    }

    fn direction(&self) -> Direction {
        Direction::Playback
    }

    fn configure(&mut self, requested: &StreamParams) -> DeviceResult<StreamParams> {
        let params = negotiate(&self.device, Direction::Playback, requested)?;
        self.params = Some(params);
        Ok(params)
    }

    fn prepare(&mut self) -> DeviceResult<()> {
        if self.params.is_none() || self.state == DeviceState::Closed {
            return Err(DeviceError::InvalidState { state: self.state });
        }
        self.state = DeviceState::Prepared;
        Ok(())
    }

    fn start(&mut self) -> DeviceResult<()> {
        match self.state {
            DeviceState::Running => Ok(()),
            DeviceState::Prepared => self.launch(),
            state => Err(DeviceError::InvalidState { state }),
        }
    }

    fn write(&mut self, buf: &[i32], frames: usize) -> DeviceResult<usize> {
        let params = match (self.state, self.params) {
            (DeviceState::Running, Some(p)) => p,
            (state, _) => return Err(DeviceError::InvalidState { state }),
        };
        if self.flags.failed.load(Ordering::Relaxed) {
            self.state = DeviceState::Disconnected;
            return Err(DeviceError::Disconnected);
        }

        let producer = self
            .producer
            .as_mut()
            .ok_or(DeviceError::InvalidState { state: self.state })?;
        let channels = params.channels as usize;
        let samples = (frames * channels).min(buf.len()) / channels * channels;
        wait_for(&params, || producer.slots() >= samples)?;
        for &sample in &buf[..samples] {
            if producer.push(sample).is_err() {
                return Err(DeviceError::Xrun);
            }
        }
        Ok(samples / channels)
    }

    fn recover(&mut self, error: &DeviceError) -> DeviceResult<()> {
        match error {
            DeviceError::Xrun | DeviceError::WouldBlock => {
                self.state = DeviceState::Running;
                Ok(())
            }
            DeviceError::Suspended => {
                self.halt();
                self.state = DeviceState::Prepared;
                self.launch()
            }
            other => Err(backend_error("playback recovery", other)),
        }
    }

    fn state(&self) -> DeviceState {
        self.state
    }

    fn stop(&mut self) -> DeviceResult<()> {
        self.halt();
        if self.state != DeviceState::Closed {
            self.state = DeviceState::Prepared;
        }
        Ok(())
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.halt();
        self.state = DeviceState::Closed;
        Ok(())
    }
}
