//! Three-stage real-time pipeline
//!
//! ```text
//! capture ──▶ queue A ──▶ process (effect chain) ──▶ queue B ──▶ playback
//! ```
//!
//! Each stage runs on its own thread and owns its device for the whole run.
//! Queue B starts with a few silent blocks so playback has headroom; after
//! that the queues absorb jitter by dropping blocks on overflow and playing
//! silence on underrun. Neither ever stops the pipeline. Only a device that
//! cannot be recovered (or a capture source running out) does.
//!
//! When capture runs out, queue A is finished rather than closed. Process
//! drains it and finishes queue B, playback drains that, and only then does
//! the run end. A source that is not live (a file) never drops blocks: the
//! stages wait for room instead.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::backend::open_device;
use super::device::{AudioDevice, DeviceError, DeviceState, Direction, SharedDeviceState, StreamParams};
use super::queue::{BoundedBlockQueue, IoMode, QueueError};
use super::stats::{bump, should_log, PipelineStats, SharedStageState, StageState, StatsSnapshot};
use crate::config::{EffectsConfig, PipelineConfig};
use crate::dsp::{
    Chorus, ChorusControls, Delay, DelayControls, EffectChain, EffectControls, EffectHandle, Flanger,
    FlangerControls, Reverb, ReverbControls,
};
use crate::error::{EcholineError, Result};

/// Overall condition of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum PipelineHealth {
    /// Initialized, not started
    Idle,
    Running,
    /// The capture source ran out
    Finished,
    /// A device failed and could not be recovered
    Degraded { reason: String },
    /// Stopped on request
    Stopped,
}

impl PipelineHealth {
    pub fn is_degraded(&self) -> bool {
        matches!(self, PipelineHealth::Degraded { .. })
    }
}

impl std::fmt::Display for PipelineHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineHealth::Idle => f.write_str("idle"),
            PipelineHealth::Running => f.write_str("running"),
            PipelineHealth::Finished => f.write_str("finished"),
            PipelineHealth::Degraded { reason } => write!(f, "degraded ({})", reason),
            PipelineHealth::Stopped => f.write_str("stopped"),
        }
    }
}

/// One device-facing stage in a status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStatus {
    pub device: String,
    pub stage: StageState,
    pub device_state: DeviceState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueFill {
    pub used: usize,
    pub capacity: usize,
}

impl QueueFill {
    fn of(queue: &BoundedBlockQueue) -> Self {
        Self {
            used: queue.available_for_read(),
            capacity: queue.capacity(),
        }
    }
}

/// Serializable snapshot of a running pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub health: PipelineHealth,
    pub params: StreamParams,
    pub capture: StageStatus,
    pub process: StageState,
    pub playback: StageStatus,
    pub queue_a: QueueFill,
    pub queue_b: QueueFill,
    pub stats: StatsSnapshot,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: f64,
    pub effects: Value,
}

/// Why the stage threads stopped on their own
#[derive(Debug, Clone)]
enum Outcome {
    Finished,
    Degraded(String),
}

/// State shared by the control thread and the three stages
#[derive(Debug)]
struct Shared {
    running: Arc<AtomicBool>,
    queue_a: BoundedBlockQueue,
    queue_b: BoundedBlockQueue,
    stats: PipelineStats,
    capture_stage: SharedStageState,
    process_stage: SharedStageState,
    playback_stage: SharedStageState,
    capture_device: SharedDeviceState,
    playback_device: SharedDeviceState,
    outcome: Mutex<Option<Outcome>>,
}

impl Shared {
    fn new(queue_capacity: usize, capture: DeviceState, playback: DeviceState) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            queue_a: BoundedBlockQueue::new(queue_capacity),
            queue_b: BoundedBlockQueue::new(queue_capacity),
            stats: PipelineStats::new(),
            capture_stage: SharedStageState::new(),
            process_stage: SharedStageState::new(),
            playback_stage: SharedStageState::new(),
            capture_device: SharedDeviceState::new(capture),
            playback_device: SharedDeviceState::new(playback),
            outcome: Mutex::new(None),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clear the flag and wake every stage blocked on a queue
    fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.queue_a.close();
        self.queue_b.close();
    }

    /// First outcome wins, except that a fault while draining replaces `Finished`
    fn record(&self, outcome: Outcome) {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        let replace = matches!(
            (&*slot, &outcome),
            (None, _) | (Some(Outcome::Finished), Outcome::Degraded(_))
        );
        if replace {
            *slot = Some(outcome);
        }
    }

    /// Stop the run from inside a stage, discarding anything still queued
    fn halt(&self, outcome: Outcome) {
        self.record(outcome);
        self.shutdown();
    }

    /// Capture ran out: let process and playback drain what is queued
    fn end_of_input(&self) {
        self.record(Outcome::Finished);
        self.queue_a.finish();
    }

    /// Playback played the last queued block
    fn drained(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn outcome(&self) -> Option<Outcome> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// What a stage does when the next queue is full or empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Drop on overflow, play silence on underrun
    Live,
    /// Wait; nothing is dropped and no silence is inserted
    Lossless,
}

impl Flow {
    fn io_mode(self) -> IoMode {
        match self {
            Flow::Live => IoMode::NonBlocking,
            Flow::Lossless => IoMode::Blocking,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Initialized,
    Running,
    Stopped,
}

/// Typed handles to the effects built from the configuration
#[derive(Debug, Default)]
struct EffectHandles {
    flanger: Option<EffectHandle<FlangerControls>>,
    chorus: Option<EffectHandle<ChorusControls>>,
    delay: Option<EffectHandle<DelayControls>>,
    reverb: Option<EffectHandle<ReverbControls>>,
}

/// Build the chain in signal order: modulation, then delay, then reverb
fn build_chain(effects: &EffectsConfig, sample_rate: u32) -> (EffectChain, EffectHandles) {
    let mut chain = EffectChain::with_sample_rate(sample_rate);
    let handles = EffectHandles {
        flanger: effects
            .flanger
            .as_ref()
            .map(|c| chain.add(Flanger::with_controls(c.controls()))),
        chorus: effects
            .chorus
            .as_ref()
            .map(|c| chain.add(Chorus::with_controls(c.controls()))),
        delay: effects
            .delay
            .as_ref()
            .map(|c| chain.add(Delay::with_controls(c.controls()))),
        reverb: effects.reverb.as_ref().map(|c| {
            let handle = chain.add(Reverb::new(c.room));
            handle.set_mix(c.mix);
            handle
        }),
    };
    (chain, handles)
}

#[derive(Debug)]
struct Workers {
    capture: JoinHandle<Box<dyn AudioDevice>>,
    process: JoinHandle<()>,
    playback: JoinHandle<Box<dyn AudioDevice>>,
}

/// Capture, effect chain and playback running on three threads
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    params: StreamParams,
    shared: Arc<Shared>,
    chain: Arc<Mutex<EffectChain>>,
    effects: EffectHandles,
    capture_name: String,
    playback_name: String,
    capture: Option<Box<dyn AudioDevice>>,
    playback: Option<Box<dyn AudioDevice>>,
    workers: Option<Workers>,
    lifecycle: Lifecycle,
    started_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
}

impl Pipeline {
    /// Open both devices by identifier, then `initialize`
    pub fn open(config: PipelineConfig, capture_id: &str, playback_id: &str) -> Result<Self> {
        let capture = open_device(capture_id, Direction::Capture).map_err(|source| EcholineError::DeviceOpen {
            device: capture_id.to_string(),
            direction: Direction::Capture.to_string(),
            source,
        })?;
        let playback = match open_device(playback_id, Direction::Playback) {
            Ok(device) => device,
            Err(source) => {
                release_device(capture);
                return Err(EcholineError::DeviceOpen {
                    device: playback_id.to_string(),
                    direction: Direction::Playback.to_string(),
                    source,
                });
            }
        };
        Self::initialize(config, capture, playback)
    }

    /// Configure and prepare both devices and build the effect chain
    ///
    /// Capture is configured first; playback is then asked for the rate and
    /// channel count capture actually negotiated. Blocks and queues are
    /// sized from the capture period.
    pub fn initialize(
        config: PipelineConfig,
        mut capture: Box<dyn AudioDevice>,
        mut playback: Box<dyn AudioDevice>,
    ) -> Result<Self> {
        let params = match negotiate(&config, capture.as_mut(), playback.as_mut()) {
            Ok(params) => params,
            Err(e) => {
                release_device(capture);
                release_device(playback);
                return Err(e);
            }
        };

        let queue_capacity = config.queue_blocks * params.period_samples();
        let shared = Arc::new(Shared::new(queue_capacity, capture.state(), playback.state()));
        let (chain, effects) = build_chain(&config.effects, params.sample_rate);
        log::info!(
            "pipeline ready: {} Hz, {} channel(s), {} frames/period, {} effect(s) [{}]",
            params.sample_rate,
            params.channels,
            params.period_frames,
            chain.len(),
            chain.iter().map(|e| e.effect_type()).collect::<Vec<_>>().join(" -> ")
        );

        Ok(Self {
            config,
            params,
            shared,
            chain: Arc::new(Mutex::new(chain)),
            effects,
            capture_name: capture.name().to_string(),
            playback_name: playback.name().to_string(),
            capture: Some(capture),
            playback: Some(playback),
            workers: None,
            lifecycle: Lifecycle::Initialized,
            started_at: None,
            started: None,
        })
    }

    /// Spawn the three stage threads
    pub fn start(&mut self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Running => return Err(EcholineError::AlreadyRunning),
            Lifecycle::Stopped => return Err(EcholineError::NotRestartable),
            Lifecycle::Initialized => {}
        }
        let (Some(capture), Some(playback)) = (self.capture.take(), self.playback.take()) else {
            return Err(EcholineError::NotRestartable);
        };

        self.shared.running.store(true, Ordering::Release);
        self.lifecycle = Lifecycle::Running;
        self.started_at = Some(Utc::now());
        self.started = Some(Instant::now());

        match self.spawn_workers(capture, playback) {
            Ok(workers) => {
                self.workers = Some(workers);
                log::info!("pipeline started: {} -> {}", self.capture_name, self.playback_name);
                Ok(())
            }
            Err(e) => {
                log::error!("pipeline failed to start: {}", e);
                self.lifecycle = Lifecycle::Stopped;
                Err(e)
            }
        }
    }

    fn spawn_workers(&self, capture: Box<dyn AudioDevice>, playback: Box<dyn AudioDevice>) -> Result<Workers> {
        let params = self.params;

        let flow = if capture.is_live() { Flow::Live } else { Flow::Lossless };
        log::debug!("flow control: {:?}", flow);

        let shared = Arc::clone(&self.shared);
        let prefill = self.config.capture_prefill_blocks;
        let capture = spawn_stage("capture", move || run_capture(capture, shared, params, prefill, flow))?;

        let shared = Arc::clone(&self.shared);
        let chain = Arc::clone(&self.chain);
        let process = match spawn_stage("process", move || run_process(shared, chain, params, flow)) {
            Ok(handle) => handle,
            Err(e) => {
                self.abandon_start(&e);
                if let Ok(device) = capture.join() {
                    release_device(device);
                }
                return Err(e);
            }
        };

        let shared = Arc::clone(&self.shared);
        let prefill = self.config.playback_prefill_periods;
        match spawn_stage("playback", move || run_playback(playback, shared, params, prefill, flow)) {
            Ok(playback) => Ok(Workers {
                capture,
                process,
                playback,
            }),
            Err(e) => {
                self.abandon_start(&e);
                let _ = process.join();
                if let Ok(device) = capture.join() {
                    release_device(device);
                }
                Err(e)
            }
        }
    }

    fn abandon_start(&self, error: &EcholineError) {
        self.shared.halt(Outcome::Degraded(error.to_string()));
    }

    /// Stop the stages, join them, then stop and close both devices
    ///
    /// Safe to call any number of times. A stopped pipeline cannot be
    /// started again.
    pub fn stop(&mut self) {
        if self.lifecycle == Lifecycle::Stopped {
            return;
        }
        log::info!("stopping pipeline");
        self.shared.shutdown();

        if let Some(workers) = self.workers.take() {
            self.capture = self.join_device("capture", workers.capture);
            if workers.process.join().is_err() {
                self.shared.halt(Outcome::Degraded("process thread panicked".to_string()));
            }
            self.playback = self.join_device("playback", workers.playback);
        }

        if let Some(device) = self.capture.take() {
            release_device(device);
        }
        self.shared.capture_device.store(DeviceState::Closed);
        if let Some(device) = self.playback.take() {
            release_device(device);
        }
        self.shared.playback_device.store(DeviceState::Closed);

        self.lifecycle = Lifecycle::Stopped;
        log::info!("pipeline stopped ({})", self.health());
    }

    fn join_device(&self, stage: &str, handle: JoinHandle<Box<dyn AudioDevice>>) -> Option<Box<dyn AudioDevice>> {
        match handle.join() {
            Ok(device) => Some(device),
            Err(_) => {
                let reason = format!("{} thread panicked", stage);
                log::error!("{}", reason);
                self.shared.halt(Outcome::Degraded(reason));
                None
            }
        }
    }

    /// True while the stages are running
    pub fn is_running(&self) -> bool {
        self.lifecycle == Lifecycle::Running && self.shared.is_running()
    }

    pub fn health(&self) -> PipelineHealth {
        match (self.lifecycle, self.shared.outcome()) {
            (Lifecycle::Initialized, _) => PipelineHealth::Idle,
            (_, Some(Outcome::Finished)) => PipelineHealth::Finished,
            (_, Some(Outcome::Degraded(reason))) => PipelineHealth::Degraded { reason },
            (Lifecycle::Running, None) => PipelineHealth::Running,
            (Lifecycle::Stopped, None) => PipelineHealth::Stopped,
        }
    }

    /// Block until the stages stop on their own or `timeout` passes
    pub fn wait(&self, timeout: Duration) -> PipelineHealth {
        let deadline = Instant::now() + timeout;
        while self.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        self.health()
    }

    pub fn status(&self) -> PipelineStatus {
        let shared = &self.shared;
        PipelineStatus {
            health: self.health(),
            params: self.params,
            capture: StageStatus {
                device: self.capture_name.clone(),
                stage: shared.capture_stage.load(),
                device_state: shared.capture_device.load(),
            },
            process: shared.process_stage.load(),
            playback: StageStatus {
                device: self.playback_name.clone(),
                stage: shared.playback_stage.load(),
                device_state: shared.playback_device.load(),
            },
            queue_a: QueueFill::of(&shared.queue_a),
            queue_b: QueueFill::of(&shared.queue_b),
            stats: shared.stats.snapshot(),
            started_at: self.started_at,
            uptime_secs: self.started.map(|s| s.elapsed().as_secs_f64()).unwrap_or(0.0),
            effects: self.effect_chain().to_json(),
        }
    }

    /// Negotiated stream parameters
    pub fn params(&self) -> StreamParams {
        self.params
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn delay(&self) -> Option<&EffectHandle<DelayControls>> {
        self.effects.delay.as_ref()
    }

    pub fn reverb(&self) -> Option<&EffectHandle<ReverbControls>> {
        self.effects.reverb.as_ref()
    }

    pub fn flanger(&self) -> Option<&EffectHandle<FlangerControls>> {
        self.effects.flanger.as_ref()
    }

    pub fn chorus(&self) -> Option<&EffectHandle<ChorusControls>> {
        self.effects.chorus.as_ref()
    }

    /// Flip the delay on or off; `None` when no delay is configured
    pub fn toggle_delay(&self) -> Option<bool> {
        let delay = self.effects.delay.as_ref()?;
        let enabled = !delay.is_enabled();
        delay.set_enabled(enabled);
        log::info!("delay {}", if enabled { "enabled" } else { "bypassed" });
        Some(enabled)
    }

    /// Clear every effect's internal state (tails, delay lines)
    pub fn reset_effects(&self) {
        self.effect_chain().reset();
        log::info!("effects reset");
    }

    /// Set a parameter on the effect with this instance id or type name
    pub fn set_effect_param(&self, effect: &str, name: &str, value: &Value) -> Result<()> {
        let controls = {
            let chain = self.effect_chain();
            chain.get_controls(effect).or_else(|| chain.find_by_type(effect))
        }
        .ok_or_else(|| EcholineError::EffectNotFound {
            effect_id: effect.to_string(),
        })?;
        controls.set_param(name, value)?;
        log::debug!("{}.{} = {}", controls.effect_type(), name, value);
        Ok(())
    }

    /// Lock the chain; the process stage waits until the guard is dropped
    pub fn effect_chain(&self) -> MutexGuard<'_, EffectChain> {
        lock_chain(&self.chain)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn negotiate(
    config: &PipelineConfig,
    capture: &mut dyn AudioDevice,
    playback: &mut dyn AudioDevice,
) -> Result<StreamParams> {
    config.validate()?;
    let requested = config.stream_params();

    let params = capture.configure(&requested).map_err(|source| EcholineError::DeviceConfig {
        device: capture.name().to_string(),
        source,
    })?;
    let playback_params = playback
        .configure(&StreamParams {
            sample_rate: params.sample_rate,
            channels: params.channels,
            ..requested
        })
        .map_err(|source| EcholineError::DeviceConfig {
            device: playback.name().to_string(),
            source,
        })?;

    if playback_params.channels != params.channels {
        return Err(EcholineError::ChannelMismatch {
            capture: params.channels,
            playback: playback_params.channels,
        });
    }
    if playback_params.sample_rate != params.sample_rate {
        log::warn!(
            "sample rate mismatch: capture {} Hz, playback {} Hz; output will be pitch-shifted",
            params.sample_rate,
            playback_params.sample_rate
        );
    }

    capture.prepare().map_err(|source| EcholineError::DevicePrepare {
        device: capture.name().to_string(),
        source,
    })?;
    playback.prepare().map_err(|source| EcholineError::DevicePrepare {
        device: playback.name().to_string(),
        source,
    })?;
    Ok(params)
}

fn spawn_stage<T, F>(stage: &'static str, body: F) -> Result<JoinHandle<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    thread::Builder::new()
        .name(format!("echoline-{}", stage))
        .spawn(body)
        .map_err(|source| EcholineError::ThreadSpawn { stage, source })
}

fn lock_chain(chain: &Mutex<EffectChain>) -> MutexGuard<'_, EffectChain> {
    chain.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Stop and close a device we are done with, logging failures
fn release_device(mut device: Box<dyn AudioDevice>) {
    if let Err(e) = device.stop() {
        log::debug!("{} {}: stop: {}", device.direction(), device.name(), e);
    }
    if let Err(e) = device.close() {
        log::warn!("{} {}: close failed: {}", device.direction(), device.name(), e);
    }
}

/// Try to bring a faulted device back; false when the stage must exit
fn recover_device(device: &mut dyn AudioDevice, error: &DeviceError, recoveries: &AtomicU64, shared: &Shared) -> bool {
    match device.recover(error) {
        Ok(()) => {
            let count = bump(recoveries);
            log::warn!(
                "{} '{}': recovered from {} ({} recoveries)",
                device.direction(),
                device.name(),
                error,
                count
            );
            true
        }
        Err(failure) => {
            let reason = format!(
                "{} device '{}' failed ({}) and could not recover: {}",
                device.direction(),
                device.name(),
                error,
                failure
            );
            log::error!("{}", reason);
            shared.halt(Outcome::Degraded(reason));
            false
        }
    }
}

fn start_device(device: &mut dyn AudioDevice, shared: &Shared) -> bool {
    match device.start() {
        Ok(()) => true,
        Err(e) => {
            let reason = format!("{} device '{}' failed to start: {}", device.direction(), device.name(), e);
            log::error!("{}", reason);
            shared.halt(Outcome::Degraded(reason));
            false
        }
    }
}

fn run_capture(
    mut device: Box<dyn AudioDevice>,
    shared: Arc<Shared>,
    params: StreamParams,
    prefill: usize,
    flow: Flow,
) -> Box<dyn AudioDevice> {
    shared.capture_stage.store(StageState::Running);
    capture_loop(device.as_mut(), &shared, &params, prefill, flow);
    shared.capture_stage.store(StageState::Stopping);
    shared.capture_device.store(device.state());
    log::debug!("capture stage exiting");
    shared.capture_stage.store(StageState::Stopped);
    device
}

fn capture_loop(device: &mut dyn AudioDevice, shared: &Shared, params: &StreamParams, prefill: usize, flow: Flow) {
    if !start_device(device, shared) {
        return;
    }
    shared.capture_device.store(device.state());

    let samples = params.period_samples();
    let channels = params.channels as usize;

    let silence = vec![0; samples];
    for _ in 0..prefill {
        if shared.queue_b.try_write(&silence).is_err() {
            break;
        }
    }

    let mut block = vec![0; samples];
    while shared.is_running() {
        let frames = match device.read(&mut block, params.period_frames) {
            Ok(frames) => frames,
            Err(DeviceError::WouldBlock) => continue,
            Err(DeviceError::EndOfStream) => {
                log::info!("capture '{}' reached end of stream, draining", device.name());
                shared.end_of_input();
                break;
            }
            Err(error) => {
                shared.capture_device.store(device.state());
                let recovered = recover_device(device, &error, &shared.stats.capture_recoveries, shared);
                shared.capture_device.store(device.state());
                if !recovered {
                    break;
                }
                continue;
            }
        };

        block[(frames * channels).min(samples)..].fill(0);
        bump(&shared.stats.captured);
        match shared.queue_a.write(&block, flow.io_mode()) {
            Ok(()) => {}
            Err(QueueError::Interrupted | QueueError::Finished) => break,
            Err(error) => {
                let dropped = bump(&shared.stats.capture_dropped);
                if should_log(dropped) {
                    log::warn!("capture: processing is behind, block dropped ({}; {} total)", error, dropped);
                }
            }
        }
    }
}

fn run_process(shared: Arc<Shared>, chain: Arc<Mutex<EffectChain>>, params: StreamParams, flow: Flow) {
    shared.process_stage.store(StageState::Running);
    let channels = params.channels as usize;
    let mut block = vec![0; params.period_samples()];

    while shared.is_running() {
        match shared.queue_a.read(&mut block, IoMode::Blocking) {
            Ok(()) => {}
            Err(QueueError::Interrupted) => break,
            Err(QueueError::Finished) => {
                log::debug!("process: input drained");
                shared.queue_b.finish();
                break;
            }
            Err(error) => {
                log::error!("process: {}", error);
                shared.halt(Outcome::Degraded(format!("process stage: {}", error)));
                break;
            }
        }

        lock_chain(&chain).process_in_place(&mut block, channels);
        bump(&shared.stats.processed);

        match shared.queue_b.write(&block, flow.io_mode()) {
            Ok(()) => {}
            Err(QueueError::Interrupted | QueueError::Finished) => break,
            Err(error) => {
                let dropped = bump(&shared.stats.process_dropped);
                if should_log(dropped) {
                    log::warn!("process: playback is behind, block dropped ({}; {} total)", error, dropped);
                }
            }
        }
    }

    shared.process_stage.store(StageState::Stopping);
    log::debug!("process stage exiting");
    shared.process_stage.store(StageState::Stopped);
}

fn run_playback(
    mut device: Box<dyn AudioDevice>,
    shared: Arc<Shared>,
    params: StreamParams,
    prefill: usize,
    flow: Flow,
) -> Box<dyn AudioDevice> {
    shared.playback_stage.store(StageState::Running);
    playback_loop(device.as_mut(), &shared, &params, prefill, flow);
    shared.playback_stage.store(StageState::Stopping);
    shared.playback_device.store(device.state());
    log::debug!("playback stage exiting");
    shared.playback_stage.store(StageState::Stopped);
    device
}

fn playback_loop(device: &mut dyn AudioDevice, shared: &Shared, params: &StreamParams, prefill: usize, flow: Flow) {
    if !start_device(device, shared) {
        return;
    }
    shared.playback_device.store(device.state());

    let silence = vec![0; params.period_samples()];
    for _ in 0..prefill {
        if !write_block(device, &silence, params, shared) {
            return;
        }
    }

    let mut block = vec![0; params.period_samples()];
    while shared.is_running() {
        match shared.queue_b.read(&mut block, flow.io_mode()) {
            Ok(()) => {}
            Err(QueueError::Interrupted) => break,
            Err(QueueError::Finished) => {
                log::info!("playback: last block played");
                shared.drained();
                break;
            }
            Err(_) => {
                let underruns = bump(&shared.stats.playback_underruns);
                if should_log(underruns) {
                    log::warn!("playback: underrun, playing silence ({} total)", underruns);
                }
                block.fill(0);
            }
        }
        if !write_block(device, &block, params, shared) {
            break;
        }
        bump(&shared.stats.played);
    }
}

/// Write one whole block, retrying short writes; false when the stage must exit
fn write_block(device: &mut dyn AudioDevice, block: &[i32], params: &StreamParams, shared: &Shared) -> bool {
    let channels = params.channels as usize;
    let mut offset = 0;
    while offset < block.len() {
        if !shared.is_running() {
            return false;
        }
        let frames = (block.len() - offset) / channels;
        match device.write(&block[offset..], frames) {
            Ok(0) | Err(DeviceError::WouldBlock) => thread::yield_now(),
            Ok(written) => offset += written * channels,
            Err(error) => {
                shared.playback_device.store(device.state());
                let recovered = recover_device(device, &error, &shared.stats.playback_recoveries, shared);
                shared.playback_device.store(device.state());
                if !recovered {
                    return false;
                }
            }
        }
    }
    true
}
