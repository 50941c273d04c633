//! In-memory devices
//!
//! Scripted capture and collecting playback for tests and for embedding the
//! pipeline in another program. Faults can be injected at a given I/O call
//! to exercise the recovery paths.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use super::DeviceCore;
use crate::engine::device::{AudioDevice, DeviceError, DeviceResult, DeviceState, Direction, StreamParams};

/// Samples collected by a `MemoryPlayback`
pub type SharedSink = Arc<Mutex<Vec<i32>>>;

/// Fault schedule shared by both memory devices
#[derive(Debug, Default)]
struct Faults {
    /// (I/O call index, error to return on that call)
    scheduled: VecDeque<(usize, DeviceError)>,
    calls: usize,
    fail_recovery: bool,
}

impl Faults {
    /// Error scheduled for this call, if any; counts the call either way
    fn next(&mut self) -> Option<DeviceError> {
        let call = self.calls;
        self.calls += 1;
        match self.scheduled.front() {
            Some((at, _)) if *at == call => self.scheduled.pop_front().map(|(_, e)| e),
            _ => None,
        }
    }

    fn schedule(&mut self, call: usize, error: DeviceError) {
        let pos = self
            .scheduled
            .iter()
            .position(|(at, _)| *at > call)
            .unwrap_or(self.scheduled.len());
        self.scheduled.insert(pos, (call, error));
    }
}

fn mark_fault(core: &mut DeviceCore, error: &DeviceError) {
    core.state = match error {
        DeviceError::Xrun | DeviceError::Suspended => DeviceState::Xrun,
        DeviceError::Disconnected => DeviceState::Disconnected,
        _ => core.state,
    };
}

fn recover(core: &mut DeviceCore, faults: &Faults, error: &DeviceError) -> DeviceResult<()> {
    if faults.fail_recovery {
        core.state = DeviceState::Disconnected;
        return Err(DeviceError::Backend {
            reason: format!("{}: scripted recovery failure after {}", core.name, error),
        });
    }
    core.recover(error)
}

/// Capture device replaying a fixed sample sequence
///
/// Once the samples run out the device reports `EndOfStream`, or plays
/// silence forever when built with `silence_after_end`.
#[derive(Debug)]
pub struct MemoryCapture {
    core: DeviceCore,
    source: Vec<i32>,
    cursor: usize,
    silence_after_end: bool,
    live: bool,
    channels_override: Option<u16>,
    faults: Faults,
}

impl MemoryCapture {
    /// Unpaced capture of interleaved `samples`
    pub fn new(name: &str, samples: Vec<i32>) -> Self {
        Self {
            core: DeviceCore::new(name, Direction::Capture, false),
            source: samples,
            cursor: 0,
            silence_after_end: false,
            live: true,
            channels_override: None,
            faults: Faults::default(),
        }
    }

    /// Keep real time instead of returning as fast as possible
    pub fn paced(mut self) -> Self {
        self.core = DeviceCore::new(&self.core.name, Direction::Capture, true);
        self
    }

    /// Play silence after the samples run out instead of ending
    pub fn silence_after_end(mut self) -> Self {
        self.silence_after_end = true;
        self
    }

    /// Behave like a file: the pipeline waits for room instead of dropping
    pub fn offline(mut self) -> Self {
        self.live = false;
        self
    }

    /// Negotiate this channel count whatever is requested
    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels_override = Some(channels);
        self
    }

    /// Fail the `call`-th read (0-based) with `error`
    pub fn fail_at(mut self, call: usize, error: DeviceError) -> Self {
        self.faults.schedule(call, error);
        self
    }

    /// Make every `recover` call fail
    pub fn fail_recovery(mut self) -> Self {
        self.faults.fail_recovery = true;
        self
    }
}

impl AudioDevice for MemoryCapture {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn direction(&self) -> Direction {
        Direction::Capture
    }

    fn is_live(&self) -> bool {
        self.live
    }

    fn configure(&mut self, requested: &StreamParams) -> DeviceResult<StreamParams> {
        let mut params = *requested;
        if let Some(channels) = self.channels_override {
            params.channels = channels;
        }
        self.core.configure(params)
    }

    fn prepare(&mut self) -> DeviceResult<()> {
        self.core.prepare()
    }

    fn start(&mut self) -> DeviceResult<()> {
        self.core.start()
    }

    fn read(&mut self, buf: &mut [i32], frames: usize) -> DeviceResult<usize> {
        let params = self.core.running_params()?;
        if let Some(error) = self.faults.next() {
            mark_fault(&mut self.core, &error);
            return Err(error);
        }

        let channels = params.channels as usize;
        let wanted = (frames * channels).min(buf.len());
        let remaining = self.source.len() - self.cursor;
        if remaining == 0 && !self.silence_after_end {
            return Err(DeviceError::EndOfStream);
        }

        let take = wanted.min(remaining) / channels * channels;
        buf[..take].copy_from_slice(&self.source[self.cursor..self.cursor + take]);
        self.cursor += take;
        let frames = if self.silence_after_end {
            buf[take..wanted].fill(0);
            wanted / channels
        } else {
            take / channels
        };
        self.core.pace(frames);
        Ok(frames)
    }

    fn recover(&mut self, error: &DeviceError) -> DeviceResult<()> {
        recover(&mut self.core, &self.faults, error)
    }

    fn state(&self) -> DeviceState {
        self.core.state
    }

    fn stop(&mut self) -> DeviceResult<()> {
        self.core.stop()
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.core.close();
        Ok(())
    }
}

/// Playback device appending everything written to a shared vector
#[derive(Debug)]
pub struct MemoryPlayback {
    core: DeviceCore,
    sink: SharedSink,
    channels_override: Option<u16>,
    rate_override: Option<u32>,
    faults: Faults,
}

impl MemoryPlayback {
    /// Unpaced playback into a fresh sink
    pub fn new(name: &str) -> Self {
        Self {
            core: DeviceCore::new(name, Direction::Playback, false),
            sink: Arc::new(Mutex::new(Vec::new())),
            channels_override: None,
            rate_override: None,
            faults: Faults::default(),
        }
    }

    /// Keep real time instead of returning as fast as possible
    pub fn paced(mut self) -> Self {
        self.core = DeviceCore::new(&self.core.name, Direction::Playback, true);
        self
    }

    /// Negotiate this channel count whatever is requested
    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels_override = Some(channels);
        self
    }

    /// Run at this sample rate whatever is requested
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.rate_override = Some(sample_rate);
        self
    }

    /// Fail the `call`-th write (0-based) with `error`
    pub fn fail_at(mut self, call: usize, error: DeviceError) -> Self {
        self.faults.schedule(call, error);
        self
    }

    /// Make every `recover` call fail
    pub fn fail_recovery(mut self) -> Self {
        self.faults.fail_recovery = true;
        self
    }

    /// Handle to the collected samples
    pub fn sink(&self) -> SharedSink {
        Arc::clone(&self.sink)
    }
}

impl AudioDevice for MemoryPlayback {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn direction(&self) -> Direction {
        Direction::Playback
    }

    fn configure(&mut self, requested: &StreamParams) -> DeviceResult<StreamParams> {
        let mut params = *requested;
        if let Some(channels) = self.channels_override {
            params.channels = channels;
        }
        if let Some(sample_rate) = self.rate_override {
            params.sample_rate = sample_rate;
        }
        self.core.configure(params)
    }

    fn prepare(&mut self) -> DeviceResult<()> {
        self.core.prepare()
    }

    fn start(&mut self) -> DeviceResult<()> {
        self.core.start()
    }

    fn write(&mut self, buf: &[i32], frames: usize) -> DeviceResult<usize> {
        let params = self.core.running_params()?;
        if let Some(error) = self.faults.next() {
            mark_fault(&mut self.core, &error);
            return Err(error);
        }

        let channels = params.channels as usize;
        let samples = (frames * channels).min(buf.len()) / channels * channels;
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(&buf[..samples]);
        let frames = samples / channels;
        self.core.pace(frames);
        Ok(frames)
    }

    fn recover(&mut self, error: &DeviceError) -> DeviceResult<()> {
        recover(&mut self.core, &self.faults, error)
    }

    fn state(&self) -> DeviceState {
        self.core.state
    }

    fn stop(&mut self) -> DeviceResult<()> {
        self.core.stop()
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.core.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params(channels: u16, period: usize) -> StreamParams {
        StreamParams {
            channels,
            period_frames: period,
            ..StreamParams::default()
        }
    }

    fn start<D: AudioDevice>(device: &mut D, p: StreamParams) {
        device.configure(&p).unwrap();
        device.prepare().unwrap();
        device.start().unwrap();
    }

    #[test]
    fn test_capture_replays_then_ends() {
        let mut capture = MemoryCapture::new("mem", (1..=10).collect());
        start(&mut capture, params(2, 2));

        let mut buf = [0; 4];
        assert_eq!(capture.read(&mut buf, 2).unwrap(), 2);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(capture.read(&mut buf, 2).unwrap(), 2);
        assert_eq!(capture.read(&mut buf, 2).unwrap(), 1);
        assert_eq!(&buf[..2], &[9, 10]);
        assert!(matches!(
            capture.read(&mut buf, 2),
            Err(DeviceError::EndOfStream)
        ));
    }

    #[test]
    fn test_capture_silence_after_end() {
        let mut capture = MemoryCapture::new("mem", vec![5, 5]).silence_after_end();
        start(&mut capture, params(1, 4));
        let mut buf = [9; 4];
        assert_eq!(capture.read(&mut buf, 4).unwrap(), 4);
        assert_eq!(buf, [5, 5, 0, 0]);
        assert_eq!(capture.read(&mut buf, 4).unwrap(), 4);
        assert_eq!(buf, [0, 0, 0, 0]);
    }

    #[test]
    fn test_scheduled_fault_and_recovery() {
        let mut capture = MemoryCapture::new("mem", vec![1; 16]).fail_at(1, DeviceError::Xrun);
        start(&mut capture, params(1, 4));
        let mut buf = [0; 4];
        capture.read(&mut buf, 4).unwrap();

        let err = capture.read(&mut buf, 4).unwrap_err();
        assert!(matches!(err, DeviceError::Xrun));
        assert_eq!(capture.state(), DeviceState::Xrun);

        capture.recover(&err).unwrap();
        assert_eq!(capture.state(), DeviceState::Running);
        assert_eq!(capture.read(&mut buf, 4).unwrap(), 4);
    }

    #[test]
    fn test_failed_recovery() {
        let mut playback = MemoryPlayback::new("mem")
            .fail_at(0, DeviceError::Suspended)
            .fail_recovery();
        start(&mut playback, params(2, 2));
        let err = playback.write(&[1, 2, 3, 4], 2).unwrap_err();
        assert!(playback.recover(&err).is_err());
        assert_eq!(playback.state(), DeviceState::Disconnected);
    }

    #[test]
    fn test_playback_collects_whole_frames() {
        let mut playback = MemoryPlayback::new("mem");
        let sink = playback.sink();
        start(&mut playback, params(2, 2));
        assert_eq!(playback.write(&[1, 2, 3, 4, 5], 3).unwrap(), 2);
        assert_eq!(*sink.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_channel_override() {
        let mut capture = MemoryCapture::new("mem", Vec::new()).with_channels(1);
        let negotiated = capture.configure(&params(2, 8)).unwrap();
        assert_eq!(negotiated.channels, 1);
    }
}
