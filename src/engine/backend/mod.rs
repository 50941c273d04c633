//! Concrete audio device backends
//!
//! Devices are opened from a textual identifier:
//!
//! | Identifier | Backend |
//! |---|---|
//! | `null` | silence in, discard out |
//! | `wav:<path>` or `<path>.wav` | WAV file, append `?fast` to skip real-time pacing |
//! | anything else | sound card by name (`default` picks the system default) |
//!
//! Sound cards need the `hardware` feature.

#[cfg(feature = "hardware")]
mod hardware;
mod memory;
mod null;
mod wav;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use super::device::{AudioDevice, DeviceError, DeviceResult, DeviceState, Direction, StreamParams};

#[cfg(feature = "hardware")]
pub use hardware::{CpalCapture, CpalPlayback};
pub use memory::{MemoryCapture, MemoryPlayback, SharedSink};
pub use null::NullDevice;
pub use wav::{WavCapture, WavPlayback};

/// Parsed device identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSpec {
    Null,
    Wav { path: PathBuf, fast: bool },
    Hardware { name: String },
}

impl DeviceSpec {
    pub fn parse(identifier: &str) -> Self {
        let identifier = identifier.trim();
        if identifier.eq_ignore_ascii_case("null") {
            return DeviceSpec::Null;
        }

        let (body, fast) = match identifier.strip_suffix("?fast") {
            Some(body) => (body, true),
            None => (identifier, false),
        };
        if let Some(path) = body.strip_prefix("wav:") {
            return DeviceSpec::Wav {
                path: PathBuf::from(path),
                fast,
            };
        }
        if body.to_ascii_lowercase().ends_with(".wav") {
            return DeviceSpec::Wav {
                path: PathBuf::from(body),
                fast,
            };
        }

        DeviceSpec::Hardware {
            name: identifier.to_string(),
        }
    }
}

/// Open a device from its identifier
pub fn open_device(identifier: &str, direction: Direction) -> DeviceResult<Box<dyn AudioDevice>> {
    let spec = DeviceSpec::parse(identifier);
    log::debug!("opening {} device {:?}", direction, spec);
    match (spec, direction) {
        (DeviceSpec::Null, _) => Ok(Box::new(NullDevice::new(identifier, direction))),
        (DeviceSpec::Wav { path, fast }, Direction::Capture) => {
            Ok(Box::new(WavCapture::open(identifier, path, !fast)?))
        }
        (DeviceSpec::Wav { path, fast }, Direction::Playback) => {
            Ok(Box::new(WavPlayback::create(identifier, path, !fast)))
        }
        (DeviceSpec::Hardware { name }, direction) => open_hardware(&name, direction),
    }
}

#[cfg(feature = "hardware")]
fn open_hardware(name: &str, direction: Direction) -> DeviceResult<Box<dyn AudioDevice>> {
    match direction {
        Direction::Capture => Ok(Box::new(CpalCapture::open(name)?)),
        Direction::Playback => Ok(Box::new(CpalPlayback::open(name)?)),
    }
}

#[cfg(not(feature = "hardware"))]
fn open_hardware(name: &str, _direction: Direction) -> DeviceResult<Box<dyn AudioDevice>> {
    Err(DeviceError::Unsupported {
        reason: format!(
            "sound card '{}' requested but echoline was built without the `hardware` feature; use `null` or a .wav path",
            name
        ),
    })
}

/// Sleeps so that frames move at the stream's real-time rate
#[derive(Debug)]
pub(crate) struct Pacer {
    sample_rate: u32,
    started: Option<Instant>,
    frames: u64,
}

impl Pacer {
    pub(crate) fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            started: None,
            frames: 0,
        }
    }

    /// Account for `frames` more frames and sleep until they are due
    pub(crate) fn advance(&mut self, frames: usize) {
        let started = *self.started.get_or_insert_with(Instant::now);
        self.frames += frames as u64;
        let due = started + Duration::from_secs_f64(self.frames as f64 / self.sample_rate as f64);
        let now = Instant::now();
        if due > now {
            std::thread::sleep(due - now);
        }
    }

    /// Restart the clock (after stop or recovery)
    pub(crate) fn restart(&mut self) {
        self.started = None;
        self.frames = 0;
    }
}

/// Lifecycle bookkeeping shared by the software backends
#[derive(Debug)]
pub(crate) struct DeviceCore {
    pub(crate) name: String,
    pub(crate) direction: Direction,
    pub(crate) params: Option<StreamParams>,
    pub(crate) state: DeviceState,
    pacer: Option<Pacer>,
    paced: bool,
}

impl DeviceCore {
    pub(crate) fn new(name: &str, direction: Direction, paced: bool) -> Self {
        Self {
            name: name.to_string(),
            direction,
            params: None,
            state: DeviceState::Open,
            pacer: None,
            paced,
        }
    }

    pub(crate) fn configure(&mut self, params: StreamParams) -> DeviceResult<StreamParams> {
        if params.sample_rate == 0 || params.channels == 0 || params.period_frames == 0 {
            return Err(DeviceError::Config {
                reason: format!(
                    "{} Hz, {} channel(s), {} frame period",
                    params.sample_rate, params.channels, params.period_frames
                ),
            });
        }
        self.ensure_not_closed()?;
        self.params = Some(params);
        self.pacer = self.paced.then(|| Pacer::new(params.sample_rate));
        Ok(params)
    }

    pub(crate) fn prepare(&mut self) -> DeviceResult<()> {
        self.ensure_not_closed()?;
        if self.params.is_none() {
            return Err(DeviceError::InvalidState { state: self.state });
        }
        self.state = DeviceState::Prepared;
        Ok(())
    }

    pub(crate) fn start(&mut self) -> DeviceResult<()> {
        match self.state {
            DeviceState::Running => Ok(()),
            DeviceState::Prepared => {
                self.state = DeviceState::Running;
                if let Some(pacer) = &mut self.pacer {
                    pacer.restart();
                }
                Ok(())
            }
            state => Err(DeviceError::InvalidState { state }),
        }
    }

    /// Negotiated parameters, provided the device is streaming
    pub(crate) fn running_params(&self) -> DeviceResult<StreamParams> {
        match (self.state, self.params) {
            (DeviceState::Running, Some(params)) => Ok(params),
            (state, _) => Err(DeviceError::InvalidState { state }),
        }
    }

    pub(crate) fn pace(&mut self, frames: usize) {
        if let Some(pacer) = &mut self.pacer {
            pacer.advance(frames);
        }
    }

    /// Generic recovery: back to prepared, then running again
    pub(crate) fn recover(&mut self, error: &DeviceError) -> DeviceResult<()> {
        if !error.is_transient() {
            return Err(DeviceError::Backend {
                reason: format!("cannot recover from: {}", error),
            });
        }
        self.state = DeviceState::Prepared;
        self.start()
    }

    pub(crate) fn stop(&mut self) -> DeviceResult<()> {
        match self.state {
            DeviceState::Closed => Err(DeviceError::InvalidState {
                state: DeviceState::Closed,
            }),
            DeviceState::Open => Ok(()),
            _ => {
                self.state = DeviceState::Prepared;
                Ok(())
            }
        }
    }

    pub(crate) fn close(&mut self) {
        self.state = DeviceState::Closed;
    }

    fn ensure_not_closed(&self) -> DeviceResult<()> {
        if self.state == DeviceState::Closed {
            return Err(DeviceError::InvalidState {
                state: DeviceState::Closed,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identifiers() {
        assert_eq!(DeviceSpec::parse("null"), DeviceSpec::Null);
        assert_eq!(DeviceSpec::parse("NULL"), DeviceSpec::Null);
        assert_eq!(
            DeviceSpec::parse("wav:/tmp/in.raw"),
            DeviceSpec::Wav {
                path: PathBuf::from("/tmp/in.raw"),
                fast: false
            }
        );
        assert_eq!(
            DeviceSpec::parse("take1.WAV?fast"),
            DeviceSpec::Wav {
                path: PathBuf::from("take1.WAV"),
                fast: true
            }
        );
        assert_eq!(
            DeviceSpec::parse("default"),
            DeviceSpec::Hardware {
                name: "default".to_string()
            }
        );
    }

    #[cfg(not(feature = "hardware"))]
    #[test]
    fn test_hardware_needs_feature() {
        let err = open_device("default", Direction::Playback).unwrap_err();
        assert!(matches!(err, DeviceError::Unsupported { .. }));
    }

    #[test]
    fn test_open_null() {
        let device = open_device("null", Direction::Capture).unwrap();
        assert_eq!(device.name(), "null");
        assert_eq!(device.direction(), Direction::Capture);
        assert_eq!(device.state(), DeviceState::Open);
    }

    #[test]
    fn test_core_lifecycle() {
        let mut core = DeviceCore::new("t", Direction::Capture, false);
        assert!(core.prepare().is_err());
        core.configure(StreamParams::default()).unwrap();
        assert!(core.start().is_err());
        core.prepare().unwrap();
        core.start().unwrap();
        core.start().unwrap();
        assert_eq!(core.state, DeviceState::Running);

        core.recover(&DeviceError::Xrun).unwrap();
        assert_eq!(core.state, DeviceState::Running);
        assert!(core.recover(&DeviceError::Disconnected).is_err());

        core.stop().unwrap();
        assert_eq!(core.state, DeviceState::Prepared);
        core.close();
        assert!(core.stop().is_err());
    }

    #[test]
    fn test_pacer_holds_real_time() {
        let mut pacer = Pacer::new(1000);
        let start = Instant::now();
        for _ in 0..4 {
            pacer.advance(5);
        }
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
