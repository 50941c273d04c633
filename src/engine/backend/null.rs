//! Null device: produces silence, swallows output

use super::DeviceCore;
use crate::engine::device::{AudioDevice, DeviceError, DeviceResult, DeviceState, Direction, StreamParams};

/// Silent capture / discarding playback, paced at the period rate
#[derive(Debug)]
pub struct NullDevice {
    core: DeviceCore,
}

impl NullDevice {
    pub fn new(name: &str, direction: Direction) -> Self {
        Self {
            core: DeviceCore::new(name, direction, true),
        }
    }

    /// Null device that returns immediately instead of keeping real time
    pub fn unpaced(name: &str, direction: Direction) -> Self {
        Self {
            core: DeviceCore::new(name, direction, false),
        }
    }

    fn check_direction(&self, wanted: Direction) -> DeviceResult<()> {
        if self.core.direction != wanted {
            return Err(DeviceError::Unsupported {
                reason: format!("{} is a {} device", self.core.name, self.core.direction),
            });
        }
        Ok(())
    }
}

impl AudioDevice for NullDevice {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn direction(&self) -> Direction {
        self.core.direction
    }

    fn configure(&mut self, requested: &StreamParams) -> DeviceResult<StreamParams> {
        self.core.configure(*requested)
    }

    fn prepare(&mut self) -> DeviceResult<()> {
        self.core.prepare()
    }

    fn start(&mut self) -> DeviceResult<()> {
        self.core.start()
    }

    fn read(&mut self, buf: &mut [i32], frames: usize) -> DeviceResult<usize> {
        self.check_direction(Direction::Capture)?;
        let params = self.core.running_params()?;
        let samples = (frames * params.channels as usize).min(buf.len());
        buf[..samples].fill(0);
        let frames = samples / params.channels as usize;
        self.core.pace(frames);
        Ok(frames)
    }

    fn write(&mut self, buf: &[i32], frames: usize) -> DeviceResult<usize> {
        self.check_direction(Direction::Playback)?;
        let params = self.core.running_params()?;
        let frames = frames.min(buf.len() / params.channels as usize);
        self.core.pace(frames);
        Ok(frames)
    }

    fn recover(&mut self, error: &DeviceError) -> DeviceResult<()> {
        self.core.recover(error)
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
