//! WAV file devices
//!
//! Capture streams a WAV file into the pipeline and reports `EndOfStream`
//! at its end; playback records the processed output as 32-bit integer PCM.
//! Both keep real time unless opened unpaced.

use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{SampleFormat as WavSampleFormat, WavReader, WavSpec, WavWriter};

use super::DeviceCore;
use crate::dsp::sample::to_fixed;
use crate::engine::device::{AudioDevice, DeviceError, DeviceResult, DeviceState, Direction, SampleFormat, StreamParams};

fn open_error(path: &Path, error: hound::Error) -> DeviceError {
    match error {
        hound::Error::IoError(e) if e.kind() == std::io::ErrorKind::NotFound => DeviceError::NotFound {
            name: path.display().to_string(),
        },
        other => DeviceError::Wav(other),
    }
}

/// Capture device reading a WAV file
pub struct WavCapture {
    core: DeviceCore,
    path: PathBuf,
    reader: WavReader<BufReader<File>>,
    spec: WavSpec,
}

impl WavCapture {
    /// Open `path` for reading; `paced` keeps real time
    pub fn open(name: &str, path: impl AsRef<Path>, paced: bool) -> DeviceResult<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = WavReader::open(&path).map_err(|e| open_error(&path, e))?;
        let spec = reader.spec();
        log::info!(
            "WAV input {}: {} Hz, {} channel(s), {} bit {:?}, {} frames",
            path.display(),
            spec.sample_rate,
            spec.channels,
            spec.bits_per_sample,
            spec.sample_format,
            reader.duration()
        );
        Ok(Self {
            core: DeviceCore::new(name, Direction::Capture, paced),
            path,
            reader,
            spec,
        })
    }

    /// Path of the file being read
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read up to `out.len()` samples, scaled to full-range `i32`
    fn read_samples(&mut self, out: &mut [i32]) -> DeviceResult<usize> {
        let mut count = 0;
        match self.spec.sample_format {
            WavSampleFormat::Float => {
                for (slot, sample) in out.iter_mut().zip(self.reader.samples::<f32>()) {
                    *slot = to_fixed(sample?);
                    count += 1;
                }
            }
            WavSampleFormat::Int => {
                let shift = 32u32.saturating_sub(self.spec.bits_per_sample as u32);
                for (slot, sample) in out.iter_mut().zip(self.reader.samples::<i32>()) {
                    *slot = sample?.wrapping_shl(shift);
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

impl AudioDevice for WavCapture {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn direction(&self) -> Direction {
        Direction::Capture
    }

    fn is_live(&self) -> bool {
        false
    }

    /// The file decides rate and channel count
    fn configure(&mut self, requested: &StreamParams) -> DeviceResult<StreamParams> {
        let negotiated = StreamParams {
            sample_rate: self.spec.sample_rate,
            channels: self.spec.channels,
            format: match (self.spec.sample_format, self.spec.bits_per_sample) {
                (WavSampleFormat::Float, _) => SampleFormat::F32,
                (WavSampleFormat::Int, 16) => SampleFormat::S16,
                _ => SampleFormat::S32,
            },
            ..*requested
        };
        if negotiated.sample_rate != requested.sample_rate {
            log::warn!(
                "{}: file is {} Hz, requested {} Hz; running at the file rate",
                self.path.display(),
                negotiated.sample_rate,
                requested.sample_rate
            );
        }
        self.core.configure(negotiated)
    }

    fn prepare(&mut self) -> DeviceResult<()> {
        self.core.prepare()
    }

    fn start(&mut self) -> DeviceResult<()> {
        self.core.start()
    }

    fn read(&mut self, buf: &mut [i32], frames: usize) -> DeviceResult<usize> {
        let params = self.core.running_params()?;
        let channels = params.channels as usize;
        let wanted = (frames * channels).min(buf.len());
        let got = self.read_samples(&mut buf[..wanted])?;
        if got == 0 {
            return Err(DeviceError::EndOfStream);
        }
        let frames = got / channels;
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

/// Playback device recording to a WAV file
pub struct WavPlayback {
    core: DeviceCore,
    path: PathBuf,
    writer: Option<WavWriter<BufWriter<File>>>,
    frames_written: u64,
}

impl WavPlayback {
    /// Record to `path`; the file is created when the device is prepared
    pub fn create(name: &str, path: impl AsRef<Path>, paced: bool) -> Self {
        Self {
            core: DeviceCore::new(name, Direction::Playback, paced),
            path: path.as_ref().to_path_buf(),
            writer: None,
            frames_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl AudioDevice for WavPlayback {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn direction(&self) -> Direction {
        Direction::Playback
    }

    fn configure(&mut self, requested: &StreamParams) -> DeviceResult<StreamParams> {
        self.core.configure(StreamParams {
            format: SampleFormat::S32,
            ..*requested
        })
    }

    fn prepare(&mut self) -> DeviceResult<()> {
        self.core.prepare()?;
        if self.writer.is_none() {
            let params = self.core.params.ok_or(DeviceError::InvalidState {
                state: self.core.state,
            })?;
            let spec = WavSpec {
                channels: params.channels,
                sample_rate: params.sample_rate,
                bits_per_sample: 32,
                sample_format: WavSampleFormat::Int,
            };
            self.writer = Some(WavWriter::create(&self.path, spec)?);
            log::info!("WAV output {}: {} Hz, {} channel(s)", self.path.display(), params.sample_rate, params.channels);
        }
        Ok(())
    }

    fn start(&mut self) -> DeviceResult<()> {
        self.core.start()
    }

    fn write(&mut self, buf: &[i32], frames: usize) -> DeviceResult<usize> {
        let params = self.core.running_params()?;
        let channels = params.channels as usize;
        let samples = (frames * channels).min(buf.len()) / channels * channels;
        let writer = self.writer.as_mut().ok_or(DeviceError::InvalidState {
            state: self.core.state,
        })?;
        for &sample in &buf[..samples] {
            writer.write_sample(sample)?;
        }
        let frames = samples / channels;
        self.frames_written += frames as u64;
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
        self.core.stop()?;
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Finalizes the file header
    fn close(&mut self) -> DeviceResult<()> {
        self.core.close();
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            log::info!("WAV output {}: {} frames written", self.path.display(), self.frames_written);
        }
        Ok(())
    }
}
