//! Pipeline Tests
//!
//! Full three-thread runs against scripted memory devices and WAV files.
//! Devices are paced at 8 kHz with 10 ms periods so a run takes a fraction
//! of a second.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use echoline::config::{DelayConfig, EffectsConfig, PipelineConfig};
use echoline::engine::{
    AudioDevice, DeviceError, MemoryCapture, MemoryPlayback, SharedSink, StageState,
};
use echoline::{Pipeline, PipelineHealth};
use pretty_assertions::assert_eq;
use test_case::test_case;

const PERIOD: usize = 80;

fn dry_config() -> PipelineConfig {
    PipelineConfig {
        sample_rate: 8000,
        channels: 1,
        period_frames: PERIOD,
        buffer_frames: 2 * PERIOD,
        queue_blocks: 8,
        capture_prefill_blocks: 2,
        playback_prefill_periods: 1,
        effects: EffectsConfig {
            flanger: None,
            chorus: None,
            delay: None,
            reverb: None,
        },
        ..PipelineConfig::default()
    }
}

/// `blocks` periods, each filled with its own value (1000, 2000, ...)
fn numbered_blocks(blocks: usize) -> Vec<i32> {
    (0..blocks)
        .flat_map(|b| std::iter::repeat((b as i32 + 1) * 1000).take(PERIOD))
        .collect()
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

/// Non-silent runs in the collected output as (value, length) pairs
fn runs(sink: &SharedSink) -> Vec<(i32, usize)> {
    let samples = sink.lock().unwrap();
    let mut runs: Vec<(i32, usize)> = Vec::new();
    for &s in samples.iter().filter(|&&s| s != 0) {
        match runs.last_mut() {
            Some((value, len)) if *value == s => *len += 1,
            _ => runs.push((s, 1)),
        }
    }
    runs
}

fn start(config: PipelineConfig, capture: MemoryCapture, playback: MemoryPlayback) -> Pipeline {
    let mut pipeline = Pipeline::initialize(config, Box::new(capture), Box::new(playback)).unwrap();
    pipeline.start().unwrap();
    pipeline
}

#[test]
fn test_blocks_arrive_whole_and_in_order() {
    let capture = MemoryCapture::new("in", numbered_blocks(30))
        .paced()
        .silence_after_end();
    let playback = MemoryPlayback::new("out").paced();
    let sink = playback.sink();
    let mut pipeline = start(dry_config(), capture, playback);

    assert!(wait_until(Duration::from_secs(5), || pipeline.stats().captured >= 30));
    thread::sleep(Duration::from_millis(200));
    assert_eq!(pipeline.health(), PipelineHealth::Running);
    pipeline.stop();

    let runs = runs(&sink);
    assert!(runs.len() >= 10, "only {} blocks reached playback", runs.len());
    for pair in runs.windows(2) {
        assert!(pair[0].0 < pair[1].0, "blocks out of order: {:?}", runs);
    }
    assert!(runs.iter().all(|&(_, len)| len == PERIOD), "partial block: {:?}", runs);
    assert_eq!(pipeline.health(), PipelineHealth::Stopped);
}

#[test]
fn test_end_of_stream_finishes_pipeline() {
    let capture = MemoryCapture::new("in", numbered_blocks(10)).paced();
    let playback = MemoryPlayback::new("out").paced();
    let mut pipeline = start(dry_config(), capture, playback);

    assert_eq!(pipeline.wait(Duration::from_secs(5)), PipelineHealth::Finished);
    assert!(!pipeline.is_running());
    assert_eq!(pipeline.stats().captured, 10);

    pipeline.stop();
    assert_eq!(pipeline.health(), PipelineHealth::Finished);
    let status = pipeline.status();
    assert_eq!(status.capture.stage, StageState::Stopped);
    assert_eq!(status.process, StageState::Stopped);
    assert_eq!(status.playback.stage, StageState::Stopped);
}

#[test]
fn test_end_of_stream_drains_queued_blocks() {
    // Unpaced: all six blocks are queued before playback has played one
    let capture = MemoryCapture::new("in", numbered_blocks(6));
    let playback = MemoryPlayback::new("out").paced();
    let sink = playback.sink();
    let mut pipeline = start(dry_config(), capture, playback);

    assert_eq!(pipeline.wait(Duration::from_secs(5)), PipelineHealth::Finished);
    pipeline.stop();

    let expected: Vec<(i32, usize)> = (1..=6).map(|b| (b * 1000, PERIOD)).collect();
    assert_eq!(runs(&sink), expected);
    let stats = pipeline.stats();
    assert_eq!(stats.capture_dropped, 0);
    assert_eq!(stats.process_dropped, 0);
}

#[test]
fn test_offline_source_is_never_dropped() {
    // Five times what the queues hold, produced as fast as possible
    let capture = MemoryCapture::new("file", numbered_blocks(40)).offline();
    let playback = MemoryPlayback::new("out").paced();
    let sink = playback.sink();
    let mut pipeline = start(dry_config(), capture, playback);

    assert_eq!(pipeline.wait(Duration::from_secs(10)), PipelineHealth::Finished);
    pipeline.stop();

    let expected: Vec<(i32, usize)> = (1..=40).map(|b| (b * 1000, PERIOD)).collect();
    assert_eq!(runs(&sink), expected);
    let stats = pipeline.stats();
    assert_eq!(stats.captured, 40);
    assert_eq!(stats.capture_dropped, 0);
    assert_eq!(stats.process_dropped, 0);
}

#[test]
fn test_overflow_drops_blocks_and_keeps_running() {
    let capture = MemoryCapture::new("in", vec![7000; PERIOD]).silence_after_end();
    let playback = MemoryPlayback::new("out").paced();
    let mut pipeline = start(dry_config(), capture, playback);

    // Stall processing: capture overruns queue A
    let chain = pipeline.effect_chain();
    assert!(wait_until(Duration::from_secs(5), || pipeline.stats().capture_dropped >= 10));
    drop(chain);

    // Processing now outpaces playback: queue B overruns
    assert!(wait_until(Duration::from_secs(5), || pipeline.stats().process_dropped >= 10));
    let stats = pipeline.stats();
    assert!(stats.captured > stats.processed);
    assert!(stats.played > 0);
    assert_eq!(pipeline.health(), PipelineHealth::Running);
    assert!(pipeline.is_running());

    pipeline.stop();
    assert_eq!(pipeline.health(), PipelineHealth::Stopped);
}

#[test]
fn test_underrun_plays_silence_and_keeps_running() {
    let capture = MemoryCapture::new("in", vec![5000; 200 * PERIOD]).paced();
    // Consumes a period every 5 ms while capture delivers one every 10 ms
    let playback = MemoryPlayback::new("out").paced().with_sample_rate(16000);
    let sink = playback.sink();
    let mut pipeline = start(dry_config(), capture, playback);

    assert!(wait_until(Duration::from_secs(5), || {
        let stats = pipeline.stats();
        stats.playback_underruns >= 5 && stats.played >= 30
    }));
    assert_eq!(pipeline.health(), PipelineHealth::Running);
    pipeline.stop();

    let samples = sink.lock().unwrap().clone();
    let blocks: Vec<bool> = samples.chunks(PERIOD).map(|b| b.iter().all(|&s| s == 0)).collect();
    let first = blocks.iter().position(|&silent| !silent).unwrap();
    let last = blocks.iter().rposition(|&silent| !silent).unwrap();
    let gaps = blocks[first..=last].iter().filter(|&&silent| silent).count();
    assert!(gaps > 0, "no silence between captured blocks");
    assert!(samples.iter().all(|&s| s == 0 || s == 5000));
}

#[test]
fn test_transient_errors_are_recovered_and_counted() {
    let capture = MemoryCapture::new("in", Vec::new())
        .paced()
        .silence_after_end()
        .fail_at(3, DeviceError::Xrun);
    let playback = MemoryPlayback::new("out")
        .paced()
        .fail_at(5, DeviceError::Suspended);
    let mut pipeline = start(dry_config(), capture, playback);

    assert!(wait_until(Duration::from_secs(5), || {
        let stats = pipeline.stats();
        stats.captured >= 10 && stats.played >= 10
    }));
    let stats = pipeline.stats();
    assert_eq!(stats.capture_recoveries, 1);
    assert_eq!(stats.playback_recoveries, 1);
    assert_eq!(pipeline.health(), PipelineHealth::Running);

    pipeline.stop();
    assert_eq!(pipeline.health(), PipelineHealth::Stopped);
}

#[test]
fn test_unrecoverable_capture_degrades() {
    let capture = MemoryCapture::new("usb-mic", Vec::new())
        .paced()
        .silence_after_end()
        .fail_at(2, DeviceError::Disconnected);
    let playback = MemoryPlayback::new("out").paced();
    let mut pipeline = start(dry_config(), capture, playback);

    match pipeline.wait(Duration::from_secs(5)) {
        PipelineHealth::Degraded { reason } => assert!(reason.contains("usb-mic"), "{}", reason),
        other => panic!("expected degraded, got {:?}", other),
    }
    pipeline.stop();
    assert!(pipeline.health().is_degraded());
}

#[test]
fn test_failed_playback_recovery_degrades() {
    let capture = MemoryCapture::new("in", Vec::new()).paced().silence_after_end();
    let playback = MemoryPlayback::new("speakers")
        .paced()
        .fail_at(4, DeviceError::Xrun)
        .fail_recovery();
    let mut pipeline = start(dry_config(), capture, playback);

    let health = pipeline.wait(Duration::from_secs(5));
    assert!(health.is_degraded(), "{:?}", health);
    assert_eq!(pipeline.stats().playback_recoveries, 0);
    pipeline.stop();
}

#[test]
fn test_stop_is_idempotent_and_final() {
    let capture = MemoryCapture::new("in", Vec::new()).paced().silence_after_end();
    let playback = MemoryPlayback::new("out").paced();
    let mut pipeline = start(dry_config(), capture, playback);
    assert!(pipeline.is_running());

    let err = pipeline.start().unwrap_err();
    assert_eq!(err.error_code(), "ALREADY_RUNNING");

    pipeline.stop();
    pipeline.stop();
    assert_eq!(pipeline.health(), PipelineHealth::Stopped);
    assert!(!pipeline.is_running());

    let err = pipeline.start().unwrap_err();
    assert_eq!(err.error_code(), "NOT_RESTARTABLE");
}

#[test]
fn test_channel_mismatch_is_rejected() {
    let config = PipelineConfig {
        channels: 2,
        ..dry_config()
    };
    let result = Pipeline::initialize(
        config,
        Box::new(MemoryCapture::new("in", Vec::new()).with_channels(2)),
        Box::new(MemoryPlayback::new("out").with_channels(1)),
    );
    let err = result.unwrap_err();
    assert_eq!(err.error_code(), "CHANNEL_MISMATCH");
}

#[test]
fn test_capture_negotiation_drives_playback() {
    let pipeline = Pipeline::initialize(
        PipelineConfig {
            channels: 2,
            ..dry_config()
        },
        Box::new(MemoryCapture::new("in", Vec::new()).with_channels(1)),
        Box::new(MemoryPlayback::new("out")),
    )
    .unwrap();
    assert_eq!(pipeline.params().channels, 1);
    assert_eq!(pipeline.status().queue_a.capacity, 8 * PERIOD);
}

#[test]
fn test_effects_tuned_while_running() {
    let config = PipelineConfig {
        effects: EffectsConfig {
            delay: Some(DelayConfig::default()),
            ..dry_config().effects
        },
        ..dry_config()
    };
    let capture = MemoryCapture::new("in", Vec::new()).paced().silence_after_end();
    let playback = MemoryPlayback::new("out").paced();
    let mut pipeline = start(config, capture, playback);

    pipeline
        .set_effect_param("delay", "time_ms", &serde_json::json!(40.0))
        .unwrap();
    assert_eq!(pipeline.toggle_delay(), Some(false));
    pipeline.reset_effects();
    assert!(wait_until(Duration::from_secs(5), || pipeline.stats().processed >= 5));

    let status = pipeline.status();
    assert_eq!(status.effects["effects"][0]["params"]["time_ms"], serde_json::json!(40.0));
    assert_eq!(status.effects["effects"][0]["params"]["enabled"], serde_json::json!(false));
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["health"]["state"], "running");
    assert!(json["started_at"].is_string());
    pipeline.stop();
}

fn write_ramp(path: &Path, frames: usize) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        writer.write_sample((i + 1) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

#[test_case(false ; "paced")]
#[test_case(true ; "fast")]
fn test_wav_round_trip_through_dry_chain(fast: bool) {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.wav");
    let output = dir.path().join("out.wav");
    let frames = 40 * PERIOD;
    write_ramp(&input, frames);

    let suffix = if fast { "?fast" } else { "" };
    let mut pipeline = Pipeline::open(
        dry_config(),
        &format!("wav:{}{}", input.display(), suffix),
        &format!("{}{}", output.display(), suffix),
    )
    .unwrap();
    pipeline.start().unwrap();
    assert_eq!(pipeline.wait(Duration::from_secs(10)), PipelineHealth::Finished);
    pipeline.stop();

    let mut reader = hound::WavReader::open(&output).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 8000);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 32);

    let audio: Vec<i32> = reader
        .samples::<i32>()
        .map(|s| s.unwrap())
        .filter(|&s| s != 0)
        .collect();
    // 16-bit input lands in the top half of each 32-bit sample
    let expected: Vec<i32> = (1..=frames as i32).map(|v| v << 16).collect();
    assert_eq!(audio.len(), expected.len());
    assert_eq!(audio, expected);
    assert_eq!(audio.last().map(|&s| s >> 16), Some(frames as i32));

    let stats = pipeline.stats();
    assert_eq!(stats.capture_dropped, 0);
    assert_eq!(stats.process_dropped, 0);
}

#[test]
fn test_open_reports_missing_devices() {
    let err = Pipeline::open(dry_config(), "/nonexistent/take.wav", "null").unwrap_err();
    assert_eq!(err.error_code(), "DEVICE_OPEN");
    assert!(err.to_string().contains("capture"));
}

#[test]
fn test_null_devices_run_until_stopped() {
    let mut pipeline = Pipeline::open(dry_config(), "null", "null").unwrap();
    pipeline.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || pipeline.stats().played >= 3));
    assert!(pipeline.is_running());
    pipeline.stop();
    assert_eq!(pipeline.health(), PipelineHealth::Stopped);
}

#[test]
fn test_memory_devices_are_boxable() {
    let device: Box<dyn AudioDevice> = Box::new(MemoryPlayback::new("out"));
    assert_eq!(device.name(), "out");
}
