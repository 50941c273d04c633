//! Effect Chain Tests
//!
//! Whole-chain behavior through the public API: ordering, bypass, live
//! parameter changes from handles, and reset requests.

use echoline::dsp::{
    Chorus, Delay, DelayControls, Effect, EffectChain, EffectControls, Flanger, Reverb, RoomType,
};
use pretty_assertions::assert_eq;
use serde_json::json;

/// Chain at 1 kHz so that 1 ms is one sample
fn slow_chain() -> EffectChain {
    EffectChain::with_sample_rate(1000)
}

fn impulse(len: usize, value: i32) -> Vec<i32> {
    let mut block = vec![0; len];
    block[0] = value;
    block
}

#[test]
fn test_empty_chain_is_identity() {
    let mut chain = EffectChain::new();
    let input: Vec<i32> = (0..64).map(|i| i * 1_000_003 - 30_000_000).collect();

    let mut output = vec![0; 64];
    chain.process(&input, &mut output, 2);
    assert_eq!(output, input);

    let mut block = input.clone();
    chain.process_in_place(&mut block, 2);
    assert_eq!(block, input);
}

#[test]
fn test_disabled_effects_are_bypassed() {
    let mut chain = slow_chain();
    chain.add(Flanger::new()).set_enabled(false);
    chain.add(Chorus::new(4)).set_enabled(false);
    chain.add(Delay::new(5.0)).set_enabled(false);
    chain.add(Reverb::new(RoomType::Cathedral)).set_enabled(false);

    let input: Vec<i32> = (0..200).map(|i| (i % 17) * 10_000_000 - 80_000_000).collect();
    let mut block = input.clone();
    chain.process_in_place(&mut block, 2);
    assert_eq!(block, input);
}

#[test]
fn test_delay_handle_tunes_running_chain() {
    let mut chain = slow_chain();
    let delay = chain.add(Delay::with_controls(DelayControls::new(10.0, 0.3, 0.3, 0.7)));

    let mut block = impulse(40, 1000);
    chain.process_in_place(&mut block, 1);
    assert_eq!(block[0], 700);
    assert_eq!(block[10], 300);
    assert_eq!(block[20], 90);
    assert_eq!(block[30], 27);

    // New time applies from the next block, with a fresh line
    assert_eq!(delay.set_time_ms(20.0), 20.0);
    let mut block = impulse(40, 1000);
    chain.process_in_place(&mut block, 1);
    assert_eq!(block[10], 0);
    assert_eq!(block[20], 300);
}

#[test]
fn test_reset_request_clears_tails() {
    let run = |reset: bool| {
        let mut chain = slow_chain();
        let delay = chain.add(Delay::with_controls(DelayControls::new(10.0, 0.0, 0.5, 1.0)));

        let mut first = impulse(8, 1000);
        chain.process_in_place(&mut first, 1);
        if reset {
            delay.request_reset();
        }
        let mut second = vec![0; 8];
        chain.process_in_place(&mut second, 1);
        second
    };

    assert_eq!(run(false)[2], 500);
    assert_eq!(run(true), vec![0; 8]);
}

#[test]
fn test_order_follows_insertion_and_moves() {
    let mut chain = slow_chain();
    let flanger = chain.add(Flanger::new());
    let delay = chain.add(Delay::new(100.0));
    let reverb = chain.add(Reverb::new(RoomType::Plate));

    let types = |chain: &EffectChain| chain.iter().map(|e| e.effect_type()).collect::<Vec<_>>();
    assert_eq!(types(&chain), vec!["flanger", "delay", "reverb"]);

    chain.move_effect(reverb.id(), 0).unwrap();
    assert_eq!(types(&chain), vec!["reverb", "flanger", "delay"]);

    let removed = chain.remove(flanger.id()).unwrap();
    assert_eq!(removed.effect_type(), "flanger");
    assert_eq!(chain.ids(), vec![reverb.id().to_string(), delay.id().to_string()]);

    let err = chain.remove(flanger.id()).unwrap_err();
    assert_eq!(err.error_code(), "EFFECT_NOT_FOUND");
}

#[test]
fn test_parameters_by_name() {
    let mut chain = EffectChain::with_sample_rate(48000);
    let delay = chain.add(Delay::new(250.0));
    chain.add(Reverb::new(RoomType::SmallRoom));

    let controls = chain.find_by_type("reverb").unwrap();
    controls.set_param("room_type", &json!("large_hall")).unwrap();
    let params = controls.get_params();
    assert_eq!(params["room_type"], json!("large_hall"));

    let controls = chain.get_controls(delay.id()).unwrap();
    controls.set_param("feedback", &json!(2.0)).unwrap();
    assert_eq!(delay.feedback(), 0.95);

    let err = controls.set_param("feedback", &json!("lots")).unwrap_err();
    assert_eq!(err.error_code(), "INVALID_PARAMETER");

    let snapshot = chain.to_json();
    assert_eq!(snapshot["sample_rate"], json!(48000));
    assert_eq!(snapshot["effects"][0]["type"], json!("delay"));
    assert_eq!(snapshot["effects"][0]["params"]["time_ms"], json!(250.0));
    assert_eq!(snapshot["effects"][1]["type"], json!("reverb"));
}

#[test]
fn test_full_chain_survives_full_scale_input() {
    let mut chain = EffectChain::with_sample_rate(48000);
    let flanger = chain.add(Flanger::new());
    flanger.set_feedback(0.95);
    chain.add(Chorus::new(8));
    let delay = chain.add(Delay::new(3.0));
    delay.set_feedback(0.95);
    delay.set_mix(1.0, 1.0);
    chain.add(Reverb::new(RoomType::Cathedral));

    let mut heard = false;
    for round in 0..50 {
        let value = if round % 2 == 0 { i32::MAX } else { i32::MIN };
        let mut block = vec![value; 2 * 480];
        chain.process_in_place(&mut block, 2);
        heard |= block.iter().any(|&s| s != 0);
    }
    assert!(heard);

    // Tails keep ringing into silence
    let mut block = vec![0; 2 * 480];
    chain.process_in_place(&mut block, 2);
    assert!(block.iter().any(|&s| s != 0));
}

#[test]
fn test_sample_rate_reaches_every_effect() {
    let mut chain = slow_chain();
    chain.add(Delay::new(10.0));
    chain.add(Reverb::default());
    chain.set_sample_rate(96000);
    assert!(chain.iter().all(|e| e.sample_rate() == 96000));
    assert_eq!(chain.sample_rate(), 96000);
}
