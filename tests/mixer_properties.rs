use proptest::prelude::*;

use ftcycle::{
    audio::{
        buffer::OperatorSlotAudio,
        mixer::{AudioAccepted, AudioMixer, MixOutcome, MixerState, ScheduleOutcome},
        resample::{ResampleQuality, output_len, resample, resample_fft, resample_linear},
    },
    config::MixerConfig,
    error::{MixError, ResampleError},
};

const SLOT: u64 = 1_700_000_010_000;

fn tone(len: usize, value: f32) -> Vec<f32> {
    vec![value; len]
}

fn ramp(len: usize) -> Vec<f32> {
    (0..len).map(|i| i as f32 / len as f32).collect()
}

fn audio(id: u32, samples: Vec<f32>, rate: u32) -> OperatorSlotAudio {
    OperatorSlotAudio::new(id, samples, rate, SLOT, SLOT + 400)
}

fn mixed(outcome: MixOutcome) -> ftcycle::audio::buffer::MixedAudio {
    match outcome {
        MixOutcome::Mixed(m) => m,
        MixOutcome::NoAudio => panic!("expected a composite"),
    }
}

#[test]
fn single_operator_passes_through_unchanged() {
    let mut mixer = AudioMixer::new(MixerConfig::default());
    let samples: Vec<f32> = (0..4_800).map(|i| ((i as f32) * 0.01).sin() * 0.8).collect();
    mixer.add_operator_audio(audio(1, samples.clone(), 48_000)).expect("add");

    let out = mixed(mixer.mix_all_operator_audios(0).expect("mix"));
    assert_eq!(out.audio_data, samples);
    assert_eq!(out.sample_rate, 48_000);
    assert_eq!(out.operator_ids, vec![1]);
    assert_eq!(mixer.state(), MixerState::Mixed);
}

#[test]
fn clipping_sum_is_normalized_to_target_peak() {
    let mut mixer = AudioMixer::new(MixerConfig::default());
    mixer.add_operator_audio(audio(1, tone(12_000, 0.6), 12_000)).expect("add a");
    mixer.add_operator_audio(audio(2, tone(12_000, 0.6), 12_000)).expect("add b");

    let out = mixed(mixer.mix_all_operator_audios(0).expect("mix"));
    assert!((mixer.stats().last_pre_normalization_peak - 1.2).abs() < 1e-5);
    assert!((out.peak() - 0.95).abs() < 1e-6);
    assert_eq!(out.operator_ids, vec![1, 2]);
}

#[test]
fn quiet_sum_is_left_alone() {
    let mut mixer = AudioMixer::new(MixerConfig::default());
    mixer.add_operator_audio(audio(1, tone(1_000, 0.3), 12_000)).expect("add a");
    mixer.add_operator_audio(audio(2, tone(1_000, 0.2), 12_000)).expect("add b");
    let out = mixed(mixer.mix_all_operator_audios(0).expect("mix"));
    assert!((out.peak() - 0.5).abs() < 1e-6);
}

#[test]
fn mixed_rates_resolve_to_highest_rate() {
    let mut mixer = AudioMixer::new(MixerConfig::default());
    mixer.add_operator_audio(audio(1, tone(48_000, 0.2), 48_000)).expect("add a");
    mixer.add_operator_audio(audio(2, tone(12_000, 0.2), 12_000)).expect("add b");

    let out = mixed(mixer.mix_all_operator_audios(0).expect("mix"));
    assert_eq!(out.sample_rate, 48_000);
    assert_eq!(out.audio_data.len(), 48_000);
    assert!((out.duration_sec - 1.0).abs() < 1e-9);
    assert_eq!(out.operator_ids, vec![1, 2]);
}

#[test]
fn remix_offsets_accumulate_across_updates() {
    let mut mixer = AudioMixer::new(MixerConfig::default());
    mixer.add_operator_audio(audio(1, ramp(1_000), 1_000)).expect("add");
    mixed(mixer.mix_all_operator_audios(0).expect("first mix"));

    let second = mixed(mixer.remix_after_update(200).expect("remix 1"));
    assert_eq!(second.audio_data.len(), 800);
    assert!((second.audio_data[0] - 0.2).abs() < 1e-6);

    let third = mixed(mixer.remix_after_update(300).expect("remix 2"));
    assert_eq!(mixer.cumulative_elapsed_ms(), 500);
    assert_eq!(third.audio_data.len(), 500);
    assert!((third.audio_data[0] - 0.5).abs() < 1e-6);
}

#[test]
fn fully_trimmed_audio_is_an_underrun() {
    let mut mixer = AudioMixer::new(MixerConfig::default());
    mixer.add_operator_audio(audio(1, tone(12_000, 0.1), 12_000)).expect("add");
    let outcome = mixer.mix_all_operator_audios(2_000).expect("mix");
    assert_eq!(outcome, MixOutcome::NoAudio);
    assert_eq!(mixer.stats().underruns, 1);
    assert_eq!(mixer.state(), MixerState::Accumulating);
}

#[test]
fn empty_cache_mixes_to_nothing() {
    let mut mixer = AudioMixer::new(MixerConfig::default());
    assert_eq!(mixer.mix_all_operator_audios(0).expect("mix"), MixOutcome::NoAudio);
}

#[test]
fn entry_for_new_slot_purges_stale_cache() {
    let mut mixer = AudioMixer::new(MixerConfig::default());
    mixer.add_operator_audio(audio(1, tone(100, 0.1), 12_000)).expect("add");
    mixer.add_operator_audio(audio(2, tone(100, 0.1), 12_000)).expect("add");

    let next = OperatorSlotAudio::new(3, tone(100, 0.1), 12_000, SLOT + 15_000, SLOT + 15_400);
    assert_eq!(mixer.add_operator_audio(next).expect("add"), AudioAccepted::PurgedStale);
    assert_eq!(mixer.operator_ids(), &[3]);
    assert_eq!(mixer.current_slot_start(), Some(SLOT + 15_000));
}

#[test]
fn duplicate_request_is_ignored_and_reencode_replaces() {
    let mut mixer = AudioMixer::new(MixerConfig::default());
    let first = audio(1, tone(100, 0.1), 12_000).with_request_id(7);
    assert_eq!(mixer.add_operator_audio(first.clone()).expect("add"), AudioAccepted::Inserted);
    assert_eq!(mixer.add_operator_audio(first).expect("dup"), AudioAccepted::Duplicate);

    let reencoded = audio(1, tone(200, 0.2), 12_000).with_request_id(8);
    assert_eq!(mixer.add_operator_audio(reencoded).expect("replace"), AudioAccepted::Replaced);
    assert_eq!(mixer.len(), 1);
    assert_eq!(mixer.entry(1).map(|e| e.audio_data.len()), Some(200));
}

#[test]
fn invalid_entries_are_rejected() {
    let mut mixer = AudioMixer::new(MixerConfig {
        max_operators: 1,
        ..MixerConfig::default()
    });
    assert_eq!(
        mixer.add_operator_audio(audio(1, tone(10, 0.1), 0)),
        Err(MixError::ZeroSampleRate(1))
    );
    mixer.add_operator_audio(audio(1, tone(10, 0.1), 12_000)).expect("add");
    assert_eq!(
        mixer.add_operator_audio(audio(2, tone(10, 0.1), 12_000)),
        Err(MixError::CacheFull(1))
    );
}

#[test]
fn non_finite_mix_fails_and_clears_cache() {
    let mut mixer = AudioMixer::new(MixerConfig::default());
    let mut bad = tone(100, 0.1);
    bad[10] = f32::NAN;
    mixer.add_operator_audio(audio(1, bad, 12_000)).expect("add");
    mixer.add_operator_audio(audio(2, tone(100, 0.1), 12_000)).expect("add");

    assert!(matches!(
        mixer.mix_all_operator_audios(0),
        Err(MixError::NonFinite { slot_start_ms: SLOT })
    ));
    assert!(mixer.is_empty());
    assert_eq!(mixer.state(), MixerState::Empty);
}

#[test]
fn schedule_mixing_debounces_and_honors_target() {
    let mut mixer = AudioMixer::new(MixerConfig::default());
    mixer.add_operator_audio(audio(1, tone(100, 0.1), 12_000)).expect("add");

    assert_eq!(
        mixer.schedule_mixing(1_000, None),
        ScheduleOutcome::Armed { fire_at_ms: 1_100 }
    );
    assert_eq!(
        mixer.schedule_mixing(1_000, Some(5_000)),
        ScheduleOutcome::Armed { fire_at_ms: 4_950 }
    );
    assert_eq!(
        mixer.schedule_mixing(1_000, Some(1_080)),
        ScheduleOutcome::Armed { fire_at_ms: 1_080 }
    );
    assert_eq!(mixer.state(), MixerState::Scheduled);

    assert_eq!(mixer.fire_due(1_079).expect("early"), None);
    let fired = mixer.fire_due(1_080).expect("due").expect("outcome");
    assert!(fired.mixed().is_some());
    assert_eq!(mixer.fire_due(1_200).expect("disarmed"), None);
}

#[test]
fn past_target_is_reported_overdue_and_counts_overrun() {
    let mut mixer = AudioMixer::new(MixerConfig::default());
    mixer.add_operator_audio(audio(1, tone(100, 0.1), 12_000)).expect("add");
    mixer.schedule_mixing(1_950, None);
    assert_eq!(
        mixer.schedule_mixing(2_000, Some(1_900)),
        ScheduleOutcome::Overdue { late_ms: 100 }
    );
    assert_eq!(mixer.stats().overruns, 1);
    assert_eq!(mixer.pending_fire_at(), None);
    assert_eq!(mixer.state(), MixerState::Accumulating);
    assert_eq!(mixer.stats().mixes, 0);
}

#[test]
fn empty_cache_is_never_armed() {
    let mut mixer = AudioMixer::new(MixerConfig::default());
    assert_eq!(mixer.schedule_mixing(1_000, None), ScheduleOutcome::NothingCached);
    assert_eq!(mixer.state(), MixerState::Empty);
    assert_eq!(mixer.pending_fire_at(), None);
    assert_eq!(mixer.fire_due(5_000).expect("nothing armed"), None);
    assert_eq!(mixer.stats().underruns, 0);

    mixer.add_operator_audio(audio(1, tone(100, 0.1), 12_000)).expect("add");
    mixer.schedule_mixing(1_000, None);
    assert!(mixer.remove_operator_audio(1));
    assert_eq!(mixer.state(), MixerState::Empty);
    assert_eq!(mixer.pending_fire_at(), None);
}

#[test]
fn pending_job_is_taken_only_when_armed() {
    let mut mixer = AudioMixer::new(MixerConfig::default());
    mixer.add_operator_audio(audio(1, tone(100, 0.1), 12_000)).expect("add");
    assert!(mixer.take_pending_job(ResampleQuality::Linear).is_none());
    mixer.schedule_mixing(0, None);
    let job = mixer.take_pending_job(ResampleQuality::Linear).expect("armed");
    assert_eq!(job.elapsed_ms(), 0);
    assert_eq!(job.quality(), ResampleQuality::Linear);
    assert_eq!(job.slot_start_ms(), SLOT);
    assert!(!mixer.cancel_pending());

    let outcome = mixer.complete(job.run()).expect("mix");
    assert!(outcome.mixed().is_some());
    assert_eq!(mixer.state(), MixerState::Mixed);
}

#[test]
fn removed_operator_leaves_the_composite() {
    let mut mixer = AudioMixer::new(MixerConfig::default());
    mixer.add_operator_audio(audio(1, tone(1_200, 0.2), 12_000)).expect("add");
    mixer.add_operator_audio(audio(2, tone(1_200, 0.3), 12_000)).expect("add");
    mixer.add_operator_audio(audio(3, tone(1_200, 0.1), 12_000)).expect("add");
    let out = mixed(mixer.mix_all_operator_audios(0).expect("mix"));
    assert_eq!(out.operator_ids, vec![1, 2, 3]);

    assert!(mixer.remove_operator_audio(2));
    assert!(!mixer.remove_operator_audio(2));
    assert_eq!(mixer.operator_ids(), &[1, 3]);
    assert_eq!(mixer.state(), MixerState::Mixed);

    let out = mixed(mixer.remix_after_update(50).expect("remix"));
    assert_eq!(out.operator_ids, vec![1, 3]);
    assert_eq!(out.audio_data.len(), 1_200 - 600);
    assert!((out.audio_data[0] - 0.3).abs() < 1e-6);

    assert!(mixer.remove_operator_audio(1));
    assert!(mixer.remove_operator_audio(3));
    assert_eq!(mixer.state(), MixerState::Mixed);
    assert_eq!(mixer.remix_after_update(0).expect("remix"), MixOutcome::NoAudio);
    assert_eq!(mixer.state(), MixerState::Empty);
}

#[test]
fn resamplers_produce_expected_lengths() {
    let input = tone(12_000, 0.25);
    assert_eq!(output_len(12_000, 12_000, 48_000), 48_000);
    assert_eq!(resample_linear(&input, 12_000, 48_000).len(), 48_000);
    assert_eq!(resample(&input, 12_000, 48_000, ResampleQuality::Fft).samples.len(), 48_000);
    assert_eq!(resample(&input, 48_000, 12_000, ResampleQuality::Linear).samples.len(), 3_000);
    assert!(matches!(
        resample_fft(&input, 0, 48_000),
        Err(ResampleError::InvalidRate { from: 0, to: 48_000 })
    ));
}

proptest! {
    #[test]
    fn multi_operator_mix_never_clips(
        streams in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 1..400), 2..5)
    ) {
        let mut mixer = AudioMixer::new(MixerConfig::default());
        for (i, samples) in streams.iter().enumerate() {
            mixer.add_operator_audio(audio(i as u32 + 1, samples.clone(), 12_000)).expect("add");
        }
        let out = mixed(mixer.mix_all_operator_audios(0).expect("mix"));
        prop_assert!(out.peak() <= 1.0 + 1e-6);
        prop_assert_eq!(out.audio_data.len(), streams.iter().map(Vec::len).max().unwrap_or(0));
    }
}
