use loqa_live::audio::{amplitude_level_i16, CaptureCounters, CapturedFrame, SampleFramer};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;

fn framer(frame_size: usize, depth: usize) -> (SampleFramer, mpsc::Receiver<CapturedFrame>, Arc<CaptureCounters>) {
    let (tx, rx) = mpsc::channel(depth);
    let counters = Arc::new(CaptureCounters::default());
    (SampleFramer::new(frame_size, 16000, tx, counters.clone()), rx, counters)
}

fn sine(len: usize, amplitude: f32) -> Vec<f32> {
    (0..len)
        .map(|i| amplitude * (i as f32 * 2.0 * std::f32::consts::PI * 440.0 / 16000.0).sin())
        .collect()
}

#[test]
fn test_one_frame_per_fixed_block() {
    let (mut framer, mut rx, counters) = framer(4096, 16);

    // Irregular callback sizes must not change the framing
    let input = sine(4096 * 3 + 100, 0.5);
    let mut produced = 0;
    for block in input.chunks(1000) {
        produced += framer.push(block);
    }

    assert_eq!(produced, 3);
    assert_eq!(counters.frames.load(Ordering::Relaxed), 3);

    for expected_sequence in 0..3 {
        let captured = rx.try_recv().unwrap();
        assert_eq!(captured.frame.samples.len(), 4096);
        assert_eq!(captured.frame.sequence, expected_sequence);
        assert_eq!(captured.frame.channels, 1);
        assert_eq!(captured.frame.sample_rate, 16000);
        assert_eq!(captured.frame.timestamp_ms, expected_sequence * 256);
    }
    assert!(rx.try_recv().is_err());

    // The 100 leftover samples complete the next frame
    assert_eq!(framer.push(&sine(3996, 0.5)), 1);
}

#[test]
fn test_full_queue_drops_instead_of_blocking() {
    let (mut framer, mut rx, counters) = framer(256, 2);

    let produced = framer.push(&sine(256 * 5, 0.3));

    assert_eq!(produced, 5);
    assert_eq!(counters.frames.load(Ordering::Relaxed), 2);
    assert_eq!(counters.dropped.load(Ordering::Relaxed), 3);

    // The oldest frames survive; later ones were dropped, not queued
    assert_eq!(rx.try_recv().unwrap().frame.sequence, 0);
    assert_eq!(rx.try_recv().unwrap().frame.sequence, 1);
    assert!(rx.try_recv().is_err());

    // Once there is room again, framing continues
    framer.push(&sine(256, 0.3));
    assert_eq!(rx.try_recv().unwrap().frame.sequence, 5);
}

#[test]
fn test_level_is_deterministic_and_monotonic() {
    let mut levels = Vec::new();
    for amplitude in [0.0, 0.05, 0.2, 0.5, 0.9] {
        let (mut first, mut first_rx, _) = framer(1024, 4);
        let (mut second, mut second_rx, _) = framer(1024, 4);
        first.push(&sine(1024, amplitude));
        second.push(&sine(1024, amplitude));

        let a = first_rx.try_recv().unwrap();
        let b = second_rx.try_recv().unwrap();
        assert_eq!(a.level, b.level);
        assert_eq!(a.frame.samples, b.frame.samples);
        assert_eq!(a.level, amplitude_level_i16(&a.frame.samples));
        assert!((0.0..=100.0).contains(&a.level));
        levels.push(a.level);
    }

    assert_eq!(levels[0], 0.0);
    assert!(levels.windows(2).all(|pair| pair[0] < pair[1]), "levels {:?}", levels);
}

#[test]
fn test_closed_consumer_is_tolerated() {
    let (mut framer, rx, counters) = framer(128, 4);
    drop(rx);

    assert!(framer.is_closed());
    assert_eq!(framer.push(&sine(512, 0.2)), 4);
    assert_eq!(counters.frames.load(Ordering::Relaxed), 0);
}
