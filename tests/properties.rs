//! Propiedades generales del pipeline (proptest)

use proptest::prelude::*;

use fisiorep::plane_projector::select_plane;
use fisiorep::profile::DetectorThresholds;
use fisiorep::rep_detector::{DetectorStep, RepetitionDetector};
use fisiorep::rom::RomCalculator;
use fisiorep::smoothness::SmoothnessEngine;
use fisiorep::synth;
use fisiorep::trajectory_buffer::TrajectoryBuffer;
use fisiorep::types::{Point2, PositionSample, SmoothnessSource, Vec3};

fn point2() -> impl Strategy<Value = Point2> {
    (-2.0..2.0f64, -2.0..2.0f64).prop_map(|(x, y)| Point2::new(x, y))
}

fn vec3() -> impl Strategy<Value = Vec3> {
    (-1.0..1.0f64, -1.0..1.0f64, -1.0..1.0f64).prop_map(|(x, y, z)| Vec3::new(x, y, z))
}

proptest! {
    #[test]
    fn buffer_never_exceeds_capacity(capacity in 1usize..200, extra in 0usize..400) {
        let mut buffer = TrajectoryBuffer::new(capacity);
        let total = capacity + extra;
        for i in 0..total {
            buffer.push(PositionSample::new(i as f64 * 0.01, Vec3::ZERO));
            prop_assert!(buffer.len() <= capacity);
        }
        // Solo quedan las más recientes
        let first = buffer.first().map(|s| s.timestamp).unwrap();
        prop_assert!((first - (total - buffer.len()) as f64 * 0.01).abs() < 1e-9);
        prop_assert!((buffer.last().map(|s| s.timestamp).unwrap() - (total - 1) as f64 * 0.01).abs() < 1e-9);
    }

    #[test]
    fn plane_selection_is_idempotent(points in prop::collection::vec(vec3(), 3..60)) {
        prop_assert_eq!(select_plane(&points, None), select_plane(&points, None));
    }

    #[test]
    fn rom_stays_in_bounds(
        baseline in point2(),
        span in prop::collection::vec(point2(), 8..80),
        length in 0.1..1.5f64,
    ) {
        let rom = RomCalculator::new(length);
        if let Ok(deg) = rom.linear(baseline, &span) {
            prop_assert!((0.0..=180.0).contains(&deg));
        }
        if let Ok(deg) = rom.circular(&span) {
            prop_assert!((0.0..=90.0).contains(&deg));
        }
    }

    #[test]
    fn no_rep_without_amplitude(
        amplitude in 0.0..9.85f64,
        period in 0.4..3.0f64,
        cycles in 1usize..6,
    ) {
        let mut detector = RepetitionDetector::new(DetectorThresholds::default(), 0.3);
        let samples = (cycles as f64 * period * 60.0) as usize;
        for i in 0..=samples {
            let t = i as f64 / 60.0;
            let value = amplitude * (2.0 * std::f64::consts::PI * t / period).sin();
            let step = detector.update(t, value);
            prop_assert!(!matches!(step, DetectorStep::Candidate(_)));
        }
    }

    #[test]
    fn peak_is_monotonic_while_active(values in prop::collection::vec(-40.0..40.0f64, 10..200)) {
        let mut detector = RepetitionDetector::new(DetectorThresholds::default(), 0.3);
        let mut last_peak: Option<f64> = None;
        for (i, value) in values.iter().enumerate() {
            match detector.update(i as f64 / 60.0, *value) {
                DetectorStep::Tracking { peak } => {
                    if let Some(prev) = last_peak {
                        prop_assert!(peak >= prev);
                    }
                    last_peak = Some(peak);
                }
                _ => last_peak = None,
            }
        }
    }

    #[test]
    fn confirmed_reps_respect_cooldown(
        gaps in prop::collection::vec(0.0..1.0f64, 1..8),
        cooldown in 0.1..0.8f64,
    ) {
        // Elevaciones de 30° separadas por pausas aleatorias
        let mut t0 = 0.5;
        let mut moves = Vec::new();
        for gap in &gaps {
            moves.push((t0, 0.8));
            t0 += 0.8 + gap;
        }
        let mut detector = RepetitionDetector::new(DetectorThresholds::default(), cooldown);
        let mut confirmed: Vec<(f64, f64)> = Vec::new();

        let samples = ((t0 + 0.5) * 60.0) as usize;
        for i in 0..=samples {
            let t = i as f64 / 60.0;
            let value: f64 = moves
                .iter()
                .map(|&(start, duration)| {
                    let phase = t - start;
                    if phase <= 0.0 || phase >= duration {
                        0.0
                    } else {
                        30.0 * (1.0 - (2.0 * std::f64::consts::PI * phase / duration).cos()) / 2.0
                    }
                })
                .sum();
            if let DetectorStep::Candidate(candidate) = detector.update(t, value) {
                detector.confirm(&candidate);
                confirmed.push((candidate.start, candidate.end));
            }
        }

        for pair in confirmed.windows(2) {
            prop_assert!(pair[1].0 - pair[0].1 >= cooldown);
        }
    }

    #[test]
    fn smoothness_score_in_range(steps in 1usize..12, duration in 0.3..2.0f64, distance in 0.05..0.6f64) {
        let mut engine = SmoothnessEngine::default();
        let samples: Vec<PositionSample> = synth::jerky_reach(0.0, duration, distance, 60.0, steps)
            .into_iter()
            .map(|(t, p)| PositionSample::new(t, p))
            .collect();
        if let Ok(score) = engine.score_trajectory(&samples, SmoothnessSource::Trajectory) {
            prop_assert!((0.0..=100.0).contains(&score.score));
            prop_assert!((0.0..=1.0).contains(&score.confidence));
        }
    }
}

#[test]
fn smooth_reach_beats_jerky_reach() {
    let mut engine = SmoothnessEngine::default();
    let to_samples = |raw: Vec<(f64, Vec3)>| -> Vec<PositionSample> {
        raw.into_iter().map(|(t, p)| PositionSample::new(t, p)).collect()
    };
    let smooth = engine
        .score_trajectory(&to_samples(synth::smooth_reach(0.0, 1.0, 0.3, 60.0)), SmoothnessSource::Trajectory)
        .unwrap();
    let jerky = engine
        .score_trajectory(&to_samples(synth::jerky_reach(0.0, 1.0, 0.3, 60.0, 5)), SmoothnessSource::Trajectory)
        .unwrap();
    assert!(smooth.score > jerky.score, "{} <= {}", smooth.score, jerky.score);
}
