//! Escenarios de extremo a extremo sobre trazas sintéticas

use fisiorep::plane_projector::Plane;
use fisiorep::profile::{DetectorThresholds, MovementProfile};
use fisiorep::session::{ExerciseSession, SessionConfig, SessionEvent};
use fisiorep::synth::{self, CircleTrace, Excursion, PendulumTrace};
use fisiorep::types::{MotionSample, PositionSample, SessionSummary, Vec3};
use fisiorep::RejectionReason;

fn positions(samples: Vec<PositionSample>) -> Vec<MotionSample> {
    samples.into_iter().map(MotionSample::Position).collect()
}

fn run(profile: MovementProfile, samples: Vec<MotionSample>) -> (SessionSummary, Vec<SessionEvent>, ExerciseSession) {
    let mut session = ExerciseSession::new(profile, SessionConfig::default()).unwrap();
    let mut events = Vec::new();
    for sample in samples {
        events.extend(session.process(sample).unwrap());
    }
    let summary = session.end().unwrap();
    (summary, events, session)
}

#[test]
fn pendulum_60_degrees_counts_each_cycle() {
    let (summary, _, session) = run(
        MovementProfile::pendulum(),
        positions(PendulumTrace::default().positions()),
    );

    assert!(
        (9..=10).contains(&summary.total_reps),
        "reps = {}",
        summary.total_reps
    );
    for rom in &summary.rom_per_rep {
        assert!((rom - 60.0).abs() <= 5.0, "rom = {}", rom);
    }
    for record in session.records() {
        let score = record.smoothness.expect("suavidad disponible");
        assert!((0.0..=100.0).contains(&score));
    }
    // Cada vuelta por el otro lado cae dentro del cooldown
    assert!(summary.rejections.cooldown >= 9);
}

#[test]
fn sub_threshold_pendulum_counts_nothing() {
    let trace = PendulumTrace {
        amplitude_deg: 3.0,
        ..PendulumTrace::default()
    };
    let (summary, events, _) = run(MovementProfile::pendulum(), positions(trace.positions()));

    assert_eq!(summary.total_reps, 0);
    assert!(!events
        .iter()
        .any(|e| matches!(e, SessionEvent::RepetitionDetected { .. })));
}

#[test]
fn second_rep_inside_cooldown_is_suppressed() {
    let moves = [Excursion::new(1.0, 1.0, 40.0), Excursion::new(2.0, 1.0, 40.0)];
    let samples = synth::excursions(0.6, 60.0, 4.0, &moves);
    let (summary, events, _) = run(MovementProfile::pendulum(), positions(samples));

    assert_eq!(summary.total_reps, 1);
    assert_eq!(summary.rejections.cooldown, 1);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Rejected {
            reason: RejectionReason::Cooldown,
            ..
        }
    )));
    assert!((summary.max_rom_deg - 40.0).abs() < 3.0);
}

#[test]
fn reps_far_apart_are_both_counted() {
    let moves = [Excursion::new(1.0, 1.0, 40.0), Excursion::new(2.5, 1.0, 40.0)];
    let samples = synth::excursions(0.6, 60.0, 4.5, &moves);
    let (summary, _, _) = run(MovementProfile::pendulum(), positions(samples));
    assert_eq!(summary.total_reps, 2);
}

fn circle_340_then_reverse() -> Vec<MotionSample> {
    let trace = CircleTrace {
        radius: 0.3,
        sweep_deg: 340.0,
        sweep_secs: 3.0,
        reverse_deg: 90.0,
        reverse_secs: 1.0,
        ..CircleTrace::default()
    };
    positions(trace.positions())
}

fn circular_with_tolerance(rotation_threshold_deg: f64) -> MovementProfile {
    MovementProfile::circular().with_thresholds(DetectorThresholds {
        rotation_threshold_deg,
        ..DetectorThresholds::default()
    })
}

#[test]
fn circle_of_exactly_340_counts_with_340_tolerance() {
    let (summary, _, _) = run(circular_with_tolerance(340.0), circle_340_then_reverse());
    assert_eq!(summary.total_reps, 1);
    assert!(summary.max_rom_deg > 0.0 && summary.max_rom_deg <= 90.0);
}

#[test]
fn circle_of_340_does_not_count_with_stricter_tolerance() {
    let (summary, _, _) = run(circular_with_tolerance(350.0), circle_340_then_reverse());
    assert_eq!(summary.total_reps, 0);
}

#[test]
fn continuous_circles_are_each_counted() {
    // Tres vueltas seguidas sin pausa
    let (summary, _, session) = run(MovementProfile::circular(), positions(CircleTrace::default().positions()));

    assert_eq!(summary.total_reps, 3);
    assert_eq!(summary.rejections.cooldown, 0);
    for pair in session.records().windows(2) {
        assert!(pair[1].start - pair[0].end >= 0.5 - 1e-9);
    }
    for rom in &summary.rom_per_rep {
        assert!(*rom > 5.0 && *rom <= 90.0, "rom = {}", rom);
    }
}

#[test]
fn mixed_profile_follows_the_plane_between_reps() {
    let moves = [
        Excursion::new(1.0, 1.0, 40.0),
        Excursion::new(4.0, 1.0, 40.0),
        Excursion::new(7.0, 1.0, 40.0),
        Excursion::new(10.0, 1.0, 40.0),
    ];
    // Las dos primeras en XY, las dos últimas giradas al plano YZ
    let samples: Vec<PositionSample> = synth::excursions(0.6, 60.0, 12.5, &moves)
        .into_iter()
        .map(|s| {
            if s.timestamp < 6.0 {
                s
            } else {
                PositionSample::new(s.timestamp, Vec3::new(0.0, s.position.y, s.position.x))
            }
        })
        .collect();
    let (first, second): (Vec<_>, Vec<_>) = samples.into_iter().partition(|s| s.timestamp < 6.0);

    let mut session = ExerciseSession::new(MovementProfile::mixed(), SessionConfig::default()).unwrap();
    for sample in positions(first) {
        session.process(sample).unwrap();
    }
    assert_eq!(session.plane(), Some(Plane::XY));
    assert_eq!(session.rep_count(), 2);

    for sample in positions(second) {
        session.process(sample).unwrap();
    }
    assert_eq!(session.plane(), Some(Plane::YZ));
    let summary = session.end().unwrap();

    assert_eq!(summary.total_reps, 4);
    let last = summary.rom_per_rep[3];
    assert!((last - 40.0).abs() < 3.0, "rom = {}", last);
}

#[test]
fn pendulum_cooldown_must_fit_in_half_a_swing() {
    let profile = MovementProfile::pendulum().with_cooldown(0.65);
    assert!(profile.min_pendulum_period_secs() > 1.0);

    // Por debajo del límite se pierde uno de cada dos ciclos
    let fast = PendulumTrace::default();
    let (summary, _, _) = run(profile.clone(), positions(fast.positions()));
    assert!(summary.total_reps < 9, "reps = {}", summary.total_reps);

    // Por encima, cada ciclo cuenta
    let slow = PendulumTrace {
        period_secs: 1.6,
        ..PendulumTrace::default()
    };
    assert!(slow.period_secs >= profile.min_pendulum_period_secs());
    let (summary, _, _) = run(profile, positions(slow.positions()));
    assert!((6..=7).contains(&summary.total_reps), "reps = {}", summary.total_reps);
}

#[test]
fn low_confidence_camera_samples_are_excluded() {
    let trace = PendulumTrace {
        segment_length: 0.35,
        rate_hz: 30.0,
        ..PendulumTrace::default()
    };
    let frames = trace.pose_frames(Some(2));
    let total = frames.len();
    let samples = frames.into_iter().map(MotionSample::Pose).collect();

    let profile = MovementProfile::pendulum().with_segment_length(0.35);
    let (summary, _, session) = run(profile, samples);

    // Uno de cada dos frames lleva la muñeca con confianza 0.05
    assert_eq!(summary.excluded_samples, (total + 1) / 2);
    assert_eq!(summary.rejections.non_finite, 0);
    assert!(summary.total_reps >= 8, "reps = {}", summary.total_reps);
    assert!(summary.max_rom_deg.is_finite());
    assert!(summary.average_rom_deg.is_finite());
    if let Some(s) = summary.average_smoothness {
        assert!(s.is_finite());
    }
    assert!(session.records().iter().all(|r| r.low_confidence));
}

#[test]
fn pendulum_swinging_to_90_reports_90_not_180() {
    let moves = [Excursion::new(1.0, 2.0, 90.0)];
    let samples = synth::excursions(0.6, 60.0, 4.0, &moves);
    let (summary, _, _) = run(MovementProfile::linear(), positions(samples));

    assert_eq!(summary.total_reps, 1);
    assert!((summary.max_rom_deg - 90.0).abs() < 3.0, "rom = {}", summary.max_rom_deg);
}
