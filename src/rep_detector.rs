use log::{debug, warn};

use crate::error::RejectionReason;
use crate::profile::{DetectorThresholds, MotionClass, MovementProfile};
use crate::types::{Point2, MAX_SPAN_SAMPLES};

/// Puntos mínimos para ajustar un círculo
pub const CIRCLE_FIT_MIN_POINTS: usize = 5;
/// Cola de puntos retenida mientras no hay movimiento circular
const IDLE_TAIL_POINTS: usize = 30;
/// Error de redondeo admitido al comparar la rotación con el umbral
const ROTATION_TOLERANCE_DEG: f64 = 1e-6;

/// Estados del detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Esperando señal por encima de la activación
    Idle,
    /// Siguiendo el pico de una oscilación
    PeakActive,
    /// Acumulando rotación alrededor del centro
    Rotating,
}

/// Repetición candidata: pasó amplitud y cooldown, falta el ROM
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepCandidate {
    pub start: f64,
    pub end: f64,
    /// Primera muestra del movimiento contado. Coincide con `start` salvo en
    /// vueltas encadenadas, donde la rotación del cooldown ya cuenta.
    pub onset: f64,
    /// Pico en grados (lineal) o rotación acumulada en grados (circular)
    pub peak: f64,
}

/// Resultado de alimentar una muestra al detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectorStep {
    Idle,
    Tracking { peak: f64 },
    Candidate(RepCandidate),
    Rejected(RejectionReason),
}

/// Detector por histéresis pico/valle sobre una señal escalar con signo
/// (desplazamiento angular respecto a la línea base, en grados).
///
/// IDLE → PEAK_ACTIVE al superar `activación`; el pico solo crece; la
/// inversión (cambio de signo o magnitud bajo el valle) evalúa la repetición.
#[derive(Debug, Clone)]
pub struct RepetitionDetector {
    thresholds: DetectorThresholds,
    cooldown_secs: f64,
    state: DetectorState,
    start: f64,
    peak: f64,
    sign: f64,
    last_rep_end: Option<f64>,
}

impl RepetitionDetector {
    pub fn new(thresholds: DetectorThresholds, cooldown_secs: f64) -> Self {
        Self {
            thresholds,
            cooldown_secs,
            state: DetectorState::Idle,
            start: 0.0,
            peak: 0.0,
            sign: 1.0,
            last_rep_end: None,
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn last_rep_end(&self) -> Option<f64> {
        self.last_rep_end
    }

    fn observe(&self) -> DetectorStep {
        match self.state {
            DetectorState::PeakActive => DetectorStep::Tracking { peak: self.peak },
            _ => DetectorStep::Idle,
        }
    }

    fn activate(&mut self, t: f64, value: f64) {
        self.state = DetectorState::PeakActive;
        self.start = t;
        self.peak = value.abs();
        self.sign = if value < 0.0 { -1.0 } else { 1.0 };
    }

    /// Alimenta una muestra de la señal. Nunca entra en pánico: los valores
    /// no finitos se ignoran.
    pub fn update(&mut self, t: f64, value: f64) -> DetectorStep {
        if !t.is_finite() || !value.is_finite() {
            warn!("Detector: muestra no finita ignorada");
            return self.observe();
        }

        let magnitude = value.abs();
        match self.state {
            DetectorState::PeakActive => {
                let sign_change = value * self.sign < 0.0;
                if !sign_change && magnitude >= self.thresholds.valley() {
                    self.peak = self.peak.max(magnitude);
                    return DetectorStep::Tracking { peak: self.peak };
                }

                let step = self.evaluate(t);

                // Si la inercia continúa al otro lado, empieza otra oscilación
                if magnitude > self.thresholds.activation() {
                    self.activate(t, value);
                } else {
                    self.state = DetectorState::Idle;
                }
                step
            }
            _ => {
                if magnitude > self.thresholds.activation() {
                    self.activate(t, value);
                    DetectorStep::Tracking { peak: self.peak }
                } else {
                    DetectorStep::Idle
                }
            }
        }
    }

    fn evaluate(&self, end: f64) -> DetectorStep {
        if self.peak < self.thresholds.strict_peak() {
            debug!(
                "Repetición rechazada ({}): pico {:.2}° < {:.2}°",
                RejectionReason::Amplitude,
                self.peak,
                self.thresholds.strict_peak()
            );
            return DetectorStep::Rejected(RejectionReason::Amplitude);
        }

        if let Some(last_end) = self.last_rep_end {
            let elapsed = self.start - last_end;
            if elapsed < self.cooldown_secs {
                debug!(
                    "Repetición rechazada ({}): {:.3}s desde la anterior",
                    RejectionReason::Cooldown,
                    elapsed
                );
                return DetectorStep::Rejected(RejectionReason::Cooldown);
            }
        }

        DetectorStep::Candidate(RepCandidate {
            start: self.start,
            end,
            onset: self.start,
            peak: self.peak,
        })
    }

    /// La sesión confirma la candidata (ROM válido): arranca el cooldown
    pub fn confirm(&mut self, candidate: &RepCandidate) {
        self.last_rep_end = Some(candidate.end);
    }

    pub fn reset(&mut self) {
        self.state = DetectorState::Idle;
        self.peak = 0.0;
    }
}

/// Ajuste algebraico de círculo (Kåsa) sobre coordenadas centradas.
/// Con puntos casi colineales recurre al centroide y la distancia media.
pub fn fit_circle(points: &[Point2]) -> Option<(Point2, f64)> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let my = points.iter().map(|p| p.y).sum::<f64>() / n;

    let (mut suu, mut svv, mut suv) = (0.0, 0.0, 0.0);
    let (mut suuu, mut svvv, mut suvv, mut svuu) = (0.0, 0.0, 0.0, 0.0);
    for p in points {
        let u = p.x - mx;
        let v = p.y - my;
        suu += u * u;
        svv += v * v;
        suv += u * v;
        suuu += u * u * u;
        svvv += v * v * v;
        suvv += u * v * v;
        svuu += v * u * u;
    }

    let det = suu * svv - suv * suv;
    let scale = (suu + svv).powi(2);
    if points.len() >= 3 && scale > 0.0 && det.abs() > 1e-9 * scale {
        let rhs_u = 0.5 * (suuu + suvv);
        let rhs_v = 0.5 * (svvv + svuu);
        let uc = (rhs_u * svv - rhs_v * suv) / det;
        let vc = (suu * rhs_v - suv * rhs_u) / det;
        let radius = (uc * uc + vc * vc + (suu + svv) / n).sqrt();
        let center = Point2::new(mx + uc, my + vc);
        if center.is_finite() && radius.is_finite() {
            return Some((center, radius));
        }
    }

    // Centroide
    let center = Point2::new(mx, my);
    let radius = points.iter().map(|p| p.distance(center)).sum::<f64>() / n;
    Some((center, radius))
}

/// Suma de incrementos angulares (envueltos a (−π, π]) alrededor de `center`
pub fn accumulated_rotation_deg(points: &[Point2], center: Point2) -> f64 {
    let angles: Vec<f64> = points
        .iter()
        .filter(|p| p.distance(center) > 1e-9)
        .map(|p| (p.y - center.y).atan2(p.x - center.x))
        .collect();

    angles
        .windows(2)
        .map(|w| {
            let mut delta = w[1] - w[0];
            while delta > std::f64::consts::PI {
                delta -= 2.0 * std::f64::consts::PI;
            }
            while delta <= -std::f64::consts::PI {
                delta += 2.0 * std::f64::consts::PI;
            }
            delta
        })
        .sum::<f64>()
        .to_degrees()
}

/// Detector de vueltas completas para ejercicios circulares.
///
/// Tras una vuelta confirmada la rotación sigue acumulándose; el cooldown
/// solo retrasa la emisión y fija el `start` de la siguiente repetición.
#[derive(Debug, Clone)]
pub struct CircularDetector {
    thresholds: DetectorThresholds,
    cooldown_secs: f64,
    min_radius: f64,
    attempt: Vec<(f64, Point2)>,
    engaged: bool,
    accumulated: f64,
    last_rep_end: Option<f64>,
}

impl CircularDetector {
    /// `min_radius` en las unidades del plano proyectado
    pub fn new(thresholds: DetectorThresholds, cooldown_secs: f64, min_radius: f64) -> Self {
        Self {
            thresholds,
            cooldown_secs,
            min_radius,
            attempt: Vec::new(),
            engaged: false,
            accumulated: 0.0,
            last_rep_end: None,
        }
    }

    pub fn state(&self) -> DetectorState {
        if self.engaged {
            DetectorState::Rotating
        } else {
            DetectorState::Idle
        }
    }

    /// Rotación acumulada del intento actual, en grados con signo
    pub fn accumulated_deg(&self) -> f64 {
        self.accumulated
    }

    /// Puntos del intento en curso
    pub fn attempt_points(&self) -> Vec<Point2> {
        self.attempt.iter().map(|(_, p)| *p).collect()
    }

    fn spread(&self) -> f64 {
        let Some((_, first)) = self.attempt.first() else {
            return 0.0;
        };
        self.attempt
            .iter()
            .map(|(_, p)| p.distance(*first))
            .fold(0.0, f64::max)
    }

    fn restart(&mut self) {
        self.attempt.clear();
        self.engaged = false;
        self.accumulated = 0.0;
    }

    pub fn update(&mut self, t: f64, point: Point2) -> DetectorStep {
        if !t.is_finite() || !point.is_finite() {
            warn!("Detector circular: muestra no finita ignorada");
            return DetectorStep::Idle;
        }

        self.attempt.push((t, point));

        if !self.engaged {
            // Sin movimiento circular todavía: solo una cola corta
            if self.attempt.len() > IDLE_TAIL_POINTS {
                let excess = self.attempt.len() - IDLE_TAIL_POINTS;
                self.attempt.drain(..excess);
            }
            if self.attempt.len() < CIRCLE_FIT_MIN_POINTS || self.spread() < 2.0 * self.min_radius {
                return DetectorStep::Idle;
            }
            self.engaged = true;
        }

        let start = self.attempt[0].0;
        if t - start > self.thresholds.max_rotation_window_secs
            || self.attempt.len() > MAX_SPAN_SAMPLES
        {
            debug!(
                "Vuelta rechazada ({}): {:.0}° en {:.2}s",
                RejectionReason::Timeout,
                self.accumulated,
                t - start
            );
            self.restart();
            self.attempt.push((t, point));
            return DetectorStep::Rejected(RejectionReason::Timeout);
        }

        let points = self.attempt_points();
        self.accumulated = match fit_circle(&points) {
            Some((center, radius)) if radius >= self.min_radius => {
                accumulated_rotation_deg(&points, center)
            }
            _ => 0.0,
        };

        let threshold = self.thresholds.rotation_threshold_deg;
        if self.accumulated.abs() + ROTATION_TOLERANCE_DEG < threshold {
            return DetectorStep::Tracking {
                peak: self.accumulated.abs(),
            };
        }

        // Vuelta completa dentro del cooldown: se sigue acumulando hasta que
        // expire, nunca se descarta
        let ready_at = self
            .last_rep_end
            .map_or(f64::NEG_INFINITY, |end| end + self.cooldown_secs);
        if t < ready_at {
            return DetectorStep::Tracking {
                peak: self.accumulated.abs(),
            };
        }

        let candidate = RepCandidate {
            start: start.max(ready_at),
            end: t,
            onset: start,
            peak: self.accumulated.abs().max(threshold),
        };
        self.restart();
        DetectorStep::Candidate(candidate)
    }

    pub fn confirm(&mut self, candidate: &RepCandidate) {
        self.last_rep_end = Some(candidate.end);
    }

    pub fn reset(&mut self) {
        self.restart();
    }
}

/// Entrada del detector según su variante
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectorInput {
    /// Desplazamiento angular con signo (grados)
    Signal(f64),
    /// Punto proyectado en el plano de movimiento
    Point(Point2),
}

/// Un único detector por sesión, elegido por la clase de movimiento
#[derive(Debug, Clone)]
pub enum Detector {
    Linear(RepetitionDetector),
    Circular(CircularDetector),
}

impl Detector {
    pub fn for_profile(profile: &MovementProfile) -> Self {
        let thresholds = profile.thresholds;
        match profile.motion_class {
            MotionClass::Circular => {
                let min_radius =
                    profile.segment_length_m * thresholds.minimum_rom_deg.to_radians().sin();
                Detector::Circular(CircularDetector::new(
                    thresholds,
                    profile.cooldown_secs,
                    min_radius,
                ))
            }
            MotionClass::Pendulum | MotionClass::Linear | MotionClass::Mixed => {
                Detector::Linear(RepetitionDetector::new(thresholds, profile.cooldown_secs))
            }
        }
    }

    pub fn is_circular(&self) -> bool {
        matches!(self, Detector::Circular(_))
    }

    pub fn update(&mut self, t: f64, input: DetectorInput) -> DetectorStep {
        match (self, input) {
            (Detector::Linear(d), DetectorInput::Signal(value)) => d.update(t, value),
            (Detector::Circular(d), DetectorInput::Point(point)) => d.update(t, point),
            (_, input) => {
                warn!("Entrada incompatible con el detector: {:?}", input);
                DetectorStep::Idle
            }
        }
    }

    pub fn state(&self) -> DetectorState {
        match self {
            Detector::Linear(d) => d.state(),
            Detector::Circular(d) => d.state(),
        }
    }

    pub fn confirm(&mut self, candidate: &RepCandidate) {
        match self {
            Detector::Linear(d) => d.confirm(candidate),
            Detector::Circular(d) => d.confirm(candidate),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Detector::Linear(d) => d.reset(),
            Detector::Circular(d) => d.reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const DT: f64 = 1.0 / 60.0;

    /// Excursión de ida y vuelta: θ = A·(1 − cos(2πt/T))/2
    fn excursion(t0: f64, amplitude: f64, period: f64) -> Vec<(f64, f64)> {
        let n = (period / DT).round() as usize;
        (0..=n)
            .map(|i| {
                let t = i as f64 * DT;
                (t0 + t, amplitude * (1.0 - (2.0 * PI * t / period).cos()) / 2.0)
            })
            .collect()
    }

    fn run(detector: &mut RepetitionDetector, signal: &[(f64, f64)]) -> Vec<DetectorStep> {
        signal
            .iter()
            .map(|&(t, v)| detector.update(t, v))
            .filter(|s| matches!(s, DetectorStep::Candidate(_) | DetectorStep::Rejected(_)))
            .collect()
    }

    fn detector() -> RepetitionDetector {
        RepetitionDetector::new(DetectorThresholds::default(), 0.3)
    }

    #[test]
    fn single_excursion_yields_one_candidate() {
        let mut d = detector();
        let events = run(&mut d, &excursion(0.0, 30.0, 1.0));
        assert_eq!(events.len(), 1);
        match events[0] {
            DetectorStep::Candidate(c) => {
                assert!((c.peak - 30.0).abs() < 0.1);
                assert!(c.start > 0.0 && c.end > c.start);
            }
            other => panic!("esperaba candidata, llegó {:?}", other),
        }
        assert_eq!(d.state(), DetectorState::Idle);
    }

    #[test]
    fn below_activation_produces_nothing() {
        let mut d = detector();
        let events = run(&mut d, &excursion(0.0, 8.0, 1.0));
        assert!(events.is_empty());
    }

    #[test]
    fn peak_between_activation_and_strict_gate_is_rejected() {
        let mut d = detector();
        // 9.5° supera la activación (9.0) pero no la validación (9.9)
        let events = run(&mut d, &excursion(0.0, 9.5, 1.0));
        assert_eq!(events, vec![DetectorStep::Rejected(RejectionReason::Amplitude)]);
    }

    #[test]
    fn cooldown_rejects_early_second_rep() {
        let mut d = detector();
        let first = excursion(0.0, 30.0, 1.0);
        let events = run(&mut d, &first);
        let DetectorStep::Candidate(c) = events[0] else {
            panic!("primera repetición no detectada");
        };
        d.confirm(&c);

        // Segunda activación a menos de 0.3 s del final anterior
        let second = excursion(c.end + 0.01 - 0.2, 60.0, 0.6);
        let second: Vec<_> = second.into_iter().filter(|(t, _)| *t > c.end).collect();
        let events = run(&mut d, &second);
        assert_eq!(events, vec![DetectorStep::Rejected(RejectionReason::Cooldown)]);
    }

    #[test]
    fn unconfirmed_candidate_does_not_start_cooldown() {
        let mut d = detector();
        let first = excursion(0.0, 30.0, 1.0);
        assert_eq!(run(&mut d, &first).len(), 1);
        let second = excursion(1.02, 30.0, 1.0);
        let events = run(&mut d, &second);
        assert!(matches!(events[0], DetectorStep::Candidate(_)));
    }

    #[test]
    fn sign_change_counts_as_reversal_and_momentum_reactivates() {
        let mut d = detector();
        let mut steps = Vec::new();
        // Péndulo a ambos lados: +20°, salto directo a −20°
        for (i, v) in [0.0, 12.0, 20.0, 15.0, -12.0, -20.0, -12.0, 0.0].iter().enumerate() {
            steps.push(d.update(i as f64 * 0.1, *v));
        }
        let candidates: Vec<_> = steps
            .iter()
            .filter_map(|s| match s {
                DetectorStep::Candidate(c) => Some(*c),
                _ => None,
            })
            .collect();
        assert_eq!(candidates.len(), 2);
        assert!((candidates[0].peak - 20.0).abs() < 1e-9);
        // La segunda oscilación empezó en el cambio de signo
        assert!((candidates[1].start - 0.4).abs() < 1e-9);
    }

    #[test]
    fn peak_never_shrinks_while_tracking() {
        let mut d = detector();
        d.update(0.0, 15.0);
        d.update(0.1, 25.0);
        let step = d.update(0.2, 18.0);
        assert_eq!(step, DetectorStep::Tracking { peak: 25.0 });
    }

    #[test]
    fn non_finite_values_are_ignored() {
        let mut d = detector();
        d.update(0.0, 15.0);
        let step = d.update(0.1, f64::NAN);
        assert_eq!(step, DetectorStep::Tracking { peak: 15.0 });
        assert_eq!(d.state(), DetectorState::PeakActive);
    }

    fn circle(t0: f64, radius: f64, sweep_deg: f64, duration: f64) -> Vec<(f64, Point2)> {
        let n = (duration / DT).round() as usize;
        (0..=n)
            .map(|i| {
                let a = (sweep_deg * i as f64 / n as f64).to_radians();
                (
                    t0 + i as f64 * DT,
                    Point2::new(radius * a.cos(), -0.3 + radius * a.sin()),
                )
            })
            .collect()
    }

    fn run_circular(detector: &mut CircularDetector, points: &[(f64, Point2)]) -> Vec<DetectorStep> {
        points
            .iter()
            .map(|&(t, p)| detector.update(t, p))
            .filter(|s| matches!(s, DetectorStep::Candidate(_) | DetectorStep::Rejected(_)))
            .collect()
    }

    fn circular(threshold: f64) -> CircularDetector {
        let thresholds = DetectorThresholds {
            rotation_threshold_deg: threshold,
            ..DetectorThresholds::default()
        };
        CircularDetector::new(thresholds, 0.5, 0.6 * 5f64.to_radians().sin())
    }

    #[test]
    fn fit_circle_recovers_center_and_radius() {
        let points: Vec<Point2> = circle(0.0, 0.4, 120.0, 1.0).into_iter().map(|(_, p)| p).collect();
        let (center, radius) = fit_circle(&points).unwrap();
        assert!(center.distance(Point2::new(0.0, -0.3)) < 1e-6);
        assert!((radius - 0.4).abs() < 1e-6);
    }

    #[test]
    fn full_circle_is_a_candidate() {
        let mut d = circular(340.0);
        let events = run_circular(&mut d, &circle(0.0, 0.4, 360.0, 3.0));
        assert_eq!(events.len(), 1);
        let DetectorStep::Candidate(c) = events[0] else {
            panic!("esperaba candidata");
        };
        assert!(c.peak >= 340.0);
        assert!(c.end - c.start <= 3.0);
    }

    #[test]
    fn chained_circles_are_all_counted() {
        let mut d = circular(340.0);
        let mut candidates = Vec::new();
        for (t, p) in circle(0.0, 0.4, 720.0, 6.0) {
            match d.update(t, p) {
                DetectorStep::Candidate(c) => {
                    d.confirm(&c);
                    candidates.push(c);
                }
                DetectorStep::Rejected(reason) => panic!("vuelta rechazada: {}", reason),
                _ => {}
            }
        }
        assert_eq!(candidates.len(), 2);
        let (first, second) = (candidates[0], candidates[1]);
        assert!(second.start - first.end >= 0.5 - 1e-9);
        // La rotación del cooldown pertenece a la segunda vuelta
        assert!(second.onset < second.start);
        assert!(second.onset > first.end);
    }

    #[test]
    fn circle_completed_inside_cooldown_waits_for_it() {
        let thresholds = DetectorThresholds {
            rotation_threshold_deg: 340.0,
            ..DetectorThresholds::default()
        };
        let mut d = CircularDetector::new(thresholds, 3.0, 0.05);
        let mut candidates = Vec::new();
        for (t, p) in circle(0.0, 0.4, 1080.0, 4.5) {
            if let DetectorStep::Candidate(c) = d.update(t, p) {
                d.confirm(&c);
                candidates.push(c);
            }
        }
        // 1.5 s por vuelta: la segunda se emite al expirar el cooldown
        assert_eq!(candidates.len(), 2);
        assert!((candidates[1].end - (candidates[0].end + 3.0)).abs() < 0.02);
        assert!(candidates[1].peak > 340.0);
    }

    #[test]
    fn sweep_short_of_threshold_is_not_counted() {
        let mut strict = circular(350.0);
        let events = run_circular(&mut strict, &circle(0.0, 0.4, 345.0, 3.0));
        assert!(events.iter().all(|e| !matches!(e, DetectorStep::Candidate(_))));

        let mut tolerant = circular(340.0);
        let events = run_circular(&mut tolerant, &circle(0.0, 0.4, 345.0, 3.0));
        assert!(matches!(events[0], DetectorStep::Candidate(_)));
    }

    #[test]
    fn slow_circle_times_out() {
        let mut d = circular(340.0);
        let events = run_circular(&mut d, &circle(0.0, 0.4, 360.0, 10.0));
        assert_eq!(events[0], DetectorStep::Rejected(RejectionReason::Timeout));
        assert!(events.iter().all(|e| !matches!(e, DetectorStep::Candidate(_))));
    }

    #[test]
    fn tiny_circle_never_engages() {
        let mut d = circular(340.0);
        let events = run_circular(&mut d, &circle(0.0, 0.03, 720.0, 4.0));
        assert!(events.is_empty());
        assert_eq!(d.state(), DetectorState::Idle);
    }

    #[test]
    fn back_and_forth_cancels_rotation() {
        let mut d = circular(340.0);
        let forward = circle(0.0, 0.4, 200.0, 2.0);
        let mut backward = forward.clone();
        backward.reverse();
        let backward: Vec<_> = backward
            .into_iter()
            .enumerate()
            .map(|(i, (_, p))| (2.0 + (i + 1) as f64 * DT, p))
            .collect();
        let mut events = run_circular(&mut d, &forward);
        events.extend(run_circular(&mut d, &backward));
        assert!(events.is_empty());
        assert!(d.accumulated_deg().abs() < 1.0);
    }

    #[test]
    fn mismatched_input_is_ignored() {
        let mut d = Detector::for_profile(&MovementProfile::pendulum());
        assert_eq!(d.update(0.0, DetectorInput::Point(Point2::new(1.0, 1.0))), DetectorStep::Idle);
        assert_eq!(
            d.update(0.1, DetectorInput::Signal(20.0)),
            DetectorStep::Tracking { peak: 20.0 }
        );
    }

    #[test]
    fn detector_follows_motion_class() {
        assert!(matches!(
            Detector::for_profile(&MovementProfile::circular()),
            Detector::Circular(_)
        ));
        assert!(matches!(
            Detector::for_profile(&MovementProfile::pendulum()),
            Detector::Linear(_)
        ));
    }
}
