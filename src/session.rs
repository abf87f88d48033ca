use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{MotionError, RejectionReason, SessionError};
use crate::plane_projector::{self, axis_variance, Plane, PlaneSelector, Projection};
use crate::profile::{MotionClass, MovementProfile};
use crate::rep_detector::{Detector, DetectorInput, DetectorState, DetectorStep, RepCandidate};
use crate::rom::{Baseline, RomCalculator};
use crate::signal_conditioner::{ImuConditioner, PoseConditioner, Side};
use crate::smoothness::{SmoothnessConfig, SmoothnessPublisher};
use crate::smoothness_worker::{SmoothnessInput, SmoothnessJob, SmoothnessResult, SmoothnessWorker};
use crate::trajectory_buffer::TrajectoryBuffer;
use crate::types::{
    Axis, InertialSample, MotionSample, Point2, PoseFrame, PositionSample, RejectionCounts,
    RepetitionRecord, SessionSummary, SmoothnessSource, Vec3, VelocitySample, MAX_BUFFER_SAMPLES,
    MAX_SPAN_SAMPLES, RECENT_WINDOW_SECS,
};

/// Parámetros de la sesión que no dependen del ejercicio
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Brazo seguido por la cámara
    pub side: Side,
    /// Relación ancho/alto de la imagen de la cámara
    pub aspect_ratio: f64,
    pub smoothness: SmoothnessConfig,
    /// Margen previo al inicio de la repetición para el cálculo de suavidad
    pub smoothness_preroll_secs: f64,
    /// Espera máxima por resultados pendientes al terminar
    pub finalize_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            side: Side::Right,
            aspect_ratio: 1.0,
            smoothness: SmoothnessConfig::default(),
            smoothness_preroll_secs: 0.5,
            finalize_timeout: Duration::from_secs(2),
        }
    }
}

/// Lo que la sesión comunica hacia fuera tras cada muestra
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    BaselineEstablished(Vec3),
    /// Repetición confirmada; su registro llega cuando termine la suavidad
    RepetitionDetected { index: usize, rom_deg: f64 },
    /// Registro definitivo (inmutable)
    Repetition(RepetitionRecord),
    Rejected { reason: RejectionReason, at: f64 },
    /// Suavidad filtrada para mostrar al usuario
    SmoothnessUpdate { published: f64 },
}

#[derive(Debug, Clone)]
struct PendingRep {
    start: f64,
    end: f64,
    rom_deg: f64,
    low_confidence: bool,
}

/// Una sesión de ejercicio: posee el buffer, el detector, la línea base y
/// los registros. No hay estado global; cada sesión es un valor propio.
pub struct ExerciseSession {
    profile: MovementProfile,
    config: SessionConfig,
    trajectory: TrajectoryBuffer<PositionSample>,
    span: TrajectoryBuffer<PositionSample>,
    velocity_span: TrajectoryBuffer<VelocitySample>,
    baseline: Baseline,
    rom: RomCalculator,
    detector: Detector,
    selector: PlaneSelector,
    sign_axis: Option<Axis>,
    imu: ImuConditioner,
    pose: PoseConditioner,
    worker: SmoothnessWorker,
    publisher: SmoothnessPublisher,
    source: SmoothnessSource,
    pending: BTreeMap<usize, PendingRep>,
    records: Vec<RepetitionRecord>,
    rejections: RejectionCounts,
    excluded_samples: usize,
    last_excluded_at: Option<f64>,
    elbow_angle_deg: Option<f64>,
    next_index: usize,
    ended: bool,
}

impl ExerciseSession {
    pub fn new(profile: MovementProfile, config: SessionConfig) -> Result<Self, SessionError> {
        profile.validate()?;

        let length = profile.segment_length_m;
        let motion_floor = (length * profile.thresholds.base_threshold.to_radians().sin()).powi(2) / 16.0;
        let hint = profile.axis_hint.axis();
        let reevaluate = profile.motion_class == MotionClass::Mixed;

        let worker = SmoothnessWorker::spawn(config.smoothness.clone())?;
        info!(
            "Sesión '{}' iniciada ({:?}, L = {:.2})",
            profile.name, profile.motion_class, length
        );

        Ok(Self {
            trajectory: TrajectoryBuffer::new(MAX_BUFFER_SAMPLES),
            span: TrajectoryBuffer::new(MAX_SPAN_SAMPLES),
            velocity_span: TrajectoryBuffer::new(MAX_SPAN_SAMPLES),
            baseline: Baseline::default(),
            rom: RomCalculator::new(length),
            detector: Detector::for_profile(&profile),
            selector: PlaneSelector::new(hint, reevaluate, motion_floor),
            sign_axis: None,
            imu: ImuConditioner::new(length, hint),
            pose: PoseConditioner::new(profile.confidence_floor, config.side)
                .with_aspect_ratio(config.aspect_ratio),
            worker,
            publisher: SmoothnessPublisher::new(profile.smoothing_alpha),
            source: SmoothnessSource::Trajectory,
            pending: BTreeMap::new(),
            records: Vec::new(),
            rejections: RejectionCounts::default(),
            excluded_samples: 0,
            last_excluded_at: None,
            elbow_angle_deg: None,
            next_index: 0,
            ended: false,
            profile,
            config,
        })
    }

    pub fn profile(&self) -> &MovementProfile {
        &self.profile
    }

    /// Procesa una muestra. Los errores de una muestra concreta nunca
    /// terminan la sesión: solo `Ended` si ya se llamó a `end()`.
    pub fn process(&mut self, sample: MotionSample) -> Result<Vec<SessionEvent>, SessionError> {
        if self.ended {
            return Err(SessionError::Ended);
        }

        let mut events = Vec::new();
        for result in self.worker.try_results() {
            self.finalize(result, &mut events);
        }

        match sample {
            MotionSample::Position(s) => {
                self.source = SmoothnessSource::Trajectory;
                self.ingest(s, &mut events);
            }
            MotionSample::Inertial(s) => self.ingest_inertial(&s, &mut events),
            MotionSample::Pose(frame) => self.ingest_pose(&frame, &mut events),
        }
        Ok(events)
    }

    fn ingest_inertial(&mut self, sample: &InertialSample, events: &mut Vec<SessionEvent>) {
        self.source = SmoothnessSource::Imu;
        let Some(conditioned) = self.imu.condition(sample) else {
            return;
        };
        self.velocity_span.push(VelocitySample {
            timestamp: conditioned.timestamp,
            velocity: conditioned.velocity,
        });
        self.ingest(
            PositionSample::new(conditioned.timestamp, conditioned.point),
            events,
        );
    }

    fn ingest_pose(&mut self, frame: &PoseFrame, events: &mut Vec<SessionEvent>) {
        self.source = SmoothnessSource::Vision;
        match self.pose.condition(frame) {
            Ok(conditioned) => {
                self.elbow_angle_deg = conditioned.elbow_angle_deg;
                self.ingest(
                    PositionSample::new(conditioned.timestamp, conditioned.point),
                    events,
                );
            }
            Err(err @ MotionError::LowConfidenceInput { .. }) => {
                debug!("Frame excluido (t={:.3}): {}", frame.timestamp, err);
                self.exclude(frame.timestamp);
            }
            Err(err) => {
                warn!("Frame descartado (t={:.3}): {}", frame.timestamp, err);
                self.exclude(frame.timestamp);
            }
        }
    }

    fn exclude(&mut self, timestamp: f64) {
        self.excluded_samples += 1;
        self.last_excluded_at = Some(timestamp);
    }

    fn ingest(&mut self, sample: PositionSample, events: &mut Vec<SessionEvent>) {
        if !sample.position.is_finite() {
            warn!("Posición no finita descartada (t={:.3})", sample.timestamp);
            self.exclude(sample.timestamp);
            return;
        }
        if !self.trajectory.push(sample) {
            return;
        }
        self.span.push(sample);

        let was_established = self.baseline.is_established();
        let Some(baseline) = self.baseline.observe(sample.position) else {
            return;
        };
        if !was_established {
            events.push(SessionEvent::BaselineEstablished(baseline));
        }

        let newly_locked = self.update_plane();
        if newly_locked && self.detector.is_circular() {
            // Lo que ocurrió mientras se elegía el plano también cuenta
            for earlier in self.trajectory.window(RECENT_WINDOW_SECS) {
                if earlier.timestamp < sample.timestamp {
                    self.feed_detector(baseline, earlier, events);
                }
            }
        }
        self.feed_detector(baseline, sample, events);
    }

    fn feed_detector(&mut self, baseline: Vec3, sample: PositionSample, events: &mut Vec<SessionEvent>) {
        let input = if self.detector.is_circular() {
            let Some(plane) = self.selector.current() else {
                return;
            };
            DetectorInput::Point(plane.project(sample.position))
        } else {
            match self.signed_displacement(baseline, sample.position) {
                Ok(value) => DetectorInput::Signal(value),
                Err(err) => {
                    warn!("Desplazamiento no disponible: {}", err);
                    return;
                }
            }
        };

        match self.detector.update(sample.timestamp, input) {
            DetectorStep::Idle | DetectorStep::Tracking { .. } => {}
            DetectorStep::Rejected(reason) => self.reject(reason, sample.timestamp, events),
            DetectorStep::Candidate(candidate) => self.evaluate(candidate, baseline, events),
        }
    }

    /// Ángulo de la cuerda respecto a la línea base, con el signo del eje
    /// principal del plano (cambia al cruzar la vertical del péndulo)
    fn signed_displacement(&self, baseline: Vec3, position: Vec3) -> Result<f64, MotionError> {
        let magnitude = self.rom.displacement_angle(baseline, position)?;
        let sign = match self.sign_axis {
            Some(axis) if (position - baseline).component(axis) < 0.0 => -1.0,
            _ => 1.0,
        };
        Ok(sign * magnitude)
    }

    /// Devuelve `true` si el plano se acaba de fijar por primera vez
    fn update_plane(&mut self) -> bool {
        let before = self.selector.current();
        let reevaluate = self.profile.motion_class == MotionClass::Mixed;
        if before.is_some() && (!reevaluate || self.detector.state() != DetectorState::Idle) {
            return false;
        }

        let window: Vec<Vec3> = self
            .trajectory
            .window(RECENT_WINDOW_SECS)
            .iter()
            .map(|s| s.position)
            .collect();
        let after = match self.source {
            // El péndulo reconstruido desde el giróscopo vive en ese plano
            SmoothnessSource::Imu => self.selector.lock(ImuConditioner::PLANE),
            _ => self.selector.select(&window),
        };
        if after != before {
            self.sign_axis = after.map(|plane| principal_axis(plane, &window));
        }
        before.is_none() && after.is_some()
    }

    fn project_span(&self, points: &[Vec3]) -> Option<(Plane, Vec<Point2>)> {
        if let Some(plane) = self.selector.current() {
            return Some((plane, points.iter().map(|&p| plane.project(p)).collect()));
        }
        match plane_projector::project(points, self.profile.axis_hint.axis()) {
            Projection::Planar { plane, points } => Some((plane, points)),
            Projection::Degenerate { .. } => None,
        }
    }

    fn compute_rom(&self, candidate: &RepCandidate, baseline: Vec3) -> Result<f64, MotionError> {
        let points: Vec<Vec3> = self
            .span
            .since(candidate.onset)
            .iter()
            .filter(|s| s.timestamp <= candidate.end)
            .map(|s| s.position)
            .collect();

        let (plane, projected) = self
            .project_span(&points)
            .ok_or_else(|| MotionError::insufficient(2, points.len()))?;

        if self.detector.is_circular() {
            self.rom.circular(&projected)
        } else {
            self.rom.linear(plane.project(baseline), &projected)
        }
    }

    fn evaluate(&mut self, candidate: RepCandidate, baseline: Vec3, events: &mut Vec<SessionEvent>) {
        let rom_deg = match self.compute_rom(&candidate, baseline) {
            Ok(deg) => deg,
            Err(err) => {
                debug!("ROM no disponible: {}", err);
                self.reject(RejectionReason::from(&err), candidate.end, events);
                return;
            }
        };

        if rom_deg < self.profile.thresholds.minimum_rom_deg {
            debug!(
                "Repetición rechazada ({}): ROM {:.1}° < {:.1}°",
                RejectionReason::MinimumRom,
                rom_deg,
                self.profile.thresholds.minimum_rom_deg
            );
            self.reject(RejectionReason::MinimumRom, candidate.end, events);
            return;
        }

        self.detector.confirm(&candidate);
        let index = self.next_index;
        self.next_index += 1;
        info!(
            "✅ Repetición #{} ({:.2}s → {:.2}s): ROM {:.1}°",
            index + 1,
            candidate.start,
            candidate.end,
            rom_deg
        );

        self.pending.insert(
            index,
            PendingRep {
                start: candidate.start,
                end: candidate.end,
                rom_deg,
                low_confidence: self.last_excluded_at.is_some_and(|t| t >= candidate.onset),
            },
        );
        events.push(SessionEvent::RepetitionDetected { index, rom_deg });

        let job = SmoothnessJob {
            rep_index: index,
            input: self.smoothness_input(&candidate),
        };
        if let Err(err) = self.worker.submit(job) {
            warn!("Suavidad no disponible para rep #{}: {}", index + 1, err);
            self.finalize(
                SmoothnessResult {
                    rep_index: index,
                    outcome: Err(MotionError::insufficient(0, 0)),
                },
                events,
            );
        }
        self.trim_span(candidate.end);
    }

    fn smoothness_input(&self, candidate: &RepCandidate) -> SmoothnessInput {
        let from = candidate.onset - self.config.smoothness_preroll_secs;
        match self.source {
            SmoothnessSource::Imu => SmoothnessInput::Velocity(
                self.velocity_span
                    .since(from)
                    .into_iter()
                    .filter(|s| s.timestamp <= candidate.end)
                    .collect(),
            ),
            source => SmoothnessInput::Trajectory {
                samples: self
                    .span
                    .since(from)
                    .into_iter()
                    .filter(|s| s.timestamp <= candidate.end)
                    .collect(),
                source,
            },
        }
    }

    fn reject(&mut self, reason: RejectionReason, at: f64, events: &mut Vec<SessionEvent>) {
        self.rejections.record(reason);
        events.push(SessionEvent::Rejected { reason, at });
        self.trim_span(at);
    }

    /// Descarta el tramo anterior a `end` (la línea base no se toca)
    fn trim_span(&mut self, end: f64) {
        let keep = self.span.since(end);
        self.span.clear();
        for s in keep {
            self.span.push(s);
        }
        let keep = self.velocity_span.since(end);
        self.velocity_span.clear();
        for s in keep {
            self.velocity_span.push(s);
        }
    }

    fn finalize(&mut self, result: SmoothnessResult, events: &mut Vec<SessionEvent>) {
        // Cada resultado se entrega una sola vez
        let Some(pending) = self.pending.remove(&result.rep_index) else {
            debug!("Resultado de suavidad tardío o duplicado: #{}", result.rep_index);
            return;
        };

        let (smoothness, confidence, source) = match result.outcome {
            Ok(score) => {
                let published = self.publisher.publish(score.score);
                events.push(SessionEvent::SmoothnessUpdate { published });
                (Some(score.score), Some(score.confidence), Some(score.source))
            }
            Err(err) => {
                debug!("Suavidad no disponible para rep #{}: {}", result.rep_index + 1, err);
                (None, None, None)
            }
        };

        let record = RepetitionRecord {
            index: result.rep_index,
            start: pending.start,
            end: pending.end,
            rom_deg: pending.rom_deg,
            smoothness,
            smoothness_confidence: confidence,
            smoothness_source: source,
            low_confidence: pending.low_confidence,
        };
        self.records.push(record.clone());
        self.records.sort_by_key(|r| r.index);
        events.push(SessionEvent::Repetition(record));
    }

    /// Nueva línea base con las próximas muestras (el brazo debe estar en reposo)
    pub fn recalibrate(&mut self) {
        info!("🔄 Recalibrando línea base");
        self.baseline.recalibrate();
        self.selector.reset();
        self.sign_axis = None;
        self.detector.reset();
        self.imu.reset();
        self.trajectory.clear();
        self.clear_span();
    }

    /// Vacía el tramo en curso sin tocar la línea base
    pub fn clear_span(&mut self) {
        self.span.clear();
        self.velocity_span.clear();
    }

    pub fn baseline(&self) -> Option<Vec3> {
        self.baseline.reference()
    }

    pub fn plane(&self) -> Option<Plane> {
        self.selector.current()
    }

    /// Flexión del codo del último frame de cámara aceptado
    pub fn elbow_angle_deg(&self) -> Option<f64> {
        self.elbow_angle_deg
    }

    /// Repeticiones confirmadas (incluidas las que esperan su suavidad)
    pub fn rep_count(&self) -> usize {
        self.next_index
    }

    /// Registros definitivos
    pub fn records(&self) -> &[RepetitionRecord] {
        &self.records
    }

    pub fn rejections(&self) -> &RejectionCounts {
        &self.rejections
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary::from_records(&self.records, self.rejections.clone(), self.excluded_samples)
    }

    /// Termina la sesión: espera (con límite) los resultados pendientes y
    /// declara no disponibles los que no lleguen
    pub fn end(&mut self) -> Result<SessionSummary, SessionError> {
        self.finish().map(|(summary, _)| summary)
    }

    /// Como `end`, pero devuelve también los eventos de las repeticiones
    /// finalizadas durante el cierre
    pub fn finish(&mut self) -> Result<(SessionSummary, Vec<SessionEvent>), SessionError> {
        if self.ended {
            return Err(SessionError::Ended);
        }
        self.ended = true;

        let deadline = Instant::now() + self.config.finalize_timeout;
        let mut events = Vec::new();
        while !self.pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.worker.recv_timeout(remaining) {
                Ok(Some(result)) => self.finalize(result, &mut events),
                Ok(None) => break,
                Err(err) => {
                    warn!("{}", err);
                    break;
                }
            }
        }

        let unavailable: Vec<usize> = self.pending.keys().copied().collect();
        for rep_index in unavailable {
            warn!("Suavidad de la rep #{} no llegó a tiempo", rep_index + 1);
            self.finalize(
                SmoothnessResult {
                    rep_index,
                    outcome: Err(MotionError::insufficient(0, 0)),
                },
                &mut events,
            );
        }

        let summary = self.summary();
        info!(
            "🏁 Sesión '{}' terminada: {} repeticiones, ROM máx {:.1}°",
            self.profile.name, summary.total_reps, summary.max_rom_deg
        );
        Ok((summary, events))
    }
}

/// Eje del plano con más varianza: su componente da el signo del desplazamiento
fn principal_axis(plane: Plane, window: &[Vec3]) -> Axis {
    let variance = axis_variance(window);
    let (a, b) = plane.axes();
    if variance[b as usize] > variance[a as usize] {
        b
    } else {
        a
    }
}
