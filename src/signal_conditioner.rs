use std::f64::consts::PI;

use log::{debug, warn};

use crate::error::MotionError;
use crate::plane_projector::Plane;
use crate::types::{Axis, InertialSample, Joint, Keypoint, Point2, PoseFrame, Vec3};

/// Muestras usadas para la estimación inicial de la gravedad
pub const GRAVITY_CALIBRATION_SAMPLES: usize = 30;
/// Seguimiento lento de la gravedad tras la calibración
const GRAVITY_TRACKING_ALPHA: f64 = 0.02;
/// Amortiguación por paso de la velocidad integrada
pub const VELOCITY_DAMPING: f64 = 0.95;

const MIN_DT: f64 = 1.0 / 500.0;
const MAX_DT: f64 = 0.2;

/// Acota el intervalo entre muestras (tolerancia a frames perdidos)
pub fn clamp_dt(dt: f64) -> f64 {
    if dt.is_finite() {
        dt.clamp(MIN_DT, MAX_DT)
    } else {
        MIN_DT
    }
}

/// Estimación de la gravedad: media acumulada durante la ventana de
/// calibración y media exponencial lenta después.
#[derive(Debug, Clone, Default)]
pub struct GravityEstimator {
    estimate: Vec3,
    samples: usize,
}

impl GravityEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Actualiza la estimación y devuelve la aceleración de usuario
    pub fn update(&mut self, accel: Vec3) -> Vec3 {
        self.samples += 1;
        let alpha = if self.samples <= GRAVITY_CALIBRATION_SAMPLES {
            1.0 / self.samples as f64
        } else {
            GRAVITY_TRACKING_ALPHA
        };
        self.estimate = self.estimate * (1.0 - alpha) + accel * alpha;

        if self.samples == GRAVITY_CALIBRATION_SAMPLES {
            debug!("Gravedad calibrada: |g| = {:.3} m/s²", self.estimate.norm());
        }

        accel - self.estimate
    }

    pub fn is_calibrated(&self) -> bool {
        self.samples >= GRAVITY_CALIBRATION_SAMPLES
    }

    pub fn gravity(&self) -> Vec3 {
        self.estimate
    }
}

/// Integración de la aceleración con amortiguación por paso.
///
/// Es una aproximación deliberada (no un filtro de Kalman): el factor
/// `damping` acota la deriva de la doble integración a costa de subestimar
/// velocidades sostenidas.
#[derive(Debug, Clone)]
pub struct VelocityIntegrator {
    velocity: Vec3,
    damping: f64,
}

impl VelocityIntegrator {
    pub fn new(damping: f64) -> Self {
        Self {
            velocity: Vec3::ZERO,
            damping,
        }
    }

    pub fn update(&mut self, user_accel: Vec3, dt: f64) -> Vec3 {
        self.velocity = (self.velocity + user_accel * clamp_dt(dt)) * self.damping;
        self.velocity
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn reset(&mut self) {
        self.velocity = Vec3::ZERO;
    }
}

impl Default for VelocityIntegrator {
    fn default() -> Self {
        Self::new(VELOCITY_DAMPING)
    }
}

/// Integra la velocidad angular del giróscopo en los tres ejes y reporta el
/// ángulo del eje indicado o, sin pista, del eje con más energía.
#[derive(Debug, Clone, Default)]
pub struct RotationIntegrator {
    angles: [f64; 3],
    energy: [f64; 3],
    hint: Option<Axis>,
}

impl RotationIntegrator {
    pub fn new(hint: Option<Axis>) -> Self {
        Self {
            hint,
            ..Self::default()
        }
    }

    /// Devuelve el ángulo acumulado (grados) del eje dominante
    pub fn update(&mut self, gyro: Vec3, dt: f64) -> f64 {
        let dt = clamp_dt(dt);
        for (i, axis) in Axis::ALL.iter().enumerate() {
            let rate = gyro.component(*axis);
            self.angles[i] += rate * dt;
            self.energy[i] += rate * rate * dt;
        }
        self.angle_deg()
    }

    pub fn dominant_axis(&self) -> Axis {
        if let Some(axis) = self.hint {
            return axis;
        }
        let mut best = Axis::X;
        for axis in Axis::ALL {
            if self.energy[axis as usize] > self.energy[best as usize] {
                best = axis;
            }
        }
        best
    }

    pub fn angle_deg(&self) -> f64 {
        self.angles[self.dominant_axis() as usize].to_degrees()
    }

    pub fn reset(&mut self) {
        self.angles = [0.0; 3];
        self.energy = [0.0; 3];
    }
}

/// Salida del acondicionamiento IMU
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConditionedImu {
    pub timestamp: f64,
    pub velocity: Vec3,
    pub angle_deg: f64,
    /// Posición de péndulo reconstruida: L·(sin θ, −cos θ, 0)
    pub point: Vec3,
}

/// Acondicionador de la ruta inercial (acelerómetro + giróscopo)
#[derive(Debug, Clone)]
pub struct ImuConditioner {
    gravity: GravityEstimator,
    velocity: VelocityIntegrator,
    rotation: RotationIntegrator,
    segment_length: f64,
    last_timestamp: Option<f64>,
}

impl ImuConditioner {
    /// Plano donde se reconstruye el péndulo
    pub const PLANE: Plane = Plane::XY;

    pub fn new(segment_length: f64, hint: Option<Axis>) -> Self {
        Self {
            gravity: GravityEstimator::new(),
            velocity: VelocityIntegrator::default(),
            rotation: RotationIntegrator::new(hint),
            segment_length,
            last_timestamp: None,
        }
    }

    /// Devuelve `None` mientras la gravedad se está calibrando
    pub fn condition(&mut self, sample: &InertialSample) -> Option<ConditionedImu> {
        if !sample.accel.is_finite() || !sample.gyro.is_finite() {
            warn!("Muestra IMU no finita descartada (t={:.3})", sample.timestamp);
            return None;
        }

        let dt = self
            .last_timestamp
            .map(|prev| sample.timestamp - prev)
            .unwrap_or(MIN_DT);
        self.last_timestamp = Some(sample.timestamp);

        let user_accel = self.gravity.update(sample.accel);
        if !self.gravity.is_calibrated() {
            // El dispositivo debe estar quieto durante la calibración
            return None;
        }

        let velocity = self.velocity.update(user_accel, dt);
        let angle_deg = self.rotation.update(sample.gyro, dt);
        let theta = angle_deg.to_radians();
        let point = Vec3::new(
            self.segment_length * theta.sin(),
            -self.segment_length * theta.cos(),
            0.0,
        );

        Some(ConditionedImu {
            timestamp: sample.timestamp,
            velocity,
            angle_deg,
            point,
        })
    }

    pub fn reset(&mut self) {
        self.gravity = GravityEstimator::new();
        self.velocity.reset();
        self.rotation.reset();
        self.last_timestamp = None;
    }
}

// ========== Butterworth ==========

#[derive(Debug, Clone, Copy)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    /// Paso bajo de segundo orden por transformada bilineal
    fn lowpass(sample_rate: f64, cutoff_hz: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);
        let a0 = 1.0 + alpha;

        Self {
            b0: (1.0 - cos_w0) / 2.0 / a0,
            b1: (1.0 - cos_w0) / a0,
            b2: (1.0 - cos_w0) / 2.0 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// Forma directa I, con el estado inicial en régimen estacionario
    /// para el primer valor (ganancia DC = 1)
    fn run(&self, signal: &[f64]) -> Vec<f64> {
        let Some(&first) = signal.first() else {
            return Vec::new();
        };
        let (mut x1, mut x2, mut y1, mut y2) = (first, first, first, first);
        let mut out = Vec::with_capacity(signal.len());

        for &x0 in signal {
            let y0 = self.b0 * x0 + self.b1 * x1 + self.b2 * x2 - self.a1 * y1 - self.a2 * y2;
            x2 = x1;
            x1 = x0;
            y2 = y1;
            y1 = y0;
            out.push(y0);
        }
        out
    }
}

/// Paso bajo Butterworth de 4º orden (dos biquads en cascada)
#[derive(Debug, Clone)]
pub struct ButterworthLowPass {
    sections: [Biquad; 2],
}

impl ButterworthLowPass {
    pub fn new(sample_rate: f64, cutoff_hz: f64) -> Self {
        // La frecuencia de corte debe quedar por debajo de Nyquist
        let cutoff_hz = cutoff_hz.min(0.45 * sample_rate);
        let q1 = 1.0 / (2.0 * (PI / 8.0).cos());
        let q2 = 1.0 / (2.0 * (3.0 * PI / 8.0).cos());
        Self {
            sections: [
                Biquad::lowpass(sample_rate, cutoff_hz, q1),
                Biquad::lowpass(sample_rate, cutoff_hz, q2),
            ],
        }
    }

    /// Filtrado causal (con desfase)
    pub fn filter(&self, signal: &[f64]) -> Vec<f64> {
        let first = self.sections[0].run(signal);
        self.sections[1].run(&first)
    }

    /// Filtrado de fase cero: adelante y atrás, con extensión impar en los
    /// bordes para reducir transitorios
    pub fn filtfilt(&self, signal: &[f64]) -> Vec<f64> {
        let n = signal.len();
        if n < 2 {
            return signal.to_vec();
        }

        let pad = (n - 1).min(12);
        let first = signal[0];
        let last = signal[n - 1];

        let mut extended = Vec::with_capacity(n + 2 * pad);
        extended.extend((1..=pad).rev().map(|i| 2.0 * first - signal[i]));
        extended.extend_from_slice(signal);
        extended.extend((1..=pad).map(|i| 2.0 * last - signal[n - 1 - i]));

        let mut forward = self.filter(&extended);
        forward.reverse();
        let mut backward = self.filter(&forward);
        backward.reverse();

        backward[pad..pad + n].to_vec()
    }
}

// ========== Ruta de cámara ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Ángulo interior (grados) en `b` formado por `a-b-c`
pub fn joint_angle(a: Point2, b: Point2, c: Point2) -> Option<f64> {
    let (ux, uy) = (a.x - b.x, a.y - b.y);
    let (vx, vy) = (c.x - b.x, c.y - b.y);
    let nu = (ux * ux + uy * uy).sqrt();
    let nv = (vx * vx + vy * vy).sqrt();
    if nu < 1e-9 || nv < 1e-9 {
        return None;
    }
    let cos = ((ux * vx + uy * vy) / (nu * nv)).clamp(-1.0, 1.0);
    let angle = cos.acos().to_degrees();
    angle.is_finite().then_some(angle)
}

/// Salida del acondicionamiento de pose
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConditionedPose {
    pub timestamp: f64,
    /// Muñeca relativa al hombro, en alturas de imagen (z = 0)
    pub point: Vec3,
    /// Flexión del codo, si las tres articulaciones superan el umbral
    pub elbow_angle_deg: Option<f64>,
}

/// Acondicionador de la ruta de cámara.
///
/// Política de confianza: EXCLUIR. Si el hombro o la muñeca faltan o están
/// por debajo de `confidence_floor`, el frame entero se descarta con
/// `LowConfidenceInput`; no se extrapola desde otras articulaciones.
#[derive(Debug, Clone)]
pub struct PoseConditioner {
    confidence_floor: f64,
    side: Side,
    aspect_ratio: f64,
}

impl PoseConditioner {
    pub fn new(confidence_floor: f64, side: Side) -> Self {
        Self {
            confidence_floor,
            side,
            aspect_ratio: 1.0,
        }
    }

    /// Relación ancho/alto de la imagen
    pub fn with_aspect_ratio(mut self, aspect_ratio: f64) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    fn joints(&self) -> (Joint, Joint, Joint) {
        match self.side {
            Side::Left => (Joint::LeftShoulder, Joint::LeftElbow, Joint::LeftWrist),
            Side::Right => (Joint::RightShoulder, Joint::RightElbow, Joint::RightWrist),
        }
    }

    /// Coordenadas normalizadas de pantalla → plano isótropo con y hacia arriba
    pub fn to_screen_point(&self, kp: &Keypoint) -> Point2 {
        Point2::new(kp.x * self.aspect_ratio, 1.0 - kp.y)
    }

    fn reliable(&self, frame: &PoseFrame, joint: Joint) -> Result<Keypoint, MotionError> {
        let kp = frame.joints.get(&joint).copied().unwrap_or(Keypoint {
            x: 0.0,
            y: 0.0,
            confidence: 0.0,
        });
        if !(kp.confidence >= self.confidence_floor) {
            return Err(MotionError::LowConfidenceInput {
                joint,
                confidence: kp.confidence,
            });
        }
        if !kp.x.is_finite() || !kp.y.is_finite() {
            return Err(MotionError::NonFiniteResult("keypoint"));
        }
        Ok(kp)
    }

    pub fn condition(&self, frame: &PoseFrame) -> Result<ConditionedPose, MotionError> {
        let (shoulder_joint, elbow_joint, wrist_joint) = self.joints();
        let shoulder = self.to_screen_point(&self.reliable(frame, shoulder_joint)?);
        let wrist = self.to_screen_point(&self.reliable(frame, wrist_joint)?);

        let elbow_angle_deg = self
            .reliable(frame, elbow_joint)
            .ok()
            .and_then(|elbow| joint_angle(shoulder, self.to_screen_point(&elbow), wrist));

        Ok(ConditionedPose {
            timestamp: frame.timestamp,
            point: Vec3::new(wrist.x - shoulder.x, wrist.y - shoulder.y, 0.0),
            elbow_angle_deg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn gravity_is_removed_after_calibration() {
        let mut estimator = GravityEstimator::new();
        let g = Vec3::new(0.1, 9.8, 0.2);
        let mut user = Vec3::ZERO;
        for _ in 0..GRAVITY_CALIBRATION_SAMPLES {
            user = estimator.update(g);
        }
        assert!(estimator.is_calibrated());
        assert!(user.norm() < 1e-9);
        assert_relative_eq!(estimator.gravity().y, 9.8, epsilon = 1e-9);
    }

    #[test]
    fn damped_velocity_stays_bounded() {
        let mut integrator = VelocityIntegrator::default();
        // Sesgo constante del acelerómetro: sin amortiguación la velocidad crecería sin límite
        let bias = Vec3::new(0.05, 0.0, 0.0);
        let mut v = Vec3::ZERO;
        for _ in 0..10_000 {
            v = integrator.update(bias, 1.0 / 60.0);
        }
        // Límite geométrico: a·dt·d/(1−d)
        let bound = 0.05 / 60.0 * VELOCITY_DAMPING / (1.0 - VELOCITY_DAMPING);
        assert!(v.x <= bound + 1e-9);
        assert_relative_eq!(v.x, bound, epsilon = 1e-6);
    }

    #[test]
    fn rotation_follows_dominant_axis() {
        let mut rotation = RotationIntegrator::new(None);
        let mut angle = 0.0;
        // 1 rad/s alrededor de Z durante 1 s
        for _ in 0..60 {
            angle = rotation.update(Vec3::new(0.01, 0.0, 1.0), 1.0 / 60.0);
        }
        assert_eq!(rotation.dominant_axis(), Axis::Z);
        assert_relative_eq!(angle, 1.0f64.to_degrees(), epsilon = 1e-6);
    }

    #[test]
    fn imu_conditioner_waits_for_gravity_calibration() {
        let mut conditioner = ImuConditioner::new(0.6, Some(Axis::Z));
        let mut outputs = 0;
        for i in 0..40 {
            let sample = InertialSample {
                timestamp: i as f64 / 60.0,
                accel: Vec3::new(0.0, 9.81, 0.0),
                gyro: Vec3::ZERO,
            };
            if let Some(out) = conditioner.condition(&sample) {
                outputs += 1;
                assert_relative_eq!(out.point.y, -0.6, epsilon = 1e-9);
            }
        }
        assert_eq!(outputs, 40 - GRAVITY_CALIBRATION_SAMPLES + 1);
    }

    #[test]
    fn butterworth_passes_dc_and_attenuates_high_frequency() {
        let filter = ButterworthLowPass::new(120.0, 6.0);
        let dc = vec![2.0; 200];
        for v in filter.filtfilt(&dc) {
            assert_relative_eq!(v, 2.0, epsilon = 1e-9);
        }

        let fast: Vec<f64> = (0..240)
            .map(|i| (2.0 * PI * 30.0 * i as f64 / 120.0).sin())
            .collect();
        let filtered = filter.filtfilt(&fast);
        let peak = filtered[40..200].iter().fold(0.0f64, |m, v| m.max(v.abs()));
        assert!(peak < 0.01, "30 Hz debería quedar atenuado, pico={}", peak);
    }

    #[test]
    fn filtfilt_has_no_phase_lag() {
        let filter = ButterworthLowPass::new(120.0, 6.0);
        // Seno lento de 1 Hz: el máximo debe quedar en el mismo índice
        let slow: Vec<f64> = (0..240)
            .map(|i| (2.0 * PI * 1.0 * i as f64 / 120.0).sin())
            .collect();
        let filtered = filter.filtfilt(&slow);
        let argmax = |s: &[f64]| {
            s[60..180]
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap()
        };
        assert!((argmax(&slow) as i64 - argmax(&filtered) as i64).abs() <= 1);
    }

    #[test]
    fn low_confidence_wrist_is_excluded() {
        let conditioner = PoseConditioner::new(0.2, Side::Right);
        let frame = PoseFrame::new(0.0)
            .with_joint(Joint::RightShoulder, 0.5, 0.3, 0.9)
            .with_joint(Joint::RightWrist, 0.5, 0.7, 0.05);
        let err = conditioner.condition(&frame).unwrap_err();
        assert_eq!(
            err,
            MotionError::LowConfidenceInput {
                joint: Joint::RightWrist,
                confidence: 0.05
            }
        );
    }

    #[test]
    fn missing_joint_counts_as_zero_confidence() {
        let conditioner = PoseConditioner::new(0.2, Side::Left);
        let frame = PoseFrame::new(0.0).with_joint(Joint::LeftWrist, 0.5, 0.7, 0.9);
        assert!(matches!(
            conditioner.condition(&frame),
            Err(MotionError::LowConfidenceInput { joint: Joint::LeftShoulder, .. })
        ));
    }

    #[test]
    fn pose_point_is_wrist_relative_to_shoulder_with_y_up() {
        let conditioner = PoseConditioner::new(0.2, Side::Right).with_aspect_ratio(0.5);
        let frame = PoseFrame::new(1.0)
            .with_joint(Joint::RightShoulder, 0.4, 0.3, 0.9)
            .with_joint(Joint::RightElbow, 0.4, 0.5, 0.9)
            .with_joint(Joint::RightWrist, 0.6, 0.5, 0.9);
        let out = conditioner.condition(&frame).unwrap();
        assert_relative_eq!(out.point.x, 0.1, epsilon = 1e-12);
        assert_relative_eq!(out.point.y, -0.2, epsilon = 1e-12);
        // Hombro arriba, codo abajo, muñeca a un lado: 90°
        assert_relative_eq!(out.elbow_angle_deg.unwrap(), 90.0, epsilon = 1e-9);
    }

    #[test]
    fn joint_angle_straight_arm() {
        let angle = joint_angle(
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(2.0, 0.0),
        );
        assert_relative_eq!(angle.unwrap(), 180.0, epsilon = 1e-9);
        assert!(joint_angle(Point2::new(0.0, 0.0), Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)).is_none());
    }
}
