use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::{Add, Mul, Sub};

use crate::error::RejectionReason;

/// Constantes del sistema
pub const SAMPLING_RATE: f64 = 60.0; // Hz (tracking visual-inercial)
pub const MAX_BUFFER_SAMPLES: usize = 3000; // ~50 s a 60 Hz
pub const MAX_SPAN_SAMPLES: usize = 1024; // muestras máximas de una repetición en curso
pub const MIN_POINTS: usize = 8; // mínimo para calcular algo con sentido
pub const BASELINE_SAMPLES: usize = 10;
pub const RECENT_WINDOW_SECS: f64 = 2.5;

/// Vector 3D en metros (marco de tracking del mundo)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn norm(self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn distance(self, other: Self) -> f64 {
        (self - other).norm()
    }

    pub fn component(self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, rhs: Self) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, rhs: Self) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Vec3;
    fn mul(self, k: f64) -> Vec3 {
        Vec3::new(self.x * k, self.y * k, self.z * k)
    }
}

/// Punto proyectado sobre el plano de movimiento
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Self) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// Orden fijo de prioridad para desempates
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];
}

/// Todo lo que se guarda en un `TrajectoryBuffer` lleva marca de tiempo
pub trait Timestamped {
    fn timestamp(&self) -> f64;
}

/// Posición 3D del dispositivo (o articulación normalizada con z = 0)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub timestamp: f64,
    pub position: Vec3,
}

impl PositionSample {
    pub fn new(timestamp: f64, position: Vec3) -> Self {
        Self { timestamp, position }
    }
}

impl Timestamped for PositionSample {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

/// Velocidad estimada a partir de la IMU
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocitySample {
    pub timestamp: f64,
    pub velocity: Vec3,
}

impl Timestamped for VelocitySample {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

/// Muestra cruda de acelerómetro (m/s², con gravedad) y giróscopo (rad/s)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InertialSample {
    pub timestamp: f64,
    pub accel: Vec3,
    pub gyro: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Joint {
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
}

impl Joint {
    pub fn parse(name: &str) -> Option<Self> {
        let joint = match name.trim().to_lowercase().as_str() {
            "left_shoulder" => Joint::LeftShoulder,
            "right_shoulder" => Joint::RightShoulder,
            "left_elbow" => Joint::LeftElbow,
            "right_elbow" => Joint::RightElbow,
            "left_wrist" => Joint::LeftWrist,
            "right_wrist" => Joint::RightWrist,
            "left_hip" => Joint::LeftHip,
            "right_hip" => Joint::RightHip,
            _ => return None,
        };
        Some(joint)
    }
}

/// Articulación en coordenadas de pantalla normalizadas (0–1) con confianza 0–1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f64,
    pub y: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PoseFrame {
    pub timestamp: f64,
    pub joints: HashMap<Joint, Keypoint>,
}

impl PoseFrame {
    pub fn new(timestamp: f64) -> Self {
        Self {
            timestamp,
            joints: HashMap::new(),
        }
    }

    pub fn with_joint(mut self, joint: Joint, x: f64, y: f64, confidence: f64) -> Self {
        self.joints.insert(joint, Keypoint { x, y, confidence });
        self
    }
}

/// Una observación de la fuente de movimiento
#[derive(Debug, Clone, PartialEq)]
pub enum MotionSample {
    Position(PositionSample),
    Inertial(InertialSample),
    Pose(PoseFrame),
}

impl MotionSample {
    pub fn timestamp(&self) -> f64 {
        match self {
            MotionSample::Position(s) => s.timestamp,
            MotionSample::Inertial(s) => s.timestamp,
            MotionSample::Pose(f) => f.timestamp,
        }
    }
}

/// Origen del cálculo de suavidad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmoothnessSource {
    Trajectory,
    Imu,
    Vision,
}

/// Puntuación de suavidad 0–100 (más alto = más suave)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothnessScore {
    pub score: f64,
    pub confidence: f64,
    pub source: SmoothnessSource,
}

/// Unidad de salida: una repetición finalizada. Inmutable tras su creación.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepetitionRecord {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub rom_deg: f64,
    pub smoothness: Option<f64>,
    pub smoothness_confidence: Option<f64>,
    pub smoothness_source: Option<SmoothnessSource>,
    /// Hubo muestras excluidas por confianza baja durante la repetición
    pub low_confidence: bool,
}

/// Contadores de repeticiones rechazadas, por motivo
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionCounts {
    pub amplitude: usize,
    pub cooldown: usize,
    pub minimum_rom: usize,
    pub timeout: usize,
    pub non_finite: usize,
    pub insufficient_data: usize,
}

impl RejectionCounts {
    pub fn record(&mut self, reason: RejectionReason) {
        match reason {
            RejectionReason::Amplitude => self.amplitude += 1,
            RejectionReason::Cooldown => self.cooldown += 1,
            RejectionReason::MinimumRom => self.minimum_rom += 1,
            RejectionReason::Timeout => self.timeout += 1,
            RejectionReason::NonFinite => self.non_finite += 1,
            RejectionReason::InsufficientData => self.insufficient_data += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.amplitude
            + self.cooldown
            + self.minimum_rom
            + self.timeout
            + self.non_finite
            + self.insufficient_data
    }
}

/// Resumen agregado de una sesión de ejercicio
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_reps: usize,
    pub max_rom_deg: f64,
    pub average_rom_deg: f64,
    pub average_smoothness: Option<f64>,
    pub rom_per_rep: Vec<f64>,
    pub smoothness_per_rep: Vec<Option<f64>>,
    pub rejections: RejectionCounts,
    pub excluded_samples: usize,
}

impl SessionSummary {
    pub fn from_records(
        records: &[RepetitionRecord],
        rejections: RejectionCounts,
        excluded_samples: usize,
    ) -> Self {
        let rom_per_rep: Vec<f64> = records.iter().map(|r| r.rom_deg).collect();
        let smoothness_per_rep: Vec<Option<f64>> = records.iter().map(|r| r.smoothness).collect();

        let max_rom_deg = rom_per_rep.iter().cloned().fold(0.0, f64::max);
        let average_rom_deg = if rom_per_rep.is_empty() {
            0.0
        } else {
            rom_per_rep.iter().sum::<f64>() / rom_per_rep.len() as f64
        };

        let scored: Vec<f64> = smoothness_per_rep.iter().flatten().cloned().collect();
        let average_smoothness = if scored.is_empty() {
            None
        } else {
            Some(scored.iter().sum::<f64>() / scored.len() as f64)
        };

        Self {
            total_reps: records.len(),
            max_rom_deg,
            average_rom_deg,
            average_smoothness,
            rom_per_rep,
            smoothness_per_rep,
            rejections,
            excluded_samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize, rom: f64, smoothness: Option<f64>) -> RepetitionRecord {
        RepetitionRecord {
            index,
            start: index as f64,
            end: index as f64 + 0.8,
            rom_deg: rom,
            smoothness,
            smoothness_confidence: smoothness.map(|_| 0.9),
            smoothness_source: smoothness.map(|_| SmoothnessSource::Trajectory),
            low_confidence: false,
        }
    }

    #[test]
    fn summary_aggregates_rom_and_smoothness() {
        let records = vec![
            record(0, 40.0, Some(80.0)),
            record(1, 60.0, None),
            record(2, 50.0, Some(60.0)),
        ];
        let summary = SessionSummary::from_records(&records, RejectionCounts::default(), 3);

        assert_eq!(summary.total_reps, 3);
        assert_eq!(summary.max_rom_deg, 60.0);
        assert!((summary.average_rom_deg - 50.0).abs() < 1e-9);
        // Las repeticiones sin suavidad no cuentan en la media
        assert_eq!(summary.average_smoothness, Some(70.0));
        assert_eq!(summary.smoothness_per_rep, vec![Some(80.0), None, Some(60.0)]);
        assert_eq!(summary.excluded_samples, 3);
    }

    #[test]
    fn empty_summary_has_no_smoothness() {
        let summary = SessionSummary::from_records(&[], RejectionCounts::default(), 0);
        assert_eq!(summary.total_reps, 0);
        assert_eq!(summary.average_rom_deg, 0.0);
        assert!(summary.average_smoothness.is_none());
    }

    #[test]
    fn joint_names_parse_case_insensitive() {
        assert_eq!(Joint::parse("Right_Wrist"), Some(Joint::RightWrist));
        assert_eq!(Joint::parse("nose"), None);
    }
}
