use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::types::Axis;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Perfil inválido: {0}")]
    Invalid(String),
}

/// Tipo de movimiento del ejercicio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionClass {
    Pendulum,
    Circular,
    Linear,
    Mixed,
}

/// Pista del eje dominante del movimiento
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisHint {
    #[default]
    None,
    X,
    Y,
    Z,
}

impl AxisHint {
    pub fn axis(self) -> Option<Axis> {
        match self {
            AxisHint::None => None,
            AxisHint::X => Some(Axis::X),
            AxisHint::Y => Some(Axis::Y),
            AxisHint::Z => Some(Axis::Z),
        }
    }
}

/// Umbrales del detector de repeticiones.
/// `base_threshold` está en grados de desplazamiento angular.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorThresholds {
    /// Umbral base / amplitud mínima (default: 5.0°)
    pub base_threshold: f64,
    /// Activación de pico (default: 1.8 × base)
    pub peak_activation_multiplier: f64,
    /// Valle / retorno (default: 0.3 × base)
    pub valley_threshold_multiplier: f64,
    /// Validación estricta del pico (default: 1.98 × base)
    pub strict_peak_validation_multiplier: f64,
    /// ROM mínimo para contar la repetición (default: 5°)
    pub minimum_rom_deg: f64,
    /// Rotación acumulada para una vuelta completa (default: 340°)
    pub rotation_threshold_deg: f64,
    /// Tiempo máximo para completar una vuelta (default: 8 s)
    pub max_rotation_window_secs: f64,
}

impl Default for DetectorThresholds {
    fn default() -> Self {
        Self {
            base_threshold: 5.0,
            peak_activation_multiplier: 1.8,
            valley_threshold_multiplier: 0.3,
            strict_peak_validation_multiplier: 1.98,
            minimum_rom_deg: 5.0,
            rotation_threshold_deg: 340.0,
            max_rotation_window_secs: 8.0,
        }
    }
}

impl DetectorThresholds {
    pub fn activation(&self) -> f64 {
        self.peak_activation_multiplier * self.base_threshold
    }

    pub fn valley(&self) -> f64 {
        self.valley_threshold_multiplier * self.base_threshold
    }

    pub fn strict_peak(&self) -> f64 {
        self.strict_peak_validation_multiplier * self.base_threshold
    }
}

/// Configuración de un tipo de ejercicio (calibración + selección de ejercicio).
/// Se trata como entrada de solo lectura.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementProfile {
    pub name: String,
    pub motion_class: MotionClass,
    #[serde(default)]
    pub axis_hint: AxisHint,
    /// Distancia pivote-sensor (hombro → muñeca) en metros, o en alturas de
    /// imagen para la cámara
    pub segment_length_m: f64,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: f64,
    #[serde(default)]
    pub thresholds: DetectorThresholds,
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
    #[serde(default = "default_smoothing_alpha")]
    pub smoothing_alpha: f64,
}

fn default_cooldown() -> f64 {
    0.3
}

fn default_confidence_floor() -> f64 {
    0.2
}

fn default_smoothing_alpha() -> f64 {
    0.3
}

impl MovementProfile {
    fn preset(name: &str, motion_class: MotionClass, cooldown_secs: f64) -> Self {
        Self {
            name: name.to_string(),
            motion_class,
            axis_hint: AxisHint::None,
            segment_length_m: 0.6,
            cooldown_secs,
            thresholds: DetectorThresholds::default(),
            confidence_floor: default_confidence_floor(),
            smoothing_alpha: default_smoothing_alpha(),
        }
    }

    /// Péndulo de Codman: balanceo con el brazo colgando.
    ///
    /// Cuenta una repetición por ciclo: la media oscilación de vuelta empieza
    /// justo al acabar la de ida y cae dentro del cooldown. Ver
    /// [`MovementProfile::min_pendulum_period_secs`].
    pub fn pendulum() -> Self {
        Self::preset("pendulo", MotionClass::Pendulum, 0.3)
    }

    /// Círculos con el brazo extendido
    pub fn circular() -> Self {
        Self::preset("circulos", MotionClass::Circular, 0.5)
    }

    /// Elevaciones (frontal / lateral)
    pub fn linear() -> Self {
        Self::preset("elevacion", MotionClass::Linear, 0.65)
    }

    /// Movimiento libre: el plano se reevalúa en cada ventana de detección
    pub fn mixed() -> Self {
        Self::preset("mixto", MotionClass::Mixed, 0.4)
    }

    /// Preset por nombre (`pendulo`, `circulos`, `elevacion`, `mixto`)
    pub fn by_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "pendulo" | "pendulum" => Some(Self::pendulum()),
            "circulos" | "circular" => Some(Self::circular()),
            "elevacion" | "linear" => Some(Self::linear()),
            "mixto" | "mixed" => Some(Self::mixed()),
            _ => None,
        }
    }

    /// Periodo de balanceo más corto con el que se cuentan todos los ciclos.
    ///
    /// Cada ida debe empezar `cooldown_secs` después del final de la anterior,
    /// y entre ambas solo hay medio periodo. Con balanceos más rápidos se
    /// pierde uno de cada dos ciclos.
    pub fn min_pendulum_period_secs(&self) -> f64 {
        2.0 * self.cooldown_secs
    }

    pub fn with_segment_length(mut self, segment_length_m: f64) -> Self {
        self.segment_length_m = segment_length_m;
        self
    }

    pub fn with_cooldown(mut self, cooldown_secs: f64) -> Self {
        self.cooldown_secs = cooldown_secs;
        self
    }

    pub fn with_axis_hint(mut self, axis_hint: AxisHint) -> Self {
        self.axis_hint = axis_hint;
        self
    }

    pub fn with_thresholds(mut self, thresholds: DetectorThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Carga un perfil desde un JSON
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ProfileError> {
        let profile: MovementProfile = serde_json::from_str(content)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        let positive = |value: f64, field: &str| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ProfileError::Invalid(format!(
                    "{} debe ser positivo (valor: {})",
                    field, value
                )))
            }
        };

        positive(self.segment_length_m, "segment_length_m")?;
        positive(self.thresholds.base_threshold, "base_threshold")?;
        positive(self.thresholds.rotation_threshold_deg, "rotation_threshold_deg")?;
        positive(
            self.thresholds.max_rotation_window_secs,
            "max_rotation_window_secs",
        )?;

        if !(self.cooldown_secs.is_finite() && self.cooldown_secs >= 0.0) {
            return Err(ProfileError::Invalid(format!(
                "cooldown_secs inválido: {}",
                self.cooldown_secs
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_floor) {
            return Err(ProfileError::Invalid(format!(
                "confidence_floor fuera de [0, 1]: {}",
                self.confidence_floor
            )));
        }
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return Err(ProfileError::Invalid(format!(
                "smoothing_alpha fuera de (0, 1]: {}",
                self.smoothing_alpha
            )));
        }
        let t = &self.thresholds;
        if t.valley() >= t.activation() {
            return Err(ProfileError::Invalid(
                "umbrales incoherentes: se requiere valle < activación".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        for profile in [
            MovementProfile::pendulum(),
            MovementProfile::circular(),
            MovementProfile::linear(),
            MovementProfile::mixed(),
        ] {
            assert!(profile.validate().is_ok(), "{} inválido", profile.name);
        }
    }

    #[test]
    fn json_fills_defaults() {
        let json = r#"{
            "name": "elevacion-lateral",
            "motion_class": "linear",
            "axis_hint": "y",
            "segment_length_m": 0.55
        }"#;
        let profile = MovementProfile::from_json_str(json).unwrap();
        assert_eq!(profile.motion_class, MotionClass::Linear);
        assert_eq!(profile.axis_hint.axis(), Some(Axis::Y));
        assert_eq!(profile.thresholds, DetectorThresholds::default());
        assert_eq!(profile.cooldown_secs, 0.3);
        assert_eq!(profile.confidence_floor, 0.2);
    }

    #[test]
    fn zero_segment_length_is_rejected() {
        let json = r#"{ "name": "x", "motion_class": "pendulum", "segment_length_m": 0.0 }"#;
        let err = MovementProfile::from_json_str(json).unwrap_err();
        assert!(matches!(err, ProfileError::Invalid(_)));
    }

    #[test]
    fn partial_thresholds_keep_remaining_defaults() {
        let json = r#"{
            "name": "circulos",
            "motion_class": "circular",
            "segment_length_m": 0.6,
            "thresholds": { "rotation_threshold_deg": 350.0 }
        }"#;
        let profile = MovementProfile::from_json_str(json).unwrap();
        assert_eq!(profile.thresholds.rotation_threshold_deg, 350.0);
        assert_eq!(profile.thresholds.base_threshold, 5.0);
    }

    #[test]
    fn threshold_helpers_apply_multipliers() {
        let t = DetectorThresholds::default();
        assert!((t.activation() - 9.0).abs() < 1e-9);
        assert!((t.valley() - 1.5).abs() < 1e-9);
        assert!((t.strict_peak() - 9.9).abs() < 1e-9);
    }

    #[test]
    fn presets_by_name() {
        assert_eq!(MovementProfile::by_name("Pendulo"), Some(MovementProfile::pendulum()));
        assert_eq!(
            MovementProfile::by_name("circulos").map(|p| p.motion_class),
            Some(MotionClass::Circular)
        );
        assert!(MovementProfile::by_name("sentadilla").is_none());
    }

    #[test]
    fn pendulum_period_limit_follows_cooldown() {
        assert!((MovementProfile::pendulum().min_pendulum_period_secs() - 0.6).abs() < 1e-12);
        let slow = MovementProfile::pendulum().with_cooldown(0.65);
        assert!((slow.min_pendulum_period_secs() - 1.3).abs() < 1e-12);
    }
}
