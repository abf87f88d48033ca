//! Rango de movimiento (ROM) por repetición y línea base de la sesión.

use log::{debug, info};

use crate::error::MotionError;
use crate::types::{Point2, Vec3, BASELINE_SAMPLES, MIN_POINTS};

/// Techo geométrico del ROM circular: un círculo trazado a la distancia del
/// segmento no puede superar 90° de semiángulo con este modelo de proyección
pub const CIRCULAR_ROM_CEILING_DEG: f64 = 90.0;
pub const LINEAR_ROM_CEILING_DEG: f64 = 180.0;

/// Posición de referencia de la sesión.
///
/// Se establece una sola vez con la media de las primeras muestras y solo
/// cambia con `recalibrate()`; limpiar el tramo de una repetición no la toca.
#[derive(Debug, Clone)]
pub struct Baseline {
    required: usize,
    pending: Vec<Vec3>,
    reference: Option<Vec3>,
}

impl Baseline {
    pub fn new(required: usize) -> Self {
        Self {
            required: required.max(1),
            pending: Vec::with_capacity(required),
            reference: None,
        }
    }

    /// Observa una posición; devuelve la referencia si ya está establecida
    pub fn observe(&mut self, position: Vec3) -> Option<Vec3> {
        if self.reference.is_some() {
            return self.reference;
        }
        if !position.is_finite() {
            return None;
        }

        self.pending.push(position);
        if self.pending.len() >= self.required {
            let n = self.pending.len() as f64;
            let mean = self.pending.iter().fold(Vec3::ZERO, |acc, &p| acc + p) * (1.0 / n);
            info!(
                "📍 Línea base establecida: ({:.3}, {:.3}, {:.3})",
                mean.x, mean.y, mean.z
            );
            self.reference = Some(mean);
            self.pending.clear();
        }
        self.reference
    }

    pub fn reference(&self) -> Option<Vec3> {
        self.reference
    }

    pub fn is_established(&self) -> bool {
        self.reference.is_some()
    }

    /// Vuelve a calibrar con las siguientes muestras
    pub fn recalibrate(&mut self) {
        debug!("Línea base descartada, recalibrando");
        self.reference = None;
        self.pending.clear();
    }
}

impl Default for Baseline {
    fn default() -> Self {
        Self::new(BASELINE_SAMPLES)
    }
}

/// Cálculo de ROM en grados a partir de la longitud del segmento
#[derive(Debug, Clone, Copy)]
pub struct RomCalculator {
    segment_length: f64,
}

impl RomCalculator {
    pub fn new(segment_length: f64) -> Self {
        Self { segment_length }
    }

    pub fn segment_length(&self) -> f64 {
        self.segment_length
    }

    fn check_segment(&self) -> Result<f64, MotionError> {
        if self.segment_length.is_finite() && self.segment_length > 0.0 {
            Ok(self.segment_length)
        } else {
            Err(MotionError::NonFiniteResult("segment_length"))
        }
    }

    fn check_span(span: &[Point2]) -> Result<(), MotionError> {
        if span.len() < MIN_POINTS {
            return Err(MotionError::insufficient(MIN_POINTS, span.len()));
        }
        if span.iter().any(|p| !p.is_finite()) {
            return Err(MotionError::NonFiniteResult("rom"));
        }
        Ok(())
    }

    fn finite(deg: f64) -> Result<f64, MotionError> {
        if deg.is_finite() {
            Ok(deg)
        } else {
            Err(MotionError::NonFiniteResult("rom"))
        }
    }

    /// Ángulo de la cuerda entre la línea base y `position`: 2·asin(d / 2L).
    /// Es la señal escalar del detector lineal.
    pub fn displacement_angle(&self, baseline: Vec3, position: Vec3) -> Result<f64, MotionError> {
        let length = self.check_segment()?;
        if !baseline.is_finite() || !position.is_finite() {
            return Err(MotionError::NonFiniteResult("displacement"));
        }
        let ratio = (position.distance(baseline) / (2.0 * length)).min(1.0);
        Self::finite(2.0 * ratio.asin().to_degrees())
    }

    /// ROM de péndulo / elevación: longitud de arco desde la línea base hasta
    /// el punto de máximo desplazamiento (sin seguir acumulando tras el pico)
    pub fn linear(&self, baseline: Point2, span: &[Point2]) -> Result<f64, MotionError> {
        let length = self.check_segment()?;
        Self::check_span(span)?;
        if !baseline.is_finite() {
            return Err(MotionError::NonFiniteResult("baseline"));
        }

        let peak_idx = span
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.distance(baseline).total_cmp(&b.1.distance(baseline)))
            .map(|(i, _)| i)
            .unwrap_or(0);

        let arc = baseline.distance(span[0])
            + span[..=peak_idx]
                .windows(2)
                .map(|w| w[0].distance(w[1]))
                .sum::<f64>();

        let deg = Self::finite((arc / length).to_degrees())?;
        Ok(deg.clamp(0.0, LINEAR_ROM_CEILING_DEG))
    }

    /// ROM circular: radio máximo respecto al centroide, asin(r / L)
    pub fn circular(&self, span: &[Point2]) -> Result<f64, MotionError> {
        let length = self.check_segment()?;
        Self::check_span(span)?;

        let n = span.len() as f64;
        let center = Point2::new(
            span.iter().map(|p| p.x).sum::<f64>() / n,
            span.iter().map(|p| p.y).sum::<f64>() / n,
        );
        let radius = span.iter().map(|p| p.distance(center)).fold(0.0, f64::max);

        let deg = Self::finite((radius / length).min(1.0).asin().to_degrees())?;
        Ok(deg.clamp(0.0, CIRCULAR_ROM_CEILING_DEG))
    }
}
