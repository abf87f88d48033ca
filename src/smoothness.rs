use log::{debug, warn};
use rustfft::{num_complex::Complex, FftPlanner};

use crate::error::MotionError;
use crate::signal_conditioner::ButterworthLowPass;
use crate::types::{
    PositionSample, SmoothnessScore, SmoothnessSource, Vec3, VelocitySample, MIN_POINTS,
    SAMPLING_RATE,
};

/// Parámetros del cálculo de suavidad (SPARC + proxy de jerk)
#[derive(Debug, Clone)]
pub struct SmoothnessConfig {
    /// Frecuencia de remuestreo uniforme (default: 120 Hz)
    pub resample_hz: f64,
    /// Corte del Butterworth de fase cero (default: 6 Hz)
    pub cutoff_hz: f64,
    /// Niveles extra de potencia de 2 en el zero-padding (default: 4)
    pub padding_level: u32,
    /// Frecuencia máxima considerada en el espectro (default: 10 Hz)
    pub max_freq_hz: f64,
    /// Umbral adaptativo de amplitud normalizada (default: 0.05)
    pub amplitude_threshold: f64,
    /// SPARC que se mapea a 0 (default: -7.0)
    pub sparc_floor: f64,
    /// SPARC que se mapea a 100 (default: -1.5)
    pub sparc_ceiling: f64,
    /// Muestras para la ruta espectral pura (default: 24)
    pub min_spectral_samples: usize,
    /// Peso del proxy en la mezcla (default: 0.25)
    pub proxy_weight: f64,
    /// Longitud remuestreada máxima antes de degradar al proxy (default: 2048)
    pub max_resampled: usize,
}

impl Default for SmoothnessConfig {
    fn default() -> Self {
        Self {
            resample_hz: 120.0,
            cutoff_hz: 6.0,
            padding_level: 4,
            max_freq_hz: 10.0,
            amplitude_threshold: 0.05,
            sparc_floor: -7.0,
            sparc_ceiling: -1.5,
            min_spectral_samples: 24,
            proxy_weight: 0.25,
            max_resampled: 2048,
        }
    }
}

/// Interpolación lineal sobre una rejilla uniforme de `rate` Hz
pub fn resample(samples: &[(f64, Vec3)], rate: f64) -> Vec<Vec3> {
    let (Some(&(t0, _)), Some(&(tn, _))) = (samples.first(), samples.last()) else {
        return Vec::new();
    };
    if samples.len() < 2 || tn <= t0 {
        return samples.iter().map(|(_, p)| *p).collect();
    }

    let n = ((tn - t0) * rate).floor() as usize + 1;
    let mut out = Vec::with_capacity(n);
    let mut j = 0;
    for i in 0..n {
        let t = t0 + i as f64 / rate;
        while j + 2 < samples.len() && samples[j + 1].0 < t {
            j += 1;
        }
        let (ta, pa) = samples[j];
        let (tb, pb) = samples[j + 1];
        let k = if tb > ta {
            ((t - ta) / (tb - ta)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        out.push(pa + (pb - pa) * k);
    }
    out
}

/// Velocidad escalar por diferencias finitas de una serie de posiciones
fn speed_from_positions(points: &[Vec3], rate: f64) -> Vec<f64> {
    points
        .windows(2)
        .map(|w| w[0].distance(w[1]) * rate)
        .collect()
}

/// Proxy de suavidad 0–100 basado en jerk: 100·(1 − mean|Δ²v| / (2·mean|Δv|))
pub fn jerk_proxy(speed: &[f64]) -> f64 {
    if speed.len() < 3 {
        return 100.0;
    }
    let dv: Vec<f64> = speed.windows(2).map(|w| w[1] - w[0]).collect();
    let mean_dv = dv.iter().map(|d| d.abs()).sum::<f64>() / dv.len() as f64;
    if mean_dv < 1e-12 {
        return 100.0;
    }
    let mean_d2v =
        dv.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>() / (dv.len() - 1) as f64;

    (100.0 * (1.0 - mean_d2v / (2.0 * mean_dv))).clamp(0.0, 100.0)
}

/// Motor de suavidad: remuestreo, filtrado de fase cero y SPARC
pub struct SmoothnessEngine {
    config: SmoothnessConfig,
    planner: FftPlanner<f64>,
    filter: ButterworthLowPass,
}

impl SmoothnessEngine {
    pub fn new(config: SmoothnessConfig) -> Self {
        let filter = ButterworthLowPass::new(config.resample_hz, config.cutoff_hz);
        Self {
            config,
            planner: FftPlanner::new(),
            filter,
        }
    }

    pub fn config(&self) -> &SmoothnessConfig {
        &self.config
    }

    /// Arco espectral (SPARC) de un perfil de velocidad muestreado a `rate`.
    /// Más negativo = menos suave. `None` si el perfil es plano.
    pub fn sparc(&mut self, speed: &[f64], rate: f64) -> Option<f64> {
        if speed.len() < 2 {
            return None;
        }

        let nfft = speed.len().next_power_of_two() << self.config.padding_level;
        let mut buffer: Vec<Complex<f64>> = speed
            .iter()
            .map(|&v| Complex::new(v, 0.0))
            .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
            .take(nfft)
            .collect();
        let fft = self.planner.plan_fft_forward(nfft);
        fft.process(&mut buffer);

        let half = nfft / 2;
        let magnitude: Vec<f64> = buffer[..=half].iter().map(|c| c.norm()).collect();
        let max = magnitude.iter().cloned().fold(0.0, f64::max);
        if !(max > 1e-12) {
            return None;
        }

        // Espectro normalizado hasta la frecuencia máxima
        let df = rate / nfft as f64;
        let selected: Vec<(f64, f64)> = magnitude
            .iter()
            .enumerate()
            .map(|(k, m)| (k as f64 * df, m / max))
            .take_while(|(f, _)| *f <= self.config.max_freq_hz)
            .collect();

        // Umbral adaptativo: desde el primer hasta el último bin significativo
        let threshold = self.config.amplitude_threshold;
        let first = selected.iter().position(|(_, m)| *m >= threshold);
        let last = selected.iter().rposition(|(_, m)| *m >= threshold);
        let (Some(first), Some(last)) = (first, last) else {
            return Some(0.0);
        };
        let band = &selected[first..=last];
        if band.len() < 2 {
            return Some(0.0);
        }

        let bandwidth = band[band.len() - 1].0 - band[0].0;
        let arc: f64 = band
            .windows(2)
            .map(|w| {
                let dfn = (w[1].0 - w[0].0) / bandwidth;
                let dm = w[1].1 - w[0].1;
                (dfn * dfn + dm * dm).sqrt()
            })
            .sum();

        Some(-arc)
    }

    /// Mapea SPARC al rango 0–100
    pub fn sparc_to_score(&self, sparc: f64) -> f64 {
        let span = self.config.sparc_ceiling - self.config.sparc_floor;
        (100.0 * (sparc - self.config.sparc_floor) / span).clamp(0.0, 100.0)
    }

    /// Perfil de velocidad remuestreado y filtrado (fase cero)
    fn filtered_speed(&self, series: &[(f64, Vec3)]) -> Option<Vec<f64>> {
        let rate = self.config.resample_hz;
        let resampled = resample(series, rate);
        if resampled.len() > self.config.max_resampled + 1 || resampled.len() < 3 {
            return None;
        }
        Some(self.filter.filtfilt(&speed_from_positions(&resampled, rate)))
    }

    fn spectral_score(&mut self, speed: &[f64]) -> Result<f64, MotionError> {
        let rate = self.config.resample_hz;
        let sparc = self
            .sparc(speed, rate)
            .ok_or(MotionError::NonFiniteResult("sparc"))?;
        if !sparc.is_finite() {
            return Err(MotionError::NonFiniteResult("sparc"));
        }
        debug!("SPARC = {:.3}", sparc);
        Ok(self.sparc_to_score(sparc))
    }

    fn blend(&self, proxy: f64, spectral: f64) -> f64 {
        let w = self.config.proxy_weight;
        w * proxy + (1.0 - w) * spectral
    }

    /// Suavidad de una trayectoria de posiciones (tracking o pose)
    pub fn score_trajectory(
        &mut self,
        samples: &[PositionSample],
        source: SmoothnessSource,
    ) -> Result<SmoothnessScore, MotionError> {
        let n = samples.len();
        if n < MIN_POINTS {
            return Err(MotionError::insufficient(MIN_POINTS, n));
        }
        if samples.iter().any(|s| !s.position.is_finite() || !s.timestamp.is_finite()) {
            return Err(MotionError::NonFiniteResult("trajectory"));
        }

        let series: Vec<(f64, Vec3)> = samples.iter().map(|s| (s.timestamp, s.position)).collect();
        let raw_speed: Vec<f64> = samples
            .windows(2)
            .filter(|w| w[1].timestamp > w[0].timestamp)
            .map(|w| w[0].position.distance(w[1].position) / (w[1].timestamp - w[0].timestamp))
            .collect();
        let proxy = jerk_proxy(&raw_speed);

        let Some(speed) = self.filtered_speed(&series) else {
            warn!("Tramo demasiado largo para el análisis espectral ({} muestras), usando proxy", n);
            return finish(proxy, 0.5, source);
        };

        let spectral = self.spectral_score(&speed)?;
        let coverage = (n as f64 / self.config.min_spectral_samples as f64).min(1.0);
        if n >= self.config.min_spectral_samples {
            // Confianza plena con un segundo de datos
            let confidence = (n as f64 / SAMPLING_RATE).clamp(0.5, 1.0);
            finish(spectral, confidence, source)
        } else {
            finish(self.blend(proxy, spectral), 0.5 * coverage, source)
        }
    }

    /// Suavidad a partir de velocidades integradas de la IMU (siempre mezcla)
    pub fn score_velocity(&mut self, samples: &[VelocitySample]) -> Result<SmoothnessScore, MotionError> {
        let n = samples.len();
        if n < MIN_POINTS {
            return Err(MotionError::insufficient(MIN_POINTS, n));
        }
        if samples.iter().any(|s| !s.velocity.is_finite() || !s.timestamp.is_finite()) {
            return Err(MotionError::NonFiniteResult("velocity"));
        }

        let raw_speed: Vec<f64> = samples.iter().map(|s| s.velocity.norm()).collect();
        let proxy = jerk_proxy(&raw_speed);

        // El módulo de la velocidad se remuestrea como serie 1D en x
        let series: Vec<(f64, Vec3)> = samples
            .iter()
            .map(|s| (s.timestamp, Vec3::new(s.velocity.norm(), 0.0, 0.0)))
            .collect();
        let resampled = resample(&series, self.config.resample_hz);
        if resampled.len() > self.config.max_resampled + 1 || resampled.len() < 3 {
            return finish(proxy, 0.4, SmoothnessSource::Imu);
        }
        let speed = self
            .filter
            .filtfilt(&resampled.iter().map(|p| p.x).collect::<Vec<_>>());

        let spectral = self.spectral_score(&speed)?;
        let coverage = (n as f64 / self.config.min_spectral_samples as f64).min(1.0);
        finish(self.blend(proxy, spectral), 0.8 * coverage, SmoothnessSource::Imu)
    }
}

impl Default for SmoothnessEngine {
    fn default() -> Self {
        Self::new(SmoothnessConfig::default())
    }
}

fn finish(
    score: f64,
    confidence: f64,
    source: SmoothnessSource,
) -> Result<SmoothnessScore, MotionError> {
    if !score.is_finite() {
        return Err(MotionError::NonFiniteResult("smoothness"));
    }
    Ok(SmoothnessScore {
        score: score.clamp(0.0, 100.0),
        confidence: confidence.clamp(0.0, 1.0),
        source,
    })
}

/// Suavizado exponencial de los valores que se muestran al usuario.
/// Los registros por repetición guardan el valor crudo.
#[derive(Debug, Clone)]
pub struct SmoothnessPublisher {
    alpha: f64,
    value: Option<f64>,
}

impl SmoothnessPublisher {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            value: None,
        }
    }

    pub fn publish(&mut self, raw: f64) -> f64 {
        let next = match self.value {
            Some(prev) => prev + self.alpha * (raw - prev),
            None => raw,
        };
        self.value = Some(next);
        next
    }

    pub fn current(&self) -> Option<f64> {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}
