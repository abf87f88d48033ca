//! Trayectorias sintéticas deterministas para la demo y los tests.
//!
//! Todas las trazas usan un `StdRng` con semilla fija: la misma
//! configuración produce siempre las mismas muestras.

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::{InertialSample, Joint, PoseFrame, PositionSample, Vec3, SAMPLING_RATE};

const GRAVITY: f64 = 9.81;

fn jitter(rng: &mut StdRng, amplitude: f64) -> f64 {
    if amplitude > 0.0 {
        rng.gen_range(-amplitude..=amplitude)
    } else {
        0.0
    }
}

fn timestamps(total_secs: f64, rate_hz: f64) -> impl Iterator<Item = f64> {
    let n = (total_secs * rate_hz).round() as usize;
    (0..=n).map(move |i| i as f64 / rate_hz)
}

/// Punto del brazo colgando desde el pivote, rotado `theta_deg` en el plano XY
fn arm_point(segment_length: f64, theta_deg: f64) -> Vec3 {
    let theta = theta_deg.to_radians();
    Vec3::new(segment_length * theta.sin(), -segment_length * theta.cos(), 0.0)
}

/// Alcance con perfil de velocidad en medio seno (suave), a lo largo de X
pub fn smooth_reach(t0: f64, duration: f64, distance: f64, rate_hz: f64) -> Vec<(f64, Vec3)> {
    timestamps(duration, rate_hz)
        .map(|t| {
            let tau = (t / duration).min(1.0);
            let x = distance * (1.0 - (PI * tau).cos()) / 2.0;
            (t0 + t, Vec3::new(x, 0.0, 0.0))
        })
        .collect()
}

/// Alcance con velocidad escalonada: `steps` bloques de avance y parada
pub fn jerky_reach(
    t0: f64,
    duration: f64,
    distance: f64,
    rate_hz: f64,
    steps: usize,
) -> Vec<(f64, Vec3)> {
    let steps = steps.max(1);
    let block = duration / steps as f64;
    // Avanza durante la primera mitad de cada bloque
    let speed = distance / (steps as f64 * block / 2.0);

    timestamps(duration, rate_hz)
        .map(|t| {
            let t = t.min(duration);
            let full_blocks = (t / block).floor().min(steps as f64 - 1.0);
            let within = (t - full_blocks * block).min(block / 2.0);
            let x = speed * (full_blocks * block / 2.0 + within);
            (t0 + t, Vec3::new(x.min(distance), 0.0, 0.0))
        })
        .collect()
}

/// Péndulo simétrico θ = A·sin(2πt/T) tras un reposo inicial
#[derive(Debug, Clone)]
pub struct PendulumTrace {
    pub segment_length: f64,
    pub amplitude_deg: f64,
    pub period_secs: f64,
    /// Tiempo oscilando
    pub duration_secs: f64,
    /// Reposo antes y después de oscilar
    pub rest_secs: f64,
    pub rate_hz: f64,
    /// Ruido uniforme por eje (metros o alturas de imagen)
    pub noise: f64,
    pub seed: u64,
}

impl Default for PendulumTrace {
    fn default() -> Self {
        Self {
            segment_length: 0.6,
            amplitude_deg: 60.0,
            period_secs: 1.0,
            duration_secs: 10.0,
            rest_secs: 1.0,
            rate_hz: SAMPLING_RATE,
            noise: 0.0,
            seed: 7,
        }
    }
}

impl PendulumTrace {
    pub fn total_secs(&self) -> f64 {
        self.duration_secs + 2.0 * self.rest_secs
    }

    pub fn angle_deg(&self, t: f64) -> f64 {
        let phase = t - self.rest_secs;
        if phase <= 0.0 || phase >= self.duration_secs {
            return 0.0;
        }
        self.amplitude_deg * (2.0 * PI * phase / self.period_secs).sin()
    }

    fn angular_rate(&self, t: f64) -> f64 {
        let phase = t - self.rest_secs;
        if phase <= 0.0 || phase >= self.duration_secs {
            return 0.0;
        }
        let w = 2.0 * PI / self.period_secs;
        self.amplitude_deg.to_radians() * w * (w * phase).cos()
    }

    /// Posiciones 3D del dispositivo (plano XY, pivote en el origen)
    pub fn positions(&self) -> Vec<PositionSample> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        timestamps(self.total_secs(), self.rate_hz)
            .map(|t| {
                let p = arm_point(self.segment_length, self.angle_deg(t));
                let noise = Vec3::new(
                    jitter(&mut rng, self.noise),
                    jitter(&mut rng, self.noise),
                    jitter(&mut rng, self.noise),
                );
                PositionSample::new(t, p + noise)
            })
            .collect()
    }

    /// Acelerómetro (con gravedad en +Y) y giróscopo (eje Z) del mismo péndulo
    pub fn inertial(&self) -> Vec<InertialSample> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let h = 1e-3;
        let position = |t: f64| arm_point(self.segment_length, self.angle_deg(t));

        timestamps(self.total_secs(), self.rate_hz)
            .map(|t| {
                let accel = (position(t + h) - position(t) * 2.0 + position(t - h)) * (1.0 / (h * h));
                InertialSample {
                    timestamp: t,
                    accel: Vec3::new(
                        accel.x + jitter(&mut rng, self.noise),
                        accel.y + GRAVITY + jitter(&mut rng, self.noise),
                        accel.z + jitter(&mut rng, self.noise),
                    ),
                    gyro: Vec3::new(0.0, 0.0, self.angular_rate(t)),
                }
            })
            .collect()
    }

    /// Frames de pose (coordenadas de pantalla, y hacia abajo) del brazo derecho.
    /// Uno de cada `dropout_every` frames lleva la muñeca con confianza 0.05.
    pub fn pose_frames(&self, dropout_every: Option<usize>) -> Vec<PoseFrame> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let shoulder = (0.5, 0.35);

        timestamps(self.total_secs(), self.rate_hz)
            .enumerate()
            .map(|(i, t)| {
                let theta = self.angle_deg(t).to_radians();
                let wrist_x = shoulder.0 + self.segment_length * theta.sin() + jitter(&mut rng, self.noise);
                let wrist_y = shoulder.1 + self.segment_length * theta.cos() + jitter(&mut rng, self.noise);
                let elbow_x = shoulder.0 + 0.5 * self.segment_length * theta.sin();
                let elbow_y = shoulder.1 + 0.5 * self.segment_length * theta.cos();

                let dropped = dropout_every.is_some_and(|k| k > 0 && i % k == 0);
                let wrist_confidence = if dropped { 0.05 } else { 0.9 };

                PoseFrame::new(t)
                    .with_joint(Joint::RightShoulder, shoulder.0, shoulder.1, 0.95)
                    .with_joint(Joint::RightElbow, elbow_x, elbow_y, 0.9)
                    .with_joint(Joint::RightWrist, wrist_x, wrist_y, wrist_confidence)
            })
            .collect()
    }
}

/// Excursión de ida y vuelta: θ = A·(1 − cos(2π(t−start)/duration))/2
#[derive(Debug, Clone, Copy)]
pub struct Excursion {
    pub start: f64,
    pub duration: f64,
    pub amplitude_deg: f64,
}

impl Excursion {
    pub fn new(start: f64, duration: f64, amplitude_deg: f64) -> Self {
        Self {
            start,
            duration,
            amplitude_deg,
        }
    }

    fn angle_deg(&self, t: f64) -> f64 {
        let phase = t - self.start;
        if phase <= 0.0 || phase >= self.duration {
            return 0.0;
        }
        self.amplitude_deg * (1.0 - (2.0 * PI * phase / self.duration).cos()) / 2.0
    }
}

/// Elevaciones de un solo lado (el brazo vuelve a la línea base entre ellas)
pub fn excursions(
    segment_length: f64,
    rate_hz: f64,
    total_secs: f64,
    moves: &[Excursion],
) -> Vec<PositionSample> {
    timestamps(total_secs, rate_hz)
        .map(|t| {
            let theta: f64 = moves.iter().map(|m| m.angle_deg(t)).sum();
            PositionSample::new(t, arm_point(segment_length, theta))
        })
        .collect()
}

/// Barrido circular en el plano XY: reposo, giro de `sweep_deg`, retroceso
/// de `reverse_deg` y reposo final
#[derive(Debug, Clone)]
pub struct CircleTrace {
    pub center: Vec3,
    pub radius: f64,
    pub sweep_deg: f64,
    pub sweep_secs: f64,
    pub reverse_deg: f64,
    pub reverse_secs: f64,
    pub rest_secs: f64,
    pub rate_hz: f64,
    pub noise: f64,
    pub seed: u64,
}

impl Default for CircleTrace {
    fn default() -> Self {
        Self {
            center: Vec3::new(0.0, -0.3, 0.0),
            radius: 0.3,
            sweep_deg: 3.0 * 360.0,
            sweep_secs: 9.0,
            reverse_deg: 0.0,
            reverse_secs: 0.0,
            rest_secs: 1.0,
            rate_hz: SAMPLING_RATE,
            noise: 0.0,
            seed: 11,
        }
    }
}

impl CircleTrace {
    /// Ángulo recorrido (grados) en el instante `t`, desde la parte baja
    pub fn swept_deg(&self, t: f64) -> f64 {
        let t = t - self.rest_secs;
        if t <= 0.0 {
            0.0
        } else if t < self.sweep_secs {
            self.sweep_deg * t / self.sweep_secs
        } else if t < self.sweep_secs + self.reverse_secs {
            self.sweep_deg - self.reverse_deg * (t - self.sweep_secs) / self.reverse_secs
        } else {
            self.sweep_deg - self.reverse_deg
        }
    }

    pub fn total_secs(&self) -> f64 {
        self.sweep_secs + self.reverse_secs + 2.0 * self.rest_secs
    }

    pub fn positions(&self) -> Vec<PositionSample> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        timestamps(self.total_secs(), self.rate_hz)
            .map(|t| {
                let phi = (self.swept_deg(t) - 90.0).to_radians();
                let p = Vec3::new(
                    self.center.x + self.radius * phi.cos() + jitter(&mut rng, self.noise),
                    self.center.y + self.radius * phi.sin() + jitter(&mut rng, self.noise),
                    self.center.z + jitter(&mut rng, self.noise),
                );
                PositionSample::new(t, p)
            })
            .collect()
    }
}
