use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::profile::ProfileError;
use crate::types::Joint;

/// Errores locales de un cálculo concreto. Nunca tumban la sesión:
/// provocan que ese cálculo se omita.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MotionError {
    #[error("Datos insuficientes: se requieren {required} muestras, hay {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Confianza baja en {joint:?}: {confidence:.2}")]
    LowConfidenceInput { joint: Joint, confidence: f64 },

    #[error("Resultado no finito en {0}")]
    NonFiniteResult(&'static str),
}

impl MotionError {
    pub fn insufficient(required: usize, available: usize) -> Self {
        MotionError::InsufficientData {
            required,
            available,
        }
    }
}

/// Errores de la sesión como un todo (no de una muestra concreta)
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("La sesión ya terminó")]
    Ended,

    #[error("El worker de suavidad se detuvo")]
    WorkerGone,

    #[error("El hilo de la sesión terminó con pánico")]
    Panicked,

    #[error("No se pudo lanzar el hilo: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Profile(#[from] ProfileError),
}

/// Motivo por el que un pico/valle no cuenta como repetición.
/// No es un error: es un resultado normal del control de flujo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    Amplitude,
    Cooldown,
    MinimumRom,
    Timeout,
    NonFinite,
    InsufficientData,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectionReason::Amplitude => "amplitud",
            RejectionReason::Cooldown => "cooldown",
            RejectionReason::MinimumRom => "rom_minimo",
            RejectionReason::Timeout => "timeout",
            RejectionReason::NonFinite => "no_finito",
            RejectionReason::InsufficientData => "datos_insuficientes",
        };
        f.write_str(s)
    }
}

impl From<&MotionError> for RejectionReason {
    fn from(err: &MotionError) -> Self {
        match err {
            MotionError::InsufficientData { .. } => RejectionReason::InsufficientData,
            MotionError::NonFiniteResult(_) => RejectionReason::NonFinite,
            // Solo se produce en el acondicionamiento; se trata como falta de datos
            MotionError::LowConfidenceInput { .. } => RejectionReason::InsufficientData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_maps_to_rejection() {
        let err = MotionError::NonFiniteResult("rom");
        assert_eq!(RejectionReason::from(&err), RejectionReason::NonFinite);
        assert_eq!(err.to_string(), "Resultado no finito en rom");
    }

    #[test]
    fn insufficient_message_lists_counts() {
        let err = MotionError::insufficient(8, 3);
        assert_eq!(
            err.to_string(),
            "Datos insuficientes: se requieren 8 muestras, hay 3"
        );
    }
}
