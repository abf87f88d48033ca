//! Conteo de repeticiones, rango de movimiento (ROM) y suavidad para
//! ejercicios de rehabilitación de hombro, a partir de trayectorias 3D,
//! sensores inerciales o pose 2D de cámara.

pub mod csv_loader;
pub mod error;
pub mod export;
pub mod feed;
pub mod plane_projector;
pub mod profile;
pub mod rep_detector;
pub mod rom;
pub mod session;
pub mod signal_conditioner;
pub mod smoothness;
pub mod smoothness_worker;
pub mod synth;
pub mod trajectory_buffer;
pub mod types;

pub use error::{MotionError, RejectionReason, SessionError};
pub use profile::{MotionClass, MovementProfile};
pub use session::{ExerciseSession, SessionConfig, SessionEvent};
pub use types::{MotionSample, RepetitionRecord, SessionSummary};
