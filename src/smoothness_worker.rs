use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};

use crate::error::{MotionError, SessionError};
use crate::smoothness::{SmoothnessConfig, SmoothnessEngine};
use crate::types::{PositionSample, SmoothnessScore, SmoothnessSource, VelocitySample};

/// Datos de una repetición para el cálculo espectral
#[derive(Debug, Clone)]
pub enum SmoothnessInput {
    Trajectory {
        samples: Vec<PositionSample>,
        source: SmoothnessSource,
    },
    Velocity(Vec<VelocitySample>),
}

#[derive(Debug, Clone)]
pub struct SmoothnessJob {
    pub rep_index: usize,
    pub input: SmoothnessInput,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmoothnessResult {
    pub rep_index: usize,
    pub outcome: Result<SmoothnessScore, MotionError>,
}

/// Hilo dedicado al cálculo de suavidad: el análisis FFT no debe bloquear
/// la ingesta de muestras.
pub struct SmoothnessWorker {
    jobs: Option<Sender<SmoothnessJob>>,
    results: Receiver<SmoothnessResult>,
    handle: Option<JoinHandle<()>>,
}

impl SmoothnessWorker {
    pub fn spawn(config: SmoothnessConfig) -> Result<Self, SessionError> {
        let (job_tx, job_rx) = unbounded::<SmoothnessJob>();
        let (result_tx, result_rx) = unbounded::<SmoothnessResult>();

        let handle = thread::Builder::new()
            .name("smoothness".to_string())
            .spawn(move || {
                let mut engine = SmoothnessEngine::new(config);
                // Termina cuando se cierra el canal de trabajos
                while let Ok(job) = job_rx.recv() {
                    let outcome = match job.input {
                        SmoothnessInput::Trajectory { samples, source } => {
                            engine.score_trajectory(&samples, source)
                        }
                        SmoothnessInput::Velocity(samples) => engine.score_velocity(&samples),
                    };
                    debug!("Suavidad rep #{}: {:?}", job.rep_index, outcome);
                    let result = SmoothnessResult {
                        rep_index: job.rep_index,
                        outcome,
                    };
                    if result_tx.send(result).is_err() {
                        // La sesión ya no escucha: el resultado se descarta
                        break;
                    }
                }
            })?;

        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            handle: Some(handle),
        })
    }

    pub fn submit(&self, job: SmoothnessJob) -> Result<(), SessionError> {
        let jobs = self.jobs.as_ref().ok_or(SessionError::WorkerGone)?;
        jobs.send(job).map_err(|_| SessionError::WorkerGone)
    }

    /// Resultados ya disponibles, sin bloquear
    pub fn try_results(&self) -> Vec<SmoothnessResult> {
        self.results.try_iter().collect()
    }

    /// Espera un resultado como mucho `timeout` (`None` si no llegó)
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<SmoothnessResult>, SessionError> {
        match self.results.recv_timeout(timeout) {
            Ok(result) => Ok(Some(result)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(SessionError::WorkerGone),
        }
    }
}

impl Drop for SmoothnessWorker {
    fn drop(&mut self) {
        // Cerrar el canal de trabajos detiene el bucle del hilo
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("El hilo de suavidad terminó con pánico");
            }
        }
    }
}
