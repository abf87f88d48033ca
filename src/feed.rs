use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender, TrySendError};
use log::{info, warn};

use crate::error::SessionError;
use crate::profile::MovementProfile;
use crate::session::{ExerciseSession, SessionConfig, SessionEvent};
use crate::types::{MotionSample, RepetitionRecord, SessionSummary};

/// Capacidad por defecto del canal de muestras (~1.5 s a 60 Hz)
pub const DEFAULT_FEED_CAPACITY: usize = 100;

/// Órdenes del usuario hacia el hilo de la sesión
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Recalibrate,
    ClearSpan,
    End,
}

/// Extremo productor: lo usa la fuente de movimiento (cámara, IMU, CSV...)
#[derive(Debug, Clone)]
pub struct SampleProducer {
    tx: Sender<MotionSample>,
    dropped: Arc<AtomicUsize>,
}

impl SampleProducer {
    /// Entrega una muestra sin bloquear. Con el canal lleno la muestra se
    /// descarta y se cuenta; devuelve `false` si no se entregó.
    pub fn offer(&self, sample: MotionSample) -> bool {
        match self.tx.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Resultado final de una sesión alimentada por canal
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub summary: SessionSummary,
    pub records: Vec<RepetitionRecord>,
    /// La fuente se desconectó antes de que se pidiera terminar
    pub source_lost: bool,
    pub dropped_frames: usize,
}

struct LoopOutcome {
    summary: SessionSummary,
    records: Vec<RepetitionRecord>,
    source_lost: bool,
}

/// Extremo de control: eventos de la sesión y órdenes del usuario
pub struct SessionHandle {
    control: Sender<Control>,
    events: Receiver<SessionEvent>,
    dropped: Arc<AtomicUsize>,
    handle: Option<JoinHandle<Result<LoopOutcome, SessionError>>>,
}

impl SessionHandle {
    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    pub fn recalibrate(&self) {
        self.send(Control::Recalibrate);
    }

    pub fn clear_span(&self) {
        self.send(Control::ClearSpan);
    }

    fn send(&self, control: Control) {
        if self.control.send(control).is_err() {
            warn!("La sesión ya no acepta órdenes ({:?})", control);
        }
    }

    /// Detiene la ingesta y espera el resumen. Si la fuente ya se había
    /// desconectado devuelve lo acumulado con `source_lost = true`.
    pub fn end(self) -> Result<SessionReport, SessionError> {
        // Si el hilo ya terminó, el canal de control está cerrado
        let _ = self.control.send(Control::End);
        self.join()
    }

    /// Espera a que la fuente se desconecte (reproducción de una traza
    /// grabada) sin cortar la ingesta
    pub fn wait_for_source(self) -> Result<SessionReport, SessionError> {
        self.join()
    }

    fn join(mut self) -> Result<SessionReport, SessionError> {
        let handle = self.handle.take().ok_or(SessionError::Ended)?;
        let outcome = handle.join().map_err(|_| SessionError::Panicked)??;

        Ok(SessionReport {
            summary: outcome.summary,
            records: outcome.records,
            source_lost: outcome.source_lost,
            dropped_frames: self.dropped.load(Ordering::Relaxed),
        })
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.control.send(Control::End);
            if handle.join().is_err() {
                warn!("El hilo de la sesión terminó con pánico");
            }
        }
    }
}

/// Lanza una sesión en su propio hilo. El productor devuelto alimenta un
/// canal acotado de `capacity` muestras.
pub fn spawn_session(
    profile: MovementProfile,
    config: SessionConfig,
    capacity: usize,
) -> Result<(SessionHandle, SampleProducer), SessionError> {
    let session = ExerciseSession::new(profile, config)?;

    let (sample_tx, sample_rx) = bounded::<MotionSample>(capacity.max(1));
    let (control_tx, control_rx) = unbounded::<Control>();
    let (event_tx, event_rx) = unbounded::<SessionEvent>();
    let dropped = Arc::new(AtomicUsize::new(0));

    let handle = thread::Builder::new()
        .name("session".to_string())
        .spawn(move || run_session(session, sample_rx, control_rx, event_tx))?;

    let handle = SessionHandle {
        control: control_tx,
        events: event_rx,
        dropped: Arc::clone(&dropped),
        handle: Some(handle),
    };
    let producer = SampleProducer {
        tx: sample_tx,
        dropped,
    };
    Ok((handle, producer))
}

fn run_session(
    mut session: ExerciseSession,
    samples: Receiver<MotionSample>,
    control: Receiver<Control>,
    events: Sender<SessionEvent>,
) -> Result<LoopOutcome, SessionError> {
    let mut source_lost = false;

    loop {
        select! {
            recv(samples) -> msg => match msg {
                Ok(sample) => {
                    for event in session.process(sample)? {
                        // Nadie escucha: los eventos se descartan
                        let _ = events.send(event);
                    }
                }
                Err(_) => {
                    warn!("⚠️  Fuente de movimiento desconectada");
                    source_lost = true;
                    break;
                }
            },
            recv(control) -> msg => match msg {
                Ok(Control::Recalibrate) => session.recalibrate(),
                Ok(Control::ClearSpan) => session.clear_span(),
                Ok(Control::End) | Err(_) => {
                    info!("Fin de sesión solicitado");
                    break;
                }
            },
        }
    }

    let (summary, closing) = session.finish()?;
    for event in closing {
        let _ = events.send(event);
    }
    Ok(LoopOutcome {
        summary,
        records: session.records().to_vec(),
        source_lost,
    })
}
