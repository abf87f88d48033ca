use crate::types::{Timestamped, MAX_BUFFER_SAMPLES};
use log::warn;
use std::collections::VecDeque;

/// Buffer circular de muestras ordenadas en el tiempo.
/// Nunca supera `capacity`; al desbordar descarta las más antiguas.
#[derive(Debug, Clone)]
pub struct TrajectoryBuffer<S> {
    buffer: VecDeque<S>,
    capacity: usize,
}

impl<S: Timestamped + Clone> TrajectoryBuffer<S> {
    /// Crea un buffer con la capacidad indicada (mínimo 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Añade una muestra. Devuelve `false` si se descartó por llegar
    /// desordenada o con marca de tiempo no finita.
    pub fn push(&mut self, sample: S) -> bool {
        let t = sample.timestamp();
        if !t.is_finite() {
            warn!("Muestra descartada: timestamp no finito");
            return false;
        }
        if let Some(last) = self.buffer.back() {
            if t < last.timestamp() {
                warn!(
                    "Muestra desordenada descartada (t={:.4} < {:.4})",
                    t,
                    last.timestamp()
                );
                return false;
            }
        }

        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(sample);
        true
    }

    /// Muestras de los últimos `duration` segundos, en orden.
    /// Con historia insuficiente devuelve lo que haya.
    pub fn window(&self, duration: f64) -> Vec<S> {
        let Some(last) = self.buffer.back() else {
            return Vec::new();
        };
        self.since(last.timestamp() - duration)
    }

    /// Muestras con timestamp >= `t0`
    pub fn since(&self, t0: f64) -> Vec<S> {
        // Búsqueda desde el final: las ventanas pedidas son cortas
        let start = self
            .buffer
            .iter()
            .rposition(|s| s.timestamp() < t0)
            .map(|idx| idx + 1)
            .unwrap_or(0);
        self.buffer.iter().skip(start).cloned().collect()
    }

    pub fn last(&self) -> Option<&S> {
        self.buffer.back()
    }

    pub fn first(&self) -> Option<&S> {
        self.buffer.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &S> {
        self.buffer.iter()
    }

    pub fn to_vec(&self) -> Vec<S> {
        self.buffer.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Duración cubierta por el buffer, en segundos
    pub fn span_secs(&self) -> f64 {
        match (self.buffer.front(), self.buffer.back()) {
            (Some(first), Some(last)) => last.timestamp() - first.timestamp(),
            _ => 0.0,
        }
    }

    /// Limpia el buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl<S: Timestamped + Clone> Default for TrajectoryBuffer<S> {
    fn default() -> Self {
        Self::new(MAX_BUFFER_SAMPLES)
    }
}
