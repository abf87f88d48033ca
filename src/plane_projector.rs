//! Selección del plano dominante de movimiento y proyección 2D.
//!
//! El ROM es una magnitud angular 2D, pero el sensor se mueve en 3D: se elige
//! el plano cartesiano (XY, XZ, YZ) que captura más varianza de posición.

use serde::{Deserialize, Serialize};

use crate::types::{Axis, Point2, Vec3};

/// Margen relativo para considerar empate entre planos
const TIE_EPSILON: f64 = 1e-9;
/// Un plano nuevo debe superar al actual en este factor para reemplazarlo
const SWITCH_MARGIN: f64 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plane {
    XY,
    XZ,
    YZ,
}

impl Plane {
    /// Orden de prioridad para desempates
    pub const ALL: [Plane; 3] = [Plane::XY, Plane::XZ, Plane::YZ];

    pub fn axes(self) -> (Axis, Axis) {
        match self {
            Plane::XY => (Axis::X, Axis::Y),
            Plane::XZ => (Axis::X, Axis::Z),
            Plane::YZ => (Axis::Y, Axis::Z),
        }
    }

    pub fn contains(self, axis: Axis) -> bool {
        let (a, b) = self.axes();
        a == axis || b == axis
    }

    pub fn project(self, p: Vec3) -> Point2 {
        let (a, b) = self.axes();
        Point2::new(p.component(a), p.component(b))
    }

    fn captured_variance(self, variance: &[f64; 3]) -> f64 {
        let (a, b) = self.axes();
        variance[a as usize] + variance[b as usize]
    }
}

/// Resultado de la proyección
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Planar { plane: Plane, points: Vec<Point2> },
    /// Menos de 2 puntos: se devuelve la entrada sin proyectar.
    /// No es un cálculo de ROM válido.
    Degenerate { points: Vec<Vec3> },
}

impl Projection {
    pub fn is_degenerate(&self) -> bool {
        matches!(self, Projection::Degenerate { .. })
    }

    pub fn plane(&self) -> Option<Plane> {
        match self {
            Projection::Planar { plane, .. } => Some(*plane),
            Projection::Degenerate { .. } => None,
        }
    }
}

/// Varianza por eje [x, y, z]
pub fn axis_variance(points: &[Vec3]) -> [f64; 3] {
    if points.is_empty() {
        return [0.0; 3];
    }
    let n = points.len() as f64;
    let mean = points.iter().fold(Vec3::ZERO, |acc, &p| acc + p) * (1.0 / n);
    let mut var = [0.0; 3];
    for p in points {
        let d = *p - mean;
        var[0] += d.x * d.x;
        var[1] += d.y * d.y;
        var[2] += d.z * d.z;
    }
    var.map(|v| v / n)
}

fn candidates(hint: Option<Axis>) -> impl Iterator<Item = Plane> {
    Plane::ALL
        .into_iter()
        .filter(move |plane| hint.map_or(true, |axis| plane.contains(axis)))
}

/// Plano con mayor varianza capturada y dicha varianza.
/// Empates resueltos por el orden fijo XY > XZ > YZ.
fn best_plane(points: &[Vec3], hint: Option<Axis>) -> Option<(Plane, f64)> {
    if points.len() < 2 {
        return None;
    }
    let variance = axis_variance(points);
    let mut best: Option<(Plane, f64)> = None;
    for plane in candidates(hint) {
        let captured = plane.captured_variance(&variance);
        match best {
            Some((_, best_var)) if captured <= best_var * (1.0 + TIE_EPSILON) => {}
            _ => best = Some((plane, captured)),
        }
    }
    best
}

/// Selecciona el plano dominante. `None` con menos de 2 puntos.
pub fn select_plane(points: &[Vec3], hint: Option<Axis>) -> Option<Plane> {
    best_plane(points, hint).map(|(plane, _)| plane)
}

/// Proyecta los puntos (mismo orden, misma cantidad) sobre el plano dominante
pub fn project(points: &[Vec3], hint: Option<Axis>) -> Projection {
    match select_plane(points, hint) {
        Some(plane) => Projection::Planar {
            plane,
            points: points.iter().map(|&p| plane.project(p)).collect(),
        },
        None => Projection::Degenerate {
            points: points.to_vec(),
        },
    }
}

/// Selector con memoria: fija el plano cuando aparece movimiento real y,
/// si `reevaluate` está activo (perfil mixto), solo cambia cuando otro plano
/// supera claramente al actual.
#[derive(Debug, Clone)]
pub struct PlaneSelector {
    hint: Option<Axis>,
    reevaluate: bool,
    min_variance: f64,
    current: Option<Plane>,
}

impl PlaneSelector {
    pub fn new(hint: Option<Axis>, reevaluate: bool, min_variance: f64) -> Self {
        Self {
            hint,
            reevaluate,
            min_variance,
            current: None,
        }
    }

    pub fn current(&self) -> Option<Plane> {
        self.current
    }

    /// Evalúa la ventana y devuelve el plano vigente
    pub fn select(&mut self, points: &[Vec3]) -> Option<Plane> {
        if self.current.is_some() && !self.reevaluate {
            return self.current;
        }

        let Some((plane, captured)) = best_plane(points, self.hint) else {
            return self.current;
        };
        if captured < self.min_variance {
            return self.current;
        }

        match self.current {
            None => {
                log::debug!("Plano seleccionado: {:?} (varianza {:.5})", plane, captured);
                self.current = Some(plane);
            }
            Some(current) if current != plane => {
                let current_var = current.captured_variance(&axis_variance(points));
                if captured > current_var * SWITCH_MARGIN {
                    log::debug!("Plano cambiado: {:?} -> {:?}", current, plane);
                    self.current = Some(plane);
                }
            }
            Some(_) => {}
        }
        self.current
    }

    /// Fija un plano conocido de antemano, sin mirar la varianza
    pub fn lock(&mut self, plane: Plane) -> Option<Plane> {
        if self.current != Some(plane) {
            log::debug!("Plano fijado: {:?}", plane);
            self.current = Some(plane);
        }
        self.current
    }

    /// Olvida el plano fijado (recalibración)
    pub fn reset(&mut self) {
        self.current = None;
    }
}
