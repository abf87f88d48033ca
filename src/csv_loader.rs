use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, bail, ensure, Context, Result};
use csv::{ReaderBuilder, StringRecord};

use crate::types::{InertialSample, Joint, Keypoint, MotionSample, PoseFrame, PositionSample, Vec3};

/// Formato de una traza grabada, deducido de la cabecera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    /// `timestamp,x,y,z`
    Position,
    /// `timestamp,ax,ay,az,gx,gy,gz`
    Inertial,
    /// `timestamp,joint,x,y,confidence` (una fila por articulación)
    Pose,
}

impl TraceKind {
    pub fn from_headers(headers: &StringRecord) -> Result<Self> {
        let names: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        match names.as_slice() {
            ["timestamp", "x", "y", "z"] => Ok(TraceKind::Position),
            ["timestamp", "ax", "ay", "az", "gx", "gy", "gz"] => Ok(TraceKind::Inertial),
            ["timestamp", "joint", "x", "y", "confidence"] => Ok(TraceKind::Pose),
            _ => bail!("Cabecera no reconocida: {}", names.join(",")),
        }
    }
}

/// Carga una traza completa desde un CSV con cabecera
pub fn load_trace(path: impl AsRef<Path>) -> Result<Vec<MotionSample>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("No se pudo abrir el CSV {:?}", path))?;
    read_trace(file).with_context(|| format!("Traza inválida en {:?}", path))
}

/// Igual que `load_trace` pero desde cualquier lector
pub fn read_trace<R: Read>(input: R) -> Result<Vec<MotionSample>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(input);
    let kind = TraceKind::from_headers(reader.headers()?)?;

    let samples: Vec<MotionSample> = match kind {
        TraceKind::Position => read_positions(&mut reader)?
            .into_iter()
            .map(MotionSample::Position)
            .collect(),
        TraceKind::Inertial => read_inertial(&mut reader)?
            .into_iter()
            .map(MotionSample::Inertial)
            .collect(),
        TraceKind::Pose => read_pose(&mut reader)?
            .into_iter()
            .map(MotionSample::Pose)
            .collect(),
    };

    if samples.is_empty() {
        return Err(anyhow!("La traza no contiene datos"));
    }
    Ok(samples)
}

fn field(record: &StringRecord, idx: usize, name: &str, row: usize) -> Result<f64> {
    let raw = record
        .get(idx)
        .ok_or_else(|| anyhow!("Falta la columna {} en fila {}", name, row))?;
    let value: f64 = raw
        .parse()
        .with_context(|| format!("{} inválido en fila {}: {:?}", name, row, raw))?;
    ensure!(value.is_finite(), "{} no finito en fila {}", name, row);
    Ok(value)
}

fn rows<R: Read>(reader: &mut csv::Reader<R>) -> impl Iterator<Item = Result<(usize, StringRecord)>> + '_ {
    reader.records().enumerate().map(|(row_idx, result)| {
        // +2: la cabecera es la fila 1
        let row = row_idx + 2;
        let record = result.with_context(|| format!("Fila {} inválida", row))?;
        Ok((row, record))
    })
}

fn check_order(previous: Option<f64>, timestamp: f64, row: usize) -> Result<()> {
    if let Some(prev) = previous {
        ensure!(
            timestamp >= prev,
            "Marca de tiempo decreciente en fila {} ({} < {})",
            row,
            timestamp,
            prev
        );
    }
    Ok(())
}

fn read_positions<R: Read>(reader: &mut csv::Reader<R>) -> Result<Vec<PositionSample>> {
    let mut samples = Vec::new();
    let mut previous = None;

    for item in rows(reader) {
        let (row, record) = item?;
        let timestamp = field(&record, 0, "timestamp", row)?;
        check_order(previous, timestamp, row)?;
        previous = Some(timestamp);

        let position = Vec3::new(
            field(&record, 1, "x", row)?,
            field(&record, 2, "y", row)?,
            field(&record, 3, "z", row)?,
        );
        samples.push(PositionSample::new(timestamp, position));
    }
    Ok(samples)
}

fn read_inertial<R: Read>(reader: &mut csv::Reader<R>) -> Result<Vec<InertialSample>> {
    let mut samples = Vec::new();
    let mut previous = None;

    for item in rows(reader) {
        let (row, record) = item?;
        let timestamp = field(&record, 0, "timestamp", row)?;
        check_order(previous, timestamp, row)?;
        previous = Some(timestamp);

        samples.push(InertialSample {
            timestamp,
            accel: Vec3::new(
                field(&record, 1, "ax", row)?,
                field(&record, 2, "ay", row)?,
                field(&record, 3, "az", row)?,
            ),
            gyro: Vec3::new(
                field(&record, 4, "gx", row)?,
                field(&record, 5, "gy", row)?,
                field(&record, 6, "gz", row)?,
            ),
        });
    }
    Ok(samples)
}

/// Las filas consecutivas con la misma marca de tiempo forman un frame
fn read_pose<R: Read>(reader: &mut csv::Reader<R>) -> Result<Vec<PoseFrame>> {
    let mut frames: Vec<PoseFrame> = Vec::new();

    for item in rows(reader) {
        let (row, record) = item?;
        let timestamp = field(&record, 0, "timestamp", row)?;
        let name = record
            .get(1)
            .ok_or_else(|| anyhow!("Falta la columna joint en fila {}", row))?;
        let joint = Joint::parse(name)
            .ok_or_else(|| anyhow!("Articulación desconocida en fila {}: {:?}", row, name))?;
        let x = field(&record, 2, "x", row)?;
        let y = field(&record, 3, "y", row)?;
        let confidence = field(&record, 4, "confidence", row)?;

        let previous = frames.last().map(|f| f.timestamp);
        match frames.last_mut() {
            Some(frame) if previous == Some(timestamp) => {
                frame.joints.insert(joint, Keypoint { x, y, confidence });
            }
            _ => {
                check_order(previous, timestamp, row)?;
                frames.push(PoseFrame::new(timestamp).with_joint(joint, x, y, confidence));
            }
        }
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_trace_loads_in_order() {
        let csv = "timestamp,x,y,z\n0.0,0.0,-0.6,0.0\n0.0167, 0.01,-0.6,0.0\n";
        let samples = read_trace(csv.as_bytes()).unwrap();
        assert_eq!(samples.len(), 2);
        match &samples[1] {
            MotionSample::Position(s) => {
                assert_eq!(s.timestamp, 0.0167);
                assert_eq!(s.position, Vec3::new(0.01, -0.6, 0.0));
            }
            other => panic!("esperaba posición, llegó {:?}", other),
        }
    }

    #[test]
    fn inertial_trace_loads() {
        let csv = "timestamp,ax,ay,az,gx,gy,gz\n0.0,0,9.81,0,0,0,0.5\n";
        let samples = read_trace(csv.as_bytes()).unwrap();
        assert!(matches!(
            samples[0],
            MotionSample::Inertial(InertialSample { gyro, .. }) if gyro.z == 0.5
        ));
    }

    #[test]
    fn pose_rows_are_grouped_by_timestamp() {
        let csv = "timestamp,joint,x,y,confidence\n\
                   0.0,right_shoulder,0.5,0.35,0.9\n\
                   0.0,right_elbow,0.5,0.5,0.9\n\
                   0.0,right_wrist,0.5,0.7,0.8\n\
                   0.033,right_shoulder,0.5,0.35,0.9\n\
                   0.033,right_wrist,0.52,0.7,0.1\n";
        let samples = read_trace(csv.as_bytes()).unwrap();
        assert_eq!(samples.len(), 2);
        let MotionSample::Pose(first) = &samples[0] else {
            panic!("esperaba pose");
        };
        assert_eq!(first.joints.len(), 3);
        let MotionSample::Pose(second) = &samples[1] else {
            panic!("esperaba pose");
        };
        assert_eq!(second.joints[&Joint::RightWrist].confidence, 0.1);
    }

    #[test]
    fn unknown_header_is_rejected() {
        let csv = "sample,sensor,ax\n0,0,1.0\n";
        let err = read_trace(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("Cabecera no reconocida"));
    }

    #[test]
    fn bad_rows_report_their_line() {
        let csv = "timestamp,x,y,z\n0.0,0,0,0\n0.1,abc,0,0\n";
        let err = read_trace(csv.as_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("fila 3"));

        let csv = "timestamp,x,y,z\n0.5,0,0,0\n0.1,0,0,0\n";
        assert!(read_trace(csv.as_bytes()).is_err());

        let csv = "timestamp,joint,x,y,confidence\n0.0,tail,0,0,1\n";
        assert!(read_trace(csv.as_bytes()).is_err());
    }

    #[test]
    fn empty_trace_is_an_error() {
        assert!(read_trace("timestamp,x,y,z\n".as_bytes()).is_err());
    }

    #[test]
    fn missing_file_has_context() {
        let err = load_trace("/nonexistent/traza.csv").unwrap_err();
        assert!(err.to_string().contains("No se pudo abrir"));
    }
}
