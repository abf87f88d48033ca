use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;

use crate::types::{RepetitionRecord, SessionSummary};

/// Destino de los resultados de una sesión terminada
pub trait SessionSink {
    /// Devuelve la ruta (o identificador) donde quedó guardada la sesión
    fn write_session(&mut self, records: &[RepetitionRecord], summary: &SessionSummary) -> Result<PathBuf>;
}

/// Escribe `<dir>/<prefix>_NNNNN.csv` (una fila por repetición) y el
/// resumen en `<dir>/<prefix>_NNNNN.json`
#[derive(Debug, Clone)]
pub struct FileSink {
    out_dir: PathBuf,
    prefix: String,
    file_idx: usize,
}

impl FileSink {
    pub fn new(out_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Result<Self> {
        let out_dir = out_dir.into();
        fs::create_dir_all(&out_dir)
            .with_context(|| format!("No se pudo crear el directorio {:?}", out_dir))?;
        Ok(Self {
            out_dir,
            prefix: prefix.into(),
            file_idx: 0,
        })
    }

    fn stem(&self, idx: usize) -> PathBuf {
        self.out_dir.join(format!("{}_{:05}", self.prefix, idx))
    }

    /// Primer índice libre: nunca se sobrescribe una sesión anterior
    fn next_stem(&mut self) -> PathBuf {
        loop {
            let stem = self.stem(self.file_idx);
            self.file_idx += 1;
            if !stem.with_extension("csv").exists() && !stem.with_extension("json").exists() {
                return stem;
            }
        }
    }
}

impl SessionSink for FileSink {
    fn write_session(&mut self, records: &[RepetitionRecord], summary: &SessionSummary) -> Result<PathBuf> {
        let stem = self.next_stem();
        let csv_path = stem.with_extension("csv");
        let json_path = stem.with_extension("json");

        let file = File::create(&csv_path).with_context(|| format!("No se pudo crear {:?}", csv_path))?;
        write_reps_csv(file, records).with_context(|| format!("Error escribiendo {:?}", csv_path))?;

        let file = File::create(&json_path).with_context(|| format!("No se pudo crear {:?}", json_path))?;
        write_summary_json(BufWriter::new(file), summary)
            .with_context(|| format!("Error escribiendo {:?}", json_path))?;

        info!("💾 Sesión guardada en {:?}", csv_path);
        Ok(csv_path)
    }
}

/// Una fila por repetición; los campos de suavidad no disponibles quedan vacíos
pub fn write_reps_csv<W: Write>(writer: W, records: &[RepetitionRecord]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_summary_json<W: Write>(mut writer: W, summary: &SessionSummary) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Lee de vuelta el resumen JSON (herramientas de análisis)
pub fn read_summary_json(path: impl AsRef<Path>) -> Result<SessionSummary> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).with_context(|| format!("No se pudo leer {:?}", path))?;
    let summary = serde_json::from_str(&content).with_context(|| format!("JSON inválido en {:?}", path))?;
    Ok(summary)
}
