use std::env;
use std::io;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use fisiorep::csv_loader::load_trace;
use fisiorep::export::{write_reps_csv, write_summary_json, FileSink, SessionSink};
use fisiorep::profile::MovementProfile;
use fisiorep::session::{ExerciseSession, SessionConfig, SessionEvent};
use fisiorep::signal_conditioner::Side;
use tracing_subscriber::{fmt, EnvFilter};

struct ReplayOptions {
    profile: MovementProfile,
    side: Side,
    out_dir: Option<PathBuf>,
    dump_reps: bool,
    json: bool,
    verbose: bool,
}

const USAGE: &str = "Uso: replay_csv [--profile <nombre|perfil.json>] [--left] [--out <dir>] \
                     [--dump-reps] [--json] [--verbose] <traza.csv>";

fn parse_args() -> Result<(PathBuf, ReplayOptions)> {
    let mut profile = MovementProfile::pendulum();
    let mut side = Side::Right;
    let mut out_dir = None;
    let mut dump_reps = false;
    let mut json = false;
    let mut verbose = false;
    let mut csv_path: Option<PathBuf> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--profile" => {
                let name = args.next().ok_or_else(|| anyhow!("Falta el perfil"))?;
                profile = match MovementProfile::by_name(&name) {
                    Some(p) => p,
                    None => MovementProfile::from_json_file(&name)
                        .with_context(|| format!("No se pudo cargar el perfil {:?}", name))?,
                };
            }
            "--out" => {
                let dir = args.next().ok_or_else(|| anyhow!("Falta el directorio"))?;
                out_dir = Some(PathBuf::from(dir));
            }
            "--left" => side = Side::Left,
            "--dump-reps" => dump_reps = true,
            "--json" => json = true,
            "--verbose" => verbose = true,
            _ => {
                if csv_path.is_some() || arg.starts_with("--") {
                    bail!(USAGE);
                }
                csv_path = Some(PathBuf::from(arg));
            }
        }
    }

    let csv_path = csv_path.ok_or_else(|| anyhow!("Debes especificar un archivo CSV\n{}", USAGE))?;
    Ok((
        csv_path,
        ReplayOptions {
            profile,
            side,
            out_dir,
            dump_reps,
            json,
            verbose,
        },
    ))
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).with_writer(io::stderr).init();

    let (csv_path, opts) = parse_args()?;
    eprintln!("🎞️  Reproduciendo traza desde {:?}", csv_path);

    let samples = load_trace(&csv_path)?;
    eprintln!(
        "📋 {} muestras, perfil '{}' ({:?})",
        samples.len(),
        opts.profile.name,
        opts.profile.motion_class
    );

    let config = SessionConfig {
        side: opts.side,
        ..SessionConfig::default()
    };
    let mut session = ExerciseSession::new(opts.profile.clone(), config)?;

    // Sin canal ni hilos de entrada: cada muestra se procesa en orden
    for sample in samples {
        for event in session.process(sample)? {
            if !opts.verbose {
                continue;
            }
            match event {
                SessionEvent::RepetitionDetected { index, rom_deg } => {
                    eprintln!("  ✅ #{} ROM {:.1}°", index + 1, rom_deg)
                }
                SessionEvent::Rejected { reason, at } => {
                    eprintln!("  ⏭️  t={:.2}s descartada ({})", at, reason)
                }
                other => eprintln!("  · {:?}", other),
            }
        }
    }

    let summary = session.end()?;

    if opts.json {
        write_summary_json(io::stdout().lock(), &summary)?;
    } else {
        println!("\n🥇 Repeticiones: {}", summary.total_reps);
        println!("📐 ROM máx / medio: {:.1}° / {:.1}°", summary.max_rom_deg, summary.average_rom_deg);
        match summary.average_smoothness {
            Some(s) => println!("🌊 Suavidad media: {:.0}/100", s),
            None => println!("🌊 Suavidad media: no disponible"),
        }

        println!("\nPor repetición:");
        for record in session.records() {
            let smoothness = record
                .smoothness
                .map(|s| format!("{:>5.1}", s))
                .unwrap_or_else(|| "  n/d".to_string());
            println!(
                "  {:>3}. {:>7.2}s → {:>7.2}s  ROM {:>6.1}°  suavidad {}{}",
                record.index + 1,
                record.start,
                record.end,
                record.rom_deg,
                smoothness,
                if record.low_confidence { "  ⚠️" } else { "" }
            );
        }

        let r = &summary.rejections;
        println!(
            "\n⏭️  Descartadas: {} (amplitud {}, cooldown {}, rom {}, timeout {}, otras {})",
            r.total(),
            r.amplitude,
            r.cooldown,
            r.minimum_rom,
            r.timeout,
            r.non_finite + r.insufficient_data
        );
    }

    if opts.dump_reps {
        eprintln!("\n🧱 Repeticiones (CSV):");
        write_reps_csv(io::stdout().lock(), session.records())?;
    }

    if let Some(dir) = opts.out_dir {
        let mut sink = FileSink::new(&dir, "replay")?;
        let path = sink.write_session(session.records(), &summary)?;
        eprintln!("💾 Guardado en {:?}", path);
    }

    Ok(())
}
