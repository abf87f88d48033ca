/*
Fisiorep - Conteo de repeticiones en tiempo real

Demo del flujo completo:
1. Una fuente de movimiento (traza sintética o CSV grabado) alimenta un canal
2. La sesión detecta repeticiones, calcula ROM y suavidad
3. Los eventos se muestran en consola y el resultado se guarda en disco

Uso:
    ./target/release/fisiorep [--profile pendulo|circulos|elevacion|mixto|perfil.json]
                              [--trace traza.csv] [--out directorio] [--speed 1.0]

Logs detallados:
    RUST_LOG=fisiorep=debug ./target/debug/fisiorep
*/

use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

use fisiorep::csv_loader::load_trace;
use fisiorep::export::{FileSink, SessionSink};
use fisiorep::feed::{spawn_session, SampleProducer, DEFAULT_FEED_CAPACITY};
use fisiorep::profile::{MotionClass, MovementProfile};
use fisiorep::session::{SessionConfig, SessionEvent};
use fisiorep::synth::{CircleTrace, PendulumTrace};
use fisiorep::types::MotionSample;

struct Options {
    profile: MovementProfile,
    trace: Option<PathBuf>,
    out_dir: Option<PathBuf>,
    /// 1.0 = tiempo real, 0 = lo más rápido posible
    speed: f64,
}

fn init_logging() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(d) = "fisiorep=info".parse() {
        filter = filter.add_directive(d);
    }
    fmt().with_env_filter(filter).init();
}

fn load_profile(arg: &str) -> Result<MovementProfile> {
    if let Some(profile) = MovementProfile::by_name(arg) {
        return Ok(profile);
    }
    MovementProfile::from_json_file(arg).with_context(|| format!("No se pudo cargar el perfil {:?}", arg))
}

fn parse_args() -> Result<Options> {
    let mut profile = MovementProfile::pendulum();
    let mut trace = None;
    let mut out_dir = None;
    let mut speed: f64 = 1.0;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = || {
            args.next()
                .ok_or_else(|| anyhow!("Falta el valor de {}", arg))
        };
        match arg.as_str() {
            "--profile" => profile = load_profile(&value()?)?,
            "--trace" => trace = Some(PathBuf::from(value()?)),
            "--out" => out_dir = Some(PathBuf::from(value()?)),
            "--speed" => {
                let raw = value()?;
                speed = raw
                    .parse()
                    .with_context(|| format!("Velocidad inválida: {:?}", raw))?;
            }
            _ => bail!(
                "Uso: fisiorep [--profile <nombre|perfil.json>] [--trace <traza.csv>] [--out <dir>] [--speed <x>]"
            ),
        }
    }

    if !(speed.is_finite() && speed >= 0.0) {
        bail!("La velocidad debe ser >= 0 (valor: {})", speed);
    }
    Ok(Options {
        profile,
        trace,
        out_dir,
        speed,
    })
}

/// Traza sintética acorde al tipo de ejercicio
fn synthetic_trace(profile: &MovementProfile) -> Vec<MotionSample> {
    let samples = match profile.motion_class {
        MotionClass::Circular => CircleTrace {
            noise: 0.002,
            ..CircleTrace::default()
        }
        .positions(),
        MotionClass::Pendulum | MotionClass::Linear | MotionClass::Mixed => PendulumTrace {
            segment_length: profile.segment_length_m,
            noise: 0.002,
            ..PendulumTrace::default()
        }
        .positions(),
    };
    samples.into_iter().map(MotionSample::Position).collect()
}

/// Reproduce las muestras respetando sus marcas de tiempo (escaladas)
fn play(samples: Vec<MotionSample>, producer: SampleProducer, speed: f64) {
    let mut previous: Option<f64> = None;
    for sample in samples {
        let t = sample.timestamp();
        if let Some(prev) = previous {
            if speed > 0.0 && t > prev {
                thread::sleep(Duration::from_secs_f64((t - prev) / speed));
            }
        }
        previous = Some(t);
        producer.offer(sample);
    }
    // Al soltar el productor la sesión ve la fuente desconectada
}

fn main() -> Result<()> {
    init_logging();
    println!("🏋️  Fisiorep - Repeticiones, ROM y suavidad\n");

    let opts = parse_args()?;
    println!(
        "📋 Ejercicio: {} ({:?}, segmento {:.2} m)",
        opts.profile.name, opts.profile.motion_class, opts.profile.segment_length_m
    );

    let samples = match &opts.trace {
        Some(path) => {
            println!("🎞️  Fuente: {:?}", path);
            load_trace(path)?
        }
        None => {
            println!("🎞️  Fuente: traza sintética");
            synthetic_trace(&opts.profile)
        }
    };
    println!("✅ {} muestras cargadas\n", samples.len());

    // Sin pausas el productor no puede esperar: el canal debe caber entero
    let capacity = if opts.speed > 0.0 {
        DEFAULT_FEED_CAPACITY
    } else {
        samples.len().max(DEFAULT_FEED_CAPACITY)
    };
    let (handle, producer) = spawn_session(opts.profile.clone(), SessionConfig::default(), capacity)?;

    let speed = opts.speed;
    let source = thread::Builder::new()
        .name("source".to_string())
        .spawn(move || play(samples, producer, speed))?;

    println!("🎬 Sesión en curso...\n");
    for event in handle.events().iter() {
        match event {
            SessionEvent::BaselineEstablished(p) => {
                println!("📍 Línea base: ({:.3}, {:.3}, {:.3})", p.x, p.y, p.z);
            }
            SessionEvent::RepetitionDetected { index, rom_deg } => {
                println!("✅ Repetición #{}: ROM {:.1}°", index + 1, rom_deg);
            }
            SessionEvent::Repetition(record) => match record.smoothness {
                Some(score) => println!(
                    "   🌊 #{} suavidad {:.0}/100{}",
                    record.index + 1,
                    score,
                    if record.low_confidence { " (confianza baja)" } else { "" }
                ),
                None => println!("   🌊 #{} suavidad no disponible", record.index + 1),
            },
            SessionEvent::SmoothnessUpdate { published } => {
                println!("   📈 Suavidad (filtrada): {:.0}", published);
            }
            SessionEvent::Rejected { reason, at } => {
                println!("   ⏭️  Descartada en t={:.2}s ({})", at, reason);
            }
        }
    }

    if source.join().is_err() {
        eprintln!("❌ El hilo de la fuente terminó con pánico");
    }
    let report = handle.wait_for_source()?;
    let summary = &report.summary;

    println!("\n🏁 Sesión terminada");
    println!("  Repeticiones:    {}", summary.total_reps);
    println!("  ROM máximo:      {:.1}°", summary.max_rom_deg);
    println!("  ROM medio:       {:.1}°", summary.average_rom_deg);
    match summary.average_smoothness {
        Some(s) => println!("  Suavidad media:  {:.0}/100", s),
        None => println!("  Suavidad media:  no disponible"),
    }
    println!("  Descartadas:     {}", summary.rejections.total());
    if summary.excluded_samples > 0 {
        println!("  Muestras excluidas: {}", summary.excluded_samples);
    }
    if report.dropped_frames > 0 {
        println!("⚠️  {} muestras perdidas por canal lleno", report.dropped_frames);
    }

    if let Some(dir) = opts.out_dir {
        let mut sink = FileSink::new(&dir, "sesion")?;
        let path = sink.write_session(&report.records, summary)?;
        println!("\n💾 Guardado en {:?}", path);
    }

    Ok(())
}
