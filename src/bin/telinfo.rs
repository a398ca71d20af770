use anyhow::Context;
use clap::Parser;
use dashtel::{
    TelemetryConfig,
    index::RouteStats,
    pipeline::{CancelToken, ParseSummary, TelemetryFile, parse_telemetry},
    schema,
};
use serde::Serialize;
use std::io;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about = "Summarize the video track and telemetry of a dashcam MP4")]
struct Args {
    /// MP4 file path
    path: PathBuf,

    /// Output as JSON instead of human-readable text
    #[arg(long)]
    json: bool,

    /// JSON options file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct Info {
    file: String,
    #[serde(flatten)]
    summary: ParseSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame_rate: Option<f64>,
    stats: RouteStats,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(p) => TelemetryConfig::from_json_file(p)
            .with_context(|| format!("loading config {}", p.display()))?,
        None => TelemetryConfig::default(),
    };
    let schema = schema::load_schema(schema::BUNDLED_SCHEMA, config.schema_options())?;

    let file = TelemetryFile::open(&args.path)
        .with_context(|| format!("reading {}", args.path.display()))?;
    let out = parse_telemetry(&file, schema, &config, None, &CancelToken::new(), &mut |_| {})
        .context("parsing telemetry")?;

    let info = Info {
        file: args.path.display().to_string(),
        frame_rate: out.summary.track_config.as_ref().and_then(|c| c.frame_rate()),
        stats: out.index.stats(),
        summary: out.summary,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print_human(&info);
    }
    Ok(())
}

fn print_human(info: &Info) {
    println!("File: {}", info.file);
    if let Some(c) = &info.summary.track_config {
        println!("Video:");
        println!("  codec: {}", c.codec_id);
        println!("  size: {}x{}", c.width, c.height);
        println!("  timescale: {}", c.time_scale);
        println!("  samples: {}", c.sample_count());
        if let Some(fps) = info.frame_rate {
            println!("  frame rate: {:.3} fps", fps);
        }
    }
    if let Some(d) = info.summary.video_duration {
        println!("Duration: {:.3} s", d);
    }

    if !info.summary.has_telemetry {
        println!("Telemetry: (none)");
        return;
    }
    let s = &info.stats;
    println!("Telemetry:");
    println!("  records: {}", info.summary.record_count);
    if info.summary.skipped_units > 0 {
        println!("  skipped units: {}", info.summary.skipped_units);
    }
    println!("  max speed: {:.1} mph", s.max_speed_mph);
    println!("  avg speed: {:.1} mph", s.avg_speed_mph);
    println!("  autopilot engaged: {:.1}%", s.autopilot_percent);
    println!("  regen braking: {:.1}%", s.regen_percent);
    println!("  gps fixes: {}", s.gps_points);
}
