use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use dashtel::{
    TelemetryConfig,
    known_boxes::{BoxNode, box_tree},
    nal::{UnitKind, UnitScanner},
    pipeline::TelemetryFile,
    schema::{self, Schema},
    strip_emulation_prevention,
    util::{hex_dump, hex_preview},
    worker::ParseSession,
};
use std::io;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about = "Dump dashcam telemetry embedded in an MP4 file")]
struct Args {
    /// MP4 file path
    path: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,

    /// Emit JSON instead of text
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    json: bool,

    /// Print only the record nearest to this playback time (seconds)
    #[arg(long)]
    at: Option<f64>,

    /// List metadata units with a hex preview instead of decoded records
    #[arg(long, action = ArgAction::SetTrue)]
    units: bool,

    /// Bytes shown per unit with --units
    #[arg(long, default_value_t = 24)]
    preview: usize,

    /// With --units, also hex-dump each unit after escape stripping
    #[arg(long, action = ArgAction::SetTrue)]
    dump: bool,

    /// .proto schema to decode with (defaults to the bundled one)
    #[arg(long)]
    schema: Option<PathBuf>,

    /// JSON options file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Parse on the calling thread
    #[arg(long, action = ArgAction::SetTrue)]
    inline: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the box tree
    Boxes {
        /// Limit recursion depth
        #[arg(long, default_value_t = 16)]
        max_depth: usize,
    },
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
    let file = TelemetryFile::open(&args.path)
        .with_context(|| format!("reading {}", args.path.display()))?;

    if let Some(Command::Boxes { max_depth }) = args.command {
        let tree = box_tree(file.bytes(), 0, file.len(), max_depth)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&tree)?);
        } else {
            for node in &tree {
                print_node(node, 0);
            }
        }
        return Ok(());
    }

    if args.units {
        return dump_units(&file, args.preview, args.dump, args.json);
    }

    let mut config = match &args.config {
        Some(p) => TelemetryConfig::from_json_file(p)
            .with_context(|| format!("loading config {}", p.display()))?,
        None => TelemetryConfig::default(),
    };
    if args.inline {
        config.use_worker = false;
    }
    let schema = load_schema(args.schema.as_ref(), &config)?;
    info!(fields = schema.message().fields().len(), "schema ready");

    let mut session = ParseSession::new(config);
    session.load(file.into_bytes(), None)?;
    let summary = session.wait().context("parsing telemetry")?;
    let Some(index) = session.index() else {
        anyhow::bail!("parse finished without an index");
    };

    if !summary.has_telemetry {
        eprintln!("no telemetry found");
        return Ok(());
    }

    if let Some(t) = args.at {
        let entry = index.entry_at(t).context("index is empty")?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(entry)?);
        } else {
            print_record(entry);
        }
        return Ok(());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(index.all())?);
    } else {
        for entry in index.all() {
            print_record(entry);
        }
    }
    Ok(())
}

fn load_schema(path: Option<&PathBuf>, config: &TelemetryConfig) -> anyhow::Result<&'static Schema> {
    let schema = match path {
        Some(p) => schema::load_schema_from_path(p, config.schema_options())
            .with_context(|| format!("loading schema {}", p.display()))?,
        None => schema::load_schema(schema::BUNDLED_SCHEMA, config.schema_options())?,
    };
    Ok(schema)
}

fn print_node(node: &BoxNode, depth: usize) {
    let indent = "  ".repeat(depth);
    println!(
        "{indent}{:>8} {:>10} {} ({})",
        format!("{:#x}", node.payload_offset),
        node.payload_size,
        node.typ,
        node.full_name
    );
    for c in &node.children {
        print_node(c, depth + 1);
    }
}

fn print_record(entry: &dashtel::TimedRecord) {
    let r = &entry.record;
    let gps = match r.gps.position() {
        Some((lat, lon)) => format!("{lat:.6},{lon:.6}"),
        None => "-".to_string(),
    };
    println!(
        "{:>9.3}s  {:>6.1} mph  gear={} ap={:<9} accel={:>5.1}% brake={} regen={} gps={}",
        entry.timestamp,
        r.speed.mph,
        r.gear.name(),
        r.autopilot.name(),
        r.accelerator,
        r.brake_applied as u8,
        r.regen_braking as u8,
        gps
    );
}

#[derive(serde::Serialize)]
struct UnitLine {
    offset: usize,
    length: usize,
    kind: UnitKind,
    preview: String,
    #[serde(skip)]
    stripped: Vec<u8>,
}

fn dump_units(file: &TelemetryFile, preview: usize, dump: bool, json: bool) -> anyhow::Result<()> {
    let region = file.media_data().context("locating media data")?;
    let lines: Vec<UnitLine> = UnitScanner::new(region)
        .filter(|u| u.kind == UnitKind::Metadata)
        .map(|u| UnitLine {
            offset: u.offset,
            length: u.length,
            kind: u.kind,
            preview: hex_preview(&u.payload, preview),
            stripped: if dump {
                strip_emulation_prevention(&u.payload)
            } else {
                Vec::new()
            },
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&lines)?);
        return Ok(());
    }
    for l in &lines {
        println!("{:#10x} {:>6}  {}", l.offset, l.length, l.preview);
        if dump {
            print!("{}", hex_dump(&l.stripped, 0));
        }
    }
    println!("{} metadata units", lines.len());
    Ok(())
}
