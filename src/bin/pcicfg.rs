//! `pcicfg`: decode a PCIe configuration space dump.
//!
//! ```text
//! USAGE:
//!   pcicfg -d <dump> [-c <cap.yaml>] [-e <extcap.yaml>]
//! ```
//!
//! The header is always decoded (unless `--no-header`). Each capability schema given is
//! walked against the dump, archived next to `--out-dir` as
//! `Result.<schema>_<unix time>.yaml`, and rendered.

use anyhow::{Context, Result};
use clap::Parser;
use pcicfg::{
    render::{ChainListing, HeaderListing, HexDump, Summary},
    walk::ChainKind,
    CapabilityPass, CapabilitySchema, ConfigSpace, Decoder, HeaderSchema, Outcome,
};
use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pcicfg", about = "Decode a PCIe configuration space dump", version)]
struct Cli {
    /// Text hex dump of the 4 KiB configuration space.
    #[arg(short, long)]
    dump: PathBuf,
    /// Standard capability schema (YAML).
    #[arg(short, long)]
    cap: Option<PathBuf>,
    /// Extended capability schema (YAML).
    #[arg(short, long)]
    extcap: Option<PathBuf>,
    /// Header schema (YAML) to use instead of the built-in Type 0 / Type 1 layouts.
    #[arg(long)]
    header_schema: Option<PathBuf>,
    /// Skip header decoding.
    #[arg(long)]
    no_header: bool,
    /// Echo the ingested dump.
    #[arg(long)]
    raw: bool,
    /// Directory to write decoded schemas to.
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,
    /// Don't write decoded schemas.
    #[arg(long)]
    no_archive: bool,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    let space = pcicfg::dump::load(&cli.dump)
        .with_context(|| format!("failed to read dump {}", cli.dump.display()))?;
    if cli.raw {
        println!("Raw dump:");
        println!("{}", HexDump(&space));
    }

    let mut clean = true;
    if !cli.no_header {
        clean &= cmd_header(&space, cli.header_schema.as_deref())?;
    }

    let chains = [
        (cli.cap.as_deref(), ChainKind::Standard),
        (cli.extcap.as_deref(), ChainKind::Extended),
    ];
    for (path, kind) in chains {
        let Some(path) = path else { continue };
        let pass = cmd_capabilities(&space, path, kind, &cli)?;
        clean &= pass.outcome() == Outcome::Complete;
    }

    Ok(if clean { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn cmd_header(space: &ConfigSpace, schema: Option<&Path>) -> Result<bool> {
    let schema = match schema {
        Some(path) => HeaderSchema::load(path)
            .with_context(|| format!("failed to load header schema {}", path.display()))?,
        None => HeaderSchema::default(),
    };

    match Decoder::new(space).header(&schema) {
        Ok(header) => {
            println!("{}", HeaderListing(&header));
            Ok(true)
        }
        Err(err) => {
            eprintln!("Header: {err}");
            println!();
            Ok(false)
        }
    }
}

fn cmd_capabilities(
    space: &ConfigSpace,
    path: &Path,
    kind: ChainKind,
    cli: &Cli,
) -> Result<CapabilityPass> {
    let schema = CapabilitySchema::load(path, kind)
        .with_context(|| format!("failed to load {kind} capability schema {}", path.display()))?;
    let decoder = Decoder::new(space);
    let pass = match kind {
        ChainKind::Standard => decoder.standard(&schema),
        ChainKind::Extended => decoder.extended(&schema),
    };

    match kind {
        ChainKind::Standard => println!("PCI Capabilities:"),
        ChainKind::Extended => println!("PCIe Capabilities:"),
    }
    println!("{}", ChainListing(&pass));
    for failure in &pass.failures {
        eprintln!("{failure}");
    }

    if !cli.no_archive {
        let archive = archive_path(&cli.out_dir, path);
        let yaml = pass.populate(&schema).to_yaml()?;
        std::fs::write(&archive, yaml)
            .with_context(|| format!("failed to write {}", archive.display()))?;
        println!("Decoded schema written to {}", archive.display());
        println!();
    }

    println!("{}", Summary { pass: &pass, schema: &schema });
    Ok(pass)
}

/// `Result.<stem>_<unix time>.<ext>` in `out_dir`
fn archive_path(out_dir: &Path, schema: &Path) -> PathBuf {
    let stem = schema
        .file_stem()
        .map(|stem| stem.to_string_lossy())
        .unwrap_or_default();
    let ext = schema
        .extension()
        .map(|ext| ext.to_string_lossy())
        .unwrap_or_else(|| "yaml".into());
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    out_dir.join(format!("Result.{stem}_{timestamp}.{ext}"))
}
