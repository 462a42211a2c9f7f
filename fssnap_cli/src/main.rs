use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use fssnap_common::{ensure_config, load_config, render_config};
use fssnap_core::{CheckOverrides, FileAttribute, Snapshot};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Exit status when the compared snapshots differ
const EXIT_DIFFERENCES: i32 = 2;

#[derive(Parser)]
#[command(name = "fssnap")]
#[command(author = "fssnap Contributors")]
#[command(version)]
#[command(about = "Capture directory snapshots and report unexpected differences", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture one or more directories into a snapshot file
    Capture(CaptureArgs),

    /// Compare two snapshot files
    Compare {
        /// First snapshot file
        first: PathBuf,

        /// Second snapshot file
        second: PathBuf,

        /// Rename the first snapshot for the report
        #[arg(long)]
        first_name: Option<String>,

        /// Rename the second snapshot for the report
        #[arg(long)]
        second_name: Option<String>,

        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Describe a snapshot file
    Show {
        /// Snapshot file
        file: PathBuf,
    },

    /// Show the configuration file in use
    Config {
        /// Write the default configuration if none exists
        #[arg(long)]
        init: bool,

        /// Keep the configuration next to the executable
        #[arg(long)]
        portable: bool,
    },
}

#[derive(Args)]
struct CaptureArgs {
    /// Snapshot name
    #[arg(short, long)]
    name: String,

    /// Directory to capture, as ALIAS=PATH (can be specified multiple times)
    #[arg(short, long = "dir", value_name = "ALIAS=PATH", required = true)]
    dirs: Vec<String>,

    /// Skip a directory subtree, as ALIAS:PATH
    #[arg(long = "skip-dir", value_name = "ALIAS:PATH")]
    skip_dirs: Vec<String>,

    /// Skip directories whose name matches a regex, as ALIAS:PARENT/REGEX
    #[arg(long = "skip-dir-regex", value_name = "ALIAS:PATH")]
    skip_dir_regexes: Vec<String>,

    /// Skip a file or some of its attributes, as ALIAS:PATH[:size,mtime,md5,permissions]
    #[arg(long = "skip-file", value_name = "ALIAS:PATH[:ATTRS]")]
    skip_files: Vec<String>,

    /// Skip files whose name matches a regex, as ALIAS:PARENT/REGEX[:ATTRS]
    #[arg(long = "skip-file-regex", value_name = "ALIAS:PATH[:ATTRS]")]
    skip_file_regexes: Vec<String>,

    /// Always check a file or some of its attributes, as ALIAS:PATH[:ATTRS]
    #[arg(long = "check-file", value_name = "ALIAS:PATH[:ATTRS]")]
    check_files: Vec<String>,

    /// Do not record file sizes
    #[arg(long)]
    no_size: bool,

    /// Do not record modification times
    #[arg(long)]
    no_mtime: bool,

    /// Do not compute MD5 checksums
    #[arg(long)]
    no_md5: bool,

    /// Do not record permissions
    #[arg(long)]
    no_permissions: bool,

    /// Include hidden files and directories
    #[arg(long)]
    hidden: bool,

    /// Do not inspect properties, XML, INI or text content
    #[arg(long)]
    no_content: bool,

    /// Snapshot file to write
    #[arg(short, long)]
    output: PathBuf,
}

impl CaptureArgs {
    fn overrides(&self) -> CheckOverrides {
        let mut overrides = CheckOverrides::default();
        let disabled = [
            (self.no_size, FileAttribute::Size),
            (self.no_mtime, FileAttribute::ModificationTime),
            (self.no_md5, FileAttribute::Md5),
            (self.no_permissions, FileAttribute::Permissions),
        ];
        for (flag, attribute) in disabled {
            if flag {
                overrides = overrides.attribute(attribute, false);
            }
        }
        if self.hidden {
            overrides = overrides.hidden(true);
        }
        if self.no_content {
            overrides = overrides.content(false);
        }
        overrides
    }
}

fn main() {
    // Logs go to stderr so reports and JSON stay alone on stdout
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Capture(args) => run_capture(args).map(|_| 0).context("Capture failed"),
        Commands::Compare {
            first,
            second,
            first_name,
            second_name,
            json,
        } => run_compare(first, second, first_name, second_name, json).context("Compare failed"),
        Commands::Show { file } => run_show(file).map(|_| 0).context("Show failed"),
        Commands::Config { init, portable } => {
            run_config(init, portable).map(|_| 0).context("Config failed")
        }
    };

    match outcome {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

fn run_capture(args: CaptureArgs) -> Result<()> {
    let loaded = load_config(false)?;
    let mut snapshot = Snapshot::with_config(&args.name, loaded.config.snapshot)?;

    for raw in &args.dirs {
        let (alias, path) = raw
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid directory '{}', expected ALIAS=PATH", raw))?;
        snapshot.add_directory(alias.trim(), PathBuf::from(path))?;
    }

    for raw in &args.skip_dirs {
        let (alias, path) = split_alias(raw)?;
        snapshot.skip_directory(alias, path)?;
    }
    for raw in &args.skip_dir_regexes {
        let (alias, path) = split_alias(raw)?;
        snapshot.skip_directory_by_regex(alias, path)?;
    }
    for raw in &args.skip_files {
        let (alias, path, attributes) = split_file_rule(raw)?;
        snapshot.skip_file(alias, path, &attributes)?;
    }
    for raw in &args.skip_file_regexes {
        let (alias, path, attributes) = split_file_rule(raw)?;
        snapshot.skip_file_by_regex(alias, path, &attributes)?;
    }
    for raw in &args.check_files {
        let (alias, path, attributes) = split_file_rule(raw)?;
        snapshot.check_file(alias, path, &attributes)?;
    }

    snapshot.capture_with(&args.overrides())?;
    snapshot.save_to_file(&args.output)?;

    let entries: usize = snapshot.directories().values().map(|d| d.entries.len()).sum();
    info!(
        "Captured {} entries across {} directories",
        entries,
        snapshot.directories().len()
    );
    println!("Saved snapshot '{}' to {}", snapshot.name(), args.output.display());
    Ok(())
}

fn run_compare(
    first: PathBuf,
    second: PathBuf,
    first_name: Option<String>,
    second_name: Option<String>,
    json: bool,
) -> Result<i32> {
    let first = open_snapshot(&first, first_name.as_deref())?;
    let second = open_snapshot(&second, second_name.as_deref())?;

    let report = first.diff(&second)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.is_empty() {
        println!(
            "Snapshots [{}] and [{}] are equal",
            first.name(),
            second.name()
        );
    } else {
        println!("{}", report);
    }

    if report.is_empty() {
        Ok(0)
    } else {
        info!("Found {} differences", report.len());
        Ok(EXIT_DIFFERENCES)
    }
}

fn run_show(file: PathBuf) -> Result<()> {
    let snapshot = Snapshot::from_file(&file)?;
    println!("{}", snapshot);
    Ok(())
}

fn run_config(init: bool, portable: bool) -> Result<()> {
    let loaded = if init {
        ensure_config(portable)?
    } else {
        load_config(portable)?
    };

    let state = if loaded.exists {
        "existing"
    } else if init {
        "created"
    } else {
        "defaults, not written"
    };
    println!("Config file: {} ({})", loaded.path.display(), state);
    print!("{}", render_config(&loaded.config)?);
    Ok(())
}

fn open_snapshot(path: &Path, name: Option<&str>) -> Result<Snapshot> {
    let snapshot = match name {
        Some(name) => {
            let mut snapshot = Snapshot::new(name)?;
            snapshot.load_from_file(Some(name), path)?;
            snapshot
        }
        None => Snapshot::from_file(path)?,
    };
    Ok(snapshot)
}

/// Split `ALIAS:REST` at the first colon
fn split_alias(raw: &str) -> Result<(&str, &str)> {
    match raw.split_once(':') {
        Some((alias, rest)) if !alias.trim().is_empty() && !rest.is_empty() => {
            Ok((alias.trim(), rest))
        }
        _ => bail!("Invalid rule '{}', expected ALIAS:PATH", raw),
    }
}

/// Split `ALIAS:PATH[:ATTRS]`; the trailing part only counts as attributes
/// when every comma-separated item names one
fn split_file_rule(raw: &str) -> Result<(&str, &str, Vec<FileAttribute>)> {
    let (alias, rest) = split_alias(raw)?;
    if let Some((path, tail)) = rest.rsplit_once(':') {
        let parsed: Result<Vec<FileAttribute>, _> =
            tail.split(',').map(|item| item.parse::<FileAttribute>()).collect();
        if let Ok(attributes) = parsed {
            if !path.is_empty() {
                return Ok((alias, path, attributes));
            }
        }
    }
    Ok((alias, rest, Vec::new()))
}
