//! gorelease CLI
//!
//! Entry point for the `gorelease` command-line tool.

use clap::{Args, Parser, Subcommand};
use gorelease::catalog::{TargetCatalog, TomlCatalog};
use gorelease::config::{ConfigError, EffectiveConfig};
use gorelease::manifest::ReleaseManifest;
use gorelease::signal::SignalHandler;
use gorelease::{logging, Orchestrator, Target};
use gorelease_agent::{CancelToken, LocalPool};
use serde_json::{json, Map, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "gorelease")]
#[command(about = "Build, test and package Go toolchain releases", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and commit release files for a source revision
    Build(BuildArgs),

    /// List the targets released for a version
    Targets {
        /// Target catalogue file
        #[arg(long)]
        catalog: PathBuf,

        /// Release version
        #[arg(long)]
        version: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct BuildArgs {
    /// Release version, e.g. go1.22.1
    #[arg(long)]
    version: Option<String>,

    /// Revision tarball (gzip tar of the repository root)
    #[arg(long)]
    source: PathBuf,

    /// Target catalogue file
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Config file (TOML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Release only these targets (repeatable; default: every target for the version)
    #[arg(long = "target", short = 't')]
    targets: Vec<String>,

    /// Directory for staged files (default: a fresh directory inside the output directory)
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Directory committed release files are moved to
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Skip the test and long-test runs
    #[arg(long)]
    skip_tests: bool,

    /// Copy remote command output to stdout
    #[arg(long)]
    watch: bool,

    /// Write the committed files' checksums to this JSON file
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Log filter, e.g. info or gorelease=debug
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (text|json)
    #[arg(long)]
    log_format: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build(args) => run_build(args),
        Commands::Targets { catalog, version, json } => run_targets(&catalog, &version, json),
    }
}

/// CLI flags as the highest-precedence config layer
///
/// Boolean flags only override when set, so a config file can turn them on.
fn cli_overrides(args: &BuildArgs) -> Value {
    let mut map = Map::new();
    let path = |p: &PathBuf| Value::String(p.to_string_lossy().into_owned());

    if let Some(ref v) = args.version {
        map.insert("version".to_string(), json!(v));
    }
    if let Some(ref p) = args.catalog {
        map.insert("catalog".to_string(), path(p));
    }
    if let Some(ref p) = args.staging_dir {
        map.insert("staging_dir".to_string(), path(p));
    }
    if let Some(ref p) = args.output_dir {
        map.insert("output_dir".to_string(), path(p));
    }
    if args.skip_tests {
        map.insert("skip_tests".to_string(), json!(true));
    }
    if args.watch {
        map.insert("watch".to_string(), json!(true));
    }

    let mut log = Map::new();
    if let Some(ref level) = args.log_level {
        log.insert("level".to_string(), json!(level));
    }
    if let Some(ref format) = args.log_format {
        log.insert("format".to_string(), json!(format));
    }
    if !log.is_empty() {
        map.insert("log".to_string(), Value::Object(log));
    }

    Value::Object(map)
}

fn exit_config_error(e: ConfigError) -> ! {
    eprintln!("Configuration error: {}", e);
    process::exit(1);
}

fn run_build(args: BuildArgs) {
    let effective = EffectiveConfig::build(args.config.as_deref(), Some(cli_overrides(&args)))
        .unwrap_or_else(|e| exit_config_error(e));
    let config = effective.release().unwrap_or_else(|e| exit_config_error(e));

    if let Err(e) = logging::init(&config.log) {
        eprintln!("Error initializing logging: {}", e);
        process::exit(1);
    }

    let catalog_path = match config.catalog {
        Some(ref path) => path.clone(),
        None => {
            eprintln!("No target catalogue: pass --catalog or set `catalog` in the config file");
            process::exit(1);
        }
    };
    let catalog = match TomlCatalog::load(&catalog_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading target catalogue: {}", e);
            process::exit(1);
        }
    };

    let targets: Vec<Target> = if args.targets.is_empty() {
        catalog.targets(&config.version)
    } else {
        match args
            .targets
            .iter()
            .map(|name| catalog.lookup(&config.version, name))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(t) => t,
            Err(e) => {
                eprintln!("{}", e);
                process::exit(1);
            }
        }
    };
    if targets.is_empty() {
        eprintln!("No targets to release for {}", config.version);
        process::exit(1);
    }

    let cancel = CancelToken::new();
    if let Err(e) = SignalHandler::new(cancel.clone()).install() {
        tracing::warn!(error = %e, "failed to install signal handler");
    }

    let version = config.version.clone();
    let orchestrator = match Orchestrator::new(Arc::new(LocalPool::new()), Arc::new(catalog), config, cancel) {
        Ok(o) => o,
        Err(e) => {
            tracing::error!(error = %e, "failed to prepare release");
            process::exit(e.exit_code());
        }
    };

    let record = orchestrator.staging().dir().join("effective_config.json");
    if let Err(e) = effective.write_to_file(&record) {
        tracing::warn!(path = %record.display(), error = %e, "failed to record effective config");
    }

    let mut source = match File::open(&args.source) {
        Ok(f) => BufReader::new(f),
        Err(e) => {
            eprintln!("Error opening source {}: {}", args.source.display(), e);
            process::exit(1);
        }
    };

    let report = match orchestrator.release(&mut source, &targets) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "release failed");
            process::exit(e.exit_code());
        }
    };

    for result in &report.targets {
        match result.outcome {
            Ok(ref files) => {
                let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
                println!("{}: ok ({})", result.target, names.join(", "));
            }
            Err(ref e) => println!("{}: FAILED at {} (exit {})", result.target, e.stage, e.exit_code()),
        }
    }

    if let Some(ref path) = args.manifest {
        let manifest = ReleaseManifest::new(&version, report.files());
        if let Err(e) = manifest.write_to_file(path) {
            eprintln!("Error writing manifest {}: {}", path.display(), e);
            process::exit(1);
        }
    }

    process::exit(report.exit_code());
}

fn run_targets(catalog_path: &Path, version: &str, json_output: bool) {
    let catalog = match TomlCatalog::load(catalog_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading target catalogue: {}", e);
            process::exit(1);
        }
    };
    let targets = catalog.targets(version);

    if json_output {
        match serde_json::to_string_pretty(&targets) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    if targets.is_empty() {
        println!("No targets for {}.", version);
        return;
    }

    println!("Targets for {} ({} total):\n", version, targets.len());
    for target in targets {
        println!("  {} ({}/{})", target.name, target.goos, target.goarch);
        println!("    Builder: {}", target.builder);
        if let Some(long) = target.long_test_builder() {
            println!("    Long-test builder: {}", long);
        }
        let mut outputs = vec!["tar.gz"];
        if target.wants_zip() {
            outputs.push("zip");
        }
        if let Some(kind) = target.installer_kind() {
            outputs.push(kind.extension());
        }
        println!("    Outputs: {}", outputs.join(", "));
        if target.build_only {
            println!("    Build only (no tests)");
        }
        println!();
    }
}
