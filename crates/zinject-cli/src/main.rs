//! Command-line interface for zinject.
//!
//! Injects tweak packages and dylibs into an unpacked app bundle.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zinject::Injector;

#[derive(Parser, Debug)]
#[command(name = "zinject")]
#[command(author, version, about = "Inject tweaks into an app bundle", long_about = None)]
struct Cli {
    /// Unpacked app bundle (e.g. Payload/App.app)
    bundle: PathBuf,

    /// Tweak packages (.deb) and dynamic libraries (.dylib)
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Package providing CydiaSubstrate.framework, used when the bundle lacks it
    #[arg(short, long, env = "ZINJECT_BASELINE")]
    baseline: Option<PathBuf>,

    /// Register artifacts as weak dependencies
    #[arg(short, long)]
    weak: bool,

    /// Keep extracted package contents after injecting
    #[arg(long)]
    keep_extracted: bool,

    /// Directory for temporary files
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if !cli.bundle.is_dir() {
        bail!("Bundle not found: {}", cli.bundle.display());
    }

    let mut injector = Injector::new()
        .weak(cli.weak)
        .keep_extracted(cli.keep_extracted);
    if let Some(baseline) = &cli.baseline {
        injector = injector.baseline_package(baseline);
    }
    if let Some(temp_dir) = &cli.temp_dir {
        injector = injector.temp_dir(temp_dir);
    }

    info!("Injecting {} input(s) into {}", cli.inputs.len(), cli.bundle.display());
    let report = injector
        .inject(&cli.bundle, cli.inputs.as_slice())
        .with_context(|| format!("Failed to inject into {}", cli.bundle.display()))?;

    print!("{}", report);
    Ok(())
}

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}
