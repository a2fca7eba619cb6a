//! tag-rename - batch image renaming from detected tag regions
//!
//! Command-line front end over the `tag_rename` library.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tag_rename::config::{self, AppConfig};
use tag_rename::naming::{rename_in_place, ManualName, ManualOutcome, NameSuffix};
use tag_rename::pipeline::{BatchOrchestrator, RunEvent, RunHandle};
use tag_rename::rename::{clear_crops, find_quarantined, restore_quarantined};
use tag_rename::storage;
use tag_rename::vision::{build_recognizer, OcrBackend, YoloDetector};

/// tag-rename - rename images after the text on their tags
#[derive(Parser, Debug)]
#[command(name = "tag-rename")]
#[command(about = "Detect a tag in each image, read it, and rename the image after it")]
struct Args {
    /// Settings file (default: config.toml in the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect, read and rename every image in a directory
    Run(RunArgs),

    /// Rename one image from operator-entered parts
    Rename {
        /// Image to rename
        file: PathBuf,
        /// Text placed before the middle part
        #[arg(long, default_value = "")]
        prefix: String,
        /// Main part of the name
        #[arg(long, default_value = "")]
        middle: String,
        /// Append `-<n>`
        #[arg(long, conflicts_with = "suffix")]
        number: Option<u32>,
        /// Append this text verbatim
        #[arg(long)]
        suffix: Option<String>,
    },

    /// Restore files left under quarantine names by an interrupted run
    Recover {
        /// Directory to scan
        dir: PathBuf,
        /// Only list what would be restored
        #[arg(long)]
        list: bool,
    },

    /// Empty the crops directory (`<dir>/cropped`, or `<dir>` itself when named `cropped`)
    CleanCrops { dir: PathBuf },

    /// Write the effective settings to the config file
    InitConfig,
}

/// Per-run overrides of the config file
#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Directory scanned for images
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output base; each source directory gets `<name>_output` below it
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory for saved crops
    #[arg(long)]
    crops: Option<PathBuf>,

    /// Do not save crops
    #[arg(long)]
    no_crops: bool,

    /// ONNX detector weights
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Inference device: cpu, cuda or cuda:N
    #[arg(long)]
    device: Option<String>,

    /// Detector class to crop and read
    #[arg(long)]
    target_class: Option<String>,

    /// Prompt sent with every crop
    #[arg(long)]
    prompt: Option<String>,

    /// Descend into sub-directories
    #[arg(short, long)]
    recursive: bool,

    /// Use the bare name without a `-N` suffix
    #[arg(long)]
    no_duplicates: bool,

    /// Keep existing files in output directories
    #[arg(long)]
    no_clean: bool,

    /// Plan and write the ledger without renaming
    #[arg(long)]
    dry_run: bool,

    /// Skip the OCR service; every tag reads as UNKNOWN
    #[arg(long)]
    offline: bool,

    /// Write a separate ledger file per run
    #[arg(long)]
    namespace_ledger: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut AppConfig) {
        let task = &mut config.task;
        if let Some(input) = &self.input {
            task.input_dir = input.clone();
        }
        if let Some(output) = &self.output {
            task.output_root = output.clone();
        }
        if let Some(crops) = &self.crops {
            task.crops_dir = Some(crops.clone());
        }
        if self.no_crops {
            task.save_crops = false;
        }
        task.recursive |= self.recursive;
        task.dry_run |= self.dry_run;
        task.namespace_ledger |= self.namespace_ledger;
        if self.no_duplicates {
            task.duplicates = false;
        }
        if self.no_clean {
            task.clean_output = false;
        }

        let detector = &mut config.detector;
        if let Some(weights) = &self.weights {
            detector.weights = weights.clone();
        }
        if let Some(device) = &self.device {
            detector.device = device.clone();
        }
        if let Some(target) = &self.target_class {
            detector.target_class = target.clone();
        }

        if let Some(prompt) = &self.prompt {
            config.ocr.prompt = prompt.clone();
        }
        if self.offline {
            config.ocr.backend = OcrBackend::Offline;
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => storage::default_config_path()?,
    };
    let mut config = config::load_or_default(&config_path);

    match args.command {
        Command::Run(run_args) => {
            run_args.apply(&mut config);
            let code = run_batch(config)?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Command::Rename {
            file,
            prefix,
            middle,
            number,
            suffix,
        } => {
            let suffix = match (number, suffix) {
                (Some(n), _) => NameSuffix::Number(n),
                (None, Some(s)) => NameSuffix::Custom(s),
                (None, None) => NameSuffix::None,
            };
            let name = ManualName {
                prefix,
                middle,
                suffix,
            };
            match rename_in_place(&file, &name.compose())? {
                ManualOutcome::Renamed(path) => println!("{} -> {}", file.display(), path.display()),
                ManualOutcome::Kept => println!("Empty name; {} kept", file.display()),
            }
        }
        Command::Recover { dir, list } => recover(&dir, list)?,
        Command::CleanCrops { dir } => {
            let removed = clear_crops(&dir)
                .with_context(|| format!("Failed to clear crops under {:?}", dir))?;
            println!("Removed {} entries", removed);
        }
        Command::InitConfig => {
            config::save_config(&config, &config_path)?;
            println!("Wrote {}", config_path.display());
        }
    }

    Ok(())
}

/// Run one batch in the background and stream its progress; returns the exit code
fn run_batch(config: AppConfig) -> Result<i32> {
    if config.task.input_dir.as_os_str().is_empty() {
        bail!("No input directory; pass --input or set task.input_dir");
    }
    if config.task.output_root.as_os_str().is_empty() {
        bail!("No output directory; pass --output or set task.output_root");
    }

    let detector = YoloDetector::new(config.detector.yolo_config()).context("Failed to load detector")?;
    let recognizer = build_recognizer(&config.ocr).context("Failed to set up OCR")?;
    info!("OCR backend: {}", recognizer.name());

    let orchestrator = BatchOrchestrator::new(config, Arc::new(detector), Arc::from(recognizer));
    let handle = RunHandle::spawn(orchestrator)?;

    for event in handle.events().iter() {
        match event {
            RunEvent::Progress { fraction, message } => {
                println!("[{:>3.0}%] {}", fraction * 100.0, message);
            }
            RunEvent::Finished(_) => break,
            // Log lines also reach the tracing output
            RunEvent::Log(_) | RunEvent::State(_) => {}
        }
    }

    let outcome = handle.join();
    let stats = &outcome.stats;
    println!(
        "Total {}, planned {}, renamed {}, failed {} in {:.1}s",
        stats.total,
        stats.planned,
        stats.renamed_ok,
        stats.renamed_fail,
        stats.elapsed.as_secs_f64()
    );
    if let Some(ledger) = &outcome.ledger_path {
        println!("Ledger: {}", ledger.display());
    }
    if let Some(error) = &outcome.error {
        eprintln!("Run failed: {}", error);
    }

    Ok(outcome.code)
}

/// List or restore quarantined files in `dir`
fn recover(dir: &Path, list_only: bool) -> Result<()> {
    if list_only {
        let found = find_quarantined(dir).with_context(|| format!("Failed to scan {:?}", dir))?;
        if found.is_empty() {
            println!("No quarantined files in {}", dir.display());
        }
        for item in &found {
            println!("{} -> {}", item.path.display(), item.original_path.display());
        }
        return Ok(());
    }

    let report = restore_quarantined(dir).with_context(|| format!("Failed to restore in {:?}", dir))?;
    for path in &report.restored {
        println!("Restored {}", path.display());
    }
    for item in &report.left {
        println!(
            "Left {} (original name {} unavailable)",
            item.path.display(),
            item.original_path.display()
        );
    }
    Ok(())
}
