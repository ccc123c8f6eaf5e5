use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use scallop_classify::load_classifier;
use scallop_pipeline::{run_batch, SystemConfig};

#[derive(Debug, Parser)]
#[command(name = "scallop", version, about = "Benthic scallop detection pipeline")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Process the configured input set and write the detection list.
    Run,
    /// Sanity-check the configuration without touching any image.
    Doctor,
    Classifier {
        #[command(subcommand)]
        cmd: ClassifierCmd,
    },
}

#[derive(Debug, Subcommand)]
enum ClassifierCmd {
    /// Load the configured model and print its label space.
    Inspect,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = SystemConfig::load(&cli.config)?;

    match cli.cmd {
        Command::Run => run(&cfg),
        Command::Doctor => doctor(&cfg),
        Command::Classifier { cmd } => classifier_cmd(&cfg, cmd),
    }
}

fn run(cfg: &SystemConfig) -> Result<()> {
    info!("run: starting");

    let cancel = Arc::new(AtomicBool::new(false));
    let summary = run_batch(cfg, cancel)?;
    info!(
        "run: done ({} images, {} detections, {} samples, {} skipped)",
        summary.images, summary.detections, summary.samples, summary.skipped
    );
    Ok(())
}

fn doctor(cfg: &SystemConfig) -> Result<()> {
    info!("doctor: starting");

    anyhow::ensure!(
        cfg.search.min_radius_px < cfg.search.max_radius_px,
        "search.min_radius_px must be below search.max_radius_px"
    );
    anyhow::ensure!(cfg.search.min_radius_px > 0.0, "search.min_radius_px must be positive");
    if cfg.search.max_radius_m > 0.0 {
        anyhow::ensure!(
            cfg.search.min_radius_m < cfg.search.max_radius_m,
            "search.min_radius_m must be below search.max_radius_m"
        );
    }
    anyhow::ensure!(cfg.runtime.threads >= 1, "runtime.threads must be at least 1");
    anyhow::ensure!(
        (0.0..=1.0).contains(&cfg.runtime.min_class_score),
        "runtime.min_class_score must be in [0, 1]"
    );

    match (&cfg.input.dir, &cfg.input.list) {
        (None, None) => anyhow::bail!("input needs either a dir or a list"),
        (_, Some(list)) => {
            anyhow::ensure!(Path::new(list).is_file(), "input.list does not exist: {list}")
        }
        (Some(dir), None) => {
            anyhow::ensure!(Path::new(dir).is_dir(), "input.dir does not exist: {dir}")
        }
    }
    anyhow::ensure!(
        Path::new(&cfg.classifier.model_path).is_file(),
        "classifier.model_path does not exist: {}",
        cfg.classifier.model_path
    );
    if let Some(dir) = &cfg.colorbank.dir {
        anyhow::ensure!(Path::new(dir).is_dir(), "colorbank.dir does not exist: {dir}");
    }
    if cfg.training.enabled {
        if let Some(gt) = &cfg.training.ground_truth {
            anyhow::ensure!(Path::new(gt).is_file(), "training.ground_truth does not exist: {gt}");
        } else {
            warn!("doctor: training enabled without ground truth; batch runs will skip every image");
        }
    }

    // Confirm the model actually parses, not just that the file exists.
    load_classifier(&cfg.classifier)?;
    cfg.load_colorbank()?;

    info!("doctor: OK");
    Ok(())
}

fn classifier_cmd(cfg: &SystemConfig, cmd: ClassifierCmd) -> Result<()> {
    match cmd {
        ClassifierCmd::Inspect => {
            let classifier = load_classifier(&cfg.classifier)?;
            println!("kind: {}", cfg.classifier.kind);
            println!("key: {}", cfg.classifier.key);
            println!("model: {}", cfg.classifier.model_path);
            println!("detects_target: {}", classifier.detects_target());
            println!("requires_features: {}", classifier.requires_features());
            println!("classes ({}):", classifier.class_count());
            for i in 0..classifier.class_count() {
                let label = classifier.label(i);
                println!("  {} -> {}", label.name, label.category.as_str());
            }
            Ok(())
        }
    }
}
