use std::path::PathBuf;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use exercise_form::{
    aggregate_rows, artifacts, read_table, EngineConfig, ExerciseEngine, Trainer,
};

#[derive(Parser, Debug)]
#[clap(name = "exercise-form", version, about)]
struct CliArgs {
    /// TOML configuration file. Missing keys keep their defaults.
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Threshold preset used when no configuration file is given.
    #[clap(long, global = true, default_value = "default")]
    pub preset: Preset,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify one keypoint CSV and print the analysis as JSON.
    Infer {
        /// Keypoint table of one clip.
        #[clap(long)]
        csv: PathBuf,

        /// Directory holding network.json, scaler.json and vocabulary.json.
        #[clap(long)]
        artifacts: Option<PathBuf>,

        /// Pretty-print the JSON output.
        #[clap(long)]
        pretty: bool,
    },

    /// Train the sequence classifier on labelled clips.
    Train {
        /// Labelled keypoint tables, one clip per file.
        #[clap(required = true)]
        csv: Vec<PathBuf>,

        /// Output directory for the artifacts.
        #[clap(long)]
        out: PathBuf,

        /// Override the configured number of epochs.
        #[clap(long)]
        epochs: Option<usize>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Preset {
    Default,
    Strict,
    Lenient,
}

fn load_config(cli_args: &CliArgs) -> Result<EngineConfig> {
    match &cli_args.config {
        Some(path) => EngineConfig::from_toml_file(path)
            .with_context(|| format!("Error loading configuration from {}", path.display())),
        None => Ok(match cli_args.preset {
            Preset::Default => EngineConfig::default(),
            Preset::Strict => EngineConfig::strict(),
            Preset::Lenient => EngineConfig::lenient(),
        }),
    }
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()
        .context("Error installing the log subscriber")?;

    let config = load_config(&cli_args)?;

    match cli_args.command {
        Command::Infer {
            csv,
            artifacts,
            pretty,
        } => {
            let engine = match artifacts {
                Some(dir) => ExerciseEngine::with_artifacts(config, dir)?,
                None => ExerciseEngine::new(config)?,
            };
            info!(csv = %csv.display(), classifier = engine.has_classifier(), "analysing clip");

            let analysis = engine
                .analyze_csv(&csv)
                .with_context(|| format!("Error analysing {}", csv.display()))?;

            let json = if pretty {
                serde_json::to_string_pretty(&analysis)?
            } else {
                serde_json::to_string(&analysis)?
            };
            println!("{json}");
        }
        Command::Train { csv, out, epochs } => {
            let config = match epochs {
                Some(epochs) => config.with_epochs(epochs),
                None => config,
            };
            config.validate()?;

            let sequences = csv
                .iter()
                .map(|path| {
                    let rows = read_table(path)
                        .with_context(|| format!("Error reading {}", path.display()))?;
                    aggregate_rows(rows).with_context(|| format!("No frames in {}", path.display()))
                })
                .collect::<Result<Vec<_>>>()?;

            let state = Trainer::new(&config).fit_sequences(&sequences)?;
            artifacts::save(&state, &out)
                .with_context(|| format!("Error saving artifacts to {}", out.display()))?;

            // Reload so a broken save fails here rather than at inference.
            let engine = ExerciseEngine::from_artifacts(config, &out)
                .with_context(|| format!("Error reloading artifacts from {}", out.display()))?;
            anyhow::ensure!(engine.has_classifier(), "Saved artifacts are missing");
            info!(
                clips = sequences.len(),
                out = %out.display(),
                input_width = engine.classifier().map_or(0, |c| c.input_width()),
                "training complete"
            );
        }
    }

    Ok(())
}
