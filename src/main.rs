//! CLI entry point for curriculum-trainer-rs.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use curriculum_trainer_rs::checkpoint::CheckpointStore;
use curriculum_trainer_rs::config::{Strategy, TrainConfig};
use curriculum_trainer_rs::error::{Result, TrainError};

#[derive(Parser)]
#[command(name = "curriculum-trainer")]
#[command(about = "Staged curriculum training orchestrator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    Validate {
        /// Path to configuration file
        config: String,
    },
    /// Generate a sample configuration file
    Init {
        /// Output path for the config file
        #[arg(default_value = "config.yaml")]
        output: String,
        /// Trainer strategy (normal, minibatch, layerwise, catewise, categroup)
        #[arg(long, default_value = "normal")]
        strategy: String,
    },
    /// Inspect the latest checkpoint of a run
    Inspect {
        /// Checkpoint directory
        #[arg(long)]
        checkpoint_dir: String,
        /// Logical run id
        #[arg(long)]
        run_id: String,
    },
}

fn parse_strategy(name: &str) -> Result<Strategy> {
    match name {
        "normal" => Ok(Strategy::Normal),
        "minibatch" => Ok(Strategy::Minibatch),
        "layerwise" => Ok(Strategy::Layerwise),
        "catewise" => Ok(Strategy::Catewise),
        "categroup" => Ok(Strategy::Categroup),
        other => Err(TrainError::Config(format!(
            "no trainer strategy named '{other}'"
        ))),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => {
            tracing::info!("validating configuration: {}", config);
            let config = TrainConfig::from_file(&config)?;
            config.validate()?;
            println!("✓ Configuration is valid");
            println!("  Run id: {}", config.run_id);
            println!("  Strategy: {:?}", config.strategy);
            println!("  Checkpoint dir: {}", config.checkpoint_dir);
        }
        Commands::Init { output, strategy } => {
            let strategy = parse_strategy(&strategy)?;
            tracing::info!("generating config for strategy: {:?}", strategy);
            let config = TrainConfig::sample(strategy);
            config.to_file(&output)?;
            println!("✓ Configuration written to: {output}");
        }
        Commands::Inspect {
            checkpoint_dir,
            run_id,
        } => {
            let store = CheckpointStore::open(&checkpoint_dir, run_id.as_str())?;
            match store.latest() {
                Some(checkpoint) => {
                    println!("✓ Latest checkpoint for run '{run_id}'");
                    println!("  Saved at: {}", checkpoint.saved_at);
                    println!("  Batch: {}", checkpoint.state.batch);
                    println!("  Epoch: {}", checkpoint.state.epoch);
                    println!("  Layers: {}", checkpoint.layers.len());
                    println!(
                        "  Train records: {}",
                        checkpoint.state.train_records.len()
                    );
                    println!("  Test records: {}", checkpoint.state.test_records.len());
                }
                None => println!("No checkpoint found for run '{run_id}'"),
            }
        }
    }

    Ok(())
}
