use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dlrmforge::config::TrainingConfig;
use dlrmforge::dlrm::{CRITEO_1TB_SLOT_SIZES, CRITEO_40M_SLOT_SIZES};
use dlrmforge::engine::{launch, DryRunEngine, TrainingEngine};
use dlrmforge::logging::{init_with_config, LogFormat, LogLevel, LoggingConfig};
use dlrmforge::sharding::{Placement, ShardingPlan};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "dlrmforge-cli", version)]
#[command(about = "Plan embedding sharding and dry-run DLRM training configs", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Dataset {
    /// Criteo with tables capped at 40M rows
    Criteo40m,
    /// Full Criteo 1TB
    Criteo1tb,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the sharding plan for a list of table sizes
    Plan {
        /// Comma-separated vocabulary sizes, one per table
        #[arg(long, value_delimiter = ',', conflicts_with = "dataset")]
        slots: Option<Vec<u64>>,
        /// Use the slot sizes of a known dataset
        #[arg(long, value_enum, default_value = "criteo40m")]
        dataset: Dataset,
        /// Number of GPUs
        #[arg(long, default_value_t = 8)]
        gpus: usize,
        /// Print the plan as JSON for the engine
        #[arg(long)]
        json: bool,
    },
    /// Write the reference training config
    InitConfig {
        /// Destination JSON file
        #[arg(long)]
        out: PathBuf,
    },
    /// Compile a config and print the model summary
    Summary {
        #[arg(long)]
        config: PathBuf,
    },
    /// Dry-run the training schedule of a config
    Train {
        #[arg(long)]
        config: PathBuf,
        /// Override the number of iterations
        #[arg(long)]
        max_iter: Option<usize>,
    },
}

fn load_config(path: &Path) -> Result<TrainingConfig> {
    TrainingConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

/// Config for `train`, with the iteration override applied
fn train_config(path: &Path, max_iter: Option<usize>) -> Result<TrainingConfig> {
    let mut config = load_config(path)?;
    if let Some(max_iter) = max_iter {
        config.fit.max_iter = max_iter;
    }
    Ok(config)
}

fn plan_slots(slots: Option<Vec<u64>>, dataset: Dataset) -> Vec<u64> {
    slots.unwrap_or_else(|| match dataset {
        Dataset::Criteo40m => CRITEO_40M_SLOT_SIZES.to_vec(),
        Dataset::Criteo1tb => CRITEO_1TB_SLOT_SIZES.to_vec(),
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_with_config(
        &LoggingConfig::new()
            .with_level(LogLevel::from_verbosity(cli.verbose))
            .with_format(if cli.json_logs {
                LogFormat::Json
            } else {
                LogFormat::Human
            })
            .overlay_env(),
    );

    match cli.command {
        Commands::Plan {
            slots,
            dataset,
            gpus,
            json,
        } => {
            let slots = plan_slots(slots, dataset);
            let plan = ShardingPlan::try_new(&slots, gpus).context("building sharding plan")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print!("{}", plan);
                info!(
                    single_device = plan.group(Placement::SingleDevice).len(),
                    replicated = plan.group(Placement::Replicated).len(),
                    "plan ready"
                );
            }
        }
        Commands::InitConfig { out } => {
            TrainingConfig::reference()
                .to_file(&out)
                .with_context(|| format!("writing {}", out.display()))?;
            println!("wrote {}", out.display());
        }
        Commands::Summary { config } => {
            let config = load_config(&config)?;
            let model = dlrmforge::build_model(&config).context("building model")?;
            let mut engine = DryRunEngine::new();
            engine.compile(&model).context("compiling model")?;
            print!("{}", engine.summary()?);
        }
        Commands::Train { config, max_iter } => {
            let config = train_config(&config, max_iter)?;
            let model = dlrmforge::build_model(&config).context("building model")?;
            let mut engine = DryRunEngine::new();
            let (summary, report) =
                launch(&mut engine, &model, &config.fit).context("dry-run training")?;
            print!("{}", summary);
            println!();
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
