use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use sbi_benchmarks::Benchmark;
use sbi_networks::ResNet;
use sbi_simulators::{helper::random_seed, BatchShape, RandomSource, SimulationTelemetry, Tensor};
use serde::Serialize;
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

mod config;

use config::SimulationConfig;

#[derive(Parser, Debug)]
#[command(name = "sbi", version, about = "Benchmark simulation driver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Samples a batch from a task pipeline, configures it and writes JSON.
    Simulate(SimulateArgs),
    /// Prints task metadata.
    Describe {
        #[arg(long, default_value = "bernoulli_glm_raw")]
        task: String,
    },
}

#[derive(Parser, Debug)]
struct SimulateArgs {
    /// TOML configuration; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides the batch shape, e.g. `16` or `4x4`.
    #[arg(long)]
    batch_shape: Option<String>,
    /// Overrides the seed.
    #[arg(long)]
    seed: Option<u64>,
    /// Output file; stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct FieldReport {
    dtype: String,
    shape: Vec<usize>,
    values: Vec<f64>,
}

impl From<&Tensor> for FieldReport {
    fn from(tensor: &Tensor) -> Self {
        Self {
            dtype: tensor.dtype().to_string(),
            shape: tensor.shape().to_vec(),
            values: tensor.to_f64_vec(),
        }
    }
}

#[derive(Debug, Serialize)]
struct RunReport {
    run_id: String,
    generated_at: DateTime<Utc>,
    task: Benchmark,
    seed: u64,
    batch_shape: BatchShape,
    fields: IndexMap<String, FieldReport>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Simulate(args) => handle_simulate(args),
        Commands::Describe { task } => {
            let task: Benchmark = task.parse()?;
            println!("{}", serde_json::to_string_pretty(&task.info())?);
            Ok(())
        }
    }
}

fn handle_simulate(args: SimulateArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => SimulationConfig::load(path)?,
        None => SimulationConfig::default(),
    };
    if let Some(shape) = &args.batch_shape {
        config.batch_shape = BatchShape::parse(shape).context("invalid --batch-shape")?;
    }
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }

    let report = run_simulation(&config)?;
    let rendered = serde_json::to_string_pretty(&report)?;
    match &args.out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            fs::write(path, rendered).with_context(|| format!("writing {}", path.display()))?;
            println!("{} | {} | {}", report.run_id, report.task, path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

fn run_simulation(config: &SimulationConfig) -> Result<RunReport> {
    let seed = config.seed.unwrap_or_else(random_seed);
    let telemetry = match &config.log_path {
        Some(path) => Some(
            SimulationTelemetry::builder("sbi-cli")
                .log_path(path)
                .build()
                .with_context(|| format!("opening log {}", path.display()))?,
        ),
        None => None,
    };

    let forward = config
        .task
        .simulate(
            &config.batch_shape,
            RandomSource::seeded(seed),
            config.num_observations,
            telemetry.as_ref(),
        )
        .with_context(|| format!("sampling {}", config.task))?;
    let forward = config.cast_dtypes.apply(forward);
    let mut configured = config
        .task
        .configure(&forward, &config.configurator_mode, config.as_summary_condition)
        .context("configuring simulation output")?;

    if let Some(network) = config.network {
        let summaries = configured
            .get("summary_conditions")
            .context("configurator produced no summary_conditions to embed")?;
        let features = summaries.shape().last().copied().unwrap_or(1);
        let embedding = ResNet::new(features, network, &RandomSource::seeded(seed))
            .forward_tensor(summaries)
            .context("embedding summary conditions")?;
        configured.insert("summary_embeddings", embedding);
    }

    let fields: IndexMap<String, FieldReport> = configured
        .iter()
        .map(|(name, tensor)| (name.to_string(), FieldReport::from(tensor)))
        .collect();
    let report = RunReport {
        run_id: format!("run-{}", Uuid::new_v4()),
        generated_at: Utc::now(),
        task: config.task,
        seed,
        batch_shape: config.batch_shape.clone(),
        fields,
    };
    if let Some(telemetry) = &telemetry {
        let _ = telemetry.log(
            LogLevel::Info,
            "simulation.run.completed",
            json!({
                "run_id": report.run_id,
                "task": config.task.name(),
                "seed": seed,
                "fields": configured.field_names(),
            }),
        );
    }
    Ok(report)
}
