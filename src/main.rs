use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use forecast_forge::config::EngineConfig;
use forecast_forge::registry::{ForecastReport, ModelRegistry, ModelResult};
use forecast_forge::scheduler::JobState;
use forecast_forge::series::Series;
use forecast_forge::shutdown::install_shutdown_handler;
use forecast_forge::Engine;

#[derive(Parser, Debug)]
#[command(name = "forecast-forge")]
#[command(version)]
#[command(about = "Rank forecasting models against a time series")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Evaluate every registered model against a series and rank them by MAPE
    Evaluate {
        /// File with the series: a JSON array or one number per line
        file: PathBuf,

        #[command(flatten)]
        engine: EngineArgs,

        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },

    /// Retrain one model on the full series and forecast ahead
    Forecast {
        /// File with the series: a JSON array or one number per line
        file: PathBuf,

        /// Model name, as listed by `models`
        #[arg(long, short = 'm')]
        model: String,

        /// Periods to forecast
        #[arg(long, default_value = "12")]
        horizon: usize,

        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },

    /// List registered models in evaluation order
    Models,
}

#[derive(Parser, Debug)]
struct EngineArgs {
    /// Number of concurrent workers
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Minimum number of observations accepted
    #[arg(long, default_value = "12")]
    min_observations: usize,

    /// Maximum number of observations accepted
    #[arg(long, default_value = "120")]
    max_observations: usize,

    /// Give up on the job after this many seconds (0 disables the deadline)
    #[arg(long, default_value = "600")]
    timeout_secs: u64,

    /// Interval between status polls, in milliseconds
    #[arg(long, default_value = "200", value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval_ms: u64,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct EvaluationOutput {
    job_id: String,
    #[serde(flatten)]
    state: JobState,
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn handle_evaluate(
    file: PathBuf,
    args: EngineArgs,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let series = Series::read_from(&file).await?;

    let config = EngineConfig::default()
        .with_workers(args.workers)
        .with_observation_bounds(args.min_observations, args.max_observations)
        .with_job_timeout_ms(match args.timeout_secs {
            0 => None,
            secs => Some(secs * 1_000),
        });

    let engine = Engine::in_memory(config, ModelRegistry::baseline())?;
    install_shutdown_handler(engine.shutdown_token());
    engine.start().await;

    let gateway = engine.gateway();
    let job_id = gateway.submit(series.values().to_vec()).await?;
    tracing::info!(job_id = %job_id, file = %file.display(), "Evaluation submitted");

    let shutdown = engine.shutdown_token();
    let mut updates = gateway.watch(job_id, Duration::from_millis(args.poll_interval_ms));
    let mut final_state = None;

    loop {
        let update = tokio::select! {
            _ = shutdown.cancelled() => break,
            update = updates.next() => update,
        };
        let Some(update) = update else { break };
        let state = update?;

        if let JobState::Progress { progress } = &state {
            if matches!(output_format, OutputFormat::Table) {
                println!(
                    "[{}/{}] {}",
                    progress.current, progress.total, progress.label
                );
            }
        }
        if state.is_terminal() {
            final_state = Some(state);
        }
    }

    engine.shutdown().await;

    match final_state {
        Some(state) => print_evaluation(job_id, state, output_format)?,
        None => {
            eprintln!("Interrupted before job {} finished", job_id);
            std::process::exit(130);
        }
    }
    Ok(())
}

fn print_evaluation(
    job_id: Uuid,
    state: JobState,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => {
            let failed = matches!(state, JobState::Failure { .. });
            let output = EvaluationOutput {
                job_id: job_id.to_string(),
                state,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
            if failed {
                std::process::exit(1);
            }
        }
        OutputFormat::Table => match state {
            JobState::Success { results } => print_ranking(&results),
            JobState::Failure { error, code, model } => {
                eprintln!("Job {} failed ({})", job_id, code);
                if let Some(model) = model {
                    eprintln!("Model: {}", model);
                }
                eprintln!("Error: {}", error);
                std::process::exit(1);
            }
            other => println!("Job {} ended in {}", job_id, other.status()),
        },
    }
    Ok(())
}

fn print_ranking(results: &[ModelResult]) {
    println!();
    println!(
        "{:<5} {:<24} {:>10} {:>12} {:>14} {:>12}",
        "RANK", "MODEL", "MAPE %", "MAE", "MSE", "RMSE"
    );
    println!("{}", "-".repeat(82));
    for (rank, result) in results.iter().enumerate() {
        println!(
            "{:<5} {:<24} {:>10.3} {:>12.3} {:>14.3} {:>12.3}",
            rank + 1,
            result.model_name,
            result.metrics.mape,
            result.metrics.mae,
            result.metrics.mse,
            result.metrics.rmse
        );
    }
}

async fn handle_forecast(
    file: PathBuf,
    model: String,
    horizon: usize,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let series = Series::read_from(&file).await?;
    let config = EngineConfig::default().with_forecast_horizon(horizon);
    let engine = Engine::in_memory(config, ModelRegistry::baseline())?;

    let report = engine
        .gateway()
        .forecast(series.values().to_vec(), &model)
        .await?;
    print_forecast(&report, output_format)
}

fn print_forecast(
    report: &ForecastReport,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Table => {
            println!("Model: {}", report.model_name);
            println!();
            println!(
                "{:<8} {:>14} {:>14} {:>14}",
                "PERIOD", "PREDICTION", "LOWER", "UPPER"
            );
            println!("{}", "-".repeat(53));
            for point in &report.forecast {
                println!(
                    "{:<8} {:>14.3} {:>14.3} {:>14.3}",
                    point.period, point.prediction, point.lower_bound, point.upper_bound
                );
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Evaluate {
            file,
            engine,
            output,
        } => {
            handle_evaluate(file, engine, &output).await?;
        }
        Commands::Forecast {
            file,
            model,
            horizon,
            output,
        } => {
            handle_forecast(file, model, horizon, &output).await?;
        }
        Commands::Models => {
            for (index, name) in ModelRegistry::baseline().names().iter().enumerate() {
                println!("{}. {}", index + 1, name);
            }
        }
    }

    Ok(())
}
