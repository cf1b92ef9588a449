use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use salesflow_core::config::PipelineConfig;
use salesflow_core::dag::{TaskOutcome, TaskState};
use salesflow_core::extract::{OrderSource, PgOrderSource, StaticOrderSource};
use salesflow_core::pipeline::{run_pipeline, run_single_task, sales_dag};
use salesflow_core::{db, schedule};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Weekly sales revenue pipeline", long_about = None)]
struct Cli {
    /// Path to a salesflow.toml configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every task once, in dependency order
    Run,
    /// Run a single task without its upstream tasks
    Task(TaskArgs),
    /// Run on the configured cadence until interrupted
    Schedule(ScheduleArgs),
    /// Print the task graph and the next scheduled run
    Show,
}

#[derive(Args, Debug)]
struct TaskArgs {
    /// Task id, e.g. fetch_order_data
    task_id: String,
}

#[derive(Args, Debug, Default)]
struct ScheduleArgs {
    /// Run once immediately before waiting for the first boundary
    #[arg(long)]
    run_now: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    let config =
        PipelineConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Run => handle_run(&config).await,
        Command::Task(args) => handle_task(&config, &args.task_id).await,
        Command::Schedule(args) => handle_schedule(config, args).await,
        Command::Show => handle_show(&config),
    }
}

async fn order_source(config: &PipelineConfig) -> Result<Arc<dyn OrderSource>> {
    let pool = db::connect(&config.database)
        .await
        .with_context(|| format!("failed to connect '{}'", config.database.connection_id))?;
    Ok(Arc::new(PgOrderSource::new(pool)))
}

async fn handle_run(config: &PipelineConfig) -> Result<()> {
    let source = order_source(config).await?;
    let report = run_pipeline(source, config).await?;

    println!("{}", outcome_table(report.tasks()));
    if !report.succeeded() {
        bail!("run {} finished with failed tasks", report.run.run_id);
    }
    Ok(())
}

async fn handle_task(config: &PipelineConfig, task_id: &str) -> Result<()> {
    let source = order_source(config).await?;
    let outcome = run_single_task(source, config, task_id).await?;

    println!("{}", outcome_table(std::slice::from_ref(&outcome)));
    if !outcome.succeeded() {
        bail!("task {task_id} failed");
    }
    Ok(())
}

async fn handle_schedule(config: PipelineConfig, args: ScheduleArgs) -> Result<()> {
    let cadence = config.schedule.cadence;
    let source = order_source(&config).await?;
    info!(dag_id = %config.schedule.dag_id, ?cadence, "scheduler started");

    schedule::run_forever(cadence, args.run_now, |logical_date| {
        let source = Arc::clone(&source);
        let config = config.clone();
        async move {
            info!(%logical_date, "starting scheduled run");
            run_pipeline(source, &config)
                .await
                .map(|report| report.succeeded())
        }
    })
    .await;
    Ok(())
}

fn handle_show(config: &PipelineConfig) -> Result<()> {
    let dag = sales_dag(Arc::new(StaticOrderSource::default()), config)?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["#", "task", "upstream"]);
    for (idx, task_id) in dag.topological_order()?.into_iter().enumerate() {
        let upstream = dag.upstream_of(task_id)?.join(", ");
        table.add_row(vec![(idx + 1).to_string(), task_id.to_string(), upstream]);
    }

    println!("dag: {}", dag.dag_id());
    println!("{table}");
    println!(
        "cadence: {:?}, retries: {} (delay {}s), next run: {}",
        config.schedule.cadence,
        config.schedule.retries,
        config.schedule.retry_delay_secs,
        config.schedule.cadence.next_fire_after(Utc::now())
    );
    println!("output dir: {}", config.artifacts.output_dir.display());
    Ok(())
}

fn outcome_table(outcomes: &[TaskOutcome]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["task", "state", "attempts", "detail"]);
    for outcome in outcomes {
        let (state, detail) = match &outcome.state {
            TaskState::Success => ("success", String::new()),
            TaskState::Failed { error } => ("failed", error.clone()),
            TaskState::UpstreamFailed { upstream } => {
                ("upstream_failed", format!("blocked by {upstream}"))
            }
        };
        table.add_row(vec![
            outcome.task_id.clone(),
            state.to_string(),
            outcome.attempts.to_string(),
            detail,
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_task_subcommand_with_global_config() {
        let cli = Cli::try_parse_from([
            "salesflow",
            "task",
            "calculate_top_products",
            "--config",
            "/etc/salesflow.toml",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/etc/salesflow.toml")));
        match cli.command {
            Command::Task(args) => assert_eq!(args.task_id, "calculate_top_products"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn schedule_run_now_flag() {
        let cli = Cli::try_parse_from(["salesflow", "schedule", "--run-now"]).unwrap();
        assert!(matches!(cli.command, Command::Schedule(ScheduleArgs { run_now: true })));
    }

    #[test]
    fn outcome_table_lists_every_task() {
        let outcomes = vec![
            TaskOutcome {
                task_id: "fetch_order_data".to_string(),
                attempts: 2,
                state: TaskState::Failed {
                    error: "connection refused".to_string(),
                },
            },
            TaskOutcome {
                task_id: "process_daily_revenue".to_string(),
                attempts: 0,
                state: TaskState::UpstreamFailed {
                    upstream: "fetch_order_data".to_string(),
                },
            },
        ];

        let rendered = outcome_table(&outcomes).to_string();
        assert!(rendered.contains("connection refused"));
        assert!(rendered.contains("blocked by fetch_order_data"));
    }
}
