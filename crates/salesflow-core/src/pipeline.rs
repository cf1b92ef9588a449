//! The sales revenue DAG: one extract feeding two aggregate-then-render branches.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::artifacts;
use crate::charts;
use crate::config::{ArtifactPaths, ChartConfig, PipelineConfig};
use crate::daily_revenue;
use crate::dag::{Dag, DagRun, DagRunner, RunContext, Task, TaskOutcome};
use crate::error::Result;
use crate::extract::{self, OrderSource};
use crate::top_products;

pub const FETCH_ORDER_DATA: &str = "fetch_order_data";
pub const PROCESS_DAILY_REVENUE: &str = "process_daily_revenue";
pub const VISUALIZE_DAILY_REVENUE: &str = "visualize_daily_revenue";
pub const CALCULATE_TOP_PRODUCTS: &str = "calculate_top_products";
pub const VISUALIZE_TOP_PRODUCTS: &str = "visualize_top_products";

/// The five stages. Each variant knows which artifacts it reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FetchOrderData,
    ProcessDailyRevenue,
    VisualizeDailyRevenue,
    CalculateTopProducts,
    VisualizeTopProducts,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::FetchOrderData,
        Stage::ProcessDailyRevenue,
        Stage::VisualizeDailyRevenue,
        Stage::CalculateTopProducts,
        Stage::VisualizeTopProducts,
    ];

    pub fn task_id(&self) -> &'static str {
        match self {
            Stage::FetchOrderData => FETCH_ORDER_DATA,
            Stage::ProcessDailyRevenue => PROCESS_DAILY_REVENUE,
            Stage::VisualizeDailyRevenue => VISUALIZE_DAILY_REVENUE,
            Stage::CalculateTopProducts => CALCULATE_TOP_PRODUCTS,
            Stage::VisualizeTopProducts => VISUALIZE_TOP_PRODUCTS,
        }
    }

    pub fn upstream(&self) -> &'static [&'static str] {
        match self {
            Stage::FetchOrderData => &[],
            Stage::ProcessDailyRevenue => &[FETCH_ORDER_DATA],
            Stage::VisualizeDailyRevenue => &[PROCESS_DAILY_REVENUE],
            Stage::CalculateTopProducts => &[FETCH_ORDER_DATA],
            Stage::VisualizeTopProducts => &[CALCULATE_TOP_PRODUCTS],
        }
    }
}

struct StageTask {
    stage: Stage,
    source: Arc<dyn OrderSource>,
    paths: ArtifactPaths,
    charts: ChartConfig,
}

#[async_trait]
impl Task for StageTask {
    fn id(&self) -> &str {
        self.stage.task_id()
    }

    async fn run(&self, _ctx: &RunContext) -> Result<()> {
        let paths = &self.paths;
        match self.stage {
            Stage::FetchOrderData => {
                extract::extract_order_lines(self.source.as_ref(), &paths.raw_extract).await?;
            }
            Stage::ProcessDailyRevenue => {
                daily_revenue::process_daily_revenue(&paths.raw_extract, &paths.daily_revenue)?;
            }
            Stage::VisualizeDailyRevenue => {
                charts::visualize_daily_revenue(
                    &paths.daily_revenue,
                    &paths.daily_revenue_chart,
                    &self.charts,
                )?;
            }
            Stage::CalculateTopProducts => {
                top_products::calculate_top_products(&paths.raw_extract, &paths.top_products)?;
            }
            Stage::VisualizeTopProducts => {
                charts::visualize_top_products(
                    &paths.top_products,
                    &paths.top_products_chart,
                    &self.charts,
                )?;
            }
        }
        Ok(())
    }
}

/// Build the DAG: fetch -> daily -> daily chart, fetch -> top -> top chart.
pub fn sales_dag(source: Arc<dyn OrderSource>, config: &PipelineConfig) -> Result<Dag> {
    let paths = config.artifact_paths();
    let mut dag = Dag::new(config.schedule.dag_id.clone());
    for stage in Stage::ALL {
        let task = StageTask {
            stage,
            source: Arc::clone(&source),
            paths: paths.clone(),
            charts: config.charts.clone(),
        };
        dag.add_task(Arc::new(task), stage.upstream())?;
    }
    Ok(dag)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFingerprint {
    pub name: String,
    pub path: PathBuf,
    pub blake3: String,
}

/// What a run did, persisted next to the artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(flatten)]
    pub run: DagRun,
    pub artifacts: Vec<ArtifactFingerprint>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.run.succeeded()
    }

    pub fn tasks(&self) -> &[TaskOutcome] {
        &self.run.tasks
    }
}

/// Fingerprint every tabular artifact currently on disk.
pub fn fingerprint_tables(paths: &ArtifactPaths) -> Result<Vec<ArtifactFingerprint>> {
    let mut out = Vec::new();
    for (name, path) in paths.tables() {
        if path.is_file() {
            out.push(ArtifactFingerprint {
                name: name.to_string(),
                path: path.to_path_buf(),
                blake3: artifacts::fingerprint(path)?,
            });
        }
    }
    Ok(out)
}

/// Run the whole DAG once and write the run report.
pub async fn run_pipeline(source: Arc<dyn OrderSource>, config: &PipelineConfig) -> Result<RunReport> {
    let dag = sales_dag(source, config)?;
    let runner = DagRunner::new(config.schedule.retry_policy());
    let run = runner.run(&dag).await?;

    let paths = config.artifact_paths();
    let report = RunReport {
        run,
        artifacts: fingerprint_tables(&paths)?,
    };

    artifacts::ensure_parent_dir(&paths.run_report)?;
    fs::write(&paths.run_report, serde_json::to_vec_pretty(&report)?)?;
    info!(path = %paths.run_report.display(), succeeded = report.succeeded(), "run report written");
    Ok(report)
}

/// Run a single stage by task id, without its upstream tasks.
pub async fn run_single_task(
    source: Arc<dyn OrderSource>,
    config: &PipelineConfig,
    task_id: &str,
) -> Result<TaskOutcome> {
    let dag = sales_dag(source, config)?;
    let runner = DagRunner::new(config.schedule.retry_policy());
    runner.run_task(&dag, task_id).await
}
