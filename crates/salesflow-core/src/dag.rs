//! A small directed acyclic task graph and a sequential runner for it.
//!
//! Tasks run one at a time in a deterministic topological order. A task that
//! keeps failing after its retries marks everything downstream of it as
//! `UpstreamFailed`; unrelated branches still run.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::RetryPolicy;
use crate::error::{DagError, PipelineError, Result};

/// Per-attempt information handed to a task.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub dag_id: String,
    pub attempt: u32,
}

#[async_trait]
pub trait Task: Send + Sync {
    fn id(&self) -> &str;
    async fn run(&self, ctx: &RunContext) -> Result<()>;
}

struct TaskNode {
    task: Arc<dyn Task>,
    upstream: Vec<String>,
}

pub struct Dag {
    dag_id: String,
    nodes: Vec<TaskNode>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for Dag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dag")
            .field("dag_id", &self.dag_id)
            .field("tasks", &self.task_ids())
            .finish()
    }
}

impl Dag {
    pub fn new(dag_id: impl Into<String>) -> Self {
        Self {
            dag_id: dag_id.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn dag_id(&self) -> &str {
        &self.dag_id
    }

    /// Add a task that runs after every task named in `upstream`. Upstream
    /// tasks must already be present.
    pub fn add_task(
        &mut self,
        task: Arc<dyn Task>,
        upstream: &[&str],
    ) -> std::result::Result<(), DagError> {
        let id = task.id().to_string();
        if self.index.contains_key(&id) {
            return Err(DagError::DuplicateTask(id));
        }
        for name in upstream {
            if !self.index.contains_key(*name) {
                return Err(DagError::UnknownDependency {
                    task: id,
                    upstream: name.to_string(),
                });
            }
        }

        self.index.insert(id, self.nodes.len());
        self.nodes.push(TaskNode {
            task,
            upstream: upstream.iter().map(|s| s.to_string()).collect(),
        });
        Ok(())
    }

    /// Declare an extra edge between two existing tasks. Unlike
    /// [`Dag::add_task`] this can close a cycle, which
    /// [`Dag::topological_order`] then reports.
    #[cfg(test)]
    pub(crate) fn add_edge(&mut self, upstream: &str, downstream: &str) -> std::result::Result<(), DagError> {
        if !self.index.contains_key(upstream) {
            return Err(DagError::UnknownDependency {
                task: downstream.to_string(),
                upstream: upstream.to_string(),
            });
        }
        let idx = *self
            .index
            .get(downstream)
            .ok_or_else(|| DagError::UnknownTask(downstream.to_string()))?;
        let node = &mut self.nodes[idx];
        if !node.upstream.iter().any(|u| u == upstream) {
            node.upstream.push(upstream.to_string());
        }
        Ok(())
    }

    pub fn task_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.task.id()).collect()
    }

    pub fn upstream_of(&self, id: &str) -> std::result::Result<&[String], DagError> {
        self.index
            .get(id)
            .map(|&idx| self.nodes[idx].upstream.as_slice())
            .ok_or_else(|| DagError::UnknownTask(id.to_string()))
    }

    pub fn task(&self, id: &str) -> std::result::Result<Arc<dyn Task>, DagError> {
        self.index
            .get(id)
            .map(|&idx| Arc::clone(&self.nodes[idx].task))
            .ok_or_else(|| DagError::UnknownTask(id.to_string()))
    }

    /// Kahn's algorithm; ready tasks are taken in insertion order.
    pub fn topological_order(&self) -> std::result::Result<Vec<&str>, DagError> {
        let mut remaining: Vec<usize> = self.nodes.iter().map(|n| n.upstream.len()).collect();
        let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (idx, node) in self.nodes.iter().enumerate() {
            for up in &node.upstream {
                downstream[self.index[up.as_str()]].push(idx);
            }
        }

        let mut ready: BTreeSet<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, &count)| count == 0)
            .map(|(idx, _)| idx)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(idx) = ready.pop_first() {
            order.push(self.nodes[idx].task.id());
            for &next in &downstream[idx] {
                remaining[next] -= 1;
                if remaining[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() != self.nodes.len() {
            let stuck = remaining
                .iter()
                .enumerate()
                .filter(|(_, &count)| count > 0)
                .map(|(idx, _)| self.nodes[idx].task.id().to_string())
                .collect();
            return Err(DagError::Cycle(stuck));
        }
        Ok(order)
    }

    /// Every task that transitively depends on `id`, in insertion order.
    pub fn downstream_of(&self, id: &str) -> std::result::Result<Vec<&str>, DagError> {
        if !self.index.contains_key(id) {
            return Err(DagError::UnknownTask(id.to_string()));
        }

        let mut reached: BTreeSet<usize> = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for (idx, node) in self.nodes.iter().enumerate() {
                if node.upstream.iter().any(|u| u == current) && reached.insert(idx) {
                    queue.push_back(node.task.id());
                }
            }
        }
        Ok(reached.into_iter().map(|idx| self.nodes[idx].task.id()).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    Success,
    Failed { error: String },
    UpstreamFailed { upstream: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub attempts: u32,
    #[serde(flatten)]
    pub state: TaskState,
}

impl TaskOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == TaskState::Success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagRun {
    pub run_id: Uuid,
    pub dag_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tasks: Vec<TaskOutcome>,
}

impl DagRun {
    pub fn succeeded(&self) -> bool {
        self.tasks.iter().all(TaskOutcome::succeeded)
    }

    pub fn outcome(&self, task_id: &str) -> Option<&TaskOutcome> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }
}

#[derive(Debug, Clone)]
pub struct DagRunner {
    retry: RetryPolicy,
}

impl DagRunner {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Run every task once in dependency order.
    pub async fn run(&self, dag: &Dag) -> Result<DagRun> {
        let order = dag.topological_order()?;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = tracing::info_span!("dag_run", dag_id = %dag.dag_id(), %run_id);

        async {
            info!(tasks = order.len(), "dag run started");
            let mut failed: HashMap<String, String> = HashMap::new();
            let mut outcomes = Vec::with_capacity(order.len());

            for id in order {
                let upstream = dag.upstream_of(id)?;
                if let Some(blocker) = upstream.iter().find_map(|u| failed.get(u).cloned()) {
                    warn!(task_id = id, upstream = %blocker, "skipping task, upstream failed");
                    failed.insert(id.to_string(), blocker.clone());
                    outcomes.push(TaskOutcome {
                        task_id: id.to_string(),
                        attempts: 0,
                        state: TaskState::UpstreamFailed { upstream: blocker },
                    });
                    continue;
                }

                let outcome = self.run_with_retries(dag, id, run_id).await?;
                if !outcome.succeeded() {
                    failed.insert(id.to_string(), id.to_string());
                }
                outcomes.push(outcome);
            }

            let run = DagRun {
                run_id,
                dag_id: dag.dag_id().to_string(),
                started_at,
                finished_at: Utc::now(),
                tasks: outcomes,
            };
            if run.succeeded() {
                info!("dag run succeeded");
            } else {
                error!(failed = failed.len(), "dag run finished with failures");
            }
            Ok::<DagRun, PipelineError>(run)
        }
        .instrument(span)
        .await
    }

    /// Run one task on its own, ignoring its upstream tasks.
    pub async fn run_task(&self, dag: &Dag, task_id: &str) -> Result<TaskOutcome> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("task_run", dag_id = %dag.dag_id(), %run_id);
        self.run_with_retries(dag, task_id, run_id)
            .instrument(span)
            .await
    }

    async fn run_with_retries(&self, dag: &Dag, task_id: &str, run_id: Uuid) -> Result<TaskOutcome> {
        let task = dag.task(task_id)?;
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let ctx = RunContext {
                run_id,
                dag_id: dag.dag_id().to_string(),
                attempt,
            };
            info!(task_id, attempt, "task started");

            match task.run(&ctx).await {
                Ok(()) => {
                    info!(task_id, attempt, "task succeeded");
                    return Ok(TaskOutcome {
                        task_id: task_id.to_string(),
                        attempts: attempt,
                        state: TaskState::Success,
                    });
                }
                Err(err) if attempt < max_attempts => {
                    warn!(
                        task_id,
                        attempt,
                        error = %err,
                        retry_in_secs = self.retry.delay.as_secs(),
                        "task failed, will retry"
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(err) => {
                    error!(task_id, attempt, error = %err, "task failed");
                    return Ok(TaskOutcome {
                        task_id: task_id.to_string(),
                        attempts: attempt,
                        state: TaskState::Failed {
                            error: err.to_string(),
                        },
                    });
                }
            }
        }
    }
}
