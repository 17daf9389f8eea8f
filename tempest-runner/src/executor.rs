//! Dependency-gated execution.
//!
//! A task is spawned on a rayon scope as soon as its own upstream tasks have
//! all succeeded; whoever finishes last among them dispatches it. A task with
//! a failed or skipped upstream is marked skipped without running.
//! Independent branches keep going after a failure. There are no retries; a
//! failed task stays failed for the rest of the run.

use crate::dag::{Dag, TaskInputs, TaskNode, TaskOutputs};
use rayon::Scope;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tempest_core::TaskError;
use tracing::{error, info, warn};

/// Terminal status of one task.
#[derive(Debug)]
pub enum TaskStatus {
    Succeeded {
        outputs: TaskOutputs,
        elapsed: Duration,
    },
    Failed {
        error: TaskError,
        elapsed: Duration,
    },
    /// Never ran because `blocked_by` (a direct upstream) did not succeed.
    Skipped { blocked_by: String },
}

impl TaskStatus {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, TaskStatus::Succeeded { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Succeeded { .. } => "succeeded",
            TaskStatus::Failed { .. } => "failed",
            TaskStatus::Skipped { .. } => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Upper bound on tasks running at once. `None` uses rayon's global pool.
    pub max_parallel: Option<usize>,
}

#[derive(Debug)]
pub struct TaskReport {
    pub id: String,
    pub status: TaskStatus,
}

/// Outcome of a run, tasks in topological order.
#[derive(Debug)]
pub struct RunReport {
    pub tasks: Vec<TaskReport>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn status(&self, id: &str) -> Option<&TaskStatus> {
        self.tasks.iter().find(|t| t.id == id).map(|t| &t.status)
    }

    /// True when every task succeeded.
    pub fn is_success(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_succeeded())
    }

    pub fn succeeded(&self) -> Vec<&str> {
        self.ids_where(|s| s.is_succeeded())
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.ids_where(|s| matches!(s, TaskStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> Vec<(&str, &TaskError)> {
        self.tasks
            .iter()
            .filter_map(|t| match &t.status {
                TaskStatus::Failed { error, .. } => Some((t.id.as_str(), error)),
                _ => None,
            })
            .collect()
    }

    pub fn outputs(&self, id: &str) -> Option<&TaskOutputs> {
        match self.status(id)? {
            TaskStatus::Succeeded { outputs, .. } => Some(outputs),
            _ => None,
        }
    }

    fn ids_where(&self, pred: impl Fn(&TaskStatus) -> bool) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| pred(&t.status))
            .map(|t| t.id.as_str())
            .collect()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.tasks.iter().map(|t| t.id.len()).max().unwrap_or(0);
        for task in &self.tasks {
            write!(f, "{:<width$}  {:<9}", task.id, task.status.label())?;
            match &task.status {
                TaskStatus::Succeeded { elapsed, .. } => {
                    writeln!(f, "  {:>6} ms", elapsed.as_millis())?
                }
                TaskStatus::Failed { error, elapsed } => {
                    writeln!(f, "  {:>6} ms  {error}", elapsed.as_millis())?
                }
                TaskStatus::Skipped { blocked_by } => writeln!(f, "  blocked by {blocked_by}")?,
            }
        }
        write!(
            f,
            "{} succeeded, {} failed, {} skipped in {} ms",
            self.succeeded().len(),
            self.failed().len(),
            self.skipped().len(),
            self.elapsed.as_millis()
        )
    }
}

/// Run every task of `dag`, respecting dependencies.
pub fn execute(dag: &Dag, options: &ExecutorOptions) -> RunReport {
    let started = Instant::now();
    let pool = options.max_parallel.filter(|&n| n > 0).and_then(|n| {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build()
            .map_err(|e| warn!(error = %e, "falling back to the global rayon pool"))
            .ok()
    });

    let schedule = Schedule::new(dag);
    let run = || rayon::scope(|scope| schedule.start(scope));
    match &pool {
        Some(pool) => pool.install(run),
        None => run(),
    }
    let statuses = schedule.into_statuses();

    let tasks = dag
        .nodes()
        .iter()
        .zip(statuses)
        .map(|(node, status)| TaskReport {
            id: node.id().to_string(),
            // Unreachable for a validated graph; recorded rather than panicking.
            status: status.unwrap_or_else(|| TaskStatus::Skipped {
                blocked_by: "unresolved dependency".to_string(),
            }),
        })
        .collect();

    let report = RunReport {
        tasks,
        elapsed: started.elapsed(),
    };
    info!(
        succeeded = report.succeeded().len(),
        failed = report.failed().len(),
        skipped = report.skipped().len(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "run finished"
    );
    report
}

/// Shared bookkeeping of one run. Finished tasks record their status and
/// dispatch whatever became ready; no thread blocks waiting for others.
struct Schedule<'a> {
    dag: &'a Dag,
    progress: Mutex<Progress>,
}

struct Progress {
    statuses: Vec<Option<TaskStatus>>,
    dispatched: Vec<bool>,
}

impl<'a> Schedule<'a> {
    fn new(dag: &'a Dag) -> Self {
        Self {
            dag,
            progress: Mutex::new(Progress {
                statuses: dag.nodes().iter().map(|_| None).collect(),
                dispatched: vec![false; dag.len()],
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start<'s>(&'s self, scope: &Scope<'s>) {
        let mut progress = self.lock();
        self.dispatch(scope, &mut progress);
    }

    fn finish<'s>(&'s self, scope: &Scope<'s>, index: usize, status: TaskStatus) {
        let mut progress = self.lock();
        progress.statuses[index] = Some(status);
        self.dispatch(scope, &mut progress);
    }

    /// Skip blocked tasks and spawn ready ones. Nodes are in topological
    /// order, so one pass settles every skip.
    fn dispatch<'s>(&'s self, scope: &Scope<'s>, progress: &mut Progress) {
        for (i, node) in self.dag.nodes().iter().enumerate() {
            if progress.dispatched[i] {
                continue;
            }
            let ups = self.dag.upstream_of(i);
            let blocker = ups
                .iter()
                .find(|&&u| matches!(progress.statuses[u], Some(ref s) if !s.is_succeeded()));
            if let Some(&u) = blocker {
                let blocked_by = self.dag.nodes()[u].id().to_string();
                warn!(task = node.id(), blocked_by = %blocked_by, "task skipped");
                progress.statuses[i] = Some(TaskStatus::Skipped { blocked_by });
                progress.dispatched[i] = true;
                continue;
            }
            if ups.iter().all(|&u| progress.statuses[u].is_some()) {
                progress.dispatched[i] = true;
                let inputs = bind_inputs(self.dag, node, &progress.statuses);
                scope.spawn(move |scope| self.finish(scope, i, run_task(node, &inputs)));
            }
        }
    }

    fn into_statuses(self) -> Vec<Option<TaskStatus>> {
        self.progress
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .statuses
    }
}

/// Collect the artifacts a node's parameters are bound to. Missing bindings are
/// left out; the task reports them as [`TaskError::MissingInput`] when it asks.
fn bind_inputs(dag: &Dag, node: &TaskNode, statuses: &[Option<TaskStatus>]) -> TaskInputs {
    let values = node
        .inputs()
        .iter()
        .filter_map(|(param, binding)| {
            let upstream = dag.position(&binding.task)?;
            match &statuses[upstream] {
                Some(TaskStatus::Succeeded { outputs, .. }) => outputs
                    .get(&binding.output)
                    .map(|artifact| (param.clone(), artifact.clone())),
                _ => None,
            }
        })
        .collect::<BTreeMap<_, _>>();
    TaskInputs::new(node.id(), values)
}

fn run_task(node: &TaskNode, inputs: &TaskInputs) -> TaskStatus {
    let started = Instant::now();
    info!(task = node.id(), "task started");

    let result = panic::catch_unwind(AssertUnwindSafe(|| node.run(inputs)))
        .unwrap_or_else(|payload| {
            Err(TaskError::Panicked {
                task: node.id().to_string(),
                message: panic_message(payload.as_ref()),
            })
        })
        .and_then(|outputs| {
            match node.outputs().iter().find(|name| !outputs.contains_key(*name)) {
                Some(missing) => Err(TaskError::MissingOutput {
                    task: node.id().to_string(),
                    output: missing.clone(),
                }),
                None => Ok(outputs),
            }
        });

    let elapsed = started.elapsed();
    match result {
        Ok(outputs) => {
            info!(
                task = node.id(),
                elapsed_ms = elapsed.as_millis() as u64,
                outputs = outputs.len(),
                "task succeeded"
            );
            TaskStatus::Succeeded { outputs, elapsed }
        }
        Err(error) => {
            error!(
                task = node.id(),
                kind = ?error.kind(),
                elapsed_ms = elapsed.as_millis() as u64,
                error = %error,
                "task failed"
            );
            TaskStatus::Failed { error, elapsed }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::DagBuilder;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempest_core::artifact::{ArtifactStore, Format, Stage};
    use tempest_core::Artifact;

    fn artifact(store: &ArtifactStore, prefix: &str) -> Artifact {
        store
            .stage_bytes(Stage::Processed, None, prefix, Format::Csv, b"a\n1\n")
            .unwrap()
    }

    fn ok_with(store: &ArtifactStore, id: &str, output: &str) -> TaskNode {
        let store = store.clone();
        let output_name = output.to_string();
        let prefix = id.replace('.', "_");
        TaskNode::new(id, move |_| {
            let mut outputs = TaskOutputs::new();
            outputs.insert(output_name.clone(), artifact(&store, &prefix));
            Ok(outputs)
        })
        .output(output)
    }

    fn failing(id: &str) -> TaskNode {
        let task = id.to_string();
        TaskNode::new(id, move |_| Err(TaskError::Configuration(format!("{task} broke"))))
    }

    #[test]
    fn failure_skips_downstream_but_not_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::under(dir.path());
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);

        let mut b = DagBuilder::new();
        b.add(failing("extract.stock").output("hourly"))
            .add(ok_with(&store, "extract.weather", "hourly"))
            .add(
                TaskNode::new("clean.stock", move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(TaskOutputs::new())
                })
                .input("raw", "extract.stock", "hourly"),
            )
            .add(ok_with(&store, "clean.weather", "cleaned").input("raw", "extract.weather", "hourly"))
            .add(TaskNode::new("merge", |_| Ok(TaskOutputs::new())).after("clean.stock").after("clean.weather"));
        let dag = b.build().unwrap();

        let report = execute(&dag, &ExecutorOptions::default());

        assert!(!report.is_success());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(report.failed().len(), 1);
        assert_eq!(report.failed()[0].0, "extract.stock");
        assert_eq!(report.skipped(), vec!["clean.stock", "merge"]);
        assert_eq!(report.succeeded(), vec!["extract.weather", "clean.weather"]);
        match report.status("merge").unwrap() {
            TaskStatus::Skipped { blocked_by } => assert_eq!(blocked_by, "clean.stock"),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn outputs_flow_to_bound_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::under(dir.path());
        let seen: Arc<Mutex<Option<std::path::PathBuf>>> = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);

        let mut b = DagBuilder::new();
        b.add(ok_with(&store, "extract", "daily")).add(
            TaskNode::new("clean", move |inputs| {
                *sink.lock().unwrap() = Some(inputs.path("raw")?.to_path_buf());
                Ok(TaskOutputs::new())
            })
            .input("raw", "extract", "daily"),
        );
        let dag = b.build().unwrap();

        let report = execute(&dag, &ExecutorOptions { max_parallel: Some(2) });

        assert!(report.is_success(), "{report}");
        let produced = report.outputs("extract").unwrap()["daily"].path.clone();
        assert_eq!(seen.lock().unwrap().as_ref(), Some(&produced));
    }

    #[test]
    fn undeclared_output_fails_the_producer() {
        let mut b = DagBuilder::new();
        b.add(TaskNode::new("extract", |_| Ok(TaskOutputs::new())).output("hourly"))
            .add(TaskNode::new("clean", |_| Ok(TaskOutputs::new())).input("raw", "extract", "hourly"));
        let dag = b.build().unwrap();

        let report = execute(&dag, &ExecutorOptions::default());

        assert!(matches!(
            report.status("extract"),
            Some(TaskStatus::Failed { error: TaskError::MissingOutput { .. }, .. })
        ));
        assert_eq!(report.skipped(), vec!["clean"]);
    }

    #[test]
    fn panics_become_failures() {
        let mut b = DagBuilder::new();
        b.add(TaskNode::new("boom", |_| panic!("kaboom")))
            .add(TaskNode::new("after", |_| Ok(TaskOutputs::new())).after("boom"));
        let dag = b.build().unwrap();

        let report = execute(&dag, &ExecutorOptions::default());

        match report.status("boom").unwrap() {
            TaskStatus::Failed {
                error: TaskError::Panicked { message, .. },
                ..
            } => assert_eq!(message, "kaboom"),
            other => panic!("unexpected status {other:?}"),
        }
        assert_eq!(report.skipped(), vec!["after"]);
    }

    #[test]
    fn tasks_never_start_before_their_upstream_finishes() {
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let logging = |id: &'static str| {
            let log = Arc::clone(&log);
            TaskNode::new(id, move |_| {
                log.lock().unwrap().push(id.to_string());
                Ok(TaskOutputs::new())
            })
        };

        let mut b = DagBuilder::new();
        b.add(logging("load").after("merge"))
            .add(logging("merge").after("a").after("b"))
            .add(logging("a").after("clear"))
            .add(logging("b").after("clear"))
            .add(logging("clear"));
        let dag = b.build().unwrap();

        let report = execute(&dag, &ExecutorOptions { max_parallel: Some(4) });
        assert!(report.is_success());

        let order = log.lock().unwrap().clone();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert_eq!(pos("clear"), 0);
        assert!(pos("a") < pos("merge") && pos("b") < pos("merge"));
        assert_eq!(pos("load"), 4);
    }

    #[test]
    fn ready_branch_runs_while_a_sibling_is_still_busy() {
        let downstream_done = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&downstream_done);
        let done = Arc::clone(&downstream_done);

        let mut b = DagBuilder::new();
        b.add(TaskNode::new("extract.stock", move |_| {
            // Stands in for a slow HTTP call; finishes early once the other branch is through.
            let deadline = Instant::now() + Duration::from_secs(5);
            while !seen.load(Ordering::SeqCst) && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            if seen.load(Ordering::SeqCst) {
                Ok(TaskOutputs::new())
            } else {
                Err(TaskError::Configuration("weather branch waited on stock".into()))
            }
        }))
        .add(TaskNode::new("extract.weather", |_| Ok(TaskOutputs::new())))
        .add(
            TaskNode::new("clean.weather", move |_| {
                done.store(true, Ordering::SeqCst);
                Ok(TaskOutputs::new())
            })
            .after("extract.weather"),
        );
        let dag = b.build().unwrap();

        let report = execute(&dag, &ExecutorOptions { max_parallel: Some(2) });

        assert!(report.is_success(), "{report}");
        assert!(downstream_done.load(Ordering::SeqCst));
    }

    #[test]
    fn single_worker_runs_the_whole_graph() {
        let mut b = DagBuilder::new();
        b.add(TaskNode::new("clear", |_| Ok(TaskOutputs::new())))
            .add(TaskNode::new("a", |_| Ok(TaskOutputs::new())).after("clear"))
            .add(TaskNode::new("b", |_| Ok(TaskOutputs::new())).after("clear"))
            .add(TaskNode::new("merge", |_| Ok(TaskOutputs::new())).after("a").after("b"));
        let dag = b.build().unwrap();

        let report = execute(&dag, &ExecutorOptions { max_parallel: Some(1) });

        assert!(report.is_success(), "{report}");
        assert_eq!(report.succeeded(), vec!["clear", "a", "b", "merge"]);
    }

    #[test]
    fn report_renders_every_task() {
        let mut b = DagBuilder::new();
        b.add(failing("extract.stock"))
            .add(TaskNode::new("clean.stock", |_| Ok(TaskOutputs::new())).after("extract.stock"));
        let report = execute(&b.build().unwrap(), &ExecutorOptions::default());

        let text = report.to_string();
        assert!(text.contains("extract.stock"));
        assert!(text.contains("blocked by extract.stock"));
        assert!(text.contains("0 succeeded, 1 failed, 1 skipped"));
    }
}
