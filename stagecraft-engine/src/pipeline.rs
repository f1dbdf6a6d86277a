//! Pipeline construction, validation, and lifecycle.

use crate::event_bus::EventBus;
use crate::scheduler::{self, PlannedStage};
use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;
use stagecraft_core::envelope::GlobalMap;
use stagecraft_core::{Error, EventListener, Result, Step};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// How long [`Pipeline::stop`] waits for a graceful drain.
const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// The execution mode of a pipeline, decided from its entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One-shot traversal from entry points to sinks.
    Batch,
    /// Continuous emission from long-lived triggers until cancellation.
    Streaming,
}

impl ExecutionMode {
    /// The lowercase wire name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Batch => "batch",
            Self::Streaming => "streaming",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One incoming edge of a stage: the upstream id plus an optional branch
/// filter (`"check:true"` subscribes to the `true` output label only).
#[derive(Debug, Clone)]
pub struct DependencyEdge {
    /// The upstream stage id.
    pub stage_id: String,
    /// Forward only outputs carrying this label; `None` forwards everything.
    pub branch: Option<String>,
}

struct StageEntry {
    step: Arc<dyn Step>,
    dependencies: Vec<DependencyEdge>,
}

/// A DAG of stages executed over dedicated per-edge channels.
///
/// Stages are registered with [`Pipeline::add_stage`], wired with the
/// returned [`StageBuilder`], validated, and driven through
/// `start` / `stop` / `wait`. All mutation happens before `start`.
pub struct Pipeline {
    stages: RwLock<HashMap<String, StageEntry>>,
    dependents: RwLock<HashMap<String, Vec<String>>>,
    running: Arc<AtomicBool>,
    cancel: Mutex<Option<CancellationToken>>,
    done: Mutex<Option<watch::Receiver<bool>>>,
    event_bus: EventBus,
    variables: Mutex<GlobalMap>,
    secrets: Mutex<GlobalMap>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self {
            stages: RwLock::new(HashMap::new()),
            dependents: RwLock::new(HashMap::new()),
            running: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(None),
            done: Mutex::new(None),
            event_bus: EventBus::new(),
            variables: Mutex::new(Arc::new(HashMap::new())),
            secrets: Mutex::new(Arc::new(HashMap::new())),
        }
    }

    /// Register a stage and return a builder for wiring its dependencies.
    ///
    /// Re-registering an id replaces the previous stage.
    pub fn add_stage(&self, id: impl Into<String>, step: Arc<dyn Step>) -> StageBuilder<'_> {
        let id = id.into();
        assert!(!id.is_empty(), "stage id cannot be empty");

        self.stages.write().insert(
            id.clone(),
            StageEntry {
                step,
                dependencies: Vec::new(),
            },
        );

        StageBuilder {
            pipeline: self,
            stage_id: id,
        }
    }

    /// Get a builder for a previously registered stage.
    pub fn stage_builder(&self, id: &str) -> Option<StageBuilder<'_>> {
        if self.stages.read().contains_key(id) {
            Some(StageBuilder {
                pipeline: self,
                stage_id: id.to_string(),
            })
        } else {
            None
        }
    }

    /// All registered stage ids, sorted.
    pub fn stage_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.stages.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Register a listener for lifecycle events.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.event_bus.add_listener(listener);
    }

    /// The pipeline's event bus.
    pub fn events(&self) -> &EventBus {
        &self.event_bus
    }

    /// Set the global variables shared read-only with every stage.
    pub fn set_variables(&self, variables: HashMap<String, JsonValue>) {
        *self.variables.lock() = Arc::new(variables);
    }

    /// Set the global secrets shared read-only with every stage.
    pub fn set_secrets(&self, secrets: HashMap<String, JsonValue>) {
        *self.secrets.lock() = Arc::new(secrets);
    }

    /// Whether the pipeline is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Validate the pipeline: every dependency exists and the graph is
    /// acyclic. Runs before execution; no worker is spawned on failure.
    pub fn validate(&self) -> Result<()> {
        let stages = self.stages.read();

        for (id, entry) in stages.iter() {
            for dep in &entry.dependencies {
                if !stages.contains_key(&dep.stage_id) {
                    return Err(Error::UnknownDependency {
                        stage: id.clone(),
                        dependency: dep.stage_id.clone(),
                    });
                }
            }
        }

        // Depth-first search with a recursion stack; a back-edge to a vertex
        // on the stack is a cycle.
        fn has_cycle(
            id: &str,
            stages: &HashMap<String, StageEntry>,
            visited: &mut HashSet<String>,
            rec_stack: &mut HashSet<String>,
        ) -> bool {
            visited.insert(id.to_string());
            rec_stack.insert(id.to_string());

            if let Some(entry) = stages.get(id) {
                for dep in &entry.dependencies {
                    if !visited.contains(&dep.stage_id) {
                        if has_cycle(&dep.stage_id, stages, visited, rec_stack) {
                            return true;
                        }
                    } else if rec_stack.contains(&dep.stage_id) {
                        return true;
                    }
                }
            }

            rec_stack.remove(id);
            false
        }

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        for id in stages.keys() {
            if !visited.contains(id) && has_cycle(id, &stages, &mut visited, &mut rec_stack) {
                return Err(Error::CircularDependency);
            }
        }

        Ok(())
    }

    /// Decide the execution mode by scanning entry-point stages: if any
    /// entry point's step is continuous the pipeline is streaming, otherwise
    /// batch.
    pub fn detect_execution_mode(&self) -> ExecutionMode {
        let stages = self.stages.read();
        for entry in stages.values() {
            if entry.dependencies.is_empty() && entry.step.is_continuous() {
                return ExecutionMode::Streaming;
            }
        }
        ExecutionMode::Batch
    }

    /// Start the pipeline in the background (non-blocking).
    ///
    /// Validates first; returns an error without spawning anything when the
    /// pipeline is invalid or already running. Must be called from within a
    /// tokio runtime.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }

        if let Err(e) = self.validate() {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let mode = self.detect_execution_mode();

        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());

        let (done_tx, done_rx) = watch::channel(false);
        *self.done.lock() = Some(done_rx);

        self.event_bus.emit_pipeline_started(mode.as_str());
        tracing::info!(mode = %mode, stages = self.stages.read().len(), "pipeline started");

        let plan = self.snapshot_plan();
        let bus = self.event_bus.clone();
        let variables = self.variables.lock().clone();
        let secrets = self.secrets.lock().clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            scheduler::execute(plan, cancel, bus.clone(), variables, secrets).await;

            running.store(false, Ordering::SeqCst);
            let duration = started.elapsed();
            bus.emit_pipeline_completed(duration);
            tracing::info!(duration_ms = duration.as_millis() as u64, "pipeline completed");

            // Let pending listener callbacks finish before signalling done.
            bus.drain().await;
            let _ = done_tx.send(true);
        });

        Ok(())
    }

    /// Stop the pipeline gracefully.
    ///
    /// Triggers cancellation and waits for the drain, bounded by a 30 second
    /// watchdog.
    pub async fn stop(&self) -> Result<()> {
        if !self.is_running() {
            return Err(Error::NotRunning);
        }

        if let Some(cancel) = self.cancel.lock().clone() {
            cancel.cancel();
        }

        tokio::time::timeout(STOP_TIMEOUT, self.wait())
            .await
            .map_err(|_| Error::StopTimeout)
    }

    /// Wait until the pipeline has terminated and its events have drained.
    ///
    /// Returns immediately if the pipeline was never started.
    pub async fn wait(&self) {
        let receiver = self.done.lock().clone();
        let Some(mut receiver) = receiver else {
            return;
        };

        if *receiver.borrow() {
            return;
        }
        while receiver.changed().await.is_ok() {
            if *receiver.borrow() {
                return;
            }
        }
    }

    /// Run the pipeline to completion (blocking convenience wrapper).
    pub async fn execute(&self) -> Result<()> {
        self.start()?;
        self.wait().await;
        Ok(())
    }

    fn snapshot_plan(&self) -> Vec<PlannedStage> {
        self.stages
            .read()
            .iter()
            .map(|(id, entry)| PlannedStage {
                id: id.clone(),
                step: entry.step.clone(),
                dependencies: entry.dependencies.clone(),
            })
            .collect()
    }
}

/// Fluent wiring of a stage's dependencies.
pub struct StageBuilder<'a> {
    pipeline: &'a Pipeline,
    stage_id: String,
}

impl StageBuilder<'_> {
    /// Depend on an upstream stage, accepting every output.
    pub fn after(&self, dependency: &str) -> Result<&Self> {
        self.add_edge(dependency, None)
    }

    /// Depend on one labeled output of an upstream stage.
    pub fn after_with_branch(&self, dependency: &str, branch: &str) -> Result<&Self> {
        self.add_edge(dependency, Some(branch.to_string()))
    }

    fn add_edge(&self, dependency: &str, branch: Option<String>) -> Result<&Self> {
        let mut stages = self.pipeline.stages.write();

        if !stages.contains_key(dependency) {
            return Err(Error::UnknownDependency {
                stage: self.stage_id.clone(),
                dependency: dependency.to_string(),
            });
        }

        let entry = stages
            .get_mut(&self.stage_id)
            .expect("builder refers to a registered stage");
        entry.dependencies.push(DependencyEdge {
            stage_id: dependency.to_string(),
            branch,
        });

        self.pipeline
            .dependents
            .write()
            .entry(dependency.to_string())
            .or_default()
            .push(self.stage_id.clone());

        Ok(self)
    }
}
