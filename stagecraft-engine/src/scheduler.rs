//! The dataflow runtime.
//!
//! One worker task per stage, one dedicated bounded channel per edge.
//! Per-edge channels give independent backpressure: a slow consumer blocks
//! only its own producer's fan-out slot, not its siblings. Fan-in assembles
//! one envelope per round, receiving once from every open edge.

use crate::event_bus::EventBus;
use crate::pipeline::DependencyEdge;
use stagecraft_core::envelope::GlobalMap;
use stagecraft_core::{EventId, Step, StepInput, StepOutput};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Bounded capacity of every edge channel.
const EDGE_CAPACITY: usize = 10;

/// An immutable snapshot of one stage, taken at start.
pub(crate) struct PlannedStage {
    pub(crate) id: String,
    pub(crate) step: Arc<dyn Step>,
    pub(crate) dependencies: Vec<DependencyEdge>,
}

/// The sending half of one producer→consumer edge.
struct EdgeSender {
    consumer: String,
    branch: Option<String>,
    tx: mpsc::Sender<StepOutput>,
}

/// Run every stage of the plan to completion.
pub(crate) async fn execute(
    plan: Vec<PlannedStage>,
    cancel: CancellationToken,
    bus: EventBus,
    variables: GlobalMap,
    secrets: GlobalMap,
) {
    // One dedicated channel per (producer, consumer) edge.
    let mut incoming: HashMap<String, Vec<(DependencyEdge, mpsc::Receiver<StepOutput>)>> =
        HashMap::new();
    let mut outgoing: HashMap<String, Vec<EdgeSender>> = HashMap::new();

    for stage in &plan {
        for dep in &stage.dependencies {
            let (tx, rx) = mpsc::channel(EDGE_CAPACITY);
            outgoing
                .entry(dep.stage_id.clone())
                .or_default()
                .push(EdgeSender {
                    consumer: stage.id.clone(),
                    branch: dep.branch.clone(),
                    tx,
                });
            incoming
                .entry(stage.id.clone())
                .or_default()
                .push((dep.clone(), rx));
        }
    }

    let mut workers = JoinSet::new();
    for stage in plan {
        let stage_incoming = incoming.remove(&stage.id).unwrap_or_default();
        let stage_outgoing = outgoing.remove(&stage.id).unwrap_or_default();
        workers.spawn(run_stage(
            stage,
            stage_incoming,
            stage_outgoing,
            cancel.clone(),
            bus.clone(),
            variables.clone(),
            secrets.clone(),
        ));
    }

    while workers.join_next().await.is_some() {}
}

/// One stage worker: build inputs, run the step, fan outputs out to every
/// consumer edge, forward errors to the event bus.
async fn run_stage(
    stage: PlannedStage,
    incoming: Vec<(DependencyEdge, mpsc::Receiver<StepOutput>)>,
    outgoing: Vec<EdgeSender>,
    cancel: CancellationToken,
    bus: EventBus,
    variables: GlobalMap,
    secrets: GlobalMap,
) {
    let stage_id = stage.id;
    let step_kind = stage.step.kind().to_string();
    let started = Instant::now();

    bus.emit_stage_started(&stage_id, &step_kind);
    tracing::debug!(stage_id = %stage_id, step = %step_kind, "stage worker started");

    let (input_tx, input_rx) = mpsc::channel(EDGE_CAPACITY);
    let continuous = stage.step.is_continuous();
    tokio::spawn(build_inputs(
        incoming,
        input_tx,
        continuous,
        cancel.clone(),
        variables,
        secrets,
    ));

    let (mut output_rx, mut error_rx) = stage.step.run(cancel.clone(), input_rx);

    // Per-event errors are forwarded as events; the pipeline continues.
    let error_forwarder = tokio::spawn({
        let bus = bus.clone();
        let stage_id = stage_id.clone();
        let step_kind = step_kind.clone();
        async move {
            while let Some(error) = error_rx.recv().await {
                if error.is_cancelled() {
                    tracing::debug!(stage_id = %stage_id, "stage cancelled");
                } else {
                    tracing::warn!(stage_id = %stage_id, error = %error, "stage error");
                }
                bus.emit_stage_error(&stage_id, &step_kind, "", &error);
            }
        }
    });

    // Fan-out: every output goes to every consumer edge whose branch filter
    // matches. Enqueue may block when a consumer is slow.
    'forward: while let Some(output) = output_rx.recv().await {
        bus.emit_stage_output(&stage_id, &step_kind, &output);

        for edge in &outgoing {
            if let Some(branch) = &edge.branch {
                if !output.data.contains_key(branch) {
                    continue;
                }
            }

            tokio::select! {
                sent = edge.tx.send(output.clone()) => {
                    if sent.is_err() {
                        tracing::debug!(
                            stage_id = %stage_id,
                            consumer = %edge.consumer,
                            "consumer edge closed"
                        );
                    }
                }
                _ = cancel.cancelled() => break 'forward,
            }
        }
    }

    // Close all outgoing edges so downstream fan-in can drain.
    drop(outgoing);

    let _ = error_forwarder.await;
    bus.emit_stage_completed(&stage_id, &step_kind, started.elapsed());
    tracing::debug!(stage_id = %stage_id, "stage worker finished");
}

/// Assemble the input stream of one stage.
///
/// Entry points receive exactly one synthetic envelope (continuous entry
/// points then block until cancellation). Everything else merges its
/// incoming edges in rounds: one receive per open edge, the first non-empty
/// event id adopted for the assembled envelope, termination when every edge
/// has closed.
async fn build_inputs(
    incoming: Vec<(DependencyEdge, mpsc::Receiver<StepOutput>)>,
    input_tx: mpsc::Sender<StepInput>,
    continuous: bool,
    cancel: CancellationToken,
    variables: GlobalMap,
    secrets: GlobalMap,
) {
    if incoming.is_empty() {
        let input = StepInput::new(EventId::new()).with_globals(variables, secrets);
        tokio::select! {
            _ = input_tx.send(input) => {}
            _ = cancel.cancelled() => {}
        }

        if continuous {
            cancel.cancelled().await;
        }
        return;
    }

    let mut edges = incoming;
    loop {
        let mut data = HashMap::new();
        let mut event_id = EventId::empty();
        let mut all_closed = true;

        for (dep, rx) in edges.iter_mut() {
            tokio::select! {
                received = rx.recv() => {
                    if let Some(output) = received {
                        all_closed = false;
                        if event_id.is_empty() {
                            event_id = output.event_id.clone();
                        }
                        data.insert(dep.stage_id.clone(), output.data);
                    }
                }
                _ = cancel.cancelled() => return,
            }
        }

        if all_closed {
            return;
        }

        if !data.is_empty() {
            let input = StepInput::new(event_id)
                .with_globals(variables.clone(), secrets.clone())
                .with_data(data);
            tokio::select! {
                sent = input_tx.send(input) => {
                    if sent.is_err() {
                        return;
                    }
                }
                _ = cancel.cancelled() => return,
            }
        }
    }
}
