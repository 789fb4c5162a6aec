//! Dependency-driven execution of an expanded graph.
//!
//! A single coordinator owns every node's state and the ready queue. A ready
//! node whose outputs are already cached is completed by the coordinator
//! without a worker. The others are dispatched once a worker is idle; each
//! dispatched node runs in its own task and reports back through a
//! `FuturesUnordered` of join handles.

use super::resolve::{artifact_ids, input_values, resolve_bindings, InputGap};
use super::{
    ExportFailure, FailureCollector, FailureRecord, NodeFailure, NodeReport, RetryConfig,
    RetryState, RunContext, RunReport, SkipReason,
};
use crate::cache::{ArtifactCache, CacheLookup, Fingerprint, Reservation};
use crate::core::{Artifact, ArtifactSet, NodeState};
use crate::errors::{InvocationError, JoinIncompleteError, SubjectflowError};
use crate::events::{EventSink, RunEvent};
use crate::expand::{Binding, ExpandedGraph, Node, NodeKind, UnitId};
use crate::graph::NodeId;
use crate::inputs::RunInputs;
use crate::invoke::{InputValue, InvocationRequest, ProcessInvoker};
use crate::observability::{NodeSpanAttributes, RunSpanAttributes, SpanTimer};
use crate::sink::{ExportSlot, OutputSink};
use crate::task::TaskSpec;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Executes expanded graphs.
///
/// The scheduler itself is stateless between runs; everything a run needs
/// comes from its [`RunContext`].
#[derive(Clone)]
pub struct Scheduler {
    invoker: Arc<dyn ProcessInvoker>,
    sink: Arc<dyn OutputSink>,
}

impl Scheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(invoker: impl ProcessInvoker + 'static, sink: impl OutputSink + 'static) -> Self {
        Self::from_shared(Arc::new(invoker), Arc::new(sink))
    }

    /// Creates a scheduler from shared collaborators.
    #[must_use]
    pub fn from_shared(invoker: Arc<dyn ProcessInvoker>, sink: Arc<dyn OutputSink>) -> Self {
        Self { invoker, sink }
    }

    /// Runs every node of `graph` to a terminal state.
    ///
    /// Node failures never surface as `Err`: they are part of the returned
    /// report, together with every skipped node and the reason it was
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SubjectflowError::Config`] when the context's domain is not
    /// the graph's, [`SubjectflowError::MissingUnitInput`] when a source node
    /// lacks an input (nothing is dispatched in that case), and
    /// [`SubjectflowError::Internal`] if the worker pool or a node task
    /// breaks down.
    pub async fn run(
        &self,
        graph: &ExpandedGraph,
        ctx: &RunContext,
        inputs: &RunInputs,
    ) -> Result<RunReport, SubjectflowError> {
        if graph.domain() != ctx.domain() {
            return Err(SubjectflowError::Config(format!(
                "run context domain ({} units) does not match the expanded graph ({} units)",
                ctx.domain().len(),
                graph.domain().len()
            )));
        }

        inputs.check(graph)?;
        let mut sources = HashMap::new();
        for node in graph.nodes().iter().filter(|n| n.spec().is_source()) {
            sources.insert(node.id(), inputs.resolve(node)?);
        }

        let span = RunSpanAttributes::new(graph.name())
            .with_run_id(ctx.run_id())
            .with_size(graph.len(), graph.domain().len())
            .with_policy(ctx.policy().to_string())
            .span();

        Run::new(self, graph, ctx, sources).execute().instrument(span).await
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct NodeRecord {
    fingerprint: Option<Fingerprint>,
    cached: bool,
    failure: Option<NodeFailure>,
    skip_reason: Option<SkipReason>,
    attempts: usize,
    duration: Duration,
}

/// What a node task reports back to the coordinator.
struct NodeOutcome {
    id: NodeId,
    result: Result<ArtifactSet, NodeFailure>,
    cached: bool,
    attempts: usize,
    duration: Duration,
    export_failures: Vec<ExportFailure>,
    /// Released only once the coordinator has applied the outcome.
    permit: Option<OwnedSemaphorePermit>,
}

impl NodeOutcome {
    fn panicked(id: NodeId, payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self {
            id,
            result: Err(InvocationError::new(format!("node task panicked: {message}")).into()),
            cached: false,
            attempts: 0,
            duration: Duration::ZERO,
            export_failures: Vec::new(),
            permit: None,
        }
    }
}

/// A ready node with resolved inputs and no cached outputs, waiting for a
/// worker.
struct Staged {
    id: NodeId,
    fingerprint: Fingerprint,
    inputs: BTreeMap<String, InputValue>,
}

struct Run<'a> {
    scheduler: &'a Scheduler,
    graph: &'a ExpandedGraph,
    ctx: &'a RunContext,
    sources: HashMap<NodeId, ArtifactSet>,
    states: Vec<NodeState>,
    records: Vec<NodeRecord>,
    outputs: Vec<Option<ArtifactSet>>,
    remaining: Vec<usize>,
    ready: VecDeque<NodeId>,
    staged: VecDeque<Staged>,
    in_flight: FuturesUnordered<JoinHandle<NodeOutcome>>,
    collector: FailureCollector,
    export_failures: Vec<ExportFailure>,
    cancelled: Option<String>,
}

impl<'a> Run<'a> {
    fn new(
        scheduler: &'a Scheduler,
        graph: &'a ExpandedGraph,
        ctx: &'a RunContext,
        sources: HashMap<NodeId, ArtifactSet>,
    ) -> Self {
        let n = graph.len();
        Self {
            scheduler,
            graph,
            ctx,
            sources,
            states: vec![NodeState::Pending; n],
            records: (0..n).map(|_| NodeRecord::default()).collect(),
            outputs: vec![None; n],
            remaining: graph.nodes().iter().map(|node| node.upstream().len()).collect(),
            ready: VecDeque::new(),
            staged: VecDeque::new(),
            in_flight: FuturesUnordered::new(),
            collector: FailureCollector::new(ctx.policy()),
            export_failures: Vec::new(),
            cancelled: None,
        }
    }

    fn node(&self, id: NodeId) -> &'a Node {
        &self.graph.nodes()[id.index()]
    }

    async fn emit(&self, event: RunEvent) {
        self.ctx.events().emit(event).await;
    }

    async fn execute(mut self) -> Result<RunReport, SubjectflowError> {
        let timer = SpanTimer::start("run");
        let pool = self.ctx.pool().clone();
        let cancel = self.ctx.cancellation().clone();

        info!(
            graph = self.graph.name(),
            nodes = self.graph.len(),
            units = self.graph.domain().len(),
            workers = pool.size(),
            policy = %self.ctx.policy(),
            "Starting run"
        );
        self.emit(RunEvent::RunStarted {
            run_id: self.ctx.run_id(),
            graph: self.graph.name().to_string(),
            nodes: self.graph.len(),
            units: self.graph.domain().len(),
        })
        .await;

        for &id in self.graph.topological_order() {
            if self.remaining[id.index()] == 0 {
                self.mark_ready(id).await;
            }
        }

        loop {
            self.check_cancelled();
            if !self.collector.should_stop() {
                self.dispatch_ready().await;
            }

            let stopped = self.collector.should_stop();
            let idle = self.ready.is_empty() && self.staged.is_empty();
            if self.in_flight.is_empty() && (stopped || idle) {
                break;
            }
            let waiting = !stopped && !self.staged.is_empty();

            tokio::select! {
                biased;
                joined = self.in_flight.next(), if !self.in_flight.is_empty() => match joined {
                    Some(Ok(outcome)) => self.complete(outcome).await,
                    Some(Err(e)) => {
                        return Err(SubjectflowError::Internal(format!("node task failed: {e}")));
                    }
                    None => {}
                },
                () = cancel.cancelled(), if !stopped => {},
                permit = pool.acquire(), if waiting => {
                    let permit = permit?;
                    if let Some(staged) = self.staged.pop_front() {
                        self.dispatch(staged, permit);
                    }
                },
                else => break,
            }
        }

        for index in 0..self.states.len() {
            if !self.states[index].is_terminal() {
                self.skip(NodeId(index), SkipReason::Halted).await;
            }
        }
        self.finalize_join_reasons();

        let events = self.ctx.events().clone();
        let report = self.into_report(timer.finish());
        info!(
            done = report.done().count(),
            cached = report.cached().count(),
            failed = report.failed().count(),
            skipped = report.skipped().count(),
            duration = ?report.duration,
            "Run finished"
        );
        events
            .emit(RunEvent::RunCompleted {
                run_id: report.run_id,
                done: report.done().count(),
                failed: report.failed().count(),
                skipped: report.skipped().count(),
                duration_ms: u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
            })
            .await;
        Ok(report)
    }

    fn check_cancelled(&mut self) {
        let token = self.ctx.cancellation();
        if self.cancelled.is_none() && token.is_cancelled() {
            let reason = token.reason().unwrap_or_else(|| "cancelled".to_string());
            warn!(reason = %reason, in_flight = self.in_flight.len(), "Run cancelled; draining in-flight nodes");
            self.cancelled = Some(reason);
            self.collector.halt();
        }
    }

    fn transition(&mut self, id: NodeId, next: NodeState) {
        let current = self.states[id.index()];
        if !current.can_transition_to(next) {
            error!(node = %self.node(id), from = %current, to = %next, "Unexpected state transition");
        }
        self.states[id.index()] = next;
    }

    async fn mark_ready(&mut self, id: NodeId) {
        self.transition(id, NodeState::Ready);
        self.ready.push_back(id);
        self.emit(RunEvent::NodeReady {
            node: self.node(id).label(),
        })
        .await;
    }

    /// Settles ready nodes that need no worker, then dispatches staged nodes
    /// while workers are idle.
    ///
    /// Sources and cache hits go straight from ready to done, which may make
    /// further nodes ready within the same pass.
    async fn dispatch_ready(&mut self) {
        while !self.collector.should_stop() {
            let Some(id) = self.ready.pop_front() else {
                break;
            };
            if self.node(id).spec().is_source() {
                self.complete_source(id).await;
            } else if let Some(staged) = self.stage(id).await {
                self.staged.push_back(staged);
            }
        }

        while !self.staged.is_empty() && !self.collector.should_stop() {
            let Some(permit) = self.ctx.pool().try_acquire() else {
                break;
            };
            if let Some(staged) = self.staged.pop_front() {
                self.dispatch(staged, permit);
            }
        }
    }

    async fn complete_source(&mut self, id: NodeId) {
        let node = self.node(id);
        let artifacts = self.sources.remove(&id).unwrap_or_default();
        let fingerprint = Fingerprint::for_source(node.spec(), &artifacts);
        debug!(node = %node, fingerprint = %fingerprint.short(), "Supplied source inputs");

        let failures = export_all(
            node.label(),
            &export_slots(node),
            &artifacts,
            self.ctx.cache(),
            self.scheduler.sink.as_ref(),
            self.ctx.events().as_ref(),
        )
        .await;
        self.export_failures.extend(failures);
        self.records[id.index()].fingerprint = Some(fingerprint);
        self.finish(id, artifacts).await;
    }

    fn artifact(&self, output: &crate::expand::OutputRef) -> Option<Artifact> {
        self.outputs[output.node.index()]
            .as_ref()?
            .get(&output.port)
            .cloned()
    }

    /// Resolves the inputs of a ready node and checks the cache.
    ///
    /// Returns `None` when the node was settled here: skipped for an
    /// unusable input or completed from the cache.
    async fn stage(&mut self, id: NodeId) -> Option<Staged> {
        let node = self.node(id);
        let resolved = match resolve_bindings(node, |output| self.artifact(output)) {
            Ok(resolved) => resolved,
            Err(InputGap::Join(e)) => {
                let label = node.label();
                self.skip(id, SkipReason::JoinIncomplete(e)).await;
                self.skip_descendants(id, &label).await;
                return None;
            }
            Err(InputGap::Missing(output)) => {
                let producer = self.node(output.node).label();
                error!(node = %node, producer = %producer, port = %output.port, "Ready node has an unresolved input");
                self.skip(id, SkipReason::UpstreamFailed { ancestor: producer.clone() })
                    .await;
                self.skip_descendants(id, &producer).await;
                return None;
            }
        };

        let fingerprint = Fingerprint::compute(node.spec(), &artifact_ids(&resolved));
        match self.ctx.cache().peek(&fingerprint).await {
            Ok(Some(entry)) => {
                self.complete_cached(id, fingerprint, entry.artifacts.clone()).await;
                return None;
            }
            Ok(None) => {}
            // The worker's reservation surfaces the error as a node failure.
            Err(e) => warn!(node = %node, error = %e, "Cache lookup failed"),
        }

        Some(Staged {
            id,
            fingerprint,
            inputs: input_values(&resolved),
        })
    }

    async fn complete_cached(
        &mut self,
        id: NodeId,
        fingerprint: Fingerprint,
        artifacts: ArtifactSet,
    ) {
        let node = self.node(id);
        let label = node.label();
        debug!(node = %node, fingerprint = %fingerprint.short(), "Cache hit");
        self.emit(RunEvent::NodeCacheHit {
            node: label.clone(),
            fingerprint: fingerprint.to_string(),
        })
        .await;

        let failures = export_all(
            label,
            &export_slots(node),
            &artifacts,
            self.ctx.cache(),
            self.scheduler.sink.as_ref(),
            self.ctx.events().as_ref(),
        )
        .await;
        self.export_failures.extend(failures);

        let record = &mut self.records[id.index()];
        record.fingerprint = Some(fingerprint);
        record.cached = true;
        self.finish(id, artifacts).await;
    }

    fn dispatch(&mut self, staged: Staged, permit: OwnedSemaphorePermit) {
        let Staged {
            id,
            fingerprint,
            inputs,
        } = staged;
        let node = self.node(id);
        let work_dir = self
            .ctx
            .work_dir()
            .join(node.spec().name())
            .join(fingerprint.short());
        debug!(node = %node, fingerprint = %fingerprint.short(), "Dispatching node");

        let job = NodeJob {
            id,
            label: node.label(),
            unit: node.unit().cloned(),
            spec: node.spec().clone(),
            fingerprint: fingerprint.clone(),
            inputs,
            exports: export_slots(node),
            work_dir,
            cache: self.ctx.cache().clone(),
            invoker: self.scheduler.invoker.clone(),
            sink: self.scheduler.sink.clone(),
            events: self.ctx.events().clone(),
            retry: self.ctx.retry().clone(),
            timeout: self.ctx.node_timeout(),
        };
        let span = NodeSpanAttributes::for_node(node)
            .with_fingerprint(fingerprint.short())
            .span();

        self.records[id.index()].fingerprint = Some(fingerprint);
        self.transition(id, NodeState::Running);

        let task = async move {
            let mut outcome = match AssertUnwindSafe(job.run()).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => NodeOutcome::panicked(id, payload.as_ref()),
            };
            outcome.permit = Some(permit);
            outcome
        };
        self.in_flight.push(tokio::spawn(task.instrument(span)));
    }

    async fn complete(&mut self, outcome: NodeOutcome) {
        let id = outcome.id;
        let record = &mut self.records[id.index()];
        record.cached = outcome.cached;
        record.attempts = outcome.attempts;
        record.duration = outcome.duration;
        self.export_failures.extend(outcome.export_failures);

        match outcome.result {
            Ok(artifacts) => self.finish(id, artifacts).await,
            Err(failure) => self.fail(id, failure).await,
        }
        drop(outcome.permit);
    }

    async fn finish(&mut self, id: NodeId, artifacts: ArtifactSet) {
        self.transition(id, NodeState::Done);
        self.outputs[id.index()] = Some(artifacts);

        for &next in self.graph.downstream(id) {
            let remaining = &mut self.remaining[next.index()];
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 && self.states[next.index()] == NodeState::Pending {
                self.mark_ready(next).await;
            }
        }
    }

    async fn fail(&mut self, id: NodeId, failure: NodeFailure) {
        let node = self.node(id);
        let label = node.label();
        warn!(node = %label, error = %failure, exit_code = ?failure.exit_code(), "Node failed");

        self.transition(id, NodeState::Failed);
        self.collector.record_failure(FailureRecord::new(
            &label,
            node.spec().name(),
            node.unit().cloned(),
            &failure,
        ));
        self.emit(RunEvent::NodeFailed {
            node: label.clone(),
            error: failure.to_string(),
            exit_code: failure.exit_code(),
        })
        .await;
        self.records[id.index()].failure = Some(failure);

        self.skip_descendants(id, &label).await;
    }

    async fn skip(&mut self, id: NodeId, reason: SkipReason) {
        let label = self.node(id).label();
        debug!(node = %label, reason = %reason, "Skipping node");
        self.transition(id, NodeState::Skipped);
        self.emit(RunEvent::NodeSkipped {
            node: label,
            reason: reason.to_string(),
        })
        .await;
        self.records[id.index()].skip_reason = Some(reason);
    }

    /// Skips every pending descendant of `from`.
    ///
    /// A join reached through its join port is skipped as incomplete;
    /// anything else names `ancestor` as the cause.
    async fn skip_descendants(&mut self, from: NodeId, ancestor: &str) {
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            for &next in self.graph.downstream(current) {
                if self.states[next.index()] != NodeState::Pending {
                    continue;
                }
                let node = self.node(next);
                let reason = if joins_through(node, current) {
                    SkipReason::JoinIncomplete(self.join_gap(node, false))
                } else {
                    SkipReason::UpstreamFailed {
                        ancestor: ancestor.to_string(),
                    }
                };
                self.skip(next, reason).await;
                queue.push_back(next);
            }
        }
    }

    /// Units whose join producer is not usable.
    ///
    /// While the run is in flight only failed or skipped producers count;
    /// once it has settled, anything not done does.
    fn join_gap(&self, node: &Node, settled: bool) -> JoinIncompleteError {
        let mut missing_units = Vec::new();
        if let NodeKind::Join { port } = node.kind() {
            if let Some(Binding::Join(join)) = node.inputs().get(port) {
                for (unit, source) in join.sources() {
                    let state = self.states[source.node.index()];
                    let missing = if settled {
                        state != NodeState::Done
                    } else {
                        matches!(state, NodeState::Failed | NodeState::Skipped)
                    };
                    if missing {
                        missing_units.push(unit.to_string());
                    }
                }
            }
        }
        JoinIncompleteError {
            join: node.label(),
            missing_units,
        }
    }

    fn finalize_join_reasons(&mut self) {
        for index in 0..self.records.len() {
            if matches!(
                self.records[index].skip_reason,
                Some(SkipReason::JoinIncomplete(_))
            ) {
                let gap = self.join_gap(self.node(NodeId(index)), true);
                self.records[index].skip_reason = Some(SkipReason::JoinIncomplete(gap));
            }
        }
    }

    fn into_report(self, duration: Duration) -> RunReport {
        let nodes = self
            .graph
            .nodes()
            .iter()
            .zip(self.records)
            .zip(&self.states)
            .map(|((node, record), &state)| NodeReport {
                id: node.id(),
                label: node.label(),
                task: node.spec().name().to_string(),
                unit: node.unit().cloned(),
                state,
                cached: record.cached,
                fingerprint: record.fingerprint,
                failure: record.failure,
                skip_reason: record.skip_reason,
                attempts: record.attempts,
                duration: record.duration,
            })
            .collect();

        RunReport {
            run_id: self.ctx.run_id(),
            graph: self.graph.name().to_string(),
            units: self.graph.domain().units().to_vec(),
            nodes,
            failures: self.collector.into_failures(),
            export_failures: self.export_failures,
            cancelled: self.cancelled,
            duration,
        }
    }
}

fn joins_through(node: &Node, producer: NodeId) -> bool {
    let NodeKind::Join { port } = node.kind() else {
        return false;
    };
    matches!(
        node.inputs().get(port),
        Some(Binding::Join(join)) if join.sources().iter().any(|(_, r)| r.node == producer)
    )
}

fn export_slots(node: &Node) -> Vec<(ExportSlot, String)> {
    node.exports()
        .iter()
        .map(|export| {
            let slot = match node.unit() {
                Some(unit) => ExportSlot::unit(unit.clone(), export.slot.clone()),
                None => ExportSlot::group(export.slot.clone()),
            };
            (slot, export.port.clone())
        })
        .collect()
}

/// Delivers each exported output unless the ledger shows it was already
/// delivered.
async fn export_all(
    label: String,
    exports: &[(ExportSlot, String)],
    artifacts: &ArtifactSet,
    cache: &ArtifactCache,
    sink: &dyn OutputSink,
    events: &dyn EventSink,
) -> Vec<ExportFailure> {
    let mut failures = Vec::new();
    for (slot, port) in exports {
        let key = slot.key();
        let result = match artifacts.get(port) {
            Some(artifact) => deliver_once(cache, sink, slot, artifact).await,
            None => Err(format!("no artifact on output '{port}'")),
        };
        match result {
            Ok(true) => {
                debug!(node = %label, slot = %key, "Exported output");
                events
                    .emit(RunEvent::NodeExported {
                        node: label.clone(),
                        slot: key,
                    })
                    .await;
            }
            Ok(false) => debug!(node = %label, slot = %key, "Export already delivered"),
            Err(error) => {
                warn!(node = %label, slot = %key, error = %error, "Export failed");
                failures.push(ExportFailure {
                    node: label.clone(),
                    slot: key,
                    error,
                });
            }
        }
    }
    failures
}

async fn deliver_once(
    cache: &ArtifactCache,
    sink: &dyn OutputSink,
    slot: &ExportSlot,
    artifact: &Artifact,
) -> Result<bool, String> {
    let key = slot.key();
    if cache
        .is_exported(&key, &artifact.id)
        .await
        .map_err(|e| e.to_string())?
    {
        return Ok(false);
    }
    sink.deliver(slot, artifact).await.map_err(|e| e.to_string())?;
    cache
        .record_export(&key, &artifact.id)
        .await
        .map_err(|e| e.to_string())?;
    Ok(true)
}

/// Owned state of one dispatched node.
///
/// Each attempt runs in its own `attempt-<n>` directory under `work_dir`.
struct NodeJob {
    id: NodeId,
    label: String,
    unit: Option<UnitId>,
    spec: Arc<TaskSpec>,
    fingerprint: Fingerprint,
    inputs: BTreeMap<String, InputValue>,
    exports: Vec<(ExportSlot, String)>,
    work_dir: PathBuf,
    cache: Arc<ArtifactCache>,
    invoker: Arc<dyn ProcessInvoker>,
    sink: Arc<dyn OutputSink>,
    events: Arc<dyn EventSink>,
    retry: RetryConfig,
    timeout: Option<Duration>,
}

impl NodeJob {
    async fn run(self) -> NodeOutcome {
        let timer = SpanTimer::start(self.label.clone());
        let mut cached = false;
        let mut attempts = 0;

        let result = match self.cache.lookup_or_reserve(&self.fingerprint).await {
            // Committed by an identical node after this one was staged.
            Ok(CacheLookup::Hit(entry)) => {
                debug!("Cache hit");
                cached = true;
                self.events
                    .emit(RunEvent::NodeCacheHit {
                        node: self.label.clone(),
                        fingerprint: self.fingerprint.to_string(),
                    })
                    .await;
                Ok(entry.artifacts.clone())
            }
            Ok(CacheLookup::Reserved(reservation)) => self.compute(reservation, &mut attempts).await,
            Err(e) => Err(NodeFailure::Cache(e)),
        };
        let duration = timer.finish();

        let export_failures = match &result {
            Ok(artifacts) => {
                if !cached {
                    self.events
                        .emit(RunEvent::NodeCompleted {
                            node: self.label.clone(),
                            fingerprint: self.fingerprint.to_string(),
                            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                        })
                        .await;
                }
                export_all(
                    self.label.clone(),
                    &self.exports,
                    artifacts,
                    &self.cache,
                    self.sink.as_ref(),
                    self.events.as_ref(),
                )
                .await
            }
            Err(_) => Vec::new(),
        };

        NodeOutcome {
            id: self.id,
            result,
            cached,
            attempts,
            duration,
            export_failures,
            permit: None,
        }
    }

    async fn compute(
        &self,
        reservation: Reservation,
        attempts: &mut usize,
    ) -> Result<ArtifactSet, NodeFailure> {
        let mut retry = RetryState::new();
        loop {
            let attempt = retry.begin_attempt();
            *attempts = attempt;
            self.events
                .emit(RunEvent::NodeStarted {
                    node: self.label.clone(),
                    fingerprint: self.fingerprint.to_string(),
                    attempt,
                })
                .await;

            let request = InvocationRequest {
                node: self.label.clone(),
                unit: self.unit.clone(),
                spec: self.spec.clone(),
                inputs: self.inputs.clone(),
                work_dir: self.work_dir.join(format!("attempt-{attempt}")),
                attempt,
            };
            let result = self
                .invoke(request)
                .await
                .and_then(|locations| self.collect_outputs(&locations));

            match result {
                Ok(artifacts) => {
                    return self
                        .cache
                        .commit(reservation, self.spec.name(), artifacts)
                        .await
                        .map(|entry| entry.artifacts.clone())
                        .map_err(NodeFailure::from);
                }
                Err(e) if retry.should_retry(&self.retry, &e) => {
                    let delay = retry.calculate_delay(&self.retry);
                    warn!(attempt, delay = ?delay, error = %e, "Invocation failed; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.cache.abort(reservation, &e);
                    return Err(e.into());
                }
            }
        }
    }

    async fn invoke(
        &self,
        request: InvocationRequest,
    ) -> Result<BTreeMap<String, PathBuf>, InvocationError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.invoker.invoke(request))
                .await
                .unwrap_or_else(|_| Err(InvocationError::timed_out(limit))),
            None => self.invoker.invoke(request).await,
        }
    }

    fn collect_outputs(
        &self,
        locations: &BTreeMap<String, PathBuf>,
    ) -> Result<ArtifactSet, InvocationError> {
        self.spec
            .outputs()
            .iter()
            .map(|port| {
                let location = locations.get(&port.name).ok_or_else(|| {
                    InvocationError::new(format!(
                        "invoker returned no location for output '{}'",
                        port.name
                    ))
                })?;
                let artifact = Artifact::new(
                    self.fingerprint.output_id(&port.name),
                    location.clone(),
                    port.kind.clone(),
                );
                Ok((port.name.clone(), artifact))
            })
            .collect()
    }
}
