/// Workflow executor
///
/// Walks one automation's compiled graph for one domain event. Traversal starts at
/// every trigger node whose subtype matches the event, follows edges depth-first
/// and records one step per visited node. Each path carries its own view of the
/// node outputs produced so far, so sibling branches never see each other's data.
///
/// Every recorder write happens as the run progresses: the header when the run
/// opens, each step as it is produced, the header again when the run finishes.

use crate::automation::{
    graph::{ActionConfig, CompiledGraph, GraphNode, NodeSpec},
    types::{Automation, ContextMap, DomainEvent, Scalar},
    GraphError,
};
use crate::recorder::{
    ExecutionRecorder, ExecutionRun, ExecutionStep, HttpDetails, RecorderError, RunStatus,
    StepStatus,
};
use crate::runtime::invoker::{ActionInvoker, ActionOutcome, ActionRequest};
use crate::runtime::template::{self, NodeOutputs, TemplateScope};
use chrono::Utc;
use petgraph::graph::NodeIndex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::Instrument;

pub const DEFAULT_NODE_VISIT_CAP: u32 = 500;
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    /// Total node visits allowed per run; bounds cyclic graphs
    pub node_visit_cap: u32,
    /// Used by actions without their own `timeout_ms`
    pub action_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            node_visit_cap: DEFAULT_NODE_VISIT_CAP,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The at-most-once slot for this (automation, trigger, entity) is taken
    #[error("automation {automation_id} already fired {trigger_type} for entity {entity_reference}")]
    AlreadyFired {
        automation_id: String,
        trigger_type: String,
        entity_reference: String,
    },
}

/// What visiting one node produced, before it is stamped into a step
struct Visit {
    status: StepStatus,
    input: Value,
    output: Value,
    http: Option<HttpDetails>,
    error: Option<String>,
    next: Vec<NodeIndex>,
}

pub struct WorkflowExecutor {
    recorder: Arc<dyn ExecutionRecorder>,
    invoker: Arc<dyn ActionInvoker>,
    settings: ExecutorSettings,
}

impl WorkflowExecutor {
    pub fn new(
        recorder: Arc<dyn ExecutionRecorder>,
        invoker: Arc<dyn ActionInvoker>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            recorder,
            invoker,
            settings,
        }
    }

    /// Run the automation for the event with no deduplication
    ///
    /// Used for live events and manual tests: executing twice produces two runs.
    /// Never errors; what went wrong is described by the returned run.
    pub async fn execute(&self, automation: &Automation, event: &DomainEvent) -> ExecutionRun {
        let run = ExecutionRun::open(automation, event, false);
        let span = run_span(&run);
        async {
            let opened = self.recorder.open_run(&run).await;
            self.drive(automation, event, run, opened).await
        }
        .instrument(span)
        .await
    }

    /// Run the automation under the at-most-once policy
    ///
    /// Fails with `ExecuteError::AlreadyFired` without touching the graph when a
    /// guarded run for the same automation, trigger and entity is running or has
    /// already completed.
    pub async fn execute_guarded(
        &self,
        automation: &Automation,
        event: &DomainEvent,
    ) -> Result<ExecutionRun, ExecuteError> {
        let run = ExecutionRun::open(automation, event, true);
        let span = run_span(&run);
        async {
            let opened = self.recorder.open_run(&run).await;
            match opened {
                Err(RecorderError::AlreadyFired {
                    automation_id,
                    trigger_type,
                    entity_reference,
                }) => {
                    tracing::debug!(
                        "⏭️ Automation '{}' already fired {} for '{}'",
                        automation_id,
                        trigger_type,
                        entity_reference
                    );
                    Err(ExecuteError::AlreadyFired {
                        automation_id,
                        trigger_type,
                        entity_reference,
                    })
                }
                opened => Ok(self.drive(automation, event, run, opened).await),
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        automation: &Automation,
        event: &DomainEvent,
        run: ExecutionRun,
        opened: Result<(), RecorderError>,
    ) -> ExecutionRun {
        let started = Instant::now();

        if let Err(e) = opened {
            tracing::error!(
                "💥 Failed to open run for automation '{}' (correlation {}): {}",
                automation.id,
                run.correlation_id,
                e
            );
            let message = format!("engine fault: {}", e);
            return self.seal(run, started, RunStatus::Failed, Some(message), false).await;
        }

        tracing::info!(
            "🚀 Starting run {} of automation '{}' v{} for {} '{}'",
            run.id,
            automation.id,
            automation.version,
            event.trigger_type,
            event.entity_reference
        );

        let (graph, starts) = match compile_for(automation, event) {
            Ok(compiled) => compiled,
            Err(e) => {
                tracing::warn!("❌ Automation '{}' has an invalid graph: {}", automation.id, e);
                return self.finish(run, started, RunStatus::Failed, Some(e.to_string())).await;
            }
        };

        self.traverse(&graph, starts, event, run, started).await
    }

    async fn traverse(
        &self,
        graph: &CompiledGraph,
        starts: Vec<NodeIndex>,
        event: &DomainEvent,
        mut run: ExecutionRun,
        started: Instant,
    ) -> ExecutionRun {
        let cap = self.settings.node_visit_cap;
        let mut step_order = 0u32;
        let mut cap_reached = false;
        let mut fault: Option<RecorderError> = None;

        'starts: for start in starts {
            let mut stack = vec![(start, NodeOutputs::new())];

            while let Some((index, mut outputs)) = stack.pop() {
                let node = graph.node(index);

                if run.metrics.nodes_visited >= cap {
                    tracing::warn!(
                        "🛑 Node visit cap of {} reached at '{}', stopping traversal",
                        cap,
                        node.id
                    );
                    cap_reached = true;
                    let visit = Visit {
                        status: StepStatus::Failed,
                        input: json!({ "node_visit_cap": cap }),
                        output: Value::Null,
                        http: None,
                        error: Some(format!("node visit cap of {} reached; traversal stopped", cap)),
                        next: Vec::new(),
                    };
                    if let Err(e) = self.record(&mut run, node, step_order, Utc::now(), Instant::now(), visit).await {
                        fault = Some(e);
                    }
                    break 'starts;
                }

                run.metrics.nodes_visited += 1;
                let step_started_at = Utc::now();
                let step_clock = Instant::now();
                tracing::debug!("📍 Step {}: visiting '{}' ({})", step_order + 1, node.id, node.kind().as_str());

                let visit = self
                    .visit(graph, index, node, event, &mut outputs, &mut run)
                    .await;
                let next = visit.next.clone();

                if let Err(e) = self.record(&mut run, node, step_order, step_started_at, step_clock, visit).await {
                    fault = Some(e);
                    break 'starts;
                }
                step_order += 1;

                // Reversed so the first declared edge is explored first
                for target in next.into_iter().rev() {
                    stack.push((target, outputs.clone()));
                }
            }
        }

        if let Some(e) = fault {
            tracing::error!(
                "💥 Recorder failed mid-run {} (correlation {}): {}",
                run.id,
                run.correlation_id,
                e
            );
            let message = format!("engine fault: {}", e);
            return self.finish(run, started, RunStatus::Failed, Some(message)).await;
        }

        let status = RunStatus::derive(&run.steps);
        let error_message =
            cap_reached.then(|| format!("node visit cap of {} reached; traversal stopped", cap));
        self.finish(run, started, status, error_message).await
    }

    async fn visit(
        &self,
        graph: &CompiledGraph,
        index: NodeIndex,
        node: &GraphNode,
        event: &DomainEvent,
        outputs: &mut NodeOutputs,
        run: &mut ExecutionRun,
    ) -> Visit {
        match &node.spec {
            NodeSpec::Trigger => {
                let context = event.context.clone();
                let output = json!(context);
                outputs.insert(node.id.clone(), context);
                Visit {
                    status: StepStatus::Succeeded,
                    input: json!({
                        "trigger_type": event.trigger_type.as_str(),
                        "tenant_id": event.tenant_id,
                        "entity_reference": event.entity_reference,
                    }),
                    output,
                    http: None,
                    error: None,
                    next: default_successors(graph, index),
                }
            }
            NodeSpec::Condition(condition) => {
                run.metrics.conditions_evaluated += 1;

                let evaluation = {
                    let scope = TemplateScope::new(event, outputs);
                    condition.evaluate(&scope)
                };
                let result = evaluation.result;
                if !evaluation.missing.is_empty() {
                    tracing::warn!(
                        "⚠️ Condition '{}' referenced unknown fields {:?}, treated as undefined",
                        node.id,
                        evaluation.missing
                    );
                }
                if let Some(error) = &evaluation.error {
                    tracing::warn!("⚠️ Condition '{}' failed to evaluate, taking 'false': {}", node.id, error);
                }
                tracing::debug!("🔀 Condition '{}' ({}) evaluated to {}", node.id, condition.source(), result);

                let mut output = ContextMap::new();
                output.insert("result".to_string(), Scalar::Bool(result));
                outputs.insert(node.id.clone(), output);

                Visit {
                    status: if evaluation.error.is_some() {
                        StepStatus::Failed
                    } else {
                        StepStatus::Succeeded
                    },
                    input: json!({ "expression": condition.source(), "unresolved": evaluation.missing }),
                    output: json!({ "result": result, "branch": if result { "true" } else { "false" } }),
                    http: None,
                    error: evaluation.error,
                    next: graph.branch_target(index, result).into_iter().collect(),
                }
            }
            NodeSpec::Action(config) => self.visit_action(graph, index, node, config, event, outputs, run).await,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn visit_action(
        &self,
        graph: &CompiledGraph,
        index: NodeIndex,
        node: &GraphNode,
        config: &ActionConfig,
        event: &DomainEvent,
        outputs: &mut NodeOutputs,
        run: &mut ExecutionRun,
    ) -> Visit {
        let (request, unresolved) = {
            let scope = TemplateScope::new(event, outputs);
            resolve_request(config, &scope, self.settings.action_timeout)
        };

        tracing::info!("🌍 Action '{}': {} {}", node.id, request.method, request.url);
        let outcome = self.invoker.invoke(&request).await;

        run.metrics.actions_executed += 1;
        let success = outcome.is_success();
        if success {
            run.metrics.actions_succeeded += 1;
            tracing::info!("✅ Action '{}' succeeded in {:?}", node.id, outcome.latency);
        } else {
            run.metrics.actions_failed += 1;
            tracing::warn!(
                "❌ Action '{}' failed: {}",
                node.id,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }

        let action_output = action_outputs(&outcome);
        let output = json!(action_output);
        outputs.insert(node.id.clone(), action_output);

        let next = if !success && config.critical {
            tracing::warn!("🛑 Critical action '{}' failed, aborting its branch", node.id);
            Vec::new()
        } else {
            default_successors(graph, index)
        };

        let http = HttpDetails {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            status_code: outcome.status_code,
            latency_ms: Some(outcome.latency.as_millis() as i64),
        };

        Visit {
            status: if success { StepStatus::Succeeded } else { StepStatus::Failed },
            input: json!({
                "method": request.method,
                "url": request.url,
                "headers": request.headers,
                "body": request.body,
                "timeout_ms": request.timeout.as_millis() as u64,
                "critical": config.critical,
                "unresolved": unresolved,
            }),
            output,
            http: Some(http),
            error: outcome.error,
            next,
        }
    }

    /// Stamp a visit into a step, persist it and keep it on the in-memory run
    async fn record(
        &self,
        run: &mut ExecutionRun,
        node: &GraphNode,
        step_order: u32,
        started_at: chrono::DateTime<Utc>,
        clock: Instant,
        visit: Visit,
    ) -> Result<(), RecorderError> {
        let step = ExecutionStep {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run.id.clone(),
            step_order,
            node_id: node.id.clone(),
            node_kind: node.kind(),
            node_subtype: node.subtype.clone(),
            status: visit.status,
            input_data: visit.input,
            output_data: visit.output,
            http: visit.http,
            error_message: visit.error,
            started_at,
            duration_ms: clock.elapsed().as_millis() as i64,
        };

        let result = self.recorder.append_step(&step).await;
        run.steps.push(step);
        result
    }

    async fn finish(
        &self,
        run: ExecutionRun,
        started: Instant,
        status: RunStatus,
        error_message: Option<String>,
    ) -> ExecutionRun {
        self.seal(run, started, status, error_message, true).await
    }

    /// Set the terminal fields and, when the header was persisted, write them back
    async fn seal(
        &self,
        mut run: ExecutionRun,
        started: Instant,
        status: RunStatus,
        error_message: Option<String>,
        persist: bool,
    ) -> ExecutionRun {
        run.status = status;
        run.error_message = error_message;
        run.completed_at = Some(Utc::now());
        run.execution_time_ms = Some(started.elapsed().as_millis() as i64);

        if persist {
            if let Err(e) = self.recorder.finish_run(&run).await {
                tracing::error!(
                    "💥 Failed to finish run {} (correlation {}): {}",
                    run.id,
                    run.correlation_id,
                    e
                );
                run.status = RunStatus::Failed;
                run.error_message = Some(format!("engine fault: {}", e));
                return run;
            }
        }

        tracing::info!(
            "🎉 Run {} finished as {} ({} nodes visited, {} actions, {} failed) in {}ms",
            run.id,
            run.status.as_str(),
            run.metrics.nodes_visited,
            run.metrics.actions_executed,
            run.metrics.actions_failed,
            run.execution_time_ms.unwrap_or_default()
        );
        run
    }
}

fn run_span(run: &ExecutionRun) -> tracing::Span {
    tracing::info_span!(
        "run",
        run_id = %run.id,
        automation_id = %run.automation_id,
        correlation_id = %run.correlation_id
    )
}

/// Compile the graph and find the trigger nodes this event starts from
fn compile_for(
    automation: &Automation,
    event: &DomainEvent,
) -> Result<(CompiledGraph, Vec<NodeIndex>), GraphError> {
    let graph = CompiledGraph::compile(&automation.graph)?;
    let starts = graph.trigger_starts(event.trigger_type);
    if starts.is_empty() {
        return Err(GraphError::NoMatchingTrigger(event.trigger_type.as_str().to_string()));
    }
    Ok((graph, starts))
}

fn default_successors(graph: &CompiledGraph, index: NodeIndex) -> Vec<NodeIndex> {
    graph
        .successors(index)
        .into_iter()
        .map(|(_, target)| target)
        .collect()
}

/// Render url, headers and body; returns the request plus every unresolved placeholder
fn resolve_request(
    config: &ActionConfig,
    scope: &TemplateScope<'_>,
    default_timeout: Duration,
) -> (ActionRequest, Vec<String>) {
    let mut unresolved: Vec<String> = Vec::new();
    let mut render = |text: &str| {
        let rendered = template::render(text, scope);
        for path in rendered.missing {
            if !unresolved.contains(&path) {
                unresolved.push(path);
            }
        }
        rendered.text
    };

    let url = render(config.url.as_str());
    let headers = config
        .headers
        .iter()
        .map(|(name, value)| (name.clone(), render(value.as_str())))
        .collect();
    let body = config.body.as_deref().map(&mut render);

    let request = ActionRequest {
        method: config.method.clone(),
        url,
        headers,
        body,
        timeout: config.timeout.unwrap_or(default_timeout),
    };
    (request, unresolved)
}

/// Output map of an action, addressable downstream as `<node_id>.<key>`
///
/// A JSON object or array response is also flattened into `body.<path>` keys.
fn action_outputs(outcome: &ActionOutcome) -> ContextMap {
    let mut output = ContextMap::new();
    output.insert(
        "status_code".to_string(),
        outcome
            .status_code
            .map(|code| Scalar::Number(code as f64))
            .unwrap_or(Scalar::Null),
    );
    output.insert("success".to_string(), Scalar::Bool(outcome.is_success()));
    output.insert(
        "latency_ms".to_string(),
        Scalar::Number(outcome.latency.as_millis() as f64),
    );
    if let Some(error) = &outcome.error {
        output.insert("error".to_string(), Scalar::from(error.as_str()));
    }
    if let Some(body) = &outcome.response_body {
        if let Ok(parsed @ (Value::Object(_) | Value::Array(_))) = serde_json::from_str::<Value>(body) {
            flatten_json("body", &parsed, &mut output);
        }
        output.insert("body".to_string(), Scalar::from(body.as_str()));
    }
    output
}

fn flatten_json(prefix: &str, value: &Value, out: &mut ContextMap) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten_json(&format!("{}.{}", prefix, key), nested, out);
            }
        }
        Value::Array(items) => {
            for (i, nested) in items.iter().enumerate() {
                flatten_json(&format!("{}.{}", prefix, i), nested, out);
            }
        }
        scalar => {
            if let Some(scalar) = Scalar::from_json(scalar) {
                out.insert(prefix.to_string(), scalar);
            }
        }
    }
}
