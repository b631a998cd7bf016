//! The loop driver.
//!
//! One [`ReactEngine::execute`] call runs think → execute → observe →
//! reflect until an answer is produced, the goal is judged achieved, a
//! failure is judged final, a stop is requested, or the iteration budget
//! runs out. Stages run strictly one after another; only the dispatcher
//! runs actions in parallel.
//!
//! `execute` never returns an error and never lets a panic escape: both are
//! turned into a `FAILED` result with reason `EXCEPTION`, carrying whatever
//! history the run had built up.

use futures::FutureExt;
use reagent_core::action::{ActionKind, ActionPayload, ActionResult, AgentAction, ErrorKind, GenerateParams};
use reagent_core::agent::AgentState;
use reagent_core::confirmation::{ConfirmationTransport, InProcessConfirmations};
use reagent_core::context::AgentContext;
use reagent_core::error::Error;
use reagent_core::event::AgentEvent;
use reagent_core::message::Message;
use reagent_core::provider::Provider;
use reagent_core::retrieval::Retriever;
use reagent_core::stop::{InMemoryStopRegistry, StopSignal};
use reagent_core::store::{ContextStore, InMemoryContextStore};
use reagent_core::tool::{ToolCatalog, ToolInvoker, ToolRegistry};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::actions::{ExecutionScope, HandlerDeps, HandlerTable};
use crate::dispatch::{ActionDispatcher, WorkerPool};
use crate::generation::Generator;
use crate::observation::{Observation, ObservationStage, answer_message};
use crate::outcome::{ExecutionRecord, FinalResult, RunClock, TerminationReason};
use crate::reflection::{ReflectionResult, ReflectionStage};
use crate::settings::EngineSettings;
use crate::state_machine::StateMachine;
use crate::summary;
use crate::thinking::ThinkingStage;

/// How often a running batch checks for an out-of-band stop.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct ReactEngine {
    provider: Arc<dyn Provider>,
    catalog: Arc<dyn ToolCatalog>,
    invoker: Arc<dyn ToolInvoker>,
    retriever: Option<Arc<dyn Retriever>>,
    confirmations: Arc<dyn ConfirmationTransport>,
    stops: Arc<dyn StopSignal>,
    store: Arc<dyn ContextStore>,
    settings: EngineSettings,
    pool: Option<WorkerPool>,
    active: Mutex<HashMap<String, CancellationToken>>,
}

/// Stages and collaborators for one run.
struct Stages {
    handlers: Arc<HandlerTable>,
    thinking: ThinkingStage,
    dispatcher: ActionDispatcher,
    observation: ObservationStage,
    reflection: ReflectionStage,
}

impl ReactEngine {
    pub fn new(provider: Arc<dyn Provider>, catalog: Arc<dyn ToolCatalog>, invoker: Arc<dyn ToolInvoker>) -> Self {
        Self {
            provider,
            catalog,
            invoker,
            retriever: None,
            confirmations: Arc::new(InProcessConfirmations::new()),
            stops: Arc::new(InMemoryStopRegistry::new()),
            store: Arc::new(InMemoryContextStore::new()),
            settings: EngineSettings::default(),
            pool: None,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Use one in-process registry as both catalog and invoker.
    pub fn from_registry(provider: Arc<dyn Provider>, registry: Arc<ToolRegistry>) -> Self {
        Self::new(provider, registry.clone(), registry)
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_confirmations(mut self, confirmations: Arc<dyn ConfirmationTransport>) -> Self {
        self.confirmations = confirmations;
        self
    }

    pub fn with_stop_signal(mut self, stops: Arc<dyn StopSignal>) -> Self {
        self.stops = stops;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Run batches on a private pool instead of the process-wide one.
    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// The transport approvals and rejections must be sent through.
    pub fn confirmations(&self) -> Arc<dyn ConfirmationTransport> {
        self.confirmations.clone()
    }

    /// Ask the run keyed by `request_id` to stop. In-flight generation and
    /// confirmation waits are interrupted at once; otherwise the run ends at
    /// its next observation. A stop requested before the run starts ends it
    /// before the first model call.
    pub async fn request_stop(&self, request_id: &str) -> bool {
        let accepted = self.stops.request_stop(request_id).await;
        if let Ok(active) = self.active.lock()
            && let Some(token) = active.get(request_id)
        {
            token.cancel();
        }
        info!(request_id, accepted, "Stop requested");
        accepted
    }

    pub async fn execute(&self, goal: &str, ctx: &mut AgentContext) -> FinalResult {
        let clock = RunClock::start(ctx);
        if ctx.last_user_message().is_none_or(|m| m.content != goal) {
            ctx.add_message(Message::user(goal));
        }
        ctx.publish(AgentEvent::Start {
            conversation_id: ctx.conversation_id.to_string(),
            request_id: ctx.request_id.clone(),
        });
        info!(
            conversation_id = %ctx.conversation_id,
            request_id = %ctx.request_id,
            mode = ctx.mode.as_str(),
            model = %ctx.model_id,
            "Agent run started"
        );

        let cancel = self.register_run(&ctx.request_id);
        let mut machine = StateMachine::new();
        let outcome = AssertUnwindSafe(self.run_loop(goal, ctx, &mut machine, &clock, &cancel))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(conversation_id = %ctx.conversation_id, error = %e, "Agent loop failed");
                exception(ctx, &clock, &mut machine, e.to_string())
            }
            Err(panic) => {
                let message = panic_message(&*panic);
                error!(conversation_id = %ctx.conversation_id, error = %message, "Agent loop panicked");
                exception(ctx, &clock, &mut machine, message)
            }
        };

        self.finish(ctx, &clock, result).await
    }

    fn register_run(&self, request_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        if !request_id.is_empty()
            && let Ok(mut active) = self.active.lock()
        {
            active.insert(request_id.to_string(), token.clone());
        }
        token
    }

    async fn finish(&self, ctx: &AgentContext, clock: &RunClock, result: FinalResult) -> FinalResult {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&ctx.request_id);
        }
        if let Err(e) = self.store.save(ctx).await {
            warn!(conversation_id = %ctx.conversation_id, error = %e, "Failed to persist context");
        }

        if !result.is_success() {
            ctx.publish(AgentEvent::Error {
                message: result.record.error.clone().unwrap_or_else(|| result.reason.to_string()),
            });
        }
        ctx.publish(AgentEvent::Complete {
            reason: result.reason.to_string(),
        });
        info!(
            conversation_id = %ctx.conversation_id,
            iterations = clock.iterations(ctx),
            reason = %result.reason,
            success = result.is_success(),
            duration_ms = clock.elapsed_ms(),
            "Agent run finished"
        );
        result
    }

    fn stages(&self) -> Stages {
        let generator = Generator::new(self.provider.clone(), self.settings.generation_timeout);
        let deps = HandlerDeps {
            generator: generator.clone(),
            catalog: self.catalog.clone(),
            invoker: self.invoker.clone(),
            retriever: self.retriever.clone(),
            confirmations: self.confirmations.clone(),
        };
        let handlers = Arc::new(HandlerTable::standard(deps, &self.settings));
        let pool = self
            .pool
            .clone()
            .unwrap_or_else(|| WorkerPool::shared(self.settings.worker_pool_size));
        Stages {
            thinking: ThinkingStage::new(
                generator.clone(),
                self.catalog.clone(),
                handlers.clone(),
                self.settings.clone(),
            ),
            dispatcher: ActionDispatcher::new(handlers.clone(), pool),
            observation: ObservationStage::new(self.stops.clone(), self.store.clone(), self.settings.max_iterations),
            reflection: ReflectionStage::new(generator, self.settings.reflection.clone()),
            handlers,
        }
    }

    async fn run_loop(
        &self,
        goal: &str,
        ctx: &mut AgentContext,
        machine: &mut StateMachine,
        clock: &RunClock,
        cancel: &CancellationToken,
    ) -> Result<FinalResult, Error> {
        if self.stops.is_stop_requested(&ctx.request_id).await {
            self.stops.clear(&ctx.request_id).await;
            info!(request_id = %ctx.request_id, "Stop was pending before the first iteration");
            return Ok(FinalResult::new(
                TerminationReason::UserStopped,
                None,
                ExecutionRecord::succeeded(ctx, clock),
            ));
        }

        let stages = self.stages();
        machine.transition(AgentState::Thinking)?;

        loop {
            let iteration = clock.iterations(ctx) + 1;
            ctx.publish(AgentEvent::IterationStart { iteration });

            if machine.current() == AgentState::Reflecting {
                if self.stops.is_stop_requested(&ctx.request_id).await {
                    self.stops.clear(&ctx.request_id).await;
                    machine.transition(AgentState::Completed)?;
                    return Ok(FinalResult::new(
                        TerminationReason::UserStopped,
                        None,
                        ExecutionRecord::succeeded(ctx, clock),
                    ));
                }
                machine.transition(AgentState::Thinking)?;
            }

            let decided = stages.thinking.think(goal, ctx).await;
            if decided.actions.is_empty() {
                machine.transition(AgentState::Failed)?;
                return Ok(FinalResult::new(
                    TerminationReason::NoActions,
                    None,
                    ExecutionRecord::failed(ctx, clock, "The model did not propose any usable action", None),
                ));
            }

            machine.transition(AgentState::Executing)?;
            let results = self.dispatch_watched(&stages, &decided.actions, ctx, cancel).await;

            machine.transition(AgentState::Observing)?;
            if let Observation::Terminate { reason, record } =
                stages.observation.observe(&decided.actions, &results, ctx, clock).await
            {
                machine.transition(record.final_state)?;
                let answer = match reason {
                    TerminationReason::Completed => terminal_answer(&decided.actions, &results),
                    _ => None,
                };
                return Ok(FinalResult::new(reason, answer, record));
            }

            if self.settings.fast_path
                && let [only] = results.as_slice()
                && only.success
                && only.kind == ActionKind::ToolCall
                && let Some(answer) = self.fast_path(goal, only, &stages, ctx, cancel).await
            {
                machine.transition(AgentState::Completed)?;
                ctx.publish(AgentEvent::IterationEnd { iteration });
                return Ok(FinalResult::new(
                    TerminationReason::Completed,
                    Some(answer),
                    ExecutionRecord::succeeded(ctx, clock),
                ));
            }

            machine.transition(AgentState::Reflecting)?;
            let reflection = stages
                .reflection
                .reflect(goal, &decided.actions, &results, ctx, &stages.handlers)
                .await;
            ctx.publish(AgentEvent::IterationEnd { iteration });
            debug!(
                iteration,
                achieved = reflection.goal_achieved,
                retry = reflection.should_retry,
                summary = %reflection.summary,
                "Reflection finished"
            );

            if reflection.goal_achieved {
                let answer = self.final_answer(goal, &results, &reflection, &stages, ctx, cancel).await;
                machine.transition(AgentState::Completed)?;
                return Ok(FinalResult::new(
                    TerminationReason::Completed,
                    answer,
                    ExecutionRecord::succeeded(ctx, clock),
                ));
            }

            if reflection.is_terminal_failure() {
                machine.transition(AgentState::Failed)?;
                let reason = reflection
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "The last action failed".into());
                return Ok(FinalResult::new(
                    TerminationReason::ActionFailed,
                    None,
                    ExecutionRecord::failed(ctx, clock, reason, reflection.failure_kind),
                ));
            }

            if clock.iterations(ctx) >= self.settings.max_iterations {
                machine.transition(AgentState::Failed)?;
                return Ok(FinalResult::new(
                    TerminationReason::MaxIterations,
                    None,
                    ExecutionRecord::failed(
                        ctx,
                        clock,
                        format!("Reached the limit of {} iterations", self.settings.max_iterations),
                        None,
                    ),
                ));
            }
        }
    }

    /// Run a batch while polling for an out-of-band stop, which cancels the
    /// run's token.
    async fn dispatch_watched(
        &self,
        stages: &Stages,
        actions: &[AgentAction],
        ctx: &AgentContext,
        cancel: &CancellationToken,
    ) -> Vec<ActionResult> {
        let scope = Arc::new(ExecutionScope::from_context(
            ctx,
            self.settings.generation_history_window,
            cancel.clone(),
        ));

        let watcher = {
            let stops = self.stops.clone();
            let request_id = ctx.request_id.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(STOP_POLL_INTERVAL) => {
                            if stops.is_stop_requested(&request_id).await {
                                cancel.cancel();
                                break;
                            }
                        }
                    }
                }
            })
        };

        let results = stages.dispatcher.dispatch(actions, scope).await;
        watcher.abort();
        results
    }

    /// Run one synthesized action outside the state machine and fold its
    /// text into the conversation.
    async fn synthesize(
        &self,
        action: AgentAction,
        stages: &Stages,
        ctx: &mut AgentContext,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let scope = Arc::new(ExecutionScope::from_context(
            ctx,
            self.settings.generation_history_window,
            cancel.clone(),
        ));
        let result = stages
            .dispatcher
            .dispatch(std::slice::from_ref(&action), scope)
            .await
            .into_iter()
            .next()?;
        if !result.success {
            warn!(kind = %result.kind, error = ?result.error, "Answer synthesis failed");
            return None;
        }
        if let Some(message) = answer_message(&result) {
            ctx.add_message(message);
        }
        Some(result.data_text())
    }

    async fn fast_path(
        &self,
        goal: &str,
        result: &ActionResult,
        stages: &Stages,
        ctx: &mut AgentContext,
        cancel: &CancellationToken,
    ) -> Option<String> {
        debug!(tool = %result.name, "Fast path: answering from a single tool result");
        let action = if summary::is_empty_result(result) {
            AgentAction::direct_response(summary::NO_INFORMATION_ANSWER)
        } else {
            synthesis_action(
                summary::fast_path_prompt(goal, &result.data_text()),
                summary::FAST_PATH_SYSTEM,
            )
        };
        self.synthesize(action, stages, ctx, cancel).await
    }

    async fn final_answer(
        &self,
        goal: &str,
        results: &[ActionResult],
        reflection: &ReflectionResult,
        stages: &Stages,
        ctx: &mut AgentContext,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let successes: Vec<&ActionResult> = results.iter().filter(|r| r.success).collect();
        let last_text = successes
            .last()
            .map(|r| r.data_text())
            .filter(|text| !text.trim().is_empty());
        let raw_only = !successes.is_empty()
            && successes
                .iter()
                .all(|r| matches!(r.kind, ActionKind::ToolCall | ActionKind::Retrieve));

        if raw_only && successes.iter().all(|r| summary::is_empty_result(r)) {
            let action = AgentAction::direct_response(summary::NO_INFORMATION_ANSWER);
            return self
                .synthesize(action, stages, ctx, cancel)
                .await
                .or_else(|| Some(summary::NO_INFORMATION_ANSWER.to_string()));
        }

        if reflection.needs_summary || raw_only {
            let action = synthesis_action(
                summary::summary_prompt(goal, ctx, results),
                summary::SUMMARY_SYSTEM,
            );
            if let Some(answer) = self.synthesize(action, stages, ctx, cancel).await {
                return Some(answer);
            }
            warn!("Falling back to the last raw result");
        }
        last_text
    }
}

fn synthesis_action(prompt: String, system: &str) -> AgentAction {
    AgentAction::new(
        "answer_synthesis",
        ActionPayload::Generate(GenerateParams {
            prompt,
            system_prompt: Some(system.to_string()),
            temperature: None,
            max_tokens: None,
        }),
    )
}

/// Text of the successful terminal answer in a batch.
fn terminal_answer(actions: &[AgentAction], results: &[ActionResult]) -> Option<String> {
    actions
        .iter()
        .zip(results)
        .filter(|(action, result)| result.success && action.is_terminal_answer())
        .map(|(_, result)| result.data_text())
        .find(|text| !text.is_empty())
}

fn exception(ctx: &AgentContext, clock: &RunClock, machine: &mut StateMachine, message: String) -> FinalResult {
    if !machine.is_terminal() {
        let _ = machine.transition(AgentState::Failed);
    }
    FinalResult::new(
        TerminationReason::Exception,
        None,
        ExecutionRecord::failed(ctx, clock, message, Some(ErrorKind::Exception)),
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ReflectionPolicy;
    use crate::test_helpers::{AutoDecider, FixedRetriever, RecordingEvents, ScriptedTool, SequentialMockProvider, test_context};
    use reagent_core::agent::ExecutionMode;
    use reagent_core::message::Role;
    use reagent_core::retrieval::RetrievedDocument;
    use serde_json::json;

    const WEATHER_DECISION: &str = r#"{"thinking":"Need live weather","actions":[{"actionType":"TOOL_CALL","actionName":"get_weather","reasoning":"live data","toolCallParams":{"toolName":"get_weather","toolParams":{"city":"Paris"}}}]}"#;

    fn weather_registry() -> (Arc<ToolRegistry>, Arc<ScriptedTool>) {
        let tool = Arc::new(ScriptedTool::new("get_weather", json!({"temp": 18})));
        let mut registry = ToolRegistry::new();
        registry.register(tool.clone());
        (Arc::new(registry), tool)
    }

    fn engine(provider: Arc<SequentialMockProvider>, registry: Arc<ToolRegistry>, settings: EngineSettings) -> ReactEngine {
        ReactEngine::from_registry(provider, registry)
            .with_settings(settings.without_token_delay())
            .with_pool(WorkerPool::new(5))
    }

    #[tokio::test]
    async fn weather_question_takes_the_fast_path() {
        let provider = Arc::new(SequentialMockProvider::texts(&[
            WEATHER_DECISION,
            "It is 18°C in Paris right now.",
        ]));
        let (registry, tool) = weather_registry();
        let engine = engine(provider.clone(), registry, EngineSettings::default());
        let events = Arc::new(RecordingEvents::default());
        let mut ctx = test_context().with_event_sink(events.clone());

        let result = engine.execute("What's the weather in Paris?", &mut ctx).await;

        assert_eq!(result.reason, TerminationReason::Completed);
        assert_eq!(result.answer.as_deref(), Some("It is 18°C in Paris right now."));
        assert_eq!(result.record.iterations, 1);
        assert_eq!(result.record.final_state, AgentState::Completed);
        assert_eq!(provider.call_count(), 2);
        assert_eq!(tool.calls(), 1);

        let synthesis = provider.last_request().unwrap();
        assert!(synthesis.messages.last().unwrap().content.contains(r#"{"temp":18}"#));
        assert_eq!(ctx.messages.first().unwrap().role, Role::User);
        assert_eq!(ctx.messages.last().unwrap().content, "It is 18°C in Paris right now.");

        let types = events.types();
        assert_eq!(types.first(), Some(&"agent:start"));
        assert_eq!(types.last(), Some(&"agent:complete"));
        assert!(types.contains(&"agent:tool_result"));
        assert!(!types.contains(&"agent:reflecting"));
    }

    #[tokio::test]
    async fn malformed_decision_is_retried_once() {
        let provider = Arc::new(SequentialMockProvider::texts(&[
            r#"{"thinking": "oops", "actions": ["#,
            r#"{"thinking":"answer","actions":[{"actionType":"DIRECT_RESPONSE","directResponseParams":{"content":"Hello there!"}}]}"#,
        ]));
        let (registry, _) = weather_registry();
        let engine = engine(provider.clone(), registry, EngineSettings::default());
        let events = Arc::new(RecordingEvents::default());
        let mut ctx = test_context().with_event_sink(events.clone());

        let result = engine.execute("Say hello", &mut ctx).await;

        assert_eq!(result.reason, TerminationReason::Completed);
        assert_eq!(result.answer.as_deref(), Some("Hello there!"));
        assert_eq!(provider.call_count(), 2);
        let retries = events.types().iter().filter(|t| **t == "agent:retrying").count();
        assert_eq!(retries, 1);
    }

    #[tokio::test]
    async fn manual_rejection_never_invokes_the_tool() {
        let provider = Arc::new(SequentialMockProvider::texts(&[WEATHER_DECISION]));
        let (registry, tool) = weather_registry();
        let engine = engine(provider.clone(), registry, EngineSettings::default());
        let decider = Arc::new(AutoDecider::rejecting(engine.confirmations()));
        let mut ctx = test_context()
            .with_mode(ExecutionMode::Manual)
            .with_event_sink(decider.clone());

        let result = engine.execute("What's the weather in Paris?", &mut ctx).await;

        assert_eq!(result.reason, TerminationReason::ActionFailed);
        assert_eq!(result.record.error_kind, Some(ErrorKind::UserRejected));
        assert_eq!(result.record.final_state, AgentState::Failed);
        assert_eq!(tool.calls(), 0);
        assert_eq!(provider.call_count(), 1);
        assert!(ctx.tool_call_history.is_empty());
        assert!(decider.events().iter().any(|e| matches!(e, AgentEvent::ToolCall { requires_confirmation: true, .. })));
    }

    #[tokio::test]
    async fn manual_approval_runs_the_tool() {
        let provider = Arc::new(SequentialMockProvider::texts(&[WEATHER_DECISION, "18°C in Paris."]));
        let (registry, tool) = weather_registry();
        let engine = engine(provider, registry, EngineSettings::default());
        let decider = Arc::new(AutoDecider::approving(engine.confirmations()));
        let mut ctx = test_context()
            .with_mode(ExecutionMode::Manual)
            .with_event_sink(decider);

        let result = engine.execute("Weather?", &mut ctx).await;

        assert_eq!(result.reason, TerminationReason::Completed);
        assert_eq!(tool.calls(), 1);
    }

    #[tokio::test]
    async fn iteration_budget_is_a_hard_cap() {
        let decision = r#"{"thinking":"more","actions":[{"actionType":"LLM_GENERATE","llmGenerateParams":{"prompt":"keep going"}}]}"#;
        let provider = Arc::new(SequentialMockProvider::repeating(decision));
        let (registry, _) = weather_registry();
        let policy = ReflectionPolicy {
            shortcut_kinds: vec![],
            summary_kinds: vec![],
            judge_with_model: false,
        };
        let settings = EngineSettings::default().with_max_iterations(3).with_reflection(policy);
        let engine = engine(provider.clone(), registry, settings);
        let mut ctx = test_context();

        let result = engine.execute("Never finish", &mut ctx).await;

        assert_eq!(result.reason, TerminationReason::MaxIterations);
        assert!(!result.is_success());
        assert_eq!(result.record.iterations, 3);
        assert_eq!(provider.call_count(), 6);
        assert_eq!(ctx.execution_history.len(), 3);
    }

    #[tokio::test]
    async fn exhausted_decisions_end_with_no_actions() {
        let provider = Arc::new(SequentialMockProvider::texts(&["nothing", "still nothing", "no"]));
        let (registry, _) = weather_registry();
        let engine = engine(provider, registry, EngineSettings::default());
        let mut ctx = test_context();

        let result = engine.execute("goal", &mut ctx).await;

        assert_eq!(result.reason, TerminationReason::NoActions);
        assert_eq!(result.record.final_state, AgentState::Failed);
        assert_eq!(result.record.messages.len(), 1);
    }

    #[tokio::test]
    async fn a_panicking_collaborator_becomes_an_exception() {
        let provider = Arc::new(SequentialMockProvider::texts(&[]));
        let (registry, _) = weather_registry();
        let engine = engine(provider, registry, EngineSettings::default());
        let events = Arc::new(RecordingEvents::default());
        let mut ctx = test_context().with_event_sink(events.clone());

        let result = engine.execute("goal", &mut ctx).await;

        assert_eq!(result.reason, TerminationReason::Exception);
        assert_eq!(result.record.error_kind, Some(ErrorKind::Exception));
        assert!(result.record.error.unwrap().contains("no more responses"));
        assert_eq!(result.record.messages.len(), 1);
        let types = events.types();
        assert!(types.contains(&"agent:error"));
        assert_eq!(types.last(), Some(&"agent:complete"));
    }

    #[tokio::test]
    async fn stop_pending_before_the_run_skips_the_model() {
        let provider = Arc::new(SequentialMockProvider::texts(&[WEATHER_DECISION]));
        let (registry, tool) = weather_registry();
        let engine = engine(provider.clone(), registry, EngineSettings::default());
        let mut ctx = test_context();
        assert!(engine.request_stop(&ctx.request_id).await);

        let result = engine.execute("Weather?", &mut ctx).await;

        assert_eq!(result.reason, TerminationReason::UserStopped);
        assert!(result.is_success());
        assert_eq!(result.record.final_state, AgentState::Completed);
        assert!(result.answer.is_none());
        assert_eq!(provider.call_count(), 0);
        assert_eq!(tool.calls(), 0);

        let again = engine.execute("Weather?", &mut ctx).await;
        assert_ne!(again.reason, TerminationReason::UserStopped);
        assert!(provider.call_count() >= 1);
    }

    #[tokio::test]
    async fn retrieval_results_are_summarized() {
        let decision = r#"{"thinking":"search","actions":[{"actionType":"RAG_RETRIEVE","ragRetrieveParams":{"query":"refund policy"}}]}"#;
        let provider = Arc::new(SequentialMockProvider::texts(&[decision, "Refunds are accepted within 30 days."]));
        let retriever = Arc::new(FixedRetriever::new(vec![RetrievedDocument {
            id: "doc-1".into(),
            title: "Refunds".into(),
            content: "Customers may return items within 30 days.".into(),
            score: 0.92,
            knowledge_id: Some("docs".into()),
        }]));
        let (registry, _) = weather_registry();
        let engine = engine(provider.clone(), registry, EngineSettings::default()).with_retriever(retriever.clone());
        let mut ctx = test_context();

        let result = engine.execute("What is the refund policy?", &mut ctx).await;

        assert_eq!(result.reason, TerminationReason::Completed);
        assert_eq!(result.answer.as_deref(), Some("Refunds are accepted within 30 days."));
        assert_eq!(provider.call_count(), 2);
        let summary_request = provider.last_request().unwrap();
        let prompt = &summary_request.messages.last().unwrap().content;
        assert!(prompt.contains("## Original question\nWhat is the refund policy?"));
        assert!(prompt.contains("\"refund policy\": 1 results"));
        assert_eq!(retriever.last_request().unwrap().knowledge_ids, vec!["docs".to_string()]);
    }

    #[tokio::test]
    async fn empty_retrieval_answers_without_a_model_call() {
        let decision = r#"{"thinking":"search","actions":[{"actionType":"RAG_RETRIEVE","ragRetrieveParams":{"query":"unicorn pricing"}}]}"#;
        let provider = Arc::new(SequentialMockProvider::texts(&[decision]));
        let (registry, _) = weather_registry();
        let engine = engine(provider.clone(), registry, EngineSettings::default())
            .with_retriever(Arc::new(FixedRetriever::new(vec![])));
        let mut ctx = test_context();

        let result = engine.execute("How much is a unicorn?", &mut ctx).await;

        assert_eq!(result.reason, TerminationReason::Completed);
        assert_eq!(result.answer.as_deref(), Some(summary::NO_INFORMATION_ANSWER));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn goal_is_not_duplicated_when_already_last_user_message() {
        let provider = Arc::new(SequentialMockProvider::texts(&[
            r#"{"thinking":"x","actions":[{"actionType":"DIRECT_RESPONSE","directResponseParams":{"content":"Hi!"}}]}"#,
        ]));
        let (registry, _) = weather_registry();
        let engine = engine(provider, registry, EngineSettings::default());
        let mut ctx = test_context();
        ctx.add_message(Message::user("Hello"));

        engine.execute("Hello", &mut ctx).await;

        let user_messages = ctx.messages.iter().filter(|m| m.role == Role::User).count();
        assert_eq!(user_messages, 1);
    }
}
