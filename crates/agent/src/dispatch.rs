//! Bounded-parallel batch execution.
//!
//! Each action of a batch runs on its own task, but only as many run at
//! once as the [`WorkerPool`] has permits. The pool is process-wide by
//! default, so two concurrent agent runs share one budget. Results come
//! back in the order the actions were given, whatever order they finish in.

use reagent_core::action::{ActionResult, AgentAction, ErrorKind};
use std::sync::{Arc, OnceLock};
use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::actions::{ExecutionScope, HandlerTable};

static SHARED_POOL: OnceLock<WorkerPool> = OnceLock::new();

#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// A pool private to its owner.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// The process-wide pool. Its size is fixed by the first caller.
    pub fn shared(size: usize) -> Self {
        SHARED_POOL.get_or_init(|| Self::new(size)).clone()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

pub struct ActionDispatcher {
    handlers: Arc<HandlerTable>,
    pool: WorkerPool,
}

impl ActionDispatcher {
    pub fn new(handlers: Arc<HandlerTable>, pool: WorkerPool) -> Self {
        Self { handlers, pool }
    }

    /// Run every action and wait for all of them. One result per action,
    /// in input order. A failing or panicking action never cancels its
    /// siblings.
    pub async fn dispatch(&self, actions: &[AgentAction], scope: Arc<ExecutionScope>) -> Vec<ActionResult> {
        let tasks: Vec<_> = actions
            .iter()
            .map(|action| {
                let handler = self.handlers.get(action.kind()).cloned();
                let permits = self.pool.permits.clone();
                let scope = scope.clone();
                let task_action = action.clone();
                tokio::spawn(async move {
                    let Some(handler) = handler else {
                        return ActionResult::failure(
                            &task_action,
                            format!("No handler registered for {}", task_action.kind()),
                            ErrorKind::Exception,
                        );
                    };
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return ActionResult::failure(&task_action, "Worker pool is closed", ErrorKind::Exception);
                    };
                    handler.execute(&task_action, &scope).await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(actions.len());
        for (action, task) in actions.iter().zip(tasks) {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => {
                    error!(action_id = %action.id, kind = %action.kind(), error = %e, "Action task failed");
                    ActionResult::failure(action, format!("Action execution failed: {e}"), ErrorKind::Exception)
                }
            };
            results.push(result);
        }

        debug!(
            actions = results.len(),
            failed = results.iter().filter(|r| !r.success).count(),
            "Batch finished"
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionHandler, HandlerDeps};
    use crate::generation::Generator;
    use crate::parser::{ParseError, RawAction};
    use crate::settings::EngineSettings;
    use crate::test_helpers::{ScriptedTool, SequentialMockProvider, test_context};
    use async_trait::async_trait;
    use reagent_core::action::{ActionKind, ActionPayload};
    use reagent_core::confirmation::InProcessConfirmations;
    use reagent_core::context::AgentContext;
    use reagent_core::tool::ToolRegistry;
    use serde_json::{Map, json};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn table_with(tools: Vec<Arc<ScriptedTool>>) -> Arc<HandlerTable> {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool);
        }
        let registry = Arc::new(registry);
        let deps = HandlerDeps {
            generator: Generator::new(Arc::new(SequentialMockProvider::texts(&[])), Duration::from_secs(5)),
            catalog: registry.clone(),
            invoker: registry,
            retriever: None,
            confirmations: Arc::new(InProcessConfirmations::new()),
        };
        Arc::new(HandlerTable::standard(deps, &EngineSettings::default()))
    }

    fn scope() -> Arc<ExecutionScope> {
        Arc::new(ExecutionScope::from_context(&test_context(), 20, CancellationToken::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn results_keep_input_order() {
        let slow = Arc::new(ScriptedTool::new("slow", json!("slow done")).with_delay(Duration::from_millis(300)));
        let fast = Arc::new(ScriptedTool::new("fast", json!("fast done")).with_delay(Duration::from_millis(10)));
        let dispatcher = ActionDispatcher::new(table_with(vec![slow, fast]), WorkerPool::new(5));

        let actions = vec![
            AgentAction::tool_call("slow", Map::new()),
            AgentAction::tool_call("fast", Map::new()),
            AgentAction::tool_call("missing", Map::new()),
        ];
        let results = dispatcher.dispatch(&actions, scope()).await;

        assert_eq!(results.len(), 3);
        for (action, result) in actions.iter().zip(&results) {
            assert_eq!(action.id, result.action_id);
        }
        assert_eq!(results[0].data_text(), "slow done");
        assert_eq!(results[1].data_text(), "fast done");
        assert_eq!(results[2].error_kind, Some(ErrorKind::ToolCallError));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_the_pool() {
        let tool = Arc::new(ScriptedTool::new("work", json!("ok")).with_delay(Duration::from_millis(100)));
        let dispatcher = ActionDispatcher::new(table_with(vec![tool.clone()]), WorkerPool::new(2));

        let actions: Vec<_> = (0..6).map(|_| AgentAction::tool_call("work", Map::new())).collect();
        let started = tokio::time::Instant::now();
        let results = dispatcher.dispatch(&actions, scope()).await;

        assert!(results.iter().all(|r| r.success));
        assert_eq!(tool.calls(), 6);
        assert_eq!(tool.max_concurrency(), 2);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    struct PanickingHandler;

    #[async_trait]
    impl ActionHandler for PanickingHandler {
        fn kind(&self) -> ActionKind {
            ActionKind::Complete
        }

        fn decode(&self, _raw: &RawAction, _ctx: &AgentContext) -> Result<ActionPayload, ParseError> {
            unreachable!()
        }

        async fn execute(&self, _action: &AgentAction, _scope: &ExecutionScope) -> ActionResult {
            panic!("handler blew up");
        }

        fn describe_input(&self, _result: &ActionResult) -> String {
            String::new()
        }
    }

    #[tokio::test]
    async fn a_panicking_action_becomes_an_exception_result() {
        let tool = Arc::new(ScriptedTool::new("work", json!("ok")));
        let mut table = HandlerTable::new();
        let standard = table_with(vec![tool.clone()]);
        table.register(standard.get(ActionKind::ToolCall).unwrap().clone());
        table.register(Arc::new(PanickingHandler));
        let dispatcher = ActionDispatcher::new(Arc::new(table), WorkerPool::new(2));

        let actions = vec![
            AgentAction::complete(None),
            AgentAction::tool_call("work", Map::new()),
        ];
        let results = dispatcher.dispatch(&actions, scope()).await;

        assert_eq!(results[0].error_kind, Some(ErrorKind::Exception));
        assert!(results[1].success);
        assert_eq!(tool.calls(), 1);
    }

    #[test]
    fn shared_pool_is_one_instance() {
        let a = WorkerPool::shared(5);
        let b = WorkerPool::shared(9);
        assert!(Arc::ptr_eq(&a.permits, &b.permits));
        assert_eq!(b.size(), a.size());
    }
}
