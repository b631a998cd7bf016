//! `reagent run`: drive one goal through the ReAct loop.
//!
//! The answer streams to stdout; progress (tool calls, approvals, retries)
//! goes to stderr. Manual-mode tool calls print the id to pass to
//! `reagent approve` / `reagent reject` from another terminal.

use clap::Args;
use reagent_agent::{EngineSettings, FinalResult, ReactEngine};
use reagent_core::agent::ExecutionMode;
use reagent_core::context::AgentContext;
use reagent_core::event::{AgentEvent, EventBus, EventSink};
use reagent_core::message::ConversationId;
use reagent_core::store::ContextStore;
use reagent_core::stream::StreamSink;
use reagent_tools::StaticKnowledge;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// What the agent should accomplish
    pub goal: String,

    /// Wait for approval before every tool call
    #[arg(long)]
    pub manual: bool,

    /// Id to pass to `reagent stop` (generated when omitted)
    #[arg(long)]
    pub request_id: Option<String>,

    /// Continue a stored conversation
    #[arg(long)]
    pub conversation: Option<String>,

    /// Override the configured model
    #[arg(long)]
    pub model: Option<String>,

    /// Override the iteration budget
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_iterations: Option<u32>,

    /// Print the final result as JSON instead of streaming the answer
    #[arg(long)]
    pub json: bool,
}

/// Writes answer tokens to stdout as they arrive.
#[derive(Default)]
struct StdoutStream {
    wrote: AtomicBool,
}

impl StreamSink for StdoutStream {
    fn on_token(&self, token: &str) {
        self.wrote.store(true, Ordering::Relaxed);
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(token.as_bytes());
        let _ = stdout.flush();
    }

    fn on_complete(&self, _full_text: &str) {
        println!();
    }
}

pub async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config()?;
    if let Some(model) = &args.model {
        config.default_model = model.clone();
    }

    let provider = reagent_providers::build_from_config(&config)?;
    let store = Arc::new(super::open_store(&config).await?);
    let knowledge = StaticKnowledge::sample();
    let bases = knowledge.bases().to_vec();

    let mut settings = EngineSettings::from(&config);
    if let Some(max) = args.max_iterations {
        settings = settings.with_max_iterations(max);
    }

    let engine = Arc::new(
        ReactEngine::from_registry(provider, Arc::new(reagent_tools::default_registry()))
            .with_retriever(Arc::new(knowledge))
            .with_confirmations(store.clone())
            .with_stop_signal(store.clone())
            .with_store(store.clone())
            .with_settings(settings),
    );

    let ctx = match &args.conversation {
        Some(id) => store
            .load(&ConversationId::from(id.as_str()))
            .await?
            .ok_or_else(|| format!("No stored conversation '{id}'"))?,
        None => AgentContext::new(ConversationId::new(), &config.default_model),
    };
    let mode = if args.manual { ExecutionMode::Manual } else { ExecutionMode::Auto };
    let request_id = args
        .request_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut ctx = ctx
        .with_request_id(&request_id)
        .with_mode(mode)
        .with_knowledge(bases);
    ctx.model_id = config.default_model.clone();

    let events = Arc::new(EventBus::default());
    let progress = tokio::spawn(report_progress(events.subscribe()));
    let stream = Arc::new(StdoutStream::default());
    let stream_sink: Option<Arc<dyn StreamSink>> = if args.json {
        None
    } else {
        Some(stream.clone() as Arc<dyn StreamSink>)
    };
    ctx.attach_sinks(Some(events.clone() as Arc<dyn EventSink>), stream_sink);

    eprintln!("  Request:       {request_id}");
    eprintln!("  Conversation:  {}", ctx.conversation_id);
    eprintln!("  Mode:          {}", mode.as_str());
    eprintln!();

    let stopper = {
        let engine = engine.clone();
        let request_id = request_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n  Stopping {request_id}...");
                engine.request_stop(&request_id).await;
            }
        })
    };

    let result = engine.execute(&args.goal, &mut ctx).await;
    stopper.abort();
    let _ = tokio::time::timeout(Duration::from_secs(1), progress).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if let Some(answer) = &result.answer
        && !stream.wrote.load(Ordering::Relaxed)
    {
        println!("{answer}");
    }

    finish(&result)
}

fn finish(result: &FinalResult) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!();
    eprintln!(
        "  {} after {} iteration(s) in {} ms",
        result.reason, result.record.iterations, result.record.elapsed_ms
    );
    if result.is_success() {
        Ok(())
    } else {
        let error = result.record.error.as_deref().unwrap_or("unknown error");
        Err(format!("Run ended with {}: {error}", result.reason).into())
    }
}

/// Print progress events to stderr until the run completes.
async fn report_progress(mut rx: broadcast::Receiver<Arc<AgentEvent>>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Progress reporter lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        if let Some(line) = progress_line(&event) {
            eprintln!("{line}");
        }
        if matches!(event.as_ref(), AgentEvent::Complete { .. }) {
            break;
        }
    }
}

fn progress_line(event: &AgentEvent) -> Option<String> {
    match event {
        AgentEvent::Retrying { attempt, reason } => Some(format!("  ↻ retrying (attempt {attempt}): {reason}")),
        AgentEvent::ToolCall {
            tool_execution_id,
            tool_name,
            params,
            requires_confirmation: true,
            ..
        } => Some(format!(
            "  ? {tool_name} {params} needs approval\n      reagent approve {tool_execution_id}\n      reagent reject {tool_execution_id}"
        )),
        AgentEvent::ToolExecuting { tool_name, .. } => Some(format!("  → {tool_name}")),
        AgentEvent::ToolResult {
            tool_name,
            success,
            duration_ms,
            error,
            ..
        } => Some(match (*success, error) {
            (true, _) => format!("  ✓ {tool_name} ({duration_ms} ms)"),
            (false, Some(error)) => format!("  ✗ {tool_name}: {error}"),
            (false, None) => format!("  ✗ {tool_name}"),
        }),
        AgentEvent::RetrieveQuerying { query } => Some(format!("  🔎 searching: {query}")),
        AgentEvent::Error { message } => Some(format!("  [Error] {message}")),
        _ => None,
    }
}
