//! `RAG_RETRIEVE`: query the knowledge retriever and render what it found.

use async_trait::async_trait;
use reagent_core::action::{ActionKind, ActionPayload, ActionResult, AgentAction, ErrorKind, RetrieveParams};
use reagent_core::context::AgentContext;
use reagent_core::event::AgentEvent;
use reagent_core::retrieval::{RetrievalRequest, RetrievalResult, Retriever};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::{ActionHandler, ExecutionScope, annotate, echoed_param};
use crate::parser::{ParseError, ParseErrorCode, RawAction, text_field};

const DEFAULT_MAX_RESULTS: u32 = 5;
const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;

pub const NO_KNOWLEDGE_FOUND: &str = "No relevant knowledge found";

pub struct RetrieveHandler {
    retriever: Option<Arc<dyn Retriever>>,
}

impl RetrieveHandler {
    pub fn new(retriever: Option<Arc<dyn Retriever>>) -> Self {
        Self { retriever }
    }
}

pub fn render_documents(found: &RetrievalResult) -> String {
    if found.is_empty() {
        return NO_KNOWLEDGE_FOUND.to_string();
    }
    let mut text = format!("Retrieved {} items:", found.documents.len());
    for (index, doc) in found.documents.iter().enumerate() {
        let title = if doc.title.is_empty() { &doc.id } else { &doc.title };
        text.push_str(&format!("\n[{}] {}\n{}\n", index + 1, title, doc.content.trim()));
    }
    text
}

#[async_trait]
impl ActionHandler for RetrieveHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::Retrieve
    }

    fn decode(&self, raw: &RawAction, ctx: &AgentContext) -> Result<ActionPayload, ParseError> {
        let Some(params) = raw.params(&["ragRetrieveParams", "retrieveParams"]) else {
            return Err(ParseError::new(
                ParseErrorCode::RetrieveParamsMissing,
                "RAG_RETRIEVE without ragRetrieveParams",
            ));
        };
        let Some(query) = text_field(params, &["query"]) else {
            return Err(ParseError::new(ParseErrorCode::RetrieveQueryMissing, "RAG_RETRIEVE without a query"));
        };

        let mut knowledge_ids: Vec<String> = params
            .get("knowledgeIds")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        if knowledge_ids.is_empty() {
            knowledge_ids = ctx.knowledge_ids.clone();
        }

        Ok(ActionPayload::Retrieve(RetrieveParams {
            query: query.trim().to_string(),
            knowledge_ids,
            max_results: params.get("maxResults").and_then(Value::as_u64).map(|n| n as u32),
            similarity_threshold: params
                .get("similarityThreshold")
                .and_then(Value::as_f64)
                .map(|t| t as f32),
        }))
    }

    async fn execute(&self, action: &AgentAction, scope: &ExecutionScope) -> ActionResult {
        let started = Instant::now();
        let ActionPayload::Retrieve(params) = &action.payload else {
            return annotate(
                action,
                ActionResult::failure(action, "Not a retrieval", ErrorKind::Validation),
                started,
            );
        };

        let query = match params.query.trim() {
            "" => action.reasoning.clone().unwrap_or_default(),
            q => q.to_string(),
        };
        if query.trim().is_empty() {
            let result = ActionResult::failure(action, "Retrieval query is empty", ErrorKind::RetrieveError);
            return annotate(action, result, started);
        }

        scope.publish(AgentEvent::RetrieveQuerying { query: query.clone() });

        let Some(retriever) = &self.retriever else {
            let result = ActionResult::failure(action, "No knowledge retriever is configured", ErrorKind::RetrieveError);
            return annotate(action, result, started);
        };

        let request = RetrievalRequest {
            query,
            knowledge_ids: if params.knowledge_ids.is_empty() {
                scope.knowledge_ids.clone()
            } else {
                params.knowledge_ids.clone()
            },
            max_results: params.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
            similarity_threshold: params.similarity_threshold.unwrap_or(DEFAULT_SIMILARITY_THRESHOLD),
        };

        let result = match retriever.retrieve(&request).await {
            Ok(found) => {
                debug!(query = %request.query, documents = found.documents.len(), total = found.total_count, "Retrieval complete");
                ActionResult::success(action, render_documents(&found))
                    .with_metadata("result_count", found.documents.len())
                    .with_metadata("total_count", found.total_count)
                    .with_metadata("max_score", found.max_score)
            }
            Err(e) => {
                warn!(query = %request.query, error = %e, "Retrieval failed");
                ActionResult::failure(action, e.to_string(), ErrorKind::RetrieveError)
            }
        };
        annotate(action, result, started)
    }

    fn describe_input(&self, result: &ActionResult) -> String {
        let query = echoed_param(result, "query").and_then(Value::as_str).unwrap_or_default();
        match echoed_param(result, "knowledge_ids").and_then(Value::as_array) {
            Some(ids) if !ids.is_empty() => format!("query \"{query}\" in {}", Value::Array(ids.clone())),
            _ => format!("query \"{query}\""),
        }
    }
}
