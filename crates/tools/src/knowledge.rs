//! In-memory knowledge base with keyword scoring.
//!
//! Stands in for a vector index: documents are scored by the share of query
//! terms they contain, which is enough to drive `RETRIEVE` actions locally.

use async_trait::async_trait;
use reagent_core::error::RetrievalError;
use reagent_core::retrieval::{
    KnowledgeBase, RetrievalRequest, RetrievalResult, RetrievedDocument, Retriever,
};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    title: String,
    content: String,
}

#[derive(Debug, Default)]
pub struct StaticKnowledge {
    bases: Vec<KnowledgeBase>,
    entries: HashMap<String, Vec<Entry>>,
}

impl StaticKnowledge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a knowledge base. Re-adding an id keeps its documents.
    pub fn add_base(&mut self, base: KnowledgeBase) {
        self.entries.entry(base.id.clone()).or_default();
        self.bases.retain(|b| b.id != base.id);
        self.bases.push(base);
    }

    pub fn add_document(
        &mut self,
        knowledge_id: &str,
        title: impl Into<String>,
        content: impl Into<String>,
    ) {
        let docs = self.entries.entry(knowledge_id.to_string()).or_default();
        let id = format!("{knowledge_id}-{}", docs.len() + 1);
        docs.push(Entry {
            id,
            title: title.into(),
            content: content.into(),
        });
    }

    pub fn bases(&self) -> &[KnowledgeBase] {
        &self.bases
    }

    /// A small knowledge base about agent patterns, used by the CLI.
    pub fn sample() -> Self {
        let mut knowledge = Self::new();
        knowledge.add_base(KnowledgeBase {
            id: "agent-docs".into(),
            name: "Agent patterns".into(),
            description: Some("Notes on reasoning-and-acting agents".into()),
        });
        knowledge.add_document(
            "agent-docs",
            "ReAct loop",
            "The ReAct pattern interleaves reasoning and acting: the agent thinks, \
             acts, observes the result and reflects before deciding the next step.",
        );
        knowledge.add_document(
            "agent-docs",
            "Retrieval-augmented generation",
            "RAG grounds model answers in retrieved documents so responses cite \
             facts from a knowledge base instead of model memory.",
        );
        knowledge.add_document(
            "agent-docs",
            "Human confirmation",
            "In manual mode every tool call waits for a person to approve or reject \
             it. Unanswered confirmations time out after a fixed period.",
        );
        knowledge
    }

    fn score(query_terms: &[String], entry: &Entry) -> f32 {
        if query_terms.is_empty() {
            return 0.0;
        }
        let haystack = format!("{} {}", entry.title, entry.content).to_lowercase();
        let hits = query_terms.iter().filter(|t| haystack.contains(t.as_str())).count();
        hits as f32 / query_terms.len() as f32
    }
}

#[async_trait]
impl Retriever for StaticKnowledge {
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalResult, RetrievalError> {
        let scopes: Vec<&String> = if request.knowledge_ids.is_empty() {
            self.entries.keys().collect()
        } else {
            request.knowledge_ids.iter().collect()
        };

        let terms: Vec<String> = request
            .query
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|t| t.len() > 2)
            .collect();

        let mut scored = Vec::new();
        for scope in scopes {
            let entries = self
                .entries
                .get(scope)
                .ok_or_else(|| RetrievalError::KnowledgeBaseNotFound(scope.clone()))?;
            for entry in entries {
                let score = Self::score(&terms, entry);
                if score > 0.0 && score >= request.similarity_threshold {
                    scored.push(RetrievedDocument {
                        id: entry.id.clone(),
                        title: entry.title.clone(),
                        content: entry.content.clone(),
                        score,
                        knowledge_id: Some(scope.clone()),
                    });
                }
            }
        }

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        let total_count = scored.len();
        let max_score = scored.first().map(|d| d.score).unwrap_or(0.0);
        scored.truncate(request.max_results as usize);

        tracing::debug!(query = %request.query, total_count, "Knowledge lookup");
        Ok(RetrievalResult {
            documents: scored,
            total_count,
            max_score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(query: &str) -> RetrievalRequest {
        RetrievalRequest {
            query: query.into(),
            knowledge_ids: vec![],
            max_results: 5,
            similarity_threshold: 0.0,
        }
    }

    #[tokio::test]
    async fn best_match_comes_first() {
        let knowledge = StaticKnowledge::sample();
        let result = knowledge.retrieve(&request("what is the ReAct loop")).await.unwrap();
        assert!(!result.is_empty());
        assert_eq!(result.documents[0].title, "ReAct loop");
        assert_eq!(result.max_score, result.documents[0].score);
    }

    #[tokio::test]
    async fn unrelated_query_finds_nothing() {
        let knowledge = StaticKnowledge::sample();
        let result = knowledge.retrieve(&request("volcano geology")).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.total_count, 0);
    }

    #[tokio::test]
    async fn max_results_caps_documents_not_total() {
        let knowledge = StaticKnowledge::sample();
        let mut req = request("agent model knowledge");
        req.max_results = 1;
        let result = knowledge.retrieve(&req).await.unwrap();
        assert_eq!(result.documents.len(), 1);
        assert!(result.total_count >= 1);
    }

    #[tokio::test]
    async fn unknown_scope_is_an_error() {
        let knowledge = StaticKnowledge::sample();
        let mut req = request("react");
        req.knowledge_ids = vec!["missing".into()];
        let err = knowledge.retrieve(&req).await.unwrap_err();
        assert!(matches!(err, RetrievalError::KnowledgeBaseNotFound(_)));
    }
}
