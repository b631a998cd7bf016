//! # Reagent Core
//!
//! Domain types, collaborator traits, and error definitions for the Reagent
//! ReAct engine. The engine crate drives the think → act → observe → reflect
//! loop; everything it talks to (text generators, tool catalogs, retrieval,
//! storage, approval transports) is defined here as a trait.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait. Implementations live in their
//! respective crates, with small in-process versions here for tests and
//! single-process deployments:
//! - [`ToolRegistry`] implements both [`ToolCatalog`] and [`ToolInvoker`]
//! - [`InProcessConfirmations`] implements [`ConfirmationTransport`]
//! - [`InMemoryStopRegistry`] implements [`StopSignal`]
//! - [`InMemoryContextStore`] implements [`ContextStore`]
//! - [`EventBus`] implements [`EventSink`]

pub mod action;
pub mod agent;
pub mod confirmation;
pub mod context;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod retrieval;
pub mod stop;
pub mod store;
pub mod stream;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use action::{
    ActionKind, ActionPayload, ActionResult, AgentAction, CompleteParams, DirectResponseParams,
    ErrorKind, GenerateParams, RetrieveParams, ToolCallParams,
};
pub use agent::{AgentState, ExecutionMode};
pub use confirmation::{ConfirmationDecision, ConfirmationTransport, InProcessConfirmations};
pub use context::{AgentContext, LastActionOutcome, RetrievalRecord, ToolCallRecord};
pub use error::{Error, Result};
pub use event::{AgentEvent, EventBus, EventSink};
pub use message::{ConversationId, Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ResponseFormat, StreamChunk};
pub use retrieval::{KnowledgeBase, RetrievalRequest, RetrievalResult, RetrievedDocument, Retriever};
pub use stop::{InMemoryStopRegistry, StopSignal};
pub use store::{ContextStore, InMemoryContextStore};
pub use stream::StreamSink;
pub use tool::{Tool, ToolCatalog, ToolDescriptor, ToolInvoker, ToolRegistry};
