//! Built-in tools and a sample knowledge base for Reagent.
//!
//! These give `reagent run` something to act on out of the box. Real
//! deployments plug their own [`ToolCatalog`](reagent_core::ToolCatalog)
//! and [`Retriever`](reagent_core::Retriever) into the engine instead.

pub mod knowledge;
pub mod weather;

use reagent_core::tool::ToolRegistry;
use std::sync::Arc;

pub use knowledge::StaticKnowledge;
pub use weather::WeatherTool;

/// Create a tool registry with all built-in tools.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(WeatherTool));
    registry
}
