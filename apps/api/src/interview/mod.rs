// Resume → interview question pipeline.
// Stages call the model only through llm_client::CompletionService.

pub mod decoder;
pub mod engine;
pub mod handlers;
pub mod locks;
pub mod prompts;
pub mod schema;
pub mod stages;
pub mod store;
