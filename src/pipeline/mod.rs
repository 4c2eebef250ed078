//! The message-processing pipeline: state dispatch, prompt assembly,
//! generation, directive application, persistence, delivery.

pub mod orchestrator;
pub mod prompt;

pub use orchestrator::Orchestrator;
