pub mod orchestrator;
pub mod parse;
