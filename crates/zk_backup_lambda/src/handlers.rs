pub mod entry;
pub mod orchestrator;
pub mod writer;
