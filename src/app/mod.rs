pub mod orchestrator;


pub use orchestrator::SentinelOrchestrator;
