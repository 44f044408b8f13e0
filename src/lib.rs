pub mod agents;
pub mod github;
pub mod tools;
pub mod reports;
pub mod types;
pub mod config;
pub mod llm;
