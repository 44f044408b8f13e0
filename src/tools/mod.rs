pub mod github_tools;

pub use github_tools::{FunctionTool, GithubTools, ToolKind};
