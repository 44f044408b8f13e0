pub mod client;
pub mod content;

pub use client::{parse_repository, GitHubApi, GitHubClient, ReviewEvent};
pub use content::{decode_contents, ContentError};

#[cfg(test)]
pub use client::MockGitHubApi;
