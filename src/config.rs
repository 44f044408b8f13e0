/// Configuration management for the PR Review Agent
use crate::github::{parse_repository, ReviewEvent};
use crate::llm::interfaces::{LLMConfig, Model};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_REPOSITORY: &str = "MBorky/recipes-api";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub github: GitHubSettings,
    pub llm: LLMConfig,
    pub workflow: WorkflowSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubSettings {
    /// Read from the environment only
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub repository: String,
    pub review_event: ReviewEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    pub max_steps: usize,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            token: None,
            repository: DEFAULT_REPOSITORY.to_string(),
            review_event: ReviewEvent::Comment,
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self { max_steps: 40 }
    }
}

impl Config {
    /// Load configuration from file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override settings with environment values found through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("GITHUB_TOKEN") {
            self.github.token = Some(token);
        }

        if let Some(repository) = lookup("PR_REVIEW_REPOSITORY") {
            self.github.repository = repository;
        }

        if let Some(api_key) = lookup("OPENAI_API_KEY") {
            self.llm.api_key = Some(api_key);
        }

        if let Some(base_url) = lookup("BASE_URL").filter(|url| !url.is_empty()) {
            self.llm.base_url = Some(base_url);
        }

        if let Some(model) = lookup("PR_REVIEW_MODEL") {
            self.llm.default_model = Model::from(model);
        }

        if let Some(max_steps) = lookup("PR_REVIEW_MAX_STEPS") {
            self.workflow.max_steps = max_steps
                .parse()
                .with_context(|| format!("Invalid PR_REVIEW_MAX_STEPS '{}'", max_steps))?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        parse_repository(&self.github.repository)?;

        if !self.llm.provider.eq_ignore_ascii_case("openai") {
            return Err(anyhow::anyhow!("Unknown LLM provider: {}", self.llm.provider));
        }

        if self.workflow.max_steps == 0 {
            return Err(anyhow::anyhow!("Workflow max_steps must be greater than 0"));
        }

        if self.llm.timeout_seconds == Some(0) {
            return Err(anyhow::anyhow!("LLM timeout must be greater than 0"));
        }

        if let Some(temperature) = self.llm.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(anyhow::anyhow!("LLM temperature must be between 0 and 2"));
            }
        }

        Ok(())
    }

    /// Both credentials are needed before a review can run
    pub fn require_credentials(&self) -> Result<()> {
        if self.github.token.as_deref().map_or(true, str::is_empty) {
            return Err(anyhow::anyhow!("GITHUB_TOKEN is required"));
        }

        if self.llm.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(anyhow::anyhow!("OPENAI_API_KEY is required"));
        }

        Ok(())
    }
}
