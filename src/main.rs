use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use pr_review_agent::{
    agents::{create_agents, AgentRole, AgentWorkflow, WorkflowConfig},
    config::Config,
    github::GitHubClient,
    llm::{AgentPrompts, LLMInterface, LLMProvider, LLMProviderFactory, Model, OpenAIProvider},
    reports::formatter_for,
    tools::GithubTools,
    types::SharedState,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pr-review-agent")]
#[command(about = "Multi-agent GitHub pull request reviewer")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// GitHub repository (owner/repo or URL)
    #[arg(short, long, global = true)]
    repo: Option<String>,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Output format (text, json)
    #[arg(short, long, global = true, default_value = "text")]
    output: String,

    /// Maximum LLM calls per run
    #[arg(long, global = true)]
    max_steps: Option<usize>,

    /// Model name passed to the chat completions endpoint
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Seed the shared state with a pull request number
    #[arg(long, global = true)]
    pr: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a request from stdin and run the review agents (default)
    Review,

    /// Check GitHub authentication and LLM endpoint reachability
    HealthCheck,

    /// Initialize configuration file
    Init {
        /// Configuration file path
        #[arg(short = 'f', long, default_value = "pr-review-agent.yml")]
        config_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(&cli.log_level)?;

    match cli.command {
        Some(Commands::Init { ref config_file }) => init_config(config_file.clone()).await,
        Some(Commands::HealthCheck) => {
            let config = load_config(&cli).await?;
            health_check(config).await
        }
        Some(Commands::Review) | None => {
            let config = load_config(&cli).await?;
            if let Err(e) = review(config, &cli.output, cli.pr).await {
                error!("Review failed: {:#}", e);
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

/// Initialize tracing with the specified log level
fn init_tracing(log_level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .context("Failed to create env filter")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .with_level(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}

/// Layer defaults, config file, environment and CLI flags
async fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) if path.exists() => {
            info!("Loading configuration from: {:?}", path);
            Config::load_from_file(path)
                .await
                .with_context(|| format!("Failed to load configuration file: {:?}", path))?
        }
        Some(path) => {
            warn!("Configuration file not found: {:?}. Using defaults.", path);
            Config::default()
        }
        None => Config::default(),
    };

    config.apply_env_overrides(|key| std::env::var(key).ok())?;

    if let Some(repo) = &cli.repo {
        config.github.repository = repo.clone();
    }
    if let Some(max_steps) = cli.max_steps {
        config.workflow.max_steps = max_steps;
    }
    if let Some(model) = &cli.model {
        config.llm.default_model = Model::from(model.clone());
    }

    config.validate()?;
    Ok(config)
}

/// Read one request line. The prompt goes to `prompt_out` so stdout carries only events.
fn read_query<R: BufRead, W: Write>(mut input: R, mut prompt_out: W) -> Result<String> {
    write!(prompt_out, "Enter your request: ")?;
    prompt_out.flush()?;

    let mut line = String::new();
    input
        .read_line(&mut line)
        .context("Failed to read request from stdin")?;

    AgentPrompts::task_prompt(&line)
}

/// Run the agents against one request and stream their events to stdout
async fn review(config: Config, output_format: &str, pr_number: Option<u64>) -> Result<()> {
    config.require_credentials()?;
    let token = config.github.token.clone().unwrap_or_default();

    let github = GitHubClient::new(token, &config.github.repository, config.github.review_event)?;
    info!("Reviewing pull requests in {}", github.repository());

    let tools = GithubTools::new(Arc::new(github));
    let llm: Arc<dyn LLMInterface> = Arc::new(OpenAIProvider::new(config.llm.clone())?);

    let workflow = Arc::new(
        AgentWorkflow::new(
            create_agents(&tools),
            AgentRole::ReviewAndPosting,
            llm,
            tools,
            WorkflowConfig {
                model: config.llm.default_model.clone(),
                temperature: config.llm.temperature,
                max_steps: config.workflow.max_steps,
            },
        )
        .context("Invalid agent hand-off configuration")?,
    );

    let query = read_query(io::stdin().lock(), io::stderr())?;
    let initial_state = pr_number
        .map(SharedState::with_pr_number)
        .unwrap_or_default();

    let mut formatter = formatter_for(output_format);
    let mut handler = workflow.run(query, initial_state);
    {
        let mut events = Box::pin(handler.stream_events());
        while let Some(event) = events.next().await {
            for line in formatter.format(&event)? {
                println!("{}", line);
            }
        }
    }

    let outcome = handler.finish().await?;
    info!(
        agent = %outcome.final_agent,
        steps = outcome.steps,
        review_posted = outcome.review_posted,
        "Review workflow finished"
    );

    Ok(())
}

/// Perform health check of the system
async fn health_check(config: Config) -> Result<()> {
    info!("Performing system health check");
    let mut healthy = true;

    let token = config.github.token.clone().unwrap_or_default();
    let github = match GitHubClient::new(token, &config.github.repository, config.github.review_event) {
        Ok(client) => client.check_authentication().await,
        Err(e) => Err(e),
    };
    match github {
        Ok(login) => println!("  GitHub: ✅ authenticated as {}", login),
        Err(e) => {
            healthy = false;
            println!("  GitHub: ❌ {:#}", e);
        }
    }

    let (name, llm) = match LLMProviderFactory::create(config.llm.clone()) {
        Ok(provider) => (provider.name().to_string(), provider.health_check().await),
        Err(e) => (config.llm.provider.clone(), Err(e)),
    };
    match llm {
        Ok(true) => println!("  LLM ({}): ✅ reachable", name),
        Ok(false) => {
            healthy = false;
            println!("  LLM: ❌ endpoint returned an error status");
        }
        Err(e) => {
            healthy = false;
            println!("  LLM: ❌ {:#}", e);
        }
    }

    if healthy {
        info!("✅ System health check passed");
        println!("System Status: Healthy");
        Ok(())
    } else {
        error!("❌ System health check failed");
        println!("System Status: Unhealthy");
        std::process::exit(1);
    }
}

/// Initialize configuration file
async fn init_config(config_file: PathBuf) -> Result<()> {
    info!("Initializing configuration file: {:?}", config_file);

    if config_file.exists() {
        warn!("Configuration file already exists: {:?}", config_file);
        print!("Overwrite existing file? (y/N): ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().to_lowercase().starts_with('y') {
            info!("Configuration initialization cancelled");
            return Ok(());
        }
    }

    Config::default()
        .save_to_file(&config_file)
        .await
        .with_context(|| format!("Failed to write configuration file: {:?}", config_file))?;

    info!("Configuration file created successfully: {:?}", config_file);
    println!("Configuration file created: {:?}", config_file);
    println!("Credentials are read from GITHUB_TOKEN and OPENAI_API_KEY.");

    Ok(())
}
