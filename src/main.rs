use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webpilot::browser::CdpGateway;
use webpilot::config::AgentConfig;
use webpilot::controller::{AgentController, RunOptions};
use webpilot::guardrails::Guardrails;
use webpilot::llm::{LayeredOracle, LlmClient, LlmDecisionOracle, SemanticVisibility};
use webpilot::memory::SessionMemory;
use webpilot::perception::{ElementStore, Regionizer};
use webpilot::planner::Planner;
use webpilot::verifier::EffectVerifier;

#[derive(Parser)]
#[command(name = "webpilot")]
#[command(about = "LLM-driven browser automation agent", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan and run a natural-language task
    Run {
        /// The task to complete
        task: String,

        /// Start URL (overrides configuration)
        #[arg(short, long)]
        url: Option<String>,

        /// Run the browser with a visible window
        #[arg(long)]
        headed: bool,
    },

    /// Launch the browser, navigate, and print a scan summary
    Probe {
        /// URL to probe
        url: String,

        /// Run the browser with a visible window
        #[arg(long)]
        headed: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AgentConfig::from_file(path)?,
        None => AgentConfig::default(),
    };
    config = config.apply_env();

    match cli.command {
        Commands::Run { task, url, headed } => {
            if let Some(url) = url {
                config.browser.start_url = url;
            }
            if headed {
                config.browser.headless = false;
            }
            run_task(config, &task).await?;
        }
        Commands::Probe { url, headed } => {
            config.browser.start_url = url;
            if headed {
                config.browser.headless = false;
            }
            probe(config).await?;
        }
    }

    Ok(())
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webpilot=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_task(config: AgentConfig, task: &str) -> Result<()> {
    let planner = Planner::new(LlmClient::from_config(&config.llm), &config.llm);
    let plan = planner.plan(task).await;
    info!("strategy: {}", plan.strategy);
    for step in &plan.steps {
        info!(
            "  {} {} {}",
            step.id,
            step.title,
            if step.needs_auth { "(needs auth)" } else { "" }
        );
    }

    let gateway = Arc::new(CdpGateway::launch(&config.browser).await?);

    let oracle = LayeredOracle::new(
        LlmClient::from_config(&config.llm).map(|client| {
            LlmDecisionOracle::new(client, &config.llm, config.controller.region_prompt_cap)
        }),
    );
    let semantic = SemanticVisibility::new(LlmClient::from_config(&config.llm), &config.llm);
    let mut controller = AgentController::new(
        gateway,
        Arc::new(oracle),
        semantic,
        Guardrails::new(config.guardrails.clone()),
        Arc::new(EffectVerifier::new()),
        Arc::new(SessionMemory::new()),
        config.controller.clone(),
    );

    let mut on_step = |phase: webpilot::StepPhase, message: &str, _action: Option<&webpilot::Action>| {
        println!("[{}] {}", phase.as_str(), message);
    };
    let session_id = uuid::Uuid::new_v4().to_string();

    for (index, step) in plan.steps.iter().enumerate() {
        if step.needs_auth {
            println!(
                "paused before {}: '{}' needs the user to authenticate",
                step.id, step.title
            );
            return Ok(());
        }

        let composed = format!("TASK: {}\nCURRENT STEP: {}", task, step.description);
        println!("\n=== {} ({}/{}) ===", step.title, index + 1, plan.steps.len());
        let outcome = controller
            .run_loop(&session_id, &composed, &mut on_step, RunOptions::default())
            .await?;

        if outcome.completed {
            println!("completed: {}", outcome.reason);
            continue;
        }
        if let Some(kind) = outcome.pause_kind {
            println!("paused ({:?}): {}", kind, outcome.reason);
            if let Some(pending) = outcome.pending_action {
                println!("pending action: {}", serde_json::to_string(&pending)?);
            }
        } else {
            println!("stopped: {}", outcome.reason);
        }
        return Ok(());
    }
    Ok(())
}

async fn probe(config: AgentConfig) -> Result<()> {
    let gateway = CdpGateway::launch(&config.browser).await?;
    let mut store = ElementStore::new();
    let regions = Regionizer::detect_regions(&gateway, &mut store).await?;

    println!("url:   {}", webpilot::BrowserGateway::url(&gateway).await?);
    println!("title: {}", webpilot::BrowserGateway::title(&gateway).await?);
    println!("{} interactive regions:", regions.len());
    for region in regions.iter().take(40) {
        println!(
            "  {} | {:?} | {} | {:.0}x{:.0}",
            region.id, region.role, region.label, region.bbox.width, region.bbox.height
        );
    }
    if regions.len() > 40 {
        println!("  (+{} more)", regions.len() - 40);
    }
    Ok(())
}
