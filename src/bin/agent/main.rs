mod brain;
mod dom;
mod hands;

use anyhow::{Result, anyhow};
use clap::Parser;
use dotenvy::dotenv;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use flowforge::{
    EngineConfig, Plan, PlanRequest, Planner, RetryingVision, RunContext, RunReport, RunStatus,
    Step, WorkflowRunner,
};

/// Run a natural-language task against a web application in Chrome.
#[derive(Debug, Parser)]
#[command(name = "agent", version)]
struct Args {
    /// What to do, e.g. "Create a project called Roadmap"
    #[arg(long)]
    task: String,

    #[arg(long)]
    app_url: String,

    #[arg(long, default_value = "Application")]
    app_name: String,

    /// JSON file with ready-made steps; skips the planner
    #[arg(long)]
    steps: Option<PathBuf>,

    /// Overrides FLOWFORGE_OUTPUT_DIR
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Chrome profile kept between runs so logins persist
    #[arg(long, default_value = "agent_profile")]
    profile_dir: PathBuf,

    #[arg(long)]
    headless: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = EngineConfig::from_env()?;
    if let Some(dir) = args.output_dir.clone() {
        config.output_dir = dir;
    }

    let brain = Arc::new(brain::Brain::new()?);
    let request = PlanRequest {
        task: args.task.clone(),
        app_url: args.app_url.clone(),
        app_name: args.app_name.clone(),
    };
    let plan = match &args.steps {
        Some(path) => load_steps(request, path)?,
        None => brain.plan(&request).await?,
    };
    info!(steps = plan.steps.len(), "plan ready");

    // Launching Chrome blocks for a while
    let headless = args.headless;
    let profile_dir = args.profile_dir.clone();
    let session = tokio::task::spawn_blocking(move || {
        hands::ChromeSession::launch(headless, &profile_dir)
    })
    .await
    .map_err(|e| anyhow!("Browser launch panicked: {}", e))??;

    let ctx = RunContext::create(Arc::new(session), config.clone())?;
    info!(run = %ctx.run_id, dir = %ctx.store.dir().display(), "run created");

    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current action");
            cancel.cancel();
        }
    });

    let vision = Arc::new(RetryingVision::new(
        brain,
        config.vision_max_retries,
        config.vision_backoff,
    ));
    let mut runner = WorkflowRunner::new(vision, &config);
    let report = runner.run(ctx, &plan).await?;

    print_report(&report);
    if report.status == RunStatus::Aborted {
        anyhow::bail!(
            "run aborted: {}",
            report.abort_reason.as_deref().unwrap_or("unknown reason")
        );
    }
    Ok(())
}

fn load_steps(request: PlanRequest, path: &Path) -> Result<Plan> {
    let file = std::fs::File::open(path)
        .map_err(|e| anyhow!("cannot open steps file {}: {}", path.display(), e))?;
    let steps: Vec<Step> = serde_json::from_reader(std::io::BufReader::new(file))?;
    let plan = Plan::from_steps(request, steps);
    plan.validate()?;
    Ok(plan)
}

fn print_report(report: &RunReport) {
    println!("\nRun {}: {:?}", report.run_id, report.status);
    for outcome in &report.outcomes {
        let mark = if outcome.success { "ok " } else { "ERR" };
        let recovered = if outcome.recovery_used { " (recovered)" } else { "" };
        println!(
            "  [{mark}] {}. {}{recovered}",
            outcome.step_ordinal, outcome.description
        );
        if let Some(detail) = &outcome.error_detail {
            println!("        {detail}");
        }
    }

    println!("\nSuccess path:");
    for (i, entry) in report.success_path.iter().enumerate() {
        println!("  {}. {} [{}]", i + 1, entry.description, entry.action_signatures.join(", "));
    }
    if let Some(path) = &report.metadata_path {
        println!("\nTrace saved to {}", path.display());
    }
}
