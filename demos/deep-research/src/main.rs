//! Deep research from the command line.
//!
//! The root agent records the question, fans sub-questions out to parallel
//! `research-agent` runs, drafts a report, asks the `critique-agent` for
//! feedback and revises. All artifacts live in the run's virtual file store
//! and can be exported with `--output-dir`.
//!
//! Needs `OPENAI_API_KEY` (or the `AZURE_AI_*` variables) and, unless
//! `--offline` is given, `TAVILY_API_KEY`. A `.env` file is honoured.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use research_core::MessageRole;
use research_runtime::{
    EngineSettings, OpenAiConfig, OpenAiPolicy, Orchestrator, RunConfig, RunResult, RunSnapshot,
    RunStatus, RunUpdate,
};
use research_toolkit::{
    filesystem_actions, research_instructions, research_sub_agents, timestamp_prefix,
    InternetSearchAction, SearchProvider, StaticSearch, TavilyConfig, TavilySearch,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "deep-research")]
#[command(about = "Research a question with a root agent and parallel sub-agents")]
struct Cli {
    /// Research question to investigate
    question: Option<String>,

    /// Root step budget (overrides RESEARCH_STEP_BUDGET)
    #[arg(short, long)]
    budget: Option<u32>,

    /// Use canned search results instead of Tavily
    #[arg(long)]
    offline: bool,

    /// Print every step as it happens
    #[arg(long)]
    stream: bool,

    /// Directory the run's files are written to afterwards
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let question = match cli.question {
        Some(q) => q,
        None => {
            println!("What would you like me to research?");
            let mut input = String::new();
            std::io::stdin().read_line(&mut input)?;
            input.trim().to_string()
        }
    };
    if question.is_empty() {
        anyhow::bail!("no research question provided");
    }

    let policy = OpenAiPolicy::new(OpenAiConfig::from_env()?)?;
    let search: Arc<dyn SearchProvider> = if cli.offline {
        tracing::info!("offline mode: using canned search results");
        Arc::new(StaticSearch::sample())
    } else {
        Arc::new(TavilySearch::new(TavilyConfig::from_env()?)?)
    };

    let mut settings = EngineSettings::from_env()?;
    if let Some(budget) = cli.budget {
        settings.step_budget = budget;
    }

    let prefix = timestamp_prefix();
    let config = RunConfig::new(question.clone(), research_instructions(&prefix), Arc::new(policy))
        .with_actions(filesystem_actions())
        .with_action(Arc::new(InternetSearchAction::new(search)))
        .with_sub_agents(research_sub_agents())
        .with_settings(settings);

    let orchestrator = Orchestrator::new(config)?;
    println!("Run {} researching: {question}", orchestrator.run_id());

    let result = if cli.stream {
        let mut updates = Box::pin(orchestrator.stream());
        let mut finished = None;
        while let Some(update) = updates.next().await {
            match update {
                RunUpdate::Step(snapshot) => print_snapshot(&snapshot),
                RunUpdate::Finished(result) => finished = Some(result),
            }
        }
        finished.context("run ended without a result")?
    } else {
        orchestrator.run().await
    };

    print_summary(&result);
    if let Some(dir) = &cli.output_dir {
        let written = export(&result, &prefix, dir)?;
        println!("Wrote {written} file(s) to {}", dir.display());
    }

    match result.status {
        RunStatus::Completed => Ok(()),
        status => anyhow::bail!("run ended with status {status:?}"),
    }
}

fn print_snapshot(snapshot: &RunSnapshot) {
    let message = &snapshot.message;
    let step = format!("[{}/{}]", snapshot.step, snapshot.step_budget);
    match message.role {
        MessageRole::User => println!("{step} user: {}", message.content),
        MessageRole::Assistant if message.action_requests.is_empty() => {
            println!("{step} answer ({} chars)", message.content.len())
        }
        MessageRole::Assistant => {
            for request in &message.action_requests {
                println!("{step} -> {} {}", request.name, request.args);
            }
        }
        MessageRole::ActionResult => {
            let name = message.result.as_ref().map_or("?", |r| r.action.as_str());
            let mark = if message.result.as_ref().is_some_and(|r| r.outcome.is_success()) {
                "ok"
            } else {
                "error"
            };
            println!("{step} <- {name} {mark} ({} chars)", message.content.len());
        }
    }
}

fn print_summary(result: &RunResult) {
    println!();
    println!(
        "Status: {:?} after {}/{} steps",
        result.status, result.steps, result.step_budget
    );
    if let Some(error) = &result.error {
        println!("Error: {error}");
    }
    println!("Files:");
    for (key, content) in &result.files {
        println!("  {key} ({} bytes)", content.len());
    }
    if let Some(text) = &result.final_text {
        println!();
        println!("{text}");
    }
}

/// Writes every file of the run into `dir`, keeping each key's relative
/// path. When the agent never wrote a report, its final answer is saved as
/// one.
fn export(result: &RunResult, prefix: &str, dir: &Path) -> anyhow::Result<usize> {
    let report = format!("{prefix}report.md");
    let fallback = match (&result.final_text, result.files.contains_key(&report)) {
        (Some(text), false) => Some((report.as_str(), text.as_str())),
        _ => None,
    };
    let entries: Vec<(&str, &str)> = result
        .files
        .iter()
        .map(|(key, content)| (key.as_str(), content.as_str()))
        .chain(fallback)
        .collect();
    let planned = export_paths(entries.iter().map(|(key, _)| *key))?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating output directory {}", dir.display()))?;
    for ((key, content), relative) in entries.iter().zip(&planned) {
        let target = dir.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(&target, content).with_context(|| format!("writing {key}"))?;
    }
    if fallback.is_some() {
        tracing::warn!(file = %report, "no report written by the agent, saved its final answer");
    }
    Ok(planned.len())
}

/// Maps file keys to relative output paths. Keys that would leave the output
/// directory, or that land on the same path as another key, are rejected.
fn export_paths<'a>(keys: impl Iterator<Item = &'a str>) -> anyhow::Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut paths = Vec::new();
    for key in keys {
        let mut relative = PathBuf::new();
        for component in Path::new(key).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                _ => anyhow::bail!("file key '{key}' cannot be exported outside the output directory"),
            }
        }
        if relative.as_os_str().is_empty() {
            anyhow::bail!("file key '{key}' has no file name");
        }
        if !seen.insert(relative.clone()) {
            anyhow::bail!("file key '{key}' collides with another file at {}", relative.display());
        }
        paths.push(relative);
    }
    Ok(paths)
}
