//! EchoFlow CLI -- terminal harness for the dual-path response engine.

mod cli;
mod helpers;

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use echoflow_engine::{LlmClient, Message, Orchestrator, TurnResponse};

use cli::{Cli, Commands};
use helpers::{build_registry, init_tracing, load_engine_config, resolve_llm_config};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Chat => cmd_chat(config).await,
        Commands::Ask { text } => cmd_ask(config, &text.join(" ")).await,
        Commands::Capabilities => cmd_capabilities(config),
        Commands::Ping => cmd_ping().await,
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

/// Interactive REPL.  History is carried between turns from the
/// conversation each turn hands back.
async fn cmd_chat(config_path: Option<&Path>) -> Result<()> {
    init_tracing("info");
    let orchestrator = build_orchestrator(config_path)?;

    println!("EchoFlow v{}", env!("CARGO_PKG_VERSION"));
    if orchestrator.is_function_calling_enabled() {
        println!("Capabilities: {}", orchestrator.registry().list().join(", "));
    } else {
        println!("Capabilities: none (direct replies only)");
    }
    println!("Type 'exit' or Ctrl-D to quit, '/reset' to clear history.\n");

    let stdin = std::io::stdin();
    let mut history: Vec<Message> = Vec::new();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            println!();
            break;
        }
        let input = line.trim();
        match input {
            "" => continue,
            "exit" | "quit" => break,
            "/reset" => {
                history.clear();
                println!("(history cleared)");
                continue;
            }
            _ => {}
        }

        let mut messages = history.clone();
        messages.push(Message::user(input));

        match run_and_print(&orchestrator, messages).await {
            Ok(response) => history = response.conversation,
            Err(e) => eprintln!("error: {e:#}"),
        }
        println!();
    }

    Ok(())
}

/// Run a single turn and exit.
async fn cmd_ask(config_path: Option<&Path>, text: &str) -> Result<()> {
    init_tracing("info");
    let orchestrator = build_orchestrator(config_path)?;
    run_and_print(&orchestrator, vec![Message::user(text)]).await?;
    Ok(())
}

/// Print the function-calling schemas the engine would offer the model.
fn cmd_capabilities(config_path: Option<&Path>) -> Result<()> {
    init_tracing("warn");
    let config = load_engine_config(config_path)?;
    let registry = build_registry()?;

    let schemas = if config.function_calling {
        registry.function_schemas()
    } else {
        Vec::new()
    };
    let rendered = serde_json::to_string_pretty(&schemas).context("failed to render schemas")?;
    println!("{rendered}");
    Ok(())
}

/// Send one tiny request to the configured model and report the result.
async fn cmd_ping() -> Result<()> {
    init_tracing("warn");
    let llm = LlmClient::new(resolve_llm_config()?).context("failed to create LLM client")?;

    println!("Pinging {} ({})...", llm.provider(), llm.default_model());
    let report = llm
        .ping()
        .await
        .with_context(|| format!("{} did not answer", llm.provider()))?;

    println!("  status:   ok");
    println!("  latency:  {} ms", report.latency.as_millis());
    println!("  preview:  {}", report.preview);
    Ok(())
}

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

fn build_orchestrator(config_path: Option<&Path>) -> Result<Orchestrator> {
    let config = load_engine_config(config_path)?;
    let llm = LlmClient::new(resolve_llm_config()?).context("failed to create LLM client")?;
    let registry = build_registry()?;

    Orchestrator::new(Arc::new(llm), registry, config).context("invalid engine configuration")
}

async fn run_and_print(
    orchestrator: &Orchestrator,
    messages: Vec<Message>,
) -> Result<TurnResponse> {
    let response = orchestrator
        .run_turn(
            messages,
            |text| println!("[immediate] {text}"),
            |text| println!("[patience]  {text}"),
        )
        .await
        .context("turn failed")?;

    if let Some(text) = &response.final_text {
        println!("[final]     {text}");
    }
    tracing::debug!(
        turn_id = %response.turn_id,
        outcome = ?response.outcome,
        rounds = response.rounds,
        elapsed_ms = response.capability_wall_time.as_millis() as u64,
        "turn complete"
    );
    Ok(response)
}
