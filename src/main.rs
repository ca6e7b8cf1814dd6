use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tool_agent::agent::{Agent, AgentEventHandler, AgentOptions};
use tool_agent::config::Settings;
use tool_agent::diagnostics::DiagnosticLog;
use tool_agent::error::AgentError;
use tool_agent::http::DiagnosticClient;
use tool_agent::llm_client::LlmClient;
use tool_agent::session::Session;
use tool_agent::tool_registry::{ToolRegistry, ToolResult};
use tool_agent::tools::ToolContext;
use tool_agent::utils::{clip, pretty_json};

const DISPLAY_CLIP: usize = 4000;

#[derive(Parser, Debug)]
#[command(name = "tool-agent", version, about = "LLM agent with web search, proxy and sandboxed JS tools")]
struct Cli {
    /// Run a single turn with this prompt and exit
    prompt: Option<String>,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model name (overrides config)
    #[arg(short, long)]
    model: Option<String>,

    /// Maximum model calls per turn (overrides config)
    #[arg(long)]
    max_loops: Option<usize>,

    /// Do not send tool declarations (for providers without tool support)
    #[arg(long)]
    no_tools: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Prints agent events to the terminal.
struct ConsoleHandler;

impl AgentEventHandler for ConsoleHandler {
    fn on_assistant_text(&mut self, text: &str) {
        println!("\u{001b}[96mAgent:\u{001b}[0m {}", text.trim());
    }

    fn on_tool_call(&mut self, name: &str, args: &Value) {
        println!("\n\u{001b}[35m▌🔧 {}\u{001b}[0m", name);
        println!("\u{001b}[90m{}\u{001b}[0m", pretty_json(args));
    }

    fn on_tool_result(&mut self, name: &str, result: &ToolResult) {
        let pretty = clip(&pretty_json(&result.to_value()), DISPLAY_CLIP);
        match result {
            ToolResult::Success { .. } => {
                println!("\u{001b}[90mTool: {}\u{001b}[0m\n{}", name, pretty);
            }
            ToolResult::Failure { message } => {
                println!("\u{001b}[91m✗ {} failed: {}\u{001b}[0m", name, message);
                println!("\u{001b}[90mTool error: {}\u{001b}[0m\n{}", name, pretty);
            }
        }
    }
}

fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn print_turn_error(err: &AgentError) {
    if err.is_budget_exceeded() {
        println!("\u{001b}[93m⚠️  {}\u{001b}[0m", err);
        return;
    }
    eprintln!("\u{001b}[91m✗ LLM step failed: {}\u{001b}[0m", err);
    if let Some(hint) = err.hint() {
        eprintln!("\u{001b}[90m  hint: {}\u{001b}[0m", hint);
    }
}

fn print_diagnostics(log: &DiagnosticLog) {
    let entries = log.newest_first();
    if entries.is_empty() {
        println!("\u{001b}[90m(no diagnostics)\u{001b}[0m");
        return;
    }
    for entry in entries {
        let value = serde_json::to_value(&entry).unwrap_or(Value::Null);
        println!("{}", pretty_json(&value));
    }
}

fn print_help() {
    println!("Commands:");
    println!("  help          show this message");
    println!("  clear         start a new conversation");
    println!("  errors        show diagnostics, newest first");
    println!("  errors clear  drop all diagnostics");
    println!("  quit          exit");
    println!("Anything else is sent to the model. Ask it to search, run_code, or call proxy_call.");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(model) = cli.model {
        settings.model = model;
    }
    if let Some(max_loops) = cli.max_loops {
        settings.max_loops = max_loops;
    }
    if cli.no_tools {
        settings.tools_enabled = false;
    }
    let settings = settings.normalized();

    let diagnostics = DiagnosticLog::new(settings.diagnostics_capacity);
    let http = DiagnosticClient::new(diagnostics.clone())?;
    let llm = LlmClient::new(settings.client_config()?, http.clone());
    let tools = ToolRegistry::new(ToolContext {
        http,
        search: settings.search(),
        proxy_endpoint: settings.proxy_endpoint.clone(),
        sandbox: settings.sandbox(),
    });
    let agent = Agent::new(
        Box::new(llm),
        tools,
        AgentOptions {
            max_loops: settings.max_loops,
            tools_enabled: settings.tools_enabled,
        },
    );
    info!(model = %settings.model, tools = settings.tools_enabled, "agent ready");

    let mut session = Session::with_system_prompt(&settings.system_prompt, Some(&settings.model));
    let mut handler = ConsoleHandler;

    if let Some(prompt) = cli.prompt {
        if let Err(e) = agent.send(&mut session, &prompt, &mut handler).await {
            print_turn_error(&e);
            std::process::exit(1);
        }
        return Ok(());
    }

    println!(
        "\u{001b}[94mtool-agent · {} · Tools: {}\u{001b}[0m (type 'help' for commands)",
        settings.model,
        if settings.tools_enabled { "ON" } else { "OFF" }
    );

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("\u{001b}[93mYou:\u{001b}[0m ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let input = line?;

        match input.trim() {
            "" => continue,
            "quit" | "exit" => break,
            "help" => print_help(),
            "clear" => {
                session = session.restart();
                println!("\u{001b}[96mAgent:\u{001b}[0m Cleared. Ready.");
            }
            "errors" => print_diagnostics(&diagnostics),
            "errors clear" => {
                diagnostics.clear();
                println!("\u{001b}[90m(diagnostics cleared)\u{001b}[0m");
            }
            text => {
                if let Err(e) = agent.send(&mut session, text, &mut handler).await {
                    print_turn_error(&e);
                }
            }
        }
    }
    Ok(())
}
