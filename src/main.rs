use clap::{Parser, Subcommand};
use serde::Serialize;

use pinpoint::config::{load_config, save_config, user_config_path, AppConfig};
use pinpoint::agent_engine::parse_tool_call_to_action;
use pinpoint::llm::tools::load_builtin_tools;
use pinpoint::llm::types::{FunctionCall, ToolCall};
use pinpoint::resolver::element_resolver::ResolveRequest;
use pinpoint::{init_logging, AgentAction, AgentSession, PinpointError, PinpointResult};

#[derive(Parser, Debug)]
#[command(name = "pinpoint", version, about = "Resolve UI elements and focus windows on the local desktop")]
struct Cli {
    /// Debug logging for the pinpoint crate (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the control tree of the active window.
    Tree,
    /// Resolve an element of the active window.
    Find {
        query: String,
        #[arg(long)]
        control_type: Option<String>,
        #[arg(long)]
        automation_id: Option<String>,
        #[arg(long)]
        exact: bool,
    },
    /// List candidate top-level windows.
    Windows,
    /// Bring a window to the foreground.
    Focus { title: String },
    /// Find a described target on screen.
    Locate {
        description: String,
        /// Use OCR with the pointer position as fallback instead of the vision model.
        #[arg(long)]
        coarse: bool,
    },
    /// Prepare an action: JSON such as '{"type":"click","target":"Save"}', or with
    /// `--tool <name>` the raw tool-call arguments object.
    Prepare {
        action: String,
        #[arg(long)]
        tool: Option<String>,
    },
    /// Print the built-in tool definitions for a planner.
    Tools,
    /// Write the default configuration to the user config directory.
    InitConfig {
        #[arg(long)]
        force: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> PinpointResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_config(force: bool) -> PinpointResult<()> {
    let path = user_config_path()?;
    if path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", path.display());
        return Ok(());
    }
    save_config(&AppConfig::default(), &path)?;
    println!("wrote {}", path.display());
    Ok(())
}

async fn run(cli: Cli, config: AppConfig) -> PinpointResult<()> {
    match cli.command {
        Commands::InitConfig { force } => return init_config(force),
        Commands::Tools => return print_json(&load_builtin_tools()?),
        _ => {}
    }
    let mut session = AgentSession::desktop(&config);
    match cli.command {
        Commands::Tree => {
            let observation = session.observe().await;
            println!("{}", observation.text);
        }
        Commands::Find { query, control_type, automation_id, exact } => {
            let request = ResolveRequest {
                query,
                control_type,
                automation_id,
                exact,
                ..Default::default()
            };
            print_json(&session.find_element(&request).await?)?;
        }
        Commands::Windows => {
            for window in session.list_windows().await? {
                println!("{}", window.label());
            }
        }
        Commands::Focus { title } => {
            let outcome = session.ensure_focus(&title).await;
            print_json(&outcome)?;
            if !outcome.success {
                std::process::exit(1);
            }
        }
        Commands::Locate { description, coarse } => {
            let result = if coarse {
                session.locate_coarse(&description).await?
            } else {
                session.locate(&description).await?
            };
            print_json(&result)?;
        }
        Commands::Prepare { action, tool } => {
            let action = match tool {
                Some(name) => {
                    let call = ToolCall {
                        id: "cli".into(),
                        call_type: "function".into(),
                        function: FunctionCall { name, arguments: action },
                    };
                    parse_tool_call_to_action(&call).map_err(PinpointError::Config)?
                }
                None => serde_json::from_str::<AgentAction>(&action)?,
            };
            print_json(&session.prepare(&action).await?)?;
        }
        Commands::InitConfig { .. } | Commands::Tools => {}
    }
    session.end();
    Ok(())
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(if cli.verbose { "debug" } else { "info" });

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "using default configuration");
            AppConfig::default()
        }
    };

    if let Err(e) = run(cli, config).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
