//! BPMN-Flow Command Line Interface
//!
//! Drives one process instance from the shell. The instance's execution tree
//! lives in a JSON state file between calls.
//!
//! # Usage
//!
//! ```bash
//! # Check a definitions file
//! bpmn-flow -d order.yaml validate
//!
//! # Start an instance and persist its tree
//! bpmn-flow -d order.yaml -s order.json start --vars '{"amount": 250}'
//!
//! # Complete a waiting task, deliver a message, fire due timers
//! bpmn-flow -d order.yaml -s order.json signal 3f2c... --result '{"approved": true}'
//! bpmn-flow -d order.yaml -s order.json message PaymentReceived
//! bpmn-flow -d order.yaml -s order.json timers
//!
//! # Show the tree
//! bpmn-flow -d order.yaml -s order.json show
//! ```

use anyhow::{anyhow, bail, Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use bpmn_flow::{Context, Definitions, EngineConfig, ExecutionKey, Variables};

#[derive(Parser)]
#[command(name = "bpmn-flow")]
#[command(version)]
#[command(about = "Run BPMN process instances from the command line")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Process definitions (YAML or JSON)
    #[arg(long, short, global = true, env = "BPMN_FLOW_DEFINITIONS")]
    definitions: Option<PathBuf>,

    /// Execution state file
    #[arg(long, short, global = true, default_value = "bpmn-flow-state.json")]
    state: PathBuf,

    /// Engine configuration (YAML)
    #[arg(long, short, global = true, env = "BPMN_FLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Output format after each command
    #[arg(long, short = 'o', global = true, default_value = "tree", value_enum)]
    format: OutputFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Indented execution tree
    Tree,
    /// Serialized execution state
    Json,
    /// Nothing
    Quiet,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the definitions file
    Validate,

    /// Start a new instance, replacing any existing state file
    Start {
        /// Process to start (defaults to the first one)
        #[arg(long)]
        process: Option<String>,

        /// Enter through this start event only
        #[arg(long, conflicts_with = "message")]
        start_event: Option<String>,

        /// Start through the message start event listening for this message
        #[arg(long)]
        message: Option<String>,

        /// Initial variables as a JSON object
        #[arg(long)]
        vars: Option<String>,
    },

    /// Signal a waiting execution
    Signal {
        /// Execution id
        execution: String,

        /// Result as JSON
        #[arg(long)]
        result: Option<String>,
    },

    /// Deliver a message to a scope
    Message {
        name: String,

        /// Scope execution id (defaults to the root)
        #[arg(long)]
        scope: Option<String>,

        /// Message payload as a JSON object
        #[arg(long)]
        vars: Option<String>,
    },

    /// Throw an error into a scope
    Error {
        name: String,

        /// Scope execution id (defaults to the root)
        #[arg(long)]
        scope: Option<String>,

        /// Error payload as a JSON object
        #[arg(long)]
        vars: Option<String>,
    },

    /// Fire timers that are due
    Timers {
        /// Scope execution id (defaults to the root)
        #[arg(long)]
        scope: Option<String>,
    },

    /// Run waiting service, script and business-rule tasks
    RunTasks {
        /// Scope execution id (defaults to the root)
        #[arg(long)]
        scope: Option<String>,
    },

    /// Print the current tree
    Show,
}

// =============================================================================
// MAIN
// =============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config);

    match run(&cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load_from_file(path)?,
        None => EngineConfig::default(),
    };
    Ok(config.with_env_overrides())
}

fn init_logging(config: &EngineConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.as_str().into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli, config: EngineConfig) -> Result<()> {
    let definitions_path = cli
        .definitions
        .as_deref()
        .ok_or_else(|| anyhow!("no definitions file given (use --definitions)"))?;
    let definitions = Definitions::load_from_file(definitions_path)?;
    let mut context = Context::new(definitions).with_config(config);

    let root = match &cli.command {
        Commands::Validate => {
            println!(
                "OK {} process(es) in {}",
                context.definitions().processes().len(),
                definitions_path.display()
            );
            return Ok(());
        }
        Commands::Start {
            process,
            start_event,
            message,
            vars,
        } => cmd_start(
            &mut context,
            process.as_deref(),
            start_event.as_deref(),
            message.as_deref(),
            vars.as_deref(),
        )?,
        Commands::Signal { execution, result } => {
            let root = restore(&mut context, &cli.state)?;
            let key = find(&context, execution)?;
            let result = result.as_deref().map(parse_json).transpose()?;
            context.signal(key, result)?;
            root
        }
        Commands::Message { name, scope, vars } => {
            let root = restore(&mut context, &cli.state)?;
            let scope = scope_or_root(&context, scope.as_deref(), root)?;
            if !context.throw_message(scope, name, parse_vars(vars.as_deref())?)? {
                eprintln!("nothing was waiting for message {name}");
            }
            root
        }
        Commands::Error { name, scope, vars } => {
            let root = restore(&mut context, &cli.state)?;
            let scope = scope_or_root(&context, scope.as_deref(), root)?;
            if !context.throw_error(scope, name, parse_vars(vars.as_deref())?)? {
                eprintln!("nothing was waiting for error {name}");
            }
            root
        }
        Commands::Timers { scope } => {
            let root = restore(&mut context, &cli.state)?;
            let scope = scope_or_root(&context, scope.as_deref(), root)?;
            let fired = context.check_expired_timers(scope)?;
            eprintln!("{fired} timer(s) fired");
            root
        }
        Commands::RunTasks { scope } => {
            let root = restore(&mut context, &cli.state)?;
            let scope = scope_or_root(&context, scope.as_deref(), root)?;
            let ran = context.run_automated_tasks(scope)?;
            eprintln!("{ran} task(s) run");
            root
        }
        Commands::Show => restore(&mut context, &cli.state)?,
    };

    if !matches!(cli.command, Commands::Show) {
        save(&context, root, &cli.state)?;
    }
    match cli.format {
        OutputFormat::Tree => print!("{}", context.tree(root)?),
        OutputFormat::Json => println!("{}", context.serialize_json(root)?),
        OutputFormat::Quiet => {}
    }
    Ok(())
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

fn cmd_start(
    context: &mut Context,
    process: Option<&str>,
    start_event: Option<&str>,
    message: Option<&str>,
    vars: Option<&str>,
) -> Result<ExecutionKey> {
    let variables = parse_vars(vars)?;
    if let Some(message) = message {
        let started = context.start_with_message(message, variables)?;
        return match started.as_slice() {
            [] => bail!("no process starts on message {message}"),
            [root] => Ok(*root),
            [first, ..] => {
                eprintln!(
                    "{} processes start on message {message}; keeping the first",
                    started.len()
                );
                Ok(*first)
            }
        };
    }
    let root = match process {
        Some(process) => context.start_process(process, variables, start_event)?,
        None if start_event.is_some() => bail!("--start-event needs --process"),
        None => context.start(variables)?,
    };
    Ok(root)
}

// =============================================================================
// HELPERS
// =============================================================================

fn restore(context: &mut Context, path: &Path) -> Result<ExecutionKey> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Reading state from {} (run `start` first)", path.display()))?;
    Ok(context.restore_json(&source)?)
}

fn save(context: &Context, root: ExecutionKey, path: &Path) -> Result<()> {
    let json = context.serialize_json(root)?;
    std::fs::write(path, json).with_context(|| format!("Writing state to {}", path.display()))
}

fn find(context: &Context, id: &str) -> Result<ExecutionKey> {
    context
        .execution_by_id(id)
        .ok_or_else(|| anyhow!("no execution with id {id}"))
}

fn scope_or_root(context: &Context, id: Option<&str>, root: ExecutionKey) -> Result<ExecutionKey> {
    id.map_or(Ok(root), |id| find(context, id))
}

fn parse_json(source: &str) -> Result<Value> {
    serde_json::from_str(source).with_context(|| format!("Parsing JSON: {source}"))
}

fn parse_vars(source: Option<&str>) -> Result<Variables> {
    let Some(source) = source else {
        return Ok(Variables::new());
    };
    Variables::from_value(parse_json(source)?)
        .ok_or_else(|| anyhow!("variables must be a JSON object"))
}
