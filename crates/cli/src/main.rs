//! Mentor CLI: the main entry point.
//!
//! Commands:
//! - `run`: Plan and execute a teacher's request
//! - `capabilities`: List capabilities or check a name
//! - `memory`: Inspect what Mentor remembers about a teacher
//! - `config`: Create, show or validate the configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "mentor",
    about = "Mentor: AI assistant that plans and builds classroom activities",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan and execute a request
    Run {
        /// What the teacher wants, in their own words
        request: String,

        /// Teacher id used for memory and saved activities
        #[arg(short, long, env = "MENTOR_USER", default_value = "local-teacher")]
        user: String,

        /// Continue an existing session instead of starting a new one
        #[arg(short, long)]
        session: Option<String>,

        /// Run the plan without reasoning calls
        #[arg(long)]
        offline: bool,

        /// Print the full turn report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List capabilities
    Capabilities {
        /// Check how a capability name would be resolved
        #[arg(long, value_name = "NAME")]
        validate: Option<String>,
    },

    /// Inspect persistent memory
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Preferences learned for a teacher
    Preferences {
        #[arg(short, long, env = "MENTOR_USER", default_value = "local-teacher")]
        user: String,
    },

    /// Recent sessions of a teacher
    Sessions {
        #[arg(short, long, env = "MENTOR_USER", default_value = "local-teacher")]
        user: String,

        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Validate the config file
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Run {
            request,
            user,
            session,
            offline,
            json,
        } => commands::run::run(&request, &user, session, offline, json).await?,
        Commands::Capabilities { validate } => commands::capabilities::run(validate.as_deref())?,
        Commands::Memory { action } => match action {
            MemoryAction::Preferences { user } => commands::memory::preferences(&user).await?,
            MemoryAction::Sessions { user, limit } => {
                commands::memory::sessions(&user, limit).await?
            }
        },
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => commands::config_cmd::init(force)?,
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Path => commands::config_cmd::path(),
            ConfigAction::Validate => commands::config_cmd::validate()?,
        },
    }

    Ok(())
}
