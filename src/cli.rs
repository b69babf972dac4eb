use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "agentic-app", version, about = "Agent run orchestration gateway")]
pub struct Cli {
    /// Workspace directory path
    #[arg(short, long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Path to config file (overrides <workspace>/agentic-app.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve gateway requests as JSON lines over stdin/stdout
    Serve {
        /// Cap on active subagent runs per app run
        #[arg(long)]
        max_active_runs: Option<usize>,

        /// Primary session key used when requests omit one
        #[arg(long)]
        main_session: Option<String>,
    },
    /// Print the resolved app configuration (secret values omitted)
    Config,
    /// Manage scoped secrets in the config file
    Secrets {
        #[command(subcommand)]
        action: SecretsCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum SecretsCommand {
    /// List secrets without their values
    List {
        /// Include this agent's secrets
        #[arg(long)]
        agent: Option<String>,
    },
    /// Create or replace a secret
    Set {
        key: String,
        value: String,
        /// app | agent
        #[arg(long, default_value = "app")]
        scope: String,
        #[arg(long)]
        agent: Option<String>,
        /// sandbox | skills | exec (repeatable)
        #[arg(long = "target")]
        targets: Vec<String>,
        /// Allow injection into host-level exec
        #[arg(long)]
        allow_host_exec: bool,
    },
    /// Delete a secret
    Delete {
        key: String,
        #[arg(long, default_value = "app")]
        scope: String,
        #[arg(long)]
        agent: Option<String>,
    },
    /// Enable or disable one target on a secret
    Assign {
        key: String,
        target: String,
        #[arg(long, default_value = "app")]
        scope: String,
        #[arg(long)]
        agent: Option<String>,
        /// Disable the assignment instead of enabling it
        #[arg(long)]
        off: bool,
    },
    /// Show which secret keys a target would receive
    Env {
        /// sandbox | skills | exec
        target: String,
        #[arg(long)]
        agent: Option<String>,
        /// sandbox | gateway | node
        #[arg(long)]
        host: Option<String>,
    },
}
