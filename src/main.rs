use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use agentic_app::cli::{Cli, Commands, SecretsCommand};
use agentic_app::config::{ConfigSource, FileConfigSource};
use agentic_app::gateway::Gateway;
use agentic_app::gateway::serve::serve_stdio;
use agentic_app::secrets::store::SetSecret;
use agentic_app::secrets::{ExecHost, SecretScope, SecretTarget};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing. Stdout carries protocol responses, so log to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let source = Arc::new(FileConfigSource::from_cli(&cli));

    match cli.command {
        Commands::Serve { .. } => {
            let config = source.load()?;
            tracing::info!(
                workspace = %config.workspace.display(),
                main_session = %config.main_session,
                max_active_runs = config.app.subagents.max_active_runs,
                "Config loaded"
            );

            let shutdown = CancellationToken::new();
            let gateway = Gateway::builder(source)
                .with_cancel_token(shutdown.clone())
                .build();

            let on_signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupt received");
                    on_signal.cancel();
                }
            });

            tracing::info!("Gateway serving on stdio");
            serve_stdio(&gateway, shutdown).await?;
        }
        Commands::Config => {
            let config = source.load()?;
            println!("workspace = {}", config.workspace.display());
            println!("main_session = {}", config.main_session);
            println!("main_agent = {}", config.main_agent);
            println!(
                "config file = {}",
                source.writable_path().display()
            );
            println!();
            let rendered =
                toml::to_string_pretty(&config.app).context("failed to render configuration")?;
            print!("{rendered}");
        }
        Commands::Secrets { action } => {
            let gateway = Gateway::builder(source).build();
            run_secrets_command(&gateway, action)?;
        }
    }

    Ok(())
}

fn run_secrets_command(gateway: &Gateway, action: SecretsCommand) -> anyhow::Result<()> {
    match action {
        SecretsCommand::List { agent } => {
            let secrets = gateway.secrets_list(agent.as_deref())?;
            if secrets.is_empty() {
                println!("No secrets configured.");
            }
            for s in secrets {
                let targets: Vec<&str> = s.targets.iter().map(|t| t.as_str()).collect();
                println!(
                    "{:<6} {:<12} {:<24} targets={} host_exec={} value={}",
                    s.scope,
                    s.agent_id.as_deref().unwrap_or("-"),
                    s.key,
                    targets.join(","),
                    s.allow_host_exec,
                    if s.has_value { "set" } else { "empty" },
                );
            }
        }
        SecretsCommand::Set {
            key,
            value,
            scope,
            agent,
            targets,
            allow_host_exec,
        } => {
            let targets = targets
                .iter()
                .map(|t| t.parse::<SecretTarget>())
                .collect::<Result<Vec<_>, _>>()?;
            gateway.secrets_set(SetSecret {
                scope: parse_scope(&scope),
                agent_id: agent,
                key: key.clone(),
                value,
                targets,
                allow_host_exec,
            })?;
            println!("Saved secret {key}.");
        }
        SecretsCommand::Delete { key, scope, agent } => {
            if gateway.secrets_delete(parse_scope(&scope), agent.as_deref(), &key)? {
                println!("Deleted secret {key}.");
            } else {
                println!("No secret named {key}.");
            }
        }
        SecretsCommand::Assign {
            key,
            target,
            scope,
            agent,
            off,
        } => {
            let target: SecretTarget = target.parse()?;
            gateway.secrets_assign(parse_scope(&scope), agent.as_deref(), &key, target, !off)?;
            let verb = if off { "Removed" } else { "Assigned" };
            println!("{verb} {target} for {key}.");
        }
        SecretsCommand::Env {
            target,
            agent,
            host,
        } => {
            let target: SecretTarget = target.parse()?;
            let host = host
                .as_deref()
                .map(str::parse::<ExecHost>)
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let env = gateway.secrets_env(agent.as_deref(), target, host)?;
            let scopes: Vec<&str> = env.scopes.iter().map(|s| s.as_str()).collect();
            println!("scopes: {}", scopes.join(","));
            // Keys only: values stay out of terminals and scrollback.
            for key in env.env.keys() {
                println!("{key}");
            }
        }
    }
    Ok(())
}

fn parse_scope(value: &str) -> SecretScope {
    value.parse().unwrap_or_default()
}
