//! Warden CLI - Operator tools for tool governance

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use warden_core::client::{SimulatedConnector, StdioConnector, ToolConnector};
use warden_core::config::WardenConfig;
use warden_core::governance::{
    Actor, ActorRole, Caller, CallerTier, ExecutionRequest, ToolFilter, ToolId, ToolProposal,
    ToolStatus, ToolTier,
};
use warden_core::registry::ToolCall;
use warden_core::runtime::Warden;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Warden tool governance CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML); defaults to warden.toml and WARDEN_* variables
    #[arg(long, global = true, env = "WARDEN_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Directory holding tools.json
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use the in-process simulated connector instead of spawning tool servers
    #[arg(long, global = true)]
    simulate: bool,

    /// Identity recorded on lifecycle operations
    #[arg(long, global = true, default_value = "operator", env = "WARDEN_ACTOR")]
    actor: String,

    /// Role of the acting identity; lifecycle changes need `admin` or `sovereign`
    #[arg(long, global = true, default_value = "member", env = "WARDEN_ROLE")]
    role: ActorRole,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Propose a new tool
    Propose {
        /// Unique tool name
        #[arg(long)]
        name: String,
        /// What the tool does
        #[arg(long)]
        description: String,
        /// Server URL or command line
        #[arg(long)]
        address: String,
        /// Risk tier
        #[arg(long, default_value = "pre_approved")]
        tier: ToolTier,
        /// Advertised capability (repeatable)
        #[arg(long = "capability")]
        capabilities: Vec<String>,
        /// Governing policy article
        #[arg(long)]
        article: Option<String>,
    },
    /// Approve a proposed tool
    Approve {
        /// Tool id or name
        tool: String,
        /// Approval reference (ticket, vote id)
        #[arg(long)]
        reference: Option<String>,
    },
    /// Reject a proposed tool
    Reject {
        /// Tool id or name
        tool: String,
        #[arg(long)]
        reason: String,
    },
    /// Permanently revoke an approved tool
    Revoke {
        /// Tool id or name
        tool: String,
        #[arg(long)]
        reason: String,
    },
    /// Temporarily disable an approved tool
    Disable {
        /// Tool id or name
        tool: String,
        #[arg(long)]
        reason: String,
    },
    /// Re-enable a disabled tool
    Enable {
        /// Tool id or name
        tool: String,
    },
    /// Show one tool
    Show {
        /// Tool id or name
        tool: String,
    },
    /// List tools
    List {
        #[arg(long)]
        status: Option<ToolStatus>,
        #[arg(long)]
        tier: Option<ToolTier>,
    },
    /// Show a tool's audit trail, newest first
    Audit {
        /// Tool id or name
        tool: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Check a tool's server
    Health {
        /// Tool id or name
        tool: String,
    },
    /// Execute a governed tool
    Execute {
        /// Tool id or name
        tool: String,
        /// Parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
        #[arg(long, default_value = "operator")]
        caller_id: String,
        #[arg(long, default_value = "head")]
        caller_tier: CallerTier,
        /// Present the per-invocation approval token
        #[arg(long)]
        approval_token: bool,
        /// Capability to invoke
        #[arg(long)]
        capability: Option<String>,
        /// Dispatch through the live registry instead of calling governance directly
        #[arg(long)]
        via_registry: bool,
    },
    /// List registry entries callable by a tier
    Tools {
        #[arg(long, default_value = "head")]
        tier: CallerTier,
    },
    /// Version information
    Version,
}

fn load_config(cli: &Cli) -> Result<WardenConfig> {
    let mut config = match &cli.config {
        Some(path) => WardenConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => WardenConfig::load().context("failed to load configuration")?,
    };
    if let Some(dir) = &cli.data_dir {
        config.store.data_dir = dir.clone();
    }
    Ok(config)
}

async fn resolve(warden: &Warden, tool: &str) -> Result<ToolId> {
    if let Ok(id) = tool.parse::<ToolId>() {
        return Ok(id);
    }
    let found = warden.admin().find(tool).await?;
    Ok(found.id)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("warden {}", env!("CARGO_PKG_VERSION"));
        println!("warden-core {}", warden_core::VERSION);
        return Ok(());
    }

    let config = load_config(&cli)?;
    tracing::debug!(
        store = %config.store.tools_path().display(),
        simulate = cli.simulate,
        "Starting warden"
    );
    let connector: Arc<dyn ToolConnector> = if cli.simulate {
        Arc::new(SimulatedConnector::new())
    } else {
        Arc::new(StdioConnector::new())
    };
    let warden = Warden::open(config, connector).await?;
    let actor = Actor::new(cli.actor.clone(), cli.role);
    let admin = warden.admin();

    match cli.command {
        Commands::Propose {
            name,
            description,
            address,
            tier,
            capabilities,
            article,
        } => {
            let mut proposal =
                ToolProposal::new(name, description, address, tier).with_capabilities(capabilities);
            if let Some(article) = article {
                proposal = proposal.with_article(article);
            }
            print_json(&admin.propose(proposal, &actor).await?)?;
        }
        Commands::Approve { tool, reference } => {
            let id = resolve(&warden, &tool).await?;
            print_json(&admin.approve(id, &actor, reference).await?)?;
        }
        Commands::Reject { tool, reason } => {
            let id = resolve(&warden, &tool).await?;
            print_json(&admin.reject(id, &actor, &reason).await?)?;
        }
        Commands::Revoke { tool, reason } => {
            let id = resolve(&warden, &tool).await?;
            print_json(&admin.revoke(id, &actor, &reason).await?)?;
        }
        Commands::Disable { tool, reason } => {
            let id = resolve(&warden, &tool).await?;
            print_json(&admin.disable(id, &actor, &reason).await?)?;
        }
        Commands::Enable { tool } => {
            let id = resolve(&warden, &tool).await?;
            print_json(&admin.enable(id, &actor).await?)?;
        }
        Commands::Show { tool } => {
            let id = resolve(&warden, &tool).await?;
            print_json(&admin.get(id).await?)?;
        }
        Commands::List { status, tier } => {
            let mut filter = ToolFilter::any();
            if let Some(status) = status {
                filter = filter.with_status(status);
            }
            if let Some(tier) = tier {
                filter = filter.with_tier(tier);
            }
            print_json(&admin.list(filter, actor.role).await?)?;
        }
        Commands::Audit { tool, limit } => {
            let id = resolve(&warden, &tool).await?;
            print_json(&admin.audit(id, limit).await?)?;
        }
        Commands::Health { tool } => {
            let id = resolve(&warden, &tool).await?;
            print_json(&admin.health(id).await?)?;
        }
        Commands::Execute {
            tool,
            params,
            caller_id,
            caller_tier,
            approval_token,
            capability,
            via_registry,
        } => {
            let params: Value =
                serde_json::from_str(&params).context("--params must be valid JSON")?;
            let caller = Caller::new(caller_id, caller_tier);

            if via_registry {
                let descriptor = admin.get(resolve(&warden, &tool).await?).await?;
                let key = warden.bridge().registry_key(&descriptor.name);
                let mut call = ToolCall::new(caller, params).with_approval_token(approval_token);
                if let Some(capability) = capability {
                    call = call.with_capability(capability);
                }
                print_json(&warden.dispatch(&key, call).await)?;
            } else {
                let id = resolve(&warden, &tool).await?;
                let mut request =
                    ExecutionRequest::new(id, caller, params).with_approval_token(approval_token);
                if let Some(capability) = capability {
                    request = request.with_capability(capability);
                }
                print_json(&admin.execute(request).await?)?;
            }
        }
        Commands::Tools { tier } => {
            print_json(&warden.registry().list_for_tier(tier).await)?;
        }
        Commands::Version => {}
    }

    Ok(())
}

#[cfg(test)]
mod cli_tests {
    use super::*;

    #[test]
    fn test_role_defaults_to_member() {
        let cli = Cli::try_parse_from(["warden", "--simulate", "approve", "search"]).unwrap();
        assert_eq!(cli.role, ActorRole::Member);
        assert!(!cli.role.can_govern());
    }

    #[test]
    fn test_role_can_be_raised_explicitly() {
        let cli = Cli::try_parse_from(["warden", "--role", "admin", "revoke", "search", "--reason", "old"])
            .unwrap();
        assert_eq!(cli.role, ActorRole::Admin);
    }
}
