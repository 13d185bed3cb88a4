//! Direct-operate CLI: every subcommand talks straight to the engine,
//! store, and driver in-process rather than to a running server (spec
//! §6). Exit codes: `0` on success, non-zero with a one-line cause (and,
//! where applicable, a next-step hint) on failure.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};

use crate::color::Color;
use crate::config::app::App;
use crate::config::Config;
use crate::db::Store;
use crate::driver::ContainerDriver;
use crate::engine::{DeploymentEngine, LiveActionProvider};
use crate::health::HealthProber;
use crate::proxy::ProxyController;

#[derive(Parser, Debug)]
#[command(name = "wharfctl")]
#[command(author, version, about = "Blue/green deployment engine for single-host Docker apps", long_about = None)]
pub struct Cli {
    /// Explicit workspace root override
    #[arg(short, long)]
    pub workspace: Option<PathBuf>,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show current state for one app, or all apps if none given
    Status { app: Option<String> },

    /// Deploy a new image to an app
    Deploy { app: String, image: String },

    /// Switch live traffic to a specific color
    Switch { app: String, color: String },

    /// Page deployment history for an app
    History {
        app: String,
        #[arg(long)]
        limit: Option<u32>,
    },

    /// List events for a deployment
    Events { deployment_id: String },

    /// Check health of an app's active container
    Health { app: String },

    /// Show recent logs for an app
    Logs {
        app: String,
        #[arg(long)]
        color: Option<String>,
        #[arg(long, default_value_t = 200)]
        lines: usize,
    },

    /// Operate the proxy controller
    #[command(subcommand)]
    Proxy(ProxyCommands),

    /// Render the equivalent container-run description
    DbgCmd {
        app: String,
        #[arg(long)]
        color: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProxyCommands {
    /// Check the proxy responds on its admin endpoint
    Status,
    /// Regenerate config from current state and reload
    Reload,
    /// Config subcommands
    #[command(subcommand)]
    Config(ProxyConfigCommands),
}

#[derive(Subcommand, Debug)]
pub enum ProxyConfigCommands {
    /// Write a default template if none exists
    Create,
    /// Print the last-generated config
    Show,
}

/// Everything a command needs, assembled once in `main`.
pub struct Context {
    pub workspace_root: PathBuf,
    pub apps_dir: PathBuf,
    pub config: Config,
    pub store: Store,
    pub driver: Arc<dyn ContainerDriver>,
    pub prober: Arc<HealthProber>,
    pub proxy: Arc<ProxyController>,
    pub apps: Vec<App>,
}

impl Context {
    fn find_app(&self, name: &str) -> Result<&App> {
        self.apps
            .iter()
            .find(|a| a.name == name)
            .with_context(|| format!("unknown app '{}' — no matching apps/*.yaml in workspace", name))
    }

    fn engine_for(&self, app: &App) -> DeploymentEngine {
        let action = Arc::new(LiveActionProvider {
            app: app.clone(),
            all_apps: Arc::new(self.apps.clone()),
            driver: self.driver.clone(),
            prober: self.prober.clone(),
            proxy: self.proxy.clone(),
            store: self.store.clone(),
        });
        DeploymentEngine::new(app.name.clone(), action, self.store.clone())
    }

    /// The raw YAML text for an app's config file, used as the
    /// `InsertAppConfig` payload (spec §3).
    fn read_app_payload(&self, app_name: &str) -> Result<String> {
        for ext in ["yaml", "yml"] {
            let path = self.apps_dir.join(format!("{}.{}", app_name, ext));
            if path.is_file() {
                return std::fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()));
            }
        }
        anyhow::bail!("could not find config file for '{}' under {}", app_name, self.apps_dir.display())
    }
}

pub async fn run(command: Commands, ctx: Context) -> Result<()> {
    match command {
        Commands::Status { app } => status(&ctx, app.as_deref()).await,
        Commands::Deploy { app, image } => deploy(&ctx, &app, &image).await,
        Commands::Switch { app, color } => switch(&ctx, &app, &color).await,
        Commands::History { app, limit } => history(&ctx, &app, limit).await,
        Commands::Events { deployment_id } => events(&ctx, &deployment_id).await,
        Commands::Health { app } => health(&ctx, &app).await,
        Commands::Logs { app, color, lines } => logs(&ctx, &app, color.as_deref(), lines).await,
        Commands::Proxy(cmd) => proxy(&ctx, cmd).await,
        Commands::DbgCmd { app, color } => dbg_cmd(&ctx, &app, color.as_deref()).await,
    }
}

async fn status(ctx: &Context, app: Option<&str>) -> Result<()> {
    match app {
        Some(name) => {
            ctx.find_app(name)?;
            let state = ctx.store.get_current_state(name).await?;
            println!(
                "{}: active={} image={} status={} updated_at={}",
                state.app_name, state.active_color, state.image, state.status, state.updated_at
            );
        }
        None => {
            let states = ctx.store.get_all_current_states().await?;
            if states.is_empty() {
                println!("no apps have recorded state yet");
            }
            for state in states {
                println!(
                    "{}: active={} image={} status={} updated_at={}",
                    state.app_name, state.active_color, state.image, state.status, state.updated_at
                );
            }
        }
    }
    Ok(())
}

async fn deploy(ctx: &Context, app_name: &str, image: &str) -> Result<()> {
    let app = ctx.find_app(app_name)?;

    let payload = ctx.read_app_payload(app_name)?;
    let fingerprint = crate::config::app::fingerprint(&payload);
    let config_id = ctx.store.insert_app_config(app_name, &payload, &fingerprint).await?;

    let engine = ctx.engine_for(app);
    let outcome = engine.deploy(image, &config_id).await?;

    println!("deployment {} finished in state '{}'", outcome.deployment_id, outcome.final_state);
    if outcome.final_state.as_str() != "stable" {
        anyhow::bail!("deployment did not reach stable — inspect `events {}`", outcome.deployment_id);
    }
    Ok(())
}

async fn switch(ctx: &Context, app_name: &str, color: &str) -> Result<()> {
    let app = ctx.find_app(app_name)?;
    let color: Color = color.parse().map_err(|_| anyhow::anyhow!("color must be 'blue' or 'green'"))?;

    let engine = ctx.engine_for(app);
    engine.switch(color, ctx.driver.as_ref(), app.deployment.auto_rollback).await?;

    println!("{} now routing to {}", app_name, color);
    Ok(())
}

async fn history(ctx: &Context, app_name: &str, limit: Option<u32>) -> Result<()> {
    ctx.find_app(app_name)?;
    let rows = ctx.store.get_deployment_history(app_name).await?;
    let rows = rows.into_iter().take(limit.unwrap_or(20) as usize);
    for row in rows {
        println!(
            "{} image={} status={} active={} started_at={} ended_at={:?}",
            row.id, row.image, row.status, row.active_color, row.started_at, row.ended_at
        );
    }
    Ok(())
}

async fn events(ctx: &Context, deployment_id: &str) -> Result<()> {
    let rows = ctx.store.get_deployment_events(deployment_id).await?;
    if rows.is_empty() {
        anyhow::bail!("no events found for deployment '{}'", deployment_id);
    }
    for row in rows {
        match &row.error {
            Some(err) => println!("{} {} error={}", row.created_at, row.event_type, err),
            None => println!("{} {}", row.created_at, row.event_type),
        }
    }
    Ok(())
}

async fn health(ctx: &Context, app_name: &str) -> Result<()> {
    let app = ctx.find_app(app_name)?;
    let state = ctx.store.get_current_state(app_name).await?;
    let color: Color = state
        .active_color
        .parse()
        .map_err(|_| anyhow::anyhow!("current state has invalid active color '{}'", state.active_color))?;
    let host_port = match color {
        Color::Blue => app.ports.blue,
        Color::Green => app.ports.green,
    };

    let status = ctx
        .prober
        .check(ctx.driver.as_ref(), app_name, color, host_port, &app.health_check)
        .await?;

    println!("{} ({}): {:?}", app_name, color, status);
    Ok(())
}

async fn logs(ctx: &Context, app_name: &str, color: Option<&str>, lines: usize) -> Result<()> {
    ctx.find_app(app_name)?;
    let color: Color = match color {
        Some(c) => c.parse().map_err(|_| anyhow::anyhow!("color must be 'blue' or 'green'"))?,
        None => {
            let state = ctx.store.get_current_state(app_name).await?;
            state.active_color.parse().unwrap_or(Color::Blue)
        }
    };

    let entries = ctx.driver.tail_logs(app_name, color, lines).await?;
    for line in entries {
        println!("{}", line);
    }
    Ok(())
}

async fn proxy(ctx: &Context, cmd: ProxyCommands) -> Result<()> {
    match cmd {
        ProxyCommands::Status => {
            ctx.proxy.validate_proxy_running().await?;
            println!("proxy is responding");
        }
        ProxyCommands::Reload => {
            let states = ctx.store.get_all_current_states().await?;
            let rendered = ctx.proxy.generate_config(&ctx.apps, &states)?;
            ctx.proxy.reload_proxy(&rendered).await?;
            println!("proxy config regenerated and reloaded");
        }
        ProxyCommands::Config(ProxyConfigCommands::Create) => {
            if ctx.proxy.has_template() {
                println!("template already exists");
            } else {
                ctx.proxy.create_default_template()?;
                println!("wrote default proxy template");
            }
        }
        ProxyCommands::Config(ProxyConfigCommands::Show) => {
            println!("{}", ctx.proxy.last_config().body);
        }
    }
    Ok(())
}

async fn dbg_cmd(ctx: &Context, app_name: &str, color: Option<&str>) -> Result<()> {
    let app = ctx.find_app(app_name)?;
    let color: Color = match color {
        Some(c) => c.parse().map_err(|_| anyhow::anyhow!("color must be 'blue' or 'green'"))?,
        None => {
            let state = ctx.store.get_current_state(app_name).await?;
            state.active_color.parse().unwrap_or(Color::Blue)
        }
    };

    let host_port = match color {
        Color::Blue => app.ports.blue,
        Color::Green => app.ports.green,
    };
    let spec = crate::driver::ContainerSpec {
        image: "<image>".to_string(),
        expose_port: app.docker.expose_port,
        host_port,
        environment: crate::config::merge_environment(app, color),
        volumes: app.docker.volumes.clone(),
        memory_limit: app.docker.memory_limit.clone(),
        cpu_limit: app.docker.cpu_limit.clone(),
        restart_policy: app.docker.restart_policy.clone(),
        network: app.docker.network.clone(),
    };

    println!("{}", ctx.driver.generate_run_description(app_name, color, &spec));
    Ok(())
}
