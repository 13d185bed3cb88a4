use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wharfctl::cli::{self, Cli};
use wharfctl::config::{self, Config};
use wharfctl::driver::detect_driver;
use wharfctl::health::HealthProber;
use wharfctl::proxy::ProxyController;
use wharfctl::{db, utils, workspace};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let workspace_root = match workspace::discover(cli.workspace.as_deref()) {
        Ok(root) => root,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };
    workspace::ensure_layout(&workspace_root)?;

    let config = Config::load(&workspace_root.join("wharfctl.toml"))?;

    let log_level = cli.log_level.as_ref().unwrap_or(&config.logging.level).clone();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), workspace = %workspace_root.display(), "starting wharfctl");

    let apps_dir = workspace_root.join("apps");
    utils::ensure_dir(&apps_dir)?;
    let apps = config::load_workspace(&apps_dir).context("failed to load app configs")?;

    let ctx = match run_setup(workspace_root, apps_dir, config, apps).await {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = cli::run(cli.command, ctx).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run_setup(
    workspace_root: std::path::PathBuf,
    apps_dir: std::path::PathBuf,
    config: Config,
    apps: Vec<wharfctl::config::App>,
) -> Result<cli::Context> {
    let store_pool = db::init(&config::db_path(&workspace_root, &config)).await?;
    let store = db::Store::new(store_pool);

    let driver = detect_driver(&config.docker.socket).await;
    let prober = Arc::new(HealthProber::new());
    let proxy = Arc::new(ProxyController::new(workspace_root.clone(), config.proxy.admin_url.clone()));

    if !proxy.has_template() {
        proxy.create_default_template()?;
    }

    Ok(cli::Context {
        workspace_root,
        apps_dir,
        config,
        store,
        driver,
        prober,
        proxy,
        apps,
    })
}
