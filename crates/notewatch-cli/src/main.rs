use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use notewatch_http::redact_url;
use notewatch_sync::{build_monitor, run_once, CycleStatus, MonitorConfig, Phase, ProviderSource};
use notewatch_web::AppState;
use tracing::{info, warn};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "notewatch")]
#[command(about = "Watch Genshin daily notes and post reports and resin alerts to Slack")]
struct Cli {
    /// YAML settings file; environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Poll on the configured schedule until interrupted.
    Run {
        /// Print messages to stdout instead of posting them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Run one reporting cycle and exit.
    Once {
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate settings and print the resolved configuration.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = MonitorConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Run { dry_run: false }) {
        Commands::Run { dry_run } => run(config, dry_run).await,
        Commands::Once { dry_run } => {
            let outcome = run_once(config, dry_run).await?;
            match outcome.status {
                CycleStatus::Evaluated {
                    alerts,
                    deliveries_failed,
                    ..
                } => {
                    info!(alerts = alerts.len(), deliveries_failed, "cycle complete");
                    if deliveries_failed > 0 {
                        bail!("{deliveries_failed} message(s) could not be delivered");
                    }
                    Ok(())
                }
                CycleStatus::Failed { error } => bail!("cycle failed: {error}"),
                CycleStatus::Aborted => bail!("cycle aborted"),
            }
        }
        Commands::CheckConfig => {
            print_config(&config);
            Ok(())
        }
    }
}

async fn run(config: MonitorConfig, dry_run: bool) -> Result<()> {
    let admin_addr = config.admin_addr;
    let (monitor, handle) = build_monitor(config, dry_run)?;
    let mut monitor_task = tokio::spawn(monitor.run());

    let admin_task = admin_addr.map(|addr| {
        let mut status = handle.subscribe();
        let shutdown = async move {
            let _ = status.wait_for(|view| view.phase == Phase::Stopped).await;
        };
        tokio::spawn(notewatch_web::serve(addr, AppState::new(handle.clone()), shutdown))
    });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("interrupt received; stopping");
            handle.stop();
            monitor_task.await?;
        }
        joined = &mut monitor_task => {
            if let Some(task) = &admin_task {
                task.abort();
            }
            joined.context("watcher loop crashed")?;
            bail!("watcher loop exited without being stopped");
        }
    }

    if let Some(task) = admin_task {
        if let Err(err) = task.await? {
            warn!(error = %err, "admin server exited with an error");
        }
    }
    Ok(())
}

fn print_config(config: &MonitorConfig) {
    println!("account: uid={} region={}", config.account.uid, config.account.region);
    println!("provider offset: UTC{}", config.provider_offset);
    match &config.source {
        ProviderSource::Hoyolab { endpoint, credentials } => println!(
            "provider: hoyolab endpoint={} ltuid={}",
            endpoint.as_deref().unwrap_or("default"),
            credentials.ltuid_v2
        ),
        ProviderSource::Fixture(path) => println!("provider: fixture {}", path.display()),
    }
    match &config.slack_webhook_url {
        Some(url) => println!("notifier: slack {}", redact_url(url)),
        None => println!("notifier: none configured (dry runs only)"),
    }
    println!(
        "schedule: every {}m, report every {} cycle(s), report on start: {}",
        config.poll_interval.as_secs() / 60,
        config.report_every,
        config.report_on_start
    );
    let levels: Vec<String> = config
        .thresholds
        .levels()
        .iter()
        .map(ToString::to_string)
        .collect();
    println!("resin alerts: [{}] re-arm {:?}", levels.join(", "), config.rearm);
    println!(
        "timeouts: fetch {}s, delivery {}s; failure notice after {} cycle(s)",
        config.fetch_timeout.as_secs(),
        config.delivery_timeout.as_secs(),
        config.failure_notice_after
    );
    if let Some(addr) = config.admin_addr {
        println!("admin: http://{addr}");
    }
}
