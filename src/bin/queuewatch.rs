use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use queuewatch::{
    broker::ClusterRegistry,
    config::{Config, read_config_file},
    engine::{CycleReport, DriftEngine},
    notify::notifier_for,
    sink::MetricsSinkClient,
    util::get_config_path,
};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Queue depth collector and drift alerting")]
struct Args {
    /// Config file (defaults to $QUEUEWATCH_CONFIG or config/config.json)
    #[arg(short, long)]
    file: Option<String>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Collect every queue of every monitoring-enabled cluster instead of the watch-list
    #[arg(long)]
    all: bool,

    /// Log level for queuewatch targets
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("queuewatch", level),
        ("tower_http", LevelFilter::INFO),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    let path = args.file.clone().unwrap_or_else(get_config_path);
    let config = read_config_file(&path).with_context(|| format!("failed to load {path}"))?;

    let registry = Arc::new(ClusterRegistry::new(&config.clusters)?);
    let engine = Arc::new(build_engine(&config, registry.clone())?);

    if args.once {
        let report = run(&engine, args.all).await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        if !report.success {
            anyhow::bail!("cycle finished with failed deliveries");
        }
        return Ok(());
    }

    #[cfg(feature = "api")]
    {
        if let Some(api) = &config.api {
            let state = queuewatch::api::ApiState::new(engine.clone(), registry.clone());
            queuewatch::api::spawn_api_server(api, state).await?;
        }
    }

    tokio::select! {
        _ = schedule(engine, config.monitoring.interval(), args.all) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            info!("shutting down");
        }
    }

    Ok(())
}

fn build_engine(config: &Config, registry: Arc<ClusterRegistry>) -> anyhow::Result<DriftEngine> {
    let sink = MetricsSinkClient::new(&config.sink).context("failed to set up metrics sink")?;
    let notifier = notifier_for(config.notifier.as_ref(), config.sink.timeout())
        .context("failed to set up notifier")?;

    info!(
        "monitoring {} clusters, {} watched queues",
        registry.len(),
        config.monitoring.queues.len()
    );

    Ok(DriftEngine::new(
        registry,
        Arc::new(sink),
        Arc::from(notifier),
        config.monitoring.clone(),
    ))
}

async fn run(engine: &DriftEngine, all: bool) -> CycleReport {
    if all {
        engine.collect_all().await
    } else {
        engine.run_cycle().await
    }
}

async fn schedule(engine: Arc<DriftEngine>, period: std::time::Duration, all: bool) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let report = run(&engine, all).await;
        if !report.success {
            warn!("cycle finished with failed deliveries");
        }
        for error in &report.errors {
            error!("{error}");
        }
    }
}
