use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use vigilia::{
    clock::SystemClock,
    collector::{CollectionScheduler, SchedulerHandle},
    config::{Config, read_config_file},
    probe::Probe,
    probes::HealthProbe,
    registry::{MemoryRegistry, Service},
};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("vigilia", LevelFilter::TRACE),
        ("hub", LevelFilter::TRACE),
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
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let registry = Arc::new(MemoryRegistry::new());
    register_services(&registry, &config).await;

    let probes = build_probes(&config)?;
    if probes.is_empty() {
        error!("no probes enabled, nothing to collect");
    }

    let scheduler = CollectionScheduler::new(
        registry,
        probes,
        config.collection.clone(),
        Arc::new(SystemClock),
    );
    let handle = SchedulerHandle::spawn(scheduler);

    info!("collection hub running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    handle.shutdown().await?;

    Ok(())
}

async fn register_services(registry: &MemoryRegistry, config: &Config) {
    if let Some(services) = &config.services {
        for service in services {
            debug!(id = service.id, name = service.name, "registering service");
            registry.register(Service::from(service)).await;
        }
    }
}

fn build_probes(config: &Config) -> anyhow::Result<Vec<Arc<dyn Probe>>> {
    let mut probes: Vec<Arc<dyn Probe>> = vec![];

    let health = config.collection.probe("health");
    if health.enabled {
        probes.push(Arc::new(HealthProbe::new(health)?));
    }

    Ok(probes)
}
