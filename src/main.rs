use clap::Parser;
use log::{error, info, warn};
use matter_sensor_bridge::bridge::serve;
use matter_sensor_bridge::cli::Cli;
use matter_sensor_bridge::config::{Config, SensorConfig, load_dotenv};
use matter_sensor_bridge::error::Result;
use matter_sensor_bridge::input::{Console, MeasurementSampler, SysfsGpio, acquire_contact_source};
use matter_sensor_bridge::instance_lock::InstanceLock;
use matter_sensor_bridge::lifecycle::{ShutdownCoordinator, ShutdownReason, spawn_signal_listener};
use matter_sensor_bridge::node::{DeviceKind, DeviceNode, EndpointDescriptor};
use matter_sensor_bridge::storage::DeviceStorage;
use std::sync::Arc;

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    // Before any thread exists: this may set environment variables
    load_dotenv();
    init_logger();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            error!("Fatal error: {}", e);
            1
        }
    };

    // A blocked stdin read would keep the runtime from shutting down
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    info!("Starting Matter sensor bridge");

    let storage_dir = cli
        .node
        .storage_path
        .clone()
        .unwrap_or_else(DeviceStorage::default_dir);
    let storage = DeviceStorage::open(&storage_dir, cli.command.context())?;
    info!("Storage location: {} (Directory)", storage.dir().display());
    info!(
        "Use --storage-path to choose a different storage location, --storage-clear to start with an empty storage."
    );
    if cli.node.storage_clear {
        storage.clear()?;
    }

    let stored = storage.load();
    let now_ms = chrono::Utc::now().timestamp_millis();
    let (config, record) = Config::resolve(&cli, &stored, storage_dir, now_ms);
    if let Err(e) = storage.save(&record) {
        warn!("Failed to persist device record: {}", e);
    }
    config.log_summary();

    let _lock = InstanceLock::acquire(&config.node.id)?;
    info!(
        "Manual pairing code: {}",
        config.node.commissioning.manual_pairing_code()
    );

    let node = create_node(&config)?;
    let coordinator = ShutdownCoordinator::new();
    spawn_signal_listener(coordinator.clone())?;

    let code = match &config.sensor {
        SensorConfig::Contact(gpio) => {
            let descriptor = EndpointDescriptor::new("contact", DeviceKind::ContactSensor, false);
            let gpio = gpio.clone();
            serve(node, descriptor, coordinator, move |sink, tracker, _| {
                let backend = SysfsGpio::new(&gpio.sysfs_root);
                acquire_contact_source(&backend, &gpio, sink, tracker, Console::stdin)
            })
            .await
        }
        SensorConfig::Measurement(sampling) => {
            let kind = sampling.kind;
            let descriptor = EndpointDescriptor::new(kind.endpoint_id(), kind.device_kind(), 0);
            let sampling = sampling.clone();
            serve(node, descriptor, coordinator, move |sink, tracker, coordinator| {
                let sampler = MeasurementSampler::start(
                    sampling.kind,
                    sampling.interval,
                    sampling.command,
                    sink,
                    tracker,
                    move |e| coordinator.trigger(ShutdownReason::Fatal(e.to_string())),
                );
                Box::new(sampler)
            })
            .await
        }
    }?;

    info!("Matter sensor bridge stopped");
    Ok(code)
}

#[cfg(feature = "matter")]
fn create_node(config: &Config) -> Result<Arc<dyn DeviceNode>> {
    use matter_sensor_bridge::matter::MatterNode;
    let node = MatterNode::create(
        config.node.clone(),
        &config.storage_dir,
        config.interface.clone(),
    )?;
    Ok(Arc::new(node))
}

#[cfg(not(feature = "matter"))]
fn create_node(config: &Config) -> Result<Arc<dyn DeviceNode>> {
    use matter_sensor_bridge::node::HeadlessNode;
    Ok(Arc::new(HeadlessNode::create(config.node.clone())?))
}
