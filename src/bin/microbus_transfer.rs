//! microbus-transfer: transfer log service
//!
//! Consumes `TransferCreatedEvent` from RabbitMQ and records a transfer log
//! for each one.
//!
//! ## Configuration
//! - `microbus.yaml`, `--config <path>` or MICROBUS_CONFIG for file settings
//! - MICROBUS__BROKER__HOST etc. for overrides
//! - MICROBUS_LOG for the log filter

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use microbus::bus::{AmqpGateway, BrokerGateway, EventBus};
use microbus::domain::{
    InMemoryTransferRepository, TransferCreatedEvent, TransferEventHandler, TransferRepository,
};
use microbus::mediator::Mediator;
use microbus::utils::bootstrap::{connect_with_retry, init_tracing, ConfigArgs};

const BROKER_CONNECT_ATTEMPTS: u32 = 30;

#[derive(Parser)]
#[command(name = "microbus-transfer")]
#[command(about = "Record every transfer announced on the bus", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    let config = cli.config.load()?;

    info!("Starting microbus-transfer");

    let gateway = connect_with_retry("rabbitmq", BROKER_CONNECT_ATTEMPTS, || {
        AmqpGateway::connect(&config.broker)
    })
    .await?;
    let gateway: Arc<dyn BrokerGateway> = Arc::new(gateway);

    let bus = EventBus::from_config(gateway, Mediator::new(), &config);

    let repository: Arc<dyn TransferRepository> = Arc::new(InMemoryTransferRepository::new());
    let handler_repository = Arc::clone(&repository);
    bus.subscribe::<TransferCreatedEvent, _>(move || {
        TransferEventHandler::new(Arc::clone(&handler_repository))
    })
    .await?;

    info!("Waiting for transfers, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    let recorded = repository.transfer_logs().await?.len();
    info!(recorded, "Shutting down");
    Ok(())
}
