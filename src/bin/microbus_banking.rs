//! microbus-banking: issue one account transfer
//!
//! Sends a `CreateTransferCommand` through the in-process mediator; its
//! handler publishes `TransferCreatedEvent` to RabbitMQ.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use rust_decimal::Decimal;
use tracing::{info, warn};

use microbus::bus::{AmqpGateway, BrokerGateway, EventBus, EventPublisher};
use microbus::domain::{CreateTransferCommand, TransferCommandHandler};
use microbus::mediator::Mediator;
use microbus::utils::bootstrap::{connect_with_retry, init_tracing, ConfigArgs};

const BROKER_CONNECT_ATTEMPTS: u32 = 5;

#[derive(Parser)]
#[command(name = "microbus-banking")]
#[command(about = "Transfer funds between two accounts", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Source account
    from: i32,

    /// Destination account
    to: i32,

    /// Amount to transfer
    amount: Decimal,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    let config = cli.config.load()?;

    let gateway = connect_with_retry("rabbitmq", BROKER_CONNECT_ATTEMPTS, || {
        AmqpGateway::connect(&config.broker)
    })
    .await?;
    let gateway: Arc<dyn BrokerGateway> = Arc::new(gateway);

    let mut mediator = Mediator::new();
    mediator.register::<CreateTransferCommand, _>(TransferCommandHandler::new(
        EventPublisher::new(Arc::clone(&gateway)),
    ))?;
    let bus = EventBus::from_config(gateway, mediator, &config);

    let command = CreateTransferCommand::new(cli.from, cli.to, cli.amount);
    if bus.send_command(command).await? {
        info!(from = cli.from, to = cli.to, amount = %cli.amount, "Transfer submitted");
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(from = cli.from, to = cli.to, amount = %cli.amount, "Transfer rejected");
        Ok(ExitCode::FAILURE)
    }
}
