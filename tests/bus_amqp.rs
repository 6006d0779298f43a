//! AMQP/RabbitMQ event bus integration tests using testcontainers.
//!
//! Run with: cargo test --test bus_amqp -- --ignored --nocapture
//!
//! These tests spin up RabbitMQ in a container using testcontainers-rs.
//! No manual RabbitMQ setup required, but Docker must be running.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    GenericImage, ImageExt,
};

use microbus::bus::{AmqpGateway, BrokerGateway, BusError, EventBus};
use microbus::config::{BrokerSettings, Config};
use microbus::domain::{
    InMemoryTransferRepository, TransferCreatedEvent, TransferEventHandler, TransferLog,
    TransferRepository,
};
use microbus::mediator::Mediator;

/// Start RabbitMQ container.
///
/// Returns (container, settings) pointing at the mapped AMQP port.
async fn start_rabbitmq() -> (testcontainers::ContainerAsync<GenericImage>, BrokerSettings) {
    let image = GenericImage::new("rabbitmq", "3-management")
        .with_exposed_port(5672.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Server startup complete"));

    let container = image
        .with_startup_timeout(Duration::from_secs(60))
        .start()
        .await
        .expect("Failed to start rabbitmq container");

    // Brief delay to ensure RabbitMQ is fully ready
    tokio::time::sleep(Duration::from_secs(2)).await;

    let port = container
        .get_host_port_ipv4(5672)
        .await
        .expect("Failed to get mapped port");
    let host = container
        .get_host()
        .await
        .expect("Failed to get container host");

    let settings = BrokerSettings {
        host: host.to_string(),
        port,
        ..Default::default()
    };
    println!("RabbitMQ available at: {}:{}", settings.host, settings.port);

    (container, settings)
}

async fn wait_for_logs(repository: &InMemoryTransferRepository, n: usize) -> Vec<TransferLog> {
    for _ in 0..100 {
        let logs = repository.transfer_logs().await.unwrap();
        if logs.len() >= n {
            return logs;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    repository.transfer_logs().await.unwrap()
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_transfer_event_round_trip() {
    let (_container, settings) = start_rabbitmq().await;

    let gateway: Arc<dyn BrokerGateway> = Arc::new(
        AmqpGateway::connect(&settings)
            .await
            .expect("Failed to connect"),
    );
    let bus = EventBus::new(gateway, Mediator::new());

    let repository = Arc::new(InMemoryTransferRepository::new());
    let handler_repository = Arc::clone(&repository) as Arc<dyn TransferRepository>;
    bus.subscribe::<TransferCreatedEvent, _>(move || {
        TransferEventHandler::new(Arc::clone(&handler_repository))
    })
    .await
    .expect("Failed to subscribe");

    bus.publish(&TransferCreatedEvent::new(1, 2, dec!(150.00)))
        .await
        .expect("Failed to publish");

    let logs = wait_for_logs(&repository, 1).await;
    assert_eq!(logs.len(), 1);
    assert_eq!((logs[0].from_account, logs[0].to_account), (1, 2));
    assert_eq!(logs[0].transfer_amount, dec!(150.00));
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_events_published_before_subscribe_are_delivered() {
    let (_container, settings) = start_rabbitmq().await;

    let publisher_gateway: Arc<dyn BrokerGateway> = Arc::new(
        AmqpGateway::connect(&settings)
            .await
            .expect("Failed to connect publisher"),
    );
    let publisher = EventBus::new(publisher_gateway, Mediator::new());
    for i in 0..3 {
        publisher
            .publish(&TransferCreatedEvent::new(i, i + 1, dec!(1)))
            .await
            .expect("Failed to publish");
    }

    let consumer_gateway: Arc<dyn BrokerGateway> = Arc::new(
        AmqpGateway::connect(&settings)
            .await
            .expect("Failed to connect consumer"),
    );
    let consumer = EventBus::from_config(consumer_gateway, Mediator::new(), &Config::default());
    let repository = Arc::new(InMemoryTransferRepository::new());
    let handler_repository = Arc::clone(&repository) as Arc<dyn TransferRepository>;
    consumer
        .subscribe::<TransferCreatedEvent, _>(move || {
            TransferEventHandler::new(Arc::clone(&handler_repository))
        })
        .await
        .expect("Failed to subscribe");

    let logs = wait_for_logs(&repository, 3).await;
    let from: Vec<_> = logs.iter().map(|l| l.from_account).collect();
    assert_eq!(from, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_connect_to_unreachable_broker_fails() {
    let settings = BrokerSettings {
        host: "127.0.0.1".to_string(),
        port: 1,
        ..Default::default()
    };

    let result = AmqpGateway::connect(&settings).await;
    assert!(matches!(result, Err(BusError::Connection(_))));
}
