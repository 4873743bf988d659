use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::processor::{process_message, TrackingServices};

/// Consumes the tracking topic with SASL auth and a consecutive-failure circuit breaker.
pub async fn start_kafka_consumer(config: &AppConfig, services: TrackingServices) -> anyhow::Result<()> {
    info!("Initializing Kafka consumer for topic: {}", config.kafka_topic);

    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_bootstrap_servers)
        .set("group.id", &config.kafka_group_id)
        .set("auto.offset.reset", &config.kafka_auto_offset_reset)
        // SASL Configuration
        .set("security.protocol", &config.kafka_security_protocol)
        .set("sasl.mechanism", &config.kafka_sasl_mechanism)
        .set("sasl.username", &config.kafka_username)
        .set("sasl.password", &config.kafka_password);

    // Create the consumer
    let consumer: StreamConsumer = client_config.create()?;
    consumer.subscribe(&[&config.kafka_topic])?;
    info!("Subscribed to topic: {}", config.kafka_topic);

    let mut stream = consumer.stream();
    let mut consecutive_failures = 0;
    let max_retries = config.kafka_max_retries;
    let cooldown_duration = Duration::from_secs(config.kafka_circuit_breaker_cooldown);

    while let Some(received) = stream.next().await {
        match received {
            Ok(m) => {
                // Success: Reset failure counter
                consecutive_failures = 0;

                let payload = match m.payload() {
                    None => {
                        warn!("Received empty payload from Kafka");
                        continue;
                    }
                    Some(p) => p.to_vec(),
                };

                // Sessions serialize per device inside the manager, so payloads
                // can be handled off the consumer loop.
                let services = services.clone();
                tokio::spawn(async move {
                    if let Err(e) = process_message(&services, &payload).await {
                        error!("Error processing message: {}", e);
                    }
                });
            }
            Err(e) => {
                consecutive_failures += 1;
                error!(
                    "Kafka error: {}. Failure count ({} / {})",
                    e, consecutive_failures, max_retries
                );

                // Circuit Breaker Check
                if consecutive_failures >= max_retries {
                    warn!(
                        "Circuit breaker tripped ({} consecutive failures)! Sleeping for {} seconds...",
                        consecutive_failures, config.kafka_circuit_breaker_cooldown
                    );
                    tokio::time::sleep(cooldown_duration).await;
                    consecutive_failures = 0;
                    info!("Circuit breaker reset. Resuming consumption.");
                } else {
                    // Small delay so a flapping broker doesn't spin the loop
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
    }

    warn!("Kafka stream ended");
    Ok(())
}
