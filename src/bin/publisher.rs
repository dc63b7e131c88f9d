use anyhow::Context;
use clap::Parser;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use order_sync::messaging::OrderProducer;
use order_sync::models::{Order, SAMPLE_ORDER_JSON};

#[derive(Parser)]
#[command(name = "order-publisher")]
#[command(about = "Publish sample orders to the ingestion topic", long_about = None)]
struct Cli {
    /// Number of orders to publish
    #[arg(short = 'n', long, default_value_t = 10)]
    count: usize,

    /// Pause between messages, in milliseconds
    #[arg(short, long, default_value_t = 1000)]
    delay: u64,

    /// Broker bootstrap servers
    #[arg(long, env = "BROKER_ADDR", default_value = "127.0.0.1:9092")]
    brokers: String,

    /// Destination topic
    #[arg(short, long, default_value = "orders")]
    topic: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let template: Order = serde_json::from_str(SAMPLE_ORDER_JSON).context("invalid test order template")?;
    let producer = OrderProducer::new(&cli.brokers).context("failed to create producer")?;

    let mut published = 0usize;
    for i in 0..cli.count {
        let mut order = template.clone();
        order.order_uid = format!("{}-{}", uuid::Uuid::now_v7().simple(), i);

        match producer.publish_order(&cli.topic, &order).await {
            Ok(()) => {
                published += 1;
                tracing::info!(
                    message_number = i + 1,
                    total_messages = cli.count,
                    order_uid = %order.order_uid,
                    "Message published"
                );
            }
            Err(e) => {
                tracing::error!(
                    message_number = i + 1,
                    error = %e,
                    circuit = producer.get_circuit_breaker_state().await.as_str(),
                    "Failed to publish message"
                );
            }
        }

        if i + 1 < cli.count {
            tokio::time::sleep(Duration::from_millis(cli.delay)).await;
        }
    }

    tracing::info!(published = published, requested = cli.count, "Done");
    Ok(())
}
