//! Runs two endpoints on an in-memory broker: `Sales` handles `PlaceOrder`
//! commands and publishes `OrderPlaced`, which `Billing` subscribes to.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use courier_core::{Message, UnicastRoute};
use courier_endpoint::config::EndpointConfig;
use courier_endpoint::endpoint::EndpointBuilder;
use courier_endpoint::handlers::{Handler, HandlerContext};
use courier_endpoint::routing::SendOptions;
use courier_endpoint::telemetry::init_tracing;
use courier_endpoint::transport::{InMemoryBroker, InMemoryTransport};
use courier_endpoint::{InMemorySubscriptionStore, SubscriptionStore};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "courier-demo", about = "In-memory Courier endpoint demo")]
struct Args {
    /// Number of orders to place.
    #[arg(long, env = "COURIER_DEMO_ORDERS", default_value_t = 10)]
    orders: u32,

    /// Every n-th order fails in its handler (0 disables failures).
    #[arg(long, env = "COURIER_DEMO_FAIL_EVERY", default_value_t = 0)]
    fail_every: u32,

    /// Immediate retries before a failing order is moved to the error queue.
    #[arg(long, env = "COURIER_DEMO_IMMEDIATE_RETRIES", default_value_t = 2)]
    immediate_retries: u32,

    /// Maximum concurrently processed messages per endpoint.
    #[arg(long, env = "COURIER_DEMO_CONCURRENCY", default_value_t = 4)]
    concurrency: u32,

    /// How long to let the endpoints run, in milliseconds.
    #[arg(long, env = "COURIER_DEMO_RUN_MS", default_value_t = 1_000)]
    run_ms: u64,

    /// Emit JSON log lines.
    #[arg(long, env = "COURIER_DEMO_JSON")]
    json: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct PlaceOrder {
    order_id: u32,
}

impl Message for PlaceOrder {
    const MESSAGE_TYPE: &'static str = "Sales.PlaceOrder";
}

#[derive(Debug, Serialize, Deserialize)]
struct OrderPlaced {
    order_id: u32,
}

impl Message for OrderPlaced {
    const MESSAGE_TYPE: &'static str = "Sales.OrderPlaced";
}

struct PlaceOrderHandler {
    fail_every: u32,
}

#[async_trait]
impl Handler<PlaceOrder> for PlaceOrderHandler {
    async fn handle(&self, message: PlaceOrder, ctx: &mut HandlerContext) -> anyhow::Result<()> {
        if self.fail_every > 0 && message.order_id % self.fail_every == 0 {
            anyhow::bail!("order {} rejected by payment provider", message.order_id);
        }
        ctx.publish(&OrderPlaced {
            order_id: message.order_id,
        })
        .await?;
        Ok(())
    }
}

struct OrderPlacedHandler {
    billed: Arc<AtomicU32>,
}

#[async_trait]
impl Handler<OrderPlaced> for OrderPlacedHandler {
    async fn handle(&self, message: OrderPlaced, _ctx: &mut HandlerContext) -> anyhow::Result<()> {
        self.billed.fetch_add(1, Ordering::SeqCst);
        info!(order_id = message.order_id, "order billed");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json);

    let broker = Arc::new(InMemoryBroker::new());
    let subscriptions: Arc<dyn SubscriptionStore> = Arc::new(InMemorySubscriptionStore::new());
    let billed = Arc::new(AtomicU32::new(0));

    let mut sales_config = EndpointConfig::new("Sales");
    sales_config.max_concurrency = args.concurrency;
    sales_config.recoverability.immediate_retries = args.immediate_retries;
    sales_config.recoverability.delayed_retries = 0;
    let mut sales = EndpointBuilder::new(sales_config, Arc::new(InMemoryTransport::new(Arc::clone(&broker))))
        .with_subscription_store(Arc::clone(&subscriptions));
    sales.register_handler::<PlaceOrder, _>(PlaceOrderHandler {
        fail_every: args.fail_every,
    });
    let sales = sales.build().await?;

    let mut billing_config = EndpointConfig::new("Billing");
    billing_config.max_concurrency = args.concurrency;
    let mut billing = EndpointBuilder::new(billing_config, Arc::new(InMemoryTransport::new(Arc::clone(&broker))))
        .with_subscription_store(Arc::clone(&subscriptions));
    billing.register_handler::<OrderPlaced, _>(OrderPlacedHandler {
        billed: Arc::clone(&billed),
    });
    let billing = billing.build().await?;
    billing.session().subscribe::<OrderPlaced>().await?;

    let client = EndpointBuilder::new(
        {
            let mut config = EndpointConfig::new("Client");
            config.send_only = true;
            config
        },
        Arc::new(InMemoryTransport::new(Arc::clone(&broker))),
    );
    client
        .routing()
        .table
        .add_or_replace_routes(
            "demo",
            vec![(PlaceOrder::message_type(), UnicastRoute::Endpoint("Sales".into()))],
        )?;
    let client = client.build().await?;

    let sales = sales.start();
    let billing = billing.start();

    let session = client.session();
    for order_id in 1..=args.orders {
        session
            .send(&PlaceOrder { order_id }, SendOptions::new())
            .await?;
    }

    tokio::time::sleep(Duration::from_millis(args.run_ms)).await;
    sales.stop().await;
    billing.stop().await;

    info!(
        placed = args.orders,
        billed = billed.load(Ordering::SeqCst),
        failed = broker.len("error"),
        "demo finished"
    );
    Ok(())
}
