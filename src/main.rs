use live_data_broker::broker::{BrokerConfig, DispatchConfig, EventDispatchLoop, LiveDataBroker};
use live_data_broker::feed::simulated::SIMULATED_SCHEME;
use live_data_broker::normalization::FieldFilterPipeline;
use live_data_broker::resolver::NaiveResolver;
use live_data_broker::sender::BroadcastSenderFactory;
use live_data_broker::{create_router, Broadcaster, SimulatedFeedAdapter};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "live_data_broker=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = BrokerConfig {
        expiry_extension: chrono::Duration::seconds(env_u64("EXPIRY_EXTENSION_SECS", 180) as i64),
        sweep_period: Duration::from_secs(env_u64("SWEEP_PERIOD_SECS", 60)),
    };
    let dispatch_config = DispatchConfig {
        max_wait: Duration::from_secs(1),
        retry_period: Duration::from_secs(env_u64("DISPATCH_RETRY_SECS", 30)),
    };

    // Simulated feed with a small FX/metals universe
    let adapter = Arc::new(
        SimulatedFeedAdapter::new(true)
            .with_instrument("1", dec!(1.0843))
            .with_instrument("2", dec!(1.2710))
            .with_instrument("4", dec!(147.35))
            .with_instrument("41", dec!(2650.75)),
    );

    // Resolver with the default passthrough ruleset plus a prices-only one
    let resolver = Arc::new(
        NaiveResolver::new(SIMULATED_SCHEME)
            .with_pipeline("prices", Arc::new(FieldFilterPipeline::new(["bid", "ask"]))),
    );

    // Downstream fan-out over WebSocket topics
    let broadcaster = Broadcaster::new();

    let mut broker = LiveDataBroker::new(adapter, resolver, config);
    broker.set_sender_factory(Arc::new(BroadcastSenderFactory::new(broadcaster.clone())));
    let broker = Arc::new(broker);

    // Connect to the feed and start the expiry sweep
    if let Err(e) = broker.start().await {
        tracing::error!("failed to start the broker: {}", e);
        std::process::exit(1);
    }

    // Background loop pulling feed events into the broker
    let _dispatch = EventDispatchLoop::spawn(Arc::clone(&broker), dispatch_config);

    let app = create_router(Arc::clone(&broker), broadcaster);

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();

    tracing::info!("🚀 Live data broker running on http://{}", addr);
    tracing::info!("📊 Health check: http://{}/api/v1/health", addr);
    tracing::info!("📚 Swagger UI: http://{}/swagger-ui", addr);
    tracing::info!("🔌 WebSocket: ws://{}/ws", addr);
    tracing::info!("");
    tracing::info!("📡 Subscribe to EURUSD ticks over WebSocket:");
    tracing::info!(r#"   {{"action":"subscribe","topic":"live-data/1/raw"}}"#);
    tracing::info!("   after requesting the subscription:");
    tracing::info!(
        r#"   curl -X POST http://{}/api/v1/subscriptions -H 'content-type: application/json' \
        -d '{{"user":"demo","type":"transient","specifications":[{{"normalization_ruleset":"raw","identifiers":[{{"scheme":"SIM","value":"1"}}]}}]}}'"#,
        addr
    );

    axum::serve(listener, app).await.unwrap();
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}
