//! Basic example: one advisor publishing to Redis.
//!
//! Needs a Redis reachable at REDIS_URL (default redis://127.0.0.1:6379).

use loadvisor::storage::{RedisStoreConfig, StorageConfig};
use loadvisor::{Advisor, AdvisorConfig, AdvisorEvent, LoadSample};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter("loadvisor=debug,info")
        .init();

    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());

    let config = AdvisorConfig::new("demo-cluster")
        .with_self_address("instance1.demo.example")
        .with_report_interval(Duration::from_millis(500))
        .with_advice_interval(Duration::from_secs(1));

    // Pretend the load wanders around 40 open connections.
    let source = Arc::new(|| LoadSample::new(40.0));

    let storage = StorageConfig::Redis(RedisStoreConfig::new(url));
    let (advisor, mut events) = Advisor::new(config, source, storage)?;

    println!("Waiting for storage...");
    advisor.ready().await?;
    println!("Ready. Instance name: {}", advisor.self_name());

    advisor.start();

    // Watch a few advising cycles.
    for _ in 0..5 {
        match events.recv().await {
            Some(AdvisorEvent::Advice(advice)) => {
                println!("mean delta: {:+.2}", advice.mean_delta);
                match advice.proposed_change() {
                    Some(change) => println!(
                        "  -> shed {} to {} ({})",
                        change.reduction, change.target.name, change.target.address
                    ),
                    None => println!("  -> no change proposed"),
                }
            }
            Some(AdvisorEvent::Error(e)) => println!("cycle error: {e}"),
            Some(AdvisorEvent::Ready) => {}
            None => break,
        }
    }

    println!("Shutting down...");
    advisor.stop().await?;
    Ok(())
}
