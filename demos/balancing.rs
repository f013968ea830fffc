//! Fleet simulation: ten in-process instances balance themselves.
//!
//! Runs entirely on the in-memory backend, no external services needed.

use loadvisor::storage::StorageConfig;
use loadvisor::{step_sizes, Advisor, AdvisorConfig, LoadSample, MemoryCluster, StatusSource};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("loadvisor=info")
        .init();

    // Eight loaded instances and two freshly deployed empty ones.
    let initial = [25.0, 26.0, 25.0, 25.0, 26.0, 25.0, 25.0, 25.0, 0.0, 0.0];

    let cluster = MemoryCluster::new();
    let values: Arc<Mutex<HashMap<String, f64>>> = Arc::new(Mutex::new(HashMap::new()));
    let mut advisors = Vec::new();

    for (i, &value) in initial.iter().enumerate() {
        let name = format!("instance-{i}");
        values.lock().insert(name.clone(), value);

        let values_for_source = values.clone();
        let source_name = name.clone();
        let source: Arc<dyn StatusSource> = Arc::new(move || {
            LoadSample::new(
                values_for_source
                    .lock()
                    .get(&source_name)
                    .copied()
                    .unwrap_or(0.0),
            )
        });

        let config = AdvisorConfig::new("balancing-demo")
            .with_self_name(&name)
            .with_self_address(format!("{name}.demo.example"))
            .with_step_size(step_sizes::SMALL)
            .without_reporting()
            .without_advising();

        let store = Arc::new(cluster.store_named(&name));
        let (advisor, _events) = Advisor::new(config, source, StorageConfig::Custom(store))?;
        advisors.push(advisor);
    }

    // Register everyone, then run advice rounds until the fleet settles.
    for advisor in &advisors {
        advisor.update().await?;
    }

    for round in 1.. {
        let mut moved = 0.0;
        for advisor in &advisors {
            let advice = advisor.get_advice().await?;
            if let Some(change) = advice.proposed_change() {
                let mut values = values.lock();
                *values.get_mut(advisor.self_name()).expect("known") += change.delta;
                *values.get_mut(change.target.name.as_str()).expect("known") -= change.delta;
                moved += change.reduction;
            }
        }

        let snapshot = values.lock();
        let min = snapshot.values().cloned().fold(f64::INFINITY, f64::min);
        let max = snapshot.values().cloned().fold(f64::NEG_INFINITY, f64::max);
        println!("round {round:>3}: moved {moved:>4} units, spread {:.0}", max - min);
        drop(snapshot);

        if moved == 0.0 {
            println!("fleet settled after {round} rounds");
            break;
        }
    }

    for advisor in &advisors {
        advisor.stop().await?;
    }
    Ok(())
}
