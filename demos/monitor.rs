use std::env;
use std::time::Duration;

use trv_supervisor::{EntityState, HubClient};

#[tokio::main]
async fn main() -> trv_supervisor::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let url = args.get(1).expect("usage: monitor <ws-url> <token> <entity>...");
    let token = args.get(2).expect("usage: monitor <ws-url> <token> <entity>...");
    let entities: Vec<String> = args[3..].to_vec();
    if entities.is_empty() {
        eprintln!("usage: monitor <ws-url> <token> <entity>...");
        std::process::exit(2);
    }

    let client = HubClient::builder(url, token)
        .monitor_all(entities)
        .on_state_change(|entity_id, entity| match entity {
            EntityState::Thermostat(t) => {
                println!(
                    "[{entity_id}] {:?} | current: {:?} | target: {:?}{}",
                    t.mode,
                    t.current_temperature,
                    t.target_temperature,
                    if t.available { "" } else { " | UNAVAILABLE" },
                );
            }
            EntityState::TemperatureSensor(s) | EntityState::HumiditySensor(s) => {
                println!(
                    "[{entity_id}] {:?} {}",
                    s.reading,
                    s.unit.as_deref().unwrap_or(""),
                );
            }
            EntityState::Select(s) => {
                println!("[{entity_id}] {:?}", s.value);
            }
        })
        .build();

    println!("Connecting to {url}...");
    client.connect().await?;
    println!("Connected. Watching for state changes...");

    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        let cache = client.snapshot();
        println!(
            "-- {} thermostats, {} sensors cached ({:?})",
            cache.thermostats.len(),
            cache.temperature_sensors.len() + cache.humidity_sensors.len(),
            client.status(),
        );
    }
}
