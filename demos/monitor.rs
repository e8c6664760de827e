use std::env;
use std::time::Duration;

use finder_bliss::{BlissClientBuilder, Credentials, MessageLogMode};

/// Usage: monitor [--log <path>] [--set <serial> <celsius>]
///
/// Credentials come from FINDER_BLISS_USERNAME / FINDER_BLISS_PASSWORD.
#[tokio::main]
async fn main() -> finder_bliss::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let mut builder = BlissClientBuilder::with_credentials(Credentials::from_env()?);
    if let Some(i) = args.iter().position(|a| a == "--log")
        && let Some(path) = args.get(i + 1)
    {
        builder = builder.message_log(MessageLogMode::Diffed, path);
    }
    let client = builder.build()?;

    if !client.validate_credentials().await? {
        eprintln!("Credentials rejected");
        return Ok(());
    }

    println!("Connecting...");
    client.setup().await?;

    if let Some(i) = args.iter().position(|a| a == "--set")
        && let (Some(serial), Some(value)) = (args.get(i + 1), args.get(i + 2))
    {
        client.get_devices().await?;
        let value: f64 = value.parse().unwrap_or(20.0);
        let receipt = client.set_temperature(serial, value).await?;
        println!(
            "Set {serial} to {value:.1}\u{00b0}C (acknowledged: {})",
            receipt.acknowledged
        );
    }

    loop {
        match client.get_devices().await {
            Ok(devices) => {
                for d in &devices {
                    println!(
                        "[{}] {} {}\u{00b0}C | set {} | humidity {} | mode: {} | {}",
                        d.model(),
                        d.name,
                        d.temperature,
                        d.set_point,
                        d.humidity,
                        d.mode,
                        d.status.as_deref().unwrap_or("-"),
                    );
                }
            }
            Err(e) => eprintln!("Fetch error: {e}"),
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
}
