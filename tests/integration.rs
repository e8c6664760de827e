use finder_bliss::{BlissClientBuilder, Credentials};

/// Run with: cargo test --test integration -- --ignored
/// Requires a real Finder account in FINDER_BLISS_USERNAME / FINDER_BLISS_PASSWORD.
#[tokio::test]
#[ignore]
async fn login_and_fetch_devices() {
    let credentials = Credentials::from_env().expect("credentials not set");
    let client = BlissClientBuilder::with_credentials(credentials)
        .build()
        .expect("client build failed");

    assert!(
        client.validate_credentials().await.expect("login request failed"),
        "credentials rejected"
    );

    client.setup().await.expect("setup failed");
    let devices = client.get_devices().await.expect("fetch failed");
    assert!(!devices.is_empty(), "account should have at least one device");
    for d in &devices {
        assert!(d.is_bound());
        println!("{} [{}] {} mode={}", d.key(), d.model(), d.temperature, d.mode);
    }

    client.close().await;
}

/// Re-sends the current setpoint, which leaves the device state unchanged.
#[tokio::test]
#[ignore]
async fn rewrite_current_setpoint() {
    let credentials = Credentials::from_env().expect("credentials not set");
    let client = BlissClientBuilder::with_credentials(credentials).build().unwrap();

    let devices = client.get_devices().await.expect("fetch failed");
    let Some(target) = devices
        .iter()
        .find(|d| d.model() == "BLISS2" && d.manual_set_point.is_available())
    else {
        eprintln!("no BLISS2 device with a manual setpoint; skipping");
        return;
    };

    let value = target.manual_set_point.value().unwrap();
    let receipt = client
        .set_temperature(target.key(), value)
        .await
        .expect("write failed");
    println!("acknowledged={} version={}", receipt.acknowledged, receipt.server_sync_version);
}
