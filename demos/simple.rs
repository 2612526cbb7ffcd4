use gatekit::{ClientConfig, User};

pub fn main() {
    env_logger::init();

    let secret_key = std::env::var("GATEKIT_SECRET_KEY").unwrap();
    let client = ClientConfig::from_secret_key(secret_key)
        .environment("development")
        .to_client()
        .unwrap();

    // Download rules and start polling for updates. If the download fails, gates are evaluated
    // by the server until rules arrive.
    client.initialize().unwrap();

    let user = User::with_user_id("test-user").country("NZ");

    let enabled = client
        .check_gate(Some(&user), "a-feature-gate")
        // default value
        .unwrap_or(false);
    println!("Gate: {:?}", enabled);

    let price = client
        .get_config(Some(&user), "pricing")
        .ok()
        .and_then(|config| config.get::<f64>("price"))
        .unwrap_or(9.99);
    println!("Price: {:?}", price);

    client.log_event(Some(&user), "demo_run", None, None).unwrap();

    // Deliver remaining events before exiting.
    client.shutdown_sync().unwrap();
}
