//! Relays one GET and one POST through a site endpoint.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=debug,hyper_util=off,hyper=off,reqwest=off,rustls=off cargo run --example relay --features tracing -- \
//!     https://shop.example.com/wp-admin/admin-ajax.php https://chat.example.com/api/sessions nonce
//! ```

use std::time::Duration;

use chat_client_sdk::relay::{Client, Config, Method};
use secrecy::SecretString;
use serde_json::json;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let (Some(endpoint), Some(target), Some(token)) = (args.next(), args.next(), args.next())
    else {
        anyhow::bail!("usage: relay <relay-endpoint> <target-url> <security-token>");
    };
    let token = SecretString::from(token);

    let config = Config::builder().timeout(Duration::from_secs(15)).build();
    let client = Client::with_config(&endpoint, config)?;

    match client
        .send(&target, &token, Method::GET, &json!({ "page": 1 }))
        .await
    {
        Ok(data) => info!(method = "GET", %data),
        Err(e) => error!(method = "GET", error = %e),
    }

    match client
        .send(
            &target,
            &token,
            Method::POST,
            &json!({ "visitor": "demo", "text": "hello from the relay demo" }),
        )
        .await
    {
        Ok(data) => info!(method = "POST", %data),
        Err(e) => error!(method = "POST", error = %e),
    }

    Ok(())
}
