use std::time::Duration;

use anyhow::Result;
use reqwest::Client;

pub fn build_http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .build()?)
}
