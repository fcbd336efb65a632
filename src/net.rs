//! Egress IP lookup shown in the progress header.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::stats::Statistics;

#[derive(Debug, Deserialize)]
struct IpEcho {
    origin: String,
}

/// Asks an httpbin-style echo endpoint for the caller's address.
///
/// # Errors
///
/// Returns an error if the request fails or the body has no `origin`.
pub async fn current_ip(client: &reqwest::Client, url: &str) -> Result<String> {
    let echo: IpEcho = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(echo.origin)
}

/// Refreshes the IP in `stats` every `every` until graceful stop.
///
/// A failed lookup keeps the previous value.
pub fn spawn_ip_poller(
    client: reqwest::Client,
    url: String,
    stats: Arc<Statistics>,
    every: Duration,
) -> JoinHandle<()> {
    let stop = stats.stop_token();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                _ = interval.tick() => match current_ip(&client, &url).await {
                    Ok(ip) => stats.set_current_ip(ip),
                    Err(e) => log::warn!("IP lookup via {url} failed: {e}"),
                },
            }
        }
    })
}
