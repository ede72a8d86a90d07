//! Exit address verification
//!
//! Waits for the SOCKS port to accept connections, then asks an address echo
//! service through it. Every failure ends in [`Address::Unknown`] rather than
//! an error: a missed check only costs the current cycle.

use crate::config::{Endpoint, RunConfig, Timings};
use anyhow::{Context, Result};
use regex::Regex;
use reqwest::Proxy;
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, error, info, warn};

/// Result of one address check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Known(String),
    Unknown,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(ip) => f.write_str(ip),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

const DOTTED_QUAD: &str = r"[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}";

/// Pattern matching an IPv4-shaped dotted quad
pub fn dotted_quad() -> Result<Regex> {
    Regex::new(DOTTED_QUAD).context("Failed to compile address pattern")
}

/// First IPv4-shaped substring of `body`
pub fn extract_ipv4(pattern: &Regex, body: &str) -> Address {
    pattern
        .find(body)
        .map(|m| Address::Known(m.as_str().to_string()))
        .unwrap_or(Address::Unknown)
}

/// One connection attempt against `endpoint`
pub async fn try_connect(endpoint: &Endpoint, timeout: Duration) -> bool {
    let connect = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
    match time::timeout(timeout, connect).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!("Connection to {} failed: {}", endpoint, e);
            false
        },
        Err(_) => {
            debug!("Connection to {} timed out", endpoint);
            false
        },
    }
}

/// First candidate with a listening SOCKS port
pub async fn discover(candidates: &[Endpoint], timeout: Duration) -> Option<Endpoint> {
    for candidate in candidates {
        if try_connect(candidate, timeout).await {
            info!("Found active Tor SOCKS proxy at {}", candidate);
            return Some(candidate.clone());
        }
        info!("No Tor proxy at {}", candidate);
    }
    None
}

/// Poll `endpoint` until it accepts a connection or the attempts run out
pub async fn wait_ready(endpoint: &Endpoint, timings: &Timings) -> bool {
    for _ in 0..timings.ready_attempts {
        if try_connect(endpoint, timings.connect_timeout).await {
            return true;
        }
        info!("Waiting for Tor proxy ({}) to be ready...", endpoint);
        time::sleep(timings.ready_delay).await;
    }
    error!("Tor proxy ({}) not responding after retries.", endpoint);
    false
}

/// HTTP client routed through the Tor SOCKS port
pub struct AddressChecker {
    client: reqwest::Client,
    socks: Endpoint,
    url: String,
    pattern: Regex,
    timings: Timings,
}

impl AddressChecker {
    pub fn new(config: &RunConfig) -> Result<Self> {
        // socks5h so the echo service's name is resolved by Tor as well
        let proxy_url = format!("socks5h://{}", config.socks);
        debug!("Creating Tor client with proxy: {}", proxy_url);

        let proxy = Proxy::all(&proxy_url).context("Failed to create proxy configuration")?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(config.timings.request_timeout)
            .build()
            .context("Failed to build client")?;

        Ok(Self {
            client,
            socks: config.socks.clone(),
            url: config.check_url.clone(),
            pattern: dotted_quad()?,
            timings: config.timings.clone(),
        })
    }

    /// The exit address currently seen by the echo service
    pub async fn current_address(&self) -> Address {
        if !wait_ready(&self.socks, &self.timings).await {
            return Address::Unknown;
        }

        let attempts = self.timings.request_attempts;
        for attempt in 1..=attempts {
            match self.fetch().await {
                Ok(body) => return extract_ipv4(&self.pattern, &body),
                Err(e) => {
                    warn!("Failed to fetch IP (attempt {}/{}): {:#}", attempt, attempts, e);
                    if attempt < attempts {
                        time::sleep(self.timings.request_delay).await;
                    }
                },
            }
        }

        error!("Could not fetch IP after retries.");
        Address::Unknown
    }

    async fn fetch(&self) -> Result<String> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Request to address service failed")?
            .error_for_status()?
            .text()
            .await
            .context("Failed to read address service response")?;
        Ok(body)
    }
}
