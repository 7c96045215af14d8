// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use rand::Rng;
use tokio::time::{Instant, sleep};
use tonic::transport::{Channel, Endpoint};

const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(3);
const BACKOFF_FACTOR: u32 = 2;
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exponential backoff with +/-20% jitter, capped at [`BACKOFF_MAX`].
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    next: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            next: BACKOFF_BASE,
            max: BACKOFF_MAX,
        }
    }
}

impl Backoff {
    pub(crate) fn next_delay(&mut self) -> Duration {
        let base = self.next;
        self.next = (self.next * BACKOFF_FACTOR).min(self.max);
        let jitter: f64 = rand::rng().random_range(0.8..1.2);
        base.mul_f64(jitter).min(self.max)
    }
}

/// gRPC endpoint for the daemon on `address:port`.
pub(crate) fn daemon_endpoint(address: &str, port: u16, dial_timeout: Duration) -> Result<Endpoint> {
    let authority = match address.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port).to_string(),
        Err(_) => format!("{address}:{port}"),
    };
    let endpoint = Endpoint::from_shared(format!("http://{authority}"))
        .with_context(|| format!("invalid daemon endpoint {authority}"))?
        .connect_timeout(dial_timeout)
        .tcp_nodelay(true);
    Ok(endpoint)
}

/// Connects to `endpoint`, retrying refused or failed attempts with backoff until
/// `dial_timeout` has elapsed.
pub(crate) async fn dial(endpoint: &Endpoint, dial_timeout: Duration) -> Result<Channel> {
    let deadline = Instant::now() + dial_timeout;
    let mut backoff = Backoff::default();
    let mut attempt = 1u32;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let result = tokio::time::timeout(remaining, endpoint.connect()).await;
        let err = match result {
            Ok(Ok(channel)) => return Ok(channel),
            Ok(Err(err)) => anyhow!(err),
            Err(_) => anyhow!("no connection within {dial_timeout:?}"),
        };
        let delay = backoff.next_delay();
        if Instant::now() + delay >= deadline {
            return Err(err.context(format!(
                "dialing {} failed after {attempt} attempts",
                endpoint.uri()
            )));
        }
        log::debug!(
            "dial attempt {attempt} to {} failed: {err:#}; retrying in {delay:?}",
            endpoint.uri()
        );
        sleep(delay).await;
        attempt += 1;
    }
}

/// Polls `check` until it reports serving or `ready_timeout` elapses.
pub(crate) async fn wait_until<F, Fut>(ready_timeout: Duration, mut check: F) -> Result<()>
where
    F: FnMut(Duration) -> Fut,
    Fut: std::future::Future<Output = Result<bool>>,
{
    let deadline = Instant::now() + ready_timeout;
    let mut last_err = None;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            let err = anyhow!("daemon did not report serving within {ready_timeout:?}");
            return Err(match last_err {
                Some(last) => err.context(format!("last readiness error: {last:#}")),
                None => err,
            });
        }
        match check(remaining).await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(err) => last_err = Some(err),
        }
        sleep(READY_POLL_INTERVAL.min(remaining)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_grows_and_is_capped() {
        let mut backoff = Backoff::default();
        let first = backoff.next_delay();
        assert!(first >= Duration::from_millis(80) && first <= Duration::from_millis(120));
        let second = backoff.next_delay();
        assert!(second >= Duration::from_millis(160) && second <= Duration::from_millis(240));
        for _ in 0..20 {
            assert!(backoff.next_delay() <= BACKOFF_MAX);
        }
    }

    #[test]
    fn endpoint_brackets_ipv6() {
        let endpoint = daemon_endpoint("::1", 50057, Duration::from_secs(1)).unwrap();
        assert_eq!(
            endpoint.uri().authority().map(|a| a.as_str()),
            Some("[::1]:50057")
        );
        let endpoint = daemon_endpoint("node-1", 50057, Duration::from_secs(1)).unwrap();
        assert_eq!(endpoint.uri().host(), Some("node-1"));
    }

    #[test]
    fn endpoint_rejects_garbage() {
        assert!(daemon_endpoint("bad host", 1, Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn dial_gives_up_after_timeout() {
        // Bind and drop to get a port that refuses connections.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let endpoint = daemon_endpoint("127.0.0.1", port, Duration::from_millis(300)).unwrap();
        let started = Instant::now();
        let err = dial(&endpoint, Duration::from_millis(300)).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(format!("{err:#}").contains("dialing"));
    }

    #[tokio::test]
    async fn wait_until_retries_until_serving() {
        let calls = AtomicU32::new(0);
        wait_until(Duration::from_secs(2), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n >= 2) }
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn wait_until_times_out() {
        let err = wait_until(Duration::from_millis(250), |_| async {
            Err(anyhow!("connection refused"))
        })
        .await
        .unwrap_err();
        let text = format!("{err:#}");
        assert!(text.contains("did not report serving"));
        assert!(text.contains("connection refused"));
    }
}
