//! Reachability probe for pooled proxies
//!
//! Read-only: reports on each identity without touching rotation state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::models::{ProxyEndpoint, ProxyTier};
use crate::proxy::pool::ProxyPool;

/// Probe configuration
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Timeout for each connect
    pub timeout: Duration,
    /// Endpoints probed at once
    pub concurrency: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            concurrency: 8,
        }
    }
}

/// Result for one endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub provider: String,
    pub address: String,
    pub tier: ProxyTier,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ProxyProbe {
    config: ProbeConfig,
}

impl ProxyProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// Probe every endpoint in the pool, in pool order
    pub async fn check_all(&self, pool: &ProxyPool) -> Vec<ProbeReport> {
        info!("Probing {} proxies", pool.len());

        let endpoints: Vec<Arc<ProxyEndpoint>> = pool.endpoints().to_vec();
        let mut reports = futures::stream::iter(endpoints.into_iter().enumerate())
            .map(|(i, endpoint)| async move { (i, self.check(&endpoint).await) })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;
        reports.sort_by_key(|(i, _)| *i);

        let reachable = reports.iter().filter(|(_, r)| r.reachable).count();
        info!(
            "Probe complete: {} reachable, {} unreachable",
            reachable,
            reports.len() - reachable
        );

        reports.into_iter().map(|(_, r)| r).collect()
    }

    /// TCP connect to a single endpoint
    #[instrument(skip(self), fields(provider = %endpoint.provider, address = %endpoint.address()))]
    pub async fn check(&self, endpoint: &ProxyEndpoint) -> ProbeReport {
        let started = Instant::now();
        let result = timeout(
            self.config.timeout,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await;

        let (reachable, error) = match result {
            Ok(Ok(_stream)) => {
                debug!("Proxy is reachable");
                (true, None)
            }
            Ok(Err(e)) => {
                let msg = format!("connect failed: {}", e);
                warn!("Proxy {} is unreachable: {}", endpoint.address(), msg);
                (false, Some(msg))
            }
            Err(_) => {
                let msg = "connect timed out".to_string();
                warn!("Proxy {} is unreachable: {}", endpoint.address(), msg);
                (false, Some(msg))
            }
        };

        ProbeReport {
            provider: endpoint.provider.clone(),
            address: endpoint.address(),
            tier: endpoint.tier,
            reachable,
            latency_ms: reachable.then(|| started.elapsed().as_millis() as u64),
            error,
        }
    }
}

impl Default for ProxyProbe {
    fn default() -> Self {
        Self::new(ProbeConfig::default())
    }
}
