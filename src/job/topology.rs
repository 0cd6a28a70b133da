use rand::Rng as _;
use tracing::{debug, info};

use crate::cluster::Client;

use super::JobError;

/// Non-empty set of node base URLs that accept lookup traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthyNodes(Vec<url::Url>);

impl HealthyNodes {
    pub fn new(nodes: Vec<url::Url>) -> Option<Self> {
        if nodes.is_empty() {
            None
        } else {
            Some(Self(nodes))
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[cfg(test)]
    pub fn urls(&self) -> &[url::Url] {
        &self.0
    }

    /// Pick one node uniformly at random.
    pub fn choose(&self) -> &url::Url {
        &self.0[rand::thread_rng().gen_range(0..self.0.len())]
    }
}

/// Base URL of the node at `address`, reusing the scheme of `entry`.
pub fn node_url(entry: &url::Url, address: &str) -> Result<url::Url, url::ParseError> {
    let host = if address.contains(':') && !address.starts_with('[') {
        format!("[{address}]")
    } else {
        address.to_owned()
    };
    url::Url::parse(&format!("{}://{host}", entry.scheme()))
}

/// List cluster members and keep the ones reporting `OK`, in response order.
pub async fn resolve_healthy_nodes<C: Client>(client: &C) -> Result<HealthyNodes, JobError<C::Error>> {
    let members = client.nodes().await.map_err(JobError::Topology)?;
    let total = members.len();
    let mut urls = Vec::with_capacity(total);
    for member in members {
        if !member.is_healthy() {
            debug!(address = member.ip_address, status = member.status, "skip unhealthy node");
            continue;
        }
        let url = node_url(client.entry_url(), &member.ip_address).map_err(|error| {
            JobError::<C::Error>::NodeAddress {
                address: member.ip_address.clone(),
                error,
            }
        })?;
        urls.push(url);
    }
    info!(healthy = urls.len(), total, "resolved cluster topology");
    HealthyNodes::new(urls).ok_or(JobError::EmptyTopology)
}
