// TCP probe - internet reachability by connecting to well-known hosts
use crate::application::host_probes::ConnectivityProbe;
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

pub struct TcpProbe {
    hosts: Vec<String>,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(hosts: Vec<String>, timeout: Duration) -> Self {
        Self { hosts, timeout }
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn is_reachable(&self) -> bool {
        for host in &self.hosts {
            match tokio::time::timeout(self.timeout, TcpStream::connect(host.as_str())).await {
                Ok(Ok(_)) => return true,
                Ok(Err(e)) => tracing::debug!(host = %host, error = %e, "Host unreachable"),
                Err(_) => tracing::debug!(host = %host, "Connection attempt timed out"),
            }
        }
        false
    }
}
