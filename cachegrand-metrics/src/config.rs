use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([127, 0, 0, 1], 9090).into(),
        }
    }
}
