use std::time::Duration;

/// Tuning knobs for the notification core. The service layer builds this from
/// command line/environment configuration; tests construct it directly.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Feature flag. When off, the publisher handed out by the manager is a no-op.
    pub enabled: bool,
    /// Maximum number of simultaneously registered connections.
    pub max_clients: usize,
    /// Bounded size of each connection's outbound queue.
    pub outbound_queue_capacity: usize,
    /// Consecutive drop-oldest events tolerated before a connection is evicted.
    pub max_consecutive_drops: usize,
    /// Bounded size of the publisher -> dispatcher queue.
    pub dispatch_queue_capacity: usize,
    /// Close a connection when no inbound frame arrives within this window.
    pub idle_timeout: Duration,
    /// Period of protocol-level pings sent by the writer.
    pub ping_period: Duration,
    /// Upper bound on a single socket write.
    pub write_timeout: Duration,
    /// Upper bound on a draining connection flushing its queue.
    pub close_grace_period: Duration,
    /// Largest inbound frame accepted from a client.
    pub max_message_size: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_clients: 1000,
            outbound_queue_capacity: 256,
            max_consecutive_drops: 64,
            dispatch_queue_capacity: 1024,
            idle_timeout: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
            write_timeout: Duration::from_secs(10),
            close_grace_period: Duration::from_millis(500),
            max_message_size: 512 * 1024,
        }
    }
}
