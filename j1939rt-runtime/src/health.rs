/// Published on `system.heartbeat` once per interval per running module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub module: String,
    pub timestamp_ms: u64,
}

/// Published on `system.health` once per interval by the runtime itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Health {
    pub uptime_seconds: u64,
    pub timestamp_ms: u64,
}
