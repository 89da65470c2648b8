//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the origin
//! server and the proxy. All types derive Serde traits for deserialization
//! from config files.

use serde::{Deserialize, Serialize};

/// Root configuration shared by the origin server and the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GateConfig {
    /// Listener configuration (port, admission capacity, worker count).
    pub listener: ListenerConfig,

    /// Origin-specific settings (document root).
    pub origin: OriginConfig,

    /// Proxy-specific settings (default upstream, timeouts, image filter).
    pub proxy: ProxyConfig,

    /// Shared-memory transport settings.
    pub shm: ShmConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Port to bind on all interfaces.
    pub port: u16,

    /// Admission capacity: connections beyond this are rejected, not queued.
    pub queue_capacity: usize,

    /// Number of worker threads servicing connections.
    pub workers: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            queue_capacity: 32,
            workers: 4,
        }
    }
}

/// Origin server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OriginConfig {
    /// Directory that request paths resolve under.
    pub document_root: String,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            document_root: ".".to_string(),
        }
    }
}

/// Proxy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Default upstream host, used when a request carries no Host header.
    pub upstream_host: String,

    /// Default upstream port.
    pub upstream_port: u16,

    /// Connect/send/receive timeout for upstream sockets, in seconds.
    pub upstream_timeout_secs: u64,

    /// Optional address of the image-alteration service. When unset,
    /// image responses pass through unmodified.
    pub image_filter_address: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstream_host: "127.0.0.1".to_string(),
            upstream_port: 9090,
            upstream_timeout_secs: 5,
            image_filter_address: None,
        }
    }
}

/// Shared-memory transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShmConfig {
    /// Whether the shared-memory transport is available at all.
    pub enabled: bool,

    /// Namespace embedded in every segment name, so independent
    /// deployments on one host do not collide.
    pub namespace: String,

    /// Number of slots, which is also the concurrency cap of the transport.
    pub slots: usize,

    /// Payload capacity of one slot, in bytes. One response chunk must fit.
    pub slot_capacity: usize,
}

impl Default for ShmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "main".to_string(),
            slots: 8,
            slot_capacity: 8192,
        }
    }
}
