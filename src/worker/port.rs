//! Delivery endpoint port selection
//!
//! Each delivery prefers `base + 1 + (delivery_id % 100)`. Two running
//! deliveries can share that remainder, so the worker falls back to an
//! OS-assigned port whenever the preferred one is held by another local
//! instance or refuses to bind. The bound port is what gets reported to the
//! coordinator, never the derived one.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::net::TcpListener;

/// Number of distinct derived ports per worker
pub const PORT_SPAN: i64 = 100;

/// Preferred port for a delivery; 0 means "let the OS choose"
pub fn derive_port(base: u16, delivery_id: i64) -> u16 {
    if base == 0 {
        return 0;
    }
    let offset = 1 + delivery_id.rem_euclid(PORT_SPAN);
    u16::try_from(i64::from(base) + offset).unwrap_or(0)
}

/// Bind a listener for a delivery, falling back to an ephemeral port
pub async fn bind_listener(host: IpAddr, preferred: u16, taken: &HashSet<u16>) -> std::io::Result<TcpListener> {
    if preferred != 0 && !taken.contains(&preferred) {
        match TcpListener::bind(SocketAddr::new(host, preferred)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                tracing::warn!(port = preferred, error = %e, "Preferred port unavailable, using ephemeral port");
            }
        }
    } else if preferred != 0 {
        tracing::info!(port = preferred, "Preferred port held by another delivery, using ephemeral port");
    }

    TcpListener::bind(SocketAddr::new(host, 0)).await
}

/// Address delivery endpoints listen on
pub fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
