//! Local port allocation for the sandbox.
//!
//! # Responsibilities
//! - Find a free TCP port on the sandbox host
//! - Never hand out a port this process already listens on or handed out
//!
//! # Design Decisions
//! - Find a port by binding port 0 and reading the assigned port back
//! - The temporary listener is dropped before returning; the sandbox binds the
//!   port itself moments later

use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::sync::{Mutex, PoisonError};

const MAX_ATTEMPTS: usize = 16;

/// Supplies free local ports.
pub trait PortAllocator: Send + Sync {
    fn free_port(&self) -> io::Result<u16>;
}

/// Allocates ports by probing the OS.
#[derive(Debug)]
pub struct LocalPortAllocator {
    host: IpAddr,
    reserved: Mutex<HashSet<u16>>,
}

impl LocalPortAllocator {
    pub fn new(host: IpAddr) -> Self {
        Self {
            host,
            reserved: Mutex::new(HashSet::new()),
        }
    }

    /// Record a port used by one of this process's own listeners.
    pub fn reserve(&self, port: u16) {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(port);
    }

    pub fn is_reserved(&self, port: u16) -> bool {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&port)
    }
}

impl Default for LocalPortAllocator {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

impl PortAllocator for LocalPortAllocator {
    fn free_port(&self) -> io::Result<u16> {
        for _ in 0..MAX_ATTEMPTS {
            let listener = TcpListener::bind(SocketAddr::new(self.host, 0))?;
            let port = listener.local_addr()?.port();
            drop(listener);

            let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
            if reserved.insert(port) {
                tracing::debug!(host = %self.host, port, "Allocated sandbox port");
                return Ok(port);
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("no free port found on {} after {} attempts", self.host, MAX_ATTEMPTS),
        ))
    }
}
