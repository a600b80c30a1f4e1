//! The seam towards the host tunneling subsystem.
//!
//! The native provider hands out two paired handles: an adapter (the virtual
//! interface instance) and a session (the packet ring attached to it). This
//! module describes that contract as traits so the device logic stays
//! independent of the concrete provider; [`wintun`] implements it for the
//! Wintun driver on Windows, and the device tests implement it in memory.
//!
//! All operations report native failures as `io::Error`. The one condition
//! that is not an error is an empty receive ring, which `try_receive` models
//! as `Ok(None)`.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};

#[cfg(windows)]
pub mod wintun;

/// A created virtual interface instance.
pub trait Adapter {
    /// Stable low-level identifier of the interface, used for address
    /// configuration.
    fn luid(&self) -> u64;

    /// Releases the adapter. Called exactly once by the owning device, after
    /// the session has ended.
    fn close(&mut self);
}

/// An open packet ring on an adapter.
pub trait Session {
    /// Borrowed view of a packet sitting in the native receive ring.
    /// Dropping it releases the ring slot, exactly once.
    type Recv<'a>: AsRef<[u8]>
    where
        Self: 'a;

    /// A native send buffer; handed back to the ring by [`Session::send`].
    type Send<'a>: AsMut<[u8]>
    where
        Self: 'a;

    /// Pulls the next inbound packet. `Ok(None)` means the ring is currently
    /// empty and the caller should wait for readiness before retrying.
    fn try_receive(&self) -> io::Result<Option<Self::Recv<'_>>>;

    /// Blocks until the session's read-readiness signal fires. No timeout.
    fn wait_read_ready(&self) -> io::Result<()>;

    /// Requests a send buffer of `len` bytes from the ring.
    fn allocate_send(&self, len: usize) -> io::Result<Self::Send<'_>>;

    /// Hands a filled send buffer to the ring for transmission.
    fn send(&self, buf: Self::Send<'_>) -> io::Result<()>;

    /// Ends the session. Called exactly once by the owning device.
    fn end(&mut self);
}

/// Factory for adapter/session pairs.
pub trait Backend {
    type Adapter: Adapter;
    type Session: Session;

    fn create_adapter(&self, name: &str) -> io::Result<Self::Adapter>;

    fn start_session(
        &self,
        adapter: &Self::Adapter,
        ring_capacity: u32,
    ) -> io::Result<Self::Session>;
}

/// Applies IP addresses to an interface through the OS network stack.
///
/// External collaborator: failures from this path surface to the caller but
/// never touch device state.
pub trait AddressConfigurator {
    fn set_ipv4(&self, luid: u64, address: Ipv4Addr, prefix_len: u8) -> io::Result<()>;

    fn set_ipv6(&self, luid: u64, address: Ipv6Addr, prefix_len: u8) -> io::Result<()>;
}
