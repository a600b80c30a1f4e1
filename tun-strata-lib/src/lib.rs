//! TUN device abstraction with structured IP packet views.
//!
//! The crate is split along the kernel boundary:
//!
//! - [`packet`] interprets raw byte buffers as IPv4/IPv6 packets with
//!   zero-copy header overlays and cached derived fields.
//! - [`backend`] is the seam towards the host tunneling subsystem
//!   (adapter/session handles, receive ring, readiness event). A Wintun
//!   implementation is provided on Windows; tests ship their own double.
//! - [`device`] composes the two: it owns one adapter/session pair and moves
//!   whole packets across the boundary, absorbing the "ring currently empty"
//!   condition into a wait-and-retry loop.
//! - [`alloc`] supplies the buffers that read results are copied into.
//!
//! ```no_run
//! # #[cfg(windows)] {
//! use tun_strata::alloc::HeapAllocator;
//! use tun_strata::backend::wintun::WintunBackend;
//! use tun_strata::device::TunDevice;
//!
//! let backend = WintunBackend::load()?;
//! let mut device = TunDevice::open(&backend, "tun0")?;
//! let packet = device.read_packet(&HeapAllocator)?;
//! println!("{packet}");
//! # }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod alloc;
pub mod backend;
pub mod device;
pub mod packet;

pub use device::{DeviceError, TunDevice, RING_CAPACITY};
pub use packet::{PacketError, TunPacket};
