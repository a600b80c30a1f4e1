//! The TUN device: one adapter/session pair plus the packet-movement
//! protocol.
//!
//! A [`TunDevice`] exclusively owns its handles. Opening either yields a
//! fully valid pair or cleans up whatever was acquired; closing is an
//! idempotent state transition that ends the session before the adapter,
//! reversing acquisition order.
//!
//! Reads run an ATTEMPT/WAIT loop: poll the ring, and when it is empty block
//! on the readiness signal and poll again. That wait is the only unbounded
//! suspension point in the crate; every other native failure surfaces
//! immediately. The device does no internal locking, so a single reader and
//! a single writer at a time is the caller's job (the `&mut self` receivers
//! enforce it within one device handle).

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;
use tracing::{debug, info};

use crate::alloc::BufferAllocator;
use crate::backend::{Adapter, AddressConfigurator, Backend, Session};
use crate::packet::{PacketError, TunPacket};

/// Ring capacity requested from the native provider, in bytes (4 MiB).
pub const RING_CAPACITY: u32 = 0x40_0000;

#[derive(Debug, Error)]
pub enum DeviceError {
    /// Adapter or session acquisition failed. Anything partially acquired
    /// was released before this surfaced.
    #[error("failed to open tun device")]
    Open(#[source] io::Error),
    /// Operation attempted after close; no native call was issued.
    #[error("device is closed")]
    Closed,
    /// A native call failed for a reason other than "ring empty".
    #[error("tun device i/o failed")]
    Io(#[source] io::Error),
    /// An inbound buffer was too short for its IP version.
    #[error(transparent)]
    Packet(#[from] PacketError),
}

/// An open virtual network interface.
pub struct TunDevice<B: Backend> {
    adapter: Option<B::Adapter>,
    session: Option<B::Session>,
    name: String,
    closed: bool,
}

impl<B: Backend> TunDevice<B> {
    /// Creates an adapter and starts a session on it.
    ///
    /// If the session fails to start, the adapter is closed before the error
    /// surfaces; a failed open leaves nothing allocated.
    pub fn open(backend: &B, name: &str) -> Result<Self, DeviceError> {
        let mut adapter = backend.create_adapter(name).map_err(DeviceError::Open)?;
        let session = match backend.start_session(&adapter, RING_CAPACITY) {
            Ok(session) => session,
            Err(e) => {
                adapter.close();
                return Err(DeviceError::Open(e));
            }
        };
        info!(name, "opened tun device");
        Ok(Self {
            adapter: Some(adapter),
            session: Some(session),
            name: name.to_owned(),
            closed: false,
        })
    }

    /// Interface name, stable for the device's lifetime.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn session(&self) -> Result<&B::Session, DeviceError> {
        if self.closed {
            return Err(DeviceError::Closed);
        }
        self.session.as_ref().ok_or(DeviceError::Closed)
    }

    fn adapter(&self) -> Result<&B::Adapter, DeviceError> {
        if self.closed {
            return Err(DeviceError::Closed);
        }
        self.adapter.as_ref().ok_or(DeviceError::Closed)
    }

    /// Blocks until the next inbound packet arrives and returns it as an
    /// owned view, independent of the native ring.
    ///
    /// The packet's bytes are copied into a buffer of exactly the received
    /// size obtained from `alloc`; the ring slot is released before the view
    /// is built. An empty ring is absorbed into a wait-then-retry cycle; any
    /// other native failure propagates as [`DeviceError::Io`].
    pub fn read_packet<A: BufferAllocator>(&mut self, alloc: &A) -> Result<TunPacket, DeviceError> {
        let session = self.session()?;
        loop {
            match session.try_receive().map_err(DeviceError::Io)? {
                Some(native) => {
                    let raw = native.as_ref();
                    let mut buf = alloc.allocate(raw.len());
                    buf.copy_from_slice(raw);
                    // hand the ring slot back before interpreting the copy
                    drop(native);
                    return Ok(TunPacket::from_bytes(buf)?);
                }
                None => session.wait_read_ready().map_err(DeviceError::Io)?,
            }
        }
    }

    /// Sends one packet: allocates a native send buffer of the packet's
    /// length, copies the bytes in, and hands the buffer to the ring.
    ///
    /// No retry on this path; allocation failure is fatal for the call. The
    /// copy is guarded by a length check in case the provider returns a
    /// shorter buffer than requested.
    pub fn write_packet(&mut self, packet: &TunPacket) -> Result<(), DeviceError> {
        let session = self.session()?;
        let bytes = packet.as_bytes();
        let mut native = session
            .allocate_send(bytes.len())
            .map_err(DeviceError::Io)?;
        let dst = native.as_mut();
        if dst.len() < bytes.len() {
            return Err(DeviceError::Io(io::Error::other(format!(
                "send buffer has {} bytes, packet needs {}",
                dst.len(),
                bytes.len()
            ))));
        }
        dst[..bytes.len()].copy_from_slice(bytes);
        session.send(native).map_err(DeviceError::Io)
    }

    /// Tears the device down: session first, then adapter, then marks the
    /// device closed so later reads and writes fail fast. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(mut session) = self.session.take() {
            session.end();
        }
        if let Some(mut adapter) = self.adapter.take() {
            adapter.close();
        }
        debug!(name = %self.name, "closed tun device");
    }

    /// Applies an IPv4 address and prefix to the interface through the given
    /// configurator. Returns the device for chaining.
    pub fn set_ipv4_address<C: AddressConfigurator>(
        &mut self,
        configurator: &C,
        address: Ipv4Addr,
        prefix_len: u8,
    ) -> Result<&mut Self, DeviceError> {
        let luid = self.adapter()?.luid();
        configurator
            .set_ipv4(luid, address, prefix_len)
            .map_err(DeviceError::Io)?;
        Ok(self)
    }

    /// Applies an IPv6 address and prefix to the interface through the given
    /// configurator. Returns the device for chaining.
    pub fn set_ipv6_address<C: AddressConfigurator>(
        &mut self,
        configurator: &C,
        address: Ipv6Addr,
        prefix_len: u8,
    ) -> Result<&mut Self, DeviceError> {
        let luid = self.adapter()?.luid();
        configurator
            .set_ipv6(luid, address, prefix_len)
            .map_err(DeviceError::Io)?;
        Ok(self)
    }
}

impl<B: Backend> Drop for TunDevice<B> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<B: Backend> fmt::Debug for TunDevice<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunDevice")
            .field("name", &self.name)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::HeapAllocator;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// State shared between the mock backend, its handles, and the test.
    #[derive(Default)]
    struct Shared {
        inbound: RefCell<VecDeque<Vec<u8>>>,
        sent: RefCell<Vec<Vec<u8>>>,
        /// Report an empty ring this many times before yielding data.
        empty_polls: Cell<u32>,
        receive_calls: Cell<u32>,
        waits: Cell<u32>,
        releases: Cell<u32>,
        alloc_calls: Cell<u32>,
        fail_receive: Cell<bool>,
        fail_session_start: Cell<bool>,
        /// Sent packets reappear on the inbound queue.
        loopback: Cell<bool>,
        events: RefCell<Vec<&'static str>>,
    }

    struct MockAdapter {
        shared: Rc<Shared>,
    }

    impl Adapter for MockAdapter {
        fn luid(&self) -> u64 {
            0x1122_3344
        }

        fn close(&mut self) {
            self.shared.events.borrow_mut().push("adapter_close");
        }
    }

    struct MockRecv<'a> {
        data: Vec<u8>,
        shared: &'a Shared,
    }

    impl AsRef<[u8]> for MockRecv<'_> {
        fn as_ref(&self) -> &[u8] {
            &self.data
        }
    }

    impl Drop for MockRecv<'_> {
        fn drop(&mut self) {
            self.shared.releases.set(self.shared.releases.get() + 1);
        }
    }

    struct MockSend {
        data: Vec<u8>,
    }

    impl AsMut<[u8]> for MockSend {
        fn as_mut(&mut self) -> &mut [u8] {
            &mut self.data
        }
    }

    struct MockSession {
        shared: Rc<Shared>,
    }

    impl Session for MockSession {
        type Recv<'a> = MockRecv<'a> where Self: 'a;
        type Send<'a> = MockSend where Self: 'a;

        fn try_receive(&self) -> io::Result<Option<MockRecv<'_>>> {
            self.shared
                .receive_calls
                .set(self.shared.receive_calls.get() + 1);
            if self.shared.fail_receive.get() {
                return Err(io::Error::other("receive ring failure"));
            }
            if self.shared.empty_polls.get() > 0 {
                self.shared.empty_polls.set(self.shared.empty_polls.get() - 1);
                return Ok(None);
            }
            Ok(self
                .shared
                .inbound
                .borrow_mut()
                .pop_front()
                .map(|data| MockRecv {
                    data,
                    shared: self.shared.as_ref(),
                }))
        }

        fn wait_read_ready(&self) -> io::Result<()> {
            self.shared.waits.set(self.shared.waits.get() + 1);
            if self.shared.empty_polls.get() == 0 && self.shared.inbound.borrow().is_empty() {
                // the real signal would block forever here; fail instead so a
                // buggy loop cannot hang the test suite
                return Err(io::Error::other("nothing will ever arrive"));
            }
            Ok(())
        }

        fn allocate_send(&self, len: usize) -> io::Result<MockSend> {
            self.shared.alloc_calls.set(self.shared.alloc_calls.get() + 1);
            Ok(MockSend { data: vec![0; len] })
        }

        fn send(&self, buf: MockSend) -> io::Result<()> {
            if self.shared.loopback.get() {
                self.shared.inbound.borrow_mut().push_back(buf.data.clone());
            }
            self.shared.sent.borrow_mut().push(buf.data);
            Ok(())
        }

        fn end(&mut self) {
            self.shared.events.borrow_mut().push("session_end");
        }
    }

    struct MockBackend {
        shared: Rc<Shared>,
    }

    impl MockBackend {
        fn new() -> (Self, Rc<Shared>) {
            let shared = Rc::new(Shared::default());
            (
                Self {
                    shared: shared.clone(),
                },
                shared,
            )
        }
    }

    impl Backend for MockBackend {
        type Adapter = MockAdapter;
        type Session = MockSession;

        fn create_adapter(&self, _name: &str) -> io::Result<MockAdapter> {
            Ok(MockAdapter {
                shared: self.shared.clone(),
            })
        }

        fn start_session(
            &self,
            _adapter: &MockAdapter,
            ring_capacity: u32,
        ) -> io::Result<MockSession> {
            assert_eq!(ring_capacity, RING_CAPACITY);
            if self.shared.fail_session_start.get() {
                return Err(io::Error::other("driver rejected the ring"));
            }
            Ok(MockSession {
                shared: self.shared.clone(),
            })
        }
    }

    fn ipv4_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(0x45);
        buf.push(0x00);
        buf.extend_from_slice(&[0x00, 0x14]); // total length 20
        buf.extend_from_slice(&[0x00, 0x01]); // identification
        buf.extend_from_slice(&[0x40, 0x00]); // DF
        buf.push(64); // TTL
        buf.push(6); // TCP
        buf.extend_from_slice(&[0x00, 0x00]);
        buf.extend_from_slice(&[10, 0, 0, 1]);
        buf.extend_from_slice(&[10, 0, 0, 2]);
        buf
    }

    fn ipv6_bytes() -> Vec<u8> {
        let mut buf = vec![0u8; 40];
        buf[0] = 0x60;
        buf[6] = 58; // ICMPv6
        buf[7] = 64;
        buf[23] = 1; // src ::1
        buf[39] = 2; // dst ::2
        buf
    }

    #[test]
    fn open_exposes_the_interface_name() {
        let (backend, _shared) = MockBackend::new();
        let device = TunDevice::open(&backend, "tun0").unwrap();
        assert_eq!(device.name(), "tun0");
    }

    #[test]
    fn failed_session_start_closes_the_adapter() {
        let (backend, shared) = MockBackend::new();
        shared.fail_session_start.set(true);
        let err = TunDevice::open(&backend, "tun0").unwrap_err();
        assert!(matches!(err, DeviceError::Open(_)));
        // adapter released, session never ended because it never started
        assert_eq!(*shared.events.borrow(), vec!["adapter_close"]);
    }

    #[test]
    fn close_tears_down_session_before_adapter() {
        let (backend, shared) = MockBackend::new();
        let mut device = TunDevice::open(&backend, "tun0").unwrap();
        device.close();
        assert_eq!(*shared.events.borrow(), vec!["session_end", "adapter_close"]);
    }

    #[test]
    fn close_is_idempotent() {
        let (backend, shared) = MockBackend::new();
        let mut device = TunDevice::open(&backend, "tun0").unwrap();
        device.close();
        device.close();
        device.close();
        assert_eq!(*shared.events.borrow(), vec!["session_end", "adapter_close"]);
    }

    #[test]
    fn drop_closes_the_device_once() {
        let (backend, shared) = MockBackend::new();
        {
            let mut device = TunDevice::open(&backend, "tun0").unwrap();
            device.close();
        } // drop runs here, after an explicit close
        assert_eq!(*shared.events.borrow(), vec!["session_end", "adapter_close"]);
    }

    #[test]
    fn read_on_closed_device_fails_without_native_calls() {
        let (backend, shared) = MockBackend::new();
        let mut device = TunDevice::open(&backend, "tun0").unwrap();
        device.close();
        let err = device.read_packet(&HeapAllocator).unwrap_err();
        assert!(matches!(err, DeviceError::Closed));
        assert_eq!(shared.receive_calls.get(), 0);
    }

    #[test]
    fn write_on_closed_device_fails_without_native_calls() {
        let (backend, shared) = MockBackend::new();
        let mut device = TunDevice::open(&backend, "tun0").unwrap();
        device.close();
        let packet = TunPacket::from_bytes(ipv4_bytes()).unwrap();
        let err = device.write_packet(&packet).unwrap_err();
        assert!(matches!(err, DeviceError::Closed));
        assert_eq!(shared.alloc_calls.get(), 0);
        assert!(shared.sent.borrow().is_empty());
    }

    #[test]
    fn read_returns_an_owned_copy_and_releases_the_ring_slot() {
        let (backend, shared) = MockBackend::new();
        shared.inbound.borrow_mut().push_back(ipv4_bytes());
        let mut device = TunDevice::open(&backend, "tun0").unwrap();
        let packet = device.read_packet(&HeapAllocator).unwrap();
        assert_eq!(packet.as_bytes(), ipv4_bytes().as_slice());
        assert_eq!(shared.releases.get(), 1);
        assert_eq!(shared.waits.get(), 0);
    }

    #[test]
    fn read_waits_once_per_empty_poll() {
        let (backend, shared) = MockBackend::new();
        shared.empty_polls.set(3);
        shared.inbound.borrow_mut().push_back(ipv4_bytes());
        let mut device = TunDevice::open(&backend, "tun0").unwrap();
        let packet = device.read_packet(&HeapAllocator).unwrap();
        assert!(matches!(packet, TunPacket::Ipv4(_)));
        assert_eq!(shared.waits.get(), 3);
        assert_eq!(shared.receive_calls.get(), 4);
        assert_eq!(shared.releases.get(), 1);
    }

    #[test]
    fn read_propagates_ring_errors_without_retrying() {
        let (backend, shared) = MockBackend::new();
        shared.fail_receive.set(true);
        let mut device = TunDevice::open(&backend, "tun0").unwrap();
        let err = device.read_packet(&HeapAllocator).unwrap_err();
        assert!(matches!(err, DeviceError::Io(_)));
        assert_eq!(shared.receive_calls.get(), 1);
        assert_eq!(shared.waits.get(), 0);
    }

    #[test]
    fn read_dispatches_on_the_version_nibble() {
        let (backend, shared) = MockBackend::new();
        shared.inbound.borrow_mut().push_back(ipv6_bytes());
        let mut device = TunDevice::open(&backend, "tun0").unwrap();
        let packet = device.read_packet(&HeapAllocator).unwrap();
        assert!(matches!(packet, TunPacket::Ipv6(_)));
        assert_eq!(packet.version(), 6);
    }

    #[test]
    fn read_surfaces_truncated_inbound_packets() {
        let (backend, shared) = MockBackend::new();
        shared.inbound.borrow_mut().push_back(vec![0x45, 0x00, 0x00]);
        let mut device = TunDevice::open(&backend, "tun0").unwrap();
        let err = device.read_packet(&HeapAllocator).unwrap_err();
        assert!(matches!(err, DeviceError::Packet(_)));
        // the ring slot was still released
        assert_eq!(shared.releases.get(), 1);
    }

    #[test]
    fn write_hands_exact_bytes_to_the_session() {
        let (backend, shared) = MockBackend::new();
        let mut device = TunDevice::open(&backend, "tun0").unwrap();
        let bytes = ipv4_bytes();
        let packet = TunPacket::from_bytes(bytes.clone()).unwrap();
        device.write_packet(&packet).unwrap();
        assert_eq!(*shared.sent.borrow(), vec![bytes]);
    }

    #[test]
    fn loopback_round_trip_preserves_every_header_field() {
        let (backend, shared) = MockBackend::new();
        shared.loopback.set(true);
        let mut device = TunDevice::open(&backend, "tun0").unwrap();

        let original = TunPacket::from_bytes(ipv4_bytes()).unwrap();
        device.write_packet(&original).unwrap();
        let echoed = device.read_packet(&HeapAllocator).unwrap();

        assert_eq!(echoed.as_bytes(), original.as_bytes());
        let (TunPacket::Ipv4(sent), TunPacket::Ipv4(back)) = (&original, &echoed) else {
            panic!("expected IPv4 on both sides");
        };
        assert_eq!(back.version(), sent.version());
        assert_eq!(back.identification(), sent.identification());
        assert_eq!(back.total_length(), sent.total_length());
        assert_eq!(back.time_to_live(), sent.time_to_live());
        assert_eq!(back.protocol(), sent.protocol());
        assert_eq!(back.source_address(), sent.source_address());
        assert_eq!(back.destination_address(), sent.destination_address());
    }

    struct RecordingConfigurator {
        calls: RefCell<Vec<(u64, String, u8)>>,
    }

    impl AddressConfigurator for RecordingConfigurator {
        fn set_ipv4(&self, luid: u64, address: Ipv4Addr, prefix_len: u8) -> io::Result<()> {
            self.calls
                .borrow_mut()
                .push((luid, address.to_string(), prefix_len));
            Ok(())
        }

        fn set_ipv6(&self, luid: u64, address: Ipv6Addr, prefix_len: u8) -> io::Result<()> {
            self.calls
                .borrow_mut()
                .push((luid, address.to_string(), prefix_len));
            Ok(())
        }
    }

    #[test]
    fn address_configuration_passes_the_adapter_luid_and_chains() {
        let (backend, _shared) = MockBackend::new();
        let mut device = TunDevice::open(&backend, "tun0").unwrap();
        let configurator = RecordingConfigurator {
            calls: RefCell::new(Vec::new()),
        };
        device
            .set_ipv4_address(&configurator, Ipv4Addr::new(10, 0, 0, 1), 24)
            .unwrap()
            .set_ipv6_address(&configurator, "fd00::1".parse().unwrap(), 64)
            .unwrap();
        assert_eq!(
            *configurator.calls.borrow(),
            vec![
                (0x1122_3344, "10.0.0.1".to_string(), 24),
                (0x1122_3344, "fd00::1".to_string(), 64),
            ]
        );
    }

    #[test]
    fn address_configuration_fails_after_close() {
        let (backend, _shared) = MockBackend::new();
        let mut device = TunDevice::open(&backend, "tun0").unwrap();
        device.close();
        let configurator = RecordingConfigurator {
            calls: RefCell::new(Vec::new()),
        };
        let err = device
            .set_ipv4_address(&configurator, Ipv4Addr::new(10, 0, 0, 1), 24)
            .unwrap_err();
        assert!(matches!(err, DeviceError::Closed));
        assert!(configurator.calls.borrow().is_empty());
    }
}
