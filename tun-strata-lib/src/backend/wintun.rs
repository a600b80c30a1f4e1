//! Wintun-backed provider (Windows only).
//!
//! Maps the [`Backend`]/[`Session`] seam onto the `wintun` crate: adapter
//! creation, a ring session, packet receive/release and send-buffer
//! allocation. The readiness wait goes through `WaitForSingleObject` on the
//! session's read-wait event with an infinite timeout, which is what turns
//! the device's poll loop into a blocking read.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use tracing::warn;
use windows_sys::Win32::Foundation::{NO_ERROR, WAIT_OBJECT_0};
use windows_sys::Win32::NetworkManagement::IpHelper::{
    CreateUnicastIpAddressEntry, InitializeUnicastIpAddressEntry, MIB_UNICASTIPADDRESS_ROW,
};
use windows_sys::Win32::Networking::WinSock::{IpDadStatePreferred, AF_INET, AF_INET6};
use windows_sys::Win32::System::Threading::{WaitForSingleObject, INFINITE};

use super::{Adapter, AddressConfigurator, Backend, Session};

/// Tunnel type string registered with the driver for all adapters we create.
const TUNNEL_TYPE: &str = "tun-strata";

/// Handle to the loaded `wintun.dll`.
pub struct WintunBackend {
    wintun: wintun::Wintun,
}

impl WintunBackend {
    /// Loads `wintun.dll` from the default search path.
    ///
    /// # Safety notes
    ///
    /// Library loading is inherently trusting of the DLL found first on the
    /// search path; deploy the signed driver DLL next to the executable.
    pub fn load() -> io::Result<Self> {
        let wintun = unsafe { wintun::load() }.map_err(io::Error::other)?;
        Ok(Self { wintun })
    }
}

impl Backend for WintunBackend {
    type Adapter = WintunAdapter;
    type Session = WintunSession;

    fn create_adapter(&self, name: &str) -> io::Result<WintunAdapter> {
        let adapter = wintun::Adapter::create(&self.wintun, name, TUNNEL_TYPE, None)
            .map_err(io::Error::other)?;
        Ok(WintunAdapter {
            adapter: Some(adapter),
        })
    }

    fn start_session(
        &self,
        adapter: &WintunAdapter,
        ring_capacity: u32,
    ) -> io::Result<WintunSession> {
        let adapter = adapter
            .adapter
            .as_ref()
            .ok_or_else(|| io::Error::other("adapter already closed"))?;
        let session = adapter
            .start_session(ring_capacity)
            .map_err(io::Error::other)?;
        Ok(WintunSession {
            session: Some(Arc::new(session)),
        })
    }
}

pub struct WintunAdapter {
    adapter: Option<Arc<wintun::Adapter>>,
}

impl Adapter for WintunAdapter {
    fn luid(&self) -> u64 {
        match self.adapter.as_ref() {
            Some(adapter) => unsafe { adapter.get_luid().Value },
            None => 0,
        }
    }

    fn close(&mut self) {
        // dropping the handle closes the adapter in the driver
        self.adapter.take();
    }
}

pub struct WintunSession {
    session: Option<Arc<wintun::Session>>,
}

impl WintunSession {
    // receive/allocate need the Arc receiver so ring packets can hold the
    // session alive until they are released
    fn session(&self) -> io::Result<&Arc<wintun::Session>> {
        self.session
            .as_ref()
            .ok_or_else(|| io::Error::other("session already ended"))
    }
}

/// A packet borrowed from the receive ring; the slot is released on drop.
pub struct RecvPacket(wintun::Packet);

impl AsRef<[u8]> for RecvPacket {
    fn as_ref(&self) -> &[u8] {
        self.0.bytes()
    }
}

/// A send-ring buffer, consumed by [`Session::send`].
pub struct SendPacket(wintun::Packet);

impl AsMut<[u8]> for SendPacket {
    fn as_mut(&mut self) -> &mut [u8] {
        self.0.bytes_mut()
    }
}

impl Session for WintunSession {
    type Recv<'a> = RecvPacket where Self: 'a;
    type Send<'a> = SendPacket where Self: 'a;

    fn try_receive(&self) -> io::Result<Option<RecvPacket>> {
        match self.session()?.try_receive() {
            Ok(Some(packet)) => Ok(Some(RecvPacket(packet))),
            Ok(None) => Ok(None),
            Err(e) => Err(io::Error::other(e)),
        }
    }

    fn wait_read_ready(&self) -> io::Result<()> {
        let event = self
            .session()?
            .get_read_wait_event()
            .map_err(io::Error::other)?;
        let rc = unsafe { WaitForSingleObject(event, INFINITE) };
        if rc == WAIT_OBJECT_0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn allocate_send(&self, len: usize) -> io::Result<SendPacket> {
        let len = u16::try_from(len)
            .map_err(|_| io::Error::other(format!("packet of {len} bytes exceeds 65535")))?;
        self.session()?
            .allocate_send_packet(len)
            .map(SendPacket)
            .map_err(io::Error::other)
    }

    fn send(&self, buf: SendPacket) -> io::Result<()> {
        self.session()?.send_packet(buf.0);
        Ok(())
    }

    fn end(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(error) = session.shutdown() {
                warn!(%error, "wintun session shutdown failed");
            }
        }
    }
}

/// Applies addresses through the IP Helper API
/// (`CreateUnicastIpAddressEntry`).
#[derive(Debug, Default, Clone, Copy)]
pub struct IpHelperConfigurator;

impl IpHelperConfigurator {
    fn create_entry(row: &MIB_UNICASTIPADDRESS_ROW) -> io::Result<()> {
        let status = unsafe { CreateUnicastIpAddressEntry(row) };
        if status == NO_ERROR {
            Ok(())
        } else {
            Err(io::Error::from_raw_os_error(status as i32))
        }
    }

    fn blank_row(luid: u64, prefix_len: u8) -> MIB_UNICASTIPADDRESS_ROW {
        let mut row: MIB_UNICASTIPADDRESS_ROW = unsafe { std::mem::zeroed() };
        unsafe { InitializeUnicastIpAddressEntry(&mut row) };
        row.InterfaceLuid.Value = luid;
        row.OnLinkPrefixLength = prefix_len;
        row.DadState = IpDadStatePreferred;
        row
    }
}

impl AddressConfigurator for IpHelperConfigurator {
    fn set_ipv4(&self, luid: u64, address: Ipv4Addr, prefix_len: u8) -> io::Result<()> {
        let mut row = Self::blank_row(luid, prefix_len);
        row.Address.Ipv4.sin_family = AF_INET;
        row.Address.Ipv4.sin_addr.S_un.S_addr = u32::from(address).to_be();
        Self::create_entry(&row)
    }

    fn set_ipv6(&self, luid: u64, address: Ipv6Addr, prefix_len: u8) -> io::Result<()> {
        let mut row = Self::blank_row(luid, prefix_len);
        row.Address.Ipv6.sin6_family = AF_INET6;
        row.Address.Ipv6.sin6_addr.u.Byte = address.octets();
        Self::create_entry(&row)
    }
}
