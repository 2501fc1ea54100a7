// ============================================
// File: crates/overlan-transport/src/device/linux.rs
// ============================================
//! # Linux TAP Device
//!
//! ## Creation Reason
//! Points joined to a kernel bridge need a real Ethernet interface. A TAP
//! device from `/dev/net/tun` is enslaved to the bridge with `ip link`.
//!
//! ## Linux TAP Interface
//! 1. Open `/dev/net/tun`
//! 2. `TUNSETIFF` with `IFF_TAP | IFF_NO_PI`; an empty name lets the
//!    kernel pick `tapN`
//! 3. Switch the descriptor to non-blocking and hand it to `AsyncFd`
//!
//! ## Required Capabilities
//! - `CAP_NET_ADMIN`, or run as root
//!
//! ## ⚠️ Important Note for Next Developer
//! - The interface disappears when its descriptor is closed; `up()` after
//!   `close()` creates it again under the same name
//! - Readers hold a clone of the descriptor; `close()` wakes them through
//!   the `closed` notifier
//!
//! ## Last Modified
//! v0.1.0 - Initial TAP implementation

#![cfg(target_os = "linux")]

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use nix::libc;
use parking_lot::Mutex;
use tokio::io::unix::AsyncFd;
use tokio::sync::Notify;
use tracing::{debug, info};

use super::{DeviceProvider, DeviceRegistry, DeviceStatus, VirtualDevice};
use crate::bridge::Bridge;
use crate::error::{Result, TransportError};
use crate::ip;

// ============================================
// Constants
// ============================================

/// Path to the TUN/TAP clone device.
const TUN_DEVICE_PATH: &str = "/dev/net/tun";

/// IFF_TAP flag - Ethernet frames.
const IFF_TAP: libc::c_short = 0x0002;

/// IFF_NO_PI flag - Do not provide packet information.
const IFF_NO_PI: libc::c_short = 0x1000;

/// TUNSETIFF ioctl number.
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;

// ============================================
// ifreq Structure
// ============================================

#[repr(C)]
struct IfReq {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_flags: libc::c_short,
    _padding: [u8; 22],
}

impl IfReq {
    fn tap(name: &str) -> Self {
        let mut ifr = Self {
            ifr_name: [0; libc::IFNAMSIZ],
            ifr_flags: IFF_TAP | IFF_NO_PI,
            _padding: [0; 22],
        };
        for (slot, &byte) in ifr
            .ifr_name
            .iter_mut()
            .zip(name.as_bytes().iter().take(libc::IFNAMSIZ - 1))
        {
            *slot = byte as libc::c_char;
        }
        ifr
    }

    fn name(&self) -> String {
        let bytes: Vec<u8> = self
            .ifr_name
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Creates (or re-creates) a TAP interface, returning the descriptor and
/// the name the kernel assigned.
fn open_tap(name: &str) -> std::io::Result<(AsyncFd<File>, String)> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(TUN_DEVICE_PATH)?;
    let fd = file.as_raw_fd();

    let mut ifr = IfReq::tap(name);
    // SAFETY: fd is open for the lifetime of `file`; ifr is a valid ifreq.
    if unsafe { libc::ioctl(fd, TUNSETIFF as _, &mut ifr) } < 0 {
        return Err(std::io::Error::last_os_error());
    }

    // SAFETY: plain fcntl calls on an owned descriptor.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 || unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(std::io::Error::last_os_error());
    }

    Ok((AsyncFd::new(file)?, ifr.name()))
}

// ============================================
// KernelTap
// ============================================

struct TapState {
    fd: Option<Arc<AsyncFd<File>>>,
    status: DeviceStatus,
    mtu: u16,
    master: Option<Weak<dyn Bridge>>,
}

/// A kernel TAP interface.
pub struct KernelTap {
    name: String,
    tenant: String,
    me: Weak<KernelTap>,
    registry: Arc<DeviceRegistry>,
    state: Mutex<TapState>,
    closed: Notify,
}

impl KernelTap {
    fn fd(&self) -> Result<Arc<AsyncFd<File>>> {
        self.state
            .lock()
            .fd
            .clone()
            .ok_or_else(|| TransportError::device_closed(&self.name))
    }
}

#[async_trait]
impl VirtualDevice for KernelTap {
    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let closed = self.closed.notified();
        tokio::pin!(closed);
        closed.as_mut().enable();

        let fd = self.fd()?;
        loop {
            let mut guard = tokio::select! {
                ready = fd.readable() => ready.map_err(|e| TransportError::DeviceReadFailed {
                    name: self.name.clone(),
                    reason: e.to_string(),
                })?,
                () = &mut closed => return Err(TransportError::device_closed(&self.name)),
            };

            match guard.try_io(|inner| {
                let mut file: &File = inner.get_ref();
                file.read(buf)
            }) {
                Ok(Ok(n)) => return Ok(n),
                Ok(Err(e)) => {
                    return Err(TransportError::DeviceReadFailed {
                        name: self.name.clone(),
                        reason: e.to_string(),
                    })
                }
                Err(_would_block) => continue,
            }
        }
    }

    async fn write(&self, frame: &[u8]) -> Result<usize> {
        let fd = self.fd()?;
        loop {
            let mut guard = fd.writable().await.map_err(|e| TransportError::DeviceWriteFailed {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;

            match guard.try_io(|inner| {
                let mut file: &File = inner.get_ref();
                file.write(frame)
            }) {
                Ok(Ok(n)) => return Ok(n),
                Ok(Err(e)) => {
                    return Err(TransportError::DeviceWriteFailed {
                        name: self.name.clone(),
                        reason: e.to_string(),
                    })
                }
                Err(_would_block) => continue,
            }
        }
    }

    fn close(&self) -> Result<()> {
        let master = {
            let mut state = self.state.lock();
            if state.status == DeviceStatus::Closed {
                return Ok(());
            }
            state.status = DeviceStatus::Closed;
            state.fd = None;
            self.registry.remove(&self.name);
            state.master.take().and_then(|b| b.upgrade())
        };
        self.closed.notify_waiters();

        if let Some(bridge) = master {
            bridge.del_slave(&self.name)?;
        }
        info!(device = %self.name, tenant = %self.tenant, "TAP device closed");
        Ok(())
    }

    fn up(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.status == DeviceStatus::Closed {
                let (fd, _) = open_tap(&self.name)
                    .map_err(|e| TransportError::device_create_failed(&self.tenant, e))?;
                state.fd = Some(Arc::new(fd));
                if let Some(me) = self.me.upgrade() {
                    self.registry.add(me);
                }
                debug!(device = %self.name, "TAP device reopened");
            }
            state.status = DeviceStatus::Up;
        }
        ip::run(&["link", "set", "dev", &self.name, "up"])
            .map_err(|e| TransportError::device_config_failed(&self.name, e))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn tenant(&self) -> &str {
        &self.tenant
    }

    fn mtu(&self) -> u16 {
        self.state.lock().mtu
    }

    fn set_mtu(&self, mtu: u16) -> Result<()> {
        ip::run(&["link", "set", "dev", &self.name, "mtu", &mtu.to_string()])
            .map_err(|e| TransportError::device_config_failed(&self.name, e))?;
        self.state.lock().mtu = mtu;
        Ok(())
    }

    fn slave(&self, bridge: Option<Weak<dyn Bridge>>) {
        self.state.lock().master = bridge;
    }

    fn master(&self) -> Option<Arc<dyn Bridge>> {
        self.state.lock().master.as_ref().and_then(Weak::upgrade)
    }

    fn status(&self) -> DeviceStatus {
        self.state.lock().status
    }
}

impl std::fmt::Debug for KernelTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelTap")
            .field("name", &self.name)
            .field("tenant", &self.tenant)
            .field("status", &self.status())
            .finish()
    }
}

// ============================================
// KernelTapProvider
// ============================================

/// Opens `KernelTap`s named by the kernel.
#[derive(Debug)]
pub struct KernelTapProvider {
    registry: Arc<DeviceRegistry>,
}

impl KernelTapProvider {
    /// Creates a provider registering into `registry`.
    #[must_use]
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }
}

impl DeviceProvider for KernelTapProvider {
    fn open(&self, tenant: &str, mtu: u16) -> Result<Arc<dyn VirtualDevice>> {
        let (fd, name) =
            open_tap("").map_err(|e| TransportError::device_create_failed(tenant, e))?;
        ip::run(&["link", "set", "dev", &name, "mtu", &mtu.to_string()])
            .map_err(|e| TransportError::device_config_failed(&name, e))?;

        let registry = self.registry.clone();
        let tap = Arc::new_cyclic(|me| KernelTap {
            name,
            tenant: tenant.to_string(),
            me: me.clone(),
            registry,
            state: Mutex::new(TapState {
                fd: Some(Arc::new(fd)),
                status: DeviceStatus::Created,
                mtu,
                master: None,
            }),
            closed: Notify::new(),
        });
        let device: Arc<dyn VirtualDevice> = tap;
        self.registry.add(device.clone());
        info!(device = %device.name(), tenant = %tenant, "TAP device opened");
        Ok(device)
    }

    fn kind(&self) -> &'static str {
        "kernel"
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    // Creating TAP devices needs CAP_NET_ADMIN; only the ifreq handling is
    // covered here.

    #[test]
    fn test_ifreq_tap_flags() {
        let ifr = IfReq::tap("tap7");
        assert_eq!(ifr.name(), "tap7");
        assert_eq!(ifr.ifr_flags, IFF_TAP | IFF_NO_PI);
    }

    #[test]
    fn test_ifreq_name_truncation() {
        let ifr = IfReq::tap(&"t".repeat(32));
        assert_eq!(ifr.name().len(), libc::IFNAMSIZ - 1);
        assert!(IfReq::tap("").name().is_empty());
    }
}
