//! The Linux tun device.

use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::wire::Address;
use super::Tunnel;

/// `TUNSETIFF` from `linux/if_tun.h`: `_IOW('T', 202, int)`.
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
/// Interface flags for `TUNSETIFF`: an L3 tun without the packet-info
/// prefix, so reads and writes carry bare IP packets.
const IFF_TUN: libc::c_short = 0x0001;
const IFF_NO_PI: libc::c_short = 0x1000;

static TUN_PATH: &[u8] = b"/dev/net/tun\0";

/// A tun interface backed by `/dev/net/tun`.
///
/// Reads and writes block; pair the device with
/// [`tunnel_stream`](super::tunnel_stream) to use it from the stack.
pub struct TunDevice {
    fd: RawFd,
    name: String,
    closed: AtomicBool,
}

impl TunDevice {
    /// Open a tun interface with the given name (for example `tun0`).
    ///
    /// Requires `CAP_NET_ADMIN` or an already-persisted interface owned by
    /// the caller.
    pub fn open(name: &str) -> io::Result<TunDevice> {
        let fd = unsafe {
            libc::open(TUN_PATH.as_ptr() as *const libc::c_char, libc::O_RDWR)
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut ifr = ifreq_with_name(name)?;
        ifr.ifr_ifru.ifru_flags = IFF_TUN | IFF_NO_PI;
        let rc = unsafe { libc::ioctl(fd, TUNSETIFF as _, &ifr) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }

        Ok(TunDevice {
            fd,
            name: name.to_string(),
            closed: AtomicBool::new(false),
        })
    }

    /// Assign the interface its local address, peer address, and netmask.
    pub fn set_addresses(&self, local: Address, peer: Address,
                         netmask: Address) -> io::Result<()> {
        self.addr_ioctl(libc::SIOCSIFADDR, local)?;
        self.addr_ioctl(libc::SIOCSIFDSTADDR, peer)?;
        self.addr_ioctl(libc::SIOCSIFNETMASK, netmask)
    }

    /// Bring the interface up.
    pub fn set_up(&self) -> io::Result<()> {
        let sock = InetSock::open()?;
        let mut ifr = ifreq_with_name(&self.name)?;
        sock.ioctl(libc::SIOCGIFFLAGS, &mut ifr)?;
        unsafe {
            ifr.ifr_ifru.ifru_flags |=
                (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_short;
        }
        sock.ioctl(libc::SIOCSIFFLAGS, &mut ifr)
    }

    /// The interface MTU.
    pub fn mtu(&self) -> io::Result<usize> {
        let sock = InetSock::open()?;
        let mut ifr = ifreq_with_name(&self.name)?;
        sock.ioctl(libc::SIOCGIFMTU, &mut ifr)?;
        Ok(unsafe { ifr.ifr_ifru.ifru_mtu } as usize)
    }

    fn addr_ioctl(&self, request: libc::c_ulong, addr: Address) -> io::Result<()> {
        let sock = InetSock::open()?;
        let mut ifr = ifreq_with_name(&self.name)?;

        let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
        sin.sin_family = libc::AF_INET as libc::sa_family_t;
        sin.sin_addr.s_addr = u32::from_be_bytes(addr.0).to_be();
        unsafe {
            let dst = &mut ifr.ifr_ifru.ifru_addr as *mut libc::sockaddr;
            std::ptr::copy_nonoverlapping(
                &sin as *const libc::sockaddr_in as *const libc::sockaddr,
                dst,
                1,
            );
        }
        sock.ioctl(request, &mut ifr)
    }
}

impl Tunnel for TunDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_packet(&self) -> io::Result<Vec<u8>> {
        let mut buffer = vec![0u8; 65535];
        let n = unsafe {
            libc::read(self.fd, buffer.as_mut_ptr() as *mut libc::c_void, buffer.len())
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        buffer.truncate(n as usize);
        Ok(buffer)
    }

    fn write_packet(&self, packet: &[u8]) -> io::Result<()> {
        let n = unsafe {
            libc::write(self.fd, packet.as_ptr() as *const libc::c_void, packet.len())
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            unsafe { libc::close(self.fd) };
        }
    }
}

impl Drop for TunDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// A throwaway `AF_INET` datagram socket for interface ioctls.
struct InetSock(RawFd);

impl InetSock {
    fn open() -> io::Result<InetSock> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(InetSock(fd))
    }

    fn ioctl(&self, request: libc::c_ulong, ifr: &mut libc::ifreq) -> io::Result<()> {
        let rc = unsafe { libc::ioctl(self.0, request as _, ifr) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for InetSock {
    fn drop(&mut self) {
        unsafe { libc::close(self.0) };
    }
}

/// An `ifreq` with the name field filled in.
fn ifreq_with_name(name: &str) -> io::Result<libc::ifreq> {
    let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() >= ifr.ifr_name.len() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput,
                                  "interface name too long"));
    }
    for (dst, &src) in ifr.ifr_name.iter_mut().zip(bytes) {
        *dst = src as libc::c_char;
    }
    Ok(ifr)
}
