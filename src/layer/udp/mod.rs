//! UDP sockets.

use std::sync::Arc;

use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::layer::ip::{filter_dest, filter_proto};
use crate::layer::DEFAULT_TTL;
use crate::ports::{BasicPortAllocator, PortAlloc};
use crate::stream::{filter, MultiStream, Stream, StreamConn};
use crate::wire::{udp4, Address, Endpoint, Protocol};


/// Packets of incoming buffer per socket unless overridden.
pub const DEFAULT_UDP_READ_BUFFER: usize = 16;

/// A UDP host on top of an IPv4 packet stream.
///
/// The stream should already filter invalid IPv4 and handle fragmentation;
/// this type adds the UDP-specific filters and hands out sockets that share
/// the stream through a multiplexer. Only packets addressed to `laddr` are
/// processed.
pub struct UdpNet {
    multi: MultiStream,
    laddr: Address,
    ports: Arc<dyn PortAlloc>,
    ttl: u8,
    read_buffer: usize,
}

impl UdpNet {
    /// Create a UDP host.
    ///
    /// A `ports` of `None` uses a fresh [`BasicPortAllocator`]; a `ttl` of
    /// zero and a `read_buffer` of zero pick the defaults.
    pub fn new(stream: Stream, laddr: Address, ports: Option<Arc<dyn PortAlloc>>,
               ttl: u8, read_buffer: usize) -> UdpNet {
        let ports = ports.unwrap_or_else(|| Arc::new(BasicPortAllocator::new()));
        let ttl = if ttl == 0 { DEFAULT_TTL } else { ttl };
        let read_buffer = if read_buffer == 0 { DEFAULT_UDP_READ_BUFFER } else { read_buffer };

        let stream = filter_proto(stream, Protocol::Udp);
        let stream = filter_dest(stream, laddr);
        let stream = filter(stream, Some(Box::new(|packet: Vec<u8>| {
            match udp4::new_checked(&packet) {
                Ok(datagram) if !datagram.use_checksum() || datagram.verify_checksum() => {
                    Some(packet)
                }
                _ => None,
            }
        })), None);

        UdpNet {
            multi: MultiStream::new(stream),
            laddr,
            ports,
            ttl,
            read_buffer,
        }
    }

    /// Open a socket that receives every datagram sent to a local port.
    ///
    /// With no address, or a port of zero, a free port is allocated; the
    /// port is released again when the socket closes.
    pub fn listen(&self, laddr: Option<Endpoint>) -> Result<UdpSocket> {
        let stream = self.multi.fork(self.read_buffer)?;
        match self.bind_local(laddr, None, &stream) {
            Ok(local) => {
                let port = local.port;
                let stream = filter(stream, Some(Box::new(move |packet: Vec<u8>| {
                    if udp4::new_unchecked(&packet).dst_port() == port {
                        Some(packet)
                    } else {
                        None
                    }
                })), None);
                Ok(UdpSocket {
                    conn: StreamConn::new(stream),
                    local,
                    remote: None,
                    ttl: self.ttl,
                })
            }
            Err(err) => {
                stream.close();
                Err(err)
            }
        }
    }

    /// Open a socket connected to one remote endpoint.
    ///
    /// Incoming datagrams are additionally filtered on the remote address
    /// and port; `read` and `write` work without an explicit peer.
    pub fn dial(&self, laddr: Option<Endpoint>, mut raddr: Endpoint) -> Result<UdpSocket> {
        if raddr.addr.is_unspecified() {
            raddr.addr = self.laddr;
        }

        let stream = self.multi.fork(self.read_buffer)?;
        match self.bind_local(laddr, Some(raddr), &stream) {
            Ok(local) => {
                let port = local.port;
                let stream = filter(stream, Some(Box::new(move |packet: Vec<u8>| {
                    let datagram = udp4::new_unchecked(&packet);
                    if datagram.src_endpoint() == raddr && datagram.dst_port() == port {
                        Some(packet)
                    } else {
                        None
                    }
                })), None);
                Ok(UdpSocket {
                    conn: StreamConn::new(stream),
                    local,
                    remote: Some(raddr),
                    ttl: self.ttl,
                })
            }
            Err(err) => {
                stream.close();
                Err(err)
            }
        }
    }

    /// Close the host and every socket forked from it.
    pub fn close(&self) {
        self.multi.close();
    }

    /// Pick and reserve the local endpoint for a new socket, arranging for
    /// the port to be freed once the socket's stream closes.
    fn bind_local(&self, laddr: Option<Endpoint>, remote: Option<Endpoint>,
                  stream: &Stream) -> Result<Endpoint> {
        let mut local = laddr.unwrap_or(Endpoint::new(self.laddr, 0));
        if local.addr.is_unspecified() {
            local.addr = self.laddr;
        }
        if local.addr != self.laddr {
            return Err(Error::Unsupported("listening on a foreign address"));
        }

        if local.port == 0 {
            local.port = match remote {
                Some(remote) => self.ports.alloc_remote(remote.into())?,
                None => self.ports.alloc_any()?,
            };
        } else {
            self.ports.alloc(local.port)?;
        }

        let ports = self.ports.clone();
        let done = stream.done();
        let port = local.port;
        tokio::spawn(async move {
            done.cancelled().await;
            let _ = match remote {
                Some(remote) => ports.free_remote(remote.into(), port),
                None => ports.free(port),
            };
        });
        Ok(local)
    }
}

/// A datagram socket.
pub struct UdpSocket {
    conn: StreamConn,
    local: Endpoint,
    remote: Option<Endpoint>,
    ttl: u8,
}

impl UdpSocket {
    /// Receive one datagram into `buf`.
    ///
    /// Returns the number of payload bytes copied and the sender's
    /// endpoint; a datagram longer than `buf` is truncated.
    pub async fn read_from(&mut self, buf: &mut [u8]) -> Result<(usize, Endpoint)> {
        let packet = self.conn.read_packet().await?;
        let datagram = udp4::new_unchecked(&packet);
        let payload = datagram.payload_slice();
        let n = payload.len().min(buf.len());
        buf[..n].copy_from_slice(&payload[..n]);
        Ok((n, datagram.src_endpoint()))
    }

    /// Receive one datagram from the connected peer.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let (n, _) = self.read_from(buf).await?;
        Ok(n)
    }

    /// Send one datagram to `dest`.
    pub async fn write_to(&self, buf: &[u8], dest: Endpoint) -> Result<usize> {
        let packet = udp4::buffer(self.ttl, self.local, dest, buf);
        self.conn.write_packet(packet).await?;
        Ok(buf.len())
    }

    /// Send one datagram to the connected peer.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        let remote = self.remote.ok_or(Error::Unsupported("write on unconnected socket"))?;
        self.write_to(buf, remote).await
    }

    /// The local endpoint.
    pub fn local_addr(&self) -> Endpoint {
        self.local
    }

    /// The connected remote endpoint, if any.
    pub fn remote_addr(&self) -> Option<Endpoint> {
        self.remote
    }

    /// Set the deadline for both reads and writes. `None` disarms it.
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.conn.set_deadline(deadline);
    }

    /// Close the socket, releasing its port.
    pub fn close(&self) {
        self.conn.close();
    }
}
