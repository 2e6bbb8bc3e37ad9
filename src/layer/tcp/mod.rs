//! TCP: a server-side host, listener, and connections.
//!
//! What is implemented is deliberately simple: fixed-window flow control
//! with a one-second retransmit/persist timer, no congestion control, no
//! SACK, no window scaling, and no active open. The receive side
//! tolerates arbitrary reordering; the send side keeps a single chunk in
//! flight.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::layer::ip::{filter_dest, filter_proto};
use crate::layer::DEFAULT_TTL;
use crate::ports::{BasicPortAllocator, PortAlloc};
use crate::stream::{filter, MultiStream, Stream};
use crate::wire::{tcp4, Address, Endpoint, Flags, Protocol};

mod handshake;
mod recv;
mod send;
#[cfg(test)]
mod tests;

use self::handshake::{server_handshake, Handshake};
use self::recv::TcpRecv;
use self::send::TcpSend;

/// A raw segment as the send and receive halves see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TcpSegment {
    pub(crate) start: u32,
    pub(crate) data: Vec<u8>,
    pub(crate) fin: bool,
}

/// Bytes of receive buffering per connection; also the assembler window.
const RECV_BUFFER: usize = 4096;
/// Packets of incoming buffer on the listener's and each connection's
/// stream fork.
const ACCEPT_BACKLOG: usize = 16;

/// A TCP host on top of an IPv4 packet stream.
///
/// The stream should already filter invalid IPv4 and handle fragmentation;
/// this type adds the TCP-specific filters. Only packets addressed to
/// `laddr` are processed.
pub struct TcpNet {
    multi: MultiStream,
    ports: Arc<dyn PortAlloc>,
    ttl: u8,
}

impl TcpNet {
    /// Create a TCP host.
    ///
    /// A `ports` of `None` uses a fresh [`BasicPortAllocator`]; a `ttl` of
    /// zero picks the default.
    pub fn new(stream: Stream, laddr: Address, ports: Option<Arc<dyn PortAlloc>>,
               ttl: u8) -> TcpNet {
        let ports = ports.unwrap_or_else(|| Arc::new(BasicPortAllocator::new()));
        let ttl = if ttl == 0 { DEFAULT_TTL } else { ttl };

        let stream = filter_proto(stream, Protocol::Tcp);
        let stream = filter_dest(stream, laddr);
        let stream = filter(stream, Some(Box::new(|packet: Vec<u8>| {
            match tcp4::new_checked(&packet) {
                Ok(segment) if segment.verify_checksum() => Some(packet),
                _ => None,
            }
        })), None);

        TcpNet {
            multi: MultiStream::new(stream),
            ports,
            ttl,
        }
    }

    /// Start listening on `addr`. A port of zero allocates one.
    pub fn listen(&self, mut addr: Endpoint) -> Result<TcpListener> {
        let stream = self.multi.fork(ACCEPT_BACKLOG)?;
        if addr.port == 0 {
            addr.port = match self.ports.alloc_any() {
                Ok(port) => port,
                Err(err) => {
                    stream.close();
                    return Err(err);
                }
            };
        } else if let Err(err) = self.ports.alloc(addr.port) {
            stream.close();
            return Err(err);
        }

        let multi = MultiStream::new(stream);
        let (conn_tx, conn_rx) = mpsc::channel(1);
        tokio::spawn(listener_loop(multi.clone(), addr, conn_tx, self.ttl));
        info!(%addr, "tcp listener started");

        Ok(TcpListener {
            multi,
            addr,
            conns: conn_rx,
            ports: self.ports.clone(),
        })
    }

    /// Open a connection to a remote host.
    ///
    /// Not implemented: this stack only accepts connections.
    pub fn dial(&self, _addr: Endpoint) -> Result<TcpConn> {
        Err(Error::Unsupported("tcp active open"))
    }

    /// Close the host and everything forked from it.
    pub fn close(&self) {
        self.multi.close();
    }
}

/// Accepts connections on one local endpoint.
pub struct TcpListener {
    multi: MultiStream,
    addr: Endpoint,
    conns: mpsc::Receiver<TcpConn>,
    ports: Arc<dyn PortAlloc>,
}

impl TcpListener {
    /// The next established connection.
    pub async fn accept(&mut self) -> Result<TcpConn> {
        self.conns.recv().await.ok_or(Error::StreamClosed)
    }

    /// Stop listening and release the port.
    pub fn close(&self) -> Result<()> {
        self.multi.close();
        self.ports.free(self.addr.port)
    }

    /// The endpoint this listener is bound to.
    pub fn local_addr(&self) -> Endpoint {
        self.addr
    }
}

/// Watch for SYNs and drive each handshake to a connection.
async fn listener_loop(multi: MultiStream, addr: Endpoint,
                       conns: mpsc::Sender<TcpConn>, ttl: u8) {
    let Ok(stream) = multi.fork(ACCEPT_BACKLOG) else { return };
    let stream = filter_endpoints(stream, None, Some(addr));
    let mut stream = filter(stream, Some(Box::new(|packet: Vec<u8>| {
        if tcp4::new_unchecked(&packet).flags().contains(Flags::SYN) {
            Some(packet)
        } else {
            None
        }
    })), None);

    while let Some(packet) = stream.recv().await {
        let (remote, local) = {
            let tp = tcp4::new_unchecked(&packet);
            (tp.src_endpoint(), tp.dst_endpoint())
        };

        let Ok(conn_stream) = multi.fork(ACCEPT_BACKLOG) else { return };
        let mut conn_stream = filter_endpoints(conn_stream, Some(remote), Some(local));

        match server_handshake(&mut conn_stream, &packet, ttl).await {
            Ok(handshake) => {
                let conn = TcpConn::start(conn_stream, local, remote, handshake, ttl);
                info!(%remote, "tcp connection established");
                if conns.send(conn).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!(%remote, %err, "tcp handshake failed");
                conn_stream.close();
                return;
            }
        }
    }
}

/// Keep only segments matching the given source and destination.
fn filter_endpoints(stream: Stream, src: Option<Endpoint>, dst: Option<Endpoint>) -> Stream {
    filter(stream, Some(Box::new(move |packet: Vec<u8>| {
        let tp = tcp4::new_unchecked(&packet);
        if let Some(src) = src {
            if tp.src_endpoint() != src {
                return None;
            }
        }
        if let Some(dst) = dst {
            if tp.dst_endpoint() != dst {
                return None;
            }
        }
        Some(packet)
    })), None)
}

/// One established connection.
///
/// Reads and writes may run concurrently; `close` queues the FIN and
/// returns once it is acknowledged. Both directions terminate together:
/// the background loop ends once the send side is acknowledged and the
/// peer's FIN has been consumed, or when the stream dies.
pub struct TcpConn {
    local: Endpoint,
    remote: Endpoint,
    recv: Arc<TcpRecv>,
    send: Arc<TcpSend>,
}

impl TcpConn {
    fn start(stream: Stream, local: Endpoint, remote: Endpoint,
             handshake: Handshake, ttl: u8) -> TcpConn {
        let recv = Arc::new(TcpRecv::new(handshake.remote_seq, RECV_BUFFER));
        let (send, next) = TcpSend::new(handshake.local_seq, handshake.remote_window,
                                        handshake.mss);
        let send = Arc::new(send);

        tokio::spawn(conn_loop(ConnLoop {
            stream,
            local,
            remote,
            recv: recv.clone(),
            send: send.clone(),
            next,
            ttl,
        }));

        TcpConn { local, remote, recv, send }
    }

    /// Read some bytes; `Ok(0)` is end of stream.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.recv.read(buf).await
    }

    /// Write all of `buf`, returning once the peer acknowledged it.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        self.send.write(buf).await
    }

    /// Send the FIN and wait for its acknowledgment.
    pub async fn close(&self) -> Result<()> {
        self.send.close().await
    }

    /// The local endpoint.
    pub fn local_addr(&self) -> Endpoint {
        self.local
    }

    /// The remote endpoint.
    pub fn remote_addr(&self) -> Endpoint {
        self.remote
    }

    /// Set both deadlines at once. `None` disarms them.
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.recv.set_deadline(deadline);
        self.send.set_deadline(deadline);
    }

    /// Set the read deadline.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.recv.set_deadline(deadline);
    }

    /// Set the write deadline.
    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.send.set_deadline(deadline);
    }
}

struct ConnLoop {
    stream: Stream,
    local: Endpoint,
    remote: Endpoint,
    recv: Arc<TcpRecv>,
    send: Arc<TcpSend>,
    next: mpsc::Receiver<TcpSegment>,
    ttl: u8,
}

/// The per-connection event loop: outgoing segments from the send timer,
/// window-reopen probes, and incoming packets.
async fn conn_loop(mut conn: ConnLoop) {
    while !(conn.send.done() && conn.recv.done()) {
        let window_open = conn.recv.window_open();
        tokio::select! {
            segment = conn.next.recv() => {
                let Some(segment) = segment else { break };
                conn.send_segment(&segment);
            }
            _ = window_open.cancelled() => {
                conn.send_ack();
            }
            packet = conn.stream.recv() => {
                let Some(packet) = packet else {
                    conn.recv.fail(Error::StreamClosed);
                    conn.send.fail(Error::StreamClosed);
                    break;
                };
                let (segment, ack, window) = {
                    let tp = tcp4::new_unchecked(&packet);
                    (TcpSegment {
                        start: tp.seq_number(),
                        data: tp.payload_slice().to_vec(),
                        fin: tp.flags().contains(Flags::FIN),
                    }, tp.ack_number(), tp.window_size())
                };
                conn.recv.handle(&segment);
                conn.send.handle(ack, window);
                conn.send_ack();
            }
        }
    }
    conn.stream.close();
}

impl ConnLoop {
    /// Emit one data or FIN segment. Dropped when the stream is congested;
    /// the retransmit timer covers the loss.
    fn send_segment(&self, segment: &TcpSegment) {
        let mut packet = tcp4::buffer(self.ttl, self.local, self.remote,
                                      segment.start, self.recv.ack(),
                                      self.recv.window(), &segment.data, Flags::ACK);
        if segment.fin {
            let tp = tcp4::new_unchecked_mut(&mut packet);
            tp.set_flag(Flags::FIN, true);
            tp.fill_checksum();
        }
        let _ = self.stream.try_send(packet);
    }

    /// Emit a bare acknowledgment advertising the current window.
    fn send_ack(&self) {
        let packet = tcp4::buffer(self.ttl, self.local, self.remote, 0,
                                  self.recv.ack(), self.recv.window(), &[],
                                  Flags::ACK);
        let _ = self.stream.try_send(packet);
    }
}
