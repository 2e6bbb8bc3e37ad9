//! A userspace IPv4 networking stack over a point-to-point tunnel device.
//!
//! The stack is built from composable pieces, in dependency order:
//!
//! 1. [`wire`]: zero-copy views over packet buffers, covering IPv4, ICMP,
//!    UDP, and TCP headers, plus the internet checksum.
//! 2. [`stream`]: the packet-stream abstraction everything runs on, a
//!    bounded bidirectional duplex with a done signal, composable through
//!    [`stream::filter`] and fan-out through [`stream::MultiStream`].
//! 3. [`layer::ip`]: the IPv4 pipeline with validity and checksum filters,
//!    identifier assignment, fragmentation, and reassembly.
//! 4. [`layer::icmp`], [`layer::udp`], [`layer::tcp`]: the transports,
//!    namely an echo responder, datagram sockets, and a server-side TCP
//!    with fixed-window flow control.
//! 5. [`tun`]: the boundary to the OS tunnel device, consumed only as a
//!    packet duplex.
//!
//! A typical assembly wires the tunnel into the pipeline and forks it per
//! transport:
//!
//! ```no_run
//! use std::sync::Arc;
//! use tunstack::layer::{icmp, ip, udp};
//! use tunstack::stream::MultiStream;
//! use tunstack::tun::{tunnel_stream, TunDevice};
//! use tunstack::wire::Address;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let host = Address::new(10, 13, 37, 1);
//! let device = TunDevice::open("tun0")?;
//! device.set_addresses(host, Address::new(10, 13, 37, 2),
//!                      Address::new(255, 255, 255, 0))?;
//! device.set_up()?;
//!
//! let stream = tunnel_stream(Arc::new(device), 16, 16);
//! let stream = ip::filter_valid(stream);
//! let stream = ip::filter_checksums(stream);
//! let stream = ip::defragment_incoming(stream, ip::DEFAULT_DEFRAG_TIMEOUT);
//! let stream = ip::add_identifiers(stream);
//! let multi = MultiStream::new(stream);
//!
//! tokio::spawn(icmp::respond_to_pings(multi.fork(16)?));
//! let net = udp::UdpNet::new(multi.fork(16)?, host, None, 0, 0);
//! let _socket = net.listen(None)?;
//! # Ok(())
//! # }
//! ```
//!
//! Packets own their bytes: passing one to a stream transfers ownership,
//! and the [`wire`] views borrow from whoever currently holds the buffer.
//! Malformed traffic is dropped silently inside the pipeline; only
//! socket-level failures (timeouts, closed streams, failed handshakes)
//! surface as [`Error`](error::Error).

#![warn(missing_docs)]
#![warn(unreachable_pub)]

#[macro_use]
mod macros;

pub mod error;
pub mod layer;
pub mod ports;
pub mod stream;
pub mod tun;
pub mod wire;

pub use error::{Error, Result};
