//! The tunnel-device boundary.
//!
//! The stack consumes a tunnel only through the [`Tunnel`] trait: a
//! bidirectional packet duplex plus a close. [`tunnel_stream`] turns any
//! implementation into a [`Stream`] so the whole pipeline composes on top.
//!
//! On Linux the kernel hands over bare IP packets (see [`TunDevice`]). On
//! platforms whose tun flavor prefixes each packet with an address-family
//! word, the adapter implementing [`Tunnel`] is expected to strip it on
//! read and prepend it on write so the stack always sees bare IPv4.

use std::io;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::stream::Stream;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use self::linux::TunDevice;

/// An IP tunnel network interface.
///
/// `read_packet` and `write_packet` may block; [`tunnel_stream`] moves them
/// off the async runtime. Implementations must tolerate calls after
/// `close` by returning an error.
pub trait Tunnel: Send + Sync + 'static {
    /// The interface name.
    fn name(&self) -> &str;

    /// Read one IP packet, blocking until one arrives.
    fn read_packet(&self) -> io::Result<Vec<u8>>;

    /// Write one IP packet, blocking until it is handed to the device.
    fn write_packet(&self, packet: &[u8]) -> io::Result<()>;

    /// Close the device; pending reads fail afterwards.
    fn close(&self);
}

/// Wrap a tunnel as a packet stream.
///
/// The stream buffers up to `read_buffer` incoming and `write_buffer`
/// outgoing packets before blocking the respective loop. A read error
/// fires the stream's done signal; closing the stream closes the tunnel.
pub fn tunnel_stream(tunnel: Arc<dyn Tunnel>, read_buffer: usize,
                     write_buffer: usize) -> Stream {
    let (in_tx, in_rx) = mpsc::channel(read_buffer.max(1));
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(write_buffer.max(1));
    let done = CancellationToken::new();

    let read_tunnel = tunnel.clone();
    let read_done = done.clone();
    tokio::spawn(async move {
        loop {
            let device = read_tunnel.clone();
            let packet = task::spawn_blocking(move || device.read_packet()).await;
            let packet = match packet {
                Ok(Ok(packet)) => packet,
                Ok(Err(err)) => {
                    warn!(%err, "tunnel read failed");
                    break;
                }
                Err(_) => break,
            };
            tokio::select! {
                result = in_tx.send(packet) => if result.is_err() { break },
                _ = read_done.cancelled() => break,
            }
        }
        read_done.cancel();
    });

    let write_done = done.clone();
    tokio::spawn(async move {
        loop {
            let packet = tokio::select! {
                biased;
                packet = out_rx.recv() => match packet {
                    Some(packet) => packet,
                    None => break,
                },
                _ = write_done.cancelled() => break,
            };
            let device = tunnel.clone();
            let result = task::spawn_blocking(move || device.write_packet(&packet)).await;
            if let Ok(Err(err)) = result {
                warn!(%err, "tunnel write failed");
            }
        }
        tunnel.close();
    });

    Stream::from_parts(in_rx, out_tx, done)
}
