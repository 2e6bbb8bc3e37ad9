use std::time::Duration;

use super::recv::{TcpAssembler, TcpRecv};
use super::send::TcpSend;
use super::*;
use crate::wire::ipv4;

fn segment(start: u32, data: &[u8], fin: bool) -> TcpSegment {
    TcpSegment {
        start,
        data: data.to_vec(),
        fin,
    }
}

#[test]
fn assembler_reorders_across_wrap() {
    let mut a = TcpAssembler::new(0xfffffffe, 16);

    a.add_segment(&segment(10, b"hi!", true));
    assert_eq!(a.skim(16), (vec![], false));

    a.add_segment(&segment(1, b"eyy", false));
    assert_eq!(a.skim(16), (vec![], false));

    a.add_segment(&segment(0xfffffffe, b"hhhey", false));
    let (bytes, eof) = a.skim(16);
    assert_eq!(bytes, b"hhheyy");
    assert!(!eof);
    assert_eq!(a.seq(), 4);

    a.add_segment(&segment(4, b"hello!", false));
    let (bytes, eof) = a.skim(16);
    assert_eq!(bytes, b"hello!hi!");
    assert!(eof);
    assert_eq!(a.seq(), 14);
    assert!(a.finished());
}

#[test]
fn assembler_drops_out_of_window() {
    let mut a = TcpAssembler::new(100, 8);
    // Entirely beyond the window.
    a.add_segment(&segment(108, b"zz", false));
    // Entirely before it (already consumed data).
    a.add_segment(&segment(90, b"zz", false));
    assert_eq!(a.skim(8), (vec![], false));

    // Straddling the lower edge: only the in-window tail lands.
    a.add_segment(&segment(98, b"ababab", false));
    let (bytes, _) = a.skim(8);
    assert_eq!(bytes, b"abab");
    assert_eq!(a.seq(), 104);
}

#[test]
fn assembler_duplicate_overwrite_is_idempotent() {
    let mut a = TcpAssembler::new(0, 8);
    a.add_segment(&segment(0, b"abc", false));
    a.add_segment(&segment(0, b"abc", false));
    assert_eq!(a.skim(8), (b"abc".to_vec(), false));
}

#[test]
fn assembler_defers_far_fin() {
    let mut a = TcpAssembler::new(0, 4);
    // The FIN lands beyond the window, so only the bytes register.
    a.add_segment(&segment(0, b"abcdef", true));
    let (bytes, eof) = a.skim(4);
    assert_eq!(bytes, b"abcd");
    assert!(!eof);

    // Retransmission once the window slid: now the FIN fits.
    a.add_segment(&segment(4, b"ef", true));
    let (bytes, eof) = a.skim(4);
    assert_eq!(bytes, b"ef");
    assert!(eof);
    assert_eq!(a.seq(), 7);
}

#[test]
fn assembler_limit_bounds_skim() {
    let mut a = TcpAssembler::new(0, 8);
    a.add_segment(&segment(0, b"abcdef", false));
    assert_eq!(a.skim(4), (b"abcd".to_vec(), false));
    assert_eq!(a.skim(4), (b"ef".to_vec(), false));
    assert_eq!(a.seq(), 6);
}

#[tokio::test]
async fn recv_blocks_until_data_then_eof() {
    let recv = std::sync::Arc::new(TcpRecv::new(1337, 1000));
    let reader = recv.clone();
    let task = tokio::spawn(async move {
        let mut buf = [0u8; 100];
        let n = reader.read(&mut buf).await.unwrap();
        (buf[..n].to_vec(), reader.read(&mut buf).await.unwrap())
    });

    recv.handle(&segment(1338, b"i!", true));
    assert_eq!(recv.ack(), 1337);
    assert!(!recv.done());

    recv.handle(&segment(1337, b"h", false));
    assert_eq!(recv.ack(), 1341);
    assert!(recv.done());

    let (bytes, eof_len) = task.await.unwrap();
    assert_eq!(bytes, b"hi!");
    assert_eq!(eof_len, 0);
}

#[tokio::test]
async fn recv_fail_surfaces_to_readers() {
    let recv = std::sync::Arc::new(TcpRecv::new(1337, 1000));
    let reader = recv.clone();
    let task = tokio::spawn(async move {
        let mut buf = [0u8; 100];
        reader.read(&mut buf).await
    });

    recv.fail(Error::StreamClosed);
    assert_eq!(task.await.unwrap(), Err(Error::StreamClosed));
}

#[tokio::test(start_paused = true)]
async fn recv_read_deadline() {
    let recv = TcpRecv::new(0, 1000);
    recv.set_deadline(Some(Instant::now() + Duration::from_millis(20)));
    let mut buf = [0u8; 16];
    let err = recv.read(&mut buf).await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn recv_window_tracks_buffer() {
    let recv = TcpRecv::new(0, 8);
    assert_eq!(recv.window(), 8);
    recv.handle(&segment(0, b"abcdef", false));
    assert_eq!(recv.window(), 2);

    let mut buf = [0u8; 4];
    recv.read(&mut buf).await.unwrap();
    assert_eq!(recv.window(), 6);
}

#[tokio::test]
async fn recv_window_reopen_fires_once() {
    let recv = TcpRecv::new(0, 4);
    let open = recv.window_open();
    recv.handle(&segment(0, b"abcd", false));
    assert_eq!(recv.window(), 0);
    assert!(!open.is_cancelled());

    let mut buf = [0u8; 2];
    recv.read(&mut buf).await.unwrap();
    assert!(open.is_cancelled());
    // The replacement signal is armed for the next closed-window episode.
    assert!(!recv.window_open().is_cancelled());
}

#[tokio::test]
async fn send_write_then_close() {
    let (send, mut next) = TcpSend::new(1337, 1000, 512);
    let send = std::sync::Arc::new(send);

    let writer = send.clone();
    let task = tokio::spawn(async move {
        let n = writer.write(b"hello, world!").await.unwrap();
        writer.close().await.unwrap();
        n
    });

    let first = next.recv().await.unwrap();
    assert_eq!(first, segment(1337, b"hello, world!", false));

    send.handle(first.start.wrapping_add(first.data.len() as u32), 1000);
    assert_eq!(send.seq(), 1350);

    let second = next.recv().await.unwrap();
    assert_eq!(second, segment(1350, b"", true));
    assert!(!send.done());

    send.handle(1351, 1000);
    assert!(send.done());
    assert_eq!(task.await.unwrap(), 13);
}

#[tokio::test]
async fn send_fail_unblocks_writer() {
    let (send, _next) = TcpSend::new(1337, 1000, 512);
    let send = std::sync::Arc::new(send);

    let writer = send.clone();
    let task = tokio::spawn(async move {
        writer.write(b"hello, world!").await
    });

    send.fail(Error::StreamClosed);
    assert_eq!(task.await.unwrap(), Err(Error::StreamClosed));
}

#[tokio::test]
async fn send_respects_mss_and_window() {
    let (send, mut next) = TcpSend::new(0, 1000, 4);
    let send = std::sync::Arc::new(send);

    let writer = send.clone();
    tokio::spawn(async move {
        let _ = writer.write(b"abcdefgh").await;
    });

    let first = next.recv().await.unwrap();
    assert_eq!(first, segment(0, b"abcd", false));
    send.handle(4, 2);

    // The shrunken peer window now caps the chunk below the MSS.
    let second = next.recv().await.unwrap();
    assert_eq!(second, segment(4, b"ef", false));
}

#[tokio::test(start_paused = true)]
async fn send_persist_probe_on_zero_window() {
    let (send, mut next) = TcpSend::new(0, 0, 512);
    let send = std::sync::Arc::new(send);

    let writer = send.clone();
    tokio::spawn(async move {
        let _ = writer.write(b"stuck").await;
    });

    // Nothing goes out immediately; after the interval a one-byte probe
    // shows up, and keeps showing up.
    let probe = next.recv().await.unwrap();
    assert_eq!(probe, segment(0, b"s", false));
    let probe = next.recv().await.unwrap();
    assert_eq!(probe, segment(0, b"s", false));

    // Opening the window releases a real segment.
    send.handle(0, 1000);
    let real = next.recv().await.unwrap();
    assert_eq!(real, segment(0, b"stuck", false));
}

#[tokio::test(start_paused = true)]
async fn send_retransmits_until_acked() {
    let (send, mut next) = TcpSend::new(0, 1000, 512);
    let send = std::sync::Arc::new(send);

    let writer = send.clone();
    tokio::spawn(async move {
        let _ = writer.write(b"again").await;
    });

    let first = next.recv().await.unwrap();
    let second = next.recv().await.unwrap();
    assert_eq!(first, second);

    send.handle(5, 1000);
    assert_eq!(send.seq(), 5);
}

#[tokio::test]
async fn send_double_close_errors() {
    let (send, mut next) = TcpSend::new(0, 1000, 512);
    let send = std::sync::Arc::new(send);

    let closer = send.clone();
    let task = tokio::spawn(async move { closer.close().await });
    let fin = next.recv().await.unwrap();
    assert!(fin.fin);
    send.handle(1, 1000);
    task.await.unwrap().unwrap();

    assert_eq!(send.close().await, Err(Error::AlreadyClosed));
}

const HOST: Address = Address::new(10, 13, 37, 1);
const PEER: Address = Address::new(10, 13, 37, 2);

/// Build a finished packet as the peer would put it on the wire.
fn peer_packet(src: Endpoint, dst: Endpoint, seq: u32, ack: u32, window: u16,
               payload: &[u8], flags: Flags) -> Vec<u8> {
    let mut packet = tcp4::buffer(64, src, dst, seq, ack, window, payload, flags);
    ipv4::new_unchecked_mut(&mut packet).fill_checksum();
    packet
}

/// Read packets off the wire until one matches.
async fn wire_next(wire: &mut Stream, mut pred: impl FnMut(&tcp4) -> bool) -> Vec<u8> {
    loop {
        let packet = tokio::time::timeout(Duration::from_secs(5), wire.recv())
            .await
            .expect("timed out waiting for a packet")
            .expect("wire closed");
        if pred(tcp4::new_unchecked(&packet)) {
            return packet;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connection_end_to_end() {
    let (near, mut wire) = Stream::pipe(32);
    let net = TcpNet::new(near, HOST, None, 0);
    let mut listener = net.listen(Endpoint::new(HOST, 1337)).unwrap();

    let local = Endpoint::new(HOST, 1337);
    let peer = Endpoint::new(PEER, 40000);

    // SYN in; SYN-ACK out.
    wire.send(peer_packet(peer, local, 99, 0, 1000, b"", Flags::SYN)).await.unwrap();
    let syn_ack = wire_next(&mut wire, |tp| {
        tp.flags().contains(Flags::SYN) && tp.flags().contains(Flags::ACK)
    }).await;
    let isn = tcp4::new_unchecked(&syn_ack).seq_number();
    assert_eq!(tcp4::new_unchecked(&syn_ack).ack_number(), 100);

    // Complete the handshake.
    wire.send(peer_packet(peer, local, 100, isn.wrapping_add(1), 1000, b"",
                          Flags::ACK)).await.unwrap();
    let conn = listener.accept().await.unwrap();
    assert_eq!(conn.local_addr(), local);
    assert_eq!(conn.remote_addr(), peer);

    // Peer data reaches the application, and gets acknowledged.
    wire.send(peer_packet(peer, local, 100, isn.wrapping_add(1), 1000, b"hello",
                          Flags::ACK)).await.unwrap();
    let mut buf = [0u8; 32];
    let n = conn.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"hello");
    let ack = wire_next(&mut wire, |tp| tp.ack_number() == 105).await;
    assert!(tcp4::new_unchecked(&ack).flags().contains(Flags::ACK));

    // Application data reaches the peer once acknowledged.
    let writer = async {
        conn.write(b"world").await.unwrap();
    };
    let acker = async {
        let data = wire_next(&mut wire, |tp| !tp.payload_slice().is_empty()).await;
        let tp = tcp4::new_unchecked(&data);
        assert_eq!(tp.seq_number(), isn.wrapping_add(1));
        assert_eq!(tp.payload_slice(), b"world");
        assert!(tp.verify_checksum());
        wire.send(peer_packet(peer, local, 105, isn.wrapping_add(6), 1000, b"",
                              Flags::ACK)).await.unwrap();
    };
    tokio::join!(writer, acker);

    // Close both directions.
    let closer = async {
        conn.close().await.unwrap();
    };
    let finisher = async {
        let fin = wire_next(&mut wire, |tp| tp.flags().contains(Flags::FIN)).await;
        assert_eq!(tcp4::new_unchecked(&fin).seq_number(), isn.wrapping_add(6));
        wire.send(peer_packet(peer, local, 105, isn.wrapping_add(7), 1000, b"",
                              Flags::ACK | Flags::FIN)).await.unwrap();
    };
    tokio::join!(closer, finisher);

    assert_eq!(conn.read(&mut buf).await.unwrap(), 0);
    listener.close().unwrap();
    net.close();
}

#[tokio::test]
async fn dial_is_unsupported() {
    let (near, _wire) = Stream::pipe(4);
    let net = TcpNet::new(near, HOST, None, 0);
    assert!(matches!(net.dial(Endpoint::new(PEER, 80)),
                     Err(Error::Unsupported(_))));
    net.close();
}

#[tokio::test]
async fn listener_frees_port_on_close() {
    let ports: Arc<dyn PortAlloc> = Arc::new(BasicPortAllocator::new());
    let (near, _wire) = Stream::pipe(4);
    let net = TcpNet::new(near, HOST, Some(ports.clone()), 0);

    let listener = net.listen(Endpoint::new(HOST, 8080)).unwrap();
    assert_eq!(ports.alloc(8080), Err(Error::PortInUse));
    listener.close().unwrap();
    ports.alloc(8080).unwrap();
    net.close();
}
