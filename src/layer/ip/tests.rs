use std::time::Duration;

use super::*;
use crate::error::Error;
use crate::wire::ipv4;

fn sample_packet(payload_len: usize) -> Vec<u8> {
    let payload: Vec<u8> = (0..payload_len).map(|i| i as u8).collect();
    let mut data = ipv4::buffer(
        30,
        Protocol::Icmp,
        Address::new(10, 0, 0, 1),
        Address::new(10, 0, 0, 2),
        &payload,
    );
    ipv4::new_unchecked_mut(&mut data).set_ident(0x4242);
    ipv4::new_unchecked_mut(&mut data).fill_checksum();
    data
}

#[test]
fn fragment_sizes_and_offsets() {
    let packet = sample_packet(380);
    let fragments = fragment_packet(&packet, 133).unwrap();
    assert_eq!(fragments.len(), 4);

    let mut expected_offset = 0;
    for (index, data) in fragments.iter().enumerate() {
        let frag = ipv4::new_checked(data).unwrap();
        assert!(data.len() <= 133);
        assert_eq!(frag.more_frags(), index + 1 < fragments.len());
        assert_eq!(usize::from(frag.frag_offset()), expected_offset);
        assert_eq!(usize::from(frag.total_len()), data.len());
        assert!(frag.verify_checksum());
        expected_offset += frag.payload_slice().len();
    }
    assert_eq!(expected_offset, 380);
}

#[test]
fn fragment_small_packet_passes_through() {
    let packet = sample_packet(40);
    let fragments = fragment_packet(&packet, 1500).unwrap();
    assert_eq!(fragments, vec![packet]);
}

#[test]
fn fragment_rejects_dont_frag() {
    let mut packet = sample_packet(380);
    ipv4::new_unchecked_mut(&mut packet).set_frag_info(true, false, 0);
    assert!(matches!(fragment_packet(&packet, 133),
                     Err(Error::Unsupported(_))));
}

#[test]
fn fragment_rejects_tiny_mtu() {
    let packet = sample_packet(380);
    assert!(matches!(fragment_packet(&packet, 27),
                     Err(Error::Unsupported(_))));
}

#[tokio::test]
async fn defragment_reverse_order() {
    let packet = sample_packet(380);
    let fragments = fragment_packet(&packet, 133).unwrap();

    let (near, far) = Stream::pipe(8);
    let mut near = defragment_incoming(near, Duration::from_secs(3));

    for fragment in fragments.into_iter().rev() {
        far.send(fragment).await.unwrap();
    }
    assert_eq!(near.recv().await.unwrap(), packet);
    near.close();
}

#[tokio::test(start_paused = true)]
async fn defragment_expires_stale_groups() {
    let packet = sample_packet(380);
    let fragments = fragment_packet(&packet, 133).unwrap();

    let (near, far) = Stream::pipe(8);
    let mut near = defragment_incoming(near, Duration::from_millis(100));

    // Deliver all but one fragment, wait out the timeout, then finish; the
    // group was dropped, so nothing reassembles.
    for fragment in &fragments[1..] {
        far.send(fragment.clone()).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    far.send(fragments[0].clone()).await.unwrap();

    // An unrelated whole packet still comes through, proving the stale
    // group never completed ahead of it.
    let whole = sample_packet(16);
    far.send(whole.clone()).await.unwrap();
    assert_eq!(near.recv().await.unwrap(), whole);
    near.close();
}

#[tokio::test]
async fn pipeline_stamps_and_verifies() {
    let (near, mut far) = Stream::pipe(8);
    let near = add_identifiers(near);

    let mut packet = sample_packet(40);
    // Corrupt the ident so the assigner's stamp is observable.
    ipv4::new_unchecked_mut(&mut packet).set_ident(0xdead);
    near.send(packet.clone()).await.unwrap();
    near.send(packet).await.unwrap();

    let first = far.recv().await.unwrap();
    let second = far.recv().await.unwrap();
    let first = ipv4::new_checked(&first).unwrap();
    let second = ipv4::new_checked(&second).unwrap();
    assert_eq!(first.ident(), 0);
    assert_eq!(second.ident(), 1);
    assert!(first.verify_checksum());
    near.close();
}

#[tokio::test]
async fn filters_drop_unwanted() {
    let (near, far) = Stream::pipe(8);
    let near = filter_valid(near);
    let near = filter_checksums(near);
    let near = filter_proto(near, Protocol::Icmp);
    let mut near = filter_dest(near, Address::new(10, 0, 0, 2));

    // Garbage, a wrong-protocol packet, a wrong-destination packet, and a
    // corrupted checksum all disappear.
    far.send(vec![0u8; 4]).await.unwrap();
    let mut wrong_proto = sample_packet(8);
    ipv4::new_unchecked_mut(&mut wrong_proto).set_protocol(Protocol::Udp);
    ipv4::new_unchecked_mut(&mut wrong_proto).fill_checksum();
    far.send(wrong_proto).await.unwrap();
    let mut wrong_dest = sample_packet(8);
    ipv4::new_unchecked_mut(&mut wrong_dest).set_dst_addr(Address::new(10, 0, 0, 9));
    ipv4::new_unchecked_mut(&mut wrong_dest).fill_checksum();
    far.send(wrong_dest).await.unwrap();
    let mut bad_sum = sample_packet(8);
    bad_sum[10] ^= 0xff;
    far.send(bad_sum).await.unwrap();

    let good = sample_packet(8);
    far.send(good.clone()).await.unwrap();
    assert_eq!(near.recv().await.unwrap(), good);
    near.close();
}
