//! End-to-end transfer scenarios: the happy paths.

use crate::*;
use std::time::Duration;

use cairn_core::wire::{Frame, NodeRole};
use cairn_services::{snapshot, SendTarget};
use cairnd::transport::memory::MemoryBus;

#[tokio::test(start_paused = true)]
async fn broadcast_250_byte_file_moves_in_three_chunks() {
    let bus = MemoryBus::new();
    let rx_node = spawn_node(&bus, "leaf2", NodeRole::Receiver, "s1").await;
    let tx_node = spawn_node(&bus, "leaf1", NodeRole::Sender, "s1").await;

    let data: Vec<u8> = (0x00..=0xF9).collect();
    assert_eq!(data.len(), 250);
    let path = source_file("s1", "field-notes.bin", &data);

    tx_node
        .sender
        .send_file(&path, SendTarget::Broadcast)
        .await
        .unwrap();

    let received = rx_node.output_dir.join("received_field-notes.bin");
    wait_for_path(&received).await;
    assert_eq!(std::fs::read(&received).unwrap(), data);

    // Frame accounting: one start, chunks 0..2 in order, one completion.
    let sent = frames_from(&bus, &tx_node.node_id);
    assert!(matches!(
        sent[0],
        Frame::FileStart {
            total_chunks: 3,
            file_size: 250,
            ..
        }
    ));
    let chunk_numbers: Vec<u32> = sent
        .iter()
        .filter_map(|f| match f {
            Frame::FileChunk { chunk_number, .. } => Some(*chunk_number),
            _ => None,
        })
        .collect();
    assert_eq!(chunk_numbers, vec![0, 1, 2]);
    assert!(matches!(sent.last().unwrap(), Frame::FileCompletion { .. }));

    // One ack per chunk, in order.
    let acks: Vec<u32> = frames_from(&bus, "leaf2")
        .iter()
        .filter_map(|f| match f {
            Frame::BatchAck { batch_number, .. } => Some(*batch_number),
            _ => None,
        })
        .collect();
    assert_eq!(acks, vec![0, 1, 2]);

    // Stop-and-wait: chunk k never leaves before the ack for k-1 is on
    // the air.
    let mut acked_through: i64 = -1;
    for record in bus.trace() {
        match Frame::decode(&record.payload) {
            Ok(Frame::FileChunk { chunk_number, .. }) if record.sender_id == "leaf1" => {
                assert_eq!(
                    chunk_number as i64,
                    acked_through + 1,
                    "chunk {chunk_number} emitted with only {acked_through} acked"
                );
            }
            Ok(Frame::BatchAck { batch_number, .. }) => {
                acked_through = acked_through.max(batch_number as i64);
            }
            _ => {}
        }
    }

    tx_node.cleanup();
    rx_node.cleanup();
}

#[tokio::test(start_paused = true)]
async fn single_byte_file_has_one_chunk_and_the_known_digest() {
    let bus = MemoryBus::new();
    let rx_node = spawn_node(&bus, "leaf2", NodeRole::Receiver, "s2").await;
    let tx_node = spawn_node(&bus, "leaf1", NodeRole::Sender, "s2").await;

    let path = source_file("s2", "a.txt", b"A");
    tx_node
        .sender
        .send_file(&path, SendTarget::Broadcast)
        .await
        .unwrap();

    let received = rx_node.output_dir.join("received_a.txt");
    wait_for_path(&received).await;
    assert_eq!(std::fs::read(&received).unwrap(), b"A");

    match &frames_from(&bus, "leaf1")[0] {
        Frame::FileStart {
            total_chunks,
            file_size,
            checksum,
            ..
        } => {
            assert_eq!(*total_chunks, 1);
            assert_eq!(*file_size, 1);
            assert_eq!(checksum, "7fc56270e7a70fa81a5935b72eacbe29");
        }
        other => panic!("expected FileStart first, got {other:?}"),
    }

    tx_node.cleanup();
    rx_node.cleanup();
}

#[tokio::test(start_paused = true)]
async fn zero_byte_file_degenerates_to_start_plus_completion() {
    let bus = MemoryBus::new();
    let rx_node = spawn_node(&bus, "leaf2", NodeRole::Receiver, "s0").await;
    let tx_node = spawn_node(&bus, "leaf1", NodeRole::Sender, "s0").await;

    let path = source_file("s0", "empty.bin", b"");
    tx_node
        .sender
        .send_file(&path, SendTarget::Broadcast)
        .await
        .unwrap();

    let received = rx_node.output_dir.join("received_empty.bin");
    wait_for_path(&received).await;
    assert_eq!(std::fs::read(&received).unwrap(), b"");

    let sent = frames_from(&bus, "leaf1");
    assert_eq!(sent.len(), 2, "start and completion only");
    assert!(matches!(sent[0], Frame::FileStart { total_chunks: 0, .. }));
    assert!(matches!(sent[1], Frame::FileCompletion { .. }));

    tx_node.cleanup();
    rx_node.cleanup();
}

#[tokio::test(start_paused = true)]
async fn targeted_transfer_is_ignored_by_bystanders() {
    let bus = MemoryBus::new();
    let target = spawn_node(&bus, "leaf2", NodeRole::Receiver, "tgt").await;
    let bystander = spawn_node(&bus, "leaf3", NodeRole::Receiver, "tgt").await;
    let tx_node = spawn_node(&bus, "leaf1", NodeRole::Sender, "tgt").await;

    let data = vec![0x42u8; 150];
    let path = source_file("tgt", "for-leaf2.bin", &data);
    tx_node
        .sender
        .send_file(&path, SendTarget::Node { id: "leaf2".into() })
        .await
        .unwrap();

    let received = target.output_dir.join("received_for-leaf2.bin");
    wait_for_path(&received).await;
    assert_eq!(std::fs::read(&received).unwrap(), data);

    // The bystander heard everything and did nothing: no record, no file,
    // not a single frame of its own.
    assert!(!bystander.receiver.has_active().await);
    assert!(!bystander.output_dir.join("received_for-leaf2.bin").exists());
    assert!(frames_from(&bus, "leaf3").is_empty());

    tx_node.cleanup();
    target.cleanup();
    bystander.cleanup();
}

#[tokio::test(start_paused = true)]
async fn discover_draws_announces_into_the_registry() {
    let bus = MemoryBus::new();
    let asker = spawn_node(&bus, "leaf1", NodeRole::Sender, "disc").await;
    let other = spawn_node(&bus, "leaf2", NodeRole::Receiver, "disc").await;

    cairnd::presence::discover(&asker.radio, "leaf1").await.unwrap();

    // leaf2 answers with an announce; leaf1's registry fills in.
    for _ in 0..200 {
        if asker.peers.contains_key("leaf2") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let peers = snapshot(&asker.peers);
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].id, "leaf2");
    assert_eq!(peers[0].role, NodeRole::Receiver);

    // A discover does not record the asker on the answering side.
    assert!(other.peers.is_empty());

    asker.cleanup();
    other.cleanup();
}
