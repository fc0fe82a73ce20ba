//! Fault scenarios: duplicates, lost acks, corruption, and stalls.

use crate::*;
use std::time::Duration;

use cairn_core::digest::file_digest;
use cairn_core::wire::{Frame, NodeRole};
use cairn_services::SendTarget;
use cairnd::transport::memory::MemoryBus;

fn start_frame(data: &[u8], filename: &str, from: &str) -> Frame {
    Frame::FileStart {
        filename: filename.into(),
        total_chunks: data.len().div_ceil(100) as u32,
        file_size: data.len() as u64,
        checksum: file_digest(data),
        batch_size: 1,
        from: from.into(),
        to: None,
    }
}

fn chunk_frame(filename: &str, index: u32, bytes: &[u8], from: &str) -> Frame {
    Frame::FileChunk {
        filename: filename.into(),
        chunk_number: index,
        batch_number: index,
        data: bytes.to_vec(),
        from: from.into(),
        to: None,
    }
}

fn completion_frame(data: &[u8], filename: &str, from: &str) -> Frame {
    Frame::FileCompletion {
        filename: filename.into(),
        checksum: file_digest(data),
        total_chunks: data.len().div_ceil(100) as u32,
        from: from.into(),
        to: None,
    }
}

#[tokio::test(start_paused = true)]
async fn duplicated_chunk_is_reacked_and_leaves_the_file_intact() {
    let bus = MemoryBus::new();
    let rx_node = spawn_node(&bus, "leaf2", NodeRole::Receiver, "s3").await;
    let (link, _acks) = scripted_peer(&bus, "leaf1").await;

    let data: Vec<u8> = (0x00..=0xF9).collect();
    link.send_text(&start_frame(&data, "dup.bin", "leaf1").encode())
        .await
        .unwrap();
    // Chunk 0 arrives twice, as a retrying radio would deliver it.
    for chunk in [0u32, 0, 1, 2] {
        let start = chunk as usize * 100;
        let end = (start + 100).min(data.len());
        link.send_text(&chunk_frame("dup.bin", chunk, &data[start..end], "leaf1").encode())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    link.send_text(&completion_frame(&data, "dup.bin", "leaf1").encode())
        .await
        .unwrap();

    let received = rx_node.output_dir.join("received_dup.bin");
    wait_for_path(&received).await;
    assert_eq!(std::fs::read(&received).unwrap(), data);

    // One ack per delivery: the replay of chunk 0 earns its own ack.
    let acks: Vec<u32> = frames_from(&bus, "leaf2")
        .iter()
        .filter_map(|f| match f {
            Frame::BatchAck { batch_number, .. } => Some(*batch_number),
            _ => None,
        })
        .collect();
    assert_eq!(acks, vec![0, 0, 1, 2]);

    rx_node.cleanup();
}

#[tokio::test(start_paused = true)]
async fn lost_ack_forces_a_retry_that_still_completes() {
    let bus = MemoryBus::new();
    let rx_node = spawn_node(&bus, "leaf2", NodeRole::Receiver, "s4").await;
    let tx_node = spawn_node(&bus, "leaf1", NodeRole::Sender, "s4").await;

    // The air eats the first ack. The sender must retry chunk 0 and the
    // receiver must re-ack it idempotently.
    bus.drop_matching("\"t\":\"ba\"", 1);

    let data: Vec<u8> = (0x00..=0xF9).collect();
    let path = source_file("s4", "retry.bin", &data);
    tx_node
        .sender
        .send_file(&path, SendTarget::Broadcast)
        .await
        .unwrap();

    let received = rx_node.output_dir.join("received_retry.bin");
    wait_for_path(&received).await;
    assert_eq!(std::fs::read(&received).unwrap(), data);

    // Chunk 0 went out twice; later chunks once.
    let chunk_numbers: Vec<u32> = frames_from(&bus, "leaf1")
        .iter()
        .filter_map(|f| match f {
            Frame::FileChunk { chunk_number, .. } => Some(*chunk_number),
            _ => None,
        })
        .collect();
    assert_eq!(chunk_numbers, vec![0, 0, 1, 2]);

    // Both acks for chunk 0 left the receiver, even though one was lost.
    let zero_acks = frames_from(&bus, "leaf2")
        .iter()
        .filter(|f| matches!(f, Frame::BatchAck { batch_number: 0, .. }))
        .count();
    assert_eq!(zero_acks, 2);

    // The sender's ack counter climbed to the last chunk and never past it.
    assert_eq!(tx_node.latch.last_acked(), 2);

    tx_node.cleanup();
    rx_node.cleanup();
}

#[tokio::test(start_paused = true)]
async fn corrupted_bytes_draw_a_checksum_error_and_no_file() {
    let bus = MemoryBus::new();
    let rx_node = spawn_node(&bus, "leaf2", NodeRole::Receiver, "s5").await;
    let (link, _acks) = scripted_peer(&bus, "leaf1").await;

    let data: Vec<u8> = (0x00..=0xF9).collect();
    let mut corrupted = data.clone();
    corrupted[42] ^= 0xFF;

    link.send_text(&start_frame(&data, "corrupt.bin", "leaf1").encode())
        .await
        .unwrap();
    for chunk in 0u32..3 {
        let start = chunk as usize * 100;
        let end = (start + 100).min(data.len());
        // Chunk 0 carries the flipped byte.
        link.send_text(
            &chunk_frame("corrupt.bin", chunk, &corrupted[start..end], "leaf1").encode(),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    link.send_text(&completion_frame(&data, "corrupt.bin", "leaf1").encode())
        .await
        .unwrap();

    // The record is dropped and the verdict goes back to the sender.
    wait_until_idle(&rx_node.receiver).await;

    let frames = frames_from(&bus, "leaf2");
    let error = frames
        .iter()
        .find_map(|f| match f {
            Frame::TransferError { message, to, .. } => Some((message.clone(), to.clone())),
            _ => None,
        })
        .expect("receiver must report the failure");
    assert_eq!(error.0, "Checksum verification failed");
    assert_eq!(error.1.as_deref(), Some("leaf1"));

    assert!(!rx_node.output_dir.join("received_corrupt.bin").exists());

    rx_node.cleanup();
}

#[tokio::test(start_paused = true)]
async fn seventy_seconds_of_silence_reconnects_then_preserves_partials() {
    let bus = MemoryBus::new();
    let rx_node = spawn_node(&bus, "leaf2", NodeRole::Receiver, "s6").await;
    let (link, _acks) = scripted_peer(&bus, "leaf1").await;

    let data: Vec<u8> = (0x00..=0xF9).collect();
    link.send_text(&start_frame(&data, "stall.bin", "leaf1").encode())
        .await
        .unwrap();
    link.send_text(&chunk_frame("stall.bin", 0, &data[..100], "leaf1").encode())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The sender goes dark and the radio refuses to come back.
    rx_node.endpoint.fail_next_opens(100);
    tokio::time::sleep(Duration::from_secs(70)).await;

    // The watchdog tripped, reconnect exhausted, and the partial was
    // flushed with the one received chunk at its offset.
    let partial = rx_node.output_dir.join("partial_stall.bin");
    assert!(partial.exists(), "stall must leave a partial file");
    assert_eq!(std::fs::read(&partial).unwrap(), &data[..100]);
    assert!(!rx_node.radio.is_connected().await);

    // Reception state survives in memory for a later recovery.
    assert!(rx_node.receiver.has_active().await);

    rx_node.cleanup();
}
