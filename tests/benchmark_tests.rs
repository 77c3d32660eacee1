//! Performance benchmarks for the hot paths of the relay

use server::client_manager::{ClientManager, Frame, Transport};
use server::relay::{encode_frame, fan_out};
use shared::{
    decode_client_message, decode_server_message, encode_message, PlayerView, ServerMessage,
    MAX_HP,
};
use std::collections::BTreeMap;
use std::time::Instant;
use tokio::sync::mpsc;

fn snapshot(players: u64) -> ServerMessage {
    let players: BTreeMap<_, _> = (1..=players)
        .map(|id| {
            (
                id,
                PlayerView {
                    name: format!("Player{}", id),
                    x: id as f64 * 12.5,
                    y: 480.0 - id as f64,
                    color: [120, 200, 80],
                    hp: MAX_HP,
                    max_hp: MAX_HP,
                },
            )
        })
        .collect();
    ServerMessage::State { players }
}

/// Benchmarks encoding a full snapshot, done once per broadcast tick
#[test]
fn benchmark_snapshot_encoding() {
    let state = snapshot(100);

    let iterations = 2_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let _ = encode_message(&state).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Snapshot encoding (100 players): {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Well under one 50ms tick per snapshot
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks decoding client traffic, done once per inbound line
#[test]
fn benchmark_client_message_decoding() {
    let lines = [
        r#"{"type":"pos","x":123.5,"y":456.25}"#,
        r#"{"type":"shot","x":1,"y":2,"vx":300,"vy":-40,"damage":12}"#,
        r#"{"type":"hit","victim":3,"damage":10}"#,
        r#"{"type":"ping"}"#,
    ];

    let iterations = 50_000;
    let start = Instant::now();

    for i in 0..iterations {
        let _ = decode_client_message(lines[i % lines.len()]).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Client message decoding: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks a client-side decode of a full snapshot
#[test]
fn benchmark_snapshot_decoding() {
    let line = encode_message(&snapshot(100)).unwrap();

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let decoded = decode_server_message(&line).unwrap();
        assert_eq!(decoded.kind(), "state");
    }

    let duration = start.elapsed();
    println!(
        "Snapshot decoding (100 players): {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 5000);
}

/// Benchmarks fanning one frame out to many connections
#[test]
fn benchmark_fan_out() {
    let mut clients = ClientManager::new(512);
    let mut receivers = Vec::new();
    for port in 0..256u16 {
        let (tx, rx) = mpsc::channel::<Frame>(4);
        let addr = format!("127.0.0.1:{}", 10_000 + port).parse().unwrap();
        clients.add_client(addr, Transport::Tcp, tx).unwrap();
        receivers.push(rx);
    }

    let frame = encode_frame(&snapshot(20)).unwrap();

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let report = fan_out(&clients, &frame);
        assert_eq!(report.delivered, 256);
        for rx in receivers.iter_mut() {
            let _ = rx.try_recv();
        }
    }

    let duration = start.elapsed();
    println!(
        "Fan-out to 256 clients: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 5000);
}
