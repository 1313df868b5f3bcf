//! End-to-end throughput benchmark for Matchcast.
//!
//! Every client joins one room and sends commentary as fast as it can; every
//! commentary frame is relayed to every member, so received messages grow with
//! the square of the client count.
//!
//! Usage: `e2e_throughput [clients] [url]`

use futures_util::{SinkExt, StreamExt};
use matchcast_protocol::{codec, ClientMessage};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const ROOM: &str = "benchmark";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());

    println!("Matchcast end-to-end throughput benchmark");
    println!("Make sure the server is running: cargo run --release --bin matchcast");
    println!();

    run_room_benchmark(num_clients, url).await;
}

async fn run_room_benchmark(num_clients: usize, url: String) {
    println!("Room relay: {} clients in room '{}'", num_clients, ROOM);
    println!("Warmup: {}s, measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let message_count = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let msg_count = Arc::clone(&message_count);
        let barrier = Arc::clone(&barrier);
        let url = url.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(&url, msg_count, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        });
        handles.push(handle);
    }

    // Wait for all clients to join
    barrier.wait().await;
    println!("All {} clients joined", num_clients);

    println!("Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    // Reset counter and start measurement
    message_count.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_messages = message_count.load(Ordering::SeqCst);

    let msgs_per_sec = total_messages as f64 / elapsed.as_secs_f64();
    let msgs_per_sec_per_client = msgs_per_sec / num_clients as f64;

    println!();
    println!("Results");
    println!("  Clients:          {:>12}", num_clients);
    println!("  Duration:         {:>12.2}s", elapsed.as_secs_f64());
    println!("  Messages received:{:>12}", total_messages);
    println!("  Throughput:       {:>12.0} msg/s", msgs_per_sec);
    println!("  Per client:       {:>12.0} msg/s", msgs_per_sec_per_client);

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    url: &str,
    message_count: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    // The server greets with our connection ID
    receiver.next().await.ok_or("Connection closed before greeting")??;

    let join = codec::encode(&ClientMessage::join_room(ROOM))?;
    sender.send(Message::Text(join)).await?;

    // Wait for every client to be in the room
    barrier.wait().await;

    let commentary = codec::encode(&ClientMessage::commentary(
        ROOM,
        json!({"text": "what a save!"}),
    ))?;
    let commentary_msg = Message::Text(commentary);

    // Separate receiver task for full-duplex operation
    let recv_count = message_count.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            let Ok(Message::Text(text)) = result else {
                continue;
            };
            if let Ok(frame) = serde_json::from_str::<Value>(&text) {
                if frame["type"] == "commentary" {
                    recv_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    // Send loop
    loop {
        if sender.send(commentary_msg.clone()).await.is_err() {
            break;
        }
        // Small yield to not starve the receiver task
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
