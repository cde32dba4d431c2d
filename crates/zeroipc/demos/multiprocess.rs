// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multi-process demo: a writer creates a named queue in a shared
//! segment and a reader, started as a separate process, attaches to
//! the same segment by name alone and drains it.
//!
//! # Usage
//!
//! Terminal 1 (writer):
//! ```bash
//! cargo run --example multiprocess -- write
//! ```
//!
//! Terminal 2 (reader):
//! ```bash
//! cargo run --example multiprocess -- read
//! ```
//!
//! Cleanup if a run is interrupted before either side unlinks the
//! segment:
//! ```bash
//! cargo run --example multiprocess -- cleanup
//! ```

use std::time::{Duration, Instant};
use zeroipc::{Queue, Segment, TableCapacity};

const SEGMENT_NAME: &str = "/zeroipc_demo_multiprocess";
const QUEUE_CAPACITY: usize = 256;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        println!("Usage: {} <write|read|cleanup>", args[0]);
        println!();
        println!("  write   - create the segment and push messages");
        println!("  read    - attach to the segment and drain messages");
        println!("  cleanup - unlink the segment if a run was interrupted");
        return;
    }

    match args[1].as_str() {
        "write" => run_writer(),
        "read" => run_reader(),
        "cleanup" => run_cleanup(),
        other => println!("Unknown command: {other}. Use 'write', 'read', or 'cleanup'"),
    }
}

fn run_writer() {
    println!("=== writer ===");
    println!("creating segment {SEGMENT_NAME}");

    let _ = Segment::unlink(SEGMENT_NAME);
    let segment =
        Segment::create(SEGMENT_NAME, 1 << 20, TableCapacity::Default).expect("create segment");
    let queue = Queue::<[u8; 64]>::create(&segment, "messages", QUEUE_CAPACITY)
        .expect("create message queue");

    println!("queue ready, capacity {}", queue.capacity());
    println!("start a reader in another terminal: multiprocess read");
    println!("press Ctrl+C to stop");
    println!();

    let mut seq = 0u64;
    loop {
        let text = format!("message #{seq} from pid {}", std::process::id());
        let mut payload = [0u8; 64];
        let bytes = text.as_bytes();
        let len = bytes.len().min(payload.len());
        payload[..len].copy_from_slice(&bytes[..len]);

        match queue.push(payload) {
            Ok(()) => {
                println!("[tx] {text}");
                seq += 1;
            }
            Err(e) => println!("[tx] error: {e}"),
        }

        std::thread::sleep(Duration::from_millis(500));
    }
}

fn run_reader() {
    println!("=== reader ===");
    println!("attaching to segment {SEGMENT_NAME}");

    let deadline = Instant::now() + Duration::from_secs(10);
    while !Segment::exists(SEGMENT_NAME) {
        if Instant::now() > deadline {
            println!("timed out waiting for segment. Is the writer running?");
            return;
        }
        println!("waiting for writer to create the segment...");
        std::thread::sleep(Duration::from_millis(500));
    }

    let segment = Segment::open(SEGMENT_NAME).expect("open segment");
    let queue = Queue::<[u8; 64]>::open(&segment, "messages").expect("open message queue");

    println!("attached. waiting for messages...");
    println!();

    let mut received = 0u64;
    let start = Instant::now();

    loop {
        match queue.pop() {
            Ok(payload) => {
                let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
                let text = String::from_utf8_lossy(&payload[..end]);
                println!("[rx] {text}");
                received += 1;
            }
            Err(_) => std::thread::sleep(Duration::from_millis(10)),
        }

        if received > 0 && start.elapsed().as_secs() > 0 && start.elapsed().as_secs() % 5 == 0 {
            let rate = received as f64 / start.elapsed().as_secs_f64();
            println!("--- stats: {received} messages, {rate:.1} msg/s ---");
        }
    }
}

fn run_cleanup() {
    println!("=== cleanup ===");
    if Segment::exists(SEGMENT_NAME) {
        match Segment::unlink(SEGMENT_NAME) {
            Ok(()) => println!("removed segment {SEGMENT_NAME}"),
            Err(e) => println!("failed to remove segment: {e}"),
        }
    } else {
        println!("segment {SEGMENT_NAME} does not exist");
    }

    println!();
    println!("remaining zeroipc segments in /dev/shm:");
    if let Ok(entries) = std::fs::read_dir("/dev/shm") {
        let mut found = false;
        for entry in entries.flatten() {
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with("zeroipc_") {
                    println!("  {name}");
                    found = true;
                }
            }
        }
        if !found {
            println!("  (none)");
        }
    }
}
