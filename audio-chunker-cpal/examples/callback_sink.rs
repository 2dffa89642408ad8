//! Deliver chunks to in-process callbacks instead of files.
//!
//! ```text
//! cargo run --example callback_sink -- mic
//! cargo run --example callback_sink -- input.wav
//! ```

use std::io::BufRead;
use std::process::exit;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use audio_chunker_core::{CallbackSink, ChunkerConfig, ChunkerInput};
use audio_chunker_cpal::create_session;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let input = std::env::args().nth(1).unwrap_or_else(|| "mic".into());

    let sink = Arc::new(CallbackSink::new());
    sink.set_segment_callback(|batch| {
        let frames: u64 = batch.iter().map(|b| b.frames()).sum();
        println!("got segment: {} buffers, {frames} frames", batch.len());
    });

    let config = ChunkerConfig {
        input: ChunkerInput::parse(&input),
        sink: Some(sink),
        sample_rate: 8_000,
        max_chunk_duration: Duration::from_secs(2),
        ..Default::default()
    };

    let session = match create_session(config) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("error: {e}");
            exit(1);
        }
    };

    if let Err(e) = session.play() {
        eprintln!("error: {e}");
        exit(1);
    }

    if input == "mic" {
        println!("Listening from microphone; press enter to quit.");
        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
        if let Err(e) = session.stop() {
            eprintln!("error: {e}");
            exit(1);
        }
    } else {
        println!("Waiting for {input} to be chunked…");
        while session.is_playing() {
            thread::sleep(Duration::from_millis(50));
        }
    }
}
