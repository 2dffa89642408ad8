//! Chunk an audio file into per-chunk WAV files.
//!
//! ```text
//! cargo run --example chunk_file -- input.wav 'out/%02d.wav'
//! ```

use std::process::exit;
use std::thread;
use std::time::Duration;

use audio_chunker_core::{ChunkerConfig, ChunkerInput};
use audio_chunker_cpal::create_session;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let (input, pattern) = match (args.next(), args.next()) {
        (Some(input), Some(pattern)) => (input, pattern),
        _ => {
            eprintln!("usage: chunk_file <input.wav> <output pattern like out/%02d.wav>");
            exit(1);
        }
    };

    let config = ChunkerConfig {
        input: ChunkerInput::parse(&input),
        output: Some(pattern),
        write_manifest: true,
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

    println!("Waiting for {input} to be chunked…");
    while session.is_playing() {
        thread::sleep(Duration::from_millis(50));
    }
    // Give the writer a moment to finalize the last chunk.
    thread::sleep(Duration::from_millis(200));

    for chunk in session.chunks() {
        println!(
            "chunk {:02}: {:.2}s → {}",
            chunk.index,
            chunk.duration_secs,
            chunk.path.as_deref().unwrap_or("(sink)")
        );
    }
}
