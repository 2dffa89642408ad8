//! Chunk the microphone stream into per-chunk WAV files.
//!
//! ```text
//! cargo run --example chunk_mic -- 'out/%02d.wav'
//! ```

use std::io::BufRead;
use std::process::exit;

use audio_chunker_core::ChunkerConfig;
use audio_chunker_cpal::create_session;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let pattern = match std::env::args().nth(1) {
        Some(pattern) => pattern,
        None => {
            eprintln!("usage: chunk_mic <output pattern like out/%02d.wav>");
            exit(1);
        }
    };

    let config = ChunkerConfig {
        output: Some(pattern),
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

    println!("Listening from microphone; press enter to quit.");
    let mut line = String::new();
    let _ = std::io::stdin().lock().read_line(&mut line);

    if let Err(e) = session.stop() {
        eprintln!("error: {e}");
        exit(1);
    }

    for chunk in session.chunks() {
        println!(
            "chunk {:02}: {:.2}s → {}",
            chunk.index,
            chunk.duration_secs,
            chunk.path.as_deref().unwrap_or("(sink)")
        );
    }
}
