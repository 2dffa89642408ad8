pub mod chunker;
mod dispatcher;
