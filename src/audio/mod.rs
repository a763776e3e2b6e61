//! # Audio Capture Module
//!
//! Durable storage for audio streamed over `/ws/audio`.
//!
//! ## Key Components:
//! - **WebSocket Handler**: lives in `src/websocket.rs` at the root level
//! - **Audio Sink**: one exclusively-owned, flushed-per-chunk file per connection
//!
//! ## Audio Format:
//! Bytes are stored exactly as received. The codec (typically WebM/Opus from a
//! browser `MediaRecorder`) is neither validated nor transcoded.

pub mod sink;  // Per-connection capture file

pub use sink::AudioSink;
