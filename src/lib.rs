//! callmedia is the real-time media engine of a call and conferencing client.
//!
//! It captures and plays local audio and video, carries them over RTP/UDP
//! (G.711 μ-law audio, JPEG video), mixes the audio of several peers and
//! manages the ports, threads and queues of 1:1 calls and small conferences.
//! Signaling and presentation live outside the crate; they talk to it through
//! session descriptors, [`video::video_sink::VideoSink`] and the logger's
//! status channel.

/// Audio capture, playback, mixing and PCMU transport.
pub mod audio;
/// μ-law codec and PCM format conversion.
pub mod codec;
/// Handles configuration loading and typed media settings.
pub mod config;
/// Logging utilities for the engine.
pub mod log;
/// Call and conference orchestration over a shared media context.
pub mod media;
/// UDP helpers and the port pool.
pub mod net;
/// RTP packet parsing and building, JPEG fragmentation.
pub mod rtp;
/// Session descriptor building and parsing.
pub mod sdp;
/// Camera/screen capture and JPEG video transport.
pub mod video;
