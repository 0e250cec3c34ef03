//! Stateless audio codec helpers: G.711 μ-law and PCM format conversion.
pub mod mulaw;
pub mod pcm;
