//! Minimal session descriptor: the `c=` address and the `m=audio` / `m=video` ports.
pub mod remote_endpoint;
pub mod sdp_error;
pub mod session_descriptor;
