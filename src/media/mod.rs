//! Orchestration: shared context, device provider, call and conference managers.
pub mod call_media_manager;
pub mod conference_media_manager;
pub mod media_context;
pub mod media_devices;
pub mod media_error;
pub mod participant;
pub mod stream_starter;
pub mod stream_stats;
pub mod utils;
