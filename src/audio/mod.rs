//! Audio capture, playback, mixing and RTP transport.
pub mod audio_device;
pub mod audio_error;
pub mod audio_forwarder;
pub mod audio_frame;
pub mod audio_frame_sink;
pub mod audio_mixer;
pub mod audio_receiver;
pub mod audio_sender;
pub mod cpal_device;
pub mod frame_queue;
pub mod shared_capture;
