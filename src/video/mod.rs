//! Camera/screen capture and JPEG-over-RTP transport.
pub mod frame_grabber;
pub mod jpeg;
pub mod video_error;
pub mod video_receiver;
pub mod video_sender;
pub mod video_sink;
