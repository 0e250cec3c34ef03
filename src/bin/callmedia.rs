//! Command-line demo of a 1:1 call.
//!
//! Prints the local session descriptor, reads the peer's descriptor from a
//! file (or stdin, ended by an empty line) and streams until Enter is pressed.
//!
//! ```text
//! callmedia [--config PATH] [--remote FILE] [--video] [--screen]
//! ```

use std::{
    env, fs,
    io::{self, BufRead},
    sync::Arc,
};

use callmedia::{
    config::{Config, MediaSettings},
    log::{log_sink::LogSink, logger::Logger},
    media::{call_media_manager::CallMediaManager, media_context::MediaContext},
    video::{frame_grabber::VideoSource, video_sink::LatestFrameSink},
};

#[derive(Default)]
struct Args {
    config: Option<String>,
    remote: Option<String>,
    video: bool,
    screen: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();
    let mut it = env::args().skip(1);
    while let Some(a) = it.next() {
        match a.as_str() {
            "--config" => args.config = Some(it.next().ok_or("--config needs a path")?),
            "--remote" => args.remote = Some(it.next().ok_or("--remote needs a file")?),
            "--video" => args.video = true,
            "--screen" => args.screen = true,
            other => return Err(format!("unknown argument '{other}'")),
        }
    }
    Ok(args)
}

fn read_descriptor(path: Option<&str>) -> io::Result<String> {
    if let Some(p) = path {
        return fs::read_to_string(p);
    }
    println!("Paste the remote descriptor, then an empty line:");
    let mut text = String::new();
    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            break;
        }
        text.push_str(&line);
        text.push_str("\r\n");
    }
    Ok(text)
}

fn main() {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    let config = match &args.config {
        Some(path) => Config::load(path),
        None => Config::load_first(&["callmedia.conf", "callmedia_default.conf"]),
    }
    .unwrap_or_else(|e| {
        eprintln!("Error loading config: {e}. Using defaults.");
        Config::empty()
    });

    let logger = Arc::new(Logger::start_from_config(4096, 256, 50, &config));
    println!("Logging to {}", logger.file_path().display());
    let sink: Arc<dyn LogSink> = Arc::new(logger.handle());

    if let Err(e) = run(&args, &config, sink) {
        eprintln!("callmedia: {e}");
        std::process::exit(1);
    }
    while let Some(line) = logger.try_recv_status() {
        println!("{line}");
    }
}

fn run(args: &Args, config: &Config, logger: Arc<dyn LogSink>) -> Result<(), Box<dyn std::error::Error>> {
    let settings = MediaSettings::from_config(config);
    let ctx = MediaContext::with_system_devices(settings, logger)?;
    let manager = CallMediaManager::new(ctx)?;

    println!("--- local descriptor ---");
    print!("{}", manager.create_sdp_offer(args.video));
    println!("------------------------");

    let remote = read_descriptor(args.remote.as_deref())?;
    manager.start_audio_stream(&remote)?;

    let remote_video = LatestFrameSink::new();
    if args.video {
        if args.screen {
            manager.set_video_source(VideoSource::Screen);
        }
        manager.set_remote_video_sink(remote_video.clone());
        manager.start_video_stream(&remote)?;
    }

    println!("Streaming. Press Enter to hang up.");
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;

    manager.stop_streams();
    if args.video {
        println!("Received {} video frames", remote_video.presented());
    }
    Ok(())
}
