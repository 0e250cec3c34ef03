#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::{net::UdpSocket, sync::Arc, time::Duration};

use callmedia::{
    codec::{mulaw, pcm::VOICE_FRAME_SAMPLES},
    media::{
        call_media_manager::CallMediaManager, media_error::MediaError,
        stream_starter::StreamStarter,
    },
    rtp::{PT_PCMU, rtp_packet::RtpPacket, rtp_sender::RtpSender},
    sdp::remote_endpoint::RemoteEndpoint,
    video::{frame_grabber::VideoSource, video_sink::LatestFrameSink},
};
use common::{FakeDevices, collect, context, descriptor, logger, peer_socket, wait_until};

#[test]
fn audio_call_sends_and_plays() {
    let devices = Arc::new(FakeDevices::all());
    let ctx = context(51_300, Arc::clone(&devices));
    let call = CallMediaManager::new(Arc::clone(&ctx)).unwrap();

    let offer = RemoteEndpoint::from_descriptor(&call.create_sdp_offer(false));
    assert_eq!(offer.audio_port, call.audio_ports().primary);
    assert!(!offer.offers_video);

    let (peer, peer_addr) = peer_socket();
    call.start_audio_stream(&descriptor(peer_addr.port(), None))
        .unwrap();
    assert!(call.is_audio_active());
    assert!(matches!(
        call.start_audio_stream(&descriptor(peer_addr.port(), None)),
        Err(MediaError::AlreadyActive(_))
    ));

    let got = collect(&peer, 5, Duration::from_secs(2));
    assert_eq!(got.len(), 5);
    for raw in &got {
        let pkt = RtpPacket::decode(raw).unwrap();
        assert_eq!(pkt.payload_type(), PT_PCMU);
    }

    // the peer talks back to the advertised port
    let mut rtp = RtpSender::audio_pcmu();
    let payload = mulaw::encode_frame(&[500; VOICE_FRAME_SAMPLES]);
    let tx = UdpSocket::bind("127.0.0.1:0").unwrap();
    for _ in 0..3 {
        let pkt = rtp.build_packet(payload.clone(), false, 160);
        tx.send_to(&pkt.encode(), ("127.0.0.1", offer.audio_port)).unwrap();
    }
    assert!(wait_until(Duration::from_secs(2), || devices.played.lock().unwrap().len() >= 3));

    call.stop_streams();
    assert!(!call.is_audio_active());
    call.stop_streams();
}

#[test]
fn missing_microphone_leaves_nothing_running() {
    let devices = Arc::new(FakeDevices {
        has_input: false,
        ..FakeDevices::all()
    });
    let ctx = context(53_400, devices);
    let call = CallMediaManager::new(Arc::clone(&ctx)).unwrap();
    let (_peer, peer_addr) = peer_socket();

    let r = call.start_audio_stream(&descriptor(peer_addr.port(), None));
    assert!(matches!(r, Err(MediaError::Audio(_))));
    assert!(!call.is_audio_active());
}

#[test]
fn dropping_the_manager_releases_its_ports() {
    let ctx = context(55_500, Arc::new(FakeDevices::all()));
    let call = CallMediaManager::new(Arc::clone(&ctx)).unwrap();
    let audio = call.audio_ports();
    let video = call.video_ports();
    assert_eq!(video.primary, audio.primary + 2);
    assert_eq!(ctx.ports().leased_count(), 4);

    drop(call);
    assert_eq!(ctx.ports().leased_count(), 0);
}

#[test]
fn video_loops_back_into_the_registered_sink() {
    let ctx = context(57_600, Arc::new(FakeDevices::all()));
    let call = CallMediaManager::new(Arc::clone(&ctx)).unwrap();
    let sink = LatestFrameSink::new();
    call.set_remote_video_sink(Arc::clone(&sink) as _);
    call.set_video_source(VideoSource::Screen);

    let offer = call.create_sdp_offer(true);
    let endpoint = RemoteEndpoint::from_descriptor(&offer);
    assert_eq!(endpoint.video_port, call.video_ports().primary);

    // our own offer as the remote: the sender feeds our receiver
    call.start_video_stream(&offer).unwrap();
    assert!(call.is_video_active());
    assert!(wait_until(Duration::from_secs(3), || sink.presented() > 0));

    let frame = sink.take().unwrap();
    assert_eq!((frame.width, frame.height), (640, 480));
    // fake screen is pure green
    assert!(frame.rgb[1] > 200 && frame.rgb[0] < 50 && frame.rgb[2] < 50);

    call.stop_video_stream();
    assert!(!call.is_video_active());
}

#[test]
fn camera_falls_back_to_screen() {
    let devices = Arc::new(FakeDevices {
        has_camera: false,
        ..FakeDevices::all()
    });
    let ctx = context(59_700, devices);
    let call = CallMediaManager::new(Arc::clone(&ctx)).unwrap();
    let (peer, peer_addr) = peer_socket();

    call.start_video_stream(&descriptor(peer_addr.port(), Some(peer_addr.port())))
        .unwrap();
    assert!(!collect(&peer, 1, Duration::from_secs(2)).is_empty());
    call.stop_streams();
}

#[test]
fn async_start_reports_back() {
    let ctx = context(62_000, Arc::new(FakeDevices::all()));
    let call = Arc::new(CallMediaManager::new(Arc::clone(&ctx)).unwrap());
    let starter = StreamStarter::new(Duration::from_secs(2), logger());
    let (_peer, peer_addr) = peer_socket();

    let (tx, rx) = std::sync::mpsc::channel();
    starter
        .start_audio_async(
            Arc::clone(&call),
            descriptor(peer_addr.port(), None),
            move |r| tx.send(r.is_ok()).unwrap(),
        )
        .unwrap();
    assert!(rx.recv_timeout(Duration::from_secs(3)).unwrap());
    assert!(call.is_audio_active());
    call.stop_streams();
}
