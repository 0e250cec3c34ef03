#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::{
    net::UdpSocket,
    sync::{Arc, Mutex},
    time::Duration,
};

use callmedia::{
    audio::{
        audio_error::AudioError,
        audio_frame::AudioFrame,
        audio_mixer::AudioMixer,
        audio_receiver::{AudioReceiver, ReceiverMode},
        audio_sender::AudioSender,
    },
    codec::{mulaw, pcm::VOICE_FRAME_SAMPLES},
    media::media_devices::MediaDevices,
    net::port_allocator::PortAllocator,
    rtp::{PT_PCMU, rtp_packet::RtpPacket, rtp_sender::RtpSender},
};
use common::{FakeDevices, collect, logger, peer_socket, wait_until};

fn ports() -> PortAllocator {
    PortAllocator::new(43_000, 44_000, 200).unwrap()
}

#[test]
fn sender_sequence_numbers_are_gap_free() {
    let devices = FakeDevices::all();
    let (peer, peer_addr) = peer_socket();
    let pair = ports().allocate_pair(43_000).unwrap();

    let sender = AudioSender::start(pair.secondary, peer_addr, &devices, logger()).unwrap();
    let got = collect(&peer, 25, Duration::from_secs(3));
    sender.stop();
    assert_eq!(got.len(), 25);

    let pkts: Vec<RtpPacket> = got.iter().map(|b| RtpPacket::decode(b).unwrap()).collect();
    let seq0 = pkts[0].header.sequence_number;
    let ts0 = pkts[0].header.timestamp;
    for (i, p) in pkts.iter().enumerate() {
        assert_eq!(p.payload_type(), PT_PCMU);
        assert_eq!(p.header.ssrc, sender.ssrc());
        assert!(!p.marker());
        assert_eq!(p.header.sequence_number, seq0.wrapping_add(i as u16));
        assert_eq!(p.header.timestamp, ts0.wrapping_add(160 * i as u32));
        assert_eq!(p.payload.len(), VOICE_FRAME_SAMPLES);
    }
    // mic value 1000 survives the codec within one quantization step
    let decoded = mulaw::decode(pkts[0].payload[0]);
    assert!((i32::from(decoded) - 1000).abs() <= 64);
}

#[test]
fn sender_without_microphone_fails_at_construction() {
    let devices = FakeDevices::none();
    let (_peer, peer_addr) = peer_socket();
    let pair = ports().allocate_pair(43_100).unwrap();
    assert!(AudioSender::start(pair.secondary, peer_addr, &devices, logger()).is_err());
}

#[test]
fn playback_receiver_needs_an_output_device() {
    let devices = FakeDevices::none();
    let pair = ports().allocate_pair(43_200).unwrap();
    let r = AudioReceiver::start(pair.primary, ReceiverMode::Playback, &devices, logger());
    assert!(r.is_err());
}

#[test]
fn sink_receiver_works_without_devices() {
    let devices = FakeDevices::none();
    let pair = ports().allocate_pair(43_300).unwrap();
    let frames = Arc::new(Mutex::new(Vec::<AudioFrame>::new()));
    let frames_c = Arc::clone(&frames);
    let sink = Arc::new(move |f: AudioFrame| {
        frames_c.lock().unwrap().push(f);
        Ok::<(), AudioError>(())
    });

    let receiver =
        AudioReceiver::start(pair.primary, ReceiverMode::Sink(sink), &devices, logger()).unwrap();

    let tx = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut rtp = RtpSender::audio_pcmu();
    let payload = mulaw::encode_frame(&[-2000; VOICE_FRAME_SAMPLES]);
    for _ in 0..5 {
        let pkt = rtp.build_packet(payload.clone(), false, 160);
        tx.send_to(&pkt.encode(), ("127.0.0.1", pair.primary)).unwrap();
    }
    // not PCMU and too short: both dropped
    let mut video = RtpSender::video_jpeg();
    tx.send_to(&video.next_packet(vec![1, 2, 3], true).encode(), ("127.0.0.1", pair.primary))
        .unwrap();
    tx.send_to(&[0x80, 0x00], ("127.0.0.1", pair.primary)).unwrap();

    assert!(wait_until(Duration::from_secs(2), || frames.lock().unwrap().len() == 5));
    assert!(wait_until(Duration::from_secs(1), || receiver.stats().dropped() == 2));
    receiver.stop();

    let expected = mulaw::decode(mulaw::encode(-2000));
    for f in frames.lock().unwrap().iter() {
        assert!(f.is_full_frame());
        assert!(f.samples.iter().all(|&s| s == expected));
    }
}

#[test]
fn flooded_mixer_slot_keeps_the_last_hundred_frames() {
    let devices = FakeDevices::none();
    let pair = ports().allocate_pair(43_400).unwrap();
    let mixer = AudioMixer::new(100, logger());
    let slot = mixer.add_source();

    let receiver = AudioReceiver::start(
        pair.primary,
        ReceiverMode::Sink(Arc::new(slot)),
        &devices,
        logger(),
    )
    .unwrap();

    let tx = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut rtp = RtpSender::audio_pcmu();
    let value = |k: i16| k * 100;
    for k in 1..=150i16 {
        let payload = mulaw::encode_frame(&[value(k); VOICE_FRAME_SAMPLES]);
        let pkt = rtp.build_packet(payload, false, 160);
        tx.send_to(&pkt.encode(), ("127.0.0.1", pair.primary)).unwrap();
        // keep the local socket buffer from overflowing
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(wait_until(Duration::from_secs(3), || receiver.stats().packets() == 150));
    receiver.stop();

    let mixed: Vec<i16> = std::iter::from_fn(|| mixer.mix_tick()).map(|f| f[0]).collect();
    let expected: Vec<i16> = (51..=150)
        .map(|k| mulaw::decode(mulaw::encode(value(k))))
        .collect();
    assert_eq!(mixed, expected);
}

#[test]
fn mixer_loop_plays_summed_sources() {
    let devices = FakeDevices::all();
    let mixer = AudioMixer::new(100, logger());
    let a = mixer.add_source();
    let b = mixer.add_source();
    mixer.push_frame(a.slot(), AudioFrame::new(vec![300; VOICE_FRAME_SAMPLES]));
    mixer.push_frame(b.slot(), AudioFrame::new(vec![-100; VOICE_FRAME_SAMPLES]));

    mixer.start(devices.open_audio_output().unwrap()).unwrap();
    assert!(wait_until(Duration::from_secs(1), || !devices.played.lock().unwrap().is_empty()));
    mixer.stop();

    let played = devices.played.lock().unwrap();
    assert_eq!(played[0], vec![200; VOICE_FRAME_SAMPLES]);
}
