use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use mediaflow::prelude::*;

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug)]
enum Seen<T> {
    Output(T),
    Error(SessionError),
    Flushed(Result<(), SessionError>),
}

type Log<T> = Arc<Mutex<Vec<Seen<T>>>>;

fn recorder<T: Send + 'static>() -> (Log<T>, Callbacks<T>) {
    let log: Log<T> = Arc::default();
    let (out, err) = (log.clone(), log.clone());
    let callbacks = Callbacks::new(
        move |o| out.lock().unwrap().push(Seen::Output(o)),
        move |e| err.lock().unwrap().push(Seen::Error(e)),
    );
    (log, callbacks)
}

fn flushed_into<T: Send + 'static>(log: &Log<T>) -> impl FnOnce(Result<(), SessionError>) + Send + 'static {
    let log = log.clone();
    move |r| log.lock().unwrap().push(Seen::Flushed(r))
}

fn chunks(log: &Log<EncodedChunk>) -> Vec<EncodedChunk> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|s| match s {
            Seen::Output(c) => Some(c.clone()),
            _ => None,
        })
        .collect()
}

fn frame(pool: &BufferPool, format: PixelFormat, w: u32, h: u32, ts: i64) -> FrameLease {
    let res = Resolution::new(w, h).unwrap();
    let meta = FrameMeta::new(MediaFormat::new(format, res, VideoColorSpace::default()), ts)
        .with_duration(33_333);
    FrameLease::alloc(pool, meta).unwrap()
}

fn patterned_i420(pool: &BufferPool, w: u32, h: u32, ts: i64, seed: u8) -> FrameLease {
    let res = Resolution::new(w, h).unwrap();
    let meta = FrameMeta::new(MediaFormat::new(PixelFormat::I420, res, VideoColorSpace::default()), ts)
        .with_duration(33_333);
    let bytes: Vec<u8> = (0..PixelFormat::I420.frame_size(w, h))
        .map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed))
        .collect();
    FrameLease::from_packed(pool, meta, &bytes).unwrap()
}

#[test]
fn chunks_arrive_in_order_before_flush_completion() {
    init_tracing();
    let toolkit = LoopbackToolkit::new();
    let (log, callbacks) = recorder();
    let mut encoder = VideoEncoder::new(toolkit.clone(), callbacks);
    encoder.configure(VideoEncoderConfig::new("vp8", 64, 48)).unwrap();

    let pool = BufferPool::default();
    for i in 0..10 {
        encoder
            .submit(frame(&pool, PixelFormat::I420, 64, 48, i * 33_333), EncodeOptions::default())
            .unwrap();
    }
    let ticket = encoder.flush(flushed_into(&log));
    assert_eq!(encoder.pump_until(&ticket, WAIT), Some(Ok(())));

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 11);
    assert!(matches!(log.last(), Some(Seen::Flushed(Ok(())))));
    let stamps: Vec<i64> = log
        .iter()
        .filter_map(|s| match s {
            Seen::Output(c) => Some(c.timestamp_us),
            _ => None,
        })
        .collect();
    assert_eq!(stamps, (0..10).map(|i| i * 33_333).collect::<Vec<_>>());
}

#[test]
fn flush_ticket_resolves_without_pumping() {
    init_tracing();
    let toolkit = LoopbackToolkit::new();
    toolkit.set_lookahead(0);
    let (log, callbacks) = recorder();
    let mut encoder = VideoEncoder::new(toolkit, callbacks);
    encoder.configure(VideoEncoderConfig::new("vp8", 32, 32)).unwrap();

    let pool = BufferPool::default();
    for ts in 0..40 {
        encoder
            .submit(frame(&pool, PixelFormat::I420, 32, 32, ts), EncodeOptions::default())
            .unwrap();
    }
    let ticket = encoder.flush(flushed_into(&log));
    assert_eq!(ticket.wait_timeout(Duration::from_secs(3)), Some(Ok(())));
    assert_eq!(encoder.queue_len(), 0);
    assert_eq!(encoder.pending_results(), 41);
    assert_eq!(encoder.metrics().backpressure, 0);

    encoder.pump();
    assert_eq!(chunks(&log).len(), 40);
    assert!(matches!(log.lock().unwrap().last(), Some(Seen::Flushed(Ok(())))));
}

#[test]
fn h264_round_trip_with_avc_description() {
    init_tracing();
    let toolkit = LoopbackToolkit::new();
    let (enc_log, callbacks) = recorder();
    let mut encoder = VideoEncoder::new(toolkit.clone(), callbacks);
    encoder
        .configure(
            VideoEncoderConfig::new("avc1.42001f", 320, 240)
                .with_bitrate(500_000)
                .with_bitrate_mode(BitrateMode::Constant)
                .with_framerate(30.0)
                .with_avc_format(AvcFormat::Avc),
        )
        .unwrap();
    assert_eq!(encoder.implementation().unwrap().name, "libx264");

    let pool = BufferPool::default();
    for i in 0..60 {
        encoder
            .submit(patterned_i420(&pool, 320, 240, i * 33_333, i as u8), EncodeOptions::default())
            .unwrap();
    }
    let ticket = encoder.flush(flushed_into(&enc_log));
    assert_eq!(encoder.pump_until(&ticket, WAIT), Some(Ok(())));
    encoder.close();

    let encoded = chunks(&enc_log);
    assert_eq!(encoded.len(), 60);
    assert!(encoded[0].keyframe);
    let description = encoded[0].extradata.clone().expect("avc description on first keyframe");
    assert!(encoded.windows(2).all(|w| w[0].timestamp_us <= w[1].timestamp_us));
    assert!(matches!(enc_log.lock().unwrap().last(), Some(Seen::Flushed(Ok(())))));

    let (dec_log, callbacks) = recorder::<DecodedFrame>();
    let mut decoder = VideoDecoder::new(toolkit.clone(), callbacks);
    decoder
        .configure(
            VideoDecoderConfig::new("avc1.42001f")
                .with_coded_size(320, 240)
                .with_description(description),
        )
        .unwrap();
    for chunk in encoded {
        decoder.submit(chunk).unwrap();
    }
    let ticket = decoder.flush(flushed_into(&dec_log));
    assert_eq!(decoder.pump_until(&ticket, WAIT), Some(Ok(())));

    let log = dec_log.lock().unwrap();
    let frames: Vec<&DecodedFrame> = log
        .iter()
        .filter_map(|s| match s {
            Seen::Output(f) => Some(f),
            _ => None,
        })
        .collect();
    assert_eq!(frames.len(), 60);
    assert_eq!(frames[7].frame.width(), 320);
    assert_eq!(frames[7].timestamp_us, 7 * 33_333);
    assert_eq!(
        frames[7].frame.to_packed(),
        patterned_i420(&pool, 320, 240, 0, 7).to_packed()
    );
}

#[test]
fn rgba_input_is_converted_and_decoder_output_can_be_converted() {
    init_tracing();
    let toolkit = LoopbackToolkit::new();
    let (log, callbacks) = recorder();
    let mut encoder = VideoEncoder::new(toolkit.clone(), callbacks);
    encoder.configure(VideoEncoderConfig::new("vp8", 32, 32)).unwrap();

    let pool = BufferPool::default();
    encoder
        .submit(frame(&pool, PixelFormat::Rgba, 32, 32, 0), EncodeOptions::keyframe())
        .unwrap();
    let ticket = encoder.flush(|_| {});
    encoder.pump_until(&ticket, WAIT);
    let encoded = chunks(&log);
    assert_eq!(encoded.len(), 1);

    let (dec_log, callbacks) = recorder::<DecodedFrame>();
    let mut decoder = VideoDecoder::new(toolkit, callbacks);
    decoder
        .configure(VideoDecoderConfig::new("vp8").with_output_format(PixelFormat::Nv12))
        .unwrap();
    decoder.submit(encoded[0].clone()).unwrap();
    let ticket = decoder.flush(|_| {});
    decoder.pump_until(&ticket, WAIT);
    let log = dec_log.lock().unwrap();
    match &log[0] {
        Seen::Output(f) => assert_eq!(f.frame.pixel_format(), PixelFormat::Nv12),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn software_is_chosen_when_no_hardware_is_registered() {
    init_tracing();
    let (_log, callbacks) = recorder::<EncodedChunk>();
    let mut encoder = VideoEncoder::new(LoopbackToolkit::new(), callbacks);
    encoder
        .configure(
            VideoEncoderConfig::new("avc1.42001f", 64, 48)
                .with_hardware_acceleration(HwPreference::NoPreference),
        )
        .unwrap();
    let imp = encoder.implementation().unwrap();
    assert_eq!(imp.name, "libx264");
    assert!(!imp.fallback);
}

#[cfg(target_os = "linux")]
#[test]
fn hardware_open_failure_falls_back_to_software() {
    init_tracing();
    let toolkit = LoopbackToolkit::new().with_encoders(["h264_vaapi"]);
    toolkit.inject("h264_vaapi", Failure::Open);
    let (log, callbacks) = recorder::<EncodedChunk>();
    let mut encoder = VideoEncoder::new(toolkit.clone(), callbacks);
    encoder
        .configure(VideoEncoderConfig::new("avc1.42001f", 64, 48))
        .unwrap();
    let imp = encoder.implementation().unwrap().clone();
    assert_eq!(imp.name, "libx264");
    assert!(imp.fallback);
    assert_eq!(imp.to_string(), "libx264 (Software, fallback)");

    let events = toolkit.events();
    let pos = |name: &str| events.iter().position(|e| e == name).unwrap();
    assert!(pos("open-failed:h264_vaapi") < pos("drop-frames"));
    assert!(pos("drop-frames") < pos("drop-device:Vaapi"));
    assert!(pos("drop-device:Vaapi") < pos("open:libx264"));

    let pool = BufferPool::default();
    encoder
        .submit(frame(&pool, PixelFormat::I420, 64, 48, 0), EncodeOptions::default())
        .unwrap();
    let ticket = encoder.flush(|_| {});
    assert_eq!(encoder.pump_until(&ticket, WAIT), Some(Ok(())));
    assert_eq!(chunks(&log).len(), 1);
}

#[cfg(target_os = "linux")]
#[test]
fn missing_hardware_device_falls_back_to_software() {
    init_tracing();
    let toolkit = LoopbackToolkit::new().with_encoders(["h264_vaapi"]);
    toolkit.fail_device(HwDeviceType::Vaapi);
    let (_log, callbacks) = recorder::<EncodedChunk>();
    let mut encoder = VideoEncoder::new(toolkit.clone(), callbacks);
    encoder
        .configure(VideoEncoderConfig::new("avc1.42001f", 64, 48))
        .unwrap();
    let imp = encoder.implementation().unwrap().clone();
    assert_eq!(imp.name, "libx264");
    assert!(imp.fallback);
    // No device means no frame pool, so the VA-API open itself fails.
    assert_eq!(
        toolkit.events(),
        vec!["device-failed:Vaapi", "open-failed:h264_vaapi", "open:libx264"]
    );
}

#[cfg(target_os = "linux")]
#[test]
fn hardware_decoder_open_failure_falls_back_to_software() {
    init_tracing();
    let toolkit = LoopbackToolkit::new().with_decoders(["h264_vaapi"]);
    toolkit.inject("h264_vaapi", Failure::Open);
    let (_log, callbacks) = recorder::<DecodedFrame>();
    let mut decoder = VideoDecoder::new(toolkit.clone(), callbacks);
    decoder.configure(VideoDecoderConfig::new("avc1.42001f")).unwrap();
    let imp = decoder.implementation().unwrap().clone();
    assert_eq!(imp.name, "h264");
    assert_eq!(imp.accel, HwAccel::None);
    assert!(imp.fallback);
    assert_eq!(
        toolkit.events(),
        vec!["device:Vaapi", "open-failed:h264_vaapi", "drop-device:Vaapi", "open:h264"]
    );
}

#[test]
fn frames_drained_by_flush_keep_their_own_timestamps() {
    init_tracing();
    let toolkit = LoopbackToolkit::new();
    toolkit.set_lookahead(0);
    let (enc_log, callbacks) = recorder();
    let mut encoder = VideoEncoder::new(toolkit.clone(), callbacks);
    encoder.configure(VideoEncoderConfig::new("vp8", 16, 16)).unwrap();
    let pool = BufferPool::default();
    for seed in 0..3u8 {
        encoder
            .submit(
                patterned_i420(&pool, 16, 16, seed as i64 * 33_333, seed),
                EncodeOptions::default(),
            )
            .unwrap();
    }
    let ticket = encoder.flush(|_| {});
    assert_eq!(encoder.pump_until(&ticket, WAIT), Some(Ok(())));
    let mut encoded = chunks(&enc_log);
    assert_eq!(encoded.len(), 3);
    for (i, chunk) in encoded.iter_mut().enumerate() {
        chunk.timestamp_us = 40_000 * i as i64;
        chunk.duration_us = 40_000 + 1_000 * i as i64;
    }

    // The decoder holds two packets back until it is drained.
    toolkit.set_decoder_delay(2);
    let (dec_log, callbacks) = recorder::<DecodedFrame>();
    let mut decoder = VideoDecoder::new(toolkit, callbacks);
    decoder.configure(VideoDecoderConfig::new("vp8")).unwrap();
    for chunk in encoded {
        decoder.submit(chunk).unwrap();
    }
    let ticket = decoder.flush(flushed_into(&dec_log));
    assert_eq!(decoder.pump_until(&ticket, WAIT), Some(Ok(())));

    let log = dec_log.lock().unwrap();
    let frames: Vec<&DecodedFrame> = log
        .iter()
        .filter_map(|s| match s {
            Seen::Output(f) => Some(f),
            _ => None,
        })
        .collect();
    let timing: Vec<(i64, i64)> = frames.iter().map(|f| (f.timestamp_us, f.duration_us)).collect();
    // The first frame surfaces while the third packet is processed and takes that packet's
    // timing; the two drained by flush report their own.
    assert_eq!(timing, vec![(80_000, 42_000), (40_000, 41_000), (80_000, 42_000)]);
    for (seed, f) in frames.iter().enumerate() {
        assert_eq!(f.frame.to_packed(), patterned_i420(&pool, 16, 16, 0, seed as u8).to_packed());
    }
    assert!(matches!(log.last(), Some(Seen::Flushed(Ok(())))));
}

#[cfg(target_os = "linux")]
#[test]
fn prefer_hardware_does_not_fall_back() {
    let toolkit = LoopbackToolkit::new().with_encoders(["h264_vaapi"]);
    toolkit.inject("h264_vaapi", Failure::Open);
    let (_log, callbacks) = recorder::<EncodedChunk>();
    let mut encoder = VideoEncoder::new(toolkit, callbacks);
    let err = encoder
        .configure(
            VideoEncoderConfig::new("avc1.42001f", 64, 48)
                .with_hardware_acceleration(HwPreference::PreferHardware),
        )
        .unwrap_err();
    assert!(matches!(err, SessionError::CodecOpen(_)));
    assert_eq!(encoder.state(), SessionState::Unconfigured);
}

#[test]
fn unknown_codec_is_a_configuration_error() {
    let (_log, callbacks) = recorder::<EncodedChunk>();
    let mut encoder = VideoEncoder::new(LoopbackToolkit::new(), callbacks);
    let err = encoder
        .configure(VideoEncoderConfig::new("theora", 64, 48))
        .unwrap_err();
    assert!(matches!(err, SessionError::Configuration(_)));
    assert_eq!(encoder.state(), SessionState::Unconfigured);
}

#[test]
fn reset_discards_queued_work_but_finishes_in_flight_job() {
    init_tracing();
    let toolkit = LoopbackToolkit::new();
    toolkit.set_lookahead(0);
    let (log, callbacks) = recorder();
    let mut encoder = VideoEncoder::new(toolkit.clone(), callbacks);
    encoder.configure(VideoEncoderConfig::new("vp8", 32, 32)).unwrap();
    let pool = BufferPool::default();

    toolkit.gate().close();
    encoder
        .submit(frame(&pool, PixelFormat::I420, 32, 32, 1), EncodeOptions::default())
        .unwrap();
    assert!(toolkit.gate().wait_for_waiters(1, WAIT));
    for ts in [2, 3] {
        encoder
            .submit(frame(&pool, PixelFormat::I420, 32, 32, ts), EncodeOptions::default())
            .unwrap();
    }
    assert_eq!(encoder.queue_len(), 2);
    encoder.reset().unwrap();
    toolkit.gate().open();

    encoder
        .submit(frame(&pool, PixelFormat::I420, 32, 32, 4), EncodeOptions::default())
        .unwrap();
    let ticket = encoder.flush(flushed_into(&log));
    assert_eq!(encoder.pump_until(&ticket, WAIT), Some(Ok(())));

    let stamps: Vec<i64> = chunks(&log).iter().map(|c| c.timestamp_us).collect();
    assert_eq!(stamps, vec![1, 4]);
    assert_eq!(encoder.metrics().discarded, 2);
    assert!(toolkit.events().iter().any(|e| e == "flush-buffers:libvpx"));
    assert_eq!(encoder.state(), SessionState::Configured);
}

#[test]
fn flush_aborted_by_reset_completes_after_in_flight_output() {
    init_tracing();
    let toolkit = LoopbackToolkit::new();
    toolkit.set_lookahead(0);
    let (log, callbacks) = recorder();
    let mut encoder = VideoEncoder::new(toolkit.clone(), callbacks);
    encoder.configure(VideoEncoderConfig::new("vp8", 32, 32)).unwrap();
    let pool = BufferPool::default();

    toolkit.gate().close();
    encoder
        .submit(frame(&pool, PixelFormat::I420, 32, 32, 1), EncodeOptions::default())
        .unwrap();
    assert!(toolkit.gate().wait_for_waiters(1, WAIT));
    let aborted = encoder.flush(flushed_into(&log));
    encoder.reset().unwrap();
    // The aborted completion is queued by the worker, not by `reset`.
    assert!(!aborted.is_complete());
    assert_eq!(encoder.pending_results(), 0);
    toolkit.gate().open();

    let ticket = encoder.flush(flushed_into(&log));
    assert_eq!(encoder.pump_until(&ticket, WAIT), Some(Ok(())));
    assert_eq!(aborted.wait(), Err(SessionError::Aborted));

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 3);
    assert!(matches!(&log[0], Seen::Output(c) if c.timestamp_us == 1));
    assert!(matches!(&log[1], Seen::Flushed(Err(SessionError::Aborted))));
    assert!(matches!(&log[2], Seen::Flushed(Ok(()))));
}

#[test]
fn processing_error_is_isolated_to_its_job() {
    init_tracing();
    let toolkit = LoopbackToolkit::new();
    toolkit.set_lookahead(0);
    toolkit.inject("libvpx", Failure::Processing { after: 1 });
    let (log, callbacks) = recorder();
    let mut encoder = VideoEncoder::new(toolkit, callbacks);
    encoder.configure(VideoEncoderConfig::new("vp8", 32, 32)).unwrap();
    let pool = BufferPool::default();
    for ts in 0..3 {
        encoder
            .submit(frame(&pool, PixelFormat::I420, 32, 32, ts), EncodeOptions::default())
            .unwrap();
    }
    let ticket = encoder.flush(flushed_into(&log));
    assert_eq!(encoder.pump_until(&ticket, WAIT), Some(Ok(())));

    let log = log.lock().unwrap();
    assert!(matches!(&log[0], Seen::Output(c) if c.timestamp_us == 0));
    assert!(matches!(&log[1], Seen::Error(SessionError::Processing(_))));
    assert!(matches!(&log[2], Seen::Output(c) if c.timestamp_us == 2));
    assert!(matches!(&log[3], Seen::Flushed(Ok(()))));
    assert_eq!(encoder.metrics().errors, 1);
    assert_eq!(encoder.state(), SessionState::Configured);
}

#[test]
fn close_is_idempotent_and_rejects_later_work() {
    let toolkit = LoopbackToolkit::new();
    let (_log, callbacks) = recorder::<EncodedChunk>();
    let mut encoder = VideoEncoder::new(toolkit.clone(), callbacks);
    encoder.configure(VideoEncoderConfig::new("vp8", 32, 32)).unwrap();
    encoder.close();
    encoder.close();
    assert_eq!(encoder.state(), SessionState::Closed);

    let pool = BufferPool::default();
    let err = encoder
        .submit(frame(&pool, PixelFormat::I420, 32, 32, 0), EncodeOptions::default())
        .unwrap_err();
    assert_eq!(err, SessionError::NotConfigured(SessionState::Closed));
    assert!(matches!(
        encoder.configure(VideoEncoderConfig::new("vp8", 32, 32)),
        Err(SessionError::Configuration(_))
    ));
    assert_eq!(encoder.reset(), Err(SessionError::NotConfigured(SessionState::Closed)));

    let ticket = encoder.flush(|_| {});
    assert!(ticket.is_complete());
    assert!(toolkit.events().iter().any(|e| e == "drop-encoder:libvpx"));
}

#[test]
fn unconfigured_session_rejects_submit() {
    let (_log, callbacks) = recorder::<EncodedChunk>();
    let mut encoder = VideoEncoder::new(LoopbackToolkit::new(), callbacks);
    let pool = BufferPool::default();
    let err = encoder
        .submit(frame(&pool, PixelFormat::I420, 32, 32, 0), EncodeOptions::default())
        .unwrap_err();
    assert_eq!(err, SessionError::NotConfigured(SessionState::Unconfigured));
    assert_eq!(encoder.flush(|_| {}).wait(), Ok(()));
}

#[test]
fn close_aborts_pending_flush() {
    let toolkit = LoopbackToolkit::new();
    let (log, callbacks) = recorder::<EncodedChunk>();
    let mut encoder = VideoEncoder::new(toolkit.clone(), callbacks);
    encoder.configure(VideoEncoderConfig::new("vp8", 32, 32)).unwrap();
    let pool = BufferPool::default();

    toolkit.gate().close();
    encoder
        .submit(frame(&pool, PixelFormat::I420, 32, 32, 0), EncodeOptions::default())
        .unwrap();
    assert!(toolkit.gate().wait_for_waiters(1, WAIT));
    let ticket = encoder.flush(flushed_into(&log));

    let opener = {
        let toolkit = toolkit.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            toolkit.gate().open();
        })
    };
    encoder.close();
    opener.join().unwrap();

    assert_eq!(ticket.wait(), Err(SessionError::Aborted));
    encoder.pump();
    assert!(matches!(
        log.lock().unwrap().last(),
        Some(Seen::Flushed(Err(SessionError::Aborted)))
    ));
}

#[cfg(target_os = "linux")]
#[test]
fn hardware_contexts_are_released_after_the_codec() {
    let toolkit = LoopbackToolkit::new().with_encoders(["h264_vaapi"]);
    let (_log, callbacks) = recorder::<EncodedChunk>();
    let mut encoder = VideoEncoder::new(toolkit.clone(), callbacks);
    encoder
        .configure(VideoEncoderConfig::new("avc1.42001f", 64, 48))
        .unwrap();
    assert_eq!(encoder.implementation().unwrap().accel, HwAccel::Vaapi);
    toolkit.clear_events();
    drop(encoder);
    assert_eq!(
        toolkit.events(),
        vec!["drop-encoder:h264_vaapi", "drop-frames", "drop-device:Vaapi"]
    );
}
