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

fn collecting<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, Callbacks<T>) {
    let out: Arc<Mutex<Vec<T>>> = Arc::default();
    let sink = out.clone();
    let callbacks = Callbacks::new(
        move |o| sink.lock().unwrap().push(o),
        |e| panic!("unexpected session error: {e}"),
    );
    (out, callbacks)
}

fn tone(rate: u32, channels: u16, frames: usize, timestamp: i64) -> AudioBuffer {
    let samples: Vec<f32> = (0..frames * channels as usize)
        .map(|i| ((i % 64) as f32 / 64.0) - 0.5)
        .collect();
    AudioBuffer::from_f32_interleaved(rate, channels, timestamp, &samples).unwrap()
}

fn encode(toolkit: &LoopbackToolkit, config: AudioEncoderConfig, input: Vec<AudioBuffer>) -> Vec<EncodedChunk> {
    let (chunks, callbacks) = collecting();
    let mut encoder = AudioEncoder::new(toolkit.clone(), callbacks);
    encoder.configure(config).unwrap();
    for buffer in input {
        encoder.submit(buffer).unwrap();
    }
    let ticket = encoder.flush(|_| {});
    assert_eq!(encoder.pump_until(&ticket, WAIT), Some(Ok(())));
    encoder.close();
    let chunks = chunks.lock().unwrap().clone();
    chunks
}

#[test]
fn opus_input_is_regrouped_into_codec_frames() {
    init_tracing();
    let toolkit = LoopbackToolkit::new();
    let chunks = encode(
        &toolkit,
        AudioEncoderConfig::new("opus", 48_000, 2).with_bitrate(64_000),
        vec![
            AudioBuffer::silence(SampleFormat::S16, 48_000, 2, 1500),
            AudioBuffer::silence(SampleFormat::S16, 48_000, 2, 1500),
        ],
    );
    // 3000 samples per channel: three full 960-sample frames, 120 left for the flush.
    assert_eq!(chunks.len(), 4);
    assert!(chunks.iter().all(|c| c.keyframe));
    let stamps: Vec<i64> = chunks.iter().map(|c| c.timestamp_us).collect();
    assert_eq!(stamps, vec![0, 20_000, 40_000, 60_000]);
    assert_eq!(chunks[0].duration_us, 20_000);
    assert_eq!(chunks[3].duration_us, 2_500);
    assert!(chunks[0].extradata.is_some());
    assert!(chunks[1..].iter().all(|c| c.extradata.is_none()));
    assert!(toolkit.events().iter().any(|e| e == "open:libopus"));
}

#[test]
fn input_is_resampled_to_the_configured_layout() {
    init_tracing();
    let toolkit = LoopbackToolkit::new();
    let chunks = encode(
        &toolkit,
        AudioEncoderConfig::new("aac", 48_000, 2),
        vec![tone(24_000, 1, 1024, 0)],
    );
    // 1024 mono frames at 24 kHz become 2048 stereo frames at 48 kHz: two AAC frames.
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[1].timestamp_us, 1024 * 1_000_000 / 48_000);
}

#[test]
fn encoded_audio_decodes_to_interleaved_f32() {
    init_tracing();
    let toolkit = LoopbackToolkit::new();
    let chunks = encode(
        &toolkit,
        AudioEncoderConfig::new("opus", 48_000, 2),
        vec![tone(48_000, 2, 2000, 0)],
    );
    assert_eq!(chunks.len(), 3);

    let (decoded, callbacks) = collecting::<DecodedAudio>();
    let mut decoder = AudioDecoder::new(toolkit.clone(), callbacks);
    let mut config = AudioDecoderConfig::new("opus", 48_000, 2);
    if let Some(description) = chunks[0].extradata.clone() {
        config = config.with_description(description);
    }
    decoder.configure(config).unwrap();
    for chunk in chunks.iter().cloned() {
        decoder.submit(chunk).unwrap();
    }
    let ticket = decoder.flush(|_| {});
    assert_eq!(decoder.pump_until(&ticket, WAIT), Some(Ok(())));

    let decoded = decoded.lock().unwrap();
    assert_eq!(decoded.len(), 3);
    assert!(decoded.iter().all(|a| a.buffer.format() == SampleFormat::F32));
    assert_eq!(
        decoded.iter().map(|a| a.buffer.frames()).collect::<Vec<_>>(),
        vec![960, 960, 80]
    );
    assert_eq!(decoded[1].timestamp_us, chunks[1].timestamp_us);
    let original = tone(48_000, 2, 2000, 0).to_f32_interleaved();
    let round_trip: Vec<f32> = decoded
        .iter()
        .flat_map(|a| a.buffer.to_f32_interleaved())
        .collect();
    assert_eq!(round_trip, original);
}

#[test]
fn reset_drops_buffered_samples() {
    let toolkit = LoopbackToolkit::new();
    let (chunks, callbacks) = collecting::<EncodedChunk>();
    let mut encoder = AudioEncoder::new(toolkit.clone(), callbacks);
    encoder.configure(AudioEncoderConfig::new("opus", 48_000, 1)).unwrap();
    encoder.submit(tone(48_000, 1, 500, 0)).unwrap();
    encoder.reset().unwrap();
    let ticket = encoder.flush(|_| {});
    assert_eq!(encoder.pump_until(&ticket, WAIT), Some(Ok(())));
    assert!(chunks.lock().unwrap().is_empty());
    assert!(toolkit.events().iter().any(|e| e == "flush-buffers:libopus"));
}

#[test]
fn configuration_and_input_errors() {
    let toolkit = LoopbackToolkit::new();
    let (_chunks, callbacks) = collecting::<EncodedChunk>();
    let mut encoder = AudioEncoder::new(toolkit.clone(), callbacks);
    assert!(matches!(
        encoder.configure(AudioEncoderConfig::new("vorbis", 48_000, 2)),
        Err(SessionError::Configuration(_))
    ));

    toolkit.inject("libopus", Failure::Open);
    assert!(matches!(
        encoder.configure(AudioEncoderConfig::new("opus", 48_000, 2)),
        Err(SessionError::CodecOpen(_))
    ));
    toolkit.clear_failures();

    encoder.configure(AudioEncoderConfig::new("opus", 48_000, 2)).unwrap();
    let err = encoder
        .submit(AudioBuffer::silence(SampleFormat::F32, 48_000, 2, 0))
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidInput(_)));

    let (_decoded, callbacks) = collecting::<DecodedAudio>();
    let mut decoder = AudioDecoder::new(toolkit, callbacks);
    assert!(matches!(
        decoder.configure(AudioDecoderConfig::new("speex", 48_000, 2)),
        Err(SessionError::Configuration(_))
    ));
    decoder.configure(AudioDecoderConfig::new("libmp3lame", 44_100, 2)).unwrap();
    assert_eq!(decoder.implementation().unwrap().name, "mp3");
    assert!(matches!(
        decoder.submit(EncodedChunk::key(Vec::new(), 0)),
        Err(SessionError::InvalidInput(_))
    ));
}
