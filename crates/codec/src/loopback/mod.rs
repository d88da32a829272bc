//! In-process reference toolkit.
//!
//! Loopback codecs do not compress: an encoded packet is a small header followed by the packed
//! frame (or PCM) bytes, so any packet a loopback encoder writes decodes back to the same pixels.
//! The toolkit is deterministic and scriptable: the implementation registry is configurable,
//! encoders hold back a configurable number of frames to model lookahead, failures can be
//! injected per implementation, and a [`Gate`] can park the worker inside a codec call so that
//! in-flight behaviour is observable.

mod audio;
mod scale;
mod video;

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use parking_lot::{Condvar, Mutex};

pub use audio::{LoopbackAudioDecoder, LoopbackAudioEncoder};
pub use scale::{LoopbackResampler, LoopbackScaler};
pub use video::{LoopbackVideoDecoder, LoopbackVideoEncoder};

use crate::{
    CodecError,
    params::{
        AudioDecoderParams, AudioEncoderParams, HwFramesParams, VideoDecoderParams,
        VideoEncoderParams,
    },
    selector::HwDeviceType,
    toolkit::{AudioSpec, CodecLookup, FrameSpec, Toolkit},
};

const SOFTWARE_ENCODERS: &[&str] = &[
    "libx264",
    "libx265",
    "libvpx",
    "libvpx-vp9",
    "libsvtav1",
    "libaom-av1",
    "libopus",
    "aac",
    "libmp3lame",
    "flac",
];

const SOFTWARE_DECODERS: &[&str] = &[
    "h264", "hevc", "vp8", "vp9", "libdav1d", "libaom-av1", "aac", "opus", "mp3", "flac",
];

/// Scripted failure for one implementation name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Opening the implementation fails.
    Open,
    /// The push primitive fails once after `after` successful pushes.
    Processing { after: usize },
}

/// Blocks codec push calls while closed.
#[derive(Default)]
pub struct Gate {
    state: Mutex<GateState>,
    cv: Condvar,
}

#[derive(Default)]
struct GateState {
    closed: bool,
    waiting: usize,
}

impl Gate {
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    pub fn open(&self) {
        self.state.lock().closed = false;
        self.cv.notify_all();
    }

    /// Number of codec calls currently parked at the gate.
    pub fn waiting(&self) -> usize {
        self.state.lock().waiting
    }

    /// Wait until at least `count` calls are parked, or `timeout` elapses.
    pub fn wait_for_waiters(&self, count: usize, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.waiting < count {
            if self.cv.wait_until(&mut state, deadline).timed_out() {
                return state.waiting >= count;
            }
        }
        true
    }

    fn pass(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            return;
        }
        state.waiting += 1;
        self.cv.notify_all();
        while state.closed {
            self.cv.wait(&mut state);
        }
        state.waiting -= 1;
    }
}

pub(crate) struct Shared {
    registry: Mutex<Registry>,
    events: Mutex<Vec<String>>,
    pub(crate) gate: Gate,
}

struct Registry {
    encoders: BTreeSet<String>,
    decoders: BTreeSet<String>,
    failures: HashMap<String, Failure>,
    failing_devices: HashSet<HwDeviceType>,
    lookahead: usize,
    decoder_delay: usize,
}

impl Shared {
    pub(crate) fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    /// Frames a new encoder holds back when its params do not pin the delay.
    pub(crate) fn lookahead(&self) -> usize {
        self.registry.lock().lookahead
    }

    pub(crate) fn decoder_delay(&self) -> usize {
        self.registry.lock().decoder_delay
    }

    pub(crate) fn processing_failure(&self, name: &str) -> Option<usize> {
        match self.registry.lock().failures.get(name) {
            Some(Failure::Processing { after }) => Some(*after),
            _ => None,
        }
    }

    fn check_open(&self, name: &str) -> Result<(), CodecError> {
        if self.registry.lock().failures.get(name) == Some(&Failure::Open) {
            self.record(format!("open-failed:{name}"));
            return Err(CodecError::Open(format!("{name}: injected open failure")));
        }
        Ok(())
    }
}

/// Deterministic toolkit used by tests and hosts without native codecs.
///
/// # Example
/// ```rust
/// use mediaflow_codec::prelude::*;
///
/// let toolkit = LoopbackToolkit::new().with_encoders(["h264_vaapi"]);
/// let choice = select_encoder(&toolkit, "avc1.42001f", HwPreference::NoPreference).unwrap();
/// # #[cfg(target_os = "linux")]
/// assert_eq!(choice.name, "h264_vaapi");
/// assert!(toolkit.has_decoder("h264"));
/// ```
#[derive(Clone)]
pub struct LoopbackToolkit {
    shared: Arc<Shared>,
}

impl Default for LoopbackToolkit {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackToolkit {
    /// Toolkit with every software implementation registered and a lookahead of two frames.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry {
                    encoders: SOFTWARE_ENCODERS.iter().map(|s| s.to_string()).collect(),
                    decoders: SOFTWARE_DECODERS.iter().map(|s| s.to_string()).collect(),
                    failures: HashMap::new(),
                    failing_devices: HashSet::new(),
                    lookahead: 2,
                    decoder_delay: 0,
                }),
                events: Mutex::new(Vec::new()),
                gate: Gate::default(),
            }),
        }
    }

    pub fn with_encoders<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared
            .registry
            .lock()
            .encoders
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_decoders<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared
            .registry
            .lock()
            .decoders
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn unregister_encoder(&self, name: &str) {
        self.shared.registry.lock().encoders.remove(name);
    }

    pub fn unregister_decoder(&self, name: &str) {
        self.shared.registry.lock().decoders.remove(name);
    }

    pub fn inject(&self, name: impl Into<String>, failure: Failure) {
        self.shared
            .registry
            .lock()
            .failures
            .insert(name.into(), failure);
    }

    pub fn clear_failures(&self) {
        let mut registry = self.shared.registry.lock();
        registry.failures.clear();
        registry.failing_devices.clear();
    }

    /// Make hardware device creation for `kind` fail.
    pub fn fail_device(&self, kind: HwDeviceType) {
        self.shared.registry.lock().failing_devices.insert(kind);
    }

    /// Frames held back by encoders whose params leave `delay` unset.
    pub fn set_lookahead(&self, frames: usize) {
        self.shared.registry.lock().lookahead = frames;
    }

    /// Packets a video decoder buffers before emitting frames.
    pub fn set_decoder_delay(&self, packets: usize) {
        self.shared.registry.lock().decoder_delay = packets;
    }

    pub fn gate(&self) -> &Gate {
        &self.shared.gate
    }

    /// Chronological log of opens, flushes and drops (`open:libx264`, `drop-device:Vaapi`, ...).
    pub fn events(&self) -> Vec<String> {
        self.shared.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.shared.events.lock().clear();
    }
}

impl CodecLookup for LoopbackToolkit {
    fn has_encoder(&self, name: &str) -> bool {
        self.shared.registry.lock().encoders.contains(name)
    }

    fn has_decoder(&self, name: &str) -> bool {
        self.shared.registry.lock().decoders.contains(name)
    }
}

/// Loopback hardware device context.
pub struct LoopbackDevice {
    kind: HwDeviceType,
    shared: Arc<Shared>,
}

impl LoopbackDevice {
    pub fn kind(&self) -> HwDeviceType {
        self.kind
    }
}

impl Drop for LoopbackDevice {
    fn drop(&mut self) {
        self.shared.record(format!("drop-device:{:?}", self.kind));
    }
}

/// Loopback device-resident frame pool.
pub struct LoopbackFrames {
    params: HwFramesParams,
    shared: Arc<Shared>,
}

impl LoopbackFrames {
    pub fn params(&self) -> &HwFramesParams {
        &self.params
    }
}

impl Drop for LoopbackFrames {
    fn drop(&mut self) {
        self.shared.record("drop-frames");
    }
}

impl Toolkit for LoopbackToolkit {
    type HwDevice = LoopbackDevice;
    type HwFrames = LoopbackFrames;
    type VideoEncoder = LoopbackVideoEncoder;
    type VideoDecoder = LoopbackVideoDecoder;
    type AudioEncoder = LoopbackAudioEncoder;
    type AudioDecoder = LoopbackAudioDecoder;
    type Scaler = LoopbackScaler;
    type Resampler = LoopbackResampler;

    fn name(&self) -> &'static str {
        "loopback"
    }

    fn create_hw_device(&self, kind: HwDeviceType) -> Result<Self::HwDevice, CodecError> {
        if self.shared.registry.lock().failing_devices.contains(&kind) {
            self.shared.record(format!("device-failed:{kind:?}"));
            return Err(CodecError::Hardware(format!("no {kind:?} device available")));
        }
        self.shared.record(format!("device:{kind:?}"));
        Ok(LoopbackDevice {
            kind,
            shared: self.shared.clone(),
        })
    }

    fn create_hw_frames(
        &self,
        device: &Self::HwDevice,
        params: &HwFramesParams,
    ) -> Result<Self::HwFrames, CodecError> {
        if device.kind != HwDeviceType::Vaapi {
            return Err(CodecError::Hardware(format!(
                "{:?} devices do not expose frame pools",
                device.kind
            )));
        }
        self.shared.record(format!(
            "frames:{}x{}:{}",
            params.width, params.height, params.initial_pool_size
        ));
        Ok(LoopbackFrames {
            params: *params,
            shared: self.shared.clone(),
        })
    }

    fn open_video_encoder(
        &self,
        params: &VideoEncoderParams,
        device: Option<&Self::HwDevice>,
        frames: Option<&Self::HwFrames>,
    ) -> Result<Self::VideoEncoder, CodecError> {
        let name = params.implementation.as_str();
        if !self.has_encoder(name) {
            return Err(CodecError::NotFound(name.to_string()));
        }
        self.shared.check_open(name)?;
        if params.pixel_format.is_hardware() && frames.is_none() {
            self.shared.record(format!("open-failed:{name}"));
            return Err(CodecError::Open(format!(
                "{name} needs a hardware frame pool"
            )));
        }
        if params.width == 0 || params.height == 0 {
            return Err(CodecError::Open(format!("{name}: empty frame size")));
        }
        let upload = frames.map(|f| f.params.sw_format);
        self.shared.record(format!("open:{name}"));
        Ok(LoopbackVideoEncoder::new(
            params.clone(),
            upload,
            device.is_some(),
            self.shared.clone(),
        ))
    }

    fn open_video_decoder(
        &self,
        params: &VideoDecoderParams,
        _device: Option<&Self::HwDevice>,
    ) -> Result<Self::VideoDecoder, CodecError> {
        let name = params.implementation.as_str();
        if !self.has_decoder(name) {
            return Err(CodecError::NotFound(name.to_string()));
        }
        self.shared.check_open(name)?;
        self.shared.record(format!("open:{name}"));
        Ok(LoopbackVideoDecoder::new(params.clone(), self.shared.clone()))
    }

    fn open_audio_encoder(
        &self,
        params: &AudioEncoderParams,
    ) -> Result<Self::AudioEncoder, CodecError> {
        let name = params.implementation.as_str();
        if !self.has_encoder(name) {
            return Err(CodecError::NotFound(name.to_string()));
        }
        self.shared.check_open(name)?;
        if params.channels == 0 || params.sample_rate == 0 {
            return Err(CodecError::Open(format!(
                "{name}: invalid {}ch/{}Hz layout",
                params.channels, params.sample_rate
            )));
        }
        self.shared.record(format!("open:{name}"));
        Ok(LoopbackAudioEncoder::new(params.clone(), self.shared.clone()))
    }

    fn open_audio_decoder(
        &self,
        params: &AudioDecoderParams,
    ) -> Result<Self::AudioDecoder, CodecError> {
        let name = params.implementation.as_str();
        if !self.has_decoder(name) {
            return Err(CodecError::NotFound(name.to_string()));
        }
        self.shared.check_open(name)?;
        self.shared.record(format!("open:{name}"));
        Ok(LoopbackAudioDecoder::new(params.clone(), self.shared.clone()))
    }

    fn create_scaler(&self, src: &FrameSpec, dst: &FrameSpec) -> Result<Self::Scaler, CodecError> {
        LoopbackScaler::new(*src, *dst)
    }

    fn create_resampler(
        &self,
        src: &AudioSpec,
        dst: &AudioSpec,
    ) -> Result<Self::Resampler, CodecError> {
        LoopbackResampler::new(*src, *dst)
    }
}
