#![doc = include_str!("../README.md")]

pub use mediaflow_codec as codec;
pub use mediaflow_core as core;

pub mod audio_decoder;
pub mod audio_encoder;
pub mod config;
pub mod delivery;
pub mod error;
pub mod output;
pub mod session;
pub mod tunables;
mod tuning;
pub mod video_decoder;
pub mod video_encoder;
mod worker;

pub use audio_decoder::AudioDecoder;
pub use audio_encoder::AudioEncoder;
pub use error::{SessionError, SessionState};
pub use video_decoder::VideoDecoder;
pub use video_encoder::VideoEncoder;

pub mod prelude {
    pub use crate::config::{
        AlphaMode, AudioDecoderConfig, AudioEncoderConfig, AvcFormat, BitrateMode, LatencyMode,
        ScalabilityMode, VideoDecoderConfig, VideoEncoderConfig,
    };
    pub use crate::delivery::{Callbacks, FlushTicket};
    pub use crate::output::{DecodedAudio, DecodedFrame, EncodeOptions, EncodedChunk};
    pub use crate::session::Implementation;
    pub use crate::tunables::{SessionTunables, session_tunables, set_session_tunables};
    pub use crate::{
        AudioDecoder, AudioEncoder, SessionError, SessionState, VideoDecoder, VideoEncoder,
    };
    pub use mediaflow_codec::prelude::*;
}
