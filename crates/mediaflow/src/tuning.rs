//! Implementation-specific encoder parameters.
//!
//! Turns a [`VideoEncoderConfig`] plus the selected implementation into the parameter struct the
//! toolkit opens. Private option names follow the libav* encoder wrappers.

use mediaflow_codec::{
    params::VideoEncoderParams,
    selector::{CodecFamily, EncoderChoice},
};
use mediaflow_core::format::PixelFormat;
use tracing::debug;

use crate::{
    config::{AlphaMode, AvcFormat, BitrateMode, LatencyMode, ScalabilityMode, VideoEncoderConfig},
    error::SessionError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    X264,
    X265,
    Vpx,
    SvtAv1,
    Aom,
    Nvenc,
    Qsv,
    VideoToolbox,
    Other,
}

impl Flavor {
    fn of(name: &str) -> Self {
        match name {
            "libx264" => Flavor::X264,
            "libx265" => Flavor::X265,
            "libvpx" | "libvpx-vp9" => Flavor::Vpx,
            "libsvtav1" => Flavor::SvtAv1,
            "libaom-av1" => Flavor::Aom,
            n if n.ends_with("_nvenc") => Flavor::Nvenc,
            n if n.ends_with("_qsv") => Flavor::Qsv,
            n if n.ends_with("_videotoolbox") => Flavor::VideoToolbox,
            _ => Flavor::Other,
        }
    }
}

/// Parameters for opening `choice` under `config`.
pub(crate) fn encoder_params(
    config: &VideoEncoderConfig,
    choice: &EncoderChoice,
) -> Result<VideoEncoderParams, SessionError> {
    let flavor = Flavor::of(&choice.name);
    let family = CodecFamily::from_codec(&choice.name);
    let mut params = baseline(config, &choice.name);

    params.color = config.color_space;
    params.pixel_format = if choice.accel.is_hardware() {
        choice.input_format
    } else if config.alpha == AlphaMode::Keep && flavor == Flavor::Vpx {
        params.options.set("auto-alt-ref", 0);
        PixelFormat::I420A
    } else {
        PixelFormat::I420
    };

    apply_rate_control(&mut params, config, flavor, family);
    if flavor == Flavor::X264 {
        params.options.set("profile", x264_profile(config.avc_profile()));
    }
    apply_latency(&mut params, config, flavor);
    if let Some(mode) = config.scalability()? {
        apply_scalability(&mut params, config, flavor, family, mode);
    }
    Ok(params)
}

/// Parameters for the software retry after a hardware open failure.
pub(crate) fn fallback_params(config: &VideoEncoderConfig, implementation: &str) -> VideoEncoderParams {
    let mut params = baseline(config, implementation);
    params.rate.bit_rate = config.bitrate;
    apply_latency(&mut params, config, Flavor::of(implementation));
    params
}

fn baseline(config: &VideoEncoderConfig, implementation: &str) -> VideoEncoderParams {
    let fps = config.fps();
    let mut params = VideoEncoderParams::new(implementation, config.width, config.height);
    params.framerate = (fps as i32, 1);
    params.gop = fps;
    params.max_b_frames = 0;
    params.pixel_format = PixelFormat::I420;
    params.global_header = config.avc_format == AvcFormat::Avc
        && CodecFamily::from_codec(implementation) == Some(CodecFamily::H264);
    params
}

fn x264_profile(profile_idc: Option<u8>) -> &'static str {
    match profile_idc {
        Some(66) => "baseline",
        Some(100) => "high",
        _ => "main",
    }
}

fn apply_rate_control(
    params: &mut VideoEncoderParams,
    config: &VideoEncoderConfig,
    flavor: Flavor,
    family: Option<CodecFamily>,
) {
    let bitrate = config.bitrate;
    match config.bitrate_mode {
        BitrateMode::Constant => {
            params.rate.bit_rate = bitrate;
            params.rate.min_rate = bitrate;
            params.rate.max_rate = bitrate;
            params.rate.buffer_size = bitrate;
            if flavor == Flavor::X264 {
                params.options.set("nal-hrd", "cbr");
            }
        }
        BitrateMode::Quantizer => {
            params.rate.bit_rate = 0;
            params.rate.max_rate = 0;
            match flavor {
                Flavor::X264 | Flavor::X265 => params.options.set("crf", 23),
                Flavor::Vpx => {
                    params.options.set("crf", 30);
                    params.rate.qmin = Some(0);
                    params.rate.qmax = Some(63);
                }
                _ if family == Some(CodecFamily::Av1) => params.options.set("crf", 30),
                _ => {}
            }
        }
        BitrateMode::Variable => {
            params.rate.bit_rate = bitrate;
            // Constrained quality: crf caps quality, b caps size.
            if flavor == Flavor::Vpx && bitrate > 0 {
                params.options.set("crf", 10);
                params.options.set("b", bitrate);
            }
        }
    }
}

fn apply_latency(params: &mut VideoEncoderParams, config: &VideoEncoderConfig, flavor: Flavor) {
    let realtime = config.latency_mode == LatencyMode::Realtime;
    if realtime {
        params.threads = 1;
        params.delay = Some(0);
        params.refs = Some(1);
    }
    let opts = &mut params.options;
    match (flavor, realtime) {
        (Flavor::X264, true) => {
            opts.set("preset", "ultrafast");
            opts.set("tune", "zerolatency");
            opts.set("rc-lookahead", 0);
            opts.set("sync-lookahead", 0);
            opts.set("intra-refresh", 1);
        }
        (Flavor::X264, false) => opts.set("preset", "medium"),
        (Flavor::VideoToolbox, true) => {
            opts.set("realtime", 1);
            opts.set("allow_sw", 1);
        }
        (Flavor::Nvenc, true) => {
            opts.set("preset", "p1");
            opts.set("tune", "ll");
            opts.set("zerolatency", 1);
            opts.set("rc-lookahead", 0);
        }
        (Flavor::Nvenc, false) => opts.set("preset", "p4"),
        (Flavor::Qsv, true) => {
            opts.set("preset", "veryfast");
            opts.set("low_delay_brc", 1);
            opts.set("look_ahead", 0);
        }
        (Flavor::Vpx, true) => {
            opts.set("cpu-used", 8);
            opts.set("lag-in-frames", 0);
            opts.set("deadline", "realtime");
        }
        (Flavor::Vpx, false) => opts.set("cpu-used", 4),
        (Flavor::X265, true) => {
            opts.set("preset", "ultrafast");
            opts.set("tune", "zerolatency");
        }
        (Flavor::X265, false) => opts.set("preset", "medium"),
        (Flavor::Aom | Flavor::SvtAv1, true) => {
            opts.set("cpu-used", 10);
            opts.set("lag-in-frames", 0);
            opts.set("usage", "realtime");
        }
        (Flavor::Aom | Flavor::SvtAv1, false) => opts.set("cpu-used", 6),
        _ => {}
    }
    if flavor == Flavor::Nvenc {
        opts.set("rc", "cbr");
    }
}

fn apply_scalability(
    params: &mut VideoEncoderParams,
    config: &VideoEncoderConfig,
    flavor: Flavor,
    family: Option<CodecFamily>,
    mode: ScalabilityMode,
) {
    let layers = mode.temporal_layers();
    if layers < 2 {
        return;
    }
    let kbps = config.bitrate / 1000;
    let opts = &mut params.options;
    match flavor {
        Flavor::Vpx => {
            opts.set("lag-in-frames", 0);
            opts.set("error-resilient", 1);
            opts.set("auto-alt-ref", 0);
            let ts = if layers == 2 {
                format!(
                    "ts_number_layers=2:ts_target_bitrate={},{kbps}:ts_rate_decimator=2,1:\
                     ts_periodicity=2:ts_layer_id=0,1",
                    config.bitrate * 6 / 10_000
                )
            } else {
                format!(
                    "ts_number_layers=3:ts_target_bitrate={},{},{kbps}:ts_rate_decimator=4,2,1:\
                     ts_periodicity=4:ts_layer_id=0,2,1,2",
                    config.bitrate / 4000,
                    config.bitrate / 2000
                )
            };
            opts.set("ts-parameters", ts);
        }
        Flavor::SvtAv1 => opts.set("hierarchical-levels", layers - 1),
        _ if family == Some(CodecFamily::Av1) => {
            opts.set("lag-in-frames", 0);
            opts.set("usage", "realtime");
        }
        _ => debug!(implementation = %params.implementation, layers, "temporal layers not supported"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaflow_codec::selector::HwAccel;

    fn software(name: &str) -> EncoderChoice {
        EncoderChoice {
            name: name.into(),
            accel: HwAccel::None,
            input_format: PixelFormat::I420,
            requires_hw_frames: false,
        }
    }

    #[test]
    fn x264_constant_realtime() {
        let config = VideoEncoderConfig::new("avc1.64001f", 320, 240)
            .with_bitrate(500_000)
            .with_bitrate_mode(BitrateMode::Constant)
            .with_latency_mode(LatencyMode::Realtime)
            .with_avc_format(AvcFormat::Avc);
        let p = encoder_params(&config, &software("libx264")).unwrap();
        assert_eq!(p.gop, 30);
        assert_eq!(p.max_b_frames, 0);
        assert_eq!(p.rate.min_rate, 500_000);
        assert_eq!(p.rate.buffer_size, 500_000);
        assert_eq!(p.delay, Some(0));
        assert_eq!(p.threads, 1);
        assert!(p.global_header);
        assert_eq!(p.options.get("nal-hrd"), Some("cbr"));
        assert_eq!(p.options.get("profile"), Some("high"));
        assert_eq!(p.options.get("preset"), Some("ultrafast"));
        assert_eq!(p.options.get("intra-refresh"), Some("1"));
    }

    #[test]
    fn quantizer_mode_per_family() {
        let config = VideoEncoderConfig::new("vp8", 64, 64).with_bitrate_mode(BitrateMode::Quantizer);
        let vpx = encoder_params(&config, &software("libvpx")).unwrap();
        assert_eq!(vpx.rate.bit_rate, 0);
        assert_eq!(vpx.options.get("crf"), Some("30"));
        assert_eq!((vpx.rate.qmin, vpx.rate.qmax), (Some(0), Some(63)));
        assert_eq!(vpx.options.get("cpu-used"), Some("4"));

        let x265 = encoder_params(&config, &software("libx265")).unwrap();
        assert_eq!(x265.options.get("crf"), Some("23"));
        assert_eq!(x265.options.get("preset"), Some("medium"));
    }

    #[test]
    fn vpx_temporal_layers() {
        let config = VideoEncoderConfig::new("vp8", 64, 64)
            .with_bitrate(1_000_000)
            .with_scalability_mode("L1T3");
        let p = encoder_params(&config, &software("libvpx")).unwrap();
        assert_eq!(p.options.get("error-resilient"), Some("1"));
        assert_eq!(
            p.options.get("ts-parameters"),
            Some(
                "ts_number_layers=3:ts_target_bitrate=250,500,1000:ts_rate_decimator=4,2,1:\
                 ts_periodicity=4:ts_layer_id=0,2,1,2"
            )
        );
        let two = config.clone().with_scalability_mode("L1T2");
        let p = encoder_params(&two, &software("libvpx")).unwrap();
        assert_eq!(
            p.options.get("ts-parameters"),
            Some("ts_number_layers=2:ts_target_bitrate=600,1000:ts_rate_decimator=2,1:ts_periodicity=2:ts_layer_id=0,1")
        );
        let svt = encoder_params(&config, &software("libsvtav1")).unwrap();
        assert_eq!(svt.options.get("hierarchical-levels"), Some("2"));
    }

    #[test]
    fn unknown_scalability_mode_is_rejected() {
        let config = VideoEncoderConfig::new("vp8", 64, 64).with_scalability_mode("S2T1");
        assert!(matches!(
            encoder_params(&config, &software("libvpx")),
            Err(SessionError::Configuration(_))
        ));
    }

    #[test]
    fn alpha_and_hardware_formats() {
        let config = VideoEncoderConfig::new("vp09.00.10.08", 64, 64).with_alpha(AlphaMode::Keep);
        let p = encoder_params(&config, &software("libvpx-vp9")).unwrap();
        assert_eq!(p.pixel_format, PixelFormat::I420A);
        assert_eq!(p.options.get("auto-alt-ref"), Some("0"));

        let nvenc = EncoderChoice {
            name: "h264_nvenc".into(),
            accel: HwAccel::Nvenc,
            input_format: PixelFormat::Nv12,
            requires_hw_frames: false,
        };
        let p = encoder_params(&VideoEncoderConfig::new("avc1.42001f", 64, 64), &nvenc).unwrap();
        assert_eq!(p.pixel_format, PixelFormat::Nv12);
        assert_eq!(p.options.get("preset"), Some("p4"));
        assert_eq!(p.options.get("rc"), Some("cbr"));
    }

    #[test]
    fn fallback_keeps_only_the_baseline() {
        let config = VideoEncoderConfig::new("avc1.42001f", 320, 240)
            .with_bitrate(750_000)
            .with_bitrate_mode(BitrateMode::Constant)
            .with_framerate(25.0)
            .with_latency_mode(LatencyMode::Realtime);
        let p = fallback_params(&config, "libx264");
        assert_eq!(p.implementation, "libx264");
        assert_eq!(p.pixel_format, PixelFormat::I420);
        assert_eq!(p.rate.bit_rate, 750_000);
        assert_eq!(p.rate.min_rate, 0);
        assert_eq!((p.gop, p.framerate), (25, (25, 1)));
        assert_eq!(p.options.get("tune"), Some("zerolatency"));
        assert_eq!(p.options.get("nal-hrd"), None);
    }
}
