//! Reference-counted hardware contexts (`AVBufferRef`).

use std::ptr;

use ffmpeg_next::ffi::{
    AVBufferRef, AVHWDeviceType, AVHWFramesContext, AVPixelFormat, av_buffer_ref,
    av_buffer_unref, av_hwdevice_ctx_create, av_hwframe_ctx_alloc, av_hwframe_ctx_init,
};

use crate::{CodecError, params::HwFramesParams, selector::HwDeviceType};

use super::util::to_av_pixel;

/// One owned reference to an FFmpeg buffer. Unreferenced on drop.
pub(crate) struct BufferRef(*mut AVBufferRef);

// The referenced contexts are internally refcounted and only mutated before init.
unsafe impl Send for BufferRef {}
unsafe impl Sync for BufferRef {}

impl BufferRef {
    pub(crate) fn as_ptr(&self) -> *mut AVBufferRef {
        self.0
    }

    /// New reference to the same buffer, for handing to a codec context.
    pub(crate) fn new_ref(&self) -> Result<*mut AVBufferRef, CodecError> {
        let r = unsafe { av_buffer_ref(self.0) };
        if r.is_null() {
            return Err(CodecError::Allocation("av_buffer_ref returned null".into()));
        }
        Ok(r)
    }

    pub(crate) fn try_clone(&self) -> Result<Self, CodecError> {
        self.new_ref().map(BufferRef)
    }
}

impl Drop for BufferRef {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { av_buffer_unref(&mut self.0) };
        }
    }
}

fn device_type(kind: HwDeviceType) -> AVHWDeviceType {
    match kind {
        HwDeviceType::Cuda => AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA,
        HwDeviceType::Qsv => AVHWDeviceType::AV_HWDEVICE_TYPE_QSV,
        HwDeviceType::Vaapi => AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI,
        HwDeviceType::VideoToolbox => AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX,
        HwDeviceType::D3d11va => AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA,
    }
}

/// Hardware device context.
pub struct FfmpegHwDevice {
    pub(crate) kind: HwDeviceType,
    pub(crate) buf: BufferRef,
}

impl FfmpegHwDevice {
    pub(crate) fn create(kind: HwDeviceType) -> Result<Self, CodecError> {
        let mut raw: *mut AVBufferRef = ptr::null_mut();
        let ret = unsafe {
            av_hwdevice_ctx_create(&mut raw, device_type(kind), ptr::null(), ptr::null_mut(), 0)
        };
        if ret < 0 || raw.is_null() {
            return Err(CodecError::Hardware(format!(
                "av_hwdevice_ctx_create({kind:?}) failed: {}",
                ffmpeg_next::Error::from(ret)
            )));
        }
        Ok(Self {
            kind,
            buf: BufferRef(raw),
        })
    }

    pub fn kind(&self) -> HwDeviceType {
        self.kind
    }
}

/// Device-resident frame pool bound to a device.
pub struct FfmpegHwFrames {
    pub(crate) params: HwFramesParams,
    pub(crate) buf: BufferRef,
}

impl FfmpegHwFrames {
    pub(crate) fn create(
        device: &FfmpegHwDevice,
        params: &HwFramesParams,
    ) -> Result<Self, CodecError> {
        let raw = unsafe { av_hwframe_ctx_alloc(device.buf.as_ptr()) };
        if raw.is_null() {
            return Err(CodecError::Hardware("av_hwframe_ctx_alloc failed".into()));
        }
        // From here the buffer is owned; an init failure unrefs it on return.
        let buf = BufferRef(raw);
        let ret = unsafe {
            let ctx = (*raw).data as *mut AVHWFramesContext;
            (*ctx).format = AVPixelFormat::from(to_av_pixel(params.hw_format));
            (*ctx).sw_format = AVPixelFormat::from(to_av_pixel(params.sw_format));
            (*ctx).width = params.width as i32;
            (*ctx).height = params.height as i32;
            (*ctx).initial_pool_size = params.initial_pool_size as i32;
            av_hwframe_ctx_init(raw)
        };
        if ret < 0 {
            return Err(CodecError::Hardware(format!(
                "av_hwframe_ctx_init failed: {}",
                ffmpeg_next::Error::from(ret)
            )));
        }
        Ok(Self {
            params: *params,
            buf,
        })
    }

    pub fn params(&self) -> &HwFramesParams {
        &self.params
    }
}
