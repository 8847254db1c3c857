use super::StreamKind;
use crate::driver::StreamRequest;
use crate::error::{Result, SensorError};
use crate::frame::{FrameFormatDescriptor, ImageResolution, PixelLayout};
use std::fmt::Debug;

/// Capabilities that distinguish one image stream from another.
///
/// Color, depth and infrared share a single controller; a profile supplies
/// the parameter type, the resolutions the device class offers and the
/// pixel layout it delivers.
pub trait StreamProfile: Send + Sync + 'static {
    const KIND: StreamKind;

    type Params: Copy + PartialEq + Debug + Send;

    fn resolution(params: &Self::Params) -> ImageResolution;

    fn supported_resolutions() -> &'static [ImageResolution];

    fn pixel_layout() -> PixelLayout;

    fn request(_params: &Self::Params, format: FrameFormatDescriptor) -> StreamRequest {
        StreamRequest::Image {
            format,
            near_mode: false,
        }
    }

    /// Turn requested parameters into the format the device will deliver
    fn negotiate(params: &Self::Params) -> Result<FrameFormatDescriptor> {
        let resolution = Self::resolution(params);
        if !Self::supported_resolutions().contains(&resolution) {
            return Err(SensorError::UnsupportedResolution {
                stream: Self::KIND,
                resolution,
            });
        }

        Ok(FrameFormatDescriptor::for_layout(
            resolution,
            Self::pixel_layout(),
        ))
    }
}

#[derive(Debug)]
pub struct ColorProfile;

impl StreamProfile for ColorProfile {
    const KIND: StreamKind = StreamKind::Color;

    type Params = ImageResolution;

    fn resolution(params: &ImageResolution) -> ImageResolution {
        *params
    }

    fn supported_resolutions() -> &'static [ImageResolution] {
        &[ImageResolution::Res640x480, ImageResolution::Res1280x960]
    }

    fn pixel_layout() -> PixelLayout {
        PixelLayout::Bgrx32
    }
}

/// Depth stream parameters. Near mode is part of the negotiation, so the
/// same resolution with a different near mode re-negotiates the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthParams {
    pub resolution: ImageResolution,
    pub near_mode: bool,
}

#[derive(Debug)]
pub struct DepthProfile;

impl StreamProfile for DepthProfile {
    const KIND: StreamKind = StreamKind::Depth;

    type Params = DepthParams;

    fn resolution(params: &DepthParams) -> ImageResolution {
        params.resolution
    }

    fn supported_resolutions() -> &'static [ImageResolution] {
        &[
            ImageResolution::Res80x60,
            ImageResolution::Res320x240,
            ImageResolution::Res640x480,
        ]
    }

    fn pixel_layout() -> PixelLayout {
        PixelLayout::Depth16
    }

    fn request(params: &DepthParams, format: FrameFormatDescriptor) -> StreamRequest {
        StreamRequest::Image {
            format,
            near_mode: params.near_mode,
        }
    }
}

#[derive(Debug)]
pub struct InfraredProfile;

impl StreamProfile for InfraredProfile {
    const KIND: StreamKind = StreamKind::Infrared;

    type Params = ImageResolution;

    fn resolution(params: &ImageResolution) -> ImageResolution {
        *params
    }

    fn supported_resolutions() -> &'static [ImageResolution] {
        &[ImageResolution::Res640x480]
    }

    fn pixel_layout() -> PixelLayout {
        PixelLayout::Infrared16
    }
}
