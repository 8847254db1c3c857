use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Capture timestamp reported by the sensor, in milliseconds since the
/// sensor started streaming
pub type Timestamp = i64;

/// Image resolutions a depth-camera sensor can be asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageResolution {
    #[serde(rename = "80x60")]
    Res80x60,
    #[serde(rename = "320x240")]
    Res320x240,
    #[serde(rename = "640x480")]
    Res640x480,
    #[serde(rename = "1280x960")]
    Res1280x960,
}

impl ImageResolution {
    pub const ALL: [ImageResolution; 4] = [
        ImageResolution::Res80x60,
        ImageResolution::Res320x240,
        ImageResolution::Res640x480,
        ImageResolution::Res1280x960,
    ];

    pub fn width(&self) -> u32 {
        match self {
            ImageResolution::Res80x60 => 80,
            ImageResolution::Res320x240 => 320,
            ImageResolution::Res640x480 => 640,
            ImageResolution::Res1280x960 => 1280,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            ImageResolution::Res80x60 => 60,
            ImageResolution::Res320x240 => 240,
            ImageResolution::Res640x480 => 480,
            ImageResolution::Res1280x960 => 960,
        }
    }
}

impl fmt::Display for ImageResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width(), self.height())
    }
}

impl FromStr for ImageResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageResolution::ALL
            .into_iter()
            .find(|res| res.to_string() == s.trim())
            .ok_or_else(|| format!("unknown resolution '{}'", s))
    }
}

/// Pixel layout delivered by an image stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelLayout {
    /// 32-bit BGRX color
    Bgrx32,
    /// 16-bit depth sample with player index in the low bits
    Depth16,
    /// 16-bit infrared intensity
    Infrared16,
}

impl PixelLayout {
    /// Get bytes per pixel for the layout
    pub fn bytes_per_pixel(&self) -> u16 {
        match self {
            PixelLayout::Bgrx32 => 4,
            PixelLayout::Depth16 => 2,
            PixelLayout::Infrared16 => 2,
        }
    }
}

/// Negotiated format of an image stream.
///
/// `required_buffer_size` is always `height * width * bytes_per_pixel`; the
/// fields are private so a descriptor cannot be built that breaks this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FrameFormatDescriptor {
    height: u32,
    width: u32,
    bytes_per_pixel: u16,
    required_buffer_size: usize,
}

impl FrameFormatDescriptor {
    pub fn new(width: u32, height: u32, bytes_per_pixel: u16) -> Self {
        Self {
            height,
            width,
            bytes_per_pixel,
            required_buffer_size: height as usize * width as usize * bytes_per_pixel as usize,
        }
    }

    pub fn for_layout(resolution: ImageResolution, layout: PixelLayout) -> Self {
        Self::new(
            resolution.width(),
            resolution.height(),
            layout.bytes_per_pixel(),
        )
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn bytes_per_pixel(&self) -> u16 {
        self.bytes_per_pixel
    }

    pub fn required_buffer_size(&self) -> usize {
        self.required_buffer_size
    }

    /// Check a delivered frame against the negotiated size
    pub fn matches(&self, data: &[u8]) -> bool {
        data.len() == self.required_buffer_size
    }

    /// Allocate a zeroed buffer of exactly the required size
    pub fn allocate(&self) -> Vec<u8> {
        vec![0u8; self.required_buffer_size]
    }
}

impl fmt::Display for FrameFormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} @ {} B/px ({} bytes)",
            self.width, self.height, self.bytes_per_pixel, self.required_buffer_size
        )
    }
}
