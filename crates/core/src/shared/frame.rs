use ndarray::ArrayView3;

use crate::shared::clock::Timestamp;

/// Pixel layouts a capture device may deliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8888,
    Bgra8888,
    Rgb888,
    /// Planar YUV 4:2:0, the default layout of many camera pipelines.
    Yuv420,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats; `None` for planar ones.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Rgba8888 | PixelFormat::Bgra8888 => Some(4),
            PixelFormat::Rgb888 => Some(3),
            PixelFormat::Yuv420 => None,
        }
    }
}

/// Clockwise rotation needed to bring a captured frame upright.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

/// A captured camera frame, as delivered by the producer.
///
/// Immutable once produced; ownership moves into the pipeline on offer.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    rotation: Rotation,
    timestamp: Timestamp,
}

impl Frame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        rotation: Rotation,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            data,
            width,
            height,
            format,
            rotation,
            timestamp,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// An upright, tightly packed RGB image ready for inference.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl NormalizedFrame {
    pub const CHANNELS: usize = 3;

    pub(crate) fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * Self::CHANNELS,
            "data length must equal width * height * 3"
        );
        Self {
            data,
            width,
            height,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(
            (self.height as usize, self.width as usize, Self::CHANNELS),
            &self.data,
        )
        .expect("NormalizedFrame data length must match dimensions")
    }

    /// Re-wraps the upright image as an `Rgb888` frame with no rotation.
    pub fn into_frame(self, timestamp: Timestamp) -> Frame {
        Frame::new(
            self.data,
            self.width,
            self.height,
            PixelFormat::Rgb888,
            Rotation::Deg0,
            timestamp,
        )
    }
}
