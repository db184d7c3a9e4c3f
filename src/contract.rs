use std::num::NonZeroU32;
use std::{fmt, fmt::Display};

use crate::rate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264,
}

impl Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::H264 => f.write_str("h264"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: NonZeroU32,
    pub height: NonZeroU32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Option<Self> {
        Some(Self {
            width: NonZeroU32::new(width)?,
            height: NonZeroU32::new(height)?,
        })
    }
}

impl Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Parameters marshalled into the codec context before open.
///
/// `bitrate` and `gop` are optional; unset values fall back to the live
/// ladder ([`rate::live_bitrate`]) and to one intra frame every two seconds.
/// `thread_count` is forwarded to the backend untouched.
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub dims: Dimensions,
    pub fps: i32,
    pub bitrate: Option<NonZeroU32>,
    pub gop: Option<u32>,
    pub max_b_frames: u32,
    pub thread_count: u32,
    pub require_hardware: bool,
}

impl EncoderSettings {
    #[must_use]
    pub fn new(dims: Dimensions, fps: i32) -> Self {
        Self {
            dims,
            fps,
            bitrate: None,
            gop: None,
            max_b_frames: 1,
            thread_count: 2,
            require_hardware: false,
        }
    }

    #[must_use]
    pub fn effective_bitrate(&self) -> u64 {
        match self.bitrate {
            Some(explicit) => u64::from(explicit.get()),
            None => rate::live_bitrate(self.dims.width.get(), self.dims.height.get(), self.fps),
        }
    }

    #[must_use]
    pub fn effective_gop(&self) -> u32 {
        self.gop
            .unwrap_or_else(|| (self.fps.max(0) as u32).saturating_mul(2))
    }
}

impl Display for EncoderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EncoderSettings(dims={}, fps={}, bitrate={}, gop={}, max_b_frames={}, threads={}, require_hardware={})",
            self.dims,
            self.fps,
            self.effective_bitrate(),
            self.effective_gop(),
            self.max_b_frames,
            self.thread_count,
            self.require_hardware
        )
    }
}

/// Planar YUV 4:2:0 input frame with tightly packed planes.
///
/// `pts` counts in `1/fps` time base units.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub dims: Dimensions,
    pub pts: i64,
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
}

impl RawFrame {
    #[must_use]
    pub fn new(dims: Dimensions, pts: i64, y: Vec<u8>, u: Vec<u8>, v: Vec<u8>) -> Self {
        Self { dims, pts, y, u, v }
    }

    pub(crate) fn validate(&self) -> Result<(), EncodeError> {
        let width = self.dims.width.get() as usize;
        let height = self.dims.height.get() as usize;
        let luma = width * height;
        let chroma = width.div_ceil(2) * height.div_ceil(2);

        if self.y.len() != luma {
            return Err(EncodeError::InvalidInput(format!(
                "y plane size mismatch (expected {luma}, got {})",
                self.y.len()
            )));
        }
        for (label, plane) in [("u", &self.u), ("v", &self.v)] {
            if plane.len() != chroma {
                return Err(EncodeError::InvalidInput(format!(
                    "{label} plane size mismatch (expected {chroma}, got {})",
                    plane.len()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct EncodedPacket {
    pub data: Vec<u8>,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub is_keyframe: bool,
}

/// Callback invoked once per drained packet, in output order.
pub type PacketSink = Box<dyn FnMut(EncodedPacket)>;

#[derive(Debug, Clone)]
pub struct CapabilityReport {
    pub codec: Codec,
    pub encode_supported: bool,
    pub hardware_acceleration: bool,
}

impl Display for CapabilityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CapabilityReport(codec={}, encode_supported={}, hardware_acceleration={})",
            self.codec, self.encode_supported, self.hardware_acceleration
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeSummary {
    pub frames_submitted: usize,
    pub packets_delivered: usize,
    pub keyframes_delivered: usize,
    pub bytes_delivered: u64,
}

impl Display for EncodeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EncodeSummary(frames_submitted={}, packets_delivered={}, keyframes_delivered={}, bytes_delivered={})",
            self.frames_submitted,
            self.packets_delivered,
            self.keyframes_delivered,
            self.bytes_delivered
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("codec not found: {0}")]
    CodecNotFound(String),
    #[error("encoder open failed: {0}")]
    OpenFailed(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
    #[error("backend error: {0}")]
    Backend(String),
}

pub(crate) trait H264Encoder {
    fn query_capability(&self) -> Result<CapabilityReport, EncodeError>;

    fn push_frame(&mut self, frame: RawFrame) -> Result<Vec<EncodedPacket>, EncodeError>;

    fn flush(&mut self) -> Result<Vec<EncodedPacket>, EncodeError>;
}
