use ffmpeg_next as ffmpeg;

use ffmpeg::codec;
use ffmpeg::util::format::Pixel;
use ffmpeg::util::frame::video::Video as VideoFrame;
use tracing::debug;

use crate::{
    CapabilityReport, Codec, EncodeError, EncodedPacket, EncoderSettings, H264Encoder, RawFrame,
};

const QSV_ENCODER: &str = "h264_qsv";

/// libavcodec-backed encoder. Prefers the Quick Sync encoder and falls back
/// to the generic H.264 software encoder unless hardware is required.
pub(crate) struct FfmpegEncoder {
    encoder: ffmpeg::encoder::video::Encoder,
    hardware: bool,
    flushed: bool,
}

impl FfmpegEncoder {
    pub(crate) fn open(settings: &EncoderSettings) -> Result<Self, EncodeError> {
        ffmpeg::init().map_err(|err| EncodeError::Backend(err.to_string()))?;

        let (codec, hardware) = match ffmpeg::encoder::find_by_name(QSV_ENCODER) {
            Some(found) => (found, true),
            None if settings.require_hardware => {
                return Err(EncodeError::CodecNotFound(format!(
                    "{QSV_ENCODER} is not registered and hardware encode is required"
                )));
            }
            None => (
                ffmpeg::encoder::find(codec::Id::H264).ok_or_else(|| {
                    EncodeError::CodecNotFound("no H.264 encoder is registered".to_string())
                })?,
                false,
            ),
        };

        let fps = settings.fps.max(1);
        let mut video = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|err| EncodeError::OpenFailed(err.to_string()))?;
        video.set_width(settings.dims.width.get());
        video.set_height(settings.dims.height.get());
        video.set_format(Pixel::YUV420P);
        video.set_time_base(ffmpeg::Rational::new(1, fps));
        video.set_frame_rate(Some(ffmpeg::Rational::new(fps, 1)));
        video.set_bit_rate(settings.effective_bitrate() as usize);
        video.set_gop(settings.effective_gop());
        video.set_max_b_frames(settings.max_b_frames as usize);
        video.set_threading(codec::threading::Config::count(
            settings.thread_count as usize,
        ));

        let mut options = ffmpeg::Dictionary::new();
        if !hardware {
            options.set("profile", "baseline");
            options.set("preset", "fast");
        }

        let encoder = video
            .open_with(options)
            .map_err(|err| EncodeError::OpenFailed(err.to_string()))?;
        debug!(%settings, hardware, "opened libavcodec H.264 encoder");

        Ok(Self {
            encoder,
            hardware,
            flushed: false,
        })
    }

    fn drain(&mut self) -> Result<Vec<EncodedPacket>, EncodeError> {
        let mut out = Vec::new();
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    if let Some(data) = packet.data() {
                        out.push(EncodedPacket {
                            data: data.to_vec(),
                            pts: packet.pts(),
                            dts: packet.dts(),
                            is_keyframe: packet.flags().contains(ffmpeg::packet::Flags::KEY),
                        });
                    }
                }
                Err(ffmpeg::Error::Other {
                    errno: ffmpeg::util::error::EAGAIN,
                })
                | Err(ffmpeg::Error::Eof) => break,
                Err(err) => return Err(EncodeError::Backend(err.to_string())),
            }
        }
        Ok(out)
    }
}

impl H264Encoder for FfmpegEncoder {
    fn query_capability(&self) -> Result<CapabilityReport, EncodeError> {
        Ok(CapabilityReport {
            codec: Codec::H264,
            encode_supported: true,
            hardware_acceleration: self.hardware,
        })
    }

    fn push_frame(&mut self, frame: RawFrame) -> Result<Vec<EncodedPacket>, EncodeError> {
        if self.flushed {
            return Err(EncodeError::InvalidInput(
                "encoder has already been flushed".to_string(),
            ));
        }

        let width = frame.dims.width.get();
        let height = frame.dims.height.get();
        let chroma_width = (width as usize).div_ceil(2);
        let chroma_height = (height as usize).div_ceil(2);

        let mut video_frame = VideoFrame::new(Pixel::YUV420P, width, height);
        copy_plane(&mut video_frame, 0, &frame.y, width as usize, height as usize);
        copy_plane(&mut video_frame, 1, &frame.u, chroma_width, chroma_height);
        copy_plane(&mut video_frame, 2, &frame.v, chroma_width, chroma_height);
        video_frame.set_pts(Some(frame.pts));

        self.encoder
            .send_frame(&video_frame)
            .map_err(|err| EncodeError::Backend(err.to_string()))?;
        self.drain()
    }

    fn flush(&mut self) -> Result<Vec<EncodedPacket>, EncodeError> {
        if self.flushed {
            return Ok(Vec::new());
        }
        self.flushed = true;
        self.encoder
            .send_eof()
            .map_err(|err| EncodeError::Backend(err.to_string()))?;
        self.drain()
    }
}

// libavcodec rows are padded; copy honoring the destination stride.
fn copy_plane(frame: &mut VideoFrame, plane: usize, src: &[u8], width: usize, height: usize) {
    let stride = frame.stride(plane);
    let dst = frame.data_mut(plane);
    for row in 0..height {
        dst[row * stride..row * stride + width].copy_from_slice(&src[row * width..(row + 1) * width]);
    }
}
