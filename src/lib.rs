pub mod annexb;
mod contract;
#[cfg(feature = "backend-ffmpeg")]
mod ffmpeg_backend;
pub mod rate;

use tracing::debug;

pub use contract::{
    CapabilityReport, Codec, Dimensions, EncodeError, EncodeSummary, EncodedPacket,
    EncoderSettings, PacketSink, RawFrame,
};
pub(crate) use contract::H264Encoder;

use annexb::ParameterSets;

/// Synchronous H.264 encode session.
///
/// Construction resolves a backend (hardware preferred); each submitted
/// frame is forwarded to it and every packet the codec releases is handed
/// to the sink callback in output order. Zero packets per frame is normal
/// while the codec fills its internal buffers. Backend resources are
/// released on drop.
pub struct EncodeSession {
    encoder_inner: Box<dyn H264Encoder>,
    sink: PacketSink,
    parameter_sets: ParameterSets,
    summary: EncodeSummary,
}

impl EncodeSession {
    pub fn new(settings: EncoderSettings, sink: PacketSink) -> Self {
        Self {
            encoder_inner: build_encoder_inner(&settings),
            sink,
            parameter_sets: ParameterSets::default(),
            summary: EncodeSummary::default(),
        }
    }

    #[cfg(test)]
    fn with_encoder_inner(encoder_inner: Box<dyn H264Encoder>, sink: PacketSink) -> Self {
        Self {
            encoder_inner,
            sink,
            parameter_sets: ParameterSets::default(),
            summary: EncodeSummary::default(),
        }
    }

    /// Submits one raw frame and drains the backend through the sink.
    /// Returns the number of packets delivered for this frame.
    pub fn push_frame(&mut self, frame: RawFrame) -> Result<usize, EncodeError> {
        frame.validate()?;
        let packets = self.encoder_inner.push_frame(frame)?;
        self.summary.frames_submitted += 1;
        Ok(self.deliver(packets))
    }

    /// Signals end of stream and drains the codec's buffered tail.
    pub fn flush(&mut self) -> Result<usize, EncodeError> {
        let packets = self.encoder_inner.flush()?;
        debug!(packets = packets.len(), "encoder flushed");
        Ok(self.deliver(packets))
    }

    pub fn query_capability(&self) -> Result<CapabilityReport, EncodeError> {
        self.encoder_inner.query_capability()
    }

    /// SPS/PPS harvested from delivered packets so far.
    pub fn parameter_sets(&self) -> &ParameterSets {
        &self.parameter_sets
    }

    pub fn summary(&self) -> EncodeSummary {
        self.summary
    }

    fn deliver(&mut self, packets: Vec<EncodedPacket>) -> usize {
        let delivered = packets.len();
        for mut packet in packets {
            let info = annexb::classify(&packet.data, &mut self.parameter_sets);
            packet.is_keyframe = packet.is_keyframe || info.is_keyframe;
            self.summary.packets_delivered += 1;
            self.summary.bytes_delivered += packet.data.len() as u64;
            if packet.is_keyframe {
                self.summary.keyframes_delivered += 1;
            }
            (self.sink)(packet);
        }
        delivered
    }
}

struct UnsupportedEncoderAdapter {
    message: String,
}

impl UnsupportedEncoderAdapter {
    fn new(message: String) -> Self {
        Self { message }
    }
}

impl H264Encoder for UnsupportedEncoderAdapter {
    fn query_capability(&self) -> Result<CapabilityReport, EncodeError> {
        Ok(CapabilityReport {
            codec: Codec::H264,
            encode_supported: false,
            hardware_acceleration: false,
        })
    }

    fn push_frame(&mut self, _frame: RawFrame) -> Result<Vec<EncodedPacket>, EncodeError> {
        Err(EncodeError::UnsupportedConfig(self.message.clone()))
    }

    fn flush(&mut self) -> Result<Vec<EncodedPacket>, EncodeError> {
        Err(EncodeError::UnsupportedConfig(self.message.clone()))
    }
}

fn build_encoder_inner(settings: &EncoderSettings) -> Box<dyn H264Encoder> {
    #[cfg(feature = "backend-ffmpeg")]
    let inner: Box<dyn H264Encoder> = match ffmpeg_backend::FfmpegEncoder::open(settings) {
        Ok(encoder) => Box::new(encoder),
        Err(err) => {
            tracing::warn!("ffmpeg backend unavailable: {err}");
            Box::new(UnsupportedEncoderAdapter::new(err.to_string()))
        }
    };
    #[cfg(not(feature = "backend-ffmpeg"))]
    let inner: Box<dyn H264Encoder> = {
        let _ = settings;
        Box::new(UnsupportedEncoderAdapter::new(
            "H.264 encoding requires the backend-ffmpeg feature".to_string(),
        ))
    };
    inner
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::*;

    fn dims(width: u32, height: u32) -> Dimensions {
        Dimensions::new(width, height).unwrap()
    }

    fn yuv_frame(d: Dimensions, pts: i64) -> RawFrame {
        let luma = (d.width.get() * d.height.get()) as usize;
        let chroma = (d.width.get() as usize).div_ceil(2) * (d.height.get() as usize).div_ceil(2);
        RawFrame::new(d, pts, vec![0x80; luma], vec![0x80; chroma], vec![0x80; chroma])
    }

    fn annexb_packet(nalus: &[&[u8]], pts: i64) -> EncodedPacket {
        let mut data = Vec::new();
        for nal in nalus {
            data.extend_from_slice(&[0, 0, 0, 1]);
            data.extend_from_slice(nal);
        }
        EncodedPacket {
            data,
            pts: Some(pts),
            dts: Some(pts),
            is_keyframe: false,
        }
    }

    struct ScriptedEncoder {
        responses: VecDeque<Vec<EncodedPacket>>,
        flush_packets: Vec<EncodedPacket>,
        push_error: Option<EncodeError>,
    }

    impl ScriptedEncoder {
        fn new(responses: Vec<Vec<EncodedPacket>>, flush_packets: Vec<EncodedPacket>) -> Self {
            Self {
                responses: responses.into(),
                flush_packets,
                push_error: None,
            }
        }
    }

    impl H264Encoder for ScriptedEncoder {
        fn query_capability(&self) -> Result<CapabilityReport, EncodeError> {
            Ok(CapabilityReport {
                codec: Codec::H264,
                encode_supported: true,
                hardware_acceleration: false,
            })
        }

        fn push_frame(&mut self, _frame: RawFrame) -> Result<Vec<EncodedPacket>, EncodeError> {
            if let Some(err) = self.push_error.take() {
                return Err(err);
            }
            Ok(self.responses.pop_front().unwrap_or_default())
        }

        fn flush(&mut self) -> Result<Vec<EncodedPacket>, EncodeError> {
            Ok(std::mem::take(&mut self.flush_packets))
        }
    }

    fn capture_sink() -> (Rc<RefCell<Vec<EncodedPacket>>>, PacketSink) {
        let captured = Rc::new(RefCell::new(Vec::new()));
        let inner = Rc::clone(&captured);
        let sink: PacketSink = Box::new(move |packet| inner.borrow_mut().push(packet));
        (captured, sink)
    }

    #[test]
    fn packets_reach_sink_in_output_order() {
        let scripted = ScriptedEncoder::new(
            vec![
                Vec::new(),
                vec![annexb_packet(&[&[0x41, 0x9A]], 0), annexb_packet(&[&[0x41, 0x9B]], 1)],
            ],
            Vec::new(),
        );
        let (captured, sink) = capture_sink();
        let mut session = EncodeSession::with_encoder_inner(Box::new(scripted), sink);

        let d = dims(64, 48);
        assert_eq!(session.push_frame(yuv_frame(d, 0)).unwrap(), 0);
        assert_eq!(session.push_frame(yuv_frame(d, 1)).unwrap(), 2);

        let packets = captured.borrow();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].pts, Some(0));
        assert_eq!(packets[1].pts, Some(1));
    }

    #[test]
    fn idr_packets_are_flagged_and_parameter_sets_harvested() {
        let scripted = ScriptedEncoder::new(
            vec![vec![annexb_packet(
                &[&[0x67, 0x42, 0x00, 0x1E], &[0x68, 0xCE], &[0x65, 0x88]],
                0,
            )]],
            Vec::new(),
        );
        let (captured, sink) = capture_sink();
        let mut session = EncodeSession::with_encoder_inner(Box::new(scripted), sink);

        session.push_frame(yuv_frame(dims(64, 48), 0)).unwrap();

        assert!(captured.borrow()[0].is_keyframe);
        assert!(session.parameter_sets().complete());
        assert_eq!(session.summary().keyframes_delivered, 1);
    }

    #[test]
    fn flush_drains_buffered_tail_through_sink() {
        let scripted = ScriptedEncoder::new(
            vec![Vec::new()],
            vec![annexb_packet(&[&[0x41, 0x9A]], 0)],
        );
        let (captured, sink) = capture_sink();
        let mut session = EncodeSession::with_encoder_inner(Box::new(scripted), sink);

        session.push_frame(yuv_frame(dims(64, 48), 0)).unwrap();
        assert_eq!(session.flush().unwrap(), 1);
        assert_eq!(captured.borrow().len(), 1);
    }

    #[test]
    fn summary_counts_frames_packets_and_bytes() {
        let first = annexb_packet(&[&[0x65, 0x88]], 0);
        let first_len = first.data.len() as u64;
        let scripted = ScriptedEncoder::new(vec![vec![first], Vec::new()], Vec::new());
        let (_captured, sink) = capture_sink();
        let mut session = EncodeSession::with_encoder_inner(Box::new(scripted), sink);

        let d = dims(64, 48);
        session.push_frame(yuv_frame(d, 0)).unwrap();
        session.push_frame(yuv_frame(d, 1)).unwrap();

        let summary = session.summary();
        assert_eq!(summary.frames_submitted, 2);
        assert_eq!(summary.packets_delivered, 1);
        assert_eq!(summary.bytes_delivered, first_len);
    }

    #[test]
    fn undersized_planes_are_rejected_before_the_backend() {
        let scripted = ScriptedEncoder::new(Vec::new(), Vec::new());
        let (captured, sink) = capture_sink();
        let mut session = EncodeSession::with_encoder_inner(Box::new(scripted), sink);

        let d = dims(64, 48);
        let bad = RawFrame::new(d, 0, vec![0; 16], vec![0; 16], vec![0; 16]);
        match session.push_frame(bad) {
            Err(EncodeError::InvalidInput(message)) => {
                assert!(message.contains("y plane size mismatch"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(captured.borrow().is_empty());
        assert_eq!(session.summary().frames_submitted, 0);
    }

    #[test]
    fn backend_errors_propagate_without_sink_delivery() {
        let mut scripted = ScriptedEncoder::new(Vec::new(), Vec::new());
        scripted.push_error = Some(EncodeError::Backend("device reset".to_string()));
        let (captured, sink) = capture_sink();
        let mut session = EncodeSession::with_encoder_inner(Box::new(scripted), sink);

        match session.push_frame(yuv_frame(dims(64, 48), 0)) {
            Err(EncodeError::Backend(message)) => assert_eq!(message, "device reset"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(captured.borrow().is_empty());
    }

    #[cfg(not(feature = "backend-ffmpeg"))]
    #[test]
    fn default_build_installs_unsupported_adapter() {
        let (_captured, sink) = capture_sink();
        let settings = EncoderSettings::new(dims(640, 360), 30);
        let mut session = EncodeSession::new(settings, sink);

        let capability = session.query_capability().unwrap();
        assert!(!capability.encode_supported);

        match session.push_frame(yuv_frame(dims(640, 360), 0)) {
            Err(EncodeError::UnsupportedConfig(message)) => {
                assert!(message.contains("backend-ffmpeg"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
