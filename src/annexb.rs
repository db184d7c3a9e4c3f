//! Classification of encoded Annex B packets: keyframe detection plus
//! SPS/PPS capture so a pusher can assemble its sequence header.

pub const NAL_IDR: u8 = 5;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;

#[derive(Debug, Clone, Default)]
pub struct ParameterSets {
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl ParameterSets {
    #[must_use]
    pub fn sps(&self) -> Option<&[u8]> {
        self.sps.as_deref()
    }

    #[must_use]
    pub fn pps(&self) -> Option<&[u8]> {
        self.pps.as_deref()
    }

    #[must_use]
    pub fn complete(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }

    fn observe(&mut self, nal: &[u8]) {
        if nal.is_empty() {
            return;
        }
        match nal[0] & 0x1f {
            NAL_SPS => self.sps = Some(nal.to_vec()),
            NAL_PPS => self.pps = Some(nal.to_vec()),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketInfo {
    pub is_keyframe: bool,
    pub nal_types: Vec<u8>,
}

/// Scans one encoded packet, records any SPS/PPS into `params`, and reports
/// the NAL types seen. A payload without start codes classifies as non-key
/// with no NALs; this never errors.
pub fn classify(data: &[u8], params: &mut ParameterSets) -> PacketInfo {
    let mut info = PacketInfo::default();
    let starts = find_start_codes(data);

    for (index, (start, start_len)) in starts.iter().copied().enumerate() {
        let payload_start = start + start_len;
        let end = starts
            .get(index + 1)
            .map_or(data.len(), |(next, _)| *next);
        if end <= payload_start {
            continue;
        }
        let nal = &data[payload_start..end];
        let nal_type = nal[0] & 0x1f;
        params.observe(nal);
        info.nal_types.push(nal_type);
        if nal_type == NAL_IDR {
            info.is_keyframe = true;
        }
    }

    info
}

fn find_start_codes(data: &[u8]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + 3 <= data.len() {
        if i + 4 <= data.len()
            && data[i] == 0
            && data[i + 1] == 0
            && data[i + 2] == 0
            && data[i + 3] == 1
        {
            out.push((i, 4));
            i += 4;
            continue;
        }
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            out.push((i, 3));
            i += 3;
            continue;
        }
        i += 1;
    }
    out
}
