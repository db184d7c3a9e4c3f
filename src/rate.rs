/// Live-stream bitrate anchor for 1280x720 at 20 fps, in bit/s.
pub const LIVESTREAM_BITRATE_720P: u64 = 4_000_000;

/// Linear bitrate ladder anchored at 720p.
///
/// Scales the anchor by width, then height, then frame rate, with each
/// factor applied in sequence using integer division. Frame rates below
/// 15 fps are priced as 15 fps; 20 fps is the neutral point. Zero (or
/// non-positive) inputs fall back to the anchor unchanged.
#[must_use]
pub fn live_bitrate(width: u32, height: u32, fps: i32) -> u64 {
    if width == 0 || height == 0 || fps <= 0 {
        return LIVESTREAM_BITRATE_720P;
    }

    let mut bitrate = LIVESTREAM_BITRATE_720P * u64::from(width) / 1280;
    bitrate = bitrate * u64::from(height) / 720;
    if fps >= 15 {
        bitrate = bitrate * fps as u64 / 20;
    } else {
        bitrate = bitrate * 15 / 20;
    }
    bitrate
}
