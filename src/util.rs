use num_rational::Rational32;

/// Converts a timestamp in `time_base` units to seconds.
pub(crate) fn pts_to_seconds(pts: i64, time_base: Rational32) -> f64 {
    (pts as f64 * f64::from(*time_base.numer())) / f64::from(*time_base.denom())
}

/// Best guess at the number of frames in a stream.
///
/// Prefers the container's declared frame count. Falls back to
/// `duration * time_base * frame_rate`, rounded to the nearest frame.
#[cfg_attr(all(not(feature = "ffmpeg"), not(test)), expect(dead_code))]
pub(crate) fn estimate_total_frames(
    declared: i64,
    duration: Option<i64>,
    time_base: Rational32,
    frame_rate: Option<Rational32>,
) -> Option<u64> {
    if declared > 0 {
        return u64::try_from(declared).ok();
    }
    let duration = duration.filter(|&d| d > 0)?;
    let frame_rate = frame_rate.filter(|r| *r.numer() > 0)?;

    let num = i128::from(duration)
        * i128::from(*time_base.numer())
        * i128::from(*frame_rate.numer());
    let den = i128::from(*time_base.denom()) * i128::from(*frame_rate.denom());
    if den <= 0 || num <= 0 {
        return None;
    }
    u64::try_from((num + den / 2) / den)
        .ok()
        .filter(|&frames| frames > 0)
}

/// Rounds `value` up to the next multiple of `alignment`.
pub(crate) const fn align_up(value: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

/// Arguments for libavfilter's `buffer` source describing the frames fed into a graph.
#[cfg_attr(all(not(feature = "ffmpeg"), not(test)), expect(dead_code))]
pub(crate) fn buffer_source_args(
    width: u32,
    height: u32,
    pix_fmt: i32,
    time_base: Rational32,
    pixel_aspect: Rational32,
) -> String {
    format!(
        "video_size={width}x{height}:pix_fmt={pix_fmt}:time_base={}/{}:pixel_aspect={}/{}",
        time_base.numer(),
        time_base.denom(),
        pixel_aspect.numer(),
        pixel_aspect.denom()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_follow_time_base() {
        let tb = Rational32::new(1, 30);
        assert_eq!(pts_to_seconds(0, tb), 0.0);
        assert_eq!(pts_to_seconds(30, tb), 1.0);
        assert_eq!(pts_to_seconds(60, tb), 2.0);
        assert_eq!(pts_to_seconds(45, Rational32::new(1, 90)), 0.5);
    }

    #[test]
    fn declared_frame_count_wins() {
        let tb = Rational32::new(1, 1000);
        assert_eq!(
            estimate_total_frames(250, Some(1), tb, Some(Rational32::new(25, 1))),
            Some(250)
        );
    }

    #[test]
    fn frame_count_from_duration() {
        // 10 seconds in a 1/90000 time base at 30000/1001 fps.
        let tb = Rational32::new(1, 90000);
        let fps = Rational32::new(30000, 1001);
        assert_eq!(
            estimate_total_frames(0, Some(900_000), tb, Some(fps)),
            Some(300)
        );
    }

    #[test]
    fn frame_count_unknown() {
        let tb = Rational32::new(1, 1000);
        assert_eq!(estimate_total_frames(0, None, tb, Some(Rational32::new(25, 1))), None);
        assert_eq!(estimate_total_frames(0, Some(4000), tb, None), None);
        assert_eq!(
            estimate_total_frames(-1, Some(-5), tb, Some(Rational32::new(25, 1))),
            None
        );
    }

    #[test]
    fn alignment() {
        assert_eq!(align_up(30, 16), 32);
        assert_eq!(align_up(32, 16), 32);
        assert_eq!(align_up(7, 1), 7);
        assert_eq!(align_up(7, 0), 7);
    }

    #[test]
    fn buffer_args() {
        assert_eq!(
            buffer_source_args(1920, 1080, 23, Rational32::new(1, 90000), Rational32::new(1, 1)),
            "video_size=1920x1080:pix_fmt=23:time_base=1/90000:pixel_aspect=1/1"
        );
    }
}
