//! Pure time-formatting helpers shared by the queue's timestamp and
//! progress-bar rendering.

/// A millisecond duration split into calendar-style components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TimeData {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

/// Splits a millisecond duration into days/hours/minutes/seconds.
pub fn parse_ms(milliseconds: u64) -> TimeData {
    TimeData {
        days: milliseconds / 86_400_000,
        hours: (milliseconds / 3_600_000) % 24,
        minutes: (milliseconds / 60_000) % 60,
        seconds: (milliseconds / 1_000) % 60,
    }
}

/// Renders a [`TimeData`] as a compact timecode, dropping leading zero
/// components: `3:32`, `1:02:03`, `0:07`.
pub fn build_time_code(duration: TimeData) -> String {
    let parts = [
        duration.days,
        duration.hours,
        duration.minutes,
        duration.seconds,
    ];
    let first = parts.iter().position(|&p| p != 0).unwrap_or(parts.len() - 1);

    let rendered: Vec<String> = parts[first..]
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            if i == 0 {
                p.to_string()
            } else {
                format!("{p:02}")
            }
        })
        .collect();
    let joined = rendered.join(":");

    // A lone seconds component still reads as a timecode.
    if joined.len() <= 3 {
        format!("0:{joined:0>2}")
    } else {
        joined
    }
}

/// Fixed-width `HH:MM:SS` (or `MM:SS` under an hour) timecode.
pub fn ms_to_time(ms: u64) -> String {
    let seconds = (ms / 1_000) % 60;
    let minutes = (ms / 60_000) % 60;
    let hours = ms / 3_600_000;

    if ms >= 3_600_000 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ms_splits_components() {
        let t = parse_ms(3_723_000); // 1h 2m 3s
        assert_eq!(t.days, 0);
        assert_eq!(t.hours, 1);
        assert_eq!(t.minutes, 2);
        assert_eq!(t.seconds, 3);

        let t = parse_ms(90_061_000); // 1d 1h 1m 1s
        assert_eq!(t.days, 1);
        assert_eq!(t.hours, 1);
        assert_eq!(t.minutes, 1);
        assert_eq!(t.seconds, 1);
    }

    #[test]
    fn time_codes_drop_leading_zeros() {
        assert_eq!(build_time_code(parse_ms(0)), "0:00");
        assert_eq!(build_time_code(parse_ms(7_000)), "0:07");
        assert_eq!(build_time_code(parse_ms(32_000)), "0:32");
        assert_eq!(build_time_code(parse_ms(212_000)), "3:32");
        assert_eq!(build_time_code(parse_ms(3_723_000)), "1:02:03");
        assert_eq!(build_time_code(parse_ms(90_000_000)), "1:01:00:00");
    }

    #[test]
    fn ms_to_time_is_fixed_width() {
        assert_eq!(ms_to_time(0), "00:00");
        assert_eq!(ms_to_time(212_000), "03:32");
        assert_eq!(ms_to_time(3_723_000), "01:02:03");
    }
}
