// src/hardware/temperature.rs
use serde::{Deserialize, Serialize};

/// Label that precedes the hotend reading in a Marlin temperature report.
pub const HOTEND_MARKER: &str = "T:";
/// Label that precedes the bed reading in a Marlin temperature report.
pub const BED_MARKER: &str = "B:";

/// One (hotend, bed) temperature reading in °C.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub hotend: f64,
    pub bed: f64,
}

/// Extract a temperature sample from one line of firmware output.
///
/// A Marlin report looks like `ok T:205.3 /200.0 B:59.8 /60.0`. The value after
/// each marker runs up to the next whitespace, so the ` /target` suffix never
/// reaches the number parser. Lines missing a marker, or carrying a value that
/// is not a finite number, yield `None`; that is the common case for ordinary
/// replies and for reports split across two reads.
pub fn parse_temperature(line: &str) -> Option<TelemetrySample> {
    let hotend = field_after(line, HOTEND_MARKER)?;
    let bed = field_after(line, BED_MARKER)?;
    Some(TelemetrySample { hotend, bed })
}

fn field_after(line: &str, marker: &str) -> Option<f64> {
    let start = line.find(marker)? + marker.len();
    let raw = line[start..].split_whitespace().next()?;
    // split_whitespace skips leading blanks, the value must touch the marker
    if !line[start..].starts_with(raw) {
        return None;
    }
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_marlin_m105_reply() {
        let sample = parse_temperature("ok T:205.3 /200.0 B:59.8 /60.0").unwrap();
        assert_eq!(sample, TelemetrySample { hotend: 205.3, bed: 59.8 });
    }

    #[test]
    fn parses_unsolicited_auto_report() {
        let sample = parse_temperature("T:21.50 /0.00 B:22.10 /0.00 @:0 B@:0").unwrap();
        assert_eq!(sample.hotend, 21.5);
        assert_eq!(sample.bed, 22.1);
    }

    #[test]
    fn value_at_end_of_line() {
        let sample = parse_temperature("B:60 T:200").unwrap();
        assert_eq!(sample, TelemetrySample { hotend: 200.0, bed: 60.0 });
    }

    #[test]
    fn missing_bed_marker() {
        assert_eq!(parse_temperature("ok T:205.3"), None);
    }

    #[test]
    fn missing_hotend_marker() {
        assert_eq!(parse_temperature("ok B:60.0 /60.0"), None);
    }

    #[test]
    fn empty_and_plain_replies() {
        assert_eq!(parse_temperature(""), None);
        assert_eq!(parse_temperature("ok"), None);
        assert_eq!(parse_temperature("echo:busy: processing"), None);
    }

    #[test]
    fn non_numeric_values() {
        assert_eq!(parse_temperature("T:abc B:60.0"), None);
        assert_eq!(parse_temperature("T:200.0 B:/60.0"), None);
        assert_eq!(parse_temperature("T:200.0/210 B:60.0"), None);
        assert_eq!(parse_temperature("T:NaN B:60.0"), None);
    }

    #[test]
    fn separated_value_is_not_accepted() {
        assert_eq!(parse_temperature("T: 200.0 B: 60.0"), None);
    }

    #[test]
    fn truncated_report() {
        // First half of a report whose tail arrives in the next read
        assert_eq!(parse_temperature("ok T:205.3 /200.0 B:"), None);
    }
}
