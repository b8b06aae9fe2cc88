//! The `grpc-timeout` header value: a deadline for the whole call.
//!
//! Wire form is one to eight ASCII digits followed by a unit: `H` hours,
//! `M` minutes, `S` seconds, `m` milliseconds, `u` microseconds,
//! `n` nanoseconds.

use std::time::Duration;

const MAX_TIMEOUT_DIGITS: usize = 8;
const MAX_TIMEOUT_VALUE: u128 = 99_999_999;

/// Unit divisors in nanoseconds, largest first.
const UNITS: [(u128, char); 6] = [
    (3_600_000_000_000, 'H'),
    (60_000_000_000, 'M'),
    (1_000_000_000, 'S'),
    (1_000_000, 'm'),
    (1_000, 'u'),
    (1, 'n'),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GrpcTimeout(Duration);

impl GrpcTimeout {
    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    pub fn duration(&self) -> Duration {
        self.0
    }

    /// Parses the wire form. Returns `None` for anything malformed: no
    /// digits, more than eight digits, or an unknown unit.
    pub fn parse(value: &[u8]) -> Option<Self> {
        if value.len() < 2 || value.len() > MAX_TIMEOUT_DIGITS + 1 {
            return None;
        }
        let (digits, unit) = value.split_at(value.len() - 1);
        if !digits.iter().all(u8::is_ascii_digit) {
            return None;
        }
        let amount: u64 = std::str::from_utf8(digits).ok()?.parse().ok()?;
        let nanos_per = match unit[0] {
            b'H' => 3_600_000_000_000,
            b'M' => 60_000_000_000,
            b'S' => 1_000_000_000,
            b'm' => 1_000_000,
            b'u' => 1_000,
            b'n' => 1,
            _ => return None,
        };
        Some(Self(Duration::from_nanos(amount.checked_mul(nanos_per)?)))
    }

    /// Renders the wire form, choosing the largest unit that represents the
    /// duration exactly. Durations too fine to fit eight digits are rounded
    /// up to the next representable coarser value, never down.
    pub fn to_header_value(&self) -> String {
        let nanos = self.0.as_nanos();
        for (divisor, unit) in UNITS {
            if nanos % divisor == 0 && nanos / divisor <= MAX_TIMEOUT_VALUE {
                return format!("{}{}", nanos / divisor, unit);
            }
        }
        // Round up in the finest unit whose eight digits hold the magnitude.
        for (divisor, unit) in UNITS.iter().rev() {
            let amount = nanos.div_ceil(*divisor);
            if amount <= MAX_TIMEOUT_VALUE {
                return format!("{}{}", amount, unit);
            }
        }
        // Longer than 99999999 hours: clamp.
        format!("{}H", MAX_TIMEOUT_VALUE)
    }
}

impl From<Duration> for GrpcTimeout {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        let cases: [(&[u8], Duration); 6] = [
            (b"1H", Duration::from_secs(3600)),
            (b"2M", Duration::from_secs(120)),
            (b"30S", Duration::from_secs(30)),
            (b"250m", Duration::from_millis(250)),
            (b"7u", Duration::from_micros(7)),
            (b"99999999n", Duration::from_nanos(99_999_999)),
        ];
        for (wire, duration) in cases {
            assert_eq!(GrpcTimeout::parse(wire), Some(GrpcTimeout(duration)));
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for wire in [
            &b""[..],
            b"S",
            b"12",
            b"-1S",
            b"1.5S",
            b"123456789S", // nine digits
            b"10X",
        ] {
            assert_eq!(GrpcTimeout::parse(wire), None, "{:?}", wire);
        }
    }

    #[test]
    fn test_render_picks_compact_unit() {
        assert_eq!(GrpcTimeout::new(Duration::from_secs(3600)).to_header_value(), "1H");
        assert_eq!(GrpcTimeout::new(Duration::from_secs(90)).to_header_value(), "90S");
        assert_eq!(GrpcTimeout::new(Duration::from_millis(250)).to_header_value(), "250m");
        assert_eq!(GrpcTimeout::new(Duration::from_nanos(5)).to_header_value(), "5n");
    }

    #[test]
    fn test_render_parse_round_trip() {
        for duration in [
            Duration::from_secs(1),
            Duration::from_millis(1500),
            Duration::from_micros(42),
            Duration::from_secs(7200),
        ] {
            let timeout = GrpcTimeout::new(duration);
            let wire = timeout.to_header_value();
            assert_eq!(GrpcTimeout::parse(wire.as_bytes()), Some(timeout), "{}", wire);
        }
    }

    #[test]
    fn test_render_rounds_up_when_too_fine() {
        // 123456789 ns cannot be written in nanos (nine digits); the value
        // rounds up to the next representable microsecond count.
        let timeout = GrpcTimeout::new(Duration::from_nanos(123_456_789));
        assert_eq!(timeout.to_header_value(), "123457u");
    }
}
