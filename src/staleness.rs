//! Fresh/stale evaluation and the elapsed-time text shown on display boards.

use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// green
    Fresh,
    /// red
    Stale,
}

impl Signal {
    /// coil pair as (red, green)
    pub fn coils(self) -> [bool; 2] {
        match self {
            Signal::Stale => [true, false],
            Signal::Fresh => [false, true],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Staleness {
    pub signal: Signal,
    /// elapsed time saturated at the threshold
    pub shown: Duration,
}

/// The threshold itself is still fresh.
pub fn evaluate(elapsed: Duration, max_age: Duration) -> Staleness {
    if elapsed > max_age {
        Staleness { signal: Signal::Stale, shown: max_age }
    } else {
        Staleness { signal: Signal::Fresh, shown: elapsed }
    }
}

/// "HH:MM" with the colon, "HH MM" without. Rounds to the nearest minute,
/// half a minute rounds up.
pub fn format_elapsed(elapsed: Duration, with_colon: bool) -> String {
    let minutes = (elapsed.as_secs() + 30) / 60;
    let hours = minutes / 60;
    let minutes = minutes % 60;
    let sep = if with_colon { ':' } else { ' ' };
    format!("{:02}{}{:02}", hours, sep, minutes)
}

/// Coil block for a tick: one (red, green) pair per furnace, both off for a
/// furnace with no result yet.
pub fn coil_block(signals: &[Option<Signal>]) -> Vec<bool> {
    signals
        .iter()
        .flat_map(|s| s.map(Signal::coils).unwrap_or([false, false]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_threshold_boundary() {
        assert_eq!(evaluate(Duration::from_secs(59 * 60 + 59), HOUR).signal, Signal::Fresh);
        assert_eq!(evaluate(Duration::from_secs(60 * 60), HOUR).signal, Signal::Fresh);
        assert_eq!(evaluate(Duration::from_secs(60 * 60 + 1), HOUR).signal, Signal::Stale);
    }

    #[test]
    fn test_stale_is_clamped() {
        let s = evaluate(Duration::from_secs(10 * 3600), HOUR);
        assert_eq!(s.shown, HOUR);
        assert_eq!(format_elapsed(s.shown, true), "01:00");

        let fresh = evaluate(Duration::from_secs(125), HOUR);
        assert_eq!(fresh.shown, Duration::from_secs(125));
    }

    #[test]
    fn test_format_rounding() {
        assert_eq!(format_elapsed(Duration::from_secs(0), true), "00:00");
        assert_eq!(format_elapsed(Duration::from_secs(29), true), "00:00");
        assert_eq!(format_elapsed(Duration::from_secs(30), true), "00:01");
        assert_eq!(format_elapsed(Duration::from_secs(2 * 3600 + 5 * 60 + 40), true), "02:06");
        assert_eq!(format_elapsed(Duration::from_secs(59 * 60 + 45), false), "01 00");
    }

    #[test]
    fn test_format_blink() {
        let d = Duration::from_secs(3 * 3600 + 7 * 60);
        assert_eq!(format_elapsed(d, true), "03:07");
        assert_eq!(format_elapsed(d, false), "03 07");
    }

    #[test]
    fn test_coil_pairs_by_index() {
        let coils = coil_block(&[Some(Signal::Stale), Some(Signal::Fresh), None]);
        assert_eq!(coils, vec![true, false, false, true, false, false]);
    }
}
