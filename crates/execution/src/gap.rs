use engine_core::GapDecision;

/// How far above the entry band an open may print before chasing is off.
const CHASE_LIMIT: f64 = 1.02;

/// Monday-open decision for an approved position.
///
/// One decision per position per Monday; the caller records it and the
/// position tracker applies it.
pub fn decide_at_open(open: f64, stop: f64, entry_low: f64, entry_high: f64) -> GapDecision {
    if open <= stop {
        GapDecision::SkipGappedThroughStop
    } else if open > entry_high * CHASE_LIMIT {
        GapDecision::SkipDoNotChase
    } else if open >= entry_low && open <= entry_high {
        GapDecision::EnterAtOpen
    } else if open > stop && open < entry_low {
        GapDecision::EnterAtOpenSmallGapAgainst
    } else {
        // Between the band top and the chase limit.
        GapDecision::WaitAndWatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Band [94, 96], stop 93.
    const STOP: f64 = 93.0;
    const LOW: f64 = 94.0;
    const HIGH: f64 = 96.0;

    #[test]
    fn test_gapped_through_stop() {
        assert_eq!(
            decide_at_open(92.5, STOP, LOW, HIGH),
            GapDecision::SkipGappedThroughStop
        );
        // Exactly at the stop counts as gapped through.
        assert_eq!(
            decide_at_open(STOP, STOP, LOW, HIGH),
            GapDecision::SkipGappedThroughStop
        );
    }

    #[test]
    fn test_do_not_chase() {
        assert_eq!(
            decide_at_open(98.0, STOP, LOW, HIGH),
            GapDecision::SkipDoNotChase
        );
    }

    #[test]
    fn test_enter_in_band() {
        assert_eq!(decide_at_open(95.0, STOP, LOW, HIGH), GapDecision::EnterAtOpen);
        assert_eq!(decide_at_open(LOW, STOP, LOW, HIGH), GapDecision::EnterAtOpen);
        assert_eq!(decide_at_open(HIGH, STOP, LOW, HIGH), GapDecision::EnterAtOpen);
    }

    #[test]
    fn test_small_gap_against() {
        assert_eq!(
            decide_at_open(93.5, STOP, LOW, HIGH),
            GapDecision::EnterAtOpenSmallGapAgainst
        );
    }

    #[test]
    fn test_wait_and_watch_between_band_and_chase_limit() {
        // 96 < open <= 97.92.
        assert_eq!(
            decide_at_open(97.0, STOP, LOW, HIGH),
            GapDecision::WaitAndWatch
        );
        assert_eq!(
            decide_at_open(HIGH * 1.02, STOP, LOW, HIGH),
            GapDecision::WaitAndWatch
        );
    }
}
