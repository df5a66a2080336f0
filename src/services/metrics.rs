//! Attendance target arithmetic.
//!
//! Pure functions over attended/total counts. Everything is done in integer
//! percent units so results are exact: with target `t` percent,
//!
//! * classes needed  = ceil((t·total − 100·attended) / (100 − t)), floored at 0
//! * classes to skip = floor((100·attended − t·total) / t), floored at 0
//!
//! which is the same as `ceil((r·total − attended) / (1 − r))` and
//! `floor(attended / r − total)` for the ratio `r = t / 100`.

/// Minimum attendance ratio, in whole percent. Always 1..=99; the service runs at 75.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttendanceTarget(u8);

impl Default for AttendanceTarget {
    fn default() -> Self {
        Self(75)
    }
}

/// Additional classes that must be attended (and conducted) to reach `target`.
pub fn classes_needed(attended: u32, total: u32, target: AttendanceTarget) -> u32 {
    if total == 0 {
        return 0;
    }
    let t = i64::from(target.0);
    let deficit = t * i64::from(total) - 100 * i64::from(attended);
    if deficit <= 0 {
        return 0;
    }
    let needed = (deficit + (100 - t) - 1) / (100 - t);
    u32::try_from(needed).unwrap_or(u32::MAX)
}

/// Additional conducted-but-missed classes that keep the ratio at or above `target`.
pub fn classes_skippable(attended: u32, total: u32, target: AttendanceTarget) -> u32 {
    if total == 0 {
        return 0;
    }
    let t = i64::from(target.0);
    let surplus = 100 * i64::from(attended) - t * i64::from(total);
    if surplus <= 0 {
        return 0;
    }
    u32::try_from(surplus / t).unwrap_or(u32::MAX)
}

/// Attended over total as a percentage rounded to two decimals; 0 when nothing was conducted.
pub fn percentage(attended: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = f64::from(attended) / f64::from(total) * 100.0;
    (raw * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> AttendanceTarget {
        AttendanceTarget::default()
    }

    #[test]
    fn below_target_needs_classes() {
        // 20/30 = 66.67%: ceil((22.5 - 20) / 0.25) = 10
        assert_eq!(percentage(20, 30), 66.67);
        assert_eq!(classes_needed(20, 30, target()), 10);
        assert_eq!(classes_skippable(20, 30, target()), 0);
    }

    #[test]
    fn above_target_can_skip() {
        // 28/30 = 93.33%: floor(37.33 - 30) = 7
        assert_eq!(percentage(28, 30), 93.33);
        assert_eq!(classes_skippable(28, 30, target()), 7);
        assert_eq!(classes_needed(28, 30, target()), 0);
    }

    #[test]
    fn nothing_conducted_is_all_zero() {
        assert_eq!(classes_needed(0, 0, target()), 0);
        assert_eq!(classes_skippable(0, 0, target()), 0);
        assert_eq!(percentage(0, 0), 0.0);
    }

    #[test]
    fn exactly_on_target_has_no_margin() {
        assert_eq!(classes_needed(3, 4, target()), 0);
        assert_eq!(classes_skippable(3, 4, target()), 0);
        assert_eq!(classes_needed(75, 100, target()), 0);
        assert_eq!(classes_skippable(75, 100, target()), 0);
    }

    #[test]
    fn needed_classes_actually_reach_target() {
        for total in 0..=60u32 {
            for attended in 0..=total {
                let needed = classes_needed(attended, total, target());
                let skip = classes_skippable(attended, total, target());

                if total > 0 {
                    // Attending `needed` more lands at or above 75%, one fewer does not.
                    assert!(4 * (attended + needed) >= 3 * (total + needed));
                    if needed > 0 {
                        assert!(4 * (attended + needed - 1) < 3 * (total + needed - 1));
                    }
                    // Skipping `skip` more stays at or above 75%, one more does not.
                    assert!(4 * attended >= 3 * (total + skip) || skip == 0);
                    assert!(4 * attended < 3 * (total + skip + 1));
                }
            }
        }
    }

    #[test]
    fn other_targets() {
        let sixty = AttendanceTarget(60);
        // ceil((0.6*10 - 4) / 0.4) = 5
        assert_eq!(classes_needed(4, 10, sixty), 5);
        // floor(9 / 0.6 - 10) = 5
        assert_eq!(classes_skippable(9, 10, sixty), 5);
    }

    #[test]
    fn default_target_is_seventy_five_percent() {
        assert_eq!(AttendanceTarget::default(), AttendanceTarget(75));
    }
}
