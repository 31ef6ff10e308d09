//! Wheel geometry and winner selection
//!
//! Segment `i` of `n` is drawn from `i * segment - PI/2` to
//! `(i + 1) * segment - PI/2`, offset by the wheel rotation, and the pointer
//! sits at the top (`-PI/2`). `winner_index` must always name the segment
//! under the pointer, so both sides of that coupling live here.

use std::f64::consts::{FRAC_PI_2, TAU};

/// Angle of the fixed pointer, in canvas coordinates
pub const POINTER_ANGLE: f64 = -FRAC_PI_2;

/// Rotation added per frame while idling
pub const IDLE_STEP: f64 = 0.002;

/// Cubic ease-out: fast start, smooth stop
pub fn ease_out_cubic(progress: f64) -> f64 {
    1.0 - (1.0 - progress).powi(3)
}

/// Reduce a rotation to [0, 2PI)
pub fn normalize_angle(rotation: f64) -> f64 {
    rotation.rem_euclid(TAU)
}

/// Angular width of one segment
pub fn segment_angle(count: usize) -> f64 {
    TAU / count as f64
}

/// Start and end angle of a segment as drawn for the given rotation
pub fn segment_bounds(index: usize, count: usize, rotation: f64) -> (f64, f64) {
    let segment = segment_angle(count);
    let start = index as f64 * segment + POINTER_ANGLE + rotation;
    (start, start + segment)
}

/// Index of the segment under the pointer, `None` for an empty wheel
pub fn winner_index(rotation: f64, count: usize) -> Option<usize> {
    if count == 0 {
        return None;
    }
    let n = count as i64;
    let raw = (-rotation / segment_angle(count)).floor() as i64;
    Some(raw.rem_euclid(n) as usize)
}

/// Name under the pointer
pub fn winner<'a>(names: &'a [String], rotation: f64) -> Option<&'a str> {
    winner_index(rotation, names.len()).map(|index| names[index].as_str())
}

/// Advance an idle rotation by one frame, wrapping at a full turn
pub fn idle_step(rotation: f64) -> f64 {
    let next = rotation + IDLE_STEP;
    if next >= TAU {
        next - TAU
    } else {
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::f64::consts::PI;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_ease_endpoints() {
        assert_eq!(ease_out_cubic(0.0), 0.0);
        assert_eq!(ease_out_cubic(1.0), 1.0);
        assert!(ease_out_cubic(0.5) > 0.5);
    }

    #[test]
    fn test_quarter_turn_back_selects_second() {
        let wheel = names(&["A", "B", "C", "D"]);
        assert_eq!(winner_index(-FRAC_PI_2, 4), Some(1));
        assert_eq!(winner(&wheel, -FRAC_PI_2), Some("B"));
    }

    #[test]
    fn test_zero_rotation_selects_first() {
        let wheel = names(&["A", "B", "C"]);
        assert_eq!(winner(&wheel, 0.0), Some("A"));
    }

    #[test]
    fn test_positive_rotation_wraps_backwards() {
        // Turning the wheel forward brings the previous segment under the pointer
        assert_eq!(winner_index(0.1, 4), Some(3));
        assert_eq!(winner_index(PI, 4), Some(2));
    }

    #[test]
    fn test_empty_wheel_has_no_winner() {
        assert_eq!(winner_index(1.0, 0), None);
        assert_eq!(winner(&[], 1.0), None);
    }

    #[test]
    fn test_idle_step_wraps() {
        assert_eq!(idle_step(1.0), 1.0 + IDLE_STEP);
        let wrapped = idle_step(TAU - 0.001);
        assert!(wrapped >= 0.0 && wrapped < IDLE_STEP);
    }

    #[test]
    fn test_normalize_angle() {
        assert!((normalize_angle(-FRAC_PI_2) - 3.0 * FRAC_PI_2).abs() < 1e-12);
        assert!((normalize_angle(5.0 * PI) - PI).abs() < 1e-12);
    }

    /// The pointer must land inside the drawn bounds of the computed winner
    fn pointer_inside(index: usize, count: usize, rotation: f64) -> bool {
        let (start, end) = segment_bounds(index, count, rotation);
        let offset = normalize_angle(POINTER_ANGLE - start);
        // Rounding can put an exact boundary hit just below zero
        offset < end - start + 1e-9 || offset > TAU - 1e-9
    }

    proptest! {
        #[test]
        fn winner_index_in_range(count in 1usize..500, rotation in -1.0e6f64..1.0e6) {
            let index = winner_index(rotation, count).unwrap();
            prop_assert!(index < count);
        }

        #[test]
        fn winner_matches_drawn_segment(count in 1usize..60, rotation in -200.0f64..200.0) {
            let index = winner_index(rotation, count).unwrap();
            prop_assert!(pointer_inside(index, count, rotation));
        }
    }
}
