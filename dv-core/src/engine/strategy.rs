//! Load-to-offset strategies
//!
//! A strategy maps the current load of one core to the offset that core should
//! run at. Threshold strategies hold the least aggressive offset (`min_mv`) up to
//! the core's threshold and move toward `max_mv` as load approaches 100%.
//! The manual strategy follows explicit breakpoints.
//!
//! Every result is clamped to the core's span and then to the platform safety
//! envelope before it is returned.

use crate::data::{CoreConfig, DaemonConfig, SafetyEnvelope, StrategyKind, VoltagePoint};

/// Adaptation strategy, one case per variant
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Conservative,
    Balanced,
    Aggressive,
    /// Breakpoints used by cores that carry none of their own
    Manual { points: Vec<VoltagePoint> },
}

impl Strategy {
    pub fn from_config(config: &DaemonConfig) -> Self {
        match config.strategy {
            StrategyKind::Conservative => Strategy::Conservative,
            StrategyKind::Balanced => Strategy::Balanced,
            StrategyKind::Aggressive => Strategy::Aggressive,
            StrategyKind::Manual => Strategy::Manual {
                points: config.manual_points.clone(),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Conservative => StrategyKind::Conservative.as_str(),
            Strategy::Balanced => StrategyKind::Balanced.as_str(),
            Strategy::Aggressive => StrategyKind::Aggressive.as_str(),
            Strategy::Manual { .. } => StrategyKind::Manual.as_str(),
        }
    }

    /// Target offset (mV) for `core` at `load` percent
    pub fn target_mv(&self, load: f32, core: &CoreConfig, envelope: &SafetyEnvelope) -> i32 {
        let load = sanitize_load(load);
        let raw = match self {
            Strategy::Manual { points } => {
                let points = core.manual_points.as_deref().unwrap_or(points);
                interpolate_points(points, load).unwrap_or(core.min_mv)
            }
            _ => threshold_target(load, core),
        };
        envelope.clamp(core.clamp_to_span(raw))
    }
}

/// NaN reads as idle; everything else is clamped to 0-100
fn sanitize_load(load: f32) -> f64 {
    if load.is_nan() {
        return 0.0;
    }
    (load as f64).clamp(0.0, 100.0)
}

/// `min_mv` up to the threshold, then linear toward `max_mv` at 100% load
fn threshold_target(load: f64, core: &CoreConfig) -> i32 {
    let threshold = (core.threshold as f64).clamp(0.0, 100.0);
    if load <= threshold || threshold >= 100.0 {
        return core.min_mv;
    }

    let min = core.min_mv as f64;
    let max = core.max_mv as f64;
    let fraction = ((load - threshold) / (100.0 - threshold)).clamp(0.0, 1.0);

    (min + (max - min) * fraction).round() as i32
}

/// Piecewise-linear lookup with flat extrapolation past either end
fn interpolate_points(points: &[VoltagePoint], load: f64) -> Option<i32> {
    let first = points.first()?;
    let last = points.last()?;

    if load <= first.load as f64 {
        return Some(first.offset_mv);
    }
    if load >= last.load as f64 {
        return Some(last.offset_mv);
    }

    for window in points.windows(2) {
        let lower = &window[0];
        let upper = &window[1];
        let (lo_load, hi_load) = (lower.load as f64, upper.load as f64);

        if load >= lo_load && load <= hi_load {
            let span = hi_load - lo_load;
            if span <= f64::EPSILON {
                return Some(lower.offset_mv);
            }
            let ratio = (load - lo_load) / span;
            let delta = (upper.offset_mv - lower.offset_mv) as f64;
            return Some((lower.offset_mv as f64 + ratio * delta).round() as i32);
        }
    }

    Some(last.offset_mv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, prop_oneof, proptest, Just};
    use proptest::strategy::Strategy as PropStrategy;

    fn wide() -> SafetyEnvelope {
        SafetyEnvelope::with_floor(-100)
    }

    #[test]
    fn test_balanced_midpoint_example() {
        let core = CoreConfig::new(0, -40, -20, 50.0);
        assert_eq!(Strategy::Balanced.target_mv(75.0, &core, &wide()), -30);
    }

    #[test]
    fn test_below_threshold_is_min() {
        let core = CoreConfig::new(0, -10, -30, 40.0);
        for strategy in [Strategy::Conservative, Strategy::Balanced, Strategy::Aggressive] {
            assert_eq!(strategy.target_mv(0.0, &core, &wide()), -10);
            assert_eq!(strategy.target_mv(40.0, &core, &wide()), -10);
        }
    }

    #[test]
    fn test_threshold_100_always_min() {
        let core = CoreConfig::new(0, -15, -35, 100.0);
        for load in 0..=100 {
            assert_eq!(Strategy::Balanced.target_mv(load as f32, &core, &wide()), -15);
            assert_eq!(Strategy::Aggressive.target_mv(load as f32, &core, &wide()), -15);
        }
    }

    #[test]
    fn test_equal_bounds_constant() {
        let core = CoreConfig::new(0, -25, -25, 30.0);
        for load in 0..=100 {
            assert_eq!(Strategy::Conservative.target_mv(load as f32, &core, &wide()), -25);
            assert_eq!(Strategy::Balanced.target_mv(load as f32, &core, &wide()), -25);
        }
    }

    #[test]
    fn test_threshold_variants_share_linear_law() {
        let core = CoreConfig::new(0, -40, -20, 50.0);
        for strategy in [Strategy::Conservative, Strategy::Balanced, Strategy::Aggressive] {
            assert_eq!(strategy.target_mv(75.0, &core, &wide()), -30, "{}", strategy.name());
        }
    }

    #[test]
    fn test_full_load_reaches_max() {
        let core = CoreConfig::new(0, 0, -30, 50.0);
        for strategy in [Strategy::Conservative, Strategy::Balanced, Strategy::Aggressive] {
            assert_eq!(strategy.target_mv(100.0, &core, &wide()), -30);
            assert_eq!(strategy.target_mv(60.0, &core, &wide()), -6);
        }
    }

    #[test]
    fn test_envelope_clamps_output() {
        let core = CoreConfig::new(0, -10, -40, 0.0);
        let tight = SafetyEnvelope::with_floor(-25);
        assert_eq!(Strategy::Balanced.target_mv(100.0, &core, &tight), -25);
    }

    #[test]
    fn test_manual_interpolation() {
        let strategy = Strategy::Manual {
            points: vec![
                VoltagePoint::new(0.0, -35),
                VoltagePoint::new(30.0, -30),
                VoltagePoint::new(70.0, -25),
                VoltagePoint::new(100.0, -20),
            ],
        };
        let core = CoreConfig::new(0, -20, -35, 50.0);
        assert_eq!(strategy.target_mv(50.0, &core, &wide()), -28);
        assert_eq!(strategy.target_mv(0.0, &core, &wide()), -35);
        assert_eq!(strategy.target_mv(100.0, &core, &wide()), -20);
    }

    #[test]
    fn test_manual_flat_extrapolation_and_core_override() {
        let strategy = Strategy::Manual {
            points: vec![VoltagePoint::new(20.0, -30), VoltagePoint::new(80.0, -10)],
        };
        let core = CoreConfig::new(0, 0, -40, 50.0);
        assert_eq!(strategy.target_mv(5.0, &core, &wide()), -30);
        assert_eq!(strategy.target_mv(95.0, &core, &wide()), -10);

        let mut own = core.clone();
        own.manual_points = Some(vec![VoltagePoint::new(0.0, -5), VoltagePoint::new(100.0, -5)]);
        assert_eq!(strategy.target_mv(50.0, &own, &wide()), -5);
    }

    #[test]
    fn test_manual_clamped_to_core_span() {
        let strategy = Strategy::Manual {
            points: vec![VoltagePoint::new(0.0, -60), VoltagePoint::new(100.0, 0)],
        };
        let core = CoreConfig::new(0, -10, -30, 50.0);
        assert_eq!(strategy.target_mv(0.0, &core, &wide()), -30);
        assert_eq!(strategy.target_mv(100.0, &core, &wide()), -10);
    }

    #[test]
    fn test_nan_load_is_idle() {
        let core = CoreConfig::new(0, -5, -30, 10.0);
        assert_eq!(Strategy::Aggressive.target_mv(f32::NAN, &core, &wide()), -5);
    }

    fn any_strategy() -> impl PropStrategy<Value = Strategy> {
        prop_oneof![
            Just(Strategy::Conservative),
            Just(Strategy::Balanced),
            Just(Strategy::Aggressive),
        ]
    }

    proptest! {
        #[test]
        fn prop_output_within_bounds(
            strategy in any_strategy(),
            min_mv in -60i32..=0,
            max_mv in -60i32..=0,
            threshold in 0.0f32..=100.0,
            load in 0.0f32..=100.0,
        ) {
            let core = CoreConfig::new(0, min_mv, max_mv, threshold);
            let target = strategy.target_mv(load, &core, &wide());
            let (lo, hi) = core.span();
            prop_assert!(target >= lo && target <= hi);
        }

        #[test]
        fn prop_matches_linear_formula(
            strategy in any_strategy(),
            min_mv in -60i32..=0,
            max_mv in -60i32..=0,
            threshold in 0.0f32..100.0,
            load in 0.0f32..=100.0,
        ) {
            let core = CoreConfig::new(0, min_mv, max_mv, threshold);
            let expected = if load <= threshold {
                min_mv
            } else {
                let t = threshold as f64;
                let fraction = (load as f64 - t) / (100.0 - t);
                (min_mv as f64 + (max_mv - min_mv) as f64 * fraction).round() as i32
            };
            prop_assert!((strategy.target_mv(load, &core, &wide()) - expected).abs() <= 1);
        }

        #[test]
        fn prop_monotonic_above_threshold(
            strategy in any_strategy(),
            min_mv in -60i32..=0,
            max_mv in -60i32..=0,
            threshold in 0.0f32..100.0,
            a in 0.0f32..=100.0,
            b in 0.0f32..=100.0,
        ) {
            let core = CoreConfig::new(0, min_mv, max_mv, threshold);
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            let t_low = strategy.target_mv(low, &core, &wide());
            let t_high = strategy.target_mv(high, &core, &wide());
            // aggressiveness = distance travelled from min_mv toward max_mv
            let direction = (max_mv - min_mv).signum();
            prop_assert!((t_high - min_mv) * direction >= (t_low - min_mv) * direction);
        }

        #[test]
        fn prop_manual_within_envelope(
            p0 in -100i32..=0,
            p1 in -100i32..=0,
            load in 0.0f32..=100.0,
            floor in -100i32..=0,
        ) {
            let strategy = Strategy::Manual {
                points: vec![VoltagePoint::new(0.0, p0), VoltagePoint::new(100.0, p1)],
            };
            let core = CoreConfig::new(0, 0, -100, 50.0);
            let env = SafetyEnvelope::with_floor(floor);
            let target = strategy.target_mv(load, &core, &env);
            prop_assert!(env.contains(target));
        }
    }
}
