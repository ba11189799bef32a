//! Composite pressure scorer.
//!
//! Fuses three signal domains into a single EMA-smoothed score in
//! [-100, +100], computed on every trade:
//!
//! - aggressive pressure: CVD velocity and the current 1 s candle delta,
//!   each normalized by a rolling magnitude estimate;
//! - passive pressure: the orderbook pressure score, already in
//!   [-100, +100];
//! - positioning pressure: long-horizon OI delta plus the behavior signal.
//!
//! Normalization reads the magnitude estimates as they stood before the
//! tick; the estimates are advanced afterwards. The estimates are seeded
//! to 1.0 and floored at `SIGMA_EPSILON`, so a cold start divides by 1.0
//! rather than by zero and the output can never be NaN.

/// Domain weights — sum to 1.0.
const WEIGHT_AGGRESSIVE: f64 = 0.45;
const WEIGHT_PASSIVE: f64 = 0.30;
const WEIGHT_POSITIONING: f64 = 0.25;

/// Aggressive sub-weights.
const ALPHA_CVD: f64 = 0.60;
const ALPHA_DELTA: f64 = 0.40;

/// Positioning sub-weights.
const BETA_OI_DELTA: f64 = 0.50;
const BETA_BEHAVIOR: f64 = 0.50;

/// EMA smoothing: alpha = 2/(N+1) with N = 5 ticks.
const SMOOTHING_ALPHA: f64 = 0.333;

/// Slow adaptation for the rolling magnitude estimates.
const SIGMA_ALPHA: f64 = 0.05;

/// Floor applied to sigma before normalization.
const SIGMA_EPSILON: f64 = 1e-3;

/// Signal mapping for the OI behavior enum: neutral, long buildup,
/// short buildup, short covering, long liquidation.
const BEHAVIOR_SIGNAL: [f64; 5] = [0.0, 1.0, -1.0, 0.5, -0.5];

/// Raw signals consumed per tick, populated from existing engine state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreInput {
    /// Running cumulative volume delta.
    pub cvd: f64,
    /// Current 1 s candle delta, before this tick is folded in.
    pub delta_1s: f64,
    /// Orderbook pressure score, [-100, +100].
    pub ob_score: i32,
    /// OI change over the long horizon (~1 minute).
    pub oi_delta_long: f64,
    /// OI behavior enum, 0..=4.
    pub oi_behavior: u8,
}

/// Stateful composite scorer. All state is primitive fields; `update` is
/// pure arithmetic with no allocation.
#[derive(Debug, Clone)]
pub struct Scorer {
    smoothed: f64,
    has_init: bool,

    prev_cvd: f64,

    // Rolling magnitude estimates (EMA of |value|).
    sigma_cvd_vel: f64,
    sigma_delta: f64,
    sigma_oi: f64,
}

impl Default for Scorer {
    fn default() -> Self {
        Self::new()
    }
}

impl Scorer {
    pub fn new() -> Self {
        Self {
            smoothed: 0.0,
            has_init: false,
            prev_cvd: 0.0,
            // Seeded to 1.0 so the cold start divides by a sane magnitude.
            sigma_cvd_vel: 1.0,
            sigma_delta: 1.0,
            sigma_oi: 1.0,
        }
    }

    /// Compute the composite score for one tick.
    pub fn update(&mut self, input: ScoreInput) -> f64 {
        let cvd_vel = input.cvd - self.prev_cvd;
        self.prev_cvd = input.cvd;

        // Normalize against the estimates as they stood before this tick.
        let norm_cvd_vel = adaptive_norm(cvd_vel, self.sigma_cvd_vel);
        let norm_delta = adaptive_norm(input.delta_1s, self.sigma_delta);
        let norm_oi = adaptive_norm(input.oi_delta_long, self.sigma_oi);

        self.sigma_cvd_vel = ema(self.sigma_cvd_vel, cvd_vel.abs(), SIGMA_ALPHA);
        self.sigma_delta = ema(self.sigma_delta, input.delta_1s.abs(), SIGMA_ALPHA);
        self.sigma_oi = ema(self.sigma_oi, input.oi_delta_long.abs(), SIGMA_ALPHA);

        let aggressive = ALPHA_CVD * norm_cvd_vel + ALPHA_DELTA * norm_delta;

        let passive = f64::from(input.ob_score) / 100.0;

        let behavior_signal = BEHAVIOR_SIGNAL
            .get(input.oi_behavior as usize)
            .copied()
            .unwrap_or(0.0);
        let positioning = BETA_OI_DELTA * norm_oi + BETA_BEHAVIOR * behavior_signal;

        let raw = (WEIGHT_AGGRESSIVE * aggressive
            + WEIGHT_PASSIVE * passive
            + WEIGHT_POSITIONING * positioning)
            * 100.0;

        if self.has_init {
            self.smoothed = SMOOTHING_ALPHA * raw + (1.0 - SMOOTHING_ALPHA) * self.smoothed;
        } else {
            self.smoothed = raw;
            self.has_init = true;
        }

        self.smoothed.clamp(-100.0, 100.0)
    }
}

fn adaptive_norm(x: f64, sigma: f64) -> f64 {
    (x / sigma.max(SIGMA_EPSILON)).clamp(-1.0, 1.0)
}

fn ema(prev: f64, value: f64, alpha: f64) -> f64 {
    alpha * value + (1.0 - alpha) * prev
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_buy_tick_scores_exactly() {
        // cvd_vel = +0.5, sigma still at its 1.0 seed when read:
        // n = 0.5, aggressive = 0.6 * 0.5 = 0.3, raw = 0.45 * 0.3 * 100 = 13.5,
        // and the first smoothed value equals raw.
        let mut scorer = Scorer::new();
        let score = scorer.update(ScoreInput {
            cvd: 0.5,
            ..Default::default()
        });
        assert!((score - 13.5).abs() < 1e-12);
    }

    #[test]
    fn all_zero_inputs_stay_zero() {
        let mut scorer = Scorer::new();
        for _ in 0..100 {
            let score = scorer.update(ScoreInput::default());
            assert_eq!(score, 0.0);
            assert!(score.is_finite());
        }
    }

    #[test]
    fn second_tick_is_smoothed() {
        let mut scorer = Scorer::new();
        let first = scorer.update(ScoreInput {
            cvd: 0.5,
            ..Default::default()
        });
        // Same CVD again: velocity 0, raw 0, smoothed decays by 1 - alpha.
        let second = scorer.update(ScoreInput {
            cvd: 0.5,
            ..Default::default()
        });
        assert!((second - (1.0 - SMOOTHING_ALPHA) * first).abs() < 1e-12);
    }

    #[test]
    fn output_saturates_at_bounds() {
        let mut scorer = Scorer::new();
        let mut cvd = 0.0;
        let mut last = 0.0;
        for _ in 0..200 {
            cvd += 1_000.0;
            last = scorer.update(ScoreInput {
                cvd,
                delta_1s: 1_000.0,
                ob_score: 100,
                oi_delta_long: 1_000.0,
                oi_behavior: 1,
            });
            assert!(last <= 100.0);
        }
        assert_eq!(last, 100.0);

        let mut bear = Scorer::new();
        let mut cvd = 0.0;
        let mut last = 0.0;
        for _ in 0..200 {
            cvd -= 1_000.0;
            last = bear.update(ScoreInput {
                cvd,
                delta_1s: -1_000.0,
                ob_score: -100,
                oi_delta_long: -1_000.0,
                oi_behavior: 2,
            });
            assert!(last >= -100.0);
        }
        assert_eq!(last, -100.0);
    }

    #[test]
    fn behavior_signal_table() {
        // Isolate the positioning term: passive and aggressive inputs zero.
        let expectations = [
            (0u8, 0.0),
            (1, 12.5),  // 0.25 * 0.5 * (+1.0) * 100
            (2, -12.5),
            (3, 6.25),
            (4, -6.25),
            (9, 0.0), // out of range maps to neutral
        ];
        for (behavior, expected) in expectations {
            let mut scorer = Scorer::new();
            let score = scorer.update(ScoreInput {
                oi_behavior: behavior,
                ..Default::default()
            });
            assert!(
                (score - expected).abs() < 1e-12,
                "behavior {behavior}: got {score}, want {expected}"
            );
        }
    }

    #[test]
    fn sigma_adapts_to_magnitude() {
        // A constant large delta should normalize toward +/-1 and hold the
        // aggressive term steady rather than growing without bound.
        let mut scorer = Scorer::new();
        let mut cvd = 0.0;
        let mut prev = 0.0;
        for i in 0..500 {
            cvd += 50.0;
            let score = scorer.update(ScoreInput {
                cvd,
                ..Default::default()
            });
            if i > 100 {
                assert!((score - prev).abs() < 5.0, "score should have settled");
            }
            prev = score;
        }
        // 0.45 * 0.6 * 1.0 * 100 = 27, the fully-saturated aggressive CVD term.
        assert!((prev - 27.0).abs() < 1.0);
    }
}
