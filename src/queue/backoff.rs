use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::system::{DELIVERY_BACKOFF_LADDER_MS, DELIVERY_MAX_BACKOFF_MS};

/// Rule mapping a failed attempt to the delay before the next one
///
/// `attempt_index` is zero-based: the first failed attempt is index 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// `delay_ms × 2^attempt_index`
    Exponential { delay_ms: u64 },
    /// Same delay every time
    Fixed { delay_ms: u64 },
    /// Explicit steps, then `min(max_ms, base_ms × 2^attempt_index)`
    Ladder {
        steps_ms: Vec<u64>,
        base_ms: u64,
        max_ms: u64,
    },
}

impl BackoffPolicy {
    pub fn exponential(delay_ms: u64) -> Self {
        Self::Exponential { delay_ms }
    }

    pub fn fixed(delay_ms: u64) -> Self {
        Self::Fixed { delay_ms }
    }

    /// Outbound delivery ladder: 1s, 5s, 15s, then `min(30s, 1s × 2^n)`
    pub fn delivery_ladder() -> Self {
        Self::Ladder {
            steps_ms: DELIVERY_BACKOFF_LADDER_MS.to_vec(),
            base_ms: 1_000,
            max_ms: DELIVERY_MAX_BACKOFF_MS,
        }
    }

    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let millis = match self {
            Self::Exponential { delay_ms } => exponential_ms(*delay_ms, attempt_index),
            Self::Fixed { delay_ms } => *delay_ms,
            Self::Ladder {
                steps_ms,
                base_ms,
                max_ms,
            } => match steps_ms.get(attempt_index as usize) {
                Some(step) => *step,
                None => exponential_ms(*base_ms, attempt_index).min(*max_ms),
            },
        };
        Duration::from_millis(millis)
    }
}

fn exponential_ms(base_ms: u64, attempt_index: u32) -> u64 {
    let factor = 1u64.checked_shl(attempt_index).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_doubles() {
        let policy = BackoffPolicy::exponential(1_000);
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_exponential_saturates() {
        let policy = BackoffPolicy::exponential(1_000);
        assert_eq!(policy.delay_for(200), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_delivery_ladder() {
        let policy = BackoffPolicy::delivery_ladder();
        let delays: Vec<u64> = (0..7)
            .map(|i| policy.delay_for(i).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1_000, 5_000, 15_000, 8_000, 16_000, 30_000, 30_000]);
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(BackoffPolicy::exponential(2_000)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "exponential", "delay_ms": 2000}));
        let back: BackoffPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back, BackoffPolicy::exponential(2_000));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn exponential_never_shrinks(base in 1u64..100_000, index in 0u32..80) {
                let policy = BackoffPolicy::exponential(base);
                prop_assert!(policy.delay_for(index + 1) >= policy.delay_for(index));
            }

            #[test]
            fn ladder_is_capped_past_its_steps(index in 3u32..1_000) {
                let policy = BackoffPolicy::delivery_ladder();
                prop_assert!(policy.delay_for(index) <= Duration::from_millis(DELIVERY_MAX_BACKOFF_MS));
            }
        }
    }
}
