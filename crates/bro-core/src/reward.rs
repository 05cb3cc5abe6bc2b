//! BRO token reward schedule.
//!
//! Reward = DENOMINATION * clz² / 2^h, where `clz` is the number of leading
//! zero bits of the winning hash and `h` the number of 14-day halving periods
//! elapsed since the schedule started. All arithmetic is exact integer math.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::hash::leading_zero_bits;

/// 1 BRO in its smallest unit.
pub const DENOMINATION: u64 = 100_000_000;

/// Length of a halving period in days.
pub const HALVING_PERIOD_DAYS: u64 = 14;

/// Length of a halving period in seconds.
pub const SECONDS_PER_PERIOD: u64 = HALVING_PERIOD_DAYS * 24 * 3600;

/// Schedule start: Tue Sep 2 04:20:00 UTC 2025.
pub const START_TIME: u64 = 1_756_786_800;

/// Largest denomination whose 256-zero reward still fits in a `u64`.
pub const MAX_DENOMINATION: u64 = u64::MAX / (256 * 256);

/// Decimal places of the token.
pub const TOKEN_DECIMALS: u32 = 8;

/// Constants of a reward schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardSchedule {
    /// Reward for a single leading zero bit before any halving.
    pub denomination: u64,
    /// Unix time (seconds) at which halving periods start counting.
    pub start_time: u64,
    /// Length of one halving period in seconds.
    pub seconds_per_period: u64,
}

impl Default for RewardSchedule {
    fn default() -> Self {
        RewardSchedule {
            denomination: DENOMINATION,
            start_time: START_TIME,
            seconds_per_period: SECONDS_PER_PERIOD,
        }
    }
}

impl RewardSchedule {
    /// Number of completed halving periods at `block_time`.
    ///
    /// Times before the start count as zero halvings.
    pub fn halvings_at(&self, block_time: u64) -> u64 {
        if self.seconds_per_period == 0 {
            return 0;
        }
        block_time.saturating_sub(self.start_time) / self.seconds_per_period
    }

    /// Reject schedules whose rewards cannot be represented exactly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seconds_per_period == 0 {
            return Err(ConfigError::Zero("reward.seconds_per_period"));
        }
        if self.denomination > MAX_DENOMINATION {
            return Err(ConfigError::TooLarge("reward.denomination", MAX_DENOMINATION));
        }
        Ok(())
    }

    /// Reward for a hash with `clz` leading zero bits at `block_time`.
    ///
    /// Exact for every schedule that passes [`RewardSchedule::validate`].
    pub fn amount_for_zeros(&self, clz: u32, block_time: u64) -> u64 {
        let clz = u128::from(clz);
        let base = u128::from(self.denomination) * clz * clz;
        let halvings = self.halvings_at(block_time);
        // Anything shifted by 128 or more bits is zero
        let amount = if halvings >= 128 { 0 } else { base >> halvings };
        u64::try_from(amount).unwrap_or(u64::MAX)
    }

    /// Reward for a mining result.
    ///
    /// `nonce` takes no part in the amount; it is accepted so every caller
    /// passes the full (nonce, hash, time) triple of a result.
    pub fn reward(&self, _nonce: u64, hash: &str, block_time: u64) -> u64 {
        self.amount_for_zeros(leading_zero_bits(hash), block_time)
    }

    /// Reward with its derivation, for display.
    pub fn reward_info(&self, nonce: u64, hash: &str, block_time: u64) -> RewardInfo {
        let leading_zeros = leading_zero_bits(hash);
        let halvings = self.halvings_at(block_time);
        let raw_amount = self.amount_for_zeros(leading_zeros, block_time);
        RewardInfo {
            leading_zeros,
            raw_amount,
            formatted_amount: format_token_amount(raw_amount, TOKEN_DECIMALS),
            nonce,
            hash: hash.to_string(),
            block_time,
            halvings,
            formula: format!(
                "{} * {}² / 2^{}",
                self.denomination, leading_zeros, halvings
            ),
        }
    }
}

/// Reward computed with the default schedule.
pub fn reward(nonce: u64, hash: &str, block_time: u64) -> u64 {
    RewardSchedule::default().reward(nonce, hash, block_time)
}

/// Halvings elapsed at `block_time` under the default schedule.
pub fn halvings_at(block_time: u64) -> u64 {
    RewardSchedule::default().halvings_at(block_time)
}

/// A reward together with the values it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardInfo {
    pub leading_zeros: u32,
    pub raw_amount: u64,
    pub formatted_amount: String,
    pub nonce: u64,
    pub hash: String,
    pub block_time: u64,
    pub halvings: u64,
    pub formula: String,
}

/// Format a raw token amount with `decimals` places, trimming trailing zeros.
///
/// `format_token_amount(150_000_000, 8)` is `"1.5"`.
pub fn format_token_amount(amount: u64, decimals: u32) -> String {
    if amount == 0 {
        return "0".to_string();
    }
    let divisor = 10u64.checked_pow(decimals).unwrap_or(u64::MAX);
    let whole = amount / divisor;
    let fraction = amount % divisor;
    if fraction == 0 {
        return whole.to_string();
    }
    let fraction = format!("{:0width$}", fraction, width = decimals as usize);
    format!("{}.{}", whole, fraction.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_with_zeros(bits: u32) -> String {
        // A 64-digit hash whose first set bit is at position `bits`
        let mut value = [0u8; 32];
        if bits < 256 {
            value[(bits / 8) as usize] = 0x80 >> (bits % 8);
        }
        hex::encode(value)
    }

    #[test]
    fn test_contract_vector() {
        // 64 leading zeros right after the start: 1e8 * 4096
        assert_eq!(reward(0, &hash_with_zeros(64), START_TIME + 1), 409_600_000_000);
        // Times before the start behave like the start
        assert_eq!(reward(0, &hash_with_zeros(64), START_TIME - 1), 409_600_000_000);
        assert_eq!(reward(0, &hash_with_zeros(64), 0), 409_600_000_000);
    }

    #[test]
    fn test_halving_boundaries() {
        let hash = hash_with_zeros(20);
        let base = DENOMINATION * 400;
        assert_eq!(reward(1, &hash, START_TIME + SECONDS_PER_PERIOD - 1), base);
        assert_eq!(reward(1, &hash, START_TIME + SECONDS_PER_PERIOD), base / 2);
        assert_eq!(reward(1, &hash, START_TIME + 3 * SECONDS_PER_PERIOD), base / 8);
        assert_eq!(halvings_at(START_TIME + 10 * SECONDS_PER_PERIOD + 5), 10);
    }

    #[test]
    fn test_extreme_halvings_reach_zero() {
        let hash = hash_with_zeros(256);
        assert_eq!(reward(0, &hash, START_TIME + 200 * SECONDS_PER_PERIOD), 0);
        assert_eq!(reward(0, &hash, u64::MAX), 0);
    }

    #[test]
    fn test_largest_denomination_stays_exact() {
        let schedule = RewardSchedule {
            denomination: MAX_DENOMINATION,
            ..RewardSchedule::default()
        };
        assert!(schedule.validate().is_ok());
        assert_eq!(schedule.amount_for_zeros(256, START_TIME), MAX_DENOMINATION * 65_536);

        let too_large = RewardSchedule {
            denomination: u64::MAX / 1000,
            ..RewardSchedule::default()
        };
        assert_eq!(
            too_large.validate(),
            Err(ConfigError::TooLarge("reward.denomination", MAX_DENOMINATION))
        );
    }

    #[test]
    fn test_full_zero_hash_is_exact() {
        // 1e8 * 65536 needs more than 32 bits and must stay exact
        assert_eq!(reward(0, &"0".repeat(64), START_TIME), 6_553_600_000_000);
    }

    #[test]
    fn test_reward_is_pure_and_ignores_nonce() {
        let hash = hash_with_zeros(33);
        let t = START_TIME + 12_345_678;
        let first = reward(7, &hash, t);
        assert_eq!(first, reward(7, &hash, t));
        assert_eq!(first, reward(u64::MAX, &hash, t));
    }

    #[test]
    fn test_reward_non_increasing_in_time() {
        let hash = hash_with_zeros(40);
        let mut previous = u64::MAX;
        for step in 0..60u64 {
            let t = START_TIME + step * SECONDS_PER_PERIOD / 3;
            let amount = reward(0, &hash, t);
            assert!(amount <= previous, "reward grew at t={}", t);
            previous = amount;
        }
    }

    #[test]
    fn test_reward_strictly_increasing_in_zeros() {
        let t = START_TIME + 2 * SECONDS_PER_PERIOD;
        let mut previous = reward(0, &hash_with_zeros(0), t);
        assert_eq!(previous, 0);
        for bits in 1..=256 {
            let amount = reward(0, &hash_with_zeros(bits), t);
            assert!(amount > previous, "no increase at {} bits", bits);
            previous = amount;
        }
    }

    #[test]
    fn test_malformed_hash_rewards_nothing() {
        assert_eq!(reward(0, "", START_TIME), 0);
        assert_eq!(reward(0, "not-a-hash", START_TIME), 0);
    }

    #[test]
    fn test_custom_schedule() {
        let schedule = RewardSchedule {
            denomination: 10,
            start_time: 1_000,
            seconds_per_period: 100,
        };
        assert_eq!(schedule.amount_for_zeros(3, 1_000), 90);
        assert_eq!(schedule.amount_for_zeros(3, 1_250), 22);
    }

    #[test]
    fn test_format_token_amount() {
        assert_eq!(format_token_amount(0, 8), "0");
        assert_eq!(format_token_amount(100_000_000, 8), "1");
        assert_eq!(format_token_amount(150_000_000, 8), "1.5");
        assert_eq!(format_token_amount(1, 8), "0.00000001");
        assert_eq!(format_token_amount(409_600_000_000, 8), "4096");
    }

    #[test]
    fn test_reward_info() {
        let hash = hash_with_zeros(12);
        let info = RewardSchedule::default().reward_info(5, &hash, START_TIME + SECONDS_PER_PERIOD);
        assert_eq!(info.leading_zeros, 12);
        assert_eq!(info.halvings, 1);
        assert_eq!(info.raw_amount, DENOMINATION * 144 / 2);
        assert_eq!(info.formatted_amount, "72");
        assert_eq!(info.formula, "100000000 * 12² / 2^1");
    }
}
