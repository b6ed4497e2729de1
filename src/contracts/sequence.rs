use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::Serialize;

use crate::contracts::error::AllocationError;

/// Key of the counter shared by every day.
pub const GLOBAL_SCOPE_KEY: &str = "contract_counter_global";
/// Prefix of per-day counter keys, followed by `YYYYMMDD`.
pub const DAILY_SCOPE_PREFIX: &str = "contract_counter_";
/// Largest wrap bound that still renders as three digits.
pub const MAX_WRAP_BOUND: u32 = 999;

/// Which counter an allocation draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopePolicy {
    /// One counter for all time.
    Global,
    /// One counter per calendar day.
    PerDay,
}

impl ScopePolicy {
    /// Resolves the counter key for the given day.
    pub fn scope_key(self, date: NaiveDate) -> String {
        match self {
            ScopePolicy::Global => GLOBAL_SCOPE_KEY.to_string(),
            ScopePolicy::PerDay => format!("{}{}", DAILY_SCOPE_PREFIX, date.format("%Y%m%d")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScopePolicy::Global => "global",
            ScopePolicy::PerDay => "per_day",
        }
    }
}

impl FromStr for ScopePolicy {
    type Err = AllocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(ScopePolicy::Global),
            "per_day" | "per-day" | "daily" => Ok(ScopePolicy::PerDay),
            _ => Err(AllocationError::InvalidScopePolicy(s.to_string())),
        }
    }
}

impl fmt::Display for ScopePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maximum sequence value before numbering cycles back to 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WrapBound(u32);

impl WrapBound {
    pub fn new(bound: u32) -> Result<Self, AllocationError> {
        if bound == 0 || bound > MAX_WRAP_BOUND {
            return Err(AllocationError::InvalidWrapBound(bound.to_string()));
        }
        Ok(Self(bound))
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    /// Maps a raw counter value (starting at 1) onto `1..=bound`.
    pub fn sequence_for(self, value: u64) -> u32 {
        let bound = u64::from(self.0);
        // value is in 1..=bound after the modulo, which fits in u32
        (value.saturating_sub(1) % bound + 1) as u32
    }
}

impl Default for WrapBound {
    fn default() -> Self {
        Self(MAX_WRAP_BOUND)
    }
}

impl FromStr for WrapBound {
    type Err = AllocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bound = s
            .trim()
            .parse::<u32>()
            .map_err(|_| AllocationError::InvalidWrapBound(s.to_string()))?;
        Self::new(bound)
    }
}

/// A contract identifier of the form `YYYYMMDD-NNN`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractNumber {
    /// Allocation date formatted `YYYYMMDD`.
    pub date_part: String,
    /// Position in the `1..=N` cycle.
    pub sequence: u32,
    /// `"{date_part}-{sequence:03}"`.
    pub display: String,
    /// Counter the number was drawn from.
    pub scope_key: String,
    /// Raw counter value after the increment.
    pub counter_value: u64,
}

impl ContractNumber {
    pub fn new(date: NaiveDate, sequence: u32, scope_key: String, counter_value: u64) -> Self {
        let date_part = date.format("%Y%m%d").to_string();
        let display = format!("{}-{:03}", date_part, sequence);
        Self {
            date_part,
            sequence,
            display,
            scope_key,
            counter_value,
        }
    }

    /// True when this number restarted the cycle at 001.
    pub fn is_wrap(&self) -> bool {
        self.sequence == 1 && self.counter_value > 1
    }
}

impl fmt::Display for ContractNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn per_day_scope_key_contains_date() {
        assert_eq!(
            ScopePolicy::PerDay.scope_key(date(2025, 9, 23)),
            "contract_counter_20250923"
        );
    }

    #[test]
    fn global_scope_key_ignores_date() {
        assert_eq!(
            ScopePolicy::Global.scope_key(date(2025, 9, 23)),
            ScopePolicy::Global.scope_key(date(2030, 1, 1))
        );
    }

    #[test]
    fn parses_scope_policies() {
        assert_eq!("global".parse::<ScopePolicy>().unwrap(), ScopePolicy::Global);
        assert_eq!("PER_DAY".parse::<ScopePolicy>().unwrap(), ScopePolicy::PerDay);
        assert_eq!("daily".parse::<ScopePolicy>().unwrap(), ScopePolicy::PerDay);
        assert!(matches!(
            "weekly".parse::<ScopePolicy>(),
            Err(AllocationError::InvalidScopePolicy(_))
        ));
    }

    #[test]
    fn wrap_bound_rejects_out_of_range() {
        assert!(WrapBound::new(0).is_err());
        assert!(WrapBound::new(1000).is_err());
        assert!("abc".parse::<WrapBound>().is_err());
        assert_eq!("999".parse::<WrapBound>().unwrap().get(), 999);
    }

    #[test]
    fn sequence_cycles_through_bound() {
        let bound = WrapBound::new(999).unwrap();
        assert_eq!(bound.sequence_for(1), 1);
        assert_eq!(bound.sequence_for(999), 999);
        assert_eq!(bound.sequence_for(1000), 1);
        assert_eq!(bound.sequence_for(1998), 999);
        assert_eq!(bound.sequence_for(1999), 1);
    }

    #[test]
    fn display_is_zero_padded() {
        let number = ContractNumber::new(date(2025, 9, 23), 7, GLOBAL_SCOPE_KEY.into(), 7);
        assert_eq!(number.display, "20250923-007");
        assert_eq!(number.to_string(), "20250923-007");
        assert!(!number.is_wrap());
    }

    #[test]
    fn first_number_is_not_a_wrap() {
        let first = ContractNumber::new(date(2025, 9, 23), 1, GLOBAL_SCOPE_KEY.into(), 1);
        let cycled = ContractNumber::new(date(2025, 9, 23), 1, GLOBAL_SCOPE_KEY.into(), 1000);
        assert!(!first.is_wrap());
        assert!(cycled.is_wrap());
    }
}
