use crate::{
    settings::{RetryPolicyKind, RetrySettings},
    Error, FailureClass, Result,
};
use serde::Serialize;
use std::{str::FromStr, time::Duration};

/// Delay before the next setup attempt. The bus adds a random offset below
/// `randomization` when it arms the alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryDelay {
    #[serde(rename = "base_ms", serialize_with = "serialize_millis")]
    pub base: Duration,
    #[serde(rename = "randomization_ms", serialize_with = "serialize_millis")]
    pub randomization: Duration,
}

impl RetryDelay {
    pub fn fixed(base: Duration) -> Self {
        Self {
            base,
            randomization: Duration::ZERO,
        }
    }
}

fn serialize_millis<S>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_u64(d.as_millis() as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RetryDecision {
    Retry(RetryDelay),
    /// The retry counter reached the configured maximum
    Exhausted,
    /// The failure is not retryable
    Suppressed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryPolicy {
    Exponential {
        max_retries: u32,
        min_wait: Duration,
        max_wait: Duration,
    },
    Table(RetryTable),
}

impl RetryPolicy {
    /// Decide what follows a failure given the number of retries already
    /// made for the context.
    pub fn next(&self, retry_count: u32, class: FailureClass) -> RetryDecision {
        if class == FailureClass::Permanent {
            return RetryDecision::Suppressed;
        }
        if !self.can_retry(retry_count) {
            return RetryDecision::Exhausted;
        }
        RetryDecision::Retry(self.delay(retry_count))
    }

    pub fn can_retry(&self, retry_count: u32) -> bool {
        match self {
            Self::Exponential { max_retries, .. } => retry_count < *max_retries,
            Self::Table(table) => table
                .max_retries
                .map_or(true, |max_retries| retry_count < max_retries),
        }
    }

    fn delay(&self, retry_count: u32) -> RetryDelay {
        match self {
            Self::Exponential {
                min_wait, max_wait, ..
            } => {
                let factor = 2u32.saturating_pow(retry_count.min(31));
                RetryDelay::fixed(min_wait.saturating_mul(factor).min(*max_wait))
            }
            Self::Table(table) => table.delay(retry_count),
        }
    }
}

impl TryFrom<&RetrySettings> for RetryPolicy {
    type Error = Error;

    fn try_from(settings: &RetrySettings) -> Result<Self> {
        match settings.policy {
            RetryPolicyKind::Exponential => {
                let min_wait = Duration::from_millis(settings.min_wait_ms);
                let max_wait = Duration::from_millis(settings.max_wait_ms);
                if min_wait > max_wait {
                    return Err(Error::retry_config(format!(
                        "min_wait_ms {} exceeds max_wait_ms {}",
                        settings.min_wait_ms, settings.max_wait_ms
                    )));
                }
                Ok(Self::Exponential {
                    max_retries: settings.max_retries,
                    min_wait,
                    max_wait,
                })
            }
            RetryPolicyKind::Table => settings.table.parse().map(Self::Table),
        }
    }
}

/// Table driven retry configuration in the usual carrier format:
///
/// `max_retries=5, default_randomization=2000, 5000, 10000:3000, 20000`
///
/// Delays and randomizations are in milliseconds. A missing `max_retries`
/// allows one retry per table entry, `max_retries=infinite` never gives up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryTable {
    pub max_retries: Option<u32>,
    pub delays: Vec<RetryDelay>,
}

impl RetryTable {
    fn delay(&self, retry_count: u32) -> RetryDelay {
        let index = (retry_count as usize).min(self.delays.len().saturating_sub(1));
        self.delays
            .get(index)
            .copied()
            .unwrap_or(RetryDelay::fixed(Duration::ZERO))
    }
}

fn parse_millis(value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| Error::retry_config(format!("invalid milliseconds \"{value}\"")))
}

impl FromStr for RetryTable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut max_retries = None;
        let mut explicit_max = false;
        let mut default_randomization = Duration::ZERO;
        let mut entries = vec![];

        for part in s.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            if let Some((key, value)) = part.split_once('=') {
                match key.trim() {
                    "max_retries" => {
                        explicit_max = true;
                        max_retries = match value.trim() {
                            "infinite" => None,
                            count => Some(count.parse::<u32>().map_err(|_| {
                                Error::retry_config(format!("invalid max_retries \"{count}\""))
                            })?),
                        }
                    }
                    "default_randomization" => default_randomization = parse_millis(value)?,
                    other => {
                        return Err(Error::retry_config(format!("unknown key \"{other}\"")))
                    }
                }
                continue;
            }
            let entry = match part.split_once(':') {
                Some((base, randomization)) => {
                    (parse_millis(base)?, Some(parse_millis(randomization)?))
                }
                None => (parse_millis(part)?, None),
            };
            entries.push(entry);
        }

        let delays: Vec<RetryDelay> = entries
            .into_iter()
            .map(|(base, randomization)| RetryDelay {
                base,
                randomization: randomization.unwrap_or(default_randomization),
            })
            .collect();
        if delays.is_empty() && (!explicit_max || max_retries != Some(0)) {
            return Err(Error::retry_config("no retry delays configured"));
        }
        if !explicit_max {
            max_retries = Some(delays.len() as u32);
        }
        Ok(Self {
            max_retries,
            delays,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn exponential() -> RetryPolicy {
        RetryPolicy::Exponential {
            max_retries: 4,
            min_wait: Duration::from_secs(5),
            max_wait: Duration::from_secs(60),
        }
    }

    fn delay_of(decision: RetryDecision) -> Duration {
        match decision {
            RetryDecision::Retry(delay) => delay.base,
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn exponential_bounds() {
        let policy = exponential();
        let delays: Vec<Duration> = (0..4)
            .map(|count| delay_of(policy.next(count, FailureClass::Transient)))
            .collect();
        assert_eq!(
            vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(20),
                Duration::from_secs(40)
            ],
            delays
        );
        assert_eq!(
            RetryDecision::Exhausted,
            policy.next(4, FailureClass::Transient)
        );
    }

    #[test]
    fn exponential_is_capped() {
        let policy = RetryPolicy::Exponential {
            max_retries: u32::MAX,
            min_wait: Duration::from_secs(5),
            max_wait: Duration::from_secs(60),
        };
        assert_eq!(
            Duration::from_secs(60),
            delay_of(policy.next(5, FailureClass::Transient))
        );
        assert_eq!(
            Duration::from_secs(60),
            delay_of(policy.next(1000, FailureClass::Transient))
        );
    }

    #[test]
    fn deterministic() {
        let policy = exponential();
        for count in 0..4 {
            assert_eq!(
                policy.next(count, FailureClass::Transient),
                policy.next(count, FailureClass::Transient)
            );
        }
    }

    #[test]
    fn permanent_is_suppressed() {
        assert_eq!(
            RetryDecision::Suppressed,
            exponential().next(0, FailureClass::Permanent)
        );
    }

    #[test]
    fn table_format() {
        let table: RetryTable = "max_retries=5, default_randomization=2000, 5000, 10000:3000, 20000"
            .parse()
            .expect("table");
        assert_eq!(Some(5), table.max_retries);
        assert_eq!(3, table.delays.len());
        assert_eq!(Duration::from_millis(2000), table.delays[0].randomization);
        assert_eq!(Duration::from_millis(3000), table.delays[1].randomization);

        let policy = RetryPolicy::Table(table);
        assert_eq!(Duration::from_secs(5), delay_of(policy.next(0, FailureClass::Transient)));
        assert_eq!(Duration::from_secs(20), delay_of(policy.next(2, FailureClass::Transient)));
        // entries past the end of the table reuse the last one
        assert_eq!(Duration::from_secs(20), delay_of(policy.next(4, FailureClass::Transient)));
        assert_eq!(RetryDecision::Exhausted, policy.next(5, FailureClass::Transient));
    }

    #[test]
    fn table_implicit_and_infinite() {
        let table: RetryTable = "1000, 2000".parse().expect("table");
        assert_eq!(Some(2), table.max_retries);

        let policy = RetryPolicy::Table("max_retries=infinite, 1000".parse().expect("table"));
        assert!(policy.can_retry(u32::MAX - 1));
    }

    #[test]
    fn table_errors() {
        assert!("".parse::<RetryTable>().is_err());
        assert!("max_retries=x, 1000".parse::<RetryTable>().is_err());
        assert!("1000:abc".parse::<RetryTable>().is_err());
        assert!("retries=3, 1000".parse::<RetryTable>().is_err());
        assert!("max_retries=0".parse::<RetryTable>().is_ok());
    }

    #[test]
    fn from_settings() {
        let settings = RetrySettings {
            policy: RetryPolicyKind::Exponential,
            max_retries: 3,
            min_wait_ms: 10_000,
            max_wait_ms: 1_000,
            table: String::new(),
        };
        assert!(RetryPolicy::try_from(&settings).is_err());
    }
}
