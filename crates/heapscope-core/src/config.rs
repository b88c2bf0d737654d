//! Startup configuration.
//!
//! Options arrive as a comma-separated string, either handed over by the
//! embedding bootstrap or read from the `HEAPSCOPE_OPTIONS` environment
//! variable:
//! - `sampling=<N>`: record one in every `N` allocations (`N > 0`).
//! - `nosampling`: record every allocation.
//! - `capacity=<N>`: event channel slot count.
//! - `depth=<N>`: maximum captured stack depth.
//! - `shards=<N>`: allocation ledger lock shards.
//!
//! Parsing is lenient. Malformed or unknown entries are skipped, never fatal.

use std::time::Duration;

use crate::error::PipelineError;

/// Environment variable consulted by [`PipelineConfig::from_env`].
pub const OPTIONS_ENV: &str = "HEAPSCOPE_OPTIONS";

pub const DEFAULT_SAMPLING_INTERVAL: u32 = 10;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 65_536;
pub const DEFAULT_MAX_STACK_DEPTH: usize = 128;
pub const DEFAULT_LEDGER_SHARDS: usize = 64;
/// Live records the ledger reserves room for at startup. A shard that
/// outgrows its share rehashes in place while holding its lock, stalling
/// every producer that maps to it for the length of the copy.
pub const DEFAULT_EXPECTED_POPULATION: usize = 1_000_000;

/// Tunables for a [`Pipeline`](crate::Pipeline).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PipelineConfig {
    /// When false every allocation is recorded.
    pub sampling_enabled: bool,
    /// Record one allocation in every `sampling_interval`.
    pub sampling_interval: u32,
    /// Fixed slot count of the event channel.
    pub channel_capacity: usize,
    /// Frames captured per allocation.
    pub max_stack_depth: usize,
    /// Number of independently locked ledger shards.
    pub ledger_shards: usize,
    /// Records reserved up front across all ledger shards. Size it for the
    /// peak live population; growth past it rehashes a shard under its lock.
    pub expected_population: usize,
    /// Consumer sleep when the channel is empty.
    #[serde(with = "duration_micros")]
    pub idle_sleep: Duration,
    /// Name given to the consumer OS thread.
    pub thread_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sampling_enabled: true,
            sampling_interval: DEFAULT_SAMPLING_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_stack_depth: DEFAULT_MAX_STACK_DEPTH,
            ledger_shards: DEFAULT_LEDGER_SHARDS,
            expected_population: DEFAULT_EXPECTED_POPULATION,
            idle_sleep: Duration::from_micros(100),
            thread_name: String::from("heapscope-consumer"),
        }
    }
}

impl PipelineConfig {
    /// Parse a startup option string on top of the defaults.
    #[must_use]
    pub fn from_options(options: &str) -> Self {
        let mut config = Self::default();
        config.apply_options(options);
        config
    }

    /// Read options from [`OPTIONS_ENV`], falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var(OPTIONS_ENV)
            .map(|v| Self::from_options(&v))
            .unwrap_or_default()
    }

    /// Apply each recognised `key[=value]` entry in order; later entries win.
    pub fn apply_options(&mut self, options: &str) {
        for entry in options.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (key, value) = match entry.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (entry, None),
            };

            let applied = match (key.to_ascii_lowercase().as_str(), value) {
                ("nosampling", None) => {
                    self.sampling_enabled = false;
                    true
                }
                ("sampling", Some(v)) => match parse_positive(v) {
                    Some(n) => {
                        self.sampling_interval = u32::try_from(n).unwrap_or(u32::MAX);
                        true
                    }
                    None => false,
                },
                ("capacity", Some(v)) => parse_positive(v)
                    .map(|n| self.channel_capacity = n)
                    .is_some(),
                ("depth", Some(v)) => parse_positive(v)
                    .map(|n| self.max_stack_depth = n)
                    .is_some(),
                ("shards", Some(v)) => parse_positive(v)
                    .map(|n| self.ledger_shards = n)
                    .is_some(),
                ("population", Some(v)) => parse_positive(v)
                    .map(|n| self.expected_population = n)
                    .is_some(),
                _ => false,
            };

            if !applied {
                tracing::debug!(option = entry, "ignoring unrecognised pipeline option");
            }
        }
    }

    /// Reject configurations the pipeline cannot be built from.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.channel_capacity == 0 {
            return Err(PipelineError::InvalidConfig {
                field: "channel_capacity",
                reason: "must be at least 1",
            });
        }
        if self.ledger_shards == 0 {
            return Err(PipelineError::InvalidConfig {
                field: "ledger_shards",
                reason: "must be at least 1",
            });
        }
        if self.sampling_interval == 0 {
            return Err(PipelineError::InvalidConfig {
                field: "sampling_interval",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

/// Leading-digit parse: `"25abc"` yields 25, `"abc"` and `"0"` yield nothing.
pub(crate) fn parse_positive(s: &str) -> Option<usize> {
    let digits: &str = {
        let end = s
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map_or(s.len(), |(i, _)| i);
        &s[..end]
    };
    match digits.parse::<usize>() {
        Ok(0) | Err(_) => None,
        Ok(n) => Some(n),
    }
}

mod duration_micros {
    use std::time::Duration;

    pub fn serialize<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert!(config.sampling_enabled);
        assert_eq!(config.sampling_interval, 10);
        assert_eq!(config.channel_capacity, 65_536);
        assert_eq!(config.max_stack_depth, 128);
        assert_eq!(config.ledger_shards, 64);
        assert_eq!(config.expected_population, 1_000_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_sampling_options() {
        let config = PipelineConfig::from_options("sampling=25");
        assert_eq!(config.sampling_interval, 25);
        assert!(config.sampling_enabled);

        let config = PipelineConfig::from_options("nosampling");
        assert!(!config.sampling_enabled);
        assert_eq!(config.sampling_interval, 10);

        let config = PipelineConfig::from_options("sampling=3,nosampling");
        assert_eq!(config.sampling_interval, 3);
        assert!(!config.sampling_enabled);
    }

    #[test]
    fn malformed_options_are_ignored() {
        let config = PipelineConfig::from_options("sampling=abc,sampling=0,bogus,,=,depth=");
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn leading_digits_are_honoured() {
        let config = PipelineConfig::from_options("sampling=12ms");
        assert_eq!(config.sampling_interval, 12);
    }

    #[test]
    fn supplemental_keys() {
        let config =
            PipelineConfig::from_options(" capacity=1024 , depth=16, SHARDS=8, population=4096 ");
        assert_eq!(config.channel_capacity, 1024);
        assert_eq!(config.max_stack_depth, 16);
        assert_eq!(config.ledger_shards, 8);
        assert_eq!(config.expected_population, 4096);
    }

    #[test]
    fn validate_rejects_zero_sizes() {
        let config = PipelineConfig {
            channel_capacity: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig {
                field: "channel_capacity",
                ..
            })
        ));

        let config = PipelineConfig {
            ledger_shards: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn serializes_idle_sleep_as_micros() {
        let json = serde_json::to_value(PipelineConfig::default()).unwrap();
        assert_eq!(json["idle_sleep"], 100);
        assert_eq!(json["thread_name"], "heapscope-consumer");
    }
}
