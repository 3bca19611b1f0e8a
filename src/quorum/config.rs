use std::{fmt, str::FromStr};

use tracing::warn;
use typed_builder::TypedBuilder;

use super::error::ConfigError;

/// How reads are spread over the children.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadPattern {
    /// Read every child and vote on the content.
    #[default]
    Quorum,
    /// Read one child at a time, in index order, until one succeeds.
    Fifo,
}

impl FromStr for ReadPattern {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quorum" => Ok(ReadPattern::Quorum),
            "fifo" => Ok(ReadPattern::Fifo),
            other => Err(ConfigError::InvalidValue {
                key: "read-pattern".into(),
                value: other.into(),
            }),
        }
    }
}

impl fmt::Display for ReadPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReadPattern::Quorum => "quorum",
            ReadPattern::Fifo => "fifo",
        })
    }
}

/// Settings as requested by whoever opens the device. Nothing here has been
/// checked against the children yet; see [`Config::validate`].
#[derive(TypedBuilder, Clone, Debug, PartialEq, Eq)]
pub struct QuorumOptions {
    /// Minimum number of children that must succeed or agree.
    pub vote_threshold: u32,
    #[builder(default)]
    pub read_pattern: ReadPattern,
    /// Two-child debug mode that aborts on any content mismatch.
    #[builder(default)]
    pub blkverify: bool,
    /// Rewrite the winning content onto children that disagreed with it.
    #[builder(default)]
    pub rewrite_corrupted: bool,
}

/// Validated configuration, fixed for the lifetime of a device except for
/// the child count, which follows runtime child changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    child_count: u32,
    threshold: u32,
    read_pattern: ReadPattern,
    verify_mode: bool,
    repair_on_read: bool,
}

impl Config {
    /// Checks `options` against the number of children.
    ///
    /// A threshold outside `1..=child_count` is rejected. Verify mode asked
    /// for without exactly two children and a threshold of two is switched
    /// off with a warning rather than failing. Verify mode that survives
    /// that check cannot be combined with repair.
    pub fn validate(
        options: &QuorumOptions,
        child_count: usize,
    ) -> Result<Self, ConfigError> {
        if child_count < 2 {
            Err(ConfigError::TooFewChildren { count: child_count })?
        }
        let threshold = options.vote_threshold;
        if threshold < 1 || threshold as usize > child_count {
            Err(ConfigError::ThresholdOutOfRange {
                threshold,
                child_count,
            })?
        }

        let mut verify_mode = options.blkverify;
        if verify_mode && (child_count != 2 || threshold != 2) {
            warn!(
                child_count,
                threshold,
                "blkverify needs exactly 2 children and vote-threshold=2, \
                 disabling it"
            );
            verify_mode = false;
        }

        if verify_mode && options.rewrite_corrupted {
            Err(ConfigError::VerifyWithRepair)?
        }

        Ok(Self {
            child_count: child_count as u32,
            threshold,
            read_pattern: options.read_pattern,
            verify_mode,
            repair_on_read: options.rewrite_corrupted,
        })
    }

    pub fn child_count(&self) -> u32 {
        self.child_count
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn read_pattern(&self) -> ReadPattern {
        self.read_pattern
    }

    pub fn verify_mode(&self) -> bool {
        self.verify_mode
    }

    pub fn repair_on_read(&self) -> bool {
        self.repair_on_read
    }

    pub(crate) fn set_child_count(&mut self, count: usize) {
        self.child_count = count as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(threshold: u32) -> QuorumOptions {
        QuorumOptions::builder().vote_threshold(threshold).build()
    }

    #[test]
    fn threshold_must_fit_children() {
        assert_eq!(
            Config::validate(&options(0), 3),
            Err(ConfigError::ThresholdOutOfRange {
                threshold: 0,
                child_count: 3
            })
        );
        assert!(matches!(
            Config::validate(&options(4), 3),
            Err(ConfigError::ThresholdOutOfRange { .. })
        ));
        let config = Config::validate(&options(3), 3).unwrap();
        assert_eq!(config.threshold(), 3);
        assert_eq!(config.child_count(), 3);
        assert_eq!(config.read_pattern(), ReadPattern::Quorum);
    }

    #[test]
    fn single_child_is_rejected() {
        assert_eq!(
            Config::validate(&options(1), 1),
            Err(ConfigError::TooFewChildren { count: 1 })
        );
    }

    #[test]
    fn verify_mode_is_dropped_when_unsupported() {
        let opts = QuorumOptions::builder()
            .vote_threshold(2)
            .blkverify(true)
            .build();
        assert!(Config::validate(&opts, 2).unwrap().verify_mode());
        assert!(!Config::validate(&opts, 3).unwrap().verify_mode());

        let opts = QuorumOptions::builder()
            .vote_threshold(1)
            .blkverify(true)
            .build();
        assert!(!Config::validate(&opts, 2).unwrap().verify_mode());
    }

    #[test]
    fn verify_mode_excludes_repair() {
        let opts = QuorumOptions::builder()
            .vote_threshold(2)
            .blkverify(true)
            .rewrite_corrupted(true)
            .build();
        assert_eq!(
            Config::validate(&opts, 2),
            Err(ConfigError::VerifyWithRepair)
        );
        // verify mode is already off with three children, so no conflict
        let config = Config::validate(&opts, 3).unwrap();
        assert!(!config.verify_mode());
        assert!(config.repair_on_read());
    }

    #[test]
    fn read_pattern_parses() {
        assert_eq!("fifo".parse::<ReadPattern>(), Ok(ReadPattern::Fifo));
        assert_eq!("quorum".parse::<ReadPattern>(), Ok(ReadPattern::Quorum));
        assert!("random".parse::<ReadPattern>().is_err());
        assert_eq!(ReadPattern::Fifo.to_string(), "fifo");
    }
}
