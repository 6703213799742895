//! Environment-driven pipeline configuration.
//!
//! Every gate is a presence flag: any non-empty value counts as set, an unset
//! or empty variable counts as unset.
//!
//! | Variable              | Effect when set                                   |
//! |-----------------------|---------------------------------------------------|
//! | `SKIP_VALGRIND`       | omit every valgrind step                          |
//! | `SKIP_MIRI`           | omit every miri step                              |
//! | `SKIP_FEATURES`       | omit the feature-matrix tier                      |
//! | `SKIP_CHECK`          | omit the lint/format tier                         |
//! | `SKIP_DOCS`           | omit the strict docs tier                         |
//! | `VALGRIND_EXHAUSTIVE` | valgrind over the full catalog (unless skipped)   |
//! | `MIRI_EXHAUSTIVE`     | miri over the full catalog (unless skipped)       |

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SKIP_VALGRIND: &str = "SKIP_VALGRIND";
pub const SKIP_MIRI: &str = "SKIP_MIRI";
pub const SKIP_FEATURES: &str = "SKIP_FEATURES";
pub const SKIP_CHECK: &str = "SKIP_CHECK";
pub const SKIP_DOCS: &str = "SKIP_DOCS";
pub const VALGRIND_EXHAUSTIVE: &str = "VALGRIND_EXHAUSTIVE";
pub const MIRI_EXHAUSTIVE: &str = "MIRI_EXHAUSTIVE";

/// All variables read by [`VerifyConfig::from_env`].
pub const CONFIG_VARIABLES: &[&str] = &[
    SKIP_VALGRIND,
    SKIP_MIRI,
    SKIP_FEATURES,
    SKIP_CHECK,
    SKIP_DOCS,
    VALGRIND_EXHAUSTIVE,
    MIRI_EXHAUSTIVE,
];

/// Which tiers and tools a run enables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyConfig {
    pub skip_valgrind: bool,
    pub skip_miri: bool,
    pub skip_features: bool,
    pub skip_check: bool,
    pub skip_docs: bool,
    pub valgrind_exhaustive: bool,
    pub miri_exhaustive: bool,
}

impl VerifyConfig {
    /// Read the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |name: &str| lookup(name).is_some_and(|value| !value.is_empty());
        Self {
            skip_valgrind: set(SKIP_VALGRIND),
            skip_miri: set(SKIP_MIRI),
            skip_features: set(SKIP_FEATURES),
            skip_check: set(SKIP_CHECK),
            skip_docs: set(SKIP_DOCS),
            valgrind_exhaustive: set(VALGRIND_EXHAUSTIVE),
            miri_exhaustive: set(MIRI_EXHAUSTIVE),
        }
    }

    #[must_use]
    pub const fn valgrind_enabled(&self) -> bool {
        !self.skip_valgrind
    }

    #[must_use]
    pub const fn miri_enabled(&self) -> bool {
        !self.skip_miri
    }

    /// Valgrind over the full catalog. Skip always wins over exhaustive.
    #[must_use]
    pub const fn valgrind_matrix_enabled(&self) -> bool {
        self.valgrind_enabled() && self.valgrind_exhaustive
    }

    /// Miri over the full catalog. Skip always wins over exhaustive.
    #[must_use]
    pub const fn miri_matrix_enabled(&self) -> bool {
        self.miri_enabled() && self.miri_exhaustive
    }

    #[must_use]
    pub const fn features_enabled(&self) -> bool {
        !self.skip_features
    }

    #[must_use]
    pub const fn check_enabled(&self) -> bool {
        !self.skip_check
    }

    #[must_use]
    pub const fn docs_enabled(&self) -> bool {
        !self.skip_docs
    }

    /// Flag combinations where a skip flag overrides an exhaustive flag.
    #[must_use]
    pub fn inconsistencies(&self) -> Vec<ConfigInconsistency> {
        let mut out = Vec::new();
        if self.skip_valgrind && self.valgrind_exhaustive {
            out.push(ConfigInconsistency {
                skip_flag: SKIP_VALGRIND,
                exhaustive_flag: VALGRIND_EXHAUSTIVE,
            });
        }
        if self.skip_miri && self.miri_exhaustive {
            out.push(ConfigInconsistency {
                skip_flag: SKIP_MIRI,
                exhaustive_flag: MIRI_EXHAUSTIVE,
            });
        }
        out
    }
}

/// An exhaustive flag set together with the skip flag of the same tool.
///
/// Not an error: the tool's steps are omitted. Reported so the override is
/// visible in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfigInconsistency {
    pub skip_flag: &'static str,
    pub exhaustive_flag: &'static str,
}

impl fmt::Display for ConfigInconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is set together with {}; {} takes precedence and the matrix tier is omitted",
            self.exhaustive_flag, self.skip_flag, self.skip_flag
        )
    }
}

/// Problems with command-line inputs or output destinations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown interrupt policy '{0}' (expected 'abort' or 'follow-step')")]
    UnknownInterruptPolicy(String),
    #[error("cannot open log file {path}: {source}")]
    LogFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("cannot write report {path}: {source}")]
    ReportFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}
