//! Feature sets and the curated feature catalog.
//!
//! The catalog is a literal list. Not every combination of lexical features is
//! meaningful together, so the matrix tier exercises exactly the entries below
//! and never a computed powerset. Adding or removing an entry changes test
//! coverage and runtime cost; bump [`CATALOG_VERSION`] when doing so.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Version of the curated catalog below.
pub const CATALOG_VERSION: u32 = 1;

/// A set of cargo feature names exercised together in one run.
///
/// Names are kept sorted so rendering is stable across runs and platforms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet {
    names: BTreeSet<String>,
}

impl FeatureSet {
    /// The empty set (baseline, no extra features).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a set from feature names. Duplicates collapse.
    #[must_use]
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Add a feature; returns false if it was already present.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        self.names.insert(name.into())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Comma-joined names in sorted order, e.g. `format,radix`.
    #[must_use]
    pub fn render(&self) -> String {
        self.iter().collect::<Vec<_>>().join(",")
    }

    /// Cargo arguments selecting this set. Empty sets produce no arguments.
    #[must_use]
    pub fn cargo_args(&self) -> Vec<String> {
        if self.is_empty() {
            Vec::new()
        } else {
            vec![format!("--features={}", self.render())]
        }
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("<none>")
        } else {
            f.write_str(&self.render())
        }
    }
}

/// How a step selects features on the cargo command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "features", rename_all = "snake_case")]
pub enum FeatureSelection {
    /// Default features, no extra flags.
    Default,
    /// Default features plus the given set.
    Features(FeatureSet),
    /// `--all-features`.
    AllFeatures,
    /// `--no-default-features`, plus the given set if non-empty.
    NoDefault(FeatureSet),
}

impl FeatureSelection {
    #[must_use]
    pub fn cargo_args(&self) -> Vec<String> {
        match self {
            Self::Default => Vec::new(),
            Self::Features(set) => set.cargo_args(),
            Self::AllFeatures => vec![String::from("--all-features")],
            Self::NoDefault(set) => {
                let mut args = vec![String::from("--no-default-features")];
                args.extend(set.cargo_args());
                args
            }
        }
    }

    /// Short label used in step ids, logs and summaries.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Default => String::from("default"),
            Self::Features(set) if set.is_empty() => String::from("default"),
            Self::Features(set) => set.render(),
            Self::AllFeatures => String::from("all-features"),
            Self::NoDefault(set) if set.is_empty() => String::from("no-default"),
            Self::NoDefault(set) => format!("no-default+{}", set.render()),
        }
    }
}

impl fmt::Display for FeatureSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Ordered registry of the feature sets exercised by the matrix tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureCatalog {
    combinations: Vec<FeatureSet>,
    docs_features: FeatureSet,
}

impl FeatureCatalog {
    /// A catalog with explicit entries. Order is preserved as given.
    #[must_use]
    pub fn new(combinations: Vec<FeatureSet>, docs_features: FeatureSet) -> Self {
        Self {
            combinations,
            docs_features,
        }
    }

    /// The curated catalog for the lexical workspace.
    #[must_use]
    pub fn lexical() -> Self {
        let combinations = LEXICAL_COMBINATIONS
            .iter()
            .map(|names| FeatureSet::from_names(names.iter().copied()))
            .collect();
        Self {
            combinations,
            docs_features: FeatureSet::from_names(LEXICAL_DOCS_FEATURES.iter().copied()),
        }
    }

    /// Every combination the matrix tiers run, in fixed order.
    #[must_use]
    pub fn combinations(&self) -> &[FeatureSet] {
        &self.combinations
    }

    /// The representative feature set used for the strict docs build.
    #[must_use]
    pub fn docs_features(&self) -> &FeatureSet {
        &self.docs_features
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.combinations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.combinations.is_empty()
    }
}

const LEXICAL_COMBINATIONS: &[&[&str]] = &[
    &["power-of-two"],
    &["radix"],
    &["format"],
    &["compact"],
    &["f16"],
    &["format", "power-of-two"],
    &["format", "radix"],
    &["compact", "format"],
    &["compact", "radix"],
    &["compact", "format", "radix"],
    &["f16", "radix"],
    &["parse-floats"],
    &["parse-integers"],
    &["write-floats"],
    &["write-integers"],
    &["format", "parse-integers"],
    &["compact", "write-floats"],
];

const LEXICAL_DOCS_FEATURES: &[&str] = &["format", "radix"];
