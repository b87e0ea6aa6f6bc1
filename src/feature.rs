//! Feature names: the model of known features and the macro-to-feature naming of a family.

use std::collections::BTreeSet;
use std::path::Path;

use log::warn;

use crate::error::{ComposerError, Result};
use crate::formula::Formula;

/// How preprocessor macros and Kconfig option names map to feature names.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FeatureNaming {
    /// Macro names are feature names.
    Identity,
    /// Strip the first matching prefix. Names matching no prefix are not features.
    Prefixes(Vec<String>),
}

impl FeatureNaming {
    pub fn prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FeatureNaming::Prefixes(prefixes.into_iter().map(Into::into).collect())
    }

    /// Feature denoted by the macro `name`, if any.
    pub fn feature_name<'a>(&self, name: &'a str) -> Option<&'a str> {
        match self {
            FeatureNaming::Identity => Some(name),
            FeatureNaming::Prefixes(prefixes) => prefixes
                .iter()
                .find_map(|p| name.strip_prefix(p.as_str()))
                .filter(|rest| !rest.is_empty()),
        }
    }

    /// Macro names that denote `feature`.
    pub fn macro_names(&self, feature: &str) -> Vec<String> {
        match self {
            FeatureNaming::Identity => vec![feature.to_string()],
            FeatureNaming::Prefixes(prefixes) => prefixes.iter().map(|p| format!("{}{}", p, feature)).collect(),
        }
    }
}

/// The set of known feature names.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct FeatureModel {
    features: BTreeSet<String>,
}

impl FeatureModel {
    pub fn new<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            features: features.into_iter().map(Into::into).collect(),
        }
    }

    /// Read the variable names from the `c <id> <name>` comments of a DIMACS file.
    pub fn from_dimacs(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(ComposerError::io(path))?;
        Self::parse_dimacs(&path.display().to_string(), &text)
    }

    pub fn parse_dimacs(context: &str, text: &str) -> Result<Self> {
        let mut features = BTreeSet::new();
        let mut offset = 0;
        for line in text.split_inclusive('\n') {
            let line_offset = offset;
            offset += line.len();

            let mut parts = line.split_whitespace();
            if parts.next() != Some("c") {
                continue;
            }
            let (Some(id), Some(name)) = (parts.next(), parts.next()) else {
                continue;
            };
            // Auxiliary variables of the CNF transformation are marked with a trailing `$`.
            if id.ends_with('$') {
                continue;
            }
            if id.parse::<u32>().is_err() {
                return Err(ComposerError::parse(
                    context,
                    Some(line_offset),
                    format!("invalid variable id `{}`", id),
                ));
            }
            features.insert(name.to_string());
        }
        Ok(Self { features })
    }

    pub fn contains(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn features(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|s| s.as_str())
    }

    /// Replace every literal that is not a known feature by `false`.
    ///
    /// A positive occurrence of an unknown feature becomes `false`, a negated one `true`. The
    /// substitution is logged with `context`.
    pub fn sanitize(&self, formula: Formula, context: &str) -> Formula {
        let unknown: BTreeSet<String> = formula
            .variables()
            .into_iter()
            .filter(|v| !self.contains(v))
            .collect();
        if unknown.is_empty() {
            return formula;
        }

        let sanitized = formula
            .map_literals(&mut |name| {
                if unknown.contains(name) {
                    Formula::False
                } else {
                    Formula::literal(name)
                }
            })
            .simplify();
        warn!(
            "Presence condition contains unknown features: {}; file: {} Changed from {} to {}",
            unknown.iter().cloned().collect::<Vec<_>>().join(", "),
            context,
            formula,
            sanitized
        );
        sanitized
    }
}
