//! Settings of a composer instance.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ComposerError, Result};

/// Build system family of the analyzed project.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum System {
    Busybox,
    Linux,
    Toybox,
    Generic,
}

impl std::str::FromStr for System {
    type Err = ComposerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "busybox" => Ok(System::Busybox),
            "linux" => Ok(System::Linux),
            "toybox" => Ok(System::Toybox),
            "generic" => Ok(System::Generic),
            _ => Err(ComposerError::Unsupported(format!("system `{}`", s))),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    pub system: System,
    /// Root of the original source tree. Never modified.
    pub source: PathBuf,
    /// Scratch directory owned by one composer.
    pub tmp_dir: PathBuf,
    /// Whether to extract presence conditions at all.
    pub presence_conditions: bool,
    /// JSON file mapping source files to SMT-LIB conditions.
    pub file_conditions: Option<PathBuf>,
    /// Files, relative to `source`, whose lines get no line-level condition. Queries on them
    /// are answered with the file condition alone.
    pub presence_condition_excludes: BTreeSet<PathBuf>,
    pub compiler: String,
    pub make: String,
    pub max_include_depth: usize,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            system: System::Generic,
            source: PathBuf::new(),
            tmp_dir: std::env::temp_dir().join("variant-composer"),
            presence_conditions: true,
            file_conditions: None,
            presence_condition_excludes: BTreeSet::new(),
            compiler: "gcc".to_string(),
            make: "make".to_string(),
            max_include_depth: 200,
        }
    }
}

impl ComposerConfig {
    pub fn new(system: System, source: impl Into<PathBuf>, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            system,
            source: source.into(),
            tmp_dir: tmp_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(ComposerError::io(path))?;
        Self::from_json(&json)
    }

    /// Where the source tree is copied to and built in.
    pub fn source_copy_dir(&self) -> PathBuf {
        self.tmp_dir.join("source")
    }
}
