//! File-level presence conditions from a Kbuild fact extractor.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::{ComposerError, Result};
use crate::feature::FeatureModel;
use crate::formula::Formula;
use crate::smtlib::parse_smtlib;
use crate::utils::normalize_path;

/// Presence condition of each original file, keyed by its path relative to the source root.
#[derive(Debug, Clone, Default)]
pub struct FileConditionMapper {
    conditions: HashMap<PathBuf, Formula>,
}

impl FileConditionMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the JSON fact file at `path`.
    pub fn from_file(path: &Path, source_dir: &Path, prefix: Option<&str>, model: &FeatureModel) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(ComposerError::io(path))?;
        Self::from_json(&json, source_dir, prefix, model)
    }

    /// Build the mapper from a JSON object mapping file paths to SMT-LIB scripts.
    ///
    /// `prefix` is stripped from every option name; names without it are kept as they are.
    /// Options unknown to `model` are replaced as described in [`FeatureModel::sanitize`].
    pub fn from_json(json: &str, source_dir: &Path, prefix: Option<&str>, model: &FeatureModel) -> Result<Self> {
        info!("Reading file presence conditions");
        let raw: BTreeMap<String, String> = serde_json::from_str(json)?;

        let mut mapper = Self::new();
        for (file, script) in &raw {
            let formula = parse_smtlib(file, script)?;
            let formula = match prefix {
                Some(prefix) => formula.rename(|name| match name.strip_prefix(prefix) {
                    Some(stripped) => stripped.to_string(),
                    None => {
                        warn!(
                            "Option in presence condition does not start with {}: {}; file: {}",
                            prefix, name, file
                        );
                        name.to_string()
                    }
                }),
                None => formula,
            };
            let formula = model.sanitize(formula, file);

            let path = Path::new(file);
            let path = match path.strip_prefix(source_dir) {
                Ok(relative) if path.is_absolute() => relative,
                _ => path,
            };
            mapper.insert(path, formula);
        }
        Ok(mapper)
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, condition: Formula) {
        self.conditions.insert(normalize_path(path.as_ref()), condition);
    }

    /// Condition of `path`, falling back to the object file the extractor reports for a
    /// compilation unit (`foo.o` for `foo.c`).
    pub fn presence_condition(&self, path: &Path) -> Option<&Formula> {
        let path = normalize_path(path);
        self.conditions
            .get(&path)
            .or_else(|| self.conditions.get(&path.with_extension("o")))
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}
