//! Presence conditions of lines in a composed tree.
//!
//! A condition is the conjunction of the condition under which the build compiles the original
//! file at all ([`file`]) and the condition under which the preprocessor keeps the line
//! ([`line`]). Either part may be unknown, in which case the whole answer is unknown.

pub mod file;
pub mod line;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;

use crate::formula::Formula;
use crate::source_map::{ComposedSourceMap, SourceLocation, SourceMap};
use crate::utils::normalize_path;

pub use self::file::FileConditionMapper;
pub use self::line::{LineConditions, LineContext};

/// Answers presence condition queries about locations in a composed tree.
pub trait PresenceConditionMapper: Send + Sync {
    /// Condition of `line` (1-based) of the generated `file`, or `None` if it is unknown.
    fn presence_condition(&self, file: &Path, line: usize) -> Option<Formula>;
}

/// Knows nothing. Used when extraction is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyMapper;

impl PresenceConditionMapper for EmptyMapper {
    fn presence_condition(&self, _file: &Path, _line: usize) -> Option<Formula> {
        None
    }
}

pub struct CombinedMapper {
    source_map: Arc<ComposedSourceMap>,
    files: Arc<FileConditionMapper>,
    /// Keyed by generated path, since each generated file is one way of compiling its original.
    lines: HashMap<PathBuf, LineConditions>,
    /// Generated paths that only have a file condition.
    file_level_only: HashSet<PathBuf>,
}

impl CombinedMapper {
    pub fn new(
        source_map: Arc<ComposedSourceMap>,
        files: Arc<FileConditionMapper>,
        lines: HashMap<PathBuf, LineConditions>,
    ) -> Self {
        let lines = lines
            .into_iter()
            .map(|(path, conditions)| (normalize_path(&path), conditions))
            .collect();
        Self {
            source_map,
            files,
            lines,
            file_level_only: HashSet::new(),
        }
    }

    /// Answer queries on the generated `paths` with their file condition alone.
    pub fn with_file_level_only(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.file_level_only
            .extend(paths.into_iter().map(|path| normalize_path(&path)));
        self
    }
}

impl PresenceConditionMapper for CombinedMapper {
    fn presence_condition(&self, file: &Path, line: usize) -> Option<Formula> {
        let location = SourceLocation::new(file, line);

        let Some(original) = self.source_map.original_location(&location) else {
            warn!("No original location found for {}", location);
            return None;
        };

        let Some(file_condition) = self.files.presence_condition(&original.file) else {
            warn!("No file presence condition found for {}", original.file.display());
            return None;
        };

        if self.file_level_only.contains(&location.file) {
            return self
                .source_map
                .unmarked_location(&location)
                .map(|_| file_condition.clone());
        }

        let Some(lines) = self.lines.get(&location.file) else {
            warn!("No line presence conditions found for {}", location.file.display());
            return None;
        };

        let line_condition = self
            .source_map
            .unmarked_location(&location)
            .and_then(|unmarked| lines.presence_condition(unmarked.line));
        let Some(line_condition) = line_condition else {
            warn!("No line presence condition found for {}", location);
            return None;
        };

        Some(Formula::and(file_condition.clone(), line_condition.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use test_log::test;

    use super::*;
    use crate::generate::{GenerationInformation, GenerationMap};

    fn lit(name: &str) -> Formula {
        Formula::literal(name)
    }

    fn mapper(dir: &Path) -> CombinedMapper {
        let mut generation = GenerationMap::new();
        generation.insert(PathBuf::from("src/main-abc.c"), GenerationInformation::new("src/main.c", 2));
        generation.insert(PathBuf::from("src/util.h"), GenerationInformation::new("src/util.h", 0));
        let source_map = Arc::new(ComposedSourceMap::new(generation, dir));

        let mut files = FileConditionMapper::new();
        files.insert("src/main.c", lit("A"));

        let mut lines = HashMap::new();
        lines.insert(
            PathBuf::from("src/main-abc.c"),
            LineConditions::from_conditions(BTreeMap::from([(1, Formula::True), (2, lit("B"))])),
        );
        CombinedMapper::new(source_map, Arc::new(files), lines)
    }

    #[test]
    fn test_combined() {
        let dir = tempfile::tempdir().unwrap();
        let mapper = mapper(dir.path());

        let file = Path::new("src/main-abc.c");
        // The first two generated lines are the injected preamble.
        assert_eq!(mapper.presence_condition(file, 1), None);
        assert!(mapper.presence_condition(file, 3).unwrap().equivalent(&lit("A")));
        assert!(mapper
            .presence_condition(file, 4)
            .unwrap()
            .equivalent(&Formula::and(lit("A"), lit("B"))));
        assert_eq!(mapper.presence_condition(file, 5), None);
    }

    #[test]
    fn test_unknown_parts() {
        let dir = tempfile::tempdir().unwrap();
        let mapper = mapper(dir.path());

        // Not generated.
        assert_eq!(mapper.presence_condition(Path::new("other.c"), 1), None);
        // No file condition.
        assert_eq!(mapper.presence_condition(Path::new("src/util.h"), 1), None);
    }

    #[test]
    fn test_file_level_only() {
        let dir = tempfile::tempdir().unwrap();
        let mapper = mapper(dir.path()).with_file_level_only([PathBuf::from("./src/main-abc.c")]);

        let file = Path::new("src/main-abc.c");
        assert_eq!(mapper.presence_condition(file, 1), None);
        assert_eq!(mapper.presence_condition(file, 4), Some(lit("A")));
        // Past the recorded lines, the file condition still applies.
        assert_eq!(mapper.presence_condition(file, 5), Some(lit("A")));
    }

    #[test]
    fn test_empty_mapper() {
        assert_eq!(EmptyMapper.presence_condition(Path::new("a.c"), 1), None);
    }
}
