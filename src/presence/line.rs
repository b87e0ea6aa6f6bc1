//! Line-level presence conditions of one compiled file.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::condition::{self, SharedConditionSpace};
use crate::error::Result;
use crate::feature::{FeatureModel, FeatureNaming};
use crate::formula::Formula;
use crate::inclusion::InclusionInformation;
use crate::preprocess::{Preprocessor, PreprocessorOptions, BUILTIN_MACROS};

/// Presence condition of each line of an original file, for one way of compiling it.
#[derive(Debug, Clone, Default)]
pub struct LineConditions {
    conditions: BTreeMap<usize, Formula>,
}

/// What line-level extraction needs besides the file itself.
pub struct LineContext<'a> {
    pub source_dir: &'a Path,
    pub naming: &'a FeatureNaming,
    pub model: &'a FeatureModel,
    pub max_include_depth: usize,
}

impl LineConditions {
    pub fn from_conditions(conditions: BTreeMap<usize, Formula>) -> Self {
        Self { conditions }
    }

    /// Preprocess `info.file_path` and record the condition of each of its lines.
    ///
    /// The command-line defines and forced includes of `info` are processed first. Defines of
    /// macros that name a known feature are skipped, so those macros stay free. Holds the
    /// lock of `space` for the whole file.
    pub fn extract(info: &InclusionInformation, space: &SharedConditionSpace, ctx: &LineContext) -> Result<Self> {
        let absolute = |p: &PathBuf| {
            if p.is_absolute() {
                p.clone()
            } else {
                ctx.source_dir.join(p)
            }
        };
        let path = absolute(&info.file_path);
        let options = PreprocessorOptions {
            include_paths: info.include_paths.iter().map(absolute).collect(),
            system_include_paths: info.system_include_paths.iter().map(absolute).collect(),
            max_include_depth: ctx.max_include_depth,
        };
        let is_free = |name: &str| {
            ctx.naming
                .feature_name(name)
                .is_some_and(|feature| ctx.model.contains(feature))
        };
        let rename = |name: &str| ctx.naming.feature_name(name).unwrap_or(name).to_string();

        let mut command_line = String::new();
        for (name, value) in &info.defines {
            command_line.push_str(&format!("#define {} {}\n", name, value));
        }
        for include in &info.included_files {
            command_line.push_str(&format!("#include \"{}\"\n", absolute(include).display()));
        }

        let mut space = condition::lock(space);
        debug!("Determining line presence conditions for {}", info.file_path.display());

        let captures = {
            let mut preprocessor = Preprocessor::new(&mut space, &options, &is_free);
            preprocessor.inject(Path::new("<builtin>"), BUILTIN_MACROS);
            preprocessor.inject(&path.with_file_name("<command-line>"), &command_line);
            preprocessor.run(&path)
        };
        let captures = match captures {
            Ok(captures) => captures,
            Err(e) => {
                space.collect_garbage(&[]);
                return Err(e);
            }
        };

        let mut converted = HashMap::new();
        let mut conditions = BTreeMap::new();
        for (line, condition) in captures {
            let formula = converted
                .entry(condition)
                .or_insert_with(|| space.to_formula(condition, rename));
            match formula {
                Some(formula) => {
                    let context = format!("{}:{}", info.file_path.display(), line);
                    conditions.insert(line, ctx.model.sanitize(formula.clone(), &context));
                }
                None => warn!(
                    "Could not convert presence condition to a formula at {}:{}",
                    info.file_path.display(),
                    line
                ),
            }
        }
        space.collect_garbage(&[]);

        if conditions.is_empty() {
            debug!("No presence conditions found for {}", info.file_path.display());
        }
        Ok(Self { conditions })
    }

    /// Condition of `line` (1-based) of the original file.
    pub fn presence_condition(&self, line: usize) -> Option<&Formula> {
        self.conditions.get(&line)
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::fs;
    use std::sync::{Arc, Mutex};

    use test_log::test;

    use super::*;
    use crate::condition::ConditionSpace;

    fn lit(name: &str) -> Formula {
        Formula::literal(name)
    }

    fn info(file: &str, defines: &[(&str, &str)]) -> InclusionInformation {
        InclusionInformation::new(
            file,
            BTreeSet::new(),
            defines.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            Vec::new(),
            Vec::new(),
        )
    }

    #[test]
    fn test_extract() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("main.c"),
            "int a;\n#ifdef CONFIG_FOO\nint b;\n#endif\n#if ENABLE_BAR && !defined(CONFIG_FOO)\nint c;\n#endif\n",
        )
        .unwrap();

        let space: SharedConditionSpace = Arc::new(Mutex::new(ConditionSpace::new()));
        let naming = FeatureNaming::prefixes(["CONFIG_", "ENABLE_", "IF_"]);
        let model = FeatureModel::new(["FOO", "BAR"]);
        let ctx = LineContext {
            source_dir: dir.path(),
            naming: &naming,
            model: &model,
            max_include_depth: 200,
        };
        // The command line enables FOO, but feature macros stay free.
        let lines = LineConditions::extract(&info("main.c", &[("CONFIG_FOO", "1")]), &space, &ctx).unwrap();

        assert_eq!(lines.presence_condition(1), Some(&Formula::True));
        assert!(lines.presence_condition(3).unwrap().equivalent(&lit("FOO")));
        assert!(lines
            .presence_condition(6)
            .unwrap()
            .equivalent(&Formula::and(lit("BAR"), Formula::not(lit("FOO")))));
        assert_eq!(lines.presence_condition(8), None);
    }

    #[test]
    fn test_opaque_lines_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.c"), "#if NR_CPUS > 4\nbig;\n#endif\nall;\n").unwrap();

        let space: SharedConditionSpace = Arc::new(Mutex::new(ConditionSpace::new()));
        let naming = FeatureNaming::Identity;
        let model = FeatureModel::default();
        let ctx = LineContext {
            source_dir: dir.path(),
            naming: &naming,
            model: &model,
            max_include_depth: 200,
        };
        let lines = LineConditions::extract(&info("main.c", &[]), &space, &ctx).unwrap();
        assert_eq!(lines.presence_condition(2), None);
        assert_eq!(lines.presence_condition(4), Some(&Formula::True));
    }

    #[test]
    fn test_unknown_macros_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.c"), "int x;\n#ifndef __KERNEL__\nuser;\n#endif\n").unwrap();

        let space: SharedConditionSpace = Arc::new(Mutex::new(ConditionSpace::new()));
        let naming = FeatureNaming::Identity;
        let model = FeatureModel::new(["A"]);
        let ctx = LineContext {
            source_dir: dir.path(),
            naming: &naming,
            model: &model,
            max_include_depth: 200,
        };
        let lines = LineConditions::extract(&info("main.c", &[]), &space, &ctx).unwrap();
        // `__KERNEL__` is not a feature, so its negation holds.
        assert_eq!(lines.presence_condition(3), Some(&Formula::True));
    }
}
