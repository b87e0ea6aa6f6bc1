//! Materialization of the composed source tree.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;

use crate::error::{ComposerError, Result};
use crate::inclusion::{Dependency, InclusionInformation};
use crate::utils::relative_path;

/// Where a generated file came from.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct GenerationInformation {
    /// Relative to the source root.
    pub original_path: PathBuf,
    /// Number of synthetic lines prepended to the original content.
    pub added_lines: usize,
}

impl GenerationInformation {
    pub fn new(original_path: impl Into<PathBuf>, added_lines: usize) -> Self {
        Self {
            original_path: original_path.into(),
            added_lines,
        }
    }
}

/// Generated file path (relative to the output root) to its origin.
pub type GenerationMap = HashMap<PathBuf, GenerationInformation>;

/// The directives that reproduce the command-line flags of `info` textually.
pub fn preamble(info: &InclusionInformation) -> String {
    let mut text = String::new();
    for (name, value) in &info.defines {
        text.push_str(&format!("#define {} {}\n", name, value));
    }
    let parent = info.file_path.parent().unwrap_or(Path::new(""));
    for include in &info.included_files {
        let include = if include.is_absolute() {
            include.clone()
        } else {
            relative_path(parent, include)
        };
        text.push_str(&format!("#include \"{}\"\n", include.display()));
    }
    text
}

/// Write all dependencies below `destination`.
///
/// Compiled dependencies are written once per distinct [`InclusionInformation`] under their
/// composed name, with the preamble prepended. Headers are copied verbatim once. Files
/// outside the source tree and missing files are skipped.
pub fn generate_files<'a>(
    dependencies: impl IntoIterator<Item = &'a Dependency>,
    source_dir: &Path,
    destination: &Path,
) -> Result<GenerationMap> {
    info!("Generating files");

    let mut targets: BTreeMap<&Path, Vec<&Dependency>> = BTreeMap::new();
    for dependency in dependencies {
        if dependency.file_path().is_absolute() {
            debug!("Not copying external file {}", dependency.file_path().display());
            continue;
        }
        targets.entry(dependency.file_path()).or_default().push(dependency);
    }

    let mut generated = GenerationMap::new();
    for (path, configurations) in targets {
        generated.extend(generate_file(path, &configurations, source_dir, destination)?);
    }
    Ok(generated)
}

fn generate_file(
    file_path: &Path,
    configurations: &[&Dependency],
    source_dir: &Path,
    destination: &Path,
) -> Result<Vec<(PathBuf, GenerationInformation)>> {
    let source_path = source_dir.join(file_path);
    if !source_path.exists() {
        warn!("File {} does not exist, not generating.", file_path.display());
        return Ok(vec![]);
    }

    let destination_path = destination.join(file_path);
    if let Some(parent) = destination_path.parent() {
        fs::create_dir_all(parent).map_err(ComposerError::io(parent))?;
    }

    let mut result = Vec::new();
    let mut copied = false;
    let mut generated = false;
    for configuration in configurations {
        match configuration {
            Dependency::Compiled(info) => {
                result.push(generate_with_preamble(info, &source_path, destination)?);
                generated = true;
            }
            Dependency::Header(_) => {
                if !copied {
                    debug!("Copying {}", file_path.display());
                    fs::copy(&source_path, &destination_path).map_err(ComposerError::io(&destination_path))?;
                    copied = true;
                    result.push((file_path.to_path_buf(), GenerationInformation::new(file_path, 0)));
                }
            }
        }
    }

    assert!(generated || copied, "{} was neither copied nor generated", file_path.display());
    Ok(result)
}

fn generate_with_preamble(
    info: &InclusionInformation,
    source_path: &Path,
    destination: &Path,
) -> Result<(PathBuf, GenerationInformation)> {
    debug!("Generating {} with preprocessor directives", info.file_path.display());
    let relative = info.composed_file_path();
    let destination_path = destination.join(&relative);

    let content = fs::read(source_path).map_err(ComposerError::io(source_path))?;
    let mut file = fs::File::create(&destination_path).map_err(ComposerError::io(&destination_path))?;
    file.write_all(preamble(info).as_bytes())
        .and_then(|_| file.write_all(&content))
        .map_err(ComposerError::io(&destination_path))?;

    Ok((relative, GenerationInformation::new(&info.file_path, info.added_lines())))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use test_log::test;

    use super::*;

    fn compiled(file: &str, includes: &[&str], defines: &[(&str, &str)]) -> InclusionInformation {
        InclusionInformation::new(
            file,
            includes.iter().map(PathBuf::from).collect::<BTreeSet<_>>(),
            defines.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            vec![],
            vec![],
        )
    }

    fn setup() -> (tempfile::TempDir, tempfile::TempDir) {
        let source = tempfile::tempdir().unwrap();
        fs::create_dir_all(source.path().join("src")).unwrap();
        fs::create_dir_all(source.path().join("include")).unwrap();
        fs::write(source.path().join("src/main.c"), "int main(void) {\n    return 0;\n}\n").unwrap();
        fs::write(source.path().join("include/config.h"), "#define CONFIG_A 1\n").unwrap();
        (source, tempfile::tempdir().unwrap())
    }

    #[test]
    fn test_preamble() {
        let info = compiled("src/main.c", &["include/config.h"], &[("A", "1"), ("B", "\"x\"")]);
        assert_eq!(
            preamble(&info),
            "#define A 1\n#define B \"x\"\n#include \"../include/config.h\"\n"
        );
    }

    #[test]
    fn test_generate_compiled_and_header() {
        let (source, out) = setup();
        let info = compiled("src/main.c", &["include/config.h"], &[("FEATURE_X", "")]);
        let deps = vec![
            Dependency::Compiled(info.clone()),
            Dependency::header("include/config.h"),
            Dependency::header("include/config.h"),
            Dependency::header("/usr/include/stdio.h"),
        ];

        let generated = generate_files(&deps, source.path(), out.path()).unwrap();
        assert_eq!(generated.len(), 2);

        let composed = info.composed_file_path();
        assert_eq!(generated[&composed], GenerationInformation::new("src/main.c", 2));
        assert_eq!(
            generated[Path::new("include/config.h")],
            GenerationInformation::new("include/config.h", 0)
        );

        let text = fs::read_to_string(out.path().join(&composed)).unwrap();
        assert_eq!(
            text,
            "#define FEATURE_X \n#include \"../include/config.h\"\nint main(void) {\n    return 0;\n}\n"
        );
        assert_eq!(
            fs::read_to_string(out.path().join("include/config.h")).unwrap(),
            "#define CONFIG_A 1\n"
        );
        assert!(!out.path().join("usr").exists());
    }

    #[test]
    fn test_generate_two_variants() {
        let (source, out) = setup();
        let a = compiled("src/main.c", &[], &[("X", "")]);
        let b = compiled("src/main.c", &[], &[]);
        let deps = vec![Dependency::Compiled(a.clone()), Dependency::Compiled(b.clone())];

        let generated = generate_files(&deps, source.path(), out.path()).unwrap();
        assert_eq!(generated.len(), 2);
        assert_ne!(a.composed_file_path(), b.composed_file_path());
        assert!(out.path().join(a.composed_file_path()).exists());
        assert!(out.path().join(b.composed_file_path()).exists());
    }

    #[test]
    fn test_missing_file_skipped() {
        let (source, out) = setup();
        let deps = vec![Dependency::header("include/missing.h")];
        let generated = generate_files(&deps, source.path(), out.path()).unwrap();
        assert!(generated.is_empty());
    }

    #[test]
    #[should_panic(expected = "neither copied nor generated")]
    fn test_file_without_configuration() {
        let (source, out) = setup();
        let _ = generate_file(Path::new("src/main.c"), &[], source.path(), out.path());
    }

    #[test]
    fn test_idempotent() {
        let (source, out) = setup();
        let info = compiled("src/main.c", &["include/config.h"], &[("A", "1")]);
        let deps = vec![Dependency::Compiled(info), Dependency::header("include/config.h")];

        let first = generate_files(&deps, source.path(), out.path()).unwrap();
        let out2 = tempfile::tempdir().unwrap();
        let second = generate_files(&deps, source.path(), out2.path()).unwrap();
        assert_eq!(first, second);
        for path in first.keys() {
            assert_eq!(fs::read(out.path().join(path)).unwrap(), fs::read(out2.path().join(path)).unwrap());
        }
    }
}
