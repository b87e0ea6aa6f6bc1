//! Resolution of compiled files into the full set of files they pull in.
//!
//! For each compiled file the compiler is asked for a make rule listing its prerequisites
//! (`-M -MG`), using the same defines and forced includes as the real build. This is an
//! approximation: the relative order of several `-include` files is not modelled.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::{debug, error, info, warn};
use regex::Regex;

use crate::error::{ComposerError, Result};
use crate::inclusion::{Dependency, InclusionInformation};
use crate::process::{display_command, run_command, CancellationToken};

fn header_file_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^.*\.(?:h|H|hpp|hxx|h\+\+)$").unwrap())
}

pub fn is_header(path: &str) -> bool {
    header_file_regex().is_match(path)
}

/// Produces the prerequisite list of a single compiled file.
pub trait DependencyScanner {
    /// Return the make rule describing the prerequisites of `info.file_path`.
    ///
    /// `source_dir` is the root all relative paths in `info` refer to.
    fn make_rule(&self, info: &InclusionInformation, source_dir: &Path, token: &CancellationToken) -> Result<String>;
}

/// Scanner backed by a real compiler run with `-M -MG`.
#[derive(Debug, Clone)]
pub struct GccScanner {
    compiler: String,
}

impl GccScanner {
    pub fn new(compiler: impl Into<String>) -> Self {
        Self {
            compiler: compiler.into(),
        }
    }

    fn arguments(info: &InclusionInformation) -> Vec<String> {
        let mut args = Vec::new();
        for path in &info.include_paths {
            args.push(format!("-I{}", path.display()));
        }
        for path in &info.system_include_paths {
            args.push("-isystem".to_string());
            args.push(path.display().to_string());
        }
        for (name, value) in &info.defines {
            args.push(format!("-D{}={}", name, value));
        }
        for include in &info.included_files {
            args.push("-include".to_string());
            args.push(include.display().to_string());
        }
        args.push("-M".to_string());
        args.push("-MG".to_string());
        args.push(info.file_path.display().to_string());
        args
    }
}

impl Default for GccScanner {
    fn default() -> Self {
        Self::new("gcc")
    }
}

impl DependencyScanner for GccScanner {
    fn make_rule(&self, info: &InclusionInformation, source_dir: &Path, token: &CancellationToken) -> Result<String> {
        let args = Self::arguments(info);
        let output = run_command(&self.compiler, &args, source_dir, &[("LANG", "C")], token)?;
        if !output.success() {
            error!("{} failed with the following error: {}", self.compiler, output.stderr);
            error!("Its output was: {}", output.stdout);
            error!("The command was: {}", display_command(&self.compiler, &args));
            return Err(ComposerError::DependencyResolution {
                file: info.file_path.clone(),
                exit_code: output.status.code(),
                stderr: output.stderr,
            });
        }
        Ok(output.stdout)
    }
}

/// Split a make rule into its prerequisites.
pub fn parse_make_rule(rule: &str) -> Vec<String> {
    let prerequisites = match rule.find(':') {
        Some(colon) => &rule[colon + 1..],
        None => rule,
    };
    prerequisites
        .replace('\\', "")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Turn the prerequisites of `info` into dependencies.
///
/// Headers become [`Dependency::Header`]. Other files become [`Dependency::Compiled`] and inherit
/// the flags of `info`, minus themselves in the forced-include set.
pub fn dependencies_from_rule(info: &InclusionInformation, rule: &str) -> Vec<Dependency> {
    parse_make_rule(rule)
        .into_iter()
        .map(|dep| {
            if is_header(&dep) {
                Dependency::header(&dep)
            } else {
                let dep_path = PathBuf::from(&dep);
                Dependency::Compiled(InclusionInformation::new(
                    &dep_path,
                    info.included_files
                        .iter()
                        .filter(|included| **included != dep_path)
                        .cloned()
                        .collect(),
                    info.defines.clone(),
                    info.include_paths.clone(),
                    info.system_include_paths.clone(),
                ))
            }
        })
        .collect()
}

/// Resolve all compiled files into the set of dependencies of the variant.
///
/// Files that do not exist (e.g. ones generated during a full build) are skipped with a warning.
/// A failing scanner run aborts the whole resolution.
pub fn resolve_dependencies(
    compiled: &[InclusionInformation],
    source_dir: &Path,
    scanner: &dyn DependencyScanner,
    token: &CancellationToken,
) -> Result<HashSet<Dependency>> {
    info!("Getting dependencies");
    let mut dependencies = HashSet::new();
    for file in compiled {
        token.check()?;
        dependencies.insert(Dependency::Compiled(file.clone()));

        if !source_dir.join(&file.file_path).exists() {
            warn!("File {} does not exist, skipping dependency calculation", file.file_path.display());
            continue;
        }

        debug!("Getting dependencies of {}", file.file_path.display());
        let rule = scanner.make_rule(file, source_dir, token)?;
        let found = dependencies_from_rule(file, &rule);
        debug!("Found {} dependencies", found.len());
        dependencies.extend(found);
    }
    debug!("Found {} dependencies in total", dependencies.len());
    Ok(dependencies)
}

/// Whether the dependency lies outside the source tree and is therefore not copied.
pub fn is_external(dependency: &Dependency) -> bool {
    dependency.file_path().is_absolute()
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet, HashMap};
    use std::fs;

    use test_log::test;

    use super::*;

    struct FakeScanner(HashMap<PathBuf, String>);

    impl DependencyScanner for FakeScanner {
        fn make_rule(&self, info: &InclusionInformation, _: &Path, _: &CancellationToken) -> Result<String> {
            Ok(self.0.get(&info.file_path).cloned().unwrap_or_default())
        }
    }

    fn compiled(file: &str, includes: &[&str]) -> InclusionInformation {
        InclusionInformation::new(
            file,
            includes.iter().map(PathBuf::from).collect(),
            BTreeMap::from([("X".to_string(), "1".to_string())]),
            vec![PathBuf::from("include")],
            vec![],
        )
    }

    #[test]
    fn test_parse_make_rule() {
        let rule = "main.o: main.c include/a.h \\\n  /usr/include/stdio.h \\\n  gen/b.h\n";
        assert_eq!(
            parse_make_rule(rule),
            vec!["main.c", "include/a.h", "/usr/include/stdio.h", "gen/b.h"]
        );
        assert!(parse_make_rule("x.o:").is_empty());
    }

    #[test]
    fn test_header_pattern() {
        for h in ["a.h", "dir/a.H", "a.hpp", "a.hxx", "a.h++"] {
            assert!(is_header(h), "{}", h);
        }
        for c in ["a.c", "a.hh", "a.h.c", "a.inc"] {
            assert!(!is_header(c), "{}", c);
        }
    }

    #[test]
    fn test_dependencies_from_rule() {
        let info = compiled("main.c", &["config.h", "extra.c"]);
        let deps = dependencies_from_rule(&info, "main.o: main.c config.h extra.c /usr/include/stdio.h");
        assert_eq!(deps.len(), 4);
        assert_eq!(deps[1], Dependency::header("config.h"));
        assert!(is_external(&deps[3]));

        let Dependency::Compiled(extra) = &deps[2] else {
            panic!("extra.c should be compiled");
        };
        assert_eq!(extra.included_files, BTreeSet::from([PathBuf::from("config.h")]));
        assert_eq!(extra.defines, info.defines);
        assert_eq!(extra.include_paths, info.include_paths);

        // The file itself inherits everything, so it is the same variant.
        assert_eq!(deps[0], Dependency::Compiled(info.clone()));
    }

    #[test]
    fn test_resolve_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.c"), "int main;\n").unwrap();
        let scanner = FakeScanner(HashMap::from([(PathBuf::from("main.c"), "main.o: main.c a.h b.h".to_string())]));

        let files = vec![compiled("main.c", &[]), compiled("missing.c", &[])];
        let deps = resolve_dependencies(&files, dir.path(), &scanner, &CancellationToken::new()).unwrap();

        assert!(deps.contains(&Dependency::Compiled(files[0].clone())));
        assert!(deps.contains(&Dependency::Compiled(files[1].clone())));
        assert!(deps.contains(&Dependency::header("a.h")));
        assert!(deps.contains(&Dependency::header("b.h")));
        assert_eq!(deps.len(), 4);
    }

    #[test]
    fn test_resolve_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let scanner = FakeScanner(HashMap::new());
        let err = resolve_dependencies(&[compiled("a.c", &[])], Path::new("."), &scanner, &token).unwrap_err();
        assert!(err.is_interrupted());
    }

    #[test]
    fn test_gcc_arguments() {
        let info = compiled("src/main.c", &["config.h"]);
        assert_eq!(
            GccScanner::arguments(&info),
            vec!["-Iinclude", "-DX=1", "-include", "config.h", "-M", "-MG", "src/main.c"]
        );
    }

    #[test]
    fn test_gcc_scanner() {
        let token = CancellationToken::new();
        if run_command("gcc", &["--version".to_string()], Path::new("."), &[], &token).is_err() {
            println!("gcc not available, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("include")).unwrap();
        fs::write(dir.path().join("include/a.h"), "#define A 1\n").unwrap();
        fs::write(dir.path().join("src.c"), "#include \"a.h\"\n#include \"generated.h\"\nint x = A;\n").unwrap();
        let info = InclusionInformation::new("src.c", BTreeSet::new(), BTreeMap::new(), vec![PathBuf::from("include")], vec![]);

        let rule = GccScanner::default().make_rule(&info, dir.path(), &token).unwrap();
        let deps = parse_make_rule(&rule);
        assert!(deps.contains(&"src.c".to_string()));
        assert!(deps.contains(&"include/a.h".to_string()));
        assert!(deps.contains(&"generated.h".to_string()));

        let broken = InclusionInformation::new("src.c", BTreeSet::new(), BTreeMap::new(), vec![], vec![]);
        fs::write(dir.path().join("src.c"), "#error broken\n").unwrap();
        let err = GccScanner::default().make_rule(&broken, dir.path(), &token).unwrap_err();
        assert!(matches!(err, ComposerError::DependencyResolution { .. }));
    }
}
