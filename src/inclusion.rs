//! Per-file compilation flags and the dependencies a variant consists of.

use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::trace::CompilerInvocation;
use crate::utils::{normalize_path, rebase_path};

/// How a single source file is compiled.
///
/// Two values are equal iff their file path, forced includes and defines match. Each
/// distinct value is one compiled variant of the file and is generated under its own
/// name (see [`InclusionInformation::composed_file_path`]).
#[derive(Debug, Clone, Serialize)]
pub struct InclusionInformation {
    /// Relative to the source root, unless the file lies outside of it.
    pub file_path: PathBuf,
    /// Files passed via `-include`.
    pub included_files: BTreeSet<PathBuf>,
    pub defines: BTreeMap<String, String>,
    pub include_paths: Vec<PathBuf>,
    pub system_include_paths: Vec<PathBuf>,
}

impl InclusionInformation {
    pub fn new(
        file_path: impl AsRef<Path>,
        included_files: BTreeSet<PathBuf>,
        defines: BTreeMap<String, String>,
        include_paths: Vec<PathBuf>,
        system_include_paths: Vec<PathBuf>,
    ) -> Self {
        Self {
            file_path: normalize_path(file_path.as_ref()),
            included_files,
            defines,
            include_paths,
            system_include_paths,
        }
    }

    /// One value per compiled file of `call`. All share the call's flags.
    ///
    /// Relative paths are resolved against the call's working directory (or `build_dir` if the
    /// trace did not announce one) and made relative to `source_dir` when they lie inside it.
    pub fn from_invocation(call: &CompilerInvocation, build_dir: &Path, source_dir: &Path) -> Vec<Self> {
        let base = call.working_directory.as_deref().unwrap_or(build_dir);
        let rebase = |p: &String| rebase_path(Path::new(p), base, source_dir);

        let included_files: BTreeSet<PathBuf> = call.includes.iter().map(rebase).collect();
        let include_paths: Vec<PathBuf> = call.include_paths.iter().map(rebase).collect();
        let system_include_paths: Vec<PathBuf> = call.system_include_paths.iter().map(rebase).collect();

        call.compiled_files
            .iter()
            .map(|file| {
                Self::new(
                    rebase(file),
                    included_files.clone(),
                    call.defines.clone(),
                    include_paths.clone(),
                    system_include_paths.clone(),
                )
            })
            .collect()
    }

    /// Number of lines the generator prepends for this file.
    pub fn added_lines(&self) -> usize {
        self.defines.len() + self.included_files.len()
    }

    /// Path of the generated file, relative to the output root.
    ///
    /// The name is `<stem>-<sha256>.<ext>` next to the original file. The hash covers the
    /// file path, the sorted forced includes and the sorted defines, so it is stable across
    /// runs and distinct for distinct values.
    pub fn composed_file_path(&self) -> PathBuf {
        let file_name = self
            .file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (stem, extension) = match file_name.rfind('.') {
            Some(dot) => file_name.split_at(dot),
            None => (file_name.as_str(), ""),
        };
        let name = format!("{}-{}{}", stem, self.content_hash(), extension);
        match self.file_path.parent() {
            Some(parent) => parent.join(name),
            None => PathBuf::from(name),
        }
    }

    fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.file_path.to_string_lossy().as_bytes());
        hasher.update([0]);
        // BTreeSet and BTreeMap iterate in sorted order.
        for include in &self.included_files {
            hasher.update(include.to_string_lossy().as_bytes());
            hasher.update([0]);
        }
        hasher.update([0]);
        for (name, value) in &self.defines {
            hasher.update(name.as_bytes());
            hasher.update([0]);
            hasher.update(value.as_bytes());
            hasher.update([0]);
        }
        format!("{:x}", hasher.finalize())
    }
}

impl PartialEq for InclusionInformation {
    fn eq(&self, other: &Self) -> bool {
        self.file_path == other.file_path && self.included_files == other.included_files && self.defines == other.defines
    }
}

impl Eq for InclusionInformation {}

impl Hash for InclusionInformation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.file_path.hash(state);
        self.included_files.hash(state);
        self.defines.hash(state);
    }
}

/// A file pulled into a variant.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Dependency {
    /// An independently compiled unit together with its flags.
    Compiled(InclusionInformation),
    /// A textually included header, relative to the source root.
    Header(PathBuf),
}

impl Dependency {
    pub fn header(path: impl AsRef<Path>) -> Self {
        Dependency::Header(normalize_path(path.as_ref()))
    }

    pub fn file_path(&self) -> &Path {
        match self {
            Dependency::Compiled(info) => &info.file_path,
            Dependency::Header(path) => path,
        }
    }

    pub fn inclusion_information(&self) -> Option<&InclusionInformation> {
        match self {
            Dependency::Compiled(info) => Some(info),
            Dependency::Header(_) => None,
        }
    }
}

/// Extra compiler semantics the analyzer cannot infer from the composed text alone.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LanguageInformation {
    Generic,
    Ccpp {
        include_paths: BTreeMap<PathBuf, Vec<PathBuf>>,
        system_include_paths: BTreeMap<PathBuf, Vec<PathBuf>>,
    },
}

impl LanguageInformation {
    /// Collect per composed file include paths of all compiled dependencies.
    pub fn from_dependencies<'a>(dependencies: impl IntoIterator<Item = &'a Dependency>) -> Self {
        let mut include_paths = BTreeMap::new();
        let mut system_include_paths = BTreeMap::new();
        for info in dependencies.into_iter().filter_map(Dependency::inclusion_information) {
            let composed = info.composed_file_path();
            include_paths.insert(composed.clone(), info.include_paths.clone());
            system_include_paths.insert(composed, info.system_include_paths.clone());
        }
        LanguageInformation::Ccpp {
            include_paths,
            system_include_paths,
        }
    }
}
