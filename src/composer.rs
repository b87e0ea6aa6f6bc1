//! Composition of a single configuration of a Kconfig/Kbuild project.
//!
//! A [`Composer`] owns a scratch directory with a copy of the source tree and drives the build
//! system through the steps below. Each step is only valid in one state; a failing step leaves
//! the composer [`Failed`](ComposerState::Failed), and it must be discarded.
//!
//! ```text
//! Initialized -> SourceCopied -> ConfigWritten -> PreparedForDependencyDetection
//!             -> DependenciesResolved -> FilesGenerated -> Composed
//! ```
//!
//! A composed composer can compose the next configuration, reusing its copy of the sources.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::condition::{self, SharedConditionSpace};
use crate::config::ComposerConfig;
use crate::dependency::{self, DependencyScanner, GccScanner};
use crate::dotconfig;
use crate::error::{ComposerError, Result};
use crate::feature::FeatureModel;
use crate::generate::{self, GenerationMap};
use crate::inclusion::{Dependency, InclusionInformation, LanguageInformation};
use crate::presence::{
    CombinedMapper, EmptyMapper, FileConditionMapper, LineConditions, LineContext, PresenceConditionMapper,
};
use crate::process::CancellationToken;
use crate::source_map::{ComposedSourceMap, SourceMap};
use crate::strategy::{self, BuildContext, ComposerStrategy};
use crate::trace::extract_invocations;
use crate::utils::normalize_path;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ComposerState {
    Initialized,
    SourceCopied,
    ConfigWritten,
    PreparedForDependencyDetection,
    DependenciesResolved,
    FilesGenerated,
    Composed,
    Failed,
}

/// The result of composing one configuration.
pub struct Composition {
    /// Root of the composed tree.
    pub output: PathBuf,
    pub features: BTreeMap<String, bool>,
    pub source_map: Arc<dyn SourceMap>,
    pub presence: Arc<dyn PresenceConditionMapper>,
    pub language: LanguageInformation,
}

pub struct Composer {
    config: ComposerConfig,
    strategy: Box<dyn ComposerStrategy>,
    scanner: Box<dyn DependencyScanner + Send>,
    model: FeatureModel,
    space: SharedConditionSpace,
    token: CancellationToken,
    state: ComposerState,
    file_conditions: Option<Arc<FileConditionMapper>>,
    dependencies: HashSet<Dependency>,
    generation: GenerationMap,
}

/// Copy `from` to `to`, leaving out version control metadata.
pub fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    let entries = WalkDir::new(from)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");
    for entry in entries {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(from).to_path_buf();
            ComposerError::Io {
                path,
                source: e.into(),
            }
        })?;
        let relative = entry.path().strip_prefix(from).unwrap_or(entry.path());
        let target = to.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(ComposerError::io(&target))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(ComposerError::io(&target))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    let destination = fs::read_link(link).map_err(ComposerError::io(link))?;
    std::os::unix::fs::symlink(destination, target).map_err(ComposerError::io(target))
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    fs::copy(link, target).map_err(ComposerError::io(target))?;
    Ok(())
}

impl Composer {
    /// A composer using the strategy of `config.system` and the configured compiler.
    pub fn new(config: ComposerConfig, model: FeatureModel, token: CancellationToken) -> Self {
        let strategy = strategy::for_system(config.system);
        let scanner = Box::new(GccScanner::new(config.compiler.clone()));
        Self::with_parts(config, strategy, scanner, model, condition::shared(), token)
    }

    pub fn with_parts(
        config: ComposerConfig,
        strategy: Box<dyn ComposerStrategy>,
        scanner: Box<dyn DependencyScanner + Send>,
        model: FeatureModel,
        space: SharedConditionSpace,
        token: CancellationToken,
    ) -> Self {
        Self {
            config,
            strategy,
            scanner,
            model,
            space,
            token,
            state: ComposerState::Initialized,
            file_conditions: None,
            dependencies: HashSet::new(),
            generation: GenerationMap::new(),
        }
    }

    pub fn state(&self) -> ComposerState {
        self.state
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    fn source_dir(&self) -> PathBuf {
        self.config.source_copy_dir()
    }

    fn transition<T>(
        &mut self,
        expected: ComposerState,
        next: ComposerState,
        step: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        if self.state != expected {
            return Err(ComposerError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        match step(self) {
            Ok(value) => {
                self.state = next;
                Ok(value)
            }
            Err(e) => {
                debug!("Composer failed in state {:?}: {}", expected, e);
                self.state = ComposerState::Failed;
                Err(e)
            }
        }
    }

    /// Copy the sources to the scratch directory, unless an earlier run already did.
    pub fn copy_source(&mut self) -> Result<()> {
        self.transition(ComposerState::Initialized, ComposerState::SourceCopied, |this| {
            let target = this.source_dir();
            if target.exists() {
                info!("Reusing source copy at {}", target.display());
                return Ok(());
            }
            info!("Copying source");
            copy_tree(&this.config.source, &target)
        })
    }

    /// Configure the tree for `features`, starting from the default configuration.
    pub fn write_config(&mut self, features: &BTreeMap<String, bool>) -> Result<()> {
        self.transition(ComposerState::SourceCopied, ComposerState::ConfigWritten, |this| {
            let source_dir = this.source_dir();
            let ctx = BuildContext::new(&source_dir, &this.config.make, &this.token);
            this.strategy.clean(&ctx)?;

            info!("Generating .config");
            this.strategy.generate_defconfig(&ctx)?;
            let config_path = this.strategy.config_path(&source_dir);
            let strategy = &this.strategy;
            dotconfig::write_config(&config_path, features, |f| strategy.is_ignored_feature(f))?;
            this.strategy.process_written_config(&ctx)?;

            let mismatched = dotconfig::verify_config(&config_path, features, |f| strategy.is_ignored_feature(f))?;
            if !mismatched.is_empty() {
                warn!("{} options could not be set", mismatched.len());
            }
            Ok(())
        })
    }

    pub fn prepare_dependency_detection(&mut self) -> Result<()> {
        self.transition(
            ComposerState::ConfigWritten,
            ComposerState::PreparedForDependencyDetection,
            |this| {
                let source_dir = this.source_dir();
                let ctx = BuildContext::new(&source_dir, &this.config.make, &this.token);
                this.strategy.prepare_dependency_detection(&ctx)
            },
        )
    }

    /// Find the compiled files of the configured build and everything they include.
    pub fn resolve_dependencies(&mut self) -> Result<()> {
        self.transition(
            ComposerState::PreparedForDependencyDetection,
            ComposerState::DependenciesResolved,
            |this| {
                let source_dir = this.source_dir();
                let ctx = BuildContext::new(&source_dir, &this.config.make, &this.token);

                info!("Determining files to be included");
                let trace = this.strategy.trace(&ctx)?;
                let invocations = extract_invocations(&trace)?;
                debug!("Found {} compiler invocations", invocations.len());

                let compiled: Vec<InclusionInformation> = invocations
                    .iter()
                    .flat_map(|call| InclusionInformation::from_invocation(call, &source_dir, &source_dir))
                    .collect();
                this.dependencies =
                    dependency::resolve_dependencies(&compiled, &source_dir, this.scanner.as_ref(), &this.token)?;
                Ok(())
            },
        )
    }

    /// Write the composed tree to `destination`.
    pub fn generate_files(&mut self, destination: &Path) -> Result<()> {
        self.transition(
            ComposerState::DependenciesResolved,
            ComposerState::FilesGenerated,
            |this| {
                fs::create_dir_all(destination).map_err(ComposerError::io(destination))?;
                this.generation = generate::generate_files(&this.dependencies, &this.source_dir(), destination)?;
                debug!("Generated {} files", this.generation.len());
                Ok(())
            },
        )
    }

    /// Build the source map and presence conditions of the generated tree.
    pub fn finish(&mut self, features: &BTreeMap<String, bool>, destination: &Path) -> Result<Composition> {
        self.transition(ComposerState::FilesGenerated, ComposerState::Composed, |this| {
            let source_map = Arc::new(ComposedSourceMap::new(this.generation.clone(), &this.source_dir()));
            let presence = this.presence_mapper(&source_map)?;
            Ok(Composition {
                output: destination.to_path_buf(),
                features: features.clone(),
                source_map,
                presence,
                language: LanguageInformation::from_dependencies(&this.dependencies),
            })
        })
    }

    /// Run all remaining steps for `features`.
    ///
    /// A composer that already composed a configuration starts again from its source copy.
    pub fn compose(&mut self, features: &BTreeMap<String, bool>, destination: &Path) -> Result<Composition> {
        if self.state == ComposerState::Composed {
            self.reset();
        }
        if self.state == ComposerState::Initialized {
            self.copy_source()?;
        }
        self.write_config(features)?;
        self.prepare_dependency_detection()?;
        self.resolve_dependencies()?;
        self.generate_files(destination)?;
        self.finish(features, destination)
    }

    fn reset(&mut self) {
        self.dependencies.clear();
        self.generation.clear();
        self.state = ComposerState::SourceCopied;
    }

    fn load_file_conditions(&mut self) -> Result<Option<Arc<FileConditionMapper>>> {
        if self.file_conditions.is_none() {
            if let Some(path) = &self.config.file_conditions {
                let mapper = FileConditionMapper::from_file(
                    path,
                    &self.source_dir(),
                    self.strategy.smtlib_prefix(),
                    &self.model,
                )?;
                debug!("Read {} file presence conditions", mapper.len());
                self.file_conditions = Some(Arc::new(mapper));
            }
        }
        Ok(self.file_conditions.clone())
    }

    fn presence_mapper(&mut self, source_map: &Arc<ComposedSourceMap>) -> Result<Arc<dyn PresenceConditionMapper>> {
        if !self.config.presence_conditions {
            info!("Skipping presence condition extraction");
            return Ok(Arc::new(EmptyMapper));
        }
        let Some(files) = self.load_file_conditions()? else {
            warn!(
                "No file presence conditions available for {}, all presence conditions are unknown",
                self.strategy.name()
            );
            return Ok(Arc::new(EmptyMapper));
        };

        info!("Creating line presence condition mappers");
        let source_dir = self.source_dir();
        let naming = self.strategy.feature_naming();
        let ctx = LineContext {
            source_dir: &source_dir,
            naming: &naming,
            model: &self.model,
            max_include_depth: self.config.max_include_depth,
        };

        let excludes: HashSet<PathBuf> = self
            .config
            .presence_condition_excludes
            .iter()
            .map(|path| normalize_path(path))
            .collect();

        let mut lines = HashMap::new();
        let mut excluded = Vec::new();
        for info in self.dependencies.iter().filter_map(Dependency::inclusion_information) {
            self.token.check()?;
            if info.file_path.is_absolute() || !source_dir.join(&info.file_path).exists() {
                continue;
            }
            let composed = info.composed_file_path();
            if !self.generation.contains_key(&composed) {
                continue;
            }
            if excludes.contains(&info.file_path) {
                debug!("File {} is excluded from presence condition extraction", info.file_path.display());
                excluded.push(composed);
                continue;
            }
            debug!("Creating line presence condition mapper for {}", composed.display());
            lines.insert(composed, LineConditions::extract(info, &self.space, &ctx)?);
        }

        Ok(Arc::new(
            CombinedMapper::new(source_map.clone(), files, lines).with_file_level_only(excluded),
        ))
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::config::System;
    use crate::feature::FeatureNaming;

    struct NoScanner;

    impl DependencyScanner for NoScanner {
        fn make_rule(&self, _: &InclusionInformation, _: &Path, _: &CancellationToken) -> Result<String> {
            Ok(String::new())
        }
    }

    /// Runs no build at all; the trace is fixed.
    struct StaticStrategy(String);

    impl ComposerStrategy for StaticStrategy {
        fn name(&self) -> &'static str {
            "static"
        }

        fn clean(&self, _: &BuildContext) -> Result<()> {
            Ok(())
        }

        fn generate_defconfig(&self, ctx: &BuildContext) -> Result<()> {
            fs::write(ctx.source_dir.join(".config"), "").map_err(ComposerError::io(ctx.source_dir))
        }

        fn process_written_config(&self, _: &BuildContext) -> Result<()> {
            Ok(())
        }

        fn trace(&self, _: &BuildContext) -> Result<String> {
            Ok(self.0.clone())
        }

        fn feature_naming(&self) -> FeatureNaming {
            FeatureNaming::Identity
        }
    }

    fn composer(source: &Path, tmp: &Path, trace: &str) -> Composer {
        let config = ComposerConfig::new(System::Generic, source, tmp);
        Composer::with_parts(
            config,
            Box::new(StaticStrategy(trace.to_string())),
            Box::new(NoScanner),
            FeatureModel::new(["A"]),
            condition::shared(),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_copy_tree() {
        let source = tempfile::tempdir().unwrap();
        fs::create_dir_all(source.path().join(".git/objects")).unwrap();
        fs::create_dir_all(source.path().join("src")).unwrap();
        fs::write(source.path().join(".git/HEAD"), "ref").unwrap();
        fs::write(source.path().join("src/a.c"), "int a;\n").unwrap();

        let target = tempfile::tempdir().unwrap();
        let target = target.path().join("copy");
        copy_tree(source.path(), &target).unwrap();
        assert_eq!(fs::read_to_string(target.join("src/a.c")).unwrap(), "int a;\n");
        assert!(!target.join(".git").exists());
    }

    #[test]
    fn test_steps_out_of_order() {
        let source = tempfile::tempdir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let mut composer = composer(source.path(), tmp.path(), "");
        let err = composer.resolve_dependencies().unwrap_err();
        assert!(matches!(
            err,
            ComposerError::InvalidState {
                expected: ComposerState::PreparedForDependencyDetection,
                actual: ComposerState::Initialized,
            }
        ));
        // An out of order call does not count as a failure.
        assert_eq!(composer.state(), ComposerState::Initialized);
    }

    #[test]
    fn test_failure_is_terminal() {
        let source = tempfile::tempdir().unwrap();
        fs::write(source.path().join("a.c"), "int a;\n").unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let mut composer = composer(source.path(), tmp.path(), "gcc -c 'unterminated");

        let features = BTreeMap::from([("A".to_string(), true)]);
        assert!(matches!(composer.compose(&features, out.path()), Err(ComposerError::Parse { .. })));
        assert_eq!(composer.state(), ComposerState::Failed);
        assert!(matches!(
            composer.compose(&features, out.path()),
            Err(ComposerError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_compose_without_presence_conditions() {
        let source = tempfile::tempdir().unwrap();
        fs::write(source.path().join("a.c"), "#ifdef A\nint a;\n#endif\n").unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let mut composer = composer(source.path(), tmp.path(), "gcc -DB=2 -c a.c\n");

        let features = BTreeMap::from([("A".to_string(), true)]);
        let composition = composer.compose(&features, out.path()).unwrap();
        assert_eq!(composer.state(), ComposerState::Composed);
        assert_eq!(
            fs::read_to_string(tmp.path().join("source/.config")).unwrap(),
            "CONFIG_A=y\n"
        );

        let generated = InclusionInformation::new(
            "a.c",
            Default::default(),
            BTreeMap::from([("B".to_string(), "2".to_string())]),
            vec![],
            vec![],
        )
        .composed_file_path();
        let text = fs::read_to_string(out.path().join(&generated)).unwrap();
        assert_eq!(text, "#define B 2\n#ifdef A\nint a;\n#endif\n");

        let original = composition
            .source_map
            .original_location(&crate::source_map::SourceLocation::new(&generated, 3))
            .unwrap();
        assert_eq!(original, crate::source_map::SourceLocation::new("a.c", 2));
        // No fact file is configured.
        assert_eq!(composition.presence.presence_condition(&generated, 3), None);

        // The next configuration reuses the composer.
        let features = BTreeMap::from([("A".to_string(), false)]);
        composer.compose(&features, out.path()).unwrap();
        assert_eq!(
            fs::read_to_string(tmp.path().join("source/.config")).unwrap(),
            "# CONFIG_A is not set\n"
        );
    }
}
