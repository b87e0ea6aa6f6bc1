//! Build system specific steps of a composition.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::{debug, info};
use regex::Regex;

use crate::config::System;
use crate::error::{ComposerError, Result};
use crate::feature::FeatureNaming;
use crate::process::{run_checked, CancellationToken, Output};

/// Environment of every make run.
const MAKE_ENV: &[(&str, &str)] = &[("LANG", "C")];

/// Environment of traced make runs. Implicit rules use `$(CC)`, which must name a compiler the
/// trace analyzer recognizes.
const TRACE_ENV: &[(&str, &str)] = &[("LANG", "C"), ("CC", "gcc")];

/// The tree a strategy works on and how to run make in it.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub source_dir: &'a Path,
    pub make: &'a str,
    pub token: &'a CancellationToken,
}

impl<'a> BuildContext<'a> {
    pub fn new(source_dir: &'a Path, make: &'a str, token: &'a CancellationToken) -> Self {
        Self {
            source_dir,
            make,
            token,
        }
    }

    /// Run make with `args` in the source directory. A non-zero exit status is an error.
    pub fn make(&self, args: &[&str]) -> Result<Output> {
        self.run(args, MAKE_ENV)
    }

    /// Like [`make`](Self::make), for runs whose output is analyzed as a build trace.
    pub fn make_traced(&self, args: &[&str]) -> Result<Output> {
        self.run(args, TRACE_ENV)
    }

    fn run(&self, args: &[&str], env: &[(&str, &str)]) -> Result<Output> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        run_checked(self.make, &args, self.source_dir, env, self.token)
    }
}

fn ignored_feature_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^__VISIBILITY__.*|^Root$").unwrap())
}

pub trait ComposerStrategy: Send {
    fn name(&self) -> &'static str;

    /// Bring the tree back to its unconfigured state.
    fn clean(&self, ctx: &BuildContext) -> Result<()> {
        ctx.make(&["distclean"])?;
        Ok(())
    }

    /// Write the default configuration to [`config_path`](Self::config_path).
    fn generate_defconfig(&self, ctx: &BuildContext) -> Result<()> {
        ctx.make(&["defconfig"])?;
        Ok(())
    }

    fn config_path(&self, source_dir: &Path) -> PathBuf {
        source_dir.join(".config")
    }

    /// Let the build system complete a hand-written configuration and generate its headers.
    fn process_written_config(&self, ctx: &BuildContext) -> Result<()> {
        ctx.make(&["oldconfig"])?;
        Ok(())
    }

    /// Generate whatever the compiler needs to resolve dependencies of a configured tree.
    fn prepare_dependency_detection(&self, _ctx: &BuildContext) -> Result<()> {
        Ok(())
    }

    /// Print the commands a build would run, without running them.
    fn trace(&self, ctx: &BuildContext) -> Result<String> {
        Ok(ctx.make_traced(&["-in"])?.stdout)
    }

    /// How preprocessor macros map to feature names.
    fn feature_naming(&self) -> FeatureNaming;

    /// Prefix of option names in file presence conditions.
    fn smtlib_prefix(&self) -> Option<&str> {
        Some("CONFIG_")
    }

    /// Whether `feature` is a modelling artifact that must not be written to `.config`.
    fn is_ignored_feature(&self, feature: &str) -> bool {
        ignored_feature_regex().is_match(feature)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BusyboxStrategy;

impl ComposerStrategy for BusyboxStrategy {
    fn name(&self) -> &'static str {
        "busybox"
    }

    fn clean(&self, ctx: &BuildContext) -> Result<()> {
        ctx.make(&["distclean"])?;
        // Busybox keeps Kbuild snippets inside its sources; this writes them out as Kbuild files.
        ctx.make(&["gen_build_files"])?;
        Ok(())
    }

    fn prepare_dependency_detection(&self, ctx: &BuildContext) -> Result<()> {
        // Generates headers such as `include/applet_tables.h`.
        ctx.make(&["applets"])?;
        // Part of the final executable, and would show up in the trace otherwise.
        let object = ctx.source_dir.join("applets/applets.o");
        match fs::remove_file(&object) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} does not exist", object.display());
                Ok(())
            }
            Err(e) => Err(ComposerError::io(object)(e)),
        }
    }

    fn feature_naming(&self) -> FeatureNaming {
        FeatureNaming::prefixes(["CONFIG_", "ENABLE_", "IF_"])
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxStrategy;

impl ComposerStrategy for LinuxStrategy {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn feature_naming(&self) -> FeatureNaming {
        FeatureNaming::prefixes(["CONFIG_"])
    }
}

/// Toybox builds through `scripts/make.sh`, which `make -n` does not look into.
#[derive(Debug, Default, Clone, Copy)]
pub struct ToyboxStrategy;

impl ToyboxStrategy {
    const BUILD_SCRIPT: &'static str = "scripts/make.sh";

    /// Make the build script print its compiler calls instead of running them, and stop
    /// before linking.
    pub fn patch_build_script(script: &str) -> String {
        static PATCHES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
        let patches = PATCHES.get_or_init(|| {
            vec![
                (
                    Regex::new(r"do_loudly \$BUILD -c \$i -o \$OUT &").unwrap(),
                    "echo $$BUILD -c $$i -o $$OUT",
                ),
                // Nothing runs in the background any more.
                (Regex::new(r"ratelimit .*").unwrap(), ":"),
                (Regex::new(r"do_loudly \$BUILD \$LNKFILES.*").unwrap(), "exit 0"),
            ]
        });
        patches.iter().fold(script.to_string(), |text, (re, replacement)| {
            re.replace_all(&text, *replacement).into_owned()
        })
    }
}

impl ComposerStrategy for ToyboxStrategy {
    fn name(&self) -> &'static str {
        "toybox"
    }

    fn prepare_dependency_detection(&self, ctx: &BuildContext) -> Result<()> {
        let path = ctx.source_dir.join(Self::BUILD_SCRIPT);
        let script = fs::read_to_string(&path).map_err(ComposerError::io(&path))?;
        let patched = Self::patch_build_script(&script);
        if patched != script {
            info!("Patching {}", path.display());
            fs::write(&path, patched).map_err(ComposerError::io(&path))?;
        }
        Ok(())
    }

    fn trace(&self, ctx: &BuildContext) -> Result<String> {
        // The patched script only echoes, so a real run builds nothing.
        Ok(ctx.make_traced(&[])?.stdout)
    }

    fn feature_naming(&self) -> FeatureNaming {
        FeatureNaming::prefixes(["CONFIG_"])
    }
}

/// A Kconfig project without extra steps, whose macros are named like its features.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericStrategy;

impl ComposerStrategy for GenericStrategy {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn feature_naming(&self) -> FeatureNaming {
        FeatureNaming::Identity
    }
}

pub fn for_system(system: System) -> Box<dyn ComposerStrategy> {
    match system {
        System::Busybox => Box::new(BusyboxStrategy),
        System::Linux => Box::new(LinuxStrategy),
        System::Toybox => Box::new(ToyboxStrategy),
        System::Generic => Box::new(GenericStrategy),
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_for_system() {
        assert_eq!(for_system(System::Busybox).name(), "busybox");
        assert_eq!(for_system(System::Linux).name(), "linux");
        assert_eq!(for_system(System::Toybox).name(), "toybox");
        assert_eq!(for_system(System::Generic).name(), "generic");
    }

    #[test]
    fn test_feature_naming() {
        let busybox = BusyboxStrategy.feature_naming();
        assert_eq!(busybox.feature_name("ENABLE_CAT"), Some("CAT"));
        assert_eq!(busybox.feature_name("IF_CAT"), Some("CAT"));
        assert_eq!(LinuxStrategy.feature_naming().feature_name("ENABLE_CAT"), None);
        assert_eq!(GenericStrategy.feature_naming().feature_name("FEATURE_X"), Some("FEATURE_X"));
    }

    #[test]
    fn test_ignored_features() {
        let strategy = GenericStrategy;
        assert!(strategy.is_ignored_feature("__VISIBILITY__CONFIG_FOO"));
        assert!(strategy.is_ignored_feature("Root"));
        assert!(!strategy.is_ignored_feature("RootFS"));
        assert!(!strategy.is_ignored_feature("FOO"));
    }

    #[test]
    fn test_config_path() {
        assert_eq!(LinuxStrategy.config_path(Path::new("/w/source")), PathBuf::from("/w/source/.config"));
    }

    #[test]
    fn test_patch_build_script() {
        let script = "for i in $FILES\ndo\n  do_loudly $BUILD -c $i -o $OUT &\n  ratelimit $CPUS\ndone\ndo_loudly $BUILD $LNKFILES -o toybox\n";
        let patched = ToyboxStrategy::patch_build_script(script);
        assert_eq!(
            patched,
            "for i in $FILES\ndo\n  echo $BUILD -c $i -o $OUT\n  :\ndone\nexit 0\n"
        );
        assert_eq!(ToyboxStrategy::patch_build_script(&patched), patched);
    }

    #[test]
    fn test_busybox_removes_applets_object() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("applets")).unwrap();
        fs::write(dir.path().join("applets/applets.o"), "").unwrap();
        // `true` accepts any arguments, standing in for make.
        let token = CancellationToken::new();
        let ctx = BuildContext::new(dir.path(), "true", &token);
        BusyboxStrategy.prepare_dependency_detection(&ctx).unwrap();
        assert!(!dir.path().join("applets/applets.o").exists());
        BusyboxStrategy.prepare_dependency_detection(&ctx).unwrap();
    }

    /// Records its arguments and environment instead of running make.
    fn recording_make(dir: &Path) -> PathBuf {
        let script = dir.join("make.sh");
        fs::write(&script, "#!/bin/sh\necho \"args=$* CC=$CC LANG=$LANG\"\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        }
        script
    }

    #[cfg(unix)]
    #[test]
    fn test_linux_uses_common_steps() {
        let dir = tempfile::tempdir().unwrap();
        let make = recording_make(dir.path());
        let make = make.to_string_lossy();
        let token = CancellationToken::new();
        let ctx = BuildContext::new(dir.path(), &make, &token);
        LinuxStrategy.process_written_config(&ctx).unwrap();
        LinuxStrategy.prepare_dependency_detection(&ctx).unwrap();
        assert_eq!(LinuxStrategy.trace(&ctx).unwrap(), "args=-in CC=gcc LANG=C\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_trace_sets_compiler() {
        let dir = tempfile::tempdir().unwrap();
        let make = recording_make(dir.path());
        let make = make.to_string_lossy();
        let token = CancellationToken::new();
        let ctx = BuildContext::new(dir.path(), &make, &token);
        assert_eq!(GenericStrategy.trace(&ctx).unwrap(), "args=-in CC=gcc LANG=C\n");
        assert!(ctx.make(&["oldconfig"]).unwrap().stdout.starts_with("args=oldconfig CC="));
    }

    fn has_make() -> bool {
        std::process::Command::new("make")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_trace_of_implicit_rule() {
        if !has_make() {
            eprintln!("make not found, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Makefile"), "all: main.o\n").unwrap();
        fs::write(dir.path().join("main.c"), "int main(void) { return 0; }\n").unwrap();
        let token = CancellationToken::new();
        let ctx = BuildContext::new(dir.path(), "make", &token);

        let trace = GenericStrategy.trace(&ctx).unwrap();
        let calls = crate::trace::extract_invocations(&trace).unwrap();
        assert_eq!(calls.len(), 1, "{}", trace);
        assert_eq!(calls[0].compiled_files, vec!["main.c".to_string()]);
    }

    #[test]
    fn test_failing_make() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let ctx = BuildContext::new(dir.path(), "false", &token);
        assert!(matches!(
            GenericStrategy.generate_defconfig(&ctx),
            Err(ComposerError::Subprocess { .. })
        ));
    }
}
