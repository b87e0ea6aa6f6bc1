//! # variant-composer: variability-aware composition for Kconfig/Kbuild projects
//!
//! **`variant-composer`** turns one feature configuration of a Kconfig/Kbuild C project into a
//! self-contained source tree that a code analyzer can consume without running the build
//! system, and answers two questions about every line of that tree:
//!
//! - where did it come from ([`source_map`]), and
//! - under which feature configurations is it present ([`presence`]).
//!
//! ## How a composition works
//!
//! The [`Composer`][crate::composer::Composer] copies the sources into a scratch directory and
//! configures them through a build-system [`strategy`]. It then asks the build for a dry run
//! and extracts the compiler invocations from the output ([`command`], [`trace`]). The
//! compiled files and the headers they pull in ([`dependency`]) are written to the output tree
//! with their command-line flags turned into directives ([`generate`]).
//!
//! Presence conditions combine two sources:
//!
//! - **file level**: SMT-LIB facts from a Kbuild extractor, parsed by [`smtlib`];
//! - **line level**: a configuration-preserving C preprocessor ([`preprocess`]) that tracks the
//!   condition of every line as a BDD over `defined(X)` atoms ([`condition`], [`bdd`]).
//!
//! Both are turned into [`Formula`][crate::formula::Formula]s over the features of a
//! [`FeatureModel`][crate::feature::FeatureModel].
//!
//! ## Basic usage
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use std::path::Path;
//!
//! use variant_composer::composer::Composer;
//! use variant_composer::config::{ComposerConfig, System};
//! use variant_composer::feature::FeatureModel;
//! use variant_composer::process::CancellationToken;
//!
//! let config = ComposerConfig::new(System::Busybox, "/src/busybox", "/tmp/worker-1");
//! let model = FeatureModel::from_dimacs(Path::new("/src/busybox.dimacs"))?;
//! let mut composer = Composer::new(config, model, CancellationToken::new());
//!
//! let features = BTreeMap::from([("CAT".to_string(), true), ("LS".to_string(), false)]);
//! let composition = composer.compose(&features, Path::new("/tmp/variant-1"))?;
//! let condition = composition.presence.presence_condition(Path::new("coreutils/cat.c"), 42);
//! # Ok::<(), variant_composer::error::ComposerError>(())
//! ```
//!
//! ## Concurrency
//!
//! Composers are independent of each other and can run on separate threads, one composer per
//! worker. Line-level extraction is the exception: all of it goes through one process-wide
//! [`SharedConditionSpace`][crate::condition::SharedConditionSpace] and is therefore
//! serialized.

pub mod bdd;
pub mod cache;
pub mod command;
pub mod composer;
pub mod condition;
pub mod config;
pub mod dependency;
pub mod dotconfig;
pub mod error;
pub mod feature;
pub mod formula;
pub mod generate;
pub mod inclusion;
pub mod preprocess;
pub mod presence;
pub mod process;
pub mod reference;
pub mod smtlib;
pub mod source_map;
pub mod strategy;
pub mod table;
pub mod trace;
pub mod utils;
