//! A configuration-preserving C preprocessor.
//!
//! Instead of picking one branch of each conditional, all feasible branches are visited and
//! the condition under which each line is reached is tracked symbolically in a
//! [`ConditionSpace`]. Only conditional-compilation directives, macro definitions and
//! includes are interpreted; ordinary text is not macro-expanded.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::condition::ConditionSpace;
use crate::error::{ComposerError, Result};
use crate::preprocess::expr::Evaluator;
use crate::preprocess::lexer::{logical_lines, spell, tokenize, Token, TokenKind};
use crate::preprocess::macros::{Macro, MacroTable};
use crate::reference::Ref;
use crate::utils::normalize_path;

pub mod expr;
pub mod lexer;
pub mod macros;

/// Predefined macros of the host compiler that conditionals in real code commonly test.
pub const BUILTIN_MACROS: &str = "\
#define __STDC__ 1
#define __STDC_VERSION__ 201112L
#define __STDC_HOSTED__ 1
#define __GNUC__ 4
#define __GNUC_MINOR__ 2
#define __GNUC_PATCHLEVEL__ 1
#define __CHAR_BIT__ 8
#define __SIZEOF_INT__ 4
#define __SIZEOF_LONG__ 8
#define __SIZEOF_POINTER__ 8
#define __LP64__ 1
#define __x86_64__ 1
#define __linux__ 1
#define __linux 1
#define __unix__ 1
#define __ORDER_LITTLE_ENDIAN__ 1234
#define __ORDER_BIG_ENDIAN__ 4321
#define __BYTE_ORDER__ __ORDER_LITTLE_ENDIAN__
";

#[derive(Debug, Clone)]
pub struct PreprocessorOptions {
    /// Absolute `-I` directories.
    pub include_paths: Vec<PathBuf>,
    /// Absolute `-isystem` directories.
    pub system_include_paths: Vec<PathBuf>,
    pub max_include_depth: usize,
}

impl Default for PreprocessorOptions {
    fn default() -> Self {
        Self {
            include_paths: Vec::new(),
            system_include_paths: Vec::new(),
            max_include_depth: 200,
        }
    }
}

/// Condition in effect at each physical line of the main file, 1-based.
pub type LineCaptures = BTreeMap<usize, Ref>;

/// One open `#if` group.
#[derive(Debug, Copy, Clone)]
struct Frame {
    /// Condition in effect before the group.
    parent: Ref,
    /// Disjunction of the conditions of all branches seen so far.
    taken: Ref,
    /// Condition of the current branch, including `parent`.
    active: Ref,
}

pub struct Preprocessor<'a> {
    space: &'a mut ConditionSpace,
    macros: MacroTable,
    options: &'a PreprocessorOptions,
    is_free: &'a dyn Fn(&str) -> bool,
    once: HashSet<PathBuf>,
    depth: usize,
}

impl<'a> Preprocessor<'a> {
    /// Definitions of macros for which `is_free` holds are ignored, so that they stay free
    /// variables of every condition.
    pub fn new(
        space: &'a mut ConditionSpace,
        options: &'a PreprocessorOptions,
        is_free: &'a dyn Fn(&str) -> bool,
    ) -> Self {
        Self {
            space,
            macros: MacroTable::new(),
            options,
            is_free,
            once: HashSet::new(),
            depth: 0,
        }
    }

    pub fn macros(&self) -> &MacroTable {
        &self.macros
    }

    /// Preprocess `text` as if it were the file `path`, without capturing conditions.
    pub fn inject(&mut self, path: &Path, text: &str) {
        let base = self.space.one();
        self.process(path, text, base, None);
    }

    /// Preprocess the main file and return the condition of each of its lines.
    pub fn run(&mut self, path: &Path) -> Result<LineCaptures> {
        let bytes = fs::read(path).map_err(ComposerError::io(path))?;
        let text = String::from_utf8_lossy(&bytes);
        let mut captures = LineCaptures::new();
        let base = self.space.one();
        self.process(path, &text, base, Some(&mut captures));
        Ok(captures)
    }

    fn process(&mut self, path: &Path, text: &str, base: Ref, mut captures: Option<&mut LineCaptures>) {
        let tokens = tokenize(text);
        let mut stack: Vec<Frame> = Vec::new();
        let mut last_line = 0;

        for (index, line) in logical_lines(&tokens).into_iter().enumerate() {
            let current = stack.last().map_or(base, |f| f.active);

            if let Some(captures) = captures.as_deref_mut() {
                // Blank lines before a token take the condition of that token.
                let end = line.last().map_or(last_line, |t| t.end_line);
                for l in last_line + 1..=end {
                    captures.insert(l, current);
                }
                last_line = last_line.max(end);
            }

            if line[0].is("#") {
                self.directive(path, &line[1..], &mut stack, current, index == 0);
            }
        }

        if !stack.is_empty() {
            warn!("{} unterminated conditional(s) at end of {}", stack.len(), path.display());
        }
    }

    /// `at_start` marks the first line of the file, where an `#ifndef` is read as an include guard.
    fn directive(&mut self, path: &Path, tokens: &[Token], stack: &mut Vec<Frame>, current: Ref, at_start: bool) {
        let Some((name, args)) = tokens.split_first() else {
            return;
        };
        let bdd_zero = self.space.zero();

        match name.text.as_str() {
            "if" | "ifdef" | "ifndef" => {
                let frame = if current == bdd_zero {
                    Frame {
                        parent: current,
                        taken: self.space.one(),
                        active: bdd_zero,
                    }
                } else {
                    let c = match args.first() {
                        Some(guard) if at_start && name.is("ifndef") && self.is_include_guard(&guard.text) => {
                            debug!("Treating {} as include guard of {}", guard.text, path.display());
                            self.space.one()
                        }
                        _ => self.branch_condition(&name.text, args),
                    };
                    Frame {
                        parent: current,
                        taken: c,
                        active: self.space.bdd().apply_and(current, c),
                    }
                };
                stack.push(frame);
            }
            "elif" | "elifdef" | "elifndef" => {
                let Some(mut frame) = stack.pop() else {
                    warn!("#{} without #if in {}", name.text, path.display());
                    return;
                };
                let open = self.space.bdd().apply_and(frame.parent, -frame.taken);
                if open == bdd_zero {
                    frame.active = bdd_zero;
                } else {
                    let c = self.branch_condition(&name.text, args);
                    let bdd = self.space.bdd();
                    frame.active = bdd.apply_and(open, c);
                    frame.taken = bdd.apply_or(frame.taken, c);
                }
                stack.push(frame);
            }
            "else" => match stack.last_mut() {
                Some(frame) => {
                    frame.active = self.space.bdd().apply_and(frame.parent, -frame.taken);
                    frame.taken = self.space.one();
                }
                None => warn!("#else without #if in {}", path.display()),
            },
            "endif" => {
                if stack.pop().is_none() {
                    warn!("#endif without #if in {}", path.display());
                }
            }
            _ if current == bdd_zero => {}
            "define" => match Macro::parse(args) {
                Some((macro_name, _)) if (self.is_free)(&macro_name) => {
                    debug!("Ignoring definition of feature macro {}", macro_name);
                }
                Some((macro_name, definition)) => self.macros.define(self.space, &macro_name, definition, current),
                None => debug!("Malformed #define in {}", path.display()),
            },
            "undef" => match args.first() {
                Some(t) if (self.is_free)(&t.text) => {}
                Some(t) => self.macros.undefine(self.space, &t.text, current),
                None => debug!("Malformed #undef in {}", path.display()),
            },
            "include" | "include_next" | "import" => self.include(path, args, current),
            "pragma" if args.first().is_some_and(|t| t.is("once")) => {
                self.once.insert(normalize_path(path));
            }
            // #error, #warning, #line, #pragma, #ident and line markers do not affect conditions.
            _ => {}
        }
    }

    /// An `#ifndef` on a macro no directive has mentioned yet, and which is not a feature.
    fn is_include_guard(&self, name: &str) -> bool {
        !(self.is_free)(name) && !self.macros.contains(name)
    }

    fn branch_condition(&mut self, directive: &str, args: &[Token]) -> Ref {
        match directive {
            "if" | "elif" => Evaluator::new(self.space, &self.macros, self.is_free).condition(args),
            _ => {
                let Some(name) = args.first().filter(|t| t.kind == TokenKind::Identifier) else {
                    return self.space.opaque(&format!("#{} {}", directive, spell(args)));
                };
                let defined = self.macros.defined(self.space, &name.text);
                if directive.ends_with("ndef") {
                    -defined
                } else {
                    defined
                }
            }
        }
    }

    fn include(&mut self, path: &Path, args: &[Token], condition: Ref) {
        let (name, quoted) = match args {
            [t] if t.kind == TokenKind::String => (t.text.trim_matches('"').to_string(), true),
            [open, inner @ .., close] if open.is("<") && close.is(">") => {
                (inner.iter().map(|t| t.text.as_str()).collect::<String>(), false)
            }
            _ => {
                debug!("Skipping computed include `{}` in {}", spell(args), path.display());
                return;
            }
        };

        if self.depth >= self.options.max_include_depth {
            warn!(
                "Include depth limit {} reached in {}, not following {}",
                self.options.max_include_depth,
                path.display(),
                name
            );
            return;
        }

        let Some(resolved) = self.resolve(path, &name, quoted) else {
            debug!("Could not find {} included from {}", name, path.display());
            return;
        };
        if self.once.contains(&resolved) {
            return;
        }
        let text = match fs::read(&resolved) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!("Could not read {}: {}", resolved.display(), e);
                return;
            }
        };

        self.depth += 1;
        self.process(&resolved, &text, condition, None);
        self.depth -= 1;
    }

    fn resolve(&self, path: &Path, name: &str, quoted: bool) -> Option<PathBuf> {
        let name = Path::new(name);
        if name.is_absolute() {
            return name.is_file().then(|| normalize_path(name));
        }
        let current_dir = path.parent().filter(|_| quoted).map(Path::to_path_buf);
        current_dir
            .into_iter()
            .chain(self.options.include_paths.iter().cloned())
            .chain(self.options.system_include_paths.iter().cloned())
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
            .map(|candidate| normalize_path(&candidate))
    }
}
