//! Compiler invocations recovered from a dry-run build trace.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use log::{debug, warn};
use regex::Regex;

use crate::command::parse_commands;
use crate::error::Result;

const COMMAND_PREFIXES: &[&str] = &["", "x86_64-linux-gnu-"];
const COMMAND_NAMES: &[&str] = &["gcc", "g++"];
const UNSUPPORTED_INCLUDE_OPTIONS: &[&str] = &["-iquote", "-idirafter", "-I-", "-iwithprefix", "-iwithprefixbefore"];

/// Options that consume the following argument.
const OPTIONS_WITH_VALUE: &[&str] = &["-I", "-isystem", "-include"];

fn source_file_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Names starting with a hyphen are misparsed flags, not files.
    RE.get_or_init(|| Regex::new(r"^[^-].*\.(?:c|C|cc|cpp|cxx|c\+\+)$").unwrap())
}

fn make_directory_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^make\[\d+\]:$").unwrap())
}

/// A single compiler call found in a build trace.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct CompilerInvocation {
    pub compiled_files: Vec<String>,
    pub include_paths: Vec<String>,
    pub system_include_paths: Vec<String>,
    pub includes: Vec<String>,
    pub defines: BTreeMap<String, String>,
    /// Directory announced by the innermost enclosing `make[N]: Entering directory` line.
    pub working_directory: Option<PathBuf>,
}

/// Returns whether `name` is a known compiler, possibly carrying a target prefix.
pub fn is_compiler(name: &str) -> bool {
    COMMAND_PREFIXES.iter().any(|prefix| {
        name.strip_prefix(prefix)
            .is_some_and(|rest| COMMAND_NAMES.contains(&rest))
    })
}

/// Extract all compiler invocations from the textual output of a dry-run build.
///
/// Other commands are ignored. `make[N]: Entering directory` and `make[N]: Leaving directory`
/// lines maintain the working directory attached to subsequent invocations.
pub fn extract_invocations(trace: &str) -> Result<Vec<CompilerInvocation>> {
    let mut calls = Vec::new();
    let mut directories: Vec<PathBuf> = Vec::new();

    for command in parse_commands(trace)? {
        let name = command[0].as_str();

        if command.len() > 1 && make_directory_regex().is_match(name) {
            let Some(path) = command.get(3).map(PathBuf::from) else {
                warn!("Ignoring make information: {}", command.join(" "));
                continue;
            };
            match command[1].as_str() {
                "Entering" => directories.push(path),
                "Leaving" => {
                    if directories.last() != Some(&path) {
                        warn!("Mismatched make path: {}", command.join(" "));
                    }
                    directories.pop();
                }
                _ => warn!("Ignoring make information: {}", command.join(" ")),
            }
            continue;
        }

        if !is_compiler(name) {
            continue;
        }

        let call = parse_invocation(&command[1..], directories.last().cloned());
        debug!("Found compiler call {:?}", call);
        calls.push(call);
    }

    Ok(calls)
}

/// Keep only arguments we understand, normalizing `-Ipath` and `-DNAME` on the way.
///
/// Everything else is dropped so that unknown flags of unknown arity cannot shift the
/// interpretation of the known ones.
fn prefilter(args: &[String]) -> Vec<String> {
    let mut unsupported = Vec::new();
    let mut kept = Vec::new();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        if UNSUPPORTED_INCLUDE_OPTIONS.contains(&arg.as_str()) {
            unsupported.push(arg.as_str());
            if arg != "-I-" {
                // The operand is dropped along with the option.
                iter.next();
            }
        } else if OPTIONS_WITH_VALUE.contains(&arg.as_str()) {
            kept.push(arg.clone());
            if let Some(value) = iter.next() {
                kept.push(value.clone());
            }
        } else if arg == "-D" {
            if let Some(define) = iter.next() {
                kept.push(normalize_define(&format!("-D{}", define)));
            }
        } else if let Some(path) = arg.strip_prefix("-I") {
            kept.push("-I".to_string());
            kept.push(path.to_string());
        } else if arg.starts_with("-D") && arg.len() > 2 {
            kept.push(normalize_define(arg));
        } else if source_file_regex().is_match(arg) {
            kept.push(arg.clone());
        }
    }

    if !unsupported.is_empty() {
        warn!("Ignoring unsupported include options: {}", unsupported.join(", "));
    }

    kept
}

/// `-DNAME` means `-DNAME=`.
fn normalize_define(arg: &str) -> String {
    if arg.contains('=') {
        arg.to_string()
    } else {
        format!("{}=", arg)
    }
}

fn parse_invocation(args: &[String], working_directory: Option<PathBuf>) -> CompilerInvocation {
    let mut call = CompilerInvocation {
        working_directory,
        ..Default::default()
    };

    let args = prefilter(args);
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-I" => call.include_paths.extend(iter.next()),
            "-isystem" => call.system_include_paths.extend(iter.next()),
            "-include" => call.includes.extend(iter.next()),
            _ => {
                if let Some(define) = arg.strip_prefix("-D") {
                    // The prefilter guarantees a `=`.
                    let (name, value) = define.split_once('=').unwrap_or((define, ""));
                    call.defines.insert(name.to_string(), value.to_string());
                } else {
                    call.compiled_files.push(arg);
                }
            }
        }
    }

    call
}
