//! Reading and writing Kconfig `.config` files.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use log::{debug, warn};
use regex::Regex;

use crate::error::{ComposerError, Result};

fn name_value_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^CONFIG_(\w+)=(.*)$").unwrap())
}

fn not_set_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^# CONFIG_(\w+) is not set$").unwrap())
}

/// The `.config` line that sets `option`.
pub fn format_option(option: &str, enabled: bool) -> String {
    if enabled {
        format!("CONFIG_{}=y", option)
    } else {
        format!("# CONFIG_{} is not set", option)
    }
}

/// Option named by a `.config` line, and whether the line enables it.
///
/// Any assignment sets the option, whatever its value: `y`, `m`, a string or a number.
pub fn parse_option(line: &str) -> Option<(&str, bool)> {
    if let Some(captures) = name_value_regex().captures(line) {
        return Some((captures.get(1)?.as_str(), true));
    }
    let captures = not_set_regex().captures(line)?;
    Some((captures.get(1)?.as_str(), false))
}

/// Overlay `features` on the configuration `text`.
///
/// Lines for listed options are replaced in place unless they already agree, which keeps the
/// value of a string or numeric option; options without a line are appended in name order. Features rejected by `ignore` are left out.
pub fn apply_features(text: &str, features: &BTreeMap<String, bool>, ignore: impl Fn(&str) -> bool) -> String {
    let mut remaining: BTreeSet<&str> = features.keys().map(String::as_str).filter(|f| !ignore(f)).collect();

    let mut lines: Vec<String> = text
        .lines()
        .map(|line| match parse_option(line) {
            Some((name, set)) if remaining.contains(name) => {
                remaining.remove(name);
                if set == features[name] {
                    line.to_string()
                } else {
                    format_option(name, features[name])
                }
            }
            _ => line.to_string(),
        })
        .collect();
    for feature in remaining {
        lines.push(format_option(feature, features[feature]));
    }

    let mut result = lines.join("\n");
    result.push('\n');
    result
}

/// Rewrite the configuration at `path` with `features`.
pub fn write_config(path: &Path, features: &BTreeMap<String, bool>, ignore: impl Fn(&str) -> bool) -> Result<()> {
    let text = fs::read_to_string(path).map_err(ComposerError::io(path))?;
    let text = apply_features(&text, features, ignore);
    fs::write(path, text).map_err(ComposerError::io(path))?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Options whose value in the configuration at `path` differs from the requested one.
///
/// The build system may override requested values to satisfy dependencies. Every such option
/// is logged; an option missing from the file counts as disabled.
pub fn verify_config(path: &Path, features: &BTreeMap<String, bool>, ignore: impl Fn(&str) -> bool) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).map_err(ComposerError::io(path))?;
    let actual: HashMap<&str, bool> = text.lines().filter_map(parse_option).collect();

    let mut mismatched = Vec::new();
    for (feature, &requested) in features {
        if ignore(feature) {
            continue;
        }
        let value = actual.get(feature.as_str()).copied().unwrap_or(false);
        if value != requested {
            warn!(
                "Option {} could not be set to {}; the build system chose {}",
                feature, requested, value
            );
            mismatched.push(feature.clone());
        }
    }
    Ok(mismatched)
}
