//! Translation of locations in the composed tree back to the original sources.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::{debug, info};
use regex::Regex;
use serde::Serialize;

use crate::generate::GenerationMap;
use crate::utils::normalize_path;

/// A 1-based line in a file.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: usize,
}

impl SourceLocation {
    /// The path is normalized on construction.
    pub fn new(file: impl AsRef<Path>, line: usize) -> Self {
        Self {
            file: normalize_path(file.as_ref()),
            line,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

pub trait SourceMap: Send + Sync {
    /// Map a location in the composed tree to the original sources, if possible.
    fn original_location(&self, location: &SourceLocation) -> Option<SourceLocation>;
}

/// Maps every location to itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentitySourceMap;

impl SourceMap for IdentitySourceMap {
    fn original_location(&self, location: &SourceLocation) -> Option<SourceLocation> {
        Some(location.clone())
    }
}

fn line_directive_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^\s*#\s*line\s+(\d+)(?:\s+"([^"]+)")?\s*$"#).unwrap())
}

fn line_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // GCC output form: `# 12 "file.c" 1 3`
    RE.get_or_init(|| Regex::new(r#"^\s*#\s*(\d+)\s+"([^"]+)"(?:\s+\d+)*\s*$"#).unwrap())
}

/// Join lines ending in `\` with the following line. The joined line keeps the position of the
/// last physical line; the earlier ones become empty, so line numbers stay unchanged.
pub fn fold_continuations(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    for i in 0..lines.len().saturating_sub(1) {
        if lines[i].trim_end().ends_with('\\') {
            let line = std::mem::take(&mut lines[i]);
            let cut = line.rfind('\\').unwrap_or(line.len());
            lines[i + 1] = format!("{}{}", &line[..cut], lines[i + 1]);
        }
    }
    lines
}

/// Resolves lines of a file through the `#line` markers it contains.
///
/// A marker on line `i` applies from line `i + 1` on: that line gets the marker's number and
/// following lines count up from it, until the next marker.
#[derive(Debug, Clone)]
pub struct LineDirectiveSourceMap {
    beginnings: BTreeMap<usize, SourceLocation>,
    line_count: usize,
}

impl LineDirectiveSourceMap {
    /// `path` names the file in the produced locations; `text` is its content.
    pub fn new(path: &Path, text: &str) -> Self {
        let mut beginnings = BTreeMap::new();
        beginnings.insert(1, SourceLocation::new(path, 1));

        let lines = fold_continuations(text);
        let mut current = path.to_path_buf();
        for (i, line) in lines.iter().enumerate() {
            let captures = line_directive_regex()
                .captures(line)
                .or_else(|| line_marker_regex().captures(line));
            let Some(captures) = captures else {
                continue;
            };
            let Ok(number) = captures[1].parse::<usize>() else {
                continue;
            };
            if let Some(file) = captures.get(2) {
                current = PathBuf::from(file.as_str());
            }
            // 0-based index i is line i + 1, so the marker applies from line i + 2.
            beginnings.insert(i + 2, SourceLocation::new(&current, number));
        }

        Self {
            beginnings,
            line_count: lines.len(),
        }
    }

    pub fn from_file(display_path: &Path, file: &Path) -> std::io::Result<Self> {
        let text = fs::read(file)?;
        Ok(Self::new(display_path, &String::from_utf8_lossy(&text)))
    }

    pub fn original_location(&self, line: usize) -> Option<SourceLocation> {
        if line == 0 || line > self.line_count.max(1) {
            return None;
        }
        let (&start, location) = self.beginnings.range(..=line).next_back()?;
        let mapped = (location.line + line).checked_sub(start)?;
        Some(SourceLocation {
            file: location.file.clone(),
            line: mapped,
        })
    }
}

/// Source map of a composition: undoes the prepended directives, then resolves line markers.
#[derive(Debug, Clone)]
pub struct ComposedSourceMap {
    generation: GenerationMap,
    source_dir: PathBuf,
    markers: HashMap<PathBuf, LineDirectiveSourceMap>,
}

impl ComposedSourceMap {
    /// `source_dir` holds the original files named by `generation`.
    pub fn new(generation: GenerationMap, source_dir: &Path) -> Self {
        info!("Creating source map");
        let mut markers = HashMap::new();
        for info in generation.values() {
            if markers.contains_key(&info.original_path) {
                continue;
            }
            match LineDirectiveSourceMap::from_file(&info.original_path, &source_dir.join(&info.original_path)) {
                Ok(map) => {
                    markers.insert(info.original_path.clone(), map);
                }
                Err(e) => debug!("Not reading markers of {}: {}", info.original_path.display(), e),
            }
        }
        Self {
            generation,
            source_dir: normalize_path(source_dir),
            markers,
        }
    }

    pub fn generation(&self) -> &GenerationMap {
        &self.generation
    }

    /// Location in the original file, before resolving line markers.
    pub fn unmarked_location(&self, location: &SourceLocation) -> Option<SourceLocation> {
        let info = self.generation.get(&normalize_path(&location.file))?;
        let line = location.line.checked_sub(info.added_lines).filter(|&l| l > 0)?;
        Some(SourceLocation::new(&info.original_path, line))
    }
}

impl SourceMap for ComposedSourceMap {
    fn original_location(&self, location: &SourceLocation) -> Option<SourceLocation> {
        let unmarked = self.unmarked_location(location)?;
        let Some(markers) = self.markers.get(&unmarked.file) else {
            return Some(unmarked);
        };
        let mut resolved = markers.original_location(unmarked.line)?;
        if resolved.file.is_absolute() {
            if let Ok(relative) = resolved.file.strip_prefix(&self.source_dir) {
                resolved.file = relative.to_path_buf();
            }
        }
        Some(resolved)
    }
}
