use std::path::{Component, Path, PathBuf};

/// [Szudzik pairing function][szudzik-pairing].
///
/// ```text
/// (a, b) -> if (a<b) then (b^2 + a) else (a^2 + a + b)
/// ```
///
/// Arithmetic wraps, so the result is only a well-spread hash for large inputs.
///
/// [szudzik-pairing]: http://szudzik.com/ElegantPairing.pdf
pub fn pairing2(a: u64, b: u64) -> u64 {
    if a < b {
        b.wrapping_mul(b).wrapping_add(a)
    } else {
        a.wrapping_mul(a).wrapping_add(a).wrapping_add(b)
    }
}

/// Pairing function for three `u64` values.
pub fn pairing3(a: u64, b: u64, c: u64) -> u64 {
    pairing2(pairing2(a, b), c)
}

pub trait MyHash {
    /// Hash used for bucket selection in the node table and the operation cache.
    fn hash(&self) -> u64;
}

impl MyHash for (u64, u64) {
    fn hash(&self) -> u64 {
        pairing2(self.0, self.1)
    }
}

impl MyHash for (u64, u64, u64) {
    fn hash(&self) -> u64 {
        pairing3(self.0, self.1, self.2)
    }
}

/// Lexically normalize a path: drop `.` components and fold `..` into the preceding component.
///
/// Leading `..` components of relative paths are kept. Symlinks are not consulted.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut result: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match result.last() {
                Some(Component::Normal(_)) => {
                    result.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => result.push(component),
            },
            _ => result.push(component),
        }
    }
    result.iter().collect()
}

/// Compute the relative path leading from directory `base` to `target`.
///
/// Both paths are normalized first. They should both be relative or both be absolute.
pub fn relative_path(base: &Path, target: &Path) -> PathBuf {
    let base = normalize_path(base);
    let target = normalize_path(target);
    let base: Vec<_> = base.components().collect();
    let target: Vec<_> = target.components().collect();

    let common = base.iter().zip(target.iter()).take_while(|(a, b)| a == b).count();

    let mut result = PathBuf::new();
    for _ in common..base.len() {
        result.push("..");
    }
    for component in &target[common..] {
        result.push(component);
    }
    result
}

/// Resolve `path` against `base` (if relative), normalize it, and make it relative to `root`
/// when it lies inside `root`. Paths outside `root` stay absolute.
pub fn rebase_path(path: &Path, base: &Path, root: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&base.join(path))
    };
    match absolute.strip_prefix(normalize_path(root)) {
        Ok(relative) if relative.as_os_str().is_empty() => PathBuf::from("."),
        Ok(relative) => relative.to_path_buf(),
        Err(_) => absolute,
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_szudzik() {
        // a\b  0  1  2  3  4
        // ------------------
        // 0    0  1  4  9 16
        // 1    2  3  5 10 17
        // 2    6  7  8 11 18
        assert_eq!(pairing2(0, 0), 0);
        assert_eq!(pairing2(0, 1), 1);
        assert_eq!(pairing2(1, 0), 2);
        assert_eq!(pairing2(1, 2), 5);
        assert_eq!(pairing2(2, 1), 7);
        assert_eq!(pairing2(0, 4), 16);
        assert_eq!(pairing2(2, 4), 18);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_path(Path::new("a/./b/../c")), PathBuf::from("a/c"));
        assert_eq!(normalize_path(Path::new("../a/b/..")), PathBuf::from("../a"));
        assert_eq!(normalize_path(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(normalize_path(Path::new("./a.c")), PathBuf::from("a.c"));
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(relative_path(Path::new("src/x"), Path::new("include/a.h")), PathBuf::from("../../include/a.h"));
        assert_eq!(relative_path(Path::new("src"), Path::new("src/a.h")), PathBuf::from("a.h"));
        assert_eq!(relative_path(Path::new(""), Path::new("a.h")), PathBuf::from("a.h"));
        assert_eq!(relative_path(Path::new("/tmp/s"), Path::new("/usr/a.h")), PathBuf::from("../../usr/a.h"));
    }

    #[test]
    fn test_rebase() {
        let root = Path::new("/tmp/src");
        assert_eq!(rebase_path(Path::new("a/../b.c"), root, root), PathBuf::from("b.c"));
        assert_eq!(rebase_path(Path::new("."), root, root), PathBuf::from("."));
        assert_eq!(rebase_path(Path::new("x.c"), Path::new("/tmp/src/sub"), root), PathBuf::from("sub/x.c"));
        assert_eq!(rebase_path(Path::new("/usr/include"), root, root), PathBuf::from("/usr/include"));
        assert_eq!(rebase_path(Path::new("../other/y.h"), root, root), PathBuf::from("/tmp/other/y.h"));
    }
}
