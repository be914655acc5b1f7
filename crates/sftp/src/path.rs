use std::path::{Component, Path, PathBuf};

/// Keeps request paths inside the served root.
///
/// Paths are normalized lexically; symlinks are not resolved. Relative
/// request paths are taken relative to the root, matching a server started
/// with the root as its working directory.
#[derive(Debug, Clone)]
pub(crate) struct Confinement {
    root: PathBuf,
}

impl Confinement {
    pub(crate) fn new(root: &Path) -> Self {
        Self {
            root: normalize(root),
        }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    /// The normalized absolute form of `requested`, or `None` when it escapes
    /// the root.
    pub(crate) fn resolve(&self, requested: &Path) -> Option<PathBuf> {
        let joined = if requested.as_os_str().is_empty() {
            self.root.clone()
        } else {
            self.root.join(requested)
        };
        let resolved = normalize(&joined);
        resolved.starts_with(&self.root).then_some(resolved)
    }
}

/// Collapse `.` and `..` without touching the filesystem. `..` at the top
/// stays at the top.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn confine(root: &str) -> Confinement {
        Confinement::new(Path::new(root))
    }

    #[test]
    fn absolute_inside_root() {
        let c = confine("/srv/data");
        assert_eq!(
            c.resolve(Path::new("/srv/data/a/b.txt")),
            Some(PathBuf::from("/srv/data/a/b.txt"))
        );
        assert_eq!(c.resolve(Path::new("/srv/data")), Some(PathBuf::from("/srv/data")));
    }

    #[test]
    fn relative_and_dot_resolve_against_root() {
        let c = confine("/srv/data");
        assert_eq!(c.resolve(Path::new(".")), Some(PathBuf::from("/srv/data")));
        assert_eq!(c.resolve(Path::new("")), Some(PathBuf::from("/srv/data")));
        assert_eq!(c.resolve(Path::new("x/./y")), Some(PathBuf::from("/srv/data/x/y")));
    }

    #[test]
    fn parent_components_cannot_escape() {
        let c = confine("/srv/data");
        assert_eq!(c.resolve(Path::new("..")), None);
        assert_eq!(c.resolve(Path::new("/srv/data/../other")), None);
        assert_eq!(c.resolve(Path::new("a/../../data2")), None);
        assert_eq!(
            c.resolve(Path::new("a/../b")),
            Some(PathBuf::from("/srv/data/b"))
        );
    }

    #[test]
    fn sibling_with_common_prefix_is_outside() {
        let c = confine("/srv/data");
        assert_eq!(c.resolve(Path::new("/srv/database")), None);
        assert_eq!(c.resolve(Path::new("/etc/passwd")), None);
    }

    #[test]
    fn filesystem_root_allows_everything() {
        let c = confine("/");
        assert_eq!(c.resolve(Path::new("/etc/../tmp")), Some(PathBuf::from("/tmp")));
        assert_eq!(c.resolve(Path::new("/..")), Some(PathBuf::from("/")));
    }

    #[test]
    fn root_itself_is_normalized() {
        let c = confine("/srv/./data/../data/");
        assert_eq!(c.root(), Path::new("/srv/data"));
    }
}
