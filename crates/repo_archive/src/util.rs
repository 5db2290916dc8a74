use std::path::{Component, Path, PathBuf};

/// Makes `path` absolute against the current directory and removes `.` and
/// `..` components without touching the file system, so two spellings of the
/// same destination compare equal.
pub(crate) fn absolute_destination(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            component => normalized.push(component),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spellings_of_the_same_destination_match() {
        let base = std::env::current_dir().unwrap();
        assert_eq!(absolute_destination(Path::new("dest")), base.join("dest"));
        assert_eq!(absolute_destination(Path::new("./dest/")), base.join("dest"));
        assert_eq!(
            absolute_destination(&base.join("a/../dest")),
            base.join("dest")
        );
    }
}
