use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::ErrorKind;

/// Content root shared by static serving and uploads.
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Resolves an upload destination directory below the root.
    ///
    /// Leading `/` are stripped, `.` segments are dropped and `..` is
    /// rejected. Missing trailing directories are allowed; existing
    /// components must be real directories, not symlinks.
    pub async fn resolve_dir_checked(&self, upload_path: &str) -> Result<PathBuf, StorageError> {
        let target = self.resolve(upload_path)?;
        self.ensure_no_symlink_components(&target).await?;
        Ok(target)
    }

    /// Rejects a symlink at the final file path so writes stay below the root.
    pub async fn ensure_not_symlink(&self, target: &Path) -> Result<(), StorageError> {
        match fs::symlink_metadata(target).await {
            Ok(metadata) if metadata.file_type().is_symlink() => Err(StorageError::InvalidPath),
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    fn resolve(&self, upload_path: &str) -> Result<PathBuf, StorageError> {
        let mut normalized = PathBuf::new();

        for component in Path::new(strip_leading_separators(upload_path)).components() {
            match component {
                Component::Normal(segment) => normalized.push(segment),
                Component::CurDir => continue,
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidPath);
                }
            }
        }

        Ok(self.root.join(normalized))
    }

    async fn ensure_no_symlink_components(&self, target: &Path) -> Result<(), StorageError> {
        let relative = target
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::InvalidPath)?;
        let mut current = PathBuf::from(&self.root);

        for component in relative.components() {
            current.push(component.as_os_str());
            match fs::symlink_metadata(&current).await {
                Ok(metadata) => {
                    if metadata.file_type().is_symlink() || !metadata.is_dir() {
                        return Err(StorageError::InvalidPath);
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(())
    }
}

/// Strips every leading `/` and nothing else.
pub fn strip_leading_separators(upload_path: &str) -> &str {
    upload_path.trim_start_matches('/')
}

/// Reduces a client supplied file name to its final path segment.
pub fn sanitize_file_name(raw: &str) -> Option<&str> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    match name {
        "" | "." | ".." => None,
        name => Some(name),
    }
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::{Storage, StorageError, sanitize_file_name, strip_leading_separators};
    use tempfile::tempdir;

    #[test]
    fn strips_only_leading_separators() {
        assert_eq!(strip_leading_separators("///a/b"), "a/b");
        assert_eq!(strip_leading_separators("a/b/"), "a/b/");
        assert_eq!(strip_leading_separators("/"), "");
        assert_eq!(strip_leading_separators(""), "");
    }

    #[test]
    fn file_name_keeps_last_segment() {
        assert_eq!(sanitize_file_name("logo.png"), Some("logo.png"));
        assert_eq!(sanitize_file_name("../../etc/passwd"), Some("passwd"));
        assert_eq!(sanitize_file_name("C:\\Users\\me\\a.txt"), Some("a.txt"));
        assert_eq!(sanitize_file_name(".."), None);
        assert_eq!(sanitize_file_name("dir/"), None);
        assert_eq!(sanitize_file_name(""), None);
    }

    #[tokio::test]
    async fn resolve_dir_normalizes_under_root() {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::new(temp.path().to_path_buf());

        let resolved = storage
            .resolve_dir_checked("///images/./icons")
            .await
            .expect("resolve");
        assert_eq!(resolved, temp.path().join("images").join("icons"));

        let root = storage.resolve_dir_checked("").await.expect("resolve root");
        assert_eq!(root, temp.path());
    }

    #[tokio::test]
    async fn resolve_dir_rejects_parent_segments() {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::new(temp.path().to_path_buf());

        for path in ["..", "a/../../b", "/../escape"] {
            let result = storage.resolve_dir_checked(path).await;
            assert!(matches!(result, Err(StorageError::InvalidPath)), "{path}");
        }
    }

    #[tokio::test]
    async fn resolve_dir_rejects_existing_file_component() {
        let temp = tempdir().expect("tempdir");
        std::fs::write(temp.path().join("plain"), b"x").expect("write file");
        let storage = Storage::new(temp.path().to_path_buf());

        let result = storage.resolve_dir_checked("plain/sub").await;
        assert!(matches!(result, Err(StorageError::InvalidPath)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_dir_rejects_symlink() {
        use std::os::unix::fs::symlink;

        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("root");
        std::fs::create_dir_all(&root).expect("create root");

        let outside = temp.path().join("outside");
        std::fs::create_dir_all(&outside).expect("create outside dir");
        symlink(&outside, root.join("link")).expect("symlink");

        let storage = Storage::new(root);
        let result = storage.resolve_dir_checked("link/nested").await;
        assert!(matches!(result, Err(StorageError::InvalidPath)));
    }
}
