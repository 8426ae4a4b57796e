use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VfsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("parent directory does not exist: {0}")]
    MissingParent(String),
    #[error("path is a directory: {0}")]
    IsDirectory(String),
    #[error("path is a file: {0}")]
    IsFile(String),
}

/// In-memory filesystem owned by the guest interpreter.
///
/// Paths are `/`-separated and relative to the root; a leading `./` or `/` is
/// ignored. Writing requires the parent directory to exist.
#[derive(Debug, Default)]
pub struct VirtualFs {
    directories: BTreeSet<String>,
    files: BTreeMap<String, String>,
}

impl VirtualFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path_exists(&self, path: &str) -> bool {
        let path = normalize(path);
        path.is_empty() || self.directories.contains(&path) || self.files.contains_key(&path)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        let path = normalize(path);
        path.is_empty() || self.directories.contains(&path)
    }

    pub fn mkdir(&mut self, path: &str) -> Result<(), VfsError> {
        let path = normalize(path);
        if path.is_empty() || self.directories.contains(&path) {
            return Ok(());
        }
        if self.files.contains_key(&path) {
            return Err(VfsError::IsFile(path));
        }
        self.require_parent(&path)?;
        self.directories.insert(path);
        Ok(())
    }

    pub fn write(&mut self, path: &str, content: &str) -> Result<(), VfsError> {
        let path = normalize(path);
        if path.is_empty() || self.directories.contains(&path) {
            return Err(VfsError::IsDirectory(path));
        }
        self.require_parent(&path)?;
        self.files.insert(path, content.to_string());
        Ok(())
    }

    pub fn read(&self, path: &str) -> Result<&str, VfsError> {
        let path = normalize(path);
        if self.directories.contains(&path) {
            return Err(VfsError::IsDirectory(path));
        }
        self.files
            .get(&path)
            .map(String::as_str)
            .ok_or(VfsError::NotFound(path))
    }

    /// Remove a file, or a directory with everything beneath it.
    pub fn remove(&mut self, path: &str) -> Result<(), VfsError> {
        let path = normalize(path);
        if self.files.remove(&path).is_some() {
            return Ok(());
        }
        if !self.directories.remove(&path) {
            return Err(VfsError::NotFound(path));
        }
        let prefix = format!("{path}/");
        self.directories.retain(|dir| !dir.starts_with(&prefix));
        self.files.retain(|file, _| !file.starts_with(&prefix));
        Ok(())
    }

    fn require_parent(&self, path: &str) -> Result<(), VfsError> {
        match path.rsplit_once('/') {
            Some((parent, _)) if !self.directories.contains(parent) => {
                Err(VfsError::MissingParent(parent.to_string()))
            }
            _ => Ok(()),
        }
    }
}

fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_into_missing_directory_fails() {
        let mut fs = VirtualFs::new();
        let err = fs.write("components/index.js", "x").unwrap_err();
        assert_eq!(err, VfsError::MissingParent("components".into()));

        fs.mkdir("components").unwrap();
        fs.write("./components/index.js", "x").unwrap();
        assert_eq!(fs.read("components/index.js").unwrap(), "x");
    }

    #[test]
    fn root_files_need_no_directory() {
        let mut fs = VirtualFs::new();
        fs.write("counter.js", "a").unwrap();
        fs.write("/counter.js", "b").unwrap();
        assert!(fs.path_exists("counter.js"));
        assert_eq!(fs.read("counter.js").unwrap(), "b");
    }

    #[test]
    fn remove_directory_is_recursive() {
        let mut fs = VirtualFs::new();
        fs.mkdir("pkg").unwrap();
        fs.mkdir("pkg/nested").unwrap();
        fs.write("pkg/nested/a.js", "").unwrap();
        fs.remove("pkg").unwrap();
        assert!(!fs.path_exists("pkg/nested/a.js"));
        assert!(!fs.path_exists("pkg"));
        assert_eq!(fs.remove("pkg"), Err(VfsError::NotFound("pkg".into())));
    }
}
