use std::ffi::OsStr;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::StoreError;

/// Namespace used when the caller does not scope a file explicitly.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Identity of an upload: a caller namespace plus the client's file name.
///
/// Both parts become directory names on disk, so each must be a single
/// plain path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileId {
    namespace: String,
    name: String,
}

impl FileId {
    /// Creates an id in the [`DEFAULT_NAMESPACE`].
    pub fn new(name: &str) -> Result<Self, StoreError> {
        Self::scoped(DEFAULT_NAMESPACE, name)
    }

    /// Creates an id scoped to `namespace`.
    pub fn scoped(namespace: &str, name: &str) -> Result<Self, StoreError> {
        validate_component(namespace)
            .map_err(|reason| StoreError::InvalidFileId(format!("namespace {reason}")))?;
        validate_component(name)
            .map_err(|reason| StoreError::InvalidFileId(format!("name {reason}")))?;
        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of this id relative to a namespace-partitioned directory.
    pub(crate) fn relative_path(&self) -> PathBuf {
        Path::new(&self.namespace).join(&self.name)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Checks that `value` is exactly one normal path component.
///
/// Rejects empty strings, `.` and `..`, separators of either platform,
/// NUL bytes and Windows drive prefixes.
pub(crate) fn validate_component(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err("is empty".into());
    }
    if value.contains(['/', '\\']) {
        return Err(format!("contains a path separator: {value}"));
    }
    if value.contains('\0') {
        return Err("contains a NUL byte".into());
    }

    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == OsStr::new(value) => Ok(()),
        _ => Err(format!("is not a plain file name: {value}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_uses_default_namespace() {
        let id = FileId::new("report.pdf").unwrap();
        assert_eq!(id.namespace(), DEFAULT_NAMESPACE);
        assert_eq!(id.name(), "report.pdf");
        assert_eq!(id.to_string(), "default/report.pdf");
    }

    #[test]
    fn scoped_ids_with_same_name_differ() {
        let a = FileId::scoped("alice", "report.pdf").unwrap();
        let b = FileId::scoped("bob", "report.pdf").unwrap();
        assert_ne!(a, b);
        assert_ne!(a.relative_path(), b.relative_path());
    }

    #[test]
    fn rejects_empty_name() {
        assert!(matches!(
            FileId::new(""),
            Err(StoreError::InvalidFileId(_))
        ));
    }

    #[test]
    fn rejects_traversal() {
        assert!(FileId::new("..").is_err());
        assert!(FileId::new(".").is_err());
        assert!(FileId::new("../etc/passwd").is_err());
        assert!(FileId::scoped("..", "file").is_err());
    }

    #[test]
    fn rejects_separators() {
        assert!(FileId::new("sub/file.bin").is_err());
        assert!(FileId::new("sub\\file.bin").is_err());
        assert!(FileId::new("/abs").is_err());
    }

    #[test]
    fn rejects_nul_byte() {
        assert!(FileId::new("a\0b").is_err());
    }

    #[test]
    fn accepts_dotfile_and_unicode() {
        assert!(FileId::new(".hidden").is_ok());
        assert!(FileId::new("报告 final.pdf").is_ok());
        assert!(FileId::new("archive.tar.gz").is_ok());
    }
}
