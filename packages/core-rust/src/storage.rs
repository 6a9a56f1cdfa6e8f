//! Storage backend contract: object references, metadata and error codes.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::handle::OperationHandle;

// ---------------------------------------------------------------------------
// StorageRef
// ---------------------------------------------------------------------------

/// Reference to a location in the storage bucket.
///
/// Paths are normalized: leading, trailing and repeated `/` separators are
/// dropped. The empty path is the bucket root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StorageRef {
    path: String,
}

impl StorageRef {
    /// Reference to the bucket root.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Builds a normalized reference from a slash separated path.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        let path = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Self { path }
    }

    /// Reference to `path` below this one.
    #[must_use]
    pub fn child(&self, path: &str) -> Self {
        if self.is_root() {
            return Self::parse(path);
        }
        Self::parse(&format!("{}/{}", self.path, path))
    }

    /// Normalized full path, empty for the root.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment, empty for the root.
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }
}

impl fmt::Display for StorageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.path)
    }
}

/// Metadata returned by a completed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Full path of the stored object.
    pub path: String,
    /// Object size in bytes.
    pub size: u64,
    /// Content type, when the backend knows it.
    pub content_type: Option<String>,
    /// Monotonic object generation assigned by the backend.
    pub generation: u64,
}

// ---------------------------------------------------------------------------
// StorageErrorCode
// ---------------------------------------------------------------------------

/// Error codes reported by storage calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum StorageErrorCode {
    None = 0,
    Unknown = 1,
    ObjectNotFound = 2,
    BucketNotFound = 3,
    ProjectNotFound = 4,
    QuotaExceeded = 5,
    Unauthenticated = 6,
    Unauthorized = 7,
    RetryLimitExceeded = 8,
    NonMatchingChecksum = 9,
    DownloadSizeExceeded = 10,
    Cancelled = 11,
}

impl StorageErrorCode {
    /// Numeric code as carried by operation handles.
    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Maps a numeric code back to its variant.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        let value = match code {
            0 => Self::None,
            1 => Self::Unknown,
            2 => Self::ObjectNotFound,
            3 => Self::BucketNotFound,
            4 => Self::ProjectNotFound,
            5 => Self::QuotaExceeded,
            6 => Self::Unauthenticated,
            7 => Self::Unauthorized,
            8 => Self::RetryLimitExceeded,
            9 => Self::NonMatchingChecksum,
            10 => Self::DownloadSizeExceeded,
            11 => Self::Cancelled,
            _ => return None,
        };
        Some(value)
    }
}

// ---------------------------------------------------------------------------
// StorageBackend
// ---------------------------------------------------------------------------

/// Storage calls exposed by the backend SDK.
///
/// Every call returns immediately with a pending [`OperationHandle`]; the
/// outcome is observed by polling the handle.
pub trait StorageBackend: Send + Sync {
    /// Resolves a reference for `path`. The empty path resolves to the root.
    fn reference(&self, path: &str) -> StorageRef {
        if path.is_empty() {
            StorageRef::root()
        } else {
            StorageRef::parse(path)
        }
    }

    /// Uploads raw bytes to `target`. Completes with [`OperationOutput::Metadata`].
    ///
    /// [`OperationOutput::Metadata`]: crate::handle::OperationOutput::Metadata
    fn put_bytes(&self, target: &StorageRef, data: Bytes) -> OperationHandle;

    /// Uploads UTF-8 text to `target`.
    fn put_text(&self, target: &StorageRef, text: &str) -> OperationHandle {
        self.put_bytes(target, Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Deletes the object at `target`.
    fn delete(&self, target: &StorageRef) -> OperationHandle;

    /// Fetches a download URL for `target`. Completes with a text output.
    fn download_url(&self, target: &StorageRef) -> OperationHandle;
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn parse_normalizes_separators() {
        assert_eq!(StorageRef::parse("/a//b/").path(), "a/b");
        assert_eq!(StorageRef::parse("").path(), "");
        assert!(StorageRef::parse("///").is_root());
    }

    #[test]
    fn child_joins_paths() {
        let images = StorageRef::parse("images");
        assert_eq!(images.child("cat.png").path(), "images/cat.png");
        assert_eq!(StorageRef::root().child("/x/").path(), "x");
        assert_eq!(images.child("a/b").name(), "b");
    }

    #[test]
    fn root_display_and_name() {
        assert_eq!(StorageRef::root().to_string(), "/");
        assert_eq!(StorageRef::root().name(), "");
        assert_eq!(StorageRef::parse("a/b").to_string(), "/a/b");
    }

    #[test]
    fn error_codes_map_both_ways() {
        for code in 0..=11 {
            let variant = StorageErrorCode::from_code(code).unwrap();
            assert_eq!(variant.code(), code);
        }
        assert!(StorageErrorCode::from_code(12).is_none());
        assert!(StorageErrorCode::from_code(-1).is_none());
    }

    struct RootOnly;

    impl StorageBackend for RootOnly {
        fn put_bytes(&self, _: &StorageRef, _: Bytes) -> OperationHandle {
            OperationHandle::invalid()
        }
        fn delete(&self, _: &StorageRef) -> OperationHandle {
            OperationHandle::invalid()
        }
        fn download_url(&self, _: &StorageRef) -> OperationHandle {
            OperationHandle::invalid()
        }
    }

    #[test]
    fn default_reference_resolves_empty_path_to_root() {
        assert!(RootOnly.reference("").is_root());
        assert_eq!(RootOnly.reference("docs/a.txt").path(), "docs/a.txt");
    }

    proptest! {
        #[test]
        fn parse_is_idempotent(path in "[a-z/]{0,24}") {
            let once = StorageRef::parse(&path);
            let twice = StorageRef::parse(once.path());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn normalized_paths_have_no_empty_segments(path in "[a-z/]{0,24}") {
            let parsed = StorageRef::parse(&path);
            prop_assert!(!parsed.path().starts_with('/'));
            prop_assert!(!parsed.path().ends_with('/'));
            prop_assert!(!parsed.path().contains("//"));
        }
    }
}
