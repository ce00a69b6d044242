//! Logical resource paths and their remote/local resolution
//!
//! A logical resource is a directory-like path `P` that names a paired
//! dataset. For object-store schemes the two parts live at `P/index` and
//! `P/data`; they are staged under
//! `<staging root>/<bucket>/<P without leading slash>/`.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::layout;
use crate::errors::{ReaderError, ReaderResult};

/// How a resource must be read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheme {
    /// Object store path that must be staged locally before decoding
    ObjectStore(String),
    /// Local filesystem path read in place
    Local,
    /// Anything else; cannot be read by this crate
    Unsupported(String),
}

impl Scheme {
    fn classify(scheme: &str) -> Self {
        let scheme = scheme.to_ascii_lowercase();
        if layout::STAGED_SCHEMES.contains(&scheme.as_str()) {
            Scheme::ObjectStore(scheme)
        } else if scheme == layout::LOCAL_SCHEME {
            Scheme::Local
        } else {
            Scheme::Unsupported(scheme)
        }
    }
}

/// Canonical cache key of a logical resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Create a key from an already-canonical string
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single object in an object store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocation {
    /// Bucket (URL host)
    pub bucket: String,
    /// Object key, relative, without leading slash
    pub key: String,
}

impl ObjectLocation {
    /// Create a location from bucket and key; leading slashes are stripped from the key
    pub fn new(bucket: impl Into<String>, key: impl AsRef<str>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.as_ref().trim_start_matches('/').to_string(),
        }
    }

    /// Whether `other` is this location or lies beneath it
    pub fn contains(&self, other: &ObjectLocation) -> bool {
        self.bucket == other.bucket
            && (other.key == self.key
                || (other.key.starts_with(&self.key)
                    && other.key[self.key.len()..].starts_with('/')))
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// A qualified logical resource path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
    url: Url,
    scheme: Scheme,
}

impl ResourcePath {
    /// Parse and qualify a logical path
    ///
    /// Accepts URLs (`s3://bucket/a/b`, `file:///data/a`) and bare local
    /// paths. Relative local paths are made absolute against the current
    /// directory. Trailing slashes are removed so that `s3://b/a/` and
    /// `s3://b/a` name the same resource, and the `s3a`/`s3n` aliases are
    /// rewritten to `s3` so that every alias shares one cache entry.
    pub fn parse(input: &str) -> ReaderResult<Self> {
        let invalid = |reason: String| ReaderError::InvalidPath {
            path: input.to_string(),
            reason,
        };

        let mut url = if input.contains("://") {
            Url::parse(input).map_err(|e| invalid(e.to_string()))?
        } else {
            let path = Path::new(input);
            let absolute = if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()
                    .map_err(|e| invalid(e.to_string()))?
                    .join(path)
            };
            Url::from_file_path(&absolute)
                .map_err(|_| invalid("not an absolute local path".to_string()))?
        };

        let trimmed = url.path().trim_end_matches('/').to_string();
        url.set_path(&trimmed);
        url.set_query(None);
        url.set_fragment(None);

        let mut scheme = Scheme::classify(url.scheme());
        if let Scheme::ObjectStore(_) = scheme {
            if url.host_str().map_or(true, str::is_empty) {
                return Err(invalid("object store path has no bucket".to_string()));
            }
            if trimmed.is_empty() {
                return Err(invalid("object store path has no key".to_string()));
            }
            if trimmed.split('/').any(|segment| segment == "..") {
                return Err(invalid("path escapes its bucket".to_string()));
            }
            url.set_scheme(layout::CANONICAL_STAGED_SCHEME)
                .map_err(|()| invalid("cannot normalize object store scheme".to_string()))?;
            scheme = Scheme::ObjectStore(layout::CANONICAL_STAGED_SCHEME.to_string());
        }

        Ok(Self { url, scheme })
    }

    /// How this resource must be read
    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// Whether the resource lives in an object store and must be staged
    pub fn requires_staging(&self) -> bool {
        matches!(self.scheme, Scheme::ObjectStore(_))
    }

    /// Cache key for this resource
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.to_string())
    }

    /// Path component without scheme or authority
    ///
    /// `s3://bucket/images/test-1` becomes `/images/test-1`.
    pub fn unqualified(&self) -> &str {
        self.url.path()
    }

    /// Bucket of an object store resource
    pub fn bucket(&self) -> Option<&str> {
        match self.scheme {
            Scheme::ObjectStore(_) => self.url.host_str(),
            _ => None,
        }
    }

    /// Object store location of the logical resource itself
    pub fn location(&self) -> Option<ObjectLocation> {
        self.bucket()
            .map(|bucket| ObjectLocation::new(bucket, self.unqualified()))
    }

    /// Object store location of the index part
    pub fn index_location(&self) -> Option<ObjectLocation> {
        self.part_location(layout::INDEX_PART)
    }

    /// Object store location of the data part
    pub fn data_location(&self) -> Option<ObjectLocation> {
        self.part_location(layout::DATA_PART)
    }

    fn part_location(&self, part: &str) -> Option<ObjectLocation> {
        self.location().map(|location| {
            ObjectLocation::new(location.bucket, format!("{}/{}", location.key, part))
        })
    }

    /// Local directory for in-place reads of `file` resources
    pub fn local_path(&self) -> Option<PathBuf> {
        match self.scheme {
            Scheme::Local => self.url.to_file_path().ok(),
            _ => None,
        }
    }

    /// Staging directory for this resource under `staging_root`
    pub fn staging_dir(&self, staging_root: &Path) -> Option<PathBuf> {
        let location = self.location()?;
        let mut dir = staging_root.join(&location.bucket);
        for segment in location.key.split('/').filter(|s| !s.is_empty()) {
            dir.push(segment);
        }
        Some(dir)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl std::str::FromStr for ResourcePath {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
