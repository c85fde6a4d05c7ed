//! Output destinations.
//!
//! A destination string is either an object-storage URL (`s3://bucket/prefix`)
//! or a filesystem path. Anything that does not parse as an `s3` URL with a
//! bucket is treated as a path.

use std::fmt;
use std::path::{Path, PathBuf};

use reqwest::Url;

use crate::error::{Error, Result};

/// An object in a bucket, addressed as `s3://bucket/key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectUrl {
    bucket: String,
    key: String,
}

impl ObjectUrl {
    /// Parses `s3://bucket/key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the string is not an `s3` URL with a
    /// bucket.
    pub fn parse(s: &str) -> Result<Self> {
        let url = Url::parse(s).map_err(|e| Error::InvalidInput(format!("{s}: {e}")))?;
        if url.scheme() != "s3" {
            return Err(Error::InvalidInput(format!("{s}: not an s3 URL")));
        }
        let bucket = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidInput(format!("{s}: missing bucket")))?;
        Ok(Self {
            bucket: bucket.to_string(),
            key: url.path().trim_matches('/').to_string(),
        })
    }

    /// Creates an object URL from parts.
    #[must_use]
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into().trim_matches('/').to_string(),
        }
    }

    /// The bucket name.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The key (no leading slash).
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Appends a relative path to the key.
    #[must_use]
    pub fn join(&self, relative: &str) -> Self {
        let relative = relative.trim_matches('/');
        let key = match (self.key.is_empty(), relative.is_empty()) {
            (true, _) => relative.to_string(),
            (false, true) => self.key.clone(),
            (false, false) => format!("{}/{relative}", self.key),
        };
        Self {
            bucket: self.bucket.clone(),
            key,
        }
    }

    /// Public HTTPS address of the object.
    #[must_use]
    pub fn https_url(&self, region: &str) -> String {
        format!(
            "https://{}.s3.{region}.amazonaws.com/{}",
            self.bucket, self.key
        )
    }
}

impl fmt::Display for ObjectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Where output packages are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// A directory on the local filesystem.
    Local(PathBuf),
    /// A prefix in object storage.
    Object(ObjectUrl),
}

impl Location {
    /// Classifies a destination string.
    #[must_use]
    pub fn classify(s: &str) -> Self {
        ObjectUrl::parse(s).map_or_else(|_| Self::Local(PathBuf::from(s)), Self::Object)
    }

    /// Appends a relative path.
    #[must_use]
    pub fn join(&self, relative: &str) -> Self {
        match self {
            Self::Local(path) => Self::Local(path.join(relative.trim_start_matches('/'))),
            Self::Object(url) => Self::Object(url.join(relative)),
        }
    }

    /// Returns the local path, if this is a local location.
    #[must_use]
    pub fn as_local(&self) -> Option<&Path> {
        match self {
            Self::Local(path) => Some(path),
            Self::Object(_) => None,
        }
    }

    /// Whether this points into object storage.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Object(_))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Object(url) => write!(f, "{url}"),
        }
    }
}
