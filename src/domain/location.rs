//! Durable storage addresses (`s3://bucket/key`)

use std::fmt;

use thiserror::Error;

pub const SCHEME: &str = "s3://";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Not a valid storage address '{0}', expected s3://bucket/key")]
pub struct LocationError(pub String);

/// A bucket and a key within it
///
/// Keys are stored without a leading slash; an empty key is the bucket root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageLocation {
    pub bucket: String,
    pub key: String,
}

impl StorageLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            bucket: bucket.into(),
            key: key.trim_start_matches('/').to_string(),
        }
    }

    pub fn parse(address: &str) -> Result<Self, LocationError> {
        let rest = address
            .strip_prefix(SCHEME)
            .ok_or_else(|| LocationError(address.to_string()))?;

        let (bucket, key) = match rest.split_once('/') {
            Some((bucket, key)) => (bucket, key),
            None => (rest, ""),
        };

        if bucket.is_empty() {
            return Err(LocationError(address.to_string()));
        }

        Ok(Self::new(bucket, key))
    }

    pub fn is_bucket_root(&self) -> bool {
        self.key.is_empty()
    }

    /// The "directory" holding this key, with a trailing slash
    pub fn parent(&self) -> Self {
        let key = match self.key.rsplit_once('/') {
            Some((dir, _)) => format!("{}/", dir),
            None => String::new(),
        };
        Self {
            bucket: self.bucket.clone(),
            key,
        }
    }

    /// Last path segment of the key
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", SCHEME, self.bucket, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bucket_and_key() {
        let location = StorageLocation::parse("s3://releases/app/app-1.tar.gz").unwrap();
        assert_eq!(location.bucket, "releases");
        assert_eq!(location.key, "app/app-1.tar.gz");
        assert_eq!(location.file_name(), "app-1.tar.gz");
        assert_eq!(location.to_string(), "s3://releases/app/app-1.tar.gz");
    }

    #[test]
    fn bucket_root() {
        let location = StorageLocation::parse("s3://releases").unwrap();
        assert!(location.is_bucket_root());
        assert_eq!(location.to_string(), "s3://releases/");

        assert!(StorageLocation::parse("s3://releases/").unwrap().is_bucket_root());
    }

    #[test]
    fn parent_directory() {
        let location = StorageLocation::parse("s3://releases/app/app-1.tar.gz").unwrap();
        assert_eq!(location.parent().key, "app/");

        let top = StorageLocation::parse("s3://releases/app-1.tar.gz").unwrap();
        assert!(top.parent().is_bucket_root());
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(StorageLocation::parse("https://releases/app").is_err());
        assert!(StorageLocation::parse("s3:///key").is_err());
        assert!(StorageLocation::parse("releases/app").is_err());
    }
}
