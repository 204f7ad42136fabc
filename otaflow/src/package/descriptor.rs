//! Immutable description of an applyable update payload.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Scheme prefix the update engine expects for local payloads.
pub const FILE_URL_PREFIX: &str = "file://";

/// Everything the update engine needs to apply a payload out of a package.
///
/// Created once per parse and never mutated. Use [`is_valid`](Self::is_valid)
/// before handing it to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdatePackageDescriptor {
    source_uri: String,
    payload_offset: u64,
    payload_size: u64,
    properties: Option<Vec<String>>,
    #[serde(skip)]
    container_path: PathBuf,
}

impl UpdatePackageDescriptor {
    /// Create a descriptor for a payload embedded in `container_path`.
    ///
    /// The source URI is derived from the path as given; callers pass an
    /// absolute path.
    pub fn new(
        container_path: impl Into<PathBuf>,
        payload_offset: u64,
        payload_size: u64,
        properties: Option<Vec<String>>,
    ) -> Self {
        let container_path = container_path.into();
        let source_uri = format!("{}{}", FILE_URL_PREFIX, container_path.display());
        Self {
            source_uri,
            payload_offset,
            payload_size,
            properties,
            container_path,
        }
    }

    /// `file://` URI of the container.
    pub fn source_uri(&self) -> &str {
        &self.source_uri
    }

    /// Byte offset of the payload within the container.
    pub fn payload_offset(&self) -> u64 {
        self.payload_offset
    }

    /// Byte length of the payload.
    pub fn payload_size(&self) -> u64 {
        self.payload_size
    }

    /// Raw `key=value` property lines, if the properties entry was present.
    pub fn properties(&self) -> Option<&[String]> {
        self.properties.as_deref()
    }

    /// Path of the container on disk.
    pub fn container_path(&self) -> &Path {
        &self.container_path
    }

    /// Look up a property value by key.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties()?.iter().find_map(|line| {
            let (k, v) = line.split_once('=')?;
            (k == key).then_some(v)
        })
    }

    /// Whether the descriptor can be handed to the update engine.
    ///
    /// The offset is unsigned, so validity reduces to a non-empty payload
    /// with a properties list present.
    pub fn is_valid(&self) -> bool {
        self.payload_size > 0 && self.properties.is_some()
    }

    /// Human-readable reason the descriptor is invalid, if it is.
    pub fn invalid_reason(&self) -> Option<&'static str> {
        if self.payload_size == 0 {
            Some("payload.bin missing or empty")
        } else if self.properties.is_none() {
            Some("payload_properties.txt missing")
        } else {
            None
        }
    }
}

impl fmt::Display for UpdatePackageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "URL={}, offset={}, size={}, props=",
            self.source_uri, self.payload_offset, self.payload_size
        )?;
        match &self.properties {
            Some(props) => write!(f, "[{}]", props.join(", ")),
            None => write!(f, "null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> Option<Vec<String>> {
        Some(vec![
            "FILE_HASH=abc".to_string(),
            "FILE_SIZE=2000".to_string(),
            "METADATA_HASH=def".to_string(),
        ])
    }

    #[test]
    fn test_source_uri_uses_file_scheme() {
        let d = UpdatePackageDescriptor::new("/data/ota/update.zip", 100, 2000, props());
        assert_eq!(d.source_uri(), "file:///data/ota/update.zip");
        assert_eq!(d.container_path(), Path::new("/data/ota/update.zip"));
    }

    #[test]
    fn test_valid_descriptor() {
        let d = UpdatePackageDescriptor::new("/a.zip", 0, 1, props());
        assert!(d.is_valid());
        assert!(d.invalid_reason().is_none());
    }

    #[test]
    fn test_zero_size_is_invalid() {
        let d = UpdatePackageDescriptor::new("/a.zip", 100, 0, props());
        assert!(!d.is_valid());
        assert_eq!(d.invalid_reason(), Some("payload.bin missing or empty"));
    }

    #[test]
    fn test_missing_properties_is_invalid() {
        let d = UpdatePackageDescriptor::new("/a.zip", 100, 2000, None);
        assert!(!d.is_valid());
        assert_eq!(d.invalid_reason(), Some("payload_properties.txt missing"));
    }

    #[test]
    fn test_empty_properties_still_valid() {
        let d = UpdatePackageDescriptor::new("/a.zip", 100, 2000, Some(vec![]));
        assert!(d.is_valid());
    }

    #[test]
    fn test_property_lookup() {
        let d = UpdatePackageDescriptor::new("/a.zip", 100, 2000, props());
        assert_eq!(d.property("FILE_SIZE"), Some("2000"));
        assert_eq!(d.property("FILE"), None);
        assert_eq!(d.property("MISSING"), None);
    }

    #[test]
    fn test_display() {
        let d = UpdatePackageDescriptor::new("/a.zip", 7, 9, Some(vec!["A=1".to_string()]));
        assert_eq!(d.to_string(), "URL=file:///a.zip, offset=7, size=9, props=[A=1]");

        let d = UpdatePackageDescriptor::new("/a.zip", 7, 9, None);
        assert!(d.to_string().ends_with("props=null"));
    }
}
