//! Update package parsing.
//!
//! An A/B update package is a zip archive carrying the raw payload
//! (`payload.bin`) and its sidecar properties (`payload_properties.txt`).
//! The update engine reads the payload straight out of the archive, so the
//! parser's job is to work out where the payload bytes start and how many
//! there are.
//!
//! # Offset computation
//!
//! The offset is computed by a cumulative scan over the central directory,
//! not read from a stored field:
//!
//! ```text
//! offset = Σ (30 + name_len + extra_len + compressed_size)   for entries before payload.bin
//!        + (30 + name_len + extra_len)                       for payload.bin itself
//! ```
//!
//! Directory entries contribute their header span but no data.
//!
//! # Example
//!
//! ```ignore
//! use otaflow::package::parse;
//!
//! let descriptor = parse(Path::new("/data/ota_package/update.zip"))?;
//! assert!(descriptor.is_valid());
//! println!("{}", descriptor);
//! ```

mod descriptor;
mod error;
mod parser;

pub use descriptor::{UpdatePackageDescriptor, FILE_URL_PREFIX};
pub use error::{PackageError, PackageResult};
pub use parser::{
    entry_header_span, parse, PAYLOAD_BIN_ENTRY, PAYLOAD_PROPERTIES_ENTRY, ZIP_LOCAL_HEADER_LEN,
};
