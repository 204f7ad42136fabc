//! Cumulative-scan parser for A/B update packages.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek};
use std::path::Path;

use tracing::{debug, info};
use zip::result::ZipError;
use zip::ZipArchive;

use super::descriptor::UpdatePackageDescriptor;
use super::error::{PackageError, PackageResult};

/// Entry holding the raw update payload.
pub const PAYLOAD_BIN_ENTRY: &str = "payload.bin";

/// Entry holding newline-delimited `key=value` payload properties.
pub const PAYLOAD_PROPERTIES_ENTRY: &str = "payload_properties.txt";

/// Fixed part of a zip local file header, in bytes.
pub const ZIP_LOCAL_HEADER_LEN: u64 = 30;

/// Bytes occupied by an entry's local header before its data.
pub fn entry_header_span(name_len: usize, extra_len: usize) -> u64 {
    ZIP_LOCAL_HEADER_LEN + name_len as u64 + extra_len as u64
}

/// Parse an update package into a descriptor.
///
/// Entries are visited in central-directory order. The returned descriptor
/// may be invalid (no payload, no properties); callers check
/// [`UpdatePackageDescriptor::is_valid`].
///
/// # Errors
///
/// [`PackageError::ContainerRead`] if the archive cannot be opened or
/// enumerated, [`PackageError::PropertiesRead`] if the properties entry
/// cannot be read as text.
pub fn parse(container: &Path) -> PackageResult<UpdatePackageDescriptor> {
    let container_read = |source: ZipError| PackageError::ContainerRead {
        path: container.to_path_buf(),
        source,
    };

    let file = File::open(container).map_err(|e| container_read(ZipError::Io(e)))?;
    let absolute = std::path::absolute(container).map_err(|e| container_read(ZipError::Io(e)))?;
    let mut archive = ZipArchive::new(file).map_err(container_read)?;

    let mut payload_offset: u64 = 0;
    let mut payload_size: u64 = 0;
    let mut payload_found = false;
    let mut properties: Option<Vec<String>> = None;

    for index in 0..archive.len() {
        // Raw access reads headers only, so entries compressed with a
        // method this build cannot decode still count toward the offset.
        let entry = archive.by_index_raw(index).map_err(container_read)?;
        let name = entry.name().to_string();
        let compressed_size = entry.compressed_size();
        let is_dir = entry.is_dir();

        if !payload_found {
            let extra_len = entry.extra_data().map_or(0, <[u8]>::len);
            payload_offset += entry_header_span(entry.name_raw().len(), extra_len);
        }
        drop(entry);

        if is_dir {
            continue;
        }

        if name == PAYLOAD_BIN_ENTRY {
            payload_size = compressed_size;
            payload_found = true;
        } else if name == PAYLOAD_PROPERTIES_ENTRY {
            properties = Some(read_properties(&mut archive, index, container)?);
        }

        if !payload_found {
            payload_offset += compressed_size;
        }

        debug!(entry = %name, compressed_size, "Scanned package entry");
    }

    let descriptor = UpdatePackageDescriptor::new(absolute, payload_offset, payload_size, properties);
    info!(descriptor = %descriptor, "Parsed update package");
    Ok(descriptor)
}

fn read_properties<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    index: usize,
    container: &Path,
) -> PackageResult<Vec<String>> {
    let entry = archive
        .by_index(index)
        .map_err(|source| PackageError::ContainerRead {
            path: container.to_path_buf(),
            source,
        })?;
    read_lines(entry).map_err(|source| PackageError::PropertiesRead {
        path: container.to_path_buf(),
        source,
    })
}

fn read_lines(reader: impl Read) -> io::Result<Vec<String>> {
    BufReader::new(reader).lines().collect()
}
