//! Inspect command - print what the parser finds in an update package.

use std::path::Path;

use otaflow::package::{self, UpdatePackageDescriptor};
use serde_json::json;

use crate::error::CliError;

/// Run the inspect command.
pub fn run(path: &Path, as_json: bool) -> Result<(), CliError> {
    let descriptor = package::parse(path)?;

    if as_json {
        println!("{}", to_json(&descriptor));
        return Ok(());
    }

    println!("Package:  {}", descriptor.container_path().display());
    println!("URL:      {}", descriptor.source_uri());
    println!("Offset:   {}", descriptor.payload_offset());
    println!("Size:     {}", descriptor.payload_size());
    match descriptor.properties() {
        Some(props) => {
            println!("Properties:");
            for line in props {
                println!("  {}", line);
            }
        }
        None => println!("Properties: (none)"),
    }
    println!();
    match descriptor.invalid_reason() {
        None => println!("Valid: yes"),
        Some(reason) => println!("Valid: no ({})", reason),
    }
    Ok(())
}

fn to_json(descriptor: &UpdatePackageDescriptor) -> String {
    let value = json!({
        "package": descriptor.container_path(),
        "descriptor": descriptor,
        "valid": descriptor.is_valid(),
        "invalid_reason": descriptor.invalid_reason(),
    });
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
}
