//! JSON output formatting.

use serde::Serialize;
use std::io;

/// Print any artifact as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    println!("{}", json);
    Ok(())
}
