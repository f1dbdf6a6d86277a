//! `stagecraft version`.

use anyhow::Result;

/// Print version information.
pub fn run() -> Result<()> {
    println!("stagecraft {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
