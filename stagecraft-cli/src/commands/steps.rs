//! `stagecraft steps` - list available step types.

use anyhow::Result;

/// Print every registered step type.
pub fn run() -> Result<()> {
    let registry = super::full_registry()?;
    for step_type in registry.step_types() {
        println!("{}", step_type);
    }
    Ok(())
}
