use anyhow::{Context, Result};
use serde::Serialize;

/// Renders raw input for logs, escaping anything unprintable.
pub(crate) fn escape_input(input: &[u8]) -> String {
    input.escape_ascii().to_string()
}

pub(crate) fn parse_payload(raw: &[u8]) -> Result<serde_json::Value> {
    serde_json::from_slice(raw).context("payload is not valid JSON")
}

/// Prints `value` as a single line of JSON.
pub(crate) fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string(value).context("encoding output")?);
    Ok(())
}

pub(crate) fn print_yaml(value: &impl Serialize) -> Result<()> {
    print!("{}", serde_yaml::to_string(value).context("encoding output")?);
    Ok(())
}
