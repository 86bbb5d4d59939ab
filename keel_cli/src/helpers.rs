use anyhow::{Context, Result, bail};
use serde::Serialize;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{json}");
    Ok(())
}

/// Parses `--custom` target metadata; only JSON objects are accepted.
pub fn parse_custom(raw: Option<&str>) -> Result<Option<serde_json::Value>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: serde_json::Value =
        serde_json::from_str(raw).context("--custom is not valid JSON")?;
    if !value.is_object() {
        bail!("--custom must be a JSON object");
    }
    Ok(Some(value))
}
