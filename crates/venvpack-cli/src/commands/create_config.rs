use super::{json_pretty, EXIT_SUCCESS};
use std::path::Path;
use venvpack_core::Engine;

pub fn run(
    engine: &Engine,
    format: &str,
    outfile: Option<&Path>,
    json: bool,
) -> Result<u8, String> {
    let written = engine
        .create_package_config(format, outfile)
        .map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({
            "format": format,
            "outfile": written.display().to_string()
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("Wrote build configuration: {}", written.display());
    }
    Ok(EXIT_SUCCESS)
}
