use super::{json_pretty, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use venvpack_core::Engine;

pub fn run(engine: &Engine, format: &str, json: bool) -> Result<u8, String> {
    let dest = std::env::current_dir().map_err(|e| e.to_string())?;

    let pb = if json {
        None
    } else {
        Some(spinner(&format!("building {format} package...")))
    };

    let artifact = match engine.create_package(format, &dest) {
        Ok(path) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, "package built");
            }
            path
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "package build failed");
            }
            return Err(e.to_string());
        }
    };

    if json {
        let payload = serde_json::json!({
            "format": format,
            "artifact": artifact.display().to_string(),
            "status": "built"
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("Generated package: {}", artifact.display());
    }
    Ok(EXIT_SUCCESS)
}
