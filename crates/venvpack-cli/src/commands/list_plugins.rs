use super::{json_pretty, EXIT_SUCCESS};
use venvpack_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let formats = engine.list_formats();

    if json {
        let payload: Vec<_> = formats
            .iter()
            .map(|status| {
                serde_json::json!({
                    "format": status.format,
                    "available": status.available
                })
            })
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else {
        for status in &formats {
            if status.available {
                println!("{}", status.format);
            } else {
                println!("{} (unavailable)", status.format);
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
