use super::{json_pretty, EXIT_FAILURE, EXIT_SUCCESS};
use venvpack_core::{CoreError, Engine};

pub fn run(engine: &Engine, section: &str, item: &str, json: bool) -> Result<u8, String> {
    let (value, code) = match engine.get_setting(section, item) {
        Ok(value) => (value, EXIT_SUCCESS),
        // Absent settings print an empty value and fail the exit code, so
        // shell callers can use the output unconditionally.
        Err(CoreError::Config(_)) => (String::new(), EXIT_FAILURE),
        Err(e) => return Err(e.to_string()),
    };

    if json {
        let payload = serde_json::json!({
            "section": section,
            "item": item,
            "value": value
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{value}");
    }
    Ok(code)
}
