use crate::value::{Config, Value};
use std::collections::BTreeMap;

/// Raw parse result before substitution and coercion: every value a string.
pub type RawSections = BTreeMap<String, BTreeMap<String, String>>;

/// Parse an INI-style configuration text.
///
/// Dialect notes, matching the deploy.conf files in the wild:
/// - `[section]` headers; settings as `key = value` or `key: value`
/// - keys are lowercased; values keep their case
/// - indented lines continue the previous value (joined with newlines),
///   which is how multi-line `deps` lists are written
/// - `#` and `;` start comment lines
/// - settings before any section header are ignored
pub fn parse_ini_str(text: &str) -> RawSections {
    let mut sections = RawSections::new();
    let mut current_section: Option<String> = None;
    let mut current_key: Option<String> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            let name = trimmed[1..trimmed.len() - 1].trim().to_owned();
            sections.entry(name.clone()).or_default();
            current_section = Some(name);
            current_key = None;
            continue;
        }

        // Continuation line: starts with whitespace and continues the last key.
        if line.starts_with([' ', '\t']) && !trimmed.is_empty() {
            if let (Some(section), Some(key)) = (&current_section, &current_key) {
                if let Some(value) = sections
                    .get_mut(section)
                    .and_then(|entries| entries.get_mut(key))
                {
                    value.push('\n');
                    value.push_str(trimmed);
                }
            }
            continue;
        }

        if trimmed.is_empty() {
            continue;
        }

        let Some(section) = &current_section else {
            continue;
        };

        // Split at whichever delimiter comes first, so a colon-separated
        // value may contain `=` and vice versa.
        let delimiter = match (trimmed.find('='), trimmed.find(':')) {
            (Some(eq), Some(colon)) => Some(eq.min(colon)),
            (eq, colon) => eq.or(colon),
        };
        if let Some(at) = delimiter {
            let key = trimmed[..at].trim().to_lowercase();
            let value = trimmed[at + 1..].trim().to_owned();
            sections
                .get_mut(section)
                .expect("current section always exists")
                .insert(key.clone(), value);
            current_key = Some(key);
        }
    }

    sections
}

/// Merge `overlay` onto `base` at (section, key) granularity: a key present
/// in the overlay replaces the base value entirely, there is no merging
/// within a single value.
pub fn merge_raw(base: &mut RawSections, overlay: RawSections) {
    for (section, entries) in overlay {
        let target = base.entry(section).or_default();
        for (key, value) in entries {
            target.insert(key, value);
        }
    }
}

/// Serialize a resolved [`Config`] back into the same INI dialect, so the
/// rendered manifest's install-time commands can re-read the exact resolved
/// settings. Multi-line values are emitted as indented continuation lines.
pub fn write_ini_string(config: &Config) -> String {
    let mut out = String::new();
    for (section, entries) in config.sections() {
        out.push('[');
        out.push_str(section);
        out.push_str("]\n");
        for (key, value) in entries {
            write_setting(&mut out, key, value);
        }
        out.push('\n');
    }
    out
}

fn write_setting(out: &mut String, key: &str, value: &Value) {
    let text = value.as_str();
    let mut lines = text.lines();
    let first = lines.next().unwrap_or_default();
    out.push_str(key);
    out.push_str(" = ");
    out.push_str(first);
    out.push('\n');
    for line in lines {
        out.push_str("    ");
        out.push_str(line);
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# deployment description
[global]
name = testapp
version: 1.2.3

[pip]
deps:
    requests
    six>=1.0

[rpm]
deps =
";

    #[test]
    fn parses_sections_keys_and_continuations() {
        let raw = parse_ini_str(SAMPLE);
        assert_eq!(raw["global"]["name"], "testapp");
        assert_eq!(raw["global"]["version"], "1.2.3");
        assert_eq!(raw["pip"]["deps"], "\nrequests\nsix>=1.0");
        assert_eq!(raw["rpm"]["deps"], "");
    }

    #[test]
    fn value_keeps_the_other_delimiter() {
        let raw = parse_ini_str(
            "[docker_container]\nentrypoint: app --mode=fast\nlabel = stage: prod\n",
        );
        assert_eq!(raw["docker_container"]["entrypoint"], "app --mode=fast");
        assert_eq!(raw["docker_container"]["label"], "stage: prod");
    }

    #[test]
    fn keys_are_lowercased() {
        let raw = parse_ini_str("[global]\nName = Foo\n");
        assert_eq!(raw["global"]["name"], "Foo");
    }

    #[test]
    fn later_sources_override_at_key_granularity() {
        let mut base = parse_ini_str("[global]\nname = base\nversion = 1.0\n");
        let overlay = parse_ini_str("[global]\nname = overlay\n");
        merge_raw(&mut base, overlay);
        assert_eq!(base["global"]["name"], "overlay");
        assert_eq!(base["global"]["version"], "1.0");
    }

    #[test]
    fn roundtrips_through_writer() {
        let raw = parse_ini_str(SAMPLE);
        let mut config = Config::new();
        for (section, entries) in &raw {
            for (key, value) in entries {
                config.set_str(section, key, value.clone());
            }
        }
        let written = write_ini_string(&config);
        let reparsed = parse_ini_str(&written);
        assert_eq!(reparsed["global"]["name"], "testapp");
        assert_eq!(reparsed["pip"]["deps"], "\nrequests\nsix>=1.0");
    }
}
