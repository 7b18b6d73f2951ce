use std::collections::BTreeMap;

/// Substitute `{{VAR}}` placeholders against the process environment.
///
/// Placeholders whose variable is unset are left verbatim, never an error:
/// a deploy.conf must be renderable on hosts missing optional variables.
pub fn expand_env(text: &str) -> String {
    let env: BTreeMap<String, String> = std::env::vars().collect();
    expand_with(text, &env)
}

/// Substitute `{{VAR}}` placeholders against an explicit variable map.
pub fn expand_with(text: &str, vars: &BTreeMap<String, String>) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        let (head, tail) = rest.split_at(start);
        result.push_str(head);
        match tail.find("}}") {
            Some(end) => {
                let placeholder = &tail[..end + 2];
                let name = tail[2..end].trim();
                if is_identifier(name) {
                    if let Some(value) = vars.get(name) {
                        result.push_str(value);
                    } else {
                        result.push_str(placeholder);
                    }
                } else {
                    result.push_str(placeholder);
                }
                rest = &tail[end + 2..];
            }
            None => {
                // Unterminated braces; keep the remainder untouched.
                result.push_str(tail);
                rest = "";
            }
        }
    }

    result.push_str(rest);
    result
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
