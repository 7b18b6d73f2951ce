//! Minimal manifest templating over a resolved [`Config`].
//!
//! Supported syntax:
//! - `{{ section.key }}` value substitution (missing keys render empty)
//! - `{{ section.key | default("text") }}` for empty/missing values
//! - `{{ section.key | join(", ") }}` over list values
//! - `{% if section.key %} ... {% endif %}` (truthiness: non-empty
//!   string/list/dict, true bool)
//! - `{% for item in section.key %} ... {% endfor %}` over lists
//! - `{% for k, v in section.key %} ... {% endfor %}` over dicts
//!
//! Rendering is pure text substitution; it never touches the filesystem and
//! never runs commands.

use std::collections::BTreeMap;
use thiserror::Error;
use venvpack_config::{Config, Value};

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unterminated '{0}' tag")]
    Unterminated(&'static str),
    #[error("malformed tag: {0}")]
    MalformedTag(String),
    #[error("'{found}' without a matching {expected}")]
    UnbalancedBlock {
        found: String,
        expected: &'static str,
    },
    #[error("unknown filter '{0}'")]
    UnknownFilter(String),
}

#[derive(Debug)]
enum Node {
    Text(String),
    Var {
        path: String,
        filter: Option<Filter>,
    },
    If {
        path: String,
        body: Vec<Node>,
    },
    For {
        bindings: Vec<String>,
        path: String,
        body: Vec<Node>,
    },
}

#[derive(Debug)]
enum Filter {
    Default(String),
    Join(String),
}

/// Render `template` against the resolved configuration.
pub fn render_template(template: &str, config: &Config) -> Result<String, TemplateError> {
    let tokens = tokenize(template)?;
    let mut stream = tokens.into_iter().peekable();
    let nodes = parse_nodes(&mut stream, None)?;
    let mut out = String::new();
    render_nodes(&nodes, config, &mut Scope::default(), &mut out);
    Ok(out)
}

#[derive(Debug)]
enum Token {
    Text(String),
    Var(String),
    BlockStart(String),
    BlockEnd(String),
}

fn tokenize(template: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut rest = template;

    loop {
        let var_at = rest.find("{{");
        let block_at = rest.find("{%");
        let (at, is_var) = match (var_at, block_at) {
            (Some(v), Some(b)) if v < b => (v, true),
            (Some(v), None) => (v, true),
            (_, Some(b)) => (b, false),
            (None, None) => break,
        };

        if at > 0 {
            tokens.push(Token::Text(rest[..at].to_owned()));
        }
        rest = &rest[at..];

        if is_var {
            let end = rest
                .find("}}")
                .ok_or(TemplateError::Unterminated("{{"))?;
            tokens.push(Token::Var(rest[2..end].trim().to_owned()));
            rest = &rest[end + 2..];
        } else {
            let end = rest
                .find("%}")
                .ok_or(TemplateError::Unterminated("{%"))?;
            let inner = rest[2..end].trim().to_owned();
            rest = &rest[end + 2..];
            if inner == "endif" || inner == "endfor" {
                tokens.push(Token::BlockEnd(inner));
            } else {
                tokens.push(Token::BlockStart(inner));
            }
        }
    }

    if !rest.is_empty() {
        tokens.push(Token::Text(rest.to_owned()));
    }
    Ok(tokens)
}

type TokenStream = std::iter::Peekable<std::vec::IntoIter<Token>>;

fn parse_nodes(
    stream: &mut TokenStream,
    until: Option<&str>,
) -> Result<Vec<Node>, TemplateError> {
    let mut nodes = Vec::new();

    while let Some(token) = stream.peek() {
        match token {
            Token::BlockEnd(name) => {
                if until == Some(name.as_str()) {
                    stream.next();
                    return Ok(nodes);
                }
                return Err(TemplateError::UnbalancedBlock {
                    found: name.clone(),
                    expected: "opening block",
                });
            }
            _ => {
                let token = stream.next().expect("peeked token exists");
                match token {
                    Token::Text(text) => nodes.push(Node::Text(text)),
                    Token::Var(expr) => nodes.push(parse_var(&expr)?),
                    Token::BlockStart(tag) => nodes.push(parse_block(&tag, stream)?),
                    Token::BlockEnd(_) => unreachable!("handled above"),
                }
            }
        }
    }

    if let Some(name) = until {
        return Err(TemplateError::UnbalancedBlock {
            found: "end of template".to_owned(),
            expected: if name == "endif" { "endif" } else { "endfor" },
        });
    }
    Ok(nodes)
}

fn parse_var(expr: &str) -> Result<Node, TemplateError> {
    let (path, filter) = match expr.split_once('|') {
        Some((path, filter_expr)) => (path.trim(), Some(parse_filter(filter_expr.trim())?)),
        None => (expr, None),
    };
    Ok(Node::Var {
        path: path.to_owned(),
        filter,
    })
}

fn parse_filter(expr: &str) -> Result<Filter, TemplateError> {
    let (name, arg) = match expr.split_once('(') {
        Some((name, rest)) => {
            let arg = rest
                .strip_suffix(')')
                .ok_or_else(|| TemplateError::MalformedTag(expr.to_owned()))?;
            (name.trim(), unquote(arg.trim()))
        }
        None => (expr, String::new()),
    };
    match name {
        "default" => Ok(Filter::Default(arg)),
        "join" => Ok(Filter::Join(arg)),
        other => Err(TemplateError::UnknownFilter(other.to_owned())),
    }
}

fn unquote(text: &str) -> String {
    let text = text.trim();
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return text[1..text.len() - 1].to_owned();
        }
    }
    text.to_owned()
}

fn parse_block(tag: &str, stream: &mut TokenStream) -> Result<Node, TemplateError> {
    if let Some(cond) = tag.strip_prefix("if ") {
        let body = parse_nodes(stream, Some("endif"))?;
        return Ok(Node::If {
            path: cond.trim().to_owned(),
            body,
        });
    }
    if let Some(spec) = tag.strip_prefix("for ") {
        let (vars, path) = spec
            .split_once(" in ")
            .ok_or_else(|| TemplateError::MalformedTag(tag.to_owned()))?;
        let bindings: Vec<String> = vars
            .split(',')
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
            .collect();
        if bindings.is_empty() || bindings.len() > 2 {
            return Err(TemplateError::MalformedTag(tag.to_owned()));
        }
        let body = parse_nodes(stream, Some("endfor"))?;
        return Ok(Node::For {
            bindings,
            path: path.trim().to_owned(),
            body,
        });
    }
    Err(TemplateError::MalformedTag(tag.to_owned()))
}

#[derive(Debug, Default)]
struct Scope {
    locals: BTreeMap<String, String>,
}

fn lookup(path: &str, config: &Config, scope: &Scope) -> Option<Value> {
    if let Some(local) = scope.locals.get(path) {
        return Some(Value::Str(local.clone()));
    }
    let (section, key) = path.split_once('.')?;
    config.get(section, key).cloned()
}

fn render_nodes(nodes: &[Node], config: &Config, scope: &mut Scope, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var { path, filter } => {
                let value = lookup(path, config, scope);
                out.push_str(&apply_filter(value.as_ref(), filter.as_ref()));
            }
            Node::If { path, body } => {
                let truthy = lookup(path, config, scope)
                    .as_ref()
                    .is_some_and(Value::is_truthy);
                if truthy {
                    render_nodes(body, config, scope, out);
                }
            }
            Node::For {
                bindings,
                path,
                body,
            } => {
                let Some(value) = lookup(path, config, scope) else {
                    continue;
                };
                if bindings.len() == 2 {
                    for (key, val) in value.as_dict() {
                        scope.locals.insert(bindings[0].clone(), key);
                        scope.locals.insert(bindings[1].clone(), val);
                        render_nodes(body, config, scope, out);
                    }
                    scope.locals.remove(&bindings[0]);
                    scope.locals.remove(&bindings[1]);
                } else {
                    for item in value.as_list() {
                        scope.locals.insert(bindings[0].clone(), item);
                        render_nodes(body, config, scope, out);
                    }
                    scope.locals.remove(&bindings[0]);
                }
            }
        }
    }
}

fn apply_filter(value: Option<&Value>, filter: Option<&Filter>) -> String {
    match filter {
        Some(Filter::Default(fallback)) => match value {
            Some(v) if v.is_truthy() => v.as_str(),
            _ => fallback.clone(),
        },
        Some(Filter::Join(separator)) => value
            .map(|v| v.as_list().join(separator))
            .unwrap_or_default(),
        None => value.map(Value::as_str).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use venvpack_config::Value;

    fn sample_config() -> Config {
        let mut config = Config::new();
        config.set_str("global", "name", "testapp");
        config.set_str("global", "version", "1.2.3");
        config.set_str("global", "description", "");
        config.set(
            "pip",
            "deps",
            Value::List(vec!["requests".to_owned(), "six".to_owned()]),
        );
        config.set("rpm_package", "noarch", Value::Bool(true));
        let mut env = std::collections::BTreeMap::new();
        env.insert("MODE".to_owned(), "fast".to_owned());
        env.insert("PORT".to_owned(), "8080".to_owned());
        config.set("docker_container", "setenv", Value::Dict(env));
        config
    }

    #[test]
    fn substitutes_section_values() {
        let rendered =
            render_template("Name: {{ global.name }}-{{ global.version }}", &sample_config())
                .unwrap();
        assert_eq!(rendered, "Name: testapp-1.2.3");
    }

    #[test]
    fn missing_values_render_empty() {
        let rendered = render_template("[{{ global.nope }}]", &sample_config()).unwrap();
        assert_eq!(rendered, "[]");
    }

    #[test]
    fn default_filter_applies_to_empty_and_missing() {
        let config = sample_config();
        let rendered = render_template(
            "{{ global.description | default(\"No summary\") }}",
            &config,
        )
        .unwrap();
        assert_eq!(rendered, "No summary");
        let rendered =
            render_template("{{ global.name | default(\"unnamed\") }}", &config).unwrap();
        assert_eq!(rendered, "testapp");
    }

    #[test]
    fn join_filter_over_lists() {
        let rendered =
            render_template("Requires: {{ pip.deps | join(\", \") }}", &sample_config()).unwrap();
        assert_eq!(rendered, "Requires: requests, six");
    }

    #[test]
    fn if_blocks_follow_truthiness() {
        let config = sample_config();
        let rendered = render_template(
            "{% if rpm_package.noarch %}BuildArch: noarch{% endif %}",
            &config,
        )
        .unwrap();
        assert_eq!(rendered, "BuildArch: noarch");
        let rendered = render_template(
            "{% if global.description %}never{% endif %}ok",
            &config,
        )
        .unwrap();
        assert_eq!(rendered, "ok");
    }

    #[test]
    fn for_loops_over_lists_and_dicts() {
        let config = sample_config();
        let rendered = render_template(
            "{% for dep in pip.deps %}dep={{ dep }}\n{% endfor %}",
            &config,
        )
        .unwrap();
        assert_eq!(rendered, "dep=requests\ndep=six\n");

        let rendered = render_template(
            "{% for k, v in docker_container.setenv %}ENV {{ k }}=\"{{ v }}\"\n{% endfor %}",
            &config,
        )
        .unwrap();
        assert_eq!(rendered, "ENV MODE=\"fast\"\nENV PORT=\"8080\"\n");
    }

    #[test]
    fn unbalanced_blocks_are_errors() {
        assert!(render_template("{% if global.name %}x", &sample_config()).is_err());
        assert!(render_template("x{% endfor %}", &sample_config()).is_err());
        assert!(render_template("{{ global.name", &sample_config()).is_err());
    }

    #[test]
    fn rendering_runs_nothing_and_is_pure() {
        let config = sample_config();
        let a = render_template("{{ global.name }}", &config).unwrap();
        let b = render_template("{{ global.name }}", &config).unwrap();
        assert_eq!(a, b);
    }
}
