//! Environment interpolation over YAML string scalars.
//!
//! Implements the Docker-Compose substitution grammar: `${VAR}`,
//! `${VAR:-default}`, `${VAR-default}`, `${VAR:?message}`, `${VAR?message}`,
//! with `$$` as the escape for a literal dollar. Expansion is
//! leftmost-first; substituted text is expanded again, so defaults may
//! themselves reference variables. After expansion a string that reads as a
//! JSON literal (`null`, bool, number, array, object) is replaced by the
//! parsed value; anything else stays a string.

use crate::config::EnvSnapshot;
use crate::error::Error;

/// Substituted text is re-expanded; the cap breaks self-referential cycles
/// like `A=${A}`.
const MAX_EXPANSION_DEPTH: usize = 16;

/// Expands every substitution in `input` against the snapshot.
///
/// # Errors
///
/// Returns a `Config` error when a `${VAR:?msg}` / `${VAR?msg}` requirement
/// fails or the nesting depth cap is exceeded.
pub fn expand_str(input: &str, env: &EnvSnapshot) -> Result<String, Error> {
    expand_tracking(input, env, 0).map(|(text, _)| text)
}

/// Converts an interpolated YAML document into the canonical JSON value
/// representation used for layer merging.
///
/// Only string scalars that actually underwent expansion are candidates for
/// the JSON post-parse; untouched scalars keep their YAML typing.
///
/// # Errors
///
/// Propagates expansion failures from any string scalar in the document.
pub fn interpolate_document(
    doc: serde_yaml::Value,
    env: &EnvSnapshot,
) -> Result<serde_json::Value, Error> {
    match doc {
        serde_yaml::Value::Null => Ok(serde_json::Value::Null),
        serde_yaml::Value::Bool(b) => Ok(serde_json::Value::Bool(b)),
        serde_yaml::Value::Number(n) => Ok(yaml_number(&n)),
        serde_yaml::Value::String(s) => {
            let (expanded, changed) = expand_tracking(&s, env, 0)?;
            if changed {
                Ok(json_post_parse(expanded))
            } else {
                Ok(serde_json::Value::String(expanded))
            }
        }
        serde_yaml::Value::Sequence(items) => items
            .into_iter()
            .map(|item| interpolate_document(item, env))
            .collect::<Result<Vec<_>, _>>()
            .map(serde_json::Value::Array),
        serde_yaml::Value::Mapping(mapping) => {
            let mut out = serde_json::Map::with_capacity(mapping.len());
            for (key, value) in mapping {
                let key = match key {
                    serde_yaml::Value::String(s) => s,
                    other => serde_yaml::to_string(&other)
                        .map(|s| s.trim_end().to_string())
                        .unwrap_or_default(),
                };
                out.insert(key, interpolate_document(value, env)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        serde_yaml::Value::Tagged(tagged) => interpolate_document(tagged.value, env),
    }
}

fn yaml_number(n: &serde_yaml::Number) -> serde_json::Value {
    if let Some(i) = n.as_i64() {
        serde_json::Value::from(i)
    } else if let Some(u) = n.as_u64() {
        serde_json::Value::from(u)
    } else {
        n.as_f64().map_or(serde_json::Value::Null, |f| {
            serde_json::Number::from_f64(f).map_or(serde_json::Value::Null, serde_json::Value::Number)
        })
    }
}

/// Replaces an expanded string with its parsed form when it reads as a
/// non-string JSON literal.
fn json_post_parse(expanded: String) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(expanded.trim()) {
        Ok(value) if !value.is_string() => value,
        _ => serde_json::Value::String(expanded),
    }
}

fn expand_tracking(input: &str, env: &EnvSnapshot, depth: usize) -> Result<(String, bool), Error> {
    if depth > MAX_EXPANSION_DEPTH {
        return Err(Error::interpolation(
            "interpolation nesting exceeds the recursion limit",
        ));
    }

    let mut out = String::with_capacity(input.len());
    let mut changed = false;
    let mut rest = input;

    while let Some(start) = rest.find('$') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        // `$$` escapes a literal dollar, so `$${FOO}` yields `${FOO}`.
        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            changed = true;
            rest = tail;
            continue;
        }

        let Some(body_start) = after.strip_prefix('{') else {
            // A lone `$` is ordinary text.
            out.push('$');
            rest = after;
            continue;
        };

        let Some((body, tail)) = split_braced(body_start) else {
            // Unclosed brace, treat as literal.
            out.push('$');
            rest = after;
            continue;
        };

        match parse_substitution(body, env)? {
            Some(replacement) => {
                let (expanded, _) = expand_tracking(&replacement, env, depth + 1)?;
                out.push_str(&expanded);
                changed = true;
            }
            None => {
                // Not a recognized substitution, keep the original text.
                out.push_str("${");
                out.push_str(body);
                out.push('}');
            }
        }
        rest = tail;
    }

    out.push_str(rest);
    Ok((out, changed))
}

/// Splits `body}rest` at the close brace matching the already-consumed open
/// brace, counting nested `${` openings.
fn split_braced(input: &str) -> Option<(&str, &str)> {
    let bytes = input.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                depth += 1;
                i += 2;
            }
            b'}' => {
                if depth == 0 {
                    return Some((&input[..i], &input[i + 1..]));
                }
                depth -= 1;
                i += 1;
            }
            _ => i += 1,
        }
    }
    None
}

/// Evaluates one `VAR[op...]` substitution body. Returns `Ok(None)` when the
/// body is not a recognized substitution and should stay literal.
fn parse_substitution(body: &str, env: &EnvSnapshot) -> Result<Option<String>, Error> {
    let name_len = body
        .char_indices()
        .take_while(|&(i, c)| {
            if i == 0 {
                c.is_ascii_alphabetic() || c == '_'
            } else {
                c.is_ascii_alphanumeric() || c == '_'
            }
        })
        .count();
    if name_len == 0 {
        return Ok(None);
    }
    let (name, op) = body.split_at(name_len);
    let value = env.get(name);

    let resolved = if op.is_empty() {
        value.unwrap_or("").to_string()
    } else if let Some(default) = op.strip_prefix(":-") {
        match value {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => default.to_string(),
        }
    } else if let Some(message) = op.strip_prefix(":?") {
        match value {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => return Err(required_var_error(name, message)),
        }
    } else if let Some(default) = op.strip_prefix('-') {
        value.map_or_else(|| default.to_string(), ToString::to_string)
    } else if let Some(message) = op.strip_prefix('?') {
        match value {
            Some(v) => v.to_string(),
            None => return Err(required_var_error(name, message)),
        }
    } else {
        return Ok(None);
    };

    Ok(Some(resolved))
}

fn required_var_error(name: &str, message: &str) -> Error {
    if message.is_empty() {
        Error::interpolation(format!("required variable '{name}' is not set"))
    } else {
        Error::interpolation(message.to_string())
    }
}
