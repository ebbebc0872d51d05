//! Strict, logic-free template substitution: `{{foo.bar}}` resolved by
//! dotted access into a JSON object. No conditionals, no loops, no
//! expressions — just variable lookup, used for GCS upload paths (§4.5) and
//! release-registry `file_urls` templates (§4.8).
//!
//! An unknown variable is a `Configuration` error, never a silently-empty
//! substitution — a release pipeline that renders `https://dl.example.com/`
//! instead of failing loudly on a typo'd variable name is worse than one
//! that refuses to run.

use std::collections::BTreeMap;

use craft_types::CraftError;
use serde_json::Value;

/// Render `template` against `vars`. `vars` is flattened so nested object
/// keys are addressable both as `foo.bar` (dotted) and `foo__bar` (the
/// `__`-joined alias required so `{{foo__bar}}` also matches a key containing
/// a literal dot, e.g. a filename).
pub fn render(template: &str, vars: &Value) -> Result<String, CraftError> {
    let flat = flatten(vars);
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            CraftError::configuration("template", format!("unterminated {{{{ in {template:?}"))
        })?;
        let key = after[..end].trim();
        let value = flat.get(key).ok_or_else(|| {
            CraftError::configuration(
                "template",
                format!("unknown template variable {key:?} in {template:?}"),
            )
        })?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn flatten(value: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    flatten_into(value, "", &mut out);
    out
}

fn flatten_into(value: &Value, prefix: &str, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let dotted = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(child, &dotted, out);
            }
        }
        Value::String(s) => {
            insert_with_alias(prefix, s.clone(), out);
        }
        Value::Null => {}
        other => {
            insert_with_alias(prefix, other.to_string().trim_matches('"').to_string(), out);
        }
    }
}

fn insert_with_alias(dotted_key: &str, value: String, out: &mut BTreeMap<String, String>) {
    if dotted_key.is_empty() {
        return;
    }
    out.insert(dotted_key.to_string(), value.clone());
    if dotted_key.contains('.') {
        out.insert(dotted_key.replace('.', "__"), value);
    }
}

/// Render a path template for the GCS target (§4.5): the result must begin
/// with `/`, a leading slash is prepended if the template didn't supply one.
pub fn render_gcs_path(template: &str, vars: &Value) -> Result<String, CraftError> {
    let rendered = render(template, vars)?;
    if rendered.starts_with('/') {
        Ok(rendered)
    } else {
        Ok(format!("/{rendered}"))
    }
}
