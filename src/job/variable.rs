use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::error::{ProxyError, Result};

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"%\{\s*([\w.\-]+)\s*\}").expect("placeholder pattern is valid"))
}

/// Runtime values a command template can refer to as `%{name}` or
/// `%{name.key.0}`.
#[derive(Debug, Clone)]
pub struct Variable {
    data: Map<String, Value>,
    separator: String,
}

impl Variable {
    pub fn new(data: Map<String, Value>, separator: impl Into<String>) -> Self {
        Self {
            data,
            separator: separator.into(),
        }
    }

    /// Replace every placeholder in `template`.
    pub fn expand(&self, template: &str) -> Result<String> {
        let mut failure = None;
        let expanded = placeholder().replace_all(template, |caps: &Captures| {
            match self.dive(&caps[1]).map(|v| self.render(v)) {
                Ok(s) => s,
                Err(e) => {
                    failure.get_or_insert(e);
                    String::new()
                }
            }
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(expanded.into_owned()),
        }
    }

    /// Expand each template and split the results on the separator, so one
    /// template entry may yield several arguments.
    pub fn extract(&self, templates: &[String]) -> Result<Vec<String>> {
        let mut result = Vec::new();
        for template in templates {
            let expanded = self.expand(template)?;
            if self.separator.is_empty() {
                result.push(expanded);
            } else {
                result.extend(expanded.split(self.separator.as_str()).map(str::to_string));
            }
        }
        Ok(result)
    }

    fn dive(&self, expr: &str) -> Result<&Value> {
        let mut keys = expr.split('.');
        let root = keys.next().unwrap_or_default();
        let mut current = self
            .data
            .get(root)
            .ok_or_else(|| ProxyError::Variable(format!("unknown variable {:?} in %{{{}}}", root, expr)))?;
        for key in keys {
            current = match current {
                Value::Object(map) => map.get(key),
                Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            }
            .ok_or_else(|| ProxyError::Variable(format!("{:?} not found in %{{{}}}", key, expr)))?;
        }
        Ok(current)
    }

    fn render(&self, value: &Value) -> String {
        match value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(|v| self.render(v))
                .collect::<Vec<_>>()
                .join(&self.separator),
            other => other.to_string(),
        }
    }
}

/// Build the argument list for a job.
///
/// The base template is expanded first. When an option table is configured,
/// the expanded arguments joined by spaces select an alternate template
/// (falling back to `"default"`), which is expanded instead.
pub fn build_command(
    variable: &Variable,
    template: &[String],
    options: &HashMap<String, Vec<String>>,
) -> Result<Vec<String>> {
    let mut values = variable.extract(template)?;
    if !options.is_empty() {
        let key = values.join(" ");
        if let Some(t) = options.get(&key).or_else(|| options.get("default")) {
            tracing::debug!(key = %key, template = ?t, "Using command option");
            values = variable.extract(t)?;
        }
    }
    if values.first().map_or(true, |v| v.is_empty()) {
        return Err(ProxyError::execution(format!(
            "command template {:?} expanded to no executable",
            template
        )));
    }
    Ok(values)
}
