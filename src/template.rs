//! Named-placeholder rendering that tolerates unbound keys.
//!
//! Templates use `{name}` placeholders and `{{` / `}}` as literal braces.
//! A render pass substitutes every placeholder bound in the [`Context`] and
//! leaves the rest in place, so a template can be filled over several passes
//! (model bindings first, scheduler bindings later). Substituted values are
//! re-escaped, which keeps the output a valid template for the next pass;
//! [`Rendered::into_complete`] unescapes once nothing is left unresolved.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context as _, Result, bail};
use regex::{Captures, Regex};

const PLACEHOLDER_PATTERN: &str = r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}";

/// Key to value bindings for one render pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    bindings: BTreeMap<String, String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.bindings.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.bindings.get(key).map(String::as_str)
    }

    /// Bindings of `self` followed by `other`; `other` wins on conflicts.
    pub fn union(&self, other: &Context) -> Context {
        let mut bindings = self.bindings.clone();
        bindings.extend(
            other
                .bindings
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        Context { bindings }
    }
}

/// Output of one render pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    text: String,
    unresolved: BTreeSet<String>,
}

impl Rendered {
    /// Partially rendered text, still in template syntax.
    pub fn as_template(&self) -> &str {
        &self.text
    }

    pub fn unresolved(&self) -> &BTreeSet<String> {
        &self.unresolved
    }

    /// Final text with brace escapes collapsed. Fails while any placeholder
    /// is still unbound.
    pub fn into_complete(self) -> Result<String> {
        if !self.unresolved.is_empty() {
            let names = self.unresolved.into_iter().collect::<Vec<_>>().join(", ");
            bail!("template has unresolved placeholders: {names}");
        }
        Ok(self.into_text())
    }

    /// Final text with brace escapes collapsed; unbound placeholders stay
    /// in their `{name}` form.
    pub fn into_text(self) -> String {
        self.text.replace("{{", "{").replace("}}", "}")
    }
}

#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    pattern: Regex,
}

impl TemplateRenderer {
    pub fn new() -> Result<Self> {
        let pattern =
            Regex::new(PLACEHOLDER_PATTERN).context("failed to compile placeholder regex")?;
        Ok(Self { pattern })
    }

    pub fn render(&self, template: &str, context: &Context) -> Rendered {
        let mut unresolved = BTreeSet::new();

        let text = self
            .pattern
            .replace_all(template, |captures: &Captures<'_>| {
                let Some(name) = captures.get(1) else {
                    return captures[0].to_string();
                };
                match context.get(name.as_str()) {
                    Some(value) => escape(value),
                    None => {
                        unresolved.insert(name.as_str().to_string());
                        captures[0].to_string()
                    }
                }
            })
            .into_owned();

        Rendered { text, unresolved }
    }
}

fn escape(value: &str) -> String {
    value.replace('{', "{{").replace('}', "}}")
}
