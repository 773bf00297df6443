//! `{{name}}` placeholder resolution
//!
//! Test cases may refer to values that only exist once servers are running,
//! most commonly the bound port. The lifecycle coordinator publishes those
//! values into a [`TemplateContext`], which is passed explicitly to whoever
//! needs to resolve a string.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::common::{Error, Result};

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder pattern is valid"))
}

/// Named run-time values available to placeholders
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateContext {
    values: BTreeMap<String, String>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value, replacing any previous binding
    pub fn bind(&mut self, name: impl Into<String>, value: impl ToString) {
        self.values.insert(name.into(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Replace every `{{identifier}}` in `input` with its bound value
    ///
    /// Fails on the first identifier with no binding.
    pub fn resolve(&self, input: &str) -> Result<String> {
        let mut output = String::with_capacity(input.len());
        let mut last = 0;

        for caps in placeholder().captures_iter(input) {
            let Some(token) = caps.get(0) else {
                continue;
            };
            let name = &caps[1];
            let value = self
                .get(name)
                .ok_or_else(|| Error::UnresolvedPlaceholder(name.to_string()))?;

            output.push_str(&input[last..token.start()]);
            output.push_str(value);
            last = token.end();
        }

        output.push_str(&input[last..]);
        Ok(output)
    }
}
