//! Named text filters available to merge templates

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use minijinja::{Environment, Value};

/// A named transformation applied through the `{{ value | name }}` syntax
pub type FilterFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Filters installed into every template compiled from this registry.
///
/// A registry belongs to one mailer; registering a filter here never
/// affects templates compiled from another registry.
#[derive(Clone, Default)]
pub struct FilterRegistry {
    filters: BTreeMap<String, FilterFn>,
}

impl FilterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the merge filters (`title`)
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("title", title_case);
        registry
    }

    /// Register a filter, replacing and returning any filter of the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, filter: F) -> Option<FilterFn>
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(filter))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.filters.keys().map(String::as_str)
    }

    pub(crate) fn install(&self, env: &mut Environment<'static>) {
        for (name, filter) in &self.filters {
            let filter = Arc::clone(filter);
            env.add_filter(name.clone(), move |value: Value| -> String {
                filter(&value.to_string())
            });
        }
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.filters.keys()).finish()
    }
}

/// Uppercase the first character of every whitespace-separated word.
///
/// All other characters are kept as they are.
pub fn title_case(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut word_start = true;

    for ch in input.chars() {
        if ch.is_whitespace() {
            word_start = true;
            output.push(ch);
        } else if word_start {
            output.extend(ch.to_uppercase());
            word_start = false;
        } else {
            output.push(ch);
        }
    }

    output
}
