//! Merge template system.
//!
//! This module provides:
//! - Compilation of subject and body templates with `{{ name }}` placeholders
//! - Named filters applied with the pipe syntax (`{{ name | title }}`)
//! - Rendering of a compiled template against a row context
//!
//! # Example
//!
//! ```ignore
//! let filters = FilterRegistry::with_defaults();
//! let body = CompiledTemplate::compile("body", "Hello {{ name | title }}", &filters)?;
//!
//! let context = HashMap::from([("name".to_string(), "john doe".to_string())]);
//! assert_eq!(body.render(&context)?, b"Hello John Doe");
//! ```

mod filters;

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

pub use filters::{title_case, FilterFn, FilterRegistry};

use crate::error::{MailMergeError, Result};

/// A template compiled once and rendered for many rows.
///
/// Rendering takes `&self`, so one instance is shared by all workers.
pub struct CompiledTemplate {
    name: String,
    env: Environment<'static>,
}

impl CompiledTemplate {
    /// Compile `source` with the filters of `registry`.
    pub fn compile(
        name: impl Into<String>,
        source: impl Into<String>,
        registry: &FilterRegistry,
    ) -> Result<Self> {
        let name = name.into();

        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Lenient);
        registry.install(&mut env);

        env.add_template_owned(name.clone(), source.into())
            .map_err(|source| MailMergeError::TemplateSyntax {
                template: name.clone(),
                source,
            })?;

        Ok(Self { name, env })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render to text
    pub fn render_string<S: Serialize>(&self, context: S) -> Result<String> {
        let template = self.env.get_template(&self.name).map_err(|source| self.render_error(source))?;
        template
            .render(context)
            .map_err(|source| self.render_error(source))
    }

    /// Render to the bytes handed to a transport
    pub fn render<S: Serialize>(&self, context: S) -> Result<Vec<u8>> {
        self.render_string(context).map(String::into_bytes)
    }

    fn render_error(&self, source: minijinja::Error) -> MailMergeError {
        MailMergeError::Render {
            template: self.name.clone(),
            source,
        }
    }
}

impl std::fmt::Debug for CompiledTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledTemplate")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
