//! Jinja2-compatible rendering of bootstrap steps
//!
//! Step commands are small templates. `{{ file_system_id }}` and `{{ region }}`
//! are the values that are only known at deploy time (or on the instance).
//! Undefined variables are errors, so a script cannot be finalized before the
//! file system identifier has been supplied.

pub mod context;

pub use context::build_context;

use crate::StackError;
use minijinja::{Environment, UndefinedBehavior};
use std::collections::HashMap;
use tracing::trace;

/// Template renderer with a fixed context
pub struct TemplateRenderer {
    env: Environment<'static>,
    context: HashMap<String, minijinja::Value>,
}

impl TemplateRenderer {
    /// Create a renderer with the given context
    pub fn with_context(context: HashMap<String, minijinja::Value>) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { env, context }
    }

    /// Render a template string
    pub fn render(&self, template: &str) -> Result<String, StackError> {
        trace!("Rendering step template: {}", template);

        // Plain commands skip the template engine entirely
        if !template.contains("{{") && !template.contains("{%") && !template.contains("{#") {
            return Ok(template.to_string());
        }

        self.env
            .render_str(template, &self.context)
            .map_err(|e| StackError::Template(format!("'{}': {}", template, e)))
    }
}
