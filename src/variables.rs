//! Command variable substitution.
//!
//! Commands may reference the container a job is bound to through template
//! placeholders. Both the legacy dotted spelling (`{{.Container.Name}}`,
//! `{{.Container.ID}}`) and plain template syntax (`{{ container.name }}`,
//! `{{ container.id }}`) are accepted; the legacy form is normalized before
//! rendering.

use minijinja::{Environment, context};

/// Container identity exposed to command templates.
#[derive(Debug, Clone, Default)]
pub struct ContainerInfo {
    pub name: String,
    pub id: String,
}

/// All variables available for substitution.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    pub container: ContainerInfo,
}

impl Variables {
    pub fn for_container(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            container: ContainerInfo {
                name: name.into(),
                id: id.into(),
            },
        }
    }
}

/// Replace template placeholders in `input` using the provided variables.
///
/// Inputs without `{{` are returned untouched. Template errors are returned
/// to the caller; job code falls back to the original command and logs.
pub fn process(input: &str, vars: &Variables) -> Result<String, minijinja::Error> {
    if !input.contains("{{") {
        return Ok(input.to_string());
    }

    let normalized = input
        .replace("{{.Container.Name}}", "{{ container.name }}")
        .replace("{{.Container.ID}}", "{{ container.id }}");

    let env = Environment::new();
    env.render_str(
        &normalized,
        context! {
            container => context! {
                name => vars.container.name.clone(),
                id => vars.container.id.clone(),
            },
        },
    )
}
