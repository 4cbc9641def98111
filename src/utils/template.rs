//! `{{name}}` template rendering with an unresolved-placeholder check.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::{Error, Result};

pub struct TemplateVars;

impl TemplateVars {
    pub const ACCOUNT: &'static str = "account";
    pub const INSTALL_ROOT: &'static str = "install_root";
    pub const VENV_DIR: &'static str = "venv_dir";
    pub const CACHE_DIR: &'static str = "cache_dir";
    pub const HOST: &'static str = "host";
    pub const PORT: &'static str = "port";
    pub const ENGINE_ARGS: &'static str = "engine_args";
    pub const LAUNCHER_PATH: &'static str = "launcher_path";
    pub const SERVICE_NAME: &'static str = "service_name";
    pub const UNIT_PATH: &'static str = "unit_path";
    pub const EXEC_START: &'static str = "exec_start";
    pub const RESTART_SEC: &'static str = "restart_sec";
    pub const ENV_FILE: &'static str = "env_file";
}

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").unwrap());

/// Render `template`, substituting every `{{key}}` in a single pass.
///
/// Substituted values are never re-scanned. Fails with
/// `template.unresolved_placeholder` naming every key without a value.
pub fn render(name: &str, template: &str, variables: &[(&str, &str)]) -> Result<String> {
    let mut missing: Vec<String> = Vec::new();

    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        let key = &caps[1];
        match variables.iter().find(|(k, _)| *k == key) {
            Some((_, value)) => value.to_string(),
            None => {
                if !missing.iter().any(|m| m == key) {
                    missing.push(key.to_string());
                }
                caps[0].to_string()
            }
        }
    });

    if !missing.is_empty() {
        return Err(Error::template_unresolved(name, missing));
    }

    Ok(rendered.into_owned())
}

/// Placeholder names in order of first appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template) {
        let key = caps[1].to_string();
        if !names.contains(&key) {
            names.push(key);
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_all_occurrences() {
        let out = render("t", "{{a}}-{{ b }}-{{a}}", &[("a", "1"), ("b", "2")]).unwrap();
        assert_eq!(out, "1-2-1");
    }

    #[test]
    fn render_fails_on_unresolved() {
        let err = render("launcher", "{{a}} {{b}} {{c}} {{b}}", &[("a", "1")]).unwrap_err();
        assert_eq!(err.code.as_str(), "template.unresolved_placeholder");
        assert_eq!(err.details["placeholders"], serde_json::json!(["b", "c"]));
        assert_eq!(err.details["template"], "launcher");
    }

    #[test]
    fn render_does_not_rescan_values() {
        let out = render("t", "{{a}}", &[("a", "{{b}}")]).unwrap();
        assert_eq!(out, "{{b}}");
    }

    #[test]
    fn shell_parameter_expansion_is_not_a_placeholder() {
        let out = render("t", "${HF_TOKEN:-} {{x}}", &[("x", "y")]).unwrap();
        assert_eq!(out, "${HF_TOKEN:-} y");
    }

    #[test]
    fn placeholders_in_first_appearance_order() {
        assert_eq!(placeholders("{{z}} {{a}} {{z}}"), vec!["z", "a"]);
    }
}
