//! Argument template rendering for command contracts.

use super::{InputValue, InvocationRequest};
use crate::errors::InvocationError;
use crate::task::CommandContract;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

const PLACEHOLDER: &str = r"\{([A-Za-z_][A-Za-z0-9_]*)\}";

fn placeholder() -> Result<&'static Regex, InvocationError> {
    static RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(PLACEHOLDER))
        .as_ref()
        .map_err(|e| InvocationError::new(format!("invalid placeholder pattern: {e}")))
}

enum Resolved {
    Text(String),
    Spread(Vec<String>),
    Unbound,
}

fn resolve(
    name: &str,
    request: &InvocationRequest,
    outputs: &BTreeMap<String, PathBuf>,
) -> Result<Resolved, InvocationError> {
    if let Some(value) = request.inputs.get(name) {
        return Ok(match value {
            InputValue::One(path) => Resolved::Text(path.display().to_string()),
            InputValue::Many(paths) => {
                Resolved::Spread(paths.iter().map(|p| p.display().to_string()).collect())
            }
        });
    }
    if request.spec.input(name).is_some() {
        return Ok(Resolved::Unbound);
    }
    if let Some(path) = outputs.get(name) {
        return Ok(Resolved::Text(path.display().to_string()));
    }
    if let Some(param) = request.spec.params().get(name) {
        return Ok(Resolved::Text(param.to_string()));
    }
    match (name, &request.unit) {
        ("unit", Some(unit)) => Ok(Resolved::Text(unit.to_string())),
        ("work_dir", _) => Ok(Resolved::Text(request.work_dir.display().to_string())),
        _ => Err(InvocationError::new(format!(
            "unresolved placeholder '{{{name}}}' in arguments of '{}'",
            request.spec.name()
        ))),
    }
}

/// Renders a command contract's argument templates into argv.
///
/// Each template is split on whitespace into tokens before substitution, so
/// paths containing spaces stay single arguments. A token that is exactly a
/// placeholder for a multi-valued input expands to one argument per path;
/// embedded in other text the paths are joined with spaces. A template that
/// mentions an unbound optional input is dropped whole.
///
/// # Errors
///
/// Returns an [`InvocationError`] for placeholders that match no input,
/// output, parameter, `unit` or `work_dir`.
pub fn render_args(
    contract: &CommandContract,
    request: &InvocationRequest,
    outputs: &BTreeMap<String, PathBuf>,
) -> Result<Vec<String>, InvocationError> {
    let re = placeholder()?;
    let mut argv = Vec::new();

    'templates: for template in &contract.args {
        let mut group = Vec::new();
        for token in template.split_whitespace() {
            let matches: Vec<(regex::Match<'_>, &str)> = re
                .captures_iter(token)
                .filter_map(|caps| Some((caps.get(0)?, caps.get(1)?.as_str())))
                .collect();

            if let [(whole, name)] = matches.as_slice() {
                if whole.as_str() == token {
                    match resolve(name, request, outputs)? {
                        Resolved::Unbound => continue 'templates,
                        Resolved::Spread(paths) => group.extend(paths),
                        Resolved::Text(text) => group.push(text),
                    }
                    continue;
                }
            }

            let mut rendered = String::new();
            let mut last = 0;
            for (whole, name) in matches {
                let text = match resolve(name, request, outputs)? {
                    Resolved::Unbound => continue 'templates,
                    Resolved::Spread(paths) => paths.join(" "),
                    Resolved::Text(text) => text,
                };
                rendered.push_str(&token[last..whole.start()]);
                rendered.push_str(&text);
                last = whole.end();
            }
            rendered.push_str(&token[last..]);
            group.push(rendered);
        }
        argv.extend(group);
    }

    Ok(argv)
}
