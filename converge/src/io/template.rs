//! Template rendering for generated config files.
//!
//! Templates are minijinja sources with strict undefined handling: every
//! variable a template names must have a value, otherwise nothing is written.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, UndefinedBehavior};
use tracing::{debug, instrument};

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env
}

/// Render `source` with `tokens` as the template context.
///
/// Fails listing every unresolved variable name (sorted).
pub fn render_str(source: &str, tokens: &BTreeMap<String, String>) -> Result<String> {
    let env = environment();
    let template = env.template_from_str(source)?;
    let mut unresolved: Vec<String> = template
        .undeclared_variables(false)
        .into_iter()
        .filter(|name| !tokens.contains_key(name))
        .collect();
    if !unresolved.is_empty() {
        unresolved.sort();
        return Err(anyhow!(
            "unresolved placeholders: {}",
            unresolved.join(", ")
        ));
    }
    Ok(template.render(tokens)?)
}

/// Render `src` into `dest` atomically (temp file + rename).
///
/// `prepare` runs on the temp file before the rename; if it fails the temp
/// file is removed and `dest` is never created.
#[instrument(skip(tokens, prepare), fields(src = %src.display(), dest = %dest.display()))]
pub fn render_template(
    src: &Path,
    dest: &Path,
    tokens: &BTreeMap<String, String>,
    prepare: impl FnOnce(&Path) -> Result<()>,
) -> Result<()> {
    let template =
        fs::read_to_string(src).with_context(|| format!("read template {}", src.display()))?;
    let rendered = render_str(&template, tokens)
        .with_context(|| format!("render template {}", src.display()))?;
    write_atomic(dest, &rendered, prepare)?;
    debug!(bytes = rendered.len(), "template rendered");
    Ok(())
}

fn write_atomic(
    path: &Path,
    contents: &str,
    prepare: impl FnOnce(&Path) -> Result<()>,
) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("destination missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("destination missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    if let Err(err) = prepare(&tmp_path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
