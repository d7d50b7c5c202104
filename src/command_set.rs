//! Per-model command generation for each pipeline stage.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use tracing::{info, warn};

use crate::model::{CommandSet, ModelSpec, StageCommand};
use crate::template::{Context, TemplateRenderer};
use crate::util::write_lines;

/// How one stage's template is bound for each model.
#[derive(Debug, Clone)]
pub struct StageTemplate<'a> {
    pub template: &'a str,
    /// Placeholder receiving the model's input path.
    pub input_field: &'a str,
    /// Placeholder receiving the model's output directory.
    pub output_field: &'a str,
    /// Bindings shared by every model of the stage.
    pub shared: Context,
}

pub fn load_models(path: &Path) -> Result<Vec<ModelSpec>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read model list: {}", path.display()))?;

    let mut models = Vec::new();
    let mut seen: HashMap<String, PathBuf> = HashMap::new();

    for (line_number, line) in raw.lines().enumerate() {
        let entry = line.trim();
        if entry.is_empty() {
            continue;
        }

        let source_path = PathBuf::from(entry);
        let name = model_name(&source_path).with_context(|| {
            format!(
                "model list {} line {}: cannot derive a model name from {entry}",
                path.display(),
                line_number + 1
            )
        })?;

        if let Some(previous) = seen.insert(name.clone(), source_path.clone()) {
            bail!(
                "model name {name} is shared by {} and {}",
                previous.display(),
                source_path.display()
            );
        }

        models.push(ModelSpec { name, source_path });
    }

    if models.is_empty() {
        bail!("model list {} contains no models", path.display());
    }

    info!(path = %path.display(), models = models.len(), "loaded model list");
    Ok(models)
}

/// Final normal component of `path`, ignoring trailing separators and `.`.
pub fn model_name(path: &Path) -> Option<String> {
    match path.components().next_back()? {
        Component::Normal(name) => name.to_str().map(ToOwned::to_owned),
        _ => None,
    }
}

pub fn model_inputs(models: &[ModelSpec]) -> impl Iterator<Item = (&str, &Path)> {
    models
        .iter()
        .map(|model| (model.name.as_str(), model.source_path.as_path()))
}

/// Each model's declared output directory, used as the next stage's input.
pub fn stage_outputs(commands: &CommandSet) -> impl Iterator<Item = (&str, &Path)> {
    commands
        .iter()
        .map(|(name, command)| (name.as_str(), command.output_dir.as_path()))
}

pub fn build_stage<'a, I, F>(
    renderer: &TemplateRenderer,
    inputs: I,
    stage: &StageTemplate<'_>,
    output_root: &Path,
    naming: F,
) -> Result<CommandSet>
where
    I: IntoIterator<Item = (&'a str, &'a Path)>,
    F: Fn(&str) -> String,
{
    let mut commands = CommandSet::new();

    for (name, input) in inputs {
        let output_dir = output_root.join(naming(name));
        let bindings = stage.shared.union(
            &Context::new()
                .bind(stage.input_field, input.display().to_string())
                .bind(stage.output_field, output_dir.display().to_string()),
        );
        let rendered = renderer.render(stage.template, &bindings);
        if !rendered.unresolved().is_empty() {
            let placeholders = rendered
                .unresolved()
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            warn!(model = %name, placeholders = %placeholders, "leaving placeholders unresolved");
        }
        let command = rendered.into_text();

        let entry = StageCommand {
            command,
            output_dir,
        };
        if commands.insert(name.to_string(), entry).is_some() {
            bail!("duplicate model name in stage inputs: {name}");
        }
    }

    Ok(commands)
}

/// Writes one command per line; line `i` is run by array task `i`.
pub fn write_command_list(commands: &CommandSet, path: &Path) -> Result<()> {
    write_lines(path, commands.values().map(|entry| entry.command.as_str()))?;
    info!(path = %path.display(), commands = commands.len(), "wrote command list");
    Ok(())
}
