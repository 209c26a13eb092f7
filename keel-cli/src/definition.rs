//! Pipeline definition files
//!
//! Definitions are written in YAML or JSON. Files ending in `.json` are read
//! as JSON; anything else is read as YAML.

use anyhow::{Context, Result};
use keel_core::domain::definition::PipelineDefinition;
use std::path::Path;

/// Read, parse and validate a pipeline definition file
pub fn load_definition(path: &Path) -> Result<PipelineDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read definition file: {}", path.display()))?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let definition = parse_definition(&content, is_json)
        .with_context(|| format!("Failed to parse definition file: {}", path.display()))?;

    definition
        .validate()
        .with_context(|| format!("Invalid pipeline definition in {}", path.display()))?;

    Ok(definition)
}

fn parse_definition(content: &str, is_json: bool) -> Result<PipelineDefinition> {
    if is_json {
        Ok(serde_json::from_str(content)?)
    } else {
        Ok(serde_yaml::from_str(content)?)
    }
}
