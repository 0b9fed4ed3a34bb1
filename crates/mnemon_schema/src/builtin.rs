//! The built-in memory table set.
//!
//! These are the tables the rest of the control plane assumes exist:
//! the analyzer's category defaults, the ingestion pipeline's insights
//! fallback, the agent registry table, and the playbook store the
//! contradiction rules target. Shipped as YAML under `schemas/` and
//! embedded here so a fresh home directory can be seeded on first run.

use crate::def::TableSchema;
use crate::registry::SchemaRegistry;
use crate::Result;
use std::path::Path;
use tracing::info;

pub const MEMORY_DOCUMENTS: &str = include_str!("../../../schemas/memory_documents.yaml");
pub const MEMORY_CODEBASES: &str = include_str!("../../../schemas/memory_codebases.yaml");
pub const MEMORY_DATASETS: &str = include_str!("../../../schemas/memory_datasets.yaml");
pub const MEMORY_MEDIA: &str = include_str!("../../../schemas/memory_media.yaml");
pub const MEMORY_INSIGHTS: &str = include_str!("../../../schemas/memory_insights.yaml");
pub const MEMORY_SUB_AGENTS: &str = include_str!("../../../schemas/memory_sub_agents.yaml");
pub const MEMORY_PLAYBOOKS: &str = include_str!("../../../schemas/memory_playbooks.yaml");

const ALL: &[(&str, &str)] = &[
    ("memory_documents", MEMORY_DOCUMENTS),
    ("memory_codebases", MEMORY_CODEBASES),
    ("memory_datasets", MEMORY_DATASETS),
    ("memory_media", MEMORY_MEDIA),
    ("memory_insights", MEMORY_INSIGHTS),
    ("memory_sub_agents", MEMORY_SUB_AGENTS),
    ("memory_playbooks", MEMORY_PLAYBOOKS),
];

/// Tables whose emptiness the alert system treats as noteworthy.
pub const CRITICAL_TABLES: &[&str] = &["memory_documents", "memory_playbooks", "memory_insights"];

/// Parse the built-in definitions.
pub fn builtin_schemas() -> Result<Vec<TableSchema>> {
    ALL.iter()
        .map(|(name, yaml)| TableSchema::from_yaml(yaml, name))
        .collect()
}

/// Write any missing built-in definition files into `schema_dir`.
///
/// Existing files are left alone - a human-edited definition wins over
/// the shipped one. Returns the number of files written.
pub fn write_builtin_schemas(schema_dir: &Path) -> Result<usize> {
    std::fs::create_dir_all(schema_dir)?;
    let mut written = 0;
    for (name, yaml) in ALL {
        let path = schema_dir.join(format!("{}.yaml", name));
        if path.exists() {
            continue;
        }
        std::fs::write(&path, yaml)?;
        written += 1;
    }
    if written > 0 {
        info!("Seeded {} built-in schemas into {}", written, schema_dir.display());
    }
    Ok(written)
}

/// Register the built-ins directly, without touching disk (tests).
pub fn register_builtins(registry: &SchemaRegistry) -> Result<usize> {
    let schemas = builtin_schemas()?;
    let count = schemas.len();
    for schema in schemas {
        registry.register(schema);
    }
    Ok(count)
}
