//! Schema inference: from an analysis, propose where the row belongs.
//!
//! The mapping is category-driven: each category has a default target
//! table. A known target yields `use_existing` with high confidence; a
//! recognized category whose table is missing proposes `create_new`; an
//! unknown category degrades to the document default with low confidence.

use crate::analyzer::{Category, Features, FileAnalysis};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Confidence below which a proposal is degraded to the category default.
pub const CONFIDENCE_FLOOR: f64 = 0.7;

/// What the proposal asks the registry to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalAction {
    UseExisting,
    ExtendExisting,
    CreateNew,
}

impl ProposalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalAction::UseExisting => "use_existing",
            ProposalAction::ExtendExisting => "extend_existing",
            ProposalAction::CreateNew => "create_new",
        }
    }
}

impl fmt::Display for ProposalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A schema proposal for one analyzed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaProposal {
    pub action: ProposalAction,
    pub target_table: String,
    pub confidence: f64,
    pub reasoning: String,
    /// Set when confidence fell below the floor and the proposal was
    /// degraded to the category default.
    pub degraded: bool,
    /// Per-field values ready for insertion into the target table.
    pub extracted_fields: serde_json::Value,
}

/// The schema inferrer. Stateless; safe to share.
#[derive(Debug, Clone, Default)]
pub struct SchemaInference;

impl SchemaInference {
    pub fn new() -> Self {
        Self
    }

    /// Propose a target table for an analyzed file.
    pub fn propose(&self, analysis: &FileAnalysis, known_tables: &[String]) -> SchemaProposal {
        let (category_table, base_confidence) = match analysis.category {
            Category::Document => ("memory_documents", 0.9),
            Category::Code => ("memory_codebases", 0.9),
            Category::Dataset => ("memory_datasets", 0.9),
            Category::Media => ("memory_media", 0.9),
            Category::Unknown => ("memory_documents", 0.5),
        };

        let known = known_tables.iter().any(|t| t == category_table);

        if analysis.category == Category::Unknown || base_confidence < CONFIDENCE_FLOOR {
            // Low confidence never creates tables; fall back to the
            // category default and flag the degradation.
            return SchemaProposal {
                action: ProposalAction::UseExisting,
                target_table: category_table.to_string(),
                confidence: base_confidence,
                reasoning: format!(
                    "Category '{}' has no confident mapping; falling back to {}",
                    analysis.category, category_table
                ),
                degraded: true,
                extracted_fields: self.extract_fields(analysis, category_table),
            };
        }

        if known {
            SchemaProposal {
                action: ProposalAction::UseExisting,
                target_table: category_table.to_string(),
                confidence: base_confidence,
                reasoning: format!(
                    "File category '{}' matches existing table {}",
                    analysis.category, category_table
                ),
                degraded: false,
                extracted_fields: self.extract_fields(analysis, category_table),
            }
        } else {
            SchemaProposal {
                action: ProposalAction::CreateNew,
                target_table: category_table.to_string(),
                confidence: CONFIDENCE_FLOOR,
                reasoning: format!(
                    "No table registered for category '{}'; proposing standard table {}",
                    analysis.category, category_table
                ),
                degraded: false,
                extracted_fields: self.extract_fields(analysis, category_table),
            }
        }
    }

    /// Build per-field values for insertion into `table`.
    pub fn extract_fields(&self, analysis: &FileAnalysis, table: &str) -> serde_json::Value {
        match table {
            "memory_documents" => {
                let doc = analysis.features.as_document();
                let title = doc
                    .and_then(|d| d.title.clone())
                    .unwrap_or_else(|| analysis.stem_title());
                serde_json::json!({
                    "title": title,
                    "source_type": "custom",
                    "summary": doc.map(|d| d.sections.join("; ")).unwrap_or_default(),
                    "key_topics": doc.map(|d| d.sections.clone()).unwrap_or_default(),
                    "token_count": doc.map(|d| d.token_count).unwrap_or(0),
                    "file_path": analysis.path,
                    "risk_level": "low",
                    "created_by": "auto_ingestion",
                })
            }
            "memory_codebases" => {
                let code = analysis.features.as_code();
                serde_json::json!({
                    "repo_name": analysis.stem_title(),
                    "root_path": std::path::Path::new(&analysis.path)
                        .parent()
                        .map(|p| p.to_string_lossy().to_string())
                        .unwrap_or_default(),
                    "languages": code.map(|c| vec![c.language.clone()]).unwrap_or_default(),
                    "entry_points": code
                        .filter(|c| c.has_main)
                        .map(|_| vec![analysis.name.clone()])
                        .unwrap_or_default(),
                    "dependency_files": code.map(|c| c.imports.clone()).unwrap_or_default(),
                    "file_path": analysis.path,
                    "created_by": "auto_ingestion",
                })
            }
            "memory_datasets" => {
                let data = analysis.features.as_dataset();
                let column_schema: Vec<serde_json::Value> = data
                    .map(|d| {
                        d.column_names
                            .iter()
                            .map(|c| serde_json::json!({"name": c, "type": "unknown"}))
                            .collect()
                    })
                    .unwrap_or_default();
                serde_json::json!({
                    "dataset_name": analysis.stem_title(),
                    "rows": data.map(|d| d.rows).unwrap_or(0),
                    "columns": data.map(|d| d.columns).unwrap_or(0),
                    "column_schema": column_schema,
                    "file_path": analysis.path,
                    "risk_level": "medium",
                    "created_by": "auto_ingestion",
                })
            }
            "memory_media" => {
                let media = analysis.features.as_media();
                serde_json::json!({
                    "media_type": media.map(|m| m.media_kind.clone())
                        .unwrap_or_else(|| "image".to_string()),
                    "duration_seconds": media.map(|m| m.duration_seconds).unwrap_or(0.0),
                    "file_path": analysis.path,
                    "created_by": "auto_ingestion",
                })
            }
            _ => serde_json::json!({
                "title": analysis.stem_title(),
                "source_type": "custom",
                "file_path": analysis.path,
                "created_by": "auto_ingestion",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{DocumentFeatures, FileAnalysis};

    fn doc_analysis() -> FileAnalysis {
        FileAnalysis {
            path: "/watched/doc.txt".into(),
            name: "doc.txt".into(),
            size: 12,
            mime: Some("text/plain".into()),
            category: Category::Document,
            features: Features::Document(DocumentFeatures {
                title: Some("Alpha".into()),
                token_count: 2,
                sections: vec![],
                page_estimate: 1,
            }),
            errors: vec![],
        }
    }

    fn unknown_analysis() -> FileAnalysis {
        FileAnalysis {
            path: "/watched/blob.xyz".into(),
            name: "blob.xyz".into(),
            size: 5,
            mime: None,
            category: Category::Unknown,
            features: Features::None,
            errors: vec![],
        }
    }

    #[test]
    fn known_table_yields_use_existing() {
        let proposal = SchemaInference::new().propose(
            &doc_analysis(),
            &["memory_documents".to_string(), "memory_media".to_string()],
        );
        assert_eq!(proposal.action, ProposalAction::UseExisting);
        assert_eq!(proposal.target_table, "memory_documents");
        assert!(proposal.confidence >= 0.9);
        assert!(!proposal.degraded);
    }

    #[test]
    fn missing_table_yields_create_new_at_floor() {
        let proposal = SchemaInference::new().propose(&doc_analysis(), &[]);
        assert_eq!(proposal.action, ProposalAction::CreateNew);
        assert_eq!(proposal.confidence, CONFIDENCE_FLOOR);
    }

    #[test]
    fn unknown_category_degrades_to_document_default() {
        let proposal = SchemaInference::new()
            .propose(&unknown_analysis(), &["memory_documents".to_string()]);
        assert_eq!(proposal.action, ProposalAction::UseExisting);
        assert_eq!(proposal.target_table, "memory_documents");
        assert!(proposal.degraded);
        assert!(proposal.confidence < CONFIDENCE_FLOOR);
    }

    #[test]
    fn extracted_fields_fit_documents_table() {
        let proposal = SchemaInference::new()
            .propose(&doc_analysis(), &["memory_documents".to_string()]);
        let fields = proposal.extracted_fields.as_object().unwrap();
        assert_eq!(fields["title"], "Alpha");
        assert_eq!(fields["token_count"], 2);
        assert_eq!(fields["file_path"], "/watched/doc.txt");
        assert_eq!(fields["created_by"], "auto_ingestion");
    }

    #[test]
    fn extracted_fields_use_stem_title_without_document_title() {
        let mut analysis = doc_analysis();
        analysis.features = Features::Document(DocumentFeatures::default());
        analysis.name = "quarterly_report.txt".into();
        let inference = SchemaInference::new();
        let fields = inference.extract_fields(&analysis, "memory_documents");
        assert_eq!(fields["title"], "Quarterly Report");
    }
}
