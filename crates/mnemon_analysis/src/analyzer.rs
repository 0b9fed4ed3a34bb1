//! Heuristic file content analyzer.
//!
//! Reads at most [`HEAD_SIZE`] bytes per file and works line-by-line from
//! there - O(bytes read), no nested I/O. Categorization tries the
//! extension table first, then the guessed mime type, then gives up with
//! `Unknown`. Analysis never fails: recoverable problems are collected
//! into the `errors` list and the caller decides what to do.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Maximum bytes read for feature extraction.
const HEAD_SIZE: usize = 256 * 1024;

/// Rough tokens-per-page estimate for documents.
const TOKENS_PER_PAGE: usize = 300;

/// Cap on listed sections / imports / classes / functions / sample rows.
const LIST_CAP: usize = 20;

/// File categories the pipeline routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Document,
    Code,
    Dataset,
    Media,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Document => "document",
            Category::Code => "code",
            Category::Dataset => "dataset",
            Category::Media => "media",
            Category::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document" => Ok(Category::Document),
            "code" => Ok(Category::Code),
            "dataset" => Ok(Category::Dataset),
            "media" => Ok(Category::Media),
            "unknown" => Ok(Category::Unknown),
            _ => Err(format!("Invalid category: '{}'", s)),
        }
    }
}

/// Features extracted from a document file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentFeatures {
    pub title: Option<String>,
    pub token_count: usize,
    pub sections: Vec<String>,
    pub page_estimate: usize,
}

/// Features extracted from a code file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeFeatures {
    pub language: String,
    pub imports: Vec<String>,
    pub classes: Vec<String>,
    pub functions: Vec<String>,
    pub lines_of_code: usize,
    pub has_tests: bool,
    pub has_main: bool,
}

/// Features extracted from a tabular dataset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetFeatures {
    pub format: String,
    pub rows: usize,
    pub columns: usize,
    pub column_names: Vec<String>,
    pub has_headers: bool,
    pub sample_rows: Vec<Vec<String>>,
}

/// Features derived from a media file's extension.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaFeatures {
    pub format: String,
    pub media_kind: String,
    pub has_audio: bool,
    pub has_video: bool,
    pub duration_seconds: f64,
}

/// Category-specific feature bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Features {
    Document(DocumentFeatures),
    Code(CodeFeatures),
    Dataset(DatasetFeatures),
    Media(MediaFeatures),
    None,
}

impl Features {
    pub fn as_document(&self) -> Option<&DocumentFeatures> {
        match self {
            Features::Document(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_code(&self) -> Option<&CodeFeatures> {
        match self {
            Features::Code(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_dataset(&self) -> Option<&DatasetFeatures> {
        match self {
            Features::Dataset(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_media(&self) -> Option<&MediaFeatures> {
        match self {
            Features::Media(f) => Some(f),
            _ => None,
        }
    }
}

/// Full analysis result for one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub mime: Option<String>,
    pub category: Category,
    pub features: Features,
    pub errors: Vec<String>,
}

impl FileAnalysis {
    /// The file stem rendered as a human title: `multi_word_name` ->
    /// `Multi Word Name`.
    pub fn stem_title(&self) -> String {
        let stem = Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.name.clone());
        stem.split(['_', '-'])
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// The content analyzer. Stateless; safe to share.
#[derive(Debug, Clone, Default)]
pub struct ContentAnalyzer;

impl ContentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze a file. Never returns an error; problems land in `errors`.
    pub fn analyze(&self, path: &Path) -> FileAnalysis {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let mime = mime_guess::from_path(path).first().map(|m| m.to_string());
        let category = categorize(path, mime.as_deref());

        let mut analysis = FileAnalysis {
            path: path.to_string_lossy().to_string(),
            name,
            size,
            mime,
            category,
            features: Features::None,
            errors: Vec::new(),
        };

        let extraction = match category {
            Category::Document => read_head(path).map(|text| {
                Features::Document(extract_document(&text))
            }),
            Category::Code => read_head(path).map(|text| {
                Features::Code(extract_code(path, &text))
            }),
            Category::Dataset => read_head(path).map(|text| {
                Features::Dataset(extract_dataset(path, &text))
            }),
            Category::Media => Ok(Features::Media(extract_media(path))),
            Category::Unknown => Ok(Features::None),
        };

        match extraction {
            Ok(features) => analysis.features = features,
            Err(e) => {
                debug!("Extraction failed for {}: {}", path.display(), e);
                analysis.errors.push(e.to_string());
            }
        }

        analysis
    }
}

fn read_head(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut buf = Vec::with_capacity(HEAD_SIZE.min(64 * 1024));
    file.by_ref().take(HEAD_SIZE as u64).read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Extension table first, mime second, unknown last.
fn categorize(path: &Path, mime: Option<&str>) -> Category {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" | "txt" | "md" | "doc" | "docx" | "rtf" | "odt" => return Category::Document,
        "py" | "js" | "ts" | "jsx" | "tsx" | "go" | "rs" | "java" | "cpp" | "c" | "h" | "cs"
        | "php" | "rb" | "swift" | "kt" => return Category::Code,
        "csv" | "json" | "jsonl" | "parquet" | "xlsx" | "xls" | "tsv" => return Category::Dataset,
        "mp3" | "wav" | "ogg" | "flac" | "mp4" | "avi" | "mov" | "mkv" | "jpg" | "jpeg" | "png"
        | "gif" | "svg" | "webp" => return Category::Media,
        _ => {}
    }

    if let Some(mime) = mime {
        if mime.starts_with("text/") {
            return Category::Document;
        }
        if mime.starts_with("audio/") || mime.starts_with("video/") || mime.starts_with("image/") {
            return Category::Media;
        }
        if mime == "application/json" || mime == "application/csv" {
            return Category::Dataset;
        }
    }

    Category::Unknown
}

fn extract_document(text: &str) -> DocumentFeatures {
    let lines: Vec<&str> = text.lines().collect();

    let title = lines
        .iter()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .filter(|l| l.len() < 100)
        .map(|l| l.trim_start_matches('#').trim().to_string());

    let token_count = text.split_whitespace().count();

    let sections: Vec<String> = lines
        .iter()
        .filter(|l| l.starts_with('#'))
        .map(|l| l.trim_start_matches('#').trim().to_string())
        .filter(|s| !s.is_empty())
        .take(LIST_CAP)
        .collect();

    DocumentFeatures {
        title,
        token_count,
        sections,
        page_estimate: (token_count / TOKENS_PER_PAGE).max(1),
    }
}

fn extract_code(path: &Path, text: &str) -> CodeFeatures {
    let language = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut imports = Vec::new();
    let mut classes = Vec::new();
    let mut functions = Vec::new();
    let mut lines_of_code = 0usize;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//") {
            continue;
        }
        lines_of_code += 1;

        match language.as_str() {
            "py" => {
                if let Some(rest) = trimmed.strip_prefix("import ").or_else(|| trimmed.strip_prefix("from ")) {
                    push_symbol(&mut imports, rest);
                } else if let Some(rest) = trimmed.strip_prefix("class ") {
                    push_symbol(&mut classes, rest);
                } else if let Some(rest) = trimmed.strip_prefix("def ") {
                    push_symbol(&mut functions, rest);
                }
            }
            "js" | "ts" | "jsx" | "tsx" => {
                if trimmed.starts_with("import ") {
                    if let Some(from) = trimmed.split(" from ").nth(1) {
                        push_symbol(&mut imports, from.trim_matches(|c: char| c == '\'' || c == '"' || c == ';'));
                    }
                } else if let Some(rest) = trimmed.strip_prefix("class ") {
                    push_symbol(&mut classes, rest);
                } else if let Some(rest) = trimmed.strip_prefix("function ") {
                    push_symbol(&mut functions, rest);
                }
            }
            "rs" => {
                if let Some(rest) = trimmed.strip_prefix("use ") {
                    push_symbol(&mut imports, rest.trim_end_matches(';'));
                } else if let Some(rest) = trimmed
                    .strip_prefix("pub struct ")
                    .or_else(|| trimmed.strip_prefix("struct "))
                    .or_else(|| trimmed.strip_prefix("pub enum "))
                    .or_else(|| trimmed.strip_prefix("enum "))
                {
                    push_symbol(&mut classes, rest);
                } else if let Some(rest) = trimmed
                    .strip_prefix("pub fn ")
                    .or_else(|| trimmed.strip_prefix("fn "))
                {
                    push_symbol(&mut functions, rest);
                }
            }
            _ => {}
        }
    }

    let lowered = text.to_lowercase();
    CodeFeatures {
        has_tests: lowered.contains("test"),
        has_main: text.contains("__main__") || text.contains("fn main"),
        language,
        imports,
        classes,
        functions,
        lines_of_code,
    }
}

fn push_symbol(list: &mut Vec<String>, raw: &str) {
    if list.len() >= LIST_CAP {
        return;
    }
    let symbol: String = raw
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.' || *c == ':' || *c == '/')
        .collect();
    if !symbol.is_empty() {
        list.push(symbol);
    }
}

fn extract_dataset(path: &Path, text: &str) -> DatasetFeatures {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "csv" | "tsv" => extract_delimited(text, if ext == "tsv" { '\t' } else { ',' }, &ext),
        "json" | "jsonl" => extract_json_dataset(text, &ext),
        _ => DatasetFeatures {
            format: ext,
            ..Default::default()
        },
    }
}

fn extract_delimited(text: &str, delimiter: char, format: &str) -> DatasetFeatures {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return DatasetFeatures {
            format: format.to_string(),
            ..Default::default()
        };
    };

    let column_names: Vec<String> = header
        .split(delimiter)
        .map(|c| c.trim().trim_matches('"').to_string())
        .collect();

    let mut rows = 0usize;
    let mut sample_rows = Vec::new();
    for line in lines {
        rows += 1;
        if sample_rows.len() < 5 {
            sample_rows.push(
                line.split(delimiter)
                    .map(|c| c.trim().trim_matches('"').to_string())
                    .collect(),
            );
        }
    }

    DatasetFeatures {
        format: format.to_string(),
        rows,
        columns: column_names.len(),
        column_names,
        has_headers: true,
        sample_rows,
    }
}

fn extract_json_dataset(text: &str, format: &str) -> DatasetFeatures {
    // JSONL: one object per line. Plain JSON: a top-level array of objects.
    if format == "jsonl" {
        let mut rows = 0usize;
        let mut column_names: Vec<String> = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            rows += 1;
            if column_names.is_empty() {
                if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(line) {
                    column_names = map.keys().cloned().collect();
                }
            }
        }
        return DatasetFeatures {
            format: format.to_string(),
            rows,
            columns: column_names.len(),
            column_names,
            has_headers: false,
            sample_rows: Vec::new(),
        };
    }

    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Array(items)) => {
            let column_names: Vec<String> = items
                .first()
                .and_then(|v| v.as_object())
                .map(|o| o.keys().cloned().collect())
                .unwrap_or_default();
            DatasetFeatures {
                format: format.to_string(),
                rows: items.len(),
                columns: column_names.len(),
                column_names,
                has_headers: false,
                sample_rows: Vec::new(),
            }
        }
        Ok(_) => DatasetFeatures {
            format: format.to_string(),
            rows: 1,
            ..Default::default()
        },
        Err(_) => DatasetFeatures {
            format: format.to_string(),
            ..Default::default()
        },
    }
}

fn extract_media(path: &Path) -> MediaFeatures {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let (media_kind, has_audio, has_video) = match ext.as_str() {
        "mp3" | "wav" | "ogg" | "flac" => ("audio", true, false),
        "mp4" | "avi" | "mov" | "mkv" => ("video", true, true),
        _ => ("image", false, false),
    };

    MediaFeatures {
        format: ext,
        media_kind: media_kind.to_string(),
        has_audio,
        has_video,
        duration_seconds: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn categorize_extension_beats_mime() {
        assert_eq!(categorize(Path::new("a.md"), Some("video/mp4")), Category::Document);
        assert_eq!(categorize(Path::new("a.rs"), None), Category::Code);
        assert_eq!(categorize(Path::new("a.csv"), None), Category::Dataset);
        assert_eq!(categorize(Path::new("a.mp4"), None), Category::Media);
        assert_eq!(categorize(Path::new("a.xyz"), None), Category::Unknown);
    }

    #[test]
    fn document_title_and_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "doc.txt", "Alpha\n\nHello.");
        let analysis = ContentAnalyzer::new().analyze(&path);

        assert_eq!(analysis.category, Category::Document);
        let doc = analysis.features.as_document().unwrap();
        assert_eq!(doc.title.as_deref(), Some("Alpha"));
        assert_eq!(doc.token_count, 2);
        assert!(analysis.errors.is_empty());
    }

    #[test]
    fn document_sections_from_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "notes.md",
            "# Overview\n\ntext\n\n## Details\n\nmore text\n",
        );
        let analysis = ContentAnalyzer::new().analyze(&path);
        let doc = analysis.features.as_document().unwrap();
        assert_eq!(doc.sections, vec!["Overview", "Details"]);
        assert_eq!(doc.title.as_deref(), Some("Overview"));
    }

    #[test]
    fn code_features_python() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "tool.py",
            "import os\nfrom pathlib import Path\n\nclass Runner:\n    def run(self):\n        pass\n\nif __name__ == '__main__':\n    Runner().run()\n",
        );
        let analysis = ContentAnalyzer::new().analyze(&path);
        let code = analysis.features.as_code().unwrap();
        assert_eq!(code.language, "py");
        assert!(code.imports.contains(&"os".to_string()));
        assert!(code.classes.contains(&"Runner".to_string()));
        assert!(code.functions.contains(&"run".to_string()));
        assert!(code.has_main);
    }

    #[test]
    fn csv_dataset_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "data.csv", "name,age\nalice,30\nbob,25\n");
        let analysis = ContentAnalyzer::new().analyze(&path);
        let data = analysis.features.as_dataset().unwrap();
        assert_eq!(data.rows, 2);
        assert_eq!(data.columns, 2);
        assert_eq!(data.column_names, vec!["name", "age"]);
        assert!(data.has_headers);
    }

    #[test]
    fn json_array_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "data.json", r#"[{"a": 1, "b": 2}, {"a": 3, "b": 4}]"#);
        let analysis = ContentAnalyzer::new().analyze(&path);
        let data = analysis.features.as_dataset().unwrap();
        assert_eq!(data.rows, 2);
        assert_eq!(data.column_names, vec!["a", "b"]);
    }

    #[test]
    fn media_kind_from_extension() {
        let analysis = ContentAnalyzer::new().analyze(Path::new("/nonexistent/clip.mp4"));
        assert_eq!(analysis.category, Category::Media);
        let media = analysis.features.as_media().unwrap();
        assert_eq!(media.media_kind, "video");
        assert!(media.has_audio && media.has_video);
    }

    #[test]
    fn missing_file_populates_errors_not_panic() {
        let analysis = ContentAnalyzer::new().analyze(Path::new("/nonexistent/ghost.txt"));
        assert_eq!(analysis.category, Category::Document);
        assert!(!analysis.errors.is_empty());
        assert_eq!(analysis.size, 0);
    }

    #[test]
    fn stem_title_renders_words() {
        let analysis = ContentAnalyzer::new().analyze(Path::new("/x/quarterly_sales-report.txt"));
        assert_eq!(analysis.stem_title(), "Quarterly Sales Report");
    }
}
