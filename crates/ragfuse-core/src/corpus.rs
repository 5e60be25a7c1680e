//! Corpus loaders: chunk JSON files and directories of `.txt` documents.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::types::{DocumentChunk, Metadata};

/// Reads `{"chunks": [...]}` from `path`. See [`chunks_from_json`].
pub fn load_chunks_json(path: &Path) -> Result<Vec<DocumentChunk>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let payload: Value = serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    let chunks = chunks_from_json(&payload)?;
    tracing::info!(path = %path.display(), chunks = chunks.len(), "loaded chunk file");
    Ok(chunks)
}

/// Each item carries `content` (or `conteudo`), an optional `id` (default
/// `chunk-<n>`, 1-based) and any other keys as metadata. Items without text are skipped.
pub fn chunks_from_json(payload: &Value) -> crate::Result<Vec<DocumentChunk>> {
    let items = match payload.get("chunks") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(Error::InvalidInput("`chunks` must be a list".into())),
    };

    let mut chunks = Vec::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        let Some(fields) = item.as_object() else { continue };
        let content = fields.get("content").or_else(|| fields.get("conteudo")).map(value_text).unwrap_or_default();
        let content = content.trim();
        if content.is_empty() {
            continue;
        }
        let id = fields
            .get("id")
            .map(value_text)
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("chunk-{}", position + 1));
        let metadata: Metadata = fields
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "id" | "content" | "conteudo"))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        chunks.push(DocumentChunk { id, content: content.to_string(), metadata });
    }
    Ok(chunks)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// One chunk per non-empty paragraph of every `.txt` file under `root`.
///
/// Ids are `<path>:<n>` with the path relative to `root`, `/`-separated and
/// without the extension, so same-named files in sibling folders stay distinct.
pub fn load_text_dir(root: &Path) -> Result<Vec<DocumentChunk>> {
    let files = list_txt_files(root);
    if files.is_empty() {
        tracing::warn!(root = %root.display(), "no .txt files found");
        return Ok(Vec::new());
    }
    let mut all_chunks = Vec::new();
    for file_path in &files {
        let content = read_lossy(file_path)?;
        let doc_id = doc_id_of(file_path, root);
        let category = category_of(file_path, root);
        let doc_path = file_path.to_string_lossy().to_string();
        let paragraphs = content.split("\n\n").map(str::trim).filter(|p| !p.is_empty());
        for (index, paragraph) in paragraphs.enumerate() {
            all_chunks.push(
                DocumentChunk::new(format!("{doc_id}:{index}"), paragraph)
                    .with_metadata("doc_path", doc_path.clone())
                    .with_metadata("category", category.clone()),
            );
        }
    }
    tracing::info!(files = files.len(), chunks = all_chunks.len(), "loaded text corpus");
    Ok(all_chunks)
}

/// Chunks with distinct ids. A repeated id keeps its first position and its last content.
pub fn unique_by_id(chunks: &[DocumentChunk]) -> Vec<&DocumentChunk> {
    let mut slots: HashMap<&str, usize> = HashMap::new();
    let mut unique: Vec<&DocumentChunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match slots.get(chunk.id.as_str()) {
            Some(&slot) => unique[slot] = chunk,
            None => {
                slots.insert(chunk.id.as_str(), unique.len());
                unique.push(chunk);
            }
        }
    }
    unique
}

fn read_lossy(file_path: &Path) -> Result<String> {
    match fs::read_to_string(file_path) {
        Ok(content) => Ok(content),
        Err(_) => {
            let bytes = fs::read(file_path).with_context(|| format!("reading {}", file_path.display()))?;
            Ok(String::from_utf8_lossy(&bytes).to_string())
        }
    }
}

fn doc_id_of(file_path: &Path, root: &Path) -> String {
    let relative = file_path.strip_prefix(root).unwrap_or(file_path).with_extension("");
    let parts: Vec<String> = relative.components().map(|c| c.as_os_str().to_string_lossy().to_string()).collect();
    if parts.is_empty() {
        "doc".to_string()
    } else {
        parts.join("/")
    }
}

fn category_of(file_path: &Path, root: &Path) -> String {
    let relative = file_path.strip_prefix(root).unwrap_or(file_path);
    relative
        .parent()
        .and_then(Path::to_str)
        .filter(|p| !p.is_empty())
        .map_or_else(|| "misc".to_string(), str::to_string)
}

fn list_txt_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("txt"))
        .collect();
    files.sort();
    files
}
