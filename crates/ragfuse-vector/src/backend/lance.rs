//! Embedded LanceDB table, overwritten on every build.

use anyhow::{anyhow, Context, Result};
use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::{remap_cosine, BackendMatch, VectorBackend};
use crate::document::VectorDocument;

pub struct LanceBackend {
    uri: String,
    table: String,
    db: OnceCell<Connection>,
}

fn sentence_schema(dim: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("source", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("parent_content", DataType::Utf8, false),
        Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
    ]))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow!("lance result is missing string column `{name}`"))
}

impl LanceBackend {
    /// The database is opened on first use.
    pub fn new(path: &Path, table: &str) -> Self {
        Self { uri: path.to_string_lossy().to_string(), table: table.to_string(), db: OnceCell::new() }
    }

    async fn db(&self) -> Result<&Connection> {
        self.db
            .get_or_try_init(|| async { connect(&self.uri).execute().await.with_context(|| format!("opening lance database {}", self.uri)) })
            .await
    }

    fn to_record_batch(documents: &[VectorDocument]) -> Result<RecordBatch> {
        let dim = documents.first().map_or(0, |d| d.embedding.len());
        let dim = i32::try_from(dim).context("embedding dimension exceeds i32")?;
        let sources: Vec<&str> = documents.iter().map(|d| d.source.as_str()).collect();
        let contents: Vec<&str> = documents.iter().map(|d| d.content.as_str()).collect();
        let parents: Vec<&str> = documents.iter().map(|d| d.parent_content.as_str()).collect();
        let vectors = documents.iter().map(|d| Some(d.embedding.iter().copied().map(Some).collect::<Vec<_>>()));
        let record_batch = RecordBatch::try_new(
            sentence_schema(dim),
            vec![
                Arc::new(StringArray::from(sources)),
                Arc::new(StringArray::from(contents)),
                Arc::new(StringArray::from(parents)),
                Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(vectors, dim)),
            ],
        )?;
        Ok(record_batch)
    }
}

#[async_trait]
impl VectorBackend for LanceBackend {
    fn name(&self) -> &'static str {
        "lance"
    }

    async fn replace_all(&self, documents: &[VectorDocument]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let db = self.db().await?;
        let record_batch = Self::to_record_batch(documents)?;
        let schema = record_batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(record_batch)].into_iter(), schema));
        if db.table_names().execute().await?.contains(&self.table) {
            let table = db.open_table(&self.table).execute().await?;
            table.delete("true").await?;
            table.add(reader).execute().await?;
        } else {
            db.create_table(&self.table, reader).execute().await?;
        }
        tracing::info!(table = %self.table, rows = documents.len(), "lance table replaced");
        Ok(())
    }

    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<BackendMatch>> {
        let db = self.db().await?;
        let table = db.open_table(&self.table).execute().await?;
        let mut stream = table
            .vector_search(query.to_vec())?
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await?;
        let mut matches = Vec::new();
        while let Some(batch) = stream.try_next().await? {
            let sources = string_column(&batch, "source")?;
            let parents = string_column(&batch, "parent_content")?;
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow!("lance result is missing `_distance`"))?;
            for row in 0..batch.num_rows() {
                if sources.is_null(row) || distances.is_null(row) {
                    continue;
                }
                // Cosine distance is `1 - cos`.
                let cos = 1.0 - distances.value(row);
                matches.push(BackendMatch {
                    source: sources.value(row).to_string(),
                    parent_content: parents.value(row).to_string(),
                    score: remap_cosine(cos),
                });
            }
        }
        Ok(matches)
    }
}
