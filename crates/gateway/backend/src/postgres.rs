//! PostgreSQL adapter with native vector search.
//!
//! Documents live in one JSONB table per collection. Vector collections get a
//! pgvector column mirroring the document's `vector` field, so top-k queries
//! run inside the database (`embedding <=> query` cosine distance) instead of
//! scanning client-side.

use async_trait::async_trait;
use pgvector::Vector;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use crate::filter::Filter;
use crate::schema::CollectionSpec;
use crate::traits::{apply_projection, ListOptions, RegistryBackend, SortOrder, VectorHit};
use crate::{BackendError, BackendResult};

/// PostgreSQL-backed storage adapter.
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Connect to PostgreSQL.
    pub async fn connect(database_url: &str) -> BackendResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> BackendResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| BackendError::Unavailable(format!("failed to connect postgres: {e}")))?;
        Ok(Self { pool })
    }

    /// Create adapter from an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RegistryBackend for PostgresBackend {
    async fn ensure_schema(&self, spec: &CollectionSpec) -> BackendResult<()> {
        let table = quote_ident(&spec.name)?;
        let stem = ident_stem(&spec.name);

        if spec.vector.is_some() {
            sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
                .execute(&self.pool)
                .await
                .map_err(map_unavailable)?;
        }

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                key TEXT PRIMARY KEY,
                doc JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"
        ))
        .execute(&self.pool)
        .await
        .map_err(map_unavailable)?;

        if let Some(vector) = spec.vector {
            sqlx::query(&format!(
                "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS embedding vector({})",
                vector.dimension
            ))
            .execute(&self.pool)
            .await
            .map_err(map_unavailable)?;

            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS \"{stem}_embedding_idx\" \
                 ON {table} USING hnsw (embedding vector_cosine_ops)"
            ))
            .execute(&self.pool)
            .await
            .map_err(map_unavailable)?;
        }

        for index in &spec.indexes {
            let field = checked_field(&index.field)?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS \"{stem}_{field}_idx\" \
                 ON {table} ((doc->>'{field}'))"
            ))
            .execute(&self.pool)
            .await
            .map_err(map_unavailable)?;
        }

        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> BackendResult<Option<Value>> {
        let table = quote_ident(collection)?;
        let row = sqlx::query(&format!("SELECT doc FROM {table} WHERE key = $1"))
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_unavailable)?;
        row.map(doc_from_row).transpose()
    }

    async fn insert(&self, collection: &str, key: &str, doc: Value) -> BackendResult<()> {
        let table = quote_ident(collection)?;
        // Plain collections have no embedding column; only touch it when
        // the document actually carries a vector.
        let result = match embedding_of(&doc) {
            Some(vector) => {
                sqlx::query(&format!(
                    "INSERT INTO {table} (key, doc, embedding, updated_at)
                     VALUES ($1, $2, $3, now())"
                ))
                .bind(key)
                .bind(&doc)
                .bind(vector)
                .execute(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "INSERT INTO {table} (key, doc, updated_at) VALUES ($1, $2, now())"
                ))
                .bind(key)
                .bind(&doc)
                .execute(&self.pool)
                .await
            }
        };
        result.map_err(map_conflict)?;
        Ok(())
    }

    async fn put(&self, collection: &str, key: &str, doc: Value) -> BackendResult<()> {
        let table = quote_ident(collection)?;
        let result = match embedding_of(&doc) {
            Some(vector) => {
                sqlx::query(&format!(
                    "INSERT INTO {table} (key, doc, embedding, updated_at)
                     VALUES ($1, $2, $3, now())
                     ON CONFLICT (key) DO UPDATE SET
                        doc = EXCLUDED.doc,
                        embedding = EXCLUDED.embedding,
                        updated_at = now()"
                ))
                .bind(key)
                .bind(&doc)
                .bind(vector)
                .execute(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "INSERT INTO {table} (key, doc, updated_at)
                     VALUES ($1, $2, now())
                     ON CONFLICT (key) DO UPDATE SET
                        doc = EXCLUDED.doc,
                        updated_at = now()"
                ))
                .bind(key)
                .bind(&doc)
                .execute(&self.pool)
                .await
            }
        };
        result.map_err(map_unavailable)?;
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> BackendResult<bool> {
        let table = quote_ident(collection)?;
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE key = $1"))
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(map_unavailable)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(
        &self,
        collection: &str,
        filter: &Filter,
        options: &ListOptions,
    ) -> BackendResult<Vec<Value>> {
        let table = quote_ident(collection)?;
        let mut args = Vec::new();
        let predicate = filter_to_sql(filter, &mut args)?;

        let mut sql = format!("SELECT doc FROM {table} WHERE {predicate}");
        if let Some(sort) = &options.sort {
            let field = checked_field(&sort.field)?;
            // Timestamp fields must compare as timestamps, not text.
            let expr = if field.ends_with("_at") {
                format!("(doc->>'{field}')::timestamptz")
            } else {
                format!("doc->>'{field}'")
            };
            let dir = match sort.order {
                SortOrder::Ascending => "ASC",
                SortOrder::Descending => "DESC",
            };
            sql.push_str(&format!(" ORDER BY {expr} {dir}, key ASC"));
        }
        if let Some(limit) = options.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if options.offset > 0 {
            sql.push_str(&format!(" OFFSET {}", options.offset));
        }

        let mut query = sqlx::query(&sql);
        for arg in &args {
            query = query.bind(arg);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(map_unavailable)?;

        rows.into_iter()
            .map(doc_from_row)
            .map(|doc| doc.map(|d| apply_projection(d, &options.projection)))
            .collect()
    }

    async fn vector_search(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
        filter: &Filter,
    ) -> BackendResult<Vec<VectorHit>> {
        if query_vector.is_empty() {
            return Err(BackendError::Invalid(
                "query vector must not be empty".to_string(),
            ));
        }
        let table = quote_ident(collection)?;
        let mut args = Vec::new();
        let predicate = filter_to_sql_offset(filter, &mut args, 1)?;

        let sql = format!(
            "SELECT key, 1 - (embedding <=> $1::vector) AS score
             FROM {table}
             WHERE embedding IS NOT NULL AND {predicate}
             ORDER BY embedding <=> $1::vector, key ASC
             LIMIT {k}"
        );

        let mut query = sqlx::query(&sql).bind(Vector::from(query_vector.to_vec()));
        for arg in &args {
            query = query.bind(arg);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(map_unavailable)?;

        rows.into_iter()
            .map(|row| {
                let key: String = row.try_get("key").map_err(map_row_error)?;
                let score: f64 = row.try_get("score").map_err(map_row_error)?;
                Ok(VectorHit {
                    key,
                    score: score as f32,
                })
            })
            .collect()
    }
}

fn doc_from_row(row: PgRow) -> BackendResult<Value> {
    row.try_get("doc").map_err(map_row_error)
}

fn embedding_of(doc: &Value) -> Option<Vector> {
    let array = doc.get("vector")?.as_array()?;
    let floats: Vec<f32> = array
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect();
    if floats.is_empty() {
        None
    } else {
        Some(Vector::from(floats))
    }
}

/// Quote a collection name as a SQL identifier. Collection names carry dots
/// (`registry.servers.default`), so they are always quoted verbatim.
fn quote_ident(name: &str) -> BackendResult<String> {
    if name.is_empty() || name.contains('"') || name.len() > 128 {
        return Err(BackendError::Invalid(format!(
            "invalid collection name `{name}`"
        )));
    }
    Ok(format!("\"{name}\""))
}

/// Identifier-safe stem for index names.
fn ident_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn checked_field(field: &str) -> BackendResult<&str> {
    if field.is_empty()
        || !field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(BackendError::Invalid(format!(
            "invalid field name `{field}`"
        )));
    }
    Ok(field)
}

fn filter_to_sql(filter: &Filter, args: &mut Vec<Value>) -> BackendResult<String> {
    filter_to_sql_offset(filter, args, 0)
}

/// Render a filter as SQL, binding JSONB parameters starting after
/// `reserved` already-bound placeholders.
fn filter_to_sql_offset(
    filter: &Filter,
    args: &mut Vec<Value>,
    reserved: usize,
) -> BackendResult<String> {
    match filter {
        Filter::True => Ok("TRUE".to_string()),
        Filter::Eq(field, value) => {
            let field = checked_field(field)?;
            args.push(value.clone());
            Ok(format!("doc->'{field}' = ${}", reserved + args.len()))
        }
        Filter::In(field, values) => {
            if values.is_empty() {
                return Ok("FALSE".to_string());
            }
            let field = checked_field(field)?;
            let clauses: Vec<String> = values
                .iter()
                .map(|value| {
                    args.push(value.clone());
                    format!("doc->'{field}' = ${}", reserved + args.len())
                })
                .collect();
            Ok(format!("({})", clauses.join(" OR ")))
        }
        Filter::Contains(field, value) => {
            let field = checked_field(field)?;
            args.push(Value::Array(vec![value.clone()]));
            Ok(format!("doc->'{field}' @> ${}", reserved + args.len()))
        }
        Filter::And(filters) => {
            if filters.is_empty() {
                return Ok("TRUE".to_string());
            }
            let clauses: Vec<String> = filters
                .iter()
                .map(|f| filter_to_sql_offset(f, args, reserved))
                .collect::<BackendResult<_>>()?;
            Ok(format!("({})", clauses.join(" AND ")))
        }
    }
}

fn map_conflict(err: sqlx::Error) -> BackendError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return BackendError::Conflict(db_err.message().to_string());
        }
    }
    BackendError::Unavailable(err.to_string())
}

fn map_unavailable(err: sqlx::Error) -> BackendError {
    BackendError::Unavailable(err.to_string())
}

fn map_row_error(err: sqlx::Error) -> BackendError {
    BackendError::Serialization(err.to_string())
}
