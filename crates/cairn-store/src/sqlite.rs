use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use cairn_pipeline::{ParamMap, ParamType, ParamValue, PipelineSpec, RUN_KEY, RunValues};
use sqlx::query::Query;
use sqlx::sqlite::{
  SqliteArguments, SqliteConnectOptions, SqliteConnection, SqlitePoolOptions, SqliteRow,
};
use sqlx::{FromRow, Row, Sqlite, SqlitePool};
use tracing::debug;

use crate::schema::{Column, ColumnSource, RunSchema, equality_clause};
use crate::{
  ArtifactRecord, CreatedRun, Declaration, DeclaredArtifact, Error, RunId, Store,
};

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_value<'q>(query: SqliteQuery<'q>, value: &'q ParamValue) -> SqliteQuery<'q> {
  match value {
    ParamValue::Int(v) => query.bind(*v),
    ParamValue::Float(v) => query.bind(*v),
    ParamValue::Str(v) | ParamValue::File(v) | ParamValue::Directory(v) => query.bind(v.as_str()),
  }
}

fn read_value(row: &SqliteRow, idx: usize, column: &Column) -> Result<ParamValue, Error> {
  let value = match column.param_type {
    ParamType::Int => ParamValue::Int(row.try_get(idx)?),
    ParamType::Float => ParamValue::Float(row.try_get(idx)?),
    ParamType::Str => ParamValue::Str(row.try_get(idx)?),
    ParamType::File => ParamValue::File(row.try_get(idx)?),
    ParamType::Directory => ParamValue::Directory(row.try_get(idx)?),
  };
  Ok(value)
}

fn run_not_found(run_id: RunId) -> Error {
  Error::NotFound(format!("run {}", run_id))
}

#[derive(FromRow)]
struct ArtifactRow {
  id: i64,
  name: String,
  producer: String,
  path: String,
  final_output: bool,
}

impl From<ArtifactRow> for ArtifactRecord {
  fn from(row: ArtifactRow) -> Self {
    Self {
      id: row.id,
      name: row.name,
      producer: row.producer,
      path: PathBuf::from(row.path),
      final_output: row.final_output,
    }
  }
}

/// SQLite-backed store whose run table is derived from a pipeline.
pub struct SqliteStore {
  pool: SqlitePool,
  schema: RunSchema,
  spec: Arc<PipelineSpec>,
  artifact_dir: PathBuf,
}

impl SqliteStore {
  /// Wrap an existing pool. Call [`SqliteStore::migrate`] before use.
  pub fn new(pool: SqlitePool, artifact_dir: impl Into<PathBuf>, spec: Arc<PipelineSpec>) -> Self {
    Self {
      pool,
      schema: RunSchema::from_spec(&spec),
      spec,
      artifact_dir: artifact_dir.into(),
    }
  }

  /// Open (or create) the database file and make sure the tables exist.
  pub async fn open(
    db_path: &Path,
    artifact_dir: impl Into<PathBuf>,
    spec: Arc<PipelineSpec>,
  ) -> Result<Self, Error> {
    let options = SqliteConnectOptions::new()
      .filename(db_path)
      .create_if_missing(true)
      .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect_with(options)
      .await?;

    let store = Self::new(pool, artifact_dir, spec);
    store.migrate().await?;
    Ok(store)
  }

  /// Create the tables on first use.
  pub async fn migrate(&self) -> Result<(), Error> {
    let existing: Option<(String,)> =
      sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'run'")
        .fetch_optional(&self.pool)
        .await?;
    if existing.is_some() {
      return Ok(());
    }

    let mut tx = self.pool.begin().await?;
    for statement in self.schema.create_statements() {
      sqlx::query(&statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
  }

  pub fn schema(&self) -> &RunSchema {
    &self.schema
  }

  pub async fn close(&self) {
    self.pool.close().await;
  }

  async fn run_exists(conn: &mut SqliteConnection, run_id: RunId) -> Result<bool, Error> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM run WHERE id = ?")
      .bind(run_id)
      .fetch_optional(conn)
      .await?;
    Ok(row.is_some())
  }

  async fn declare_in(
    &self,
    conn: &mut SqliteConnection,
    values: &RunValues,
    run_id: RunId,
    created: &mut Vec<PathBuf>,
  ) -> Result<Vec<DeclaredArtifact>, Error> {
    if !Self::run_exists(&mut *conn, run_id).await? {
      return Err(run_not_found(run_id));
    }

    let mut declared = Vec::new();
    for output in self.spec.outputs() {
      let linked: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT a.path
        FROM artifact a
        JOIN artifact_run ar ON ar.artifact_id = a.id
        WHERE ar.run_id = ? AND a.name = ?
        "#,
      )
      .bind(run_id)
      .bind(output.variable)
      .fetch_optional(&mut *conn)
      .await?;

      if let Some((path,)) = linked {
        declared.push(DeclaredArtifact {
          variable: output.variable.to_string(),
          path: PathBuf::from(path),
          declaration: Declaration::Existing,
        });
        continue;
      }

      // An instance is shareable when every node feeding its producer was
      // configured the same way.
      let ancestors = self.spec.ancestors(output.producer.name());
      let columns: Vec<&Column> = self
        .schema
        .columns()
        .iter()
        .filter(|c| ancestors.iter().any(|n| c.belongs_to(n.name())))
        .collect();
      let column_values = columns
        .iter()
        .map(|c| c.value_in(values))
        .collect::<Result<Vec<_>, _>>()?;

      let sql = format!(
        r#"
        SELECT a.id, a.path
        FROM artifact a
        JOIN artifact_run ar ON ar.artifact_id = a.id
        JOIN run r ON r.id = ar.run_id
        WHERE a.name = ? AND a.producer = ? AND {}
        ORDER BY a.id
        LIMIT 1
        "#,
        equality_clause(columns.iter().copied(), "r")
      );
      let mut query = sqlx::query(&sql)
        .bind(output.variable)
        .bind(output.producer.name());
      for &value in &column_values {
        query = bind_value(query, value);
      }

      if let Some(row) = query.fetch_optional(&mut *conn).await? {
        let artifact_id: i64 = row.try_get(0)?;
        let path: String = row.try_get(1)?;
        sqlx::query("INSERT INTO artifact_run (artifact_id, run_id) VALUES (?, ?)")
          .bind(artifact_id)
          .bind(run_id)
          .execute(&mut *conn)
          .await?;

        debug!(run_id, artifact_id, variable = output.variable, path = path.as_str(), "artifact_reused");
        declared.push(DeclaredArtifact {
          variable: output.variable.to_string(),
          path: PathBuf::from(path),
          declaration: Declaration::Reused,
        });
        continue;
      }

      let path = self
        .artifact_dir
        .join(format!("{}_{}_art", run_id, output.variable));
      let path_text = path.to_string_lossy().into_owned();
      let result = sqlx::query(
        "INSERT INTO artifact (name, producer, path, final_output) VALUES (?, ?, ?, ?)",
      )
      .bind(output.variable)
      .bind(output.producer.name())
      .bind(&path_text)
      .bind(output.kind.final_output)
      .execute(&mut *conn)
      .await?;
      let artifact_id = result.last_insert_rowid();

      sqlx::query("INSERT INTO artifact_run (artifact_id, run_id) VALUES (?, ?)")
        .bind(artifact_id)
        .bind(run_id)
        .execute(&mut *conn)
        .await?;

      // A fresh instance starts empty.
      if tokio::fs::try_exists(&path).await? {
        tokio::fs::remove_dir_all(&path).await?;
      }
      tokio::fs::create_dir_all(&path).await?;
      created.push(path.clone());

      debug!(run_id, artifact_id, variable = output.variable, path = path_text.as_str(), "artifact_declared");
      declared.push(DeclaredArtifact {
        variable: output.variable.to_string(),
        path,
        declaration: Declaration::Created,
      });
    }

    Ok(declared)
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn create_run(&self, values: &RunValues) -> Result<CreatedRun, Error> {
    let params = self.schema.values(values)?;
    let mut tx = self.pool.begin().await?;

    let sql = format!(
      "SELECT r.id, r.run_key FROM run r WHERE {} ORDER BY r.id LIMIT 1",
      equality_clause(self.schema.columns(), "r")
    );
    let mut query = sqlx::query(&sql);
    for &value in &params {
      query = bind_value(query, value);
    }
    if let Some(row) = query.fetch_optional(&mut *tx).await? {
      let run_id: i64 = row.try_get(0)?;
      let run_key: String = row.try_get(1)?;
      return Ok(CreatedRun {
        run_id,
        existing_run_key: Some(run_key),
      });
    }

    let mut idents = vec![RUN_KEY.to_string()];
    idents.extend(self.schema.columns().iter().map(Column::ident));
    let sql = format!(
      "INSERT INTO run ({}) VALUES ({})",
      idents.join(", "),
      vec!["?"; idents.len()].join(", ")
    );
    let mut query = sqlx::query(&sql).bind(values.run_key.as_str());
    for &value in &params {
      query = bind_value(query, value);
    }

    let result = match query.execute(&mut *tx).await {
      Ok(result) => result,
      Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
        return Err(Error::RunKeyCollision(values.run_key.clone()));
      }
      Err(e) => return Err(e.into()),
    };
    tx.commit().await?;

    Ok(CreatedRun {
      run_id: result.last_insert_rowid(),
      existing_run_key: None,
    })
  }

  async fn declare_artifacts(
    &self,
    values: &RunValues,
    run_id: RunId,
  ) -> Result<Vec<DeclaredArtifact>, Error> {
    let mut tx = self.pool.begin().await?;
    let mut created = Vec::new();

    let result = match self.declare_in(&mut tx, values, run_id, &mut created).await {
      Ok(declared) => tx.commit().await.map(|_| declared).map_err(Error::from),
      Err(e) => Err(e),
    };

    if result.is_err() {
      for path in &created {
        let _ = tokio::fs::remove_dir_all(path).await;
      }
    }
    result
  }

  async fn parameters_for(&self, run_id: RunId, node: &str) -> Result<ParamMap, Error> {
    if self.spec.node(node).is_none() {
      return Err(Error::NotFound(format!("node '{}'", node)));
    }

    let columns: Vec<&Column> = self.schema.node_columns(node).collect();
    let mut select = vec!["id".to_string()];
    select.extend(columns.iter().map(|c| c.ident()));
    let sql = format!("SELECT {} FROM run WHERE id = ?", select.join(", "));

    let row = sqlx::query(&sql)
      .bind(run_id)
      .fetch_optional(&self.pool)
      .await?
      .ok_or_else(|| run_not_found(run_id))?;

    let mut params = ParamMap::new();
    for (idx, column) in columns.iter().enumerate() {
      if let ColumnSource::Node { param, .. } = &column.source {
        params.insert(param.clone(), read_value(&row, idx + 1, column)?);
      }
    }
    Ok(params)
  }

  async fn details_for(&self, run_id: RunId) -> Result<ParamMap, Error> {
    let columns: Vec<&Column> = self.schema.detail_columns().collect();
    let mut select = vec![RUN_KEY.to_string()];
    select.extend(columns.iter().map(|c| c.ident()));
    let sql = format!("SELECT {} FROM run WHERE id = ?", select.join(", "));

    let row = sqlx::query(&sql)
      .bind(run_id)
      .fetch_optional(&self.pool)
      .await?
      .ok_or_else(|| run_not_found(run_id))?;

    let mut details = ParamMap::new();
    details.insert(RUN_KEY.to_string(), ParamValue::Str(row.try_get(0)?));
    for (idx, column) in columns.iter().enumerate() {
      if let ColumnSource::Detail(name) = &column.source {
        details.insert(name.clone(), read_value(&row, idx + 1, column)?);
      }
    }
    Ok(details)
  }

  async fn resolve_run_key(&self, run_key: &str) -> Result<RunId, Error> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM run WHERE run_key = ?")
      .bind(run_key)
      .fetch_optional(&self.pool)
      .await?;
    row
      .map(|(id,)| id)
      .ok_or_else(|| Error::NotFound(format!("run key '{}'", run_key)))
  }

  async fn artifact_paths(&self, run_id: RunId) -> Result<BTreeMap<String, PathBuf>, Error> {
    let rows: Vec<(String, String)> = sqlx::query_as(
      r#"
      SELECT a.name, a.path
      FROM artifact a
      JOIN artifact_run ar ON ar.artifact_id = a.id
      WHERE ar.run_id = ?
      "#,
    )
    .bind(run_id)
    .fetch_all(&self.pool)
    .await?;

    if rows.is_empty() {
      return Err(Error::NotFound(format!("artifacts of run {}", run_id)));
    }
    Ok(
      rows
        .into_iter()
        .map(|(name, path)| (name, PathBuf::from(path)))
        .collect(),
    )
  }

  async fn artifacts_for(&self, run_id: RunId) -> Result<Vec<ArtifactRecord>, Error> {
    let mut conn = self.pool.acquire().await?;
    if !Self::run_exists(&mut conn, run_id).await? {
      return Err(run_not_found(run_id));
    }

    let rows: Vec<ArtifactRow> = sqlx::query_as(
      r#"
      SELECT a.id, a.name, a.producer, a.path, a.final_output
      FROM artifact a
      JOIN artifact_run ar ON ar.artifact_id = a.id
      WHERE ar.run_id = ?
      ORDER BY a.id
      "#,
    )
    .bind(run_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(ArtifactRecord::from).collect())
  }

  async fn remove_run(&self, run_id: RunId) -> Result<Vec<PathBuf>, Error> {
    let mut tx = self.pool.begin().await?;
    if !Self::run_exists(&mut tx, run_id).await? {
      return Err(run_not_found(run_id));
    }

    sqlx::query("DELETE FROM artifact_run WHERE run_id = ?")
      .bind(run_id)
      .execute(&mut *tx)
      .await?;

    let orphans: Vec<(i64, String)> = sqlx::query_as(
      "SELECT id, path FROM artifact WHERE id NOT IN (SELECT artifact_id FROM artifact_run)",
    )
    .fetch_all(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM artifact WHERE id NOT IN (SELECT artifact_id FROM artifact_run)")
      .execute(&mut *tx)
      .await?;
    sqlx::query("DELETE FROM run WHERE id = ?")
      .bind(run_id)
      .execute(&mut *tx)
      .await?;
    tx.commit().await?;

    Ok(
      orphans
        .into_iter()
        .map(|(_, path)| PathBuf::from(path))
        .collect(),
    )
  }

  async fn list_runs(&self) -> Result<Vec<(RunId, String)>, Error> {
    let runs: Vec<(RunId, String)> = sqlx::query_as("SELECT id, run_key FROM run ORDER BY id")
      .fetch_all(&self.pool)
      .await?;
    Ok(runs)
  }
}
