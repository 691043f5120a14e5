use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use seqflow_model::{
  Analysis, AnalysisSubmission, CleanupState, NamedParameterSet, QcEntry, ReferenceFile,
  SequenceFile, SequencingObject, SubmissionState,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{SqliteExecutor, SqlitePool};
use tracing::debug;

use crate::update::apply_transition;
use crate::{Store, StoreError, SubmissionUpdate};

/// Optimistic write attempts before giving up with [`StoreError::Conflict`].
const MAX_WRITE_ATTEMPTS: usize = 8;

/// SQLite-based store implementation.
///
/// Submissions are stored as a JSON body plus the columns the scheduler
/// filters on. Every write is guarded by a row version, so a read-modify-write
/// that races another writer is retried against the fresh row.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if missing) the database at `url`.
  pub async fn connect(url: &str) -> Result<Self, StoreError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(Self::new(pool))
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), StoreError> {
    sqlx::migrate!().run(&self.pool).await?;
    Ok(())
  }

  async fn load(&self, submission_id: &str) -> Result<(AnalysisSubmission, i64), StoreError> {
    let row: Option<(Json<AnalysisSubmission>, i64)> =
      sqlx::query_as("SELECT body, version FROM submissions WHERE submission_id = ?")
        .bind(submission_id)
        .fetch_optional(&self.pool)
        .await?;

    row
      .map(|(Json(submission), version)| (submission, version))
      .ok_or_else(|| StoreError::NotFound(submission_id.to_string()))
  }

  /// Read-modify-write a submission. `f` returns `Ok(false)` to abandon the
  /// write; it is re-run against the fresh row after a version conflict.
  async fn mutate<F>(&self, submission_id: &str, mut f: F) -> Result<bool, StoreError>
  where
    F: FnMut(&mut AnalysisSubmission) -> Result<bool, StoreError> + Send,
  {
    for _ in 0..MAX_WRITE_ATTEMPTS {
      let (mut submission, version) = self.load(submission_id).await?;
      if !f(&mut submission)? {
        return Ok(false);
      }
      if write_versioned(&self.pool, &submission, version).await? {
        return Ok(true);
      }
      debug!(submission_id = %submission_id, "submission_write_conflict");
    }

    Err(StoreError::Conflict {
      submission_id: submission_id.to_string(),
    })
  }

  async fn get_body<T>(&self, sql: &str, id: &str) -> Result<T, StoreError>
  where
    T: serde::de::DeserializeOwned + Send + Unpin + 'static,
  {
    let row: Option<(Json<T>,)> = sqlx::query_as(sql)
      .bind(id)
      .fetch_optional(&self.pool)
      .await?;
    row
      .map(|(Json(body),)| body)
      .ok_or_else(|| StoreError::NotFound(id.to_string()))
  }
}

async fn write_versioned<'e>(
  executor: impl SqliteExecutor<'e>,
  submission: &AnalysisSubmission,
  version: i64,
) -> Result<bool, StoreError> {
  let result = sqlx::query(
    r#"
    UPDATE submissions
    SET state = ?, cleanup_state = ?, cancel_requested = ?, version = version + 1,
        body = ?, modified_at = ?
    WHERE submission_id = ? AND version = ?
    "#,
  )
  .bind(submission.state.as_str())
  .bind(submission.cleanup_state.as_str())
  .bind(submission.cancel_requested)
  .bind(Json(submission))
  .bind(submission.modified_at)
  .bind(&submission.submission_id)
  .bind(version)
  .execute(executor)
  .await?;

  Ok(result.rows_affected() == 1)
}

fn bodies<T>(rows: Vec<(Json<T>,)>) -> Vec<T> {
  rows.into_iter().map(|(Json(body),)| body).collect()
}

#[async_trait]
impl Store for SqliteStore {
  async fn create_submission(&self, submission: &AnalysisSubmission) -> Result<(), StoreError> {
    let result = sqlx::query(
      r#"
      INSERT INTO submissions (submission_id, state, cleanup_state, cancel_requested, version, body, created_at, modified_at)
      VALUES (?, ?, ?, ?, 0, ?, ?, ?)
      ON CONFLICT (submission_id) DO NOTHING
      "#,
    )
    .bind(&submission.submission_id)
    .bind(submission.state.as_str())
    .bind(submission.cleanup_state.as_str())
    .bind(submission.cancel_requested)
    .bind(Json(submission))
    .bind(submission.created_at)
    .bind(submission.modified_at)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(StoreError::AlreadyExists(submission.submission_id.clone()));
    }
    Ok(())
  }

  async fn get_submission(&self, submission_id: &str) -> Result<AnalysisSubmission, StoreError> {
    self.load(submission_id).await.map(|(submission, _)| submission)
  }

  async fn find_by_state(
    &self,
    state: SubmissionState,
    limit: usize,
  ) -> Result<Vec<AnalysisSubmission>, StoreError> {
    let rows: Vec<(Json<AnalysisSubmission>,)> = sqlx::query_as(
      r#"
      SELECT body FROM submissions
      WHERE state = ?
      ORDER BY modified_at ASC
      LIMIT ?
      "#,
    )
    .bind(state.as_str())
    .bind(limit as i64)
    .fetch_all(&self.pool)
    .await?;

    Ok(bodies(rows))
  }

  async fn find_schedulable(
    &self,
    states: &[SubmissionState],
    limit: usize,
  ) -> Result<Vec<AnalysisSubmission>, StoreError> {
    if states.is_empty() {
      return Ok(Vec::new());
    }
    let placeholders = vec!["?"; states.len()].join(", ");
    let sql = format!(
      r#"
      SELECT body FROM submissions
      WHERE state IN ({placeholders})
        AND cancel_requested = 0
        AND (state != 'NEW' OR json_extract(body, '$.last_error') IS NULL)
      ORDER BY modified_at ASC
      LIMIT ?
      "#
    );
    let mut query = sqlx::query_as::<_, (Json<AnalysisSubmission>,)>(&sql);
    for state in states {
      query = query.bind(state.as_str());
    }
    let rows = query.bind(limit as i64).fetch_all(&self.pool).await?;

    Ok(bodies(rows))
  }

  async fn find_cleanup_candidates(
    &self,
    limit: usize,
  ) -> Result<Vec<AnalysisSubmission>, StoreError> {
    let rows: Vec<(Json<AnalysisSubmission>,)> = sqlx::query_as(
      r#"
      SELECT body FROM submissions
      WHERE cleanup_state = 'NOT_CLEANED'
        AND (state IN ('COMPLETED', 'ERROR') OR (cancel_requested = 1 AND state != 'NEW'))
      ORDER BY modified_at ASC
      LIMIT ?
      "#,
    )
    .bind(limit as i64)
    .fetch_all(&self.pool)
    .await?;

    Ok(bodies(rows))
  }

  async fn transition(
    &self,
    submission_id: &str,
    expected: SubmissionState,
    next: SubmissionState,
    update: SubmissionUpdate,
  ) -> Result<bool, StoreError> {
    self
      .mutate(submission_id, |submission| {
        apply_transition(submission, expected, next, &update)
      })
      .await
  }

  async fn update_submission(
    &self,
    submission_id: &str,
    expected: SubmissionState,
    update: SubmissionUpdate,
  ) -> Result<bool, StoreError> {
    self
      .transition(submission_id, expected, expected, update)
      .await
  }

  async fn request_cancellation(&self, submission_id: &str) -> Result<(), StoreError> {
    self
      .mutate(submission_id, |submission| {
        submission.cancel_requested = true;
        submission.modified_at = Utc::now();
        Ok(true)
      })
      .await?;
    Ok(())
  }

  async fn compare_and_set_cleanup_state(
    &self,
    submission_id: &str,
    expected: CleanupState,
    next: CleanupState,
  ) -> Result<bool, StoreError> {
    self
      .mutate(submission_id, |submission| {
        if submission.cleanup_state != expected {
          return Ok(false);
        }
        submission.cleanup_state = next;
        submission.modified_at = Utc::now();
        Ok(true)
      })
      .await
  }

  async fn find_stale_cleanups(
    &self,
    claimed_before: DateTime<Utc>,
    limit: usize,
  ) -> Result<Vec<AnalysisSubmission>, StoreError> {
    let rows: Vec<(Json<AnalysisSubmission>,)> = sqlx::query_as(
      r#"
      SELECT body FROM submissions
      WHERE cleanup_state = 'CLEANING' AND modified_at < ?
      ORDER BY modified_at ASC
      LIMIT ?
      "#,
    )
    .bind(claimed_before)
    .bind(limit as i64)
    .fetch_all(&self.pool)
    .await?;

    Ok(bodies(rows))
  }

  async fn reclaim_cleanup(
    &self,
    submission_id: &str,
    claimed_before: DateTime<Utc>,
  ) -> Result<bool, StoreError> {
    self
      .mutate(submission_id, |submission| {
        if submission.cleanup_state != CleanupState::Cleaning
          || submission.modified_at >= claimed_before
        {
          return Ok(false);
        }
        submission.modified_at = Utc::now();
        Ok(true)
      })
      .await
  }

  async fn complete_submission(
    &self,
    submission_id: &str,
    analysis: &Analysis,
  ) -> Result<bool, StoreError> {
    for _ in 0..MAX_WRITE_ATTEMPTS {
      let (mut submission, version) = self.load(submission_id).await?;
      let applied = apply_transition(
        &mut submission,
        SubmissionState::Completing,
        SubmissionState::Completed,
        &SubmissionUpdate::default(),
      )?;
      if !applied {
        return Ok(false);
      }
      submission.analysis_id = Some(analysis.analysis_id.clone());

      let mut tx = self.pool.begin().await?;
      if !write_versioned(&mut *tx, &submission, version).await? {
        tx.rollback().await?;
        debug!(submission_id = %submission_id, "submission_write_conflict");
        continue;
      }
      sqlx::query(
        r#"
        INSERT INTO analyses (analysis_id, submission_id, body, created_at)
        VALUES (?, ?, ?, ?)
        "#,
      )
      .bind(&analysis.analysis_id)
      .bind(submission_id)
      .bind(Json(analysis))
      .bind(analysis.created_at)
      .execute(&mut *tx)
      .await?;
      tx.commit().await?;
      return Ok(true);
    }

    Err(StoreError::Conflict {
      submission_id: submission_id.to_string(),
    })
  }

  async fn get_analysis(&self, analysis_id: &str) -> Result<Analysis, StoreError> {
    self
      .get_body("SELECT body FROM analyses WHERE analysis_id = ?", analysis_id)
      .await
  }

  async fn create_sequencing_object(&self, object: &SequencingObject) -> Result<(), StoreError> {
    sqlx::query(
      r#"
      INSERT INTO sequencing_objects (object_id, sample_id, body, created_at)
      VALUES (?, ?, ?, ?)
      "#,
    )
    .bind(&object.object_id)
    .bind(&object.sample_id)
    .bind(Json(object))
    .bind(object.created_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn get_sequencing_object(&self, object_id: &str) -> Result<SequencingObject, StoreError> {
    self
      .get_body(
        "SELECT body FROM sequencing_objects WHERE object_id = ?",
        object_id,
      )
      .await
  }

  async fn sequencing_object_exists(&self, object_id: &str) -> Result<bool, StoreError> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM sequencing_objects WHERE object_id = ?")
      .bind(object_id)
      .fetch_optional(&self.pool)
      .await?;
    Ok(row.is_some())
  }

  async fn update_sequence_file(
    &self,
    object_id: &str,
    file: &SequenceFile,
  ) -> Result<(), StoreError> {
    let mut tx = self.pool.begin().await?;
    let row: Option<(Json<SequencingObject>,)> =
      sqlx::query_as("SELECT body FROM sequencing_objects WHERE object_id = ?")
        .bind(object_id)
        .fetch_optional(&mut *tx)
        .await?;
    let Some((Json(mut object),)) = row else {
      return Err(StoreError::NotFound(object_id.to_string()));
    };

    let slot = object
      .file_mut(&file.file_id)
      .ok_or_else(|| StoreError::NotFound(file.file_id.clone()))?;
    *slot = file.clone();

    sqlx::query("UPDATE sequencing_objects SET body = ? WHERE object_id = ?")
      .bind(Json(&object))
      .bind(object_id)
      .execute(&mut *tx)
      .await?;
    tx.commit().await?;
    Ok(())
  }

  async fn create_reference_file(&self, reference: &ReferenceFile) -> Result<(), StoreError> {
    sqlx::query(
      r#"
      INSERT INTO reference_files (reference_id, body) VALUES (?, ?)
      ON CONFLICT (reference_id) DO UPDATE SET body = excluded.body
      "#,
    )
    .bind(&reference.reference_id)
    .bind(Json(reference))
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn get_reference_file(&self, reference_id: &str) -> Result<ReferenceFile, StoreError> {
    self
      .get_body(
        "SELECT body FROM reference_files WHERE reference_id = ?",
        reference_id,
      )
      .await
  }

  async fn create_qc_entry(&self, entry: &QcEntry) -> Result<(), StoreError> {
    sqlx::query(
      r#"
      INSERT INTO qc_entries (qc_entry_id, sample_id, object_id, body, created_at)
      VALUES (?, ?, ?, ?, ?)
      "#,
    )
    .bind(&entry.qc_entry_id)
    .bind(&entry.sample_id)
    .bind(&entry.object_id)
    .bind(Json(entry))
    .bind(entry.created_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn list_qc_entries(&self, sample_id: &str) -> Result<Vec<QcEntry>, StoreError> {
    let rows: Vec<(Json<QcEntry>,)> = sqlx::query_as(
      r#"
      SELECT body FROM qc_entries
      WHERE sample_id = ?
      ORDER BY created_at ASC
      "#,
    )
    .bind(sample_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(bodies(rows))
  }

  async fn create_parameter_set(&self, set: &NamedParameterSet) -> Result<(), StoreError> {
    sqlx::query(
      r#"
      INSERT INTO parameter_sets (parameter_set_id, workflow_id, body) VALUES (?, ?, ?)
      "#,
    )
    .bind(&set.parameter_set_id)
    .bind(&set.workflow_id)
    .bind(Json(set))
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn get_parameter_set(
    &self,
    parameter_set_id: &str,
  ) -> Result<NamedParameterSet, StoreError> {
    self
      .get_body(
        "SELECT body FROM parameter_sets WHERE parameter_set_id = ?",
        parameter_set_id,
      )
      .await
  }

  async fn get_sample_metadata(
    &self,
    sample_id: &str,
  ) -> Result<BTreeMap<String, String>, StoreError> {
    let rows: Vec<(String, String)> =
      sqlx::query_as("SELECT key, value FROM sample_metadata WHERE sample_id = ?")
        .bind(sample_id)
        .fetch_all(&self.pool)
        .await?;
    Ok(rows.into_iter().collect())
  }

  async fn merge_sample_metadata(
    &self,
    sample_id: &str,
    entries: &BTreeMap<String, String>,
  ) -> Result<(), StoreError> {
    let mut tx = self.pool.begin().await?;
    for (key, value) in entries {
      sqlx::query(
        r#"
        INSERT INTO sample_metadata (sample_id, key, value) VALUES (?, ?, ?)
        ON CONFLICT (sample_id, key) DO UPDATE SET value = excluded.value
        "#,
      )
      .bind(sample_id)
      .bind(key)
      .bind(value)
      .execute(&mut *tx)
      .await?;
    }
    tx.commit().await?;
    Ok(())
  }
}
