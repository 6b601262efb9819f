//! Import jobs: submission, execution, status and requeue.

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use stockline_core::{DomainError, ExpectedVersion, ImportId, UserId};

use crate::config::Config;
use crate::error::ServiceError;
use crate::store::Store;
use crate::tx::transact;

use super::blob::{BlobError, BlobStore};
use super::model::{ImportIssue, ImportResults, ImportStatus, ImportStatusView, ProductImport};
use super::reconcile::Reconciler;
use super::rows::{ImportRow, SourceRow, read_source};
use super::worker::ImportQueue;

/// Where uploaded sources are stored on the blob store.
pub const UPLOAD_DIR: &str = "imports/products";

/// Statuses re-dispatched by [`ImportService::requeue`] when none are given.
pub const DEFAULT_REQUEUE_STATUSES: [ImportStatus; 2] = [ImportStatus::Pending, ImportStatus::Failed];

/// `imports/a.csv` → `imports/a-results.json`.
pub fn results_path_for(source: &str) -> String {
    let stem = match source.len().checked_sub(4) {
        Some(cut) if source.is_char_boundary(cut) && source[cut..].eq_ignore_ascii_case(".csv") => {
            &source[..cut]
        }
        _ => source,
    };
    format!("{stem}-results.json")
}

pub struct ImportService<S, F> {
    store: S,
    blobs: F,
    reconciler: Reconciler,
    config: Config,
    queue: Option<ImportQueue>,
}

impl<S, F> ImportService<S, F>
where
    S: Store,
    F: BlobStore,
{
    pub fn new(store: S, blobs: F, config: Config) -> Self {
        Self {
            store,
            blobs,
            reconciler: Reconciler::new(config.default_low_stock_threshold),
            config,
            queue: None,
        }
    }

    /// Send submitted and requeued imports to a background worker.
    pub fn with_queue(mut self, queue: ImportQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn blobs(&self) -> &F {
        &self.blobs
    }

    /// Store an uploaded CSV under [`UPLOAD_DIR`] and submit it.
    pub fn upload(
        &self,
        file_name: &str,
        contents: &[u8],
        uploaded_by: Option<UserId>,
    ) -> Result<ProductImport, ServiceError> {
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if extension != "csv" && extension != "txt" {
            return Err(DomainError::validation(format!(
                "import must be a .csv or .txt file, got {file_name:?}"
            ))
            .into());
        }

        let path = format!("{UPLOAD_DIR}/{}.{extension}", Uuid::now_v7());
        self.blobs.write(&path, contents)?;
        self.submit(path, uploaded_by)
    }

    /// Record a pending import for a source already on the blob store and
    /// queue it.
    #[instrument(skip(self, path), fields(import_id = tracing::field::Empty), err)]
    pub fn submit(
        &self,
        path: impl Into<String>,
        uploaded_by: Option<UserId>,
    ) -> Result<ProductImport, ServiceError> {
        let pending = ProductImport::new(path, uploaded_by, Utc::now());
        let import = transact(&self.store, self.config.max_conflict_retries, |uow| {
            Ok(uow.insert_import(&pending)?)
        })?;
        tracing::Span::current().record("import_id", tracing::field::display(import.id));
        info!(path = %import.path, "import submitted");
        self.dispatch(import.id);
        Ok(import)
    }

    /// Process every row of an import and record the outcome.
    ///
    /// Row failures are collected, never raised. A source that cannot be
    /// read marks the import failed without touching the catalog. The
    /// returned record is in its terminal state.
    #[instrument(skip(self), fields(import_id = %import_id), err)]
    pub fn run(&self, import_id: ImportId) -> Result<ProductImport, ServiceError> {
        let import = self.update(import_id, |i| i.started(Utc::now()))?;
        info!(path = %import.path, "import started");

        let rows = match self.open(&import.path) {
            Ok(rows) => rows,
            Err(issue) => {
                warn!(path = %import.path, error = %issue.message, "import source unusable");
                return self.update(import_id, |i| i.failed(issue.clone(), Utc::now()));
            }
        };

        let results = self.process(import_id, rows);
        let results_path = self.write_results(&import.path, &results);

        let done = self.update(import_id, |i| i.finished(&results, results_path.clone(), Utc::now()))?;
        info!(
            status = %done.status,
            processed = results.processed,
            created = results.created,
            updated = results.updated,
            failed = results.failed,
            "import finished"
        );
        Ok(done)
    }

    /// Status plus the results artifact when one was written and is readable.
    pub fn status(&self, import_id: ImportId) -> Result<ImportStatusView, ServiceError> {
        let import = self.load(import_id)?;
        let results = import.results_path.as_deref().and_then(|path| {
            let bytes = self
                .blobs
                .read(path)
                .map_err(|e| debug!(path, error = %e, "results artifact unavailable"))
                .ok()?;
            serde_json::from_slice::<ImportResults>(&bytes)
                .map_err(|e| debug!(path, error = %e, "results artifact unreadable"))
                .ok()
        });
        Ok(ImportStatusView {
            id: import.id,
            path: import.path,
            status: import.status,
            results,
            errors: import.errors,
        })
    }

    /// Put every import in one of `statuses` back to pending and queue it.
    pub fn requeue(&self, statuses: &[ImportStatus]) -> Result<Vec<ImportId>, ServiceError> {
        let statuses = if statuses.is_empty() {
            &DEFAULT_REQUEUE_STATUSES[..]
        } else {
            statuses
        };
        let candidates = transact(&self.store, self.config.max_conflict_retries, |uow| {
            Ok(uow.imports_by_status(statuses)?)
        })?;

        let mut ids = Vec::with_capacity(candidates.len());
        for import in candidates {
            self.requeue_one(import.id)?;
            ids.push(import.id);
        }
        info!(count = ids.len(), "imports requeued");
        Ok(ids)
    }

    pub fn requeue_one(&self, import_id: ImportId) -> Result<ProductImport, ServiceError> {
        let import = self.update(import_id, |i| i.requeued(Utc::now()))?;
        debug!(import_id = %import_id, path = %import.path, "import requeued");
        self.dispatch(import.id);
        Ok(import)
    }

    fn dispatch(&self, import_id: ImportId) {
        match &self.queue {
            Some(queue) => {
                queue.enqueue(import_id);
            }
            None => debug!(import_id = %import_id, "no import worker attached; run it directly"),
        }
    }

    fn open(&self, path: &str) -> Result<Vec<SourceRow>, ImportIssue> {
        let bytes = match self.blobs.read(path) {
            Ok(bytes) => bytes,
            Err(BlobError::NotFound(_)) => return Err(ImportIssue::structural("file not found")),
            Err(e) => return Err(ImportIssue::structural(e.to_string())),
        };
        read_source(&bytes).map_err(|e| match e {
            DomainError::StructuralImportFailure(message) => ImportIssue::structural(message),
            other => ImportIssue::structural(other.to_string()),
        })
    }

    /// Rows run in order, each in its own unit of work.
    fn process(&self, import_id: ImportId, rows: Vec<SourceRow>) -> ImportResults {
        let mut results = ImportResults::default();
        for source in rows {
            results.processed += 1;

            let raw = match source {
                Ok(raw) => raw,
                Err(issue) => {
                    warn!(row = ?issue.row, error = %issue.message, "import row unreadable");
                    results.failed += 1;
                    results.errors.push(issue);
                    continue;
                }
            };

            let applied = ImportRow::parse(&raw).map_err(ServiceError::from).and_then(|row| {
                transact(&self.store, self.config.max_conflict_retries, |uow| {
                    self.reconciler.apply(uow, import_id, &row, Utc::now())
                })
            });

            match applied {
                Ok(outcome) if outcome.created => results.created += 1,
                Ok(_) => results.updated += 1,
                Err(e) => {
                    warn!(row = raw.number, error = %e, "import row failed");
                    results.record_failure(raw.number, e.to_string());
                }
            }
        }
        results
    }

    fn write_results(&self, source: &str, results: &ImportResults) -> Option<String> {
        let path = results_path_for(source);
        let written = serde_json::to_vec_pretty(results)
            .map_err(|e| e.to_string())
            .and_then(|json| self.blobs.write(&path, &json).map_err(|e| e.to_string()));
        match written {
            Ok(()) => Some(path),
            Err(error) => {
                warn!(path = %path, error = %error, "could not write import results");
                None
            }
        }
    }

    fn load(&self, import_id: ImportId) -> Result<ProductImport, ServiceError> {
        transact(&self.store, self.config.max_conflict_retries, |uow| {
            uow.import(import_id)?
                .ok_or_else(|| DomainError::not_found(format!("import {import_id}")).into())
        })
    }

    fn update(
        &self,
        import_id: ImportId,
        next: impl Fn(&ProductImport) -> ProductImport,
    ) -> Result<ProductImport, ServiceError> {
        transact(&self.store, self.config.max_conflict_retries, |uow| {
            let current = uow
                .import(import_id)?
                .ok_or_else(|| DomainError::not_found(format!("import {import_id}")))?;
            Ok(uow.save_import(&next(&current), ExpectedVersion::Exact(current.version))?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::catalog::blob::InMemoryBlobStore;
    use crate::store::InMemoryStore;

    type Service = ImportService<Arc<InMemoryStore>, Arc<InMemoryBlobStore>>;

    fn service() -> Service {
        ImportService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryBlobStore::new()),
            Config::default(),
        )
    }

    #[test]
    fn results_path_replaces_the_csv_extension() {
        assert_eq!(results_path_for("imports/products/a.csv"), "imports/products/a-results.json");
        assert_eq!(results_path_for("imports/products/a.CSV"), "imports/products/a-results.json");
        assert_eq!(results_path_for("imports/products/a.txt"), "imports/products/a.txt-results.json");
    }

    #[test]
    fn bad_and_good_rows_are_independent() {
        let service = service();
        let import = service
            .upload(
                "catalog.csv",
                b"sku,name,price,quantity\nA,Alpha,,3\nB,Beta,2.50,4\n",
                None,
            )
            .unwrap();
        assert!(import.path.starts_with("imports/products/"));
        assert_eq!(import.status, ImportStatus::Pending);

        let done = service.run(import.id).unwrap();
        assert_eq!(done.status, ImportStatus::Failed);
        assert_eq!(done.errors, vec![ImportIssue::row(2, "missing required fields: price")]);

        let view = service.status(import.id).unwrap();
        let results = view.results.unwrap();
        assert_eq!((results.processed, results.created, results.updated, results.failed), (2, 1, 0, 1));
    }

    #[test]
    fn missing_or_empty_sources_fail_structurally() {
        let service = service();

        let missing = service.submit("imports/products/nope.csv", None).unwrap();
        let done = service.run(missing.id).unwrap();
        assert_eq!(done.status, ImportStatus::Failed);
        assert_eq!(done.errors, vec![ImportIssue::structural("file not found")]);
        assert_eq!(done.results_path, None);

        let empty = service.upload("empty.csv", b"", None).unwrap();
        let done = service.run(empty.id).unwrap();
        assert_eq!(done.errors, vec![ImportIssue::structural("file is empty")]);
        assert!(service.status(empty.id).unwrap().results.is_none());
    }

    #[test]
    fn uploads_must_be_csv_or_text() {
        let err = service().upload("catalog.xlsx", b"", None).unwrap_err();
        assert_eq!(err.kind().code(), "validation");
    }

    #[test]
    fn requeue_resets_failed_imports_to_pending() {
        let service = service();
        let failed = service.submit("imports/products/gone.csv", None).unwrap();
        service.run(failed.id).unwrap();
        let completed = service.upload("ok.csv", b"sku,name,price\nA,Alpha,1\n", None).unwrap();
        service.run(completed.id).unwrap();

        let ids = service.requeue(&[]).unwrap();
        assert_eq!(ids, vec![failed.id]);
        assert_eq!(service.status(failed.id).unwrap().status, ImportStatus::Pending);
        assert_eq!(service.status(completed.id).unwrap().status, ImportStatus::Completed);

        assert_eq!(
            service.requeue_one(ImportId::new()).unwrap_err().kind().code(),
            "not_found"
        );
    }
}
