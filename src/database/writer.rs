use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, select, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use tracing::{error, info, warn};

use crate::database::repo::CatalogRepository;
use crate::error::{CatalogError, Result};
use crate::model::{ProjectAggregate, ProjectId};

const QUEUE_DEPTH: usize = 64;

enum WriteRequest {
    Insert {
        project: ProjectAggregate,
        reply: Sender<Result<ProjectId>>,
    },
    InsertBatch {
        projects: Vec<ProjectAggregate>,
        reply: Sender<Result<Vec<ProjectId>>>,
    },
    ImportSeed {
        digest: String,
        source: String,
        projects: Vec<ProjectAggregate>,
        reply: Sender<Result<Option<Vec<ProjectId>>>>,
    },
}

/// Owns the only writing connection and applies inserts one at a time on a
/// dedicated thread. Tag lookup-or-create can therefore never interleave
/// between two inserts.
pub struct CatalogWriter {
    handle: WriterHandle,
    // Dropping this sender tells the worker to stop.
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

/// Cloneable submission side of a [`CatalogWriter`].
#[derive(Clone)]
pub struct WriterHandle {
    tx: Sender<WriteRequest>,
    request_timeout: Duration,
}

impl CatalogWriter {
    pub fn spawn(repo: CatalogRepository, request_timeout: Duration) -> Result<Self> {
        let (tx, rx) = bounded::<WriteRequest>(QUEUE_DEPTH);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let worker = thread::Builder::new()
            .name("catalog-writer".to_string())
            .spawn(move || run(repo, rx, stop_rx))
            .map_err(|e| CatalogError::StorageUnavailable(format!("writer thread: {}", e)))?;

        Ok(Self {
            handle: WriterHandle {
                tx,
                request_timeout,
            },
            stop_tx: Some(stop_tx),
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> WriterHandle {
        self.handle.clone()
    }

    /// Stop the writer once the requests already queued are applied.
    ///
    /// Handles that outlive the writer fail with
    /// [`CatalogError::StorageUnavailable`].
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        drop(self.stop_tx.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Catalog writer thread panicked");
            }
        }
    }
}

impl Drop for CatalogWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

impl WriterHandle {
    /// Queue one project for insertion and wait for its id.
    ///
    /// A [`CatalogError::StorageTimeout`] means the caller stopped waiting;
    /// the insert may still commit afterwards.
    pub fn insert_project(&self, project: ProjectAggregate) -> Result<ProjectId> {
        project.validate()?;
        self.submit(|reply| WriteRequest::Insert { project, reply })
    }

    pub fn insert_projects(&self, projects: Vec<ProjectAggregate>) -> Result<Vec<ProjectId>> {
        for project in &projects {
            project.validate()?;
        }
        self.submit(|reply| WriteRequest::InsertBatch { projects, reply })
    }

    pub fn import_seed(
        &self,
        digest: String,
        source: String,
        projects: Vec<ProjectAggregate>,
    ) -> Result<Option<Vec<ProjectId>>> {
        self.submit(|reply| WriteRequest::ImportSeed {
            digest,
            source,
            projects,
            reply,
        })
    }

    fn submit<T>(&self, build: impl FnOnce(Sender<Result<T>>) -> WriteRequest) -> Result<T> {
        let (reply_tx, reply_rx) = bounded(1);
        match self.tx.send_timeout(build(reply_tx), self.request_timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                return Err(CatalogError::StorageTimeout(
                    "writer queue is full".to_string(),
                ))
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                return Err(CatalogError::StorageUnavailable(
                    "catalog writer has stopped".to_string(),
                ))
            }
        }

        match reply_rx.recv_timeout(self.request_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(CatalogError::StorageTimeout(format!(
                "no reply from writer within {:?}",
                self.request_timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(CatalogError::StorageUnavailable(
                "catalog writer dropped the request".to_string(),
            )),
        }
    }
}

fn run(mut repo: CatalogRepository, rx: Receiver<WriteRequest>, stop_rx: Receiver<()>) {
    info!("Catalog writer started");
    loop {
        select! {
            recv(rx) -> request => match request {
                Ok(request) => apply(&mut repo, request),
                Err(_) => break,
            },
            recv(stop_rx) -> _ => {
                // Finish what was queued before the stop, then let the
                // receiver go so later submissions fail fast.
                let pending = rx.len();
                for request in rx.try_iter().take(pending) {
                    apply(&mut repo, request);
                }
                break;
            }
        }
    }
    info!("Catalog writer finished");
}

fn apply(repo: &mut CatalogRepository, request: WriteRequest) {
    match request {
        WriteRequest::Insert { project, reply } => {
            let result = retry_once(|| repo.insert_project(&project));
            let _ = reply.send(result);
        }
        WriteRequest::InsertBatch { projects, reply } => {
            let result = retry_once(|| repo.insert_projects(&projects));
            let _ = reply.send(result);
        }
        WriteRequest::ImportSeed {
            digest,
            source,
            projects,
            reply,
        } => {
            let result = retry_once(|| repo.import_seed(&digest, &source, &projects));
            let _ = reply.send(result);
        }
    }
}

/// Every write is a single transaction that rolls back on failure, so a
/// timed-out attempt can be repeated safely.
fn retry_once<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    match op() {
        Err(CatalogError::StorageTimeout(reason)) => {
            warn!(%reason, "Catalog write timed out, retrying once");
            op()
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::store::Store;
    use crate::model::ImageInput;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Store, CatalogWriter) {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().join("portfolio.db"), Duration::from_millis(500));
        let repo = store.initialize().unwrap();
        let writer = CatalogWriter::spawn(repo, Duration::from_secs(5)).unwrap();
        (dir, store, writer)
    }

    #[test]
    fn test_insert_through_writer() {
        let (_dir, store, writer) = setup();
        let handle = writer.handle();

        let project = ProjectAggregate::new("/a.jpg", "Kitchen Remodel")
            .with_tag("Kitchen")
            .with_image(ImageInput::new("/b.jpg").with_alt("before"));
        let id = handle.insert_project(project.clone()).unwrap();
        assert_eq!(id, ProjectId(1));

        let reader = store.repository().unwrap();
        assert_eq!(reader.get_project(id).unwrap().unwrap().project, project);
    }

    #[test]
    fn test_concurrent_inserts_share_one_tag() {
        let (_dir, store, writer) = setup();
        let handle = Arc::new(writer.handle());

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let handle = Arc::clone(&handle);
                thread::spawn(move || {
                    handle
                        .insert_project(
                            ProjectAggregate::new("/k.jpg", format!("Kitchen {}", i))
                                .with_tag("Kitchen"),
                        )
                        .unwrap()
                })
            })
            .collect();
        let mut ids: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);

        let reader = store.repository().unwrap();
        let tags = reader.list_tags().unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].category, "Kitchen");
        assert_eq!(reader.get_all_projects().unwrap().len(), 8);
    }

    #[test]
    fn test_validation_fails_before_queueing() {
        let (_dir, _store, writer) = setup();
        let err = writer
            .handle()
            .insert_project(ProjectAggregate::new("", "No image"))
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[test]
    fn test_batch_through_writer() {
        let (_dir, _store, writer) = setup();
        let ids = writer
            .handle()
            .insert_projects(vec![
                ProjectAggregate::new("/a.jpg", "Porch"),
                ProjectAggregate::new("/b.jpg", "Shed"),
            ])
            .unwrap();
        assert_eq!(ids, vec![ProjectId(1), ProjectId(2)]);
    }

    #[test]
    fn test_drop_with_live_handle_returns() {
        let (_dir, store, writer) = setup();
        let handle = writer.handle();
        handle
            .insert_project(ProjectAggregate::new("/a.jpg", "Porch"))
            .unwrap();

        let (done_tx, done_rx) = bounded(1);
        thread::spawn(move || {
            drop(writer);
            let _ = done_tx.send(());
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(3)).is_ok());

        let err = handle
            .insert_project(ProjectAggregate::new("/b.jpg", "Shed"))
            .unwrap_err();
        assert!(matches!(err, CatalogError::StorageUnavailable(_)));
        assert_eq!(store.repository().unwrap().count_projects().unwrap(), 1);
    }

    #[test]
    fn test_stopped_writer_is_unavailable() {
        let (tx, rx) = bounded::<WriteRequest>(1);
        drop(rx);
        let handle = WriterHandle {
            tx,
            request_timeout: Duration::from_millis(50),
        };

        let err = handle
            .insert_project(ProjectAggregate::new("/a.jpg", "Porch"))
            .unwrap_err();
        assert!(matches!(err, CatalogError::StorageUnavailable(_)));
    }

    #[test]
    fn test_unanswered_request_times_out() {
        let (tx, _rx) = bounded::<WriteRequest>(1);
        let handle = WriterHandle {
            tx,
            request_timeout: Duration::from_millis(50),
        };

        let err = handle
            .insert_project(ProjectAggregate::new("/a.jpg", "Porch"))
            .unwrap_err();
        assert!(matches!(err, CatalogError::StorageTimeout(_)));
    }

    #[test]
    fn test_retry_once_repeats_only_timeouts() {
        let mut calls = 0;
        let result: Result<u32> = retry_once(|| {
            calls += 1;
            if calls == 1 {
                Err(CatalogError::StorageTimeout("busy".to_string()))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 2);

        let mut calls = 0;
        let result: Result<u32> = retry_once(|| {
            calls += 1;
            Err(CatalogError::validation("bad"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
