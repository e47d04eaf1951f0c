use crate::dataset::{Dataset, DatasetError, DatasetSummary};
use crate::ebay::ImageLookup;
use crate::pipeline::{Pipeline, ProcessingState, RunStatus};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no csv has been loaded")]
    NoDataset,
    #[error("an enrichment run is already in progress")]
    AlreadyRunning,
    #[error("no enrichment run is in progress")]
    NotRunning,
    #[error("enrichment is not paused")]
    NotPaused,
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    #[serde(flatten)]
    pub run: RunStatus,
    pub dataset: DatasetSummary,
}

struct ActiveRun {
    pause: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the loaded listings and the state of the enrichment run over them.
pub struct EnrichmentSession<L> {
    pipeline: Pipeline<L>,
    dataset: Arc<Mutex<Dataset>>,
    status: Arc<Mutex<RunStatus>>,
    active: Arc<Mutex<Option<ActiveRun>>>,
    loaded: Arc<Mutex<bool>>,
}

impl<L> Clone for EnrichmentSession<L> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            dataset: self.dataset.clone(),
            status: self.status.clone(),
            active: self.active.clone(),
            loaded: self.loaded.clone(),
        }
    }
}

impl<L: ImageLookup> EnrichmentSession<L> {
    pub fn new(pipeline: Pipeline<L>) -> Self {
        Self {
            pipeline,
            dataset: Arc::new(Mutex::new(Dataset::default())),
            status: Arc::new(Mutex::new(RunStatus::default())),
            active: Arc::new(Mutex::new(None)),
            loaded: Arc::new(Mutex::new(false)),
        }
    }

    pub async fn load(&self, text: &str) -> Result<DatasetSummary, SessionError> {
        let active = self.active.lock().await;
        if is_running(&active) {
            return Err(SessionError::AlreadyRunning);
        }
        let parsed = Dataset::parse(text, self.pipeline.delimiter())?;
        if parsed.is_empty() {
            warn!(target = "enricher.session", "loaded csv has no data rows");
        }
        let columns = parsed.headers().len();
        let summary = parsed.summary();
        *self.dataset.lock().await = parsed;
        *self.status.lock().await = RunStatus::default();
        *self.loaded.lock().await = true;
        info!(
            target = "enricher.session",
            total = summary.total,
            pending = summary.pending,
            columns,
            "csv loaded"
        );
        Ok(summary)
    }

    pub async fn start(&self) -> Result<SessionStatus, SessionError> {
        if !*self.loaded.lock().await {
            return Err(SessionError::NoDataset);
        }
        let mut active = self.active.lock().await;
        if is_running(&active) {
            return Err(SessionError::AlreadyRunning);
        }

        self.status.lock().await.state = ProcessingState::Running;
        let pause = CancellationToken::new();
        let pipeline = self.pipeline.clone();
        let dataset = self.dataset.clone();
        let status = self.status.clone();
        let token = pause.clone();
        let handle = tokio::spawn(async move {
            pipeline.run(&dataset, &status, &token).await;
        });
        *active = Some(ActiveRun { pause, handle });
        drop(active);

        Ok(self.status().await)
    }

    pub async fn pause(&self) -> Result<SessionStatus, SessionError> {
        {
            let active = self.active.lock().await;
            match active.as_ref() {
                Some(run) if !run.handle.is_finished() => run.pause.cancel(),
                _ => return Err(SessionError::NotRunning),
            }
        }
        info!(target = "enricher.session", "pause requested");
        Ok(self.status().await)
    }

    pub async fn resume(&self) -> Result<SessionStatus, SessionError> {
        {
            let active = self.active.lock().await;
            if is_running(&active) {
                return Err(SessionError::AlreadyRunning);
            }
        }
        if self.status.lock().await.state != ProcessingState::Paused {
            return Err(SessionError::NotPaused);
        }
        self.start().await
    }

    pub async fn status(&self) -> SessionStatus {
        let run = self.status.lock().await.clone();
        let dataset = self.dataset.lock().await.summary();
        SessionStatus { run, dataset }
    }

    pub async fn export(&self) -> Result<String, SessionError> {
        if !*self.loaded.lock().await {
            return Err(SessionError::NoDataset);
        }
        let data = self.dataset.lock().await;
        Ok(data.serialize(self.pipeline.delimiter())?)
    }

    /// Waits for the active run, if any, to finish.
    #[cfg(test)]
    pub async fn join(&self) {
        let run = self.active.lock().await.take();
        if let Some(run) = run {
            let _ = run.handle.await;
        }
    }
}

fn is_running(active: &Option<ActiveRun>) -> bool {
    active.as_ref().is_some_and(|run| !run.handle.is_finished())
}
