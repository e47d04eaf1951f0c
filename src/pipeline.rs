use crate::config::EnrichmentConfig;
use crate::dataset::Dataset;
use crate::ebay::ImageLookup;
use crate::identifier::{self, ItemId};
use crate::storage::CsvStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_with::skip_serializing_none;
use std::{sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveMark {
    pub item_id: String,
    pub at: DateTime<Utc>,
}

/// Progress of the current or most recent run.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStatus {
    pub state: ProcessingState,
    pub run_id: Option<Uuid>,
    pub progress: u8,
    pub processed: usize,
    pub attempted: usize,
    pub total: usize,
    pub last_error: Option<String>,
    pub last_saved: Option<SaveMark>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    NothingToDo,
    Paused,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Enriched,
    NoImages,
    Skipped,
    Failed,
}

impl RowOutcome {
    fn label(self) -> &'static str {
        match self {
            RowOutcome::Enriched => "enriched",
            RowOutcome::NoImages => "no_images",
            RowOutcome::Skipped => "skipped",
            RowOutcome::Failed => "failed",
        }
    }
}

/// Row-by-row image enrichment: one lookup in flight, a snapshot saved after
/// every enriched row, cooperative pause between rows.
pub struct Pipeline<L> {
    lookup: Arc<L>,
    store: CsvStore,
    delimiter: u8,
    row_delay: Duration,
}

impl<L> Clone for Pipeline<L> {
    fn clone(&self) -> Self {
        Self {
            lookup: self.lookup.clone(),
            store: self.store.clone(),
            delimiter: self.delimiter,
            row_delay: self.row_delay,
        }
    }
}

impl<L: ImageLookup> Pipeline<L> {
    pub fn new(lookup: Arc<L>, store: CsvStore, config: &EnrichmentConfig) -> Self {
        Self {
            lookup,
            store,
            delimiter: config.delimiter,
            row_delay: config.row_delay,
        }
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub async fn run(
        &self,
        dataset: &Mutex<Dataset>,
        status: &Mutex<RunStatus>,
        pause: &CancellationToken,
    ) -> RunOutcome {
        let work = {
            let data = dataset.lock().await;
            work_set(&data)
        };
        let total = work.len();
        let run_id = Uuid::new_v4();

        {
            let mut s = status.lock().await;
            *s = RunStatus {
                run_id: Some(run_id),
                total,
                last_saved: s.last_saved.take(),
                ..RunStatus::default()
            };
            if total == 0 {
                s.state = ProcessingState::Idle;
                s.message = Some("every row already has images or lacks a valid item id".into());
                info!(target = "enricher.pipeline", %run_id, "nothing to enrich");
                return RunOutcome::NothingToDo;
            }
            s.state = ProcessingState::Running;
        }
        info!(target = "enricher.pipeline", %run_id, rows = total, "enrichment started");

        for (position, raw_id) in work.iter().enumerate() {
            if pause.is_cancelled() {
                status.lock().await.state = ProcessingState::Paused;
                info!(
                    target = "enricher.pipeline",
                    %run_id,
                    attempted = position,
                    "enrichment paused"
                );
                return RunOutcome::Paused;
            }

            let outcome = self.process_row(raw_id, dataset, status).await;
            crate::metrics::row_outcome(outcome.label());
            {
                let mut s = status.lock().await;
                s.attempted = position + 1;
                s.progress = percent(position + 1, total);
                if outcome == RowOutcome::Enriched {
                    s.processed += 1;
                }
            }

            if position + 1 < total {
                tokio::select! {
                    _ = pause.cancelled() => {}
                    _ = sleep(self.row_delay) => {}
                }
            }
        }

        let processed = {
            let mut s = status.lock().await;
            s.state = ProcessingState::Completed;
            s.processed
        };
        info!(
            target = "enricher.pipeline",
            %run_id,
            processed,
            rows = total,
            "enrichment completed"
        );
        RunOutcome::Completed
    }

    async fn process_row(
        &self,
        raw_id: &str,
        dataset: &Mutex<Dataset>,
        status: &Mutex<RunStatus>,
    ) -> RowOutcome {
        let item_id = match ItemId::parse(raw_id) {
            Ok(id) => id,
            Err(err) => {
                debug!(target = "enricher.pipeline", "skipping row: {err}");
                return RowOutcome::Skipped;
            }
        };

        let images = match self.lookup.lookup(&item_id).await {
            Ok(images) => images,
            Err(err) => {
                warn!(
                    target = "enricher.pipeline",
                    item_id = %item_id,
                    kind = err.kind(),
                    "lookup failed: {err}"
                );
                status.lock().await.last_error = Some(format!("item {item_id}: {err}"));
                return RowOutcome::Failed;
            }
        };
        if images.is_empty() {
            info!(target = "enricher.pipeline", item_id = %item_id, "no images found");
            return RowOutcome::NoImages;
        }

        let snapshot = {
            let mut data = dataset.lock().await;
            let Some(record) = data.records_mut().iter_mut().find(|record| {
                !record.has_images() && identifier::extract(record).as_deref() == Some(raw_id)
            }) else {
                warn!(target = "enricher.pipeline", item_id = %item_id, "row no longer pending");
                return RowOutcome::Skipped;
            };
            record.set_images(&images);
            data.serialize(self.delimiter)
        };
        debug!(
            target = "enricher.pipeline",
            item_id = %item_id,
            count = images.len(),
            "row enriched"
        );

        let saved = match snapshot {
            Ok(csv) => self.store.save(&csv).await.map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };
        let mut s = status.lock().await;
        match saved {
            Ok(()) => {
                s.last_saved = Some(SaveMark {
                    item_id: item_id.to_string(),
                    at: Utc::now(),
                });
            }
            Err(err) => {
                error!(target = "enricher.pipeline", item_id = %item_id, "snapshot not saved: {err}");
                s.last_error = Some(format!("item {item_id}: {err}"));
            }
        }
        RowOutcome::Enriched
    }
}

/// Raw identifiers of rows that have an id and no pictures, in dataset order.
fn work_set(dataset: &Dataset) -> Vec<String> {
    dataset
        .records()
        .iter()
        .filter(|record| !record.has_images())
        .filter_map(identifier::extract)
        .collect()
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    (done * 100 / total).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::ebay::LookupError;
    use std::collections::HashMap;

    const HEADER: &str = "Item number;Title;Item url;Picture1;Picture2;Picture3";

    #[derive(Default)]
    struct FakeLookup {
        responses: HashMap<String, Result<Vec<String>, LookupError>>,
        calls: std::sync::Mutex<Vec<String>>,
        pause_on_first_call: std::sync::Mutex<Option<CancellationToken>>,
    }

    impl FakeLookup {
        fn with(mut self, id: &str, result: Result<Vec<String>, LookupError>) -> Self {
            self.responses.insert(id.to_string(), result);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ImageLookup for FakeLookup {
        async fn lookup(&self, item_id: &ItemId) -> Result<Vec<String>, LookupError> {
            self.calls.lock().unwrap().push(item_id.to_string());
            if let Some(token) = self.pause_on_first_call.lock().unwrap().take() {
                token.cancel();
            }
            self.responses
                .get(item_id.as_str())
                .cloned()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn images(prefix: &str) -> Result<Vec<String>, LookupError> {
        Ok((1..=4).map(|n| format!("https://i/{prefix}-{n}.jpg")).collect())
    }

    fn dataset(rows: &[&str]) -> Mutex<Dataset> {
        let text = std::iter::once(HEADER)
            .chain(rows.iter().copied())
            .collect::<Vec<_>>()
            .join("\n");
        Mutex::new(Dataset::parse(&text, b';').unwrap())
    }

    fn pipeline(lookup: FakeLookup, dir: &std::path::Path) -> (Pipeline<FakeLookup>, Arc<FakeLookup>) {
        let lookup = Arc::new(lookup);
        let store = CsvStore::new(&StorageConfig {
            primary_path: dir.join("listings.csv"),
            backup_path: dir.join("listings-backup.csv"),
        });
        let config = EnrichmentConfig {
            delimiter: b';',
            row_delay: Duration::ZERO,
        };
        (Pipeline::new(lookup.clone(), store, &config), lookup)
    }

    fn three_rows() -> Mutex<Dataset> {
        dataset(&[
            "111111111111;one;;;;",
            "222222222222;two;;;;",
            ";three;https://www.ebay.fr/itm/333333333333;;;",
        ])
    }

    #[tokio::test]
    async fn failed_row_does_not_abort_run() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeLookup::default()
            .with("111111111111", images("a"))
            .with(
                "222222222222",
                Err(LookupError::Upstream {
                    status: 500,
                    message: "boom".into(),
                }),
            )
            .with("333333333333", images("c"));
        let (pipeline, lookup) = pipeline(fake, dir.path());
        let data = three_rows();
        let status = Mutex::new(RunStatus::default());

        let outcome = pipeline
            .run(&data, &status, &CancellationToken::new())
            .await;

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(lookup.calls().len(), 3);
        let s = status.lock().await;
        assert_eq!(s.state, ProcessingState::Completed);
        assert_eq!(s.processed, 2);
        assert_eq!(s.progress, 100);
        assert!(s.last_error.as_deref().unwrap().contains("222222222222"));

        let data = data.lock().await;
        let rows = data.records();
        assert_eq!(rows[0].get("Picture1"), Some("https://i/a-1.jpg"));
        assert_eq!(rows[0].get("Picture3"), Some("https://i/a-3.jpg"));
        assert!(!rows[1].has_images());
        assert_eq!(rows[2].get("Picture2"), Some("https://i/c-2.jpg"));

        let saved = std::fs::read_to_string(dir.path().join("listings.csv")).unwrap();
        assert_eq!(saved, data.serialize(b';').unwrap());
        let backup = std::fs::read_to_string(dir.path().join("listings-backup.csv")).unwrap();
        assert!(backup.contains("https://i/a-1.jpg"));
        assert!(!backup.contains("https://i/c-1.jpg"));
    }

    #[tokio::test]
    async fn failed_save_is_recorded_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        // a directory where the primary file belongs makes every save fail
        std::fs::create_dir_all(dir.path().join("listings.csv").join("occupied")).unwrap();
        let fake = FakeLookup::default()
            .with("111111111111", images("a"))
            .with("222222222222", images("b"));
        let (pipeline, lookup) = pipeline(fake, dir.path());
        let data = dataset(&["111111111111;one;;;;", "222222222222;two;;;;"]);
        let status = Mutex::new(RunStatus::default());

        let outcome = pipeline.run(&data, &status, &CancellationToken::new()).await;

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(lookup.calls().len(), 2);
        let s = status.lock().await;
        assert_eq!(s.state, ProcessingState::Completed);
        assert_eq!(s.processed, 2);
        assert!(s.last_saved.is_none());
        assert!(s.last_error.as_deref().unwrap().starts_with("item 222222222222:"));
        assert!(data.lock().await.records().iter().all(|r| r.has_images()));
    }

    #[tokio::test]
    async fn pause_then_resume_processes_remaining_rows() {
        let dir = tempfile::tempdir().unwrap();
        let pause = CancellationToken::new();
        let fake = FakeLookup::default()
            .with("111111111111", images("a"))
            .with("222222222222", images("b"))
            .with("333333333333", images("c"));
        *fake.pause_on_first_call.lock().unwrap() = Some(pause.clone());
        let (pipeline, lookup) = pipeline(fake, dir.path());
        let data = three_rows();
        let status = Mutex::new(RunStatus::default());

        assert_eq!(pipeline.run(&data, &status, &pause).await, RunOutcome::Paused);
        {
            let s = status.lock().await;
            assert_eq!(s.state, ProcessingState::Paused);
            assert_eq!(s.progress, 33);
            assert_eq!(s.processed, 1);
        }
        assert_eq!(lookup.calls(), vec!["111111111111"]);

        let resumed = pipeline.run(&data, &status, &CancellationToken::new()).await;
        assert_eq!(resumed, RunOutcome::Completed);
        assert_eq!(
            lookup.calls(),
            vec!["111111111111", "222222222222", "333333333333"]
        );
        let s = status.lock().await;
        assert_eq!(s.total, 2);
        assert_eq!(s.processed, 2);
        assert!(data.lock().await.records().iter().all(|r| r.has_images()));
    }

    #[tokio::test]
    async fn rows_with_images_are_never_looked_up() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, lookup) = pipeline(FakeLookup::default(), dir.path());
        let data = dataset(&[
            "111111111111;one;;https://i/x.jpg;;",
            "abc;bad id;;;https://i/y.jpg;",
            ";no id;;;;",
        ]);
        let status = Mutex::new(RunStatus::default());

        let outcome = pipeline.run(&data, &status, &CancellationToken::new()).await;

        assert_eq!(outcome, RunOutcome::NothingToDo);
        assert!(lookup.calls().is_empty());
        assert_eq!(status.lock().await.state, ProcessingState::Idle);
        assert!(!dir.path().join("listings.csv").exists());
    }

    #[tokio::test]
    async fn invalid_identifier_is_skipped_not_erased() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeLookup::default().with("354624000000", images("sci"));
        let (pipeline, lookup) = pipeline(fake, dir.path());
        let data = dataset(&["12345;short;;;;", "\"3,54624E+11\";sci;;;;"]);
        let status = Mutex::new(RunStatus::default());

        pipeline.run(&data, &status, &CancellationToken::new()).await;

        assert_eq!(lookup.calls(), vec!["354624000000"]);
        let data = data.lock().await;
        assert_eq!(data.records()[0].get("Item number"), Some("12345"));
        assert!(!data.records()[0].has_images());
        assert_eq!(data.records()[1].get("Picture1"), Some("https://i/sci-1.jpg"));
        assert_eq!(status.lock().await.attempted, 2);
    }

    #[tokio::test]
    async fn duplicate_ids_fill_each_row() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeLookup::default().with("111111111111", images("a"));
        let (pipeline, _) = pipeline(fake, dir.path());
        let data = dataset(&["111111111111;first;;;;", "111111111111;second;;;;"]);
        let status = Mutex::new(RunStatus::default());

        pipeline.run(&data, &status, &CancellationToken::new()).await;

        let data = data.lock().await;
        assert!(data.records().iter().all(|r| r.has_images()));
        assert_eq!(status.lock().await.processed, 2);
    }

    #[test]
    fn percent_floors() {
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 66);
        assert_eq!(percent(3, 3), 100);
    }
}
