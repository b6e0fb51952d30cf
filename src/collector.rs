use std::path::PathBuf;
use std::sync::Arc;

use futures::future::{join_all, FutureExt};
use futures_util::future::RemoteHandle;
use thiserror::Error;
use tokio::time::{Duration, Instant};

use crate::config::Config;
use crate::discovery::DiscoveryEngine;
use crate::metrics::Metrics;
use crate::model::Source;
use crate::publisher::{PublishReport, Publisher};
use crate::snapshot::{SnapshotWriter, WriteError};

#[derive(Error, Debug)]
pub enum CollectError<E: std::error::Error + 'static> {
    #[error("fetch failed: {0}")]
    Fetch(#[source] E),
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Outcome of one pass over all sources.
#[derive(Debug)]
pub struct CycleReport {
    pub failed_sources: usize,
    pub publish: PublishReport,
    pub duration: Duration,
}

pub struct Collector<D: DiscoveryEngine> {
    config: Arc<Config>,
    discovery: D,
    writer: SnapshotWriter,
    publisher: Publisher,
    metrics: Arc<Metrics>,
}

impl<D: DiscoveryEngine> Collector<D> {
    pub fn new(config: Arc<Config>, discovery: D, metrics: Arc<Metrics>) -> Self {
        Self {
            writer: SnapshotWriter::new(&config.staging_dir),
            publisher: Publisher::new(&config.staging_dir, &config.output_dir),
            config,
            discovery,
            metrics,
        }
    }

    /// Collects forever. The next cycle starts `interval` after the previous
    /// one finished.
    pub async fn run(self) {
        loop {
            let report = self.collect().await;
            tracing::info!(
                "collecting finished in {:.2}s: {} published, {} failed sources, {} publish errors",
                report.duration.as_secs_f64(),
                report.publish.published.len(),
                report.failed_sources,
                report.publish.errors.len()
            );
            tokio::time::sleep(self.config.interval).await;
        }
    }

    pub async fn collect(&self) -> CycleReport {
        let started = Instant::now();
        self.metrics.start_cycle();
        tracing::info!("collecting {} discovery sources", self.config.discovery.len());

        match self.writer.reset().await {
            Ok(0) => {}
            Ok(n) => tracing::warn!("dropped {} leftover staged snapshots", n),
            Err(e) => tracing::warn!("unable to clear staging: {}", e),
        }

        let outcomes = join_all(
            self.config
                .discovery
                .iter()
                .map(|source| self.collect_source(source)),
        )
        .await;
        let failed_sources = outcomes.into_iter().filter(|ok| !ok).count();

        let publish = self.publisher.publish(&self.config.source_files()).await;
        for e in &publish.errors {
            self.metrics.record_error();
            tracing::error!("publish error: {}", e);
        }
        if !publish.pruned.is_empty() {
            tracing::info!("pruned stale snapshots: {:?}", publish.pruned);
        }

        let duration = started.elapsed();
        self.metrics.record_duration(duration);

        CycleReport {
            failed_sources,
            publish,
            duration,
        }
    }

    /// Fetches, merges and stages one source, counting any failure. Returns
    /// whether the source was staged.
    async fn collect_source(&self, source: &Source) -> bool {
        match self.stage(source).await {
            Ok(path) => {
                tracing::debug!("staged {} as {}", source.url, path.display());
                true
            }
            Err(e) => {
                self.metrics.record_error();
                tracing::error!("collect error for {} ({}): {}", source.url, source.file, e);
                false
            }
        }
    }

    async fn stage(&self, source: &Source) -> Result<PathBuf, CollectError<D::Error>> {
        let records = self
            .discovery
            .fetch(source)
            .await
            .map_err(CollectError::Fetch)?;

        let records: Vec<_> = records
            .into_iter()
            .map(|record| record.with_default_labels(&source.default_labels))
            .collect();

        Ok(self.writer.write(&source.file, &records).await?)
    }
}

/// Owns the running collection loop; dropping it stops collection.
pub struct CollectorWorker {
    _remote_handle: RemoteHandle<()>,
}

impl CollectorWorker {
    pub fn spawn<D: DiscoveryEngine + 'static>(collector: Collector<D>) -> Self {
        // hang onto a remote handle for this future so we can cancel it when dropped
        let (remote, remote_handle) = collector.run().remote_handle();

        tokio::spawn(remote);

        Self {
            _remote_handle: remote_handle,
        }
    }
}
