use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::batch::{BatchFetcher, Deadline, unique_keys};
use crate::cache::AnnotationCache;
use crate::client::{AnnotationClient, Endpoints};
use crate::config::MappingConfig;
use crate::domain::VariantId;
use crate::error::KiraError;
use crate::pipeline::{MappingPipeline, MappingResult};
use crate::snapshot::AnnotationSnapshot;
use crate::store::SnapshotStore;

/// A batch of variants to map, as supplied by whoever triggers the job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub variant_ids: Vec<String>,
    #[serde(default)]
    pub reported_genes: Vec<String>,
}

impl Job {
    pub fn load(path: &Path) -> Result<Self, KiraError> {
        let content = fs::read_to_string(path)
            .map_err(|err| KiraError::InvalidJob(format!("{}: {err}", path.display())))?;
        let job: Job = serde_json::from_str(&content)
            .map_err(|err| KiraError::InvalidJob(format!("{}: {err}", path.display())))?;
        job.validate()?;
        Ok(job)
    }

    /// Checks every identifier and returns them de-duplicated, in job order.
    pub fn validate(&self) -> Result<Vec<VariantId>, KiraError> {
        let ids = unique_keys(&self.variant_ids)
            .iter()
            .map(|id| id.parse::<VariantId>())
            .collect::<Result<Vec<_>, _>>()?;
        if ids.is_empty() {
            return Err(KiraError::InvalidJob("job has no variant ids".to_string()));
        }
        Ok(ids)
    }
}

/// What a finished job hands to the persistence side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub results: Vec<MappingResult>,
    pub request_count: usize,
    pub built_at: String,
}

pub struct App<C: AnnotationClient> {
    client: C,
    config: MappingConfig,
    endpoints: Endpoints,
    pool: ThreadPool,
    store: Option<SnapshotStore>,
}

impl<C: AnnotationClient> App<C> {
    pub fn new(client: C, config: MappingConfig) -> Result<Self, KiraError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.concurrency)
            .thread_name(|index| format!("kira-vm-{index}"))
            .build()
            .map_err(|err| KiraError::InvalidConfig(err.to_string()))?;
        let endpoints = Endpoints::from_config(&config);
        Ok(Self {
            client,
            config,
            endpoints,
            pool,
            store: None,
        })
    }

    /// Persists every built snapshot under the store, keyed by job id.
    pub fn with_store(mut self, store: SnapshotStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Fetches everything the job needs. Fails only when the job deadline
    /// passes before the snapshot is complete.
    pub fn build_snapshot(
        &self,
        variant_ids: &[String],
        reported_genes: &[String],
    ) -> Result<Arc<AnnotationSnapshot>, KiraError> {
        let deadline = Deadline::new(self.config.job_timeout);
        let fetcher = BatchFetcher::new(&self.client, &self.pool, self.config.batch_size, deadline);
        let cache = AnnotationCache::new(fetcher, &self.endpoints, &self.config);
        cache.build(variant_ids, reported_genes).map(Arc::new)
    }

    pub fn process_job(
        &self,
        variant_ids: &[String],
        reported_genes: &[String],
    ) -> Result<Vec<MappingResult>, KiraError> {
        let snapshot = self.build_snapshot(variant_ids, reported_genes)?;
        Ok(self.process_job_with_snapshot(&snapshot, variant_ids, reported_genes))
    }

    /// Maps every variant against an already built snapshot. One result per
    /// distinct id, in job order.
    pub fn process_job_with_snapshot(
        &self,
        snapshot: &AnnotationSnapshot,
        variant_ids: &[String],
        reported_genes: &[String],
    ) -> Vec<MappingResult> {
        let ids = unique_keys(variant_ids);
        let pipeline = MappingPipeline::new(snapshot, &self.config);
        self.pool.install(|| {
            ids.par_iter()
                .map(|id| pipeline.run(id, reported_genes))
                .collect()
        })
    }

    /// Builds, optionally persists and maps a whole job.
    pub fn run_job(&self, job_id: &str, job: &Job) -> Result<JobReport, KiraError> {
        let ids = job.validate()?;
        info!(%job_id, variants = ids.len(), "mapping job started");

        let snapshot = self.build_snapshot(&job.variant_ids, &job.reported_genes)?;
        if let Some(store) = &self.store {
            let path = store.save(job_id, &snapshot)?;
            info!(%job_id, path = %path, "snapshot saved");
        }
        let results =
            self.process_job_with_snapshot(&snapshot, &job.variant_ids, &job.reported_genes);
        Ok(self.report(job_id, results))
    }

    /// Re-maps a job from its persisted snapshot without touching the network.
    pub fn rerun_job(&self, job_id: &str, job: &Job) -> Result<JobReport, KiraError> {
        job.validate()?;
        let store = self.store.as_ref().ok_or_else(|| {
            KiraError::InvalidConfig("no snapshot store configured".to_string())
        })?;
        let snapshot = store.load(job_id)?;
        info!(%job_id, "re-mapping job from saved snapshot");
        let results =
            self.process_job_with_snapshot(&snapshot, &job.variant_ids, &job.reported_genes);
        Ok(self.report(job_id, results))
    }

    fn report(&self, job_id: &str, results: Vec<MappingResult>) -> JobReport {
        let request_count = self.client.request_count();
        info!(%job_id, results = results.len(), requests = request_count, "mapping job finished");
        JobReport {
            job_id: job_id.to_string(),
            results,
            request_count,
            built_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn job_validation() {
        let job = Job {
            variant_ids: vec!["rs1".to_string(), " rs1".to_string(), "rs2".to_string()],
            reported_genes: Vec::new(),
        };
        let ids = job.validate().unwrap();
        assert_eq!(
            ids.iter().map(VariantId::as_str).collect::<Vec<_>>(),
            vec!["rs1", "rs2"]
        );

        let empty = Job::default();
        assert_matches!(empty.validate(), Err(KiraError::InvalidJob(_)));

        let bad = Job {
            variant_ids: vec!["rs 1/2".to_string()],
            reported_genes: Vec::new(),
        };
        assert_matches!(bad.validate(), Err(KiraError::InvalidVariantId(_)));
    }

    #[test]
    fn job_reported_genes_default_to_empty() {
        let job: Job = serde_json::from_str(r#"{"variant_ids": ["rs7"]}"#).unwrap();
        assert!(job.reported_genes.is_empty());
    }
}
