use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use rayon::ThreadPool;
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::{AnnotationClient, Endpoint};
use crate::domain::{AssemblyInfo, GeneSymbol, OverlapGene, Variant};
use crate::error::KiraError;

/// Job-wide time limit, checked before every chunk and every single lookup.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn new(limit: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn check(&self) -> Result<(), KiraError> {
        let elapsed = self.started.elapsed();
        match self.limit {
            Some(limit) if elapsed >= limit => Err(KiraError::DeadlineExceeded {
                elapsed_ms: elapsed.as_millis(),
            }),
            _ => Ok(()),
        }
    }
}

/// A record type that can be stored in an annotation table.
pub trait AnnotationRecord: DeserializeOwned + Send {
    /// Record standing in for a key the source answered with an error.
    fn from_error(message: String) -> Self;

    fn decode(value: Value) -> Result<Self, serde_json::Error> {
        let error = value
            .as_object()
            .and_then(|object| object.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string);
        match error {
            Some(message) => Ok(Self::from_error(message)),
            None => serde_json::from_value(value),
        }
    }
}

impl AnnotationRecord for Variant {
    fn from_error(message: String) -> Self {
        Variant::failed_lookup(message)
    }
}

impl AnnotationRecord for GeneSymbol {
    fn from_error(message: String) -> Self {
        GeneSymbol::failed_lookup(message)
    }
}

impl AnnotationRecord for AssemblyInfo {
    fn from_error(message: String) -> Self {
        AssemblyInfo::failed_lookup(message)
    }
}

impl AnnotationRecord for Vec<OverlapGene> {
    fn from_error(message: String) -> Self {
        vec![OverlapGene::failed_lookup(message)]
    }
}

/// Splits key lists into fixed-size chunks and runs them on a bounded pool.
pub struct BatchFetcher<'a, C: AnnotationClient> {
    client: &'a C,
    pool: &'a ThreadPool,
    batch_size: usize,
    deadline: Deadline,
}

impl<'a, C: AnnotationClient> BatchFetcher<'a, C> {
    pub fn new(client: &'a C, pool: &'a ThreadPool, batch_size: usize, deadline: Deadline) -> Self {
        Self {
            client,
            pool,
            batch_size: batch_size.max(1),
            deadline,
        }
    }

    /// Runs `op` on the fetcher's pool so nested parallel work shares its
    /// thread budget.
    pub fn install<R, OP>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    /// One POST per chunk. A chunk whose request fails contributes nothing.
    pub fn fetch_bulk<T: AnnotationRecord>(
        &self,
        endpoint: &Endpoint,
        keys: &[String],
    ) -> Result<BTreeMap<String, T>, KiraError> {
        let keys = unique_keys(keys);
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }
        info!(
            url = %endpoint.url,
            keys = keys.len(),
            "fetching in batches of {}",
            self.batch_size
        );

        let parts = self.pool.install(|| {
            keys.par_chunks(self.batch_size)
                .map(|chunk| {
                    self.deadline.check()?;
                    Ok(self.bulk_chunk::<T>(endpoint, chunk))
                })
                .collect::<Result<Vec<_>, KiraError>>()
        })?;

        let table = merge(parts);
        info!(url = %endpoint.url, records = table.len(), "finished batch fetch");
        Ok(table)
    }

    /// One GET per key, chunked the same way as [`Self::fetch_bulk`].
    pub fn fetch_each<T: AnnotationRecord>(
        &self,
        endpoint: &Endpoint,
        keys: &[String],
    ) -> Result<BTreeMap<String, T>, KiraError> {
        let keys = unique_keys(keys);
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }
        info!(url = %endpoint.url, keys = keys.len(), "fetching single lookups");

        let parts = self.pool.install(|| {
            keys.par_chunks(self.batch_size)
                .map(|chunk| {
                    self.deadline.check()?;
                    chunk
                        .par_iter()
                        .map(|key| {
                            let record = self.fetch_one::<T>(endpoint, key)?;
                            Ok(record.map(|record| (key.clone(), record)))
                        })
                        .collect::<Result<Vec<_>, KiraError>>()
                        .map(|entries| entries.into_iter().flatten().collect::<BTreeMap<_, _>>())
                })
                .collect::<Result<Vec<_>, KiraError>>()
        })?;

        let table = merge(parts);
        info!(url = %endpoint.url, records = table.len(), "finished single lookups");
        Ok(table)
    }

    /// Single lookup outside of any chunk. `None` when the answer could not
    /// be decoded.
    pub fn fetch_one<T: AnnotationRecord>(
        &self,
        endpoint: &Endpoint,
        key: &str,
    ) -> Result<Option<T>, KiraError> {
        self.deadline.check()?;
        let value = self.client.fetch_one(endpoint, key);
        match T::decode(value) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!(url = %endpoint.url, key, "dropping undecodable record: {err}");
                Ok(None)
            }
        }
    }

    fn bulk_chunk<T: AnnotationRecord>(
        &self,
        endpoint: &Endpoint,
        chunk: &[String],
    ) -> BTreeMap<String, T> {
        let response = match self.client.fetch_batch(endpoint, chunk) {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    url = %endpoint.url,
                    keys = chunk.len(),
                    "batch request failed, continuing without it: {err}"
                );
                return BTreeMap::new();
            }
        };

        let requested = chunk.iter().map(String::as_str).collect::<HashSet<_>>();
        let mut table = BTreeMap::new();
        for (key, value) in response {
            if !requested.contains(key.as_str()) {
                debug!(url = %endpoint.url, %key, "ignoring record for a key outside the batch");
                continue;
            }
            match T::decode(value) {
                Ok(record) => {
                    table.insert(key, record);
                }
                Err(err) => {
                    warn!(url = %endpoint.url, %key, "dropping undecodable record: {err}");
                }
            }
        }
        table
    }
}

/// Trimmed, de-duplicated keys in first-seen order, so no key lands in two
/// chunks.
pub fn unique_keys(keys: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    keys.iter()
        .map(|key| key.trim())
        .filter(|key| !key.is_empty() && seen.insert(*key))
        .map(str::to_string)
        .collect()
}

fn merge<T>(parts: Vec<BTreeMap<String, T>>) -> BTreeMap<String, T> {
    let mut table = BTreeMap::new();
    for part in parts {
        table.extend(part);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_keys_drop_duplicates_and_blanks() {
        let keys = vec![
            "rs1".to_string(),
            " rs2 ".to_string(),
            "rs1".to_string(),
            "  ".to_string(),
            "rs2".to_string(),
        ];
        assert_eq!(unique_keys(&keys), vec!["rs1", "rs2"]);
    }

    #[test]
    fn error_object_decodes_to_failed_gene_list() {
        let genes = Vec::<OverlapGene>::decode(serde_json::json!({"error": "timeout"})).unwrap();
        assert_eq!(genes, vec![OverlapGene::failed_lookup("timeout")]);

        let genes = Vec::<OverlapGene>::decode(serde_json::json!([])).unwrap();
        assert!(genes.is_empty());
    }

    #[test]
    fn expired_deadline() {
        let deadline = Deadline::new(Some(Duration::ZERO));
        assert!(deadline.check().is_err());
        assert!(Deadline::unbounded().check().is_ok());
    }
}
