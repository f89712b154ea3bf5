use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use tracing::info;

use crate::batch::{BatchFetcher, unique_keys};
use crate::client::{AnnotationClient, Endpoints};
use crate::config::MappingConfig;
use crate::domain::{
    AssemblyInfo, GeneSource, GeneSymbol, OverlapGene, Relation, Variant, range_key,
    reported_gene_symbol,
};
use crate::error::KiraError;
use crate::snapshot::{AnnotationSnapshot, GeneTable};

/// Fetches every annotation a job needs and freezes it into an
/// [`AnnotationSnapshot`].
pub struct AnnotationCache<'a, C: AnnotationClient> {
    fetcher: BatchFetcher<'a, C>,
    endpoints: &'a Endpoints,
    config: &'a MappingConfig,
}

impl<'a, C: AnnotationClient> AnnotationCache<'a, C> {
    pub fn new(
        fetcher: BatchFetcher<'a, C>,
        endpoints: &'a Endpoints,
        config: &'a MappingConfig,
    ) -> Self {
        Self {
            fetcher,
            endpoints,
            config,
        }
    }

    pub fn build(
        &self,
        variant_ids: &[String],
        reported_genes: &[String],
    ) -> Result<AnnotationSnapshot, KiraError> {
        let symbols = reported_genes
            .iter()
            .filter_map(|gene| reported_gene_symbol(gene))
            .collect::<Vec<_>>();

        self.fetcher.install(|| {
            let (reported, variants) = rayon::join(
                || {
                    self.fetcher
                        .fetch_bulk::<GeneSymbol>(&self.endpoints.reported_genes, &symbols)
                },
                || self.fetch_variants(variant_ids),
            );
            let (reported, variants) = (reported?, variants?);

            let placed = variants
                .values()
                .filter(|variant| variant.error.is_none())
                .collect::<Vec<_>>();
            let points = point_keys(&placed);
            let chromosomes = chromosomes(&placed);
            let upstream = upstream_keys(
                &placed,
                self.config.genomic_distance,
                self.config.search_window_prefetch,
            );

            let ((bands, assembly), near) = rayon::join(
                || {
                    rayon::join(
                        || {
                            self.fetcher.fetch_each::<Vec<OverlapGene>>(
                                &self.endpoints.cytogenetic_bands,
                                &points,
                            )
                        },
                        || {
                            self.fetcher.fetch_each::<AssemblyInfo>(
                                &self.endpoints.assembly_info,
                                &chromosomes,
                            )
                        },
                    )
                },
                || {
                    self.gene_tables(&[
                        (Relation::Overlap, points.as_slice()),
                        (Relation::Upstream, upstream.as_slice()),
                    ])
                },
            );
            let (bands, assembly, near) = (bands?, assembly?, near?);

            let downstream = downstream_keys(
                &placed,
                &assembly,
                self.config.genomic_distance,
                self.config.search_window_prefetch,
            );
            let far = self.gene_tables(&[(Relation::Downstream, downstream.as_slice())])?;

            info!(
                variants = variants.len(),
                locations = points.len(),
                chromosomes = chromosomes.len(),
                "annotation snapshot built"
            );

            let mut builder = AnnotationSnapshot::builder()
                .reported_genes(reported)
                .variants(variants)
                .cytogenetic_bands(bands)
                .assembly_infos(assembly);
            for (source, relation, table) in near.into_iter().chain(far) {
                builder = builder.gene_table(source, relation, table);
            }
            Ok(builder.build())
        })
    }

    /// Bulk variant lookup followed by reconciliation of merged ids.
    pub fn fetch_variants(&self, ids: &[String]) -> Result<BTreeMap<String, Variant>, KiraError> {
        let ids = unique_keys(ids);
        let mut variants = self
            .fetcher
            .fetch_bulk::<Variant>(&self.endpoints.variants, &ids)?;

        let pending = ids
            .iter()
            .filter_map(|id| match variants.get(id) {
                None => Some((id.clone(), None)),
                Some(variant) if variant.error.is_none() && variant.is_renamed(id) => {
                    Some((id.clone(), variant.name.clone()))
                }
                Some(_) => None,
            })
            .collect::<Vec<_>>();

        let reconciled = self.fetcher.install(|| {
            pending
                .par_iter()
                .map(|(id, current)| {
                    self.refetch(id, current.as_deref())
                        .map(|found| found.map(|variant| (id.clone(), variant)))
                })
                .collect::<Result<Vec<_>, KiraError>>()
        })?;
        variants.extend(reconciled.into_iter().flatten());
        Ok(variants)
    }

    /// Re-fetches a variant the bulk lookup did not answer under its own id.
    /// The result is keyed by the queried id and names the current id.
    fn refetch(&self, id: &str, current: Option<&str>) -> Result<Option<Variant>, KiraError> {
        let endpoint = &self.endpoints.variants;
        let current = match current {
            Some(current) => current.to_string(),
            None => {
                let Some(found) = self.fetcher.fetch_one::<Variant>(endpoint, id)? else {
                    return Ok(None);
                };
                match found.name.clone() {
                    Some(name) if found.error.is_none() && name != id => name,
                    _ => return Ok(Some(found)),
                }
            }
        };

        info!(%id, %current, "variant id was merged, fetching the current record");
        let Some(mut record) = self.fetcher.fetch_one::<Variant>(endpoint, &current)? else {
            return Ok(None);
        };
        if record.error.is_none() {
            record.name = Some(current);
        }
        Ok(Some(record))
    }

    fn gene_tables(
        &self,
        requests: &[(Relation, &[String])],
    ) -> Result<Vec<(GeneSource, Relation, GeneTable)>, KiraError> {
        let work = requests
            .iter()
            .flat_map(|(relation, keys)| {
                GeneSource::ALL
                    .into_iter()
                    .map(move |source| (source, *relation, *keys))
            })
            .collect::<Vec<_>>();

        work.par_iter()
            .map(|(source, relation, keys)| {
                let table = self
                    .fetcher
                    .fetch_each::<Vec<OverlapGene>>(self.endpoints.genes(*source), keys)?;
                Ok((*source, *relation, table))
            })
            .collect()
    }
}

/// `chrom:pos-pos` for every placed mapping.
pub fn point_keys(variants: &[&Variant]) -> Vec<String> {
    let keys = variants
        .iter()
        .flat_map(|variant| variant.placed_mappings())
        .map(|(chromosome, position)| range_key(chromosome, position, position))
        .collect::<Vec<_>>();
    unique_keys(&keys)
}

pub fn chromosomes(variants: &[&Variant]) -> Vec<String> {
    variants
        .iter()
        .flat_map(|variant| variant.placed_mappings())
        .map(|(chromosome, _)| chromosome.to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Windows of `distance` bases ending at each position, clamped at 0.
/// `windows` consecutive windows are produced, walking away from the variant.
pub fn upstream_keys(variants: &[&Variant], distance: i64, windows: u32) -> Vec<String> {
    let mut keys = Vec::new();
    for (chromosome, position) in variants.iter().flat_map(|variant| variant.placed_mappings()) {
        let mut current = position;
        for _ in 0..windows {
            let start = (current - distance).max(0);
            keys.push(range_key(chromosome, start, current));
            if start == 0 {
                break;
            }
            current = start;
        }
    }
    unique_keys(&keys)
}

/// Windows of `distance` bases starting at each position, clamped at the
/// chromosome end. Chromosomes without assembly info get no windows.
pub fn downstream_keys(
    variants: &[&Variant],
    assembly: &BTreeMap<String, AssemblyInfo>,
    distance: i64,
    windows: u32,
) -> Vec<String> {
    let mut keys = Vec::new();
    for (chromosome, position) in variants.iter().flat_map(|variant| variant.placed_mappings()) {
        let Some(boundary) = assembly.get(chromosome).and_then(AssemblyInfo::boundary) else {
            continue;
        };
        let mut current = position;
        for _ in 0..windows {
            let end = (current + distance).min(boundary);
            keys.push(range_key(chromosome, current, end));
            if end == boundary {
                break;
            }
            current = end;
        }
    }
    unique_keys(&keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Mapping;

    fn variant(mappings: &[(&str, i64)]) -> Variant {
        Variant {
            name: Some("rs1".to_string()),
            mappings: mappings
                .iter()
                .map(|(chromosome, start)| Mapping {
                    chromosome: Some(chromosome.to_string()),
                    start: Some(*start),
                    strand: Some(1),
                })
                .collect(),
            ..Variant::default()
        }
    }

    #[test]
    fn upstream_windows_clamp_at_zero() {
        let near_start = variant(&[("1", 150_000)]);
        let keys = upstream_keys(&[&near_start], 100_000, 3);
        assert_eq!(keys, vec!["1:50000-150000", "1:0-50000"]);
    }

    #[test]
    fn downstream_windows_clamp_at_boundary() {
        let near_end = variant(&[("1", 900_000), ("2", 10)]);
        let mut assembly = BTreeMap::new();
        assembly.insert(
            "1".to_string(),
            AssemblyInfo {
                length: 1_050_000,
                error: None,
            },
        );
        let keys = downstream_keys(&[&near_end], &assembly, 100_000, 3);
        assert_eq!(keys, vec!["1:900000-1000000", "1:1000000-1050000"]);
    }

    #[test]
    fn point_keys_are_unique() {
        let a = variant(&[("7", 100), ("7", 100)]);
        let b = variant(&[("X", 5)]);
        assert_eq!(point_keys(&[&a, &b]), vec!["7:100-100", "X:5-5"]);
        assert_eq!(chromosomes(&[&a, &b]), vec!["7", "X"]);
    }
}
