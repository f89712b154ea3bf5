//! Genomic context of a variant location: genes overlapping it, and the
//! nearest genes upstream and downstream of it.
//!
//! Upstream and downstream genes are searched in windows of
//! `genomic_distance` bases. The first window starts at the variant; when it
//! holds no usable gene the search slides one window further away until a
//! gene is found or the window reaches the search boundary.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::MappingConfig;
use crate::domain::{GeneSource, Location, OverlapGene, Relation, range_key};
use crate::snapshot::AnnotationSnapshot;

/// Upstream searches stop at the start of the chromosome.
pub const UPSTREAM_BOUNDARY: i64 = 0;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gene {
    pub name: Option<String>,
    pub entrez_id: Option<String>,
    pub ensembl_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenomicContext {
    pub is_intergenic: bool,
    pub is_upstream: bool,
    pub is_downstream: bool,
    pub distance: i64,
    pub gene: Gene,
    pub location: Location,
    pub source: String,
    pub mapping_method: String,
    pub is_closest_gene: bool,
}

/// Contexts computed for one window, plus the names of the genes they
/// refer to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextBatch {
    pub gene_names: Vec<String>,
    pub genomic_contexts: Vec<GenomicContext>,
    pub closest_found: bool,
}

/// Successive search windows walking from `current` towards `boundary`.
///
/// Upstream windows end at the current edge and start `distance` bases
/// before it; a start below zero is replaced by `boundary`. Downstream
/// windows start at the current edge and end at most at `boundary`. The walk
/// stops after the window whose far edge equals `boundary`.
#[derive(Debug, Clone)]
pub struct SearchWindows {
    current: i64,
    boundary: i64,
    distance: i64,
    relation: Relation,
    done: bool,
}

impl SearchWindows {
    pub fn new(start: i64, boundary: i64, distance: i64, relation: Relation) -> Self {
        Self {
            current: start,
            boundary,
            distance,
            relation,
            done: distance <= 0 || relation == Relation::Overlap,
        }
    }
}

impl Iterator for SearchWindows {
    type Item = (i64, i64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let (window, far_edge) = match self.relation {
            Relation::Upstream => {
                let start = self.current - self.distance;
                let start = if start < 0 { self.boundary } else { start };
                ((start, self.current), start)
            }
            Relation::Downstream => {
                let end = (self.current + self.distance).min(self.boundary);
                ((self.current, end), end)
            }
            Relation::Overlap => return None,
        };
        if far_edge == self.boundary {
            self.done = true;
        }
        self.current = far_edge;
        Some(window)
    }
}

pub struct GeneContextResolver<'a> {
    snapshot: &'a AnnotationSnapshot,
    config: &'a MappingConfig,
}

impl<'a> GeneContextResolver<'a> {
    pub fn new(snapshot: &'a AnnotationSnapshot, config: &'a MappingConfig) -> Self {
        Self { snapshot, config }
    }

    /// Genes overlapping the variant position. `seen` holds the names
    /// already recorded as overlapping for this source.
    pub fn overlap_contexts(
        &self,
        location: &Location,
        source: GeneSource,
        seen: &BTreeSet<String>,
    ) -> ContextBatch {
        match self.snapshot.genes(source, &location.point_key()) {
            Some(genes) => self.window_contexts(genes, location, source, Relation::Overlap, seen),
            None => ContextBatch::default(),
        }
    }

    pub fn upstream_contexts(
        &self,
        location: &Location,
        source: GeneSource,
        seen: &BTreeSet<String>,
    ) -> Vec<GenomicContext> {
        let position = location.position;
        let start = (position - self.config.genomic_distance).max(UPSTREAM_BOUNDARY);
        self.flanking_contexts(
            location,
            source,
            seen,
            Relation::Upstream,
            (start, position),
            UPSTREAM_BOUNDARY,
        )
    }

    /// Nothing is reported downstream on chromosomes whose length is unknown.
    pub fn downstream_contexts(
        &self,
        location: &Location,
        source: GeneSource,
        seen: &BTreeSet<String>,
    ) -> Vec<GenomicContext> {
        let Some(boundary) = self.snapshot.boundary(&location.chromosome) else {
            return Vec::new();
        };
        let position = location.position;
        let end = (position + self.config.genomic_distance).min(boundary);
        self.flanking_contexts(
            location,
            source,
            seen,
            Relation::Downstream,
            (position, end),
            boundary,
        )
    }

    fn flanking_contexts(
        &self,
        location: &Location,
        source: GeneSource,
        seen: &BTreeSet<String>,
        relation: Relation,
        (start, end): (i64, i64),
        boundary: i64,
    ) -> Vec<GenomicContext> {
        let key = range_key(&location.chromosome, start, end);
        let mut batch = match self.snapshot.genes(source, &key) {
            Some(genes) if has_source_error(genes) => return Vec::new(),
            Some(genes) => self.window_contexts(genes, location, source, relation, seen),
            None => ContextBatch::default(),
        };

        let far_edge = match relation {
            Relation::Upstream => start,
            _ => end,
        };
        if !batch.closest_found && far_edge != boundary {
            let nearest = self.nearest_gene(
                &location.chromosome,
                location.position,
                far_edge,
                boundary,
                relation,
                source,
                seen,
            );
            if let Some(gene) = nearest {
                let extra = self.window_contexts(
                    std::slice::from_ref(&gene),
                    location,
                    source,
                    relation,
                    seen,
                );
                batch.genomic_contexts.extend(extra.genomic_contexts);
            }
        }
        batch.genomic_contexts
    }

    /// Walks search windows away from `position` until a window yields a
    /// closest gene. A window answered with a source error ends the search.
    ///
    /// Only the windows prefetched into the snapshot are visited: the
    /// `search_window_prefetch` windows next to the variant, minus the first
    /// one, which the caller has already classified.
    #[allow(clippy::too_many_arguments)]
    pub fn nearest_gene(
        &self,
        chromosome: &str,
        snp_position: i64,
        position: i64,
        boundary: i64,
        relation: Relation,
        source: GeneSource,
        seen: &BTreeSet<String>,
    ) -> Option<OverlapGene> {
        let windows = SearchWindows::new(
            position,
            boundary,
            self.config.genomic_distance,
            relation,
        )
        .take(self.config.search_window_prefetch.saturating_sub(1) as usize);
        for (start, end) in windows {
            let key = range_key(chromosome, start, end);
            let Some(genes) = self.snapshot.genes(source, &key) else {
                continue;
            };
            if has_source_error(genes) {
                return None;
            }
            if let Some(index) = closest_index(genes, snp_position, relation, seen) {
                return Some(genes[index].clone());
            }
        }
        None
    }

    /// One context per usable gene of a window. For flanking relations the
    /// closest gene among them is flagged.
    pub fn window_contexts(
        &self,
        genes: &[OverlapGene],
        location: &Location,
        source: GeneSource,
        relation: Relation,
        seen: &BTreeSet<String>,
    ) -> ContextBatch {
        let closest = if relation.is_intergenic() {
            closest_index(genes, location.position, relation, seen)
        } else {
            None
        };

        let mut batch = ContextBatch {
            closest_found: closest.is_some(),
            ..ContextBatch::default()
        };
        for (index, gene) in genes.iter().enumerate() {
            let Some(name) = candidate_name(gene, seen) else {
                continue;
            };
            batch.gene_names.push(name.to_string());
            batch.genomic_contexts.push(self.context(
                gene,
                location,
                source,
                relation,
                Some(index) == closest,
            ));
        }
        batch
    }

    fn context(
        &self,
        gene: &OverlapGene,
        location: &Location,
        source: GeneSource,
        relation: Relation,
        is_closest_gene: bool,
    ) -> GenomicContext {
        let gene_id = gene.gene_id(source);
        GenomicContext {
            is_intergenic: relation.is_intergenic(),
            is_upstream: relation == Relation::Upstream,
            is_downstream: relation == Relation::Downstream,
            distance: relation.distance(location.position, gene),
            gene: Gene {
                name: gene.external_name.clone(),
                entrez_id: gene_id.clone().filter(|_| source == GeneSource::Ncbi),
                ensembl_id: gene_id.filter(|_| source == GeneSource::Ensembl),
            },
            location: location.clone(),
            source: self.config.source_label(source).to_string(),
            mapping_method: self.config.mapping_method.clone(),
            is_closest_gene,
        }
    }
}

/// Index of the gene with the smallest strictly positive distance. Ties keep
/// the first gene seen.
pub fn closest_index(
    genes: &[OverlapGene],
    snp_position: i64,
    relation: Relation,
    seen: &BTreeSet<String>,
) -> Option<usize> {
    let mut closest: Option<(usize, i64)> = None;
    for (index, gene) in genes.iter().enumerate() {
        if candidate_name(gene, seen).is_none() {
            continue;
        }
        let distance = relation.distance(snp_position, gene);
        if distance <= 0 {
            continue;
        }
        match closest {
            Some((_, best)) if distance >= best => {}
            _ => closest = Some((index, distance)),
        }
    }
    closest.map(|(index, _)| index)
}

fn candidate_name<'g>(gene: &'g OverlapGene, seen: &BTreeSet<String>) -> Option<&'g str> {
    gene.external_name
        .as_deref()
        .filter(|name| !seen.contains(*name))
}

fn has_source_error(genes: &[OverlapGene]) -> bool {
    genes.first().is_some_and(|gene| gene.error.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gene(name: &str, start: i64, end: i64) -> OverlapGene {
        OverlapGene {
            external_name: Some(name.to_string()),
            id: Some(format!("ENSG_{name}")),
            start,
            end,
            ..OverlapGene::default()
        }
    }

    fn location(position: i64) -> Location {
        Location {
            chromosome: "7".to_string(),
            position,
            region: None,
        }
    }

    #[test]
    fn closest_prefers_smaller_distance() {
        // upstream distances 5, 5, 3
        let genes = vec![gene("A", 0, 95), gene("B", 0, 95), gene("C", 0, 97)];
        let index = closest_index(&genes, 100, Relation::Upstream, &BTreeSet::new());
        assert_eq!(index, Some(2));
    }

    #[test]
    fn closest_ties_keep_first() {
        let genes = vec![gene("A", 103, 200), gene("B", 103, 300)];
        let index = closest_index(&genes, 100, Relation::Downstream, &BTreeSet::new());
        assert_eq!(index, Some(0));
    }

    #[test]
    fn closest_skips_seen_and_unnamed() {
        let mut unnamed = gene("X", 101, 150);
        unnamed.external_name = None;
        let genes = vec![unnamed, gene("A", 102, 150), gene("B", 110, 150)];
        let seen = BTreeSet::from(["A".to_string()]);
        assert_eq!(
            closest_index(&genes, 100, Relation::Downstream, &seen),
            Some(2)
        );
    }

    #[test]
    fn upstream_windows_reach_zero() {
        let windows = SearchWindows::new(250, 0, 100, Relation::Upstream).collect::<Vec<_>>();
        assert_eq!(windows, vec![(150, 250), (50, 150), (0, 50)]);
    }

    #[test]
    fn downstream_windows_reach_boundary() {
        let windows =
            SearchWindows::new(100, 320, 100, Relation::Downstream).collect::<Vec<_>>();
        assert_eq!(windows, vec![(100, 200), (200, 300), (300, 320)]);
    }

    #[test]
    fn window_count_is_bounded() {
        let boundary = 1_000_003;
        let distance = 100_000;
        let limit = (boundary + distance - 1) / distance;
        for start in [0, 1, 99_999, 500_000, 999_999, boundary] {
            let up = SearchWindows::new(start, 0, distance, Relation::Upstream).count() as i64;
            let down =
                SearchWindows::new(start, boundary, distance, Relation::Downstream).count() as i64;
            assert!(up <= limit.max(1), "upstream from {start}: {up}");
            assert!(down <= limit.max(1), "downstream from {start}: {down}");
        }
    }

    #[test]
    fn nearest_gene_slides_past_empty_windows() {
        let config = MappingConfig {
            genomic_distance: 100,
            search_window_prefetch: 3,
            ..MappingConfig::default()
        };
        let snapshot = AnnotationSnapshot::builder()
            .genes(GeneSource::Ensembl, Relation::Downstream, "7:600-700", vec![])
            .genes(
                GeneSource::Ensembl,
                Relation::Downstream,
                "7:700-800",
                vec![gene("FAR", 750, 900)],
            )
            .build();
        let resolver = GeneContextResolver::new(&snapshot, &config);

        let found = resolver.nearest_gene(
            "7",
            500,
            600,
            1_000,
            Relation::Downstream,
            GeneSource::Ensembl,
            &BTreeSet::new(),
        );
        assert_eq!(found.and_then(|gene| gene.external_name).as_deref(), Some("FAR"));

        let none = resolver.nearest_gene(
            "7",
            500,
            600,
            1_000,
            Relation::Downstream,
            GeneSource::Ncbi,
            &BTreeSet::new(),
        );
        assert!(none.is_none());
    }

    #[test]
    fn nearest_gene_visits_only_prefetched_windows() {
        let config = MappingConfig {
            genomic_distance: 1,
            search_window_prefetch: 2,
            ..MappingConfig::default()
        };
        let snapshot = AnnotationSnapshot::builder()
            .genes(GeneSource::Ensembl, Relation::Downstream, "7:601-602", vec![])
            .genes(
                GeneSource::Ensembl,
                Relation::Downstream,
                "7:602-603",
                vec![gene("FAR", 602, 700)],
            )
            .build();
        let resolver = GeneContextResolver::new(&snapshot, &config);
        let found = resolver.nearest_gene(
            "7",
            600,
            601,
            248_956_422,
            Relation::Downstream,
            GeneSource::Ensembl,
            &BTreeSet::new(),
        );
        assert!(found.is_none());
    }

    #[test]
    fn nearest_gene_stops_at_source_error() {
        let config = MappingConfig {
            genomic_distance: 100,
            search_window_prefetch: 3,
            ..MappingConfig::default()
        };
        let snapshot = AnnotationSnapshot::builder()
            .genes(
                GeneSource::Ncbi,
                Relation::Upstream,
                "7:300-400",
                vec![OverlapGene::failed_lookup("server error")],
            )
            .genes(
                GeneSource::Ncbi,
                Relation::Upstream,
                "7:200-300",
                vec![gene("BEHIND", 210, 250)],
            )
            .build();
        let resolver = GeneContextResolver::new(&snapshot, &config);
        let found = resolver.nearest_gene(
            "7",
            500,
            400,
            0,
            Relation::Upstream,
            GeneSource::Ncbi,
            &BTreeSet::new(),
        );
        assert!(found.is_none());
    }

    #[test]
    fn window_contexts_flag_single_closest() {
        let config = MappingConfig::default();
        let snapshot = AnnotationSnapshot::default();
        let resolver = GeneContextResolver::new(&snapshot, &config);
        let genes = vec![gene("A", 0, 95), gene("B", 0, 97), gene("C", 0, 97)];

        let batch = resolver.window_contexts(
            &genes,
            &location(100),
            GeneSource::Ensembl,
            Relation::Upstream,
            &BTreeSet::new(),
        );
        assert!(batch.closest_found);
        let flags = batch
            .genomic_contexts
            .iter()
            .map(|context| (context.distance, context.is_closest_gene))
            .collect::<Vec<_>>();
        assert_eq!(flags, vec![(5, false), (3, true), (3, false)]);
        assert!(batch.genomic_contexts.iter().all(|c| c.is_intergenic && c.is_upstream));
        assert_eq!(
            batch.genomic_contexts[1].gene.ensembl_id.as_deref(),
            Some("ENSG_B")
        );
        assert_eq!(batch.genomic_contexts[1].gene.entrez_id, None);
    }

    #[test]
    fn overlap_contexts_have_zero_distance() {
        let config = MappingConfig::default();
        let snapshot = AnnotationSnapshot::builder()
            .genes(
                GeneSource::Ncbi,
                Relation::Overlap,
                "7:100-100",
                vec![gene("A", 50, 150), gene("B", 90, 110)],
            )
            .build();
        let resolver = GeneContextResolver::new(&snapshot, &config);
        let seen = BTreeSet::from(["B".to_string()]);

        let batch = resolver.overlap_contexts(&location(100), GeneSource::Ncbi, &seen);
        assert_eq!(batch.gene_names, vec!["A"]);
        assert!(!batch.closest_found);
        let context = &batch.genomic_contexts[0];
        assert_eq!(context.distance, 0);
        assert!(!context.is_intergenic && !context.is_upstream && !context.is_downstream);
        assert!(!context.is_closest_gene);
        assert_eq!(context.source, "NCBI");
    }
}
