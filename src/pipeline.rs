use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::MappingConfig;
use crate::context::{GeneContextResolver, GenomicContext};
use crate::domain::{GeneSource, Location, Variant, reported_gene_symbol};
use crate::location::LocationResolver;
use crate::snapshot::AnnotationSnapshot;

/// Everything the pipeline learned about one queried variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingResult {
    pub rs_id: String,
    pub locations: Vec<Location>,
    pub merged: bool,
    pub current_snp_id: Option<String>,
    pub functional_class: Option<String>,
    pub genomic_contexts: Vec<GenomicContext>,
    pub ncbi_overlapping_genes: BTreeSet<String>,
    pub ensembl_overlapping_genes: BTreeSet<String>,
    pub pipeline_errors: Vec<String>,
}

/// Collects the contributions of one pipeline run.
#[derive(Debug)]
pub struct MappingResultBuilder {
    result: MappingResult,
}

impl MappingResultBuilder {
    pub fn new(rs_id: impl Into<String>) -> Self {
        Self {
            result: MappingResult {
                rs_id: rs_id.into(),
                ..MappingResult::default()
            },
        }
    }

    pub fn merged_into(&mut self, current_id: impl Into<String>) -> &mut Self {
        self.result.merged = true;
        self.result.current_snp_id = Some(current_id.into());
        self
    }

    /// Empty messages are dropped.
    pub fn pipeline_error(&mut self, message: impl Into<String>) -> &mut Self {
        let message = message.into();
        if !message.is_empty() {
            self.result.pipeline_errors.push(message);
        }
        self
    }

    pub fn locations(&mut self, locations: Vec<Location>) -> &mut Self {
        self.result.locations = locations;
        self
    }

    pub fn functional_class(&mut self, class: impl Into<String>) -> &mut Self {
        self.result.functional_class = Some(class.into());
        self
    }

    pub fn overlapping_genes(&self, source: GeneSource) -> &BTreeSet<String> {
        match source {
            GeneSource::Ensembl => &self.result.ensembl_overlapping_genes,
            GeneSource::Ncbi => &self.result.ncbi_overlapping_genes,
        }
    }

    pub fn add_overlapping_genes(
        &mut self,
        source: GeneSource,
        names: impl IntoIterator<Item = String>,
    ) -> &mut Self {
        let genes = match source {
            GeneSource::Ensembl => &mut self.result.ensembl_overlapping_genes,
            GeneSource::Ncbi => &mut self.result.ncbi_overlapping_genes,
        };
        genes.extend(names);
        self
    }

    pub fn add_contexts(
        &mut self,
        contexts: impl IntoIterator<Item = GenomicContext>,
    ) -> &mut Self {
        self.result.genomic_contexts.extend(contexts);
        self
    }

    pub fn finish(self) -> MappingResult {
        self.result
    }
}

pub struct MappingPipeline<'a> {
    snapshot: &'a AnnotationSnapshot,
    config: &'a MappingConfig,
}

impl<'a> MappingPipeline<'a> {
    pub fn new(snapshot: &'a AnnotationSnapshot, config: &'a MappingConfig) -> Self {
        Self { snapshot, config }
    }

    pub fn run(&self, variant_id: &str, reported_genes: &[String]) -> MappingResult {
        let mut builder = MappingResultBuilder::new(variant_id);

        let Some(variant) = self.snapshot.variant(variant_id) else {
            error!(%variant_id, "variation lookup returned no result");
            return builder.finish();
        };
        if let Some(message) = &variant.error {
            debug!(%variant_id, "variation lookup failed: {message}");
            builder.pipeline_error(message.clone());
            return builder.finish();
        }

        let locations = self.map_variant(variant_id, variant, &mut builder);

        if !reported_genes.is_empty() {
            if let Some(message) = self.check_reported_genes(reported_genes, &locations) {
                builder.pipeline_error(message);
            }
        }
        builder.finish()
    }

    fn map_variant(
        &self,
        variant_id: &str,
        variant: &Variant,
        builder: &mut MappingResultBuilder,
    ) -> Vec<Location> {
        if let Some(current) = variant.name.as_deref().filter(|_| variant.is_renamed(variant_id)) {
            builder.merged_into(current);
        }
        if let Some(failed) = &variant.failed {
            builder.pipeline_error(failed.clone());
        }

        let locations = LocationResolver::new(self.snapshot).resolve(variant);
        builder.locations(locations.clone());
        if locations.is_empty() {
            return locations;
        }
        if let Some(consequence) = &variant.most_severe_consequence {
            builder.functional_class(consequence.clone());
        }

        let resolver = GeneContextResolver::new(self.snapshot, self.config);
        for location in &locations {
            for source in GeneSource::ALL {
                let overlap =
                    resolver.overlap_contexts(location, source, builder.overlapping_genes(source));
                builder
                    .add_overlapping_genes(source, overlap.gene_names)
                    .add_contexts(overlap.genomic_contexts);
            }
            for source in GeneSource::ALL {
                let upstream =
                    resolver.upstream_contexts(location, source, builder.overlapping_genes(source));
                builder.add_contexts(upstream);
            }
            for source in GeneSource::ALL {
                let downstream = resolver.downstream_contexts(
                    location,
                    source,
                    builder.overlapping_genes(source),
                );
                builder.add_contexts(downstream);
            }
        }
        locations
    }

    /// Checks that reported genes exist and lie on a chromosome the variant
    /// maps to. Only the message of the last failing gene is kept.
    pub fn check_reported_genes(
        &self,
        reported_genes: &[String],
        locations: &[Location],
    ) -> Option<String> {
        let mut message = None;
        for raw in reported_genes {
            let Some(symbol) = reported_gene_symbol(raw) else {
                continue;
            };
            let Some(gene) = self.snapshot.reported_gene(&symbol) else {
                message = Some(format!("Reported gene check for {symbol} returned no result"));
                continue;
            };
            if let Some(error) = gene.error.as_deref().filter(|error| !error.is_empty()) {
                message = Some(error.to_string());
                continue;
            }
            let Some(gene_chromosome) = gene.chromosome.as_deref() else {
                message = Some(format!(
                    "Can't find a location in Ensembl for the reported gene {symbol}"
                ));
                continue;
            };
            if locations.is_empty() {
                message = Some(format!(
                    "Can't compare the {symbol} location in Ensembl: no mapping available for the variant"
                ));
            } else if !locations
                .iter()
                .any(|location| location.chromosome == gene_chromosome)
            {
                let mapped = locations
                    .iter()
                    .map(|location| location.chromosome.as_str())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect::<Vec<_>>()
                    .join(", ");
                message = Some(format!(
                    "Reported gene {symbol} is on a different chromosome (chr {gene_chromosome}) than the variant (chr {mapped})"
                ));
            }
        }
        message
    }
}
