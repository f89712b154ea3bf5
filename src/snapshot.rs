use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{AssemblyInfo, GeneSource, GeneSymbol, OverlapGene, Relation, Variant};

pub type GeneTable = BTreeMap<String, Vec<OverlapGene>>;

/// Overlap lookups of one gene source, keyed by `chrom:start-end`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTables {
    overlap: GeneTable,
    upstream: GeneTable,
    downstream: GeneTable,
}

impl SourceTables {
    pub fn table(&self, relation: Relation) -> &GeneTable {
        match relation {
            Relation::Overlap => &self.overlap,
            Relation::Upstream => &self.upstream,
            Relation::Downstream => &self.downstream,
        }
    }

    fn table_mut(&mut self, relation: Relation) -> &mut GeneTable {
        match relation {
            Relation::Overlap => &mut self.overlap,
            Relation::Upstream => &mut self.upstream,
            Relation::Downstream => &mut self.downstream,
        }
    }

    /// Looks a range up in every table of the source. A range answers the
    /// same way whichever relation it was fetched for.
    pub fn lookup(&self, key: &str) -> Option<&[OverlapGene]> {
        [&self.downstream, &self.upstream, &self.overlap]
            .into_iter()
            .find_map(|table| table.get(key))
            .map(Vec::as_slice)
    }
}

/// Everything fetched for one job. Built once, then only read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationSnapshot {
    variants: BTreeMap<String, Variant>,
    reported_genes: BTreeMap<String, GeneSymbol>,
    cytogenetic_bands: GeneTable,
    assembly_info: BTreeMap<String, AssemblyInfo>,
    ensembl: SourceTables,
    ncbi: SourceTables,
}

impl AnnotationSnapshot {
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    pub fn variant(&self, id: &str) -> Option<&Variant> {
        self.variants.get(id)
    }

    pub fn reported_gene(&self, symbol: &str) -> Option<&GeneSymbol> {
        self.reported_genes.get(symbol)
    }

    pub fn cytogenetic_band(&self, key: &str) -> Option<&[OverlapGene]> {
        self.cytogenetic_bands.get(key).map(Vec::as_slice)
    }

    pub fn assembly_info(&self, chromosome: &str) -> Option<&AssemblyInfo> {
        self.assembly_info.get(chromosome)
    }

    /// Length of the chromosome, when the assembly lookup succeeded.
    pub fn boundary(&self, chromosome: &str) -> Option<i64> {
        self.assembly_info(chromosome).and_then(AssemblyInfo::boundary)
    }

    pub fn source(&self, source: GeneSource) -> &SourceTables {
        match source {
            GeneSource::Ensembl => &self.ensembl,
            GeneSource::Ncbi => &self.ncbi,
        }
    }

    pub fn genes(&self, source: GeneSource, key: &str) -> Option<&[OverlapGene]> {
        self.source(source).lookup(key)
    }
}

#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    snapshot: AnnotationSnapshot,
}

impl SnapshotBuilder {
    pub fn variant(mut self, id: impl Into<String>, variant: Variant) -> Self {
        self.snapshot.variants.insert(id.into(), variant);
        self
    }

    pub fn variants(mut self, variants: BTreeMap<String, Variant>) -> Self {
        self.snapshot.variants.extend(variants);
        self
    }

    pub fn reported_gene(mut self, symbol: impl Into<String>, gene: GeneSymbol) -> Self {
        self.snapshot.reported_genes.insert(symbol.into(), gene);
        self
    }

    pub fn reported_genes(mut self, genes: BTreeMap<String, GeneSymbol>) -> Self {
        self.snapshot.reported_genes.extend(genes);
        self
    }

    pub fn cytogenetic_band(mut self, key: impl Into<String>, bands: Vec<OverlapGene>) -> Self {
        self.snapshot.cytogenetic_bands.insert(key.into(), bands);
        self
    }

    pub fn cytogenetic_bands(mut self, bands: GeneTable) -> Self {
        self.snapshot.cytogenetic_bands.extend(bands);
        self
    }

    pub fn assembly_info(mut self, chromosome: impl Into<String>, info: AssemblyInfo) -> Self {
        self.snapshot.assembly_info.insert(chromosome.into(), info);
        self
    }

    pub fn assembly_infos(mut self, infos: BTreeMap<String, AssemblyInfo>) -> Self {
        self.snapshot.assembly_info.extend(infos);
        self
    }

    pub fn genes(
        mut self,
        source: GeneSource,
        relation: Relation,
        key: impl Into<String>,
        genes: Vec<OverlapGene>,
    ) -> Self {
        self.tables_mut(source)
            .table_mut(relation)
            .insert(key.into(), genes);
        self
    }

    pub fn gene_table(mut self, source: GeneSource, relation: Relation, table: GeneTable) -> Self {
        self.tables_mut(source).table_mut(relation).extend(table);
        self
    }

    pub fn build(self) -> AnnotationSnapshot {
        self.snapshot
    }

    fn tables_mut(&mut self, source: GeneSource) -> &mut SourceTables {
        match source {
            GeneSource::Ensembl => &mut self.snapshot.ensembl,
            GeneSource::Ncbi => &mut self.snapshot.ncbi,
        }
    }
}
