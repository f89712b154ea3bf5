use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

static CHROMOSOME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[0-9]+|[XY]|MT)$").expect("chromosome pattern"));

static NCBI_ACC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Acc:(\d+)").expect("NCBI accession pattern"));

/// A variant reference id as supplied by a job (`rs7412`, `rs429358`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariantId(String);

impl VariantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VariantId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        let is_valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.' | ':'));
        if !is_valid {
            return Err(KiraError::InvalidVariantId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// The two gene annotation sources queried for every location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneSource {
    Ensembl,
    Ncbi,
}

impl GeneSource {
    pub const ALL: [GeneSource; 2] = [GeneSource::Ncbi, GeneSource::Ensembl];
}

impl fmt::Display for GeneSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneSource::Ensembl => write!(f, "ensembl"),
            GeneSource::Ncbi => write!(f, "ncbi"),
        }
    }
}

/// Position of a gene relative to a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    Overlap,
    Upstream,
    Downstream,
}

impl Relation {
    pub fn is_intergenic(self) -> bool {
        !matches!(self, Relation::Overlap)
    }

    /// Signed distance from the variant to a gene in this relation.
    /// Overlapping genes are always at distance 0.
    pub fn distance(self, snp_position: i64, gene: &OverlapGene) -> i64 {
        match self {
            Relation::Overlap => 0,
            Relation::Upstream => snp_position - gene.end,
            Relation::Downstream => gene.start - snp_position,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::Overlap => write!(f, "overlap"),
            Relation::Upstream => write!(f, "upstream"),
            Relation::Downstream => write!(f, "downstream"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    #[serde(default, rename = "seq_region_name")]
    pub chromosome: Option<String>,
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub strand: Option<i8>,
}

/// A variation record as returned by the variant endpoint.
///
/// `name` is the identifier the source currently uses; it differs from the
/// queried id when the id was merged into another one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mappings: Vec<Mapping>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub failed: Option<String>,
    #[serde(default)]
    pub most_severe_consequence: Option<String>,
}

impl Variant {
    pub fn failed_lookup(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Mappings that carry both a chromosome and a start position.
    pub fn placed_mappings(&self) -> impl Iterator<Item = (&str, i64)> {
        self.mappings
            .iter()
            .filter_map(|mapping| Some((mapping.chromosome.as_deref()?, mapping.start?)))
    }

    pub fn is_renamed(&self, queried: &str) -> bool {
        self.name.as_deref().is_some_and(|name| name != queried)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub chromosome: String,
    pub position: i64,
    pub region: Option<String>,
}

impl Location {
    pub fn point_key(&self) -> String {
        range_key(&self.chromosome, self.position, self.position)
    }
}

/// A feature returned by a region overlap lookup: a gene, or a cytogenetic
/// band when `id` holds the band name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlapGene {
    #[serde(default)]
    pub external_name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub end: i64,
    #[serde(default)]
    pub error: Option<String>,
}

impl OverlapGene {
    pub fn failed_lookup(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Identifier used to report this gene. NCBI records carry the Entrez id
    /// inside their description (`[Source:NCBI gene;Acc:1234]`).
    pub fn gene_id(&self, source: GeneSource) -> Option<String> {
        match source {
            GeneSource::Ensembl => self.id.clone(),
            GeneSource::Ncbi => self
                .description
                .as_deref()
                .and_then(|description| NCBI_ACC_RE.captures(description))
                .and_then(|captures| captures.get(1))
                .map(|acc| acc.as_str().to_string())
                .or_else(|| self.external_name.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneSymbol {
    #[serde(default, rename = "seq_region_name")]
    pub chromosome: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl GeneSymbol {
    pub fn failed_lookup(message: impl Into<String>) -> Self {
        Self {
            chromosome: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyInfo {
    #[serde(default)]
    pub length: i64,
    #[serde(default)]
    pub error: Option<String>,
}

impl AssemblyInfo {
    pub fn failed_lookup(message: impl Into<String>) -> Self {
        Self {
            length: 0,
            error: Some(message.into()),
        }
    }

    /// Last position of the chromosome, if the lookup succeeded.
    pub fn boundary(&self) -> Option<i64> {
        (self.error.is_none() && self.length > 0).then_some(self.length)
    }
}

/// Reported-gene tokens that are placeholders rather than gene symbols.
pub const IGNORED_REPORTED_GENES: [&str; 3] = ["NR", "intergenic", "genic"];

/// Normalises a caller-reported gene symbol: spaces are removed and
/// placeholder tokens yield `None`.
pub fn reported_gene_symbol(raw: &str) -> Option<String> {
    let symbol = raw.replace(' ', "");
    if symbol.is_empty() || IGNORED_REPORTED_GENES.contains(&symbol.as_str()) {
        return None;
    }
    Some(symbol)
}

pub fn range_key(chromosome: &str, start: i64, end: i64) -> String {
    format!("{chromosome}:{start}-{end}")
}

/// Numbered chromosomes, X, Y and the mitochondrial genome get a
/// cytogenetic region name; scaffolds and patches do not.
pub fn is_banded_chromosome(chromosome: &str) -> bool {
    CHROMOSOME_RE.is_match(chromosome)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_variant_id() {
        let id: VariantId = "  rs7412 ".parse().unwrap();
        assert_eq!(id.as_str(), "rs7412");
        let err = "rs 7412".parse::<VariantId>().unwrap_err();
        assert_matches!(err, KiraError::InvalidVariantId(_));
        assert!("".parse::<VariantId>().is_err());
    }

    #[test]
    fn banded_chromosomes() {
        assert!(is_banded_chromosome("7"));
        assert!(is_banded_chromosome("X"));
        assert!(is_banded_chromosome("MT"));
        assert!(!is_banded_chromosome("HSCHR6_MHC_COX_CTG1"));
        assert!(!is_banded_chromosome("7X"));
    }

    #[test]
    fn ncbi_gene_id_from_description() {
        let gene = OverlapGene {
            external_name: Some("APOE".to_string()),
            id: Some("gene-APOE".to_string()),
            description: Some("apolipoprotein E [Source:NCBI gene;Acc:348]".to_string()),
            ..OverlapGene::default()
        };
        assert_eq!(gene.gene_id(GeneSource::Ncbi).as_deref(), Some("348"));
        assert_eq!(gene.gene_id(GeneSource::Ensembl).as_deref(), Some("gene-APOE"));

        let bare = OverlapGene {
            external_name: Some("APOE".to_string()),
            ..OverlapGene::default()
        };
        assert_eq!(bare.gene_id(GeneSource::Ncbi).as_deref(), Some("APOE"));
    }

    #[test]
    fn decode_variation_record() {
        let raw = serde_json::json!({
            "name": "rs7412",
            "most_severe_consequence": "missense_variant",
            "mappings": [
                {"seq_region_name": "19", "start": 44908822, "end": 44908822, "strand": 1},
                {"seq_region_name": null, "start": 10}
            ]
        });
        let variant: Variant = serde_json::from_value(raw).unwrap();
        assert_eq!(variant.placed_mappings().collect::<Vec<_>>(), vec![("19", 44908822)]);
        assert!(variant.is_renamed("rs000"));
        assert!(!variant.is_renamed("rs7412"));
    }

    #[test]
    fn reported_gene_placeholders() {
        assert_eq!(reported_gene_symbol(" APOE ").as_deref(), Some("APOE"));
        assert_eq!(reported_gene_symbol("HLA DRB1").as_deref(), Some("HLADRB1"));
        assert_eq!(reported_gene_symbol("NR"), None);
        assert_eq!(reported_gene_symbol(" intergenic"), None);
        assert_eq!(reported_gene_symbol("  "), None);
    }

    #[test]
    fn assembly_boundary() {
        let info: AssemblyInfo = serde_json::from_value(serde_json::json!({
            "length": 58617616,
            "assembly_name": "GRCh38.p14"
        }))
        .unwrap();
        assert_eq!(info.boundary(), Some(58617616));
        assert_eq!(AssemblyInfo::failed_lookup("boom").boundary(), None);
    }
}
