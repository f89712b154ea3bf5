use crate::domain::{Location, Variant, is_banded_chromosome, range_key};
use crate::snapshot::AnnotationSnapshot;

pub struct LocationResolver<'a> {
    snapshot: &'a AnnotationSnapshot,
}

impl<'a> LocationResolver<'a> {
    pub fn new(snapshot: &'a AnnotationSnapshot) -> Self {
        Self { snapshot }
    }

    /// One location per placed mapping, in mapping order. The region is
    /// `chromosome + band` when the band lookup succeeded on a banded
    /// chromosome.
    pub fn resolve(&self, variant: &Variant) -> Vec<Location> {
        variant
            .placed_mappings()
            .map(|(chromosome, position)| Location {
                chromosome: chromosome.to_string(),
                position,
                region: self.region(chromosome, position),
            })
            .collect()
    }

    fn region(&self, chromosome: &str, position: i64) -> Option<String> {
        let key = range_key(chromosome, position, position);
        let band = self.snapshot.cytogenetic_band(&key)?.first()?;
        if band.error.is_some() || !is_banded_chromosome(chromosome) {
            return None;
        }
        band.id
            .as_deref()
            .map(|band_id| format!("{chromosome}{band_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Mapping, OverlapGene};

    fn mapping(chromosome: Option<&str>, start: i64) -> Mapping {
        Mapping {
            chromosome: chromosome.map(str::to_string),
            start: Some(start),
            strand: Some(1),
        }
    }

    fn band(id: &str) -> OverlapGene {
        OverlapGene {
            id: Some(id.to_string()),
            ..OverlapGene::default()
        }
    }

    #[test]
    fn resolves_regions_in_mapping_order() {
        let snapshot = AnnotationSnapshot::builder()
            .cytogenetic_band("19:44908822-44908822", vec![band("q13.32")])
            .cytogenetic_band("MT:100-100", vec![band("p1")])
            .cytogenetic_band("CHR_HSCHR19_1_CTG2:5-5", vec![band("q13")])
            .cytogenetic_band("2:7-7", vec![OverlapGene::failed_lookup("unavailable")])
            .build();
        let variant = Variant {
            mappings: vec![
                mapping(Some("19"), 44908822),
                mapping(None, 1),
                mapping(Some("MT"), 100),
                mapping(Some("CHR_HSCHR19_1_CTG2"), 5),
                mapping(Some("2"), 7),
                mapping(Some("3"), 9),
            ],
            ..Variant::default()
        };

        let locations = LocationResolver::new(&snapshot).resolve(&variant);
        let regions = locations
            .iter()
            .map(|location| (location.chromosome.as_str(), location.region.as_deref()))
            .collect::<Vec<_>>();
        assert_eq!(
            regions,
            vec![
                ("19", Some("19q13.32")),
                ("MT", Some("MTp1")),
                ("CHR_HSCHR19_1_CTG2", None),
                ("2", None),
                ("3", None),
            ]
        );
    }
}
