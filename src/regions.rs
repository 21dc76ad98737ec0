//! Region detection and processing order for batch runs.
//!
//! Regions are detected from the 5-digit CEP prefix, falling back to the
//! city name when the CEP is missing or outside every known range.

use crate::models::CustomerGeocodeRecord;
use crate::normalizer::{clean_cep, is_usable_street, normalize_state, normalize_text};
use std::cmp::Reverse;
use std::collections::HashSet;

pub const OTHER_REGION: &str = "outros";

struct Region {
    code: &'static str,
    /// Inclusive 5-digit CEP prefix ranges.
    cep_ranges: &'static [(u32, u32)],
    cities: &'static [&'static str],
}

const REGIONS: &[Region] = &[
    Region {
        code: "sp_capital",
        cep_ranges: &[(1000, 5999), (8000, 8499)],
        cities: &["São Paulo"],
    },
    Region {
        code: "sp_metro",
        cep_ranges: &[(6000, 7999), (8500, 9999)],
        cities: &[
            "Guarulhos",
            "Osasco",
            "Santo André",
            "São Bernardo do Campo",
            "São Caetano do Sul",
            "Diadema",
            "Barueri",
            "Carapicuíba",
            "Mauá",
        ],
    },
    Region {
        code: "sp_litoral",
        cep_ranges: &[(11000, 11999)],
        cities: &["Santos", "Guarujá", "São Vicente", "Praia Grande"],
    },
    Region {
        code: "sp_interior",
        cep_ranges: &[(12000, 19999)],
        cities: &["Campinas", "Ribeirão Preto", "Sorocaba", "São José dos Campos"],
    },
    Region {
        code: "rj",
        cep_ranges: &[(20000, 28999)],
        cities: &["Rio de Janeiro", "Niterói"],
    },
    Region {
        code: "mg",
        cep_ranges: &[(30000, 39999)],
        cities: &["Belo Horizonte"],
    },
    Region {
        code: "pr",
        cep_ranges: &[(80000, 87999)],
        cities: &["Curitiba"],
    },
];

/// Region code for a CEP and/or city. `"outros"` when nothing matches.
pub fn detect_region(postal_code: Option<&str>, city: Option<&str>) -> &'static str {
    if let Some(prefix) = postal_code
        .and_then(clean_cep)
        .and_then(|cep| cep[..5].parse::<u32>().ok())
    {
        let by_cep = REGIONS.iter().find(|region| {
            region
                .cep_ranges
                .iter()
                .any(|(lo, hi)| (*lo..=*hi).contains(&prefix))
        });
        if let Some(region) = by_cep {
            return region.code;
        }
    }

    if let Some(city) = city.map(normalize_text).filter(|c| !c.is_empty()) {
        let by_city = REGIONS
            .iter()
            .find(|region| region.cities.iter().any(|name| normalize_text(name) == city));
        if let Some(region) = by_city {
            return region.code;
        }
    }

    OTHER_REGION
}

pub fn record_region(record: &CustomerGeocodeRecord) -> &'static str {
    detect_region(record.postal_code.as_deref(), record.city.as_deref())
}

/// Position of a region in the priority list; unknown regions sort last.
pub fn region_priority(region: &str, priority_regions: &[String]) -> usize {
    priority_regions
        .iter()
        .position(|r| r == region)
        .unwrap_or(priority_regions.len())
}

/// Weighted presence of the address fields: CEP 40, street 30, city 20, state 10.
pub fn completeness_score(record: &CustomerGeocodeRecord) -> u32 {
    let mut score = 0;
    if record.postal_code.as_deref().and_then(clean_cep).is_some() {
        score += 40;
    }
    if record.street.as_deref().is_some_and(is_usable_street) {
        score += 30;
    }
    if record.city.as_deref().is_some_and(|c| !c.trim().is_empty()) {
        score += 20;
    }
    if record.state.as_deref().and_then(normalize_state).is_some() {
        score += 10;
    }
    score
}

/// Orders records for processing with one stable sort.
///
/// Key: already processed this run (last), has a valid CEP (first),
/// region priority, completeness (highest first), name.
pub fn prioritize(
    mut records: Vec<CustomerGeocodeRecord>,
    priority_regions: &[String],
    processed: &HashSet<String>,
) -> Vec<CustomerGeocodeRecord> {
    records.sort_by_cached_key(|record| {
        let has_cep = record.postal_code.as_deref().and_then(clean_cep).is_some();
        (
            processed.contains(&record.id),
            Reverse(has_cep),
            region_priority(record_region(record), priority_regions),
            Reverse(completeness_score(record)),
            normalize_text(&record.name),
        )
    });
    records
}

/// Groups records by region, home region first. Order inside a group is
/// preserved.
pub fn group_by_region(
    records: Vec<CustomerGeocodeRecord>,
    priority_regions: &[String],
) -> Vec<(String, Vec<CustomerGeocodeRecord>)> {
    let mut groups: Vec<(String, Vec<CustomerGeocodeRecord>)> = Vec::new();
    for mut record in records {
        let region = record_region(&record);
        record.region_code = Some(region.to_string());
        match groups.iter_mut().find(|(code, _)| code == region) {
            Some((_, members)) => members.push(record),
            None => groups.push((region.to_string(), vec![record])),
        }
    }
    groups.sort_by_key(|(code, _)| region_priority(code, priority_regions));
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PRIORITY_REGIONS;

    fn priorities() -> Vec<String> {
        DEFAULT_PRIORITY_REGIONS.iter().map(|r| r.to_string()).collect()
    }

    fn record(id: &str, name: &str, cep: Option<&str>, city: Option<&str>) -> CustomerGeocodeRecord {
        let mut record = CustomerGeocodeRecord::new(id, name);
        record.postal_code = cep.map(str::to_string);
        record.city = city.map(str::to_string);
        record
    }

    #[test]
    fn test_detect_region_by_cep_prefix() {
        assert_eq!(detect_region(Some("01310-100"), None), "sp_capital");
        assert_eq!(detect_region(Some("08010000"), None), "sp_capital");
        assert_eq!(detect_region(Some("07010-000"), None), "sp_metro");
        assert_eq!(detect_region(Some("09010-000"), None), "sp_metro");
        assert_eq!(detect_region(Some("11010-000"), None), "sp_litoral");
        assert_eq!(detect_region(Some("13010-000"), None), "sp_interior");
        assert_eq!(detect_region(Some("22010-000"), None), "rj");
        assert_eq!(detect_region(Some("30110-000"), None), "mg");
        assert_eq!(detect_region(Some("80010-000"), None), "pr");
        assert_eq!(detect_region(Some("40010-000"), None), OTHER_REGION);
    }

    #[test]
    fn test_detect_region_falls_back_to_city() {
        assert_eq!(detect_region(None, Some("GUARULHOS")), "sp_metro");
        assert_eq!(detect_region(Some("123"), Some("Niteroi")), "rj");
        assert_eq!(detect_region(None, Some("Salvador")), OTHER_REGION);
        assert_eq!(detect_region(None, None), OTHER_REGION);
    }

    #[test]
    fn test_completeness_score() {
        let mut full = record("1", "Ana", Some("01310100"), Some("São Paulo"));
        full.street = Some("Av. Paulista, 1000".to_string());
        full.state = Some("SP".to_string());
        assert_eq!(completeness_score(&full), 100);

        let partial = record("2", "Bia", Some("123"), Some("Santos"));
        assert_eq!(completeness_score(&partial), 20);
    }

    #[test]
    fn test_prioritize_orders_by_composite_key() {
        let records = vec![
            record("rio", "Carla", Some("22010000"), Some("Rio de Janeiro")),
            record("nocep", "Ana", None, Some("São Paulo")),
            record("sp-b", "Bruno", Some("01310100"), None),
            record("sp-a", "Alice", Some("01310100"), None),
            record("done", "Aaron", Some("01310100"), None),
        ];
        let processed: HashSet<String> = ["done".to_string()].into();

        let ordered = prioritize(records, &priorities(), &processed);
        let ids: Vec<&str> = ordered.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["sp-a", "sp-b", "rio", "nocep", "done"]);
    }

    #[test]
    fn test_group_by_region_home_first_and_tags_records() {
        let records = vec![
            record("1", "A", Some("22010000"), None),
            record("2", "B", Some("40010000"), None),
            record("3", "C", Some("01310100"), None),
            record("4", "D", Some("22020000"), None),
        ];
        let groups = group_by_region(records, &priorities());

        let codes: Vec<&str> = groups.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(codes, vec!["sp_capital", "rj", OTHER_REGION]);
        assert_eq!(groups[1].1.len(), 2);
        assert_eq!(groups[1].1[0].region_code.as_deref(), Some("rj"));
    }
}
