//! Last-resort coordinates for state capitals and large cities.
//!
//! Keyed by `normalizer::city_key` (`"city,uf"` in lowercase ASCII).
//! Results from this table are always approximate.

use crate::models::{AccuracyTier, GeocodeResult};
use crate::normalizer::city_key;

pub const STATIC_TABLE_PROVIDER: &str = "static_table";

const CITY_COORDINATES: &[(&str, f64, f64)] = &[
    // State capitals
    ("rio branco,ac", -9.9747, -67.8243),
    ("maceio,al", -9.6658, -35.7353),
    ("macapa,ap", 0.0349, -51.0694),
    ("manaus,am", -3.1190, -60.0217),
    ("salvador,ba", -12.9777, -38.5016),
    ("fortaleza,ce", -3.7319, -38.5267),
    ("brasilia,df", -15.7939, -47.8828),
    ("vitoria,es", -20.3155, -40.3128),
    ("goiania,go", -16.6869, -49.2648),
    ("sao luis,ma", -2.5307, -44.3068),
    ("cuiaba,mt", -15.6014, -56.0979),
    ("campo grande,ms", -20.4697, -54.6201),
    ("belo horizonte,mg", -19.9167, -43.9345),
    ("belem,pa", -1.4558, -48.4902),
    ("joao pessoa,pb", -7.1195, -34.8450),
    ("curitiba,pr", -25.4284, -49.2733),
    ("recife,pe", -8.0476, -34.8770),
    ("teresina,pi", -5.0892, -42.8019),
    ("rio de janeiro,rj", -22.9068, -43.1729),
    ("natal,rn", -5.7945, -35.2110),
    ("porto alegre,rs", -30.0346, -51.2177),
    ("porto velho,ro", -8.7612, -63.9004),
    ("boa vista,rr", 2.8235, -60.6758),
    ("florianopolis,sc", -27.5954, -48.5480),
    ("sao paulo,sp", -23.5505, -46.6333),
    ("aracaju,se", -10.9472, -37.0731),
    ("palmas,to", -10.1840, -48.3336),
    // Greater Sao Paulo and interior
    ("guarulhos,sp", -23.4538, -46.5333),
    ("osasco,sp", -23.5329, -46.7920),
    ("santo andre,sp", -23.6639, -46.5383),
    ("sao bernardo do campo,sp", -23.6914, -46.5646),
    ("sao caetano do sul,sp", -23.6229, -46.5548),
    ("diadema,sp", -23.6813, -46.6205),
    ("barueri,sp", -23.5057, -46.8790),
    ("santos,sp", -23.9608, -46.3336),
    ("guaruja,sp", -23.9888, -46.2580),
    ("campinas,sp", -22.9099, -47.0626),
    ("sorocaba,sp", -23.5015, -47.4526),
    ("ribeirao preto,sp", -21.1704, -47.8103),
    ("sao jose dos campos,sp", -23.1896, -45.8841),
    // Other large cities
    ("niteroi,rj", -22.8832, -43.1034),
    ("uberlandia,mg", -18.9186, -48.2772),
    ("contagem,mg", -19.9321, -44.0539),
    ("londrina,pr", -23.3045, -51.1696),
    ("joinville,sc", -26.3045, -48.8487),
    ("feira de santana,ba", -12.2664, -38.9663),
];

/// Looks up the static coordinates for a city.
pub fn lookup(city: &str, state: &str) -> Option<GeocodeResult> {
    let key = city_key(city, state);
    CITY_COORDINATES
        .iter()
        .find(|(name, _, _)| *name == key)
        .map(|&(name, lat, lng)| GeocodeResult {
            lat,
            lng,
            provider: STATIC_TABLE_PROVIDER.to_string(),
            accuracy: AccuracyTier::Locality,
            approximate: true,
            display_text: Some(name.to_string()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::GeographicValidator;

    #[test]
    fn test_lookup_folds_accents_and_state_names() {
        let result = lookup("São Paulo", "São Paulo").unwrap();
        assert!((result.lat - -23.5505).abs() < 1e-4);
        assert!(result.approximate);
        assert_eq!(result.provider, STATIC_TABLE_PROVIDER);
    }

    #[test]
    fn test_unknown_city() {
        assert!(lookup("Cidade Inexistente", "SP").is_none());
    }

    #[test]
    fn test_every_entry_passes_state_validation() {
        let validator = GeographicValidator::new();
        for (key, lat, lng) in CITY_COORDINATES {
            let uf = key.rsplit(',').next().unwrap();
            assert!(validator.validate(*lat, *lng, Some(uf)), "{key} outside its state");
        }
    }
}
