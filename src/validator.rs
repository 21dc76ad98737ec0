//! Coarse geographic plausibility checks.
//!
//! Rectangles over-approximate irregular state borders. They are good at
//! catching gross errors (a result in another country, a swapped lat/lng,
//! a `0,0` default) and deliberately not used for precise state attribution.

use crate::normalizer::normalize_state;

/// A rectangular latitude/longitude box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub const fn new(min_lat: f64, max_lat: f64, min_lng: f64, max_lng: f64) -> Self {
        Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        }
    }

    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lng >= self.min_lng && lng <= self.max_lng
    }
}

/// Mainland Brazil plus the Atlantic islands that carry CEPs.
pub const BRAZIL_BOUNDS: BoundingBox = BoundingBox::new(-33.75, 5.27, -73.99, -28.84);

/// Per-state boxes keyed by UF.
const STATE_BOUNDS: &[(&str, BoundingBox)] = &[
    ("AC", BoundingBox::new(-11.15, -7.11, -73.99, -66.62)),
    ("AL", BoundingBox::new(-10.50, -8.81, -38.24, -35.15)),
    ("AM", BoundingBox::new(-9.82, 2.25, -73.80, -56.10)),
    ("AP", BoundingBox::new(-1.24, 4.44, -54.88, -49.88)),
    ("BA", BoundingBox::new(-18.35, -8.53, -46.62, -37.34)),
    ("CE", BoundingBox::new(-7.86, -2.78, -41.42, -37.25)),
    ("DF", BoundingBox::new(-16.05, -15.50, -48.29, -47.31)),
    ("ES", BoundingBox::new(-21.30, -17.89, -41.88, -39.66)),
    ("GO", BoundingBox::new(-19.50, -12.39, -53.25, -45.91)),
    ("MA", BoundingBox::new(-10.26, -1.04, -48.76, -41.80)),
    ("MG", BoundingBox::new(-22.92, -14.23, -51.05, -39.86)),
    ("MS", BoundingBox::new(-24.07, -17.17, -58.17, -50.92)),
    ("MT", BoundingBox::new(-18.04, -7.35, -61.63, -50.22)),
    ("PA", BoundingBox::new(-9.84, 2.59, -58.90, -46.06)),
    ("PB", BoundingBox::new(-8.30, -6.03, -38.77, -34.79)),
    ("PE", BoundingBox::new(-9.48, -3.83, -41.36, -32.39)),
    ("PI", BoundingBox::new(-10.93, -2.74, -45.99, -40.37)),
    ("PR", BoundingBox::new(-26.72, -22.52, -54.62, -48.02)),
    ("RJ", BoundingBox::new(-23.37, -20.76, -44.89, -40.96)),
    ("RN", BoundingBox::new(-6.98, -4.83, -38.58, -34.97)),
    ("RO", BoundingBox::new(-13.69, -7.97, -66.81, -59.77)),
    ("RR", BoundingBox::new(-1.58, 5.27, -64.83, -58.89)),
    ("RS", BoundingBox::new(-33.75, -27.08, -57.65, -49.69)),
    ("SC", BoundingBox::new(-29.35, -25.96, -53.84, -48.36)),
    ("SE", BoundingBox::new(-11.57, -9.51, -38.25, -36.39)),
    ("SP", BoundingBox::new(-25.31, -19.78, -53.11, -44.16)),
    ("TO", BoundingBox::new(-13.47, -5.17, -50.74, -45.70)),
];

/// Looks up the bounding box of a state. Accepts UF codes or full names.
pub fn state_bounds(state: &str) -> Option<BoundingBox> {
    let uf = normalize_state(state)?;
    STATE_BOUNDS
        .iter()
        .find(|(code, _)| *code == uf)
        .map(|(_, bounds)| *bounds)
}

/// Rejects implausible coordinates.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeographicValidator;

impl GeographicValidator {
    pub fn new() -> Self {
        Self
    }

    /// True when the point lies inside Brazil and, given a recognizable
    /// state hint, inside that state's box. An unknown hint only disables
    /// the state check; national bounds always apply.
    pub fn validate(&self, lat: f64, lng: f64, state_hint: Option<&str>) -> bool {
        if !lat.is_finite() || !lng.is_finite() {
            return false;
        }
        if !BRAZIL_BOUNDS.contains(lat, lng) {
            return false;
        }
        match state_hint.and_then(state_bounds) {
            Some(bounds) => bounds.contains(lat, lng),
            None => true,
        }
    }

    /// Why a point was rejected, for logging. `None` when it is valid.
    pub fn rejection_reason(&self, lat: f64, lng: f64, state_hint: Option<&str>) -> Option<String> {
        if !lat.is_finite() || !lng.is_finite() {
            return Some("non-finite coordinates".to_string());
        }
        if !BRAZIL_BOUNDS.contains(lat, lng) {
            return Some(format!("({:.5}, {:.5}) is outside Brazil", lat, lng));
        }
        let uf = state_hint.and_then(normalize_state)?;
        let bounds = state_bounds(&uf)?;
        if bounds.contains(lat, lng) {
            None
        } else {
            Some(format!("({:.5}, {:.5}) is outside {}", lat, lng, uf))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_new_york() {
        let validator = GeographicValidator::new();
        assert!(!validator.validate(40.7, -74.0, None));
        assert!(!validator.validate(40.7, -74.0, Some("SP")));
    }

    #[test]
    fn test_rejects_null_island() {
        assert!(!GeographicValidator::new().validate(0.0, 0.0, None));
    }

    #[test]
    fn test_accepts_sao_paulo_with_and_without_hint() {
        let validator = GeographicValidator::new();
        assert!(validator.validate(-23.5505, -46.6333, None));
        assert!(validator.validate(-23.5505, -46.6333, Some("SP")));
        assert!(validator.validate(-23.5505, -46.6333, Some("São Paulo")));
    }

    #[test]
    fn test_state_hint_rejects_other_state() {
        let validator = GeographicValidator::new();
        // Rio de Janeiro coordinates with a Bahia hint.
        assert!(!validator.validate(-22.9068, -43.1729, Some("BA")));
        assert!(validator.validate(-22.9068, -43.1729, Some("RJ")));
    }

    #[test]
    fn test_unknown_hint_falls_back_to_national_bounds() {
        let validator = GeographicValidator::new();
        assert!(validator.validate(-22.9068, -43.1729, Some("ZZ")));
        assert!(!validator.validate(48.85, 2.35, Some("ZZ")));
    }

    #[test]
    fn test_swapped_coordinates_rejected() {
        assert!(!GeographicValidator::new().validate(-46.6333, -23.5505, None));
    }

    #[test]
    fn test_every_state_box_sits_inside_brazil() {
        for (uf, bounds) in STATE_BOUNDS {
            assert!(bounds.min_lat >= BRAZIL_BOUNDS.min_lat, "{uf}");
            assert!(bounds.max_lat <= BRAZIL_BOUNDS.max_lat, "{uf}");
            assert!(bounds.min_lng >= BRAZIL_BOUNDS.min_lng, "{uf}");
            assert!(bounds.max_lng <= BRAZIL_BOUNDS.max_lng, "{uf}");
        }
        assert_eq!(STATE_BOUNDS.len(), 27);
    }

    #[test]
    fn test_rejection_reason() {
        let validator = GeographicValidator::new();
        assert!(validator.rejection_reason(-23.55, -46.63, Some("SP")).is_none());
        let reason = validator.rejection_reason(-22.9, -43.17, Some("SP")).unwrap();
        assert!(reason.contains("outside SP"));
    }
}
