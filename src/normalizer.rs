//! Address cleaning and canonicalization for Brazilian addresses.
//!
//! CRM records carry addresses in many shapes:
//! - Abbreviated street types: `"R. Augusta, 100"`, `"Av Paulista 1578"`
//! - Unit noise: `"Rua X, 10 - Apto 52 Bloco B"`
//! - Accents and mixed case: `"Praça da Sé"`, `"SÃO PAULO"`
//! - Formatted CEPs: `"01305-100"`, `"01.305-100"`
//!
//! Everything is folded to uppercase ASCII so the same place always yields
//! the same cache key.

use crate::models::GeocodeQuery;
use regex::Regex;
use std::sync::LazyLock;

/// Punctuation that never helps matching.
static PUNCTUATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[.,;:#'"/\\()\-ºª°]+"#).expect("valid regex"));

/// Collapses runs of whitespace.
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("valid regex"));

/// Apartment / block / complement noise, from the marker to the end.
static UNIT_NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s+(?:APTO|APT|AP|CONJ|CJ)\b.*$|\s+(?:CASA|SALA|LOJA|BLOCO|BL)\s*\d.*$")
        .expect("valid regex")
});

/// `N 100` / `NO 100` left over from `nº 100`.
static NUMBER_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bN[O]?\s+(\d)").expect("valid regex"));

/// Street-type abbreviations, only expanded as the first token.
const STREET_TYPES: &[(&str, &str)] = &[
    ("R", "RUA"),
    ("AV", "AVENIDA"),
    ("AVN", "AVENIDA"),
    ("AL", "ALAMEDA"),
    ("TV", "TRAVESSA"),
    ("TRAV", "TRAVESSA"),
    ("EST", "ESTRADA"),
    ("PCA", "PRACA"),
    ("PC", "PRACA"),
    ("ROD", "RODOVIA"),
    ("LGO", "LARGO"),
];

/// Title abbreviations expanded anywhere in the street name.
const TITLES: &[(&str, &str)] = &[
    ("DR", "DOUTOR"),
    ("PROF", "PROFESSOR"),
    ("STA", "SANTA"),
    ("STO", "SANTO"),
    ("PRES", "PRESIDENTE"),
    ("ENG", "ENGENHEIRO"),
];

/// Full state names (accent-folded) to UF codes.
const STATE_NAMES: &[(&str, &str)] = &[
    ("ACRE", "AC"),
    ("ALAGOAS", "AL"),
    ("AMAPA", "AP"),
    ("AMAZONAS", "AM"),
    ("BAHIA", "BA"),
    ("CEARA", "CE"),
    ("DISTRITO FEDERAL", "DF"),
    ("ESPIRITO SANTO", "ES"),
    ("GOIAS", "GO"),
    ("MARANHAO", "MA"),
    ("MATO GROSSO", "MT"),
    ("MATO GROSSO DO SUL", "MS"),
    ("MINAS GERAIS", "MG"),
    ("PARA", "PA"),
    ("PARAIBA", "PB"),
    ("PARANA", "PR"),
    ("PERNAMBUCO", "PE"),
    ("PIAUI", "PI"),
    ("RIO DE JANEIRO", "RJ"),
    ("RIO GRANDE DO NORTE", "RN"),
    ("RIO GRANDE DO SUL", "RS"),
    ("RONDONIA", "RO"),
    ("RORAIMA", "RR"),
    ("SANTA CATARINA", "SC"),
    ("SAO PAULO", "SP"),
    ("SERGIPE", "SE"),
    ("TOCANTINS", "TO"),
];

/// Replaces Portuguese diacritics with their ASCII base letter.
pub fn fold_accents(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'Ç' => 'C',
            'ç' => 'c',
            'Ñ' => 'N',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

/// Uppercase, accent-folded, punctuation-free, single-spaced text.
pub fn normalize_text(input: &str) -> String {
    let folded = fold_accents(&input.to_uppercase());
    let no_punct = PUNCTUATION_RE.replace_all(&folded, " ");
    WHITESPACE_RE
        .replace_all(no_punct.trim(), " ")
        .trim()
        .to_string()
}

/// Normalizes a street line: expands abbreviations and drops unit noise.
pub fn normalize_street(street: &str) -> String {
    let text = normalize_text(street);
    let text = NUMBER_MARKER_RE.replace_all(&text, "$1");
    let text = UNIT_NOISE_RE.replace(&text, "");

    let mut tokens: Vec<&str> = text.split_whitespace().collect();
    if let Some(first) = tokens.first_mut() {
        if let Some(&(_, full)) = STREET_TYPES.iter().find(|(abbr, _)| *abbr == *first) {
            *first = full;
        }
    }
    tokens
        .into_iter()
        .map(expand_title)
        .collect::<Vec<_>>()
        .join(" ")
}

fn expand_title(token: &str) -> &str {
    TITLES
        .iter()
        .find(|(abbr, _)| *abbr == token)
        .map(|&(_, full)| full)
        .unwrap_or(token)
}

/// Cleans a CEP to its 8 digits.
///
/// Formatting characters (space, `-`, `.`) are dropped; anything else that
/// is not a digit, or a digit count other than 8, makes the CEP malformed.
pub fn clean_cep(raw: &str) -> Option<String> {
    let mut digits = String::with_capacity(8);
    for c in raw.trim().chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '.' => {}
            _ => return None,
        }
    }
    if digits.len() == 8 && digits != "00000000" {
        Some(digits)
    } else {
        None
    }
}

pub fn is_valid_cep(raw: &str) -> bool {
    clean_cep(raw).is_some()
}

/// Normalizes a state to its two-letter UF code. Accepts full names.
pub fn normalize_state(raw: &str) -> Option<String> {
    let text = normalize_text(raw);
    if text.len() == 2 && STATE_NAMES.iter().any(|(_, uf)| *uf == text) {
        return Some(text);
    }
    STATE_NAMES
        .iter()
        .find(|(name, _)| *name == text)
        .map(|(_, uf)| uf.to_string())
}

/// True when a street line has enough letters to be worth geocoding.
pub fn is_usable_street(street: &str) -> bool {
    normalize_street(street)
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .count()
        >= 3
}

/// Builds the one-line address text sent to address providers.
pub fn build_address_line(
    street: Option<&str>,
    district: Option<&str>,
    city: Option<&str>,
    state: Option<&str>,
) -> String {
    let street = street.map(normalize_street);
    let district = district.map(normalize_text);
    let city = city.map(normalize_text);
    let state = state.and_then(normalize_state);

    [street, district, city, state]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Stable cache key for a query: normalized address plus cleaned CEP.
pub fn cache_key(query: &GeocodeQuery) -> String {
    let address = normalize_text(&query.address);
    match query.valid_cep() {
        Some(cep) if address.is_empty() => format!("CEP {}", cep),
        Some(cep) => format!("{} CEP {}", address, cep),
        None => address,
    }
}

/// Key used by the static city table: `"city,uf"` folded to lowercase ASCII.
pub fn city_key(city: &str, state: &str) -> String {
    let uf = normalize_state(state).unwrap_or_else(|| normalize_text(state));
    format!("{},{}", normalize_text(city), uf).to_lowercase()
}
