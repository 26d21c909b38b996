//! Static registry of votable countries.
//!
//! The deployment works over a fixed set of 20 countries. Each entry
//! carries the ISO alpha-3 code used as the tally key, the display name,
//! and the alpha-2 code used to locate map elements.

/// A votable country
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Country {
    /// ISO alpha-3 code, the canonical tally key
    pub code: &'static str,
    /// Display name
    pub name: &'static str,
    /// ISO alpha-2 code for map element lookup
    pub alpha2: &'static str,
}

/// The configured country set, in canonical table order
pub const COUNTRIES: [Country; 20] = [
    Country { code: "RUS", name: "Россия", alpha2: "RU" },
    Country { code: "BLR", name: "Беларусь", alpha2: "BY" },
    Country { code: "KAZ", name: "Казахстан", alpha2: "KZ" },
    Country { code: "UZB", name: "Узбекистан", alpha2: "UZ" },
    Country { code: "KGZ", name: "Кыргызстан", alpha2: "KG" },
    Country { code: "UKR", name: "Украина", alpha2: "UA" },
    Country { code: "GBR", name: "Великобритания", alpha2: "GB" },
    Country { code: "SWE", name: "Швеция", alpha2: "SE" },
    Country { code: "AUT", name: "Австрия", alpha2: "AT" },
    Country { code: "DEU", name: "Германия", alpha2: "DE" },
    Country { code: "ITA", name: "Италия", alpha2: "IT" },
    Country { code: "FRA", name: "Франция", alpha2: "FR" },
    Country { code: "CHN", name: "Китай", alpha2: "CN" },
    Country { code: "HKG", name: "Гонконг", alpha2: "HK" },
    Country { code: "SGP", name: "Сингапур", alpha2: "SG" },
    Country { code: "MYS", name: "Малайзия", alpha2: "MY" },
    Country { code: "KOR", name: "Корея", alpha2: "KR" },
    Country { code: "JPN", name: "Япония", alpha2: "JP" },
    Country { code: "EGY", name: "Египет", alpha2: "EG" },
    Country { code: "ARE", name: "ОАЭ", alpha2: "AE" },
];

/// Look up a country by alpha-3 code
pub fn find(code: &str) -> Option<&'static Country> {
    COUNTRIES.iter().find(|c| c.code == code)
}

/// Whether the code belongs to the configured set
pub fn is_known(code: &str) -> bool {
    find(code).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_known_country() {
        let c = find("RUS").unwrap();
        assert_eq!(c.name, "Россия");
        assert_eq!(c.alpha2, "RU");
    }

    #[test]
    fn test_unknown_code() {
        assert!(find("ZZZ").is_none());
        assert!(!is_known("rus")); // codes are case-sensitive
        assert!(is_known("ARE"));
    }

    #[test]
    fn test_registry_has_no_duplicates() {
        for (i, a) in COUNTRIES.iter().enumerate() {
            for b in COUNTRIES.iter().skip(i + 1) {
                assert_ne!(a.code, b.code);
                assert_ne!(a.alpha2, b.alpha2);
            }
        }
    }
}
