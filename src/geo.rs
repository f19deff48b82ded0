//! Flat GeoIP2 record view
//!
//! GeoIP2/GeoLite2 City and Country records nest localized names several
//! levels deep. `GeoSummary` pulls out the handful of fields most callers
//! want. Fields that are missing or stored with an unexpected type are `None`.

use crate::data_section::Value;
use serde::Serialize;

/// Language used when the caller does not pick one
pub const DEFAULT_LANGUAGE: &str = "en";

/// Commonly used fields of a GeoIP2 record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeoSummary {
    /// `city.names.<lang>`
    pub city: Option<String>,
    /// `country.names.<lang>`
    pub country: Option<String>,
    /// `country.iso_code`
    pub country_code: Option<String>,
    /// `continent.names.<lang>`
    pub continent: Option<String>,
    /// `location.latitude`
    pub latitude: Option<f64>,
    /// `location.longitude`
    pub longitude: Option<f64>,
    /// `postal.code`
    pub postcode: Option<String>,
}

impl GeoSummary {
    /// Extract the summary from a decoded record.
    ///
    /// ```
    /// use mmdb::{GeoSummary, Value};
    ///
    /// let summary = GeoSummary::from_record(&Value::Boolean(true), "en");
    /// assert_eq!(summary, GeoSummary::default());
    /// ```
    pub fn from_record(record: &Value, language: &str) -> Self {
        Self {
            city: string_at(record, ["city", "names", language]),
            country: string_at(record, ["country", "names", language]),
            country_code: string_at(record, ["country", "iso_code"]),
            continent: string_at(record, ["continent", "names", language]),
            latitude: double_at(record, ["location", "latitude"]),
            longitude: double_at(record, ["location", "longitude"]),
            postcode: string_at(record, ["postal", "code"]),
        }
    }

    /// True if no field was found
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn string_at<const N: usize>(record: &Value, path: [&str; N]) -> Option<String> {
    match record.get_path(path)? {
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn double_at<const N: usize>(record: &Value, path: [&str; N]) -> Option<f64> {
    match record.get_path(path)? {
        Value::Double(d) => Some(*d),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn map(entries: Vec<(&str, Value)>) -> Value {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn text(s: &str) -> Value {
        Value::String(s.to_string())
    }

    fn city_record() -> Value {
        map(vec![
            (
                "city",
                map(vec![(
                    "names",
                    map(vec![("en", text("London")), ("de", text("London"))]),
                )]),
            ),
            (
                "country",
                map(vec![
                    ("iso_code", text("GB")),
                    (
                        "names",
                        map(vec![
                            ("en", text("United Kingdom")),
                            ("de", text("Vereinigtes Königreich")),
                        ]),
                    ),
                ]),
            ),
            (
                "continent",
                map(vec![("names", map(vec![("en", text("Europe"))]))]),
            ),
            (
                "location",
                map(vec![
                    ("latitude", Value::Double(51.5142)),
                    ("longitude", Value::Double(-0.0931)),
                ]),
            ),
            ("postal", map(vec![("code", text("EC2V"))])),
        ])
    }

    #[test]
    fn test_full_record() {
        let summary = GeoSummary::from_record(&city_record(), DEFAULT_LANGUAGE);
        assert_eq!(summary.city.as_deref(), Some("London"));
        assert_eq!(summary.country.as_deref(), Some("United Kingdom"));
        assert_eq!(summary.country_code.as_deref(), Some("GB"));
        assert_eq!(summary.continent.as_deref(), Some("Europe"));
        assert_eq!(summary.latitude, Some(51.5142));
        assert_eq!(summary.longitude, Some(-0.0931));
        assert_eq!(summary.postcode.as_deref(), Some("EC2V"));
        assert!(!summary.is_empty());
    }

    #[test]
    fn test_other_language() {
        let summary = GeoSummary::from_record(&city_record(), "de");
        assert_eq!(summary.country.as_deref(), Some("Vereinigtes Königreich"));
        // No German continent name in the record
        assert_eq!(summary.continent, None);
        // Language-independent fields are unaffected
        assert_eq!(summary.country_code.as_deref(), Some("GB"));
    }

    #[test]
    fn test_unexpected_types_are_none() {
        let record = map(vec![
            ("postal", map(vec![("code", Value::Uint32(10115))])),
            ("location", map(vec![("latitude", Value::Float(52.5))])),
        ]);
        let summary = GeoSummary::from_record(&record, DEFAULT_LANGUAGE);
        assert_eq!(summary.postcode, None);
        assert_eq!(summary.latitude, None);
        assert!(summary.is_empty());
    }
}
