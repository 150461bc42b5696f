use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::{selector, INITIAL_DATA_VAR};
use crate::db::ApartmentRecord;

static INITIAL_DATA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^\s*{}\s*=\s*", regex::escape(INITIAL_DATA_VAR))).unwrap()
});

/// Which key of the listing payload carries the district object.
/// Ekaterinburg listings use `district`; every other city uses `adminDistrict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistrictKey {
    District,
    AdminDistrict,
}

impl DistrictKey {
    pub fn for_slug(slug: &str) -> Self {
        match slug {
            "ekaterinburg" => DistrictKey::District,
            _ => DistrictKey::AdminDistrict,
        }
    }

    pub fn json_key(self) -> &'static str {
        match self {
            DistrictKey::District => "district",
            DistrictKey::AdminDistrict => "adminDistrict",
        }
    }
}

#[derive(Debug, Error)]
pub enum DetailError {
    #[error("no initial data script")]
    MissingScript,
    #[error("payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing {0}")]
    MissingField(&'static str),
    #[error("empty district name")]
    EmptyDistrict,
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },
}

#[derive(Deserialize)]
struct InitialData {
    #[serde(rename = "itemState")]
    item_state: ItemState,
}

#[derive(Deserialize)]
struct ItemState {
    item: Item,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Item {
    location: Location,
    floor_area_calculated: f64,
    price_value: f64,
    price_per_area_value: f64,
    // district / adminDistrict live here until the city strategy picks one
    #[serde(flatten)]
    rest: Map<String, Value>,
}

#[derive(Deserialize)]
struct Location {
    longitude: f64,
    latitude: f64,
}

#[derive(Deserialize)]
struct Named {
    name: String,
}

/// Listing page -> record, reading the district through the city's `key`.
/// Any failure yields `None`; partial records are never built.
pub fn extract_record(key: DistrictKey, html: &str) -> Option<ApartmentRecord> {
    match try_extract(key, html) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::trace!("Listing dropped: {}", e);
            None
        }
    }
}

fn try_extract(key: DistrictKey, html: &str) -> Result<ApartmentRecord, DetailError> {
    let payload = initial_data(html).ok_or(DetailError::MissingScript)?;
    let data: InitialData = serde_json::from_str(&payload)?;
    let mut item = data.item_state.item;

    let district_field = key.json_key();
    let named: Named = serde_json::from_value(
        item.rest
            .remove(district_field)
            .ok_or(DetailError::MissingField(district_field))?,
    )?;
    let district = named
        .name
        .split_whitespace()
        .next()
        .ok_or(DetailError::EmptyDistrict)?
        .to_string();

    Ok(ApartmentRecord {
        district,
        longitude: item.location.longitude,
        latitude: item.location.latitude,
        area: positive("floorAreaCalculated", item.floor_area_calculated)?,
        price: positive("priceValue", item.price_value)?,
        price_per_meter: positive("pricePerAreaValue", item.price_per_area_value)?,
    })
}

/// JSON text assigned to the initial-data variable, if the page has it.
fn initial_data(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    doc.select(&selector("script")).find_map(|script| {
        let text: String = script.text().collect();
        let m = INITIAL_DATA_RE.find(&text)?;
        Some(text[m.end()..].trim_end().trim_end_matches(';').to_string())
    })
}

fn positive(field: &'static str, value: f64) -> Result<f64, DetailError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(DetailError::NotPositive { field, value })
    }
}

#[cfg(test)]
pub(crate) fn listing_payload(district_key: &str, district: &str, seed: f64) -> Value {
    serde_json::json!({
        "itemState": {
            "item": {
                "id": "abc",
                district_key: { "id": 7, "name": district },
                "location": { "longitude": 60.6 + seed, "latitude": 56.8 + seed },
                "floorAreaCalculated": 40.0 + seed,
                "priceValue": 4_000_000.0 + seed,
                "pricePerAreaValue": 100_000.0 + seed
            }
        },
        "otherState": {}
    })
}

#[cfg(test)]
pub(crate) fn listing_html(payload: &Value) -> String {
    format!(
        r#"<html><head>
        <script>var analytics = {{}};</script>
        <script>window.__INITIAL_DATA__ = {};</script>
        </head><body></body></html>"#,
        payload
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const EKB: DistrictKey = DistrictKey::District;

    fn remove_path(v: &mut Value, path: &[&str]) {
        let (last, parents) = path.split_last().unwrap();
        let mut cur = v;
        for p in parents {
            cur = cur.get_mut(*p).unwrap();
        }
        cur.as_object_mut().unwrap().remove(*last);
    }

    #[test]
    fn complete_payload_matches_inputs() {
        let html = listing_html(&listing_payload("district", "Verkh-Isetsky district", 0.0));
        let r = extract_record(EKB, &html).unwrap();
        assert_eq!(
            r,
            ApartmentRecord {
                district: "Verkh-Isetsky".into(),
                longitude: 60.6,
                latitude: 56.8,
                area: 40.0,
                price: 4_000_000.0,
                price_per_meter: 100_000.0,
            }
        );
    }

    #[test]
    fn other_cities_read_admin_district() {
        let html = listing_html(&listing_payload("adminDistrict", "Central AO", 0.0));
        assert_eq!(extract_record(DistrictKey::for_slug("moscow"), &html).unwrap().district, "Central");
        // ekaterinburg strategy looks for `district` and finds nothing
        assert!(extract_record(EKB, &html).is_none());
    }

    #[test]
    fn any_missing_field_drops_record() {
        let root = ["itemState", "item"];
        let paths: [&[&str]; 6] = [
            &["district"],
            &["location", "longitude"],
            &["location", "latitude"],
            &["floorAreaCalculated"],
            &["priceValue"],
            &["pricePerAreaValue"],
        ];
        for tail in paths {
            let mut payload = listing_payload("district", "Leninsky", 1.0);
            let path: Vec<&str> = root.iter().chain(tail.iter()).copied().collect();
            remove_path(&mut payload, &path);
            assert!(
                extract_record(EKB, &listing_html(&payload)).is_none(),
                "record built without {:?}",
                tail
            );
        }
    }

    #[test]
    fn missing_district_name_drops_record() {
        let mut payload = listing_payload("district", "Leninsky", 0.0);
        remove_path(&mut payload, &["itemState", "item", "district", "name"]);
        assert!(extract_record(EKB, &listing_html(&payload)).is_none());
    }

    #[test]
    fn wrong_types_drop_record() {
        let mut payload = listing_payload("district", "Leninsky", 0.0);
        payload["itemState"]["item"]["priceValue"] = Value::String("4 000 000".into());
        assert!(extract_record(EKB, &listing_html(&payload)).is_none());

        let mut payload = listing_payload("district", "Leninsky", 0.0);
        payload["itemState"]["item"]["district"] = Value::Null;
        assert!(extract_record(EKB, &listing_html(&payload)).is_none());
    }

    #[test]
    fn blank_district_and_zero_area_rejected() {
        let html = listing_html(&listing_payload("district", "   ", 0.0));
        assert!(matches!(
            try_extract(DistrictKey::District, &html),
            Err(DetailError::EmptyDistrict)
        ));

        let mut payload = listing_payload("district", "Leninsky", 0.0);
        payload["itemState"]["item"]["floorAreaCalculated"] = serde_json::json!(0);
        assert!(matches!(
            try_extract(DistrictKey::District, &listing_html(&payload)),
            Err(DetailError::NotPositive { field: "floorAreaCalculated", .. })
        ));
    }

    #[test]
    fn integer_numbers_accepted() {
        let mut payload = listing_payload("district", "Leninsky", 0.0);
        payload["itemState"]["item"]["priceValue"] = serde_json::json!(5_500_000);
        let r = extract_record(EKB, &listing_html(&payload)).unwrap();
        assert_eq!(r.price, 5_500_000.0);
    }

    #[test]
    fn page_without_script_or_with_bad_json_is_none() {
        assert!(matches!(
            try_extract(DistrictKey::District, "<html><script>var x = 1;</script></html>"),
            Err(DetailError::MissingScript)
        ));
        let html = "<script>window.__INITIAL_DATA__ = {\"itemState\": </script>";
        assert!(matches!(
            try_extract(DistrictKey::District, html),
            Err(DetailError::Json(_))
        ));
    }

    #[test]
    fn strategy_keyed_by_slug() {
        assert_eq!(DistrictKey::for_slug("ekaterinburg"), DistrictKey::District);
        assert_eq!(DistrictKey::for_slug("saint_petersburg"), DistrictKey::AdminDistrict);
        assert_eq!(DistrictKey::AdminDistrict.json_key(), "adminDistrict");
    }
}
