use crate::error::{Result, ScrapeError};
use crate::parser::detail::DistrictKey;

pub const SITE_ROOT: &str = "https://www.domofond.ru/";

#[derive(Debug, Clone, PartialEq)]
pub struct City {
    /// Short name used on the command line ("ekb").
    pub key: String,
    /// Table name and strategy selector ("ekaterinburg").
    pub slug: String,
    pub site_root: String,
    pub search_url: String,
    /// (latitude, longitude) of the map center.
    pub center: (f64, f64),
    pub district_key: DistrictKey,
}

impl City {
    pub fn new(key: &str, slug: &str, site_root: &str, search_url: &str, center: (f64, f64)) -> Result<Self> {
        if !is_valid_slug(slug) {
            return Err(ScrapeError::InvalidTableName(slug.to_string()));
        }
        Ok(Self {
            key: key.to_string(),
            slug: slug.to_string(),
            site_root: site_root.to_string(),
            search_url: search_url.to_string(),
            center,
            district_key: DistrictKey::for_slug(slug),
        })
    }
}

/// Slugs double as SQLite table names, so they are kept to `[a-z0-9_]`.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && !slug.starts_with(|c: char| c.is_ascii_digit())
        && slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub struct CityRegistry {
    cities: Vec<City>,
}

impl CityRegistry {
    pub fn new(cities: Vec<City>) -> Self {
        Self { cities }
    }

    pub fn builtin() -> Result<Self> {
        let cities = vec![
            City::new(
                "ekb",
                "ekaterinburg",
                SITE_ROOT,
                &format!("{SITE_ROOT}prodazha-kvartiry-ekaterinburg-c2653"),
                (56.839103, 60.60825),
            )?,
            City::new(
                "msk",
                "moscow",
                SITE_ROOT,
                &format!("{SITE_ROOT}prodazha-kvartiry-moskva-c3584"),
                (55.751615, 37.618701),
            )?,
            City::new(
                "spb",
                "saint_petersburg",
                SITE_ROOT,
                &format!("{SITE_ROOT}prodazha-kvartiry-sankt_peterburg-c3414"),
                (59.939366, 30.315363),
            )?,
        ];
        Ok(Self::new(cities))
    }

    pub fn get(&self, key: &str) -> Result<&City> {
        self.cities
            .iter()
            .find(|c| c.key == key)
            .ok_or_else(|| ScrapeError::UnknownCity(key.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &City> {
        self.cities.iter()
    }
}
