use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::geo::DirectionsApi;
use crate::models::{Coordinate, Listing};
use crate::providers::traits::ListingProvider;
use crate::providers::types::FilterCriteria;

/// Credentials and target city for the ImmobilienScout24 provider.
#[derive(Debug, Clone)]
pub struct ImmobilienScoutConfig {
    pub client_key: String,
    pub client_secret: String,
    pub google_api_key: String,
    pub city: String,
}

/// The unofficial search endpoint used by the website itself.
const SEARCH_URL: &str = "http://www.immobilienscout24.de/Suche/controller/asyncResults.go?searchUrl=/Suche/S-2/P-{page}/Wohnung-Miete/{city}/{city}/-/{min_rooms}-{max_rooms}/{min_size}-/EURO--{max_rent}/-/128,117,127,118,6,7,40,8,3,113";

const EXPOSE_URL: &str = "https://rest.immobilienscout24.de/restapi/api/search/v1.0/expose/";

const EXPOSE_BASE_URL: &str = "http://www.immobilienscout24.de/expose/";

/// The source caps search results at a few pages; fetching more would only
/// waste API calls.
const MAX_SEARCH_PAGES: u32 = 9;

/// Fetches one page of raw search results as JSON.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchApi: Send + Sync {
    async fn search_page(&self, url: &str) -> Result<Value>;
}

/// Fetches the detail ("expose") record for one listing as JSON.
/// Returns the inner `expose.expose` body.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExposeApi: Send + Sync {
    async fn listing_details(&self, id: &str) -> Result<Value>;
}

pub struct HttpSearchApi {
    client: Client,
}

impl HttpSearchApi {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36")
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl SearchApi for HttpSearchApi {
    async fn search_page(&self, url: &str) -> Result<Value> {
        debug!("Fetching search page: {}", url);
        self.client
            .get(url)
            .send()
            .await
            .context("Failed to fetch search page")?
            .json()
            .await
            .context("Failed to decode search response")
    }
}

/// OAuth1-signed client for the official expose API.
pub struct OauthExposeApi {
    client: Client,
    client_key: String,
    client_secret: String,
}

impl OauthExposeApi {
    pub fn new(client_key: String, client_secret: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            client_key,
            client_secret,
        })
    }
}

#[async_trait]
impl ExposeApi for OauthExposeApi {
    async fn listing_details(&self, id: &str) -> Result<Value> {
        let url = format!("{}{}", EXPOSE_URL, id);
        let token = oauth1_request::Token::from_parts(
            self.client_key.as_str(),
            self.client_secret.as_str(),
            "",
            "",
        );
        let authorization = oauth1_request::get(&url, &(), &token, oauth1_request::HMAC_SHA1);

        debug!("Fetching expose {}", id);
        let response: Value = self
            .client
            .get(&url)
            .header(AUTHORIZATION, authorization)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("Failed to fetch expose {}", id))?
            .json()
            .await
            .with_context(|| format!("Failed to decode expose {}", id))?;

        response
            .get("expose.expose")
            .cloned()
            .with_context(|| format!("Expose {} has no expose.expose body", id))
    }
}

/// ImmobilienScout24 provider: raw search pages, cheap pre-filter, per-listing
/// detail and commute enrichment, shared final filter.
pub struct ImmobilienScoutProvider<S, E, D> {
    criteria: FilterCriteria,
    city: String,
    search_api: S,
    expose_api: E,
    directions_api: D,
}

impl
    ImmobilienScoutProvider<
        HttpSearchApi,
        OauthExposeApi,
        crate::geo::GoogleDirectionsApi,
    >
{
    pub fn new(config: ImmobilienScoutConfig, criteria: FilterCriteria) -> Result<Self> {
        let search_api = HttpSearchApi::new()?;
        let expose_api = OauthExposeApi::new(config.client_key, config.client_secret)?;
        let directions_api = crate::geo::GoogleDirectionsApi::new(config.google_api_key)?;

        Ok(Self::with_clients(
            criteria,
            config.city,
            search_api,
            expose_api,
            directions_api,
        ))
    }
}

impl<S, E, D> ImmobilienScoutProvider<S, E, D>
where
    S: SearchApi,
    E: ExposeApi,
    D: DirectionsApi,
{
    pub fn with_clients(
        criteria: FilterCriteria,
        city: String,
        search_api: S,
        expose_api: E,
        directions_api: D,
    ) -> Self {
        Self {
            criteria,
            city,
            search_api,
            expose_api,
            directions_api,
        }
    }

    /// Templated search URL for one page. The site expects German decimal
    /// commas in numeric bounds.
    fn search_url(&self, page: u32) -> String {
        SEARCH_URL
            .replace("{page}", &page.to_string())
            .replace("{city}", &self.city)
            .replace(
                "{max_rent}",
                &decimal_comma(self.criteria.max_rent.unwrap_or(999_999.0)),
            )
            .replace("{min_size}", &decimal_comma(self.criteria.min_size))
            .replace("{min_rooms}", &decimal_comma(self.criteria.min_room_count))
            .replace(
                "{max_rooms}",
                &decimal_comma(self.criteria.max_room_count.unwrap_or(999_999.0)),
            )
    }

    /// Fetches and parses one page of raw search results.
    async fn results_page(&self, page: u32) -> Result<Vec<Listing>> {
        let url = self.search_url(page);
        let response = self.search_api.search_page(&url).await?;

        let records = response["searchResult"]["results"]
            .as_array()
            .context("Search response has no searchResult.results array")?;

        records.iter().map(listing_from_search_result).collect()
    }

    /// Filter what can be filtered with the incomplete listings, to reduce
    /// the number of detail API calls. Checks neither total rent, commute,
    /// floor nor publish date; those are unknown at this stage.
    pub fn prefiltered_results(&self, results: Vec<Listing>) -> Vec<Listing> {
        results
            .into_iter()
            .filter(|listing| {
                self.criteria
                    .max_rent
                    .map_or(true, |max| listing.base_rent <= max)
                    && self.criteria.within_room_bounds(listing)
                    && self.criteria.within_distance_bound(listing)
                    && listing.size >= self.criteria.min_size
            })
            .collect()
    }

    /// Enriches each pre-filtered listing, in order, with detail and commute
    /// data.
    ///
    /// Once a listing older than `published_after` turns up, processing stops
    /// entirely and all subsequent listings are discarded. This assumes the
    /// source returns results newest-first; it is an API-usage optimization,
    /// not a correctness guarantee.
    pub async fn extended_results(&self, results: Vec<Listing>) -> Result<Vec<Listing>> {
        let mut extended = Vec::new();

        for mut listing in results {
            let details = self.expose_api.listing_details(&listing.id).await?;
            apply_expose_details(&mut listing, &details)?;

            if let Some(published) = listing.date_published {
                if published < self.criteria.published_after {
                    info!(
                        "Listing {} published {} is too old, stopping enrichment",
                        listing.id, published
                    );
                    break;
                }
            }

            let destination = listing
                .geolocation
                .map(|g| g.to_param())
                .unwrap_or_else(|| listing.address.clone());
            let commute = self
                .directions_api
                .commute_information(&self.criteria.near.to_param(), &destination)
                .await?;
            if let Some(commute) = commute {
                listing.commute_duration = Some(commute.duration_seconds as f64 / 60.0);
                listing.commute_summary = Some(commute.summary);
            }

            extended.push(listing);
        }

        Ok(extended)
    }
}

#[async_trait]
impl<S, E, D> ListingProvider for ImmobilienScoutProvider<S, E, D>
where
    S: SearchApi,
    E: ExposeApi,
    D: DirectionsApi,
{
    fn criteria(&self) -> &FilterCriteria {
        &self.criteria
    }

    async fn get_results(&self) -> Result<Vec<Listing>> {
        info!(
            "Fetching up to {} search pages for {}",
            MAX_SEARCH_PAGES, self.city
        );

        let mut results = Vec::new();
        for page in 1..=MAX_SEARCH_PAGES {
            results.extend(self.results_page(page).await?);
        }
        info!("Fetched {} raw listings", results.len());

        let prefiltered = self.prefiltered_results(results);
        info!("{} listings passed the pre-filter", prefiltered.len());

        let extended = self.extended_results(prefiltered).await?;

        Ok(self.filtered_results(extended).collect())
    }

    fn source_name(&self) -> &'static str {
        "ImmobilienScout24"
    }
}

/// Renders a numeric URL parameter with a German decimal comma.
fn decimal_comma(value: f64) -> String {
    value.to_string().replace('.', ",")
}

/// Parses a German locale-formatted number such as "1.084,98 €" or "84,71 m²".
pub fn parse_german_decimal(raw: &str) -> Result<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    cleaned
        .replace('.', "")
        .replace(',', ".")
        .parse()
        .with_context(|| format!("Unparseable number {:?}", raw))
}

/// Builds a listing from one raw search record. Only the fields available in
/// bulk search results are filled; the rest comes from detail enrichment.
fn listing_from_search_result(record: &Value) -> Result<Listing> {
    let id = match &record["id"] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => bail!("Search result has no id"),
    };

    let room_count = parse_german_decimal(search_attribute(record, "Zimmer")?)?;
    let base_rent = parse_german_decimal(search_attribute(record, "Kaltmiete")?)?;
    let size = parse_german_decimal(search_attribute(record, "Wohnfläche")?)?;

    let address = record["address"]
        .as_str()
        .context("Search result has no address")?
        .to_string();

    // The search result links scaled-down pictures; truncating at /ORIG/
    // yields the full-size URL without an extra API call.
    let pictures = record["pictureUrls"]
        .as_array()
        .map(|urls| {
            urls.iter()
                .filter_map(Value::as_str)
                .map(|url| match url.find("/ORIG/") {
                    Some(at) => url[..at + "/ORIG/".len()].to_string(),
                    None => url.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let geolocation = match (record["latitude"].as_f64(), record["longitude"].as_f64()) {
        (Some(lat), Some(lng)) => Some(Coordinate { lat, lng }),
        _ => None,
    };

    Ok(Listing {
        url: format!("{}{}", EXPOSE_BASE_URL, id),
        id,
        address,
        pictures,
        geolocation,
        base_rent,
        room_count,
        size,
        ..Default::default()
    })
}

fn search_attribute<'a>(record: &'a Value, title: &str) -> Result<&'a str> {
    record["attributes"]
        .as_array()
        .context("Search result has no attributes")?
        .iter()
        .find(|attribute| attribute["title"].as_str() == Some(title))
        .and_then(|attribute| attribute["value"].as_str())
        .with_context(|| format!("Search result is missing the {:?} attribute", title))
}

/// Fills a listing with data from its expose record: floor, authoritative
/// rents, availability and publish date. A malformed record fails the run.
fn apply_expose_details(listing: &mut Listing, expose: &Value) -> Result<()> {
    let real_estate = &expose["realEstate"];

    listing.floor = real_estate["floor"].as_i64();
    listing.floor_count = real_estate["numberOfFloors"].as_i64();

    listing.base_rent = real_estate["baseRent"]
        .as_f64()
        .with_context(|| format!("Expose {} has no baseRent", listing.id))?;
    listing.total_rent = real_estate["totalRent"]
        .as_f64()
        .unwrap_or(listing.base_rent);

    // freeFrom is free text upstream; anything that does not start with an
    // ISO date is treated as unknown.
    listing.available_from = real_estate["freeFrom"]
        .as_str()
        .and_then(|raw| NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok());

    let published = expose["@publishDate"]
        .as_str()
        .with_context(|| format!("Expose {} has no publish date", listing.id))?;
    listing.date_published = Some(parse_publish_date(published)?);

    Ok(())
}

/// The publish date carries a numeric timezone offset, with or without a
/// colon depending on the API version.
fn parse_publish_date(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|date| date.with_timezone(&Utc))
        .with_context(|| format!("Unparseable publish date {:?}", raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{CommuteInfo, MockDirectionsApi};
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn test_criteria() -> FilterCriteria {
        FilterCriteria {
            max_rent: Some(900.0),
            max_distance: Some(8_000.0),
            max_commute_duration: Some(30.0),
            near: Coordinate {
                lat: 52.5309272,
                lng: 13.382965,
            },
            ..Default::default()
        }
    }

    fn provider_with(
        criteria: FilterCriteria,
        search_api: MockSearchApi,
        expose_api: MockExposeApi,
        directions_api: MockDirectionsApi,
    ) -> ImmobilienScoutProvider<MockSearchApi, MockExposeApi, MockDirectionsApi> {
        ImmobilienScoutProvider::with_clients(
            criteria,
            "Berlin".to_string(),
            search_api,
            expose_api,
            directions_api,
        )
    }

    fn search_record(id: &str, rent: &str, lat: f64, lng: f64) -> Value {
        json!({
            "id": id,
            "address": "Torstraße 10, 10119 Berlin",
            "latitude": lat,
            "longitude": lng,
            "pictureUrls": [
                "https://pictures.example.com/123/ORIG/resize/300x200"
            ],
            "attributes": [
                { "title": "Kaltmiete", "value": rent },
                { "title": "Wohnfläche", "value": "54,71 m²" },
                { "title": "Zimmer", "value": "1,5" }
            ]
        })
    }

    fn expose_record(published: &str) -> Value {
        json!({
            "@publishDate": published,
            "realEstate": {
                "floor": 5,
                "numberOfFloors": 5,
                "baseRent": 650.0,
                "totalRent": 780.0,
                "freeFrom": "2016-03-01"
            }
        })
    }

    #[test]
    fn parses_german_locale_numbers() {
        assert_eq!(parse_german_decimal("1.084,98 €").unwrap(), 1084.98);
        assert_eq!(parse_german_decimal("84,71 m²").unwrap(), 84.71);
        assert_eq!(parse_german_decimal("1,5").unwrap(), 1.5);
        assert!(parse_german_decimal("k.A.").is_err());
    }

    #[test]
    fn search_url_uses_decimal_commas() {
        let criteria = FilterCriteria {
            max_rent: Some(850.5),
            min_room_count: 1.5,
            min_size: 40.0,
            ..Default::default()
        };
        let provider = provider_with(
            criteria,
            MockSearchApi::new(),
            MockExposeApi::new(),
            MockDirectionsApi::new(),
        );

        let url = provider.search_url(3);
        assert!(url.contains("/P-3/"), "{}", url);
        assert!(url.contains("/Berlin/Berlin/"), "{}", url);
        assert!(url.contains("EURO--850,5"), "{}", url);
        assert!(url.contains("/1,5-999999/"), "{}", url);
        assert!(url.contains("/40-/"), "{}", url);
    }

    #[test]
    fn builds_listing_from_search_record() {
        let listing =
            listing_from_search_result(&search_record("91124135", "650,00 €", 52.53, 13.38))
                .unwrap();

        assert_eq!(listing.id, "91124135");
        assert_eq!(listing.base_rent, 650.0);
        assert_eq!(listing.size, 54.71);
        assert_eq!(listing.room_count, 1.5);
        assert_eq!(
            listing.url,
            "http://www.immobilienscout24.de/expose/91124135"
        );
        assert_eq!(
            listing.pictures,
            vec!["https://pictures.example.com/123/ORIG/"]
        );
        assert_eq!(
            listing.geolocation,
            Some(Coordinate {
                lat: 52.53,
                lng: 13.38
            })
        );
        // Detail-only fields stay unset until enrichment.
        assert_eq!(listing.total_rent, 0.0);
        assert!(listing.date_published.is_none());
    }

    #[test]
    fn numeric_listing_ids_are_accepted() {
        let mut record = search_record("x", "650,00 €", 52.53, 13.38);
        record["id"] = json!(91124135);
        let listing = listing_from_search_result(&record).unwrap();
        assert_eq!(listing.id, "91124135");
    }

    #[test]
    fn applies_expose_details() {
        let mut listing = Listing {
            id: "91124135".to_string(),
            base_rent: 620.0,
            ..Default::default()
        };
        apply_expose_details(&mut listing, &expose_record("2016-02-01T10:22:33.000+01:00"))
            .unwrap();

        assert_eq!(listing.floor, Some(5));
        assert_eq!(listing.floor_count, Some(5));
        assert_eq!(listing.base_rent, 650.0);
        assert_eq!(listing.total_rent, 780.0);
        assert_eq!(
            listing.available_from,
            Some(NaiveDate::from_ymd_opt(2016, 3, 1).unwrap())
        );
        assert_eq!(
            listing.date_published,
            Some(Utc.with_ymd_and_hms(2016, 2, 1, 9, 22, 33).unwrap())
        );
    }

    #[test]
    fn total_rent_defaults_to_base_rent() {
        let mut expose = expose_record("2016-02-01T10:22:33.000+01:00");
        expose["realEstate"]
            .as_object_mut()
            .unwrap()
            .remove("totalRent");

        let mut listing = Listing::default();
        apply_expose_details(&mut listing, &expose).unwrap();
        assert_eq!(listing.total_rent, 650.0);
    }

    #[test]
    fn publish_date_offset_may_omit_the_colon() {
        let with_colon = parse_publish_date("2016-02-01T10:22:33.000+01:00").unwrap();
        let without_colon = parse_publish_date("2016-02-01T10:22:33.000+0100").unwrap();
        assert_eq!(with_colon, without_colon);
    }

    #[test]
    fn missing_base_rent_fails_the_run() {
        let mut expose = expose_record("2016-02-01T10:22:33.000+01:00");
        expose["realEstate"]
            .as_object_mut()
            .unwrap()
            .remove("baseRent");

        let mut listing = Listing::default();
        assert!(apply_expose_details(&mut listing, &expose).is_err());
    }

    #[test]
    fn prefilter_calls_no_detail_or_commute_services() {
        // Mocks without expectations panic on any call.
        let provider = provider_with(
            test_criteria(),
            MockSearchApi::new(),
            MockExposeApi::new(),
            MockDirectionsApi::new(),
        );

        let affordable = Listing {
            id: "a".to_string(),
            base_rent: 650.0,
            room_count: 2.0,
            size: 50.0,
            ..Default::default()
        };
        let too_expensive = Listing {
            id: "b".to_string(),
            base_rent: 1200.0,
            room_count: 2.0,
            size: 50.0,
            ..Default::default()
        };
        let too_far = Listing {
            id: "c".to_string(),
            base_rent: 650.0,
            room_count: 2.0,
            size: 50.0,
            geolocation: Some(Coordinate {
                lat: 52.4,
                lng: 13.6,
            }),
            ..Default::default()
        };

        let kept = provider.prefiltered_results(vec![affordable, too_expensive, too_far]);
        let ids: Vec<_> = kept.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[tokio::test]
    async fn enrichment_stops_at_the_first_stale_listing() {
        let cutoff = Utc.with_ymd_and_hms(2016, 2, 1, 0, 0, 0).unwrap();
        let criteria = FilterCriteria {
            published_after: cutoff,
            ..test_criteria()
        };

        let mut expose_api = MockExposeApi::new();
        // Only the first listing may be fetched; the stale date stops the
        // loop before the second one.
        expose_api
            .expect_listing_details()
            .times(1)
            .returning(|_| Ok(expose_record("2016-01-15T08:00:00.000+01:00")));

        let provider = provider_with(
            criteria,
            MockSearchApi::new(),
            expose_api,
            MockDirectionsApi::new(),
        );

        let stale = Listing {
            id: "old".to_string(),
            ..Default::default()
        };
        let never_reached = Listing {
            id: "newer".to_string(),
            ..Default::default()
        };

        let extended = provider
            .extended_results(vec![stale, never_reached])
            .await
            .unwrap();
        assert!(extended.is_empty());
    }

    #[tokio::test]
    async fn get_results_returns_only_the_matching_listing() {
        let page_one = json!({
            "searchResult": {
                "results": [
                    search_record("match", "650,00 €", 52.5325, 13.3846),
                    search_record("too-expensive", "1.084,98 €", 52.5325, 13.3846),
                    search_record("too-far", "650,00 €", 52.3, 13.8),
                ]
            }
        });
        let empty_page = json!({ "searchResult": { "results": [] } });

        let mut search_api = MockSearchApi::new();
        search_api
            .expect_search_page()
            .withf(|url: &str| url.contains("/P-1/"))
            .times(1)
            .returning(move |_| Ok(page_one.clone()));
        search_api
            .expect_search_page()
            .withf(|url: &str| !url.contains("/P-1/"))
            .times((MAX_SEARCH_PAGES - 1) as usize)
            .returning(move |_| Ok(empty_page.clone()));

        let published = (Utc::now() - Duration::days(2))
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, false);
        let mut expose_api = MockExposeApi::new();
        expose_api
            .expect_listing_details()
            .withf(|id: &str| id == "match")
            .times(1)
            .returning(move |_| Ok(expose_record(&published)));

        let mut directions_api = MockDirectionsApi::new();
        directions_api
            .expect_commute_information()
            .withf(|_origin: &str, destination: &str| destination == "52.5325,13.3846")
            .times(1)
            .returning(|_, _| {
                Ok(Some(CommuteInfo {
                    summary: vec!["U8".to_string()],
                    duration_seconds: 1500,
                }))
            });

        let provider = provider_with(test_criteria(), search_api, expose_api, directions_api);
        let results = provider.get_results().await.unwrap();

        assert_eq!(results.len(), 1);
        let listing = &results[0];
        assert_eq!(listing.id, "match");
        assert_eq!(listing.total_rent, 780.0);
        assert_eq!(listing.commute_duration, Some(25.0));
        assert_eq!(listing.commute_summary, Some(vec!["U8".to_string()]));
    }
}
