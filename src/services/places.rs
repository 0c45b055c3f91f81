//! 场馆搜索：Google Places（New）Text Search
//!
//! POST {base}/places:searchText，X-Goog-FieldMask 只取需要的字段；
//! priceLevel 字符串映射为 0..=4，servesVegetarianFood / wheelchairAccessibleEntrance / types 转为归一化标签。
//! demo 模式返回固定的示例场馆目录（与实时结果同形，source 标记为 "demo"）。

use std::collections::BTreeSet;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::traits::{http_client, http_error};
use super::{VenueQuery, VenueSource};
use crate::config::ServiceSection;
use crate::core::ServiceError;
use crate::plan::{normalize_tag, Venue};

const FIELD_MASK: &str = "places.id,places.displayName,places.formattedAddress,places.rating,\
places.priceLevel,places.currentOpeningHours,places.regularOpeningHours,places.internationalPhoneNumber,\
places.websiteUri,places.photos,places.types,places.primaryType,places.accessibilityOptions,\
places.location,places.servesVegetarianFood";

/// Places API 单次返回上限
const MAX_RESULT_COUNT: usize = 20;

pub struct PlacesService {
    client: Client,
    base_url: String,
    api_key: String,
    demo_mode: bool,
}

impl PlacesService {
    /// demo_mode 为 true 时不发起网络请求
    pub fn new(settings: &ServiceSection, demo_mode: bool) -> Self {
        Self {
            client: http_client(settings.timeout_secs),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone().unwrap_or_default(),
            demo_mode,
        }
    }

    pub fn demo() -> Self {
        Self::new(&crate::config::ServicesSection::default().places, true)
    }

    pub fn is_demo(&self) -> bool {
        self.demo_mode
    }

    async fn search_live(&self, query: &VenueQuery) -> Result<Vec<Venue>, ServiceError> {
        let url = format!("{}/places:searchText", self.base_url);
        let mut text_query = format!("{} {}", query.query, query.venue_type);
        let mut body = json!({
            "maxResultCount": query.max_results.clamp(1, MAX_RESULT_COUNT),
        });
        match (query.latitude, query.longitude) {
            (Some(lat), Some(lon)) => {
                body["locationBias"] = json!({
                    "circle": {
                        "center": { "latitude": lat, "longitude": lon },
                        "radius": query.radius_m as f64,
                    }
                });
            }
            _ => text_query = format!("{} in {}", text_query, query.city),
        }
        body["textQuery"] = json!(text_query);

        let resp = self
            .client
            .post(&url)
            .header("X-Goog-Api-Key", &self.api_key)
            .header("X-Goog-FieldMask", FIELD_MASK)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(http_error(resp).await);
        }
        let data: SearchTextResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))?;
        let venues: Vec<Venue> = data
            .places
            .into_iter()
            .map(|p| p.into_venue(&self.api_key))
            .collect();
        tracing::debug!(count = venues.len(), query = %text_query, "places search");
        Ok(venues)
    }
}

#[async_trait]
impl VenueSource for PlacesService {
    fn label(&self) -> &str {
        if self.demo_mode {
            "demo"
        } else {
            "google_places"
        }
    }

    async fn search(&self, query: &VenueQuery) -> Result<Vec<Venue>, ServiceError> {
        if query.query.trim().is_empty() {
            return Err(ServiceError::MissingParam("query"));
        }
        if self.demo_mode {
            return Ok(demo_search(query));
        }
        self.search_live(query).await
    }
}

#[derive(Debug, Deserialize, Default)]
struct SearchTextResponse {
    #[serde(default)]
    places: Vec<PlaceDto>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct PlaceDto {
    id: Option<String>,
    display_name: Option<LocalizedText>,
    formatted_address: Option<String>,
    rating: Option<f32>,
    price_level: Option<String>,
    current_opening_hours: Option<OpeningHoursDto>,
    regular_opening_hours: Option<OpeningHoursDto>,
    international_phone_number: Option<String>,
    website_uri: Option<String>,
    photos: Vec<PhotoDto>,
    types: Vec<String>,
    primary_type: Option<String>,
    accessibility_options: Option<AccessibilityDto>,
    location: Option<LatLng>,
    serves_vegetarian_food: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct LocalizedText {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct OpeningHoursDto {
    weekday_descriptions: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PhotoDto {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct AccessibilityDto {
    wheelchair_accessible_entrance: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct LatLng {
    latitude: f64,
    longitude: f64,
}

/// "PRICE_LEVEL_MODERATE" → 2
fn price_level_from_api(level: &str) -> Option<u8> {
    match level {
        "PRICE_LEVEL_FREE" => Some(0),
        "PRICE_LEVEL_INEXPENSIVE" => Some(1),
        "PRICE_LEVEL_MODERATE" => Some(2),
        "PRICE_LEVEL_EXPENSIVE" => Some(3),
        "PRICE_LEVEL_VERY_EXPENSIVE" => Some(4),
        _ => None,
    }
}

impl PlaceDto {
    fn into_venue(self, api_key: &str) -> Venue {
        let mut tags: BTreeSet<String> = self.types.iter().map(|t| normalize_tag(t)).collect();
        if self.serves_vegetarian_food == Some(true) {
            tags.insert("vegetarian".to_string());
        }
        if self.types.iter().any(|t| t == "vegan_restaurant") {
            tags.insert("vegan".to_string());
            tags.insert("vegetarian".to_string());
        }
        if self.types.iter().any(|t| t == "vegetarian_restaurant") {
            tags.insert("vegetarian".to_string());
        }
        if self
            .accessibility_options
            .as_ref()
            .and_then(|a| a.wheelchair_accessible_entrance)
            == Some(true)
        {
            tags.insert("wheelchair_accessible".to_string());
        }

        let category = self
            .primary_type
            .clone()
            .or_else(|| self.types.first().cloned())
            .unwrap_or_else(|| "establishment".to_string());

        let maps_url = match (&self.location, &self.id) {
            (Some(loc), Some(id)) => Some(format!(
                "https://www.google.com/maps/search/?api=1&query={},{}&query_place_id={}",
                loc.latitude, loc.longitude, id
            )),
            (None, Some(id)) => Some(format!("https://www.google.com/maps/place/?q=place_id:{}", id)),
            _ => None,
        };

        let opening_hours = self
            .current_opening_hours
            .filter(|h| !h.weekday_descriptions.is_empty())
            .or(self.regular_opening_hours)
            .map(|h| h.weekday_descriptions)
            .unwrap_or_default();

        let photos = self
            .photos
            .iter()
            .filter(|p| !p.name.is_empty())
            .take(3)
            .map(|p| {
                format!(
                    "https://places.googleapis.com/v1/{}/media?maxHeightPx=400&maxWidthPx=400&key={}",
                    p.name, api_key
                )
            })
            .collect();

        Venue {
            name: self
                .display_name
                .map(|d| d.text)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
            address: self
                .formatted_address
                .unwrap_or_else(|| "Address not available".to_string()),
            rating: self.rating,
            price_tier: self.price_level.as_deref().and_then(price_level_from_api),
            opening_hours,
            booking_link: self.website_uri,
            maps_url,
            phone: self.international_phone_number,
            category,
            tags,
            photos,
        }
    }
}

struct DemoVenue {
    name: &'static str,
    street: &'static str,
    category: &'static str,
    rating: f32,
    price_tier: u8,
    hours: &'static [&'static str],
    tags: &'static [&'static str],
    photo: &'static str,
}

const DEMO_CATALOGUE: &[DemoVenue] = &[
    DemoVenue {
        name: "Green Leaf Garden Kitchen",
        street: "12 Garden Road",
        category: "restaurant",
        rating: 4.5,
        price_tier: 2,
        hours: &["Monday-Sunday: 11:00 AM – 11:00 PM"],
        tags: &["vegetarian", "wheelchair_accessible", "outdoor_seating", "indian"],
        photo: "https://images.unsplash.com/photo-1517248135467-4c7edcad34c4",
    },
    DemoVenue {
        name: "Chai & Chapters Cafe",
        street: "45 Park Avenue",
        category: "cafe",
        rating: 4.3,
        price_tier: 1,
        hours: &["Monday-Sunday: 10:00 AM – 10:00 PM"],
        tags: &["vegetarian", "wheelchair_accessible", "books", "quiet"],
        photo: "https://images.unsplash.com/photo-1554118811-1e0d58224f24",
    },
    DemoVenue {
        name: "The Copper Bistro",
        street: "789 Station Road",
        category: "restaurant",
        rating: 4.7,
        price_tier: 3,
        hours: &["Monday-Sunday: 12:00 PM – 11:00 PM"],
        tags: &["continental", "fine_dining", "romantic"],
        photo: "https://images.unsplash.com/photo-1592861956120-e524fc739696",
    },
    DemoVenue {
        name: "Annapurna Thali House",
        street: "3 Temple Street",
        category: "restaurant",
        rating: 4.2,
        price_tier: 1,
        hours: &["Monday-Sunday: 11:30 AM – 10:30 PM"],
        tags: &["vegetarian", "jain", "wheelchair_accessible", "indian"],
        photo: "https://images.unsplash.com/photo-1585937421612-70a008356fbe",
    },
    DemoVenue {
        name: "Skyline Rooftop Lounge",
        street: "21st Floor, Orbit Tower",
        category: "bar",
        rating: 4.4,
        price_tier: 3,
        hours: &["Monday-Sunday: 6:00 PM – 1:00 AM"],
        tags: &["rooftop", "cocktails", "live_music", "romantic"],
        photo: "https://images.unsplash.com/photo-1514933651103-005eec06c04b",
    },
    DemoVenue {
        name: "Sprout Vegan Corner",
        street: "8 Lake View Lane",
        category: "cafe",
        rating: 4.1,
        price_tier: 2,
        hours: &[],
        tags: &["vegan", "vegetarian", "gluten_free"],
        photo: "https://images.unsplash.com/photo-1512621776951-a57141f2eefd",
    },
    DemoVenue {
        name: "Courtyard Homestay Supper Club",
        street: "Flat 4B, Residency Enclave",
        category: "private_residence",
        rating: 4.8,
        price_tier: 2,
        hours: &["Saturday: 7:00 PM – 11:00 PM"],
        tags: &["vegetarian", "home_dining", "romantic"],
        photo: "https://images.unsplash.com/photo-1414235077428-338989a2e8c0",
    },
];

/// 示例目录实例化到指定城市（坐标缺失时 maps 链接改用城市名查询）
pub fn demo_catalogue(city: &str, latitude: Option<f64>, longitude: Option<f64>) -> Vec<Venue> {
    let city = if city.trim().is_empty() { "City" } else { city.trim() };
    DEMO_CATALOGUE
        .iter()
        .enumerate()
        .map(|(i, d)| {
            let maps_url = match (latitude, longitude) {
                (Some(lat), Some(lon)) => format!(
                    "https://www.google.com/maps/search/?api=1&query={:.4},{:.4}",
                    lat, lon
                ),
                _ => format!(
                    "https://www.google.com/maps/search/?api=1&query={}",
                    format!("{} {}", d.name, city).replace(' ', "+")
                ),
            };
            Venue {
                name: format!("{} - {}", d.name, city),
                address: format!("{}, {}", d.street, city),
                rating: Some(d.rating),
                price_tier: Some(d.price_tier),
                opening_hours: d.hours.iter().map(|h| h.to_string()).collect(),
                booking_link: Some(format!("https://example.com/demo/venue-{}", i + 1)),
                maps_url: Some(maps_url),
                phone: Some(format!("+91-20-5550-{:04}", 100 + i)),
                category: d.category.to_string(),
                tags: d.tags.iter().map(|t| t.to_string()).collect(),
                photos: vec![d.photo.to_string()],
            }
        })
        .collect()
}

/// 与查询词匹配的场馆排在前面，再截断到 max_results
fn demo_search(query: &VenueQuery) -> Vec<Venue> {
    let words: Vec<String> = query
        .query
        .split_whitespace()
        .chain(query.venue_type.split_whitespace())
        .map(normalize_tag)
        .filter(|w| !w.is_empty())
        .collect();
    let mut scored: Vec<(usize, Venue)> =
        demo_catalogue(&query.city, query.latitude, query.longitude)
            .into_iter()
            .map(|v| {
                let name = v.name.to_lowercase();
                let score = words
                    .iter()
                    .filter(|w| {
                        v.category == **w
                            || v.tags.iter().any(|t| t.split('_').any(|part| part == w.as_str()))
                            || name.contains(w.as_str())
                    })
                    .count();
                (score, v)
            })
            .collect();
    // sort_by 稳定：同分保持目录顺序
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored
        .into_iter()
        .take(query.max_results)
        .map(|(_, v)| v)
        .collect()
}
