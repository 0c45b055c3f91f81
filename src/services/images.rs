//! 氛围图片：Unsplash search/photos
//!
//! Authorization: Client-ID {key}；取 urls.regular、摄影师名与描述。demo 模式返回固定的示例图片。

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::traits::{http_client, http_error};
use super::{ImageQuery, ImageSource};
use crate::config::ServiceSection;
use crate::core::ServiceError;
use crate::plan::ImageRef;

pub struct ImageService {
    client: Client,
    base_url: String,
    access_key: String,
    demo_mode: bool,
}

impl ImageService {
    pub fn new(settings: &ServiceSection, demo_mode: bool) -> Self {
        Self {
            client: http_client(settings.timeout_secs),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            access_key: settings.api_key.clone().unwrap_or_default(),
            demo_mode,
        }
    }

    pub fn demo() -> Self {
        Self::new(&crate::config::ServicesSection::default().images, true)
    }

    async fn search_live(&self, query: &ImageQuery) -> Result<Vec<ImageRef>, ServiceError> {
        let url = format!("{}/search/photos", self.base_url);
        let per_page = query.count.to_string();
        let resp = self
            .client
            .get(&url)
            .header("Authorization", format!("Client-ID {}", self.access_key))
            .query(&[
                ("query", query.query.as_str()),
                ("per_page", per_page.as_str()),
                ("orientation", "landscape"),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(http_error(resp).await);
        }
        let data: SearchPhotosResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))?;
        Ok(data.into_images())
    }
}

#[async_trait]
impl ImageSource for ImageService {
    fn label(&self) -> &str {
        if self.demo_mode {
            "demo"
        } else {
            "unsplash"
        }
    }

    async fn search(&self, query: &ImageQuery) -> Result<Vec<ImageRef>, ServiceError> {
        if query.query.trim().is_empty() {
            return Err(ServiceError::MissingParam("query"));
        }
        if self.demo_mode {
            return Ok(demo_images(query.count));
        }
        self.search_live(query).await
    }
}

#[derive(Debug, Deserialize, Default)]
struct SearchPhotosResponse {
    #[serde(default)]
    results: Vec<PhotoDto>,
}

#[derive(Debug, Deserialize, Default)]
struct PhotoDto {
    #[serde(default)]
    urls: UrlsDto,
    user: Option<UserDto>,
    description: Option<String>,
    alt_description: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct UrlsDto {
    regular: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct UserDto {
    #[serde(default)]
    name: String,
}

impl SearchPhotosResponse {
    fn into_images(self) -> Vec<ImageRef> {
        self.results
            .into_iter()
            .filter_map(|p| {
                let url = p.urls.regular?;
                Some(ImageRef {
                    url,
                    credit: p
                        .user
                        .map(|u| u.name)
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| "Unknown".to_string()),
                    description: p.description.or(p.alt_description),
                })
            })
            .collect()
    }
}

const DEMO_IMAGES: &[(&str, &str)] = &[
    (
        "https://images.unsplash.com/photo-1414235077428-338989a2e8c0",
        "Candle-lit table for two",
    ),
    (
        "https://images.unsplash.com/photo-1517248135467-4c7edcad34c4",
        "Warm restaurant interior",
    ),
    (
        "https://images.unsplash.com/photo-1559339352-11d035aa65de",
        "Evening city lights",
    ),
];

fn demo_images(count: usize) -> Vec<ImageRef> {
    DEMO_IMAGES
        .iter()
        .take(count)
        .map(|(url, desc)| ImageRef {
            url: url.to_string(),
            credit: "Unsplash (sample data)".to_string(),
            description: Some(desc.to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_photos() {
        let raw = r#"{
            "total": 2,
            "results": [
                {"urls": {"regular": "https://img/1"}, "user": {"name": "Asha"}, "description": null, "alt_description": "dinner table"},
                {"urls": {}, "user": {"name": "Ravi"}}
            ]
        }"#;
        let data: SearchPhotosResponse = serde_json::from_str(raw).unwrap();
        let images = data.into_images();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].credit, "Asha");
        assert_eq!(images[0].description.as_deref(), Some("dinner table"));
    }

    #[tokio::test]
    async fn test_demo_images_respect_count() {
        let service = ImageService::demo();
        let images = service
            .search(&ImageQuery {
                query: "romantic dinner".to_string(),
                count: 2,
            })
            .await
            .unwrap();
        assert_eq!(images.len(), 2);
        assert!(images.iter().all(|i| i.credit.contains("sample")));
    }
}
