//! 数据源抽象：场馆搜索、天气预报、图片搜索
//!
//! Executor 只依赖这三个 trait；实时 API、demo 数据与测试桩都实现同一接口，返回同形载荷。

use async_trait::async_trait;

use crate::core::ServiceError;
use crate::plan::{ImageRef, Venue, WeatherReport};

/// 场馆搜索参数（由 search_venues 步骤参数构造）
#[derive(Debug, Clone, PartialEq)]
pub struct VenueQuery {
    pub query: String,
    pub city: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius_m: i64,
    pub venue_type: String,
    pub max_results: usize,
}

impl VenueQuery {
    pub const DEFAULT_RADIUS_M: i64 = 3000;
    pub const DEFAULT_MAX_RESULTS: usize = 5;

    pub fn new(query: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            city: city.into(),
            latitude: None,
            longitude: None,
            radius_m: Self::DEFAULT_RADIUS_M,
            venue_type: "restaurant".to_string(),
            max_results: Self::DEFAULT_MAX_RESULTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherQuery {
    pub city: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// 请求中的自由格式时间，用于挑选最接近的预报时段
    pub date_time: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageQuery {
    pub query: String,
    pub count: usize,
}

#[async_trait]
pub trait VenueSource: Send + Sync {
    /// 写入 StepResult.source 的提供方标签
    fn label(&self) -> &str;

    async fn search(&self, query: &VenueQuery) -> Result<Vec<Venue>, ServiceError>;
}

#[async_trait]
pub trait WeatherSource: Send + Sync {
    fn label(&self) -> &str;

    async fn forecast(&self, query: &WeatherQuery) -> Result<WeatherReport, ServiceError>;
}

#[async_trait]
pub trait ImageSource: Send + Sync {
    fn label(&self) -> &str;

    async fn search(&self, query: &ImageQuery) -> Result<Vec<ImageRef>, ServiceError>;
}

/// 读取错误响应体（截断），转为 ServiceError::Http
pub(crate) async fn http_error(resp: reqwest::Response) -> ServiceError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let body = if body.chars().count() > 200 {
        format!("{}...", body.chars().take(200).collect::<String>())
    } else {
        body
    };
    ServiceError::Http { status, body }
}

/// 按配置的超时构造 HTTP 客户端
pub(crate) fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .user_agent(concat!("dateplan/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}
