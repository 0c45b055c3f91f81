//! 天气预报：OpenWeatherMap 5 天 / 3 小时预报
//!
//! GET {base}/forecast?lat=..&lon=..&units=metric；按请求时间挑选最接近的预报时段，
//! precipitation_probability = pop × 100。demo 模式返回固定的晴天示例。

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDateTime, NaiveTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::traits::{http_client, http_error};
use super::{WeatherQuery, WeatherSource};
use crate::config::ServiceSection;
use crate::core::ServiceError;
use crate::plan::{parse_date_time, RequestedTime, WeatherReport};

pub struct WeatherService {
    client: Client,
    base_url: String,
    api_key: String,
    demo_mode: bool,
}

impl WeatherService {
    pub fn new(settings: &ServiceSection, demo_mode: bool) -> Self {
        Self {
            client: http_client(settings.timeout_secs),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone().unwrap_or_default(),
            demo_mode,
        }
    }

    pub fn demo() -> Self {
        Self::new(&crate::config::ServicesSection::default().weather, true)
    }

    async fn forecast_live(&self, query: &WeatherQuery) -> Result<WeatherReport, ServiceError> {
        let url = format!("{}/forecast", self.base_url);
        let mut params: Vec<(&str, String)> = vec![
            ("appid", self.api_key.clone()),
            ("units", "metric".to_string()),
        ];
        match (query.latitude, query.longitude) {
            (Some(lat), Some(lon)) => {
                params.push(("lat", lat.to_string()));
                params.push(("lon", lon.to_string()));
            }
            _ => params.push(("q", query.city.clone())),
        }
        let resp = self.client.get(&url).query(&params).send().await?;
        if !resp.status().is_success() {
            return Err(http_error(resp).await);
        }
        let data: ForecastResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))?;
        let tz = data.city.map(|c| c.timezone).unwrap_or(0);
        let requested = parse_date_time(&query.date_time);
        let entry = select_entry(&data.list, tz, Utc::now(), &requested)
            .ok_or_else(|| ServiceError::Decode("forecast list is empty".to_string()))?;
        Ok(entry.to_report())
    }
}

#[async_trait]
impl WeatherSource for WeatherService {
    fn label(&self) -> &str {
        if self.demo_mode {
            "demo"
        } else {
            "openweather"
        }
    }

    async fn forecast(&self, query: &WeatherQuery) -> Result<WeatherReport, ServiceError> {
        if self.demo_mode {
            return Ok(demo_report());
        }
        self.forecast_live(query).await
    }
}

#[derive(Debug, Deserialize, Default)]
struct ForecastResponse {
    #[serde(default)]
    list: Vec<ForecastEntry>,
    city: Option<CityDto>,
}

#[derive(Debug, Deserialize, Default)]
struct CityDto {
    /// 相对 UTC 的偏移（秒）
    #[serde(default)]
    timezone: i64,
}

#[derive(Debug, Deserialize, Default)]
struct ForecastEntry {
    dt: i64,
    #[serde(default)]
    main: MainDto,
    #[serde(default)]
    weather: Vec<ConditionDto>,
    #[serde(default)]
    wind: WindDto,
    pop: Option<f64>,
    rain: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Default)]
struct MainDto {
    #[serde(default)]
    temp: f64,
    feels_like: Option<f64>,
    #[serde(default)]
    humidity: f64,
}

#[derive(Debug, Deserialize, Default)]
struct ConditionDto {
    #[serde(default)]
    main: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize, Default)]
struct WindDto {
    #[serde(default)]
    speed: f64,
}

impl ForecastEntry {
    fn to_report(&self) -> WeatherReport {
        let (condition, description) = self
            .weather
            .first()
            .map(|w| (w.main.clone(), capitalize(&w.description)))
            .unwrap_or_else(|| ("Unknown".to_string(), String::new()));
        let precipitation_probability = match self.pop {
            Some(pop) => (pop * 100.0).clamp(0.0, 100.0),
            // 无 pop 字段时按降雨数据 / 天气描述估算
            None if self.rain.is_some() => 80.0,
            None if condition.to_lowercase().contains("rain")
                || description.to_lowercase().contains("drizzle") =>
            {
                60.0
            }
            None => 0.0,
        };
        let temperature = self.main.temp;
        WeatherReport {
            temperature,
            feels_like: self.main.feels_like.unwrap_or(temperature),
            suggestion: weather_suggestion(temperature, &condition, precipitation_probability),
            condition,
            description,
            humidity: self.main.humidity.clamp(0.0, 100.0) as u8,
            wind_speed: self.wind.speed,
            precipitation_probability,
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// 请求时间在城市本地时区下的目标时刻（未指定星期则取今天，已过则顺延一天）
fn target_local(now_local: NaiveDateTime, requested: &RequestedTime) -> NaiveDateTime {
    let Some(time) = requested.time.or_else(|| NaiveTime::from_hms_opt(19, 0, 0)) else {
        return now_local;
    };
    let today = now_local.date();
    match requested.weekday {
        Some(day) => {
            let ahead = (day.num_days_from_monday() + 7 - today.weekday().num_days_from_monday()) % 7;
            (today + Duration::days(ahead as i64)).and_time(time)
        }
        None => {
            let target = today.and_time(time);
            if target < now_local {
                target + Duration::days(1)
            } else {
                target
            }
        }
    }
}

/// 挑选与请求时间最接近的预报时段
fn select_entry<'a>(
    entries: &'a [ForecastEntry],
    tz_offset_secs: i64,
    now: DateTime<Utc>,
    requested: &RequestedTime,
) -> Option<&'a ForecastEntry> {
    let now_local = now.naive_utc() + Duration::seconds(tz_offset_secs);
    let target = target_local(now_local, requested);
    entries.iter().min_by_key(|e| {
        DateTime::<Utc>::from_timestamp(e.dt + tz_offset_secs, 0)
            .map(|local| (local.naive_utc() - target).num_seconds().abs())
            .unwrap_or(i64::MAX)
    })
}

/// 约会相关的天气建议
pub fn weather_suggestion(temperature: f64, condition: &str, precipitation_probability: f64) -> String {
    let condition = condition.to_lowercase();
    let mut suggestions: Vec<&str> = Vec::new();
    if temperature < 15.0 {
        suggestions.push("Bring a jacket - it's quite cool");
    } else if temperature < 20.0 {
        suggestions.push("Wear a light sweater");
    } else if temperature > 32.0 {
        suggestions.push("Dress light - it's hot outside");
        suggestions.push("Choose an air-conditioned venue");
    }
    if precipitation_probability > 50.0 {
        suggestions.push("High chance of rain - carry an umbrella");
        suggestions.push("Consider indoor activities or venues with covered seating");
    } else if condition.contains("rain") {
        suggestions.push("Rain expected - plan for indoor activities");
    }
    if condition.contains("clear") || condition.contains("sunny") {
        suggestions.push("Perfect weather for outdoor dining");
    } else if condition.contains("cloud") {
        suggestions.push("Pleasant weather for a date");
    }
    if suggestions.is_empty() {
        "Weather looks good for your date".to_string()
    } else {
        suggestions.join(" | ")
    }
}

/// demo 模式的固定天气
pub fn demo_report() -> WeatherReport {
    let temperature = 27.0;
    WeatherReport {
        temperature,
        feels_like: 28.0,
        condition: "Clear".to_string(),
        description: "Clear sky (sample data)".to_string(),
        humidity: 55,
        wind_speed: 3.2,
        precipitation_probability: 10.0,
        suggestion: weather_suggestion(temperature, "Clear", 10.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn entry(dt: i64, pop: f64, main: &str) -> ForecastEntry {
        ForecastEntry {
            dt,
            main: MainDto {
                temp: 24.0,
                feels_like: None,
                humidity: 70.0,
            },
            weather: vec![ConditionDto {
                main: main.to_string(),
                description: "light rain".to_string(),
            }],
            wind: WindDto { speed: 2.0 },
            pop: Some(pop),
            rain: None,
        }
    }

    #[test]
    fn test_parse_forecast_entry() {
        let raw = r#"{
            "list": [{
                "dt": 1707580800,
                "main": {"temp": 22.5, "feels_like": 21.9, "humidity": 64},
                "weather": [{"main": "Rain", "description": "light rain"}],
                "wind": {"speed": 4.1},
                "pop": 0.72,
                "rain": {"3h": 0.4}
            }],
            "city": {"name": "Pune", "timezone": 19800}
        }"#;
        let data: ForecastResponse = serde_json::from_str(raw).unwrap();
        let report = data.list[0].to_report();
        assert_eq!(report.condition, "Rain");
        assert_eq!(report.description, "Light rain");
        assert!((report.precipitation_probability - 72.0).abs() < 1e-9);
        assert_eq!(report.humidity, 64);
        assert!(report.suggestion.contains("umbrella"));
        assert_eq!(data.city.unwrap().timezone, 19800);
    }

    #[test]
    fn test_missing_pop_uses_rain_heuristic() {
        let mut e = entry(0, 0.0, "Rain");
        e.pop = None;
        e.rain = Some(serde_json::json!({"3h": 1.0}));
        assert_eq!(e.to_report().precipitation_probability, 80.0);
        e.rain = None;
        assert_eq!(e.to_report().precipitation_probability, 60.0);
    }

    #[test]
    fn test_select_entry_nearest_to_requested_saturday_evening() {
        // 2024-02-07 是星期三
        let now = Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(2024, 2, 7)
                .unwrap()
                .and_hms_opt(6, 0, 0)
                .unwrap(),
        );
        let sat_19_utc = Utc
            .from_utc_datetime(
                &NaiveDate::from_ymd_opt(2024, 2, 10)
                    .unwrap()
                    .and_hms_opt(19, 0, 0)
                    .unwrap(),
            )
            .timestamp();
        let entries = vec![
            entry(sat_19_utc - 86_400, 0.1, "Clear"),
            entry(sat_19_utc, 0.9, "Rain"),
            entry(sat_19_utc + 3 * 3600, 0.2, "Clouds"),
        ];
        let requested = parse_date_time("Saturday 7pm");
        let chosen = select_entry(&entries, 0, now, &requested).unwrap();
        assert_eq!(chosen.dt, sat_19_utc);
        assert!(select_entry(&[], 0, now, &requested).is_none());
    }

    #[test]
    fn test_suggestions() {
        assert!(weather_suggestion(10.0, "Clouds", 0.0).contains("jacket"));
        assert!(weather_suggestion(35.0, "Clear", 0.0).contains("air-conditioned"));
        assert_eq!(
            weather_suggestion(25.0, "Haze", 0.0),
            "Weather looks good for your date"
        );
    }

    #[tokio::test]
    async fn test_demo_forecast() {
        let service = WeatherService::demo();
        let q = WeatherQuery {
            city: "Pune".to_string(),
            latitude: None,
            longitude: None,
            date_time: "Saturday 7pm".to_string(),
        };
        let report = service.forecast(&q).await.unwrap();
        assert!(report.description.contains("sample"));
        assert!(report.precipitation_probability < 50.0);
        assert_eq!(service.label(), "demo");
    }
}
