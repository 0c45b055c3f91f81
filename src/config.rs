//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DATEPLAN__*` 覆盖（双下划线表示嵌套，如 `DATEPLAN__VERIFIER__PRICE_MARGIN=0.5`）。
//! 各数据源的凭据在此解析一次，随后显式传入适配器构造函数；缺失凭据即进入 demo 模式。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub services: ServicesSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub verifier: VerifierSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：gemini / openai / mock；无对应 API Key 时回退到 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}

fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    30
}

/// [services] 段：三个外部数据源
#[derive(Debug, Clone, Deserialize)]
pub struct ServicesSection {
    #[serde(default = "default_places")]
    pub places: ServiceSection,
    #[serde(default = "default_weather")]
    pub weather: ServiceSection,
    #[serde(default = "default_images")]
    pub images: ServiceSection,
}

impl Default for ServicesSection {
    fn default() -> Self {
        Self {
            places: default_places(),
            weather: default_weather(),
            images: default_images(),
        }
    }
}

/// 单个数据源：凭据、端点与 HTTP 超时
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSection {
    pub api_key: Option<String>,
    pub base_url: String,
    #[serde(default = "default_service_timeout_secs")]
    pub timeout_secs: u64,
}

impl ServiceSection {
    /// 未配置凭据（或为空串）时使用 demo 数据
    pub fn demo_mode(&self) -> bool {
        self.api_key.as_deref().map(str::trim).unwrap_or("").is_empty()
    }
}

fn default_service_timeout_secs() -> u64 {
    10
}

fn default_places() -> ServiceSection {
    ServiceSection {
        api_key: None,
        base_url: "https://places.googleapis.com/v1".to_string(),
        timeout_secs: default_service_timeout_secs(),
    }
}

fn default_weather() -> ServiceSection {
    ServiceSection {
        api_key: None,
        base_url: "https://api.openweathermap.org/data/2.5".to_string(),
        timeout_secs: default_service_timeout_secs(),
    }
}

fn default_images() -> ServiceSection {
    ServiceSection {
        api_key: None,
        base_url: "https://api.unsplash.com".to_string(),
        timeout_secs: default_service_timeout_secs(),
    }
}

/// [pipeline] 段：单步超时、整体超时、重试预算
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// 单次适配器调用超时（秒）
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    /// 单次请求整体截止时间（秒），超时的在途调用记为失败步骤
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout_secs(),
            run_timeout_secs: default_run_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_step_timeout_secs() -> u64 {
    15
}

fn default_run_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u8 {
    1
}

/// [verifier] 段：预算容差、置信度权重与阈值、降雨风险阈值
#[derive(Debug, Clone, Deserialize)]
pub struct VerifierSection {
    /// 允许超出人均预算的比例（0.25 = 超出 25% 以内仍保留）
    #[serde(default = "default_price_margin")]
    pub price_margin: f64,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// 置信度中「步骤成功率」的权重
    #[serde(default = "default_weight")]
    pub step_weight: f64,
    /// 置信度中「场馆存活率」的权重
    #[serde(default = "default_weight")]
    pub venue_weight: f64,
    /// 降水概率（百分比）超过该值时附带备选方案
    #[serde(default = "default_rain_risk_threshold")]
    pub rain_risk_threshold: f64,
    /// 价格档位 0..=4 对应的人均估算花费
    #[serde(default = "default_price_tier_costs")]
    pub price_tier_costs: Vec<f64>,
    /// 视为私人场所的类别（安全检查中剔除）
    #[serde(default = "default_private_categories")]
    pub private_categories: Vec<String>,
    #[serde(default = "default_min_venues")]
    pub min_venues: usize,
    #[serde(default = "default_max_venues")]
    pub max_venues: usize,
    /// 重试时放宽后的搜索半径（米）
    #[serde(default = "default_broadened_radius_m")]
    pub broadened_radius_m: i64,
}

impl Default for VerifierSection {
    fn default() -> Self {
        Self {
            price_margin: default_price_margin(),
            confidence_threshold: default_confidence_threshold(),
            step_weight: default_weight(),
            venue_weight: default_weight(),
            rain_risk_threshold: default_rain_risk_threshold(),
            price_tier_costs: default_price_tier_costs(),
            private_categories: default_private_categories(),
            min_venues: default_min_venues(),
            max_venues: default_max_venues(),
            broadened_radius_m: default_broadened_radius_m(),
        }
    }
}

fn default_price_margin() -> f64 {
    0.25
}

fn default_confidence_threshold() -> f64 {
    0.5
}

fn default_weight() -> f64 {
    0.5
}

fn default_rain_risk_threshold() -> f64 {
    50.0
}

fn default_price_tier_costs() -> Vec<f64> {
    vec![0.0, 400.0, 1000.0, 2200.0, 4000.0]
}

fn default_private_categories() -> Vec<String> {
    vec![
        "private_residence".into(),
        "residence".into(),
        "apartment".into(),
        "house".into(),
        "homestay".into(),
    ]
}

fn default_min_venues() -> usize {
    3
}

fn default_max_venues() -> usize {
    5
}

fn default_broadened_radius_m() -> i64 {
    5000
}

impl AppConfig {
    /// 用约定俗成的环境变量补全缺失的凭据（仅在组合根调用一次，之后显式传参）
    pub fn with_env_credentials(mut self) -> Self {
        fill_from_env(&mut self.services.places.api_key, "GOOGLE_PLACES_API_KEY");
        fill_from_env(&mut self.services.weather.api_key, "OPENWEATHER_API_KEY");
        fill_from_env(&mut self.services.images.api_key, "UNSPLASH_ACCESS_KEY");
        let llm_var = match self.llm.provider.to_lowercase().as_str() {
            "openai" => "OPENAI_API_KEY",
            _ => "GEMINI_API_KEY",
        };
        fill_from_env(&mut self.llm.api_key, llm_var);
        self
    }
}

fn fill_from_env(slot: &mut Option<String>, var: &str) {
    if slot.as_deref().map(str::trim).unwrap_or("").is_empty() {
        *slot = std::env::var(var).ok().filter(|v| !v.trim().is_empty());
    }
}

/// 从 config 目录加载配置，环境变量 DATEPLAN__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DATEPLAN__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DATEPLAN")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
