//! Verifier：核验执行结果，给出通过 / 拒绝、置信度、问题列表与重试调整建议
//!
//! 过滤顺序：预算 → 营业时间 → 饮食与无障碍标签 → 安全（私人场所）。
//! 多个搜索步骤的候选按 (名称, 地址) 去重。
//! 置信度 = 0（无场馆存活），否则 step_weight × 步骤成功率 + venue_weight × 存活率，截断到 [0, 1]。

use std::collections::{BTreeMap, HashSet};

use crate::config::VerifierSection;
use crate::plan::{
    check_opening_hours, normalize_tag, parse_date_time, DateRequest, HoursCheck, Params,
    RequestedTime, Scalar, StepKind, StepResult, Venue, VerificationOutcome,
};

pub const NO_VENUES_FOUND: &str = "no venues found";

const EXTREME_COLD_C: f64 = 10.0;
const EXTREME_HEAT_C: f64 = 38.0;

/// 场馆被剔除的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rejection {
    OverBudget,
    Closed,
    Dietary,
    Accessibility,
    Unsafe,
}

impl Rejection {
    fn describe(&self) -> &'static str {
        match self {
            Rejection::OverBudget => "over budget",
            Rejection::Closed => "closed at the requested time",
            Rejection::Dietary => "dietary restrictions not met",
            Rejection::Accessibility => "accessibility needs not met",
            Rejection::Unsafe => "private residence (safety)",
        }
    }
}

/// 饮食 / 无障碍需求 → 场馆标签（少量同义词归一）
pub fn requirement_tag(raw: &str) -> String {
    let tag = normalize_tag(raw);
    match tag.as_str() {
        "veg" | "veggie" | "pure_veg" => "vegetarian".to_string(),
        "wheelchair" | "wheelchair_access" | "wheelchair_accessibility" => {
            "wheelchair_accessible".to_string()
        }
        _ => tag,
    }
}

pub struct Verifier {
    settings: VerifierSection,
}

impl Verifier {
    pub fn new(settings: VerifierSection) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &VerifierSection {
        &self.settings
    }

    /// 按配置的预算容差核验
    pub fn verify(&self, request: &DateRequest, results: &[StepResult]) -> VerificationOutcome {
        self.verify_with_margin(request, results, self.settings.price_margin)
    }

    /// 指定预算容差核验（重试时放宽的 price_margin 从这里传入）
    pub fn verify_with_margin(
        &self,
        request: &DateRequest,
        results: &[StepResult],
        price_margin: f64,
    ) -> VerificationOutcome {
        let requested = parse_date_time(&request.date_time);
        let candidates = dedupe_candidates(results);
        let mut issues = Vec::new();

        let mut survivors: Vec<(Venue, Vec<String>)> = Vec::new();
        let mut removed: BTreeMap<Rejection, usize> = BTreeMap::new();
        for venue in &candidates {
            match self.check_venue(venue, request, &requested, price_margin) {
                Ok(notes) => survivors.push((venue.clone(), notes)),
                Err(reason) => *removed.entry(reason).or_insert(0) += 1,
            }
        }

        let step_rate = step_success_rate(results);
        let survival_rate = if candidates.is_empty() {
            0.0
        } else {
            survivors.len() as f64 / candidates.len() as f64
        };
        let confidence = self.confidence(step_rate, survivors.len(), survival_rate);

        if candidates.is_empty() {
            issues.push(NO_VENUES_FOUND.to_string());
        } else if survivors.is_empty() {
            issues.push("no venues passed verification".to_string());
        }
        for (reason, count) in &removed {
            issues.push(format!("{} venue(s) removed: {}", count, reason.describe()));
        }
        let approved = !survivors.is_empty() && confidence >= self.settings.confidence_threshold;
        if !survivors.is_empty() && !approved {
            issues.push(format!(
                "confidence {:.2} below threshold {:.2}",
                confidence, self.settings.confidence_threshold
            ));
        }
        issues.extend(self.warnings(results, survivors.len()));

        let suggested_adjustments = if approved {
            Params::new()
        } else {
            self.adjustments(results, &removed, candidates.is_empty(), price_margin)
        };

        tracing::info!(
            approved,
            confidence,
            candidates = candidates.len(),
            survivors = survivors.len(),
            "verification finished"
        );

        VerificationOutcome {
            approved,
            confidence,
            issues,
            suggested_adjustments,
            survivors,
            candidates,
        }
    }

    /// 置信度：无存活场馆为 0，否则按权重组合后截断到 [0, 1]
    pub fn confidence(&self, step_rate: f64, survivors: usize, survival_rate: f64) -> f64 {
        if survivors == 0 {
            return 0.0;
        }
        let score = self.settings.step_weight * step_rate + self.settings.venue_weight * survival_rate;
        score.clamp(0.0, 1.0)
    }

    /// 依次检查预算、营业时间、饮食、无障碍与安全；通过时返回备注
    fn check_venue(
        &self,
        venue: &Venue,
        request: &DateRequest,
        requested: &RequestedTime,
        price_margin: f64,
    ) -> Result<Vec<String>, Rejection> {
        let mut notes = Vec::new();

        match venue.price_tier {
            Some(tier) => {
                let limit = request.budget_per_person * (1.0 + price_margin.max(0.0));
                if self.tier_cost(tier) > limit {
                    return Err(Rejection::OverBudget);
                }
            }
            None => notes.push("price not listed".to_string()),
        }

        match check_opening_hours(&venue.opening_hours, requested) {
            HoursCheck::Open => {}
            HoursCheck::Closed => return Err(Rejection::Closed),
            HoursCheck::Unknown => notes.push("opening hours unverified".to_string()),
        }

        if request
            .dietary_restrictions
            .iter()
            .map(|d| requirement_tag(d))
            .any(|tag| !venue.tags.contains(&tag))
        {
            return Err(Rejection::Dietary);
        }

        if let Some(need) = request.accessibility() {
            if !venue.tags.contains(&requirement_tag(need)) {
                return Err(Rejection::Accessibility);
            }
        }

        if self.is_private(venue) {
            return Err(Rejection::Unsafe);
        }

        Ok(notes)
    }

    /// 价格档位对应的人均估算；超出表长时取最后一档
    pub fn tier_cost(&self, tier: u8) -> f64 {
        let costs = &self.settings.price_tier_costs;
        costs
            .get(tier as usize)
            .or_else(|| costs.last())
            .copied()
            .unwrap_or(0.0)
    }

    pub fn is_private(&self, venue: &Venue) -> bool {
        let category = normalize_tag(&venue.category);
        self.settings
            .private_categories
            .iter()
            .any(|c| normalize_tag(c) == category)
    }

    /// 不阻断通过的提示：场馆偏少、天气不可用、降雨 / 极端温度、失败步骤
    fn warnings(&self, results: &[StepResult], survivors: usize) -> Vec<String> {
        let mut out = Vec::new();
        if survivors > 0 && survivors < self.settings.min_venues {
            out.push(format!(
                "only {} venue(s) passed verification (wanted at least {})",
                survivors, self.settings.min_venues
            ));
        }
        let weather = results.iter().find_map(StepResult::weather);
        match weather {
            None => out.push("weather unavailable".to_string()),
            Some(w) => {
                if w.precipitation_probability > self.settings.rain_risk_threshold {
                    out.push(format!(
                        "high chance of rain ({:.0}%)",
                        w.precipitation_probability
                    ));
                }
                if w.temperature < EXTREME_COLD_C || w.temperature > EXTREME_HEAT_C {
                    out.push(format!("extreme temperature ({:.0}°C)", w.temperature));
                }
            }
        }
        for r in results.iter().filter(|r| !r.is_success()) {
            let detail = r
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            out.push(format!("step {} ({}) failed: {}", r.index, r.kind, detail));
        }
        out
    }

    /// 拒绝时的调整建议：扩大半径、必要时放宽预算、重跑失败步骤。
    /// 只有一个候选都没搜到时才把查询放宽为 "restaurant"，否则收窄查询找到的场馆会在重试中丢失
    fn adjustments(
        &self,
        results: &[StepResult],
        removed: &BTreeMap<Rejection, usize>,
        no_candidates: bool,
        price_margin: f64,
    ) -> Params {
        let mut adj = Params::new();
        adj.insert(
            "radius".to_string(),
            Scalar::Int(self.settings.broadened_radius_m),
        );
        if no_candidates {
            adj.insert("query".to_string(), Scalar::Text("restaurant".to_string()));
        }
        adj.insert(
            "max_results".to_string(),
            Scalar::Int((self.settings.max_venues * 2) as i64),
        );
        if removed.contains_key(&Rejection::OverBudget) {
            adj.insert(
                "price_margin".to_string(),
                Scalar::Float((price_margin * 2.0).max(0.5)),
            );
        }
        if results.iter().any(|r| !r.is_success()) {
            adj.insert("retry_failed_steps".to_string(), Scalar::Bool(true));
        }
        adj
    }
}

/// 成功场馆搜索中的全部候选，按 (名称, 地址) 去重并保持首次出现顺序
pub fn dedupe_candidates(results: &[StepResult]) -> Vec<Venue> {
    let mut seen = HashSet::new();
    results
        .iter()
        .filter(|r| r.kind == StepKind::SearchVenues)
        .flat_map(|r| r.venues().iter())
        .filter(|v| {
            seen.insert((
                v.name.trim().to_lowercase(),
                v.address.trim().to_lowercase(),
            ))
        })
        .cloned()
        .collect()
}

/// 数据步骤（不含 compose_final）的成功率；没有数据步骤时记为 1
pub fn step_success_rate(results: &[StepResult]) -> f64 {
    let data_steps: Vec<&StepResult> = results
        .iter()
        .filter(|r| r.kind != StepKind::ComposeFinal)
        .collect();
    if data_steps.is_empty() {
        return 1.0;
    }
    let ok = data_steps.iter().filter(|r| r.is_success()).count();
    ok as f64 / data_steps.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{StepError, StepPayload, WeatherReport};
    use crate::services::demo_catalogue;

    fn venue(name: &str, tier: u8, hours: &[&str], tags: &[&str], category: &str) -> Venue {
        Venue {
            name: name.to_string(),
            address: format!("{} street", name),
            rating: Some(4.0),
            price_tier: Some(tier),
            opening_hours: hours.iter().map(|h| h.to_string()).collect(),
            booking_link: None,
            maps_url: None,
            phone: None,
            category: category.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            photos: vec![],
        }
    }

    fn search_result(index: usize, venues: Vec<Venue>) -> StepResult {
        StepResult::success(index, StepKind::SearchVenues, StepPayload::Venues { venues }, "stub", 1)
    }

    fn weather_result(pop: f64, temp: f64) -> StepResult {
        StepResult::success(
            0,
            StepKind::GetWeather,
            StepPayload::Weather(WeatherReport {
                temperature: temp,
                feels_like: temp,
                condition: "Rain".to_string(),
                description: "rain".to_string(),
                humidity: 80,
                wind_speed: 2.0,
                precipitation_probability: pop,
                suggestion: String::new(),
            }),
            "stub",
            1,
        )
    }

    fn verifier() -> Verifier {
        Verifier::new(VerifierSection::default())
    }

    fn pune() -> DateRequest {
        DateRequest::new("Pune", 800.0, "Saturday 7pm").with_dietary("vegetarian")
    }

    #[test]
    fn test_pune_catalogue_filters() {
        let results = vec![
            weather_result(10.0, 27.0),
            search_result(1, demo_catalogue("Pune", None, None)),
        ];
        let outcome = verifier().verify(&pune(), &results);
        assert!(outcome.approved);
        let names: Vec<&str> = outcome.survivors.iter().map(|(v, _)| v.name.as_str()).collect();
        assert_eq!(names.len(), 4);
        assert!(names.iter().all(|n| !n.contains("Homestay")));
        assert!(names.iter().all(|n| !n.contains("Copper")));
        assert!(outcome
            .survivors
            .iter()
            .any(|(_, notes)| notes.contains(&"opening hours unverified".to_string())));
        assert!(outcome.suggested_adjustments.is_empty());
        assert!(outcome.confidence >= 0.5 && outcome.confidence <= 1.0);
    }

    #[test]
    fn test_no_venues_rejects_with_adjustments() {
        let results = vec![weather_result(10.0, 27.0), search_result(1, vec![])];
        let outcome = verifier().verify(&pune(), &results);
        assert!(!outcome.approved);
        assert_eq!(outcome.confidence, 0.0);
        assert_eq!(outcome.issues[0], NO_VENUES_FOUND);
        assert_eq!(
            outcome.suggested_adjustments.get("radius"),
            Some(&Scalar::Int(5000))
        );
        assert_eq!(
            outcome.suggested_adjustments.get("query"),
            Some(&Scalar::Text("restaurant".to_string()))
        );
        assert!(!outcome.suggested_adjustments.contains_key("retry_failed_steps"));
    }

    #[test]
    fn test_failed_search_counts_as_no_venues() {
        let failed = StepResult::failed(
            1,
            StepKind::SearchVenues,
            StepError::new("timeout", "timed out"),
            "stub",
            10,
        );
        let outcome = verifier().verify(&pune(), &[failed]);
        assert!(!outcome.approved);
        assert_eq!(outcome.issues[0], NO_VENUES_FOUND);
        assert_eq!(
            outcome.suggested_adjustments.get("retry_failed_steps"),
            Some(&Scalar::Bool(true))
        );
    }

    #[test]
    fn test_budget_margin_and_relaxation() {
        let v = venue("Pricey", 3, &[], &["vegetarian"], "restaurant");
        let results = vec![search_result(0, vec![v])];
        let outcome = verifier().verify(&pune(), &results);
        assert!(!outcome.approved);
        assert!(outcome.suggested_adjustments.contains_key("price_margin"));
        // 已有候选时保留原查询，只扩大半径
        assert!(!outcome.suggested_adjustments.contains_key("query"));
        // 容差放宽到 1.75：800 × 2.75 = 2200
        let relaxed = verifier().verify_with_margin(&pune(), &results, 1.75);
        assert_eq!(relaxed.survivors.len(), 1);
    }

    #[test]
    fn test_closed_venue_removed_unknown_kept() {
        let results = vec![search_result(
            0,
            vec![
                venue("Lunch Spot", 1, &["Monday-Sunday: 8:00 AM – 3:00 PM"], &["vegetarian"], "cafe"),
                venue("No Hours", 1, &[], &["vegetarian"], "cafe"),
            ],
        )];
        let outcome = verifier().verify(&pune(), &results);
        assert_eq!(outcome.survivors.len(), 1);
        assert_eq!(outcome.survivors[0].0.name, "No Hours");
        assert!(outcome
            .issues
            .iter()
            .any(|i| i.contains("closed at the requested time")));
    }

    #[test]
    fn test_accessibility_tag_required() {
        let req = DateRequest::new("Pune", 3000.0, "Saturday 7pm").with_accessibility("Wheelchair accessible");
        let results = vec![search_result(
            0,
            vec![
                venue("Ramp", 2, &[], &["wheelchair_accessible"], "restaurant"),
                venue("Stairs", 2, &[], &["rooftop"], "restaurant"),
            ],
        )];
        let outcome = verifier().verify(&req, &results);
        assert_eq!(outcome.survivors.len(), 1);
        assert_eq!(outcome.survivors[0].0.name, "Ramp");
    }

    #[test]
    fn test_private_residence_removed() {
        let results = vec![search_result(
            0,
            vec![venue("Home", 1, &[], &["vegetarian"], "Private Residence")],
        )];
        let outcome = verifier().verify(&pune(), &results);
        assert!(outcome.survivors.is_empty());
        assert!(outcome.issues.iter().any(|i| i.contains("safety")));
    }

    #[test]
    fn test_dedupe_across_searches() {
        let a = venue("Same", 1, &[], &["vegetarian"], "cafe");
        let mut b = a.clone();
        b.name = " same ".to_string();
        let results = vec![search_result(0, vec![a.clone()]), search_result(1, vec![b, a])];
        assert_eq!(dedupe_candidates(&results).len(), 1);
    }

    #[test]
    fn test_confidence_monotonic_in_survivors() {
        let v = verifier();
        for step_rate in [0.0, 0.5, 1.0] {
            let mut last = 0.0;
            for survivors in 0..=10usize {
                let c = v.confidence(step_rate, survivors, survivors as f64 / 10.0);
                assert!(c >= last, "confidence dropped at {} survivors", survivors);
                assert!((0.0..=1.0).contains(&c));
                last = c;
            }
        }
    }

    #[test]
    fn test_rain_and_temperature_warnings() {
        let results = vec![
            weather_result(72.0, 40.0),
            search_result(1, demo_catalogue("Pune", None, None)),
        ];
        let outcome = verifier().verify(&pune(), &results);
        assert!(outcome.issues.iter().any(|i| i.contains("high chance of rain (72%)")));
        assert!(outcome.issues.iter().any(|i| i.contains("extreme temperature")));
    }

    #[test]
    fn test_requirement_aliases() {
        assert_eq!(requirement_tag("Veg"), "vegetarian");
        assert_eq!(requirement_tag("wheelchair"), "wheelchair_accessible");
        assert_eq!(requirement_tag("Gluten free"), "gluten_free");
    }
}
