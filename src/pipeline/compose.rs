//! 组装最终 DatePlan：场馆排序、时间线、安全清单、交通建议、雨天备选
//!
//! 通过核验时使用存活场馆；降级输出且无存活场馆时，退回到通过安全检查的原始候选并加注。

use std::collections::HashSet;

use chrono::{Duration, NaiveTime};

use crate::plan::{
    format_amount, format_time_label, lookup_city, parse_date_time, DatePlan, DateRequest,
    ImageRef, Plan, RequestedTime, StepKind, StepResult, TimelineEntry, Venue, VenueOption,
    VerificationOutcome, WeatherReport,
};
use crate::pipeline::Verifier;

pub const SHARE_LOCATION: &str = "Share your location with a trusted contact";
pub const INDEPENDENT_TRANSPORT: &str = "Arrange independent transport";
const UNVERIFIED_NOTE: &str = "did not pass all checks - confirm details before booking";

/// (相对锚点的分钟偏移, 活动, 是否在场馆, 时长)
const TIMELINE: &[(i64, &str, bool, Option<u32>)] = &[
    (-15, "Meet up and head to the venue", false, Some(15)),
    (0, "Order drinks and appetizers", true, Some(30)),
    (30, "Main course", true, Some(60)),
    (90, "Dessert and wrap up", true, Some(30)),
    (120, "Head home", false, None),
];

/// 组装 DatePlan；每次运行只调用一次
pub fn compose(
    request: &DateRequest,
    plan: &Plan,
    results: &[StepResult],
    outcome: &VerificationOutcome,
    verifier: &Verifier,
) -> DatePlan {
    let requested = parse_date_time(&request.date_time);
    let city_info = lookup_city(&request.city);
    let city = city_info
        .map(|c| c.name.to_string())
        .unwrap_or_else(|| request.city.trim().to_string());
    let compose_step = plan.steps.iter().find(|s| s.kind == StepKind::ComposeFinal);
    let flag = |key: &str| {
        compose_step
            .and_then(|s| s.params.get(key))
            .and_then(|v| v.as_bool())
            .unwrap_or(true)
    };

    let venues = select_venues(request, outcome, verifier);
    let weather = results.iter().find_map(StepResult::weather).cloned();
    let images: Vec<ImageRef> = results.iter().flat_map(|r| r.images().iter().cloned()).collect();

    let currency = match city_info.map(|c| c.country) {
        Some("IN") => "₹",
        _ => "",
    };
    let budget_estimate = format!(
        "{}{} for two ({}{} per person)",
        currency,
        format_amount(request.budget_per_person * 2.0),
        currency,
        format_amount(request.budget_per_person)
    );

    let timeline = build_timeline(&requested, venues.first());

    let backup_plan = match &weather {
        Some(w)
            if flag("include_backup_plan")
                && w.precipitation_probability > verifier.settings().rain_risk_threshold =>
        {
            Some(backup_plan(w, &venues))
        }
        _ => None,
    };

    DatePlan {
        title: if requested.is_evening_or_night() {
            format!("Date Night in {}", city)
        } else {
            format!("Date in {}", city)
        },
        weather_summary: weather_summary(&request.date_time, weather.as_ref()),
        safety_checklist: safety_checklist(
            &requested,
            city_info.map(|c| c.country),
            &plan.safety_notes,
        ),
        transportation_note: transportation_note(&requested),
        city,
        date_time: request.date_time.trim().to_string(),
        budget_estimate,
        venues,
        weather,
        timeline,
        backup_plan,
        images,
        created_at: chrono::Utc::now().to_rfc3339(),
    }
}

/// 存活场馆按评分降序、价格接近预算排序，取前 max_venues 个；
/// 无存活时退回到通过安全检查的候选
fn select_venues(
    request: &DateRequest,
    outcome: &VerificationOutcome,
    verifier: &Verifier,
) -> Vec<VenueOption> {
    let mut picked: Vec<(Venue, Vec<String>)> = if outcome.survivors.is_empty() {
        outcome
            .candidates
            .iter()
            .filter(|v| !verifier.is_private(v))
            .map(|v| (v.clone(), vec![UNVERIFIED_NOTE.to_string()]))
            .collect()
    } else {
        outcome.survivors.clone()
    };

    let distance = |v: &Venue| {
        v.price_tier
            .map(|t| (verifier.tier_cost(t) - request.budget_per_person).abs())
            .unwrap_or(f64::MAX)
    };
    picked.sort_by(|(a, _), (b, _)| {
        let ra = a.rating.unwrap_or(0.0);
        let rb = b.rating.unwrap_or(0.0);
        rb.total_cmp(&ra).then_with(|| distance(a).total_cmp(&distance(b)))
    });
    picked.truncate(verifier.settings().max_venues);

    picked
        .into_iter()
        .map(|(v, notes)| VenueOption {
            name: v.name,
            address: v.address,
            rating: v.rating,
            price_tier: v.price_tier,
            opening_hours: v.opening_hours,
            booking_link: v.booking_link,
            maps_url: v.maps_url,
            phone: v.phone,
            notes,
        })
        .collect()
}

/// 以请求时间为锚点（缺省 19:00）的固定偏移时间线
pub fn build_timeline(requested: &RequestedTime, venue: Option<&VenueOption>) -> Vec<TimelineEntry> {
    let Some(anchor) = requested.time.or_else(|| NaiveTime::from_hms_opt(19, 0, 0)) else {
        return Vec::new();
    };
    TIMELINE
        .iter()
        .map(|(offset, activity, at_venue, duration)| {
            let (time, _) = anchor.overflowing_add_signed(Duration::minutes(*offset));
            TimelineEntry {
                time: format_time_label(time),
                activity: activity.to_string(),
                location: if *at_venue {
                    venue.map(|v| v.name.clone())
                } else {
                    None
                },
                duration_minutes: *duration,
            }
        })
        .collect()
}

pub fn weather_summary(date_time: &str, weather: Option<&WeatherReport>) -> String {
    match weather {
        Some(w) => format!(
            "{}: {}, {:.0}°C (feels like {:.0}°C), {:.0}% chance of rain. {}",
            date_time.trim(),
            if w.description.is_empty() { &w.condition } else { &w.description },
            w.temperature,
            w.feels_like,
            w.precipitation_probability,
            w.suggestion
        ),
        None => format!(
            "Weather unavailable for {}; check a local forecast before heading out.",
            date_time.trim()
        ),
    }
}

/// 安全清单：固定项 + 傍晚 / 深夜项 + 紧急电话 + 计划中的安全提示（去重）
pub fn safety_checklist(
    requested: &RequestedTime,
    country: Option<&str>,
    plan_notes: &[String],
) -> Vec<String> {
    let mut items: Vec<String> = vec![
        SHARE_LOCATION.to_string(),
        INDEPENDENT_TRANSPORT.to_string(),
        "Choose a public, well-lit venue".to_string(),
        "Keep emergency contacts handy".to_string(),
        "Trust your instincts - leave if uncomfortable".to_string(),
    ];
    if requested.is_late_night() {
        items.push("Inform someone about your expected return time".to_string());
        items.push("Book a verified cab service for the return journey".to_string());
    } else if requested.is_evening_or_night() {
        items.push("Plan your return trip before setting out".to_string());
    }
    if country == Some("IN") {
        items.push("Emergency: 112 (India)".to_string());
        items.push("Women's helpline: 1091".to_string());
        items.push("Ambulance: 108".to_string());
    }

    let mut seen: HashSet<String> = items.iter().map(|i| i.to_lowercase()).collect();
    for note in plan_notes {
        if seen.insert(note.trim().to_lowercase()) {
            items.push(note.trim().to_string());
        }
    }
    items
}

fn transportation_note(requested: &RequestedTime) -> String {
    let mut note = String::from(
        "Book a cab through a ride-hailing app or take the metro where available; \
share ride details with a friend and arrive 10-15 minutes early.",
    );
    if requested.is_evening_or_night() {
        note.push_str(" Book the return ride in advance.");
    }
    note
}

fn backup_plan(weather: &WeatherReport, venues: &[VenueOption]) -> String {
    let indoor = venues
        .get(1)
        .or_else(|| venues.first())
        .map(|v| format!(" such as {}", v.name))
        .unwrap_or_default();
    format!(
        "Rain is likely ({:.0}%). Switch to a fully indoor venue{} or reserve covered seating, and keep an umbrella handy.",
        weather.precipitation_probability, indoor
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VerifierSection;
    use crate::plan::{PlanSource, PlanStep, StepPayload};
    use crate::services::demo_catalogue;

    fn fixture(pop: f64) -> (DateRequest, Plan, Vec<StepResult>) {
        let request = DateRequest::new("pune", 800.0, "Saturday 7pm").with_dietary("vegetarian");
        let plan = Plan {
            plan_id: "p".to_string(),
            user_intent: "dinner".to_string(),
            steps: vec![
                PlanStep::new(StepKind::GetWeather),
                PlanStep::new(StepKind::SearchVenues).param("query", "x"),
                PlanStep::new(StepKind::ComposeFinal),
            ],
            safety_notes: vec!["share your location with a trusted contact".to_string(), "Avoid isolated lanes".to_string()],
            source: PlanSource::Fallback,
        };
        let results = vec![
            StepResult::success(
                0,
                StepKind::GetWeather,
                StepPayload::Weather(WeatherReport {
                    temperature: 24.0,
                    feels_like: 25.0,
                    condition: "Rain".to_string(),
                    description: "Light rain".to_string(),
                    humidity: 80,
                    wind_speed: 3.0,
                    precipitation_probability: pop,
                    suggestion: "Carry an umbrella".to_string(),
                }),
                "stub",
                1,
            ),
            StepResult::success(
                1,
                StepKind::SearchVenues,
                StepPayload::Venues { venues: demo_catalogue("Pune", None, None) },
                "stub",
                1,
            ),
            StepResult::success(2, StepKind::ComposeFinal, StepPayload::ComposeMarker, "pipeline", 0),
        ];
        (request, plan, results)
    }

    #[test]
    fn test_compose_pune_plan() {
        let verifier = Verifier::new(VerifierSection::default());
        let (request, plan, results) = fixture(10.0);
        let outcome = verifier.verify(&request, &results);
        let date_plan = compose(&request, &plan, &results, &outcome, &verifier);

        assert_eq!(date_plan.title, "Date Night in Pune");
        assert!((3..=5).contains(&date_plan.venues.len()));
        // 评分最高的存活场馆排第一
        assert!(date_plan.venues[0].name.starts_with("Green Leaf"));
        assert_eq!(date_plan.budget_estimate, "₹1,600 for two (₹800 per person)");
        assert!(date_plan.weather_summary.starts_with("Saturday 7pm: Light rain"));
        assert!(date_plan.backup_plan.is_none());
        assert_eq!(date_plan.timeline.len(), 5);
        assert_eq!(date_plan.timeline[0].time, "6:45 PM");
        assert_eq!(date_plan.timeline[4].time, "9:00 PM");
        let checklist = &date_plan.safety_checklist;
        assert_eq!(checklist.iter().filter(|i| i.to_lowercase() == SHARE_LOCATION.to_lowercase()).count(), 1);
        assert!(checklist.contains(&"Avoid isolated lanes".to_string()));
        assert!(checklist.iter().any(|i| i.contains("112")));
    }

    #[test]
    fn test_backup_plan_on_rain_risk() {
        let verifier = Verifier::new(VerifierSection::default());
        let (request, plan, results) = fixture(65.0);
        let outcome = verifier.verify(&request, &results);
        let date_plan = compose(&request, &plan, &results, &outcome, &verifier);
        let backup = date_plan.backup_plan.unwrap();
        assert!(backup.contains("65%"));
    }

    #[test]
    fn test_backup_plan_needs_rain_above_threshold() {
        let verifier = Verifier::new(VerifierSection::default());
        let (request, plan, results) = fixture(50.0);
        let outcome = verifier.verify(&request, &results);
        let date_plan = compose(&request, &plan, &results, &outcome, &verifier);
        assert!(date_plan.backup_plan.is_none());
        assert!(!outcome.issues.iter().any(|i| i.starts_with("high chance of rain")));
    }

    #[test]
    fn test_timeline_always_built() {
        let verifier = Verifier::new(VerifierSection::default());
        let (request, mut plan, results) = fixture(10.0);
        if let Some(step) = plan.steps.last_mut() {
            step.params.insert("include_timeline".to_string(), false.into());
        }
        let outcome = verifier.verify(&request, &results);
        let date_plan = compose(&request, &plan, &results, &outcome, &verifier);
        assert_eq!(date_plan.timeline.len(), 5);
    }

    #[test]
    fn test_degraded_falls_back_to_safe_candidates() {
        let verifier = Verifier::new(VerifierSection::default());
        let (_, plan, results) = fixture(10.0);
        // 预算过低：全部场馆被剔除
        let request = DateRequest::new("Pune", 50.0, "Saturday 7pm");
        let outcome = verifier.verify(&request, &results);
        assert!(outcome.survivors.is_empty());
        let date_plan = compose(&request, &plan, &results, &outcome, &verifier);
        assert_eq!(date_plan.venues.len(), 5);
        assert!(date_plan.venues.iter().all(|v| !v.name.contains("Homestay")));
        assert!(date_plan.venues.iter().all(|v| v.notes[0].contains("did not pass")));
    }

    #[test]
    fn test_timeline_defaults_and_late_night_checklist() {
        let unparsed = parse_date_time("whenever suits");
        let timeline = build_timeline(&unparsed, None);
        assert_eq!(timeline[1].time, "7:00 PM");
        assert!(timeline[1].location.is_none());

        let late = parse_date_time("Friday 11:30pm");
        let items = safety_checklist(&late, None, &[]);
        assert!(items.iter().any(|i| i.contains("expected return time")));
        assert!(!items.iter().any(|i| i.contains("112")));
        assert_eq!(build_timeline(&late, None)[4].time, "1:30 AM");
    }
}
