//! 自由格式时间与营业时间解析
//!
//! 请求中的 date_time（"Saturday 7pm"、"2024-02-10 19:00"、"tonight"）与场馆营业时间描述
//! （"Saturday: 11:00 AM – 11:00 PM"、"18:00-01:00"、"Open 24 hours"、"Closed"）都在这里解析。
//! 解析失败不报错，返回 None / Unknown，由调用方决定如何标记。

use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike, Weekday};
use regex::Regex;

/// 请求时间解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestedTime {
    pub weekday: Option<Weekday>,
    pub time: Option<NaiveTime>,
    /// 文本中出现 evening / night / tonight 等词
    pub evening_hint: bool,
}

impl RequestedTime {
    /// 是否落在傍晚 / 夜间（18:00 之后或凌晨 5 点前）
    pub fn is_evening_or_night(&self) -> bool {
        match self.time {
            Some(t) => t.hour() >= 18 || t.hour() < 5,
            None => self.evening_hint,
        }
    }

    /// 深夜（21:00 之后或凌晨 5 点前）
    pub fn is_late_night(&self) -> bool {
        matches!(self.time, Some(t) if t.hour() >= 21 || t.hour() < 5)
    }
}

fn ampm_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(\d{1,2})(?::(\d{2}))?\s*([ap])\.?m\.?\b").expect("valid regex")
    })
}

fn clock_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,2}):(\d{2})\b").expect("valid regex"))
}

fn iso_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("valid regex"))
}

fn time_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d{1,2})(?::(\d{2}))?\s*([ap])?\.?m?\.?").expect("valid regex")
    })
}

const WEEKDAYS: [(&str, &str, Weekday); 7] = [
    ("monday", "mon", Weekday::Mon),
    ("tuesday", "tue", Weekday::Tue),
    ("wednesday", "wed", Weekday::Wed),
    ("thursday", "thu", Weekday::Thu),
    ("friday", "fri", Weekday::Fri),
    ("saturday", "sat", Weekday::Sat),
    ("sunday", "sun", Weekday::Sun),
];

fn weekday_from_word(word: &str) -> Option<Weekday> {
    let w = word.trim().to_lowercase();
    WEEKDAYS
        .iter()
        .find(|(full, short, _)| w == *full || w == *short)
        .map(|(_, _, d)| *d)
}

fn to_24h(hour: u32, minute: u32, meridiem: Option<&str>) -> Option<NaiveTime> {
    let hour = match meridiem.map(|m| m.to_ascii_lowercase()) {
        Some(m) if m == "a" => {
            if hour == 12 {
                0
            } else {
                hour
            }
        }
        Some(m) if m == "p" => {
            if hour == 12 {
                12
            } else {
                hour + 12
            }
        }
        _ => hour,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// 解析请求中的自由格式时间
pub fn parse_date_time(input: &str) -> RequestedTime {
    let lower = input.to_lowercase();
    let mut out = RequestedTime {
        evening_hint: ["evening", "night", "tonight", "dinner"]
            .iter()
            .any(|w| lower.contains(w)),
        ..RequestedTime::default()
    };

    if let Some(caps) = iso_date_re().captures(&lower) {
        let date = (|| {
            let y = caps.get(1)?.as_str().parse().ok()?;
            let m = caps.get(2)?.as_str().parse().ok()?;
            let d = caps.get(3)?.as_str().parse().ok()?;
            NaiveDate::from_ymd_opt(y, m, d)
        })();
        out.weekday = date.map(|d| d.weekday());
    }
    if out.weekday.is_none() {
        out.weekday = lower
            .split(|c: char| !c.is_alphabetic())
            .find_map(weekday_from_word);
    }

    if let Some(caps) = ampm_re().captures(&lower) {
        let hour: u32 = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let minute: u32 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        if (1..=12).contains(&hour) {
            out.time = to_24h(hour, minute, caps.get(3).map(|m| m.as_str()));
        }
    } else if let Some(caps) = clock_re().captures(&lower) {
        let hour: u32 = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(99);
        let minute: u32 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(99);
        out.time = NaiveTime::from_hms_opt(hour, minute, 0);
    } else if lower.contains("noon") {
        out.time = NaiveTime::from_hms_opt(12, 0, 0);
    } else if lower.contains("midnight") {
        out.time = NaiveTime::from_hms_opt(0, 0, 0);
    }

    out
}

/// 单条营业时间描述的解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hours {
    Closed,
    AlwaysOpen,
    Range { open: NaiveTime, close: NaiveTime },
    Unknown,
}

impl Hours {
    pub fn covers(&self, t: NaiveTime) -> Option<bool> {
        match *self {
            Hours::Closed => Some(false),
            Hours::AlwaysOpen => Some(true),
            Hours::Range { open, close } if open == close => Some(true),
            Hours::Range { open, close } if open < close => Some(open <= t && t < close),
            // 跨午夜，如 18:00-01:00
            Hours::Range { open, close } => Some(t >= open || t < close),
            Hours::Unknown => None,
        }
    }
}

/// 解析时间段部分（不含星期前缀）
pub fn parse_hours(spec: &str) -> Hours {
    let lower = spec.trim().to_lowercase();
    if lower.is_empty() {
        return Hours::Unknown;
    }
    if lower.contains("closed") {
        return Hours::Closed;
    }
    if lower.contains("24 hours") || lower.contains("24/7") {
        return Hours::AlwaysOpen;
    }
    let parts: Vec<&str> = lower
        .split(|c: char| c == '–' || c == '—' || c == '-')
        .flat_map(|p| p.split(" to "))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() != 2 {
        return Hours::Unknown;
    }
    let parse_one = |s: &str| -> Option<(u32, u32, Option<String>)> {
        let caps = time_token_re().captures(s)?;
        let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        let minute: u32 = match caps.get(2) {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };
        Some((hour, minute, caps.get(3).map(|m| m.as_str().to_string())))
    };
    let (Some(a), Some(b)) = (parse_one(parts[0]), parse_one(parts[1])) else {
        return Hours::Unknown;
    };
    // "11:00 – 11:00 PM"：前半缺少 AM/PM 时沿用后半
    let a_meridiem = a.2.clone().or_else(|| b.2.clone().filter(|_| a.0 < b.0));
    let open = to_24h(a.0, a.1, a_meridiem.as_deref());
    let close = if b.0 == 24 && b.1 == 0 {
        NaiveTime::from_hms_opt(0, 0, 0)
    } else {
        to_24h(b.0, b.1, b.2.as_deref())
    };
    match (open, close) {
        (Some(open), Some(close)) => Hours::Range { open, close },
        _ => Hours::Unknown,
    }
}

/// 星期前缀是否包含目标日（支持 "Saturday"、"Mon-Fri"、"Monday-Sunday"、"Daily"）
fn prefix_covers(prefix: &str, day: Weekday) -> Option<bool> {
    let p = prefix.trim().to_lowercase();
    if p == "daily" || p == "everyday" || p == "every day" {
        return Some(true);
    }
    let ends: Vec<&str> = p
        .split(|c: char| c == '–' || c == '—' || c == '-')
        .map(str::trim)
        .collect();
    match ends.as_slice() {
        [single] => weekday_from_word(single).map(|d| d == day),
        [from, to] => {
            let from = weekday_from_word(from)?.num_days_from_monday();
            let to = weekday_from_word(to)?.num_days_from_monday();
            let d = day.num_days_from_monday();
            Some(if from <= to {
                from <= d && d <= to
            } else {
                d >= from || d <= to
            })
        }
        _ => None,
    }
}

/// 拆分 "Saturday: 11:00 AM – 11:00 PM" 为 (Some("Saturday"), "11:00 AM – 11:00 PM")
fn split_day_prefix(line: &str) -> (Option<&str>, &str) {
    if let Some((head, tail)) = line.split_once(": ") {
        if head.chars().any(|c| c.is_alphabetic()) && !head.chars().any(|c| c.is_ascii_digit()) {
            return (Some(head), tail);
        }
    }
    (None, line)
}

/// 营业时间核对结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoursCheck {
    Open,
    Closed,
    /// 缺失或无法解析（保留场馆但标记）
    Unknown,
}

/// 核对场馆营业时间是否覆盖请求时间
pub fn check_opening_hours(lines: &[String], requested: &RequestedTime) -> HoursCheck {
    let Some(t) = requested.time else {
        return HoursCheck::Unknown;
    };
    if lines.is_empty() {
        return HoursCheck::Unknown;
    }

    let mut selected: Option<Hours> = None;
    for line in lines {
        let (prefix, rest) = split_day_prefix(line);
        match (prefix, requested.weekday) {
            (Some(prefix), Some(day)) => {
                if prefix_covers(prefix, day) == Some(true) {
                    selected = Some(parse_hours(rest));
                    break;
                }
            }
            (Some(_), None) => {
                // 未指定星期：仅当只有一条描述时采用
                if lines.len() == 1 {
                    selected = Some(parse_hours(rest));
                }
            }
            (None, _) => {
                selected = Some(parse_hours(rest));
                break;
            }
        }
    }

    match selected.and_then(|h| h.covers(t)) {
        Some(true) => HoursCheck::Open,
        Some(false) => HoursCheck::Closed,
        None => HoursCheck::Unknown,
    }
}

/// 时间标签，如 "6:45 PM"
pub fn format_time_label(t: NaiveTime) -> String {
    let (pm, hour) = t.hour12();
    format!("{}:{:02} {}", hour, t.minute(), if pm { "PM" } else { "AM" })
}
