//! 规划辅助：固定城市坐标表、预算档位、标签归一化

/// 城市坐标（固定查找表，不做在线地理编码）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CityInfo {
    pub name: &'static str,
    pub latitude: f64,
    pub longitude: f64,
    /// ISO 国家代码
    pub country: &'static str,
}

const CITIES: &[(&str, CityInfo)] = &[
    ("mumbai", CityInfo { name: "Mumbai", latitude: 19.0760, longitude: 72.8777, country: "IN" }),
    ("delhi", CityInfo { name: "Delhi", latitude: 28.7041, longitude: 77.1025, country: "IN" }),
    ("new delhi", CityInfo { name: "Delhi", latitude: 28.7041, longitude: 77.1025, country: "IN" }),
    ("bangalore", CityInfo { name: "Bangalore", latitude: 12.9716, longitude: 77.5946, country: "IN" }),
    ("bengaluru", CityInfo { name: "Bangalore", latitude: 12.9716, longitude: 77.5946, country: "IN" }),
    ("pune", CityInfo { name: "Pune", latitude: 18.5204, longitude: 73.8567, country: "IN" }),
    ("hyderabad", CityInfo { name: "Hyderabad", latitude: 17.3850, longitude: 78.4867, country: "IN" }),
    ("chennai", CityInfo { name: "Chennai", latitude: 13.0827, longitude: 80.2707, country: "IN" }),
    ("kolkata", CityInfo { name: "Kolkata", latitude: 22.5726, longitude: 88.3639, country: "IN" }),
    ("ahmedabad", CityInfo { name: "Ahmedabad", latitude: 23.0225, longitude: 72.5714, country: "IN" }),
    ("jaipur", CityInfo { name: "Jaipur", latitude: 26.9124, longitude: 75.7873, country: "IN" }),
    ("goa", CityInfo { name: "Goa", latitude: 15.2993, longitude: 74.1240, country: "IN" }),
];

/// 查城市坐标；表外城市返回 None（适配器改用城市名查询）
pub fn lookup_city(city: &str) -> Option<CityInfo> {
    let key = city.trim().to_lowercase();
    CITIES.iter().find(|(k, _)| *k == key).map(|(_, info)| *info)
}

/// 人均预算 → 价格档位 1..=4（Places 的 priceLevel 语义）
pub fn price_level_for_budget(budget_per_person: f64) -> u8 {
    if budget_per_person < 500.0 {
        1
    } else if budget_per_person < 1500.0 {
        2
    } else if budget_per_person < 3000.0 {
        3
    } else {
        4
    }
}

/// 标签归一化："Wheelchair Accessible" → "wheelchair_accessible"
pub fn normalize_tag(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.trim().chars() {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// 千分位整数金额："1600" → "1,600"
pub fn format_amount(amount: f64) -> String {
    let rounded = amount.round().max(0.0) as u64;
    let digits = rounded.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_city_case_insensitive() {
        let pune = lookup_city("  PUNE ").unwrap();
        assert_eq!(pune.name, "Pune");
        assert_eq!(pune.country, "IN");
        assert_eq!(lookup_city("Bengaluru").unwrap().name, "Bangalore");
        assert!(lookup_city("Atlantis").is_none());
    }

    #[test]
    fn test_price_level_brackets() {
        assert_eq!(price_level_for_budget(300.0), 1);
        assert_eq!(price_level_for_budget(800.0), 2);
        assert_eq!(price_level_for_budget(1500.0), 3);
        assert_eq!(price_level_for_budget(5000.0), 4);
    }

    #[test]
    fn test_normalize_tag() {
        assert_eq!(normalize_tag("Wheelchair accessible"), "wheelchair_accessible");
        assert_eq!(normalize_tag("  gluten-free "), "gluten_free");
        assert_eq!(normalize_tag("Vegetarian"), "vegetarian");
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(1600.0), "1,600");
        assert_eq!(format_amount(999.4), "999");
        assert_eq!(format_amount(1234567.0), "1,234,567");
    }
}
