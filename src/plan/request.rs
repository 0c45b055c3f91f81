//! 用户请求：DateRequest 及其入口校验

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::RequestError;

/// 约会规划请求；接收后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRequest {
    pub city: String,
    /// 人均预算（与币种无关的数值）
    pub budget_per_person: f64,
    /// 自由格式时间，如 "Saturday 7pm"、"2024-02-10 19:00"
    pub date_time: String,
    #[serde(default)]
    pub preferences: String,
    #[serde(default)]
    pub dietary_restrictions: BTreeSet<String>,
    #[serde(default)]
    pub accessibility_needs: Option<String>,
}

impl DateRequest {
    pub fn new(city: impl Into<String>, budget_per_person: f64, date_time: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            budget_per_person,
            date_time: date_time.into(),
            preferences: String::new(),
            dietary_restrictions: BTreeSet::new(),
            accessibility_needs: None,
        }
    }

    pub fn with_preferences(mut self, preferences: impl Into<String>) -> Self {
        self.preferences = preferences.into();
        self
    }

    pub fn with_dietary(mut self, restriction: impl Into<String>) -> Self {
        self.dietary_restrictions.insert(restriction.into());
        self
    }

    pub fn with_accessibility(mut self, needs: impl Into<String>) -> Self {
        self.accessibility_needs = Some(needs.into());
        self
    }

    /// 非空的无障碍需求
    pub fn accessibility(&self) -> Option<&str> {
        self.accessibility_needs
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// 入口校验：必填字段缺失或预算非正数时拒绝
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.city.trim().is_empty() {
            return Err(RequestError::invalid("city", "must not be empty"));
        }
        if self.date_time.trim().is_empty() {
            return Err(RequestError::invalid("date_time", "must not be empty"));
        }
        if !self.budget_per_person.is_finite() || self.budget_per_person <= 0.0 {
            return Err(RequestError::invalid(
                "budget_per_person",
                format!("must be a positive number, got {}", self.budget_per_person),
            ));
        }
        if self
            .dietary_restrictions
            .iter()
            .any(|d| d.trim().is_empty())
        {
            return Err(RequestError::invalid(
                "dietary_restrictions",
                "entries must not be empty",
            ));
        }
        Ok(())
    }
}
