use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::alert::AlertRecord;
use crate::core::time::now_utc;

/// Predicate configuration for the watch loop. All set fields must match
/// (AND); an unset field is no constraint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlertFilter {
    pub severity_min: Option<i64>,
    pub product: Option<String>,
    pub hostname: Option<String>,
    /// Accepted in configuration but not applied during matching.
    pub status: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl AlertFilter {
    pub fn is_empty(&self) -> bool {
        self.severity_min.is_none()
            && self.product.is_none()
            && self.hostname.is_none()
            && self.status.is_none()
            && self.keywords.is_empty()
    }

    pub fn matches(&self, alert: &AlertRecord) -> bool {
        if let Some(min) = self.severity_min {
            match alert.get("severity") {
                // Absent severity counts as zero.
                None => {
                    if min > 0 {
                        return false;
                    }
                }
                // Unparsable severity never excludes.
                Some(_) => {
                    if let Some(sev) = alert.severity_i64() {
                        if sev < min {
                            return false;
                        }
                    }
                }
            }
        }

        if let Some(product) = &self.product {
            let prod = alert
                .get("product")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_uppercase();
            if !prod.contains(&product.to_uppercase()) {
                return false;
            }
        }

        if let Some(hostname) = &self.hostname {
            let host = alert.hostname().unwrap_or("").to_lowercase();
            if !host.contains(&hostname.to_lowercase()) {
                return false;
            }
        }

        if !self.keywords.is_empty() {
            let text = format!(
                "{} {}",
                alert.name().unwrap_or(""),
                alert.description().unwrap_or("")
            )
            .to_lowercase();
            if !self
                .keywords
                .iter()
                .any(|kw| text.contains(&kw.to_lowercase()))
            {
                return false;
            }
        }

        true
    }
}

/// Session counters over accepted alerts.
#[derive(Debug, Clone)]
pub struct AlertStats {
    pub total: u64,
    pub by_severity: BTreeMap<String, u64>,
    pub by_product: BTreeMap<String, u64>,
    pub last_reset: DateTime<Utc>,
}

impl Default for AlertStats {
    fn default() -> Self {
        Self {
            total: 0,
            by_severity: BTreeMap::new(),
            by_product: BTreeMap::new(),
            last_reset: now_utc(),
        }
    }
}

impl AlertStats {
    pub fn add(&mut self, alert: &AlertRecord) {
        self.total += 1;

        let sev = match alert.get("severity") {
            Some(Value::Null) | None => "unknown".to_string(),
            Some(_) => alert.severity_display(),
        };
        *self.by_severity.entry(sev).or_insert(0) += 1;

        let prod = alert
            .get("product")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        *self.by_product.entry(prod).or_insert(0) += 1;
    }

    pub fn reset(&mut self) {
        self.total = 0;
        self.by_severity.clear();
        self.by_product.clear();
        self.last_reset = now_utc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> AlertRecord {
        serde_json::from_value(value).unwrap()
    }

    fn sample() -> AlertRecord {
        record(json!({
            "severity": 70,
            "product": "EDR",
            "device": {"hostname": "web01"},
            "name": "Credential theft",
            "description": "mimikatz detected on host",
        }))
    }

    #[test]
    fn filters_are_and_combined() {
        let pass = AlertFilter {
            severity_min: Some(50),
            product: Some("edr".into()),
            ..Default::default()
        };
        assert!(pass.matches(&sample()));

        let fail = AlertFilter {
            severity_min: Some(80),
            ..Default::default()
        };
        assert!(!fail.matches(&sample()));
    }

    #[test]
    fn empty_filter_passes_everything() {
        let filter = AlertFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches(&sample()));
        assert!(filter.matches(&record(json!({}))));
    }

    #[test]
    fn unparsable_severity_never_excludes() {
        let filter = AlertFilter {
            severity_min: Some(50),
            ..Default::default()
        };
        assert!(filter.matches(&record(json!({"severity": "informational"}))));
    }

    #[test]
    fn missing_severity_counts_as_zero() {
        let filter = AlertFilter {
            severity_min: Some(50),
            ..Default::default()
        };
        assert!(!filter.matches(&record(json!({"name": "no severity"}))));
    }

    #[test]
    fn hostname_match_is_case_insensitive_substring() {
        let filter = AlertFilter {
            hostname: Some("WEB".into()),
            ..Default::default()
        };
        assert!(filter.matches(&sample()));

        let other = AlertFilter {
            hostname: Some("db01".into()),
            ..Default::default()
        };
        assert!(!other.matches(&sample()));
    }

    #[test]
    fn any_keyword_accepts() {
        let filter = AlertFilter {
            keywords: vec!["ransomware".into(), "MIMIKATZ".into()],
            ..Default::default()
        };
        assert!(filter.matches(&sample()));

        let miss = AlertFilter {
            keywords: vec!["ransomware".into()],
            ..Default::default()
        };
        assert!(!miss.matches(&sample()));
    }

    #[test]
    fn status_field_is_not_applied() {
        let filter = AlertFilter {
            status: Some("closed".into()),
            ..Default::default()
        };
        assert!(filter.matches(&record(json!({"status": "new"}))));
    }

    #[test]
    fn stats_count_by_severity_and_product() {
        let mut stats = AlertStats::default();
        stats.add(&sample());
        stats.add(&sample());
        stats.add(&record(json!({"product": "IDP"})));

        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_severity.get("70"), Some(&2));
        assert_eq!(stats.by_severity.get("unknown"), Some(&1));
        assert_eq!(stats.by_product.get("EDR"), Some(&2));
        assert_eq!(stats.by_product.get("IDP"), Some(&1));

        stats.reset();
        assert_eq!(stats.total, 0);
        assert!(stats.by_severity.is_empty());
    }
}
