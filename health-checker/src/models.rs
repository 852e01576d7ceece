use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::CheckerError;

fn default_expected_status_code() -> u16 {
    200
}

fn default_interval_minutes() -> u32 {
    5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Fail,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckStatus {
    type Err = CheckerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PASS" => Ok(Self::Pass),
            "FAIL" => Ok(Self::Fail),
            other => Err(CheckerError::InvalidRecord(format!(
                "unknown check status '{other}'"
            ))),
        }
    }
}

/// Probes are read-only; GET is the only verb accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeMethod {
    #[default]
    #[serde(rename = "GET")]
    Get,
}

impl ProbeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckDefinition {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub required_fields: Vec<String>,
    pub expected_status_code: u16,
    pub latency_threshold_ms: Option<u64>,
    pub interval_minutes: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCheckDefinition {
    pub name: String,
    pub url: String,
    pub required_fields: Vec<String>,
    #[serde(default = "default_expected_status_code")]
    pub expected_status_code: u16,
    #[serde(default)]
    pub latency_threshold_ms: Option<u64>,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,
}

impl NewCheckDefinition {
    pub fn new(name: &str, url: &str, required_fields: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            required_fields: required_fields.iter().map(|f| f.to_string()).collect(),
            expected_status_code: default_expected_status_code(),
            latency_threshold_ms: None,
            interval_minutes: default_interval_minutes(),
        }
    }

    pub fn validate(&self) -> Result<(), CheckerError> {
        if self.name.trim().is_empty() {
            return Err(CheckerError::Validation("name cannot be empty".into()));
        }
        validate_url(&self.url)?;
        if self.required_fields.is_empty() {
            return Err(CheckerError::Validation(
                "required_fields must list at least one field".into(),
            ));
        }
        if self.required_fields.iter().any(|f| f.trim().is_empty()) {
            return Err(CheckerError::Validation(
                "required_fields cannot contain empty paths".into(),
            ));
        }
        validate_status_code(self.expected_status_code)?;
        if self.interval_minutes == 0 {
            return Err(CheckerError::Validation(
                "interval_minutes must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// What a single probe must verify. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSpec {
    #[serde(default)]
    method: ProbeMethod,
    url: String,
    #[serde(default)]
    required_fields: Vec<String>,
    #[serde(default = "default_expected_status_code")]
    expected_status_code: u16,
    #[serde(default)]
    latency_threshold_ms: Option<u64>,
}

impl ProbeSpec {
    pub fn get(url: impl Into<String>, required_fields: Vec<String>) -> Self {
        Self {
            method: ProbeMethod::Get,
            url: url.into(),
            required_fields,
            expected_status_code: default_expected_status_code(),
            latency_threshold_ms: None,
        }
    }

    pub fn with_expected_status_code(mut self, status_code: u16) -> Self {
        self.expected_status_code = status_code;
        self
    }

    pub fn with_latency_threshold_ms(mut self, threshold_ms: Option<u64>) -> Self {
        self.latency_threshold_ms = threshold_ms;
        self
    }

    pub fn method(&self) -> ProbeMethod {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn required_fields(&self) -> &[String] {
        &self.required_fields
    }

    pub fn expected_status_code(&self) -> u16 {
        self.expected_status_code
    }

    pub fn latency_threshold_ms(&self) -> Option<u64> {
        self.latency_threshold_ms
    }

    pub fn validate(&self) -> Result<(), CheckerError> {
        validate_url(&self.url)?;
        validate_status_code(self.expected_status_code)
    }
}

impl From<&CheckDefinition> for ProbeSpec {
    fn from(definition: &CheckDefinition) -> Self {
        ProbeSpec::get(definition.url.clone(), definition.required_fields.clone())
            .with_expected_status_code(definition.expected_status_code)
            .with_latency_threshold_ms(definition.latency_threshold_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: CheckStatus,
    pub missing_fields: Vec<String>,
    pub status_code: Option<u16>,
    pub latency_ms: f64,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn is_pass(&self) -> bool {
        self.status == CheckStatus::Pass
    }
}

/// A persisted `ExecutionResult`, tied to its check by `check_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub check_id: i64,
    pub status: CheckStatus,
    pub missing_fields: Vec<String>,
    pub status_code: Option<u16>,
    pub latency_ms: f64,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn result(&self) -> ExecutionResult {
        ExecutionResult {
            status: self.status,
            missing_fields: self.missing_fields.clone(),
            status_code: self.status_code,
            latency_ms: self.latency_ms,
            error: self.error.clone(),
        }
    }
}

fn validate_url(raw: &str) -> Result<(), CheckerError> {
    let url = Url::parse(raw)
        .map_err(|e| CheckerError::Validation(format!("invalid url '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(CheckerError::Validation(format!(
            "unsupported url scheme '{other}'"
        ))),
    }
}

fn validate_status_code(status_code: u16) -> Result<(), CheckerError> {
    if (100..=599).contains(&status_code) {
        Ok(())
    } else {
        Err(CheckerError::Validation(format!(
            "expected_status_code {status_code} is not a valid HTTP status"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_check_defaults_from_json() {
        let new_check: NewCheckDefinition = serde_json::from_value(json!({
            "name": "users api",
            "url": "https://api.example.com/users",
            "required_fields": ["data.id"]
        }))
        .unwrap();

        assert_eq!(new_check.expected_status_code, 200);
        assert_eq!(new_check.interval_minutes, 5);
        assert_eq!(new_check.latency_threshold_ms, None);
        assert!(new_check.validate().is_ok());
    }

    #[test]
    fn test_new_check_validation() {
        let valid = NewCheckDefinition::new("a", "http://example.com", &["status"]);
        assert!(valid.validate().is_ok());

        let mut no_fields = valid.clone();
        no_fields.required_fields.clear();
        assert!(matches!(no_fields.validate(), Err(CheckerError::Validation(_))));

        let mut zero_interval = valid.clone();
        zero_interval.interval_minutes = 0;
        assert!(zero_interval.validate().is_err());

        let mut bad_url = valid.clone();
        bad_url.url = "ftp://example.com/file".to_string();
        assert!(bad_url.validate().is_err());

        let mut blank_name = valid.clone();
        blank_name.name = "   ".to_string();
        assert!(blank_name.validate().is_err());

        let mut bad_status = valid;
        bad_status.expected_status_code = 42;
        assert!(bad_status.validate().is_err());
    }

    #[test]
    fn test_probe_spec_rejects_other_methods() {
        let result: Result<ProbeSpec, _> = serde_json::from_value(json!({
            "method": "POST",
            "url": "http://example.com",
            "required_fields": []
        }));
        assert!(result.is_err());

        let spec: ProbeSpec = serde_json::from_value(json!({
            "method": "GET",
            "url": "http://example.com",
            "required_fields": ["a"],
            "latency_threshold_ms": 250
        }))
        .unwrap();
        assert_eq!(spec.method(), ProbeMethod::Get);
        assert_eq!(spec.expected_status_code(), 200);
        assert_eq!(spec.latency_threshold_ms(), Some(250));
    }

    #[test]
    fn test_probe_spec_from_definition() {
        let definition = CheckDefinition {
            id: 7,
            name: "orders".to_string(),
            url: "http://example.com/orders".to_string(),
            required_fields: vec!["status".to_string(), "data.id".to_string()],
            expected_status_code: 201,
            latency_threshold_ms: Some(800),
            interval_minutes: 1,
            created_at: Utc::now(),
        };

        let spec = ProbeSpec::from(&definition);
        assert_eq!(spec.url(), "http://example.com/orders");
        assert_eq!(spec.required_fields(), definition.required_fields.as_slice());
        assert_eq!(spec.expected_status_code(), 201);
        assert_eq!(spec.latency_threshold_ms(), Some(800));
    }

    #[test]
    fn test_check_status_text_form() {
        assert_eq!(serde_json::to_value(CheckStatus::Pass).unwrap(), json!("PASS"));
        assert_eq!("FAIL".parse::<CheckStatus>().unwrap(), CheckStatus::Fail);
        assert!("pass".parse::<CheckStatus>().is_err());
    }
}
