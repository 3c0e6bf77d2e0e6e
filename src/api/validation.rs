use serde_json::Value;
use thiserror::Error;

use super::models::{BufferConfigRequest, ForwardingConfigRequest, ScheduleRequest};
use crate::config::BufferDefaults;
use crate::ledger::{BufferConfigFields, ForwardingConfigFields, HttpMethod, ScheduleFields};
use crate::scheduler::crontab;

#[derive(Debug, Error)]
pub enum RequestValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("field '{0}' must not be empty")]
    EmptyField(&'static str),
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),
    #[error("method '{0}' is not allowed")]
    UnsupportedMethod(String),
    #[error("url '{0}' must be an absolute http/https url")]
    InvalidUrl(String),
    #[error("field '{field}' must be at least {min}")]
    BelowMinimum { field: &'static str, min: i64 },
    #[error("buffer config {0} does not exist")]
    UnknownBufferConfig(u64),
}

type Result<T> = std::result::Result<T, RequestValidationError>;

const SCHEDULE_METHODS: &[HttpMethod] = &[
    HttpMethod::Get,
    HttpMethod::Post,
    HttpMethod::Put,
    HttpMethod::Delete,
];

fn required(value: &Option<String>, field: &'static str) -> Result<String> {
    let value = value
        .as_deref()
        .ok_or(RequestValidationError::MissingField(field))?
        .trim();
    if value.is_empty() {
        return Err(RequestValidationError::EmptyField(field));
    }
    Ok(value.to_string())
}

fn non_empty(value: &str, field: &'static str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RequestValidationError::EmptyField(field));
    }
    Ok(())
}

fn parse_method(raw: &str, allowed: Option<&[HttpMethod]>) -> Result<HttpMethod> {
    let method: HttpMethod = raw
        .parse()
        .map_err(RequestValidationError::UnsupportedMethod)?;
    match allowed {
        Some(allowed) if !allowed.contains(&method) => {
            Err(RequestValidationError::UnsupportedMethod(method.to_string()))
        }
        _ => Ok(method),
    }
}

pub fn validate_url(url: &str) -> Result<()> {
    match reqwest::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => Ok(()),
        _ => Err(RequestValidationError::InvalidUrl(url.to_string())),
    }
}

fn stored_body(body: &Option<Value>) -> Option<String> {
    match body {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) if text.trim().is_empty() => None,
        Some(Value::String(text)) => Some(text.clone()),
        Some(other) => Some(other.to_string()),
    }
}

fn at_least(value: i64, min: i64, field: &'static str) -> Result<i64> {
    if value < min {
        return Err(RequestValidationError::BelowMinimum { field, min });
    }
    Ok(value)
}

/// Full schedule body, used for both create and update
pub fn validate_schedule(request: &ScheduleRequest) -> Result<ScheduleFields> {
    let name = required(&request.name, "name")?;
    let cron_expression = required(&request.cron_expression, "cron_expression")?;
    let url = required(&request.url, "url")?;
    let method = required(&request.method, "method")?;

    crontab::validate(&cron_expression)
        .map_err(|err| RequestValidationError::InvalidCron(err.to_string()))?;
    let method = parse_method(&method, Some(SCHEDULE_METHODS))?;
    validate_url(&url)?;

    Ok(ScheduleFields {
        name,
        cron_expression,
        url,
        method,
        headers: request.headers.clone().unwrap_or_default(),
        body: stored_body(&request.body),
    })
}

pub fn validate_buffer_config(
    request: &BufferConfigRequest,
    defaults: &BufferDefaults,
) -> Result<BufferConfigFields> {
    let name = required(&request.name, "name")?;
    let filter_field = required(&request.filter_field, "filter_field")?;
    let max_size = request
        .max_size
        .unwrap_or(i64::from(defaults.default_max_size));
    let max_time = request
        .max_time_secs
        .unwrap_or(defaults.default_max_time_secs as i64);

    Ok(BufferConfigFields {
        name,
        filter_field,
        max_size: clamp_u32(at_least(max_size, 1, "max_size")?),
        max_time_secs: at_least(max_time, 1, "max_time")? as u64,
        reset_timer_on_message: request.reset_timer_on_message.unwrap_or(false),
        active: request.active.unwrap_or(true),
    })
}

/// Partial update: fields absent from the request keep their current value
pub fn merge_buffer_config(
    current: &BufferConfigFields,
    request: &BufferConfigRequest,
) -> Result<BufferConfigFields> {
    let mut merged = current.clone();
    if let Some(name) = &request.name {
        non_empty(name, "name")?;
        merged.name = name.trim().to_string();
    }
    if let Some(field) = &request.filter_field {
        non_empty(field, "filter_field")?;
        merged.filter_field = field.trim().to_string();
    }
    if let Some(max_size) = request.max_size {
        merged.max_size = clamp_u32(at_least(max_size, 1, "max_size")?);
    }
    if let Some(max_time) = request.max_time_secs {
        merged.max_time_secs = at_least(max_time, 1, "max_time")? as u64;
    }
    if let Some(reset) = request.reset_timer_on_message {
        merged.reset_timer_on_message = reset;
    }
    if let Some(active) = request.active {
        merged.active = active;
    }
    Ok(merged)
}

fn clamp_u32(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// The referenced buffer config is checked by the ledger on insert
pub fn validate_forwarding_config(request: &ForwardingConfigRequest) -> Result<ForwardingConfigFields> {
    let name = required(&request.name, "name")?;
    let url = required(&request.url, "url")?;
    let buffer_config_id = request
        .buffer_config_id
        .ok_or(RequestValidationError::MissingField("buffer_config_id"))?;
    validate_url(&url)?;

    let method = match request.method.as_deref() {
        Some(raw) if !raw.trim().is_empty() => parse_method(raw, None)?,
        _ => HttpMethod::default(),
    };

    Ok(ForwardingConfigFields {
        buffer_config_id,
        name,
        url,
        method,
        headers: request.headers.clone().unwrap_or_default(),
        fields: request.fields.clone(),
        template: request.template.clone().filter(|t| !t.trim().is_empty()),
        active: request.active.unwrap_or(true),
    })
}

pub fn merge_forwarding_config(
    current: &ForwardingConfigFields,
    request: &ForwardingConfigRequest,
) -> Result<ForwardingConfigFields> {
    let mut merged = current.clone();
    if let Some(name) = &request.name {
        non_empty(name, "name")?;
        merged.name = name.trim().to_string();
    }
    if let Some(url) = &request.url {
        validate_url(url.trim())?;
        merged.url = url.trim().to_string();
    }
    if let Some(method) = &request.method {
        merged.method = parse_method(method, None)?;
    }
    if let Some(id) = request.buffer_config_id {
        merged.buffer_config_id = id;
    }
    if let Some(headers) = &request.headers {
        merged.headers = headers.clone();
    }
    if let Some(fields) = &request.fields {
        merged.fields = Some(fields.clone());
    }
    if let Some(template) = &request.template {
        merged.template = Some(template.clone()).filter(|t| !t.trim().is_empty());
    }
    if let Some(active) = request.active {
        merged.active = active;
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schedule_request() -> ScheduleRequest {
        ScheduleRequest {
            name: Some("ping".to_string()),
            cron_expression: Some("*/5 * * * *".to_string()),
            url: Some("https://example.com/ping".to_string()),
            method: Some("post".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn validate_schedule_accepts_valid_payload() {
        let fields = validate_schedule(&schedule_request()).unwrap();
        assert_eq!(fields.method, HttpMethod::Post);
        assert_eq!(fields.body, None);
    }

    #[test]
    fn validate_schedule_reports_missing_and_empty_fields() {
        let mut request = schedule_request();
        request.url = None;
        assert!(matches!(
            validate_schedule(&request),
            Err(RequestValidationError::MissingField("url"))
        ));

        let mut request = schedule_request();
        request.name = Some("   ".to_string());
        assert!(matches!(
            validate_schedule(&request),
            Err(RequestValidationError::EmptyField("name"))
        ));
    }

    #[test]
    fn validate_schedule_rejects_bad_cron_method_and_url() {
        let mut request = schedule_request();
        request.cron_expression = Some("61 * * * *".to_string());
        assert!(matches!(
            validate_schedule(&request),
            Err(RequestValidationError::InvalidCron(_))
        ));

        let mut request = schedule_request();
        request.method = Some("PATCH".to_string());
        assert!(matches!(
            validate_schedule(&request),
            Err(RequestValidationError::UnsupportedMethod(_))
        ));

        let mut request = schedule_request();
        request.url = Some("ftp://example.com".to_string());
        assert!(matches!(
            validate_schedule(&request),
            Err(RequestValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn validate_schedule_stores_body_text() {
        let mut request = schedule_request();
        request.body = Some(json!({"a": 1}));
        assert_eq!(validate_schedule(&request).unwrap().body.as_deref(), Some(r#"{"a":1}"#));

        request.body = Some(json!("plain text"));
        assert_eq!(validate_schedule(&request).unwrap().body.as_deref(), Some("plain text"));

        request.body = Some(Value::Null);
        assert_eq!(validate_schedule(&request).unwrap().body, None);
    }

    #[test]
    fn validate_buffer_config_applies_defaults_and_minimums() {
        let defaults = BufferDefaults::default();
        let request = BufferConfigRequest {
            name: Some("chat".to_string()),
            filter_field: Some("chat_id".to_string()),
            ..Default::default()
        };
        let fields = validate_buffer_config(&request, &defaults).unwrap();
        assert_eq!(fields.max_size, defaults.default_max_size);
        assert_eq!(fields.max_time_secs, defaults.default_max_time_secs);
        assert!(fields.active);

        let request = BufferConfigRequest {
            max_size: Some(0),
            ..request
        };
        assert!(matches!(
            validate_buffer_config(&request, &defaults),
            Err(RequestValidationError::BelowMinimum { field: "max_size", .. })
        ));
    }

    #[test]
    fn merge_buffer_config_keeps_absent_fields() {
        let current = BufferConfigFields {
            name: "chat".to_string(),
            filter_field: "chat_id".to_string(),
            max_size: 5,
            max_time_secs: 30,
            reset_timer_on_message: false,
            active: true,
        };
        let request = BufferConfigRequest {
            max_time_secs: Some(90),
            reset_timer_on_message: Some(true),
            ..Default::default()
        };

        let merged = merge_buffer_config(&current, &request).unwrap();
        assert_eq!(merged.name, "chat");
        assert_eq!(merged.max_size, 5);
        assert_eq!(merged.max_time_secs, 90);
        assert!(merged.reset_timer_on_message);

        let bad = BufferConfigRequest {
            max_time_secs: Some(0),
            ..Default::default()
        };
        assert!(merge_buffer_config(&current, &bad).is_err());
    }

    #[test]
    fn validate_forwarding_config_defaults_method() {
        let request = ForwardingConfigRequest {
            buffer_config_id: Some(1),
            name: Some("crm".to_string()),
            url: Some("http://crm.internal/hook".to_string()),
            template: Some(String::new()),
            ..Default::default()
        };
        let fields = validate_forwarding_config(&request).unwrap();
        assert_eq!(fields.method, HttpMethod::Post);
        assert_eq!(fields.template, None);

        let request = ForwardingConfigRequest {
            buffer_config_id: None,
            ..request
        };
        assert!(matches!(
            validate_forwarding_config(&request),
            Err(RequestValidationError::MissingField("buffer_config_id"))
        ));
    }

    #[test]
    fn merge_forwarding_config_validates_changed_fields() {
        let current = ForwardingConfigFields {
            buffer_config_id: 1,
            name: "crm".to_string(),
            url: "http://crm.internal/hook".to_string(),
            method: HttpMethod::Post,
            headers: Default::default(),
            fields: None,
            template: None,
            active: true,
        };

        let request = ForwardingConfigRequest {
            method: Some("PATCH".to_string()),
            active: Some(false),
            ..Default::default()
        };
        let merged = merge_forwarding_config(&current, &request).unwrap();
        assert_eq!(merged.method, HttpMethod::Patch);
        assert!(!merged.active);
        assert_eq!(merged.url, current.url);

        let request = ForwardingConfigRequest {
            url: Some("not a url".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            merge_forwarding_config(&current, &request),
            Err(RequestValidationError::InvalidUrl(_))
        ));
    }
}
