//! Configuration types.
//!
//! Everything here is immutable once built. The gateway receives the config
//! at construction and shares it behind an `Arc`; nothing reads the process
//! environment after startup.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc, Weekday};
use secrecy::SecretString;

use crate::error::ConfigError;

/// Maximum attempts per verification factor before the call is locked.
pub const MAX_VERIFICATION_ATTEMPTS: u32 = 3;

/// Recording control parameters used for pause/resume intents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingConfig {
    /// Control ID of the recording started by the transport layer.
    pub control_id: String,
    /// Container format requested when recording resumes.
    pub format: String,
    pub stereo: bool,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            control_id: "main".to_string(),
            format: "mp3".to_string(),
            stereo: true,
        }
    }
}

/// A department callers can be transferred to once verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepartmentConfig {
    /// Lowercase lookup name, e.g. "billing".
    pub name: String,
    /// Transfer destination handed to call control.
    pub route: String,
    pub description: String,
}

impl DepartmentConfig {
    pub fn new(
        name: impl Into<String>,
        route: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into().trim().to_lowercase(),
            route: route.into(),
            description: description.into(),
        }
    }
}

/// The stock department table.
pub fn default_departments() -> Vec<DepartmentConfig> {
    vec![
        DepartmentConfig::new(
            "appointments",
            "/appointments",
            "Scheduling, rescheduling, cancellations",
        ),
        DepartmentConfig::new("billing", "/billing", "Account balance, payments, insurance"),
        DepartmentConfig::new(
            "medical",
            "/medical",
            "Prescription refills, general questions",
        ),
    ]
}

/// Gateway configuration.
#[derive(Debug)]
pub struct GatewayConfig {
    pub clinic_name: String,
    /// Local hour the clinic opens (0-23).
    pub opening_hour: u32,
    /// Local hour the clinic closes (1-24, exclusive; 24 is midnight).
    pub closing_hour: u32,
    /// Offset of clinic local time from UTC.
    pub utc_offset: FixedOffset,
    pub max_verification_attempts: u32,
    pub recording: RecordingConfig,
    pub departments: Vec<DepartmentConfig>,
    /// JSON patient roster. `None` loads the built-in demo roster.
    pub directory_path: Option<PathBuf>,
    pub bind_port: u16,
    /// Sessions untouched for this long are dropped by the prune task.
    pub session_idle_timeout: Duration,
    pub prune_interval: Duration,
    /// Bearer token required on webhook requests, if set.
    pub webhook_token: Option<SecretString>,
    /// Directory for the rolling security audit log, if set.
    pub audit_dir: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            clinic_name: "HealthFirst Medical".to_string(),
            opening_hour: 8,
            closing_hour: 18,
            utc_offset: Utc.fix(),
            max_verification_attempts: MAX_VERIFICATION_ATTEMPTS,
            recording: RecordingConfig::default(),
            departments: default_departments(),
            directory_path: None,
            bind_port: 8080,
            session_idle_timeout: Duration::from_secs(3600), // 1 hour
            prune_interval: Duration::from_secs(60),
            webhook_token: None,
            audit_dir: None,
        }
    }
}

impl GatewayConfig {
    /// Build config from `CARE_GATEWAY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Unset keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup("CARE_GATEWAY_CLINIC_NAME") {
            config.clinic_name = name;
        }
        if let Some(raw) = lookup("CARE_GATEWAY_OPENING_HOUR") {
            config.opening_hour = parse_hour("CARE_GATEWAY_OPENING_HOUR", &raw, 23)?;
        }
        if let Some(raw) = lookup("CARE_GATEWAY_CLOSING_HOUR") {
            config.closing_hour = parse_hour("CARE_GATEWAY_CLOSING_HOUR", &raw, 24)?;
        }
        if config.opening_hour >= config.closing_hour {
            return Err(invalid(
                "CARE_GATEWAY_CLOSING_HOUR",
                format!(
                    "closing hour {} must be after opening hour {}",
                    config.closing_hour, config.opening_hour
                ),
            ));
        }
        if let Some(raw) = lookup("CARE_GATEWAY_UTC_OFFSET_HOURS") {
            let hours: i32 = parse_num("CARE_GATEWAY_UTC_OFFSET_HOURS", &raw)?;
            config.utc_offset = hours
                .checked_mul(3600)
                .and_then(FixedOffset::east_opt)
                .ok_or_else(|| {
                    invalid("CARE_GATEWAY_UTC_OFFSET_HOURS", format!("{hours} is out of range"))
                })?;
        }
        if let Some(raw) = lookup("CARE_GATEWAY_MAX_ATTEMPTS") {
            let max: u32 = parse_num("CARE_GATEWAY_MAX_ATTEMPTS", &raw)?;
            if max == 0 {
                return Err(invalid("CARE_GATEWAY_MAX_ATTEMPTS", "must be at least 1"));
            }
            config.max_verification_attempts = max;
        }

        if let Some(control_id) = lookup("CARE_GATEWAY_RECORDING_CONTROL_ID") {
            config.recording.control_id = control_id;
        }
        if let Some(format) = lookup("CARE_GATEWAY_RECORDING_FORMAT") {
            config.recording.format = format;
        }
        if let Some(raw) = lookup("CARE_GATEWAY_RECORDING_STEREO") {
            config.recording.stereo = parse_num("CARE_GATEWAY_RECORDING_STEREO", &raw)?;
        }

        if let Some(raw) = lookup("CARE_GATEWAY_DEPARTMENTS") {
            config.departments = parse_departments(&raw)?;
        }

        config.directory_path = lookup("CARE_GATEWAY_DIRECTORY_PATH").map(PathBuf::from);
        config.audit_dir = lookup("CARE_GATEWAY_AUDIT_DIR").map(PathBuf::from);

        if let Some(raw) = lookup("CARE_GATEWAY_PORT") {
            config.bind_port = parse_num("CARE_GATEWAY_PORT", &raw)?;
        }
        if let Some(raw) = lookup("CARE_GATEWAY_SESSION_IDLE_SECS") {
            let secs: u64 = parse_num("CARE_GATEWAY_SESSION_IDLE_SECS", &raw)?;
            config.session_idle_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("CARE_GATEWAY_PRUNE_INTERVAL_SECS") {
            let secs: u64 = parse_num("CARE_GATEWAY_PRUNE_INTERVAL_SECS", &raw)?;
            config.prune_interval = Duration::from_secs(secs.max(1));
        }

        config.webhook_token = lookup("CARE_GATEWAY_WEBHOOK_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .map(SecretString::from);

        Ok(config)
    }

    /// Clinic-local time for a UTC instant.
    pub fn local_time(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.utc_offset)
    }

    /// Time-of-day greeting used when a caller is identified.
    pub fn greeting_at(&self, now: DateTime<Utc>) -> &'static str {
        if self.local_time(now).hour() < 12 {
            "Good morning"
        } else {
            "Good afternoon"
        }
    }

    /// Whether the clinic is open at the given instant. Weekends are closed.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        let local = self.local_time(now);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let hour = local.hour();
        self.opening_hour <= hour && hour < self.closing_hour
    }

    /// Human-readable business hours, e.g. "8 AM to 6 PM".
    pub fn business_hours(&self) -> String {
        format!(
            "{} to {}",
            format_hour(self.opening_hour),
            format_hour(self.closing_hour)
        )
    }
}

fn format_hour(hour: u32) -> String {
    match hour {
        0 | 24 => "12 AM".to_string(),
        12 => "12 PM".to_string(),
        h if h < 12 => format!("{h} AM"),
        h => format!("{} PM", h - 12),
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(key, format!("cannot parse {raw:?}")))
}

/// Parse an hour of day no later than `max` (24 means midnight at close).
fn parse_hour(key: &str, raw: &str, max: u32) -> Result<u32, ConfigError> {
    let hour: u32 = parse_num(key, raw)?;
    if hour > max {
        return Err(invalid(key, format!("hour {hour} is out of range")));
    }
    Ok(hour)
}

/// Parse a `name=route,name=route` department list.
///
/// Known names keep their stock descriptions.
fn parse_departments(raw: &str) -> Result<Vec<DepartmentConfig>, ConfigError> {
    const KEY: &str = "CARE_GATEWAY_DEPARTMENTS";
    let stock = default_departments();
    let mut departments: Vec<DepartmentConfig> = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, route) = entry
            .split_once('=')
            .ok_or_else(|| invalid(KEY, format!("entry {entry:?} is not name=route")))?;
        let name = name.trim().to_lowercase();
        let route = route.trim();
        if name.is_empty() || route.is_empty() {
            return Err(invalid(KEY, format!("entry {entry:?} has an empty side")));
        }
        if departments.iter().any(|d| d.name == name) {
            return Err(invalid(KEY, format!("department {name:?} listed twice")));
        }
        let description = stock
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.description.clone())
            .unwrap_or_else(|| format!("{name} department"));
        departments.push(DepartmentConfig::new(name, route, description));
    }

    if departments.is_empty() {
        return Err(invalid(KEY, "no departments configured"));
    }
    Ok(departments)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::TimeZone;
    use secrecy::ExposeSecret;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = GatewayConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.clinic_name, "HealthFirst Medical");
        assert_eq!(config.max_verification_attempts, 3);
        assert_eq!(config.recording, RecordingConfig::default());
        let names: Vec<&str> = config.departments.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["appointments", "billing", "medical"]);
        assert!(config.webhook_token.is_none());
        assert!(config.directory_path.is_none());
    }

    #[test]
    fn overrides_from_lookup() {
        let config = GatewayConfig::from_lookup(lookup_from(&[
            ("CARE_GATEWAY_CLINIC_NAME", "Lakeside Clinic"),
            ("CARE_GATEWAY_MAX_ATTEMPTS", "5"),
            ("CARE_GATEWAY_RECORDING_STEREO", "false"),
            ("CARE_GATEWAY_UTC_OFFSET_HOURS", "-5"),
            ("CARE_GATEWAY_WEBHOOK_TOKEN", "s3cret"),
            ("CARE_GATEWAY_PORT", "9090"),
        ]))
        .unwrap();
        assert_eq!(config.clinic_name, "Lakeside Clinic");
        assert_eq!(config.max_verification_attempts, 5);
        assert!(!config.recording.stereo);
        assert_eq!(config.utc_offset.local_minus_utc(), -5 * 3600);
        assert_eq!(config.bind_port, 9090);
        assert_eq!(
            config.webhook_token.as_ref().map(|t| t.expose_secret()),
            Some("s3cret")
        );
    }

    #[test]
    fn department_list_keeps_stock_descriptions() {
        let config = GatewayConfig::from_lookup(lookup_from(&[(
            "CARE_GATEWAY_DEPARTMENTS",
            "Billing=/billing-v2, pharmacy=/rx",
        )]))
        .unwrap();
        assert_eq!(config.departments.len(), 2);
        assert_eq!(config.departments[0].name, "billing");
        assert_eq!(config.departments[0].route, "/billing-v2");
        assert_eq!(
            config.departments[0].description,
            "Account balance, payments, insurance"
        );
        assert_eq!(config.departments[1].description, "pharmacy department");
    }

    #[test]
    fn rejects_bad_values() {
        for pairs in [
            [("CARE_GATEWAY_MAX_ATTEMPTS", "0")],
            [("CARE_GATEWAY_MAX_ATTEMPTS", "three")],
            [("CARE_GATEWAY_OPENING_HOUR", "25")],
            [("CARE_GATEWAY_OPENING_HOUR", "24")],
            [("CARE_GATEWAY_CLOSING_HOUR", "25")],
            [("CARE_GATEWAY_CLOSING_HOUR", "7")],
            [("CARE_GATEWAY_DEPARTMENTS", "billing")],
            [("CARE_GATEWAY_DEPARTMENTS", "billing=/a,billing=/b")],
            [("CARE_GATEWAY_UTC_OFFSET_HOURS", "40")],
        ] {
            let result = GatewayConfig::from_lookup(lookup_from(&pairs));
            assert!(
                matches!(result, Err(ConfigError::InvalidValue { .. })),
                "{pairs:?} should be rejected"
            );
        }
    }

    #[test]
    fn clinic_may_close_at_midnight() {
        let config =
            GatewayConfig::from_lookup(lookup_from(&[("CARE_GATEWAY_CLOSING_HOUR", "24")]))
                .unwrap();
        assert_eq!(config.closing_hour, 24);
        assert_eq!(config.business_hours(), "8 AM to 12 AM");

        let late = Utc.with_ymd_and_hms(2026, 3, 2, 23, 30, 0).unwrap();
        assert!(config.is_open_at(late));
        let early = Utc.with_ymd_and_hms(2026, 3, 3, 0, 30, 0).unwrap();
        assert!(!config.is_open_at(early));
    }

    #[test]
    fn greeting_and_hours_follow_clinic_time() {
        let config = GatewayConfig::from_lookup(lookup_from(&[(
            "CARE_GATEWAY_UTC_OFFSET_HOURS",
            "-5",
        )]))
        .unwrap();
        // 14:00 UTC is 09:00 clinic time.
        let morning = Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap();
        assert_eq!(config.greeting_at(morning), "Good morning");
        assert!(config.is_open_at(morning));

        // 01:00 UTC is 20:00 clinic time the day before.
        let evening = Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).unwrap();
        assert_eq!(config.greeting_at(evening), "Good afternoon");
        assert!(!config.is_open_at(evening));

        let saturday = Utc.with_ymd_and_hms(2026, 3, 7, 14, 0, 0).unwrap();
        assert!(!config.is_open_at(saturday));

        assert_eq!(config.business_hours(), "8 AM to 6 PM");
    }
}
