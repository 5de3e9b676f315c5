//! Run configuration
//!
//! Everything here is built once at startup and handed to the other
//! components by reference. Signing credentials come from the environment;
//! event, style and field templates come from an optional JSON file layered
//! over built-in defaults.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::templates::FieldTemplates;

pub const ENV_TEAM_ID: &str = "PASSKIT_TEAM_ID";
pub const ENV_PASS_TYPE_ID: &str = "PASSKIT_PASS_TYPE_ID";
pub const ENV_CERT_BUNDLE: &str = "PASSKIT_CERT_P12_PATH";
pub const ENV_CERT_PASSWORD: &str = "PASSKIT_CERT_P12_PASSWORD";
pub const ENV_TRUST_ROOT: &str = "PASSKIT_WWDR_CERT_PATH";
pub const ENV_EVENT_DATE: &str = "FECHA_INICIO_EVENTO";
pub const ENV_TOOLKIT: &str = "PASSKIT_OPENSSL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{what} not found at {path}")]
    CertificateNotFound { what: &'static str, path: String },

    #[error("Cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Signing identity. All fields are required before any pass is signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub team_identifier: String,
    pub pass_type_identifier: String,
    pub certificate_bundle_path: PathBuf,
    pub certificate_password: String,
    pub trust_root_path: PathBuf,
    pub toolkit: PathBuf,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; the result is validated before it is returned.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let auth = Self {
            team_identifier: required(ENV_TEAM_ID)?,
            pass_type_identifier: required(ENV_PASS_TYPE_ID)?,
            certificate_bundle_path: expand_home(&required(ENV_CERT_BUNDLE)?, &lookup),
            certificate_password: lookup(ENV_CERT_PASSWORD).unwrap_or_default(),
            trust_root_path: expand_home(&required(ENV_TRUST_ROOT)?, &lookup),
            toolkit: lookup(ENV_TOOLKIT)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("openssl")),
        };
        auth.validate()?;
        Ok(auth)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.certificate_bundle_path.is_file() {
            return Err(ConfigError::CertificateNotFound {
                what: "Certificate bundle (P12)",
                path: self.certificate_bundle_path.display().to_string(),
            });
        }
        if !self.trust_root_path.is_file() {
            return Err(ConfigError::CertificateNotFound {
                what: "Trust root certificate (WWDR)",
                path: self.trust_root_path.display().to_string(),
            });
        }
        Ok(())
    }
}

fn expand_home<F>(raw: &str, lookup: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(rest) = raw.strip_prefix('~') {
        if rest.is_empty() || rest.starts_with('/') {
            if let Some(home) = lookup("HOME") {
                return PathBuf::from(format!("{}{}", home, rest));
            }
        }
    }
    PathBuf::from(raw)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventConfig {
    pub organization: String,
    pub name: String,
    pub description: String,
    /// Naive local time; bound to UTC+1 when written into a pass.
    pub date: Option<NaiveDateTime>,
    pub location: Option<Location>,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            organization: "GPUL - HackUDC".to_string(),
            name: "HackUDC 2026".to_string(),
            description: "Pase de acceso a HackUDC 2026".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 2, 27).and_then(|d| d.and_hms_opt(17, 0, 0)),
            location: Some(Location {
                latitude: 43.3332,
                longitude: -8.4115,
                relevant_text: Some("Presenta este pase en la entrada del evento.".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StyleConfig {
    pub foreground_color: String,
    pub background_color: String,
    pub label_color: String,
    /// URL or local path for each source image.
    pub icon: Option<String>,
    pub logo: Option<String>,
    pub strip: Option<String>,
    /// Directory searched for fallback images.
    pub assets_dir: PathBuf,
    /// Branded defaults tried after the filename-matched fallback.
    pub fallback_images: Vec<String>,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            foreground_color: "rgb(255, 255, 255)".to_string(),
            background_color: "rgb(40, 40, 40)".to_string(),
            label_color: "rgb(255, 180, 0)".to_string(),
            icon: Some("assets/img/icon.png".to_string()),
            logo: Some("assets/img/logo_w@2x.png".to_string()),
            strip: Some("assets/img/strip.png".to_string()),
            assets_dir: PathBuf::from("assets/img"),
            fallback_images: vec!["gpul.png".to_string(), "pkpassbuilder.png".to_string()],
        }
    }
}

/// Static pass content shared by every person in a run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PassConfig {
    pub event: EventConfig,
    pub style: StyleConfig,
    pub fields: FieldTemplates,
    /// Also inject the accreditation field into email-identity passes of a
    /// combined run.
    pub accreditation_field_on_entries: bool,
}

impl PassConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    /// Apply the event date override, if present. A value that does not parse
    /// is logged and ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(raw) = lookup(ENV_EVENT_DATE).filter(|v| !v.trim().is_empty()) else {
            return;
        };
        match parse_event_date(&raw) {
            Some(date) => {
                info!(%date, "event date loaded from {}", ENV_EVENT_DATE);
                self.event.date = Some(date);
            }
            None => warn!(value = %raw, "ignoring unparseable {}", ENV_EVENT_DATE),
        }
    }
}

/// Accepts the ISO 8601 shapes people actually write: date only, or date and
/// time with `T` or a space, down to the hour. A trailing offset or `Z` is
/// dropped and the wall-clock time kept; the pass binds its own offset.
pub fn parse_event_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M%:z", "%Y-%m-%d %H:%M%:z"];

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    OFFSET_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.naive_local())
        .or_else(|| {
            NAIVE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        })
        .or_else(|| {
            // hour only, e.g. 2026-02-27T17
            NaiveDateTime::parse_from_str(&format!("{}:00", raw), "%Y-%m-%dT%H:%M").ok()
        })
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Everything a run needs, loaded once.
#[derive(Debug, Clone)]
pub struct Config {
    pub auth: AuthConfig,
    pub pass: PassConfig,
}

impl Config {
    pub fn load(pass_config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let auth = AuthConfig::from_env()?;
        let mut pass = match pass_config_path {
            Some(path) => PassConfig::load_from_file(path)?,
            None => PassConfig::default(),
        };
        pass.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(Self { auth, pass })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_auth_missing_team_id() {
        let err = AuthConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ENV_TEAM_ID)));
    }

    #[test]
    fn test_auth_missing_bundle_file() {
        let dir = tempfile::tempdir().unwrap();
        let wwdr = dir.path().join("wwdr.cer");
        fs::write(&wwdr, b"x").unwrap();
        let bundle = dir.path().join("nope.p12");
        let err = AuthConfig::from_lookup(lookup_from(&[
            (ENV_TEAM_ID, "TEAM"),
            (ENV_PASS_TYPE_ID, "pass.org.example"),
            (ENV_CERT_BUNDLE, bundle.to_str().unwrap()),
            (ENV_TRUST_ROOT, wwdr.to_str().unwrap()),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::CertificateNotFound { .. }));
    }

    #[test]
    fn test_auth_complete() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("cert.p12");
        let wwdr = dir.path().join("wwdr.pem");
        fs::write(&bundle, b"p12").unwrap();
        fs::write(&wwdr, b"pem").unwrap();
        let auth = AuthConfig::from_lookup(lookup_from(&[
            (ENV_TEAM_ID, "TEAM"),
            (ENV_PASS_TYPE_ID, "pass.org.example"),
            (ENV_CERT_BUNDLE, bundle.to_str().unwrap()),
            (ENV_TRUST_ROOT, wwdr.to_str().unwrap()),
        ]))
        .unwrap();
        assert_eq!(auth.certificate_password, "");
        assert_eq!(auth.toolkit, PathBuf::from("openssl"));
    }

    #[test]
    fn test_home_expansion() {
        let lookup = lookup_from(&[("HOME", "/home/ana")]);
        assert_eq!(
            expand_home("~/certs/a.p12", &lookup),
            PathBuf::from("/home/ana/certs/a.p12")
        );
        assert_eq!(expand_home("~bob/x", &lookup), PathBuf::from("~bob/x"));
    }

    #[test]
    fn test_parse_event_date_shapes() {
        let expected = NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        assert_eq!(parse_event_date("2026-03-01T10:30:00"), Some(expected));
        assert_eq!(parse_event_date("2026-03-01T10:30"), Some(expected));
        assert_eq!(parse_event_date("2026-03-01 10:30"), Some(expected));
        assert!(parse_event_date("2026-03-01").is_some());
        assert_eq!(parse_event_date("next friday"), None);
    }

    #[test]
    fn test_parse_event_date_with_offset_keeps_wall_clock() {
        let five_pm = NaiveDate::from_ymd_opt(2026, 2, 27)
            .unwrap()
            .and_hms_opt(17, 0, 0)
            .unwrap();
        assert_eq!(parse_event_date("2026-02-27T17:00:00+01:00"), Some(five_pm));
        assert_eq!(parse_event_date("2026-02-27T17:00:00Z"), Some(five_pm));
        assert_eq!(parse_event_date("2026-02-27T17:00+02:00"), Some(five_pm));
        assert_eq!(parse_event_date("2026-02-27T17"), Some(five_pm));
        assert_eq!(parse_event_date("2026-02-27T17:00:00.500Z").map(|d| d.time().hour()), Some(17));
    }

    #[test]
    fn test_bad_date_override_keeps_default() {
        let mut pass = PassConfig::default();
        let before = pass.event.date;
        pass.apply_env_overrides(lookup_from(&[(ENV_EVENT_DATE, "garbage")]));
        assert_eq!(pass.event.date, before);
    }

    #[test]
    fn test_partial_config_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pass.json");
        fs::write(&path, r#"{"event": {"name": "Other Event"}, "style": {"strip": null}}"#).unwrap();
        let pass = PassConfig::load_from_file(&path).unwrap();
        assert_eq!(pass.event.name, "Other Event");
        assert_eq!(pass.event.organization, "GPUL - HackUDC");
        assert!(pass.style.strip.is_none());
        assert_eq!(pass.fields, FieldTemplates::default());
    }
}
