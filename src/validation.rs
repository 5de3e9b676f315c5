//! Pass Validation - Rule/Policy Separation
//!
//! Rules inspect an assembled pass definition and its assets before signing
//! and produce structured violations. Errors block signing; warnings are
//! logged and carried through.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::archive::PassDefinition;
use crate::imaging::{GeneratedAssets, ICON_FILE, LOGO_FILE};
use crate::templates::FieldArea;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub message: String,
    pub remediation: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<ValidationViolation>,
    pub serial_number: String,
}

impl ValidationResult {
    pub fn has_errors(&self) -> bool {
        self.violations.iter().any(|v| v.severity == ViolationSeverity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationViolation> {
        self.violations
            .iter()
            .filter(|v| v.severity == ViolationSeverity::Warning)
    }

    /// Error messages joined for a single log line.
    pub fn error_summary(&self) -> String {
        self.violations
            .iter()
            .filter(|v| v.severity == ViolationSeverity::Error)
            .map(|v| format!("{}: {}", v.rule, v.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Validation rule trait - produces violations
pub trait PassRule {
    fn name(&self) -> &'static str;
    fn validate(&self, pass: &PassDefinition, assets: &GeneratedAssets) -> Vec<ValidationViolation>;
}

fn error(rule: &dyn PassRule, message: String, remediation: &str) -> ValidationViolation {
    ValidationViolation {
        rule: rule.name().to_string(),
        severity: ViolationSeverity::Error,
        message,
        remediation: vec![remediation.to_string()],
    }
}

// --- Concrete Rules ---

pub struct IdentifiersRule;

impl PassRule for IdentifiersRule {
    fn name(&self) -> &'static str { "identifiers" }

    fn validate(&self, pass: &PassDefinition, _assets: &GeneratedAssets) -> Vec<ValidationViolation> {
        let checks = [
            ("teamIdentifier", pass.team_identifier.as_str()),
            ("passTypeIdentifier", pass.pass_type_identifier.as_str()),
            ("serialNumber", pass.serial_number.as_str()),
            ("barcode message", pass.barcode.message.as_str()),
        ];
        checks
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| {
                error(self, format!("{} is empty", name), "Check signing environment and input record")
            })
            .collect()
    }
}

pub struct UniqueKeysRule;

impl PassRule for UniqueKeysRule {
    fn name(&self) -> &'static str { "unique_keys" }

    fn validate(&self, pass: &PassDefinition, _assets: &GeneratedAssets) -> Vec<ValidationViolation> {
        let mut seen = HashSet::new();
        pass.event_ticket
            .iter()
            .filter(|(_, field)| !seen.insert(field.key.as_str()))
            .map(|(area, field)| {
                error(
                    self,
                    format!("duplicate field key '{}' in {}", field.key, area),
                    "Give every field template a distinct key",
                )
            })
            .collect()
    }
}

pub struct PrimaryOrStripRule;

impl PassRule for PrimaryOrStripRule {
    fn name(&self) -> &'static str { "primary_or_strip" }

    fn validate(&self, pass: &PassDefinition, assets: &GeneratedAssets) -> Vec<ValidationViolation> {
        if pass.event_ticket.fields(FieldArea::Primary).is_empty() && !assets.has_strip() {
            vec![error(
                self,
                "pass has neither a primary field nor a strip image".to_string(),
                "Add a primary field template or configure a strip image",
            )]
        } else {
            vec![]
        }
    }
}

pub struct IconRule;

impl PassRule for IconRule {
    fn name(&self) -> &'static str { "icon" }

    fn validate(&self, _pass: &PassDefinition, assets: &GeneratedAssets) -> Vec<ValidationViolation> {
        if assets.contains(ICON_FILE) {
            vec![]
        } else {
            vec![error(self, format!("{} missing", ICON_FILE), "Icon generation should never be skipped")]
        }
    }
}

pub struct LogoRule;

impl PassRule for LogoRule {
    fn name(&self) -> &'static str { "logo" }

    fn validate(&self, _pass: &PassDefinition, assets: &GeneratedAssets) -> Vec<ValidationViolation> {
        if assets.contains(LOGO_FILE) {
            return vec![];
        }
        vec![ValidationViolation {
            rule: self.name().to_string(),
            severity: ViolationSeverity::Warning,
            message: "no logo image available".to_string(),
            remediation: vec!["Configure a logo source or place a fallback in the assets directory".to_string()],
        }]
    }
}

/// Validator orchestrates rules and applies policy
pub struct Validator {
    rules: Vec<Box<dyn PassRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(IdentifiersRule),
                Box::new(UniqueKeysRule),
                Box::new(PrimaryOrStripRule),
                Box::new(IconRule),
                Box::new(LogoRule),
            ],
        }
    }

    pub fn validate(&self, pass: &PassDefinition, assets: &GeneratedAssets) -> ValidationResult {
        let violations: Vec<_> = self
            .rules
            .iter()
            .flat_map(|rule| rule.validate(pass, assets))
            .collect();
        let valid = !violations.iter().any(|v| v.severity == ViolationSeverity::Error);
        ValidationResult {
            valid,
            violations,
            serial_number: pass.serial_number.clone(),
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{Barcode, PassField, PassFieldSet, FORMAT_VERSION};
    use crate::imaging::STRIP_FILE;

    fn pass_with(fields: PassFieldSet) -> PassDefinition {
        PassDefinition {
            format_version: FORMAT_VERSION,
            pass_type_identifier: "pass.org.example".into(),
            serial_number: "a@x.com".into(),
            team_identifier: "TEAM".into(),
            organization_name: "Org".into(),
            description: "Desc".into(),
            foreground_color: String::new(),
            background_color: String::new(),
            label_color: String::new(),
            barcode: Barcode::qr("a@x.com"),
            barcodes: vec![Barcode::qr("a@x.com")],
            relevant_date: None,
            locations: vec![],
            event_ticket: fields,
        }
    }

    fn full_assets() -> GeneratedAssets {
        let mut assets = GeneratedAssets::new();
        assets.insert(ICON_FILE, vec![1]);
        assets.insert(LOGO_FILE, vec![1]);
        assets
    }

    fn with_primary() -> PassFieldSet {
        let mut set = PassFieldSet::default();
        set.push(FieldArea::Primary, PassField::empty("primary"));
        set
    }

    #[test]
    fn test_complete_pass_is_valid() {
        let result = Validator::new().validate(&pass_with(with_primary()), &full_assets());
        assert!(result.valid);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn test_duplicate_keys_across_areas() {
        let mut set = with_primary();
        set.push(FieldArea::Back, PassField::empty("primary"));
        let result = Validator::new().validate(&pass_with(set), &full_assets());
        assert!(!result.valid);
        assert!(result.error_summary().contains("duplicate field key 'primary' in back"));
    }

    #[test]
    fn test_strip_satisfies_primary_requirement() {
        let mut assets = full_assets();
        assert!(!Validator::new().validate(&pass_with(PassFieldSet::default()), &assets).valid);
        assets.insert(STRIP_FILE, vec![1]);
        assert!(Validator::new().validate(&pass_with(PassFieldSet::default()), &assets).valid);
    }

    #[test]
    fn test_missing_logo_only_warns() {
        let mut assets = GeneratedAssets::new();
        assets.insert(ICON_FILE, vec![1]);
        let result = Validator::new().validate(&pass_with(with_primary()), &assets);
        assert!(result.valid);
        assert_eq!(result.warnings().count(), 1);
    }

    #[test]
    fn test_empty_identifiers_rejected() {
        let mut pass = pass_with(with_primary());
        pass.team_identifier = " ".into();
        let result = Validator::new().validate(&pass, &full_assets());
        assert!(result.has_errors());
        assert_eq!(result.violations[0].rule, "identifiers");
    }
}
