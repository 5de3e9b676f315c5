//! Attendee records - the input of a batch run

use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_ROLE: &str = "Hacker";

#[derive(Debug, Error)]
pub enum InputError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One attendee. Field names follow the English contract; the Spanish keys of
/// older exports are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    #[serde(alias = "correo")]
    pub contact_id: String,
    #[serde(default, alias = "nombre", deserialize_with = "null_as_default")]
    pub display_name: String,
    #[serde(default, alias = "acreditacion")]
    pub accreditation_code: Option<String>,
    #[serde(default, alias = "token")]
    pub external_token: Option<String>,
    #[serde(default = "default_role", alias = "rol", deserialize_with = "null_as_default")]
    pub role: String,
    #[serde(default, alias = "dni", deserialize_with = "null_as_default")]
    pub national_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mentor: bool,
    #[serde(default, alias = "patrocinador", deserialize_with = "null_as_default")]
    pub sponsor: bool,
}

/// Explicit `null` reads as the type's default; an empty role later shows as
/// the default role.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

impl Person {
    pub fn new(contact_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            contact_id: contact_id.into(),
            display_name: display_name.into(),
            accreditation_code: None,
            external_token: None,
            role: default_role(),
            national_id: String::new(),
            mentor: false,
            sponsor: false,
        }
    }

    pub fn with_accreditation(mut self, code: impl Into<String>) -> Self {
        self.accreditation_code = Some(code.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.external_token = Some(token.into());
        self
    }

    /// Accreditation code, treating an empty string as absent.
    pub fn accreditation(&self) -> Option<&str> {
        self.accreditation_code.as_deref().filter(|c| !c.is_empty())
    }

    pub fn token(&self) -> Option<&str> {
        self.external_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Role shown on the pass; blank roles read as the default.
    pub fn effective_role(&self) -> &str {
        if self.role.trim().is_empty() {
            DEFAULT_ROLE
        } else {
            &self.role
        }
    }
}

pub fn parse_people(json: &str, origin: &str) -> Result<Vec<Person>, InputError> {
    serde_json::from_str(json).map_err(|source| InputError::Parse {
        path: origin.to_string(),
        source,
    })
}

/// Load the JSON array of person records. Any failure here is fatal for the run.
pub fn load_people(path: &Path) -> Result<Vec<Person>, InputError> {
    let display = path.display().to_string();
    let content = fs::read_to_string(path).map_err(|source| InputError::Read {
        path: display.clone(),
        source,
    })?;
    parse_people(&content, &display)
}
