//! Identity resolution
//!
//! The resolved identifier is the single value used as QR payload, serial
//! number, barcode message and (without an external token) file name.

use serde::{Deserialize, Serialize};

use crate::person::Person;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    ByEmail,
    ByAccreditation,
}

impl IdentityMode {
    /// Output subdirectory for passes of this identity.
    pub fn stream(&self) -> OutputStream {
        match self {
            IdentityMode::ByEmail => OutputStream::Entries,
            IdentityMode::ByAccreditation => OutputStream::Badges,
        }
    }
}

/// Mode-specific output subdirectories; keeps combined runs collision free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Entries,
    Badges,
}

impl OutputStream {
    pub fn dir_name(&self) -> &'static str {
        match self {
            OutputStream::Entries => "entradas",
            OutputStream::Badges => "badges",
        }
    }
}

impl std::fmt::Display for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// The accreditation code in accreditation mode when present, the contact id
/// otherwise.
pub fn resolve_identifier(person: &Person, mode: IdentityMode) -> &str {
    match mode {
        IdentityMode::ByAccreditation => person
            .accreditation()
            .unwrap_or(person.contact_id.as_str()),
        IdentityMode::ByEmail => person.contact_id.as_str(),
    }
}

/// Whether a person takes part in a single-identity run.
pub fn is_eligible(person: &Person, mode: IdentityMode) -> bool {
    match mode {
        IdentityMode::ByAccreditation => person.accreditation().is_some(),
        IdentityMode::ByEmail => true,
    }
}

const UNSAFE_FILENAME_CHARS: [char; 4] = ['@', '.', '/', ' '];

pub fn sanitize_file_stem(raw: &str) -> String {
    raw.chars()
        .map(|c| if UNSAFE_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// File stem for a person's outputs: the external token if any, else the
/// resolved identifier.
pub fn file_stem(person: &Person, identifier: &str) -> String {
    sanitize_file_stem(person.token().unwrap_or(identifier))
}
