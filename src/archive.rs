//! Pass archive - the `pass.json` document and the signed container

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::Path;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

use crate::config::Location;
use crate::hashing::manifest_json;
use crate::imaging::GeneratedAssets;
use crate::signing::{ManifestSigner, SigningError};
use crate::templates::{ExpandedField, FieldArea, TextAlignment};

pub const PASS_FILE: &str = "pass.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const SIGNATURE_FILE: &str = "signature";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Cannot serialize pass document: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error("Cannot write archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Cannot write archive: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarcodeFormat {
    #[serde(rename = "PKBarcodeFormatQR")]
    Qr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Barcode {
    pub message: String,
    pub format: BarcodeFormat,
    pub message_encoding: String,
}

impl Barcode {
    pub fn qr(message: &str) -> Self {
        Self {
            message: message.to_string(),
            format: BarcodeFormat::Qr,
            message_encoding: "iso-8859-1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataDetector {
    #[serde(rename = "PKDataDetectorTypeLink")]
    Link,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassField {
    pub key: String,
    pub label: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_alignment: Option<TextAlignment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_detector_types: Vec<DataDetector>,
}

impl PassField {
    pub fn empty(key: &str) -> Self {
        Self {
            key: key.to_string(),
            label: String::new(),
            value: String::new(),
            text_alignment: None,
            data_detector_types: vec![],
        }
    }
}

impl From<ExpandedField> for PassField {
    fn from(field: ExpandedField) -> Self {
        Self {
            key: field.key,
            label: field.label,
            value: field.value,
            text_alignment: field.text_alignment,
            data_detector_types: if field.is_link {
                vec![DataDetector::Link]
            } else {
                vec![]
            },
        }
    }
}

/// Fields of an event ticket, one list per area.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassFieldSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub header_fields: Vec<PassField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_fields: Vec<PassField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary_fields: Vec<PassField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auxiliary_fields: Vec<PassField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub back_fields: Vec<PassField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_info_fields: Vec<PassField>,
}

impl PassFieldSet {
    fn area_mut(&mut self, area: FieldArea) -> &mut Vec<PassField> {
        match area {
            FieldArea::Header => &mut self.header_fields,
            FieldArea::Primary => &mut self.primary_fields,
            FieldArea::Secondary => &mut self.secondary_fields,
            FieldArea::Auxiliary => &mut self.auxiliary_fields,
            FieldArea::Back => &mut self.back_fields,
            FieldArea::AdditionalInfo => &mut self.additional_info_fields,
        }
    }

    pub fn fields(&self, area: FieldArea) -> &[PassField] {
        match area {
            FieldArea::Header => &self.header_fields,
            FieldArea::Primary => &self.primary_fields,
            FieldArea::Secondary => &self.secondary_fields,
            FieldArea::Auxiliary => &self.auxiliary_fields,
            FieldArea::Back => &self.back_fields,
            FieldArea::AdditionalInfo => &self.additional_info_fields,
        }
    }

    pub fn push(&mut self, area: FieldArea, field: PassField) {
        self.area_mut(area).push(field);
    }

    pub fn extend(&mut self, area: FieldArea, fields: impl IntoIterator<Item = PassField>) {
        self.area_mut(area).extend(fields);
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldArea, &PassField)> {
        FieldArea::ALL
            .into_iter()
            .flat_map(move |area| self.fields(area).iter().map(move |f| (area, f)))
    }
}

/// The `pass.json` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassDefinition {
    pub format_version: u32,
    pub pass_type_identifier: String,
    pub serial_number: String,
    pub team_identifier: String,
    pub organization_name: String,
    pub description: String,
    pub foreground_color: String,
    pub background_color: String,
    pub label_color: String,
    pub barcode: Barcode,
    pub barcodes: Vec<Barcode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant_date: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,
    pub event_ticket: PassFieldSet,
}

/// Builds the signed container: `pass.json`, images, `manifest.json` and the
/// detached `signature`.
#[derive(Debug, Clone)]
pub struct PassArchive {
    files: BTreeMap<String, Vec<u8>>,
}

impl PassArchive {
    pub fn new(definition: &PassDefinition) -> Result<Self, ArchiveError> {
        let mut files = BTreeMap::new();
        files.insert(PASS_FILE.to_string(), serde_json::to_vec_pretty(definition)?);
        Ok(Self { files })
    }

    pub fn add_file(&mut self, name: &str, data: &[u8]) {
        self.files.insert(name.to_string(), data.to_vec());
    }

    pub fn add_assets(&mut self, assets: &GeneratedAssets) {
        for (name, png) in assets.iter() {
            self.add_file(name, png);
        }
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn manifest(&self) -> Result<Vec<u8>, ArchiveError> {
        let entries = self.files.iter().map(|(k, v)| (k.as_str(), v.as_slice()));
        Ok(manifest_json(entries)?)
    }

    /// Sign the manifest and zip everything into the final archive bytes.
    pub fn sign_and_pack<S>(&self, signer: &S, work_dir: &Path) -> Result<Vec<u8>, ArchiveError>
    where
        S: ManifestSigner + ?Sized,
    {
        let manifest = self.manifest()?;
        let signature = signer.sign(&manifest, work_dir)?;
        if signature.is_empty() {
            return Err(SigningError::EmptySignature.into());
        }

        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let entries = self
            .files
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
            .chain([(MANIFEST_FILE, manifest.as_slice()), (SIGNATURE_FILE, signature.as_slice())]);
        for (name, data) in entries {
            zip.start_file(name, options)?;
            zip.write_all(data)?;
        }
        Ok(zip.finish()?.into_inner())
    }
}
