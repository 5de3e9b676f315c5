//! Pass Generation Pipeline - Single Entry Point
//!
//! One call turns a person and the run configuration into a signed archive
//! and its QR image. Stages run in a fixed order:
//! collect assets, build fields, set metadata, validate, embed assets, sign,
//! check output. Structural validation always runs before signing.
//!
//! Every call owns a scratch directory that is removed when the call returns,
//! whatever the outcome.

use chrono::{FixedOffset, NaiveDateTime, TimeZone};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::archive::{
    ArchiveError, Barcode, PassArchive, PassDefinition, PassField, PassFieldSet, FORMAT_VERSION,
};
use crate::config::{AuthConfig, PassConfig};
use crate::identity::{file_stem, resolve_identifier, IdentityMode, OutputStream};
use crate::imaging::{AssetGenerator, GeneratedAssets, ImageLoader};
use crate::person::Person;
use crate::qr::{render_qr_png, QrError};
use crate::signing::ManifestSigner;
use crate::templates::{build_context, expand_fields, FieldArea, FieldTemplates};
use crate::validation::Validator;

/// Offset the naive event date is bound to.
pub const EVENT_UTC_OFFSET_SECS: i32 = 3600;

/// Key of the empty primary field added when a pass would otherwise have
/// neither a primary field nor a strip.
pub const PRIMARY_PLACEHOLDER_KEY: &str = "primary_placeholder";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("QR generation failed: {0}")]
    Qr(#[from] QrError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Signed archive is empty")]
    EmptyArchive,

    #[error("Cannot create working directory: {0}")]
    WorkDir(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyStage {
    CollectAssets,
    BuildFields,
    SetMetadata,
    Validate,
    EmbedAssets,
    Sign,
    CheckOutput,
    Done,
}

impl fmt::Display for AssemblyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssemblyStage::CollectAssets => "collect_assets",
            AssemblyStage::BuildFields => "build_fields",
            AssemblyStage::SetMetadata => "set_metadata",
            AssemblyStage::Validate => "validate",
            AssemblyStage::EmbedAssets => "embed_assets",
            AssemblyStage::Sign => "sign",
            AssemblyStage::CheckOutput => "check_output",
            AssemblyStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// One pass to generate.
#[derive(Debug, Clone, Copy)]
pub struct PassRequest<'p> {
    pub person: &'p Person,
    pub identity: IdentityMode,
    /// Append the accreditation field to the auxiliary area. Has no effect
    /// for people without an accreditation code.
    pub inject_accreditation_field: bool,
}

impl<'p> PassRequest<'p> {
    pub fn new(person: &'p Person, identity: IdentityMode) -> Self {
        Self {
            person,
            identity,
            inject_accreditation_field: identity == IdentityMode::ByAccreditation,
        }
    }

    pub fn with_accreditation_field(mut self, inject: bool) -> Self {
        self.inject_accreditation_field = inject;
        self
    }
}

/// A generated pass, handed to the caller for persistence.
#[derive(Debug, Clone)]
pub struct PassResult {
    pub identifier: String,
    pub file_stem: String,
    pub stream: OutputStream,
    pub signed_archive: Vec<u8>,
    pub qr_png: Vec<u8>,
    pub accreditation_code: Option<String>,
}

/// The pass generation pipeline
pub struct PassGenerator<'a, S: ManifestSigner> {
    config: &'a PassConfig,
    team_identifier: &'a str,
    pass_type_identifier: &'a str,
    assets: AssetGenerator<'a>,
    validator: Validator,
    signer: S,
}

impl<'a, S: ManifestSigner> PassGenerator<'a, S> {
    pub fn new(config: &'a PassConfig, auth: &'a AuthConfig, loader: ImageLoader, signer: S) -> Self {
        Self {
            config,
            team_identifier: &auth.team_identifier,
            pass_type_identifier: &auth.pass_type_identifier,
            assets: AssetGenerator::new(&config.style, loader),
            validator: Validator::new(),
            signer,
        }
    }

    /// Expand every area for one person. The primary placeholder is added
    /// here when `has_strip` is false and the primary area came out empty.
    pub fn build_fields(&self, request: &PassRequest<'_>, has_strip: bool) -> PassFieldSet {
        let templates: Cow<'_, FieldTemplates> =
            if request.inject_accreditation_field && request.person.accreditation().is_some() {
                Cow::Owned(self.config.fields.with_accreditation_field())
            } else {
                Cow::Borrowed(&self.config.fields)
            };
        let context = build_context(request.person, &self.config.event);

        let mut fields = PassFieldSet::default();
        for area in FieldArea::ALL {
            let expanded = expand_fields(templates.area(area), &context, area);
            fields.extend(area, expanded.into_iter().map(PassField::from));
        }

        if fields.fields(FieldArea::Primary).is_empty() && !has_strip {
            fields.push(FieldArea::Primary, PassField::empty(PRIMARY_PLACEHOLDER_KEY));
        }
        fields
    }

    pub fn build_definition(&self, identifier: &str, fields: PassFieldSet) -> PassDefinition {
        let event = &self.config.event;
        let style = &self.config.style;
        PassDefinition {
            format_version: FORMAT_VERSION,
            pass_type_identifier: self.pass_type_identifier.to_string(),
            serial_number: identifier.to_string(),
            team_identifier: self.team_identifier.to_string(),
            organization_name: event.organization.clone(),
            description: event.description.clone(),
            foreground_color: style.foreground_color.clone(),
            background_color: style.background_color.clone(),
            label_color: style.label_color.clone(),
            barcode: Barcode::qr(identifier),
            barcodes: vec![Barcode::qr(identifier)],
            relevant_date: event.date.and_then(relevant_date),
            locations: event.location.iter().cloned().collect(),
            event_ticket: fields,
        }
    }

    /// Generate one signed pass.
    ///
    /// Image problems never fail a pass; they degrade to fallbacks inside
    /// asset collection. Validation errors and signing failures do.
    pub fn generate(&self, request: &PassRequest<'_>) -> Result<PassResult, PipelineError> {
        let identifier = resolve_identifier(request.person, request.identity);
        let work_dir = tempfile::Builder::new()
            .prefix("pkpass-")
            .tempdir()
            .map_err(PipelineError::WorkDir)?;

        stage(AssemblyStage::CollectAssets, identifier);
        let assets = self.assets.generate();

        stage(AssemblyStage::BuildFields, identifier);
        let fields = self.build_fields(request, assets.has_strip());

        stage(AssemblyStage::SetMetadata, identifier);
        let definition = self.build_definition(identifier, fields);

        stage(AssemblyStage::Validate, identifier);
        self.check(&definition, &assets)?;

        stage(AssemblyStage::EmbedAssets, identifier);
        let mut archive = PassArchive::new(&definition)?;
        archive.add_assets(&assets);

        stage(AssemblyStage::Sign, identifier);
        let signed_archive = archive.sign_and_pack(&self.signer, work_dir.path())?;

        stage(AssemblyStage::CheckOutput, identifier);
        if signed_archive.is_empty() {
            return Err(PipelineError::EmptyArchive);
        }
        let qr_png = render_qr_png(identifier)?;

        stage(AssemblyStage::Done, identifier);
        Ok(PassResult {
            identifier: identifier.to_string(),
            file_stem: file_stem(request.person, identifier),
            stream: request.identity.stream(),
            signed_archive,
            qr_png,
            accreditation_code: request.person.accreditation().map(str::to_string),
        })
    }

    fn check(&self, definition: &PassDefinition, assets: &GeneratedAssets) -> Result<(), PipelineError> {
        let result = self.validator.validate(definition, assets);
        for warning in result.warnings() {
            warn!(serial = %result.serial_number, rule = %warning.rule, "{}", warning.message);
        }
        if result.valid {
            Ok(())
        } else {
            Err(PipelineError::ValidationFailed(result.error_summary()))
        }
    }
}

fn stage(stage: AssemblyStage, identifier: &str) {
    debug!(%stage, identifier, "pass assembly");
}

/// Event date bound to the fixed event offset, as RFC 3339.
pub fn relevant_date(date: NaiveDateTime) -> Option<String> {
    FixedOffset::east_opt(EVENT_UTC_OFFSET_SECS)?
        .from_local_datetime(&date)
        .single()
        .map(|d| d.to_rfc3339())
}
