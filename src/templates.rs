//! Field Templates - placeholder substitution over pass fields

use chrono::{Datelike, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::config::EventConfig;
use crate::person::Person;

pub const NAME_TOKEN: &str = "{nombre}";
pub const CONTACT_TOKEN: &str = "{correo}";
pub const ACCREDITATION_TOKEN: &str = "{acreditacion}";
pub const EXTERNAL_TOKEN_TOKEN: &str = "{token}";
pub const NATIONAL_ID_TOKEN: &str = "{dni}";
pub const ROLE_TOKEN: &str = "{rol}";
pub const HOUR_TOKEN: &str = "{hora}";
pub const SHORT_DATE_TOKEN: &str = "{fecha_corta}";
pub const LONG_DATE_TOKEN: &str = "{fecha_completa}";
pub const NUMERIC_DATE_TOKEN: &str = "{fecha}";

/// Key of the auxiliary field injected on accreditation passes.
pub const ACCREDITATION_FIELD_KEY: &str = "acreditacion";

const SHORT_MONTHS: [&str; 12] = [
    "ene", "feb", "mar", "abr", "may", "jun", "jul", "ago", "sept", "oct", "nov", "dic",
];

const LONG_MONTHS: [&str; 12] = [
    "Enero", "Febrero", "Marzo", "Abril", "Mayo", "Junio", "Julio", "Agosto", "Septiembre",
    "Octubre", "Noviembre", "Diciembre",
];

/// The fixed areas of an event ticket, in rendering order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldArea {
    Header,
    Primary,
    Secondary,
    Auxiliary,
    Back,
    AdditionalInfo,
}

impl FieldArea {
    pub const ALL: [FieldArea; 6] = [
        FieldArea::Header,
        FieldArea::Primary,
        FieldArea::Secondary,
        FieldArea::Auxiliary,
        FieldArea::Back,
        FieldArea::AdditionalInfo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldArea::Header => "header",
            FieldArea::Primary => "primary",
            FieldArea::Secondary => "secondary",
            FieldArea::Auxiliary => "auxiliary",
            FieldArea::Back => "back",
            FieldArea::AdditionalInfo => "additionalInfo",
        }
    }
}

impl std::fmt::Display for FieldArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextAlignment {
    #[serde(rename = "PKTextAlignmentLeft")]
    Left,
    #[serde(rename = "PKTextAlignmentCenter")]
    Center,
    #[serde(rename = "PKTextAlignmentRight")]
    Right,
    #[serde(rename = "PKTextAlignmentNatural")]
    Natural,
}

/// A field template. Label and value may contain tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub key: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_alignment: Option<TextAlignment>,
}

impl FieldSpec {
    pub fn new(key: &str, label: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            value: value.to_string(),
            text_alignment: None,
        }
    }

    pub fn aligned(mut self, alignment: TextAlignment) -> Self {
        self.text_alignment = Some(alignment);
        self
    }
}

/// A field after substitution, owned by the pass being assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedField {
    pub key: String,
    pub label: String,
    pub value: String,
    pub text_alignment: Option<TextAlignment>,
    pub is_link: bool,
}

/// Field templates for every area of the pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldTemplates {
    #[serde(default)]
    pub header: Vec<FieldSpec>,
    #[serde(default)]
    pub primary: Vec<FieldSpec>,
    #[serde(default)]
    pub secondary: Vec<FieldSpec>,
    #[serde(default)]
    pub auxiliary: Vec<FieldSpec>,
    #[serde(default)]
    pub back: Vec<FieldSpec>,
    #[serde(default)]
    pub additional_info: Vec<FieldSpec>,
}

impl FieldTemplates {
    pub fn empty() -> Self {
        Self {
            header: vec![],
            primary: vec![],
            secondary: vec![],
            auxiliary: vec![],
            back: vec![],
            additional_info: vec![],
        }
    }

    pub fn area(&self, area: FieldArea) -> &[FieldSpec] {
        match area {
            FieldArea::Header => &self.header,
            FieldArea::Primary => &self.primary,
            FieldArea::Secondary => &self.secondary,
            FieldArea::Auxiliary => &self.auxiliary,
            FieldArea::Back => &self.back,
            FieldArea::AdditionalInfo => &self.additional_info,
        }
    }

    pub fn area_mut(&mut self, area: FieldArea) -> &mut Vec<FieldSpec> {
        match area {
            FieldArea::Header => &mut self.header,
            FieldArea::Primary => &mut self.primary,
            FieldArea::Secondary => &mut self.secondary,
            FieldArea::Auxiliary => &mut self.auxiliary,
            FieldArea::Back => &mut self.back,
            FieldArea::AdditionalInfo => &mut self.additional_info,
        }
    }

    /// Copy of these templates with the accreditation field appended to the
    /// auxiliary area, unless a field with that key already exists.
    pub fn with_accreditation_field(&self) -> Self {
        let mut templates = self.clone();
        let aux = templates.area_mut(FieldArea::Auxiliary);
        if !aux.iter().any(|f| f.key == ACCREDITATION_FIELD_KEY) {
            aux.push(FieldSpec::new(
                ACCREDITATION_FIELD_KEY,
                "Acreditación",
                ACCREDITATION_TOKEN,
            ));
        }
        templates
    }
}

impl Default for FieldTemplates {
    fn default() -> Self {
        Self {
            header: vec![
                FieldSpec::new("spacer", "", ""),
                FieldSpec::new("when", HOUR_TOKEN, SHORT_DATE_TOKEN).aligned(TextAlignment::Right),
            ],
            primary: vec![],
            secondary: vec![
                FieldSpec::new("name", "Nombre", NAME_TOKEN),
                FieldSpec::new("role", "Rol", ROLE_TOKEN),
            ],
            auxiliary: vec![FieldSpec::new("email", "Correo", CONTACT_TOKEN)],
            back: vec![
                FieldSpec::new("event_info", "Evento", "HackUDC 2026"),
                FieldSpec::new("loc", "Ubicación", "Facultade de Informática, UDC, A Coruña"),
                FieldSpec::new(
                    "entry_info",
                    "Información de Entrada",
                    "Presenta este pase cuando hagas el check-in.",
                ),
                FieldSpec::new("web_live", "Horario, retos y más", "https://live.hackudc.gpul.org"),
                FieldSpec::new("web_terms", "Términos y Condiciones", "https://hackudc.gpul.org/terms"),
                FieldSpec::new("web_privacy", "Política de Privacidad", "https://hackudc.gpul.org/privacy"),
                FieldSpec::new("web_conduct", "Código de Conducta", "https://hackudc.gpul.org/conduct"),
                FieldSpec::new("org", "Organizado por", "GPUL"),
            ],
            additional_info: vec![],
        }
    }
}

/// Ordered token -> replacement mapping. Replacement runs in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubstitutionContext {
    entries: Vec<(String, String)>,
}

impl SubstitutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a token, keeping its original position.
    pub fn insert(&mut self, token: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(t, _)| t == token) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((token.to_string(), value)),
        }
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(t, v)| (t.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn apply(&self, template: &str) -> String {
        let mut out = template.to_string();
        for (token, value) in &self.entries {
            if out.contains(token.as_str()) {
                out = out.replace(token.as_str(), value);
            }
        }
        out
    }
}

/// Date-derived token values; all empty when the event has no date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateValues {
    pub hour: String,
    pub short: String,
    pub long: String,
    pub numeric: String,
}

impl DateValues {
    pub fn from_date(date: Option<NaiveDateTime>) -> Self {
        let Some(date) = date else {
            return Self::default();
        };
        let month = date.month0() as usize;
        let hour = date.format("%H:%M").to_string();
        Self {
            short: format!("{:02} {}, {}", date.day(), SHORT_MONTHS[month], date.year()),
            long: format!(
                "{} de {} de {}, {}h",
                date.day(),
                LONG_MONTHS[month],
                date.year(),
                hour
            ),
            numeric: date.format("%d-%m-%Y").to_string(),
            hour,
        }
    }
}

pub fn build_context(person: &Person, event: &EventConfig) -> SubstitutionContext {
    let dates = DateValues::from_date(event.date);
    let mut ctx = SubstitutionContext::new();
    ctx.insert(NAME_TOKEN, person.display_name.as_str());
    ctx.insert(CONTACT_TOKEN, person.contact_id.as_str());
    ctx.insert(ACCREDITATION_TOKEN, person.accreditation().unwrap_or_default());
    ctx.insert(EXTERNAL_TOKEN_TOKEN, person.token().unwrap_or_default());
    ctx.insert(NATIONAL_ID_TOKEN, person.national_id.as_str());
    ctx.insert(ROLE_TOKEN, person.effective_role());
    ctx.insert(HOUR_TOKEN, dates.hour);
    ctx.insert(SHORT_DATE_TOKEN, dates.short);
    ctx.insert(LONG_DATE_TOKEN, dates.long);
    ctx.insert(NUMERIC_DATE_TOKEN, dates.numeric);
    ctx
}

fn is_link(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Expand a list of templates. Back-area values with an http(s) scheme are
/// flagged as links.
pub fn expand_fields(
    fields: &[FieldSpec],
    context: &SubstitutionContext,
    area: FieldArea,
) -> Vec<ExpandedField> {
    fields
        .iter()
        .map(|spec| {
            let value = context.apply(&spec.value);
            ExpandedField {
                key: spec.key.clone(),
                label: context.apply(&spec.label),
                is_link: area == FieldArea::Back && is_link(&value),
                value,
                text_alignment: spec.text_alignment,
            }
        })
        .collect()
}
