//! pkpassBuilder Core - signed wallet passes for event attendees
//!
//! A run loads its configuration once, then turns every attendee record into
//! a signed pass archive plus a QR image of the same identifier.
//!
//! # Guarantees
//! 1. One identifier per pass: QR payload, serial number, barcode and file name agree
//! 2. Missing images degrade, they never fail a pass
//! 3. Passes are validated before they are signed
//! 4. A failed person leaves nothing on disk and never stops the batch

pub mod archive;
pub mod batch;
pub mod config;
pub mod hashing;
pub mod identity;
pub mod imaging;
pub mod person;
pub mod pipeline;
pub mod qr;
pub mod signing;
pub mod templates;
pub mod validation;

pub use archive::{ArchiveError, PassArchive, PassDefinition};
pub use batch::{BatchDriver, BatchError, BatchSummary, OutputLayout, RunMode};
pub use config::{AuthConfig, Config, ConfigError, EventConfig, PassConfig, StyleConfig};
pub use identity::{resolve_identifier, IdentityMode, OutputStream};
pub use person::{load_people, InputError, Person};
pub use pipeline::{PassGenerator, PassRequest, PassResult, PipelineError};
pub use signing::{ManifestSigner, PassSigner, SigningError};
pub use validation::{PassRule, ValidationResult, ValidationViolation, ViolationSeverity};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
