//! pkpassBuilder CLI
//!
//! Generates one signed pass and QR image per attendee record.
//! Exit status: 1 on configuration or input errors, 2 if any pass failed.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use pkpass_builder::{
    imaging::ImageLoader, load_people, BatchDriver, Config, OutputLayout, PassGenerator,
    PassSigner, RunMode,
};

#[derive(Parser)]
#[command(name = "pkpass-builder")]
#[command(about = "pkpassBuilder - signed wallet passes and QR codes from a JSON list of attendees")]
#[command(version)]
struct Cli {
    /// JSON file with the list of attendees
    json_file: PathBuf,

    /// Use the accreditation code as QR / serial instead of the email
    #[arg(short = 'a', long = "use-acreditacion", visible_alias = "use-accreditation", conflicts_with = "both")]
    use_acreditacion: bool,

    /// Generate both entry (email) and badge (accreditation) passes
    #[arg(short, long)]
    both: bool,

    /// Output root directory
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Pass configuration file (event, style, field templates)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "pkpass_builder=debug"
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn mode(&self) -> RunMode {
        if self.both {
            RunMode::Both
        } else if self.use_acreditacion {
            RunMode::ByAccreditation
        } else {
            RunMode::ByEmail
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_logging(&cli.log_level);

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let people = match load_people(&cli.json_file) {
        Ok(p) => p,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let layout = OutputLayout::new(&cli.output_dir);
    if let Err(e) = layout.prepare() {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    let signer = PassSigner::new(&config.auth);
    let generator = PassGenerator::new(&config.pass, &config.auth, ImageLoader::new(), signer);
    let summary = BatchDriver::new(&generator, &layout, cli.mode())
        .accreditation_on_entries(config.pass.accreditation_field_on_entries)
        .run(&people);

    let summary_path = layout.summary_path();
    match summary.write_json(&summary_path) {
        Ok(()) => info!(path = %summary_path.display(), "summary written"),
        Err(e) => error!("{}", e),
    }

    info!(
        "done: {} generated, {} failed, {} skipped",
        summary.success_count(),
        summary.failure_count(),
        summary.skipped
    );

    if summary.has_failures() {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}
