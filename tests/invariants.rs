//! Contract Invariant Tests
//!
//! These tests verify the guarantees a run gives about identifiers, output
//! layout and failure isolation.

use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use pkpass_builder::{
    batch::{BatchDriver, OutputLayout, RunMode},
    config::{AuthConfig, PassConfig, StyleConfig},
    identity::OutputStream,
    imaging::{apply_squircle_mask, produce_fixed_asset, ImageLoader, SQUIRCLE_EXPONENT},
    person::{parse_people, Person},
    pipeline::PassGenerator,
    signing::{CryptoToolkit, ManifestSigner, PassSigner, SigningError, ToolOutput},
    templates::{build_context, expand_fields, FieldArea, FieldSpec, FieldTemplates},
};

struct FakeSigner;

impl ManifestSigner for FakeSigner {
    fn sign(&self, manifest: &[u8], _work_dir: &Path) -> Result<Vec<u8>, SigningError> {
        let mut signature = b"signed:".to_vec();
        signature.extend_from_slice(manifest);
        Ok(signature)
    }
}

/// Accepts a bundle only when opened with the expected password.
struct PasswordCheckingToolkit {
    password: &'static str,
}

impl CryptoToolkit for PasswordCheckingToolkit {
    fn run(&self, args: &[String]) -> Result<ToolOutput, SigningError> {
        let expected = format!("pass:{}", self.password);
        if args[0] == "pkcs12" && !args.contains(&expected) {
            return Ok(ToolOutput {
                success: false,
                stderr: "Mac verify error: invalid password?".to_string(),
            });
        }
        if let Some(i) = args.iter().position(|a| a == "-out") {
            fs::write(&args[i + 1], b"der")?;
        }
        Ok(ToolOutput {
            success: true,
            stderr: String::new(),
        })
    }
}

fn auth_in(dir: &Path, password: &str) -> AuthConfig {
    let bundle = dir.join("cert.p12");
    let wwdr = dir.join("wwdr.pem");
    fs::write(&bundle, b"p12").unwrap();
    fs::write(&wwdr, b"-----BEGIN CERTIFICATE-----\n").unwrap();
    AuthConfig {
        team_identifier: "TEAM".into(),
        pass_type_identifier: "pass.org.example".into(),
        certificate_bundle_path: bundle,
        certificate_password: password.to_string(),
        trust_root_path: wwdr,
        toolkit: PathBuf::from("openssl"),
    }
}

fn offline_config() -> PassConfig {
    PassConfig {
        style: StyleConfig {
            icon: None,
            logo: None,
            strip: None,
            assets_dir: PathBuf::from("/nonexistent"),
            fallback_images: vec![],
            ..StyleConfig::default()
        },
        ..PassConfig::default()
    }
}

fn pass_json(path: &Path) -> serde_json::Value {
    let bytes = fs::read(path).unwrap();
    let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut json = String::new();
    zip.by_name("pass.json").unwrap().read_to_string(&mut json).unwrap();
    serde_json::from_str(&json).unwrap()
}

fn qr_payload_matches(path: &Path, payload: &str) -> bool {
    fs::read(path).unwrap() == pkpass_builder::qr::render_qr_png(payload).unwrap()
}

fn count_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .map(|p| if p.is_dir() { count_files(&p) } else { 1 })
        .sum()
}

#[test]
fn invariant_both_mode_scenario() {
    let out = tempfile::tempdir().unwrap();
    let certs = tempfile::tempdir().unwrap();
    let auth = auth_in(certs.path(), "");
    let config = offline_config();
    let people = parse_people(
        r#"[{"contact_id":"a@x.com","display_name":"Ana","accreditation_code":"B123"}]"#,
        "inline",
    )
    .unwrap();

    let generator = PassGenerator::new(&config, &auth, ImageLoader::offline(), FakeSigner);
    let layout = OutputLayout::new(out.path());
    layout.prepare().unwrap();
    let summary = BatchDriver::new(&generator, &layout, RunMode::Both).run(&people);

    assert_eq!(summary.success_count(), 2);
    let entry = out.path().join("pass/entradas/a_x_com.pkpass");
    let badge = out.path().join("pass/badges/B123.pkpass");
    assert!(entry.is_file());
    assert!(badge.is_file());

    assert!(qr_payload_matches(&out.path().join("qr/entradas/a_x_com.png"), "a@x.com"));
    assert!(qr_payload_matches(&out.path().join("qr/badges/B123.png"), "B123"));
    assert_eq!(pass_json(&entry)["serialNumber"], "a@x.com");
    assert_eq!(pass_json(&badge)["serialNumber"], "B123");
}

#[test]
fn invariant_identifier_drives_serial_barcode_and_qr() {
    let out = tempfile::tempdir().unwrap();
    let certs = tempfile::tempdir().unwrap();
    let auth = auth_in(certs.path(), "");
    let config = offline_config();
    let people = vec![
        Person::new("a@x.com", "Ana").with_accreditation("B123"),
        Person::new("d@x.com", "Dani").with_accreditation("C777"),
    ];
    let generator = PassGenerator::new(&config, &auth, ImageLoader::offline(), FakeSigner);
    let layout = OutputLayout::new(out.path());
    layout.prepare().unwrap();

    for (mode, expected) in [
        (RunMode::ByAccreditation, ["B123", "C777"]),
        (RunMode::ByEmail, ["a@x.com", "d@x.com"]),
    ] {
        let summary = BatchDriver::new(&generator, &layout, mode).run(&people);
        assert_eq!(summary.success_count(), 2);
        for (record, id) in summary.generated.iter().zip(expected) {
            let json = pass_json(&record.archive_path);
            assert_eq!(json["serialNumber"], id);
            assert_eq!(json["barcode"]["message"], id);
            assert!(qr_payload_matches(&record.qr_path, id));
        }
    }
}

#[test]
fn invariant_both_mode_without_code_yields_entry_only() {
    let out = tempfile::tempdir().unwrap();
    let certs = tempfile::tempdir().unwrap();
    let auth = auth_in(certs.path(), "");
    let config = offline_config();
    let people = vec![Person::new("c@x.com", "Carla")];
    let generator = PassGenerator::new(&config, &auth, ImageLoader::offline(), FakeSigner);
    let layout = OutputLayout::new(out.path());
    layout.prepare().unwrap();

    let summary = BatchDriver::new(&generator, &layout, RunMode::Both).run(&people);
    assert_eq!(summary.success_count(), 1);
    assert_eq!(summary.generated[0].stream, OutputStream::Entries);
    assert_eq!(count_files(&layout.pass_dir(OutputStream::Badges)), 0);
}

#[test]
fn invariant_accreditation_mode_skips_people_without_code() {
    let out = tempfile::tempdir().unwrap();
    let certs = tempfile::tempdir().unwrap();
    let auth = auth_in(certs.path(), "");
    let config = offline_config();
    let people = vec![Person::new("c@x.com", "Carla")];
    let generator = PassGenerator::new(&config, &auth, ImageLoader::offline(), FakeSigner);
    let layout = OutputLayout::new(out.path());
    layout.prepare().unwrap();

    let summary = BatchDriver::new(&generator, &layout, RunMode::ByAccreditation).run(&people);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.success_count(), 0);
    assert!(!summary.has_failures());
    assert_eq!(count_files(out.path()), 0);
}

#[test]
fn invariant_wrong_password_fails_person_not_batch() {
    let out = tempfile::tempdir().unwrap();
    let certs = tempfile::tempdir().unwrap();
    let config = offline_config();
    let people = vec![Person::new("a@x.com", "Ana"), Person::new("b@x.com", "Bea")];
    let layout = OutputLayout::new(out.path());
    layout.prepare().unwrap();

    let good = auth_in(certs.path(), "secret");
    let signer = PassSigner::with_toolkit(&good, PasswordCheckingToolkit { password: "secret" });
    let generator = PassGenerator::new(&config, &good, ImageLoader::offline(), signer);
    let summary = BatchDriver::new(&generator, &layout, RunMode::ByEmail).run(&people);
    assert_eq!(summary.success_count(), 2);

    let out = tempfile::tempdir().unwrap();
    let layout = OutputLayout::new(out.path());
    layout.prepare().unwrap();
    let bad = auth_in(certs.path(), "wrong");
    let signer = PassSigner::with_toolkit(&bad, PasswordCheckingToolkit { password: "secret" });
    let generator = PassGenerator::new(&config, &bad, ImageLoader::offline(), signer);
    let summary = BatchDriver::new(&generator, &layout, RunMode::ByEmail).run(&people);

    // both people were attempted; neither left files behind
    assert_eq!(summary.failure_count(), 2);
    assert!(summary.failed[0].error.contains("extract"));
    assert_eq!(count_files(out.path()), 0);
}

#[test]
fn invariant_expand_fields_deterministic_and_token_free_identity() {
    let person = Person::new("a@x.com", "Ana").with_accreditation("B123");
    let ctx = build_context(&person, &PassConfig::default().event);
    let templates = FieldTemplates::default();

    for area in FieldArea::ALL {
        let first = expand_fields(templates.area(area), &ctx, area);
        let second = expand_fields(templates.area(area), &ctx, area);
        assert_eq!(first, second);
    }

    let plain = vec![FieldSpec::new("k", "Plain label", "plain value")];
    let expanded = expand_fields(&plain, &ctx, FieldArea::Secondary);
    assert_eq!(expanded[0].label, "Plain label");
    assert_eq!(expanded[0].value, "plain value");
}

#[test]
fn invariant_fixed_asset_size_and_squircle_corners() {
    let wide = image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
        200,
        30,
        image::Rgba([10, 120, 200, 255]),
    ));
    for size in [3, 29, 58] {
        let asset = produce_fixed_asset(&wide, size, true);
        assert_eq!(asset.dimensions(), (size, size));
        let masked = apply_squircle_mask(&asset, size, SQUIRCLE_EXPONENT);
        let last = size - 1;
        for (x, y) in [(0, 0), (last, 0), (0, last), (last, last)] {
            assert_eq!(masked.get_pixel(x, y).0[3], 0);
        }
        assert_eq!(masked.get_pixel(size / 2, size / 2).0[3], 255);
    }
}
