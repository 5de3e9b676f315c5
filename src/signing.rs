//! Signing - certificate extraction and detached manifest signatures
//!
//! The cryptographic toolkit (the `openssl` command line) does the actual
//! work. It is reached through [`CryptoToolkit`] so the retry and
//! conversion logic can be exercised without it.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::AuthConfig;

const PEM_MARKER: &[u8] = b"BEGIN CERTIFICATE";
const PEM_SNIFF_BYTES: u64 = 100;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Cannot run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Certificate bundle not found: {0}")]
    BundleNotFound(String),

    #[error("Could not extract certificate and key from the P12 bundle, check the password: {stderr}")]
    Extraction { stderr: String },

    #[error("Trust root certificate not found: {0}")]
    TrustRootNotFound(String),

    #[error("Could not convert trust root certificate to PEM: {stderr}")]
    TrustRootConversion { stderr: String },

    #[error("Manifest signing failed: {stderr}")]
    Sign { stderr: String },

    #[error("Signer produced an empty signature")]
    EmptySignature,

    #[error("I/O error during signing: {0}")]
    Io(#[from] io::Error),
}

/// Outcome of one toolkit invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub stderr: String,
}

pub trait CryptoToolkit {
    fn run(&self, args: &[String]) -> Result<ToolOutput, SigningError>;
}

/// The `openssl` binary.
#[derive(Debug, Clone)]
pub struct OpensslCli {
    program: PathBuf,
}

impl OpensslCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl CryptoToolkit for OpensslCli {
    fn run(&self, args: &[String]) -> Result<ToolOutput, SigningError> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|source| SigningError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;
        Ok(ToolOutput {
            success: output.status.success(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Produces the detached signature stored next to the manifest.
pub trait ManifestSigner {
    /// DER-encoded detached signature of `manifest`. Intermediate files go in
    /// `work_dir`, which the caller discards.
    fn sign(&self, manifest: &[u8], work_dir: &Path) -> Result<Vec<u8>, SigningError>;
}

/// PEM files extracted from the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
    pub used_legacy: bool,
}

pub struct PassSigner<'a, T: CryptoToolkit = OpensslCli> {
    auth: &'a AuthConfig,
    toolkit: T,
}

impl<'a> PassSigner<'a, OpensslCli> {
    pub fn new(auth: &'a AuthConfig) -> Self {
        Self::with_toolkit(auth, OpensslCli::new(&auth.toolkit))
    }
}

impl<'a, T: CryptoToolkit> PassSigner<'a, T> {
    pub fn with_toolkit(auth: &'a AuthConfig, toolkit: T) -> Self {
        Self { auth, toolkit }
    }

    pub fn toolkit(&self) -> &T {
        &self.toolkit
    }

    /// Extract the leaf certificate and an unencrypted key.
    ///
    /// A failed extraction is retried once with `-legacy`, which newer
    /// toolkits need for bundles using older ciphers.
    pub fn extract_credentials(&self, work_dir: &Path) -> Result<Credentials, SigningError> {
        let bundle = &self.auth.certificate_bundle_path;
        if !bundle.is_file() {
            return Err(SigningError::BundleNotFound(bundle.display().to_string()));
        }
        let certificate = work_dir.join("cert.pem");
        let private_key = work_dir.join("key.pem");

        let used_legacy = match self.export_pem_pair(false, &certificate, &private_key)? {
            Ok(()) => false,
            Err(first) => {
                debug!(stderr = %first, "P12 extraction failed, retrying with -legacy");
                match self.export_pem_pair(true, &certificate, &private_key)? {
                    Ok(()) => {
                        warn!("certificate extracted using the toolkit -legacy flag");
                        true
                    }
                    Err(stderr) => {
                        error!(%stderr, "P12 extraction failed");
                        return Err(SigningError::Extraction { stderr });
                    }
                }
            }
        };

        Ok(Credentials {
            certificate,
            private_key,
            used_legacy,
        })
    }

    /// Outer error: the toolkit could not run. Inner error: it ran and failed.
    fn export_pem_pair(
        &self,
        legacy: bool,
        certificate: &Path,
        private_key: &Path,
    ) -> Result<Result<(), String>, SigningError> {
        let mut base = vec![
            "pkcs12".to_string(),
            "-in".to_string(),
            path_arg(&self.auth.certificate_bundle_path),
            "-passin".to_string(),
            format!("pass:{}", self.auth.certificate_password),
        ];
        if legacy {
            base.push("-legacy".to_string());
        }

        let cert_args = [
            base.clone(),
            args(&["-clcerts", "-nokeys", "-out"]),
            vec![path_arg(certificate)],
        ]
        .concat();
        let out = self.toolkit.run(&cert_args)?;
        if !out.success {
            return Ok(Err(out.stderr));
        }

        let key_args = [
            base,
            args(&["-nocerts", "-nodes", "-out"]),
            vec![path_arg(private_key)],
        ]
        .concat();
        let out = self.toolkit.run(&key_args)?;
        if !out.success {
            return Ok(Err(out.stderr));
        }
        Ok(Ok(()))
    }

    /// The trust root as PEM, converting from DER into `work_dir` if needed.
    pub fn ensure_trust_root_pem(&self, work_dir: &Path) -> Result<PathBuf, SigningError> {
        let path = &self.auth.trust_root_path;
        if !path.is_file() {
            return Err(SigningError::TrustRootNotFound(path.display().to_string()));
        }
        if is_pem_certificate(path)? {
            return Ok(path.clone());
        }

        let pem = work_dir.join("wwdr.pem");
        let convert = [
            args(&["x509", "-inform", "DER", "-in"]),
            vec![path_arg(path), "-out".to_string(), path_arg(&pem)],
        ]
        .concat();
        let out = self.toolkit.run(&convert)?;
        if !out.success {
            error!(stderr = %out.stderr, "trust root conversion failed");
            return Err(SigningError::TrustRootConversion { stderr: out.stderr });
        }
        Ok(pem)
    }

    fn sign_manifest_file(
        &self,
        manifest: &Path,
        credentials: &Credentials,
        trust_root: &Path,
        signature: &Path,
    ) -> Result<Vec<u8>, SigningError> {
        let sign_args = vec![
            "smime".to_string(),
            "-binary".to_string(),
            "-sign".to_string(),
            "-certfile".to_string(),
            path_arg(trust_root),
            "-signer".to_string(),
            path_arg(&credentials.certificate),
            "-inkey".to_string(),
            path_arg(&credentials.private_key),
            "-in".to_string(),
            path_arg(manifest),
            "-out".to_string(),
            path_arg(signature),
            "-outform".to_string(),
            "DER".to_string(),
            "-passin".to_string(),
            "pass:".to_string(),
        ];
        let out = self.toolkit.run(&sign_args)?;
        if !out.success {
            return Err(SigningError::Sign { stderr: out.stderr });
        }
        let bytes = fs::read(signature)?;
        if bytes.is_empty() {
            return Err(SigningError::EmptySignature);
        }
        Ok(bytes)
    }
}

impl<T: CryptoToolkit> ManifestSigner for PassSigner<'_, T> {
    fn sign(&self, manifest: &[u8], work_dir: &Path) -> Result<Vec<u8>, SigningError> {
        let manifest_path = work_dir.join("manifest.json");
        fs::write(&manifest_path, manifest)?;
        let credentials = self.extract_credentials(work_dir)?;
        let trust_root = self.ensure_trust_root_pem(work_dir)?;
        self.sign_manifest_file(
            &manifest_path,
            &credentials,
            &trust_root,
            &work_dir.join("signature"),
        )
    }
}

/// True when the first bytes of the file carry a PEM certificate marker.
pub fn is_pem_certificate(path: &Path) -> Result<bool, SigningError> {
    let mut head = Vec::with_capacity(PEM_SNIFF_BYTES as usize);
    File::open(path)?.take(PEM_SNIFF_BYTES).read_to_end(&mut head)?;
    Ok(head.windows(PEM_MARKER.len()).any(|w| w == PEM_MARKER))
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Records invocations; writes a file to every `-out` on success.
    struct FakeToolkit {
        calls: RefCell<Vec<Vec<String>>>,
        accept: fn(&[String]) -> bool,
    }

    impl FakeToolkit {
        fn new(accept: fn(&[String]) -> bool) -> Self {
            Self {
                calls: RefCell::new(vec![]),
                accept,
            }
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.borrow().clone()
        }
    }

    impl CryptoToolkit for FakeToolkit {
        fn run(&self, args: &[String]) -> Result<ToolOutput, SigningError> {
            self.calls.borrow_mut().push(args.to_vec());
            if !(self.accept)(args) {
                return Ok(ToolOutput {
                    success: false,
                    stderr: "Mac verify error: invalid password?".to_string(),
                });
            }
            if let Some(i) = args.iter().position(|a| a == "-out") {
                fs::write(&args[i + 1], format!("out of {}", args[0]))?;
            }
            Ok(ToolOutput {
                success: true,
                stderr: String::new(),
            })
        }
    }

    fn auth_in(dir: &Path, trust_root: &[u8]) -> AuthConfig {
        let bundle = dir.join("cert.p12");
        let wwdr = dir.join("wwdr.cer");
        fs::write(&bundle, b"p12").unwrap();
        fs::write(&wwdr, trust_root).unwrap();
        AuthConfig {
            team_identifier: "TEAM".into(),
            pass_type_identifier: "pass.org.example".into(),
            certificate_bundle_path: bundle,
            certificate_password: "secret".into(),
            trust_root_path: wwdr,
            toolkit: PathBuf::from("openssl"),
        }
    }

    fn has(args: &[String], flag: &str) -> bool {
        args.iter().any(|a| a == flag)
    }

    #[test]
    fn test_extraction_direct() {
        let dir = tempfile::tempdir().unwrap();
        let auth = auth_in(dir.path(), b"-----BEGIN CERTIFICATE-----\n");
        let signer = PassSigner::with_toolkit(&auth, FakeToolkit::new(|_| true));
        let creds = signer.extract_credentials(dir.path()).unwrap();
        assert!(!creds.used_legacy);
        assert!(creds.certificate.is_file());
        assert!(creds.private_key.is_file());
        let calls = signer.toolkit().calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.contains(&"pass:secret".to_string())));
    }

    #[test]
    fn test_extraction_retries_with_legacy() {
        let dir = tempfile::tempdir().unwrap();
        let auth = auth_in(dir.path(), b"-----BEGIN CERTIFICATE-----\n");
        let signer = PassSigner::with_toolkit(&auth, FakeToolkit::new(|a| has(a, "-legacy")));
        let creds = signer.extract_credentials(dir.path()).unwrap();
        assert!(creds.used_legacy);
        let calls = signer.toolkit().calls();
        assert!(!has(&calls[0], "-legacy"));
        assert!(has(&calls[1], "-legacy"));
    }

    #[test]
    fn test_wrong_password_fails_both_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let auth = auth_in(dir.path(), b"-----BEGIN CERTIFICATE-----\n");
        let signer = PassSigner::with_toolkit(&auth, FakeToolkit::new(|a| a[0] != "pkcs12"));
        let err = signer.extract_credentials(dir.path()).unwrap_err();
        assert!(matches!(err, SigningError::Extraction { .. }));
        let calls = signer.toolkit().calls();
        assert_eq!(calls.len(), 2);
        assert!(has(&calls[1], "-legacy"));
    }

    #[test]
    fn test_pem_trust_root_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let auth = auth_in(dir.path(), b"-----BEGIN CERTIFICATE-----\nMIIB\n");
        let signer = PassSigner::with_toolkit(&auth, FakeToolkit::new(|_| true));
        let pem = signer.ensure_trust_root_pem(dir.path()).unwrap();
        assert_eq!(pem, auth.trust_root_path);
        assert!(signer.toolkit().calls().is_empty());
    }

    #[test]
    fn test_der_trust_root_converted() {
        let dir = tempfile::tempdir().unwrap();
        let auth = auth_in(dir.path(), &[0x30, 0x82, 0x04, 0x22, 0x30, 0x82]);
        let signer = PassSigner::with_toolkit(&auth, FakeToolkit::new(|_| true));
        let pem = signer.ensure_trust_root_pem(dir.path()).unwrap();
        assert_eq!(pem, dir.path().join("wwdr.pem"));
        let calls = signer.toolkit().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][0], "x509");
        assert!(has(&calls[0], "DER"));
    }

    #[test]
    fn test_marker_past_sniff_window_is_der() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = vec![b'x'; 120];
        content.extend_from_slice(b"BEGIN CERTIFICATE");
        let path = dir.path().join("late.cer");
        fs::write(&path, content).unwrap();
        assert!(!is_pem_certificate(&path).unwrap());
    }

    #[test]
    fn test_sign_end_to_end_with_fake_toolkit() {
        let dir = tempfile::tempdir().unwrap();
        let auth = auth_in(dir.path(), b"-----BEGIN CERTIFICATE-----\n");
        let signer = PassSigner::with_toolkit(&auth, FakeToolkit::new(|_| true));
        let work = tempfile::tempdir().unwrap();
        let signature = signer.sign(b"{}", work.path()).unwrap();
        assert_eq!(signature, b"out of smime");
        let calls = signer.toolkit().calls();
        let smime = calls.last().unwrap();
        assert!(has(smime, "-certfile"));
        assert!(has(smime, "pass:"));
    }

    #[test]
    fn test_missing_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let mut auth = auth_in(dir.path(), b"-----BEGIN CERTIFICATE-----\n");
        auth.certificate_bundle_path = dir.path().join("gone.p12");
        let signer = PassSigner::with_toolkit(&auth, FakeToolkit::new(|_| true));
        let err = signer.extract_credentials(dir.path()).unwrap_err();
        assert!(matches!(err, SigningError::BundleNotFound(_)));
    }
}
