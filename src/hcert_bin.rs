use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context};
use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use p256::pkcs8::DecodePrivateKey as _;
use rsa::pkcs8::DecodePrivateKey as _;

use hcert::config::{HC1, DEFAULT_ISSUER};
use hcert::{
    CertificateEncoder, CertificateValidator, Compression, EcdsaP256Signer, EncoderConfig,
    FailurePolicy, RsaPssSigner, Signer, ValidatorConfig, VerificationKey,
};

/// Encode, validate and inspect health certificate tokens.
#[derive(Parser, Debug)]
#[command(name = "hcert", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Sign a clinical JSON document into a token.
    Encode(EncodeArgs),
    /// Verify a token and print the result as JSON.
    Validate(ValidateArgs),
    /// Print the headers and claims of a token without verifying it.
    Inspect(InspectArgs),
}

#[derive(clap::Args, Debug)]
struct EncodeArgs {
    /// JSON file holding the certificate body.
    #[arg(long)]
    payload: PathBuf,
    /// PKCS#8 PEM private key, P-256 (ES256) or RSA (PS256).
    #[arg(long)]
    key: PathBuf,
    /// Signer certificate, PEM or DER. The key identifier is derived from it.
    #[arg(long)]
    cert: PathBuf,
    /// Days from now until the certificate expires.
    #[arg(long, default_value_t = 365)]
    days: i64,
    #[arg(long, default_value = DEFAULT_ISSUER)]
    issuer: String,
    #[arg(long, default_value = HC1)]
    prefix: String,
    /// Wrap the DEFLATE stream in zlib framing.
    #[arg(long)]
    zlib: bool,
    /// Also write a test vector describing the encoding to this file.
    #[arg(long)]
    test_vector: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct ValidateArgs {
    /// The token. Read from --token-file when absent.
    token: Option<String>,
    #[arg(long, conflicts_with = "token")]
    token_file: Option<PathBuf>,
    /// Signer certificate (PEM or DER) or DER SubjectPublicKeyInfo.
    #[arg(long)]
    cert: Option<PathBuf>,
    /// PKCS#8 PEM private key whose public half is used when no certificate is given.
    #[arg(long)]
    fallback_key: Option<PathBuf>,
    /// Validation time, RFC 3339. Defaults to now.
    #[arg(long)]
    at: Option<DateTime<Utc>>,
    #[arg(long, default_value = HC1)]
    prefix: String,
    #[arg(long)]
    zlib: bool,
    /// Keep going after a failed check and report every error.
    #[arg(long)]
    continue_on_error: bool,
    /// Skip the issued-at/expiry window check.
    #[arg(long)]
    no_time_check: bool,
}

#[derive(clap::Args, Debug)]
struct InspectArgs {
    token: Option<String>,
    #[arg(long, conflicts_with = "token")]
    token_file: Option<PathBuf>,
    #[arg(long, default_value = HC1)]
    prefix: String,
    #[arg(long)]
    zlib: bool,
}

fn compression(zlib: bool) -> Compression {
    if zlib {
        Compression::Zlib
    } else {
        Compression::Raw
    }
}

fn read_token(token: Option<String>, token_file: Option<PathBuf>) -> anyhow::Result<String> {
    match (token, token_file) {
        (Some(token), _) => Ok(token),
        (None, Some(path)) => Ok(fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?
            .trim()
            .to_string()),
        (None, None) => bail!("either a token or --token-file is required"),
    }
}

/// Load a certificate, returning its DER encoding.
fn read_certificate(path: &Path) -> anyhow::Result<Vec<u8>> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if !bytes.starts_with(b"-----BEGIN") {
        return Ok(bytes);
    }
    let (_, pem) = x509_parser::pem::parse_x509_pem(&bytes)
        .map_err(|e| anyhow::anyhow!("{}: invalid PEM: {}", path.display(), e))?;
    Ok(pem.contents)
}

enum LoadedKey {
    P256(p256::ecdsa::SigningKey),
    Rsa(rsa::RsaPrivateKey),
}

fn read_private_key(path: &Path) -> anyhow::Result<LoadedKey> {
    let pem = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    if let Ok(key) = p256::ecdsa::SigningKey::from_pkcs8_pem(&pem) {
        return Ok(LoadedKey::P256(key));
    }
    let key = rsa::RsaPrivateKey::from_pkcs8_pem(&pem)
        .with_context(|| format!("{}: not a P-256 or RSA PKCS#8 key", path.display()))?;
    Ok(LoadedKey::Rsa(key))
}

fn encode(args: EncodeArgs) -> anyhow::Result<()> {
    let payload = fs::read_to_string(&args.payload)
        .with_context(|| format!("reading {}", args.payload.display()))?;
    let certificate = read_certificate(&args.cert)?;
    let signer: Box<dyn Signer> = match read_private_key(&args.key)? {
        LoadedKey::P256(key) => Box::new(EcdsaP256Signer::new(key, &certificate)),
        LoadedKey::Rsa(key) => Box::new(RsaPssSigner::new(key, &certificate)),
    };

    let encoder = CertificateEncoder::new(EncoderConfig {
        issuer: args.issuer,
        version_prefix: args.prefix,
        compression: compression(args.zlib),
    })?;
    let now = Utc::now();
    let encoded = encoder.encode_detailed(
        &payload,
        now,
        now + Duration::days(args.days),
        signer.as_ref(),
    )?;

    if let Some(path) = args.test_vector {
        let vector = encoded.test_vector(&payload, now);
        fs::write(&path, serde_json::to_string_pretty(&vector)?)
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote test vector");
    }
    println!("{}", encoded.token);
    Ok(())
}

fn validate(args: ValidateArgs) -> anyhow::Result<bool> {
    let token = read_token(args.token, args.token_file)?;
    let config = ValidatorConfig {
        version_prefix: args.prefix,
        compression: compression(args.zlib),
        failure_policy: if args.continue_on_error {
            FailurePolicy::ContinueAndReport
        } else {
            FailurePolicy::ShortCircuit
        },
        check_validity_window: !args.no_time_check,
        ..ValidatorConfig::default()
    };
    let mut validator = CertificateValidator::new(config)?;
    if let Some(path) = args.fallback_key {
        let key = match read_private_key(&path)? {
            LoadedKey::P256(key) => VerificationKey::P256(key.verifying_key().clone()),
            LoadedKey::Rsa(key) => VerificationKey::Rsa(key.to_public_key()),
        };
        validator = validator.with_fallback_key(key);
    }
    let certificate = args.cert.as_deref().map(read_certificate).transpose()?;

    let result = validator.validate(
        &token,
        args.at.unwrap_or_else(Utc::now),
        certificate.as_deref(),
    );
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.is_valid)
}

fn inspect(args: InspectArgs) -> anyhow::Result<()> {
    let token = read_token(args.token, args.token_file)?;
    let validator = CertificateValidator::new(ValidatorConfig {
        version_prefix: args.prefix,
        compression: compression(args.zlib),
        ..ValidatorConfig::default()
    })?;
    println!("{}", serde_json::to_string_pretty(&validator.inspect(&token)?)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Encode(args) => encode(args)?,
        Commands::Validate(args) => {
            if !validate(args)? {
                process::exit(1);
            }
        }
        Commands::Inspect(args) => inspect(args)?,
    }
    Ok(())
}
