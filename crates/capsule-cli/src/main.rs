//! capsule: export, validate and import workspace capsules

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use capsule_core::config::CapsuleConfig;
use capsule_core::types::AccessControl;
use capsule_core::{CapsuleError, CapsuleResult};
use capsule_crypto::{load_signer, KdfParams, ManifestSigner, SignatureScheme, TrustSet};
use capsule_engine::{CapsuleEngine, EncryptionOptions, ExportOptions, ImportOptions, ValidateOptions};
use capsule_redact::RedactionPolicy;
use capsule_storage::{build_backend, DirUrlCache, S3Credentials};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;

#[derive(Parser, Debug)]
#[command(
    name = "capsule",
    version,
    about = "capsule: signed, content-addressed workspace snapshots",
    long_about = None
)]
struct Cli {
    /// Path to capsule configuration file (missing file = defaults)
    #[arg(long, short = 'c', env = "CAPSULE_CONFIG", default_value = "capsule.toml")]
    config: PathBuf,

    /// Log level filter (RUST_LOG takes precedence)
    #[arg(long, env = "CAPSULE_LOG")]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify every file in a workspace and print the redaction report
    Scan {
        /// Workspace root
        workspace: PathBuf,
    },

    /// Export a workspace as a signed capsule
    ///
    /// Prints the capsule id on success. Signing key and backend come from
    /// the [signing] and [storage] config sections.
    Export {
        /// Workspace root
        workspace: PathBuf,
        /// Scan and write the redaction report only
        #[arg(long)]
        dry_run: bool,
        /// Skip forbidden files instead of aborting
        #[arg(long)]
        no_strict: bool,
        /// Bundle artifacts into one tar+zstd blob
        #[arg(long)]
        compress: bool,
        /// Encrypt blobs with a passphrase (CAPSULE_PASSPHRASE or prompt)
        #[arg(long)]
        encrypt: bool,
        /// Mark the capsule as publicly readable
        #[arg(long)]
        public: bool,
        /// Identity allowed to read the capsule (repeatable)
        #[arg(long = "reader")]
        readers: Vec<String>,
    },

    /// Verify a capsule and restore its files into a directory
    Import {
        capsule_id: String,
        /// Restore target directory (created if missing)
        target: PathBuf,
        /// Replace files that already exist
        #[arg(long)]
        overwrite: bool,
        /// Keep going past per-file failures
        #[arg(long)]
        partial: bool,
        /// Also write the restore report to this path
        #[arg(long)]
        report: Option<PathBuf>,
        /// Additional trusted signer identity (repeatable)
        #[arg(long = "trust")]
        trust: Vec<String>,
    },

    /// Verify schema, signature and blob integrity without writing anything
    Validate {
        capsule_id: String,
        /// Additional trusted signer identity (repeatable)
        #[arg(long = "trust")]
        trust: Vec<String>,
        /// Decrypt blobs and check plaintext hashes (prompts for passphrase)
        #[arg(long)]
        decrypt: bool,
    },

    /// Print the configured signer's scheme and identity
    Identity,

    /// Inspect or clear the presigned URL cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// List cached entries with their status
    List,
    /// Remove one entry, or every entry when no key is given
    Clear {
        /// Cache key (e.g. "<capsule_id>:read")
        key: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli.config).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("capsule: {e}");
            std::process::exit(e.exit_code());
        }
    };

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let format = cli.log_format.unwrap_or(match config.logging.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, format);

    if let Err(e) = run(cli.command, &config).await {
        tracing::debug!(error = ?e, "command failed");
        eprintln!("capsule: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(command: Commands, config: &CapsuleConfig) -> CapsuleResult<()> {
    match command {
        Commands::Scan { workspace } => cmd_scan(config, &workspace),
        Commands::Export {
            workspace,
            dry_run,
            no_strict,
            compress,
            encrypt,
            public,
            readers,
        } => {
            let flags = ExportFlags {
                dry_run,
                no_strict,
                compress,
                encrypt,
                public,
                readers,
            };
            cmd_export(config, &workspace, flags).await
        }
        Commands::Import {
            capsule_id,
            target,
            overwrite,
            partial,
            report,
            trust,
        } => cmd_import(config, &capsule_id, &target, overwrite, partial, report, &trust).await,
        Commands::Validate {
            capsule_id,
            trust,
            decrypt,
        } => cmd_validate(config, &capsule_id, &trust, decrypt).await,
        Commands::Identity => cmd_identity(config).await,
        Commands::Cache { action } => cmd_cache(config, action),
    }
}

// ── Setup ─────────────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> CapsuleResult<CapsuleConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        CapsuleConfig::from_toml(&content).map_err(|e| match e {
            CapsuleError::Config(msg) => CapsuleError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    } else {
        Ok(CapsuleConfig::default())
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Load the signing key named by `[signing]`, if one is configured.
async fn load_configured_signer(config: &CapsuleConfig) -> CapsuleResult<Option<Arc<dyn ManifestSigner>>> {
    let Some(key_file) = &config.signing.key_file else {
        return Ok(None);
    };
    let scheme: SignatureScheme = config.signing.scheme.parse()?;
    let material = tokio::fs::read_to_string(key_file)
        .await
        .with_context(|| format!("reading signing key: {}", key_file.display()))?;
    Ok(Some(load_signer(scheme, &material)?))
}

/// S3 credentials from AWS_* (or CAPSULE_*) environment variables.
fn s3_credentials_from_env() -> Option<S3Credentials> {
    let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
        .or_else(|_| std::env::var("CAPSULE_ACCESS_KEY_ID"))
        .ok()?;
    let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .or_else(|_| std::env::var("CAPSULE_SECRET_ACCESS_KEY"))
        .ok()?;
    Some(S3Credentials {
        access_key_id,
        secret_access_key,
    })
}

fn build_engine(
    config: &CapsuleConfig,
    signer: Option<Arc<dyn ManifestSigner>>,
) -> CapsuleResult<CapsuleEngine> {
    let creds = s3_credentials_from_env();
    let backend = build_backend(&config.storage, signer, creds.as_ref())?;
    tracing::debug!(backend = backend.name(), "storage backend ready");
    CapsuleEngine::new(backend)
}

/// Passphrase from CAPSULE_PASSPHRASE, else an interactive prompt.
fn read_passphrase(confirm: bool) -> CapsuleResult<SecretString> {
    if let Ok(p) = std::env::var("CAPSULE_PASSPHRASE") {
        return Ok(SecretString::from(p));
    }
    let first = rpassword::prompt_password("Passphrase: ").context("reading passphrase")?;
    if confirm {
        let second = rpassword::prompt_password("Confirm passphrase: ").context("reading passphrase")?;
        if first != second {
            return Err(CapsuleError::Config("passphrases do not match".into()));
        }
    }
    Ok(SecretString::from(first))
}

fn trust_set(config: &CapsuleConfig, extra: &[String]) -> TrustSet {
    TrustSet::new(config.trust.identities.iter().chain(extra.iter()).cloned())
}

fn print_json<T: serde::Serialize>(value: &T) -> CapsuleResult<()> {
    let rendered = serde_json::to_string_pretty(value).context("serializing output")?;
    println!("{rendered}");
    Ok(())
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn cmd_scan(config: &CapsuleConfig, workspace: &Path) -> CapsuleResult<()> {
    // scanning never touches storage; a local engine suffices for schema checks
    let engine = CapsuleEngine::new(Arc::new(capsule_storage::LocalDirBackend::new(
        &config.storage.root,
    )))?;
    let policy = RedactionPolicy::from_config(&config.policy)?;
    let report = engine.scan(workspace, &policy)?;
    print_json(&report)
}

#[derive(Debug)]
struct ExportFlags {
    dry_run: bool,
    no_strict: bool,
    compress: bool,
    encrypt: bool,
    public: bool,
    readers: Vec<String>,
}

async fn cmd_export(config: &CapsuleConfig, workspace: &Path, flags: ExportFlags) -> CapsuleResult<()> {
    let signer = load_configured_signer(config).await?;
    if signer.is_none() && !flags.dry_run {
        return Err(CapsuleError::Config(
            "export needs a signing key: set signing.key_file".into(),
        ));
    }
    let engine = build_engine(config, signer.clone())?;

    let mut opts = ExportOptions::new(RedactionPolicy::from_config(&config.policy)?);
    opts.strict = config.policy.strict && !flags.no_strict;
    opts.dry_run = flags.dry_run;
    if flags.compress || config.compression.enabled {
        opts.compression_level = Some(config.compression.level);
    }
    if (flags.encrypt || config.crypto.enabled) && !flags.dry_run {
        opts.encryption = Some(EncryptionOptions {
            passphrase: read_passphrase(true)?,
            aead: config.crypto.aead.parse()?,
            kdf: KdfParams {
                mem_kib: config.crypto.argon2_mem_kib,
                iterations: config.crypto.argon2_iterations,
                parallelism: config.crypto.argon2_parallelism,
            },
        });
    }
    if flags.public || !flags.readers.is_empty() {
        let owner = signer.as_ref().map(|s| s.identity()).unwrap_or_default();
        opts.access = Some(AccessControl {
            owner,
            readers: flags.readers,
            public: flags.public,
        });
    }

    let outcome = engine.export(workspace, signer, opts).await?;
    tracing::info!(
        capsule_id = %outcome.capsule_id,
        files = outcome.report.decisions.len(),
        included = outcome.report.included().count(),
        findings = outcome.report.findings_summary.total,
        dry_run = flags.dry_run,
        "export complete"
    );
    if flags.dry_run {
        print_json(&outcome.report)?;
    } else {
        println!("{}", outcome.capsule_id);
    }
    Ok(())
}

async fn cmd_import(
    config: &CapsuleConfig,
    capsule_id: &str,
    target: &Path,
    overwrite: bool,
    partial: bool,
    report: Option<PathBuf>,
    trust: &[String],
) -> CapsuleResult<()> {
    let signer = load_configured_signer(config).await?;
    let engine = build_engine(config, signer)?;

    let mut opts = ImportOptions::new(trust_set(config, trust));
    opts.overwrite = overwrite;
    opts.partial = partial;
    opts.report_path = report;

    let verified = engine.load_manifest(capsule_id, &opts.trusted).await?;
    if verified.manifest.crypto.is_some() {
        opts.passphrase = Some(read_passphrase(false)?);
    }

    let restore = engine.import(capsule_id, target, &opts).await?;
    print_json(&restore)?;
    if !restore.results.failed.is_empty() {
        return Err(CapsuleError::RestoreFailed(format!(
            "{} file(s) failed to restore",
            restore.results.failed.len()
        )));
    }
    Ok(())
}

async fn cmd_validate(config: &CapsuleConfig, capsule_id: &str, trust: &[String], decrypt: bool) -> CapsuleResult<()> {
    let signer = load_configured_signer(config).await?;
    let engine = build_engine(config, signer)?;

    let passphrase = if decrypt { Some(read_passphrase(false)?) } else { None };
    let summary = engine
        .validate(
            capsule_id,
            &ValidateOptions {
                trusted: trust_set(config, trust),
                passphrase,
            },
        )
        .await?;
    println!(
        "ok  {}  signer={}  blobs={}  artifacts={}",
        summary.capsule_id, summary.signer, summary.blobs_checked, summary.artifacts_checked
    );
    Ok(())
}

async fn cmd_identity(config: &CapsuleConfig) -> CapsuleResult<()> {
    let signer = load_configured_signer(config)
        .await?
        .ok_or_else(|| CapsuleError::Config("no signing key configured (signing.key_file)".into()))?;
    println!("{}  {}", signer.scheme(), signer.identity());
    Ok(())
}

fn cmd_cache(config: &CapsuleConfig, action: CacheAction) -> CapsuleResult<()> {
    let dir = config
        .storage
        .url_cache_dir
        .as_ref()
        .ok_or_else(|| CapsuleError::Config("storage.url_cache_dir is not set".into()))?;
    let cache = DirUrlCache::new(dir, Duration::from_secs(config.storage.url_cache_buffer_secs));

    match action {
        CacheAction::List => {
            let entries = cache.list()?;
            if entries.is_empty() {
                println!("(empty: {})", cache.dir().display());
            }
            for entry in entries {
                let status = serde_json::to_value(entry.status)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_owned))
                    .unwrap_or_default();
                match entry.expires_at {
                    Some(exp) => println!("{:<10} {}  expires_at={exp}", status, entry.file),
                    None => println!("{:<10} {}", status, entry.file),
                }
            }
        }
        CacheAction::Clear { key } => {
            let removed = cache.clear(key.as_deref())?;
            println!("removed {removed} cache entr{}", if removed == 1 { "y" } else { "ies" });
        }
    }
    Ok(())
}
