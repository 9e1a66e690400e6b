//! `roster-engine`: evidence manifests and lifecycle simulation from the command line

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command};
use roster_core::{run_scenarios, EngineConfig};
use roster_evidence::{
    build_manifest, verify, verify_signed, EvidenceManifest, EvidenceSigner, Sha256Digest,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_arg = Arg::new("config")
        .long("config")
        .value_parser(value_parser!(PathBuf))
        .help("Engine configuration (TOML)");

    let cli = Command::new("roster-engine")
        .version(roster_core::VERSION)
        .about("Plan lifecycle and repair orchestration engine")
        .subcommand_required(true)
        .subcommand(
            Command::new("manifest")
                .about("Hash and sign every file in a directory")
                .arg(
                    Arg::new("dir")
                        .long("dir")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(Arg::new("pack-id").long("pack-id").required(true))
                .arg(
                    Arg::new("out")
                        .long("out")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the manifest here instead of stdout"),
                )
                .arg(config_arg.clone()),
        )
        .subcommand(
            Command::new("verify")
                .about("Check a directory against an evidence manifest")
                .arg(
                    Arg::new("manifest")
                        .long("manifest")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("dir")
                        .long("dir")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(config_arg.clone()),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run the lifecycle scenarios against an in-memory engine")
                .arg(config_arg),
        );

    let matches = cli.get_matches();
    let outcome = match matches.subcommand() {
        Some(("manifest", args)) => manifest(args),
        Some(("verify", args)) => verify_dir(args),
        Some(("simulate", args)) => simulate(args),
        _ => Ok(true),
    };

    match outcome {
        Ok(passed) => std::process::exit(if passed { 0 } else { 1 }),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(2);
        }
    }
}

fn load_config(args: &ArgMatches) -> Result<EngineConfig> {
    let path = args.get_one::<PathBuf>("config");
    EngineConfig::load(path.map(PathBuf::as_path)).context("loading engine configuration")
}

/// Regular files directly under `dir`, keyed by file name
fn read_files(dir: &Path, skip: Option<&Path>) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut files = BTreeMap::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        if !path.is_file() || skip.is_some_and(|s| s == path) {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            bail!("non UTF-8 file name in {}", dir.display());
        };
        let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        files.insert(name.to_string(), bytes);
    }
    Ok(files)
}

fn manifest(args: &ArgMatches) -> Result<bool> {
    let config = load_config(args)?;
    let signer = config.signer().context("manifest needs a signing key")?;
    let dir = args.get_one::<PathBuf>("dir").context("--dir is required")?;
    let pack_id = args.get_one::<String>("pack-id").context("--pack-id is required")?;
    let out = args.get_one::<PathBuf>("out");

    let files = read_files(dir, out.map(PathBuf::as_path))?;
    let manifest = build_manifest(pack_id, &files, &signer, chrono::Utc::now())?;
    let json = manifest.to_json_pretty()?;
    match out {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(
                pack_id = %pack_id,
                files = files.len(),
                out = %path.display(),
                "manifest written"
            );
        }
        None => println!("{json}"),
    }
    Ok(true)
}

fn verify_dir(args: &ArgMatches) -> Result<bool> {
    let config = load_config(args)?;
    let manifest_path = args
        .get_one::<PathBuf>("manifest")
        .context("--manifest is required")?;
    let dir = args.get_one::<PathBuf>("dir").context("--dir is required")?;

    let raw = std::fs::read_to_string(manifest_path)
        .with_context(|| format!("reading {}", manifest_path.display()))?;
    let manifest = EvidenceManifest::from_json(&raw)?;
    let files = read_files(dir, Some(manifest_path.as_path()))?;

    let report = match config.signer() {
        Ok(signer) => verify_signed(&manifest, &files, &signer),
        Err(err) => {
            tracing::warn!(error = %err, "no signing key, checking file hashes only");
            verify(&manifest, &files)
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.passed)
}

fn simulate(args: &ArgMatches) -> Result<bool> {
    let config = load_config(args)?;
    let signer = match config.signer() {
        Ok(signer) => signer,
        Err(_) => {
            tracing::info!("no signing key configured, using an ephemeral key");
            let seed = Sha256Digest::compute(uuid::Uuid::new_v4().as_bytes());
            EvidenceSigner::new(seed.as_bytes())?
        }
    };

    let report = run_scenarios(&config, signer)?;
    println!("{}", report.generate_text());
    Ok(report.passed())
}
