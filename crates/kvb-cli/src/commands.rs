use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use colored::Colorize;
use kvb_crypto::{random_string, AccountIdDeriver, IntegrityHasher};
use kvb_server::{KvbServer, ServerConfig};
use kvb_store::{BucketStore, RevisionHandle};

use crate::cli::*;

/// Data directory used when neither the config nor `--data-dir` sets one.
pub const DEFAULT_DATA_DIR: &str = "kvb-data";

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let format = cli.format;
    match cli.command {
        Command::Serve(args) => cmd_serve(config, args),
        Command::Put(args) => cmd_put(&config, args, format),
        Command::Get(args) => cmd_get(&config, args),
        Command::Revisions(args) => cmd_revisions(&config, args, format),
        Command::Delete(args) => cmd_delete(&config, args),
        Command::Hash(args) => cmd_hash(&config, args),
        Command::AccountId(args) => cmd_account_id(&config, args),
        Command::Token(args) => cmd_token(args),
        Command::Compact => cmd_compact(&config, format),
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

/// Config file (or defaults) with command-line overrides applied.
pub fn load_config(cli: &Cli) -> anyhow::Result<ServerConfig> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.store.data_dir = Some(dir.clone());
    }
    if config.store.data_dir.is_none() {
        config.store.data_dir = Some(PathBuf::from(DEFAULT_DATA_DIR));
    }
    Ok(config)
}

fn open_store(config: &ServerConfig) -> anyhow::Result<BucketStore> {
    let store_config = config.store_config();
    let dir = store_config.data_dir.clone().unwrap_or_default();
    BucketStore::open(store_config)
        .with_context(|| format!("opening store in {}", dir.display()))
}

fn open_input(path: &Path) -> anyhow::Result<Box<dyn Read>> {
    if path == Path::new("-") {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Box::new(file))
}

fn cmd_serve(mut config: ServerConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(bind) = args.bind {
        config.bind_addr = bind.parse().with_context(|| format!("invalid bind address {bind}"))?;
    }
    if args.pid_file.is_some() {
        config.pid_file = args.pid_file;
    }
    config.allow_cors |= args.cors;

    let data_dir = config.store.data_dir.clone().unwrap_or_default();
    println!(
        "kvbucket server on {} (data: {})",
        config.bind_addr.to_string().bold(),
        data_dir.display()
    );
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(KvbServer::new(config).serve())?;
    Ok(())
}

fn cmd_put(config: &ServerConfig, args: PutArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let input = open_input(&args.file)?;
    let handle = store.put_reader(&args.prefix, input)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&handle)?),
        OutputFormat::Text => print_handle(&handle),
    }
    Ok(())
}

fn print_handle(handle: &RevisionHandle) {
    println!(
        "{} Stored {} revision {}",
        "✓".green().bold(),
        handle.prefix.bold(),
        handle.revision.to_string().yellow()
    );
    println!("  Chunks: {}", handle.chunks);
    println!("  Bytes:  {}", handle.bytes);
    println!("  Digest: {}", handle.digest.cyan());
}

fn cmd_get(config: &ServerConfig, args: GetArgs) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let chunks = store.open_stream(&args.prefix, args.rev)?;
    let revision = chunks.revision();
    let mut reader = chunks.into_reader();

    match &args.out {
        Some(path) => {
            let mut file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
            if let Err(e) = io::copy(&mut reader, &mut file) {
                drop(file);
                // A partial copy must not look like a complete download.
                let _ = std::fs::remove_file(path);
                return Err(e).with_context(|| format!("reading {} revision {revision}", args.prefix));
            }
            file.flush()?;
            eprintln!(
                "{} Wrote {} revision {} to {}",
                "✓".green().bold(),
                args.prefix.bold(),
                revision.to_string().yellow(),
                path.display()
            );
        }
        None => {
            let mut stdout = io::stdout().lock();
            io::copy(&mut reader, &mut stdout)
                .with_context(|| format!("reading {} revision {revision}", args.prefix))?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn cmd_revisions(config: &ServerConfig, args: RevisionsArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let revisions = store.revisions(&args.prefix)?;
    let current = store.revision_index().current_revision_number(&args.prefix)?;
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "prefix": args.prefix,
                "revisions": revisions,
                "current": current,
            })
        ),
        OutputFormat::Text => {
            if revisions.is_empty() {
                println!("{} has no revisions", args.prefix.bold());
            }
            for revision in revisions {
                let chunks = store.chunk_count(&args.prefix, revision)?;
                let marker = if i64::from(revision) == current { "*".green().bold() } else { " ".normal() };
                println!("{marker} {} ({chunks} chunks)", revision.to_string().yellow());
            }
        }
    }
    Ok(())
}

fn cmd_delete(config: &ServerConfig, args: DeleteArgs) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let removed = match args.rev {
        Some(revision) => store.delete_revision(&args.prefix, revision)?,
        None => store.delete_entry(&args.prefix)?,
    };
    println!("{} Removed {removed} chunks of {}", "✓".green(), args.prefix.bold());
    Ok(())
}

fn cmd_compact(config: &ServerConfig, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let report = store.compact()?;
    match (format, report) {
        (OutputFormat::Json, report) => println!("{}", serde_json::to_string_pretty(&report)?),
        (OutputFormat::Text, Some(report)) => {
            println!(
                "{} Compacted {} live chunks",
                "✓".green().bold(),
                report.live_keys
            );
            println!("  Before: {} bytes", report.bytes_before);
            println!("  After:  {} bytes", report.bytes_after);
        }
        (OutputFormat::Text, None) => println!("Nothing to compact"),
    }
    Ok(())
}

fn cmd_hash(config: &ServerConfig, args: HashArgs) -> anyhow::Result<()> {
    let hasher = IntegrityHasher::new(
        args.algorithm.unwrap_or(config.hash.algorithm),
        args.encoding.unwrap_or(config.hash.encoding),
    );
    let input = open_input(&args.file)?;
    let digest = hasher.hash_reader(input)?;
    println!("{digest}  {}", args.file.display());
    Ok(())
}

fn cmd_account_id(config: &ServerConfig, args: AccountIdArgs) -> anyhow::Result<()> {
    let mut account = config.account.clone();
    if let Some(salt) = args.salt {
        account.secret_salt = salt;
    }
    println!("{}", AccountIdDeriver::new(&account).derive(args.email.trim()));
    Ok(())
}

fn cmd_token(args: TokenArgs) -> anyhow::Result<()> {
    println!("{}", random_string(args.len)?);
    Ok(())
}
