use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use kvb_crypto::{DigestEncoding, HashAlgorithm};
use kvb_types::Revision;

#[derive(Parser)]
#[command(
    name = "kvb",
    about = "kvbucket: revisioned, chunked object storage",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory, overriding the configuration
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP server
    Serve(ServeArgs),
    /// Store a file as a new revision
    Put(PutArgs),
    /// Write a stored revision to a file or stdout
    Get(GetArgs),
    /// List the revisions of an entry
    Revisions(RevisionsArgs),
    /// Delete an entry or one of its revisions
    Delete(DeleteArgs),
    /// Print the digest of a file
    Hash(HashArgs),
    /// Derive the account id for an email address
    AccountId(AccountIdArgs),
    /// Print a random token
    Token(TokenArgs),
    /// Rewrite the data log without overwritten and deleted chunks
    Compact,
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct ServeArgs {
    #[arg(long)]
    pub bind: Option<String>,
    #[arg(long)]
    pub pid_file: Option<PathBuf>,
    /// Answer cross-origin requests
    #[arg(long)]
    pub cors: bool,
}

#[derive(Args)]
pub struct PutArgs {
    pub prefix: String,
    /// Input file, `-` for stdin
    pub file: PathBuf,
}

#[derive(Args)]
pub struct GetArgs {
    pub prefix: String,
    /// Revision to read; the latest by default
    #[arg(long)]
    pub rev: Option<Revision>,
    /// Output file; stdout by default
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Args)]
pub struct RevisionsArgs {
    pub prefix: String,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub prefix: String,
    /// Delete only this revision
    #[arg(long)]
    pub rev: Option<Revision>,
}

#[derive(Args)]
pub struct HashArgs {
    /// Input file, `-` for stdin
    pub file: PathBuf,
    #[arg(long)]
    pub algorithm: Option<HashAlgorithm>,
    #[arg(long)]
    pub encoding: Option<DigestEncoding>,
}

#[derive(Args)]
pub struct AccountIdArgs {
    pub email: String,
    /// Salt, overriding the configuration
    #[arg(long)]
    pub salt: Option<String>,
}

#[derive(Args)]
pub struct TokenArgs {
    #[arg(default_value_t = 32)]
    pub len: usize,
}
