use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "confer",
    about = "Fetch and store configuration documents across repositories",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Repository definitions file
    #[arg(short, long, global = true, default_value = "confer.toml")]
    pub config: PathBuf,

    #[arg(short, long, global = true)]
    pub verbose: bool,

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
    /// List configured repositories
    Repos,
    /// Show the location a request path resolves to
    Resolve(ResolveArgs),
    /// Fetch and print a document's properties
    Get(GetArgs),
    /// Write a local document to a repository
    Put(PutArgs),
}

#[derive(Args)]
pub struct ResolveArgs {
    pub repo: String,
    #[arg(default_value = "")]
    pub path: String,
}

#[derive(Args)]
pub struct GetArgs {
    pub repo: String,
    #[arg(default_value = "")]
    pub path: String,
    /// Flatten nested values to dotted keys
    #[arg(long)]
    pub flat: bool,
}

#[derive(Args)]
pub struct PutArgs {
    pub repo: String,
    pub path: String,
    /// Local document to upload; its extension selects the input format
    #[arg(short, long)]
    pub input: PathBuf,
    /// File name whose format the document is written in, instead of the
    /// repository's own
    #[arg(long)]
    pub format_name: Option<String>,
}
