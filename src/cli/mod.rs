// src/cli/mod.rs — CLI definition (clap derive)

pub mod audit;
pub mod costs;
pub mod process;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "billwise",
    about = "Tiered utility-bill extraction with an audited cost ledger",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract bill fields from one or more documents
    Process {
        /// Documents to process
        #[arg(required = true)]
        files: Vec<String>,
        /// Media type for every file (inferred from the extension if omitted)
        #[arg(long)]
        media_type: Option<String>,
        /// Pretty-print each output record
        #[arg(long)]
        pretty: bool,
        /// Print the session's cost analytics to stderr
        #[arg(long)]
        report: bool,
    },
    /// Show the stored audit record for a document
    Audit {
        /// Document content hash, or a path to the document itself
        target: String,
        /// Show every record for the document, oldest first
        #[arg(long)]
        history: bool,
    },
    /// Show cumulative cost per tier
    Costs,
}
