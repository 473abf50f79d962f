use clap::{Args, Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "data-relay")]
#[command(about = "Import and export records between csv, json, xml, sql and spreadsheet files")]
pub struct Cli {
    #[arg(long, global = true, help = "TOML configuration file")]
    pub config: Option<String>,

    #[arg(long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[arg(long, global = true, help = "Log CPU and memory usage around each run")]
    pub monitor: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Used when neither `--chunk` nor a template sets a chunk size.
pub const DEFAULT_CLI_CHUNK: usize = 100;

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Read records from a source and report them chunk by chunk
    Import(ImportArgs),
    /// Write records from a JSON array file to a target
    Export(ExportArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ImportArgs {
    /// Format tag (csv, json, xml, sql, excel, auto); ignored with --template
    pub r#type: String,

    pub source: String,

    #[arg(long, help = "Records per chunk, 0 to disable chunking [default: 100]")]
    pub chunk: Option<usize>,

    #[arg(long, help = "Resume from and record progress under this name")]
    pub checkpoint: Option<String>,

    #[arg(long, help = "Use a template declared in the config file")]
    pub template: Option<String>,

    #[arg(long, help = "Print every imported record as a JSON line")]
    pub print: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ExportArgs {
    /// Format tag (csv, json, xml, sql, excel, auto); ignored with --template
    pub r#type: String,

    /// JSON file holding an array of objects
    pub data: String,

    pub target: String,

    #[arg(long, help = "Records per chunk, 0 to disable chunking [default: 100]")]
    pub chunk: Option<usize>,

    #[arg(long, help = "Use a template declared in the config file")]
    pub template: Option<String>,
}
