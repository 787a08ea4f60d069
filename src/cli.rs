use crate::watch::WatchMode;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "codemap",
    version,
    about = "Structural index and call-graph queries for Python repositories",
    after_help = r#"Examples:
  codemap index --repo .
  codemap trace app.services.orders.place_order --depth 2
  codemap context app.services.orders.place_order --depth 1
  codemap entry-points
  codemap request --method trace --params '{"symbol":"app.main.run","depth":3}'
  CODEMAP_SUMMARIZER_CMD='ollama run llama3' codemap explain app.main.run
  codemap serve --repo . --watch auto
"#
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

/// Where the repository lives and how its index is obtained.
#[derive(ClapArgs, Clone, Debug)]
pub struct RepoArgs {
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,
    /// Index document location (default: <repo>/.codemap/index.json).
    #[arg(long)]
    pub index: Option<PathBuf>,
    /// Include files ignored by .gitignore.
    #[arg(long)]
    pub no_ignore: bool,
    /// Rebuild from the tree even when a saved index exists.
    #[arg(long)]
    pub rebuild: bool,
    /// Resolve `obj.method()` through parameter annotations and `self`.
    #[arg(long)]
    pub infer_receivers: bool,
    /// Repository id recorded in the index (default: root directory name).
    #[arg(long)]
    pub repo_id: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Index the repository, save the document and print stats.
    Index {
        #[command(flatten)]
        repo: RepoArgs,
        /// Print the index document instead of saving it.
        #[arg(long)]
        stdout: bool,
    },
    /// Print the call graph reachable from a symbol.
    Trace {
        symbol: String,
        #[arg(long)]
        depth: Option<i64>,
        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Print the context bundle assembled around a symbol.
    Context {
        symbol: String,
        #[arg(long)]
        depth: Option<i64>,
        /// Emit blocks as JSON instead of rendered text.
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        repo: RepoArgs,
    },
    /// List HTTP route handlers.
    EntryPoints {
        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Explain a symbol through the configured summarizer.
    Explain {
        symbol: String,
        #[arg(long)]
        depth: Option<i64>,
        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Ask the configured summarizer for refactoring suggestions.
    Refactor {
        symbol: String,
        #[arg(long)]
        depth: Option<i64>,
        #[arg(long)]
        goal: Option<String>,
        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Fill summary placeholders of the saved index through the summarizer.
    Summarize {
        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Run JSONL RPC server over stdin/stdout.
    Serve {
        #[command(flatten)]
        repo: RepoArgs,
        /// File watch mode: auto|on|off.
        #[arg(long, default_value = "auto")]
        watch: WatchMode,
        /// Debounce window for filesystem events in milliseconds.
        #[arg(long, default_value_t = 300)]
        watch_debounce_ms: u64,
        /// Fallback scan interval in seconds when watch is unavailable.
        #[arg(long, default_value_t = 30)]
        watch_fallback_secs: u64,
    },
    /// Run a single JSONL request and exit.
    Request {
        #[command(flatten)]
        repo: RepoArgs,
        #[arg(long)]
        method: String,
        #[arg(long, default_value = "{}")]
        params: String,
        #[arg(long, value_name = "PATH")]
        params_file: Option<PathBuf>,
        #[arg(long, default_value = "1")]
        id: String,
    },
}
