use anyhow::{Result, anyhow};
use clap::Parser;
use codemap::cli::{self, RepoArgs};
use codemap::context::context;
use codemap::index::Index;
use codemap::indexer::{Indexer, resolve::ResolveOptions, scan::ScanOptions};
use codemap::summarize::{CommandSummarizer, SummaryBuilder};
use codemap::{config::Config, rpc, watch};
use serde_json::json;
use std::io;
use std::path::PathBuf;

fn main() -> Result<()> {
    init_tracing();
    let args = cli::Args::parse();

    match args.command {
        cli::Command::Index { repo, stdout } => {
            let indexer = open_indexer(&repo)?;
            let build = indexer.build()?;
            if stdout {
                println!("{}", serde_json::to_string_pretty(build.index.document())?);
            } else {
                build.index.save(&index_path(&repo))?;
                println!("{}", serde_json::to_string_pretty(&build.stats)?);
            }
            Ok(())
        }
        cli::Command::Trace {
            symbol,
            depth,
            repo,
        } => {
            let app = open_app(&repo)?;
            let result = rpc::handle_method(&app, "trace", json!({"symbol": symbol, "depth": depth}))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        cli::Command::Context {
            symbol,
            depth,
            json: as_json,
            repo,
        } => {
            let app = open_app(&repo)?;
            let index = app.handle().snapshot();
            let depth = depth.unwrap_or(Config::get().default_depth);
            let bundle = context(&index, &symbol, depth);
            if bundle.is_empty() {
                return Err(anyhow!("symbol '{symbol}' not found"));
            }
            if as_json {
                println!("{}", serde_json::to_string_pretty(&bundle)?);
            } else {
                println!("{}", bundle.render());
            }
            Ok(())
        }
        cli::Command::EntryPoints { repo } => {
            let app = open_app(&repo)?;
            let result = rpc::handle_method(&app, "entry_points", json!({}))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        cli::Command::Explain {
            symbol,
            depth,
            repo,
        } => {
            let app = open_app(&repo)?;
            let result =
                rpc::handle_method(&app, "explain", json!({"symbol": symbol, "depth": depth}))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        cli::Command::Refactor {
            symbol,
            depth,
            goal,
            repo,
        } => {
            let app = open_app(&repo)?;
            let params = json!({"symbol": symbol, "depth": depth, "goal": goal});
            let result = rpc::handle_method(&app, "refactor", params)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        cli::Command::Summarize { repo } => {
            let summarizer = CommandSummarizer::from_config()
                .ok_or_else(|| anyhow!("no summarizer configured (set CODEMAP_SUMMARIZER_CMD)"))?;
            let app = open_app(&repo)?;
            let index = app.handle().snapshot();
            let (document, stats) = SummaryBuilder::new(&summarizer).build(&index);
            let summarized: Index = index.with_document(document);
            summarized.save(&index_path(&repo))?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        cli::Command::Serve {
            repo,
            watch: watch_mode,
            watch_debounce_ms,
            watch_fallback_secs,
        } => {
            let app = open_app(&repo)?;
            let watch_config =
                watch::WatchConfig::new(watch_mode, watch_debounce_ms, watch_fallback_secs);
            rpc::serve(app, watch_config)
        }
        cli::Command::Request {
            repo,
            method,
            params,
            params_file,
            id,
        } => {
            let params_raw = if let Some(path) = params_file {
                std::fs::read_to_string(&path)?
            } else {
                params
            };
            let app = open_app(&repo)?;
            let response = rpc::call(&app, method, &params_raw, &id)?;
            println!("{response}");
            Ok(())
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn index_path(args: &RepoArgs) -> PathBuf {
    args.index
        .clone()
        .unwrap_or_else(|| Index::default_path(&args.repo))
}

fn open_indexer(args: &RepoArgs) -> Result<Indexer> {
    let mut indexer = Indexer::new(args.repo.clone())?
        .with_scan_options(ScanOptions::new(args.no_ignore))
        .with_resolve_options(ResolveOptions {
            infer_receiver_types: args.infer_receivers,
        });
    if let Some(repo_id) = &args.repo_id {
        indexer = indexer.with_repo_id(repo_id.clone());
    }
    Ok(indexer)
}

fn open_app(args: &RepoArgs) -> Result<rpc::App> {
    let indexer = open_indexer(args)?;
    let path = index_path(args);
    if args.rebuild {
        let build = indexer.build()?;
        build.index.save(&path)?;
        return Ok(rpc::App::with_index(indexer, build.index, Some(path)));
    }
    rpc::App::open(indexer, Some(path))
}
