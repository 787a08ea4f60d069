use crate::config::Config;
use crate::context::context;
use crate::index::{Index, IndexHandle};
use crate::indexer::{Indexer, scan};
use crate::summarize::{self, CommandSummarizer, Summarizer};
use crate::trace::trace;
use crate::watch;
use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize)]
struct RpcResponse {
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize)]
struct RpcError {
    message: String,
}

#[derive(Deserialize)]
struct SymbolParams {
    #[serde(alias = "qualified_name", alias = "qualname")]
    symbol: String,
}

#[derive(Deserialize)]
struct DepthParams {
    #[serde(alias = "qualified_name", alias = "qualname")]
    symbol: String,
    depth: Option<i64>,
}

#[derive(Deserialize)]
struct RefactorParams {
    #[serde(alias = "qualified_name", alias = "qualname")]
    symbol: String,
    depth: Option<i64>,
    goal: Option<String>,
}

struct MethodDoc {
    name: &'static str,
    summary: &'static str,
    key_params: &'static [&'static str],
}

const METHOD_DOCS: &[MethodDoc] = &[
    MethodDoc {
        name: "help",
        summary: "Show RPC help and method list.",
        key_params: &[],
    },
    MethodDoc {
        name: "overview",
        summary: "Counts, dependencies and fingerprint of the current index.",
        key_params: &[],
    },
    MethodDoc {
        name: "trace",
        summary: "Call graph reachable from a symbol within depth edges.",
        key_params: &["symbol", "depth"],
    },
    MethodDoc {
        name: "context",
        summary: "Deduplicated source blocks around a symbol.",
        key_params: &["symbol", "depth"],
    },
    MethodDoc {
        name: "symbol",
        summary: "Lookup entry for one qualified name.",
        key_params: &["symbol"],
    },
    MethodDoc {
        name: "entry_points",
        summary: "HTTP route handlers found in the repository.",
        key_params: &[],
    },
    MethodDoc {
        name: "explain",
        summary: "Summarizer explanation of a symbol's context bundle.",
        key_params: &["symbol", "depth"],
    },
    MethodDoc {
        name: "refactor",
        summary: "Summarizer refactoring suggestions for a symbol's context bundle.",
        key_params: &["symbol", "depth", "goal"],
    },
    MethodDoc {
        name: "reindex",
        summary: "Rebuild the index from disk and publish it.",
        key_params: &[],
    },
];

/// Everything a request needs: the indexer to rebuild with, the published
/// index, and the optional summarizer.
pub struct App {
    indexer: Arc<Indexer>,
    handle: Arc<IndexHandle>,
    summarizer: Option<Box<dyn Summarizer + Send + Sync>>,
    index_path: Option<PathBuf>,
}

impl App {
    /// Loads `index_path` when it exists and still matches the tree's
    /// fingerprint, otherwise builds from the tree and saves the result.
    pub fn open(indexer: Indexer, index_path: Option<PathBuf>) -> Result<Self> {
        let saved = match index_path.as_deref().filter(|path| path.is_file()) {
            Some(path) => match Index::load(path) {
                Ok(index) => Some(index),
                Err(err) => {
                    warn!("ignoring saved index: {err:#}");
                    None
                }
            },
            None => None,
        };
        let current = match saved {
            Some(index) => {
                let scanned = scan::scan_repo(
                    indexer.repo_root(),
                    indexer.scan_options(),
                    indexer.ignore_filter(),
                )?;
                if scan::fingerprint(&scanned) == index.document().metadata.fingerprint {
                    Some(index)
                } else {
                    info!("saved index is stale, rebuilding");
                    None
                }
            }
            None => None,
        };
        let index = match current {
            Some(index) => index,
            None => {
                let build = indexer.build()?;
                if let Some(path) = &index_path {
                    build.index.save(path)?;
                }
                build.index
            }
        };
        Ok(Self::with_index(indexer, index, index_path))
    }

    pub fn with_index(indexer: Indexer, index: Index, index_path: Option<PathBuf>) -> Self {
        let summarizer = CommandSummarizer::from_config()
            .map(|summarizer| Box::new(summarizer) as Box<dyn Summarizer + Send + Sync>);
        Self {
            indexer: Arc::new(indexer),
            handle: Arc::new(IndexHandle::new(index)),
            summarizer,
            index_path,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Box<dyn Summarizer + Send + Sync>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn handle(&self) -> Arc<IndexHandle> {
        self.handle.clone()
    }

    fn handle_request(&self, req: RpcRequest) -> RpcResponse {
        let id = req.id.clone();
        match handle_method(self, &req.method, req.params) {
            Ok(value) => RpcResponse {
                id,
                result: Some(value),
                error: None,
            },
            Err(err) => error_response(id, &format!("{err:#}")),
        }
    }
}

/// JSONL loop over stdin/stdout; the index is rebuilt in the background when
/// watching is enabled.
pub fn serve(app: App, mut watch_config: watch::WatchConfig) -> Result<()> {
    watch_config.save_to = app.index_path.clone();
    let _watcher = watch::start(app.indexer.clone(), app.handle.clone(), watch_config)?;
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    info!("serving JSONL requests on stdin");

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(value) => value,
            Err(err) => {
                warn!("stdin error: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => app.handle_request(request),
            Err(err) => error_response(Value::Null, &format!("invalid request: {err}")),
        };

        writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
        stdout.flush()?;
    }

    Ok(())
}

pub fn call(app: &App, method: String, params_raw: &str, id_raw: &str) -> Result<String> {
    let params: Value = serde_json::from_str(params_raw).with_context(|| "parse params JSON")?;
    let id = parse_value(id_raw);
    let request = RpcRequest { id, method, params };
    let response = app.handle_request(request);
    Ok(serde_json::to_string(&response)?)
}

pub fn handle_method(app: &App, method: &str, params: Value) -> Result<Value> {
    let start = Instant::now();
    let index = app.handle.snapshot();
    let value = match method {
        "help" => method_help(),
        "overview" => json!(index.overview()),
        "trace" => {
            let params: DepthParams = serde_json::from_value(params)?;
            let depth = params.depth.unwrap_or(Config::get().default_depth);
            let graph = trace(&index, &params.symbol, depth);
            json!({
                "symbol": params.symbol,
                "depth": depth,
                "found": !graph.is_empty(),
                "graph": graph,
            })
        }
        "context" => {
            let params: DepthParams = serde_json::from_value(params)?;
            let depth = params.depth.unwrap_or(Config::get().default_depth);
            let bundle = context(&index, &params.symbol, depth);
            json!({
                "symbol": params.symbol,
                "depth": depth,
                "found": !bundle.is_empty(),
                "context": bundle.render(),
                "blocks": bundle.blocks,
            })
        }
        "symbol" => {
            let params: SymbolParams = serde_json::from_value(params)?;
            let entry = index
                .symbol(&params.symbol)
                .ok_or_else(|| anyhow!("symbol '{}' not found", params.symbol))?;
            json!(entry)
        }
        "entry_points" => json!({
            "count": index.entry_points().len(),
            "entry_points": index.entry_points(),
        }),
        "explain" => {
            let params: DepthParams = serde_json::from_value(params)?;
            let depth = params.depth.unwrap_or(Config::get().default_depth);
            let explanation = run_summarizer(app, &index, &params.symbol, depth, |text| {
                summarize::explain_prompt(text)
            })?;
            json!({
                "symbol": params.symbol,
                "depth": depth,
                "explanation": explanation,
            })
        }
        "refactor" => {
            let params: RefactorParams = serde_json::from_value(params)?;
            let depth = params.depth.unwrap_or(Config::get().default_depth);
            let goal = params.goal.as_deref();
            let suggestions = run_summarizer(app, &index, &params.symbol, depth, |text| {
                summarize::refactor_prompt(text, goal)
            })?;
            json!({
                "symbol": params.symbol,
                "depth": depth,
                "suggestions": suggestions,
            })
        }
        "reindex" => {
            let build = app.indexer.build()?;
            if let Some(path) = &app.index_path {
                build.index.save(path)?;
            }
            app.handle.publish(build.index);
            json!(build.stats)
        }
        other => bail!("unknown method: {other}"),
    };
    debug!("rpc {method} in {}ms", start.elapsed().as_millis());
    Ok(value)
}

fn run_summarizer<F>(app: &App, index: &Index, symbol: &str, depth: i64, prompt: F) -> Result<String>
where
    F: FnOnce(&str) -> String,
{
    let bundle = context(index, symbol, depth);
    if bundle.is_empty() {
        bail!("symbol '{symbol}' not found");
    }
    let summarizer = app
        .summarizer
        .as_deref()
        .ok_or_else(|| anyhow!("no summarizer configured (set CODEMAP_SUMMARIZER_CMD)"))?;
    debug!("context for {symbol}: {} blocks", bundle.blocks.len());
    summarizer.summarize(&prompt(&bundle.render()))
}

fn method_help() -> Value {
    let methods: Vec<Value> = METHOD_DOCS
        .iter()
        .map(|doc| {
            json!({
                "name": doc.name,
                "summary": doc.summary,
                "key_params": doc.key_params,
            })
        })
        .collect();
    json!({
        "summary": "codemap indexes a Python repo and serves JSONL RPC over stdin/stdout.",
        "request": {"id": 1, "method": "trace", "params": {"symbol": "pkg.mod.func", "depth": 3}},
        "methods": methods,
    })
}

fn error_response(id: Value, message: &str) -> RpcResponse {
    RpcResponse {
        id,
        result: None,
        error: Some(RpcError {
            message: message.to_string(),
        }),
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
