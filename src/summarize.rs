use crate::config::Config;
use crate::index::Index;
use crate::model::IndexDocument;
use crate::util;
use anyhow::{Context, Result, bail};
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Opaque `text -> text` consumer of assembled prompts.
pub trait Summarizer {
    fn summarize(&self, prompt: &str) -> Result<String>;
}

impl<F> Summarizer for F
where
    F: Fn(&str) -> Result<String>,
{
    fn summarize(&self, prompt: &str) -> Result<String> {
        self(prompt)
    }
}

/// Pipes the prompt to `sh -c <command>` and returns its trimmed stdout.
#[derive(Debug, Clone)]
pub struct CommandSummarizer {
    command: String,
}

impl CommandSummarizer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Uses `CODEMAP_SUMMARIZER_CMD` when set.
    pub fn from_config() -> Option<Self> {
        Config::get().summarizer_cmd.as_deref().map(Self::new)
    }
}

impl Summarizer for CommandSummarizer {
    fn summarize(&self, prompt: &str) -> Result<String> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawn summarizer `{}`", self.command))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .context("write summarizer prompt")?;
        }
        let output = child.wait_with_output().context("wait for summarizer")?;
        if !output.status.success() {
            bail!("summarizer `{}` exited with {}", self.command, output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

pub fn explain_prompt(context: &str) -> String {
    format!(
        "You are a senior software engineer.\n\n\
         Understand the following codebase structure and implementation.\n\
         Explain clearly and concisely.\n\n\
         Focus on:\n\
         - Execution flow\n\
         - Responsibilities of functions/classes\n\
         - Interactions between components\n\n\
         CODE:\n{context}\n"
    )
}

pub fn refactor_prompt(context: &str, goal: Option<&str>) -> String {
    let goal = match goal.map(str::trim).filter(|goal| !goal.is_empty()) {
        Some(goal) => format!("Refactor goal: {goal}"),
        None => "Suggest general refactoring improvements.".to_string(),
    };
    format!(
        "You are a senior software engineer reviewing code.\n\n\
         {goal}\n\n\
         Analyze the following code and suggest:\n\
         - Structural refactors\n\
         - Design improvements\n\
         - Simplifications\n\
         - Potential bugs or smells\n\
         - Better abstractions (if any)\n\n\
         Be practical and specific.\n\
         Do not rewrite the entire code unless necessary.\n\n\
         CODE:\n{context}\n"
    )
}

fn function_prompt(code: &str) -> String {
    format!(
        "You are a senior Python engineer.\n\n\
         Summarize the purpose of the following function in 1-2 sentences.\n\
         Do not speculate. Be precise.\n\n\
         FUNCTION CODE:\n{code}\n"
    )
}

fn class_prompt(code: &str) -> String {
    format!(
        "You are a senior Python engineer.\n\n\
         Summarize the responsibility of the following class.\n\
         Mention the type of class if obvious (e.g. data model, utility).\n\n\
         CLASS CODE:\n{code}\n"
    )
}

fn file_prompt(imports: &str, symbols: &[String]) -> String {
    format!(
        "You are a senior Python engineer.\n\n\
         Given the following information about a file, summarize its responsibility.\n\n\
         IMPORTS:\n{imports}\n\n\
         DEFINED SYMBOLS:\n{}\n\n\
         Do not speculate beyond what is shown.\n",
        symbols.join("\n")
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SummaryStats {
    pub filled: usize,
    pub failed: usize,
    pub kept: usize,
}

/// Fills `null` summaries of functions, classes and files. Existing summaries
/// are kept; a failed call leaves its placeholder empty.
pub struct SummaryBuilder<'a, S: Summarizer + ?Sized> {
    summarizer: &'a S,
}

impl<'a, S: Summarizer + ?Sized> SummaryBuilder<'a, S> {
    pub fn new(summarizer: &'a S) -> Self {
        Self { summarizer }
    }

    pub fn build(&self, index: &Index) -> (IndexDocument, SummaryStats) {
        let mut document = index.document().clone();
        let mut stats = SummaryStats::default();
        for file in &mut document.codebase.files {
            let source = index.source_text(&file.path);
            let source = source.as_deref();
            for function in &mut file.functions {
                let code = source.and_then(|text| util::slice_lines(text, function.code_range));
                self.fill(&mut function.summary, code.map(|code| function_prompt(&code)), &mut stats);
            }
            for class in &mut file.classes {
                let code = source.and_then(|text| util::slice_lines(text, class.code_range));
                self.fill(&mut class.summary, code.map(|code| class_prompt(&code)), &mut stats);
            }
            let imports = file
                .imports
                .iter()
                .map(|import| import.statement.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            let mut symbols: Vec<String> = file
                .functions
                .iter()
                .map(|function| format!("function: {}", function.name))
                .collect();
            symbols.extend(file.classes.iter().map(|class| format!("class: {}", class.name)));
            let prompt = file_prompt(&imports, &symbols);
            self.fill(&mut file.summary, Some(prompt), &mut stats);
        }
        (document, stats)
    }

    fn fill(&self, slot: &mut Option<String>, prompt: Option<String>, stats: &mut SummaryStats) {
        if slot.is_some() {
            stats.kept += 1;
            return;
        }
        let Some(prompt) = prompt else {
            debug!("no source for summary prompt");
            return;
        };
        match self.summarizer.summarize(&prompt) {
            Ok(summary) if !summary.is_empty() => {
                *slot = Some(summary);
                stats.filled += 1;
            }
            Ok(_) => stats.failed += 1,
            Err(err) => {
                warn!("summarizer failed: {err:#}");
                stats.failed += 1;
            }
        }
    }
}
