mod backend;
mod client;
mod commands;
mod config;
mod document;
mod prompt;
mod thread;
mod tui;
mod ui;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};

use backend::{Backend, CredentialPrompt};
use client::{Client, ModelApi};
use config::{ConfigFile, ResolvedConfig, UserScopeStore};
use document::{Anchor, LineRange, Workspace};
use prompt::PromptPolicy;
use thread::{Role, ThreadRegistry};

#[derive(Parser, Debug)]
#[command(
    name = "marginalia",
    about = "Threaded, code-anchored AI conversations in your terminal",
    long_about = None,
)]
struct Args {
    /// File to annotate (omit only with --init / --completions)
    file: Option<PathBuf>,

    /// Question for single-shot mode (requires --lines; omit to open the TUI)
    question: Option<String>,

    /// Line range for single-shot mode, 1-based: "12" or "12-30"
    #[arg(short, long, value_name = "A-B")]
    lines: Option<String>,

    /// Rewrite the line range in place with this instruction (single-shot)
    #[arg(long, value_name = "INSTRUCTION", conflicts_with = "question")]
    rewrite: Option<String>,

    /// Override endpoint URL
    #[arg(long, env = "MARGINALIA_ENDPOINT")]
    endpoint: Option<String>,

    /// Override model selector ("ChatGPT" or a verbatim model id)
    #[arg(short, long, env = "MARGINALIA_MODEL")]
    model: Option<String>,

    /// Override API key
    #[arg(long, env = "MARGINALIA_API_KEY")]
    api_key: Option<String>,

    /// Conversation replay policy: full | lean
    #[arg(long, value_name = "POLICY")]
    policy: Option<String>,

    /// Show turn timestamps in the thread pane
    #[arg(long)]
    timestamps: bool,

    /// Write a default config file to ~/.config/marginalia/config.toml and exit
    #[arg(long)]
    init: bool,

    /// Generate shell completions and print to stdout (bash, zsh, fish, elvish)
    #[arg(long, value_name = "SHELL")]
    completions: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // ── --init ────────────────────────────────────────────────────────────────
    if args.init {
        let path = ConfigFile::write_default_if_missing()?;
        println!("Config written to: {}", path.display());
        println!("Set your API key, then run: marginalia <file>");
        return Ok(());
    }

    // ── --completions ─────────────────────────────────────────────────────────
    if let Some(shell_name) = &args.completions {
        return generate_completions(shell_name);
    }

    let file_cfg = ConfigFile::load()?;
    let policy = match args.policy.as_deref() {
        Some(raw) => Some(raw.parse::<PromptPolicy>().map_err(anyhow::Error::msg)?),
        None => None,
    };
    let resolved = ResolvedConfig::resolve(
        &file_cfg,
        args.endpoint.as_deref(),
        args.model.as_deref(),
        args.api_key.as_deref(),
        policy,
        args.timestamps,
    );

    let Some(path) = args.file.clone() else {
        bail!("provide a file to annotate, or --init / --completions");
    };

    let mut client = Client::new(
        resolved.endpoint.clone(),
        resolved.model.clone(),
        resolved.max_reply_tokens,
    );
    if !resolved.api_key.is_empty() {
        client.set_key(resolved.api_key.clone());
    }
    let mut backend = Backend::new(client);
    let mut store = UserScopeStore::new(file_cfg);

    // ── Single-shot mode (plain stdout, no TUI) ───────────────────────────────
    if args.question.is_some() || args.rewrite.is_some() {
        let lines = args
            .lines
            .as_deref()
            .context("single-shot mode needs --lines A-B")?;
        let range = LineRange::parse_1based(lines).map_err(anyhow::Error::msg)?;
        // Validate up front so the flow never stalls mid-request.
        backend
            .ensure_ready(&mut store, &mut StdinPrompt)
            .await
            .context("a valid API key is required")?;
        if let Some(instruction) = args.rewrite {
            return run_single_rewrite(&path, range, &instruction, backend, store).await;
        }
        let question = args.question.expect("checked above");
        return run_single_ask(&path, range, &question, backend, store, resolved.prompt_policy).await;
    }

    // ── Interactive TUI mode ──────────────────────────────────────────────────
    // Validate the configured key before the TUI owns the screen. Declining is
    // fine — notes work offline, and AI flows re-prompt in an overlay.
    let _ = backend.ensure_ready(&mut store, &mut StdinPrompt).await;
    tui::run(path, backend, store, resolved).await
}

// ── Startup credential prompt ─────────────────────────────────────────────────

/// Plain-terminal key entry used before the TUI takes over the screen and in
/// single-shot mode. A blank line means "give up".
struct StdinPrompt;

impl CredentialPrompt for StdinPrompt {
    async fn request_key(&mut self, reason: &str) -> Option<String> {
        println!();
        println!("  {reason}");
        print!("  API key (blank to abort): ");
        std::io::stdout().flush().ok()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).ok()?;
        let line = line.trim().to_string();
        if line.is_empty() { None } else { Some(line) }
    }
}

// ── Single-shot flows ─────────────────────────────────────────────────────────

async fn run_single_ask(
    path: &std::path::Path,
    range: LineRange,
    question: &str,
    mut backend: Backend<Client>,
    mut store: UserScopeStore,
    policy: PromptPolicy,
) -> Result<()> {
    let mut workspace = Workspace::default();
    workspace.open(path)?;
    let mut registry = ThreadRegistry::default();
    let tid = registry.create_thread(Anchor::new(path, range));

    println!();
    println!("  ✎ marginalia  ·  {}  {}", path.display(), range);
    println!();

    let outcome = commands::ask(
        question,
        &mut registry,
        tid,
        &workspace,
        &mut backend,
        &mut store,
        &mut StdinPrompt,
        policy,
    )
    .await?;

    if outcome == commands::FlowOutcome::NoDocument {
        bail!("range {} is outside '{}'", range, path.display());
    }

    if let Some(thread) = registry.get(tid) {
        for turn in &thread.turns {
            print_turn(turn.role, &turn.content);
            println!();
        }
    }
    Ok(())
}

async fn run_single_rewrite(
    path: &std::path::Path,
    range: LineRange,
    instruction: &str,
    mut backend: Backend<Client>,
    mut store: UserScopeStore,
) -> Result<()> {
    let mut workspace = Workspace::default();
    workspace.open(path)?;
    let mut registry = ThreadRegistry::default();
    let tid = registry.create_thread(Anchor::new(path, range));

    let outcome = commands::ai_edit(
        instruction,
        &registry,
        tid,
        &mut workspace,
        &mut backend,
        &mut store,
        &mut StdinPrompt,
    )
    .await?;

    match outcome {
        commands::FlowOutcome::Done => {
            println!("  ✓ Rewrote {} {}", path.display(), range);
            Ok(())
        }
        commands::FlowOutcome::NoDocument => {
            bail!("range {} is outside '{}'", range, path.display())
        }
        commands::FlowOutcome::EmptyResult => {
            bail!("An error occured. Please try again...")
        }
    }
}

fn print_turn(role: Role, content: &str) {
    let glyph = ui::role_glyph(role);
    let label = ui::role_label(role);
    let mut lines = content.lines();
    match lines.next() {
        Some(first) => println!("  {glyph} {label:<4} {first}"),
        None => println!("  {glyph} {label:<4}"),
    }
    for line in lines {
        println!("         {line}");
    }
}

// ── Shell completions ─────────────────────────────────────────────────────────

fn generate_completions(shell_name: &str) -> Result<()> {
    use clap_complete::{Shell, generate};

    let shell: Shell = match shell_name.to_lowercase().as_str() {
        "bash"    => Shell::Bash,
        "zsh"     => Shell::Zsh,
        "fish"    => Shell::Fish,
        "elvish"  => Shell::Elvish,
        _ => {
            eprintln!("Unknown shell: {shell_name}");
            eprintln!("Supported: bash, zsh, fish, elvish");
            std::process::exit(1);
        }
    };

    let mut cmd = Args::command();
    generate(shell, &mut cmd, "marginalia", &mut std::io::stdout());
    Ok(())
}
