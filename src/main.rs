//! # ragchat CLI
//!
//! The `ragchat` binary drives the library from a terminal. Documents are
//! indexed in memory for the lifetime of one command.
//!
//! ## Usage
//!
//! ```bash
//! ragchat --config ./config/ragchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragchat chunk <file>` | Show how a file is split into chunks |
//! | `ragchat search "<query>" --file <path>` | Retrieve passages without generating |
//! | `ragchat ask "<message>" --file <path>` | One message, streamed answer |
//! | `ragchat chat --file <path>` | Interactive conversation on stdin |
//! | `ragchat completions <shell>` | Print a shell completion script |
//!
//! ## Examples
//!
//! ```bash
//! # Which passages match, under global mode?
//! ragchat search "main themes" --mode global --file ./docs
//!
//! # Ask with hybrid retrieval over two files
//! ragchat ask "@ what does the contract say about renewal?" --file a.pdf --file b.docx
//! ```

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use ragchat::completion::create_provider;
use ragchat::config::{self, Config};
use ragchat::extract::{content_type_for, extract_text};
use ragchat::ingest::{Ingestor, UploadState, UploadStatus};
use ragchat::logging;
use ragchat::session::{ChatEvent, ChatRequest, SessionCoordinator};
use ragchat_core::chunk::Chunker;
use ragchat_core::models::{Query, QueryMode};
use ragchat_core::retrieve;
use ragchat_core::store::{InMemoryStore, Store};
use walkdir::WalkDir;

/// ragchat: chat with your documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ragchat.example.toml` for every option.
#[derive(Parser)]
#[command(
    name = "ragchat",
    about = "Chat with your documents using retrieval-augmented generation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when it is missing.
    #[arg(long, global = true, default_value = "./config/ragchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract and chunk one file, printing each chunk's span.
    Chunk {
        file: PathBuf,

        /// Print chunk text as well as spans.
        #[arg(long)]
        text: bool,
    },

    /// Retrieve passages for a query without calling the completion API.
    Search {
        query: String,

        /// File or directory to index. Repeatable.
        #[arg(long = "file", required = true)]
        files: Vec<PathBuf>,

        /// Retrieval mode: `naive`, `local`, `global`, or `hybrid`.
        #[arg(long)]
        mode: Option<QueryMode>,

        /// Maximum number of passages.
        #[arg(long)]
        limit: Option<usize>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Send one message and stream the answer.
    ///
    /// Prefix the message with `@` (or `@naive`, `@local`, `@global`,
    /// `@hybrid`) to ground the answer in the given files.
    Ask {
        message: String,

        /// File or directory to upload first. Repeatable.
        #[arg(long = "file")]
        files: Vec<PathBuf>,
    },

    /// Interactive chat on stdin. Type `/help` for commands.
    Chat {
        /// File or directory to upload first. Repeatable.
        #[arg(long = "file")]
        files: Vec<PathBuf>,
    },

    /// Print a shell completion script to stdout.
    Completions { shell: Shell },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "ragchat", &mut std::io::stdout());
        return Ok(());
    }

    logging::init();
    let cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Chunk { file, text } => run_chunk(&cfg, &file, text).await?,
        Commands::Search {
            query,
            files,
            mode,
            limit,
            json,
        } => run_search(&cfg, &query, &files, mode, limit, json).await?,
        Commands::Ask { message, files } => {
            let chat = coordinator(&cfg)?;
            let conversation = uuid::Uuid::new_v4().to_string();
            upload_all(&chat, &conversation, &files, &cfg).await?;
            answer(&chat, &conversation, ChatRequest::parse(&message)).await?;
        }
        Commands::Chat { files } => {
            let chat = coordinator(&cfg)?;
            let conversation = uuid::Uuid::new_v4().to_string();
            upload_all(&chat, &conversation, &files, &cfg).await?;
            run_chat(&chat, &conversation, &cfg).await?;
            chat.disconnect(&conversation).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn coordinator(cfg: &Config) -> anyhow::Result<SessionCoordinator> {
    let store = Arc::new(InMemoryStore::new(cfg.retrieval.index_settings()));
    let completion = create_provider(&cfg.completion)?;
    Ok(SessionCoordinator::new(cfg.clone(), store, completion))
}

/// Expand files and directories into uploadable file paths.
fn collect_files(paths: &[PathBuf], cfg: &Config) -> Vec<PathBuf> {
    let allowed = |p: &Path| {
        p.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                cfg.upload
                    .allowed_extensions
                    .iter()
                    .any(|a| a.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    };
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && allowed(e.path()))
                .map(|e| e.into_path())
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }
    files
}

async fn read_named(path: &Path) -> anyhow::Result<(String, Vec<u8>)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid file name: {}", path.display()))?
        .to_string();
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok((name, bytes))
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

fn print_upload(status: &UploadStatus) {
    let state = match status.state {
        UploadState::Indexed => format!("indexed, {} chunks", status.chunks),
        UploadState::AlreadyIndexed => "already indexed".to_string(),
        UploadState::InProgress => "in progress".to_string(),
    };
    eprintln!("+ {} ({}) [{}]", status.name, short_id(&status.document_id), state);
}

async fn upload_all(
    chat: &SessionCoordinator,
    conversation: &str,
    paths: &[PathBuf],
    cfg: &Config,
) -> anyhow::Result<()> {
    for path in collect_files(paths, cfg) {
        let (name, bytes) = read_named(&path).await?;
        match chat.upload(conversation, &name, bytes).await {
            Ok(status) => print_upload(&status),
            Err(e) => eprintln!("! {}: {}", name, e.user_message()),
        }
    }
    Ok(())
}

async fn run_chunk(cfg: &Config, file: &Path, show_text: bool) -> anyhow::Result<()> {
    let (name, bytes) = read_named(file).await?;
    let content_type = content_type_for(&name)
        .with_context(|| format!("Unsupported file type: {}", name))?;
    let text = tokio::task::spawn_blocking(move || extract_text(&bytes, content_type)).await??;
    let chunker = Chunker::new(cfg.chunking.chunker_config());
    let chunks = chunker.chunk("preview", &text)?;

    println!("{}: {} chars, {} chunks", name, text.chars().count(), chunks.len());
    for chunk in &chunks {
        println!(
            "  #{:<4} {:>7}..{:<7} {} chars",
            chunk.chunk_index,
            chunk.start,
            chunk.end,
            chunk.text.chars().count()
        );
        if show_text {
            for line in chunk.text.lines() {
                println!("        {}", line);
            }
        }
    }
    Ok(())
}

async fn run_search(
    cfg: &Config,
    query: &str,
    paths: &[PathBuf],
    mode: Option<QueryMode>,
    limit: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new(cfg.retrieval.index_settings()));
    let ingestor = Ingestor::new(
        store.clone(),
        Chunker::new(cfg.chunking.chunker_config()),
        cfg.upload.clone(),
    );

    let mut documents = Vec::new();
    for path in collect_files(paths, cfg) {
        match ingestor.ingest_path(&path).await {
            Ok(status) => {
                print_upload(&status);
                documents.push(status.document_id);
            }
            Err(e) => eprintln!("! {}: {}", path.display(), e.user_message()),
        }
    }

    let query = Query {
        mode: mode.unwrap_or(cfg.retrieval.default_mode),
        text: query.to_string(),
        documents,
        max_passages: limit.unwrap_or(cfg.retrieval.max_passages),
        max_tokens: cfg.context.token_budget,
    };
    let result = retrieve::search(store.as_ref(), &query).await?;

    if json {
        let rows: Vec<serde_json::Value> = result
            .passages
            .iter()
            .map(|p| {
                serde_json::json!({
                    "ref_id": p.reference.to_string(),
                    "document": p.document_name,
                    "score": p.score,
                    "origin": format!("{:?}", p.origin).to_lowercase(),
                    "text": p.text,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "mode": query.mode.as_str(),
                "passages": rows,
            }))?
        );
        return Ok(());
    }

    if result.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, p) in result.passages.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} ({})",
            i + 1,
            p.score,
            p.document_name,
            p.reference
        );
        let preview: String = p.text.chars().take(200).collect();
        println!("    {}", preview.replace('\n', " "));
    }
    Ok(())
}

/// Stream one answer to stdout. Returns once the reply is complete.
async fn answer(
    chat: &SessionCoordinator,
    conversation: &str,
    request: ChatRequest,
) -> anyhow::Result<()> {
    let mut events = chat.query(conversation, request).await?;
    let mut stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        match event {
            ChatEvent::References { mode, references } => {
                if references.is_empty() {
                    eprintln!("({} retrieval found no passages)", mode);
                }
                for r in &references {
                    eprintln!("  [{}] {} ({:.3})", r.ref_id, r.document_name, r.score);
                }
            }
            ChatEvent::Token(token) => {
                print!("{}", token);
                stdout.flush()?;
            }
            ChatEvent::Done => {
                println!();
                break;
            }
            ChatEvent::Error(e) => {
                println!();
                eprintln!("error: {}", e.user_message());
                break;
            }
        }
    }
    Ok(())
}

const CHAT_HELP: &str = "\
Commands:
  /docs              list documents in this conversation
  /upload <path>     add a file or directory
  /remove <doc_id>   remove a document
  /ref <ref_id>      show the text behind a reference
  /clear             drop all documents and history
  /quit              leave
Prefix a message with @, @naive, @local, @global or @hybrid to use the documents.";

async fn run_chat(
    chat: &SessionCoordinator,
    conversation: &str,
    cfg: &Config,
) -> anyhow::Result<()> {
    let (lines_tx, mut lines) = tokio::sync::mpsc::channel::<String>(4);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines().map_while(Result::ok) {
            if lines_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    eprintln!("Type /help for commands.");
    loop {
        eprint!("> ");
        std::io::stderr().flush()?;
        let Some(line) = lines.recv().await else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, arg) = match line.split_once(char::is_whitespace) {
            Some((c, a)) => (c, a.trim()),
            None => (line, ""),
        };
        match command {
            "/quit" | "/exit" => break,
            "/help" => eprintln!("{}", CHAT_HELP),
            "/docs" => {
                for d in chat.documents(conversation).await? {
                    eprintln!(
                        "  {} {} ({} bytes, {} chunks, {:?})",
                        short_id(&d.id),
                        d.name,
                        d.size_bytes,
                        d.chunks,
                        d.status
                    );
                }
            }
            "/upload" => {
                upload_all(chat, conversation, &[PathBuf::from(arg)], cfg).await?;
            }
            "/remove" => {
                let ids: Vec<String> = chat
                    .documents(conversation)
                    .await?
                    .into_iter()
                    .map(|d| d.id)
                    .filter(|id| !arg.is_empty() && id.starts_with(arg))
                    .collect();
                match ids.as_slice() {
                    [id] => {
                        chat.remove_document(conversation, id).await?;
                        eprintln!("removed {}", short_id(id));
                    }
                    [] => eprintln!("no document matches {:?}", arg),
                    _ => eprintln!("{:?} is ambiguous", arg),
                }
            }
            "/ref" => match chat.reference(conversation, arg).await {
                Ok(r) => eprintln!("[{}] {}\n{}", r.ref_id, r.document_name, r.text),
                Err(e) => eprintln!("error: {}", e.user_message()),
            },
            "/clear" => {
                chat.clear(conversation).await?;
                eprintln!("cleared");
            }
            _ => answer(chat, conversation, ChatRequest::parse(line)).await?,
        }
    }
    Ok(())
}
