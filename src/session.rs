//! Per-conversation session coordination.
//!
//! A [`SessionCoordinator`] owns one [`Session`] per conversation id. Each
//! session has a bounded job queue drained by a single worker task, so the
//! messages of one conversation are answered strictly one at a time in
//! arrival order while different conversations proceed in parallel.
//!
//! # Message lifecycle
//!
//! ```text
//! Idle ──▶ Retrieving ──▶ Generating ──▶ Idle
//!   └──────────(no RAG)──────▲
//! ```
//!
//! Retrieval and context assembly finish before generation starts. Tokens
//! are forwarded to the caller as they arrive. A caller that drops its
//! event receiver cancels the generation; tokens already sent stay sent.
//!
//! Documents belong to the sessions that uploaded them. When the last
//! session referencing a document goes away, the document is removed from
//! the store.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use ragchat_core::assemble::{assemble, AssembledContext, ContextReference};
use ragchat_core::chunk::Chunker;
use ragchat_core::error::{RagError, Result};
use ragchat_core::models::{document_id, ChunkRef, DocumentSummary, Query, QueryMode};
use ragchat_core::retrieve;
use ragchat_core::store::Store;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::completion::{CompletionService, GenerationSettings};
use crate::config::Config;
use crate::ingest::{Ingestor, UploadStatus};
use crate::prompt::{build_prompt, Turn};

/// Capacity of the per-message event channel.
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Retrieving,
    Generating,
}

/// One user message and how to answer it.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub message: String,
    pub use_rag: bool,
    /// Retrieval mode; the configured default when `None`.
    pub mode: Option<QueryMode>,
    /// Explicitly referenced document ids. `local` mode only searches these.
    pub documents: Option<Vec<String>>,
    /// Replaces the session's last-used settings when present.
    pub settings: Option<GenerationSettings>,
}

impl ChatRequest {
    /// Build a request from raw chat input, honoring the `@` sigil.
    pub fn parse(input: &str) -> Self {
        let sigil = parse_sigil(input);
        Self {
            message: sigil.text.to_string(),
            use_rag: sigil.use_rag,
            mode: sigil.mode,
            ..Self::default()
        }
    }
}

/// Leading `@` directive of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sigil<'a> {
    pub use_rag: bool,
    pub mode: Option<QueryMode>,
    pub text: &'a str,
}

/// Split a leading `@`, `@naive`, `@local`, `@global` or `@hybrid` off `input`.
///
/// A bare `@` requests retrieval with the default mode (hybrid). An `@`
/// followed by any other word requests retrieval and keeps the word as part
/// of the message.
pub fn parse_sigil(input: &str) -> Sigil<'_> {
    let trimmed = input.trim_start();
    let Some(rest) = trimmed.strip_prefix('@') else {
        return Sigil {
            use_rag: false,
            mode: None,
            text: input.trim(),
        };
    };
    let word_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let (word, after) = rest.split_at(word_end);
    match word.parse::<QueryMode>() {
        Ok(mode) => Sigil {
            use_rag: true,
            mode: Some(mode),
            text: after.trim(),
        },
        Err(_) => Sigil {
            use_rag: true,
            mode: Some(QueryMode::Hybrid),
            text: rest.trim(),
        },
    }
}

/// Streamed response to one [`ChatRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Passages placed in the context; sent before any token when RAG is on.
    /// An empty list means retrieval found nothing.
    References {
        mode: QueryMode,
        references: Vec<ContextReference>,
    },
    Token(String),
    Done,
    Error(RagError),
}

/// Text and provenance behind a reference id.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceContent {
    pub ref_id: String,
    pub document_id: String,
    pub document_name: String,
    pub chunk_index: usize,
    pub text: String,
}

struct Job {
    request: ChatRequest,
    events: mpsc::Sender<ChatEvent>,
}

pub struct Session {
    id: String,
    documents: Mutex<Vec<String>>,
    history: Mutex<VecDeque<Turn>>,
    settings: Mutex<GenerationSettings>,
    state: watch::Sender<SessionState>,
}

impl Session {
    fn new(id: &str, settings: GenerationSettings) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            id: id.to_string(),
            documents: Mutex::new(Vec::new()),
            history: Mutex::new(VecDeque::new()),
            settings: Mutex::new(settings),
            state,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(session = %self.id, from = ?prev, to = ?next, "session state");
        }
    }

    async fn attach(&self, document_id: &str) {
        let mut docs = self.documents.lock().await;
        if !docs.iter().any(|d| d == document_id) {
            docs.push(document_id.to_string());
        }
    }

    async fn detach(&self, document_id: &str) -> bool {
        let mut docs = self.documents.lock().await;
        let before = docs.len();
        docs.retain(|d| d != document_id);
        docs.len() != before
    }

    async fn holds(&self, document_id: &str) -> bool {
        self.documents.lock().await.iter().any(|d| d == document_id)
    }

    /// Documents a query may search, in upload order.
    async fn targets(&self, mode: QueryMode, explicit: Option<&[String]>) -> Vec<String> {
        let active = self.documents.lock().await;
        match (mode, explicit) {
            (_, Some(ids)) => active
                .iter()
                .filter(|d| ids.iter().any(|id| id == *d))
                .cloned()
                .collect(),
            (QueryMode::Local, None) => Vec::new(),
            (_, None) => active.clone(),
        }
    }

    async fn remember(&self, turn: Turn, keep: usize) {
        let mut history = self.history.lock().await;
        history.push_back(turn);
        while history.len() > keep {
            history.pop_front();
        }
    }
}

struct SessionHandle {
    session: Arc<Session>,
    jobs: mpsc::Sender<Job>,
    worker: JoinHandle<()>,
}

/// What a session worker needs to answer messages.
struct Pipeline {
    config: Config,
    store: Arc<dyn Store>,
    completion: Arc<dyn CompletionService>,
}

pub struct SessionCoordinator {
    pipeline: Arc<Pipeline>,
    ingestor: Ingestor,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionCoordinator {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        completion: Arc<dyn CompletionService>,
    ) -> Self {
        let ingestor = Ingestor::new(
            store.clone(),
            Chunker::new(config.chunking.chunker_config()),
            config.upload.clone(),
        );
        Self {
            pipeline: Arc::new(Pipeline {
                config,
                store,
                completion,
            }),
            ingestor,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.pipeline.store
    }

    /// Get the session for `conversation_id`, creating it on first use.
    pub async fn session(&self, conversation_id: &str) -> Arc<Session> {
        let mut sessions = self.sessions.lock().await;
        let handle = sessions
            .entry(conversation_id.to_string())
            .or_insert_with(|| self.spawn_session(conversation_id));
        handle.session.clone()
    }

    fn spawn_session(&self, conversation_id: &str) -> SessionHandle {
        let settings = GenerationSettings::from(&self.pipeline.config.completion);
        let session = Arc::new(Session::new(conversation_id, settings));
        let (jobs, queue) = mpsc::channel(self.pipeline.config.session.queue_depth.max(1));
        let worker = tokio::spawn(run_worker(
            self.pipeline.clone(),
            session.clone(),
            queue,
        ));
        info!(session = conversation_id, "session created");
        SessionHandle {
            session,
            jobs,
            worker,
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn state(&self, conversation_id: &str) -> Option<SessionState> {
        self.sessions
            .lock()
            .await
            .get(conversation_id)
            .map(|h| h.session.state())
    }

    /// Ingest a file and attach it to the conversation.
    ///
    /// The document is attached before ingestion starts, so a concurrent
    /// release from another session keeps it. A session closed while the
    /// upload runs releases the document and yields `SessionClosed`.
    /// Failed uploads stay attached and are listed with their reason.
    pub async fn upload(
        &self,
        conversation_id: &str,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadStatus> {
        let document_id = document_id(&bytes);
        let (session, held_before) = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .entry(conversation_id.to_string())
                .or_insert_with(|| self.spawn_session(conversation_id))
                .session
                .clone();
            let held = session.holds(&document_id).await;
            if !held {
                session.attach(&document_id).await;
            }
            (session, held)
        };

        let result = self.ingestor.ingest(name, bytes).await;

        let sessions = self.sessions.lock().await;
        let live = sessions
            .get(conversation_id)
            .is_some_and(|h| Arc::ptr_eq(&h.session, &session));
        if !live {
            drop(sessions);
            warn!(session = conversation_id, %document_id, "session closed during upload");
            self.release(&[document_id]).await?;
            return Err(RagError::SessionClosed(conversation_id.to_string()));
        }
        match result {
            Ok(status) => {
                info!(
                    session = conversation_id,
                    document_id = %status.document_id,
                    state = ?status.state,
                    "document attached"
                );
                Ok(status)
            }
            Err(e) => {
                // rejected before admission: the store has no record to keep
                if !held_before && self.pipeline.store.get_document(&document_id).await?.is_none() {
                    session.detach(&document_id).await;
                }
                Err(e)
            }
        }
    }

    /// Queue a message; events stream back on the returned receiver.
    ///
    /// Messages of one conversation are processed in the order queued.
    pub async fn query(
        &self,
        conversation_id: &str,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<ChatEvent>> {
        let jobs = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .entry(conversation_id.to_string())
                .or_insert_with(|| self.spawn_session(conversation_id))
                .jobs
                .clone()
        };
        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        jobs.send(Job { request, events })
            .await
            .map_err(|_| RagError::SessionClosed(conversation_id.to_string()))?;
        Ok(rx)
    }

    /// Documents attached to the conversation, oldest first.
    pub async fn documents(&self, conversation_id: &str) -> Result<Vec<DocumentSummary>> {
        let Some(session) = self.existing(conversation_id).await else {
            return Ok(Vec::new());
        };
        let attached = session.documents.lock().await.clone();
        let all = self.pipeline.store.list_documents().await?;
        Ok(all
            .into_iter()
            .filter(|d| attached.contains(&d.id))
            .collect())
    }

    /// Look up the chunk behind a `"{doc_id}.{chunk_index}"` reference id.
    pub async fn reference(&self, conversation_id: &str, ref_id: &str) -> Result<ReferenceContent> {
        let reference: ChunkRef = ref_id
            .parse()
            .map_err(|_| RagError::DocumentNotFound(ref_id.to_string()))?;
        let visible = match self.existing(conversation_id).await {
            Some(session) => session.holds(&reference.document_id).await,
            None => false,
        };
        if !visible {
            return Err(RagError::DocumentNotFound(ref_id.to_string()));
        }
        let snapshot = self.pipeline.store.snapshot().await?;
        let doc = snapshot
            .document(&reference.document_id)
            .ok_or_else(|| RagError::DocumentNotFound(ref_id.to_string()))?;
        let chunk = doc
            .chunks
            .get(reference.chunk_index)
            .ok_or_else(|| RagError::DocumentNotFound(ref_id.to_string()))?;
        Ok(ReferenceContent {
            ref_id: reference.to_string(),
            document_id: reference.document_id.clone(),
            document_name: doc.document.name.clone(),
            chunk_index: chunk.chunk_index,
            text: chunk.text.clone(),
        })
    }

    /// Detach a document from the conversation, deleting it if unused elsewhere.
    pub async fn remove_document(&self, conversation_id: &str, document_id: &str) -> Result<()> {
        let detached = match self.existing(conversation_id).await {
            Some(session) => session.detach(document_id).await,
            None => false,
        };
        if !detached {
            return Err(RagError::DocumentNotFound(document_id.to_string()));
        }
        self.release(&[document_id.to_string()]).await
    }

    /// Cancel in-flight work, destroy the session, and release its documents.
    pub async fn disconnect(&self, conversation_id: &str) -> Result<()> {
        let handle = self.sessions.lock().await.remove(conversation_id);
        let Some(handle) = handle else {
            return Ok(());
        };
        handle.worker.abort();
        let owned = handle.session.documents.lock().await.clone();
        info!(
            session = conversation_id,
            documents = owned.len(),
            "session closed"
        );
        self.release(&owned).await
    }

    /// Forget everything the conversation owns.
    pub async fn clear(&self, conversation_id: &str) -> Result<()> {
        self.disconnect(conversation_id).await
    }

    async fn existing(&self, conversation_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .await
            .get(conversation_id)
            .map(|h| h.session.clone())
    }

    /// Remove documents no remaining session references.
    ///
    /// Holds the registry lock throughout so an upload cannot attach a
    /// document between the reference check and its removal.
    async fn release(&self, document_ids: &[String]) -> Result<()> {
        let sessions = self.sessions.lock().await;
        for id in document_ids {
            let mut shared = false;
            for handle in sessions.values() {
                if handle.session.holds(id).await {
                    shared = true;
                    break;
                }
            }
            if shared {
                debug!(document_id = %id, "document still referenced; keeping");
                continue;
            }
            match self.pipeline.store.remove(id).await {
                Ok(()) | Err(RagError::DocumentNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

async fn run_worker(pipeline: Arc<Pipeline>, session: Arc<Session>, mut queue: mpsc::Receiver<Job>) {
    while let Some(job) = queue.recv().await {
        if job.events.is_closed() {
            debug!(session = %session.id, "caller gone before processing; skipping");
            continue;
        }
        answer(&pipeline, &session, job).await;
        session.set_state(SessionState::Idle);
    }
    debug!(session = %session.id, "session worker stopped");
}

async fn answer(pipeline: &Pipeline, session: &Session, job: Job) {
    let Job { request, events } = job;
    let config = &pipeline.config;

    let settings = {
        let mut last = session.settings.lock().await;
        if let Some(s) = &request.settings {
            *last = s.clone();
        }
        last.clone()
    };

    let context = if request.use_rag {
        session.set_state(SessionState::Retrieving);
        match retrieve_context(pipeline, session, &request).await {
            Ok((mode, ctx)) => {
                let event = ChatEvent::References {
                    mode,
                    references: ctx.references.clone(),
                };
                if events.send(event).await.is_err() {
                    return;
                }
                Some(ctx)
            }
            Err(e) => {
                error!(session = %session.id, error = %e, "retrieval failed");
                let _ = events.send(ChatEvent::Error(e)).await;
                return;
            }
        }
    } else {
        None
    };

    session.set_state(SessionState::Generating);
    let history: Vec<Turn> = session.history.lock().await.iter().cloned().collect();
    let prompt = build_prompt(
        &config.completion.system_prompt,
        &history,
        context.as_ref(),
        &request.message,
    );

    let timeout_secs = config.completion.timeout_secs;
    let deadline = Instant::now() + Duration::from_secs(timeout_secs);
    let started = tokio::time::timeout_at(
        deadline,
        pipeline.completion.generate(&prompt, &settings),
    )
    .await;
    let mut stream = match started {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            error!(session = %session.id, error = %e, "generation failed to start");
            let _ = events.send(ChatEvent::Error(e)).await;
            return;
        }
        Err(_) => {
            warn!(session = %session.id, timeout_secs, "generation timed out");
            let _ = events
                .send(ChatEvent::Error(RagError::GenerationTimeout(timeout_secs)))
                .await;
            return;
        }
    };

    let mut reply = String::new();
    loop {
        tokio::select! {
            _ = events.closed() => {
                debug!(session = %session.id, "caller went away; cancelling generation");
                return;
            }
            next = tokio::time::timeout_at(deadline, stream.recv()) => match next {
                Ok(Some(Ok(token))) => {
                    reply.push_str(&token);
                    if events.send(ChatEvent::Token(token)).await.is_err() {
                        return;
                    }
                }
                Ok(Some(Err(e))) => {
                    error!(session = %session.id, error = %e, "generation failed");
                    let _ = events.send(ChatEvent::Error(e)).await;
                    return;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(session = %session.id, timeout_secs, "generation timed out");
                    let _ = events
                        .send(ChatEvent::Error(RagError::GenerationTimeout(timeout_secs)))
                        .await;
                    return;
                }
            }
        }
    }

    session
        .remember(
            Turn {
                user: request.message,
                assistant: reply,
            },
            config.session.history_turns,
        )
        .await;
    let _ = events.send(ChatEvent::Done).await;
}

async fn retrieve_context(
    pipeline: &Pipeline,
    session: &Session,
    request: &ChatRequest,
) -> Result<(QueryMode, AssembledContext)> {
    let config = &pipeline.config;
    let mode = request.mode.unwrap_or(config.retrieval.default_mode);
    let documents = session.targets(mode, request.documents.as_deref()).await;
    let query = Query {
        mode,
        text: request.message.clone(),
        documents,
        max_passages: config.retrieval.max_passages,
        max_tokens: config.context.token_budget,
    };
    let result = retrieve::search(pipeline.store.as_ref(), &query).await?;
    if result.is_empty() {
        warn!(session = %session.id, mode = %mode, "retrieval found no passages");
    }
    let ctx = assemble(&result, query.max_tokens);
    debug!(
        session = %session.id,
        passages = result.len(),
        included = ctx.references.len(),
        tokens = ctx.tokens_used,
        "assembled context"
    );
    Ok((mode, ctx))
}
