//! Query orchestration.
//!
//! [`QueryOrchestrator`] owns per-session state and drives each question
//! through the pipeline:
//!
//! ```text
//! Idle → Analyzing ─┬─▶ NoDocNeeded → Responding → Done
//!                   └─▶ NeedsDoc → Retrieving → Responding ─┬─▶ Done
//!                                      ▲                    │
//!                                      └─ AwaitingMoreContext ◀┘ (NEED_MORE_CHUNKS)
//! ```
//!
//! - **Analyzing**: [`classify_fast`] first; the model is asked only when a
//!   document is attached and the local confidence is under
//!   `classifier_threshold`.
//! - **NeedsDoc without a document**: a fixed reply, no model call.
//! - **Retrieving**: top sections not yet supplied for this question, then
//!   [`ContextAssembler`] builds the context block.
//! - **Escalation**: a `NEED_MORE_CHUNKS:` reply retrieves further sections
//!   (biased by the hint) and re-asks, at most `max_rounds` times. Fresh
//!   sections take precedence over carried-over ones when the budget is
//!   tight, and only sections that reached a context count as used. When
//!   nothing new fits, or the rounds run out, a hedged partial answer is
//!   returned.
//!
//! # Call bound
//!
//! A question makes at most `max_rounds + 1` answer and escalation calls.
//! Two auxiliary calls sit outside that bound, each at most once per
//! question: model classification (only below `classifier_threshold`) and
//! model section selection (only with `retrieval.selection = "model"`). The
//! worst case is therefore `max_rounds + 3` calls.
//!
//! Each session sits behind its own async mutex, so a second question on
//! the same session waits for the first to finish. Sessions never share
//! state. The cache and cost monitor are injected and shared process-wide.
//! Sessions untouched for `session_idle_ttl` are dropped by
//! [`QueryOrchestrator::evict_idle_sessions`], which the background sweeper
//! calls.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use docent_core::assemble::{AssemblerConfig, ContextAssembler};
use docent_core::cache::{cache_key, CacheStats, DocumentCache};
use docent_core::clock::{Clock, SystemClock};
use docent_core::cost::{BudgetStatus, CostMonitor, CostSummary};
use docent_core::models::{CostEntry, Document, DocumentKind, Operation, QueryAnalysis, Section};
use docent_core::protocol::{
    parse_classification, parse_division_plan, parse_model_reply, parse_section_selection, ModelReply,
};
use docent_core::retrieve::{RelevanceRetriever, RetrieverConfig};
use docent_core::segment::{locate_markers, DivisionStrategy, Segmenter, SegmenterConfig};
use docent_core::tokens::estimate_tokens;

use crate::analyzer::classify_fast;
use crate::config::{Config, SelectionMode};
use crate::error::EngineError;
use crate::extract::extract_text;
use crate::llm::{ChatMessage, CompletionOptions, LanguageModel};
use crate::prompts;
use crate::store::ObjectStore;

/// States a question passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    Idle,
    Analyzing,
    NoDocNeeded,
    NeedsDoc,
    Retrieving,
    Responding,
    AwaitingMoreContext,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    /// Answered from document context.
    Answered,
    /// Escalation rounds ran out.
    Partial,
    /// The question needs a document and none is attached.
    NoDocument,
    /// Answered without the document.
    General,
}

/// Result of [`QueryOrchestrator::process_query`].
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    pub answer: String,
    pub outcome: QueryOutcome,
    pub analysis: QueryAnalysis,
    pub states: Vec<QueryState>,
    /// Answer attempts made (first attempt plus escalations).
    pub rounds: usize,
    /// Titles of the sections supplied in the final context.
    pub sections: Vec<String>,
    pub model_calls: usize,
    pub cost_usd: f64,
}

/// What a session knows about its active document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub name: String,
    pub content_hash: String,
    pub kind: DocumentKind,
    pub token_estimate: usize,
    pub sections: usize,
    pub strategy: Option<DivisionStrategy>,
    pub created_at: DateTime<Utc>,
    /// The processed document came from the cache.
    pub from_cache: bool,
}

impl DocumentSummary {
    fn new(document: &Document, from_cache: bool) -> Self {
        Self {
            id: document.id.clone(),
            name: document.name.clone(),
            content_hash: document.content_hash.clone(),
            kind: document.kind,
            token_estimate: document.token_estimate,
            sections: document.sections.len(),
            strategy: document.strategy,
            created_at: document.created_at,
            from_cache,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub model: String,
    pub sessions: usize,
    pub queries_processed: u64,
    pub documents_processed: u64,
    pub cache: CacheStats,
    pub costs: CostSummary,
}

/// Diagnostics for one session.
#[derive(Debug, Clone, Serialize)]
pub struct DebugSnapshot {
    pub session_id: String,
    pub active_document: Option<DocumentSummary>,
    pub used_section_ids: Vec<String>,
    pub query_count: u64,
    pub history_turns: usize,
    pub last_states: Vec<QueryState>,
    pub last_sections: Vec<String>,
    pub cache: CacheStats,
    pub recent_costs: Vec<CostEntry>,
}

/// Orchestrator settings, decoupled from the TOML layout.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub segmenter: SegmenterConfig,
    pub retriever: RetrieverConfig,
    pub assembler: AssemblerConfig,
    pub context_budget_tokens: usize,
    pub sections_per_round: usize,
    pub max_rounds: usize,
    pub classifier_threshold: f64,
    pub history_turns: usize,
    pub selection: SelectionMode,
    pub model_assisted_segmentation: bool,
    pub enforce_budget: bool,
    /// Sessions idle for longer are evicted. `None` keeps them until cleared.
    pub session_idle_ttl: Option<Duration>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            segmenter: (&config.segmentation).into(),
            retriever: (&config.retrieval).into(),
            assembler: (&config.context).into(),
            context_budget_tokens: config.context.budget_tokens,
            sections_per_round: config.retrieval.max_sections,
            max_rounds: config.orchestrator.max_rounds,
            classifier_threshold: config.orchestrator.classifier_threshold,
            history_turns: config.orchestrator.history_turns,
            selection: config.retrieval.selection,
            model_assisted_segmentation: config.segmentation.model_assisted,
            enforce_budget: config.cost.enforce_budget,
            session_idle_ttl: (config.orchestrator.session_idle_secs > 0)
                .then(|| Duration::seconds(config.orchestrator.session_idle_secs as i64)),
        }
    }
}

struct Session {
    active: Option<Arc<Document>>,
    from_cache: bool,
    used_section_ids: HashSet<String>,
    query_count: u64,
    history: VecDeque<(String, String)>,
    last_states: Vec<QueryState>,
    last_sections: Vec<String>,
}

impl Session {
    fn new() -> Self {
        Self {
            active: None,
            from_cache: false,
            used_section_ids: HashSet::new(),
            query_count: 0,
            history: VecDeque::new(),
            last_states: Vec::new(),
            last_sections: Vec::new(),
        }
    }
}

struct SessionSlot {
    state: Arc<tokio::sync::Mutex<Session>>,
    last_active: DateTime<Utc>,
}

type SessionMap = HashMap<String, SessionSlot>;

/// Cost and call count accumulated while serving one request.
#[derive(Default)]
struct Tally {
    cost_usd: f64,
    calls: usize,
}

pub struct QueryOrchestrator {
    model: Arc<dyn LanguageModel>,
    cache: Arc<DocumentCache>,
    costs: Arc<CostMonitor>,
    settings: OrchestratorSettings,
    segmenter: Segmenter,
    retriever: RelevanceRetriever,
    assembler: ContextAssembler,
    sessions: Mutex<SessionMap>,
    clock: Arc<dyn Clock>,
    queries_processed: AtomicU64,
    documents_processed: AtomicU64,
}

impl QueryOrchestrator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        cache: Arc<DocumentCache>,
        costs: Arc<CostMonitor>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            segmenter: Segmenter::new(settings.segmenter.clone()),
            retriever: RelevanceRetriever::new(settings.retriever.clone()),
            assembler: ContextAssembler::new(settings.assembler.clone()),
            model,
            cache,
            costs,
            settings,
            sessions: Mutex::new(HashMap::new()),
            clock: Arc::new(SystemClock),
            queries_processed: AtomicU64::new(0),
            documents_processed: AtomicU64::new(0),
        }
    }

    /// Replace the time source used for session idleness.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<DocumentCache> {
        &self.cache
    }

    pub fn costs(&self) -> &Arc<CostMonitor> {
        &self.costs
    }

    /// Process `content` and make it the session's active document.
    ///
    /// Identical `(content, name)` pairs are served from the cache without
    /// re-segmentation. Attaching a document resets the session's
    /// conversation history and used sections.
    pub async fn process_document(
        &self,
        session_id: &str,
        content: &str,
        name: &str,
    ) -> Result<DocumentSummary, EngineError> {
        if content.trim().is_empty() {
            return Err(EngineError::EmptyDocument {
                name: name.to_string(),
            });
        }

        let key = cache_key(content, name);
        let (document, from_cache) = match self.cache.get(&key) {
            Some(document) => {
                debug!(document = %name, "document served from cache");
                (document, true)
            }
            None => {
                let mut document = self.segmenter.segment(content, name);
                if self.settings.model_assisted_segmentation
                    && document.strategy == Some(DivisionStrategy::FixedSize)
                {
                    if let Some(divided) = self.divide_with_model(&document).await {
                        document = divided;
                    }
                }
                let document = Arc::new(document);
                self.cache.set(&key, Arc::clone(&document));
                self.documents_processed.fetch_add(1, Ordering::Relaxed);
                (document, false)
            }
        };

        let summary = DocumentSummary::new(&document, from_cache);
        let handle = self.session(session_id);
        let mut session = handle.lock().await;
        session.active = Some(document);
        session.from_cache = from_cache;
        session.used_section_ids.clear();
        session.history.clear();

        info!(
            session = %session_id,
            document = %summary.name,
            kind = %summary.kind,
            sections = summary.sections,
            tokens = summary.token_estimate,
            from_cache,
            "document attached"
        );
        Ok(summary)
    }

    /// Fetch a file from `store`, extract its text, and attach it.
    pub async fn attach_from_store(
        &self,
        session_id: &str,
        store: &dyn ObjectStore,
        path: &str,
    ) -> Result<DocumentSummary, EngineError> {
        let bytes = store
            .fetch_bytes(path)
            .await
            .map_err(|e| EngineError::Storage(format!("{:#}", e)))?;
        let text = extract_text(&bytes, path)?;
        let name = std::path::Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path);
        self.process_document(session_id, &text, name).await
    }

    /// Answer one question in a session.
    ///
    /// Returns an answer for every recoverable condition (no document,
    /// malformed model JSON, retrieval misses, exhausted escalation). Errors
    /// are limited to transport failures and, when enforcement is on, an
    /// exceeded budget.
    pub async fn process_query(&self, session_id: &str, text: &str) -> Result<QueryAnswer, EngineError> {
        let handle = self.session(session_id);
        let mut session = handle.lock().await;
        self.queries_processed.fetch_add(1, Ordering::Relaxed);

        session.query_count += 1;
        session.used_section_ids.clear();

        let mut tally = Tally::default();
        let mut states = vec![QueryState::Idle, QueryState::Analyzing];
        let document = session.active.clone();

        let analysis = self.analyze(text, document.as_deref(), &mut tally).await?;

        let result = if !analysis.needs_document {
            states.push(QueryState::NoDocNeeded);
            states.push(QueryState::Responding);
            let messages = self.messages(prompts::general_system_prompt(), &session.history, text.to_string());
            let reply = self
                .call_model(messages, CompletionOptions::default(), Operation::General, "general reply", &mut tally)
                .await?;
            Answered {
                answer: reply.trim().to_string(),
                outcome: QueryOutcome::General,
                rounds: 1,
                sections: Vec::new(),
            }
        } else {
            states.push(QueryState::NeedsDoc);
            match document {
                None => {
                    debug!(session = %session_id, "question needs a document but none is attached");
                    Answered {
                        answer: prompts::ATTACH_DOCUMENT_MESSAGE.to_string(),
                        outcome: QueryOutcome::NoDocument,
                        rounds: 0,
                        sections: Vec::new(),
                    }
                }
                Some(document) if !document.is_large() => {
                    self.answer_whole(&mut session, &document, text, &mut states, &mut tally)
                        .await?
                }
                Some(document) => {
                    self.answer_sections(&mut session, &document, text, &mut states, &mut tally)
                        .await?
                }
            }
        };

        if result.outcome != QueryOutcome::NoDocument && self.settings.history_turns > 0 {
            session.history.push_back((text.to_string(), result.answer.clone()));
            while session.history.len() > self.settings.history_turns {
                session.history.pop_front();
            }
        }
        states.push(QueryState::Done);
        session.last_states = states.clone();
        session.last_sections = result.sections.clone();

        info!(
            session = %session_id,
            outcome = ?result.outcome,
            rounds = result.rounds,
            calls = tally.calls,
            cost_usd = tally.cost_usd,
            "query processed"
        );

        Ok(QueryAnswer {
            answer: result.answer,
            outcome: result.outcome,
            analysis,
            states,
            rounds: result.rounds,
            sections: result.sections,
            model_calls: tally.calls,
            cost_usd: tally.cost_usd,
        })
    }

    /// The session's active document, if any.
    pub async fn active_document(&self, session_id: &str) -> Option<DocumentSummary> {
        let handle = self.existing_session(session_id)?;
        let session = handle.lock().await;
        session
            .active
            .as_ref()
            .map(|d| DocumentSummary::new(d, session.from_cache))
    }

    /// Forget a session entirely. Returns whether it existed.
    pub fn clear_session(&self, session_id: &str) -> bool {
        let removed = self.lock_sessions().remove(session_id).is_some();
        if removed {
            info!(session = %session_id, "session cleared");
        }
        removed
    }

    /// Drop sessions idle for longer than `session_idle_ttl`. A session with
    /// a question or attachment in flight is kept. Returns how many were
    /// removed.
    pub fn evict_idle_sessions(&self) -> usize {
        let Some(ttl) = self.settings.session_idle_ttl else {
            return 0;
        };
        let now = self.clock.now();
        let mut sessions = self.lock_sessions();
        let before = sessions.len();
        sessions.retain(|_, slot| now - slot.last_active <= ttl || Arc::strong_count(&slot.state) > 1);
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, remaining = sessions.len(), "idle sessions evicted");
        }
        removed
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            model: self.model.model_name().to_string(),
            sessions: self.lock_sessions().len(),
            queries_processed: self.queries_processed.load(Ordering::Relaxed),
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            cache: self.cache.stats(),
            costs: self.costs.get_summary(),
        }
    }

    pub async fn debug_snapshot(&self, session_id: &str) -> Option<DebugSnapshot> {
        let handle = self.existing_session(session_id)?;
        let session = handle.lock().await;
        let mut used: Vec<String> = session.used_section_ids.iter().cloned().collect();
        used.sort();
        Some(DebugSnapshot {
            session_id: session_id.to_string(),
            active_document: session
                .active
                .as_ref()
                .map(|d| DocumentSummary::new(d, session.from_cache)),
            used_section_ids: used,
            query_count: session.query_count,
            history_turns: session.history.len(),
            last_states: session.last_states.clone(),
            last_sections: session.last_sections.clone(),
            cache: self.cache.stats(),
            recent_costs: self.costs.recent_entries(10),
        })
    }

    async fn analyze(
        &self,
        text: &str,
        document: Option<&Document>,
        tally: &mut Tally,
    ) -> Result<QueryAnalysis, EngineError> {
        let fast = classify_fast(text, document.is_some());
        let Some(document) = document else {
            return Ok(fast);
        };
        if fast.confidence >= self.settings.classifier_threshold {
            return Ok(fast);
        }

        let (system, user) = prompts::classification_messages(text, &document.name);
        let reply = self
            .call_model(
                vec![ChatMessage::system(system), ChatMessage::user(user)],
                CompletionOptions::json(),
                Operation::Classification,
                "query classification",
                tally,
            )
            .await?;
        match parse_classification(&reply) {
            Ok(analysis) => Ok(analysis),
            Err(e) => {
                warn!(error = %e, raw = %e.raw, "unparseable classification; using local verdict");
                Ok(fast)
            }
        }
    }

    async fn answer_whole(
        &self,
        session: &mut Session,
        document: &Document,
        question: &str,
        states: &mut Vec<QueryState>,
        tally: &mut Tally,
    ) -> Result<Answered, EngineError> {
        states.push(QueryState::Retrieving);
        let context = self
            .assembler
            .assemble_whole(document, self.settings.context_budget_tokens);

        states.push(QueryState::Responding);
        let messages = self.messages(
            prompts::document_system_prompt(&document.name, true),
            &session.history,
            prompts::document_user_message(&context.text, question),
        );
        let reply = self
            .call_model(messages, CompletionOptions::default(), Operation::Answer, question, tally)
            .await?;

        let titles = vec![document.name.clone()];
        Ok(match parse_model_reply(&reply) {
            ModelReply::Answer(answer) => Answered {
                answer,
                outcome: QueryOutcome::Answered,
                rounds: 1,
                sections: titles,
            },
            // The whole document was supplied; there is nothing more to add.
            ModelReply::NeedMore { hint } => Answered {
                answer: prompts::partial_answer(&hint, &titles),
                outcome: QueryOutcome::Partial,
                rounds: 1,
                sections: titles,
            },
        })
    }

    async fn answer_sections(
        &self,
        session: &mut Session,
        document: &Document,
        question: &str,
        states: &mut Vec<QueryState>,
        tally: &mut Tally,
    ) -> Result<Answered, EngineError> {
        let per_round = self.settings.sections_per_round;
        let mut supplied: Vec<&Section> = Vec::new();
        let mut titles: Vec<String> = Vec::new();
        let mut last_hint = String::new();
        let mut round = 0;

        loop {
            states.push(QueryState::Retrieving);
            let fresh: Vec<&Section> = if round == 0 {
                self.select_sections(document, question, &session.used_section_ids, tally)
                    .await?
            } else {
                let query = format!("{} {}", question, last_hint);
                self.retriever
                    .rank_excluding(&document.sections, &query, per_round, &session.used_section_ids)
                    .into_iter()
                    .map(|s| s.section)
                    .collect()
            };

            if fresh.is_empty() {
                debug!(round, "no unused sections left to supply");
                return Ok(Answered {
                    answer: prompts::partial_answer(&last_hint, &titles),
                    outcome: QueryOutcome::Partial,
                    rounds: round,
                    sections: titles,
                });
            }

            // The assembler trims from the tail, so sections carried over
            // from earlier rounds give way before the fresh ones.
            let fresh_ids: Vec<String> = fresh.iter().map(|s| s.id.clone()).collect();
            let mut candidates = fresh;
            candidates.extend(supplied.iter().copied());
            let context = self
                .assembler
                .assemble(&document.sections, &candidates, self.settings.context_budget_tokens);

            let in_context: HashSet<&str> = context.section_ids.iter().map(String::as_str).collect();
            if !fresh_ids.iter().any(|id| in_context.contains(id.as_str())) {
                debug!(round, "no fresh section fits the budget");
                return Ok(Answered {
                    answer: prompts::partial_answer(&last_hint, &titles),
                    outcome: QueryOutcome::Partial,
                    rounds: round,
                    sections: titles,
                });
            }
            for id in &context.section_ids {
                session.used_section_ids.insert(id.clone());
            }
            supplied = candidates;
            supplied.retain(|s| in_context.contains(s.id.as_str()));
            for id in &context.expanded_ids {
                if let Some(section) = document.section(id) {
                    supplied.push(section);
                }
            }
            titles = context
                .section_ids
                .iter()
                .filter_map(|id| document.section(id))
                .map(|s| s.title.clone())
                .collect();

            states.push(QueryState::Responding);
            let (operation, description) = if round == 0 {
                (Operation::Answer, question.to_string())
            } else {
                (Operation::Escalation, format!("escalation round {}: {}", round, last_hint))
            };
            let messages = self.messages(
                prompts::document_system_prompt(&document.name, false),
                &session.history,
                prompts::document_user_message(&context.text, question),
            );
            let reply = self
                .call_model(messages, CompletionOptions::default(), operation, &description, tally)
                .await?;

            match parse_model_reply(&reply) {
                ModelReply::Answer(answer) => {
                    return Ok(Answered {
                        answer,
                        outcome: QueryOutcome::Answered,
                        rounds: round + 1,
                        sections: titles,
                    });
                }
                ModelReply::NeedMore { hint } => {
                    last_hint = hint;
                    if round >= self.settings.max_rounds {
                        info!(rounds = round + 1, "escalation rounds exhausted; returning partial answer");
                        return Ok(Answered {
                            answer: prompts::partial_answer(&last_hint, &titles),
                            outcome: QueryOutcome::Partial,
                            rounds: round + 1,
                            sections: titles,
                        });
                    }
                    states.push(QueryState::AwaitingMoreContext);
                    debug!(round, hint = %last_hint, "model asked for more context");
                    round += 1;
                }
            }
        }
    }

    /// First-round sections: model selection when configured, otherwise
    /// (and on any unusable selection) lexical ranking.
    async fn select_sections<'d>(
        &self,
        document: &'d Document,
        question: &str,
        excluded: &HashSet<String>,
        tally: &mut Tally,
    ) -> Result<Vec<&'d Section>, EngineError> {
        let per_round = self.settings.sections_per_round;
        if self.settings.selection == SelectionMode::Model {
            let candidates: Vec<&Section> = document
                .sections
                .iter()
                .filter(|s| !excluded.contains(&s.id))
                .collect();
            let (system, user) = prompts::selection_messages(question, &candidates, per_round);
            let reply = self
                .call_model(
                    vec![ChatMessage::system(system), ChatMessage::user(user)],
                    CompletionOptions::json(),
                    Operation::Selection,
                    "section selection",
                    tally,
                )
                .await?;
            match parse_section_selection(&reply, candidates.len()) {
                Ok(selection) => {
                    debug!(recovery = ?selection.recovery, picked = ?selection.indices, "model selected sections");
                    return Ok(selection
                        .positions()
                        .take(per_round)
                        .map(|i| candidates[i])
                        .collect());
                }
                Err(e) => {
                    warn!(error = %e, raw = %e.raw, "unusable section selection; ranking lexically");
                }
            }
        }

        Ok(self
            .retriever
            .rank_excluding(&document.sections, question, per_round, excluded)
            .into_iter()
            .map(|s| s.section)
            .collect())
    }

    /// Ask the model for boundaries of a document with no detectable
    /// structure. Any failure keeps the heuristic division.
    async fn divide_with_model(&self, document: &Document) -> Option<Document> {
        let (system, user) = prompts::division_messages(document);
        let mut tally = Tally::default();
        let reply = match self
            .call_model(
                vec![ChatMessage::system(system), ChatMessage::user(user)],
                CompletionOptions::json(),
                Operation::Segmentation,
                &format!("division of {}", document.name),
                &mut tally,
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, document = %document.name, "model-assisted division unavailable");
                return None;
            }
        };

        let plan = match parse_division_plan(&reply) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, raw = %e.raw, "unparseable division plan; keeping fixed-size sections");
                return None;
            }
        };

        let content = &document.content;
        let mut titles: HashMap<usize, &str> = HashMap::new();
        let mut offsets = Vec::with_capacity(plan.divisions.len());
        let mut from = 0;
        for division in &plan.divisions {
            let Some(&hit) = locate_markers(&content[from..], &[division.start_text.as_str()]).first() else {
                continue;
            };
            let at = from + hit;
            offsets.push(at);
            titles.insert(at, division.title.as_str());
            from = at + content[at..].chars().next().map_or(1, char::len_utf8);
        }
        let mut divided =
            self.segmenter
                .sections_from_boundaries(document, &offsets, DivisionStrategy::ModelAssisted)?;

        for section in &mut divided.sections {
            if let Some(title) = titles.get(&section.start_offset).filter(|t| !t.trim().is_empty()) {
                section.title = title.trim().to_string();
            }
        }
        debug!(sections = divided.sections.len(), "model-assisted division applied");
        Some(divided)
    }

    async fn call_model(
        &self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
        operation: Operation,
        description: &str,
        tally: &mut Tally,
    ) -> Result<String, EngineError> {
        if self.settings.enforce_budget && self.costs.budget_status() == BudgetStatus::Exceeded {
            return Err(EngineError::BudgetExceeded {
                spent: self.costs.today_cost(),
                budget: self.costs.config().daily_budget_usd,
            });
        }

        let completion = self.model.complete(&messages, &options).await?;
        let (input, output) = match completion.usage {
            Some(usage) => (usage.input_tokens, usage.output_tokens),
            None => (
                messages.iter().map(|m| estimate_tokens(&m.content)).sum(),
                estimate_tokens(&completion.text),
            ),
        };
        tally.cost_usd += self.costs.log_operation(operation, input, output, description);
        tally.calls += 1;
        Ok(completion.text)
    }

    fn messages(
        &self,
        system: String,
        history: &VecDeque<(String, String)>,
        user: String,
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() * 2 + 2);
        messages.push(ChatMessage::system(system));
        for (question, answer) in history {
            messages.push(ChatMessage::user(question.clone()));
            messages.push(ChatMessage::assistant(answer.clone()));
        }
        messages.push(ChatMessage::user(user));
        messages
    }

    /// The session's state, created on first use. Marks it active.
    fn session(&self, session_id: &str) -> Arc<tokio::sync::Mutex<Session>> {
        let now = self.clock.now();
        let mut sessions = self.lock_sessions();
        let slot = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionSlot {
                state: Arc::new(tokio::sync::Mutex::new(Session::new())),
                last_active: now,
            });
        slot.last_active = now;
        Arc::clone(&slot.state)
    }

    fn existing_session(&self, session_id: &str) -> Option<Arc<tokio::sync::Mutex<Session>>> {
        self.lock_sessions().get(session_id).map(|slot| Arc::clone(&slot.state))
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, SessionMap> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Internal result of one answering path.
struct Answered {
    answer: String,
    outcome: QueryOutcome,
    rounds: usize,
    sections: Vec<String>,
}
