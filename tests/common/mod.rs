#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use docent::config::Config;
use docent::error::LlmError;
use docent::llm::{ChatMessage, Completion, CompletionOptions, LanguageModel, Usage};
use docent::orchestrator::{OrchestratorSettings, QueryOrchestrator};
use docent_core::cache::DocumentCache;
use docent_core::cost::CostMonitor;

pub const CHAPTERS: [(&str, &str); 6] = [
    ("Introduction", "This handbook explains how the company works and what everyone can expect from the organisation."),
    ("Working hours", "The office opens early in the morning and the front desk closes once the evening shift has ended."),
    ("Leave requests", "Employees must submit leave requests two weeks in advance through the portal for approval by a manager."),
    ("Equipment", "Laptops and phones are issued on the first day and must be returned in good condition on departure."),
    ("Travel", "Business travel is booked through the travel desk and receipts are filed within one month of the trip."),
    ("Conduct", "Staff are expected to treat colleagues with courtesy and to keep shared spaces tidy at all times."),
];

/// Six chapters, roughly 2k tokens each.
pub fn handbook() -> String {
    let mut text = String::new();
    for (i, (title, sentence)) in CHAPTERS.iter().enumerate() {
        text.push_str(&format!("Chapter {}: {}\n\n", i + 1, title));
        for _ in 0..16 {
            text.push_str(&vec![*sentence; 5].join(" "));
            text.push_str("\n\n");
        }
    }
    text
}

/// Replies from a queue, then a fixed fallback. Records every call.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    fallback: String,
    usage: Option<Usage>,
    delay: Duration,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            fallback: "Scripted answer.".to_string(),
            usage: None,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_fallback(mut self, fallback: &str) -> Self {
        self.fallback = fallback.to_string();
        self
    }

    pub fn with_usage(mut self, input_tokens: usize, output_tokens: usize) -> Self {
        self.usage = Some(Usage {
            input_tokens,
            output_tokens,
        });
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }

    /// The last message of each call, which carries context and question.
    pub fn user_messages(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.last().map(|m| m.content.clone()))
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<Completion, LlmError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(messages.to_vec());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let text = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Completion {
            text,
            usage: self.usage,
        })
    }
}

/// Defaults with the background sweeper off and context expansion
/// disabled so section counts are exact.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.cache.sweep_interval_secs = 0;
    config.context.min_utilization = 0.0;
    config.context.budget_tokens = 12_000;
    config
}

pub fn orchestrator(model: Arc<ScriptedModel>, config: &Config) -> QueryOrchestrator {
    QueryOrchestrator::new(
        model,
        Arc::new(DocumentCache::new((&config.cache).into())),
        Arc::new(CostMonitor::new((&config.cost).into())),
        OrchestratorSettings::from(config),
    )
}
