// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

//! Deterministic fixtures for the other crates' tests: a seeded
//! conversation generator, temp-database helpers, and a scriptable
//! [`CompletionApi`] stub.

use anyhow::{Context, Result, anyhow};
use parley_app::Role;
use parley_db::Store;
use parley_llm::{ChatMessage, CompletionApi, ModelInfo};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const CHAT_TOPICS: [&str; 10] = [
    "Trip planning",
    "Rust borrow checker",
    "Sourdough starter",
    "Garden layout",
    "Cover letter draft",
    "SQL help",
    "Workout plan",
    "Book club notes",
    "Budget review",
    "Regex golf",
];

const USER_PROMPTS: [&str; 8] = [
    "Can you summarize this for me?",
    "What are the trade-offs here?",
    "Give me three options.",
    "How would you phrase that better?",
    "What am I missing?",
    "Explain it like I'm new to this.",
    "Draft a short reply.",
    "What's the next step?",
];

const ASSISTANT_REPLIES: [&str; 8] = [
    "Here's a short summary of the key points.",
    "There are two main trade-offs to weigh.",
    "Option one is the simplest; the others add flexibility.",
    "A clearer phrasing would lead with the outcome.",
    "One detail worth checking is the edge case.",
    "Think of it as a pipeline with three stages.",
    "Here's a draft you can adjust.",
    "Start with the smallest reversible change.",
];

#[derive(Debug, Clone)]
struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);

        let mut x = self.state;
        x ^= x >> 13;
        x ^= x << 7;
        x ^= x >> 17;
        x
    }

    fn int_n(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        (self.next_u64() % (n as u64)) as usize
    }
}

/// Seeded generator for plausible chat fixtures. Same seed, same output.
#[derive(Debug, Clone)]
pub struct ChatFaker {
    rng: DeterministicRng,
}

impl ChatFaker {
    pub fn new(seed: u64) -> Self {
        let normalized = if seed == 0 { 1 } else { seed };
        Self {
            rng: DeterministicRng::new(normalized),
        }
    }

    pub fn chat_title(&mut self) -> String {
        let topic = CHAT_TOPICS[self.rng.int_n(CHAT_TOPICS.len())];
        format!("{topic} #{}", self.rng.int_n(90) + 10)
    }

    pub fn user_prompt(&mut self) -> String {
        USER_PROMPTS[self.rng.int_n(USER_PROMPTS.len())].to_owned()
    }

    pub fn assistant_reply(&mut self) -> String {
        ASSISTANT_REPLIES[self.rng.int_n(ASSISTANT_REPLIES.len())].to_owned()
    }
}

/// Fills a bootstrapped store with `chats` conversations of `turns`
/// user/assistant pairs each.
pub fn seed_store(store: &Store, seed: u64, chats: usize, turns: usize) -> Result<()> {
    let mut faker = ChatFaker::new(seed);
    for _ in 0..chats {
        let chat_id = store
            .create_chat(&faker.chat_title())
            .context("seed chat")?;
        for _ in 0..turns {
            store
                .add_message(chat_id, Role::User, &faker.user_prompt())
                .context("seed user message")?;
            store
                .add_message(chat_id, Role::Assistant, &faker.assistant_reply())
                .context("seed assistant message")?;
        }
    }
    Ok(())
}

pub fn temp_db_path() -> Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let db_path = dir.path().join("parley.db");
    Ok((dir, db_path))
}

pub fn model_info(id: &str) -> ModelInfo {
    ModelInfo {
        id: id.to_owned(),
        name: id.to_owned(),
        context_length: None,
    }
}

/// One recorded `chat_completion` call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionCall {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Default)]
struct StubInner {
    models: VecDeque<Result<Vec<ModelInfo>, String>>,
    completions: VecDeque<Result<String, String>>,
    model_list_calls: usize,
    completion_calls: Vec<CompletionCall>,
}

/// Scriptable [`CompletionApi`]: queue responses up front, then inspect the
/// calls the code under test made. With an empty queue, `list_models`
/// returns an empty catalog and `chat_completion` an empty reply.
#[derive(Debug, Clone, Default)]
pub struct StubApi {
    inner: Arc<Mutex<StubInner>>,
}

impl StubApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_models(&self, result: Result<Vec<ModelInfo>, String>) {
        self.lock().models.push_back(result);
    }

    pub fn push_completion(&self, result: Result<String, String>) {
        self.lock().completions.push_back(result);
    }

    pub fn model_list_calls(&self) -> usize {
        self.lock().model_list_calls
    }

    pub fn completion_calls(&self) -> Vec<CompletionCall> {
        self.lock().completion_calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StubInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl CompletionApi for StubApi {
    fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let mut inner = self.lock();
        inner.model_list_calls += 1;
        match inner.models.pop_front() {
            Some(Ok(models)) => Ok(models),
            Some(Err(error)) => Err(anyhow!(error)),
            None => Ok(Vec::new()),
        }
    }

    fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: Option<f32>,
    ) -> Result<String> {
        let mut inner = self.lock();
        inner.completion_calls.push(CompletionCall {
            model: model.to_owned(),
            messages: messages.to_vec(),
            temperature,
        });
        match inner.completions.pop_front() {
            Some(Ok(content)) => Ok(content),
            Some(Err(error)) => Err(anyhow!(error)),
            None => Ok(String::new()),
        }
    }
}
