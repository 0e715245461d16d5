// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

//! The session controller: owns the mutable chat-session state, mediates
//! between the store and the completion API, and serializes every state
//! write onto the caller's event loop.
//!
//! Network work runs on short-lived worker threads that post a
//! [`SessionEvent`] back over an mpsc channel; the owning loop feeds each
//! received event to [`SessionController::apply`]. Every dispatch carries a
//! request id, and `apply` drops events whose id is not the in-flight one,
//! so a stale response can never clobber state written by a newer request.

use anyhow::{Context, Result};
use parley_app::{Chat, ChatId, Message, Role, Screen, ThemeMode};
use parley_db::Store;
use parley_llm::{ApiKeyHandle, ChatMessage, CompletionApi, ModelInfo};
use std::sync::mpsc::Sender;
use std::thread;

pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

/// Read-only snapshot the view renders each frame. All mutation goes
/// through [`SessionController`] operations.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub chats: Vec<Chat>,
    pub current_chat: Option<ChatId>,
    pub messages: Vec<Message>,
    pub input: String,
    pub loading: bool,
    pub error: Option<String>,
    pub models: Vec<ModelInfo>,
    pub selected_model: Option<String>,
    pub screen: Screen,
    pub theme: ThemeMode,
    /// Staged credential shown on the settings screen. Committed by
    /// `save_api_key`, not on every keystroke.
    pub api_key: String,
}

/// Result of background work, delivered to the owning loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ModelsLoaded {
        request_id: u64,
        result: Result<Vec<ModelInfo>, String>,
    },
    CompletionFinished {
        request_id: u64,
        result: Result<String, String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// User message persisted, completion request dispatched.
    Sent,
    /// Blank input or no model selected; nothing written, nothing changed.
    Ignored,
    /// A completion is already outstanding; rejected without state changes.
    Busy,
    /// Storage failed mid-send; the failure is in the error slot.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlightCompletion {
    request_id: u64,
    chat_id: ChatId,
}

pub struct SessionController<A> {
    store: Store,
    api: A,
    keys: ApiKeyHandle,
    temperature: Option<f32>,
    state: SessionState,
    next_request_id: u64,
    in_flight_completion: Option<InFlightCompletion>,
    in_flight_models: Option<u64>,
}

impl<A> SessionController<A>
where
    A: CompletionApi + Clone + Send + 'static,
{
    /// Builds the controller and runs the synchronous part of
    /// initialization: credential (store, then environment fallback), theme
    /// (invalid stored values fall back to system), chat list, and the
    /// current chat's messages. Storage failure here is fatal to the caller.
    ///
    /// The caller should invoke [`Self::refresh_models`] once afterwards; it
    /// is a no-op while the credential is blank.
    pub fn new(
        store: Store,
        api: A,
        keys: ApiKeyHandle,
        env_api_key: Option<String>,
        temperature: Option<f32>,
    ) -> Result<Self> {
        let api_key = store
            .get_api_key()
            .context("load stored API key")?
            .or(env_api_key)
            .unwrap_or_default();
        keys.set(&api_key);

        let theme = store.get_theme_mode().context("load theme preference")?;
        let chats = store.list_chats().context("load chat list")?;
        let current_chat = chats.first().map(|chat| chat.id);
        let messages = match current_chat {
            Some(chat_id) => store
                .messages_by_chat(chat_id)
                .context("load current chat messages")?,
            None => Vec::new(),
        };

        Ok(Self {
            store,
            api,
            keys,
            temperature,
            state: SessionState {
                chats,
                current_chat,
                messages,
                input: String::new(),
                loading: false,
                error: None,
                models: Vec::new(),
                selected_model: None,
                screen: Screen::Chat,
                theme,
                api_key,
            },
            next_request_id: 0,
            in_flight_completion: None,
            in_flight_models: None,
        })
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn update_input(&mut self, text: impl Into<String>) {
        self.state.input = text.into();
    }

    pub fn navigate(&mut self, screen: Screen) {
        self.state.screen = screen;
    }

    pub fn clear_error(&mut self) {
        self.state.error = None;
    }

    pub fn select_model(&mut self, model: &str) {
        self.state.selected_model = Some(model.to_owned());
    }

    /// Selecting an id that is not in the chat list is allowed; the store
    /// returns an empty message list for it.
    pub fn select_chat(&mut self, chat_id: ChatId) -> Result<()> {
        self.state.current_chat = Some(chat_id);
        self.state.messages = self
            .store
            .messages_by_chat(chat_id)
            .context("reload messages for selected chat")?;
        Ok(())
    }

    pub fn create_chat_and_select(&mut self, title: &str) -> Result<ChatId> {
        let chat_id = self.store.create_chat(title).context("create chat")?;
        self.state.chats = self.store.list_chats().context("refresh chat list")?;
        self.select_chat(chat_id)?;
        Ok(chat_id)
    }

    /// The guarded send operation. Validation happens before the implicit
    /// chat creation, so an invalid attempt leaves the store untouched.
    /// Re-entry while a completion is outstanding is rejected with
    /// [`SendOutcome::Busy`].
    pub fn send(&mut self, tx: &Sender<SessionEvent>) -> SendOutcome {
        if self.state.loading {
            return SendOutcome::Busy;
        }

        let text = self.state.input.trim().to_owned();
        let Some(model) = self.state.selected_model.clone() else {
            return SendOutcome::Ignored;
        };
        if text.is_empty() {
            return SendOutcome::Ignored;
        }

        let chat_id = match self.state.current_chat {
            Some(chat_id) => chat_id,
            None => match self.create_chat_and_select(DEFAULT_CHAT_TITLE) {
                Ok(chat_id) => chat_id,
                Err(error) => {
                    self.state.error = Some(format!("{error:#}"));
                    return SendOutcome::Failed;
                }
            },
        };

        self.state.input.clear();
        self.state.error = None;

        // Persist before dispatch: the durable log must already contain the
        // user turn the request is built from.
        let persisted = self
            .store
            .add_message(chat_id, Role::User, &text)
            .context("persist user message")
            .and_then(|_| {
                self.store
                    .messages_by_chat(chat_id)
                    .context("reload messages after send")
            });
        match persisted {
            Ok(messages) => self.state.messages = messages,
            Err(error) => {
                self.state.error = Some(format!("{error:#}"));
                return SendOutcome::Failed;
            }
        }

        self.state.loading = true;
        let request_id = self.next_request_id();
        self.in_flight_completion = Some(InFlightCompletion { request_id, chat_id });

        let history: Vec<ChatMessage> = self
            .state
            .messages
            .iter()
            .map(|message| ChatMessage::new(message.role, message.content.clone()))
            .collect();
        let api = self.api.clone();
        let temperature = self.temperature;
        let tx = tx.clone();
        thread::spawn(move || {
            let result = api
                .chat_completion(&model, &history, temperature)
                .map_err(|error| format!("{error:#}"));
            let _ = tx.send(SessionEvent::CompletionFinished { request_id, result });
        });

        SendOutcome::Sent
    }

    /// Dispatches a model-list refresh. Returns false without any network
    /// call when the credential is blank.
    pub fn refresh_models(&mut self, tx: &Sender<SessionEvent>) -> bool {
        if self.keys.get().is_none() {
            return false;
        }

        let request_id = self.next_request_id();
        self.in_flight_models = Some(request_id);

        let api = self.api.clone();
        let tx = tx.clone();
        thread::spawn(move || {
            let result = api.list_models().map_err(|error| format!("{error:#}"));
            let _ = tx.send(SessionEvent::ModelsLoaded { request_id, result });
        });
        true
    }

    /// Stages a credential edit in memory only.
    pub fn update_api_key(&mut self, key: impl Into<String>) {
        self.state.api_key = key.into();
    }

    /// Commits the staged credential to the store and the live key slot,
    /// then refreshes the model list.
    pub fn save_api_key(&mut self, tx: &Sender<SessionEvent>) -> Result<()> {
        self.store
            .put_api_key(&self.state.api_key)
            .context("persist API key")?;
        self.keys.set(&self.state.api_key);
        self.refresh_models(tx);
        Ok(())
    }

    pub fn update_theme(&mut self, mode: ThemeMode) -> Result<()> {
        self.state.theme = mode;
        self.store
            .put_theme_mode(mode)
            .context("persist theme preference")
    }

    /// Applies a background result to the session state. Stale events (a
    /// request id that is no longer in flight) are dropped. Per-call
    /// failures land in the error slot; they never unwind.
    pub fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ModelsLoaded { request_id, result } => {
                if self.in_flight_models != Some(request_id) {
                    return;
                }
                self.in_flight_models = None;

                match result {
                    Ok(models) => {
                        if self.state.selected_model.is_none()
                            && let Some(first) = models.first()
                        {
                            self.state.selected_model = Some(first.id.clone());
                        }
                        self.state.models = models;
                    }
                    // Keep the last-known-good model list.
                    Err(error) => self.state.error = Some(error),
                }
            }
            SessionEvent::CompletionFinished { request_id, result } => {
                let Some(in_flight) = self.in_flight_completion else {
                    return;
                };
                if in_flight.request_id != request_id {
                    return;
                }
                self.in_flight_completion = None;

                match result {
                    Ok(content) => {
                        // The reply belongs to the chat the request was made
                        // for, which may no longer be the selected one.
                        if let Err(error) = self.persist_assistant_reply(in_flight.chat_id, &content)
                        {
                            self.state.error = Some(format!("{error:#}"));
                        }
                    }
                    // The user message stays in history; only the error slot
                    // records that the assistant never answered.
                    Err(error) => self.state.error = Some(error),
                }
                self.state.loading = false;
            }
        }
    }

    fn persist_assistant_reply(&mut self, chat_id: ChatId, content: &str) -> Result<()> {
        self.store
            .add_message(chat_id, Role::Assistant, content)
            .context("persist assistant reply")?;
        if self.state.current_chat == Some(chat_id) {
            self.state.messages = self
                .store
                .messages_by_chat(chat_id)
                .context("reload messages after reply")?;
        }
        Ok(())
    }

    fn next_request_id(&mut self) -> u64 {
        self.next_request_id = self.next_request_id.saturating_add(1);
        if self.next_request_id == 0 {
            self.next_request_id = 1;
        }
        self.next_request_id
    }
}
