//! In-memory collaborators for driving chat turns in tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream;
use slack_gpt_relay::cancel::CancelRegistry;
use slack_gpt_relay::completion::{
    ChunkStream, CompletionError, CompletionProvider, FallbackCompletion,
};
use slack_gpt_relay::config::ChatConfig;
use slack_gpt_relay::conversation::{ChatMessage, TokenBudgeter, WordBasedEstimator};
use slack_gpt_relay::surface::{
    HistoryMessage, HistorySource, MessageHandle, MessageSurface, SurfaceError,
};
use slack_gpt_relay::Chat;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BOT: &str = "UBOT";
pub const CHANNEL: &str = "C1";
pub const THREAD_TS: &str = "1.0";
pub const OUTPUT_TS: &str = "2.0";
pub const CONTROLLER_TS: &str = "2.1";
pub const ERROR_MESSAGE: &str = "API error, try again later.";

/// Everything the surface was asked to do, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Placeholder { thread_ts: String, text: String },
    TakeOver { output_ts: String, controller_ts: String },
    Update { ts: String, text: String, partial: bool },
    Regenerate { ts: String, text: String },
    Delete { ts: String },
}

#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<Call>>>);

impl Recorder {
    pub fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    /// Text of every update, with its partial flag
    pub fn updates(&self) -> Vec<(String, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Update { text, partial, .. } => Some((text, partial)),
                _ => None,
            })
            .collect()
    }

    pub fn final_updates(&self) -> Vec<String> {
        self.updates()
            .into_iter()
            .filter(|(_, partial)| !partial)
            .map(|(text, _)| text)
            .collect()
    }

    pub fn has_partial(&self, text: &str) -> bool {
        self.updates().iter().any(|(t, partial)| *partial && t == text)
    }
}

pub struct MockSurface {
    pub recorder: Recorder,
    pub fail_partial_updates: Arc<AtomicBool>,
}

impl MockSurface {
    pub fn new(recorder: Recorder) -> Self {
        Self {
            recorder,
            fail_partial_updates: Arc::new(AtomicBool::new(false)),
        }
    }

    fn handle(&self, ts: &str) -> Box<dyn MessageHandle> {
        Box::new(MockHandle {
            ts: ts.to_string(),
            recorder: self.recorder.clone(),
            fail_partial_updates: self.fail_partial_updates.clone(),
        })
    }
}

#[async_trait]
impl MessageSurface for MockSurface {
    async fn create_placeholder(
        &self,
        _channel: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<Box<dyn MessageHandle>, SurfaceError> {
        self.recorder.push(Call::Placeholder {
            thread_ts: thread_ts.to_string(),
            text: text.to_string(),
        });
        Ok(self.handle(OUTPUT_TS))
    }

    async fn take_over(
        &self,
        _channel: &str,
        output_ts: &str,
        controller_ts: &str,
    ) -> Result<Box<dyn MessageHandle>, SurfaceError> {
        self.recorder.push(Call::TakeOver {
            output_ts: output_ts.to_string(),
            controller_ts: controller_ts.to_string(),
        });
        Ok(self.handle(output_ts))
    }
}

pub struct MockHandle {
    ts: String,
    recorder: Recorder,
    fail_partial_updates: Arc<AtomicBool>,
}

#[async_trait]
impl MessageHandle for MockHandle {
    async fn update(&self, text: &str, is_partial: bool) -> Result<(), SurfaceError> {
        self.recorder.push(Call::Update {
            ts: self.ts.clone(),
            text: text.to_string(),
            partial: is_partial,
        });
        if is_partial && self.fail_partial_updates.load(Ordering::SeqCst) {
            return Err(SurfaceError::Platform("chat.update: ratelimited".into()));
        }
        Ok(())
    }

    async fn regenerate(&self, text: &str) -> Result<(), SurfaceError> {
        self.recorder.push(Call::Regenerate {
            ts: self.ts.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete(&self) -> Result<(), SurfaceError> {
        self.recorder.push(Call::Delete { ts: self.ts.clone() });
        Ok(())
    }

    fn identifier(&self) -> &str {
        &self.ts
    }
}

pub struct MockHistory {
    pub replies: Vec<HistoryMessage>,
    pub directive: String,
    pub fail_replies: bool,
    pub fail_directive: bool,
}

impl MockHistory {
    pub fn new(replies: Vec<HistoryMessage>) -> Self {
        Self {
            replies,
            directive: String::new(),
            fail_replies: false,
            fail_directive: false,
        }
    }
}

#[async_trait]
impl HistorySource for MockHistory {
    async fn load_replies(
        &self,
        _channel: &str,
        _thread_ts: &str,
    ) -> Result<Vec<HistoryMessage>, SurfaceError> {
        if self.fail_replies {
            return Err(SurfaceError::Platform("conversations.replies: channel_not_found".into()));
        }
        Ok(self.replies.clone())
    }

    async fn load_directive(&self, _channel: &str) -> Result<String, SurfaceError> {
        if self.fail_directive {
            return Err(SurfaceError::Platform("conversations.info: missing_scope".into()));
        }
        Ok(self.directive.clone())
    }
}

pub fn reply(user: &str, text: &str, ts: &str) -> HistoryMessage {
    HistoryMessage {
        user: user.to_string(),
        username: None,
        text: text.to_string(),
        ts: ts.to_string(),
        is_controller: false,
    }
}

/// A thread with one user question and the bot's placeholder after it
pub fn thread(question: &str) -> Vec<HistoryMessage> {
    let mut controller = reply(BOT, "", CONTROLLER_TS);
    controller.is_controller = true;
    vec![reply("U1", question, THREAD_TS), reply(BOT, "...", OUTPUT_TS), controller]
}

/// One element of a scripted completion stream
#[derive(Debug, Clone)]
pub enum Step {
    Chunk(&'static str),
    Delay(Duration),
    Fail(&'static str),
    /// Never yields again
    Hang,
}

/// Behaviour of one `open_stream` call
#[derive(Debug, Clone)]
pub enum Script {
    OpenFails(&'static str),
    Stream(Vec<Step>),
}

/// Provider replaying scripts in order, one per `open_stream` call
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    pub requests: Mutex<Vec<(String, Vec<ChatMessage>)>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn models(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn last_messages(&self) -> Vec<ChatMessage> {
        self.requests
            .lock()
            .unwrap()
            .last()
            .map(|(_, m)| m.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn open_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChunkStream, CompletionError> {
        self.requests
            .lock()
            .unwrap()
            .push((model.to_string(), messages.to_vec()));

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::OpenFails("no script left"));

        match script {
            Script::OpenFails(msg) => Err(CompletionError::UpstreamError(msg.to_string())),
            Script::Stream(steps) => Ok(Box::pin(stream::unfold(
                steps.into_iter(),
                |mut steps| async move {
                    loop {
                        match steps.next()? {
                            Step::Chunk(text) => return Some((Ok(text.to_string()), steps)),
                            Step::Delay(d) => tokio::time::sleep(d).await,
                            Step::Fail(msg) => {
                                let err = CompletionError::Stream(msg.to_string());
                                return Some((Err(err), steps));
                            }
                            Step::Hang => futures::future::pending::<()>().await,
                        }
                    }
                },
            ))),
        }
    }
}

pub struct Harness {
    pub chat: Arc<Chat>,
    pub recorder: Recorder,
    pub provider: Arc<ScriptedProvider>,
    pub registry: Arc<CancelRegistry>,
    pub fail_partial_updates: Arc<AtomicBool>,
}

pub fn chat_config() -> ChatConfig {
    let mut config = ChatConfig::new(BOT);
    config.system_prompt = "{{custom_instructions}}".to_string();
    config.update_interval = Duration::from_secs(3);
    config.error_message = ERROR_MESSAGE.to_string();
    config
}

pub fn harness(history: MockHistory, scripts: Vec<Script>) -> Harness {
    harness_with_budget(history, scripts, 100_000)
}

pub fn harness_with_budget(
    history: MockHistory,
    scripts: Vec<Script>,
    max_tokens: usize,
) -> Harness {
    let recorder = Recorder::default();
    let surface = MockSurface::new(recorder.clone());
    let fail_partial_updates = surface.fail_partial_updates.clone();
    let provider = Arc::new(ScriptedProvider::new(scripts));
    let registry = Arc::new(CancelRegistry::new());

    let chat = Chat::new(
        Arc::new(surface),
        Arc::new(history),
        FallbackCompletion::new(provider.clone(), "gpt-4-turbo", "gpt-4"),
        TokenBudgeter::new(Arc::new(WordBasedEstimator::new(1.0)), max_tokens),
        registry.clone(),
        chat_config(),
    );

    Harness {
        chat: Arc::new(chat),
        recorder,
        provider,
        registry,
        fail_partial_updates,
    }
}

/// Poll `condition`, letting (possibly paused) time move forward
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
