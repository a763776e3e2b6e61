//! # Turn Orchestrator
//!
//! Drives one conversational turn end-to-end:
//!
//! 1. **Transcribe** the uploaded audio. Nothing heard → return the fallback reply
//!    without touching history or calling anything else.
//! 2. **Append** the user's turn to the session history.
//! 3. **Render** the (bounded) history as a `User:`/`Bot:` prompt.
//! 4. **Query** the language model. Failure → the fallback phrase becomes the reply.
//! 5. **Append** the bot's turn, fallback or not.
//! 6. **Synthesize** the reply. Failure → `audio_url` is `null`.
//!
//! Service failures arrive as `ServiceResult`s and are only turned into
//! fallback values here, at the boundary. `handle_turn` itself cannot fail.

use crate::agent::history::{render_prompt, Turn};
use crate::agent::session::SessionStore;
use crate::agent::{AgentChatResponse, TtsResponse, FALLBACK_REPLY};
use crate::config::AppConfig;
use crate::services::{with_deadline, ServiceAdapters, ServiceResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub struct TurnOrchestrator {
    services: ServiceAdapters,
    store: Arc<SessionStore>,
    call_timeout: Duration,
    /// Transcription spans several requests, so it gets its own deadline
    stt_timeout: Duration,
    max_prompt_turns: usize,
    chat_style: String,
}

impl TurnOrchestrator {
    pub fn new(services: ServiceAdapters, store: Arc<SessionStore>, config: &AppConfig) -> Self {
        Self {
            services,
            store,
            call_timeout: config.request_timeout(),
            stt_timeout: config.stt_timeout(),
            max_prompt_turns: config.sessions.max_prompt_turns,
            chat_style: config.agent.chat_style.clone(),
        }
    }

    /// Run one full conversational turn for `session_id`.
    pub async fn handle_turn(&self, session_id: &str, audio: &[u8]) -> AgentChatResponse {
        let started = Instant::now();

        let transcript = match self.transcribe(audio).await {
            Ok(text) => text,
            Err(()) => {
                info!(session_id = %session_id, "No usable speech in turn, answering with fallback");
                return AgentChatResponse::unheard();
            }
        };

        let bot_text = {
            let session = self.store.get_or_create(session_id).await;
            // Held until the bot turn is recorded so concurrent turns stay ordered
            let mut history = session.lock().await;
            history.push(Turn::user(transcript.clone()));

            let prompt = render_prompt(&history, self.max_prompt_turns);
            let reply = self.query(&prompt).await.unwrap_or_else(|()| FALLBACK_REPLY.to_string());

            history.push(Turn::bot(reply.clone()));
            reply
        };
        // Idle time counts from the end of the turn, not its start
        self.store.touch(session_id).await;

        let audio_url = self.synthesize(&bot_text, &self.chat_style).await.ok();

        info!(
            session_id = %session_id,
            transcript_chars = transcript.len(),
            reply_chars = bot_text.len(),
            has_audio = audio_url.is_some(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Turn completed"
        );

        AgentChatResponse {
            user_transcript: Some(transcript),
            bot_text,
            audio_url,
        }
    }

    /// Speech synthesis on its own. `None` when synthesis fails.
    pub async fn synthesize_only(&self, text: &str, style: &str) -> Option<String> {
        self.synthesize(text, style).await.ok()
    }

    /// Language model on its own. The fallback phrase when the query fails.
    pub async fn query_only(&self, text: &str) -> String {
        self.query(text).await.unwrap_or_else(|()| FALLBACK_REPLY.to_string())
    }

    /// Transcription on its own. `None` when nothing usable was heard.
    pub async fn transcribe_only(&self, audio: &[u8]) -> Option<String> {
        self.transcribe(audio).await.ok()
    }

    /// Repeat the user's words back in the synthesized voice.
    pub async fn echo(&self, audio: &[u8], style: &str) -> TtsResponse {
        let Ok(transcript) = self.transcribe(audio).await else {
            return TtsResponse::default();
        };

        TtsResponse {
            audio_url: self.synthesize(&transcript, style).await.ok(),
            bot_text: Some(transcript),
        }
    }

    // Each helper logs the typed failure once and hands back `Err(())`; callers
    // only decide which fallback value to use.

    async fn transcribe(&self, audio: &[u8]) -> Result<String, ()> {
        let result = with_deadline(self.stt_timeout, self.services.transcriber.transcribe(audio)).await;
        match Self::logged("transcribe", result) {
            Ok(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            Ok(_) => {
                warn!(stage = "transcribe", "Transcriber returned blank text");
                Err(())
            }
            Err(()) => Err(()),
        }
    }

    async fn query(&self, prompt: &str) -> Result<String, ()> {
        let result = with_deadline(self.call_timeout, self.services.language_model.query(prompt)).await;
        Self::logged("query", result)
    }

    async fn synthesize(&self, text: &str, style: &str) -> Result<String, ()> {
        let result = with_deadline(self.call_timeout, self.services.synthesizer.synthesize(text, style)).await;
        Self::logged("synthesize", result)
    }

    fn logged<T>(stage: &'static str, result: ServiceResult<T>) -> Result<T, ()> {
        result.map_err(|err| {
            warn!(stage, error = %err, "Service call failed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{LanguageModel, ServiceError, SpeechSynthesizer, Transcriber};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Transcriber that always returns the same outcome.
    struct FixedTranscriber(Option<&'static str>);

    #[async_trait]
    impl Transcriber for FixedTranscriber {
        async fn transcribe(&self, _audio: &[u8]) -> ServiceResult<String> {
            match self.0 {
                Some(text) => Ok(text.to_string()),
                None => Err(ServiceError::Network("connection refused".to_string())),
            }
        }
    }

    /// Language model that records every prompt and replies with a canned answer.
    #[derive(Default)]
    struct RecordingModel {
        prompts: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl LanguageModel for RecordingModel {
        async fn query(&self, prompt: &str) -> ServiceResult<String> {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            if self.fail {
                return Err(ServiceError::Status { status: 503, body: "overloaded".to_string() });
            }
            Ok(format!("reply {}", prompts.len()))
        }
    }

    /// Synthesizer that records what it was asked to say.
    #[derive(Default)]
    struct RecordingSynth {
        calls: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl SpeechSynthesizer for RecordingSynth {
        async fn synthesize(&self, text: &str, style: &str) -> ServiceResult<String> {
            self.calls.lock().unwrap().push((text.to_string(), style.to_string()));
            if self.fail {
                return Err(ServiceError::Malformed("no audioFile".to_string()));
            }
            Ok(format!("https://audio.test/{}.mp3", text.len()))
        }
    }

    struct SlowModel;

    #[async_trait]
    impl LanguageModel for SlowModel {
        async fn query(&self, _prompt: &str) -> ServiceResult<String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("too late".to_string())
        }
    }

    /// Transcriber that takes a while before answering.
    struct SlowTranscriber(Duration);

    #[async_trait]
    impl Transcriber for SlowTranscriber {
        async fn transcribe(&self, _audio: &[u8]) -> ServiceResult<String> {
            tokio::time::sleep(self.0).await;
            Ok("worth the wait".to_string())
        }
    }

    /// Records prompts like `RecordingModel`, but only answers after a delay.
    struct PausingModel {
        prompts: Mutex<Vec<String>>,
        delay: Duration,
    }

    #[async_trait]
    impl LanguageModel for PausingModel {
        async fn query(&self, prompt: &str) -> ServiceResult<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            tokio::time::sleep(self.delay).await;
            Ok("considered reply".to_string())
        }
    }

    struct Harness {
        orchestrator: TurnOrchestrator,
        store: Arc<SessionStore>,
        model: Arc<RecordingModel>,
        synth: Arc<RecordingSynth>,
    }

    fn harness(transcript: Option<&'static str>, model: RecordingModel, synth: RecordingSynth) -> Harness {
        let model = Arc::new(model);
        let synth = Arc::new(synth);
        let store = Arc::new(SessionStore::new(100, Duration::from_secs(3600)));
        let services = ServiceAdapters {
            transcriber: Arc::new(FixedTranscriber(transcript)),
            language_model: model.clone(),
            synthesizer: synth.clone(),
        };
        let orchestrator = TurnOrchestrator::new(services, store.clone(), &AppConfig::default());
        Harness { orchestrator, store, model, synth }
    }

    #[tokio::test]
    async fn test_successful_turn_appends_user_then_bot() {
        let h = harness(Some("hello there"), RecordingModel::default(), RecordingSynth::default());

        let response = h.orchestrator.handle_turn("s1", b"audio").await;

        assert_eq!(response.user_transcript.as_deref(), Some("hello there"));
        assert_eq!(response.bot_text, "reply 1");
        assert!(response.audio_url.is_some());
        assert_eq!(
            h.store.snapshot("s1").await.unwrap(),
            vec![Turn::user("hello there"), Turn::bot("reply 1")]
        );
        assert_eq!(
            h.synth.calls.lock().unwrap().as_slice(),
            &[("reply 1".to_string(), "Conversational".to_string())]
        );
    }

    #[tokio::test]
    async fn test_empty_transcript_short_circuits() {
        let h = harness(Some("   "), RecordingModel::default(), RecordingSynth::default());
        h.store.get_or_create("s1").await.lock().await.push(Turn::user("earlier"));
        let before = h.store.history_len("s1").await;

        let response = h.orchestrator.handle_turn("s1", b"silence").await;

        assert_eq!(response, AgentChatResponse::unheard());
        assert_eq!(h.store.history_len("s1").await, before);
        assert!(h.model.prompts.lock().unwrap().is_empty());
        assert!(h.synth.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transcriber_failure_short_circuits() {
        let h = harness(None, RecordingModel::default(), RecordingSynth::default());

        let response = h.orchestrator.handle_turn("s1", b"audio").await;

        assert_eq!(response.user_transcript, None);
        assert_eq!(response.bot_text, FALLBACK_REPLY);
        assert_eq!(response.audio_url, None);
        assert!(h.store.snapshot("s1").await.is_none());
    }

    #[tokio::test]
    async fn test_second_prompt_contains_prior_turns_in_order() {
        let h = harness(Some("tell me more"), RecordingModel::default(), RecordingSynth::default());

        h.orchestrator.handle_turn("s1", b"one").await;
        h.orchestrator.handle_turn("s1", b"two").await;

        let prompts = h.model.prompts.lock().unwrap();
        assert_eq!(prompts[0], "User: tell me more");
        assert_eq!(prompts[1], "User: tell me more\nBot: reply 1\nUser: tell me more");
    }

    #[tokio::test]
    async fn test_model_failure_records_fallback_and_still_synthesizes() {
        let model = RecordingModel { fail: true, ..Default::default() };
        let h = harness(Some("are you there?"), model, RecordingSynth::default());

        let response = h.orchestrator.handle_turn("s1", b"audio").await;

        assert_eq!(response.bot_text, FALLBACK_REPLY);
        assert_eq!(response.audio_url, Some(format!("https://audio.test/{}.mp3", FALLBACK_REPLY.len())));
        assert_eq!(
            h.store.snapshot("s1").await.unwrap(),
            vec![Turn::user("are you there?"), Turn::bot(FALLBACK_REPLY)]
        );
        assert_eq!(h.synth.calls.lock().unwrap()[0].0, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_synthesis_failure_keeps_text_reply() {
        let synth = RecordingSynth { fail: true, ..Default::default() };
        let h = harness(Some("hi"), RecordingModel::default(), synth);

        let response = h.orchestrator.handle_turn("s1", b"audio").await;

        // Callers cannot tell a lost reply audio from any other degradation
        assert_eq!(response.user_transcript.as_deref(), Some("hi"));
        assert_eq!(response.bot_text, "reply 1");
        assert_eq!(response.audio_url, None);
        assert_eq!(h.store.history_len("s1").await, 2);
    }

    #[tokio::test]
    async fn test_prompt_is_bounded_to_recent_turns() {
        let mut config = AppConfig::default();
        config.sessions.max_prompt_turns = 3;
        let model = Arc::new(RecordingModel::default());
        let store = Arc::new(SessionStore::new(100, Duration::from_secs(3600)));
        let services = ServiceAdapters {
            transcriber: Arc::new(FixedTranscriber(Some("again"))),
            language_model: model.clone(),
            synthesizer: Arc::new(RecordingSynth::default()),
        };
        let orchestrator = TurnOrchestrator::new(services, store.clone(), &config);

        orchestrator.handle_turn("s1", b"1").await;
        orchestrator.handle_turn("s1", b"2").await;
        orchestrator.handle_turn("s1", b"3").await;

        assert_eq!(store.history_len("s1").await, 6);
        assert_eq!(
            model.prompts.lock().unwrap()[2],
            "User: again\nBot: reply 2\nUser: again"
        );
    }

    #[tokio::test]
    async fn test_concurrent_turns_for_one_session_do_not_interleave() {
        let h = Arc::new(harness(Some("ping"), RecordingModel::default(), RecordingSynth::default()));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let h = h.clone();
            tasks.push(tokio::spawn(async move { h.orchestrator.handle_turn("shared", b"a").await }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let history = h.store.snapshot("shared").await.unwrap();
        assert_eq!(history.len(), 16);
        for pair in history.chunks(2) {
            assert_eq!(pair[0].role, crate::agent::history::Role::User);
            assert_eq!(pair[1].role, crate::agent::history::Role::Bot);
        }
    }

    #[tokio::test]
    async fn test_slow_model_hits_deadline_and_falls_back() {
        let mut config = AppConfig::default();
        config.services.request_timeout_secs = 1;
        let store = Arc::new(SessionStore::new(100, Duration::from_secs(3600)));
        let services = ServiceAdapters {
            transcriber: Arc::new(FixedTranscriber(Some("hello"))),
            language_model: Arc::new(SlowModel),
            synthesizer: Arc::new(RecordingSynth::default()),
        };
        let orchestrator = TurnOrchestrator::new(services, store, &config);

        assert_eq!(orchestrator.query_only("hello").await, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_transcription_deadline_is_separate_from_call_deadline() {
        let mut config = AppConfig::default();
        config.services.request_timeout_secs = 1;
        config.services.stt_timeout_secs = 5;
        let store = Arc::new(SessionStore::new(100, Duration::from_secs(3600)));
        let services = ServiceAdapters {
            transcriber: Arc::new(SlowTranscriber(Duration::from_millis(1500))),
            language_model: Arc::new(RecordingModel::default()),
            synthesizer: Arc::new(RecordingSynth::default()),
        };
        let orchestrator = TurnOrchestrator::new(services, store, &config);

        assert_eq!(orchestrator.transcribe_only(b"x").await.as_deref(), Some("worth the wait"));

        config.services.stt_timeout_secs = 1;
        let services = ServiceAdapters {
            transcriber: Arc::new(SlowTranscriber(Duration::from_millis(1500))),
            language_model: Arc::new(RecordingModel::default()),
            synthesizer: Arc::new(RecordingSynth::default()),
        };
        let store = Arc::new(SessionStore::new(100, Duration::from_secs(3600)));
        let orchestrator = TurnOrchestrator::new(services, store, &config);
        assert_eq!(orchestrator.transcribe_only(b"x").await, None);
    }

    #[tokio::test]
    async fn test_full_store_keeps_session_with_turn_in_flight() {
        let model = Arc::new(PausingModel { prompts: Mutex::new(Vec::new()), delay: Duration::from_millis(200) });
        let store = Arc::new(SessionStore::new(1, Duration::from_secs(3600)));
        let services = ServiceAdapters {
            transcriber: Arc::new(FixedTranscriber(Some("hello"))),
            language_model: model.clone(),
            synthesizer: Arc::new(RecordingSynth::default()),
        };
        let orchestrator = Arc::new(TurnOrchestrator::new(services, store.clone(), &AppConfig::default()));

        let first = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.handle_turn("a", b"first").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Another caller fills the store while "a" is waiting on the model
        orchestrator.handle_turn("b", b"other").await;
        orchestrator.handle_turn("a", b"second").await;
        first.await.unwrap();

        assert_eq!(store.history_len("a").await, 4);
        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.last().unwrap().lines().count(), 3);
    }

    #[tokio::test]
    async fn test_single_shot_operations_leave_history_alone() {
        let h = harness(Some("say this"), RecordingModel::default(), RecordingSynth::default());

        assert_eq!(h.orchestrator.query_only("question").await, "reply 1");
        assert!(h.orchestrator.synthesize_only("words", "Promo").await.is_some());
        assert_eq!(h.orchestrator.transcribe_only(b"x").await.as_deref(), Some("say this"));

        let echo = h.orchestrator.echo(b"x", "Conversational").await;
        assert_eq!(echo.bot_text.as_deref(), Some("say this"));
        assert!(echo.audio_url.is_some());

        assert_eq!(h.store.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_echo_with_nothing_heard_is_empty() {
        let h = harness(None, RecordingModel::default(), RecordingSynth::default());
        assert_eq!(h.orchestrator.echo(b"x", "Conversational").await, TtsResponse::default());
        assert!(h.synth.calls.lock().unwrap().is_empty());
    }
}
