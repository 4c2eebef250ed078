//! Per-message orchestration.
//!
//! `handle` is infallible by contract: every failure path degrades to either
//! a canned reply or a logged drop, never a crash of the webhook task.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::channels::{InboundMessage, MediaSource, OutboundSender};
use crate::directive::{self, Directive};
use crate::pipeline::prompt;
use crate::provider::{Attachment, ChatRole, ChatTurn, MediaKind, ModelRequest, ModelResult, ProviderChain};
use crate::store::{ConversationStore, NAME_PENDING, Role, Turn, User, UserState};

const INTRO_MESSAGE: &str = "Jai Shree Shyam! Namaste! I am Jiva, your personal Health \
                             Guardian. Before we start, may I know your good name?";
const NAME_SAVE_FAILED: &str =
    "I had trouble saving your name. But let's continue. How can I help?";
const OVERLOAD_NOTICE: &str =
    "⚠️ Server Overload: All AI systems are busy. Emergency? Call 108 immediately.";
const SOS_ALERTED: &str = "\n\n🚨 I HAVE ALERTED YOUR EMERGENCY CONTACT. Help is on the way.";
const SOS_NO_CONTACT: &str = "\n\n⚠️ I tried to alert your family, but no emergency contact \
                              is saved! Please call 102/108 immediately.";
const SOS_ALERT_FAILED: &str = "\n\n⚠️ I could not reach your emergency contact. Please call \
                                102/108 immediately.";

pub struct Orchestrator {
    store: Arc<dyn ConversationStore>,
    chain: Arc<ProviderChain>,
    sender: Arc<dyn OutboundSender>,
    media: Arc<dyn MediaSource>,
    history_limit: usize,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        chain: Arc<ProviderChain>,
        sender: Arc<dyn OutboundSender>,
        media: Arc<dyn MediaSource>,
        history_limit: usize,
    ) -> Self {
        Self {
            store,
            chain,
            sender,
            media,
            history_limit,
        }
    }

    /// Process one inbound message end to end.
    pub async fn handle(&self, message: InboundMessage) {
        let phone = message.from.clone();

        let user = match self.store.get_user(&phone).await {
            Ok(user) => user,
            Err(e) => {
                error!(%phone, error = %e, "User lookup failed, dropping message");
                return;
            }
        };

        match UserState::of(user.as_ref()) {
            UserState::Onboarding => self.onboard(&phone).await,
            UserState::NameCapture => self.capture_name(&phone, &message).await,
            UserState::Active => {
                if let Some(user) = user {
                    self.converse(user, message).await;
                }
            }
        }
    }

    async fn onboard(&self, phone: &str) {
        info!(%phone, "First contact, onboarding");
        if let Err(e) = self.store.create_user(phone, NAME_PENDING).await {
            error!(%phone, error = %e, "Failed to create user");
            return;
        }
        self.deliver(phone, INTRO_MESSAGE).await;
    }

    async fn capture_name(&self, phone: &str, message: &InboundMessage) {
        let name = message.text.trim();
        if name.is_empty() {
            self.deliver(phone, "I didn't catch that. May I know your good name?")
                .await;
            return;
        }

        match self.store.set_user_name(phone, name).await {
            Ok(()) => {
                let confirmation = format!(
                    "Namaste {name}! I am ready to help you with your health. \
                     How are you feeling today?"
                );
                self.deliver(phone, &confirmation).await;
            }
            Err(e) => {
                error!(%phone, error = %e, "Failed to save name");
                self.deliver(phone, NAME_SAVE_FAILED).await;
            }
        }
    }

    async fn converse(&self, user: User, message: InboundMessage) {
        let phone = user.phone.clone();

        // A history read failure degrades to a contextless turn.
        let history = match self.store.recent_turns(&phone, self.history_limit).await {
            Ok(turns) => turns,
            Err(e) => {
                warn!(%phone, error = %e, "History read failed, continuing without context");
                Vec::new()
            }
        };

        let (user_text, attachment) = self.resolve_media(&message).await;

        let request = ModelRequest {
            system: prompt::system_instruction(Utc::now(), &user, history.is_empty()),
            history: history.iter().map(to_chat_turn).collect(),
            user_text: user_text.clone(),
            attachment,
        };

        let reply = match self.chain.generate(&request).await {
            ModelResult::Success { text } => text,
            ModelResult::FatalError { detail } => {
                error!(%phone, %detail, "Generation failed on every provider");
                self.deliver(&phone, OVERLOAD_NOTICE).await;
                return;
            }
            // The chain only terminates in Success or FatalError.
            other => {
                error!(%phone, ?other, "Unexpected chain result");
                self.deliver(&phone, OVERLOAD_NOTICE).await;
                return;
            }
        };

        let extraction = directive::extract(&reply);
        let mut final_reply = extraction.text;

        for d in extraction.directives {
            match d {
                Directive::ProfileUpdate(patch) => {
                    self.apply_profile_update(&phone, patch, &mut final_reply)
                        .await;
                }
                Directive::ReminderBatch(specs) => {
                    for spec in specs {
                        match self
                            .store
                            .create_reminder(&phone, spec.remind_at, &spec.message)
                            .await
                        {
                            Ok(()) => {
                                info!(%phone, remind_at = %spec.remind_at, "Reminder scheduled")
                            }
                            Err(e) => error!(%phone, error = %e, "Failed to persist reminder"),
                        }
                    }
                }
                Directive::Sos => {
                    self.raise_sos(&user, &user_text, &mut final_reply).await;
                }
            }
        }

        if let Err(e) = self.store.append_turn(&phone, Role::User, &user_text).await {
            error!(%phone, error = %e, "Failed to persist user turn");
        }
        if let Err(e) = self
            .store
            .append_turn(&phone, Role::Assistant, &final_reply)
            .await
        {
            error!(%phone, error = %e, "Failed to persist assistant turn");
        }

        self.deliver(&phone, &final_reply).await;
    }

    /// Download an attached media object and fold a system note into the
    /// user text. Any failure falls back to a text-only turn.
    async fn resolve_media(&self, message: &InboundMessage) -> (String, Option<Attachment>) {
        let mut text = message.text.clone();

        let Some(ref media) = message.media else {
            return (text, None);
        };

        let fetched = match self.media.fetch_media(&media.id).await {
            Ok(f) => f,
            Err(e) => {
                warn!(media_id = %media.id, error = %e, "Media fetch failed, using text only");
                return (text, None);
            }
        };

        let kind = if fetched.mime_type.starts_with("image") {
            MediaKind::Image
        } else if fetched.mime_type.starts_with("audio") {
            MediaKind::Audio
        } else {
            warn!(mime_type = %fetched.mime_type, "Unsupported media type, using text only");
            return (text, None);
        };

        match kind {
            MediaKind::Image => {
                text.push_str("\n[System: User uploaded a medical image/prescription]")
            }
            MediaKind::Audio => {
                text.push_str("\n[System: User sent a voice note. Listen carefully and reply.]")
            }
        }

        (
            text,
            Some(Attachment {
                kind,
                mime_type: fetched.mime_type,
                data: fetched.data,
            }),
        )
    }

    async fn apply_profile_update(
        &self,
        phone: &str,
        patch: crate::store::ProfilePatch,
        final_reply: &mut String,
    ) {
        if patch.is_empty() {
            return;
        }
        let saved_contact = patch.emergency_contact.clone();
        match self.store.update_profile(phone, &patch).await {
            Ok(()) => {
                info!(%phone, "Profile updated from directive");
                if let Some(contact) = saved_contact {
                    final_reply.push_str(&format!("\n(✅ Saved Emergency Contact: {contact})"));
                }
            }
            Err(e) => error!(%phone, error = %e, "Failed to apply profile update"),
        }
    }

    async fn raise_sos(&self, user: &User, user_text: &str, final_reply: &mut String) {
        warn!(phone = %user.phone, "SOS raised");

        let Some(ref contact) = user.emergency_contact else {
            final_reply.push_str(SOS_NO_CONTACT);
            return;
        };

        let alert = format!(
            "🚨 EMERGENCY: {} ({}) needs help! Message: '{}'",
            user.name, user.phone, user_text
        );
        match self.sender.send_text(contact, &alert).await {
            Ok(()) => final_reply.push_str(SOS_ALERTED),
            Err(e) => {
                error!(contact = %contact, error = %e, "SOS alert delivery failed");
                final_reply.push_str(SOS_ALERT_FAILED);
            }
        }
    }

    async fn deliver(&self, to: &str, body: &str) {
        if let Err(e) = self.sender.send_text(to, body).await {
            error!(%to, error = %e, "Outbound delivery failed");
        }
    }
}

fn to_chat_turn(turn: &Turn) -> ChatTurn {
    ChatTurn {
        role: match turn.role {
            Role::User => ChatRole::User,
            Role::Assistant => ChatRole::Assistant,
        },
        content: turn.content.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    use crate::channels::{FetchedMedia, InboundMedia};
    use crate::error::ChannelError;
    use crate::provider::ModelProvider;
    use crate::store::{LibSqlStore, ProfilePatch, ReminderStatus, UserState};

    struct RecordingSender {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingSender {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OutboundSender for RecordingSender {
        async fn send_text(&self, to: &str, body: &str) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push((to.into(), body.into()));
            Ok(())
        }
    }

    struct NoMedia;

    #[async_trait]
    impl MediaSource for NoMedia {
        async fn fetch_media(&self, _media_id: &str) -> Result<FetchedMedia, ChannelError> {
            Err(ChannelError::MediaFetch {
                reason: "no media in this test".into(),
            })
        }
    }

    struct JpegMedia;

    #[async_trait]
    impl MediaSource for JpegMedia {
        async fn fetch_media(&self, _media_id: &str) -> Result<FetchedMedia, ChannelError> {
            Ok(FetchedMedia {
                mime_type: "image/jpeg".into(),
                data: vec![0xFF, 0xD8],
            })
        }
    }

    /// Provider returning a fixed reply and recording requests.
    struct Scripted {
        reply: ModelResult,
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl Scripted {
        fn new(reply: ModelResult) -> Arc<Self> {
            Arc::new(Self {
                reply,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn replying(text: &str) -> Arc<Self> {
            Self::new(ModelResult::Success { text: text.into() })
        }
    }

    #[async_trait]
    impl ModelProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, request: &ModelRequest) -> ModelResult {
            self.requests.lock().unwrap().push(request.clone());
            self.reply.clone()
        }
    }

    fn chain_of(provider: Arc<Scripted>) -> Arc<ProviderChain> {
        Arc::new(ProviderChain::new(
            vec![provider as Arc<dyn ModelProvider>],
            None,
        ))
    }

    async fn orchestrator_with(
        provider: Arc<Scripted>,
    ) -> (Orchestrator, Arc<LibSqlStore>, Arc<RecordingSender>) {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let sender = RecordingSender::new();
        let orchestrator = Orchestrator::new(
            store.clone(),
            chain_of(provider),
            sender.clone(),
            Arc::new(NoMedia),
            10,
        );
        (orchestrator, store, sender)
    }

    fn text_message(from: &str, text: &str) -> InboundMessage {
        InboundMessage {
            from: from.into(),
            text: text.into(),
            media: None,
        }
    }

    const PHONE: &str = "919876543210";

    #[tokio::test]
    async fn first_contact_creates_pending_user_and_sends_intro() {
        let provider = Scripted::replying("should not be called");
        let (orchestrator, store, sender) = orchestrator_with(provider.clone()).await;

        orchestrator.handle(text_message(PHONE, "hello")).await;

        let user = store.get_user(PHONE).await.unwrap();
        assert_eq!(UserState::of(user.as_ref()), UserState::NameCapture);

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("may I know your good name"));
        // No model call during onboarding.
        assert!(provider.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_message_captures_the_name() {
        let provider = Scripted::replying("unused");
        let (orchestrator, store, sender) = orchestrator_with(provider.clone()).await;

        orchestrator.handle(text_message(PHONE, "hi")).await;
        orchestrator.handle(text_message(PHONE, "  Asha Sharma  ")).await;

        let user = store.get_user(PHONE).await.unwrap().unwrap();
        assert_eq!(user.name, "Asha Sharma");

        let sent = sender.sent();
        assert!(sent[1].1.contains("Namaste Asha Sharma"));
        assert!(provider.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_name_is_asked_again() {
        let provider = Scripted::replying("unused");
        let (orchestrator, store, sender) = orchestrator_with(provider).await;

        orchestrator.handle(text_message(PHONE, "hi")).await;
        orchestrator.handle(text_message(PHONE, "   ")).await;

        let user = store.get_user(PHONE).await.unwrap();
        assert_eq!(UserState::of(user.as_ref()), UserState::NameCapture);
        assert!(sender.sent()[1].1.contains("May I know your good name"));
    }

    async fn active_user(store: &LibSqlStore) {
        store.create_user(PHONE, "Asha").await.unwrap();
    }

    #[tokio::test]
    async fn active_turn_is_generated_persisted_and_delivered() {
        let provider = Scripted::replying("Rest and hydrate.");
        let (orchestrator, store, sender) = orchestrator_with(provider.clone()).await;
        active_user(&store).await;

        orchestrator.handle(text_message(PHONE, "I have a mild fever")).await;

        assert_eq!(
            sender.sent(),
            vec![(PHONE.to_string(), "Rest and hydrate.".to_string())]
        );

        let turns = store.recent_turns(PHONE, 10).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[0].content, "I have a mild fever");
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].content, "Rest and hydrate.");

        // The request carried the profile-aware system instruction.
        let requests = provider.requests.lock().unwrap();
        assert!(requests[0].system.contains("Name: Asha"));
        assert!(requests[0].history.is_empty());
    }

    #[tokio::test]
    async fn replay_produces_independent_turn_pairs() {
        let provider = Scripted::replying("Rest and hydrate.");
        let (orchestrator, store, sender) = orchestrator_with(provider).await;
        active_user(&store).await;

        // Same inbound message twice: no deduplication, two full pairs.
        orchestrator.handle(text_message(PHONE, "I have a mild fever")).await;
        orchestrator.handle(text_message(PHONE, "I have a mild fever")).await;

        let turns = store.recent_turns(PHONE, 10).await.unwrap();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[2].role, Role::User);
        assert_eq!(turns[3].role, Role::Assistant);
        assert_eq!(turns[0].content, turns[2].content);
        assert_ne!(turns[0].id, turns[2].id);
        assert_eq!(sender.sent().len(), 2);
    }

    #[tokio::test]
    async fn history_is_replayed_on_later_turns() {
        let provider = Scripted::replying("Good to hear.");
        let (orchestrator, store, _sender) = orchestrator_with(provider.clone()).await;
        active_user(&store).await;
        store.append_turn(PHONE, Role::User, "I had a headache").await.unwrap();
        store
            .append_turn(PHONE, Role::Assistant, "How long has it lasted?")
            .await
            .unwrap();

        orchestrator.handle(text_message(PHONE, "It's gone now")).await;

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0].history.len(), 2);
        assert_eq!(requests[0].history[0].content, "I had a headache");
        assert_eq!(requests[0].history[1].role, ChatRole::Assistant);
    }

    #[tokio::test]
    async fn profile_directive_is_applied_and_stripped() {
        let provider = Scripted::replying(
            "Noted! [[UPDATE_PROFILE: {\"age\": 42, \"emergency_contact\": \"919900112233\"}]]",
        );
        let (orchestrator, store, sender) = orchestrator_with(provider).await;
        active_user(&store).await;

        orchestrator.handle(text_message(PHONE, "I'm 42, contact my son 919900112233")).await;

        let user = store.get_user(PHONE).await.unwrap().unwrap();
        assert_eq!(user.age, Some(42));
        assert_eq!(user.emergency_contact.as_deref(), Some("919900112233"));

        let sent = sender.sent();
        assert!(!sent[0].1.contains("[[UPDATE_PROFILE"));
        assert!(sent[0].1.starts_with("Noted!"));
        assert!(sent[0].1.contains("Saved Emergency Contact: 919900112233"));
    }

    #[tokio::test]
    async fn reminder_directive_creates_pending_reminders() {
        let provider = Scripted::replying(
            "Scheduled. [[SCHEDULE_REMINDERS: [{\"message\": \"Take Metformin\", \
             \"time\": \"2025-01-01T09:00:00\"}]]]",
        );
        let (orchestrator, store, sender) = orchestrator_with(provider).await;
        active_user(&store).await;

        orchestrator.handle(text_message(PHONE, "remind me about my metformin")).await;

        let due = store
            .due_pending_reminders(Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].message, "Take Metformin");
        assert_eq!(due[0].status, ReminderStatus::Pending);

        assert_eq!(sender.sent()[0].1, "Scheduled.");
    }

    #[tokio::test]
    async fn sos_alerts_the_emergency_contact() {
        let provider = Scripted::replying("🚨 Dial 108 now. [[SOS]]");
        let (orchestrator, store, sender) = orchestrator_with(provider).await;
        active_user(&store).await;
        store
            .update_profile(
                PHONE,
                &ProfilePatch {
                    emergency_contact: Some("919900112233".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        orchestrator.handle(text_message(PHONE, "severe chest pain")).await;

        let sent = sender.sent();
        // Alert to the contact goes out before the user reply.
        assert_eq!(sent[0].0, "919900112233");
        assert!(sent[0].1.contains("EMERGENCY: Asha"));
        assert!(sent[0].1.contains("severe chest pain"));
        assert_eq!(sent[1].0, PHONE);
        assert!(sent[1].1.contains("ALERTED YOUR EMERGENCY CONTACT"));
    }

    /// Sender that rejects deliveries to one address and records the rest.
    struct ContactDownSender {
        down: String,
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl OutboundSender for ContactDownSender {
        async fn send_text(&self, to: &str, body: &str) -> Result<(), ChannelError> {
            if to == self.down {
                return Err(ChannelError::SendFailed {
                    channel: "test".into(),
                    reason: "unreachable".into(),
                });
            }
            self.sent.lock().unwrap().push((to.into(), body.into()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn sos_alert_failure_tells_user_contact_unreachable() {
        let provider = Scripted::replying("Dial 108 now. [[SOS]]");
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let sender = Arc::new(ContactDownSender {
            down: "919900112233".into(),
            sent: Mutex::new(Vec::new()),
        });
        let orchestrator = Orchestrator::new(
            store.clone(),
            chain_of(provider),
            sender.clone(),
            Arc::new(NoMedia),
            10,
        );
        active_user(&store).await;
        store
            .update_profile(
                PHONE,
                &ProfilePatch {
                    emergency_contact: Some("919900112233".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        orchestrator.handle(text_message(PHONE, "severe chest pain")).await;

        let sent = sender.sent.lock().unwrap().clone();
        // Only the user reply went out; it says the contact was unreachable,
        // not that no contact is saved.
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, PHONE);
        assert!(sent[0].1.contains("could not reach your emergency contact"));
        assert!(sent[0].1.contains("102/108"));
        assert!(!sent[0].1.contains("no emergency contact is saved"));
    }

    #[tokio::test]
    async fn sos_without_contact_warns_the_user() {
        let provider = Scripted::replying("Dial 108. [[SOS]]");
        let (orchestrator, store, sender) = orchestrator_with(provider).await;
        active_user(&store).await;

        orchestrator.handle(text_message(PHONE, "I collapsed")).await;

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("no emergency contact"));
        assert!(sent[0].1.contains("102/108"));
    }

    #[tokio::test]
    async fn total_provider_failure_sends_overload_notice_without_persisting() {
        let provider = Scripted::new(ModelResult::FatalError {
            detail: "model not found".into(),
        });
        let (orchestrator, store, sender) = orchestrator_with(provider).await;
        active_user(&store).await;

        orchestrator.handle(text_message(PHONE, "hello?")).await;

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("Call 108"));
        // The failed exchange is not recorded as history.
        assert!(store.recent_turns(PHONE, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn image_attachment_reaches_the_provider_with_a_system_note() {
        let provider = Scripted::replying("That is a prescription for Metformin.");
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let sender = RecordingSender::new();
        let orchestrator = Orchestrator::new(
            store.clone(),
            chain_of(provider.clone()),
            sender.clone(),
            Arc::new(JpegMedia),
            10,
        );
        active_user(&store).await;

        orchestrator
            .handle(InboundMessage {
                from: PHONE.into(),
                text: "what is this?".into(),
                media: Some(InboundMedia {
                    kind: MediaKind::Image,
                    id: "MEDIA1".into(),
                }),
            })
            .await;

        let requests = provider.requests.lock().unwrap();
        let attachment = requests[0].attachment.as_ref().unwrap();
        assert_eq!(attachment.kind, MediaKind::Image);
        assert_eq!(attachment.mime_type, "image/jpeg");
        assert!(requests[0].user_text.contains("what is this?"));
        assert!(requests[0].user_text.contains("medical image/prescription"));
    }

    #[tokio::test]
    async fn failed_media_fetch_degrades_to_text_only() {
        let provider = Scripted::replying("Tell me more.");
        let (orchestrator, store, sender) = orchestrator_with(provider.clone()).await;
        active_user(&store).await;

        orchestrator
            .handle(InboundMessage {
                from: PHONE.into(),
                text: "see this rash".into(),
                media: Some(InboundMedia {
                    kind: MediaKind::Image,
                    id: "GONE".into(),
                }),
            })
            .await;

        let requests = provider.requests.lock().unwrap();
        assert!(requests[0].attachment.is_none());
        assert_eq!(requests[0].user_text, "see this rash");
        assert_eq!(sender.sent().len(), 1);
    }
}
