//! Thread routing, quota enforcement and the model round trip.
//!
//! Handlers only talk to [`ConversationService`]; it owns the order of
//! operations (store the user turn, check budget, call the model, store the
//! answer, charge tokens).

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    domain::{ChatMessage, Role, ThreadId, UserId},
    formatting::format_answer,
    model::{ChatModel, ChatRequest},
    quota::{estimate_text_tokens, estimate_tokens, QuotaCheck, QuotaLedger},
    store::{Store, ThreadSummary},
    Result,
};

pub const CHAT_SYSTEM_PROMPT: &str = "You are a smart assistant. Answer like ChatGPT Plus: \
complete and to the point, keep Markdown formatting, use lists, emoji, links and code blocks. \
IMPORTANT: do not use # headers. Make every header plain bold (**Header**).";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyOutcome {
    Answered {
        thread: ThreadId,
        /// Post-processed Markdown answer (no `#` headers).
        text: String,
        /// Tokens charged for this turn.
        tokens: u64,
    },
    QuotaExceeded(QuotaCheck),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadListing {
    pub active: Option<ThreadId>,
    /// Most recently updated first.
    pub threads: Vec<ThreadSummary>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Profile {
    pub model: String,
    pub daily_limit: u64,
    pub used_today: u64,
}

/// Extracted file text routed through the model.
#[derive(Clone, Debug)]
pub struct IngestRequest {
    /// Stored as the user turn; drives the quota estimate.
    pub history_text: String,
    /// The only user content the model sees.
    pub model_input: String,
    pub system_prompt: String,
    /// Tokens already spent upstream (vision OCR), charged with the answer.
    pub extra_tokens: u64,
}

#[derive(Clone)]
pub struct ConversationService {
    store: Store,
    quota: QuotaLedger,
    model: Arc<dyn ChatModel>,
    history_limit: Option<u32>,
}

impl ConversationService {
    pub fn new(
        store: Store,
        model: Arc<dyn ChatModel>,
        daily_limit: u64,
        history_limit: Option<u32>,
    ) -> Self {
        Self {
            quota: QuotaLedger::new(store.clone(), daily_limit),
            store,
            model,
            history_limit,
        }
    }

    pub fn model(&self) -> &Arc<dyn ChatModel> {
        &self.model
    }

    pub async fn ensure_active_thread(&self, user: UserId) -> Result<ThreadId> {
        if let Some(thread) = self.store.active_thread(user).await? {
            return Ok(thread);
        }
        let thread = self.store.create_thread(user).await?;
        info!(user_id = user.0, thread_id = thread.0, "Created initial thread");
        Ok(thread)
    }

    pub async fn new_thread(&self, user: UserId) -> Result<ThreadId> {
        let thread = self.store.create_thread(user).await?;
        info!(user_id = user.0, thread_id = thread.0, "Created thread");
        Ok(thread)
    }

    pub async fn list_threads(&self, user: UserId) -> Result<ThreadListing> {
        let threads = self.store.list_threads(user).await?;
        let active = if threads.is_empty() {
            None
        } else {
            self.store.active_thread(user).await?
        };
        Ok(ThreadListing { active, threads })
    }

    /// Make `thread` active. Returns false (and changes nothing) if the user has no such thread.
    pub async fn switch_thread(&self, user: UserId, thread: ThreadId) -> Result<bool> {
        if !self.store.thread_exists(user, thread).await? {
            return Ok(false);
        }
        self.store.set_active(user, thread).await?;
        info!(user_id = user.0, thread_id = thread.0, "Switched thread");
        Ok(true)
    }

    pub async fn profile(&self, user: UserId) -> Result<Profile> {
        Ok(Profile {
            model: self.model.model_name().to_string(),
            daily_limit: self.quota.daily_limit(),
            used_today: self.quota.used_today(user).await?,
        })
    }

    /// One chat turn in the active thread.
    pub async fn ask(&self, user: UserId, text: &str) -> Result<ReplyOutcome> {
        let thread = self.ensure_active_thread(user).await?;

        let mut turns = self.store.history(user, thread, self.history_limit).await?;
        turns.push(ChatMessage::user(text));
        if let Some(limit) = self.history_limit {
            let excess = turns.len().saturating_sub(limit as usize);
            turns.drain(..excess);
        }

        // The turn is kept even when the budget check below rejects it.
        self.store
            .append_message(user, thread, Role::User, text)
            .await?;

        let estimate = estimate_tokens(&turns);
        let check = self.quota.check(user, estimate).await?;
        if !check.allowed() {
            warn!(user_id = user.0, used = check.used, requested = check.requested, limit = check.limit, "Daily quota exceeded");
            return Ok(ReplyOutcome::QuotaExceeded(check));
        }

        let completion = self
            .model
            .complete(ChatRequest::with_system(CHAT_SYSTEM_PROMPT, turns))
            .await?;
        let answer = format_answer(&completion.text);

        self.store
            .append_message(user, thread, Role::Assistant, &answer)
            .await?;
        let tokens = completion.total_tokens.unwrap_or(estimate);
        self.quota.charge(user, tokens).await?;

        info!(user_id = user.0, thread_id = thread.0, tokens, estimate, "Answered");
        Ok(ReplyOutcome::Answered {
            thread,
            text: answer,
            tokens,
        })
    }

    /// Route extracted file text through the model without the thread history.
    pub async fn ingest(&self, user: UserId, req: IngestRequest) -> Result<ReplyOutcome> {
        let thread = self.ensure_active_thread(user).await?;

        self.store
            .append_message(user, thread, Role::User, &req.history_text)
            .await?;

        let estimate = estimate_text_tokens(&req.history_text);
        let check = self
            .quota
            .check(user, estimate.saturating_add(req.extra_tokens))
            .await?;
        if !check.allowed() {
            warn!(user_id = user.0, used = check.used, requested = check.requested, limit = check.limit, "Daily quota exceeded");
            return Ok(ReplyOutcome::QuotaExceeded(check));
        }

        let completion = self
            .model
            .complete(ChatRequest::with_system(
                &req.system_prompt,
                vec![ChatMessage::user(req.model_input)],
            ))
            .await?;
        let answer = format_answer(&completion.text);

        self.store
            .append_message(user, thread, Role::Assistant, &answer)
            .await?;
        // OCR tokens are only billed together with a successful answer.
        let tokens = completion
            .total_tokens
            .unwrap_or(estimate)
            .saturating_add(req.extra_tokens);
        self.quota.charge(user, tokens).await?;

        info!(user_id = user.0, thread_id = thread.0, tokens, "Answered file");
        Ok(ReplyOutcome::Answered {
            thread,
            text: answer,
            tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::Error, model::Completion};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeModel {
        reply: String,
        total_tokens: Option<u64>,
        fail: bool,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl FakeModel {
        fn replying(reply: &str, total_tokens: Option<u64>) -> Self {
            Self {
                reply: reply.to_string(),
                total_tokens,
                ..Default::default()
            }
        }

        fn last_request(&self) -> ChatRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl ChatModel for FakeModel {
        fn model_name(&self) -> &str {
            "fake-model"
        }

        async fn complete(&self, req: ChatRequest) -> Result<Completion> {
            self.requests.lock().unwrap().push(req);
            if self.fail {
                return Err(Error::External("boom".to_string()));
            }
            Ok(Completion {
                text: self.reply.clone(),
                total_tokens: self.total_tokens,
            })
        }

        async fn extract_image_text(&self, _image: &[u8], _mime: &str) -> Result<Completion> {
            Ok(Completion::default())
        }
    }

    async fn service(model: FakeModel, limit: u64) -> (ConversationService, Store, Arc<FakeModel>) {
        let store = Store::open_in_memory().await.unwrap();
        let model = Arc::new(model);
        let svc = ConversationService::new(store.clone(), model.clone(), limit, None);
        (svc, store, model)
    }

    const U: UserId = UserId(42);

    #[tokio::test]
    async fn ask_stores_both_turns_and_charges_usage() {
        let (svc, store, model) = service(FakeModel::replying("# Hi\nthere", Some(30)), 1000).await;

        let out = svc.ask(U, "hello").await.unwrap();
        assert_eq!(
            out,
            ReplyOutcome::Answered {
                thread: ThreadId(1),
                text: "**Hi**\nthere".to_string(),
                tokens: 30,
            }
        );

        let hist = store.history(U, ThreadId(1), None).await.unwrap();
        assert_eq!(hist.len(), 2);
        assert_eq!(hist[0], ChatMessage::user("hello"));
        assert_eq!(hist[1].role, Role::Assistant);
        assert_eq!(hist[1].content, "**Hi**\nthere");

        let req = model.last_request();
        assert_eq!(req.messages[0].role, Role::System);
        assert_eq!(req.messages[1], ChatMessage::user("hello"));
        assert_eq!(svc.profile(U).await.unwrap().used_today, 30);
    }

    #[tokio::test]
    async fn ask_falls_back_to_estimate_without_usage() {
        let (svc, _store, _model) = service(FakeModel::replying("ok", None), 1000).await;
        let out = svc.ask(U, &"x".repeat(40)).await.unwrap();
        assert!(matches!(out, ReplyOutcome::Answered { tokens: 10, .. }));
    }

    #[tokio::test]
    async fn ask_over_budget_keeps_message_without_calling_model() {
        let (svc, store, model) = service(FakeModel::replying("ok", Some(1)), 5).await;

        let out = svc.ask(U, &"x".repeat(40)).await.unwrap();
        match out {
            ReplyOutcome::QuotaExceeded(check) => {
                assert_eq!(check.requested, 10);
                assert_eq!(check.limit, 5);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(
            store.history(U, ThreadId(1), None).await.unwrap(),
            vec![ChatMessage::user("x".repeat(40))]
        );
        assert!(model.requests.lock().unwrap().is_empty());
        assert_eq!(svc.profile(U).await.unwrap().used_today, 0);
    }

    #[tokio::test]
    async fn model_failure_keeps_user_turn() {
        let model = FakeModel {
            fail: true,
            ..Default::default()
        };
        let (svc, store, _model) = service(model, 1000).await;

        assert!(svc.ask(U, "hello").await.is_err());
        let hist = store.history(U, ThreadId(1), None).await.unwrap();
        assert_eq!(hist, vec![ChatMessage::user("hello")]);
        assert_eq!(svc.profile(U).await.unwrap().used_today, 0);
    }

    #[tokio::test]
    async fn history_is_sent_and_capped() {
        let store = Store::open_in_memory().await.unwrap();
        let model = Arc::new(FakeModel::replying("ok", Some(1)));
        let svc = ConversationService::new(store, model.clone(), 10_000, Some(3));

        svc.ask(U, "one").await.unwrap();
        svc.ask(U, "two").await.unwrap();

        let req = model.last_request();
        // system + last 3 of [one, ok, two]
        assert_eq!(req.messages.len(), 4);
        assert_eq!(req.messages[1], ChatMessage::user("one"));
        assert_eq!(req.messages[3], ChatMessage::user("two"));
    }

    #[tokio::test]
    async fn threads_are_isolated() {
        let (svc, store, model) = service(FakeModel::replying("ok", Some(1)), 10_000).await;

        svc.ask(U, "first thread").await.unwrap();
        let second = svc.new_thread(U).await.unwrap();
        assert_eq!(second, ThreadId(2));
        svc.ask(U, "second thread").await.unwrap();

        let req = model.last_request();
        assert_eq!(req.messages.len(), 2);
        assert_eq!(store.history(U, ThreadId(2), None).await.unwrap().len(), 2);

        assert!(svc.switch_thread(U, ThreadId(1)).await.unwrap());
        assert_eq!(svc.ensure_active_thread(U).await.unwrap(), ThreadId(1));
        assert!(!svc.switch_thread(U, ThreadId(7)).await.unwrap());
        assert_eq!(svc.ensure_active_thread(U).await.unwrap(), ThreadId(1));
    }

    #[tokio::test]
    async fn empty_listing_creates_nothing() {
        let (svc, store, _model) = service(FakeModel::default(), 10).await;
        let listing = svc.list_threads(U).await.unwrap();
        assert!(listing.threads.is_empty());
        assert_eq!(listing.active, None);
        assert_eq!(store.active_thread(U).await.unwrap(), None);
    }

    #[tokio::test]
    async fn listing_reports_active_thread() {
        let (svc, _store, _model) = service(FakeModel::default(), 10).await;
        svc.new_thread(U).await.unwrap();
        svc.new_thread(U).await.unwrap();
        let listing = svc.list_threads(U).await.unwrap();
        assert_eq!(listing.threads.len(), 2);
        assert_eq!(listing.active, Some(ThreadId(2)));
    }

    #[tokio::test]
    async fn ingest_sends_only_model_input_and_adds_ocr_tokens() {
        let (svc, store, model) = service(FakeModel::replying("summary", Some(50)), 10_000).await;
        svc.ask(U, "earlier").await.unwrap();

        let out = svc
            .ingest(
                U,
                IngestRequest {
                    history_text: "Recognized text from file a.pdf:\n\nbody".to_string(),
                    model_input: "body".to_string(),
                    system_prompt: "structure it".to_string(),
                    extra_tokens: 7,
                },
            )
            .await
            .unwrap();
        assert!(matches!(out, ReplyOutcome::Answered { tokens: 57, .. }));

        let req = model.last_request();
        assert_eq!(
            req.messages,
            vec![ChatMessage::system("structure it"), ChatMessage::user("body")]
        );
        assert_eq!(store.history(U, ThreadId(1), None).await.unwrap().len(), 4);
        // 50 for the earlier ask + 57
        assert_eq!(svc.profile(U).await.unwrap().used_today, 107);
    }

    #[tokio::test]
    async fn ingest_over_budget_charges_nothing() {
        let (svc, store, _model) = service(FakeModel::replying("x", Some(1)), 10).await;

        let out = svc
            .ingest(
                U,
                IngestRequest {
                    history_text: "y".repeat(80),
                    model_input: "y".to_string(),
                    system_prompt: "s".to_string(),
                    extra_tokens: 3,
                },
            )
            .await
            .unwrap();
        assert!(matches!(out, ReplyOutcome::QuotaExceeded(QuotaCheck { requested: 23, .. })));
        assert_eq!(svc.profile(U).await.unwrap().used_today, 0);
        assert_eq!(
            store.history(U, ThreadId(1), None).await.unwrap(),
            vec![ChatMessage::user("y".repeat(80))]
        );
    }

    #[tokio::test]
    async fn profile_reports_model_and_limit() {
        let (svc, _store, _model) = service(FakeModel::default(), 123).await;
        let p = svc.profile(U).await.unwrap();
        assert_eq!(
            p,
            Profile {
                model: "fake-model".to_string(),
                daily_limit: 123,
                used_today: 0,
            }
        );
    }
}
