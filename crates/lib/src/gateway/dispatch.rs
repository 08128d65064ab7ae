//! Webhook dispatch: verify and decode a callback, then fan each event out to
//! every registered handler.
//!
//! Dispatch happens after the HTTP acknowledgment has been produced and never
//! waits on handler work: each (event, handler) pair runs in its own task with
//! its own deadline. A handler that errors, panics or overruns its deadline is
//! logged and forgotten; it cannot affect other handlers, other events or the
//! response already sent to the platform.

use crate::channels::{
    signature, CallbackEnvelope, ConversationContext, Event, EventKind, Handler, HandlerRegistry,
    HandlerResult, MessageContent,
};
use crate::error::{ConfigError, TransportError};
use crate::gateway::ExecutionScope;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Owns the channel secret, the handler timeout and the handler registry.
/// Built once by the composition root and shared read-only with the HTTP layer.
pub struct Dispatcher {
    secret: String,
    handler_timeout: Duration,
    registry: HandlerRegistry,
}

/// How a single handler call ended. All outcomes are terminal and only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationOutcome {
    Completed,
    /// The handler returned an error before its deadline.
    Failed,
    /// The handler returned (successfully or not) after its deadline.
    TimedOut,
    Panicked,
}

impl Dispatcher {
    pub fn new(
        secret: impl Into<String>,
        handler_timeout: Duration,
        registry: HandlerRegistry,
    ) -> Result<Self, ConfigError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        if handler_timeout.is_zero() {
            return Err(ConfigError::NonPositiveTimeout);
        }
        Ok(Self {
            secret,
            handler_timeout,
            registry,
        })
    }

    pub fn handler_timeout(&self) -> Duration {
        self.handler_timeout
    }

    pub fn handler_count(&self) -> usize {
        self.registry.len()
    }

    /// Check the signature header against the raw body, then decode the body.
    /// Nothing is decoded when the signature does not match.
    pub fn verify(
        &self,
        body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<CallbackEnvelope, TransportError> {
        let provided = signature_header.ok_or(TransportError::MissingSignature)?;
        if !signature::verify(&self.secret, body, provided) {
            return Err(TransportError::InvalidSignature);
        }
        Ok(CallbackEnvelope::from_slice(body)?)
    }

    /// Spawn one task per (event, handler) pair and return how many were scheduled.
    /// Must be called from within a tokio runtime; returns without waiting on any task.
    pub fn dispatch(&self, envelope: CallbackEnvelope) -> usize {
        if self.registry.is_empty() {
            return 0;
        }
        let mut scheduled = 0;
        for event in envelope.events {
            let event = Arc::new(event);
            for handler in self.registry.iter() {
                let handler = Arc::clone(handler);
                let event = Arc::clone(&event);
                let timeout = self.handler_timeout;
                tokio::spawn(async move {
                    invoke(handler, event, timeout).await;
                });
                scheduled += 1;
            }
        }
        scheduled
    }
}

/// Run one handler on one event inside a fresh [`ExecutionScope`], containing
/// panics and logging the outcome with the conversation fields.
pub async fn invoke(
    handler: Arc<dyn Handler>,
    event: Arc<Event>,
    timeout: Duration,
) -> InvocationOutcome {
    let reply_token = match event.kind {
        EventKind::Message(_) => event.reply_token.clone(),
        _ => None,
    };
    let context = ConversationContext::new(event.source.as_ref(), reply_token);
    let scope = ExecutionScope::new(context, timeout);

    let result = AssertUnwindSafe(call_handler(handler.as_ref(), &scope, &event))
        .catch_unwind()
        .await;

    let name = handler.name();
    match result {
        Ok(Ok(())) if scope.is_expired() => {
            log_invocation(
                log::Level::Warn,
                name,
                &event,
                &scope,
                format_args!("handler {} finished after its deadline", name),
            );
            InvocationOutcome::TimedOut
        }
        Ok(Ok(())) => {
            log_invocation(
                log::Level::Debug,
                name,
                &event,
                &scope,
                format_args!("handler {} completed", name),
            );
            InvocationOutcome::Completed
        }
        Ok(Err(e)) => {
            log_invocation(
                log::Level::Error,
                name,
                &event,
                &scope,
                format_args!("handler {} failed: {:#}", name, e),
            );
            if scope.is_expired() {
                InvocationOutcome::TimedOut
            } else {
                InvocationOutcome::Failed
            }
        }
        Err(panic_info) => {
            let panic_msg = panic_info
                .downcast_ref::<String>()
                .map(String::as_str)
                .or_else(|| panic_info.downcast_ref::<&str>().copied())
                .unwrap_or("unknown panic");
            log_invocation(
                log::Level::Error,
                name,
                &event,
                &scope,
                format_args!("handler {} panicked: {}", name, panic_msg),
            );
            InvocationOutcome::Panicked
        }
    }
}

/// Route the event to the handler method for its kind (and content type).
async fn call_handler(
    handler: &dyn Handler,
    scope: &ExecutionScope,
    event: &Event,
) -> HandlerResult {
    match &event.kind {
        EventKind::Follow => handler.handle_follow(scope).await,
        EventKind::Join => handler.handle_join(scope).await,
        EventKind::MemberJoined { joined_ids } => {
            handler.handle_member_joined(scope, joined_ids).await
        }
        EventKind::MemberLeft { left_ids } => handler.handle_member_left(scope, left_ids).await,
        EventKind::Unsend { message_id } => handler.handle_unsend(scope, message_id).await,
        EventKind::Message(content) => match content {
            MessageContent::Text { id, text } => handler.handle_text(scope, id, text).await,
            MessageContent::Image { id } => handler.handle_image(scope, id).await,
            MessageContent::Video { id, duration } => {
                handler.handle_video(scope, id, *duration).await
            }
            MessageContent::Audio { id, duration } => {
                handler.handle_audio(scope, id, *duration).await
            }
            MessageContent::Location {
                id,
                address,
                latitude,
                longitude,
                ..
            } => {
                handler
                    .handle_location(scope, id, *latitude, *longitude, address.as_deref())
                    .await
            }
            MessageContent::Sticker {
                id,
                package_id,
                sticker_id,
            } => {
                handler
                    .handle_sticker(scope, id, package_id, sticker_id)
                    .await
            }
            MessageContent::File {
                id,
                file_name,
                file_size,
            } => {
                handler
                    .handle_file(scope, id, file_name, *file_size)
                    .await
            }
            MessageContent::Unrecognized { id, content_type } => {
                handler
                    .handle_unrecognized_message(scope, id, content_type)
                    .await
            }
        },
    }
}

fn log_invocation(
    level: log::Level,
    handler: &str,
    event: &Event,
    scope: &ExecutionScope,
    message: std::fmt::Arguments<'_>,
) {
    let ctx = scope.context();
    let invocation_id = scope.invocation_id().to_string();
    log::log!(
        level,
        handler = handler,
        event = event.kind_name(),
        chat_type = ctx.chat_type.as_str(),
        conversation_id = ctx.conversation_id.as_str(),
        actor_user_id = ctx.actor_user_id.as_str(),
        message_id = event.message_id().unwrap_or(""),
        invocation_id = invocation_id.as_str();
        "{}",
        message
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChatType;
    use async_trait::async_trait;
    use log::kv::{self, Key, Source as _, Value, VisitSource};
    use std::collections::HashMap;
    use std::sync::{Mutex, Once};
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    const SECRET: &str = "test-channel-secret";

    /// Sends "<handler>:<method>:<conversation>:<detail>" for every call it receives.
    struct Recorder {
        label: &'static str,
        tx: mpsc::UnboundedSender<String>,
    }

    impl Recorder {
        fn record(&self, method: &str, scope: &ExecutionScope, detail: &str) {
            let _ = self.tx.send(format!(
                "{}:{}:{}:{}",
                self.label,
                method,
                scope.context().conversation_id,
                detail
            ));
        }
    }

    #[async_trait]
    impl Handler for Recorder {
        fn name(&self) -> &str {
            self.label
        }

        async fn handle_follow(&self, scope: &ExecutionScope) -> HandlerResult {
            self.record("follow", scope, "");
            Ok(())
        }

        async fn handle_join(&self, scope: &ExecutionScope) -> HandlerResult {
            self.record("join", scope, "");
            Ok(())
        }

        async fn handle_member_joined(
            &self,
            scope: &ExecutionScope,
            joined_ids: &[String],
        ) -> HandlerResult {
            self.record("member_joined", scope, &joined_ids.join(","));
            Ok(())
        }

        async fn handle_member_left(
            &self,
            scope: &ExecutionScope,
            left_ids: &[String],
        ) -> HandlerResult {
            self.record("member_left", scope, &left_ids.join(","));
            Ok(())
        }

        async fn handle_unsend(&self, scope: &ExecutionScope, message_id: &str) -> HandlerResult {
            self.record("unsend", scope, message_id);
            Ok(())
        }

        async fn handle_text(
            &self,
            scope: &ExecutionScope,
            message_id: &str,
            text: &str,
        ) -> HandlerResult {
            self.record("text", scope, &format!("{}={}", message_id, text));
            Ok(())
        }

        async fn handle_image(&self, scope: &ExecutionScope, message_id: &str) -> HandlerResult {
            self.record("image", scope, message_id);
            Ok(())
        }

        async fn handle_sticker(
            &self,
            scope: &ExecutionScope,
            message_id: &str,
            package_id: &str,
            sticker_id: &str,
        ) -> HandlerResult {
            self.record(
                "sticker",
                scope,
                &format!("{}/{}/{}", message_id, package_id, sticker_id),
            );
            Ok(())
        }

        async fn handle_video(
            &self,
            scope: &ExecutionScope,
            message_id: &str,
            duration_ms: Option<u64>,
        ) -> HandlerResult {
            self.record("video", scope, &format!("{} {:?}", message_id, duration_ms));
            Ok(())
        }

        async fn handle_audio(
            &self,
            scope: &ExecutionScope,
            message_id: &str,
            duration_ms: Option<u64>,
        ) -> HandlerResult {
            self.record("audio", scope, &format!("{} {:?}", message_id, duration_ms));
            Ok(())
        }

        async fn handle_location(
            &self,
            scope: &ExecutionScope,
            message_id: &str,
            latitude: f64,
            longitude: f64,
            address: Option<&str>,
        ) -> HandlerResult {
            self.record(
                "location",
                scope,
                &format!("{} {} {} {:?}", message_id, latitude, longitude, address),
            );
            Ok(())
        }

        async fn handle_file(
            &self,
            scope: &ExecutionScope,
            message_id: &str,
            file_name: &str,
            file_size: u64,
        ) -> HandlerResult {
            self.record(
                "file",
                scope,
                &format!("{} {} {}", message_id, file_name, file_size),
            );
            Ok(())
        }

        async fn handle_unrecognized_message(
            &self,
            scope: &ExecutionScope,
            message_id: &str,
            content_type: &str,
        ) -> HandlerResult {
            self.record(
                "unrecognized",
                scope,
                &format!("{} {}", message_id, content_type),
            );
            Ok(())
        }
    }

    struct Panics;

    #[async_trait]
    impl Handler for Panics {
        async fn handle_follow(&self, _scope: &ExecutionScope) -> HandlerResult {
            panic!("boom");
        }

        async fn handle_text(
            &self,
            _scope: &ExecutionScope,
            _message_id: &str,
            _text: &str,
        ) -> HandlerResult {
            panic!("boom");
        }
    }

    struct Fails;

    #[async_trait]
    impl Handler for Fails {
        async fn handle_follow(&self, _scope: &ExecutionScope) -> HandlerResult {
            anyhow::bail!("downstream unavailable")
        }

        async fn handle_text(
            &self,
            _scope: &ExecutionScope,
            _message_id: &str,
            _text: &str,
        ) -> HandlerResult {
            anyhow::bail!("downstream unavailable")
        }
    }

    struct Sleeps(Duration);

    #[async_trait]
    impl Handler for Sleeps {
        async fn handle_follow(&self, _scope: &ExecutionScope) -> HandlerResult {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    /// Waits for its deadline and reports how long that took.
    struct DeadlineWatcher(mpsc::UnboundedSender<Duration>);

    #[async_trait]
    impl Handler for DeadlineWatcher {
        async fn handle_follow(&self, scope: &ExecutionScope) -> HandlerResult {
            let started = Instant::now();
            scope.expired().await;
            let _ = self.0.send(started.elapsed());
            Ok(())
        }
    }

    /// One log record with its key-values rendered as strings.
    struct Captured {
        level: log::Level,
        message: String,
        fields: HashMap<String, String>,
    }

    /// Test logger that keeps every record in memory.
    struct Capture {
        records: Mutex<Vec<Captured>>,
    }

    struct FieldCollector<'a>(&'a mut HashMap<String, String>);

    impl<'kvs> VisitSource<'kvs> for FieldCollector<'_> {
        fn visit_pair(&mut self, key: Key<'kvs>, value: Value<'kvs>) -> Result<(), kv::Error> {
            self.0.insert(key.as_str().to_string(), value.to_string());
            Ok(())
        }
    }

    impl log::Log for Capture {
        fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
            true
        }

        fn log(&self, record: &log::Record<'_>) {
            let mut fields = HashMap::new();
            let _ = record
                .key_values()
                .visit(&mut FieldCollector(&mut fields));
            if let Ok(mut records) = self.records.lock() {
                records.push(Captured {
                    level: record.level(),
                    message: record.args().to_string(),
                    fields,
                });
            }
        }

        fn flush(&self) {}
    }

    static CAPTURE: Capture = Capture {
        records: Mutex::new(Vec::new()),
    };
    static INSTALL_CAPTURE: Once = Once::new();

    fn capture_logs() -> &'static Capture {
        INSTALL_CAPTURE.call_once(|| {
            let _ = log::set_logger(&CAPTURE);
            log::set_max_level(log::LevelFilter::Trace);
        });
        &CAPTURE
    }

    fn dispatcher(registry: HandlerRegistry) -> Dispatcher {
        Dispatcher::new(SECRET, Duration::from_secs(5), registry).expect("valid dispatcher")
    }

    fn envelope(json: serde_json::Value) -> CallbackEnvelope {
        CallbackEnvelope::from_slice(json.to_string().as_bytes()).expect("decode envelope")
    }

    fn follow_event(user: &str) -> Arc<Event> {
        let env = envelope(serde_json::json!({
            "events": [{ "type": "follow", "source": { "type": "user", "userId": user }, "timestamp": 1 }]
        }));
        Arc::new(env.events.into_iter().next().expect("one event"))
    }

    async fn collect(rx: &mut mpsc::UnboundedReceiver<String>, n: usize) -> Vec<String> {
        let mut out = Vec::new();
        while out.len() < n {
            match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
                Ok(Some(s)) => out.push(s),
                _ => break,
            }
        }
        out.sort();
        out
    }

    #[test]
    fn rejects_invalid_configuration() {
        assert!(matches!(
            Dispatcher::new("", Duration::from_secs(1), HandlerRegistry::new()),
            Err(ConfigError::EmptySecret)
        ));
        assert!(matches!(
            Dispatcher::new(SECRET, Duration::ZERO, HandlerRegistry::new()),
            Err(ConfigError::NonPositiveTimeout)
        ));
    }

    #[tokio::test]
    async fn unbounded_timeout_still_runs_handlers() {
        assert_eq!(
            invoke(Arc::new(Sleeps(Duration::ZERO)), follow_event("U1"), Duration::MAX).await,
            InvocationOutcome::Completed
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let d = Dispatcher::new(
            SECRET,
            Duration::MAX,
            HandlerRegistry::new().with(Arc::new(Recorder { label: "m", tx })),
        )
        .expect("valid dispatcher");
        assert_eq!(d.handler_timeout(), Duration::MAX);
        let env = envelope(serde_json::json!({
            "events": [{ "type": "follow", "source": { "type": "user", "userId": "U1" } }]
        }));
        assert_eq!(d.dispatch(env), 1);
        assert_eq!(collect(&mut rx, 1).await, vec!["m:follow:U1:"]);
    }

    #[test]
    fn verify_requires_matching_signature() {
        let d = dispatcher(HandlerRegistry::new());
        let body = br#"{"events":[]}"#;
        assert!(matches!(
            d.verify(body, None),
            Err(TransportError::MissingSignature)
        ));
        assert!(matches!(
            d.verify(body, Some("bm90IGEgc2lnbmF0dXJl")),
            Err(TransportError::InvalidSignature)
        ));
        let wrong_key = signature::sign("another-secret", body);
        assert!(matches!(
            d.verify(body, Some(&wrong_key)),
            Err(TransportError::InvalidSignature)
        ));
        let ok = d
            .verify(body, Some(&signature::sign(SECRET, body)))
            .expect("valid callback");
        assert!(ok.events.is_empty());
    }

    #[test]
    fn verify_rejects_malformed_body_with_valid_signature() {
        let d = dispatcher(HandlerRegistry::new());
        let body = b"{\"events\": nope}";
        assert!(matches!(
            d.verify(body, Some(&signature::sign(SECRET, body))),
            Err(TransportError::MalformedBody(_))
        ));
    }

    #[tokio::test]
    async fn schedules_every_event_for_every_handler() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = HandlerRegistry::new()
            .with(Arc::new(Recorder { label: "a", tx: tx.clone() }))
            .with(Arc::new(Recorder { label: "b", tx }));
        let d = dispatcher(registry);
        let env = envelope(serde_json::json!({
            "events": [
                { "type": "follow", "source": { "type": "user", "userId": "U1" } },
                { "type": "videoPlayComplete", "source": { "type": "user", "userId": "U1" } },
                { "type": "join", "source": { "type": "group", "groupId": "C1" } },
                { "type": "message", "source": { "type": "room", "roomId": "R1", "userId": "U2" },
                  "replyToken": "rt", "message": { "type": "text", "id": "m1", "text": "hello" } }
            ]
        }));
        assert_eq!(d.dispatch(env), 6);
        let calls = collect(&mut rx, 6).await;
        assert_eq!(
            calls,
            vec![
                "a:follow:U1:",
                "a:join:C1:",
                "a:text:R1:m1=hello",
                "b:follow:U1:",
                "b:join:C1:",
                "b:text:R1:m1=hello",
            ]
        );
    }

    #[tokio::test]
    async fn empty_registry_schedules_nothing() {
        let d = dispatcher(HandlerRegistry::new());
        let env = envelope(serde_json::json!({
            "events": [{ "type": "follow", "source": { "type": "user", "userId": "U1" } }]
        }));
        assert_eq!(d.dispatch(env), 0);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_affect_siblings() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = HandlerRegistry::new()
            .with(Arc::new(Panics))
            .with(Arc::new(Recorder { label: "r", tx }));
        let d = dispatcher(registry);
        let env = envelope(serde_json::json!({
            "events": [
                { "type": "follow", "source": { "type": "user", "userId": "U1" } },
                { "type": "follow", "source": { "type": "user", "userId": "U2" } }
            ]
        }));
        assert_eq!(d.dispatch(env), 4);
        let calls = collect(&mut rx, 2).await;
        assert_eq!(calls, vec!["r:follow:U1:", "r:follow:U2:"]);
    }

    #[tokio::test]
    async fn invoke_reports_outcomes() {
        let event = follow_event("U1");
        let timeout = Duration::from_millis(200);
        assert_eq!(
            invoke(Arc::new(Panics), event.clone(), timeout).await,
            InvocationOutcome::Panicked
        );
        assert_eq!(
            invoke(Arc::new(Fails), event.clone(), timeout).await,
            InvocationOutcome::Failed
        );
        assert_eq!(
            invoke(Arc::new(Sleeps(Duration::ZERO)), event.clone(), timeout).await,
            InvocationOutcome::Completed
        );
        assert_eq!(
            invoke(
                Arc::new(Sleeps(Duration::from_millis(20))),
                event,
                Duration::from_millis(5)
            )
            .await,
            InvocationOutcome::TimedOut
        );
    }

    #[tokio::test]
    async fn deadline_is_independent_per_invocation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = HandlerRegistry::new()
            .with(Arc::new(Sleeps(Duration::from_millis(500))))
            .with(Arc::new(DeadlineWatcher(tx)));
        let d = Dispatcher::new(SECRET, Duration::from_millis(100), registry)
            .expect("valid dispatcher");
        let env = envelope(serde_json::json!({
            "events": [{ "type": "follow", "source": { "type": "user", "userId": "U1" } }]
        }));
        assert_eq!(d.dispatch(env), 2);
        let waited = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("watcher reported")
            .expect("channel open");
        assert!(waited >= Duration::from_millis(90), "waited {:?}", waited);
        assert!(waited < Duration::from_millis(400), "waited {:?}", waited);
    }

    #[tokio::test]
    async fn text_and_unsend_of_same_message_are_both_delivered() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let d = dispatcher(HandlerRegistry::new().with(Arc::new(Recorder { label: "h", tx })));
        let env = envelope(serde_json::json!({
            "events": [
                { "type": "message", "source": { "type": "user", "userId": "U1" }, "replyToken": "rt",
                  "message": { "type": "text", "id": "m7", "text": "oops" } },
                { "type": "unsend", "source": { "type": "user", "userId": "U1" },
                  "unsend": { "messageId": "m7" } }
            ]
        }));
        assert_eq!(d.dispatch(env), 2);
        let calls = collect(&mut rx, 3).await;
        assert_eq!(calls, vec!["h:text:U1:m7=oops", "h:unsend:U1:m7"]);
    }

    #[tokio::test]
    async fn reply_token_only_for_message_events() {
        struct Ctx(mpsc::UnboundedSender<ConversationContext>);

        #[async_trait]
        impl Handler for Ctx {
            async fn handle_follow(&self, scope: &ExecutionScope) -> HandlerResult {
                let _ = self.0.send(scope.context().clone());
                Ok(())
            }

            async fn handle_image(&self, scope: &ExecutionScope, _id: &str) -> HandlerResult {
                let _ = self.0.send(scope.context().clone());
                Ok(())
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let env = envelope(serde_json::json!({
            "events": [
                { "type": "follow", "replyToken": "rt-follow",
                  "source": { "type": "user", "userId": "U1" } },
                { "type": "message", "replyToken": "rt-msg",
                  "source": { "type": "group", "groupId": "C1", "userId": "U2" },
                  "message": { "type": "image", "id": "m1" } }
            ]
        }));
        let mut seen = Vec::new();
        for event in env.events {
            invoke(Arc::new(Ctx(tx.clone())), Arc::new(event), Duration::from_secs(1)).await;
            seen.push(rx.recv().await.expect("context"));
        }
        assert_eq!(seen[0].chat_type, ChatType::OneOnOne);
        assert_eq!(seen[0].reply_token, None);
        assert_eq!(seen[1].chat_type, ChatType::Group);
        assert_eq!(seen[1].conversation_id, "C1");
        assert_eq!(seen[1].actor_user_id, "U2");
        assert_eq!(seen[1].reply_token.as_deref(), Some("rt-msg"));
    }

    #[tokio::test]
    async fn every_handler_method_receives_typed_arguments() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let d = dispatcher(HandlerRegistry::new().with(Arc::new(Recorder { label: "h", tx })));
        let group = serde_json::json!({ "type": "group", "groupId": "C1", "userId": "U1" });
        let env = envelope(serde_json::json!({
            "events": [
                { "type": "follow", "source": { "type": "user", "userId": "U1" } },
                { "type": "join", "source": group },
                { "type": "memberJoined", "source": group,
                  "joined": { "members": [ { "type": "user", "userId": "U2" },
                                           { "type": "user", "userId": "U3" } ] } },
                { "type": "memberLeft", "source": group,
                  "left": { "members": [ { "type": "user", "userId": "U4" } ] } },
                { "type": "unsend", "source": group, "unsend": { "messageId": "m0" } },
                { "type": "message", "source": group, "replyToken": "rt",
                  "message": { "type": "text", "id": "m1", "text": "hi" } },
                { "type": "message", "source": group, "replyToken": "rt",
                  "message": { "type": "image", "id": "m2" } },
                { "type": "message", "source": group, "replyToken": "rt",
                  "message": { "type": "video", "id": "m3", "duration": 1000 } },
                { "type": "message", "source": group, "replyToken": "rt",
                  "message": { "type": "audio", "id": "m4" } },
                { "type": "message", "source": group, "replyToken": "rt",
                  "message": { "type": "location", "id": "m5", "title": "Office",
                               "address": "Tokyo", "latitude": 35.5, "longitude": 139.25 } },
                { "type": "message", "source": group, "replyToken": "rt",
                  "message": { "type": "sticker", "id": "m6", "packageId": "446", "stickerId": "1988" } },
                { "type": "message", "source": group, "replyToken": "rt",
                  "message": { "type": "file", "id": "m7", "fileName": "a.pdf", "fileSize": 2048 } },
                { "type": "message", "source": group, "replyToken": "rt",
                  "message": { "type": "hologram", "id": "m8" } }
            ]
        }));
        assert_eq!(d.dispatch(env), 13);
        let calls = collect(&mut rx, 13).await;
        assert_eq!(
            calls,
            vec![
                "h:audio:C1:m4 None",
                "h:file:C1:m7 a.pdf 2048",
                "h:follow:U1:",
                "h:image:C1:m2",
                "h:join:C1:",
                "h:location:C1:m5 35.5 139.25 Some(\"Tokyo\")",
                "h:member_joined:C1:U2,U3",
                "h:member_left:C1:U4",
                "h:sticker:C1:m6/446/1988",
                "h:text:C1:m1=hi",
                "h:unrecognized:C1:m8 hologram",
                "h:unsend:C1:m0",
                "h:video:C1:m3 Some(1000)",
            ]
        );
    }

    #[tokio::test]
    async fn failure_and_panic_records_carry_conversation_fields() {
        let logs = capture_logs();
        let env = envelope(serde_json::json!({
            "events": [{ "type": "message", "replyToken": "rt",
                         "source": { "type": "group", "groupId": "C-log", "userId": "U-log" },
                         "message": { "type": "text", "id": "m-log", "text": "hi" } }]
        }));
        let event = Arc::new(env.events.into_iter().next().expect("one event"));
        let timeout = Duration::from_secs(1);
        assert_eq!(
            invoke(Arc::new(Fails), event.clone(), timeout).await,
            InvocationOutcome::Failed
        );
        assert_eq!(
            invoke(Arc::new(Panics), event, timeout).await,
            InvocationOutcome::Panicked
        );

        let records = logs.records.lock().expect("log records");
        let errors: Vec<&Captured> = records
            .iter()
            .filter(|r| {
                r.level == log::Level::Error
                    && r.fields.get("conversation_id").map(String::as_str) == Some("C-log")
            })
            .collect();
        assert!(errors.iter().any(|r| r.message.contains("failed: downstream unavailable")));
        assert!(errors.iter().any(|r| r.message.contains("panicked: boom")));
        assert_eq!(errors.len(), 2);
        for record in errors {
            assert_eq!(record.fields.get("chat_type").map(String::as_str), Some("group"));
            assert_eq!(
                record.fields.get("actor_user_id").map(String::as_str),
                Some("U-log")
            );
            assert_eq!(
                record.fields.get("message_id").map(String::as_str),
                Some("m-log")
            );
            assert_eq!(record.fields.get("event").map(String::as_str), Some("message"));
            assert!(record.fields.contains_key("invocation_id"));
        }
    }
}
