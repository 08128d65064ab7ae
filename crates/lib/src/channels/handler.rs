//! Handler contract: business logic plugged into the webhook dispatcher.

use crate::gateway::ExecutionScope;
use async_trait::async_trait;

/// Result of one handler call. Errors are logged by the dispatcher and otherwise ignored.
pub type HandlerResult = anyhow::Result<()>;

/// Receives webhook events. Every registered handler gets every event, each call
/// in its own task with its own [`ExecutionScope`].
///
/// All methods default to doing nothing, so an implementation overrides only the
/// events it cares about. Long-running work should watch `scope.deadline()` (or
/// wrap I/O in [`ExecutionScope::run`]); the dispatcher does not interrupt a
/// handler that ignores it.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Name used in log records.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// A user added the bot as a friend (or unblocked it).
    async fn handle_follow(&self, _scope: &ExecutionScope) -> HandlerResult {
        Ok(())
    }

    /// The bot joined a group or room.
    async fn handle_join(&self, _scope: &ExecutionScope) -> HandlerResult {
        Ok(())
    }

    async fn handle_member_joined(
        &self,
        _scope: &ExecutionScope,
        _joined_ids: &[String],
    ) -> HandlerResult {
        Ok(())
    }

    async fn handle_member_left(
        &self,
        _scope: &ExecutionScope,
        _left_ids: &[String],
    ) -> HandlerResult {
        Ok(())
    }

    /// A user unsent a message previously delivered to the bot.
    async fn handle_unsend(&self, _scope: &ExecutionScope, _message_id: &str) -> HandlerResult {
        Ok(())
    }

    async fn handle_text(
        &self,
        _scope: &ExecutionScope,
        _message_id: &str,
        _text: &str,
    ) -> HandlerResult {
        Ok(())
    }

    async fn handle_image(&self, _scope: &ExecutionScope, _message_id: &str) -> HandlerResult {
        Ok(())
    }

    async fn handle_sticker(
        &self,
        _scope: &ExecutionScope,
        _message_id: &str,
        _package_id: &str,
        _sticker_id: &str,
    ) -> HandlerResult {
        Ok(())
    }

    /// `duration_ms` is absent for videos still being processed by the platform.
    async fn handle_video(
        &self,
        _scope: &ExecutionScope,
        _message_id: &str,
        _duration_ms: Option<u64>,
    ) -> HandlerResult {
        Ok(())
    }

    async fn handle_audio(
        &self,
        _scope: &ExecutionScope,
        _message_id: &str,
        _duration_ms: Option<u64>,
    ) -> HandlerResult {
        Ok(())
    }

    async fn handle_location(
        &self,
        _scope: &ExecutionScope,
        _message_id: &str,
        _latitude: f64,
        _longitude: f64,
        _address: Option<&str>,
    ) -> HandlerResult {
        Ok(())
    }

    async fn handle_file(
        &self,
        _scope: &ExecutionScope,
        _message_id: &str,
        _file_name: &str,
        _file_size: u64,
    ) -> HandlerResult {
        Ok(())
    }

    /// Fallback for message content types this service does not decode. Default drops them.
    async fn handle_unrecognized_message(
        &self,
        _scope: &ExecutionScope,
        _message_id: &str,
        _content_type: &str,
    ) -> HandlerResult {
        Ok(())
    }
}
