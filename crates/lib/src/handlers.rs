//! Built-in handlers.

use crate::channels::{Handler, HandlerResult};
use crate::gateway::ExecutionScope;
use async_trait::async_trait;

/// Logs a one-line summary of every event at info level. Registered by default so
/// a fresh deployment shows incoming traffic without custom handlers.
#[derive(Debug, Default)]
pub struct LogHandler;

impl LogHandler {
    fn log(&self, scope: &ExecutionScope, what: std::fmt::Arguments<'_>) {
        let ctx = scope.context();
        log::info!(
            chat_type = ctx.chat_type.as_str(),
            conversation_id = ctx.conversation_id.as_str(),
            actor_user_id = ctx.actor_user_id.as_str();
            "{} in {} by {}",
            what,
            ctx.conversation_id,
            ctx.actor_user_id
        );
    }
}

#[async_trait]
impl Handler for LogHandler {
    fn name(&self) -> &str {
        "log"
    }

    async fn handle_follow(&self, scope: &ExecutionScope) -> HandlerResult {
        self.log(scope, format_args!("follow"));
        Ok(())
    }

    async fn handle_join(&self, scope: &ExecutionScope) -> HandlerResult {
        self.log(scope, format_args!("join"));
        Ok(())
    }

    async fn handle_member_joined(
        &self,
        scope: &ExecutionScope,
        joined_ids: &[String],
    ) -> HandlerResult {
        self.log(scope, format_args!("members joined {:?}", joined_ids));
        Ok(())
    }

    async fn handle_member_left(&self, scope: &ExecutionScope, left_ids: &[String]) -> HandlerResult {
        self.log(scope, format_args!("members left {:?}", left_ids));
        Ok(())
    }

    async fn handle_unsend(&self, scope: &ExecutionScope, message_id: &str) -> HandlerResult {
        self.log(scope, format_args!("unsend {}", message_id));
        Ok(())
    }

    async fn handle_text(&self, scope: &ExecutionScope, message_id: &str, text: &str) -> HandlerResult {
        self.log(
            scope,
            format_args!("text {} ({} chars)", message_id, text.chars().count()),
        );
        Ok(())
    }

    async fn handle_image(&self, scope: &ExecutionScope, message_id: &str) -> HandlerResult {
        self.log(scope, format_args!("image {}", message_id));
        Ok(())
    }

    async fn handle_sticker(
        &self,
        scope: &ExecutionScope,
        message_id: &str,
        package_id: &str,
        sticker_id: &str,
    ) -> HandlerResult {
        self.log(
            scope,
            format_args!("sticker {} ({}/{})", message_id, package_id, sticker_id),
        );
        Ok(())
    }

    async fn handle_video(
        &self,
        scope: &ExecutionScope,
        message_id: &str,
        duration_ms: Option<u64>,
    ) -> HandlerResult {
        self.log(scope, format_args!("video {} {:?}ms", message_id, duration_ms));
        Ok(())
    }

    async fn handle_audio(
        &self,
        scope: &ExecutionScope,
        message_id: &str,
        duration_ms: Option<u64>,
    ) -> HandlerResult {
        self.log(scope, format_args!("audio {} {:?}ms", message_id, duration_ms));
        Ok(())
    }

    async fn handle_location(
        &self,
        scope: &ExecutionScope,
        message_id: &str,
        latitude: f64,
        longitude: f64,
        _address: Option<&str>,
    ) -> HandlerResult {
        self.log(
            scope,
            format_args!("location {} ({}, {})", message_id, latitude, longitude),
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
        self.log(
            scope,
            format_args!("file {} {} ({} bytes)", message_id, file_name, file_size),
        );
        Ok(())
    }

    async fn handle_unrecognized_message(
        &self,
        scope: &ExecutionScope,
        message_id: &str,
        content_type: &str,
    ) -> HandlerResult {
        self.log(
            scope,
            format_args!("message {} of unrecognized type {}", message_id, content_type),
        );
        Ok(())
    }
}
