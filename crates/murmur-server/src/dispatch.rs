//! Routing of decoded client events to their handlers.

use tracing::debug;

use murmur_shared::protocol::ClientEvent;

use crate::connection::ClientContext;
use crate::coordinator::Coordinator;
use crate::error::DispatchError;
use crate::handlers;

/// Built once at startup and shared by every read pump.
pub struct Dispatcher {
    coordinator: Coordinator,
}

impl Dispatcher {
    pub fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }

    pub async fn dispatch(
        &self,
        ctx: &ClientContext,
        event: ClientEvent,
    ) -> Result<(), DispatchError> {
        debug!(
            conn = %ctx.connection_id,
            user = %ctx.user_id,
            kind = %event.kind(),
            "Dispatching event"
        );

        let co = &self.coordinator;
        match event {
            ClientEvent::SendMessage(payload) => handlers::send_message(co, ctx, payload).await,
            ClientEvent::CreateConversation(payload) => {
                handlers::create_conversation(co, ctx, payload).await
            }
            ClientEvent::GetConversations => handlers::get_conversations(co, ctx).await,
            ClientEvent::GetMessages(payload) => handlers::get_messages(co, ctx, payload).await,
            ClientEvent::MarkAsRead(target) => handlers::mark_as_read(co, ctx, target).await,
            ClientEvent::MarkAsDelivered(target) => {
                handlers::mark_as_delivered(co, ctx, target).await
            }
            ClientEvent::DeleteMessage(target) => handlers::delete_message(co, ctx, target).await,
            ClientEvent::StartTyping(target) => handlers::typing(co, ctx, target, true).await,
            ClientEvent::StopTyping(target) => handlers::typing(co, ctx, target, false).await,
        }
    }
}
