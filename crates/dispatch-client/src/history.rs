//! History hydration: fetch prior records and flatten them into messages.

use tracing::{error, info};

use crate::backend::{Backend, HistoryRecord};
use crate::identity::Identifier;
use crate::timeline::{Message, MessageOrigin, Sender, Timeline};

/// Flatten records in server order: each driver entry followed by its replies.
pub fn flatten(records: &[HistoryRecord]) -> Vec<Message> {
    let capacity = records
        .iter()
        .map(|record| 1 + record.replies.len())
        .sum();
    let mut messages = Vec::with_capacity(capacity);
    for record in records {
        messages.push(Message::new(
            Sender::Driver,
            record.content.clone(),
            record.created_at,
            MessageOrigin::History,
        ));
        for reply in &record.replies {
            messages.push(Message::new(
                Sender::Dispatcher,
                reply.reply_content.clone(),
                reply.reply_at,
                MessageOrigin::History,
            ));
        }
    }
    messages
}

/// Fetch and flatten history. Any failure is logged and yields no messages.
pub async fn fetch<B>(backend: &B, identifier: &Identifier) -> Vec<Message>
where
    B: Backend + ?Sized,
{
    match backend.fetch_history(identifier).await {
        Ok(records) => {
            let messages = flatten(&records);
            info!(
                user_id = %identifier,
                records = records.len(),
                messages = messages.len(),
                "chat history loaded"
            );
            messages
        }
        Err(err) => {
            error!(user_id = %identifier, "error fetching chat history: {}", err);
            Vec::new()
        }
    }
}

/// Fetch history into a freshly hydrated timeline.
pub async fn hydrate<B>(backend: &B, identifier: &Identifier) -> Timeline
where
    B: Backend + ?Sized,
{
    let mut timeline = Timeline::new();
    timeline.hydrate(fetch(backend, identifier).await);
    timeline
}
