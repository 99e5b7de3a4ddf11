use serde_json::{json, Map, Value};
use threadcast_models::event::EventKind;
use threadcast_models::message::Message;
use threadcast_models::user::MessageAuthor;

const EXCERPT_MAX_CHARS: usize = 150;

/// Wire view of a message. Contains no recipient-relative data, so one
/// serialization serves every subscriber of a topic. Timestamps come from
/// the message itself, never from the clock, which keeps repeated
/// serialization byte-identical.
pub fn serialized_message(message: &Message, author: &MessageAuthor) -> Value {
    json!({
        "id": message.id,
        "channel_id": message.channel_id,
        "thread_id": message.thread_id,
        "user": {
            "id": author.id,
            "username": author.username,
        },
        "message": message.content,
        "cooked": message.cooked,
        "created_at": message.created_at,
        "edited_at": message.edited_at,
        "deleted_at": message.deleted_at,
    })
}

/// Full message event payload: the message view nested under
/// `chat_message`, tagged with `type`. `extra_fields` are merged last and
/// may override generated fields.
pub fn message_payload_with_type(
    message: &Message,
    author: &MessageAuthor,
    kind: EventKind,
    extra_fields: Value,
) -> Value {
    let mut payload = Map::new();
    payload.insert(
        "chat_message".to_string(),
        serialized_message(message, author),
    );
    payload.insert("type".to_string(), json!(kind.as_str()));
    if let Value::Object(extras) = extra_fields {
        for (key, value) in extras {
            payload.insert(key, value);
        }
    }
    Value::Object(payload)
}

/// Preview excerpt of a message body.
pub fn excerpt(content: &str) -> String {
    let mut out: String = content.chars().take(EXCERPT_MAX_CHARS).collect();
    if content.chars().count() > EXCERPT_MAX_CHARS {
        out.push('…');
    }
    out
}
