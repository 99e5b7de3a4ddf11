use serde::{Deserialize, Serialize};

/// Discriminator carried as the `type` field of every published payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Sent,
    Processed,
    Edit,
    Refresh,
    Delete,
    BulkDelete,
    Restore,
    Reaction,
    SelfFlagged,
    Flag,
    ThreadCreated,
    UpdateThreadOriginalMessage,
    MentionWarning,
    Notice,
    /// Compact new-message notice for a message on the channel timeline.
    Channel,
    /// Compact new-message notice for a thread reply.
    Thread,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Processed => "processed",
            Self::Edit => "edit",
            Self::Refresh => "refresh",
            Self::Delete => "delete",
            Self::BulkDelete => "bulk_delete",
            Self::Restore => "restore",
            Self::Reaction => "reaction",
            Self::SelfFlagged => "self_flagged",
            Self::Flag => "flag",
            Self::ThreadCreated => "thread_created",
            Self::UpdateThreadOriginalMessage => "update_thread_original_message",
            Self::MentionWarning => "mention_warning",
            Self::Notice => "notice",
            Self::Channel => "channel",
            Self::Thread => "thread",
        }
    }
}

/// Direction of a reaction event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionAction {
    Add,
    Remove,
}

impl ReactionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
        }
    }
}
