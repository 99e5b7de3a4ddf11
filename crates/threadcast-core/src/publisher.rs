use crate::bus::{Audience, MessageBus};
use crate::error::CoreError;
use crate::guardian::Guardian;
use crate::serialize::{excerpt, message_payload_with_type, serialized_message};
use crate::targets::{
    bulk_user_tracking_topic, kick_topic, new_mentions_topic, new_messages_topic,
    resolve_publish_targets, root_topic, thread_topic, user_tracking_topic,
    CHANNEL_ARCHIVE_STATUS_TOPIC, CHANNEL_EDITS_TOPIC, CHANNEL_METADATA_TOPIC,
    CHANNEL_STATUS_TOPIC, NEW_CHANNEL_TOPIC,
};
use crate::tracking::{TrackingQuery, TrackingReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use threadcast_db::memberships::MembershipWithUserRow;
use threadcast_db::{channels, memberships, messages, threads, DbPool};
use threadcast_models::channel::Channel;
use threadcast_models::event::{EventKind, ReactionAction};
use threadcast_models::message::Message;
use threadcast_models::user::MessageAuthor;
use threadcast_models::STAFF_GROUP_ID;

/// Outcome of a channel archive job, for status publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveStatus {
    Success,
    Failed,
}

/// User reference embedded in mention-warning payloads.
#[derive(Debug, Clone, Serialize)]
pub struct MentionedUser {
    pub id: i64,
    pub username: String,
}

/// Mention outcomes that could not be honored, reported back to the
/// message author only.
#[derive(Debug, Clone, Default)]
pub struct MentionWarnings {
    pub cannot_see: Vec<MentionedUser>,
    pub without_membership: Vec<MentionedUser>,
    pub groups_with_too_many_members: Vec<String>,
    pub group_mentions_disabled: Vec<String>,
}

/// Pushes chat events onto the message bus.
///
/// Operations never mutate domain state beyond `last_bus_sequence`
/// bookkeeping; persisting the change an event announces is the caller's
/// job, and it must be committed *before* the publish, otherwise
/// subscribers can observe the event while the data is still unqueryable.
/// The bus offers no exactly-once guarantee: duplicate delivery is
/// expected, and consumers de-duplicate by message id and event type.
pub struct Publisher {
    db: DbPool,
    bus: MessageBus,
}

impl Publisher {
    pub fn new(db: DbPool, bus: MessageBus) -> Self {
        Self { db, bus }
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    fn channel_audience(channel: &Channel) -> Audience {
        Audience {
            user_ids: (!channel.allowed_user_ids.is_empty())
                .then(|| channel.allowed_user_ids.clone()),
            group_ids: (!channel.allowed_group_ids.is_empty())
                .then(|| channel.allowed_group_ids.clone()),
        }
    }

    fn publish_to_targets(
        &self,
        targets: &[String],
        channel: &Channel,
        payload: &Value,
        audience: Option<Audience>,
    ) {
        let audience = audience.unwrap_or_else(|| Self::channel_audience(channel));
        for topic in targets {
            self.bus.publish(topic, payload.clone(), audience.clone());
        }
    }

    fn publish_to_channel(&self, channel: &Channel, payload: Value) {
        self.bus.publish(
            &root_topic(channel.id),
            payload,
            Self::channel_audience(channel),
        );
    }

    /// Broadcasts a freshly sent message, then a compact new-message
    /// notice, then (for thread replies) refreshed thread-preview
    /// metadata. This order lets clients render the message before any
    /// unread counter moves.
    pub async fn publish_new(
        &self,
        channel: &Channel,
        message: &Message,
        author: &MessageAuthor,
        staged_id: Option<&str>,
        staged_thread_id: Option<i64>,
    ) -> Result<(), CoreError> {
        let targets = resolve_publish_targets(channel, message, staged_thread_id);
        let payload = message_payload_with_type(
            message,
            author,
            EventKind::Sent,
            json!({
                "staged_id": staged_id,
                "staged_thread_id": staged_thread_id,
            }),
        );
        self.publish_to_targets(&targets, channel, &payload, None);

        let thread_notice = message.is_thread_reply() && channel.threading_enabled;
        let notice_kind = if thread_notice {
            EventKind::Thread
        } else {
            EventKind::Channel
        };
        self.bus.publish(
            &new_messages_topic(channel.id),
            json!({
                "type": notice_kind.as_str(),
                "channel_id": channel.id,
                "thread_id": message.thread_id,
                "message": serialized_message(message, author),
            }),
            Self::channel_audience(channel),
        );

        if thread_notice {
            if let Some(thread_id) = message.thread_id {
                self.publish_thread_original_message_metadata(channel, thread_id)
                    .await?;
            }
        }

        let sequence = self.bus.last_sequence(&root_topic(channel.id));
        channels::bump_last_bus_sequence(&self.db, channel.id, sequence as i64).await?;
        Ok(())
    }

    /// Refreshes the reply count, participants and last-reply summary
    /// shown on a thread's original message in the channel timeline.
    pub async fn publish_thread_original_message_metadata(
        &self,
        channel: &Channel,
        thread_id: i64,
    ) -> Result<(), CoreError> {
        let Some(thread) = threads::get_thread(&self.db, thread_id).await? else {
            return Ok(());
        };
        let reply_counts = threads::reply_counts(&self.db, &[thread_id]).await?;
        let participants = threads::participants(&self.db, &[thread_id]).await?;
        let last_replies = threads::last_replies(&self.db, &[thread_id]).await?;

        let participants = participants.get(&thread_id).cloned().unwrap_or_default();
        let last_reply = last_replies.get(&thread_id).map(|reply| {
            json!({
                "id": reply.id,
                "author_id": reply.author_id,
                "author_username": reply.author_username,
                "created_at": reply.created_at,
                "excerpt": excerpt(&reply.content),
            })
        });

        self.publish_to_channel(
            channel,
            json!({
                "type": EventKind::UpdateThreadOriginalMessage.as_str(),
                "original_message_id": thread.original_message_id,
                "preview": {
                    "reply_count": reply_counts.get(&thread_id).copied().unwrap_or(0),
                    "participant_user_ids": participants.user_ids,
                    "participant_count": participants.total,
                    "last_reply": last_reply,
                },
            }),
        );
        Ok(())
    }

    pub async fn publish_thread_created(
        &self,
        channel: &Channel,
        message: &Message,
        author: &MessageAuthor,
        thread_id: i64,
        staged_thread_id: Option<i64>,
    ) -> Result<(), CoreError> {
        let payload = message_payload_with_type(
            message,
            author,
            EventKind::ThreadCreated,
            json!({
                "thread_id": thread_id,
                "staged_thread_id": staged_thread_id,
            }),
        );
        self.publish_to_channel(channel, payload);
        Ok(())
    }

    /// Announces that the cooking pipeline finished rendering a message.
    pub async fn publish_processed(
        &self,
        channel: &Channel,
        message: &Message,
    ) -> Result<(), CoreError> {
        let targets = resolve_publish_targets(channel, message, None);
        let payload = json!({
            "type": EventKind::Processed.as_str(),
            "chat_message": {
                "id": message.id,
                "cooked": message.cooked,
            },
        });
        self.publish_to_targets(&targets, channel, &payload, None);
        Ok(())
    }

    pub async fn publish_edit(
        &self,
        channel: &Channel,
        message: &Message,
        author: &MessageAuthor,
    ) -> Result<(), CoreError> {
        self.publish_message_event(channel, message, author, EventKind::Edit)
    }

    pub async fn publish_refresh(
        &self,
        channel: &Channel,
        message: &Message,
        author: &MessageAuthor,
    ) -> Result<(), CoreError> {
        self.publish_message_event(channel, message, author, EventKind::Refresh)
    }

    pub async fn publish_restore(
        &self,
        channel: &Channel,
        message: &Message,
        author: &MessageAuthor,
    ) -> Result<(), CoreError> {
        self.publish_message_event(channel, message, author, EventKind::Restore)
    }

    fn publish_message_event(
        &self,
        channel: &Channel,
        message: &Message,
        author: &MessageAuthor,
        kind: EventKind,
    ) -> Result<(), CoreError> {
        let targets = resolve_publish_targets(channel, message, None);
        let payload = message_payload_with_type(message, author, kind, json!({}));
        self.publish_to_targets(&targets, channel, &payload, None);
        Ok(())
    }

    /// Publishes a delete event carrying the id clients should re-anchor
    /// their view on: the latest surviving message in the deleted
    /// message's own scope (thread or channel timeline).
    pub async fn publish_delete(
        &self,
        channel: &Channel,
        message: &Message,
    ) -> Result<(), CoreError> {
        let targets = resolve_publish_targets(channel, message, None);
        let latest_not_deleted_message_id =
            if message.is_thread_reply() && channel.threading_enabled {
                match message.thread_id {
                    Some(thread_id) => {
                        messages::latest_not_deleted_thread_message_id(
                            &self.db, thread_id, message.id,
                        )
                        .await?
                    }
                    None => None,
                }
            } else {
                messages::latest_not_deleted_channel_message_id(
                    &self.db,
                    channel.id,
                    message.id,
                    channel.threading_enabled,
                )
                .await?
            };
        let payload = json!({
            "type": EventKind::Delete.as_str(),
            "deleted_id": message.id,
            "deleted_at": message.deleted_at,
            "deleted_by_id": message.deleted_by_id,
            "latest_not_deleted_message_id": latest_not_deleted_message_id,
        });
        self.publish_to_targets(&targets, channel, &payload, None);
        Ok(())
    }

    /// Partitions deleted ids by thread, publishes one event per thread
    /// topic, then one channel-topic event with the remainder: ids outside
    /// any thread plus each thread's original-message id, which is visible
    /// on the channel timeline. Skipped entirely when nothing remains.
    pub async fn publish_bulk_delete(
        &self,
        channel: &Channel,
        deleted_message_ids: &[i64],
        deleted_at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let audience = Self::channel_audience(channel);
        let groups = threads::grouped_messages(&self.db, deleted_message_ids).await?;

        let mut seen = HashSet::new();
        for group in &groups {
            for message_id in &group.message_ids {
                if !seen.insert(*message_id) {
                    return Err(CoreError::Invariant(format!(
                        "message {message_id} grouped into more than one thread"
                    )));
                }
            }
        }

        let mut remaining: Vec<i64> = deleted_message_ids.to_vec();
        for group in &groups {
            self.bus.publish(
                &thread_topic(channel.id, group.thread_id),
                json!({
                    "type": EventKind::BulkDelete.as_str(),
                    "deleted_ids": group.message_ids,
                    "deleted_at": deleted_at,
                }),
                audience.clone(),
            );
            remaining.retain(|id| {
                !group.message_ids.contains(id) || *id == group.original_message_id
            });
        }

        if remaining.is_empty() {
            return Ok(());
        }

        self.publish_to_channel(
            channel,
            json!({
                "type": EventKind::BulkDelete.as_str(),
                "deleted_ids": remaining,
                "deleted_at": deleted_at,
            }),
        );
        Ok(())
    }

    pub async fn publish_reaction(
        &self,
        channel: &Channel,
        message: &Message,
        action: ReactionAction,
        actor: &MessageAuthor,
        emoji: &str,
    ) -> Result<(), CoreError> {
        let targets = resolve_publish_targets(channel, message, None);
        let payload = json!({
            "type": EventKind::Reaction.as_str(),
            "action": action.as_str(),
            "user": {
                "id": actor.id,
                "username": actor.username,
            },
            "emoji": emoji,
            "chat_message_id": message.id,
        });
        self.publish_to_targets(&targets, channel, &payload, None);
        Ok(())
    }

    pub async fn publish_presence(
        &self,
        _channel: &Channel,
        _user_id: i64,
    ) -> Result<(), CoreError> {
        Err(CoreError::Unimplemented("presence"))
    }

    /// Two events on the same targets with different audiences: the
    /// flagging user learns their own flag status; staff get the
    /// actionable reviewable reference.
    pub async fn publish_flag(
        &self,
        channel: &Channel,
        message: &Message,
        flagger_id: i64,
        reviewable_id: i64,
        flag_status: &str,
    ) -> Result<(), CoreError> {
        let targets = resolve_publish_targets(channel, message, None);

        self.publish_to_targets(
            &targets,
            channel,
            &json!({
                "type": EventKind::SelfFlagged.as_str(),
                "user_flag_status": flag_status,
                "chat_message_id": message.id,
            }),
            Some(Audience::users(vec![flagger_id])),
        );

        self.publish_to_targets(
            &targets,
            channel,
            &json!({
                "type": EventKind::Flag.as_str(),
                "chat_message_id": message.id,
                "reviewable_id": reviewable_id,
            }),
            Some(Audience::groups(vec![STAFF_GROUP_ID])),
        );
        Ok(())
    }

    /// Per-recipient fan-out: direct-message titles depend on the viewer,
    /// so every user gets an individually serialized channel.
    pub async fn publish_new_channel(
        &self,
        channel: &Channel,
        user_ids: &[i64],
    ) -> Result<(), CoreError> {
        let rows = memberships::memberships_with_users(&self.db, channel.id, user_ids).await?;
        for membership in rows {
            let serialized = self.serialize_channel_for(channel, &membership).await?;
            self.bus.publish(
                NEW_CHANNEL_TOPIC,
                json!({ "channel": serialized }),
                Audience::users(vec![membership.user_id]),
            );
        }
        Ok(())
    }

    async fn serialize_channel_for(
        &self,
        channel: &Channel,
        membership: &MembershipWithUserRow,
    ) -> Result<Value, CoreError> {
        let title = if channel.is_direct_message() {
            let names =
                memberships::dm_counterpart_usernames(&self.db, channel.id, membership.user_id)
                    .await?;
            Some(names.join(", "))
        } else {
            channel.name.clone()
        };
        Ok(json!({
            "id": channel.id,
            "title": title,
            "slug": channel.slug,
            "description": channel.description,
            "status": channel.status.as_str(),
            "threading_enabled": channel.threading_enabled,
            "user_count": channel.user_count,
            "current_user_membership": {
                "following": membership.following,
                "last_read_message_id": membership.last_read_message_id,
            },
        }))
    }

    pub async fn publish_new_mention(
        &self,
        user_id: i64,
        channel_id: i64,
        message_id: i64,
    ) -> Result<(), CoreError> {
        self.bus.publish(
            &new_mentions_topic(channel_id),
            json!({
                "message_id": message_id,
                "channel_id": channel_id,
            }),
            Audience::users(vec![user_id]),
        );
        Ok(())
    }

    /// Warns a message's author about mentions that will not notify
    /// anyone. Addressed to the author only.
    pub async fn publish_inaccessible_mentions(
        &self,
        user_id: i64,
        message: &Message,
        warnings: &MentionWarnings,
    ) -> Result<(), CoreError> {
        self.bus.publish(
            &root_topic(message.channel_id),
            json!({
                "type": EventKind::MentionWarning.as_str(),
                "chat_message_id": message.id,
                "cannot_see": warnings.cannot_see,
                "without_membership": warnings.without_membership,
                "groups_with_too_many_members": warnings.groups_with_too_many_members,
                "group_mentions_disabled": warnings.group_mentions_disabled,
            }),
            Audience::users(vec![user_id]),
        );
        Ok(())
    }

    /// Forces removed members to drop their live subscription.
    pub async fn publish_kick_users(
        &self,
        channel_id: i64,
        user_ids: Vec<i64>,
    ) -> Result<(), CoreError> {
        self.bus.publish(
            &kick_topic(channel_id),
            json!({ "channel_id": channel_id }),
            Audience::users(user_ids),
        );
        Ok(())
    }

    pub async fn publish_chat_channel_edit(&self, channel: &Channel) -> Result<(), CoreError> {
        self.bus.publish(
            CHANNEL_EDITS_TOPIC,
            json!({
                "chat_channel_id": channel.id,
                "name": channel.name,
                "description": channel.description,
                "slug": channel.slug,
            }),
            Self::channel_audience(channel),
        );
        Ok(())
    }

    pub async fn publish_channel_status(&self, channel: &Channel) -> Result<(), CoreError> {
        self.bus.publish(
            CHANNEL_STATUS_TOPIC,
            json!({
                "chat_channel_id": channel.id,
                "status": channel.status.as_str(),
            }),
            Self::channel_audience(channel),
        );
        Ok(())
    }

    pub async fn publish_chat_channel_metadata(&self, channel: &Channel) -> Result<(), CoreError> {
        self.bus.publish(
            CHANNEL_METADATA_TOPIC,
            json!({
                "chat_channel_id": channel.id,
                "memberships_count": channel.user_count,
            }),
            Self::channel_audience(channel),
        );
        Ok(())
    }

    pub async fn publish_archive_status(
        &self,
        channel: &Channel,
        archive_status: ArchiveStatus,
        archived_messages: i64,
        archive_topic_id: Option<i64>,
        total_messages: i64,
    ) -> Result<(), CoreError> {
        self.bus.publish(
            CHANNEL_ARCHIVE_STATUS_TOPIC,
            json!({
                "chat_channel_id": channel.id,
                "archive_failed": archive_status == ArchiveStatus::Failed,
                "archive_completed": archive_status == ArchiveStatus::Success,
                "archived_messages": archived_messages,
                "total_messages": total_messages,
                "archive_topic_id": archive_topic_id,
            }),
            Self::channel_audience(channel),
        );
        Ok(())
    }

    pub async fn publish_notice(
        &self,
        user_id: i64,
        channel_id: i64,
        text_content: &str,
    ) -> Result<(), CoreError> {
        self.bus.publish(
            &root_topic(channel_id),
            json!({
                "type": EventKind::Notice.as_str(),
                "text_content": text_content,
                "channel_id": channel_id,
            }),
            Audience::users(vec![user_id]),
        );
        Ok(())
    }

    /// Publishes one user's full tracking snapshot for a channel to that
    /// user's private topic, including thread detail when the triggering
    /// message was a thread reply.
    pub async fn publish_user_tracking_state(
        &self,
        guardian: &Guardian,
        channel: &Channel,
        message: &Message,
    ) -> Result<(), CoreError> {
        let Some(user_id) = guardian.user_id else {
            // Tracking state is per-user; nothing to publish for anonymous.
            return Ok(());
        };

        let mut data = Map::new();
        data.insert("channel_id".to_string(), json!(channel.id));
        data.insert("last_read_message_id".to_string(), json!(message.id));
        data.insert("thread_id".to_string(), json!(message.thread_id));

        let report = TrackingReport::query(
            &self.db,
            guardian,
            TrackingQuery {
                include_missing_memberships: true,
                ..TrackingQuery::channels(vec![channel.id])
            },
        )
        .await?;
        let channel_tracking = report.find_channel(channel.id).unwrap_or_default();
        data.insert(
            "unread_count".to_string(),
            json!(channel_tracking.unread_count),
        );
        data.insert(
            "mention_count".to_string(),
            json!(channel_tracking.mention_count),
        );

        if channel.threading_enabled && message.is_thread_reply() {
            let overview_report = TrackingReport::query(
                &self.db,
                guardian,
                TrackingQuery {
                    include_threads: true,
                    include_read: false,
                    include_last_reply_details: true,
                    ..TrackingQuery::channels(vec![channel.id])
                },
            )
            .await?;
            data.insert(
                "unread_thread_overview".to_string(),
                json!(overview_report.find_channel_thread_overviews(channel.id)),
            );

            if let Some(thread_id) = message.thread_id {
                let thread_report = TrackingReport::query(
                    &self.db,
                    guardian,
                    TrackingQuery {
                        include_missing_memberships: true,
                        ..TrackingQuery::threads(vec![thread_id])
                    },
                )
                .await?;
                data.insert(
                    "thread_tracking".to_string(),
                    json!(thread_report.find_thread(thread_id)),
                );
            }
        }

        self.bus.publish(
            &user_tracking_topic(user_id),
            Value::Object(data),
            Audience::users(vec![user_id]),
        );
        Ok(())
    }

    /// One aggregator call for many channels, merged into the caller's
    /// last-read map and published once to the user's private bulk topic.
    /// Aggregator failure is fatal here: a silently wrong unread count is
    /// worse than no publish at all.
    pub async fn publish_bulk_user_tracking_state(
        &self,
        guardian: &Guardian,
        channel_last_read: &HashMap<i64, i64>,
    ) -> Result<(), CoreError> {
        let Some(user_id) = guardian.user_id else {
            return Ok(());
        };

        let mut channel_ids: Vec<i64> = channel_last_read.keys().copied().collect();
        channel_ids.sort_unstable();

        let report = TrackingReport::query(
            &self.db,
            guardian,
            TrackingQuery {
                include_missing_memberships: true,
                ..TrackingQuery::channels(channel_ids.clone())
            },
        )
        .await
        .map_err(|err| CoreError::TrackingFailed {
            context: format!(
                "bulk tracking state for user {user_id}, channel_ids {channel_ids:?}: {err}"
            ),
        })?;

        let mut payload = Map::new();
        for channel_id in &channel_ids {
            let state = report.find_channel(*channel_id).unwrap_or_default();
            payload.insert(
                channel_id.to_string(),
                json!({
                    "last_read_message_id": channel_last_read.get(channel_id),
                    "unread_count": state.unread_count,
                    "mention_count": state.mention_count,
                }),
            );
        }

        self.bus.publish(
            &bulk_user_tracking_topic(user_id),
            Value::Object(payload),
            Audience::users(vec![user_id]),
        );
        Ok(())
    }
}
