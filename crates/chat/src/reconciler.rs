use std::collections::HashMap;

use chrono::TimeDelta;

use crate::grouping::{self, GROUP_GAP};
use crate::ids::{ConversationId, MessageId};
use crate::message::{DisplayMessage, Message, MessagePage};

/// Tunables for one reconciliation working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub group_gap: TimeDelta,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            group_gap: GROUP_GAP,
        }
    }
}

impl ReconcilerConfig {
    pub fn with_group_gap(mut self, group_gap: TimeDelta) -> Self {
        self.group_gap = group_gap;
        self
    }
}

/// Channel a message entered the working set through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    History,
    Live,
    Echo,
}

impl Origin {
    fn name(self) -> &'static str {
        match self {
            Self::History => "history",
            Self::Live => "live",
            Self::Echo => "echo",
        }
    }
}

/// Result of offering one message to the working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    /// Same id already present; the earlier record was kept untouched.
    Duplicate,
    /// Message belongs to another conversation and was ignored.
    ForeignConversation,
}

impl MergeOutcome {
    pub fn changed(self) -> bool {
        matches!(self, Self::Inserted)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    origin: Origin,
    message: Message,
}

/// Duplicate-free working set of messages for one open conversation.
///
/// Entries live in an insertion-ordered map keyed by id; first arrival wins.
/// Display order is derived on demand by a stable sort on `sent_at`, so equal
/// timestamps keep their arrival order.
#[derive(Debug, Clone)]
pub struct MessageStream {
    conversation_id: ConversationId,
    config: ReconcilerConfig,
    entries: Vec<Entry>,
    positions: HashMap<MessageId, usize>,
    has_more: bool,
    revision: u64,
}

impl MessageStream {
    pub fn new(conversation_id: ConversationId, config: ReconcilerConfig) -> Self {
        Self {
            conversation_id,
            config,
            entries: Vec::new(),
            positions: HashMap::new(),
            has_more: false,
            revision: 0,
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn config(&self) -> ReconcilerConfig {
        self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.positions.contains_key(id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.positions
            .get(id)
            .map(|position| &self.entries[*position].message)
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Bumped whenever the displayed sequence or `has_more` changes.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Re-seeds the set from an initial load or refetch.
    ///
    /// The batch replaces history from its oldest timestamp onward. Older history
    /// the reader already paged in is kept, and live or echoed messages the batch
    /// does not contain yet are carried over so a refetch racing the subscription
    /// cannot drop them. Returns the number of entries after seeding.
    pub fn seed(&mut self, batch: impl IntoIterator<Item = Message>) -> usize {
        self.seed_batch(batch.into_iter().collect(), None)
    }

    /// Seeds from the newest history page.
    ///
    /// `has_more` follows the page unless older pages were already loaded, in
    /// which case the paging position of the oldest loaded page is kept.
    pub fn seed_page(&mut self, page: MessagePage) -> usize {
        self.seed_batch(page.messages, Some(page.has_more))
    }

    /// Merges an older history page without replacing anything already held.
    pub fn merge_older(&mut self, page: MessagePage) -> usize {
        let inserted = page
            .messages
            .into_iter()
            .map(|message| self.offer(message, Origin::History))
            .filter(|outcome| outcome.changed())
            .count();
        if self.has_more != page.has_more {
            self.has_more = page.has_more;
            if inserted == 0 {
                self.revision += 1;
            }
        }
        inserted
    }

    pub fn insert_live(&mut self, message: Message) -> MergeOutcome {
        self.offer(message, Origin::Live)
    }

    pub fn insert_echo(&mut self, message: Message) -> MergeOutcome {
        self.offer(message, Origin::Echo)
    }

    /// Id of the oldest displayed message, used as the cursor for older pages.
    pub fn oldest_id(&self) -> Option<&MessageId> {
        self.entries
            .iter()
            .min_by_key(|entry| entry.message.sent_at)
            .map(|entry| &entry.message.id)
    }

    /// Sorted, grouped display sequence. Pure with respect to the working set.
    pub fn display(&self) -> Vec<DisplayMessage> {
        grouping::annotate(self.sorted_messages(), self.config.group_gap)
    }

    fn sorted_messages(&self) -> Vec<Message> {
        let mut ordered: Vec<&Message> =
            self.entries.iter().map(|entry| &entry.message).collect();
        // Stable: equal timestamps stay in arrival order.
        ordered.sort_by_key(|message| message.sent_at);
        ordered.into_iter().cloned().collect()
    }

    fn seed_batch(&mut self, batch: Vec<Message>, page_has_more: Option<bool>) -> usize {
        let before = self.sorted_messages();
        let had_more = self.has_more;

        let (batch, foreign): (Vec<Message>, Vec<Message>) = batch
            .into_iter()
            .partition(|message| message.conversation_id == self.conversation_id);
        let window_start = batch.iter().map(|message| message.sent_at).min();

        self.positions.clear();
        let (older, carried): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut self.entries)
            .into_iter()
            .filter(|entry| {
                entry.origin != Origin::History
                    || window_start.is_some_and(|start| entry.message.sent_at < start)
            })
            .partition(|entry| entry.origin == Origin::History);
        let backfilled = !older.is_empty();

        for message in batch {
            self.insert_if_absent(message, Origin::History);
        }
        for entry in older {
            self.insert_if_absent(entry.message, entry.origin);
        }
        let mut retained = 0usize;
        for entry in carried {
            if self.insert_if_absent(entry.message, entry.origin) {
                retained += 1;
            }
        }

        if let Some(page_has_more) = page_has_more
            && !backfilled
        {
            self.has_more = page_has_more;
        }
        if self.has_more != had_more || self.sorted_messages() != before {
            self.revision += 1;
        }

        tracing::debug!(
            conversation_id = %self.conversation_id,
            entries = self.entries.len(),
            retained,
            backfilled,
            foreign = foreign.len(),
            "seeded message stream"
        );
        self.entries.len()
    }

    fn offer(&mut self, message: Message, origin: Origin) -> MergeOutcome {
        if message.conversation_id != self.conversation_id {
            tracing::debug!(
                conversation_id = %self.conversation_id,
                foreign_conversation_id = %message.conversation_id,
                message_id = %message.id,
                origin = origin.name(),
                "ignored message for another conversation"
            );
            return MergeOutcome::ForeignConversation;
        }

        let message_id = message.id.clone();
        if self.insert_if_absent(message, origin) {
            self.revision += 1;
            MergeOutcome::Inserted
        } else {
            tracing::debug!(
                conversation_id = %self.conversation_id,
                message_id = %message_id,
                origin = origin.name(),
                "discarded duplicate message"
            );
            MergeOutcome::Duplicate
        }
    }

    fn insert_if_absent(&mut self, message: Message, origin: Origin) -> bool {
        if self.positions.contains_key(&message.id) {
            return false;
        }

        self.positions.insert(message.id.clone(), self.entries.len());
        self.entries.push(Entry { origin, message });
        true
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::ids::ParticipantId;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + TimeDelta::seconds(seconds)
    }

    fn conversation(raw: &str) -> ConversationId {
        ConversationId::parse(raw).unwrap()
    }

    fn message_in(conversation_id: &str, id: &str, sender: &str, seconds: i64) -> Message {
        Message::new(
            MessageId::parse(id).unwrap(),
            conversation(conversation_id),
            ParticipantId::parse(sender).unwrap(),
            format!("text-{id}"),
            at(seconds),
        )
    }

    fn message(id: &str, sender: &str, seconds: i64) -> Message {
        message_in("a", id, sender, seconds)
    }

    fn stream() -> MessageStream {
        MessageStream::new(conversation("a"), ReconcilerConfig::default())
    }

    fn ids(stream: &MessageStream) -> Vec<String> {
        stream
            .display()
            .iter()
            .map(|entry| entry.id().to_string())
            .collect()
    }

    #[test]
    fn first_seen_content_wins_across_sources() {
        let mut stream = stream();
        stream.seed(vec![message("1", "u1", 0)]);

        let mut replay = message("1", "u1", 0);
        replay.text = "rewritten".to_string();
        assert_eq!(stream.insert_live(replay.clone()), MergeOutcome::Duplicate);
        assert_eq!(stream.insert_echo(replay), MergeOutcome::Duplicate);

        assert_eq!(stream.len(), 1);
        let kept = stream.get(&MessageId::parse("1").unwrap()).unwrap();
        assert_eq!(kept.text, "text-1");
    }

    #[test]
    fn echo_then_live_delivery_yields_one_entry() {
        let mut stream = stream();
        assert_eq!(
            stream.insert_echo(message("m1", "u1", 5)),
            MergeOutcome::Inserted
        );
        assert_eq!(
            stream.insert_live(message("m1", "u1", 5)),
            MergeOutcome::Duplicate
        );
        assert_eq!(ids(&stream), vec!["m1"]);
    }

    #[test]
    fn foreign_live_update_leaves_stream_untouched() {
        let mut stream = stream();
        stream.seed(vec![message("1", "u1", 0)]);
        let before = stream.display();
        let revision = stream.revision();

        let outcome = stream.insert_live(message_in("b", "9", "u2", 10));
        assert_eq!(outcome, MergeOutcome::ForeignConversation);
        assert_eq!(stream.display(), before);
        assert_eq!(stream.revision(), revision);
    }

    #[test]
    fn display_is_sorted_by_timestamp_with_stable_ties() {
        let mut stream = stream();
        stream.seed(vec![
            message("late", "u1", 50),
            message("tie-a", "u2", 20),
            message("early", "u1", 0),
        ]);
        stream.insert_live(message("tie-b", "u2", 20));
        stream.insert_echo(message("mid", "u1", 30));

        assert_eq!(ids(&stream), vec!["early", "tie-a", "tie-b", "mid", "late"]);

        let display = stream.display();
        assert!(
            display
                .windows(2)
                .all(|pair| pair[0].message.sent_at <= pair[1].message.sent_at)
        );
    }

    #[test]
    fn seed_replaces_history_but_keeps_unconfirmed_live_messages() {
        let mut stream = stream();
        stream.seed(vec![
            message("1", "u1", 0),
            message("2", "u2", 10),
            message("4", "u2", 15),
        ]);
        stream.insert_live(message("3", "u1", 20));

        let mut refreshed = message("2", "u2", 10);
        refreshed.edited = true;
        let count = stream.seed(vec![
            message("1", "u1", 0),
            refreshed,
            message_in("b", "x", "u1", 5),
        ]);

        assert_eq!(count, 3);
        assert_eq!(ids(&stream), vec!["1", "2", "3"]);
        assert!(stream.get(&MessageId::parse("2").unwrap()).unwrap().edited);
    }

    #[test]
    fn duplicate_ids_within_one_batch_keep_the_first() {
        let mut stream = stream();
        let mut first = message("m1", "u1", 0);
        first.text = "a".to_string();
        let mut second = message("m1", "u1", 0);
        second.text = "b".to_string();

        assert_eq!(stream.seed(vec![first, second]), 1);
        assert_eq!(
            stream.get(&MessageId::parse("m1").unwrap()).unwrap().text,
            "a"
        );
    }

    #[test]
    fn refetch_keeps_older_pages_already_loaded() {
        let mut stream = stream();
        let newest = || {
            MessagePage::new(
                vec![message("3", "u1", 300), message("4", "u2", 400)],
                true,
            )
        };
        stream.seed_page(newest());
        stream.merge_older(MessagePage::new(
            vec![message("1", "u1", 100), message("2", "u2", 200)],
            false,
        ));
        assert_eq!(stream.len(), 4);
        assert!(!stream.has_more());

        stream.seed_page(newest());
        assert_eq!(ids(&stream), vec!["1", "2", "3", "4"]);
        assert!(!stream.has_more());
        assert_eq!(stream.oldest_id().map(MessageId::as_str), Some("1"));
    }

    #[test]
    fn identical_refetch_is_not_a_change() {
        let mut stream = stream();
        let page = MessagePage::new(vec![message("1", "u1", 0), message("2", "u2", 10)], true);
        stream.seed_page(page.clone());
        stream.insert_live(message("3", "u1", 20));
        let revision = stream.revision();

        stream.seed_page(page.clone());
        assert_eq!(stream.revision(), revision);

        stream.seed_page(MessagePage::new(page.messages, false));
        assert!(stream.revision() > revision);
    }

    #[test]
    fn seed_batch_wins_over_carried_live_copy() {
        let mut stream = stream();
        let mut live = message("3", "u1", 20);
        live.text = "live copy".to_string();
        stream.insert_live(live);

        stream.seed(vec![message("3", "u1", 20)]);
        let kept = stream.get(&MessageId::parse("3").unwrap()).unwrap();
        assert_eq!(kept.text, "text-3");
        assert_eq!(stream.len(), 1);
    }

    #[test]
    fn older_pages_merge_without_replacing() {
        let mut stream = stream();
        stream.seed_page(MessagePage::new(
            vec![message("5", "u1", 500), message("6", "u2", 600)],
            true,
        ));
        assert!(stream.has_more());
        assert_eq!(stream.oldest_id().map(MessageId::as_str), Some("5"));

        let mut overlap = message("5", "u1", 500);
        overlap.text = "stale".to_string();
        let inserted = stream.merge_older(MessagePage::new(
            vec![message("3", "u1", 300), message("4", "u1", 400), overlap],
            false,
        ));

        assert_eq!(inserted, 2);
        assert!(!stream.has_more());
        assert_eq!(ids(&stream), vec!["3", "4", "5", "6"]);
        assert_eq!(
            stream.get(&MessageId::parse("5").unwrap()).unwrap().text,
            "text-5"
        );
    }

    #[test]
    fn walkthrough_groups_echo_and_live_from_same_sender() {
        let mut stream = stream();
        stream.seed(vec![message("1", "u1", 0)]);
        stream.insert_echo(message("2", "u2", 2));
        stream.insert_live(message("3", "u2", 240));

        let display = stream.display();
        assert_eq!(ids(&stream), vec!["1", "2", "3"]);
        assert!(display[0].is_first_in_group && display[0].is_last_in_group);
        assert!(display[1].is_first_in_group);
        assert!(!display[1].is_last_in_group);
        assert!(!display[2].is_first_in_group);
        assert!(display[2].is_last_in_group);
    }

    #[test]
    fn revision_moves_only_on_change() {
        let mut stream = stream();
        let start = stream.revision();
        stream.insert_live(message("1", "u1", 0));
        let after_insert = stream.revision();
        assert!(after_insert > start);

        stream.insert_live(message("1", "u1", 0));
        assert_eq!(stream.revision(), after_insert);
    }
}
