use chrono::TimeDelta;

use crate::message::{DisplayMessage, Message};

/// Largest gap between consecutive same-sender messages that still shares a group.
pub const GROUP_GAP: TimeDelta = TimeDelta::minutes(5);

/// Annotates an already sorted sequence with group boundaries.
///
/// Each flag depends only on the immediate neighbor: a message opens a group when
/// there is no previous message, the sender changes, or the gap exceeds `gap`.
/// Closing a group mirrors that against the next message.
pub fn annotate(sorted: Vec<Message>, gap: TimeDelta) -> Vec<DisplayMessage> {
    let breaks: Vec<bool> = sorted
        .windows(2)
        .map(|pair| starts_new_group(&pair[0], &pair[1], gap))
        .collect();

    sorted
        .into_iter()
        .enumerate()
        .map(|(index, message)| {
            let is_first_in_group = index == 0 || breaks[index - 1];
            let is_last_in_group = breaks.get(index).copied().unwrap_or(true);
            DisplayMessage {
                message,
                is_first_in_group,
                is_last_in_group,
            }
        })
        .collect()
}

fn starts_new_group(previous: &Message, current: &Message, gap: TimeDelta) -> bool {
    previous.sender_id != current.sender_id || current.sent_at - previous.sent_at > gap
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::ids::{ConversationId, MessageId, ParticipantId};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + TimeDelta::seconds(seconds)
    }

    fn message(id: &str, sender: &str, seconds: i64) -> Message {
        Message::new(
            MessageId::parse(id).unwrap(),
            ConversationId::parse("c1").unwrap(),
            ParticipantId::parse(sender).unwrap(),
            format!("text-{id}"),
            at(seconds),
        )
    }

    fn flags(display: &[DisplayMessage]) -> Vec<(bool, bool)> {
        display
            .iter()
            .map(|entry| (entry.is_first_in_group, entry.is_last_in_group))
            .collect()
    }

    #[test]
    fn empty_and_single_sequences() {
        assert!(annotate(Vec::new(), GROUP_GAP).is_empty());

        let single = annotate(vec![message("1", "u1", 0)], GROUP_GAP);
        assert_eq!(flags(&single), vec![(true, true)]);
    }

    #[test]
    fn gap_just_over_threshold_splits_group() {
        let display = annotate(
            vec![message("1", "u1", 0), message("2", "u1", 5 * 60 + 1)],
            GROUP_GAP,
        );
        assert_eq!(flags(&display), vec![(true, true), (true, true)]);
    }

    #[test]
    fn gap_just_under_threshold_keeps_group() {
        let display = annotate(
            vec![message("1", "u1", 0), message("2", "u1", 4 * 60 + 59)],
            GROUP_GAP,
        );
        assert_eq!(flags(&display), vec![(true, false), (false, true)]);
    }

    #[test]
    fn gap_of_exactly_threshold_keeps_group() {
        let display = annotate(
            vec![message("1", "u1", 0), message("2", "u1", 5 * 60)],
            GROUP_GAP,
        );
        assert_eq!(flags(&display), vec![(true, false), (false, true)]);
    }

    #[test]
    fn sender_change_breaks_both_sides() {
        let display = annotate(
            vec![
                message("1", "u1", 0),
                message("2", "u1", 10),
                message("3", "u2", 20),
                message("4", "u2", 30),
                message("5", "u1", 40),
            ],
            GROUP_GAP,
        );
        assert_eq!(
            flags(&display),
            vec![
                (true, false),
                (false, true),
                (true, false),
                (false, true),
                (true, true),
            ]
        );
    }

    #[test]
    fn custom_gap_is_respected() {
        let display = annotate(
            vec![message("1", "u1", 0), message("2", "u1", 61)],
            TimeDelta::minutes(1),
        );
        assert_eq!(flags(&display), vec![(true, true), (true, true)]);
    }
}
