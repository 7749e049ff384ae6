//! Kind classification as an ordered rule table.
//!
//! An entry can satisfy several rules at once (an errored GPT call is both an
//! error and a turn). The first matching rule wins, so table order is the
//! priority order: error detection, then agent turns, then the generic kinds.

use crate::types::{EventKind, Role};

/// Signals pulled out of one entry, before kind assignment.
#[derive(Debug, Default)]
pub(crate) struct EntryFacts {
    pub role: Option<Role>,
    pub text: Option<String>,
    pub gpt_turn: bool,
    pub plugin_id: Option<String>,
    pub log_type: Option<String>,
    /// `Some(code)` when the entry is an error; the code itself may be unknown
    pub error: Option<Option<i64>>,
    pub wait_on: Option<String>,
}

pub(crate) struct KindRule {
    pub kind: EventKind,
    pub matches: fn(&EntryFacts) -> bool,
}

pub(crate) const KIND_RULES: &[KindRule] = &[
    KindRule {
        kind: EventKind::Error,
        matches: is_error,
    },
    KindRule {
        kind: EventKind::AgentTurn,
        matches: is_agent_turn,
    },
    KindRule {
        kind: EventKind::WaitOn,
        matches: is_wait_on,
    },
    KindRule {
        kind: EventKind::PluginAction,
        matches: is_plugin_action,
    },
];

fn is_error(facts: &EntryFacts) -> bool {
    facts.error.is_some()
}

fn is_agent_turn(facts: &EntryFacts) -> bool {
    facts.gpt_turn
        || (facts.role.map(|r| r.is_conversational()).unwrap_or(false) && facts.text.is_some())
}

fn is_wait_on(facts: &EntryFacts) -> bool {
    facts.wait_on.is_some()
}

fn is_plugin_action(facts: &EntryFacts) -> bool {
    facts.plugin_id.is_some()
}

/// First matching rule's kind; [`EventKind::SystemEvent`] when none match.
pub(crate) fn classify_kind(facts: &EntryFacts) -> EventKind {
    KIND_RULES
        .iter()
        .find(|rule| (rule.matches)(facts))
        .map(|rule| rule.kind)
        .unwrap_or(EventKind::SystemEvent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_outranks_turn() {
        let facts = EntryFacts {
            role: Some(Role::Assistant),
            text: Some("sorry".into()),
            error: Some(Some(500)),
            ..Default::default()
        };
        assert_eq!(classify_kind(&facts), EventKind::Error);
    }

    #[test]
    fn test_turn_outranks_wait_on_and_plugin() {
        let facts = EntryFacts {
            gpt_turn: true,
            plugin_id: Some("EXTCALL_1".into()),
            wait_on: Some("speech".into()),
            ..Default::default()
        };
        assert_eq!(classify_kind(&facts), EventKind::AgentTurn);
    }

    #[test]
    fn test_wait_on_outranks_plugin() {
        let facts = EntryFacts {
            plugin_id: Some("PLAY_1".into()),
            wait_on: Some("dtmf".into()),
            ..Default::default()
        };
        assert_eq!(classify_kind(&facts), EventKind::WaitOn);
    }

    #[test]
    fn test_role_without_text_is_not_a_turn() {
        let facts = EntryFacts {
            role: Some(Role::User),
            ..Default::default()
        };
        assert_eq!(classify_kind(&facts), EventKind::SystemEvent);

        let facts = EntryFacts {
            role: Some(Role::Tool),
            text: Some("{}".into()),
            ..Default::default()
        };
        assert_eq!(classify_kind(&facts), EventKind::SystemEvent);
    }
}
