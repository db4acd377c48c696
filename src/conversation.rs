use crate::config::Profile;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Sentinel parent id for the first message in a conversation.
pub const ROOT: &str = "ROOT";

/// An id-prefix lookup that matched nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no message found with id prefix: {0}")]
pub struct NotFound(pub String);

// ── Message ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node in the message forest. Field names match the snapshot layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Content hash over (role, content, parent id). Opaque handle: after a
    /// `modify` the content may no longer hash to this value.
    #[serde(rename = "Sha1")]
    pub sha1: String,
    #[serde(rename = "ParentSha1")]
    pub parent_sha1: String,
    #[serde(rename = "Role")]
    pub role: Role,
    #[serde(rename = "Content")]
    pub content: String,
    /// Only populated for user messages.
    #[serde(rename = "UserName", default)]
    pub user_name: String,
    #[serde(rename = "Head")]
    pub head: bool,
}

/// Deterministic content address for a message.
pub fn message_id(role: Role, content: &str, parent: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(role.as_str().as_bytes());
    hasher.update(content.as_bytes());
    hasher.update(parent.as_bytes());
    hex::encode(hasher.finalize())
}

// ── Conversation ──────────────────────────────────────────────────────────────

/// Append-only forest of messages with at most one head at a time.
///
/// Storage order is insertion order, not thread order. The active thread is
/// the root-to-head path through `parent_sha1` links; everything off that
/// path is a dormant branch, kept addressable by id prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(rename = "Profile")]
    profile: Profile,
    #[serde(rename = "Summary", default)]
    summary: String,
    #[serde(rename = "Messages", default)]
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            summary: String::new(),
            messages: Vec::new(),
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn set_summary(&mut self, summary: String) {
        self.summary = summary;
    }

    /// All messages in storage (insertion) order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn head(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.head)
    }

    /// Append a message after the current head and make it the new head.
    ///
    /// When the profile carries a dice-roll expression the roll result line is
    /// added to the content before the id is computed, so the stored hash
    /// covers the rolled text.
    pub fn append(&mut self, role: Role, content: &str) -> Message {
        let mut parent = ROOT.to_string();
        for m in &mut self.messages {
            if m.head {
                parent = m.sha1.clone();
            }
            m.head = false;
        }

        let mut content = content.to_string();
        if !self.profile.dice_roll.is_empty() {
            // Validated at startup; a failure here means the profile was
            // mutated behind our back.
            match crate::util::roll_dice(&self.profile.dice_roll) {
                Ok(result) => {
                    content = format!("{content}\n DiceRoll {}: {result}", self.profile.dice_roll);
                }
                Err(e) => warn!(error = %e, "dice roll skipped"),
            }
        }

        let sha1 = message_id(role, &content, &parent);
        let user_name = if role == Role::User {
            self.profile.user_name.clone()
        } else {
            String::new()
        };

        let msg = Message {
            sha1,
            parent_sha1: parent,
            role,
            content,
            user_name,
            head: true,
        };
        self.messages.push(msg.clone());
        msg
    }

    /// First message (in storage order) whose id starts with `prefix`.
    /// Ambiguous prefixes are not rejected; first match wins.
    pub fn get_by_prefix(&self, prefix: &str) -> Result<Message, NotFound> {
        self.messages
            .iter()
            .find(|m| m.sha1.starts_with(prefix))
            .cloned()
            .ok_or_else(|| NotFound(prefix.to_string()))
    }

    /// Move the head flag to the first message matching `prefix`.
    pub fn change_head(&mut self, prefix: &str) -> Result<Message, NotFound> {
        let found = self
            .messages
            .iter()
            .position(|m| m.sha1.starts_with(prefix))
            .ok_or_else(|| NotFound(prefix.to_string()))?;

        for (i, m) in self.messages.iter_mut().enumerate() {
            m.head = i == found;
        }
        Ok(self.messages[found].clone())
    }

    /// The active thread, root first. Empty when no head is set. A parent id
    /// that matches no stored message ends the walk, which is how `ROOT`
    /// terminates the chain.
    pub fn thread_from_head(&self) -> Vec<Message> {
        let Some(head) = self.head() else {
            return Vec::new();
        };

        let by_id: HashMap<&str, &Message> =
            self.messages.iter().map(|m| (m.sha1.as_str(), m)).collect();

        let mut chain = Vec::new();
        let mut current = Some(head);
        while let Some(msg) = current {
            chain.push(msg.clone());
            current = by_id.get(msg.parent_sha1.as_str()).copied();
        }
        chain.reverse();
        chain
    }

    /// Replace the content of the stored message with the same id. The id is
    /// deliberately not recomputed and the head does not move, so descendants
    /// keep their parent links at the cost of a content/id mismatch.
    pub fn modify(&mut self, edited: &Message) -> Result<(), NotFound> {
        let target = self
            .messages
            .iter_mut()
            .find(|m| m.sha1 == edited.sha1)
            .ok_or_else(|| NotFound(edited.sha1.clone()))?;
        target.content = edited.content.clone();
        Ok(())
    }

    // ── Snapshots ─────────────────────────────────────────────────────────────

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Inverse of `to_yaml`. Literal two-character `\t` sequences in content
    /// are converted back to real tabs, compensating for hand-edited
    /// snapshot files.
    pub fn from_yaml(raw: &str) -> anyhow::Result<Conversation> {
        let mut conv: Conversation = serde_yaml::from_str(raw)?;
        for m in &mut conv.messages {
            if m.content.contains("\\t") {
                m.content = m.content.replace("\\t", "\t");
            }
        }
        Ok(conv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_profile() -> Profile {
        Profile {
            user_name: "tester".to_string(),
            ..Default::default()
        }
    }

    fn heads(conv: &Conversation) -> usize {
        conv.messages().iter().filter(|m| m.head).count()
    }

    #[test]
    fn test_at_most_one_head() {
        let mut conv = Conversation::new(test_profile());
        assert_eq!(heads(&conv), 0);

        conv.append(Role::System, "sys");
        assert_eq!(heads(&conv), 1);
        conv.append(Role::User, "hi");
        assert_eq!(heads(&conv), 1);
        conv.append(Role::Assistant, "hello");
        assert_eq!(heads(&conv), 1);
    }

    #[test]
    fn test_first_append_has_root_parent() {
        let mut conv = Conversation::new(test_profile());
        let msg = conv.append(Role::System, "sys");
        assert_eq!(msg.parent_sha1, ROOT);
        assert!(msg.head);
    }

    #[test]
    fn test_user_name_only_on_user_messages() {
        let mut conv = Conversation::new(test_profile());
        let sys = conv.append(Role::System, "sys");
        let user = conv.append(Role::User, "hi");
        let asst = conv.append(Role::Assistant, "hello");
        assert_eq!(sys.user_name, "");
        assert_eq!(user.user_name, "tester");
        assert_eq!(asst.user_name, "");
    }

    #[test]
    fn test_thread_runs_root_to_head() {
        let mut conv = Conversation::new(test_profile());
        let a = conv.append(Role::User, "hi");
        let b = conv.append(Role::Assistant, "hello");
        let c = conv.append(Role::User, "bye");

        let thread = conv.thread_from_head();
        let ids: Vec<&str> = thread.iter().map(|m| m.sha1.as_str()).collect();
        assert_eq!(ids, vec![a.sha1.as_str(), b.sha1.as_str(), c.sha1.as_str()]);

        // Rewinding the head to an interior node yields the same prefix.
        conv.change_head(&b.sha1).unwrap();
        let shorter = conv.thread_from_head();
        let short_ids: Vec<&str> = shorter.iter().map(|m| m.sha1.as_str()).collect();
        assert_eq!(short_ids, &ids[..2]);
    }

    #[test]
    fn test_thread_empty_without_head() {
        let conv = Conversation::new(test_profile());
        assert!(conv.thread_from_head().is_empty());
    }

    #[test]
    fn test_change_head_by_prefix() {
        let mut conv = Conversation::new(test_profile());
        let a = conv.append(Role::User, "hi");
        conv.append(Role::Assistant, "hello");

        let prefix = &a.sha1[..8];
        let moved = conv.change_head(prefix).unwrap();
        assert_eq!(moved.sha1, a.sha1);

        let thread = conv.thread_from_head();
        assert!(thread.last().unwrap().sha1.starts_with(prefix));
    }

    #[test]
    fn test_change_head_unknown_prefix() {
        let mut conv = Conversation::new(test_profile());
        conv.append(Role::User, "hi");
        assert_eq!(
            conv.change_head("zzzz"),
            Err(NotFound("zzzz".to_string()))
        );
    }

    #[test]
    fn test_branching_keeps_abandoned_messages() {
        let mut conv = Conversation::new(test_profile());
        let a = conv.append(Role::User, "hi");
        let b = conv.append(Role::Assistant, "hello");
        let c = conv.append(Role::User, "bye");

        conv.change_head(&a.sha1[..6]).unwrap();
        let d = conv.append(Role::User, "new");

        assert_eq!(d.parent_sha1, a.sha1);
        let thread = conv.thread_from_head();
        let thread_ids: Vec<&str> = thread.iter().map(|m| m.sha1.as_str()).collect();
        assert_eq!(thread_ids, vec![a.sha1.as_str(), d.sha1.as_str()]);

        // B and C are off the thread but still stored.
        assert_eq!(conv.messages().len(), 4);
        assert!(conv.get_by_prefix(&b.sha1).is_ok());
        assert!(conv.get_by_prefix(&c.sha1).is_ok());
    }

    #[test]
    fn test_get_by_prefix_first_match_in_storage_order() {
        let mut conv = Conversation::new(test_profile());
        let first = conv.append(Role::User, "one");
        conv.append(Role::Assistant, "two");

        // The empty prefix matches everything; first in storage order wins.
        assert_eq!(conv.get_by_prefix("").unwrap().sha1, first.sha1);
    }

    #[test]
    fn test_modify_replaces_content_in_place() {
        let mut conv = Conversation::new(test_profile());
        conv.append(Role::User, "hi");
        let b = conv.append(Role::Assistant, "hello");
        conv.append(Role::User, "bye");

        let mut edited = conv.get_by_prefix(&b.sha1).unwrap();
        edited.content = "rewritten".to_string();
        conv.modify(&edited).unwrap();

        let stored = conv.get_by_prefix(&b.sha1).unwrap();
        assert_eq!(stored.content, "rewritten");
        // Id stays stable, head does not move.
        assert_eq!(stored.sha1, b.sha1);
        assert_eq!(conv.head().unwrap().content, "bye");
    }

    #[test]
    fn test_modify_unknown_id_leaves_store_unchanged() {
        let mut conv = Conversation::new(test_profile());
        conv.append(Role::User, "hi");
        let before = conv.clone();

        let ghost = Message {
            sha1: "deadbeef".to_string(),
            parent_sha1: ROOT.to_string(),
            role: Role::User,
            content: "nope".to_string(),
            user_name: String::new(),
            head: false,
        };
        assert!(conv.modify(&ghost).is_err());
        assert_eq!(conv, before);
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut conv = Conversation::new(test_profile());
        conv.append(Role::System, "seed");
        conv.append(Role::User, "line one\nline two\twith tab");
        conv.append(Role::Assistant, "reply");
        conv.set_summary("a chat".to_string());

        let yaml = conv.to_yaml().unwrap();
        let back = Conversation::from_yaml(&yaml).unwrap();
        assert_eq!(conv, back);
    }

    #[test]
    fn test_from_yaml_unescapes_literal_tabs() {
        let mut conv = Conversation::new(test_profile());
        conv.append(Role::User, "plain");
        let mut yaml = conv.to_yaml().unwrap();
        yaml = yaml.replace("plain", "has\\ta-tab");

        let back = Conversation::from_yaml(&yaml).unwrap();
        assert_eq!(back.messages()[0].content, "has\ta-tab");
    }

    #[test]
    fn test_message_id_deterministic() {
        let a = message_id(Role::User, "hello", ROOT);
        let b = message_id(Role::User, "hello", ROOT);
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);

        assert_ne!(a, message_id(Role::Assistant, "hello", ROOT));
        assert_ne!(a, message_id(Role::User, "hello!", ROOT));
        assert_ne!(a, message_id(Role::User, "hello", "other-parent"));
    }

    #[test]
    fn test_dice_roll_lands_in_content_before_hashing() {
        let mut profile = test_profile();
        profile.dice_roll = "2d6".to_string();
        let mut conv = Conversation::new(profile);

        let msg = conv.append(Role::User, "attack the goblin");
        assert!(msg.content.contains("DiceRoll 2d6:"));
        // The id covers the rolled text.
        assert_eq!(
            msg.sha1,
            message_id(Role::User, &msg.content, ROOT)
        );
    }
}
