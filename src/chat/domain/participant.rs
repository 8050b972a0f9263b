//! Conversation participants and the logged-in user's active selection.

use super::{ConversationId, UserId};
use serde::{Deserialize, Serialize};

/// A conversation partner as supplied by the external server.
///
/// Immutable from the core's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    id: UserId,
    display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    avatar: Option<String>,
}

impl Participant {
    /// Creates a participant without an avatar.
    #[must_use]
    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            avatar: None,
        }
    }

    /// Sets the avatar reference.
    #[must_use]
    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }

    /// Returns the participant identifier.
    #[must_use]
    pub const fn id(&self) -> UserId {
        self.id
    }

    /// Returns the display name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Returns the avatar reference, if any.
    #[must_use]
    pub fn avatar(&self) -> Option<&str> {
        self.avatar.as_deref()
    }

    /// Returns `true` if the display name contains `needle`, which must
    /// already be lowercased.
    pub(crate) fn name_contains_lowercase(&self, needle: &str) -> bool {
        self.display_name.to_lowercase().contains(needle)
    }
}

/// The logged-in user and the conversation partner currently selected.
///
/// Created on login, changed only by explicit selection, dropped on logout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveSelection {
    user: UserId,
    partner: Option<UserId>,
}

impl ActiveSelection {
    /// Creates a selection for a freshly logged-in user.
    #[must_use]
    pub const fn new(user: UserId) -> Self {
        Self {
            user,
            partner: None,
        }
    }

    /// Returns the logged-in user.
    #[must_use]
    pub const fn user(&self) -> UserId {
        self.user
    }

    /// Returns the selected partner, if any.
    #[must_use]
    pub const fn partner(&self) -> Option<UserId> {
        self.partner
    }

    /// Returns the selected conversation, if a partner is selected.
    #[must_use]
    pub fn conversation(&self) -> Option<ConversationId> {
        self.partner
            .map(|partner| ConversationId::between(self.user, partner))
    }

    pub(crate) const fn set_partner(&mut self, partner: Option<UserId>) {
        self.partner = partner;
    }
}
