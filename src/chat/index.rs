//! Conversation partners and the active selection of the logged-in user.

use std::collections::HashMap;

use crate::chat::{
    domain::{ActiveSelection, ConversationId, Participant, UserId},
    error::IndexError,
};

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Caches partner lists per user and owns the selection switching rules.
///
/// # Examples
///
/// ```
/// use ephemera::chat::domain::{Participant, UserId};
/// use ephemera::chat::index::ConversationIndex;
///
/// let me = UserId::new(1);
/// let mut index = ConversationIndex::new();
/// index.login(me);
/// index.update_partners(me, vec![Participant::new(UserId::new(2), "Alice")]);
///
/// assert!(index.select(UserId::new(2)).is_ok());
/// assert!(index.select(UserId::new(3)).is_err());
/// assert_eq!(index.search("ALI").count(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConversationIndex {
    partners: HashMap<UserId, Vec<Participant>>,
    selection: Option<ActiveSelection>,
}

impl ConversationIndex {
    /// Creates an empty index with nobody logged in.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a session for `user`, replacing any previous selection.
    pub fn login(&mut self, user: UserId) -> ActiveSelection {
        let selection = ActiveSelection::new(user);
        self.selection = Some(selection);
        selection
    }

    /// Ends the session and returns the selection it held.
    pub fn logout(&mut self) -> Option<ActiveSelection> {
        self.selection.take()
    }

    /// Returns the active selection, if a user is logged in.
    #[must_use]
    pub const fn selection(&self) -> Option<&ActiveSelection> {
        self.selection.as_ref()
    }

    /// Caches the externally supplied partner list for `user`.
    ///
    /// If the selected partner is no longer listed, the selection is
    /// cleared and the conversation it pointed at is returned.
    pub fn update_partners(
        &mut self,
        user: UserId,
        partners: Vec<Participant>,
    ) -> Option<ConversationId> {
        let dropped = self
            .selection
            .as_mut()
            .filter(|selection| selection.user() == user)
            .and_then(|selection| {
                let conversation = selection.conversation()?;
                let partner = selection.partner()?;
                if partners.iter().any(|candidate| candidate.id() == partner) {
                    None
                } else {
                    selection.set_partner(None);
                    Some(conversation)
                }
            });
        self.partners.insert(user, partners);
        dropped
    }

    /// Returns the cached partners of `user`; empty if none were supplied.
    #[must_use]
    pub fn list_partners(&self, user: UserId) -> &[Participant] {
        self.partners.get(&user).map_or(&[][..], Vec::as_slice)
    }

    /// Looks up a partner of the logged-in user.
    #[must_use]
    pub fn partner(&self, partner: UserId) -> Option<&Participant> {
        let user = self.selection.as_ref()?.user();
        self.list_partners(user)
            .iter()
            .find(|candidate| candidate.id() == partner)
    }

    /// Selects the conversation with `partner`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotLoggedIn`] without a session and
    /// [`IndexError::UnknownPartner`] if `partner` is not listed; the
    /// selection is left unchanged in both cases.
    pub fn select(&mut self, partner: UserId) -> IndexResult<ConversationId> {
        let user = self
            .selection
            .as_ref()
            .ok_or(IndexError::NotLoggedIn)?
            .user();
        if !self
            .list_partners(user)
            .iter()
            .any(|candidate| candidate.id() == partner)
        {
            return Err(IndexError::UnknownPartner(partner));
        }
        let selection = self.selection.as_mut().ok_or(IndexError::NotLoggedIn)?;
        selection.set_partner(Some(partner));
        Ok(ConversationId::between(user, partner))
    }

    /// Returns the partners of the logged-in user whose display name
    /// contains `query`, ignoring case.
    ///
    /// The search is lazy and pure; it yields nothing without a session.
    #[must_use]
    pub fn search(&self, query: &str) -> PartnerSearch<'_> {
        let partners = self
            .selection
            .as_ref()
            .map_or(&[][..], |selection| self.list_partners(selection.user()));
        PartnerSearch::new(partners, query)
    }
}

/// Lazy, finite, restartable filter over a partner list.
#[derive(Debug, Clone)]
pub struct PartnerSearch<'a> {
    partners: &'a [Participant],
    needle: String,
    position: usize,
}

impl<'a> PartnerSearch<'a> {
    fn new(partners: &'a [Participant], query: &str) -> Self {
        Self {
            partners,
            needle: query.to_lowercase(),
            position: 0,
        }
    }

    /// Returns a search replaying from the first partner.
    #[must_use]
    pub fn restart(&self) -> Self {
        Self {
            partners: self.partners,
            needle: self.needle.clone(),
            position: 0,
        }
    }
}

impl<'a> Iterator for PartnerSearch<'a> {
    type Item = &'a Participant;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(candidate) = self.partners.get(self.position) {
            self.position = self.position.saturating_add(1);
            if candidate.name_contains_lowercase(&self.needle) {
                return Some(candidate);
            }
        }
        None
    }
}
