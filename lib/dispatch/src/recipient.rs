//! Recipients, groups, and the directory jobs are resolved against.

use crate::error::{DirectoryError, DispatchError};
use lettre::message::Mailbox;
use multi_emailer_core::GroupId;
use std::collections::BTreeMap;

/// Opening line used when a recipient has none configured.
pub const DEFAULT_OPENING_LINE: &str = "To whom it may concern";

/// Slug of the built-in target that sends to the sender.
pub const TEST_TARGET: &str = "test";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub address: Mailbox,
    pub cc: Vec<Mailbox>,
    pub opening_line: String,
}

impl Recipient {
    pub fn new(address: Mailbox) -> Self {
        Self {
            address,
            cc: Vec::new(),
            opening_line: DEFAULT_OPENING_LINE.to_string(),
        }
    }

    #[must_use]
    pub fn with_cc(mut self, cc: Vec<Mailbox>) -> Self {
        self.cc = cc;
        self
    }

    /// Sets the opening line, falling back to the default when blank.
    #[must_use]
    pub fn with_opening_line(mut self, opening_line: impl Into<String>) -> Self {
        let opening_line = opening_line.into();
        if !opening_line.trim().is_empty() {
            self.opening_line = opening_line;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientGroup {
    pub id: GroupId,
    /// Display name. Defaults to the id.
    pub name: String,
    pub recipients: Vec<Recipient>,
}

impl RecipientGroup {
    pub fn new(id: GroupId, name: Option<String>, recipients: Vec<Recipient>) -> Self {
        let name = name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| id.to_string());
        Self {
            id,
            name,
            recipients,
        }
    }
}

/// Who a job is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTarget {
    Group(GroupId),
    /// Sends a single copy to the sender.
    Test,
}

impl JobTarget {
    /// Parses the `group_id` form field.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownGroup`] if `raw` is not a usable slug.
    pub fn parse(raw: &str) -> Result<Self, DispatchError> {
        let raw = raw.trim();
        if raw == TEST_TARGET {
            return Ok(Self::Test);
        }
        raw.parse()
            .map(Self::Group)
            .map_err(|_| DispatchError::UnknownGroup { id: raw.to_string() })
    }
}

/// All configured recipient groups, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct RecipientDirectory {
    groups: BTreeMap<GroupId, RecipientGroup>,
}

impl RecipientDirectory {
    /// Builds a directory.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] on duplicate ids or a group named like a
    /// built-in target.
    pub fn new(groups: impl IntoIterator<Item = RecipientGroup>) -> Result<Self, DirectoryError> {
        let mut map = BTreeMap::new();
        for group in groups {
            if group.id.as_str() == TEST_TARGET {
                return Err(DirectoryError::ReservedGroup {
                    id: group.id.to_string(),
                });
            }
            if map.contains_key(&group.id) {
                return Err(DirectoryError::DuplicateGroup {
                    id: group.id.to_string(),
                });
            }
            map.insert(group.id.clone(), group);
        }
        Ok(Self { groups: map })
    }

    #[must_use]
    pub fn get(&self, id: &GroupId) -> Option<&RecipientGroup> {
        self.groups.get(id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &RecipientGroup> {
        self.groups.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Expands a target into the recipients to send to.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownGroup`] if the group does not exist.
    pub fn resolve(
        &self,
        target: &JobTarget,
        sender: &Mailbox,
    ) -> Result<Vec<Recipient>, DispatchError> {
        match target {
            JobTarget::Test => {
                Ok(vec![Recipient::new(sender.clone()).with_opening_line("Hi test")])
            }
            JobTarget::Group(id) => self
                .get(id)
                .map(|group| group.recipients.clone())
                .ok_or_else(|| DispatchError::UnknownGroup { id: id.to_string() }),
        }
    }
}
