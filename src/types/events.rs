//! External interaction events fed into the cohesion analytic.

use serde::{Deserialize, Serialize};

use super::revision::{AuthorId, Timestamp};

/// A user scrolled so that a paragraph range was visible.
///
/// Paragraph numbers are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollEvent {
    /// Who scrolled.
    pub user: AuthorId,
    /// When the viewport settled (ms).
    pub timestamp: Timestamp,
    /// First visible paragraph.
    pub start_paragraph: u32,
    /// Last visible paragraph.
    pub end_paragraph: u32,
}

impl ScrollEvent {
    /// Create a scroll event.
    pub fn new(
        user: impl Into<AuthorId>,
        timestamp: Timestamp,
        start_paragraph: u32,
        end_paragraph: u32,
    ) -> Self {
        Self {
            user: user.into(),
            timestamp,
            start_paragraph,
            end_paragraph,
        }
    }
}

/// A closed login session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LoginSession {
    /// Who was logged in.
    pub user: AuthorId,
    /// Session start (ms).
    pub login: Timestamp,
    /// Session end (ms).
    pub logout: Timestamp,
}

impl LoginSession {
    /// Create a session.
    pub fn new(user: impl Into<AuthorId>, login: Timestamp, logout: Timestamp) -> Self {
        Self {
            user: user.into(),
            login,
            logout,
        }
    }

    /// Milliseconds both sessions were open. Zero when they do not overlap.
    pub fn overlap_ms(&self, other: &LoginSession) -> u64 {
        let start = self.login.max(other.login);
        let end = self.logout.min(other.logout);
        (end - start).max(0) as u64
    }
}
