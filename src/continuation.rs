//! Continuation tokens bound to feed ranges.
//!
//! A continuation pairs an opaque log cursor with the EPK range it is bound
//! to. The cursor marks how far that range has been consumed; the change log
//! source only returns records whose key falls inside the bound range.
//!
//! Rebinding onto a narrower range (split) or an identical range under a new
//! address (merge) keeps the cursor verbatim. Consumption progress is a point
//! in the log, not a property of the range, so every record the parent
//! already delivered stays delivered and nothing past the cursor is skipped.
//!
//! # Token format
//!
//! Tokens produced by [`FeedRangeContinuation::to_token`] are JSON objects.
//! Two legacy forms are also accepted when decoding a lease's token:
//!
//! - the empty string, meaning "from the start" over the lease's range;
//! - a bare cursor (anything not starting with `{`), as written by
//!   partition-identity leases, bound to the lease's range.

use serde::{Deserialize, Serialize};

use crate::error::{FeedError, FeedResult};
use crate::types::EpkRange;

/// Consumption position bound to an EPK range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRangeContinuation {
    range: EpkRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cursor: Option<String>,
}

impl FeedRangeContinuation {
    /// Continuation at `cursor` bound to `range`.
    pub fn new(range: EpkRange, cursor: impl Into<String>) -> Self {
        Self {
            range,
            cursor: Some(cursor.into()),
        }
    }

    /// Continuation that starts at the beginning of the feed for `range`.
    pub fn from_start(range: EpkRange) -> Self {
        Self {
            range,
            cursor: None,
        }
    }

    /// Decode a lease's continuation token.
    ///
    /// A token bound to a range wider than `lease_range` is narrowed onto it;
    /// a token bound to a range that does not cover `lease_range` is rejected.
    pub fn from_token(token: &str, lease_range: &EpkRange) -> FeedResult<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(Self::from_start(lease_range.clone()));
        }
        if !token.starts_with('{') {
            return Ok(Self::new(lease_range.clone(), token));
        }

        let decoded: FeedRangeContinuation = serde_json::from_str(token)
            .map_err(|e| FeedError::InvalidContinuation(e.to_string()))?;
        if decoded.range == *lease_range {
            return Ok(decoded);
        }
        if decoded.range.contains_range(lease_range) {
            return decoded.rebind(lease_range);
        }
        Err(FeedError::InvalidContinuation(format!(
            "token bound to {} does not cover lease range {}",
            decoded.range, lease_range
        )))
    }

    /// Encode as a token suitable for storing on a lease.
    pub fn to_token(&self) -> FeedResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Range this continuation is bound to.
    pub fn range(&self) -> &EpkRange {
        &self.range
    }

    /// Opaque log cursor, `None` when reading from the start.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Move the cursor forward after a batch was consumed.
    pub fn advance(&mut self, cursor: impl Into<String>) {
        self.cursor = Some(cursor.into());
    }

    /// Produce a continuation bound to `target` that preserves the current
    /// progress.
    ///
    /// `target` must lie within the bound range. Rebinding onto a range that
    /// extends past the bound range would claim progress for keys this
    /// continuation never read.
    pub fn rebind(&self, target: &EpkRange) -> FeedResult<Self> {
        if !self.range.contains_range(target) {
            return Err(FeedError::PartitionTopology(format!(
                "cannot rebind continuation from {} to {}",
                self.range, target
            )));
        }
        Ok(Self {
            range: target.clone(),
            cursor: self.cursor.clone(),
        })
    }
}
