//! Update policies applied to fresh register readings.

use std::fmt;

use tracing::info;

use crate::tag::{Tag, TagValue};

/// Decides whether a freshly read value replaces the last known one.
///
/// Policies run while the controller's exclusive lock is held, so they must
/// not block.
pub trait UpdatePolicy: fmt::Debug + Send + Sync {
    /// Apply `fresh` to `last`. Returns `true` when `last` was overwritten.
    fn apply(&self, tag: &Tag, last: &mut Option<TagValue>, fresh: TagValue, request: u64)
    -> bool;
}

/// Default policy: store and log a reading only when it differs from the
/// previous one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetection;

impl UpdatePolicy for ChangeDetection {
    fn apply(
        &self,
        tag: &Tag,
        last: &mut Option<TagValue>,
        fresh: TagValue,
        request: u64,
    ) -> bool {
        if last.is_some_and(|previous| previous.same_as(fresh)) {
            return false;
        }

        info!(request, tag = %tag.name(), value = %fresh, "Tag value changed");
        *last = Some(fresh);
        true
    }
}
