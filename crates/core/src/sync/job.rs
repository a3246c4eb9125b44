use bitflags::bitflags;
use tokio::sync::oneshot;

use crate::diff::DiffScope;
use crate::effect::EffectId;
use crate::error::EncodeError;
use crate::net::ApplyOutcome;
use crate::viewer::ViewerId;

use super::Tick;

bitflags! {
    /// Why a reconciliation was requested. Coalesced jobs keep every reason.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Trigger: u8 {
        const TICK = 1 << 0;
        const JOIN = 1 << 1;
        const WORLD_CHANGE = 1 << 2;
        const REQUEST = 1 << 3;
    }
}

pub type ReconcileOutcome = ApplyOutcome;

#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub viewer: ViewerId,
    pub tick: Tick,
    pub trigger: Trigger,
    pub created: Vec<EffectId>,
    pub updated: Vec<EffectId>,
    pub removed: Vec<EffectId>,
    pub rejected: Vec<(EffectId, EncodeError)>,
    pub outcome: ReconcileOutcome,
}

impl ReconcileReport {
    pub(crate) fn skipped(viewer: ViewerId, tick: Tick, trigger: Trigger) -> Self {
        Self {
            viewer,
            tick,
            trigger,
            created: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
            rejected: Vec::new(),
            outcome: ApplyOutcome::SessionClosed,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// One viewer plus the effects to re-evaluate for it.
#[derive(Debug)]
pub struct ReconcileJob {
    pub viewer: ViewerId,
    pub scope: DiffScope,
    pub trigger: Trigger,
    pub(crate) replies: Vec<oneshot::Sender<ReconcileReport>>,
}

impl ReconcileJob {
    pub fn full(viewer: ViewerId, trigger: Trigger) -> Self {
        Self {
            viewer,
            scope: DiffScope::Full,
            trigger,
            replies: Vec::new(),
        }
    }

    pub fn effects(
        viewer: ViewerId,
        ids: impl IntoIterator<Item = EffectId>,
        trigger: Trigger,
    ) -> Self {
        Self {
            viewer,
            scope: DiffScope::effects(ids),
            trigger,
            replies: Vec::new(),
        }
    }

    pub(crate) fn with_reply(mut self, reply: oneshot::Sender<ReconcileReport>) -> Self {
        self.replies.push(reply);
        self
    }

    pub fn merge(&mut self, other: ReconcileJob) {
        let scope = std::mem::take(&mut self.scope);
        self.scope = scope.merge(other.scope);
        self.trigger |= other.trigger;
        self.replies.extend(other.replies);
    }
}
