use crate::effect::EffectId;
use crate::viewer::ViewerId;

use super::{Tick, Trigger};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    ViewerOpened {
        viewer: ViewerId,
    },
    ViewerClosed {
        viewer: ViewerId,
    },
    Reconciled {
        viewer: ViewerId,
        tick: Tick,
        trigger: Trigger,
        created: usize,
        updated: usize,
        removed: usize,
    },
    DeliveryFailed {
        viewer: ViewerId,
        reason: String,
    },
    EncodingFailed {
        viewer: ViewerId,
        effect: EffectId,
        reason: String,
    },
    Expired {
        tick: Tick,
        effects: Vec<EffectId>,
    },
}
