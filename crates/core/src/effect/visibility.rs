use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::viewer::ViewerId;

use super::EffectDescriptor;

pub type VisibilityFn = dyn Fn(ViewerId, &EffectDescriptor) -> bool + Send + Sync;

/// Which viewers are eligible to see an effect.
#[derive(Clone, Default)]
pub enum Visibility {
    #[default]
    Everyone,
    Only(Arc<BTreeSet<ViewerId>>),
    Except(Arc<BTreeSet<ViewerId>>),
    /// Evaluated on every reconciliation. Predicates that depend on state the
    /// registry does not see (location, world) need the host to trigger a
    /// world-change reconciliation when that state moves.
    Predicate(Arc<VisibilityFn>),
}

impl Visibility {
    pub fn only(viewers: impl IntoIterator<Item = ViewerId>) -> Self {
        Self::Only(Arc::new(viewers.into_iter().collect()))
    }

    pub fn except(viewers: impl IntoIterator<Item = ViewerId>) -> Self {
        Self::Except(Arc::new(viewers.into_iter().collect()))
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(ViewerId, &EffectDescriptor) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    pub fn admits(&self, viewer: ViewerId, descriptor: &EffectDescriptor) -> bool {
        match self {
            Self::Everyone => true,
            Self::Only(set) => set.contains(&viewer),
            Self::Except(set) => !set.contains(&viewer),
            Self::Predicate(f) => f(viewer, descriptor),
        }
    }
}

impl fmt::Debug for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Everyone => f.write_str("Everyone"),
            Self::Only(set) => f.debug_tuple("Only").field(set).finish(),
            Self::Except(set) => f.debug_tuple("Except").field(set).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}
