/// Lifecycle of one viewer:
/// `Joining -> Active -> Reconciling -> Active ... -> Closing -> Closed`.
/// `Closing` is reachable from every live state and only leads to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ViewerState {
    #[default]
    Joining,
    Active,
    Reconciling,
    Closing,
    Closed,
}

impl ViewerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Joining => "joining",
            Self::Active => "active",
            Self::Reconciling => "reconciling",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    pub fn can_transition_to(self, next: ViewerState) -> bool {
        use ViewerState::*;

        match (self, next) {
            (Joining, Active) => true,
            (Active, Reconciling) => true,
            (Reconciling, Active) => true,
            (Joining | Active | Reconciling, Closing) => true,
            (Closing, Closed) => true,
            _ => false,
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, Self::Joining | Self::Active | Self::Reconciling)
    }
}
