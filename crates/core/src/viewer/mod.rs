mod session;
mod state;
mod store;

pub use session::{RenderedEffect, ViewerSession};
pub use state::ViewerState;
pub use store::{SessionKey, SessionStore};

pub type ViewerId = u32;
