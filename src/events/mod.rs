//! Event stream - catalog changes, tool calls and errors, pushed to subscribers

pub mod broadcaster;
pub mod event;

pub use broadcaster::{DEFAULT_EVENT_CAPACITY, EventBroadcaster, EventSubscription};
pub use event::{Event, EventDraft, EventKind};
