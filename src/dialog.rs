//! Dialog: per-channel state machine and the router that owns the mailboxes.

pub mod controller;
pub mod router;

pub use controller::{ChannelEvent, DialogController, DialogDeps};
pub use router::DialogRouter;
