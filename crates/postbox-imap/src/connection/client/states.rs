//! Type-state markers.

/// Connected, greeting read, not yet logged in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotAuthenticated;

/// Logged in; mailbox-level commands are valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authenticated;

/// A mailbox is open; message-level commands are valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct Selected;
