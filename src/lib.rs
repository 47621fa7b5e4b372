//! Client-side session control for a stateful remote execution kernel.
//!
//! The crate connects a UI to a kernel, speaks the control vocabulary
//! (`run`, `app-status`, `check`, `reload`, `shutdown`) over a single
//! bidirectional comm, and supervises reconnects: after a dropped socket the
//! supervisor verifies whether the kernel still holds this session's app
//! state, resyncing the UI when it does and recommending a full page reload
//! when it does not.

pub mod config;
pub mod protocol;
pub mod session;
pub mod transport;
