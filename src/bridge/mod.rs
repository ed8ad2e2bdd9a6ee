//! The protocol bridge: router, handlers, and server lifecycle.
//!
//! Cookies scope a flow to the browser, not to a single authorization
//! attempt: two flows racing in the same browser overwrite each other's
//! `code_challenge` cookie, and the loser fails its token exchange. The
//! bridge surfaces conflicting cookies as client errors rather than
//! guessing which flow a request belongs to.

mod handlers;
mod server;

pub use handlers::{AppState, create_router};
pub use server::Bridge;
