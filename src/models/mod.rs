//! Domain models for the Root-Me mirror.
//!
//! Plain typed records shared by the decoder, the repository, the sync engine
//! and the admin API.

mod author;
mod challenge;
mod events;
mod scoreboard;

pub use author::*;
pub use challenge::*;
pub use events::*;
pub use scoreboard::*;
