//! Session layer
//!
//! One [`Session`] per connected client, holding that client's own set of
//! backend connections and the capability routing built from them. The
//! [`SessionManager`] owns all live sessions; the [`SessionFactory`] builds
//! them; the [`SessionStore`] decides which identifiers are still valid.

pub mod factory;
pub mod keepalive;
pub mod manager;
pub mod session;
pub mod store;

pub use factory::SessionFactory;
pub use keepalive::spawn_keepalive;
pub use manager::SessionManager;
pub use session::Session;
pub use store::{MemorySessionStore, SessionMetadata, SessionStore};
