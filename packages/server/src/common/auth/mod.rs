//! Identity and role-level authorization.
//!
//! Credentials are issued and verified upstream; this module only carries the
//! resulting identity and answers ownership questions:
//!
//! ```rust,ignore
//! let actor = Actor::from(&auth_user);
//! actor.ensure_requester_or_admin(&task)?;
//! ```

mod identity;

pub use identity::{Actor, AuthUser};
