//! Domain model (ids, errors, exits, fiber states).

pub mod errors;
pub mod exit;
pub mod ids;
pub mod state;

pub use self::errors::{EffectError, ErrorKind, SharedCause};
pub use self::exit::{Exit, ExitKind};
pub use self::ids::{BindingId, FiberId, ResourceId, ScopeId};
pub use self::state::FiberState;
