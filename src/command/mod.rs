//! Dynamic command protocol
//!
//! One declarative [`CommandSchema`] generates both sides of a service's
//! network surface: a [`Proxy`] with one callable per entry on the client,
//! and a [`Dispatcher`] lookup table on the server. Because both are built
//! from the same schema, client and server can never drift out of sync on
//! command names or argument order; the namespace is asserted once, at
//! load time.

mod dispatch;
mod proxy;
mod schema;
mod template;

pub use dispatch::{Dispatcher, HandlerFn, HandlerTable};
pub use proxy::Proxy;
pub use schema::{CommandEntry, CommandSchema, CommandSpec};
pub use template::{ArgSet, ArgTemplate, ArgValues};
