//! # Router Module
//!
//! Resolves `(method, path)` to a handler through a radix tree of path segments.
//!
//! Outcomes map onto the HTTP contract:
//!
//! - [`RouteOutcome::Matched`]: handler plus extracted parameters
//! - [`RouteOutcome::MethodNotAllowed`]: the path shape exists, the method does not (405)
//! - [`RouteOutcome::UnknownAction`]: the path shape exists but its action word is not in
//!   the enumerated set (400 `unknown <kind> action`)
//! - [`RouteOutcome::NotFound`]: no route has this shape (404)
//!
//! Patterns use `{name}` for parameters and `{kind:a|b|c}` for action sets; see
//! the radix module for matching precedence.

mod core;
mod path;
mod radix;
#[cfg(test)]
mod tests;

pub use core::{ParamVec, RouteMatch, RouteOutcome, Router};
pub use path::{split_path, Segments};
pub use radix::ACTION_PARAM;
