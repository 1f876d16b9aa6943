//! Page access for the portal UI
//!
//! `decide` is the pure rule; `RouteGuard` is what views are wrapped in.
//! Both take an `AccessRequirement` built with `public()`, `authenticated()`,
//! `role(r)` or `any_of([..])`.

pub mod guard;
pub mod policy;

pub use guard::{AccessDenied, GuardOutcome, Guarded, RouteGuard};
pub use policy::{AccessRequirement, Decision, decide};
