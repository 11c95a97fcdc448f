//! Authentication module
//!
//! - `Credential` / `AuthMethod` / `MethodSet`: what a client presents
//! - `AuthVerdict`: what a policy answers
//! - `AuthPolicy`: pluggable decision logic, with the built-in `Policy` variants
//! - `AuthorizedKeys`: per-user key material loaded from config and keyfiles

mod credential;
mod keyfile;
mod policy;
mod verdict;

pub use credential::{AuthMethod, Credential, MethodSet};
pub use keyfile::{AuthorizedKey, AuthorizedKeys, load_keyfile};
pub use policy::{AuthPolicy, Policy, PolicyKind};
pub use verdict::{AuthVerdict, NextMethods};
