//! Local assistant that keeps a todo list, executes todos through
//! policy-checked file and shell gateways, and chats with an LLM whose
//! replies may carry todo directives.
//!
//! - **[`core`]**: Pure logic (todo store, policy rules, classification,
//!   directive parsing, execution state). No I/O.
//! - **[`io`]**: Side effects (config and state files, child processes,
//!   gateways, the LLM backend).
//!
//! Orchestration modules ([`policy`], [`dispatch`], [`controller`],
//! [`directives`], [`session`], [`repl`]) combine the two.

pub mod controller;
pub mod core;
pub mod directives;
pub mod dispatch;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod policy;
pub mod repl;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
