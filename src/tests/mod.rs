//! End-to-end protocol scenarios, exercised against the crate's public
//! API the way an embedder would drive it -- no access to module
//! internals beyond what `lib.rs` re-exports.

mod scenarios;
