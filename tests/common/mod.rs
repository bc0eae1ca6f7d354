//! Shared utilities for the integration tests: real git repositories created
//! with the `git` executable, a scripted in-memory backend and output
//! predicates for the binary.

pub mod assertions;
pub mod fake_backend;
pub mod repository;
