//! Predicates over the binary's output. Run the binary with `NO_COLOR=1`.

#![allow(dead_code)]

use predicates::prelude::*;

pub fn not_in_working_copy() -> impl Predicate<str> {
    predicates::str::contains("Not in a git working copy")
}

/// A listing line: status code padded to two columns, then the path
pub fn has_entry(code: &str, path: &str) -> impl Predicate<str> {
    predicates::str::contains(format!("{code:<2} {path}"))
}

/// A detail line of the form `Key:   value`
pub fn has_field(key: &str, value: &str) -> impl Predicate<str> {
    predicates::str::is_match(format!(r"{key}:\s+{value}")).expect("valid field pattern")
}
