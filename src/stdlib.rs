//! The standard-library blob registry.
//!
//! The standard library ships as a fixed set of named text blobs; the
//! compiler depends only on this lookup, never on its content. The
//! blobs here are the seed set — hosts embedding the compiler can layer
//! their own resolution in front through a custom `Host`.

/// Canonical path of the core library.
pub const CORE: &str = "std/core.ql";

const CORE_SOURCE: &str = r#"
// Core runtime surface. Array primitives compile to single
// instructions; everything else is ordinary library code.

@intrinsic("__array_len")
export fn array_len<T>(arr: #[T]): i32;

@intrinsic("__array_get")
export fn array_get<T>(arr: #[T], index: i32): T;

@intrinsic("__array_set")
export fn array_set<T>(arr: #[T], index: i32, value: T): void;

@intrinsic("__array_new")
export fn array_new<T>(len: i32, fill: T): #[T];

@intrinsic("unreachable")
export fn unreachable(): never;
"#;

/// Look up a standard library by canonical path.
#[must_use]
pub fn source(path: &str) -> Option<&'static str> {
    match path {
        CORE => Some(CORE_SOURCE),
        _ => None,
    }
}

/// Canonical paths of every registered standard library.
#[must_use]
pub fn all() -> &'static [&'static str] {
    &[CORE]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_closed() {
        assert!(source(CORE).is_some());
        assert!(source("std/unknown.ql").is_none());
    }
}
