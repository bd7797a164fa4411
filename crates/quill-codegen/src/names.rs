//! Globally-unique name mangling.
//!
//! Non-exported declarations are renamed with a per-library prefix so a
//! whole program lives in one flat WebAssembly namespace. Entry-library
//! exports keep their original identifier names.

use rustc_hash::FxHashMap;

/// Turn a canonical library path into a symbol prefix:
/// `app/util.ql` -> `app_util`.
#[must_use]
pub fn library_prefix(path: &str) -> String {
    let stem = path.strip_suffix(".ql").unwrap_or(path);
    sanitize(stem)
}

/// Replace every non-identifier character with `_`.
#[must_use]
pub fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Issues unique mangled names; repeated requests for the same base get
/// a numeric suffix.
#[derive(Debug, Default)]
pub struct NameTable {
    taken: FxHashMap<String, u32>,
}

impl NameTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a unique name derived from `base`.
    pub fn claim(&mut self, base: &str) -> String {
        let base = sanitize(base);
        match self.taken.get_mut(&base) {
            None => {
                self.taken.insert(base.clone(), 0);
                base
            }
            Some(counter) => {
                *counter += 1;
                format!("{base}_{counter}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_strip_extension_and_sanitize() {
        assert_eq!(library_prefix("app/util.ql"), "app_util");
        assert_eq!(library_prefix("std/core.ql"), "std_core");
    }

    #[test]
    fn claims_are_unique() {
        let mut names = NameTable::new();
        assert_eq!(names.claim("a_f"), "a_f");
        assert_eq!(names.claim("a_f"), "a_f_1");
        assert_eq!(names.claim("a_f"), "a_f_2");
    }
}
