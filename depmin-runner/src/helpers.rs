// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for depmin-runner.

use xxhash_rust::xxh3::xxh3_64;

/// Utilities for pluralizing various words based on count or plurality.
pub(crate) mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub(crate) fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "dependency" if `count` is 1, otherwise "dependencies".
    pub(crate) fn dependencies_str(count: usize) -> &'static str {
        if count == 1 {
            "dependency"
        } else {
            "dependencies"
        }
    }
}

/// Converts a test name into a string that's safe to use as a file name component.
///
/// Characters outside `[A-Za-z0-9._-]` are replaced with `_`. If anything was replaced, an
/// 8-character hash of the full name is appended, so that names like `a::b` and `a__b` don't
/// share a file.
pub(crate) fn test_file_component(name: &str) -> String {
    let sanitized = sanitize_file_component(name);
    if sanitized == name {
        return sanitized;
    }

    let hash = xxh3_64(name.as_bytes());
    format!("{sanitized}-{:08x}", hash & 0xFFFFFFFF)
}

fn sanitize_file_component(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    // "." and ".." have special meaning as path components.
    if sanitized.chars().all(|c| c == '.') {
        sanitized.replace('.', "_")
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("pkg.FooTest.testBar", "pkg.FooTest.testBar" ; "java style name")]
    #[test_case("mod::tests::it_works", "mod__tests__it_works" ; "rust style name")]
    #[test_case("a/b\\c d", "a_b_c_d" ; "path separators")]
    #[test_case("..", "__" ; "parent dir")]
    fn sanitize(input: &str, expected: &str) {
        assert_eq!(sanitize_file_component(input), expected);
    }

    #[test]
    fn test_file_component_is_unique() {
        // Names that are already safe are used as is.
        assert_eq!(test_file_component("pkg.FooTest.testBar"), "pkg.FooTest.testBar");
        assert_eq!(test_file_component("a__b"), "a__b");

        let rust_style = test_file_component("a::b");
        let (prefix, hash) = rust_style
            .rsplit_once('-')
            .expect("sanitized names carry a hash suffix");
        assert_eq!(prefix, "a__b");
        assert_eq!(hash.len(), 8);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()), "{hash}");

        let components = [
            test_file_component("a::b"),
            test_file_component("a__b"),
            test_file_component("a/b"),
            test_file_component("a é"),
            test_file_component("a ü"),
        ];
        let distinct: std::collections::HashSet<_> = components.iter().collect();
        assert_eq!(distinct.len(), components.len(), "{components:?}");
    }
}
