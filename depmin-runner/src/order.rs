// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution orders: immutable, value-comparable sequences of tests.

use depmin_metadata::TestName;
use std::{fmt, ops::Deref, sync::Arc};

/// An ordered sequence of tests to run.
///
/// Orders are immutable and compare, hash and sort by their contents, so they can be used as map
/// keys. Cloning is cheap.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ExecutionOrder(Arc<[TestName]>);

impl ExecutionOrder {
    /// Creates a new execution order from a sequence of tests.
    pub fn new<I, T>(tests: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TestName>,
    {
        Self(tests.into_iter().map(Into::into).collect())
    }

    /// Builds the order `prefix ++ middle ++ [dependent_test]`.
    pub fn with_dependent(
        prefix: &[TestName],
        middle: &[TestName],
        dependent_test: &TestName,
    ) -> Self {
        Self(
            prefix
                .iter()
                .chain(middle)
                .chain(std::iter::once(dependent_test))
                .cloned()
                .collect(),
        )
    }

    /// Returns the tests as a slice.
    pub fn as_slice(&self) -> &[TestName] {
        &self.0
    }

    /// Returns the index of the first occurrence of `test`, if any.
    pub fn position(&self, test: &TestName) -> Option<usize> {
        self.0.iter().position(|t| t == test)
    }

    /// Returns the order truncated at and including the first occurrence of `test`.
    ///
    /// If `test` does not occur, the whole order is returned.
    pub fn prefix_through(&self, test: &TestName) -> ExecutionOrder {
        match self.position(test) {
            Some(index) if index + 1 < self.0.len() => Self(self.0[..=index].into()),
            _ => self.clone(),
        }
    }

    /// Returns the tests that run strictly before the first occurrence of `test`.
    ///
    /// If `test` does not occur, every test in the order is returned.
    pub fn tests_before(&self, test: &TestName) -> &[TestName] {
        match self.position(test) {
            Some(index) => &self.0[..index],
            None => &self.0,
        }
    }
}

impl Deref for ExecutionOrder {
    type Target = [TestName];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<TestName>> for ExecutionOrder {
    fn from(tests: Vec<TestName>) -> Self {
        Self(tests.into())
    }
}

impl fmt::Display for ExecutionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (index, test) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{test}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_case::test_case;

    #[test_case(&["a", "b", "t", "c"], "t", &["a", "b", "t"] ; "truncates after test")]
    #[test_case(&["a", "t"], "t", &["a", "t"] ; "test is last")]
    #[test_case(&["t", "a", "t"], "t", &["t"] ; "first occurrence")]
    #[test_case(&["a", "b"], "t", &["a", "b"] ; "test absent")]
    fn prefix_through(order: &[&str], test: &str, expected: &[&str]) {
        let order = ExecutionOrder::new(order.iter().copied());
        let prefix = order.prefix_through(&TestName::new(test));
        assert_eq!(prefix, ExecutionOrder::new(expected.iter().copied()));
    }

    #[test]
    fn structural_equality_as_map_key() {
        let mut map = HashMap::new();
        map.insert(ExecutionOrder::new(["a", "t"]), 1);

        // A separately built order with the same contents finds the same entry.
        let rebuilt = ExecutionOrder::with_dependent(&[TestName::new("a")], &[], &"t".into());
        assert_eq!(map.get(&rebuilt), Some(&1));
        assert_eq!(map.get(&ExecutionOrder::new(["t", "a"])), None);
    }

    #[test]
    fn tests_before_and_display() {
        let order = ExecutionOrder::new(["a", "b", "t"]);
        assert_eq!(
            order.tests_before(&"t".into()),
            &[TestName::new("a"), TestName::new("b")]
        );
        assert_eq!(order.to_string(), "[a, b, t]");
    }
}
