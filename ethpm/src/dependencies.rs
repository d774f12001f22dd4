//! Resolved build dependencies of a package, keyed by declared name.

use std::collections::BTreeMap;

use crate::package::{Package, PackageError};

#[derive(Debug, Default)]
pub struct Dependencies {
    packages: BTreeMap<String, Package>,
}

impl Dependencies {
    pub fn new(packages: BTreeMap<String, Package>) -> Self {
        Dependencies { packages }
    }

    pub fn get(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    /// Like [`get`](Self::get), but a missing name is an error.
    pub fn package(&self, name: &str) -> Result<&Package, PackageError> {
        self.get(name)
            .ok_or_else(|| PackageError::DependencyNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Package)> {
        self.packages.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}
