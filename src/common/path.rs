//! Distributed filesystem paths.
//!
//! A path is an ordered sequence of non-empty components; the root is the
//! empty sequence. The string form is slash-delimited and begins with `/`.
//! The colon is reserved as a delimiter for application use, so neither `/`
//! nor `:` may appear inside a component.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::common::error::{Error, Result};

/// An immutable, value-compared filesystem path.
///
/// The derived ordering compares component-wise, so an ancestor always
/// precedes its descendants. Callers that lock multiple paths at once sort
/// them first, which keeps ancestor/descendant pairs in acquisition order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path {
    components: Vec<String>,
}

impl Path {
    /// The root directory.
    pub fn root() -> Self {
        Path { components: Vec::new() }
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Iterates over the components from the root toward the leaf.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(String::as_str)
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Returns the path extended by one component.
    pub fn append(&self, component: &str) -> Result<Path> {
        if component.is_empty() {
            return Err(Error::InvalidPath("component is empty".to_string()));
        }
        if component.contains('/') || component.contains(':') {
            return Err(Error::InvalidPath(format!(
                "component {component:?} contains a reserved character"
            )));
        }
        Ok(self.child(component))
    }

    /// Extends the path by a component already known to be valid, i.e. one
    /// taken from another parsed `Path`.
    pub(crate) fn child(&self, component: &str) -> Path {
        let mut components = self.components.clone();
        components.push(component.to_string());
        Path { components }
    }

    /// Returns the one-shorter prefix of this path.
    pub fn parent(&self) -> Result<Path> {
        if self.is_root() {
            return Err(Error::InvalidPath("the root has no parent".to_string()));
        }
        let mut components = self.components.clone();
        components.pop();
        Ok(Path { components })
    }

    /// Returns the final component of this path.
    pub fn last(&self) -> Result<&str> {
        self.components
            .last()
            .map(String::as_str)
            .ok_or_else(|| Error::InvalidPath("the root has no last component".to_string()))
    }

    /// True iff `other` is a prefix of this path. Every path is a subpath of
    /// itself.
    pub fn is_subpath(&self, other: &Path) -> bool {
        other.components.len() <= self.components.len()
            && self.components[..other.components.len()] == other.components[..]
    }
}

impl FromStr for Path {
    type Err = Error;

    fn from_str(s: &str) -> Result<Path> {
        if s.is_empty() {
            return Err(Error::InvalidPath("path is empty".to_string()));
        }
        if !s.starts_with('/') {
            return Err(Error::InvalidPath(format!(
                "path {s:?} does not begin with a forward slash"
            )));
        }
        if s.contains(':') {
            return Err(Error::InvalidPath(format!("path {s:?} contains a colon")));
        }
        let components = s
            .split('/')
            .filter(|component| !component.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Path { components })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.components.join("/"))
    }
}

impl TryFrom<String> for Path {
    type Error = Error;

    fn try_from(s: String) -> Result<Path> {
        s.parse()
    }
}

impl From<Path> for String {
    fn from(path: Path) -> String {
        path.to_string()
    }
}
