//! Selection masks.
//!
//! A [`SelectionMask`] is the tree of fields an operation asked for. The
//! merger only touches fields present in the mask, so two operations that
//! select different fields of the same node never overwrite each other's
//! data with defaults.
//!
//! Fragments on concrete types are expressed as `choices`: when a
//! polymorphic field resolves to type `T`, the mask used for it is
//! `choices[T]`, falling back to the field's own selections.
//!
//! # Example
//!
//! ```
//! use lattice_graphql::selection::SelectionMask;
//!
//! let mask = SelectionMask::new()
//!     .select("id")
//!     .select_with("author", SelectionMask::fields(["id", "name"]));
//!
//! assert!(mask.contains("author"));
//! assert!(mask.get("author").unwrap().contains("name"));
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Tree of selected fields and per-type fragment choices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionMask {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    selections: BTreeMap<String, SelectionMask>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    choices: BTreeMap<String, SelectionMask>,
}

impl SelectionMask {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mask of leaf fields.
    pub fn fields<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().fold(Self::new(), |mask, name| mask.select(name))
    }

    /// Select a leaf field.
    pub fn select(self, name: impl Into<String>) -> Self {
        self.select_with(name, Self::new())
    }

    /// Select a field with a nested mask.
    pub fn select_with(mut self, name: impl Into<String>, nested: SelectionMask) -> Self {
        self.selections.insert(name.into(), nested);
        self
    }

    /// Add a fragment for a concrete type.
    pub fn on_type(mut self, type_name: impl Into<String>, nested: SelectionMask) -> Self {
        self.choices.insert(type_name.into(), nested);
        self
    }

    /// Whether `name` is selected.
    pub fn contains(&self, name: &str) -> bool {
        self.selections.contains_key(name)
    }

    /// Nested mask of a selected field.
    pub fn get(&self, name: &str) -> Option<&SelectionMask> {
        self.selections.get(name)
    }

    /// Mask to apply once a polymorphic value resolved to `type_name`.
    pub fn choice(&self, type_name: &str) -> &SelectionMask {
        self.choices.get(type_name).unwrap_or(self)
    }

    /// Selected field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.selections.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty() && self.choices.is_empty()
    }
}
