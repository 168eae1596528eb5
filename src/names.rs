//! Dense name tables for parameters and species.
//!
//! The ODE layer only ever sees indices; names are resolved once, at
//! compile time, through a [`NameTable`].

use std::collections::HashMap;
use std::ops::Index;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Ordered bijection between symbolic names and indices `0..len`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct NameTable {
    names: Vec<String>,
    #[serde(skip)]
    lookup: HashMap<String, usize>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from names in order, rejecting duplicates and empty names.
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::new();
        for name in names {
            let name = name.into();
            if table.contains(&name) {
                return Err(Error::Structure(format!("duplicate name '{name}'")));
            }
            table.push(name)?;
        }
        Ok(table)
    }

    /// Appends `name` and returns its index. An existing name keeps its index.
    pub(crate) fn insert(&mut self, name: &str) -> Result<usize> {
        match self.lookup.get(name) {
            Some(&idx) => Ok(idx),
            None => self.push(name.to_string()),
        }
    }

    fn push(&mut self, name: String) -> Result<usize> {
        if name.trim().is_empty() {
            return Err(Error::Structure("names must not be empty".into()));
        }
        let idx = self.names.len();
        self.lookup.insert(name.clone(), idx);
        self.names.push(name);
        Ok(idx)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    /// Like [`NameTable::index_of`] but fails with a descriptive error.
    pub fn require(&self, name: &str) -> Result<usize> {
        self.index_of(name).ok_or_else(|| {
            Error::InvalidArgument(format!("unknown name '{name}'"))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup.contains_key(name)
    }

    pub fn name(&self, idx: usize) -> Option<&str> {
        self.names.get(idx).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().enumerate().map(|(i, n)| (i, n.as_str()))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Index<usize> for NameTable {
    type Output = str;

    fn index(&self, idx: usize) -> &str {
        &self.names[idx]
    }
}

impl TryFrom<Vec<String>> for NameTable {
    type Error = Error;

    fn try_from(names: Vec<String>) -> Result<Self> {
        Self::from_names(names)
    }
}

impl From<NameTable> for Vec<String> {
    fn from(table: NameTable) -> Self {
        table.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_round_trips_for_every_name() {
        let table = NameTable::from_names(["kf1", "kr1", "V2", "K2"]).unwrap();
        for (idx, name) in table.iter() {
            assert_eq!(table.index_of(name), Some(idx));
            assert_eq!(&table[idx], name);
        }
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn duplicates_and_empty_names_are_rejected() {
        assert!(NameTable::from_names(["A", "B", "A"]).is_err());
        assert!(NameTable::from_names(["A", " "]).is_err());
    }

    #[test]
    fn insert_keeps_first_appearance_order() {
        let mut table = NameTable::new();
        assert_eq!(table.insert("B").unwrap(), 0);
        assert_eq!(table.insert("A").unwrap(), 1);
        assert_eq!(table.insert("B").unwrap(), 0);
        assert_eq!(table.names(), &["B".to_string(), "A".to_string()]);
    }

    #[test]
    fn require_reports_unknown_names() {
        let table = NameTable::from_names(["A"]).unwrap();
        let err = table.require("Z").unwrap_err();
        assert!(err.to_string().contains("'Z'"));
    }

    #[test]
    fn serde_uses_plain_name_lists() {
        let table = NameTable::from_names(["A", "B"]).unwrap();
        let json = serde_json::to_string(&table).unwrap();
        assert_eq!(json, r#"["A","B"]"#);
        let back: NameTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back.index_of("B"), Some(1));
    }
}
