//! Column storage
//!
//! An archetype delegates component storage to one [`Column`] per component.
//! The archetype only addresses columns by row index and never interprets
//! the stored representation.

use crate::value::Value;
use std::fmt::Debug;

/// Row-indexed storage for a single component
pub trait Column: Debug + Send + Sync {
    /// Read a row
    fn get(&self, row: usize) -> Option<&Value>;

    /// Overwrite a row. Returns false if the row does not exist.
    fn set(&mut self, row: usize, value: Value) -> bool;

    /// Append a row
    fn push(&mut self, value: Value);

    /// Remove a row by moving the last row into its place
    fn swap_remove(&mut self, row: usize) -> Option<Value>;

    /// Number of rows
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release capacity beyond the current row count
    fn compact(&mut self);

    /// Copy out every row, in row order
    fn to_values(&self) -> Vec<Value>;
}

/// Default column backed by a `Vec<Value>`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueColumn {
    values: Vec<Value>,
}

impl ValueColumn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn capacity(&self) -> usize {
        self.values.capacity()
    }
}

impl Column for ValueColumn {
    #[inline]
    fn get(&self, row: usize) -> Option<&Value> {
        self.values.get(row)
    }

    fn set(&mut self, row: usize, value: Value) -> bool {
        match self.values.get_mut(row) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    #[inline]
    fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    fn swap_remove(&mut self, row: usize) -> Option<Value> {
        if row < self.values.len() {
            Some(self.values.swap_remove(row))
        } else {
            None
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.values.len()
    }

    fn compact(&mut self) {
        self.values.shrink_to_fit();
    }

    fn to_values(&self) -> Vec<Value> {
        self.values.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_remove_moves_last_row() {
        let mut column = ValueColumn::from_values(vec![1.into(), 2.into(), 3.into()]);
        assert_eq!(column.swap_remove(0), Some(Value::Int(1)));
        assert_eq!(column.to_values(), vec![Value::Int(3), Value::Int(2)]);
        assert_eq!(column.swap_remove(5), None);
    }

    #[test]
    fn test_compact_releases_capacity() {
        let mut column = ValueColumn::new();
        for i in 0..64 {
            column.push(Value::Int(i));
        }
        for _ in 0..60 {
            column.swap_remove(0);
        }
        column.compact();
        assert_eq!(column.len(), 4);
        assert!(column.capacity() < 64);
    }
}
