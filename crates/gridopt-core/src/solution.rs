//! Sparse solution map shaped like the data dictionary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Field name to value for one component record.
pub type FieldValues = BTreeMap<String, f64>;

/// `component class -> id -> field -> value`.
///
/// Only fields a model actually produced are present, so a DC solve has no
/// `qg` entries and a failed solve is simply empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SolutionData(BTreeMap<String, BTreeMap<String, FieldValues>>);

impl SolutionData {
    pub fn set(&mut self, component: &str, id: &str, field: &str, value: f64) {
        self.0
            .entry(component.to_string())
            .or_default()
            .entry(id.to_string())
            .or_default()
            .insert(field.to_string(), value);
    }

    pub fn get(&self, component: &str, id: &str, field: &str) -> Option<f64> {
        self.0.get(component)?.get(id)?.get(field).copied()
    }

    pub fn component(&self, component: &str) -> Option<&BTreeMap<String, FieldValues>> {
        self.0.get(component)
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|records| records.is_empty())
    }

    /// Number of `(component, id)` records carrying at least one value.
    pub fn record_count(&self) -> usize {
        self.0.values().map(|records| records.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut sol = SolutionData::default();
        assert!(sol.is_empty());
        sol.set("bus", "1", "vm", 1.02);
        sol.set("bus", "1", "va", 0.0);
        sol.set("gen", "3", "pg", 0.4);
        assert_eq!(sol.get("bus", "1", "vm"), Some(1.02));
        assert_eq!(sol.get("bus", "2", "vm"), None);
        assert_eq!(sol.record_count(), 2);
    }

    #[test]
    fn test_serializes_as_nested_map() {
        let mut sol = SolutionData::default();
        sol.set("gen", "1", "pg", 1.0);
        let json = serde_json::to_string(&sol).unwrap();
        assert_eq!(json, r#"{"gen":{"1":{"pg":1.0}}}"#);
    }
}
