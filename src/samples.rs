use std::collections::{BTreeMap, HashMap};

use crate::domain::{Sample, SampleType};

/// Sample metadata of one store, indexed by id and by name.
#[derive(Debug, Clone, Default)]
pub struct Samples {
    by_id: BTreeMap<i32, Sample>,
    by_name: HashMap<String, i32>,
}

impl Samples {
    pub fn new(samples: impl IntoIterator<Item = Sample>) -> Self {
        let mut registry = Self::default();
        for sample in samples {
            registry.by_name.insert(sample.name.clone(), sample.id);
            registry.by_id.insert(sample.id, sample);
        }
        registry
    }

    pub fn get(&self, id: i32) -> Option<&Sample> {
        self.by_id.get(&id)
    }

    pub fn find(&self, name: &str) -> Option<&Sample> {
        self.by_name.get(name).and_then(|id| self.by_id.get(id))
    }

    pub fn as_map(&self) -> &BTreeMap<i32, Sample> {
        &self.by_id
    }

    /// Samples sorted by id. The position in the list is not the sample id.
    pub fn ordered(&self) -> Vec<&Sample> {
        self.by_id.values().collect()
    }

    /// Samples in id order, optionally restricted to one data type.
    pub fn of_type(&self, data_type: Option<SampleType>) -> Vec<&Sample> {
        self.by_id
            .values()
            .filter(|sample| data_type.is_none_or(|wanted| sample.data_type == wanted))
            .collect()
    }

    pub fn names(&self, data_type: Option<SampleType>) -> Vec<&str> {
        self.of_type(data_type)
            .into_iter()
            .map(|sample| sample.name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Samples {
        Samples::new(vec![
            Sample::new(2, "treated", SampleType::Numeric),
            Sample::new(0, "control", SampleType::Numeric),
            Sample::new(1, "call", SampleType::Text),
        ])
    }

    #[test]
    fn ordered_by_id() {
        let samples = registry();
        let ids: Vec<i32> = samples.ordered().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn lookup_by_name() {
        let samples = registry();
        assert_eq!(samples.find("treated").map(|s| s.id), Some(2));
        assert!(samples.find("missing").is_none());
    }

    #[test]
    fn names_filtered_by_type() {
        let samples = registry();
        assert_eq!(
            samples.names(Some(SampleType::Numeric)),
            vec!["control", "treated"]
        );
        assert_eq!(samples.names(None).len(), 3);
    }
}
