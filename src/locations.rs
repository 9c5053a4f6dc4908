use std::collections::{HashMap, HashSet};

/// Primary code used when a location field carries no explicit primary.
pub const DEFAULT_PRIMARY: &str = "OTHER";

const SEPARATOR: char = '-';

/// Static location hierarchy: primary code to the set of secondary codes it
/// contains. Built once from configuration, pure lookup afterwards.
pub struct LocationTable {
    table: HashMap<String, HashSet<String>>,
}

impl LocationTable {
    pub fn new(locations: &HashMap<String, Vec<String>>) -> Self {
        let table = locations
            .iter()
            .map(|(primary, secondaries)| {
                (primary.clone(), secondaries.iter().cloned().collect())
            })
            .collect();
        LocationTable { table }
    }

    /// Validate a raw location field against the table.
    ///
    /// The field splits on the first separator only; a secondary code may
    /// itself contain the separator. Without a separator the whole field is
    /// the secondary code under the default primary.
    pub fn validate(&self, field: &str) -> Option<(String, String)> {
        let (primary, secondary) = match field.split_once(SEPARATOR) {
            Some((primary, secondary)) => (primary, secondary),
            None => (DEFAULT_PRIMARY, field),
        };

        let members = self.table.get(primary)?;
        if members.contains(secondary) {
            Some((primary.to_string(), secondary.to_string()))
        } else {
            None
        }
    }
}
