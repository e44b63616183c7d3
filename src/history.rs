//! Last-known-value storage
//!
//! Every subscription owns a store of the most recent value seen for each
//! field, seeded from the initial snapshot image and folded forward by live
//! updates. The provider seam lets a deployment swap the in-memory map for a
//! shared cache without touching the broker.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::models::fields::FieldMap;

pub trait LastKnownValueStore: Send + Sync {
    /// Folds an update into the store, field by field
    fn update(&self, fields: &FieldMap);

    /// Copy of the current last-known values
    fn last_known_values(&self) -> FieldMap;

    fn is_empty(&self) -> bool;
}

pub trait LastKnownValueStoreProvider: Send + Sync {
    fn new_store(&self, unique_id: &str) -> Arc<dyn LastKnownValueStore>;
}

/// In-memory store backed by a field map
pub struct MapLastKnownValueStore {
    values: RwLock<FieldMap>,
}

impl MapLastKnownValueStore {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(FieldMap::new()),
        }
    }
}

impl Default for MapLastKnownValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LastKnownValueStore for MapLastKnownValueStore {
    fn update(&self, fields: &FieldMap) {
        let mut values = self.values.write();
        for (name, value) in fields {
            values.insert(name.clone(), value.clone());
        }
    }

    fn last_known_values(&self) -> FieldMap {
        self.values.read().clone()
    }

    fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

/// Provider handing out a fresh in-memory store per subscription
pub struct MapLastKnownValueStoreProvider;

impl LastKnownValueStoreProvider for MapLastKnownValueStoreProvider {
    fn new_store(&self, _unique_id: &str) -> Arc<dyn LastKnownValueStore> {
        Arc::new(MapLastKnownValueStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fields::FieldValue;
    use rust_decimal_macros::dec;

    #[test]
    fn test_updates_fold_forward() {
        let store = MapLastKnownValueStore::new();
        assert!(store.is_empty());

        let mut first = FieldMap::new();
        first.insert("bid".to_string(), FieldValue::Decimal(dec!(1.10)));
        first.insert("ask".to_string(), FieldValue::Decimal(dec!(1.12)));
        store.update(&first);

        let mut second = FieldMap::new();
        second.insert("bid".to_string(), FieldValue::Decimal(dec!(1.11)));
        store.update(&second);

        let values = store.last_known_values();
        assert_eq!(values.get("bid"), Some(&FieldValue::Decimal(dec!(1.11))));
        // untouched fields survive partial updates
        assert_eq!(values.get("ask"), Some(&FieldValue::Decimal(dec!(1.12))));
    }
}
