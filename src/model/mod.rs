use std::{
    borrow::{Borrow, BorrowMut},
    collections::BTreeMap,
    hash::Hash,
};

pub mod location;
pub mod package;
pub mod route_run;
pub mod truck;

pub type MapType<K, V> = BTreeMap<K, V>;

/// Thin wrapper over [`MapType`] giving every id-keyed table in this crate
/// the same lookup vocabulary, the way `dpdp_rust::model::Map` does for its
/// `FactoryId`/`VehicleId`/`OrderItemId` tables.
pub trait Map<K, V>: BorrowMut<MapType<K, V>> + Into<MapType<K, V>>
where
    K: Eq + Ord + 'static,
    V: 'static,
{
    fn gets<Q>(&self, key: &Q) -> &V
    where
        K: Borrow<Q> + Ord,
        Q: ?Sized + Hash + Eq + Ord,
    {
        self.borrow().get(key).expect("unchecked get failed")
    }

    fn gets_mut<Q>(&mut self, key: &Q) -> &mut V
    where
        K: Borrow<Q> + Ord,
        Q: ?Sized + Hash + Eq + Ord,
    {
        self.borrow_mut()
            .get_mut(key)
            .expect("unchecked get_mut failed")
    }

    fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q> + Ord,
        Q: ?Sized + Hash + Eq + Ord,
    {
        self.borrow().get(key)
    }

    fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q> + Ord,
        Q: ?Sized + Hash + Eq + Ord,
    {
        self.borrow_mut().get_mut(key)
    }

    fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.borrow().iter()
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.borrow_mut().iter_mut()
    }

    fn keys(&self) -> impl Iterator<Item = &K> {
        self.borrow().keys()
    }

    fn values(&self) -> impl Iterator<Item = &V> {
        self.borrow().values()
    }

    fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.borrow_mut().values_mut()
    }

    fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q> + Ord,
        Q: ?Sized + Hash + Eq + Ord,
    {
        self.borrow().contains_key(key)
    }

    fn len(&self) -> usize {
        self.borrow().len()
    }

    fn is_empty(&self) -> bool {
        self.borrow().is_empty()
    }

    fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.borrow_mut().insert(key, value)
    }
}

#[macro_export]
macro_rules! define_map {
    ($key:ty, $value:ty, $base:ident) => {
        #[derive(Debug, Default, Clone)]
        pub struct $base($crate::model::MapType<$key, $value>);

        impl std::borrow::Borrow<$crate::model::MapType<$key, $value>> for $base {
            fn borrow(&self) -> &$crate::model::MapType<$key, $value> {
                &self.0
            }
        }

        impl std::borrow::BorrowMut<$crate::model::MapType<$key, $value>> for $base {
            fn borrow_mut(&mut self) -> &mut $crate::model::MapType<$key, $value> {
                &mut self.0
            }
        }

        impl $crate::model::Map<$key, $value> for $base {}

        impl From<$crate::model::MapType<$key, $value>> for $base {
            fn from(map: $crate::model::MapType<$key, $value>) -> Self {
                Self(map)
            }
        }

        impl From<$base> for $crate::model::MapType<$key, $value> {
            fn from(base: $base) -> Self {
                base.0
            }
        }

        impl IntoIterator for $base {
            type Item = ($key, $value);
            type IntoIter =
                <$crate::model::MapType<$key, $value> as std::iter::IntoIterator>::IntoIter;

            fn into_iter(self) -> Self::IntoIter {
                self.0.into_iter()
            }
        }
    };
}

/// Open-hashing slot table shared by [`truck::Truck`]'s inventory and
/// [`package::PackageStore`]'s by-id index.
///
/// Behavioral contract, not an optimization: the bucket for id `p` is
/// `p % capacity`, with linear probing inside the bucket.
#[derive(Debug, Clone)]
pub struct SlotTable<T> {
    capacity: usize,
    buckets: Vec<Vec<(u32, T)>>,
    size: usize,
}

impl<T> SlotTable<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "slot table capacity must be positive");
        Self {
            capacity,
            buckets: (0..capacity).map(|_| Vec::new()).collect(),
            size: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn bucket_index(&self, id: u32) -> usize {
        (id as usize) % self.capacity
    }

    /// Inserts `value` under `id`. Returns `false` without mutating the
    /// table if it is already at capacity and `id` is new.
    pub fn insert(&mut self, id: u32, value: T) -> bool {
        let bucket = self.bucket_index(id);
        if let Some(slot) = self.buckets[bucket].iter_mut().find(|(k, _)| *k == id) {
            slot.1 = value;
            return true;
        }
        if self.size >= self.capacity {
            return false;
        }
        self.buckets[bucket].push((id, value));
        self.size += 1;
        true
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        let bucket = self.bucket_index(id);
        self.buckets[bucket]
            .iter()
            .find(|(k, _)| *k == id)
            .map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        let bucket = self.bucket_index(id);
        self.buckets[bucket]
            .iter_mut()
            .find(|(k, _)| *k == id)
            .map(|(_, v)| v)
    }

    pub fn remove(&mut self, id: u32) -> Option<T> {
        let bucket = self.bucket_index(id);
        let pos = self.buckets[bucket].iter().position(|(k, _)| *k == id)?;
        self.size -= 1;
        Some(self.buckets[bucket].remove(pos).1)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.buckets.iter().flat_map(|b| b.iter().map(|(_, v)| v))
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.buckets.iter().flat_map(|b| b.iter().map(|(k, _)| *k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_table_respects_capacity() {
        let mut t = SlotTable::new(4);
        assert!(t.insert(1, "a"));
        assert!(t.insert(5, "b")); // same bucket as 1 (1 % 4 == 5 % 4)
        assert!(t.insert(2, "c"));
        assert!(t.insert(3, "d"));
        assert!(!t.insert(8, "e")); // at capacity
        assert_eq!(t.len(), 4);
        assert_eq!(t.get(5), Some(&"b"));
    }

    #[test]
    fn slot_table_remove_frees_a_slot() {
        let mut t = SlotTable::new(2);
        assert!(t.insert(0, 1));
        assert!(t.insert(1, 2));
        assert_eq!(t.remove(0), Some(1));
        assert!(t.insert(2, 3));
        assert_eq!(t.len(), 2);
    }
}
