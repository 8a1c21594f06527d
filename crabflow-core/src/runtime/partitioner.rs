//! # Partitioner
//!
//! Channel selectors that route a record to one or more output channels of
//! a consumer group.
//!
//! Every selector rejects `num_channels == 0` with
//! [`RoutingError::InvalidChannelCount`] and never mutates the record.

use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::AHasher;

use crate::error::RoutingError;
use crate::graph::ShipStrategy;
use crate::types::StreamRecord;

/// Routes records to channel indices in `0..num_channels`.
pub trait ChannelSelector<T>: Send + Sync {
    /// Return the channels that should receive `record`.
    fn select_channels(
        &self,
        record: &StreamRecord<T>,
        num_channels: usize,
    ) -> Result<Vec<usize>, RoutingError>;
}

fn check_channels(num_channels: usize) -> Result<(), RoutingError> {
    if num_channels == 0 {
        Err(RoutingError::InvalidChannelCount)
    } else {
        Ok(())
    }
}

/// Positional access to the key fields of a record, for [`FieldsHashSelector`].
pub trait KeyFields {
    /// Feed the field at `position` into `hasher`. Returns false when the
    /// record has no such field.
    fn hash_field(&self, position: usize, hasher: &mut AHasher) -> bool;
}

macro_rules! impl_key_fields_for_scalar {
    ($($ty:ty),+) => {
        $(
            impl KeyFields for $ty {
                fn hash_field(&self, position: usize, hasher: &mut AHasher) -> bool {
                    if position == 0 {
                        self.hash(hasher);
                        true
                    } else {
                        false
                    }
                }
            }
        )+
    };
}

impl_key_fields_for_scalar!(String, &'static str, bool, i32, i64, u32, u64, usize);

macro_rules! impl_key_fields_for_tuple {
    ($($idx:tt $name:ident),+) => {
        impl<$($name: Hash),+> KeyFields for ($($name,)+) {
            fn hash_field(&self, position: usize, hasher: &mut AHasher) -> bool {
                match position {
                    $($idx => {
                        self.$idx.hash(hasher);
                        true
                    })+
                    _ => false,
                }
            }
        }
    };
}

impl_key_fields_for_tuple!(0 A);
impl_key_fields_for_tuple!(0 A, 1 B);
impl_key_fields_for_tuple!(0 A, 1 B, 2 C);
impl_key_fields_for_tuple!(0 A, 1 B, 2 C, 3 D);

impl<V: Hash> KeyFields for [V] {
    fn hash_field(&self, position: usize, hasher: &mut AHasher) -> bool {
        match self.get(position) {
            Some(field) => {
                field.hash(hasher);
                true
            }
            None => false,
        }
    }
}

impl<V: Hash> KeyFields for Vec<V> {
    fn hash_field(&self, position: usize, hasher: &mut AHasher) -> bool {
        self.as_slice().hash_field(position, hasher)
    }
}

/// Routes by the partition tag a keying stage stored on the record.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardSelector;

impl<T> ChannelSelector<T> for ForwardSelector {
    fn select_channels(
        &self,
        record: &StreamRecord<T>,
        num_channels: usize,
    ) -> Result<Vec<usize>, RoutingError> {
        check_channels(num_channels)?;
        let tag = record
            .partition_tag
            .ok_or(RoutingError::MissingPartitionTag)?;
        Ok(vec![(tag % num_channels as u64) as usize])
    }
}

/// Routes by the hash of one key field.
///
/// Uses ahash with fixed keys, so equal fields land on the same channel in
/// every process running the same build.
#[derive(Debug, Clone, Copy)]
pub struct FieldsHashSelector {
    key_position: usize,
}

impl FieldsHashSelector {
    pub fn new(key_position: usize) -> Self {
        Self { key_position }
    }

    pub fn key_position(&self) -> usize {
        self.key_position
    }

    /// The hash of the key field. A keying stage stores this as the record's
    /// partition tag so downstream forward edges agree with this selector.
    pub fn partition_tag<T: KeyFields + ?Sized>(&self, value: &T) -> Result<u64, RoutingError> {
        let mut hasher = AHasher::default();
        if !value.hash_field(self.key_position, &mut hasher) {
            return Err(RoutingError::KeyFieldOutOfRange {
                position: self.key_position,
            });
        }
        Ok(hasher.finish())
    }
}

impl<T: KeyFields> ChannelSelector<T> for FieldsHashSelector {
    fn select_channels(
        &self,
        record: &StreamRecord<T>,
        num_channels: usize,
    ) -> Result<Vec<usize>, RoutingError> {
        check_channels(num_channels)?;
        let hash = self.partition_tag(&record.value)?;
        Ok(vec![(hash % num_channels as u64) as usize])
    }
}

/// Sends every record to all channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastSelector;

impl<T> ChannelSelector<T> for BroadcastSelector {
    fn select_channels(
        &self,
        _record: &StreamRecord<T>,
        num_channels: usize,
    ) -> Result<Vec<usize>, RoutingError> {
        check_channels(num_channels)?;
        Ok((0..num_channels).collect())
    }
}

/// Hash-based selector using a key selector function.
pub struct KeySelectorHash<K, F> {
    key_selector: F,
    _phantom: PhantomData<fn() -> K>,
}

impl<K, F> KeySelectorHash<K, F> {
    /// Create a new hash selector with the given key selector.
    pub fn new(key_selector: F) -> Self {
        Self {
            key_selector,
            _phantom: PhantomData,
        }
    }
}

impl<K, T, F> ChannelSelector<T> for KeySelectorHash<K, F>
where
    K: Hash,
    F: Fn(&T) -> K + Send + Sync,
{
    fn select_channels(
        &self,
        record: &StreamRecord<T>,
        num_channels: usize,
    ) -> Result<Vec<usize>, RoutingError> {
        check_channels(num_channels)?;
        let key = (self.key_selector)(&record.value);
        let mut hasher = AHasher::default();
        key.hash(&mut hasher);
        Ok(vec![(hasher.finish() % num_channels as u64) as usize])
    }
}

/// Round-robin selector for pointwise groups that fan out to several
/// consumers. Not deterministic per record.
#[derive(Debug, Default)]
pub struct RebalanceSelector {
    counter: AtomicUsize,
}

impl RebalanceSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T> ChannelSelector<T> for RebalanceSelector {
    fn select_channels(
        &self,
        _record: &StreamRecord<T>,
        num_channels: usize,
    ) -> Result<Vec<usize>, RoutingError> {
        check_channels(num_channels)?;
        if num_channels == 1 {
            return Ok(vec![0]);
        }
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(vec![count % num_channels])
    }
}

/// Build the selector a consumer group with `ship` routes through.
pub fn selector_for<T>(ship: ShipStrategy) -> Box<dyn ChannelSelector<T>>
where
    T: KeyFields + 'static,
{
    match ship {
        ShipStrategy::Forward => Box::new(ForwardSelector),
        ShipStrategy::FieldsHash { key_position } => Box::new(FieldsHashSelector::new(key_position)),
        ShipStrategy::Broadcast => Box::new(BroadcastSelector),
        ShipStrategy::Pointwise => Box::new(RebalanceSelector::new()),
    }
}

#[cfg(test)]
#[path = "tests/partitioner_tests.rs"]
mod tests;
