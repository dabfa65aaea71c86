//! Direct mapped slot selection.
//!
//! An index `i` always lands in slot `i % capacity`. A second index mapping to
//! the same slot simply evicts the first one, there is no chaining.

pub const STRING_CACHE_SIZE: usize = 1024;
pub const TYPE_CACHE_SIZE: usize = 1024;
pub const METHOD_TYPE_CACHE_SIZE: usize = 1024;
pub const FIELD_CACHE_SIZE: usize = 1024;
pub const METHOD_CACHE_SIZE: usize = 1024;

/// Slot for `index` in a cache of `capacity` entries.
#[inline(always)]
pub fn slot_index(index: u32, capacity: usize) -> usize {
    debug_assert!(capacity.is_power_of_two());
    index as usize & (capacity - 1)
}

/// Owning index stored in an empty slot.
///
/// Index 0 always maps to slot 0 and index 1 never does (capacity >= 2), so
/// 1 marks slot 0 empty and 0 marks every other slot empty.
#[inline(always)]
pub const fn invalid_index_for_slot(slot: usize) -> u32 {
    if slot == 0 { 1 } else { 0 }
}

/// Number of slots actually allocated for a kind with `num_ids` ids.
pub fn cache_len(capacity: usize, num_ids: u32) -> usize {
    capacity.min(num_ids as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_wraps_at_capacity() {
        assert_eq!(slot_index(0, 16), 0);
        assert_eq!(slot_index(15, 16), 15);
        assert_eq!(slot_index(16, 16), 0);
        assert_eq!(slot_index(37, 16), 5);
    }

    #[test]
    fn sentinel_never_maps_to_its_own_slot() {
        for capacity in [2usize, 4, 64, 1024] {
            for slot in 0..capacity {
                let sentinel = invalid_index_for_slot(slot);
                assert_ne!(
                    slot_index(sentinel, capacity),
                    slot,
                    "sentinel {} for slot {} collides at capacity {}",
                    sentinel,
                    slot,
                    capacity
                );
            }
        }
    }

    #[test]
    fn len_is_bounded_by_ids() {
        assert_eq!(cache_len(1024, 10), 10);
        assert_eq!(cache_len(1024, 5000), 1024);
        assert_eq!(cache_len(1024, 0), 0);
    }
}
