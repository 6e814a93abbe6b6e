//! Resource Tables
//!
//! A resource table is a fixed-size array of optional capabilities of
//! one kind. Handles are issued for the first empty slot and name that
//! slot until released.
//!
//! # Design
//! - Fixed capacity, never grows
//! - Slots are addressed by decoded [`Handle`]s of the table's kind
//! - A released slot may be reissued; holders must not keep stale handles

use super::handle::{Handle, HandleError, HandleKind};

/// Fixed-capacity table of `N` optional `T`s of one handle kind.
pub struct ResourceTable<T, const N: usize> {
    kind: HandleKind,
    slots: [Option<T>; N],
}

impl<T, const N: usize> ResourceTable<T, N> {
    /// Create an empty table for `kind`.
    pub fn new(kind: HandleKind) -> Self {
        debug_assert_eq!(N, kind.capacity());
        Self {
            kind,
            slots: core::array::from_fn(|_| None),
        }
    }

    /// Kind of handle this table issues.
    #[inline]
    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    fn index_of(&self, handle: Handle) -> Result<usize, HandleError> {
        if handle.kind() != self.kind {
            return Err(HandleError::WrongKind {
                expected: self.kind,
                found: handle.kind(),
            });
        }
        if handle.index() >= N {
            return Err(HandleError::OutOfRange(self.kind, handle.index()));
        }
        Ok(handle.index())
    }

    /// Find the first free slot.
    pub fn find_free(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Store `value` in the first free slot and return its handle.
    pub fn allocate(&mut self, value: T) -> Result<Handle, HandleError> {
        let index = self.find_free().ok_or(HandleError::TableFull(self.kind))?;
        self.slots[index] = Some(value);
        Ok(Handle::new(self.kind, index))
    }

    /// Store `value` at a specific slot, replacing whatever was there.
    pub fn install(&mut self, index: usize, value: T) -> Result<Handle, HandleError> {
        let handle = Handle::new(self.kind, index);
        let index = self.index_of(handle)?;
        self.slots[index] = Some(value);
        Ok(handle)
    }

    /// Look up the capability named by `handle`.
    pub fn get(&self, handle: Handle) -> Result<&T, HandleError> {
        let index = self.index_of(handle)?;
        self.slots[index].as_ref().ok_or(HandleError::EmptySlot)
    }

    /// Decode `raw` as this table's kind and look it up.
    pub fn lookup(&self, raw: i32) -> Result<&T, HandleError> {
        let index = Handle::decode_as(raw, self.kind)?;
        self.get(Handle::new(self.kind, index))
    }

    /// Empty the slot named by `handle`, returning its capability.
    ///
    /// Releasing an empty slot fails, so a double close is reported.
    pub fn release(&mut self, handle: Handle) -> Result<T, HandleError> {
        let index = self.index_of(handle)?;
        self.slots[index].take().ok_or(HandleError::EmptySlot)
    }

    /// Iterate over occupied slots.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (i, v)))
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl<T: Clone, const N: usize> ResourceTable<T, N> {
    /// Copy every occupied slot of `self` into the same slot of `other`.
    ///
    /// Capabilities are cloned, so `Arc`s end up shared between both tables.
    pub fn share_into(&self, other: &mut Self) {
        for (index, value) in self.iter() {
            other.slots[index] = Some(value.clone());
        }
    }
}

impl<T, const N: usize> core::fmt::Debug for ResourceTable<T, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ResourceTable({:?}, {}/{})", self.kind, self.occupied(), N)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cap::handle::{NFILE, NSEM};
    use alloc::sync::Arc;

    #[test]
    fn test_allocate_decode_release() {
        let mut table: ResourceTable<u32, NSEM> = ResourceTable::new(HandleKind::Semaphore);
        let h = table.allocate(42).unwrap();
        assert_eq!(h, Handle::Semaphore(0));
        assert_eq!(table.lookup(h.encode()), Ok(&42));

        assert_eq!(table.release(h), Ok(42));
        assert_eq!(table.lookup(h.encode()), Err(HandleError::EmptySlot));
        assert_eq!(table.release(h), Err(HandleError::EmptySlot));
    }

    #[test]
    fn test_full_then_reuse() {
        let mut table: ResourceTable<usize, NFILE> = ResourceTable::new(HandleKind::File);
        for i in 0..NFILE {
            assert_eq!(table.allocate(i), Ok(Handle::File(i)));
        }
        assert_eq!(table.allocate(99), Err(HandleError::TableFull(HandleKind::File)));

        table.release(Handle::File(4)).unwrap();
        assert_eq!(table.allocate(99), Ok(Handle::File(4)));
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let mut table: ResourceTable<u8, NSEM> = ResourceTable::new(HandleKind::Semaphore);
        table.allocate(1).unwrap();
        assert!(matches!(
            table.get(Handle::File(0)),
            Err(HandleError::WrongKind { .. })
        ));
        assert!(table.lookup(0).is_err());
    }

    #[test]
    fn test_share_into_clones_arcs() {
        let mut parent: ResourceTable<Arc<u8>, NSEM> = ResourceTable::new(HandleKind::Semaphore);
        let value = Arc::new(5);
        parent.install(3, value.clone()).unwrap();

        let mut child = ResourceTable::new(HandleKind::Semaphore);
        parent.share_into(&mut child);
        assert!(Arc::ptr_eq(child.get(Handle::Semaphore(3)).unwrap(), &value));
        assert_eq!(Arc::strong_count(&value), 3);
    }
}
