//! Per-class object tables and the allocation protocol
use core::{fmt, ops::Deref};
use std::sync::{Arc, Mutex, MutexGuard};

use osal_core::{
    error::{AllocError, InvalidHandleError},
    handle::{Handle, ObjectClass, GENERATION_LIMIT},
    name::ObjectName,
};

/// A fixed-capacity table of objects of one class.
///
/// The table lock is only held for slot state transitions. A slot is first
/// `Reserved` under the lock, so that no other thread can claim it or its
/// name, then populated by the caller without the lock (backend
/// initialization may block), and finally made `Active`.
pub(crate) struct ObjectTable<P> {
    class: ObjectClass,
    inner: Mutex<TableInner<P>>,
}

struct TableInner<P> {
    slots: Box<[Slot<P>]>,
    /// The index of the most recently reserved slot. Scans start after it so
    /// that a released slot is not immediately reused.
    last_issued: usize,
}

struct Slot<P> {
    state: SlotState<P>,
    generation: u16,
}

enum SlotState<P> {
    Unused,
    Reserved {
        name: Option<ObjectName>,
    },
    Active {
        name: Option<ObjectName>,
        payload: Arc<P>,
    },
    /// The generation counter is exhausted; the slot is never reused.
    Retired,
}

impl<P> SlotState<P> {
    fn name(&self) -> Option<&ObjectName> {
        match self {
            Self::Reserved { name } | Self::Active { name, .. } => name.as_ref(),
            Self::Unused | Self::Retired => None,
        }
    }
}

impl<P> Slot<P> {
    /// Return the slot to `Unused` (or `Retired`) and invalidate every handle
    /// issued for it so far.
    fn release(&mut self, class: ObjectClass, index: usize) {
        let next = self.generation.wrapping_add(1);
        if next >= GENERATION_LIMIT {
            log::warn!("{class} slot {index} exhausted its generation counter and is retired");
            self.state = SlotState::Retired;
        } else {
            self.state = SlotState::Unused;
        }
        self.generation = next;
    }
}

/// A slot in the `Reserved` state.
///
/// Dropping a `Reservation` without calling [`Self::activate`] aborts the
/// creation: the slot returns to `Unused` with a new generation, so the
/// speculative handle never becomes valid.
#[must_use]
pub(crate) struct Reservation<'a, P> {
    table: &'a ObjectTable<P>,
    index: usize,
    handle: Handle,
    armed: bool,
}

impl<P> Reservation<'_, P> {
    /// The handle the object will have once activated.
    #[inline]
    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }

    /// Install the payload and make the object visible.
    pub(crate) fn activate(mut self, payload: P) -> ObjectRef<P> {
        self.armed = false;
        let payload = Arc::new(payload);
        let mut inner = self.table.lock();
        let slot = &mut inner.slots[self.index];
        let name = match &mut slot.state {
            SlotState::Reserved { name } => name.take(),
            _ => panic!(
                "{} slot {} was activated without being reserved",
                self.table.class, self.index
            ),
        };
        slot.state = SlotState::Active {
            name,
            payload: Arc::clone(&payload),
        };
        let handle = self.handle;
        log::trace!("{handle:?}: active");
        ObjectRef {
            handle: self.handle,
            name,
            payload,
        }
    }
}

impl<P> Drop for Reservation<'_, P> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.table.lock();
        let slot = &mut inner.slots[self.index];
        if matches!(slot.state, SlotState::Reserved { .. }) {
            slot.release(self.table.class, self.index);
            let handle = self.handle;
            log::trace!("{handle:?}: creation aborted");
        }
    }
}

/// A counted reference to an Active object's payload.
///
/// Holding an `ObjectRef` keeps the payload alive but does not keep the
/// object Active; the object may be deleted concurrently, after which its
/// handle no longer resolves.
pub(crate) struct ObjectRef<P> {
    handle: Handle,
    name: Option<ObjectName>,
    payload: Arc<P>,
}

impl<P> ObjectRef<P> {
    #[inline]
    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }

    #[inline]
    pub(crate) fn name(&self) -> Option<ObjectName> {
        self.name
    }

    #[inline]
    pub(crate) fn payload(&self) -> &Arc<P> {
        &self.payload
    }
}

impl<P> Clone for ObjectRef<P> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle,
            name: self.name,
            payload: Arc::clone(&self.payload),
        }
    }
}

impl<P> Deref for ObjectRef<P> {
    type Target = P;

    #[inline]
    fn deref(&self) -> &P {
        &self.payload
    }
}

impl<P> fmt::Debug for ObjectRef<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("handle", &self.handle)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<P> ObjectTable<P> {
    pub(crate) fn new(class: ObjectClass, capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                state: SlotState::Unused,
                generation: 0,
            })
            .collect();
        Self {
            class,
            inner: Mutex::new(TableInner {
                slots,
                last_issued: capacity.saturating_sub(1),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TableInner<P>> {
        // Slot transitions are completed before the guard is dropped, so the
        // table is consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn capacity(&self) -> usize {
        self.lock().slots.len()
    }

    /// Claim a free slot, checking that `name` is not used by any Reserved
    /// or Active slot of this table.
    pub(crate) fn reserve(
        &self,
        name: Option<ObjectName>,
    ) -> Result<Reservation<'_, P>, AllocError> {
        let mut inner = self.lock();
        let capacity = inner.slots.len();
        if capacity == 0 {
            return Err(AllocError::NotSupported);
        }

        if let Some(name) = &name {
            if inner.slots.iter().any(|s| s.state.name() == Some(name)) {
                return Err(AllocError::AlreadyExists);
            }
        }

        let start = inner.last_issued + 1;
        let index = (0..capacity)
            .map(|i| (start + i) % capacity)
            .find(|&i| matches!(inner.slots[i].state, SlotState::Unused))
            .ok_or(AllocError::TableFull)?;

        let slot = &mut inner.slots[index];
        slot.state = SlotState::Reserved { name };
        let handle = Handle::encode(self.class, index, slot.generation)
            .expect("table capacity exceeds the handle index range");
        inner.last_issued = index;
        log::trace!("{handle:?}: reserved");

        Ok(Reservation {
            table: self,
            index,
            handle,
            armed: true,
        })
    }

    /// Validate `handle` against this table.
    fn resolve<'a>(
        &self,
        inner: &'a mut TableInner<P>,
        handle: Handle,
    ) -> Result<&'a mut Slot<P>, InvalidHandleError> {
        let (class, index, generation) = handle.decode()?;
        if class != self.class {
            return Err(InvalidHandleError::InvalidHandle);
        }
        let slot = inner
            .slots
            .get_mut(index)
            .ok_or(InvalidHandleError::InvalidHandle)?;
        if slot.generation != generation || !matches!(slot.state, SlotState::Active { .. }) {
            return Err(InvalidHandleError::InvalidHandle);
        }
        Ok(slot)
    }

    /// Get the Active object identified by `handle`.
    pub(crate) fn get(&self, handle: Handle) -> Result<ObjectRef<P>, InvalidHandleError> {
        let mut inner = self.lock();
        match &self.resolve(&mut inner, handle)?.state {
            SlotState::Active { name, payload } => Ok(ObjectRef {
                handle,
                name: *name,
                payload: Arc::clone(payload),
            }),
            _ => unreachable!(),
        }
    }

    /// Find an Active object by name.
    pub(crate) fn find_by_name(&self, name: &str) -> Option<Handle> {
        self.find(|n, _| n.map_or(false, |n| n == name))
            .map(|r| r.handle)
    }

    /// Find the first Active object satisfying `pred`.
    ///
    /// `pred` runs under the table lock and must not block or call back into
    /// this table.
    pub(crate) fn find(
        &self,
        mut pred: impl FnMut(Option<&ObjectName>, &P) -> bool,
    ) -> Option<ObjectRef<P>> {
        let inner = self.lock();
        inner
            .slots
            .iter()
            .enumerate()
            .find_map(|(index, slot)| match &slot.state {
                SlotState::Active { name, payload } if pred(name.as_ref(), payload) => {
                    Some(ObjectRef {
                        handle: Handle::encode(self.class, index, slot.generation)?,
                        name: *name,
                        payload: Arc::clone(payload),
                    })
                }
                _ => None,
            })
    }

    /// Delete the object identified by `handle` and return its payload so
    /// that the caller can release the native resources.
    ///
    /// The slot is Unused with a new generation by the time this returns, so
    /// a second call with the same handle fails.
    pub(crate) fn release(&self, handle: Handle) -> Result<Arc<P>, InvalidHandleError> {
        self.release_with(handle, |_| Ok::<(), InvalidHandleError>(()))
    }

    /// Like [`Self::release`], but only if `check` accepts the payload.
    /// `check` runs under the table lock.
    pub(crate) fn release_with<E: From<InvalidHandleError>>(
        &self,
        handle: Handle,
        check: impl FnOnce(&P) -> Result<(), E>,
    ) -> Result<Arc<P>, E> {
        let mut inner = self.lock();
        let slot = self.resolve(&mut inner, handle)?;
        if let SlotState::Active { payload, .. } = &slot.state {
            check(payload)?;
        }
        let state = core::mem::replace(&mut slot.state, SlotState::Unused);
        slot.release(self.class, handle.index());
        log::trace!("{handle:?}: released");
        match state {
            SlotState::Active { payload, .. } => Ok(payload),
            _ => unreachable!(),
        }
    }

    /// Visit every Active object.
    ///
    /// The lock is not held while `visitor` runs; each object is
    /// re-validated before it is visited, so objects deleted in the meantime
    /// are skipped and `visitor` may delete objects.
    pub(crate) fn for_each(&self, mut visitor: impl FnMut(ObjectRef<P>)) {
        for handle in self.active_handles() {
            if let Ok(obj) = self.get(handle) {
                visitor(obj);
            }
        }
    }

    /// Take a snapshot of the handles of all Active objects.
    pub(crate) fn active_handles(&self) -> Vec<Handle> {
        let inner = self.lock();
        inner
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| matches!(slot.state, SlotState::Active { .. }))
            .filter_map(|(index, slot)| Handle::encode(self.class, index, slot.generation))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn count_active(&self) -> usize {
        let inner = self.lock();
        inner
            .slots
            .iter()
            .filter(|slot| matches!(slot.state, SlotState::Active { .. }))
            .count()
    }

    pub(crate) fn count_free(&self) -> usize {
        let inner = self.lock();
        inner
            .slots
            .iter()
            .filter(|slot| matches!(slot.state, SlotState::Unused))
            .count()
    }
}

/// Class-independent view of an [`ObjectTable`].
pub(crate) trait AnyTable: Send + Sync {
    fn capacity(&self) -> usize;
    fn active_handles(&self) -> Vec<Handle>;
    fn name_of(&self, handle: Handle) -> Result<Option<ObjectName>, InvalidHandleError>;
}

impl<P: Send + Sync> AnyTable for ObjectTable<P> {
    fn capacity(&self) -> usize {
        ObjectTable::capacity(self)
    }

    fn active_handles(&self) -> Vec<Handle> {
        ObjectTable::active_handles(self)
    }

    fn name_of(&self, handle: Handle) -> Result<Option<ObjectName>, InvalidHandleError> {
        self.get(handle).map(|r| r.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use std::collections::HashMap;

    fn name(s: &str) -> Option<ObjectName> {
        Some(ObjectName::new(s).unwrap())
    }

    #[test]
    fn table_full_then_reuse() {
        let table = ObjectTable::<u32>::new(ObjectClass::BinSem, 2);
        let a = table.reserve(name("A")).unwrap().activate(1).handle();
        let _b = table.reserve(name("B")).unwrap().activate(2).handle();
        assert_eq!(table.reserve(name("C")).err(), Some(AllocError::TableFull));

        table.release(a).unwrap();
        let c = table.reserve(name("C")).unwrap().activate(3).handle();
        assert_eq!(*table.get(c).unwrap(), 3);
        assert_eq!(table.get(a).err(), Some(InvalidHandleError::InvalidHandle));
    }

    #[test]
    fn duplicate_names() {
        let table = ObjectTable::<()>::new(ObjectClass::Queue, 4);
        let pending = table.reserve(name("Q")).unwrap();
        // A reserved name is taken too
        assert_eq!(table.reserve(name("Q")).err(), Some(AllocError::AlreadyExists));
        let q = pending.activate(()).handle();
        assert_eq!(table.reserve(name("Q")).err(), Some(AllocError::AlreadyExists));
        assert_eq!(table.find_by_name("Q"), Some(q));
        assert_eq!(table.find_by_name("R"), None);

        // Unnamed objects never collide
        table.reserve(None).unwrap().activate(());
        table.reserve(None).unwrap().activate(());
        assert_eq!(table.count_active(), 3);
    }

    #[test]
    fn aborted_reservation_invalidates_handle() {
        let table = ObjectTable::<()>::new(ObjectClass::Mutex, 1);
        let speculative = {
            let r = table.reserve(name("M")).unwrap();
            r.handle()
        };
        assert_eq!(table.count_free(), 1);
        let h = table.reserve(name("M")).unwrap().activate(()).handle();
        assert_ne!(h, speculative);
        assert_eq!(h.index(), speculative.index());
    }

    #[test]
    fn double_release() {
        let table = ObjectTable::<()>::new(ObjectClass::CountSem, 3);
        let h = table.reserve(None).unwrap().activate(()).handle();
        assert!(table.release(h).is_ok());
        assert_eq!(table.release(h).err(), Some(InvalidHandleError::InvalidHandle));
    }

    #[test]
    fn wrong_class_is_rejected() {
        let sems = ObjectTable::<()>::new(ObjectClass::BinSem, 1);
        let queues = ObjectTable::<()>::new(ObjectClass::Queue, 1);
        let h = sems.reserve(None).unwrap().activate(()).handle();
        assert!(queues.get(h).is_err());
    }

    #[test]
    fn capacity_zero_is_not_supported() {
        let table = ObjectTable::<()>::new(ObjectClass::Dir, 0);
        assert_eq!(table.reserve(None).err(), Some(AllocError::NotSupported));
    }

    #[test]
    fn release_with_refusal_keeps_object() {
        let table = ObjectTable::<u32>::new(ObjectClass::TimeBase, 1);
        let h = table.reserve(name("TB")).unwrap().activate(7).handle();
        assert_eq!(
            table
                .release_with(h, |_| Err(InvalidHandleError::InvalidHandle))
                .err(),
            Some(InvalidHandleError::InvalidHandle)
        );
        assert!(table.get(h).is_ok());
    }

    #[test]
    fn for_each_tolerates_deletion() {
        let table = ObjectTable::<u32>::new(ObjectClass::File, 8);
        let handles: Vec<_> = (0..8)
            .map(|i| table.reserve(None).unwrap().activate(i).handle())
            .collect();
        let mut visited = Vec::new();
        table.for_each(|obj| {
            visited.push(*obj);
            // Delete the next object while iterating
            let next = handles[(*obj as usize + 1) % handles.len()];
            let _ = table.release(next);
        });
        assert!(visited.len() < 8);
        assert!(!visited.is_empty());
    }

    #[test]
    fn retired_slot_is_not_reused() {
        let table = ObjectTable::<()>::new(ObjectClass::BinSem, 1);
        let mut issued = Vec::new();
        loop {
            match table.reserve(None) {
                Ok(r) => {
                    let h = r.activate(()).handle();
                    table.release(h).unwrap();
                    issued.push(h);
                }
                Err(e) => {
                    assert_eq!(e, AllocError::TableFull);
                    break;
                }
            }
        }
        assert_eq!(issued.len(), GENERATION_LIMIT as usize);
        assert!(issued.iter().all(|&h| table.get(h).is_err()));
    }

    /// Apply a random sequence of allocations and releases and check the
    /// table invariants after every step.
    #[quickcheck]
    fn allocate_release_invariants(ops: Vec<(bool, u8)>) {
        const CAPACITY: usize = 4;
        let table = ObjectTable::<u8>::new(ObjectClass::Queue, CAPACITY);
        let mut live: HashMap<String, Handle> = HashMap::new();
        let mut dead: Vec<Handle> = Vec::new();

        for (allocate, n) in ops {
            let key = format!("OBJ{}", n % 6);
            if allocate {
                match table.reserve(name(&key)) {
                    Ok(r) => {
                        assert!(!live.contains_key(&key));
                        let h = r.activate(n).handle();
                        assert!(!dead.contains(&h));
                        live.insert(key, h);
                    }
                    Err(AllocError::AlreadyExists) => assert!(live.contains_key(&key)),
                    Err(AllocError::TableFull) => assert_eq!(live.len(), CAPACITY),
                    Err(e) => panic!("unexpected {e:?}"),
                }
            } else if let Some(h) = live.remove(&key) {
                table.release(h).unwrap();
                dead.push(h);
            }

            assert!(table.count_active() <= CAPACITY);
            assert_eq!(table.count_active(), live.len());
            for (key, &h) in &live {
                assert_eq!(table.find_by_name(key), Some(h));
                assert!(table.get(h).is_ok());
            }
            for &h in &dead {
                assert!(table.get(h).is_err());
            }
        }
    }
}
