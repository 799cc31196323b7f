// Flex-backed byte allocation.
//
// AllocBytes hands the host a raw pointer whose backing store is a
// registry-tracked stub: the eight bytes before the user pointer hold
// the registry index, and one guard byte past the capacity is kept
// zero. An allocation stays on the owning level's manual list (so
// panic rollback reclaims it) until it is freed, repossessed into a
// blob value, or explicitly unmanaged.

use crate::api::{ApiHandle, Interp, ManualEntry};
use crate::flex::Binary;
use crate::value::Cell;


const HEADER: usize = 8;


pub(crate) struct RawAlloc {
    bytes: Box<[u8]>,
}

impl RawAlloc {
    fn capacity(&self) -> usize {
        self.bytes.len() - HEADER - 1
    }
}


unsafe fn header_index(ptr: *mut u8) -> usize {
    let base = ptr.sub(HEADER);
    let mut raw = [0u8; HEADER];
    std::ptr::copy_nonoverlapping(base, raw.as_mut_ptr(), HEADER);
    u64::from_le_bytes(raw) as usize
}


impl Interp {
    fn allocate(&mut self, size: usize) -> *mut u8 {
        let total = HEADER + size + 1;
        let mut bytes = vec![0u8; total].into_boxed_slice();
        let index = match self.registry.iter().position(|e| e.is_none()) {
            Some(index) => index,
            None => {
                self.registry.push(None);
                self.registry.len() - 1
            }
        };
        bytes[..HEADER].copy_from_slice(&(index as u64).to_le_bytes());
        let ptr = unsafe { bytes.as_mut_ptr().add(HEADER) };
        self.registry[index] = Some(RawAlloc { bytes });
        self.manual.push(ManualEntry::Raw(index));
        ptr
    }

    // Never returns null; aborts on true exhaustion like any host
    // allocation would.
    pub fn alloc_bytes(&mut self, size: usize) -> *mut u8 {
        self.allocate(size)
    }

    pub fn try_alloc_bytes(&mut self, size: usize) -> *mut u8 {
        self.allocate(size)
    }

    pub unsafe fn realloc_bytes(&mut self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        assert!(!ptr.is_null(), "realloc of null pointer");
        assert!(new_size != 0, "realloc to zero size is illegal");
        let old_index = header_index(ptr);
        let old_cap = self
            .registry[old_index]
            .as_ref()
            .expect("realloc of freed allocation")
            .capacity();
        let new_ptr = self.allocate(new_size);
        let keep = old_cap.min(new_size);
        std::ptr::copy_nonoverlapping(ptr, new_ptr, keep);
        self.release_allocation(old_index);
        new_ptr
    }

    pub unsafe fn free(&mut self, ptr: *mut u8) {
        assert!(!ptr.is_null(), "free of null pointer");
        self.free_opt(ptr);
    }

    pub unsafe fn free_opt(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let index = header_index(ptr);
        self.release_allocation(index);
    }

    // Transfer the allocation into a blob value; the raw pointer must
    // not be used afterward.
    pub unsafe fn repossess(&mut self, ptr: *mut u8, size: usize) -> ApiHandle {
        assert!(!ptr.is_null(), "repossess of null pointer");
        let index = header_index(ptr);
        let alloc = self.registry[index]
            .take()
            .expect("repossess of freed allocation");
        assert!(
            size <= alloc.capacity(),
            "repossess size exceeds allocated capacity",
        );
        self.manual.retain(|e| e.raw_index() != Some(index));
        let data = alloc.bytes[HEADER..HEADER + size].to_vec();
        self.attach(Cell::blob(Binary::from_vec(data)))
    }

    // Detach from the owning level's manual list: the allocation then
    // survives panic rollback and must be freed explicitly.
    pub unsafe fn unmanage_memory(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let index = header_index(ptr);
        self.manual.retain(|e| e.raw_index() != Some(index));
    }

    fn release_allocation(&mut self, index: usize) {
        self.registry[index] = None;
        self.manual.retain(|e| e.raw_index() != Some(index));
    }

    pub(crate) fn free_registry_entry(&mut self, index: usize) {
        self.registry[index] = None;
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tunables;
    use crate::level::{Level, OutDest};
    use crate::value::Heart;

    fn interp() -> Interp {
        Interp::startup(Tunables::default())
    }

    #[test]
    fn test_alloc_write_repossess_roundtrip() {
        let mut ix = interp();
        let ptr = ix.alloc_bytes(4);
        unsafe {
            for i in 0..4 {
                *ptr.add(i) = (i as u8) + 1;
            }
            let blob = ix.repossess(ptr, 4);
            match &blob.cell().heart {
                Heart::Blob(bin) => assert_eq!(bin.bytes(), vec![1, 2, 3, 4]),
                other => panic!("expected blob, got {:?}", other),
            }
        }
        ix.shutdown(false).unwrap();
    }

    #[test]
    fn test_try_alloc_bytes_is_writable() {
        let mut ix = interp();
        let ptr = ix.try_alloc_bytes(8);
        assert!(!ptr.is_null());
        unsafe {
            *ptr = 7;
            let blob = ix.repossess(ptr, 1);
            match &blob.cell().heart {
                Heart::Blob(bin) => assert_eq!(bin.bytes(), vec![7]),
                other => panic!("expected blob, got {:?}", other),
            }
        }
        ix.shutdown(false).unwrap();
    }

    #[test]
    fn test_zero_size_allocation_is_usable() {
        let mut ix = interp();
        let ptr = ix.alloc_bytes(0);
        assert!(!ptr.is_null());
        unsafe {
            // The guard byte past capacity reads zero.
            assert_eq!(*ptr, 0);
            let blob = ix.repossess(ptr, 0);
            match &blob.cell().heart {
                Heart::Blob(bin) => assert_eq!(bin.len(), 0),
                other => panic!("expected blob, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_free_opt_of_null_is_noop() {
        let mut ix = interp();
        unsafe { ix.free_opt(std::ptr::null_mut()) };
        ix.shutdown(true).unwrap();
    }

    #[test]
    fn test_free_of_null_panics() {
        let mut ix = interp();
        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            unsafe { ix.free(std::ptr::null_mut()) };
        }));
        assert!(panicked.is_err());
    }

    #[test]
    fn test_realloc_preserves_contents() {
        let mut ix = interp();
        let ptr = ix.alloc_bytes(2);
        unsafe {
            *ptr = 0xAA;
            *ptr.add(1) = 0xBB;
            let grown = ix.realloc_bytes(ptr, 8);
            assert_eq!(*grown, 0xAA);
            assert_eq!(*grown.add(1), 0xBB);
            ix.free(grown);
        }
        ix.shutdown(true).unwrap();
    }

    #[test]
    fn test_realloc_to_zero_panics() {
        let mut ix = interp();
        let ptr = ix.alloc_bytes(2);
        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            unsafe { ix.realloc_bytes(ptr, 0) };
        }));
        assert!(panicked.is_err());
    }

    #[test]
    fn test_rollback_reclaims_manual_allocations() {
        let mut ix = interp();
        let feed = ix.empty_feed();
        ix.push_level(Level::evaluator(feed, OutDest::Root));
        ix.alloc_bytes(16);
        ix.rollback_top_level();
        assert!(ix.registry.iter().all(|e| e.is_none()));
        ix.shutdown(true).unwrap();
    }

    #[test]
    fn test_unmanaged_allocation_survives_rollback() {
        let mut ix = interp();
        let feed = ix.empty_feed();
        ix.push_level(Level::evaluator(feed, OutDest::Root));
        let ptr = ix.alloc_bytes(16);
        unsafe { ix.unmanage_memory(ptr) };
        ix.rollback_top_level();
        assert!(ix.registry.iter().any(|e| e.is_some()));
        unsafe { ix.free(ptr) };
        ix.shutdown(true).unwrap();
    }
}
