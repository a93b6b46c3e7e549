use std::ptr::NonNull;

/// Non-owning handle to a single value of another model instance
///
/// Reading an unset handle yields `NaN`, writing to it does nothing.
#[derive(Debug, Default)]
pub struct LinkPointer {
    target: Option<NonNull<f64>>,
}

impl LinkPointer {
    /// Point the handle at `target`
    ///
    /// # Safety
    ///
    /// `target` must stay valid for reads and writes for as long as this
    /// handle is used, and must not be freed through this handle.
    pub unsafe fn set_pointer(&mut self, target: *mut f64) {
        self.target = NonNull::new(target);
    }

    pub fn is_set(&self) -> bool {
        self.target.is_some()
    }

    #[inline]
    pub fn get(&self) -> f64 {
        match self.target {
            // SAFETY: guaranteed by the contract of `set_pointer`
            Some(target) => unsafe { *target.as_ptr() },
            None => f64::NAN,
        }
    }

    #[inline]
    pub fn set(&mut self, value: f64) {
        if let Some(target) = self.target {
            // SAFETY: guaranteed by the contract of `set_pointer`
            unsafe { *target.as_ptr() = value }
        }
    }
}

/// Owned block of non-owning handles, one per coupled value
///
/// The block belongs to the model instance. The pointees never do.
#[derive(Debug, Default)]
pub struct LinkSlots {
    slots: Vec<Option<NonNull<f64>>>,
}

impl LinkSlots {
    /// Reserve `len` unset slots, replacing any previous block
    pub fn alloc(&mut self, len: usize) {
        self.slots = vec![None; len];
    }

    /// Release the block; calling it again is a no-op
    pub fn dealloc(&mut self) {
        self.slots = Vec::new();
    }

    /// Point slot `idx` at `target`
    ///
    /// # Safety
    ///
    /// Same contract as [LinkPointer::set_pointer].
    ///
    /// # Panics
    ///
    /// Panics if `idx` is not below the allocated length.
    pub unsafe fn set_pointer(&mut self, idx: usize, target: *mut f64) {
        self.slots[idx] = NonNull::new(target);
    }

    #[inline]
    pub fn get(&self, idx: usize) -> f64 {
        match self.slots[idx] {
            // SAFETY: guaranteed by the contract of `set_pointer`
            Some(target) => unsafe { *target.as_ptr() },
            None => f64::NAN,
        }
    }

    #[inline]
    pub fn set(&mut self, idx: usize, value: f64) {
        if let Some(target) = self.slots[idx] {
            // SAFETY: guaranteed by the contract of `set_pointer`
            unsafe { *target.as_ptr() = value }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_allocated(&self) -> bool {
        !self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_reads_and_writes_target() {
        let mut value = 1.0;
        let mut link = LinkPointer::default();
        assert!(link.get().is_nan());
        link.set(5.0);

        unsafe { link.set_pointer(&mut value) };
        assert!(link.is_set());
        assert_eq!(link.get(), 1.0);
        link.set(4.0);
        drop(link);
        assert_eq!(value, 4.0);
    }

    #[test]
    fn test_slots_double_dealloc_keeps_others_intact() {
        let mut first = 2.0;
        let mut second = 3.0;

        let mut inlets = LinkSlots::default();
        let mut outlets = LinkSlots::default();
        inlets.alloc(3);
        outlets.alloc(1);
        unsafe {
            inlets.set_pointer(0, &mut first);
            outlets.set_pointer(0, &mut second);
        }
        assert_eq!(inlets.len(), 3);
        assert_eq!(inlets.get(0), 2.0);
        assert!(inlets.get(2).is_nan());

        inlets.dealloc();
        inlets.dealloc();
        assert!(!inlets.is_allocated());
        assert_eq!(inlets.len(), 0);
        assert_eq!(outlets.get(0), 3.0);
        assert_eq!(first, 2.0);
    }
}
