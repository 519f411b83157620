//! CPU-side buffer attributes with upload tracking.
//!
//! Buffers are allocated once and mutated in place. Writers flag a buffer
//! with [`BufferAttribute::mark_needs_update`]; the renderer consumes the
//! flag when it draws, which stands in for a device upload.

#[derive(Debug, Clone)]
pub struct BufferAttribute<T> {
    data: Vec<T>,
    item_size: usize,
    needs_update: bool,
    version: u64,
    uploads: u64,
}

impl<T: Copy> BufferAttribute<T> {
    pub fn new(data: Vec<T>, item_size: usize) -> Self {
        debug_assert!(item_size > 0);
        debug_assert_eq!(data.len() % item_size, 0);
        Self {
            data,
            item_size,
            needs_update: true,
            version: 0,
            uploads: 0,
        }
    }

    pub fn filled(value: T, count: usize, item_size: usize) -> Self {
        Self::new(vec![value; count * item_size], item_size)
    }

    /// Number of items (components / item size).
    pub fn count(&self) -> usize {
        self.data.len() / self.item_size
    }

    pub fn item_size(&self) -> usize {
        self.item_size
    }

    pub fn array(&self) -> &[T] {
        &self.data
    }

    /// Mutable view of the backing storage. Length is fixed.
    pub fn array_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn item(&self, index: usize) -> &[T] {
        let start = index * self.item_size;
        &self.data[start..start + self.item_size]
    }

    pub fn set_item(&mut self, index: usize, values: &[T]) {
        let start = index * self.item_size;
        self.data[start..start + self.item_size].copy_from_slice(values);
    }

    pub fn mark_needs_update(&mut self) {
        self.needs_update = true;
        self.version = self.version.wrapping_add(1);
    }

    pub fn needs_update(&self) -> bool {
        self.needs_update
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Count of uploads consumed so far.
    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    /// Consumes a pending update. Returns true if an upload happened.
    pub fn sync(&mut self) -> bool {
        if !self.needs_update {
            return false;
        }
        self.needs_update = false;
        self.uploads += 1;
        true
    }

    /// Address of the backing storage, stable for the buffer's lifetime.
    pub fn storage_ptr(&self) -> *const T {
        self.data.as_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::BufferAttribute;

    #[test]
    fn in_place_writes_keep_storage() {
        let mut colors = BufferAttribute::filled(0u8, 4, 3);
        let ptr = colors.storage_ptr();
        assert!(colors.sync());
        colors.set_item(2, &[10, 20, 30]);
        colors.mark_needs_update();
        assert_eq!(colors.item(2), &[10, 20, 30]);
        assert_eq!(colors.storage_ptr(), ptr);
        assert!(colors.sync());
        assert!(!colors.sync());
        assert_eq!(colors.uploads(), 2);
        assert_eq!(colors.version(), 1);
    }
}
