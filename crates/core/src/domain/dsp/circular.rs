//! Fixed-capacity ring buffer with independent fractional read cursors
//!
//! One write cursor advances by one slot per pushed sample, wrapping at the
//! capacity. Read cursors are kept as `f64` so they can advance by
//! non-integer rates without accumulating drift. Nothing stops a read cursor
//! from lapping the write cursor; the resulting discontinuity is audible but
//! harmless.

/// Ring buffer with one write cursor and `N` read cursors
#[derive(Debug, Clone)]
pub struct CircularBuffer<T> {
    data: Vec<T>,
    write_pos: usize,
    readers: Vec<f64>,
}

impl<T: Copy + Default> CircularBuffer<T> {
    /// Buffer with no read cursors. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self::with_readers(capacity, 0)
    }

    /// Buffer with `readers` cursors, all starting at slot 0
    pub fn with_readers(capacity: usize, readers: usize) -> Self {
        Self {
            data: vec![T::default(); capacity.max(1)],
            write_pos: 0,
            readers: vec![0.0; readers],
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Slot the next `push` writes to
    pub fn write_pos(&self) -> usize {
        self.write_pos
    }

    /// Write one value and advance the write cursor
    #[inline]
    pub fn push(&mut self, value: T) {
        self.data[self.write_pos] = value;
        self.write_pos += 1;
        if self.write_pos == self.data.len() {
            self.write_pos = 0;
        }
    }

    /// Write a block; the write cursor advances by `values.len()` modulo capacity
    pub fn write_block(&mut self, values: &[T]) {
        for &value in values {
            self.push(value);
        }
    }

    /// Value at `index` modulo capacity
    #[inline]
    pub fn get(&self, index: usize) -> T {
        self.data[index % self.data.len()]
    }

    #[inline]
    pub fn set(&mut self, index: usize, value: T) {
        let len = self.data.len();
        self.data[index % len] = value;
    }

    /// Position of read cursor `reader`
    ///
    /// # Panics
    /// If `reader` is not one of the cursors the buffer was built with.
    pub fn reader(&self, reader: usize) -> f64 {
        self.readers[reader]
    }

    /// Move read cursor `reader` to `pos`, wrapped into `[0, capacity)`
    pub fn set_reader(&mut self, reader: usize, pos: f64) {
        self.readers[reader] = pos.rem_euclid(self.data.len() as f64);
    }

    /// Advance read cursor `reader` by `delta` slots, wrapping
    #[inline]
    pub fn advance_reader(&mut self, reader: usize, delta: f64) {
        let next = self.readers[reader] + delta;
        self.set_reader(reader, next);
    }

    /// Zero the contents and rewind every cursor
    pub fn clear(&mut self) {
        self.data.fill(T::default());
        self.write_pos = 0;
        self.readers.fill(0.0);
    }
}

impl CircularBuffer<f32> {
    /// Linearly interpolated read at a fractional position, wrapping
    #[inline]
    pub fn read_interpolated(&self, pos: f64) -> f32 {
        let len = self.data.len();
        let pos = pos.rem_euclid(len as f64);
        let index = pos.floor() as usize % len;
        let frac = (pos - pos.floor()) as f32;
        let a = self.data[index];
        let b = self.data[(index + 1) % len];
        a + (b - a) * frac
    }

    /// Interpolated read at read cursor `reader`
    #[inline]
    pub fn read_reader(&self, reader: usize) -> f32 {
        self.read_interpolated(self.readers[reader])
    }

    /// Interpolated read `delay` samples behind the write cursor
    ///
    /// A delay of 1.0 returns the most recently pushed value.
    #[inline]
    pub fn read_delayed(&self, delay: f32) -> f32 {
        self.read_interpolated(self.write_pos as f64 - delay as f64)
    }
}
