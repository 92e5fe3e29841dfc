/// Fixed-capacity rolling byte buffer for captured audio.
///
/// Writes wrap and overwrite the oldest content once the capacity is
/// reached. There is no read cursor: a read is always a chronological
/// snapshot of the most recent `capacity` bytes, not a FIFO dequeue, so a
/// consumer pulling at a different cadence than the producer sees
/// overlapping rolling windows. Wrap in `Arc<parking_lot::Mutex<_>>` to
/// share between the capture callback and the pipeline pull.
#[derive(Debug)]
pub struct CircularAudioBuffer {
    buffer: Vec<u8>,
    pos: usize,
    full: bool,
}

impl CircularAudioBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            pos: 0,
            full: false,
        }
    }

    /// Append bytes, wrapping and overwriting the oldest content once the
    /// capacity is reached. Input longer than the capacity keeps only its
    /// tail.
    pub fn write(&mut self, bytes: &[u8]) {
        let capacity = self.buffer.len();
        if capacity == 0 || bytes.is_empty() {
            return;
        }

        let bytes = if bytes.len() > capacity {
            &bytes[bytes.len() - capacity..]
        } else {
            bytes
        };

        let first = (capacity - self.pos).min(bytes.len());
        self.buffer[self.pos..self.pos + first].copy_from_slice(&bytes[..first]);

        let rest = bytes.len() - first;
        if rest > 0 {
            self.buffer[..rest].copy_from_slice(&bytes[first..]);
        }

        if self.pos + bytes.len() >= capacity {
            self.full = true;
        }
        self.pos = (self.pos + bytes.len()) % capacity;
    }

    /// Currently buffered bytes in chronological order (oldest first).
    /// Does not disturb the write cursor.
    pub fn snapshot(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.buffered_bytes());
        if self.full {
            out.extend_from_slice(&self.buffer[self.pos..]);
        }
        out.extend_from_slice(&self.buffer[..self.pos]);
        out
    }

    /// Reset to empty, preserving capacity.
    pub fn clear(&mut self) {
        self.buffer.fill(0);
        self.pos = 0;
        self.full = false;
    }

    /// Number of valid bytes currently held.
    pub fn buffered_bytes(&self) -> usize {
        if self.full {
            self.buffer.len()
        } else {
            self.pos
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Change the capacity, keeping the newest bytes. Shrinking discards the
    /// oldest overflow.
    pub fn set_capacity(&mut self, capacity: usize) {
        if capacity == self.buffer.len() {
            return;
        }

        let mut data = self.snapshot();
        if data.len() > capacity {
            data.drain(..data.len() - capacity);
        }

        self.buffer = vec![0; capacity];
        self.pos = 0;
        self.full = false;
        self.write(&data);
    }
}
