/// Maximum number of frames a snapshot can hold. Deeper stacks are truncated.
pub const MAX_STACK_DEPTH: usize = 100;

/// Fixed-capacity call-stack snapshot captured at event-write time.
///
/// Truncation at capacity is deliberate policy, not an error: `append` beyond
/// [`MAX_STACK_DEPTH`] frames is a silent no-op. Snapshots are plain values,
/// copied into the owning buffer alongside the record that requested them.
#[derive(Clone)]
pub struct StackSnapshot {
    frames: [u64; MAX_STACK_DEPTH],
    len: usize,
}

impl StackSnapshot {
    pub fn new() -> Self {
        Self {
            frames: [0; MAX_STACK_DEPTH],
            len: 0,
        }
    }

    /// Record one return address. Silently drops frames past capacity.
    pub fn append(&mut self, address: u64) {
        if self.len < MAX_STACK_DEPTH {
            self.frames[self.len] = address;
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The captured frames, leaf first.
    pub fn frames(&self) -> &[u64] {
        &self.frames[..self.len]
    }

    /// Size of the frames when packed into a buffer.
    pub fn byte_len(&self) -> usize {
        self.len * 8
    }

    /// Clear the snapshot for reuse.
    pub fn reset(&mut self) {
        self.len = 0;
    }
}

impl Default for StackSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StackSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackSnapshot")
            .field("len", &self.len)
            .field("frames", &self.frames())
            .finish()
    }
}
