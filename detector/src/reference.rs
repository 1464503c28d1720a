use std::collections::TryReserveError;
use tracing::debug;

/// Owner of the single baseline frame the motion engine compares against.
///
/// One growable buffer is kept for the lifetime of the engine. Replacing the
/// reference with a frame of the same size or smaller reuses the existing
/// allocation; a larger frame grows it with a fallible reservation. A failed
/// replacement always leaves the store empty, never half-written.
#[derive(Debug)]
pub struct ReferenceStore {
    buf: Vec<u8>,
    /// Largest frame, in bytes, the store may hold.
    budget: usize,
}

impl ReferenceStore {
    pub fn new(budget: usize) -> Self {
        Self {
            buf: Vec::new(),
            budget,
        }
    }

    /// Replace the stored reference with a copy of `frame`.
    pub fn replace(&mut self, frame: &[u8]) -> Result<(), ReferenceError> {
        self.buf.clear();

        if frame.len() > self.budget {
            return Err(ReferenceError::OverBudget {
                len: frame.len(),
                budget: self.budget,
            });
        }

        let reused = self.buf.capacity() >= frame.len();
        self.buf
            .try_reserve_exact(frame.len())
            .map_err(|source| ReferenceError::Allocation {
                len: frame.len(),
                source,
            })?;
        self.buf.extend_from_slice(frame);

        debug!(bytes = frame.len(), reused, "reference frame replaced");
        Ok(())
    }

    /// The stored reference, or `None` before the first successful replace.
    pub fn current(&self) -> Option<&[u8]> {
        if self.buf.is_empty() {
            None
        } else {
            Some(&self.buf)
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Drop the reference and hand its memory back to the allocator.
    pub fn clear(&mut self) {
        self.buf = Vec::new();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("frame of {len} bytes exceeds the {budget}-byte reference budget")]
    OverBudget { len: usize, budget: usize },
    #[error("failed to allocate {len} bytes for the reference frame: {source}")]
    Allocation {
        len: usize,
        #[source]
        source: TryReserveError,
    },
}
