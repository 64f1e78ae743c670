// SPDX-License-Identifier: CEPL-1.0
/// Frames the host may run ahead of the GPU.
pub const FRAME_OVERLAP: usize = 2;

/// Fixed set of per-frame resources, picked by `frame % N`.
///
/// Slot `i` is handed to frames `i, i + N, i + 2N, ...` and nothing else, so
/// waiting for slot `i`'s previous submission bounds GPU latency to `N`
/// frames.
pub struct FrameRing<T, const N: usize = FRAME_OVERLAP> {
    slots: [T; N],
}

impl<T, const N: usize> FrameRing<T, N> {
    pub fn from_fn(make: impl FnMut(usize) -> T) -> Self {
        Self {
            slots: std::array::from_fn(make),
        }
    }

    /// Builds slots `0..N` in order; stops at the first error.
    ///
    /// Slots built before the failure are handed to `discard` so GPU
    /// resources never leak.
    pub fn try_new<E>(
        mut make: impl FnMut(usize) -> Result<T, E>,
        mut discard: impl FnMut(T),
    ) -> Result<Self, E> {
        let mut built = Vec::with_capacity(N);
        for index in 0..N {
            match make(index) {
                Ok(slot) => built.push(slot),
                Err(e) => {
                    built.into_iter().rev().for_each(&mut discard);
                    return Err(e);
                }
            }
        }
        let mut built = built.into_iter();
        Ok(Self::from_fn(|_| match built.next() {
            Some(slot) => slot,
            None => unreachable!("exactly N slots were built"),
        }))
    }

    #[inline]
    pub const fn len(&self) -> usize {
        N
    }

    #[inline]
    pub fn index_for(&self, frame: u64) -> usize {
        (frame % N as u64) as usize
    }

    #[inline]
    pub fn slot_for(&self, frame: u64) -> &T {
        &self.slots[self.index_for(frame)]
    }

    #[inline]
    pub fn slot_for_mut(&mut self, frame: u64) -> &mut T {
        let index = self.index_for(frame);
        &mut self.slots[index]
    }

    /// Creation order; reverse it for teardown.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.slots.iter_mut()
    }
}
