// SPDX-License-Identifier: CEPL-1.0
/// Frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// In-flight slot cursor plus the table of which slot fence last claimed
/// each swap-chain image.
///
/// Generic over the fence handle so the bookkeeping can be driven without a
/// device.
#[derive(Debug)]
pub struct FrameRing<F> {
    current: usize,
    images_in_flight: Vec<Option<F>>,
}

impl<F: Copy + PartialEq> FrameRing<F> {
    pub fn new(image_count: usize) -> Self {
        Self {
            current: 0,
            images_in_flight: vec![None; image_count],
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn image_count(&self) -> usize {
        self.images_in_flight.len()
    }

    /// Fence currently holding `image`, if any.
    pub fn owner(&self, image: usize) -> Option<F> {
        self.images_in_flight.get(image).copied().flatten()
    }

    /// Records `fence` as the owner of `image` and returns the previous owner
    /// when it was a different fence. The caller waits on that fence before
    /// touching the image again.
    pub fn claim_image(&mut self, image: usize, fence: F) -> Option<F> {
        let previous = self.images_in_flight[image].replace(fence);
        previous.filter(|&p| p != fence)
    }

    /// Moves to the next slot; returns the new index.
    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % MAX_FRAMES_IN_FLIGHT;
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let ring: FrameRing<u8> = FrameRing::new(3);
        assert_eq!(ring.current(), 0);
        assert_eq!(ring.image_count(), 3);
        assert!((0..3).all(|i| ring.owner(i).is_none()));
        assert_eq!(ring.owner(7), None);
    }

    #[test]
    fn index_is_submit_count_mod_k() {
        let mut ring: FrameRing<u8> = FrameRing::new(3);
        for m in 1..=11 {
            ring.advance();
            assert_eq!(ring.current(), m % MAX_FRAMES_IN_FLIGHT);
        }
    }

    #[test]
    fn claim_reports_foreign_owner_only() {
        let mut ring = FrameRing::new(3);
        assert_eq!(ring.claim_image(1, 'a'), None);
        assert_eq!(ring.claim_image(1, 'a'), None);
        assert_eq!(ring.claim_image(1, 'b'), Some('a'));
        assert_eq!(ring.owner(1), Some('b'));
        assert_eq!(ring.owner(0), None);
    }

    #[test]
    fn three_images_two_slots() {
        // Fences are the slot indices; images are acquired round-robin.
        let mut ring = FrameRing::new(3);
        let mut waits = Vec::new();
        for frame in 0..6 {
            let image = frame % 3;
            let slot = ring.current();
            if let Some(prev) = ring.claim_image(image, slot) {
                waits.push((frame, prev));
            }
            ring.advance();
        }
        // Each reuse waits on the slot that claimed the image three frames ago.
        assert_eq!(waits, vec![(3, 0), (4, 1), (5, 0)]);
    }
}
