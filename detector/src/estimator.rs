/// Byte distance between two sampled positions.
pub const SAMPLE_STRIDE: usize = 4;

/// Sampled byte-difference estimator.
///
/// Compares a candidate frame against the reference frame on every 4th byte
/// of the encoded buffer and counts the samples whose absolute difference is
/// above `pixel_threshold`. This works on the raw JPEG bytes, so it reacts
/// to bulk scene changes (and to encoder noise) without decoding anything.
///
/// Only the common prefix of the two buffers is compared.
#[derive(Debug, Clone, Copy)]
pub struct DifferenceEstimator {
    pixel_threshold: u8,
}

impl DifferenceEstimator {
    pub fn new(pixel_threshold: u8) -> Self {
        Self { pixel_threshold }
    }

    pub fn pixel_threshold(&self) -> u8 {
        self.pixel_threshold
    }

    pub fn set_pixel_threshold(&mut self, pixel_threshold: u8) {
        self.pixel_threshold = pixel_threshold;
    }

    /// Number of sampled positions that changed. Zero when either buffer is empty.
    pub fn score(&self, candidate: &[u8], reference: &[u8]) -> u32 {
        let len = candidate.len().min(reference.len());
        candidate[..len]
            .iter()
            .zip(&reference[..len])
            .step_by(SAMPLE_STRIDE)
            .filter(|(c, r)| c.abs_diff(**r) > self.pixel_threshold)
            .count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_buffers_score_zero() {
        let est = DifferenceEstimator::new(25);
        assert_eq!(est.score(&[], &[255; 64]), 0);
        assert_eq!(est.score(&[255; 64], &[]), 0);
    }

    #[test]
    fn samples_every_fourth_byte() {
        let est = DifferenceEstimator::new(25);
        // 16 bytes -> positions 0, 4, 8, 12
        assert_eq!(est.score(&[255; 16], &[0; 16]), 4);

        // changes that sit between sampled positions are invisible
        let mut candidate = [0u8; 16];
        candidate[1] = 255;
        candidate[6] = 255;
        assert_eq!(est.score(&candidate, &[0; 16]), 0);
    }

    #[test]
    fn threshold_is_strict() {
        let est = DifferenceEstimator::new(25);
        assert_eq!(est.score(&[25; 8], &[0; 8]), 0);
        assert_eq!(est.score(&[26; 8], &[0; 8]), 2);
    }

    #[test]
    fn only_common_prefix_is_compared() {
        let est = DifferenceEstimator::new(10);
        // reference shorter: positions 0 and 4 only
        assert_eq!(est.score(&[200; 64], &[0; 8]), 2);
        // candidate shorter
        assert_eq!(est.score(&[200; 5], &[0; 64]), 2);
    }

    #[test]
    fn threshold_can_be_changed() {
        let mut est = DifferenceEstimator::new(25);
        est.set_pixel_threshold(200);
        assert_eq!(est.pixel_threshold(), 200);
        assert_eq!(est.score(&[100; 8], &[0; 8]), 0);
    }

    proptest! {
        #[test]
        fn buffer_against_itself_scores_zero(
            buf in proptest::collection::vec(any::<u8>(), 0..512),
            threshold in 0u8..=254,
        ) {
            let est = DifferenceEstimator::new(threshold);
            prop_assert_eq!(est.score(&buf, &buf), 0);
        }

        #[test]
        fn score_is_symmetric(
            a in proptest::collection::vec(any::<u8>(), 0..512),
            b in proptest::collection::vec(any::<u8>(), 0..512),
            threshold in 0u8..=254,
        ) {
            let est = DifferenceEstimator::new(threshold);
            prop_assert_eq!(est.score(&a, &b), est.score(&b, &a));
        }

        #[test]
        fn score_never_exceeds_sample_count(
            a in proptest::collection::vec(any::<u8>(), 0..512),
            b in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let est = DifferenceEstimator::new(0);
            let samples = a.len().min(b.len()).div_ceil(SAMPLE_STRIDE);
            prop_assert!(est.score(&a, &b) as usize <= samples);
        }
    }
}
