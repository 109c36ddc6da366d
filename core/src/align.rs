pub fn align_up_64(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

pub fn is_aligned_64(value: u64, alignment: u64) -> bool {
    alignment == 0 || value % alignment == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_to_power_of_two() {
        assert_eq!(align_up_64(0, 256), 0);
        assert_eq!(align_up_64(1, 256), 256);
        assert_eq!(align_up_64(256, 256), 256);
        assert_eq!(align_up_64(257, 256), 512);
        assert_eq!(align_up_64(13, 8), 16);
    }

    #[test]
    fn zero_alignment_is_identity() {
        assert_eq!(align_up_64(17, 0), 17);
        assert!(is_aligned_64(17, 0));
        assert!(!is_aligned_64(17, 8));
    }
}
