/// Return `x` with bit `bit` set when `on` holds, cleared otherwise.
pub fn set_bit(x: u32, bit: u32, on: bool) -> u32 {
    if on {
        x | (1 << bit)
    } else {
        x & !(1 << bit)
    }
}

/// Test whether bit `bit` of `x` is set.
pub fn test_bit(x: u32, bit: u32) -> bool {
    (x >> bit) & 1 == 1
}

/// Collect `(position, on)` pairs into a single flag word.
pub fn flags_of(bits: &[(u32, bool)]) -> u32 {
    bits.iter().fold(0, |acc, &(pos, on)| set_bit(acc, pos, on))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_bit_toggles_single_position() {
        assert_eq!(set_bit(0, 3, true), 0b1000);
        assert_eq!(set_bit(0b1010, 3, false), 0b0010);
        assert!(test_bit(0b0010, 1));
        assert!(!test_bit(0b0010, 0));
    }

    #[test]
    fn flags_of_skips_cleared_positions() {
        assert_eq!(flags_of(&[(0, true), (1, false), (4, true)]), 0b1_0001);
        assert_eq!(flags_of(&[]), 0);
    }
}
