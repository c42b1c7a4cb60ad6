/// Set bit `bit` of `x` on if `toggle` is true, otherwise off.
pub fn bit(bit: u64, x: u64, toggle: bool) -> u64 {
    if toggle {
        x | (1 << bit)
    } else {
        x & !(1 << bit)
    }
}

/// Test whether bit `bit` of `x` is set.
pub fn test_bit(bit: u64, x: u64) -> bool {
    (x >> bit) & 1 == 1
}

/// Packs `flags` into a word, `flags[i]` landing on bit `i`.
pub fn pack(flags: &[bool]) -> u32 {
    flags
        .iter()
        .enumerate()
        .fold(0, |acc, (i, &on)| bit(i as u64, acc as u64, on) as u32)
}

/// Unpacks the low `N` bits of `word`, bit `i` landing on `flags[i]`.
pub fn unpack<const N: usize>(word: u32) -> [bool; N] {
    let mut flags = [false; N];
    for (i, flag) in flags.iter_mut().enumerate() {
        *flag = test_bit(i as u64, word as u64);
    }
    flags
}
