use memchr::memmem;

/// Returns the offset of the first appearance of `needle` in `haystack`.
///
/// An empty needle matches at offset 0, even in an empty haystack.
pub fn find_pattern(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    memmem::find(haystack, needle)
}

/// Pads `replacement` with trailing zero bytes up to `len`.
///
/// Returns `None` if the replacement is already longer than `len`, since
/// writing it would spill past the bytes being replaced.
pub fn pad_replacement(replacement: &[u8], len: usize) -> Option<Vec<u8>> {
    if replacement.len() > len {
        return None;
    }
    let mut padded = Vec::with_capacity(len);
    padded.extend_from_slice(replacement);
    padded.resize(len, 0);
    Some(padded)
}
