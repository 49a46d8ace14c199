//! Constant-time comparison of shared secrets.

use subtle::ConstantTimeEq;

/// Compare two tokens without leaking a matching prefix through timing.
///
/// When lengths differ a dummy comparison runs so the early return costs
/// roughly the same as a full comparison.
pub fn constant_time_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}
