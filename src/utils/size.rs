//! Narrowing conversions for `BIGINT` size columns at the response boundary.

/// Largest integer a double-precision JSON consumer can represent exactly.
pub const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

/// Document sizes are emitted as plain JSON numbers.
pub fn document_size_to_number(size: i64) -> u64 {
    size.clamp(0, MAX_SAFE_INTEGER) as u64
}

/// Exported version sizes are emitted as decimal strings so no precision is lost.
pub fn version_size_to_string(size: Option<i64>) -> Option<String> {
    size.map(|value| value.to_string())
}
