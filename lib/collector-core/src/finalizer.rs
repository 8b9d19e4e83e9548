//! Set-style operations over an object's finalizer list
//!
//! The finalizer list is ordered and may be shared with other controllers, so
//! these helpers never reorder or drop entries they do not own.

/// Whether `marker` is present in `finalizers`
pub fn contains(finalizers: &[String], marker: &str) -> bool {
    finalizers.iter().any(|f| f == marker)
}

/// Append `marker` unless already present. Returns true if the list changed.
pub fn ensure_present(finalizers: &mut Vec<String>, marker: &str) -> bool {
    if contains(finalizers, marker) {
        return false;
    }
    finalizers.push(marker.to_string());
    true
}

/// Drop every occurrence of `marker`, keeping the rest in order.
/// Returns true if the list changed.
pub fn ensure_absent(finalizers: &mut Vec<String>, marker: &str) -> bool {
    let before = finalizers.len();
    finalizers.retain(|f| f != marker);
    finalizers.len() != before
}
