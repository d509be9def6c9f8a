//! Finalizer bookkeeping over an object's metadata

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Marker that blocks deletion until the Sentry side has been cleaned up
pub const FINALIZER_NAME: &str = "finalizer.sentry.kubernetes.jaceys.me";

/// Set view of `metadata.finalizers`.
///
/// Keeps the persisted list's insertion order and never introduces duplicates.
/// Changes only reach the store once the caller writes the object back.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinalizerSet {
    markers: Vec<String>,
}

impl FinalizerSet {
    pub fn from_meta(meta: &ObjectMeta) -> Self {
        let mut set = Self::default();
        for marker in meta.finalizers.iter().flatten() {
            set.add(marker);
        }
        set
    }

    pub fn contains(&self, marker: &str) -> bool {
        self.markers.iter().any(|m| m == marker)
    }

    /// Returns true if the marker was not present before
    pub fn add(&mut self, marker: &str) -> bool {
        if self.contains(marker) {
            return false;
        }
        self.markers.push(marker.to_string());
        true
    }

    /// Returns true if the marker was present
    pub fn remove(&mut self, marker: &str) -> bool {
        let before = self.markers.len();
        self.markers.retain(|m| m != marker);
        self.markers.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.markers.iter().map(String::as_str)
    }

    /// Write the set back into `meta`
    pub fn apply_to(&self, meta: &mut ObjectMeta) {
        meta.finalizers = if self.markers.is_empty() {
            None
        } else {
            Some(self.markers.clone())
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(finalizers: &[&str]) -> ObjectMeta {
        ObjectMeta {
            finalizers: Some(finalizers.iter().map(|f| f.to_string()).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut set = FinalizerSet::default();
        assert!(set.add(FINALIZER_NAME));
        assert!(!set.add(FINALIZER_NAME));
        assert_eq!(set.iter().count(), 1);
    }

    #[test]
    fn test_duplicates_in_metadata_collapse() {
        let set = FinalizerSet::from_meta(&meta(&["a", FINALIZER_NAME, "a"]));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["a", FINALIZER_NAME]);
    }

    #[test]
    fn test_remove_keeps_other_markers_in_order() {
        let mut set = FinalizerSet::from_meta(&meta(&["a", FINALIZER_NAME, "b"]));
        assert!(set.remove(FINALIZER_NAME));
        assert!(!set.remove(FINALIZER_NAME));
        assert!(!set.contains(FINALIZER_NAME));

        let mut out = ObjectMeta::default();
        set.apply_to(&mut out);
        assert_eq!(out.finalizers, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_empty_set_clears_metadata() {
        let mut set = FinalizerSet::from_meta(&meta(&[FINALIZER_NAME]));
        set.remove(FINALIZER_NAME);

        let mut out = meta(&[FINALIZER_NAME]);
        set.apply_to(&mut out);
        assert!(set.is_empty());
        assert_eq!(out.finalizers, None);
    }
}
