use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use image::DynamicImage;
use tracing::trace;

use crate::student::Student;

type Builder<H> = dyn Fn(&DynamicImage) -> H + Send + Sync;

/// Memoizes render handles built from agent bitmaps.
///
/// An entry is reused only while the record's image version and update
/// timestamp both match the ones it was built from.
pub struct ImageCache<H> {
    entries: Mutex<HashMap<String, CacheEntry<H>>>,
    builder: Box<Builder<H>>,
}

struct CacheEntry<H> {
    handle: Arc<H>,
    version: u64,
    updated_at: SystemTime,
}

impl<H> ImageCache<H> {
    /// Create an empty cache that builds handles with `builder`.
    pub fn new(builder: impl Fn(&DynamicImage) -> H + Send + Sync + 'static) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            builder: Box::new(builder),
        }
    }

    /// Return the handle for `student`'s current image, building it if needed.
    ///
    /// Returns `None` while the agent has not sent an image yet.
    pub fn get_or_build(&self, student: &Student) -> Option<Arc<H>> {
        let image = student.image()?;

        if let Some(entry) = self.lock().get(student.id()) {
            if entry.version == student.image_version() && entry.updated_at == student.updated_at()
            {
                trace!(student_id = student.id(), "image cache hit");
                return Some(Arc::clone(&entry.handle));
            }
        }

        let handle = Arc::new((self.builder)(image));
        self.lock().insert(
            student.id().to_string(),
            CacheEntry {
                handle: Arc::clone(&handle),
                version: student.image_version(),
                updated_at: student.updated_at(),
            },
        );
        Some(handle)
    }

    /// Forget the entry for a departed agent.
    pub fn remove(&self, id: &str) {
        self.lock().remove(id);
    }

    /// Forget every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Drop entries for agents no longer on the roster.
    pub fn retain_ids<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        let keep: std::collections::HashSet<&str> = ids.into_iter().collect();
        self.lock().retain(|id, _| keep.contains(id.as_str()));
    }

    /// Number of cached handles.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<H>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::registry::StudentRegistry;

    fn counting_cache() -> (ImageCache<(u32, u32)>, Arc<AtomicUsize>) {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let cache = ImageCache::new(move |image: &DynamicImage| {
            counter.fetch_add(1, Ordering::SeqCst);
            (image.width(), image.height())
        });
        (cache, builds)
    }

    #[test]
    fn no_image_no_handle() {
        let (cache, builds) = counting_cache();
        let registry = StudentRegistry::new();
        registry.add("A42", "Ada");

        assert!(cache
            .get_or_build(&registry.get_by_id("A42").unwrap())
            .is_none());
        assert_eq!(builds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unchanged_record_returns_same_handle() {
        let (cache, builds) = counting_cache();
        let registry = StudentRegistry::new();
        registry.add("A42", "Ada");
        registry
            .update_image("A42", Arc::new(DynamicImage::new_rgb8(4, 3)))
            .unwrap();

        let student = registry.get_by_id("A42").unwrap();
        let first = cache.get_or_build(&student).unwrap();
        let second = cache
            .get_or_build(&registry.get_by_id("A42").unwrap())
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*first, (4, 3));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn image_update_rebuilds_handle() {
        let (cache, builds) = counting_cache();
        let registry = StudentRegistry::new();
        registry.add("A42", "Ada");
        registry
            .update_image("A42", Arc::new(DynamicImage::new_rgb8(4, 3)))
            .unwrap();
        let first = cache
            .get_or_build(&registry.get_by_id("A42").unwrap())
            .unwrap();

        registry
            .update_image("A42", Arc::new(DynamicImage::new_rgb8(8, 6)))
            .unwrap();
        let second = cache
            .get_or_build(&registry.get_by_id("A42").unwrap())
            .unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*second, (8, 6));
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rename_does_not_invalidate() {
        let (cache, builds) = counting_cache();
        let registry = StudentRegistry::new();
        registry.add("A42", "Ada");
        registry
            .update_image("A42", Arc::new(DynamicImage::new_rgb8(1, 1)))
            .unwrap();
        let first = cache
            .get_or_build(&registry.get_by_id("A42").unwrap())
            .unwrap();

        registry.update_name("A42", "Ada L.").unwrap();
        let second = cache
            .get_or_build(&registry.get_by_id("A42").unwrap())
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_clear_and_retain() {
        let (cache, _) = counting_cache();
        let registry = StudentRegistry::new();
        for id in ["a", "b", "c"] {
            registry.add(id, id);
            registry
                .update_image(id, Arc::new(DynamicImage::new_rgb8(1, 1)))
                .unwrap();
            cache.get_or_build(&registry.get_by_id(id).unwrap());
        }
        assert_eq!(cache.len(), 3);

        cache.remove("a");
        assert_eq!(cache.len(), 2);

        cache.retain_ids(["b"]);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
