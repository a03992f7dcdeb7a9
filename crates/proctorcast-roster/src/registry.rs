use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, info};

use crate::config::{RegistryConfig, SortConfig, SortField};
use crate::error::{Result, RosterError};
use crate::roster::Roster;
use crate::student::{Bitmap, Student};

/// Id-keyed registry of connected agents.
///
/// All mutations and the resort run under one lock. Callers only ever get
/// `Arc<Student>` snapshots, never a reference into the map.
pub struct StudentRegistry {
    inner: Mutex<Inner>,
    config: RegistryConfig,
}

struct Inner {
    students: HashMap<String, Arc<Student>>,
    sorted_ids: Vec<String>,
    sort: SortConfig,
    needs_resort: bool,
    last_sort: Option<Instant>,
    next_version: u64,
}

impl StudentRegistry {
    /// Create an empty registry with default config.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create an empty registry with explicit config.
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                students: HashMap::new(),
                sorted_ids: Vec::new(),
                sort: config.sort,
                needs_resort: true,
                last_sort: None,
                next_version: 1,
            }),
            config,
        }
    }

    /// Register an agent. An existing record with the same id is replaced.
    pub fn add(&self, id: &str, name: &str) {
        let mut inner = self.lock();
        inner
            .students
            .insert(id.to_string(), Arc::new(Student::new(id, name)));
        inner.needs_resort = true;
        info!(student_id = id, name, "student joined");
    }

    /// Whether a record exists for `id`.
    pub fn exists(&self, id: &str) -> bool {
        self.lock().students.contains_key(id)
    }

    /// Change an agent's display name.
    pub fn update_name(&self, id: &str, name: &str) -> Result<()> {
        let mut inner = self.lock();
        let current = inner
            .students
            .get(id)
            .ok_or_else(|| RosterError::UnknownStudent(id.to_string()))?;
        if current.name() == name {
            return Ok(());
        }

        let renamed = Arc::new(current.with_name(name));
        inner.students.insert(id.to_string(), renamed);
        inner.needs_resort = true;
        debug!(student_id = id, name, "student renamed");
        Ok(())
    }

    /// Replace an agent's image and return its new identity marker.
    pub fn update_image(&self, id: &str, image: Bitmap) -> Result<u64> {
        let mut inner = self.lock();
        let version = inner.next_version;
        let current = inner
            .students
            .get(id)
            .ok_or_else(|| RosterError::UnknownStudent(id.to_string()))?;

        let updated = Arc::new(current.with_image(image, version));
        inner.students.insert(id.to_string(), updated);
        inner.next_version += 1;
        Ok(version)
    }

    /// Drop an agent's record. Returns whether one existed.
    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.lock();
        let removed = inner.students.remove(id).is_some();
        if removed {
            inner.needs_resort = true;
            info!(student_id = id, "student left");
        }
        removed
    }

    /// Drop every record.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.students.clear();
        inner.sorted_ids.clear();
        inner.needs_resort = true;
    }

    /// Number of agents on the roster.
    pub fn count(&self) -> usize {
        self.lock().students.len()
    }

    /// Snapshot of one agent.
    pub fn get_by_id(&self, id: &str) -> Option<Arc<Student>> {
        self.lock().students.get(id).cloned()
    }

    /// Consistent snapshot of the roster in the current sort order.
    ///
    /// The order is recomputed only when membership or a name changed, or
    /// when `resort_interval` has elapsed since the last sort. Records always
    /// reflect their latest image.
    pub fn get_sorted(&self) -> Vec<Arc<Student>> {
        let mut inner = self.lock();

        let stale = inner
            .last_sort
            .is_none_or(|at| at.elapsed() > self.config.resort_interval);
        if inner.needs_resort || stale {
            inner.resort();
        }

        inner
            .sorted_ids
            .iter()
            .filter_map(|id| inner.students.get(id).cloned())
            .collect()
    }

    /// Order the sorted view by `field`.
    pub fn set_sort_field(&self, field: SortField) {
        let mut inner = self.lock();
        inner.sort.field = field;
        inner.needs_resort = true;
    }

    /// Flip between ascending and descending order.
    pub fn toggle_sort_direction(&self) {
        let mut inner = self.lock();
        inner.sort.ascending = !inner.sort.ascending;
        inner.needs_resort = true;
    }

    /// Current ordering of the sorted view.
    pub fn sort_config(&self) -> SortConfig {
        self.lock().sort
    }

    /// Get registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn resort(&mut self) {
        let mut records: Vec<&Arc<Student>> = self.students.values().collect();
        let sort = self.sort;
        records.sort_by(|a, b| {
            let ordering = compare(a, b, sort.field);
            if sort.ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });

        self.sorted_ids = records.iter().map(|s| s.id().to_string()).collect();
        self.needs_resort = false;
        self.last_sort = Some(Instant::now());
    }
}

fn compare(a: &Student, b: &Student, field: SortField) -> Ordering {
    match field {
        SortField::Name => a
            .name()
            .to_lowercase()
            .cmp(&b.name().to_lowercase())
            .then_with(|| a.id().cmp(b.id())),
        SortField::Id => a.id().cmp(b.id()),
    }
}

impl Default for StudentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Roster for StudentRegistry {
    fn add_student(&self, id: &str, name: &str) {
        self.add(id, name);
    }

    fn remove_student(&self, id: &str) {
        self.remove(id);
    }

    fn update_image(&self, id: &str, image: Bitmap) -> Result<()> {
        StudentRegistry::update_image(self, id, image).map(|_| ())
    }

    fn update_name(&self, id: &str, name: &str) -> Result<()> {
        StudentRegistry::update_name(self, id, name)
    }

    fn exists(&self, id: &str) -> bool {
        StudentRegistry::exists(self, id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::thread;
    use std::time::Duration;

    use image::DynamicImage;

    use super::*;

    fn bitmap() -> Bitmap {
        Arc::new(DynamicImage::new_rgb8(2, 2))
    }

    fn names(registry: &StudentRegistry) -> Vec<String> {
        registry
            .get_sorted()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    #[test]
    fn add_exists_count_remove() {
        let registry = StudentRegistry::new();
        assert_eq!(registry.count(), 0);
        assert!(!registry.exists("A42"));

        registry.add("A42", "Ada");
        assert!(registry.exists("A42"));
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.get_by_id("A42").unwrap().name(), "Ada");

        assert!(registry.remove("A42"));
        assert!(!registry.remove("A42"));
        assert!(!registry.exists("A42"));
        assert!(registry.get_by_id("A42").is_none());
    }

    #[test]
    fn update_name_keeps_record_identity() {
        let registry = StudentRegistry::new();
        registry.add("A42", "Ada");
        registry.update_image("A42", bitmap()).unwrap();

        registry.update_name("A42", "Ada L.").unwrap();
        let student = registry.get_by_id("A42").unwrap();
        assert_eq!(student.name(), "Ada L.");
        assert!(student.image().is_some());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn updates_to_unknown_ids_fail() {
        let registry = StudentRegistry::new();
        assert_eq!(
            registry.update_name("ghost", "x"),
            Err(RosterError::UnknownStudent("ghost".to_string()))
        );
        assert!(matches!(
            registry.update_image("ghost", bitmap()),
            Err(RosterError::UnknownStudent(_))
        ));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn image_version_increases_on_every_update() {
        let registry = StudentRegistry::new();
        registry.add("A42", "Ada");
        assert_eq!(registry.get_by_id("A42").unwrap().image_version(), 0);

        let first = registry.update_image("A42", bitmap()).unwrap();
        let second = registry.update_image("A42", bitmap()).unwrap();
        assert!(second > first);
        assert_eq!(registry.get_by_id("A42").unwrap().image_version(), second);
    }

    #[test]
    fn versions_never_repeat_across_readds() {
        let registry = StudentRegistry::new();
        registry.add("A42", "Ada");
        let before = registry.update_image("A42", bitmap()).unwrap();
        registry.remove("A42");
        registry.add("A42", "Ada");
        let after = registry.update_image("A42", bitmap()).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn sorted_by_name_direction_and_id() {
        let registry = StudentRegistry::new();
        registry.add("1", "B");
        registry.add("2", "A");
        registry.add("3", "C");

        assert_eq!(names(&registry), ["A", "B", "C"]);

        registry.toggle_sort_direction();
        assert_eq!(names(&registry), ["C", "B", "A"]);
        assert!(!registry.sort_config().ascending);

        registry.toggle_sort_direction();
        registry.set_sort_field(SortField::Id);
        let ids: Vec<String> = registry
            .get_sorted()
            .iter()
            .map(|s| s.id().to_string())
            .collect();
        assert_eq!(ids, ["1", "2", "3"]);
        assert_eq!(names(&registry), ["B", "A", "C"]);
    }

    #[test]
    fn name_sort_is_case_insensitive() {
        let registry = StudentRegistry::new();
        registry.add("1", "bob");
        registry.add("2", "Alice");
        registry.add("3", "carol");

        assert_eq!(names(&registry), ["Alice", "bob", "carol"]);
    }

    #[test]
    fn sorted_view_reflects_arrivals_renames_and_images() {
        let registry = StudentRegistry::new();
        registry.add("1", "B");
        assert_eq!(names(&registry), ["B"]);

        registry.add("2", "A");
        assert_eq!(names(&registry), ["A", "B"]);

        registry.update_name("2", "Z").unwrap();
        assert_eq!(names(&registry), ["B", "Z"]);

        let version = registry.update_image("1", bitmap()).unwrap();
        assert_eq!(registry.get_sorted()[0].image_version(), version);
    }

    #[test]
    fn sorted_view_recomputes_after_interval() {
        let registry = StudentRegistry::with_config(RegistryConfig {
            resort_interval: Duration::from_millis(10),
            ..RegistryConfig::default()
        });
        registry.add("1", "A");
        let first = registry.get_sorted();
        thread::sleep(Duration::from_millis(20));
        let second = registry.get_sorted();
        assert_eq!(first.len(), second.len());
        assert!(registry.lock().last_sort.is_some());
    }

    #[test]
    fn clear_empties_roster() {
        let registry = StudentRegistry::new();
        registry.add("1", "A");
        registry.add("2", "B");
        let _ = registry.get_sorted();

        registry.clear();
        assert_eq!(registry.count(), 0);
        assert!(registry.get_sorted().is_empty());
    }

    #[test]
    fn roster_trait_dispatches_to_registry() {
        let registry = Arc::new(StudentRegistry::new());
        let roster: Arc<dyn Roster> = registry.clone();

        roster.add_student("A42", "Ada");
        assert!(roster.exists("A42"));
        roster.update_name("A42", "Ada L.").unwrap();
        roster.update_image("A42", bitmap()).unwrap();
        assert_eq!(registry.get_by_id("A42").unwrap().name(), "Ada L.");

        roster.remove_student("A42");
        assert!(!registry.exists("A42"));
    }

    #[test]
    fn concurrent_disjoint_mutations_keep_view_consistent() {
        let registry = Arc::new(StudentRegistry::new());

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for round in 0..50 {
                        let id = format!("w{worker}-{round}");
                        registry.add(&id, &format!("name {round}"));
                        registry.update_image(&id, bitmap()).unwrap();
                        if round % 2 == 0 {
                            assert!(registry.remove(&id));
                        }
                        let _ = registry.get_sorted();
                    }
                })
            })
            .collect();

        let reader = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for _ in 0..200 {
                    let snapshot = registry.get_sorted();
                    let unique: HashSet<&str> = snapshot.iter().map(|s| s.id()).collect();
                    assert_eq!(unique.len(), snapshot.len());
                }
            })
        };

        for worker in workers {
            worker.join().unwrap();
        }
        reader.join().unwrap();

        let snapshot = registry.get_sorted();
        assert_eq!(snapshot.len(), 8 * 25);
        assert_eq!(registry.count(), 8 * 25);
        assert!(snapshot.iter().all(|s| s.image_version() > 0));
    }
}
