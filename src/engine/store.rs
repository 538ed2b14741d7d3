use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use crate::data::{Person, PersonDraft};
use crate::engine::Snapshotter;
use crate::proto::command::{CollectionInfo, Op, Predicate};
use crate::{Error, Result, RosterOps};

/// The authoritative in-memory collection, keyed by id.
///
/// All mutations run under the write lock and are transactional: the
/// mutation is applied in memory, then persisted through the gateway
/// while the lock is still held; if the save fails the in-memory change
/// is rolled back and the operation reports [`Error::Persistence`].
/// Holding the lock across the save means two mutations are never
/// durably persisted out of the order they were applied.
///
/// Id allocation lives inside the same critical section, so ids are
/// monotonic and race-free under concurrent adds. The counter only
/// grows; `clear` does not reset it, so ids are never reused.
pub struct Roster {
    inner: RwLock<Inner>,
    snapshotter: Option<Arc<dyn Snapshotter>>,
    init_date: NaiveDate,
}

#[derive(Clone)]
struct Inner {
    people: BTreeMap<u64, Person>,
    next_id: u64,
}

impl Roster {
    /// Builds the store around an initial collection (usually the
    /// gateway's `load` result). The id counter resumes above the highest
    /// loaded id.
    pub fn new(initial: Vec<Person>, snapshotter: Option<Arc<dyn Snapshotter>>) -> Self {
        let mut people = BTreeMap::new();
        for person in initial {
            people.insert(person.id, person);
        }
        let next_id = people.keys().next_back().map_or(1, |max| max + 1);
        Self {
            inner: RwLock::new(Inner { people, next_id }),
            snapshotter,
            init_date: Utc::now().date_naive(),
        }
    }

    pub fn get(&self, id: u64) -> Option<Person> {
        self.inner.read().unwrap().people.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().people.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persists the current state unconditionally. Called on graceful
    /// shutdown.
    pub fn flush(&self) -> Result<()> {
        let inner = self.inner.read().unwrap();
        self.persist(&inner)
    }

    fn persist(&self, inner: &Inner) -> Result<()> {
        if let Some(snapshotter) = &self.snapshotter {
            let people: Vec<Person> = inner.people.values().cloned().collect();
            snapshotter.save(&people).map_err(|e| {
                log::error!("snapshot save failed: {e}");
                Error::Persistence(e.to_string())
            })?;
        }
        Ok(())
    }

    /// Runs a mutation under the write lock as one transaction: apply,
    /// then save; any failure (including the save) restores the state
    /// from before the mutation.
    fn with_write<T>(&self, f: impl FnOnce(&mut Inner) -> Result<T>) -> Result<T> {
        let mut inner = self.inner.write().unwrap();
        let backup = inner.clone();
        let result = f(&mut inner).and_then(|value| {
            self.persist(&inner)?;
            Ok(value)
        });
        if result.is_err() {
            *inner = backup;
        }
        result
    }
}

impl Inner {
    fn add(&mut self, draft: PersonDraft, today: NaiveDate) -> Result<Person> {
        draft.validate()?;
        let id = self.next_id;
        let person = draft.into_person(id, today);
        self.people.insert(id, person.clone());
        self.next_id += 1;
        Ok(person)
    }

    fn update(&mut self, id: u64, draft: PersonDraft) -> Result<Person> {
        draft.validate()?;
        let created_on = self
            .people
            .get(&id)
            .map(|p| p.created_on)
            .ok_or(Error::NotFound(id))?;
        let person = draft.into_person(id, created_on);
        self.people.insert(id, person.clone());
        Ok(person)
    }

    fn remove(&mut self, id: u64) -> Result<()> {
        self.people.remove(&id).map(|_| ()).ok_or(Error::NotFound(id))
    }

    fn clear(&mut self) {
        self.people.clear();
    }

    fn remove_matching(&mut self, predicate: &Predicate) -> u64 {
        let before = self.people.len();
        self.people.retain(|_, person| !predicate.matches(person));
        (before - self.people.len()) as u64
    }
}

/// Applies a script's operations in order against already-locked state.
/// Read-only ops are permitted and count as applied; their results are
/// not part of the script's response. Errors propagate to the caller,
/// which restores the pre-script state.
fn apply_script(inner: &mut Inner, ops: &[Op], today: NaiveDate) -> Result<u64> {
    let mut applied = 0;
    for op in ops {
        match op {
            Op::Add(draft) => {
                inner.add(draft.clone(), today)?;
            }
            Op::Update { id, draft } => {
                inner.update(*id, draft.clone())?;
            }
            Op::RemoveById(id) => inner.remove(*id)?,
            Op::Clear => inner.clear(),
            Op::RemoveMatching(predicate) => {
                inner.remove_matching(predicate);
            }
            Op::List | Op::Info | Op::SumOfHeight | Op::FilterContainsName(_) => {}
            Op::RunScript(nested) => {
                applied += apply_script(inner, nested, today)?;
                continue;
            }
        }
        applied += 1;
    }
    Ok(applied)
}

#[async_trait]
impl RosterOps for Roster {
    async fn add(&self, draft: PersonDraft) -> Result<Person> {
        let today = Utc::now().date_naive();
        self.with_write(|inner| inner.add(draft, today))
    }

    async fn update(&self, id: u64, draft: PersonDraft) -> Result<Person> {
        self.with_write(|inner| inner.update(id, draft))
    }

    async fn remove_by_id(&self, id: u64) -> Result<()> {
        self.with_write(|inner| inner.remove(id))
    }

    async fn clear(&self) -> Result<()> {
        self.with_write(|inner| {
            inner.clear();
            Ok(())
        })
    }

    async fn list(&self) -> Result<Vec<Person>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.people.values().cloned().collect())
    }

    async fn remove_matching(&self, predicate: Predicate) -> Result<u64> {
        self.with_write(|inner| Ok(inner.remove_matching(&predicate)))
    }

    async fn info(&self) -> Result<CollectionInfo> {
        let inner = self.inner.read().unwrap();
        Ok(CollectionInfo {
            backing: "BTreeMap".to_string(),
            init_date: self.init_date,
            len: inner.people.len() as u64,
        })
    }

    async fn sum_of_height(&self) -> Result<u64> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .people
            .values()
            .filter_map(|p| p.height)
            .map(|h| h as u64)
            .sum())
    }

    async fn filter_contains_name(&self, needle: &str) -> Result<Vec<Person>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .people
            .values()
            .filter(|p| p.name.contains(needle))
            .cloned()
            .collect())
    }

    async fn run_script(&self, ops: Vec<Op>) -> Result<u64> {
        let today = Utc::now().date_naive();
        self.with_write(|inner| apply_script(inner, &ops, today))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Coordinates, Country, EyeColor};
    use crate::engine::FileSnapshotter;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    fn draft(name: &str) -> PersonDraft {
        PersonDraft {
            name: name.to_string(),
            coordinates: Coordinates { x: 0.0, y: 0.0 },
            height: Some(180),
            passport_id: None,
            eye_color: EyeColor::Black,
            nationality: Country::China,
            location: None,
        }
    }

    /// Gateway that can be flipped into a failing state mid-test.
    struct FlakySnapshotter {
        failing: AtomicBool,
    }

    impl FlakySnapshotter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                failing: AtomicBool::new(false),
            })
        }

        fn fail_next(&self) {
            self.failing.store(true, Ordering::SeqCst);
        }
    }

    impl Snapshotter for FlakySnapshotter {
        fn load(&self) -> Result<Vec<Person>> {
            Ok(Vec::new())
        }

        fn save(&self, _people: &[Person]) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::Persistence("injected failure".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn add_assigns_contiguous_ids() {
        let roster = Roster::new(Vec::new(), None);
        let a = roster.add(draft("a")).await.unwrap();
        let b = roster.add(draft("b")).await.unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
    }

    #[tokio::test]
    async fn ids_never_reused_after_removal_or_clear() {
        let roster = Roster::new(Vec::new(), None);
        roster.add(draft("a")).await.unwrap();
        roster.add(draft("b")).await.unwrap();
        roster.remove_by_id(2).await.unwrap();
        let c = roster.add(draft("c")).await.unwrap();
        assert_eq!(c.id, 3);

        roster.clear().await.unwrap();
        let d = roster.add(draft("d")).await.unwrap();
        assert_eq!(d.id, 4);
    }

    #[tokio::test]
    async fn next_id_resumes_above_loaded_snapshot() {
        let initial = vec![draft("old").into_person(41, Utc::now().date_naive())];
        let roster = Roster::new(initial, None);
        let added = roster.add(draft("new")).await.unwrap();
        assert_eq!(added.id, 42);
    }

    #[tokio::test]
    async fn concurrent_adds_yield_distinct_contiguous_ids() {
        let roster = Arc::new(Roster::new(Vec::new(), None));
        let mut handles = Vec::new();
        for i in 0..32 {
            let roster = roster.clone();
            handles.push(tokio::spawn(async move {
                roster.add(draft(&format!("p{i}"))).await.unwrap().id
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=32).collect::<Vec<u64>>());
        assert_eq!(roster.len(), 32);
    }

    #[tokio::test]
    async fn update_preserves_id_and_creation_date() {
        let roster = Roster::new(Vec::new(), None);
        let original = roster.add(draft("before")).await.unwrap();
        let updated = roster.update(original.id, draft("after")).await.unwrap();
        assert_eq!(updated.id, original.id);
        assert_eq!(updated.created_on, original.created_on);
        assert_eq!(updated.name, "after");
        assert_eq!(roster.get(original.id).unwrap().name, "after");
    }

    #[tokio::test]
    async fn missing_ids_report_not_found() {
        let roster = Roster::new(Vec::new(), None);
        assert!(matches!(
            roster.remove_by_id(9).await,
            Err(Error::NotFound(9))
        ));
        assert!(matches!(
            roster.update(9, draft("x")).await,
            Err(Error::NotFound(9))
        ));
    }

    #[tokio::test]
    async fn invalid_draft_rejected_without_mutation() {
        let roster = Roster::new(Vec::new(), None);
        let mut bad = draft("");
        bad.height = Some(0);
        assert!(matches!(
            roster.add(bad).await,
            Err(Error::Validation { .. })
        ));
        assert!(roster.is_empty());
    }

    #[tokio::test]
    async fn list_is_id_ordered_and_stable() {
        let roster = Roster::new(Vec::new(), None);
        for name in ["c", "a", "b"] {
            roster.add(draft(name)).await.unwrap();
        }
        let first = roster.list().await.unwrap();
        let second = roster.list().await.unwrap();
        assert_eq!(first, second);
        let ids: Vec<u64> = first.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn clear_on_empty_is_ok() {
        let roster = Roster::new(Vec::new(), None);
        roster.clear().await.unwrap();
        roster.clear().await.unwrap();
        assert!(roster.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_matching_reports_count() {
        let roster = Roster::new(Vec::new(), None);
        for name in ["ann", "bob", "anna"] {
            roster.add(draft(name)).await.unwrap();
        }
        let removed = roster
            .remove_matching(Predicate::NameContains("ann".to_string()))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(roster.len(), 1);

        let removed = roster
            .remove_matching(Predicate::NameContains("zzz".to_string()))
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn sum_of_height_skips_absent() {
        let roster = Roster::new(Vec::new(), None);
        roster.add(draft("a")).await.unwrap();
        let mut no_height = draft("b");
        no_height.height = None;
        roster.add(no_height).await.unwrap();
        assert_eq!(roster.sum_of_height().await.unwrap(), 180);
    }

    #[tokio::test]
    async fn memory_matches_storage_after_each_mutation() {
        let dir = tempdir().unwrap();
        let snapshotter = Arc::new(FileSnapshotter::new(dir.path().join("roster.json")).unwrap());
        let roster = Roster::new(Vec::new(), Some(snapshotter.clone()));

        roster.add(draft("a")).await.unwrap();
        roster.add(draft("b")).await.unwrap();
        assert_eq!(snapshotter.load().unwrap(), roster.list().await.unwrap());

        roster.update(1, draft("a2")).await.unwrap();
        assert_eq!(snapshotter.load().unwrap(), roster.list().await.unwrap());

        roster.remove_by_id(2).await.unwrap();
        assert_eq!(snapshotter.load().unwrap(), roster.list().await.unwrap());
    }

    #[tokio::test]
    async fn failed_save_rolls_back_the_mutation() {
        let snapshotter = FlakySnapshotter::new();
        let roster = Roster::new(Vec::new(), Some(snapshotter.clone()));
        roster.add(draft("a")).await.unwrap();
        let before = roster.list().await.unwrap();

        snapshotter.fail_next();
        let err = roster.update(1, draft("changed")).await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(roster.list().await.unwrap(), before);

        let err = roster.add(draft("b")).await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(roster.list().await.unwrap(), before);
    }

    #[tokio::test]
    async fn script_applies_atomically() {
        let roster = Roster::new(Vec::new(), None);
        let applied = roster
            .run_script(vec![
                Op::Add(draft("a")),
                Op::Add(draft("b")),
                Op::RemoveById(1),
            ])
            .await
            .unwrap();
        assert_eq!(applied, 3);
        let ids: Vec<u64> = roster
            .list()
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![2]);
    }

    #[tokio::test]
    async fn failing_script_rolls_back_entirely() {
        let roster = Roster::new(Vec::new(), None);
        roster.add(draft("keep")).await.unwrap();

        let err = roster
            .run_script(vec![
                Op::Add(draft("a")),
                Op::RemoveById(999),
                Op::Clear,
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(999)));

        let people = roster.list().await.unwrap();
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].name, "keep");

        // Id allocation inside the failed script is rolled back too.
        let next = roster.add(draft("next")).await.unwrap();
        assert_eq!(next.id, 2);
    }
}
