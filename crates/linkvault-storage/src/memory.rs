use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use jiff::Timestamp;
use linkvault_core::error::{Result, StorageError};
use linkvault_core::repository::{
    Attachment, CreateOutcome, LinkStore, OwnerId, Ownership, Resolution, StoreStats, UrlRecord,
};
use linkvault_core::{DeletionTask, ShortCode};
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// In-memory implementation of [`LinkStore`] using DashMap.
///
/// Each map is sharded, so operations on unrelated keys do not contend.
/// Creation locks the target entry first and the code entry second; no
/// code path takes them in the opposite order.
#[derive(Debug, Default)]
pub struct InMemoryLinkStore {
    /// Target URL -> code. The uniqueness constraint on targets.
    targets: DashMap<String, ShortCode>,
    /// Code -> target URL.
    records: DashMap<ShortCode, String>,
    /// Code -> references held by each owner.
    references: DashMap<ShortCode, HashMap<OwnerId, Ownership>>,
    /// Owner -> codes the owner ever referenced.
    owners: DashMap<OwnerId, HashSet<ShortCode>>,
}

/// Which record `create_record` left behind for the target.
enum Record {
    Created(ShortCode),
    Existing(ShortCode),
}

impl InMemoryLinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every ownership row for `code`, deleted ones included.
    pub fn references(&self, code: &ShortCode) -> Vec<Ownership> {
        self.references
            .get(code)
            .map(|refs| refs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Registers `target` under `code` together with the creator's reference.
    ///
    /// Both become visible before the target slot is released, so no other
    /// caller can attach to the record ahead of its creator.
    fn create_record(&self, owner: &OwnerId, code: &ShortCode, target: &str) -> Result<Record> {
        let slot = match self.targets.entry(target.to_owned()) {
            Entry::Occupied(existing) => return Ok(Record::Existing(existing.get().clone())),
            Entry::Vacant(slot) => slot,
        };

        match self.records.entry(code.clone()) {
            Entry::Occupied(stored) => {
                return Err(StorageError::HashCollision {
                    code: code.to_string(),
                    stored: stored.get().clone(),
                    requested: target.to_owned(),
                });
            }
            Entry::Vacant(record) => {
                record.insert(target.to_owned());
            }
        }

        self.references
            .entry(code.clone())
            .or_default()
            .insert(owner.clone(), Ownership::live(owner.clone(), code.clone()));
        self.remember(owner, code);

        slot.insert(code.clone());
        Ok(Record::Created(code.clone()))
    }

    /// Gives `owner` a live reference to an existing record.
    fn attach(&self, owner: &OwnerId, code: &ShortCode) -> CreateOutcome {
        let outcome = {
            let mut refs = self.references.entry(code.clone()).or_default();
            match refs.get_mut(owner) {
                None => {
                    refs.insert(owner.clone(), Ownership::live(owner.clone(), code.clone()));
                    CreateOutcome::Attached
                }
                Some(ownership) if ownership.is_deleted() => {
                    ownership.deleted_at = None;
                    CreateOutcome::Resurrected
                }
                Some(_) => CreateOutcome::AlreadyOwned,
            }
        };

        self.remember(owner, code);
        outcome
    }

    fn remember(&self, owner: &OwnerId, code: &ShortCode) {
        self.owners
            .entry(owner.clone())
            .or_default()
            .insert(code.clone());
    }

    fn is_live(&self, owner: &OwnerId, code: &ShortCode) -> bool {
        self.references
            .get(code)
            .is_some_and(|refs| refs.get(owner).is_some_and(|o| !o.is_deleted()))
    }
}

#[async_trait]
impl LinkStore for InMemoryLinkStore {
    async fn resolve(&self, code: &ShortCode) -> Result<Resolution> {
        let Some(target) = self.records.get(code).map(|r| r.value().clone()) else {
            return Ok(Resolution::NotFound);
        };

        let gone = self
            .references
            .get(code)
            .is_some_and(|refs| !refs.is_empty() && refs.values().all(Ownership::is_deleted));

        if gone {
            Ok(Resolution::Gone)
        } else {
            Ok(Resolution::Found(target))
        }
    }

    async fn create_or_attach(
        &self,
        owner: &OwnerId,
        code: &ShortCode,
        target: &str,
    ) -> Result<Attachment> {
        let (code, outcome) = match self.create_record(owner, code, target)? {
            Record::Created(created) => (created, CreateOutcome::Created),
            Record::Existing(existing) => {
                let outcome = self.attach(owner, &existing);
                (existing, outcome)
            }
        };

        trace!(owner = %owner, code = %code, ?outcome, "attached owner to record");
        Ok(Attachment { code, outcome })
    }

    async fn list_by_owner(&self, owner: &OwnerId) -> Result<Vec<UrlRecord>> {
        let Some(codes) = self.owners.get(owner).map(|codes| codes.value().clone()) else {
            return Ok(Vec::new());
        };

        let records = codes
            .into_iter()
            .filter(|code| self.is_live(owner, code))
            .filter_map(|code| {
                let target_url = self.records.get(&code)?.value().clone();
                Some(UrlRecord { code, target_url })
            })
            .collect();

        Ok(records)
    }

    async fn bulk_soft_delete(&self, tasks: &[DeletionTask]) -> Result<u64> {
        let now = Timestamp::now();
        let mut flipped = 0;

        for task in tasks {
            let Some(mut refs) = self.references.get_mut(&task.code) else {
                continue;
            };
            if let Some(ownership) = refs.get_mut(&task.owner) {
                if ownership.deleted_at.is_none() {
                    ownership.deleted_at = Some(now);
                    flipped += 1;
                }
            }
        }

        trace!(tasks = tasks.len(), flipped, "applied soft deletes");
        Ok(flipped)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            urls: self.records.len() as u64,
            owners: self.owners.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Barrier;

    fn owner(id: &str) -> OwnerId {
        OwnerId::new(id)
    }

    async fn create(store: &InMemoryLinkStore, owner_id: &str, target: &str) -> Attachment {
        store
            .create_or_attach(&owner(owner_id), &ShortCode::for_target(target), target)
            .await
            .unwrap()
    }

    fn task(owner_id: &str, code: &ShortCode) -> DeletionTask {
        DeletionTask::new(owner_id, code.clone())
    }

    #[tokio::test]
    async fn create_then_resolve() {
        let store = InMemoryLinkStore::new();

        let attachment = create(&store, "u1", "https://example.com/a").await;
        assert_eq!(attachment.outcome, CreateOutcome::Created);

        let resolved = store.resolve(&attachment.code).await.unwrap();
        assert_eq!(
            resolved,
            Resolution::Found("https://example.com/a".to_string())
        );
    }

    #[tokio::test]
    async fn resolve_unknown_code() {
        let store = InMemoryLinkStore::new();

        let resolved = store
            .resolve(&ShortCode::new_unchecked("nope"))
            .await
            .unwrap();
        assert_eq!(resolved, Resolution::NotFound);
    }

    #[tokio::test]
    async fn second_create_by_same_owner_is_already_owned() {
        let store = InMemoryLinkStore::new();

        let first = create(&store, "u1", "https://example.com/a").await;
        let second = create(&store, "u1", "https://example.com/a").await;

        assert_eq!(second.outcome, CreateOutcome::AlreadyOwned);
        assert_eq!(first.code, second.code);
        assert_eq!(store.references(&first.code).len(), 1);
    }

    #[tokio::test]
    async fn other_owner_attaches_to_existing_record() {
        let store = InMemoryLinkStore::new();

        let first = create(&store, "u1", "https://example.com/a").await;
        let second = create(&store, "u2", "https://example.com/a").await;

        assert_eq!(second.outcome, CreateOutcome::Attached);
        assert_eq!(first.code, second.code);
        assert_eq!(store.stats().await.unwrap().urls, 1);
        assert_eq!(store.references(&first.code).len(), 2);
    }

    #[tokio::test]
    async fn recreate_after_delete_resurrects() {
        let store = InMemoryLinkStore::new();
        let code = create(&store, "u1", "https://example.com/a").await.code;

        assert_eq!(store.bulk_soft_delete(&[task("u1", &code)]).await.unwrap(), 1);
        assert_eq!(store.resolve(&code).await.unwrap(), Resolution::Gone);

        let again = create(&store, "u1", "https://example.com/a").await;
        assert_eq!(again.outcome, CreateOutcome::Resurrected);
        assert_eq!(again.code, code);

        let refs = store.references(&code);
        assert_eq!(refs.len(), 1);
        assert!(!refs[0].is_deleted());
        assert!(matches!(
            store.resolve(&code).await.unwrap(),
            Resolution::Found(_)
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryLinkStore::new();
        let code = create(&store, "u1", "https://example.com/a").await.code;

        let tasks = [task("u1", &code), task("u1", &code)];
        assert_eq!(store.bulk_soft_delete(&tasks).await.unwrap(), 1);
        assert_eq!(store.bulk_soft_delete(&tasks).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_of_unknown_pairs_is_noop() {
        let store = InMemoryLinkStore::new();
        let code = create(&store, "u1", "https://example.com/a").await.code;

        let tasks = [
            task("u2", &code),
            task("u1", &ShortCode::new_unchecked("missing")),
        ];
        assert_eq!(store.bulk_soft_delete(&tasks).await.unwrap(), 0);
        assert!(matches!(
            store.resolve(&code).await.unwrap(),
            Resolution::Found(_)
        ));
    }

    #[tokio::test]
    async fn code_stays_resolvable_while_any_owner_is_live() {
        let store = InMemoryLinkStore::new();
        let code = create(&store, "u1", "https://example.com/a").await.code;
        create(&store, "u2", "https://example.com/a").await;

        store.bulk_soft_delete(&[task("u1", &code)]).await.unwrap();
        assert_eq!(
            store.resolve(&code).await.unwrap(),
            Resolution::Found("https://example.com/a".to_string())
        );
        assert!(store.list_by_owner(&owner("u1")).await.unwrap().is_empty());
        assert_eq!(store.list_by_owner(&owner("u2")).await.unwrap().len(), 1);

        store.bulk_soft_delete(&[task("u2", &code)]).await.unwrap();
        assert_eq!(store.resolve(&code).await.unwrap(), Resolution::Gone);
    }

    #[tokio::test]
    async fn list_by_owner_only_returns_live_links() {
        let store = InMemoryLinkStore::new();
        let a = create(&store, "u1", "https://example.com/a").await.code;
        let b = create(&store, "u1", "https://example.com/b").await.code;
        create(&store, "u2", "https://example.com/c").await;

        store.bulk_soft_delete(&[task("u1", &a)]).await.unwrap();

        let listed = store.list_by_owner(&owner("u1")).await.unwrap();
        assert_eq!(
            listed,
            vec![UrlRecord {
                code: b,
                target_url: "https://example.com/b".to_string(),
            }]
        );
        assert!(store.list_by_owner(&owner("nobody")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mismatched_code_is_a_collision() {
        let store = InMemoryLinkStore::new();
        let code = create(&store, "u1", "https://example.com/a").await.code;

        let err = store
            .create_or_attach(&owner("u1"), &code, "https://example.com/b")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::HashCollision { .. }));

        // The losing target must not be left half-registered.
        assert_eq!(store.stats().await.unwrap().urls, 1);
        let retry = create(&store, "u1", "https://example.com/b").await;
        assert_eq!(retry.outcome, CreateOutcome::Created);
    }

    #[tokio::test]
    async fn stats_counts_urls_and_owners() {
        let store = InMemoryLinkStore::new();
        create(&store, "u1", "https://example.com/a").await;
        create(&store, "u1", "https://example.com/b").await;
        create(&store, "u2", "https://example.com/a").await;

        let stats = store.stats().await.unwrap();
        assert_eq!(stats, StoreStats { urls: 2, owners: 2 });
        store.health_check().await.unwrap();
    }

    /// Runs one `create_or_attach` per owner, all released at once.
    async fn race(
        store: &Arc<InMemoryLinkStore>,
        owners: &[String],
        target: &str,
    ) -> Vec<Attachment> {
        let barrier = Arc::new(Barrier::new(owners.len()));
        let mut handles = vec![];

        for owner_id in owners {
            let store = Arc::clone(store);
            let barrier = Arc::clone(&barrier);
            let owner_id = OwnerId::new(owner_id);
            let target = target.to_string();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                store
                    .create_or_attach(&owner_id, &ShortCode::for_target(&target), &target)
                    .await
                    .unwrap()
            }));
        }

        let mut attachments = vec![];
        for handle in handles {
            attachments.push(handle.await.unwrap());
        }
        attachments
    }

    fn count(attachments: &[Attachment], outcome: CreateOutcome) -> usize {
        attachments.iter().filter(|a| a.outcome == outcome).count()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_creates_converge_on_one_record() {
        for round in 0..200 {
            let store = Arc::new(InMemoryLinkStore::new());
            let target = format!("https://example.com/race/{round}");
            let owners: Vec<String> = (0..8).map(|i| format!("owner-{i}")).collect();

            let attachments = race(&store, &owners, &target).await;

            assert!(attachments
                .iter()
                .all(|a| a.code == ShortCode::for_target(&target)));
            assert_eq!(count(&attachments, CreateOutcome::Created), 1);
            assert_eq!(count(&attachments, CreateOutcome::Attached), 7);
            assert_eq!(store.stats().await.unwrap().urls, 1);
            assert_eq!(store.references(&ShortCode::for_target(&target)).len(), 8);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_creates_by_one_owner_yield_one_reference() {
        for round in 0..200 {
            let store = Arc::new(InMemoryLinkStore::new());
            let target = format!("https://example.com/same-owner/{round}");
            let owners = vec!["u1".to_string(); 8];

            let attachments = race(&store, &owners, &target).await;

            // The creator never sees its own first submission as a conflict.
            assert_eq!(count(&attachments, CreateOutcome::Created), 1);
            assert_eq!(count(&attachments, CreateOutcome::AlreadyOwned), 7);
            assert_eq!(count(&attachments, CreateOutcome::Attached), 0);
            assert_eq!(store.references(&ShortCode::for_target(&target)).len(), 1);
        }
    }
}
