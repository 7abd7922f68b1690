//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//!
//! Each compound operation takes the account's lock stripe before its first
//! read and holds it through the batched write, scoping the whole
//! read-decide-increment sequence to a single atomic unit per account row:
//! concurrent commits for the same account serialize, commits for different
//! accounts proceed in parallel. A version check inside the write guards
//! against any writer outside that discipline. Provider-event ingestion
//! additionally stripes on the transaction ID so the same transaction can
//! never be applied twice even when the provider delivers concurrently.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex};

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use chrono::{DateTime, Utc};

use entitle_core::{
    evaluate, map_event, refresh_period as refresh_account_period, Account, AccountId, Bucket,
    EntitleError, IngestStatus, Plan, PlanId, ProviderEvent, ProviderEventRecord,
    ProviderEventStatus, Remaining, UsageEvent,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{CommitOutcome, IngestOutcome, Store};

/// Number of lock stripes for account and ingest serialization.
const LOCK_STRIPES: usize = 32;

/// Retry budget for the version-checked write in `commit_usage`:
/// one initial attempt plus one retry, then fail closed.
const COMMIT_ATTEMPTS: usize = 2;

/// Retry budget for provider-event application. Ingestion is not the
/// double-spend path, so it tolerates a little more contention.
const INGEST_ATTEMPTS: usize = 3;

/// An extra column-family put carried alongside a guarded account write.
struct ExtraPut {
    cf: &'static str,
    key: Vec<u8>,
    value: Vec<u8>,
}

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    account_locks: Vec<Mutex<()>>,
    ingest_locks: Vec<Mutex<()>>,
    plan_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            account_locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            ingest_locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            plan_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn stripe_index(key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % LOCK_STRIPES
    }

    fn account_lock(&self, key: &[u8]) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.account_locks[Self::stripe_index(key)]
            .lock()
            .map_err(|_| StoreError::Database("poisoned account lock".into()))
    }

    fn ingest_lock(&self, key: &[u8]) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.ingest_locks[Self::stripe_index(key)]
            .lock()
            .map_err(|_| StoreError::Database("poisoned ingest lock".into()))
    }

    fn not_found(entity: &'static str, id: impl ToString) -> StoreError {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    fn load_account(&self, account_id: &AccountId) -> Result<Account> {
        self.get_account(account_id)?
            .ok_or_else(|| Self::not_found("account", account_id))
    }

    /// Load the plan an account points at, tolerating a dangling reference.
    fn plan_of(&self, account: &Account) -> Result<Option<Plan>> {
        match account.plan_id {
            Some(plan_id) => self.get_plan(&plan_id),
            None => Ok(None),
        }
    }

    /// Index maintenance entries for the provider-reference indexes.
    fn index_updates(
        batch: &mut WriteBatch,
        cf_index: &Arc<BoundColumnFamily<'_>>,
        old_ref: Option<&String>,
        new_ref: Option<&String>,
        account_key: &[u8],
    ) {
        if old_ref != new_ref {
            if let Some(old) = old_ref {
                batch.delete_cf(cf_index, keys::provider_ref_key(old));
            }
        }
        if let Some(new) = new_ref {
            batch.put_cf(cf_index, keys::provider_ref_key(new), account_key);
        }
    }

    /// Version-checked account write. The caller must hold the account's
    /// lock stripe: the read-decide-increment sequences in the compound
    /// operations take it before their first read, which is what scopes the
    /// whole sequence to a single atomic unit per account row. The version
    /// check is the inner guard against any writer outside that discipline.
    ///
    /// Rejects the write with `VersionConflict` if the stored version
    /// differs from `expected_version`, otherwise bumps the version and
    /// commits the account plus any extra puts in one batch.
    /// Provider-reference indexes are kept in sync against the previously
    /// stored row.
    fn write_account_locked(
        &self,
        account: &mut Account,
        expected_version: u64,
        extras: Vec<ExtraPut>,
    ) -> Result<()> {
        let account_key = keys::account_key(&account.id);

        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let current_bytes = self
            .db
            .get_cf(&cf_accounts, &account_key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or_else(|| Self::not_found("account", account.id))?;
        let current: Account = Self::deserialize(&current_bytes)?;

        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                account_id: account.id.to_string(),
            });
        }

        account.version = expected_version + 1;

        let cf_by_sub = self.cf(cf::ACCOUNTS_BY_SUBSCRIPTION)?;
        let cf_by_customer = self.cf(cf::ACCOUNTS_BY_CUSTOMER)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_accounts, &account_key, Self::serialize(account)?);
        Self::index_updates(
            &mut batch,
            &cf_by_sub,
            current.provider_subscription_id.as_ref(),
            account.provider_subscription_id.as_ref(),
            &account_key,
        );
        Self::index_updates(
            &mut batch,
            &cf_by_customer,
            current.provider_customer_id.as_ref(),
            account.provider_customer_id.as_ref(),
            &account_key,
        );
        for extra in extras {
            let handle = self.cf(extra.cf)?;
            batch.put_cf(&handle, &extra.key, &extra.value);
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn find_account_by_ref(&self, index_cf: &'static str, provider_id: &str) -> Result<Option<Account>> {
        let cf_index = self.cf(index_cf)?;
        let Some(id_bytes) = self
            .db
            .get_cf(&cf_index, keys::provider_ref_key(provider_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };

        let uuid = uuid::Uuid::from_slice(&id_bytes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.get_account(&AccountId::from_uuid(uuid))
    }

    fn put_provider_event_record(&self, record: &ProviderEventRecord) -> Result<()> {
        let cf_events = self.cf(cf::PROVIDER_EVENTS)?;
        self.db
            .put_cf(
                &cf_events,
                keys::provider_event_key(&record.event_id),
                Self::serialize(record)?,
            )
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn invariant_error(err: EntitleError) -> StoreError {
        match err {
            EntitleError::InvariantViolation {
                bucket,
                used,
                granted,
            } => StoreError::InvariantViolation {
                bucket,
                used,
                granted,
            },
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    fn put_account(&self, account: &Account) -> Result<()> {
        let account_key = keys::account_key(&account.id);
        let _guard = self.account_lock(&account_key)?;

        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_by_sub = self.cf(cf::ACCOUNTS_BY_SUBSCRIPTION)?;
        let cf_by_customer = self.cf(cf::ACCOUNTS_BY_CUSTOMER)?;

        // Previously stored row, for index cleanup.
        let previous: Option<Account> = self
            .db
            .get_cf(&cf_accounts, &account_key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_accounts, &account_key, Self::serialize(account)?);
        Self::index_updates(
            &mut batch,
            &cf_by_sub,
            previous
                .as_ref()
                .and_then(|a| a.provider_subscription_id.as_ref()),
            account.provider_subscription_id.as_ref(),
            &account_key,
        );
        Self::index_updates(
            &mut batch,
            &cf_by_customer,
            previous
                .as_ref()
                .and_then(|a| a.provider_customer_id.as_ref()),
            account.provider_customer_id.as_ref(),
            &account_key,
        );

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        self.db
            .get_cf(&cf_accounts, keys::account_key(account_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn find_account_by_subscription(&self, subscription_id: &str) -> Result<Option<Account>> {
        let account = self.find_account_by_ref(cf::ACCOUNTS_BY_SUBSCRIPTION, subscription_id)?;
        // Tolerate a stale index entry: the account must still hold the ref.
        Ok(account
            .filter(|a| a.provider_subscription_id.as_deref() == Some(subscription_id)))
    }

    fn find_account_by_customer(&self, customer_id: &str) -> Result<Option<Account>> {
        let account = self.find_account_by_ref(cf::ACCOUNTS_BY_CUSTOMER, customer_id)?;
        Ok(account.filter(|a| a.provider_customer_id.as_deref() == Some(customer_id)))
    }

    fn list_subscribed_accounts(&self) -> Result<Vec<Account>> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let mut accounts = Vec::new();

        for item in self.db.iterator_cf(&cf_accounts, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let account: Account = Self::deserialize(&value)?;
            if account.provider_subscription_id.is_some() {
                accounts.push(account);
            }
        }

        Ok(accounts)
    }

    fn subscribe_account(
        &self,
        account_id: &AccountId,
        plan: &Plan,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        let _guard = self.account_lock(&keys::account_key(account_id))?;
        for attempt in 0..COMMIT_ATTEMPTS {
            let mut account = self.load_account(account_id)?;
            let expected = account.version;
            account.assign_plan(plan, now);

            match self.write_account_locked(&mut account, expected, Vec::new()) {
                Ok(()) => return Ok(account),
                Err(StoreError::VersionConflict { .. }) if attempt + 1 < COMMIT_ATTEMPTS => {}
                Err(StoreError::VersionConflict { .. }) => return Err(StoreError::StateChanged),
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::StateChanged)
    }

    // =========================================================================
    // Plan Operations
    // =========================================================================

    fn put_plan(&self, plan: &Plan) -> Result<()> {
        let _guard = self
            .plan_lock
            .lock()
            .map_err(|_| StoreError::Database("poisoned plan lock".into()))?;

        let cf_plans = self.cf(cf::PLANS)?;
        let mut batch = WriteBatch::default();

        // At most one plan may carry the default flag: clear any other
        // default in the same batch.
        if plan.is_default {
            for existing in self.list_plans()? {
                if existing.is_default && existing.id != plan.id {
                    let mut cleared = existing;
                    cleared.is_default = false;
                    batch.put_cf(&cf_plans, keys::plan_key(&cleared.id), Self::serialize(&cleared)?);
                }
            }
        }

        batch.put_cf(&cf_plans, keys::plan_key(&plan.id), Self::serialize(plan)?);

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn get_plan(&self, plan_id: &PlanId) -> Result<Option<Plan>> {
        let cf_plans = self.cf(cf::PLANS)?;
        self.db
            .get_cf(&cf_plans, keys::plan_key(plan_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_plans(&self) -> Result<Vec<Plan>> {
        let cf_plans = self.cf(cf::PLANS)?;
        let mut plans = Vec::new();

        for item in self.db.iterator_cf(&cf_plans, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            plans.push(Self::deserialize(&value)?);
        }

        Ok(plans)
    }

    fn default_plan(&self) -> Result<Option<Plan>> {
        Ok(self.list_plans()?.into_iter().find(|p| p.is_default))
    }

    // =========================================================================
    // Usage Log Operations
    // =========================================================================

    fn list_usage_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UsageEvent>> {
        let cf_by_account = self.cf(cf::USAGE_BY_ACCOUNT)?;
        let cf_events = self.cf(cf::USAGE_EVENTS)?;
        let prefix = keys::account_usage_prefix(account_id);

        let iter = self.db.iterator_cf(
            &cf_by_account,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        // Collect matching keys first; ULIDs are naturally time-ordered.
        let mut all_keys: Vec<Vec<u8>> = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            all_keys.push(key.to_vec());
        }

        // Reverse to get newest first.
        all_keys.reverse();

        let mut events = Vec::new();
        for key in all_keys.into_iter().skip(offset) {
            if events.len() >= limit {
                break;
            }
            let event_id = keys::extract_usage_event_id(&key);
            let data = self
                .db
                .get_cf(&cf_events, keys::usage_event_key(&event_id))
                .map_err(|e| StoreError::Database(e.to_string()))?;
            if let Some(data) = data {
                events.push(Self::deserialize(&data)?);
            }
        }

        Ok(events)
    }

    // =========================================================================
    // Provider Event Operations
    // =========================================================================

    fn get_provider_event(&self, event_id: &str) -> Result<Option<ProviderEventRecord>> {
        let cf_events = self.cf(cf::PROVIDER_EVENTS)?;
        self.db
            .get_cf(&cf_events, keys::provider_event_key(event_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn transaction_applied(&self, transaction_id: &str) -> Result<bool> {
        let cf_txns = self.cf(cf::PROVIDER_TXNS)?;
        let exists = self
            .db
            .get_cf(&cf_txns, keys::provider_txn_key(transaction_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();
        Ok(exists)
    }

    // =========================================================================
    // Compound Operations
    // =========================================================================

    fn refresh_period(
        &self,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<(Account, Option<Plan>, bool)> {
        let _guard = self.account_lock(&keys::account_key(account_id))?;
        for attempt in 0..COMMIT_ATTEMPTS {
            let mut account = self.load_account(account_id)?;
            let plan = self.plan_of(&account)?;
            let Some(plan_ref) = plan.as_ref() else {
                return Ok((account, None, false));
            };

            let expected = account.version;
            let refresh = refresh_account_period(&mut account, plan_ref, now);
            if !refresh.changed() {
                return Ok((account, plan, false));
            }

            match self.write_account_locked(&mut account, expected, Vec::new()) {
                Ok(()) => {
                    if refresh.rolled_over() {
                        tracing::debug!(account_id = %account_id, "recurring period rolled over");
                    }
                    return Ok((account, plan, refresh.rolled_over()));
                }
                Err(StoreError::VersionConflict { .. }) if attempt + 1 < COMMIT_ATTEMPTS => {}
                Err(StoreError::VersionConflict { .. }) => {
                    // Another writer refreshed concurrently; their rollover
                    // already happened, so this call reports none.
                    let account = self.load_account(account_id)?;
                    return Ok((account, plan, false));
                }
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::StateChanged)
    }

    fn commit_usage(
        &self,
        account_id: &AccountId,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CommitOutcome> {
        // The row lock scopes the whole read-decide-increment to one atomic
        // unit per account: racing commits for the last unit serialize here,
        // and the losers see the updated counters when they re-derive.
        let _guard = self.account_lock(&keys::account_key(account_id))?;
        for attempt in 0..COMMIT_ATTEMPTS {
            let mut account = self.load_account(account_id)?;
            let plan = self.plan_of(&account)?;
            let expected = account.version;

            // Stale period windows must never under-grant at commit time.
            let refresh = match plan.as_ref() {
                Some(p) => refresh_account_period(&mut account, p, now),
                None => entitle_core::PeriodRefresh::Unchanged,
            };

            // Re-derive the bucket for the *current* state: the one chosen
            // by an earlier evaluate call may no longer hold.
            let decision = evaluate(&account, plan.as_ref(), now, 1);
            let Some(bucket) = decision.bucket else {
                tracing::debug!(
                    account_id = %account_id,
                    reason = ?decision.reason,
                    "commit found no remaining capacity; caller must re-evaluate"
                );
                return Err(StoreError::StateChanged);
            };

            match bucket {
                Bucket::Purchased => account.purchased_used += 1,
                Bucket::Free => account.free_used += 1,
                Bucket::Period => account.period_used += 1,
                // Time-bound and unlimited buckets charge no counter; the
                // usage event still lands in the audit log.
                Bucket::Trial | Bucket::Unlimited => {}
            }
            account.check_invariants().map_err(Self::invariant_error)?;
            account.updated_at = now;

            let usage = UsageEvent::record(*account_id, bucket, correlation_id, now);
            let extras = vec![
                ExtraPut {
                    cf: cf::USAGE_EVENTS,
                    key: keys::usage_event_key(&usage.id),
                    value: Self::serialize(&usage)?,
                },
                ExtraPut {
                    cf: cf::USAGE_BY_ACCOUNT,
                    key: keys::account_usage_key(account_id, &usage.id),
                    value: Vec::new(),
                },
            ];

            match self.write_account_locked(&mut account, expected, extras) {
                Ok(()) => {
                    if bucket == Bucket::Unlimited {
                        tracing::info!(
                            account_id = %account_id,
                            correlation_id = %correlation_id,
                            "unlimited-access consumption recorded"
                        );
                    }
                    return Ok(CommitOutcome {
                        bucket,
                        remaining: Remaining::of(&account, plan.as_ref(), now),
                        period_rolled_over: refresh.rolled_over(),
                    });
                }
                Err(StoreError::VersionConflict { .. }) if attempt + 1 < COMMIT_ATTEMPTS => {}
                Err(StoreError::VersionConflict { .. }) => {
                    // Fail closed rather than over-commit.
                    return Err(StoreError::StateChanged);
                }
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::StateChanged)
    }

    fn apply_provider_event(
        &self,
        event: &ProviderEvent,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        let mutation = map_event(event);

        // Same-transaction ingestion serializes on the guard's lock stripe;
        // different transactions proceed in parallel.
        let txn_key = keys::provider_txn_key(&event.transaction_id);
        let _guard = self.ingest_lock(&txn_key)?;

        if self.transaction_applied(&event.transaction_id)? {
            tracing::debug!(
                transaction_id = %event.transaction_id,
                event_id = %event.event_id,
                "provider transaction already applied, skipping"
            );
            if self.get_provider_event(&event.event_id)?.is_none() {
                self.put_provider_event_record(&ProviderEventRecord {
                    event_id: event.event_id.clone(),
                    transaction_id: event.transaction_id.clone(),
                    kind: event.kind,
                    payload: payload.clone(),
                    signature_ok: true,
                    status: ProviderEventStatus::SkippedDuplicate,
                    account_id: None,
                    received_at: now,
                })?;
            }
            return Ok(IngestOutcome {
                status: IngestStatus::SkippedDuplicate,
                account_id: None,
            });
        }

        // Resolve the account by subscription ref first, then customer ref.
        let account = match &event.subscription_id {
            Some(sub_id) => self.find_account_by_subscription(sub_id)?,
            None => None,
        };
        let account = match (account, &event.customer_id) {
            (Some(a), _) => Some(a),
            (None, Some(customer_id)) => self.find_account_by_customer(customer_id)?,
            (None, None) => None,
        };

        let Some(account) = account else {
            tracing::warn!(
                event_id = %event.event_id,
                transaction_id = %event.transaction_id,
                subscription_id = ?event.subscription_id,
                customer_id = ?event.customer_id,
                "provider event matches no account, recording for manual review"
            );
            self.put_provider_event_record(&ProviderEventRecord {
                event_id: event.event_id.clone(),
                transaction_id: event.transaction_id.clone(),
                kind: event.kind,
                payload: payload.clone(),
                signature_ok: true,
                status: ProviderEventStatus::Failed,
                account_id: None,
                received_at: now,
            })?;
            return Ok(IngestOutcome {
                status: IngestStatus::Unmatched,
                account_id: None,
            });
        };

        let record = ProviderEventRecord {
            event_id: event.event_id.clone(),
            transaction_id: event.transaction_id.clone(),
            kind: event.kind,
            payload: payload.clone(),
            signature_ok: true,
            status: ProviderEventStatus::Applied,
            account_id: Some(account.id),
            received_at: now,
        };
        let guard_extras = || -> Result<Vec<ExtraPut>> {
            Ok(vec![
                ExtraPut {
                    cf: cf::PROVIDER_EVENTS,
                    key: keys::provider_event_key(&record.event_id),
                    value: Self::serialize(&record)?,
                },
                ExtraPut {
                    cf: cf::PROVIDER_TXNS,
                    key: txn_key.clone(),
                    value: record.event_id.clone().into_bytes(),
                },
            ])
        };

        if !mutation.mutates_ledger() {
            // Recorded and guarded, but the ledger row is untouched.
            let cf_events = self.cf(cf::PROVIDER_EVENTS)?;
            let cf_txns = self.cf(cf::PROVIDER_TXNS)?;
            let mut batch = WriteBatch::default();
            batch.put_cf(
                &cf_events,
                keys::provider_event_key(&record.event_id),
                Self::serialize(&record)?,
            );
            batch.put_cf(&cf_txns, &txn_key, record.event_id.as_bytes());
            self.db
                .write(batch)
                .map_err(|e| StoreError::Database(e.to_string()))?;
            return Ok(IngestOutcome {
                status: IngestStatus::Applied,
                account_id: Some(account.id),
            });
        }

        // Ingest stripe (held above) then account stripe: a consistent
        // ordering, on separate stripe sets, so the two can never deadlock.
        let _account_guard = self.account_lock(&keys::account_key(&account.id))?;
        for attempt in 0..INGEST_ATTEMPTS {
            let mut fresh = self.load_account(&account.id)?;
            let expected = fresh.version;
            mutation.apply(&mut fresh, now);
            fresh.check_invariants().map_err(Self::invariant_error)?;

            match self.write_account_locked(&mut fresh, expected, guard_extras()?) {
                Ok(()) => {
                    tracing::info!(
                        account_id = %fresh.id,
                        event_id = %event.event_id,
                        transaction_id = %event.transaction_id,
                        kind = ?event.kind,
                        "provider event applied"
                    );
                    return Ok(IngestOutcome {
                        status: IngestStatus::Applied,
                        account_id: Some(fresh.id),
                    });
                }
                Err(StoreError::VersionConflict { .. }) if attempt + 1 < INGEST_ATTEMPTS => {}
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::VersionConflict {
            account_id: account.id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use entitle_core::{
        AccountStatus, BillingInterval, OrgId, PlanType, ProviderEventKind,
    };
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn monthly_plan() -> Plan {
        Plan::new("Monthly", PlanType::Subscription, BillingInterval::Monthly)
            .with_free_requests(3)
            .with_period_requests(100)
    }

    fn seeded_account(store: &RocksStore, plan: &Plan) -> Account {
        store.put_plan(plan).unwrap();
        let mut account = Account::new(AccountId::generate(), OrgId::generate());
        account.assign_plan(plan, Utc::now());
        store.put_account(&account).unwrap();
        account
    }

    #[test]
    fn account_crud_and_indexes() {
        let (store, _dir) = create_test_store();
        let mut account = Account::new(AccountId::generate(), OrgId::generate());
        account.provider_subscription_id = Some("sub_1".into());
        account.provider_customer_id = Some("ctm_1".into());
        store.put_account(&account).unwrap();

        let by_sub = store.find_account_by_subscription("sub_1").unwrap().unwrap();
        assert_eq!(by_sub.id, account.id);
        let by_customer = store.find_account_by_customer("ctm_1").unwrap().unwrap();
        assert_eq!(by_customer.id, account.id);

        // Changing the reference retargets the index.
        account.provider_subscription_id = Some("sub_2".into());
        store.put_account(&account).unwrap();
        assert!(store.find_account_by_subscription("sub_1").unwrap().is_none());
        assert!(store.find_account_by_subscription("sub_2").unwrap().is_some());
    }

    #[test]
    fn single_default_plan() {
        let (store, _dir) = create_test_store();
        let first = monthly_plan().as_default();
        store.put_plan(&first).unwrap();

        let second = Plan::new("Weekly", PlanType::Subscription, BillingInterval::Weekly)
            .with_period_requests(10)
            .as_default();
        store.put_plan(&second).unwrap();

        let defaults: Vec<_> = store
            .list_plans()
            .unwrap()
            .into_iter()
            .filter(|p| p.is_default)
            .collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].id, second.id);
        assert_eq!(store.default_plan().unwrap().unwrap().id, second.id);
    }

    #[test]
    fn commit_charges_buckets_in_order() {
        let (store, _dir) = create_test_store();
        let plan = monthly_plan();
        let mut account = seeded_account(&store, &plan);
        account.purchased_granted = 1;
        store.put_account(&account).unwrap();

        let now = Utc::now();

        // 1st: purchased credit.
        let outcome = store.commit_usage(&account.id, "req-1", now).unwrap();
        assert_eq!(outcome.bucket, Bucket::Purchased);
        assert_eq!(outcome.remaining.purchased, 0);

        // 2nd..4th: free bucket.
        for i in 0..3 {
            let outcome = store
                .commit_usage(&account.id, &format!("req-free-{i}"), now)
                .unwrap();
            assert_eq!(outcome.bucket, Bucket::Free);
        }

        // 5th: period bucket (no trial on this plan).
        let outcome = store.commit_usage(&account.id, "req-5", now).unwrap();
        assert_eq!(outcome.bucket, Bucket::Period);

        let stored = store.get_account(&account.id).unwrap().unwrap();
        assert_eq!(stored.purchased_used, 1);
        assert_eq!(stored.free_used, 3);
        assert_eq!(stored.period_used, 1);

        let log = store.list_usage_by_account(&account.id, 10, 0).unwrap();
        assert_eq!(log.len(), 5);
        // Newest first.
        assert_eq!(log[0].correlation_id, "req-5");
        assert_eq!(log[4].correlation_id, "req-1");
    }

    #[test]
    fn commit_concrete_free_bucket_scenario() {
        // purchased 2/2, free granted 3 used 1 -> free, then free_used == 2.
        let (store, _dir) = create_test_store();
        let plan = monthly_plan();
        let mut account = seeded_account(&store, &plan);
        account.purchased_granted = 2;
        account.purchased_used = 2;
        account.free_used = 1;
        store.put_account(&account).unwrap();

        let outcome = store.commit_usage(&account.id, "req-x", Utc::now()).unwrap();
        assert_eq!(outcome.bucket, Bucket::Free);
        assert_eq!(outcome.remaining.free, 1);

        let stored = store.get_account(&account.id).unwrap().unwrap();
        assert_eq!(stored.free_used, 2);
    }

    #[test]
    fn commit_on_exhausted_account_is_state_changed() {
        let (store, _dir) = create_test_store();
        let plan = Plan::new("Tiny", PlanType::Subscription, BillingInterval::Monthly)
            .with_period_requests(1);
        let account = seeded_account(&store, &plan);
        let now = Utc::now();

        store.commit_usage(&account.id, "req-1", now).unwrap();
        let err = store.commit_usage(&account.id, "req-2", now).unwrap_err();
        assert!(matches!(err, StoreError::StateChanged));
    }

    #[test]
    fn no_double_spend_under_concurrency() {
        // N remaining units, N+K racing commits: exactly N winners.
        let (store, _dir) = create_test_store();
        let plan = Plan::new("Race", PlanType::Subscription, BillingInterval::Monthly)
            .with_period_requests(0);
        let mut account = seeded_account(&store, &plan);
        account.purchased_granted = 5;
        store.put_account(&account).unwrap();

        let account_id = account.id;
        let now = Utc::now();
        let mut successes = 0;
        let mut losses = 0;

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..12)
                .map(|i| {
                    let store = &store;
                    scope.spawn(move || {
                        store.commit_usage(&account_id, &format!("race-{i}"), now)
                    })
                })
                .collect();
            for handle in handles {
                match handle.join().unwrap() {
                    Ok(_) => successes += 1,
                    Err(StoreError::StateChanged) => losses += 1,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
        });

        assert_eq!(successes, 5);
        assert_eq!(losses, 7);

        let stored = store.get_account(&account_id).unwrap().unwrap();
        assert_eq!(stored.purchased_used, 5);
        assert_eq!(store.list_usage_by_account(&account_id, 20, 0).unwrap().len(), 5);
    }

    #[test]
    fn unlimited_commit_is_audited_but_uncounted() {
        let (store, _dir) = create_test_store();
        let mut account = Account::new(AccountId::generate(), OrgId::generate());
        account.unlimited = true;
        store.put_account(&account).unwrap();

        let outcome = store.commit_usage(&account.id, "admin-req", Utc::now()).unwrap();
        assert_eq!(outcome.bucket, Bucket::Unlimited);

        let stored = store.get_account(&account.id).unwrap().unwrap();
        assert_eq!(stored.purchased_used, 0);
        assert_eq!(stored.period_used, 0);
        let log = store.list_usage_by_account(&account.id, 10, 0).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].bucket, Bucket::Unlimited);
    }

    #[test]
    fn refresh_period_resets_exactly_once() {
        let (store, _dir) = create_test_store();
        let plan = monthly_plan();
        let mut account = seeded_account(&store, &plan);
        let now = Utc::now();
        let start = now - Duration::days(30);
        account.period_started_at = Some(start);
        account.period_used = 42;
        store.put_account(&account).unwrap();

        let (refreshed, _, rolled) = store.refresh_period(&account.id, now).unwrap();
        assert!(rolled);
        assert_eq!(refreshed.period_used, 0);
        assert_eq!(refreshed.period_started_at, Some(start + Duration::days(30)));
        // Free bucket untouched by rollover.
        assert_eq!(refreshed.free_used, 0);

        let (_, _, rolled_again) = store.refresh_period(&account.id, now).unwrap();
        assert!(!rolled_again);
    }

    fn purchase_event(txn: &str, event: &str, customer: &str, credits: u64) -> ProviderEvent {
        ProviderEvent {
            event_id: event.into(),
            transaction_id: txn.into(),
            kind: ProviderEventKind::TransactionCompleted,
            subscription_id: None,
            customer_id: Some(customer.into()),
            status: None,
            credits: Some(credits),
            amount_cents: Some(499),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn provider_event_applies_once() {
        let (store, _dir) = create_test_store();
        let mut account = Account::new(AccountId::generate(), OrgId::generate());
        account.provider_customer_id = Some("ctm_9".into());
        store.put_account(&account).unwrap();

        let event = purchase_event("txn_1", "evt_1", "ctm_9", 20);
        let payload = serde_json::json!({"test": true});
        let now = Utc::now();

        let outcome = store.apply_provider_event(&event, &payload, now).unwrap();
        assert_eq!(outcome.status, IngestStatus::Applied);
        assert_eq!(outcome.account_id, Some(account.id));

        let stored = store.get_account(&account.id).unwrap().unwrap();
        assert_eq!(stored.purchased_granted, 20);

        // Exact replay: skipped, counters mutated exactly once.
        let outcome = store.apply_provider_event(&event, &payload, now).unwrap();
        assert_eq!(outcome.status, IngestStatus::SkippedDuplicate);
        let stored = store.get_account(&account.id).unwrap().unwrap();
        assert_eq!(stored.purchased_granted, 20);

        let record = store.get_provider_event("evt_1").unwrap().unwrap();
        assert_eq!(record.status, ProviderEventStatus::Applied);
        assert!(store.transaction_applied("txn_1").unwrap());
    }

    #[test]
    fn second_event_kind_for_same_transaction_is_skipped() {
        let (store, _dir) = create_test_store();
        let mut account = Account::new(AccountId::generate(), OrgId::generate());
        account.provider_customer_id = Some("ctm_2".into());
        store.put_account(&account).unwrap();

        let paid = purchase_event("txn_7", "evt_paid", "ctm_2", 20);
        let completed = purchase_event("txn_7", "evt_completed", "ctm_2", 20);
        let payload = serde_json::json!({});
        let now = Utc::now();

        store.apply_provider_event(&paid, &payload, now).unwrap();
        let outcome = store.apply_provider_event(&completed, &payload, now).unwrap();
        assert_eq!(outcome.status, IngestStatus::SkippedDuplicate);

        let stored = store.get_account(&account.id).unwrap().unwrap();
        assert_eq!(stored.purchased_granted, 20);

        // Both deliveries leave a record; only one is applied.
        let first = store.get_provider_event("evt_paid").unwrap().unwrap();
        let second = store.get_provider_event("evt_completed").unwrap().unwrap();
        assert_eq!(first.status, ProviderEventStatus::Applied);
        assert_eq!(second.status, ProviderEventStatus::SkippedDuplicate);
    }

    #[test]
    fn purchase_never_clobbers_subscription_state() {
        let (store, _dir) = create_test_store();
        let plan = monthly_plan();
        let mut account = seeded_account(&store, &plan);
        account.provider_customer_id = Some("ctm_3".into());
        account.provider_subscription_id = Some("sub_live".into());
        account.status = AccountStatus::Active;
        store.put_account(&account).unwrap();

        let event = purchase_event("txn_p", "evt_p", "ctm_3", 20);
        store
            .apply_provider_event(&event, &serde_json::json!({}), Utc::now())
            .unwrap();

        let stored = store.get_account(&account.id).unwrap().unwrap();
        assert_eq!(stored.purchased_granted, 20);
        assert_eq!(stored.provider_subscription_id.as_deref(), Some("sub_live"));
        assert_eq!(stored.status, AccountStatus::Active);
        assert_eq!(stored.plan_id, Some(plan.id));
    }

    #[test]
    fn unmatched_event_is_recorded_not_applied() {
        let (store, _dir) = create_test_store();
        let event = purchase_event("txn_u", "evt_u", "ctm_missing", 20);

        let outcome = store
            .apply_provider_event(&event, &serde_json::json!({}), Utc::now())
            .unwrap();
        assert_eq!(outcome.status, IngestStatus::Unmatched);
        assert!(outcome.account_id.is_none());

        let record = store.get_provider_event("evt_u").unwrap().unwrap();
        assert_eq!(record.status, ProviderEventStatus::Failed);
        assert!(record.account_id.is_none());
        // No guard: a retry after the account exists can still apply.
        assert!(!store.transaction_applied("txn_u").unwrap());
    }

    #[test]
    fn subscription_status_event_updates_account() {
        let (store, _dir) = create_test_store();
        let mut account = Account::new(AccountId::generate(), OrgId::generate());
        account.provider_subscription_id = Some("sub_5".into());
        account.status = AccountStatus::Active;
        store.put_account(&account).unwrap();

        let event = ProviderEvent {
            event_id: "evt_c".into(),
            transaction_id: "txn_c".into(),
            kind: ProviderEventKind::SubscriptionCanceled,
            subscription_id: Some("sub_5".into()),
            customer_id: None,
            status: Some("canceled".into()),
            credits: None,
            amount_cents: None,
            occurred_at: Utc::now(),
        };
        store
            .apply_provider_event(&event, &serde_json::json!({}), Utc::now())
            .unwrap();

        let stored = store.get_account(&account.id).unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::Canceled);
    }

    #[test]
    fn failed_transaction_is_guarded_but_mutates_nothing() {
        let (store, _dir) = create_test_store();
        let mut account = Account::new(AccountId::generate(), OrgId::generate());
        account.provider_customer_id = Some("ctm_f".into());
        store.put_account(&account).unwrap();
        let before = store.get_account(&account.id).unwrap().unwrap();

        let event = ProviderEvent {
            event_id: "evt_f".into(),
            transaction_id: "txn_f".into(),
            kind: ProviderEventKind::TransactionFailed,
            subscription_id: None,
            customer_id: Some("ctm_f".into()),
            status: None,
            credits: None,
            amount_cents: None,
            occurred_at: Utc::now(),
        };
        let outcome = store
            .apply_provider_event(&event, &serde_json::json!({}), Utc::now())
            .unwrap();
        assert_eq!(outcome.status, IngestStatus::Applied);

        let after = store.get_account(&account.id).unwrap().unwrap();
        assert_eq!(after.version, before.version);
        assert_eq!(after.purchased_granted, 0);
        assert!(store.transaction_applied("txn_f").unwrap());
    }

    #[test]
    fn subscribe_account_copies_grants() {
        let (store, _dir) = create_test_store();
        let plan = monthly_plan();
        store.put_plan(&plan).unwrap();

        let mut account = Account::new(AccountId::generate(), OrgId::generate());
        account.free_granted = 1;
        account.free_used = 1;
        store.put_account(&account).unwrap();

        let updated = store
            .subscribe_account(&account.id, &plan, Utc::now())
            .unwrap();
        assert_eq!(updated.plan_id, Some(plan.id));
        assert_eq!(updated.free_granted, 3);
        assert_eq!(updated.free_used, 0);
        assert_eq!(updated.period_allowance, 100);
    }
}
