use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability::{UNIT_LOCK_TIMEOUTS_TOTAL, UNIT_LOCK_WAIT_SECONDS};
use crate::wal::{CommitRecord, Wal, WalHandle};

use super::{ReservationStore, StoreError, StoreTransaction};

/// A unit row: the lock writers serialize on, plus the unit's committed
/// reservations sorted by `span.start`.
struct UnitRow {
    name: Option<String>,
    row_lock: Arc<Mutex<()>>,
    ledger: RwLock<Vec<Reservation>>,
}

impl UnitRow {
    fn new(name: Option<String>, reservations: Vec<Reservation>) -> Self {
        Self {
            name,
            row_lock: Arc::new(Mutex::new(())),
            ledger: RwLock::new(reservations),
        }
    }
}

struct Inner {
    units: DashMap<UnitId, Arc<UnitRow>>,
    /// Reverse lookup: reservation id → unit id
    reservation_unit: DashMap<ReservationId, UnitId>,
    lock_wait_timeout: Duration,
    wal: Option<WalHandle>,
    /// Commits hold this shared; compaction holds it exclusively so no commit
    /// lands between the snapshot and the file swap.
    compaction_gate: RwLock<()>,
    notify: Arc<NotifyHub>,
}

impl Inner {
    fn row(&self, unit_id: UnitId) -> Result<Arc<UnitRow>, StoreError> {
        self.units
            .get(&unit_id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::UnitNotFound(unit_id))
    }

    async fn committed(&self, id: ReservationId) -> Option<Reservation> {
        let unit_id = *self.reservation_unit.get(&id)?.value();
        let row = self.row(unit_id).ok()?;
        let ledger = row.ledger.read().await;
        ledger.iter().find(|r| r.id == id).cloned()
    }

    async fn journal(&self, record: CommitRecord) -> Result<(), StoreError> {
        if let Some(wal) = &self.wal {
            wal.append(record)
                .await
                .map_err(|e| StoreError::Wal(e.to_string()))?;
        }
        Ok(())
    }
}

// ── Ledger helpers ───────────────────────────────────────────────

/// Insert keeping the ledger sorted by `span.start`.
fn insert_sorted(ledger: &mut Vec<Reservation>, reservation: Reservation) {
    let pos = ledger
        .binary_search_by_key(&reservation.span.start, |r| r.span.start)
        .unwrap_or_else(|e| e);
    ledger.insert(pos, reservation);
}

/// Live reservations overlapping `span`, in start order.
/// Uses binary search to skip reservations starting at or after `span.end`.
fn overlapping_live<'a>(ledger: &'a [Reservation], span: &'a Span) -> impl Iterator<Item = &'a Reservation> {
    let right_bound = ledger.partition_point(|r| r.span.start < span.end);
    ledger[..right_bound]
        .iter()
        .filter(move |r| r.is_live() && r.span.overlaps(span))
}

/// Apply a committed event to a unit's ledger (caller holds the ledger write lock).
fn apply_event(ledger: &mut Vec<Reservation>, event: &Event) {
    match event {
        Event::ReservationInserted { reservation } => insert_sorted(ledger, reservation.clone()),
        Event::IntervalUpdated {
            id,
            span,
            duration_hours,
            total_price,
            ..
        } => {
            if let Some(pos) = ledger.iter().position(|r| r.id == *id) {
                let mut r = ledger.remove(pos);
                r.span = *span;
                r.duration_hours = *duration_hours;
                r.total_price = *total_price;
                insert_sorted(ledger, r);
            }
        }
        Event::StatusChanged {
            id, status, at, reason, ..
        } => {
            if let Some(r) = ledger.iter_mut().find(|r| r.id == *id) {
                set_status_fields(r, *status, *at, reason.clone());
            }
        }
        Event::PaymentRecorded { id, payment_status, .. } => {
            if let Some(r) = ledger.iter_mut().find(|r| r.id == *id) {
                r.payment_status = *payment_status;
            }
        }
        Event::UnitRegistered { .. } => {}
    }
}

/// Row checks that hold for every stored reservation.
fn check_row(r: &Reservation) -> Result<(), StoreError> {
    if r.span.end <= r.span.start {
        return Err(StoreError::check_violation(format!(
            "reservation {} has empty span {}",
            r.id, r.span
        )));
    }
    if r.total_price == 0 {
        return Err(StoreError::check_violation(format!(
            "reservation {} total_price must be positive",
            r.id
        )));
    }
    if r.duration_hours == 0 {
        return Err(StoreError::check_violation(format!(
            "reservation {} duration_hours must be positive",
            r.id
        )));
    }
    Ok(())
}

/// Every row passes [`check_row`] and no two live rows overlap.
/// The ledger is sorted by start, so comparing against the furthest live end
/// seen so far finds any overlap.
fn check_ledger(unit_id: UnitId, ledger: &[Reservation]) -> Result<(), StoreError> {
    let mut furthest: Option<&Reservation> = None;
    for r in ledger {
        check_row(r)?;
        if !r.is_live() {
            continue;
        }
        if let Some(prev) = furthest {
            if r.span.overlaps(&prev.span) {
                return Err(StoreError::exclusion_violation(unit_id, r.span));
            }
            if r.span.end <= prev.span.end {
                continue;
            }
        }
        furthest = Some(r);
    }
    Ok(())
}

/// Journal a commit, apply it to the ledgers, then release its unit locks.
async fn publish(
    inner: Arc<Inner>,
    staged: Vec<Event>,
    locks: HashMap<UnitId, OwnedMutexGuard<()>>,
) -> Result<(), StoreError> {
    let _gate = inner.compaction_gate.read().await;
    inner.journal(staged.clone()).await?;

    for event in &staged {
        if let Ok(row) = inner.row(event.unit_id()) {
            let mut ledger = row.ledger.write().await;
            apply_event(&mut ledger, event);
        }
        if let Event::ReservationInserted { reservation } = event {
            inner.reservation_unit.insert(reservation.id, reservation.unit_id);
        }
        inner.notify.send(event);
    }
    debug!(events = staged.len(), units = locks.len(), "transaction committed");
    drop(locks);
    Ok(())
}

async fn register(inner: Arc<Inner>, id: UnitId, name: Option<String>) -> Result<(), StoreError> {
    let _gate = inner.compaction_gate.read().await;
    match inner.units.entry(id) {
        Entry::Occupied(_) => return Err(StoreError::UnitExists(id)),
        Entry::Vacant(slot) => {
            slot.insert(Arc::new(UnitRow::new(name.clone(), Vec::new())));
        }
    }
    let event = Event::UnitRegistered { id, name };
    if let Err(e) = inner.journal(vec![event.clone()]).await {
        inner.units.remove(&id);
        return Err(e);
    }
    inner.notify.send(&event);
    Ok(())
}

fn set_status_fields(r: &mut Reservation, status: ReservationStatus, at: Option<Ms>, reason: Option<String>) {
    r.status = status;
    if status == ReservationStatus::Cancelled {
        r.cancelled_at = at;
        r.cancellation_reason = reason;
    }
}

// ── Store ────────────────────────────────────────────────────────

/// Reservation store with per-unit row locks, optionally journaled to a WAL.
///
/// Units never contend with each other: each has its own lock, and there is no
/// store-wide lock on the write path.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    /// Volatile store; nothing survives the process.
    pub fn new(lock_wait_timeout: Duration) -> Self {
        Self::build(HashMap::new(), lock_wait_timeout, None)
    }

    /// Replay the WAL at `path` and journal every later commit to it.
    /// Spawns the group-commit writer, so must be called inside a tokio runtime.
    ///
    /// Fails with `InvalidData` if the replayed state breaks a row check or
    /// holds two overlapping live reservations on one unit.
    pub fn open(path: &Path, lock_wait_timeout: Duration) -> io::Result<Self> {
        let mut units: HashMap<UnitId, (Option<String>, Vec<Reservation>)> = HashMap::new();
        let records = Wal::replay(path)?;
        for event in records.iter().flatten() {
            match event {
                Event::UnitRegistered { id, name } => {
                    units.entry(*id).or_insert_with(|| (name.clone(), Vec::new()));
                }
                other => {
                    if let Some((_, ledger)) = units.get_mut(&other.unit_id()) {
                        apply_event(ledger, other);
                    }
                }
            }
        }
        for (unit_id, (_, ledger)) in &units {
            check_ledger(*unit_id, ledger).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("WAL {} violates reservation constraints: {e}", path.display()),
                )
            })?;
        }
        info!(
            path = %path.display(),
            commits = records.len(),
            units = units.len(),
            "replayed reservation WAL"
        );
        let wal = WalHandle::spawn(Wal::open(path)?);
        Ok(Self::build(units, lock_wait_timeout, Some(wal)))
    }

    fn build(
        units: HashMap<UnitId, (Option<String>, Vec<Reservation>)>,
        lock_wait_timeout: Duration,
        wal: Option<WalHandle>,
    ) -> Self {
        let reservation_unit = DashMap::new();
        let rows = DashMap::new();
        for (id, (name, ledger)) in units {
            for r in &ledger {
                reservation_unit.insert(r.id, id);
            }
            rows.insert(id, Arc::new(UnitRow::new(name, ledger)));
        }
        Self {
            inner: Arc::new(Inner {
                units: rows,
                reservation_unit,
                lock_wait_timeout,
                wal,
                compaction_gate: RwLock::new(()),
                notify: Arc::new(NotifyHub::new()),
            }),
        }
    }

    /// Committed events for one unit.
    pub fn subscribe(&self, unit_id: UnitId) -> broadcast::Receiver<Event> {
        self.inner.notify.subscribe(unit_id)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        match &self.inner.wal {
            Some(wal) => wal.appends_since_compact().await,
            None => 0,
        }
    }

    /// Rewrite the WAL as one record per unit holding its current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let Some(wal) = &self.inner.wal else {
            return Ok(());
        };
        let _gate = self.inner.compaction_gate.write().await;
        let rows: Vec<(UnitId, Arc<UnitRow>)> = self
            .inner
            .units
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        let mut records = Vec::with_capacity(rows.len());
        for (id, row) in rows {
            let ledger = row.ledger.read().await;
            let mut record = vec![Event::UnitRegistered {
                id,
                name: row.name.clone(),
            }];
            record.extend(ledger.iter().map(|r| Event::ReservationInserted {
                reservation: r.clone(),
            }));
            records.push(record);
        }
        let units = records.len();
        wal.compact(records)
            .await
            .map_err(|e| StoreError::Wal(e.to_string()))?;
        info!(units, "reservation WAL compacted");
        Ok(())
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, StoreError> {
        Ok(MemoryTransaction {
            inner: self.inner.clone(),
            locks: HashMap::new(),
            overlay: HashMap::new(),
            staged: Vec::new(),
        })
    }

    async fn register_unit(&self, id: UnitId, name: Option<String>) -> Result<(), StoreError> {
        // Detached like `commit`: the row and its journal record land together.
        tokio::spawn(register(self.inner.clone(), id, name))
            .await
            .map_err(|e| StoreError::Wal(format!("register task failed: {e}")))?
    }

    async fn unit_ids(&self) -> Result<Vec<UnitId>, StoreError> {
        Ok(self.inner.units.iter().map(|e| *e.key()).collect())
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        Ok(self.inner.committed(id).await)
    }

    async fn count_overlapping(
        &self,
        unit_id: UnitId,
        span: Span,
        exclude: Option<ReservationId>,
    ) -> Result<usize, StoreError> {
        let row = self.inner.row(unit_id)?;
        let ledger = row.ledger.read().await;
        Ok(overlapping_live(&ledger, &span)
            .filter(|r| Some(r.id) != exclude)
            .count())
    }

    async fn list_reservations(&self, unit_id: UnitId, range: Span) -> Result<Vec<Reservation>, StoreError> {
        let row = self.inner.row(unit_id)?;
        let ledger = row.ledger.read().await;
        Ok(overlapping_live(&ledger, &range).cloned().collect())
    }

    async fn list_unit_reservations(&self, unit_id: UnitId) -> Result<Vec<Reservation>, StoreError> {
        let row = self.inner.row(unit_id)?;
        let ledger = row.ledger.read().await;
        Ok(ledger.clone())
    }
}

// ── Transaction ──────────────────────────────────────────────────

/// Writes are staged in `overlay`/`staged` and published on commit.
/// Dropping the transaction discards them and releases its unit locks.
pub struct MemoryTransaction {
    inner: Arc<Inner>,
    locks: HashMap<UnitId, OwnedMutexGuard<()>>,
    /// This transaction's view of every reservation it has written.
    overlay: HashMap<ReservationId, Reservation>,
    staged: Vec<Event>,
}

impl MemoryTransaction {
    fn require_lock(&self, unit_id: UnitId) -> Result<(), StoreError> {
        if self.locks.contains_key(&unit_id) {
            Ok(())
        } else {
            Err(StoreError::UnitNotLocked(unit_id))
        }
    }

    async fn current(&mut self, id: ReservationId) -> Result<Reservation, StoreError> {
        self.get_reservation(id)
            .await?
            .ok_or(StoreError::ReservationNotFound(id))
    }

    async fn check_exclusive(&mut self, r: &Reservation) -> Result<(), StoreError> {
        if r.is_live() && self.count_overlapping(r.unit_id, r.span, Some(r.id)).await? > 0 {
            return Err(StoreError::exclusion_violation(r.unit_id, r.span));
        }
        Ok(())
    }

    fn stage(&mut self, reservation: Reservation, event: Event) {
        self.overlay.insert(reservation.id, reservation);
        self.staged.push(event);
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            debug!(
                events = self.staged.len(),
                units = self.locks.len(),
                "transaction rolled back"
            );
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_unit(&mut self, unit_id: UnitId) -> Result<UnitHandle, StoreError> {
        let row = self.inner.row(unit_id)?;
        let handle = UnitHandle {
            id: unit_id,
            name: row.name.clone(),
        };
        if self.locks.contains_key(&unit_id) {
            return Ok(handle);
        }

        let wait_start = Instant::now();
        let guard = tokio::time::timeout(self.inner.lock_wait_timeout, row.row_lock.clone().lock_owned())
            .await
            .map_err(|_| {
                metrics::counter!(UNIT_LOCK_TIMEOUTS_TOTAL).increment(1);
                StoreError::LockTimeout(unit_id)
            })?;
        metrics::histogram!(UNIT_LOCK_WAIT_SECONDS).record(wait_start.elapsed().as_secs_f64());
        self.locks.insert(unit_id, guard);
        Ok(handle)
    }

    async fn get_reservation(&mut self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        if let Some(r) = self.overlay.get(&id) {
            return Ok(Some(r.clone()));
        }
        Ok(self.inner.committed(id).await)
    }

    async fn count_overlapping(
        &mut self,
        unit_id: UnitId,
        span: Span,
        exclude: Option<ReservationId>,
    ) -> Result<usize, StoreError> {
        let row = self.inner.row(unit_id)?;
        let ledger = row.ledger.read().await;
        let committed = overlapping_live(&ledger, &span)
            .filter(|r| Some(r.id) != exclude && !self.overlay.contains_key(&r.id))
            .count();
        let staged = self
            .overlay
            .values()
            .filter(|r| r.unit_id == unit_id && Some(r.id) != exclude)
            .filter(|r| r.is_live() && r.span.overlaps(&span))
            .count();
        Ok(committed + staged)
    }

    async fn insert(&mut self, new: NewReservation) -> Result<Reservation, StoreError> {
        self.inner.row(new.unit_id)?;
        self.require_lock(new.unit_id)?;
        let reservation = new.into_reservation(Ulid::new());
        check_row(&reservation)?;
        self.check_exclusive(&reservation).await?;
        let event = Event::ReservationInserted {
            reservation: reservation.clone(),
        };
        self.stage(reservation.clone(), event);
        Ok(reservation)
    }

    async fn update_interval(
        &mut self,
        id: ReservationId,
        span: Span,
        duration_hours: u32,
        total_price: u64,
    ) -> Result<Reservation, StoreError> {
        let mut r = self.current(id).await?;
        self.require_lock(r.unit_id)?;
        r.span = span;
        r.duration_hours = duration_hours;
        r.total_price = total_price;
        check_row(&r)?;
        self.check_exclusive(&r).await?;
        let event = Event::IntervalUpdated {
            id,
            unit_id: r.unit_id,
            span,
            duration_hours,
            total_price,
        };
        self.stage(r.clone(), event);
        Ok(r)
    }

    async fn set_status(
        &mut self,
        id: ReservationId,
        status: ReservationStatus,
        at: Option<Ms>,
        reason: Option<String>,
    ) -> Result<Reservation, StoreError> {
        let mut r = self.current(id).await?;
        self.require_lock(r.unit_id)?;
        set_status_fields(&mut r, status, at, reason.clone());
        let event = Event::StatusChanged {
            id,
            unit_id: r.unit_id,
            status,
            at,
            reason,
        };
        self.stage(r.clone(), event);
        Ok(r)
    }

    async fn set_payment_status(
        &mut self,
        id: ReservationId,
        payment_status: PaymentStatus,
    ) -> Result<Reservation, StoreError> {
        let mut r = self.current(id).await?;
        self.require_lock(r.unit_id)?;
        r.payment_status = payment_status;
        let event = Event::PaymentRecorded {
            id,
            unit_id: r.unit_id,
            payment_status,
        };
        self.stage(r.clone(), event);
        Ok(r)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let staged = std::mem::take(&mut self.staged);
        let locks = std::mem::take(&mut self.locks);
        self.overlay.clear();
        // A journaled commit must reach the ledgers before its locks go, so
        // publishing runs on its own task and outlives a dropped caller.
        tokio::spawn(publish(self.inner.clone(), staged, locks))
            .await
            .map_err(|e| StoreError::Wal(format!("commit task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CHECK_VIOLATION, EXCLUSION_VIOLATION};

    const H: Ms = HOUR_MS;

    fn new_res(unit_id: UnitId, start: Ms, end: Ms) -> NewReservation {
        NewReservation {
            unit_id,
            requester_id: 1,
            span: Span::new(start, end),
            duration_hours: ((end - start) / H) as u32,
            total_price: 100,
            booking_type: BookingType::Hourly,
            created_at: 0,
        }
    }

    async fn store_with_unit() -> (InMemoryStore, UnitId) {
        let store = InMemoryStore::new(Duration::from_secs(5));
        let unit = Ulid::new();
        store.register_unit(unit, Some("Loft".into())).await.unwrap();
        (store, unit)
    }

    fn test_wal_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("rentlock_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn register_twice_rejected() {
        let (store, unit) = store_with_unit().await;
        assert_eq!(
            store.register_unit(unit, None).await,
            Err(StoreError::UnitExists(unit))
        );
    }

    #[tokio::test]
    async fn lock_unknown_unit_is_not_found() {
        let store = InMemoryStore::new(Duration::from_secs(5));
        let mut tx = store.begin().await.unwrap();
        let missing = Ulid::new();
        assert_eq!(
            tx.lock_unit(missing).await,
            Err(StoreError::UnitNotFound(missing))
        );
    }

    #[tokio::test]
    async fn writes_need_the_unit_lock() {
        let (store, unit) = store_with_unit().await;
        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.insert(new_res(unit, 0, H)).await,
            Err(StoreError::UnitNotLocked(unit))
        );
    }

    #[tokio::test]
    async fn staged_writes_invisible_until_commit() {
        let (store, unit) = store_with_unit().await;
        let mut tx = store.begin().await.unwrap();
        tx.lock_unit(unit).await.unwrap();
        let r = tx.insert(new_res(unit, 0, 2 * H)).await.unwrap();

        assert_eq!(tx.count_overlapping(unit, Span::new(H, 3 * H), None).await.unwrap(), 1);
        assert_eq!(store.count_overlapping(unit, Span::new(H, 3 * H), None).await.unwrap(), 0);
        assert!(store.get_reservation(r.id).await.unwrap().is_none());

        tx.commit().await.unwrap();
        assert_eq!(store.count_overlapping(unit, Span::new(H, 3 * H), None).await.unwrap(), 1);
        assert_eq!(store.get_reservation(r.id).await.unwrap(), Some(r));
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back_and_unlocks() {
        let (store, unit) = store_with_unit().await;
        {
            let mut tx = store.begin().await.unwrap();
            tx.lock_unit(unit).await.unwrap();
            tx.insert(new_res(unit, 0, H)).await.unwrap();
        }
        assert!(store.list_unit_reservations(unit).await.unwrap().is_empty());

        let mut tx = store.begin().await.unwrap();
        tokio::time::timeout(Duration::from_millis(100), tx.lock_unit(unit))
            .await
            .expect("lock released by rollback")
            .unwrap();
    }

    #[tokio::test]
    async fn second_locker_waits_for_commit() {
        let (store, unit) = store_with_unit().await;
        let mut first = store.begin().await.unwrap();
        first.lock_unit(unit).await.unwrap();

        let store2 = store.clone();
        let waiter = tokio::spawn(async move {
            let mut tx = store2.begin().await.unwrap();
            tx.lock_unit(unit).await.unwrap();
            tx.count_overlapping(unit, Span::new(0, H), None).await.unwrap()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        first.insert(new_res(unit, 0, H)).await.unwrap();
        first.commit().await.unwrap();
        // The waiter sees the committed row once it gets the lock.
        assert_eq!(waiter.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rollback_wakes_the_next_locker() {
        let (store, unit) = store_with_unit().await;
        let mut first = store.begin().await.unwrap();
        first.lock_unit(unit).await.unwrap();
        first.insert(new_res(unit, 0, H)).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let mut lock = tokio_test::task::spawn(second.lock_unit(unit));
        tokio_test::assert_pending!(lock.poll());

        drop(first);
        assert!(lock.is_woken());
        tokio_test::assert_ready_ok!(lock.poll());
        drop(lock);
        assert_eq!(second.count_overlapping(unit, Span::new(0, H), None).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_wait_times_out() {
        let store = InMemoryStore::new(Duration::from_millis(50));
        let unit = Ulid::new();
        store.register_unit(unit, None).await.unwrap();

        let mut holder = store.begin().await.unwrap();
        holder.lock_unit(unit).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.lock_unit(unit).await.unwrap_err();
        assert_eq!(err, StoreError::LockTimeout(unit));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn relock_in_same_transaction_is_noop() {
        let (store, unit) = store_with_unit().await;
        let mut tx = store.begin().await.unwrap();
        let first = tx.lock_unit(unit).await.unwrap();
        let again = tokio::time::timeout(Duration::from_millis(100), tx.lock_unit(unit))
            .await
            .expect("re-entrant lock")
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(again.name.as_deref(), Some("Loft"));
    }

    #[tokio::test]
    async fn list_is_ordered_and_filters_dead() {
        let (store, unit) = store_with_unit().await;
        let mut tx = store.begin().await.unwrap();
        tx.lock_unit(unit).await.unwrap();
        let late = tx.insert(new_res(unit, 10 * H, 11 * H)).await.unwrap();
        let early = tx.insert(new_res(unit, 2 * H, 3 * H)).await.unwrap();
        let gone = tx.insert(new_res(unit, 5 * H, 6 * H)).await.unwrap();
        tx.set_status(gone.id, ReservationStatus::Cancelled, Some(1), Some("no".into()))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let listed = store.list_reservations(unit, Span::new(0, 24 * H)).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);

        let all = store.list_unit_reservations(unit).await.unwrap();
        assert_eq!(all.len(), 3);
        let cancelled = all.iter().find(|r| r.id == gone.id).unwrap();
        assert_eq!(cancelled.cancelled_at, Some(1));
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("no"));
    }

    #[tokio::test]
    async fn update_resorts_ledger() {
        let (store, unit) = store_with_unit().await;
        let mut tx = store.begin().await.unwrap();
        tx.lock_unit(unit).await.unwrap();
        let a = tx.insert(new_res(unit, 0, H)).await.unwrap();
        let b = tx.insert(new_res(unit, 2 * H, 3 * H)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.lock_unit(unit).await.unwrap();
        tx.update_interval(a.id, Span::new(5 * H, 7 * H), 2, 300).await.unwrap();
        tx.commit().await.unwrap();

        let listed = store.list_reservations(unit, Span::new(0, 24 * H)).await.unwrap();
        assert_eq!(listed[0].id, b.id);
        assert_eq!(listed[1].id, a.id);
        assert_eq!(listed[1].total_price, 300);
    }

    #[tokio::test]
    async fn commit_notifies_subscribers() {
        let (store, unit) = store_with_unit().await;
        let mut rx = store.subscribe(unit);
        let mut tx = store.begin().await.unwrap();
        tx.lock_unit(unit).await.unwrap();
        let r = tx.insert(new_res(unit, 0, H)).await.unwrap();
        tx.commit().await.unwrap();

        match rx.recv().await.unwrap() {
            Event::ReservationInserted { reservation } => assert_eq!(reservation.id, r.id),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn wal_replay_restores_state() {
        let path = test_wal_path("replay.wal");
        let unit = Ulid::new();
        let (kept, cancelled) = {
            let store = InMemoryStore::open(&path, Duration::from_secs(5)).unwrap();
            store.register_unit(unit, Some("Cabin".into())).await.unwrap();
            let mut tx = store.begin().await.unwrap();
            tx.lock_unit(unit).await.unwrap();
            let kept = tx.insert(new_res(unit, 0, H)).await.unwrap();
            let cancelled = tx.insert(new_res(unit, 2 * H, 3 * H)).await.unwrap();
            tx.commit().await.unwrap();

            let mut tx = store.begin().await.unwrap();
            tx.lock_unit(unit).await.unwrap();
            tx.set_status(cancelled.id, ReservationStatus::Cancelled, Some(9), None)
                .await
                .unwrap();
            tx.set_payment_status(kept.id, PaymentStatus::Paid).await.unwrap();
            tx.commit().await.unwrap();

            // Rolled back: must not be journaled.
            let mut tx = store.begin().await.unwrap();
            tx.lock_unit(unit).await.unwrap();
            tx.insert(new_res(unit, 5 * H, 6 * H)).await.unwrap();
            drop(tx);
            (kept, cancelled)
        };

        let store = InMemoryStore::open(&path, Duration::from_secs(5)).unwrap();
        assert_eq!(store.unit_ids().await.unwrap(), vec![unit]);
        let all = store.list_unit_reservations(unit).await.unwrap();
        assert_eq!(all.len(), 2);
        let restored = store.get_reservation(kept.id).await.unwrap().unwrap();
        assert_eq!(restored.payment_status, PaymentStatus::Paid);
        let restored = store.get_reservation(cancelled.id).await.unwrap().unwrap();
        assert_eq!(restored.status, ReservationStatus::Cancelled);
        assert_eq!(restored.cancelled_at, Some(9));
    }

    fn sqlstate(err: StoreError) -> String {
        match err {
            StoreError::Database { code, .. } => code,
            other => panic!("expected a database error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn overlapping_live_rows_are_rejected() {
        let (store, unit) = store_with_unit().await;
        let mut tx = store.begin().await.unwrap();
        tx.lock_unit(unit).await.unwrap();
        let first = tx.insert(new_res(unit, 0, 2 * H)).await.unwrap();
        // Staged rows count too.
        let err = tx.insert(new_res(unit, H, 3 * H)).await.unwrap_err();
        assert_eq!(sqlstate(err), EXCLUSION_VIOLATION);
        tx.insert(new_res(unit, 2 * H, 3 * H)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.lock_unit(unit).await.unwrap();
        let err = tx.insert(new_res(unit, H, 2 * H)).await.unwrap_err();
        assert_eq!(sqlstate(err), EXCLUSION_VIOLATION);

        // A cancelled row stops blocking.
        tx.set_status(first.id, ReservationStatus::Cancelled, Some(1), None)
            .await
            .unwrap();
        tx.insert(new_res(unit, H, 2 * H)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.list_reservations(unit, Span::new(0, 3 * H)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_into_a_live_row_is_rejected() {
        let (store, unit) = store_with_unit().await;
        let mut tx = store.begin().await.unwrap();
        tx.lock_unit(unit).await.unwrap();
        let a = tx.insert(new_res(unit, 0, H)).await.unwrap();
        tx.insert(new_res(unit, 2 * H, 3 * H)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.lock_unit(unit).await.unwrap();
        let err = tx.update_interval(a.id, Span::new(H, 3 * H), 2, 200).await.unwrap_err();
        assert_eq!(sqlstate(err), EXCLUSION_VIOLATION);
        // Overlapping its own old interval is fine.
        tx.update_interval(a.id, Span::new(0, 2 * H), 2, 200).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn rows_need_a_span_price_and_duration() {
        let (store, unit) = store_with_unit().await;
        let mut tx = store.begin().await.unwrap();
        tx.lock_unit(unit).await.unwrap();

        let free = NewReservation {
            total_price: 0,
            ..new_res(unit, 0, H)
        };
        assert_eq!(sqlstate(tx.insert(free).await.unwrap_err()), CHECK_VIOLATION);
        let instant = NewReservation {
            duration_hours: 0,
            ..new_res(unit, 0, H)
        };
        assert_eq!(sqlstate(tx.insert(instant).await.unwrap_err()), CHECK_VIOLATION);
        let inverted = NewReservation {
            span: Span { start: 2 * H, end: H },
            ..new_res(unit, 0, H)
        };
        assert_eq!(sqlstate(tx.insert(inverted).await.unwrap_err()), CHECK_VIOLATION);

        let r = tx.insert(new_res(unit, 0, H)).await.unwrap();
        let err = tx.update_interval(r.id, Span::new(0, H), 1, 0).await.unwrap_err();
        assert_eq!(sqlstate(err), CHECK_VIOLATION);
        let err = tx.update_interval(r.id, Span { start: H, end: H }, 1, 100).await.unwrap_err();
        assert_eq!(sqlstate(err), CHECK_VIOLATION);
    }

    fn journal(path: &Path, records: &[CommitRecord]) {
        let mut wal = Wal::open(path).unwrap();
        wal.append_batch(records.iter().map(|r| r.as_slice())).unwrap();
    }

    #[tokio::test]
    async fn replay_rejects_overlapping_live_rows() {
        let path = test_wal_path("replay_overlap.wal");
        let unit = Ulid::new();
        let a = new_res(unit, 0, 2 * H).into_reservation(Ulid::new());
        let b = new_res(unit, H, 3 * H).into_reservation(Ulid::new());
        journal(
            &path,
            &[
                vec![Event::UnitRegistered { id: unit, name: None }],
                vec![Event::ReservationInserted { reservation: a }],
                vec![Event::ReservationInserted { reservation: b }],
            ],
        );

        let err = InMemoryStore::open(&path, Duration::from_secs(5)).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains(EXCLUSION_VIOLATION));
    }

    #[tokio::test]
    async fn replay_accepts_overlap_with_a_cancelled_row() {
        let path = test_wal_path("replay_cancelled_overlap.wal");
        let unit = Ulid::new();
        let a = new_res(unit, 0, 2 * H).into_reservation(Ulid::new());
        let b = new_res(unit, H, 3 * H).into_reservation(Ulid::new());
        journal(
            &path,
            &[
                vec![Event::UnitRegistered { id: unit, name: None }],
                vec![Event::ReservationInserted { reservation: a.clone() }],
                vec![Event::StatusChanged {
                    id: a.id,
                    unit_id: unit,
                    status: ReservationStatus::Cancelled,
                    at: Some(1),
                    reason: None,
                }],
                vec![Event::ReservationInserted { reservation: b.clone() }],
            ],
        );

        let store = InMemoryStore::open(&path, Duration::from_secs(5)).unwrap();
        let live = store.list_reservations(unit, Span::new(0, 3 * H)).await.unwrap();
        assert_eq!(live.iter().map(|r| r.id).collect::<Vec<_>>(), vec![b.id]);
    }

    #[tokio::test]
    async fn replay_rejects_a_zero_price_row() {
        let path = test_wal_path("replay_zero_price.wal");
        let unit = Ulid::new();
        let free = NewReservation {
            total_price: 0,
            ..new_res(unit, 0, H)
        }
        .into_reservation(Ulid::new());
        journal(
            &path,
            &[vec![
                Event::UnitRegistered { id: unit, name: None },
                Event::ReservationInserted { reservation: free },
            ]],
        );

        let err = InMemoryStore::open(&path, Duration::from_secs(5)).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains(CHECK_VIOLATION));
    }

    #[tokio::test]
    async fn dropped_commit_still_publishes() {
        let path = test_wal_path("dropped_commit.wal");
        let store = InMemoryStore::open(&path, Duration::from_secs(5)).unwrap();
        let unit = Ulid::new();
        store.register_unit(unit, None).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.lock_unit(unit).await.unwrap();
        let r = tx.insert(new_res(unit, 0, 2 * H)).await.unwrap();
        let mut commit = tokio_test::task::spawn(tx.commit());
        tokio_test::assert_pending!(commit.poll());
        drop(commit);

        // The next locker only gets in once the commit is on the ledger.
        let mut next = store.begin().await.unwrap();
        next.lock_unit(unit).await.unwrap();
        assert_eq!(next.get_reservation(r.id).await.unwrap(), Some(r.clone()));
        drop(next);

        let reopened = InMemoryStore::open(&path, Duration::from_secs(5)).unwrap();
        assert_eq!(reopened.get_reservation(r.id).await.unwrap(), Some(r));
    }

    #[tokio::test]
    async fn compaction_preserves_state() {
        let path = test_wal_path("compact.wal");
        let unit = Ulid::new();
        let moved = {
            let store = InMemoryStore::open(&path, Duration::from_secs(5)).unwrap();
            store.register_unit(unit, None).await.unwrap();
            let mut tx = store.begin().await.unwrap();
            tx.lock_unit(unit).await.unwrap();
            let r = tx.insert(new_res(unit, 0, H)).await.unwrap();
            tx.commit().await.unwrap();
            for i in 1..10 {
                let mut tx = store.begin().await.unwrap();
                tx.lock_unit(unit).await.unwrap();
                tx.update_interval(r.id, Span::new(i * H, (i + 1) * H), 1, 100)
                    .await
                    .unwrap();
                tx.commit().await.unwrap();
            }
            assert_eq!(store.wal_appends_since_compact().await, 11);
            store.compact().await.unwrap();
            assert_eq!(store.wal_appends_since_compact().await, 0);
            r.id
        };

        let store = InMemoryStore::open(&path, Duration::from_secs(5)).unwrap();
        let r = store.get_reservation(moved).await.unwrap().unwrap();
        assert_eq!(r.span, Span::new(9 * H, 10 * H));
    }
}
