//! `PostgreSQL` implementation of [`TicketStore`].

use crate::error::{
    blocking_tickets, classify, from_db_number, ticket_set, to_db_numbers, unique_violation,
    ONE_CONFIRMED_PER_BUYER, SOLD_TICKET_PKEY,
};
use chrono::{DateTime, Utc};
use raffle_core::{
    Allocation, AllocationId, AllocationStatus, BuyerId, EvidenceRef, Hold, InventorySnapshot,
    NewAllocation, ParticipantInfo, Reservation, ReservationId, SoldTicket, StoreError,
    StoreFuture, TicketSet, TicketStore,
};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;
use uuid::Uuid;

/// Default bound on how long a write waits for a contested ticket row.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Claims tickets for `$3` unless another holder's unexpired hold sits on
/// them. Rows are inserted in ascending ticket order so overlapping writers
/// always lock in the same order. Returns the tickets actually claimed.
const CLAIM_TICKETS_SQL: &str = r"
    INSERT INTO raffle_reservations (ticket_number, reservation_id, holder_id, created_at, expires_at)
    SELECT t, $2, $3, $4, $5 FROM unnest($1::int4[]) AS t ORDER BY t
    ON CONFLICT (ticket_number) DO UPDATE
       SET reservation_id = EXCLUDED.reservation_id,
           holder_id = EXCLUDED.holder_id,
           created_at = EXCLUDED.created_at,
           expires_at = EXCLUDED.expires_at
     WHERE raffle_reservations.holder_id = EXCLUDED.holder_id
        OR raffle_reservations.expires_at <= $4
    RETURNING ticket_number
";

/// `PostgreSQL`-backed ticket store.
///
/// Every write runs in its own transaction with a bounded `lock_timeout`, so
/// a writer stuck behind a contested row gives up with
/// [`StoreError::Unavailable`] instead of waiting forever.
///
/// # Example
///
/// ```no_run
/// use raffle_postgres::PostgresTicketStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresTicketStore::connect("postgres://localhost/raffle").await?;
/// store.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresTicketStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresTicketStore {
    /// Create a store from an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Connect with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| classify(&e, "Failed to connect"))?;
        Ok(Self::from_pool(pool))
    }

    /// Override how long writes wait for row locks.
    #[must_use]
    pub const fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Migration failed: {e}")))
    }

    async fn begin_write(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| classify(&e, "Failed to begin transaction"))?;

        // SET does not take bind parameters; the value is an integer we own.
        let millis = self.lock_timeout.as_millis();
        sqlx::query(&format!("SET LOCAL lock_timeout = {millis}"))
            .execute(&mut *tx)
            .await
            .map_err(|e| classify(&e, "Failed to set lock timeout"))?;

        Ok(tx)
    }

    /// Take `claimant`'s hold on every ticket, or report who owns them.
    ///
    /// Shared by holds and commits: once this returns `Ok`, the transaction
    /// holds the row lock on every requested ticket.
    async fn claim_tickets(
        tx: &mut Transaction<'static, Postgres>,
        claimant: &BuyerId,
        tickets: &TicketSet,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let numbers = to_db_numbers(tickets)?;

        let claimed: Vec<(i32,)> = sqlx::query_as(CLAIM_TICKETS_SQL)
            .bind(&numbers)
            .bind(reservation_id.as_uuid())
            .bind(claimant.as_str())
            .bind(now)
            .bind(expires_at)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| classify(&e, "Failed to claim tickets"))?;

        let sold: Vec<(i32,)> = sqlx::query_as(
            "SELECT ticket_number FROM raffle_sold_tickets
             WHERE ticket_number = ANY($1)
             ORDER BY ticket_number",
        )
        .bind(&numbers)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| classify(&e, "Failed to check sold tickets"))?;

        if !sold.is_empty() {
            return Err(StoreError::Sold {
                tickets: ticket_set(sold.into_iter().map(|(n,)| n))?,
            });
        }

        if claimed.len() < numbers.len() {
            let held: Vec<(i32,)> = sqlx::query_as(
                "SELECT ticket_number FROM raffle_reservations
                 WHERE ticket_number = ANY($1) AND holder_id <> $2 AND expires_at > $3
                 ORDER BY ticket_number",
            )
            .bind(&numbers)
            .bind(claimant.as_str())
            .bind(now)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| classify(&e, "Failed to check held tickets"))?;

            let claimed: Vec<i32> = claimed.into_iter().map(|(n,)| n).collect();
            let held: Vec<i32> = held.into_iter().map(|(n,)| n).collect();
            return Err(StoreError::Held {
                tickets: blocking_tickets(&numbers, &claimed, held)?,
            });
        }

        Ok(())
    }

    async fn commit(tx: Transaction<'static, Postgres>, context: &str) -> Result<(), StoreError> {
        tx.commit().await.map_err(|e| classify(&e, context))
    }
}

fn decode_allocation(row: &PgRow) -> Result<Allocation, StoreError> {
    let decode = |e: sqlx::Error| classify(&e, "Failed to decode allocation");

    let id: Uuid = row.try_get("id").map_err(decode)?;
    let buyer: String = row.try_get("buyer_id").map_err(decode)?;
    let tickets: Vec<i32> = row.try_get("tickets").map_err(decode)?;
    let participant: Json<ParticipantInfo> = row.try_get("participant").map_err(decode)?;
    let evidence: String = row.try_get("evidence_ref").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;

    Ok(Allocation {
        id: AllocationId::from_uuid(id),
        buyer: BuyerId::new(buyer),
        tickets: ticket_set(tickets)?,
        participant: participant.0,
        evidence: EvidenceRef::parse(Some(&evidence))
            .ok_or_else(|| StoreError::Corrupt(format!("Allocation {id} has blank evidence")))?,
        status: AllocationStatus::parse(&status)?,
        created_at,
    })
}

const SELECT_ALLOCATION: &str = "SELECT id, buyer_id, tickets, participant, evidence_ref, status, created_at
     FROM raffle_allocations";

impl TicketStore for PostgresTicketStore {
    fn snapshot<'a>(
        &'a self,
        tickets: Option<&'a TicketSet>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, InventorySnapshot> {
        Box::pin(async move {
            let numbers = tickets.map(to_db_numbers).transpose()?;

            // Both reads see the same database snapshot.
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| classify(&e, "Failed to begin snapshot"))?;
            sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
                .execute(&mut *tx)
                .await
                .map_err(|e| classify(&e, "Failed to set snapshot isolation"))?;

            let sold_rows = sqlx::query(
                "SELECT ticket_number, allocation_id, buyer_id, evidence_ref
                 FROM raffle_sold_tickets
                 WHERE $1::int4[] IS NULL OR ticket_number = ANY($1)",
            )
            .bind(&numbers)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| classify(&e, "Failed to load sold tickets"))?;

            let hold_rows = sqlx::query(
                "SELECT ticket_number, reservation_id, holder_id, created_at, expires_at
                 FROM raffle_reservations
                 WHERE ($1::int4[] IS NULL OR ticket_number = ANY($1)) AND expires_at > $2",
            )
            .bind(&numbers)
            .bind(now)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| classify(&e, "Failed to load holds"))?;

            Self::commit(tx, "Failed to close snapshot").await?;

            let mut snapshot = InventorySnapshot::default();
            for row in &sold_rows {
                let decode = |e: sqlx::Error| classify(&e, "Failed to decode sold ticket");
                let number = from_db_number(row.try_get("ticket_number").map_err(decode)?)?;
                let evidence: String = row.try_get("evidence_ref").map_err(decode)?;
                snapshot.sold.insert(
                    number,
                    SoldTicket {
                        number,
                        allocation_id: AllocationId::from_uuid(
                            row.try_get("allocation_id").map_err(decode)?,
                        ),
                        buyer: BuyerId::new(row.try_get::<String, _>("buyer_id").map_err(decode)?),
                        evidence: EvidenceRef::parse(Some(&evidence)).ok_or_else(|| {
                            StoreError::Corrupt(format!("Sold ticket {number} has blank evidence"))
                        })?,
                    },
                );
            }
            for row in &hold_rows {
                let decode = |e: sqlx::Error| classify(&e, "Failed to decode hold");
                let number = from_db_number(row.try_get("ticket_number").map_err(decode)?)?;
                snapshot.holds.insert(
                    number,
                    Hold {
                        number,
                        reservation_id: ReservationId::from_uuid(
                            row.try_get("reservation_id").map_err(decode)?,
                        ),
                        holder: BuyerId::new(row.try_get::<String, _>("holder_id").map_err(decode)?),
                        created_at: row.try_get("created_at").map_err(decode)?,
                        expires_at: row.try_get("expires_at").map_err(decode)?,
                    },
                );
            }

            Ok(snapshot)
        })
    }

    fn upsert_hold<'a>(
        &'a self,
        holder: &'a BuyerId,
        tickets: &'a TicketSet,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreFuture<'a, Reservation> {
        Box::pin(async move {
            let reservation_id = ReservationId::new();
            let mut tx = self.begin_write().await?;

            // Any early return drops `tx`, which rolls the claim back.
            Self::claim_tickets(&mut tx, holder, tickets, reservation_id, now, expires_at).await?;
            Self::commit(tx, "Failed to commit hold").await?;

            tracing::debug!(%holder, %tickets, %reservation_id, %expires_at, "Hold stored");
            Ok(Reservation {
                id: reservation_id,
                holder: holder.clone(),
                tickets: tickets.clone(),
                created_at: now,
                expires_at,
            })
        })
    }

    fn release_hold<'a>(
        &'a self,
        holder: &'a BuyerId,
        tickets: &'a TicketSet,
    ) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            let numbers = to_db_numbers(tickets)?;
            let result = sqlx::query(
                "DELETE FROM raffle_reservations
                 WHERE holder_id = $1 AND ticket_number = ANY($2)",
            )
            .bind(holder.as_str())
            .bind(&numbers)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(&e, "Failed to release hold"))?;

            Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
        })
    }

    fn commit_allocation<'a>(
        &'a self,
        allocation: NewAllocation,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Allocation> {
        Box::pin(async move {
            let numbers = to_db_numbers(&allocation.tickets)?;
            let participant = serde_json::to_value(&allocation.participant)
                .map_err(|e| StoreError::Corrupt(format!("Failed to serialize participant: {e}")))?;

            let mut tx = self.begin_write().await?;

            // Lock every ticket row under this buyer first; conflicts abort
            // before anything is sold.
            Self::claim_tickets(
                &mut tx,
                &allocation.buyer,
                &allocation.tickets,
                ReservationId::new(),
                now,
                now,
            )
            .await?;

            sqlx::query(
                "INSERT INTO raffle_allocations
                    (id, buyer_id, tickets, participant, evidence_ref, status, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(allocation.id.as_uuid())
            .bind(allocation.buyer.as_str())
            .bind(&numbers)
            .bind(&participant)
            .bind(allocation.evidence.as_str())
            .bind(AllocationStatus::Confirmed.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| match unique_violation(&e).as_deref() {
                Some(ONE_CONFIRMED_PER_BUYER) => StoreError::DuplicateBuyer {
                    buyer: allocation.buyer.clone(),
                },
                _ => classify(&e, "Failed to insert allocation"),
            })?;

            sqlx::query(
                "INSERT INTO raffle_sold_tickets (ticket_number, allocation_id, buyer_id, evidence_ref, sold_at)
                 SELECT t, $2, $3, $4, $5 FROM unnest($1::int4[]) AS t ORDER BY t",
            )
            .bind(&numbers)
            .bind(allocation.id.as_uuid())
            .bind(allocation.buyer.as_str())
            .bind(allocation.evidence.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| match unique_violation(&e).as_deref() {
                Some(SOLD_TICKET_PKEY) => StoreError::Sold {
                    tickets: allocation.tickets.clone(),
                },
                _ => classify(&e, "Failed to mark tickets sold"),
            })?;

            sqlx::query(
                "DELETE FROM raffle_reservations
                 WHERE holder_id = $1 AND ticket_number = ANY($2)",
            )
            .bind(allocation.buyer.as_str())
            .bind(&numbers)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify(&e, "Failed to clear buyer holds"))?;

            Self::commit(tx, "Failed to commit allocation").await?;

            tracing::info!(
                allocation_id = %allocation.id,
                buyer = %allocation.buyer,
                tickets = %allocation.tickets,
                "Allocation committed"
            );
            Ok(allocation.confirmed_at(now))
        })
    }

    fn confirmed_allocation<'a>(
        &'a self,
        buyer: &'a BuyerId,
    ) -> StoreFuture<'a, Option<Allocation>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "{SELECT_ALLOCATION} WHERE buyer_id = $1 AND status = 'confirmed'"
            ))
            .bind(buyer.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(&e, "Failed to load allocation"))?;

            row.as_ref().map(decode_allocation).transpose()
        })
    }

    fn confirmed_allocations(&self) -> StoreFuture<'_, Vec<Allocation>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "{SELECT_ALLOCATION} WHERE status = 'confirmed' ORDER BY created_at, id"
            ))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(&e, "Failed to load allocations"))?;

            rows.iter().map(decode_allocation).collect()
        })
    }

    fn purge_expired_holds(&self, now: DateTime<Utc>) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM raffle_reservations WHERE expires_at <= $1")
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(|e| classify(&e, "Failed to purge expired holds"))?;

            Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
        })
    }
}
