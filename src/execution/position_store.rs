//! The two single-position slots (spot, derivatives).
//!
//! A slot is claimed before any order is sent and released when its monitor
//! terminates (or on a forced stop). All field mutation happens behind the slot's
//! lock; callers only ever see copies.

use rust_decimal::Decimal;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{Result, TradeError};
use crate::models::{MarketType, Position};

#[derive(Default)]
struct SlotState {
    /// Set from claim until release; the slot is busy while this is Some
    owner: Option<Uuid>,
    /// Set once the opening order filled
    position: Option<Position>,
}

pub struct PositionSlot {
    market: MarketType,
    state: Mutex<SlotState>,
    running: watch::Sender<bool>,
}

impl PositionSlot {
    pub fn new(market: MarketType) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            market,
            state: Mutex::new(SlotState::default()),
            running,
        }
    }

    pub fn market(&self) -> MarketType {
        self.market
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flip the slot from idle to busy, or fail with `SlotBusy`
    pub fn try_claim(self: &Arc<Self>) -> Result<SlotClaim> {
        let mut state = self.lock();
        if state.owner.is_some() {
            return Err(TradeError::SlotBusy(self.market));
        }

        let id = Uuid::new_v4();
        state.owner = Some(id);
        state.position = None;
        self.running.send_replace(true);

        tracing::debug!(market = %self.market, claim = %id, "Slot claimed");
        Ok(SlotClaim {
            slot: Arc::clone(self),
            id,
            committed: false,
        })
    }

    pub fn is_running(&self) -> bool {
        self.lock().owner.is_some()
    }

    pub fn is_owned_by(&self, id: Uuid) -> bool {
        self.lock().owner == Some(id)
    }

    /// Copy of the live position, if one has been recorded
    pub fn snapshot(&self) -> Option<Position> {
        self.lock().position.clone()
    }

    /// Overwrite quantity and entry price of the owner's position
    ///
    /// Returns false when `id` no longer owns the slot.
    pub fn reconcile(&self, id: Uuid, quantity: Decimal, entry_price: Decimal) -> bool {
        let mut state = self.lock();
        if state.owner != Some(id) {
            return false;
        }
        match state.position.as_mut() {
            Some(position) => {
                position.quantity = quantity;
                position.entry_price = entry_price;
                true
            }
            None => false,
        }
    }

    /// Release the slot if `id` still owns it, returning the cleared position
    pub fn release(&self, id: Uuid) -> Option<Position> {
        let mut state = self.lock();
        if state.owner != Some(id) {
            return None;
        }
        self.clear(&mut state)
    }

    /// Release the slot whoever owns it
    pub fn force_release(&self) -> Option<Position> {
        let mut state = self.lock();
        if state.owner.is_none() {
            return None;
        }
        self.clear(&mut state)
    }

    fn clear(&self, state: &mut SlotState) -> Option<Position> {
        state.owner = None;
        let position = state.position.take().map(|mut p| {
            p.running = false;
            p
        });
        self.running.send_replace(false);
        tracing::debug!(market = %self.market, "Slot released");
        position
    }

    /// Watch the running flag; wakes on every claim and release
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.running.subscribe()
    }
}

/// A claimed slot that has not yet recorded a position
///
/// Dropping the claim without [`SlotClaim::commit`] releases the slot, so every
/// failed open path frees it.
pub struct SlotClaim {
    slot: Arc<PositionSlot>,
    id: Uuid,
    committed: bool,
}

impl SlotClaim {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Record the filled position; the slot stays busy until released by its owner
    pub fn commit(mut self, mut position: Position) -> Position {
        position.id = self.id;
        position.running = true;

        let mut state = self.slot.lock();
        if state.owner == Some(self.id) {
            state.position = Some(position.clone());
        } else {
            // Force-released between claim and fill
            position.running = false;
        }
        drop(state);

        self.committed = true;
        position
    }
}

impl Drop for SlotClaim {
    fn drop(&mut self) {
        if !self.committed {
            self.slot.release(self.id);
        }
    }
}

/// One slot per market type
pub struct PositionStore {
    spot: Arc<PositionSlot>,
    futures: Arc<PositionSlot>,
}

impl Default for PositionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionStore {
    pub fn new() -> Self {
        Self {
            spot: Arc::new(PositionSlot::new(MarketType::Spot)),
            futures: Arc::new(PositionSlot::new(MarketType::Futures)),
        }
    }

    pub fn slot(&self, market: MarketType) -> &Arc<PositionSlot> {
        match market {
            MarketType::Spot => &self.spot,
            MarketType::Futures => &self.futures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn position() -> Position {
        Position {
            id: Uuid::nil(),
            market: MarketType::Futures,
            symbol: "ETHUSDT".to_string(),
            entry_price: dec!(2000),
            quantity: dec!(10.0),
            profit_target: dec!(2),
            stop_loss: None,
            side: None,
            leverage: Some(5),
            invested: dec!(20),
            running: false,
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn test_second_claim_is_busy() {
        let store = PositionStore::new();
        let slot = store.slot(MarketType::Spot);

        let _claim = slot.try_claim().unwrap();
        assert!(matches!(
            slot.try_claim(),
            Err(TradeError::SlotBusy(MarketType::Spot))
        ));
        // Slots are independent
        assert!(store.slot(MarketType::Futures).try_claim().is_ok());
    }

    #[test]
    fn test_dropped_claim_frees_slot() {
        let slot = Arc::new(PositionSlot::new(MarketType::Spot));
        {
            let _claim = slot.try_claim().unwrap();
            assert!(slot.is_running());
        }
        assert!(!slot.is_running());
        assert!(slot.try_claim().is_ok());
    }

    #[test]
    fn test_commit_then_release_resets_fields() {
        let slot = Arc::new(PositionSlot::new(MarketType::Futures));
        let claim = slot.try_claim().unwrap();
        let id = claim.id();

        let recorded = claim.commit(position());
        assert_eq!(recorded.id, id);
        assert!(recorded.running);
        assert_eq!(slot.snapshot().map(|p| p.id), Some(id));

        let released = slot.release(id).unwrap();
        assert!(!released.running);
        assert!(slot.snapshot().is_none());
        assert!(!slot.is_running());
    }

    #[test]
    fn test_reconcile_only_for_owner() {
        let slot = Arc::new(PositionSlot::new(MarketType::Futures));
        let claim = slot.try_claim().unwrap();
        let id = claim.id();
        claim.commit(position());

        assert!(!slot.reconcile(Uuid::new_v4(), dec!(10.002), dec!(2001)));
        assert!(slot.reconcile(id, dec!(10.002), dec!(2001)));

        let snapshot = slot.snapshot().unwrap();
        assert_eq!(snapshot.quantity, dec!(10.002));
        assert_eq!(snapshot.entry_price, dec!(2001));
    }

    #[test]
    fn test_stale_owner_cannot_release_new_claim() {
        let slot = Arc::new(PositionSlot::new(MarketType::Spot));
        let first = slot.try_claim().unwrap();
        let first_id = first.id();
        first.commit(position());

        slot.force_release();
        let second = slot.try_claim().unwrap();

        assert!(slot.release(first_id).is_none());
        assert!(slot.is_owned_by(second.id()));
    }

    #[tokio::test]
    async fn test_subscribers_see_release() {
        let slot = Arc::new(PositionSlot::new(MarketType::Spot));
        let claim = slot.try_claim().unwrap();
        let mut running = slot.subscribe();
        assert!(*running.borrow());

        drop(claim);
        running.changed().await.unwrap();
        assert!(!*running.borrow());
    }
}
