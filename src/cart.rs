// ===============================
// src/cart.rs
// ===============================
//
// Cart store: lines keyed by variant id, in insertion order.
// Every mutation is written through the repository before it becomes
// visible in memory, so a failed write leaves the store unchanged.
//
use tracing::debug;

use crate::domain::{CartLine, Event, Money, NewCartLine, VariantId};
use crate::journal::Journal;
use crate::metrics::{CART_ITEMS, CART_MUTATIONS, CART_SUBTOTAL};
use crate::storage::{CartRepository, StorageError};

pub struct CartStore<R> {
    lines: Vec<CartLine>,
    repo: R,
    journal: Journal,
}

impl<R: CartRepository> CartStore<R> {
    /// Rehydrate from the repository. A corrupt file starts an empty cart
    /// rather than locking the shopper out.
    pub fn open(repo: R, journal: Journal) -> Result<Self, StorageError> {
        let lines = match repo.load() {
            Ok(lines) => sanitize(lines),
            Err(StorageError::Decode { path, source }) => {
                tracing::warn!(path = %path.display(), %source, "cart: corrupt state, starting empty");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        let store = Self {
            lines,
            repo,
            journal,
        };
        store.publish_gauges();
        Ok(store)
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn line(&self, variant_id: VariantId) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.variant_id == variant_id)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Add one unit of `line`.
    pub fn add(&mut self, line: NewCartLine) -> Result<(), StorageError> {
        self.add_item(line, 1)
    }

    /// Merge `quantity` units into the cart. An existing line keeps its
    /// snapshot (first-seen price wins); only its quantity grows.
    pub fn add_item(&mut self, line: NewCartLine, quantity: u32) -> Result<(), StorageError> {
        if quantity == 0 {
            return Ok(());
        }
        let variant_id = line.variant_id;
        let mut next = self.lines.clone();
        match next.iter_mut().find(|l| l.variant_id == variant_id) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(quantity),
            None => next.push(line.with_quantity(quantity)),
        }
        self.commit(next, "add")?;
        self.journal.record(Event::LineAdded {
            variant_id,
            quantity,
        });
        Ok(())
    }

    /// Absent ids are a no-op.
    pub fn remove_item(&mut self, variant_id: VariantId) -> Result<(), StorageError> {
        if self.line(variant_id).is_none() {
            debug!(variant_id, "cart: remove of absent line ignored");
            return Ok(());
        }
        let next = self
            .lines
            .iter()
            .filter(|l| l.variant_id != variant_id)
            .cloned()
            .collect();
        self.commit(next, "remove")?;
        self.journal.record(Event::LineRemoved { variant_id });
        Ok(())
    }

    /// Set the exact quantity; anything below 1 removes the line.
    pub fn update_quantity(
        &mut self,
        variant_id: VariantId,
        quantity: i64,
    ) -> Result<(), StorageError> {
        if quantity < 1 {
            return self.remove_item(variant_id);
        }
        let quantity = u32::try_from(quantity).unwrap_or(u32::MAX);
        let mut next = self.lines.clone();
        let Some(existing) = next.iter_mut().find(|l| l.variant_id == variant_id) else {
            debug!(variant_id, "cart: update of absent line ignored");
            return Ok(());
        };
        if existing.quantity == quantity {
            return Ok(());
        }
        existing.quantity = quantity;
        self.commit(next, "update")?;
        self.journal.record(Event::QuantityChanged {
            variant_id,
            quantity,
        });
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.commit(Vec::new(), "clear")?;
        self.journal.record(Event::CartCleared);
        Ok(())
    }

    /// Σ unit price × quantity, recomputed on every call.
    pub fn subtotal(&self) -> Money {
        self.lines
            .iter()
            .fold(0, |acc: Money, l| acc.saturating_add(l.line_total()))
    }

    pub fn item_count(&self) -> u64 {
        self.lines.iter().map(|l| u64::from(l.quantity)).sum()
    }

    fn commit(&mut self, next: Vec<CartLine>, op: &str) -> Result<(), StorageError> {
        self.repo.save(&next)?;
        self.lines = next;
        CART_MUTATIONS.with_label_values(&[op]).inc();
        self.publish_gauges();
        Ok(())
    }

    fn publish_gauges(&self) {
        CART_ITEMS.set(i64::try_from(self.item_count()).unwrap_or(i64::MAX));
        CART_SUBTOTAL.set(self.subtotal());
    }
}

/// Drop persisted lines that break the quantity invariant and keep the
/// first line per variant id.
fn sanitize(lines: Vec<CartLine>) -> Vec<CartLine> {
    let mut out: Vec<CartLine> = Vec::with_capacity(lines.len());
    for line in lines {
        if line.quantity == 0 || out.iter().any(|l| l.variant_id == line.variant_id) {
            continue;
        }
        out.push(line);
    }
    out
}
