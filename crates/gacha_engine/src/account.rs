//! # Player Accounts
//!
//! Wallet and inventory of one player, as read and written by a pull.
//!
//! The coordinator never mutates a stored account directly: it takes a copy,
//! charges and credits the copy, and hands the result to the store in a single
//! commit. A failed pull simply drops the copy.

use serde::{Deserialize, Serialize};

use crate::error::{GachaError, GachaResult};
use crate::table::{Cost, ItemId, Reward};

/// Unique identifier for a player.
pub type PlayerId = u64;

/// Slots given to a new inventory when no configuration says otherwise.
pub const DEFAULT_INVENTORY_SLOTS: usize = 64;

/// A stack of items in an inventory slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    /// The item type ID, or 0 for empty slot.
    pub item_id: ItemId,
    /// Number of items in this stack.
    pub count: u32,
}

impl ItemStack {
    /// Creates an empty item stack.
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            item_id: 0,
            count: 0,
        }
    }

    /// Returns true if this slot is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0 || self.item_id == 0
    }
}

/// A fixed-capacity inventory.
///
/// All slots are allocated at creation time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    slots: Vec<ItemStack>,
    used_slots: u32,
}

impl Inventory {
    /// Creates an empty inventory with `capacity` slots.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![ItemStack::empty(); capacity],
            used_slots: 0,
        }
    }

    /// Returns the number of used slots.
    #[inline]
    #[must_use]
    pub const fn used_slots(&self) -> u32 {
        self.used_slots
    }

    /// Returns the total capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Counts the total number of a specific item across all slots.
    #[must_use]
    pub fn count_item(&self, item_id: ItemId) -> u64 {
        self.slots
            .iter()
            .filter(|s| s.item_id == item_id)
            .map(|s| u64::from(s.count))
            .sum()
    }

    fn find_empty_slot(&self) -> Option<usize> {
        self.slots.iter().position(ItemStack::is_empty)
    }

    /// Adds items, topping up existing stacks before opening new ones.
    ///
    /// # Errors
    ///
    /// Returns `GachaError::InventoryFull` if there's no space. The inventory
    /// may be partially filled; callers work on a copy.
    pub fn add(&mut self, item_id: ItemId, count: u32, max_stack: u32) -> GachaResult<()> {
        let max_stack = max_stack.max(1);
        let mut remaining = count;

        for slot in &mut self.slots {
            if remaining == 0 {
                break;
            }
            if slot.item_id == item_id && slot.count > 0 && slot.count < max_stack {
                let can_add = (max_stack - slot.count).min(remaining);
                slot.count += can_add;
                remaining -= can_add;
            }
        }

        while remaining > 0 {
            let Some(slot_idx) = self.find_empty_slot() else {
                return Err(GachaError::InventoryFull {
                    capacity: u32::try_from(self.slots.len()).unwrap_or(u32::MAX),
                    amount: u64::from(remaining),
                });
            };
            let add_count = remaining.min(max_stack);
            self.slots[slot_idx] = ItemStack {
                item_id,
                count: add_count,
            };
            self.used_slots += 1;
            remaining -= add_count;
        }

        Ok(())
    }

    /// Removes items, draining stacks in slot order.
    ///
    /// # Errors
    ///
    /// Returns `GachaError::InsufficientFunds` (as tickets) if not enough items.
    pub fn remove(&mut self, item_id: ItemId, count: u64) -> GachaResult<()> {
        let available = self.count_item(item_id);
        if available < count {
            return Err(GachaError::InsufficientFunds {
                currency_required: 0,
                currency_available: 0,
                tickets_required: count,
                tickets_available: available,
            });
        }

        let mut remaining = count;
        for slot in &mut self.slots {
            if remaining == 0 {
                break;
            }
            if slot.item_id == item_id {
                let take = u64::from(slot.count).min(remaining);
                // take <= slot.count, so it fits in u32
                slot.count -= u32::try_from(take).unwrap_or(slot.count);
                remaining -= take;
                if slot.count == 0 {
                    *slot = ItemStack::empty();
                    self.used_slots = self.used_slots.saturating_sub(1);
                }
            }
        }

        Ok(())
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_INVENTORY_SLOTS)
    }
}

/// Wallet, inventory and inline grants of one player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Owner.
    pub player_id: PlayerId,
    /// Soft currency balance.
    pub currency: u64,
    /// Item and ticket stacks.
    pub inventory: Inventory,
    /// Inline payload rewards, in grant order, one element per unit granted.
    #[serde(default)]
    pub payloads: Vec<serde_json::Value>,
}

impl Account {
    /// Creates an empty account.
    #[must_use]
    pub fn new(player_id: PlayerId, inventory_slots: usize) -> Self {
        Self {
            player_id,
            currency: 0,
            inventory: Inventory::with_capacity(inventory_slots),
            payloads: Vec::new(),
        }
    }

    /// Takes currency from the wallet.
    ///
    /// # Errors
    ///
    /// `InsufficientFunds` if the balance would go negative.
    pub fn debit(&mut self, amount: u64) -> GachaResult<()> {
        self.currency = self
            .currency
            .checked_sub(amount)
            .ok_or(GachaError::InsufficientFunds {
                currency_required: amount,
                currency_available: self.currency,
                tickets_required: 0,
                tickets_available: 0,
            })?;
        Ok(())
    }

    /// Adds currency to the wallet.
    ///
    /// # Errors
    ///
    /// `ArithmeticOverflow` if the balance would overflow.
    pub fn credit(&mut self, amount: u64) -> GachaResult<()> {
        self.currency = self
            .currency
            .checked_add(amount)
            .ok_or(GachaError::ArithmeticOverflow)?;
        Ok(())
    }

    /// Tickets of one kind on hand.
    #[must_use]
    pub fn ticket_balance(&self, item_id: ItemId) -> u64 {
        self.inventory.count_item(item_id)
    }

    /// Consumes tickets.
    ///
    /// # Errors
    ///
    /// `InsufficientFunds` when fewer tickets are held.
    pub fn consume_ticket(&mut self, item_id: ItemId, quantity: u64) -> GachaResult<()> {
        self.inventory.remove(item_id, quantity)
    }

    /// Grants one resolved reward.
    ///
    /// `max_stack` only matters for item rewards.
    ///
    /// # Errors
    ///
    /// `InventoryFull` or `ArithmeticOverflow`.
    pub fn grant(&mut self, reward: &Reward, quantity: u32, max_stack: u32) -> GachaResult<()> {
        match reward {
            Reward::Currency => self.credit(u64::from(quantity)),
            Reward::Item { item_id } => self.inventory.add(*item_id, quantity, max_stack),
            Reward::Inline { payload } => {
                let count =
                    usize::try_from(quantity).map_err(|_| GachaError::ArithmeticOverflow)?;
                self.payloads.extend(std::iter::repeat(payload).take(count).cloned());
                Ok(())
            }
        }
    }
}

/// How a batch will be paid for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargePlan {
    /// Pulls covered by tickets.
    pub pulls_by_ticket: u32,
    /// Tickets consumed.
    pub tickets_spent: u64,
    /// Currency debited for the remaining pulls.
    pub currency_spent: u64,
}

/// Works out the charge for `count` pulls without touching the account.
///
/// Tickets cover as many whole pulls as they can; currency pays for the rest.
/// A ticket-only cost never falls back to currency.
///
/// # Errors
///
/// `InsufficientFunds` when the account cannot cover the plan,
/// `ArithmeticOverflow` on absurd prices.
pub fn plan_charge(cost: &Cost, count: u32, account: &Account) -> GachaResult<ChargePlan> {
    let mut plan = ChargePlan::default();
    let mut remaining = count;

    if let Some(ticket) = cost.ticket {
        let per_pull = u64::from(ticket.quantity.max(1));
        let held = account.ticket_balance(ticket.item_id);
        let coverable = u32::try_from(held / per_pull).unwrap_or(u32::MAX);
        plan.pulls_by_ticket = coverable.min(count);
        plan.tickets_spent = u64::from(plan.pulls_by_ticket) * per_pull;
        remaining -= plan.pulls_by_ticket;

        if remaining > 0 && cost.is_ticket_only() {
            return Err(GachaError::InsufficientFunds {
                currency_required: 0,
                currency_available: account.currency,
                tickets_required: u64::from(count) * per_pull,
                tickets_available: held,
            });
        }
    }

    plan.currency_spent = cost
        .currency_amount
        .checked_mul(u64::from(remaining))
        .ok_or(GachaError::ArithmeticOverflow)?;

    if plan.currency_spent > account.currency {
        return Err(GachaError::InsufficientFunds {
            currency_required: plan.currency_spent,
            currency_available: account.currency,
            tickets_required: plan.tickets_spent,
            tickets_available: cost
                .ticket
                .map_or(0, |t| account.ticket_balance(t.item_id)),
        });
    }

    Ok(plan)
}

/// Applies a plan produced by [`plan_charge`].
///
/// # Errors
///
/// `InsufficientFunds` if the account changed since the plan was made.
pub fn apply_charge(account: &mut Account, cost: &Cost, plan: &ChargePlan) -> GachaResult<()> {
    if let Some(ticket) = cost.ticket {
        if plan.tickets_spent > 0 {
            account.consume_ticket(ticket.item_id, plan.tickets_spent)?;
        }
    }
    account.debit(plan.currency_spent)
}
