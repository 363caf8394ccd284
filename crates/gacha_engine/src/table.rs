//! # Loot Table Definitions
//!
//! Plain, immutable value types describing a box or banner. Tables are loaded
//! from TOML, validated once, and then shared read-only by every pull.
//!
//! ## Table Shapes
//!
//! - **single-pick** - one winner per group per attempt (weighted or uniform).
//! - **independent-trials** - every entry rolls against its own probability.
//! - **rarity-tiered** - a single-pick table with `rarity_drop_rates`: a rarity is
//!   drawn first (or forced by pity), then a reward of that rarity.
//!
//! ## Example
//!
//! ```toml
//! id = 7
//! name = "Starter Banner"
//! mode = "single-pick"
//!
//! [cost]
//! currency_amount = 160
//! ticket = { item_id = 900, quantity = 1 }
//!
//! [[rarity_drop_rates]]
//! rarity = "legendary"
//! rate = 0.02
//!
//! [[rarity_drop_rates]]
//! rarity = "rare"
//! rate = 0.98
//!
//! [[guarantee_thresholds]]
//! rarity = "legendary"
//! pulls_required = 90
//!
//! [[entries]]
//! id = 1
//! reward = { kind = "item", item_id = 501 }
//! rarity = "legendary"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::error::{GachaError, GachaResult};

/// Unique identifier for a loot table.
pub type TableId = u32;

/// Identifier of an entry, unique within its table.
pub type EntryId = u32;

/// Identifier of a catalog item (also used for tickets).
pub type ItemId = u32;

/// Allowed deviation of the drop-rate sum from 1.0.
pub const DROP_RATE_TOLERANCE: f64 = 1e-3;

/// Rarity tier for rewards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Rarity {
    /// Common rewards (gray).
    Common = 0,
    /// Uncommon rewards (green).
    Uncommon = 1,
    /// Rare rewards (blue).
    Rare = 2,
    /// Epic rewards (purple).
    Epic = 3,
    /// Legendary rewards (orange).
    Legendary = 4,
    /// Mythic rewards (red).
    Mythic = 5,
}

impl Rarity {
    /// All tiers, lowest first.
    pub const ALL: [Self; 6] = [
        Self::Common,
        Self::Uncommon,
        Self::Rare,
        Self::Epic,
        Self::Legendary,
        Self::Mythic,
    ];

    /// Converts from u8 to Rarity.
    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Common,
            1 => Self::Uncommon,
            2 => Self::Rare,
            3 => Self::Epic,
            4 => Self::Legendary,
            _ => Self::Mythic,
        }
    }

    /// Numeric tier.
    #[inline]
    #[must_use]
    pub const fn tier(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for Rarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Common => "common",
            Self::Uncommon => "uncommon",
            Self::Rare => "rare",
            Self::Epic => "epic",
            Self::Legendary => "legendary",
            Self::Mythic => "mythic",
        };
        f.write_str(name)
    }
}

/// How a table chooses its rewards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionMode {
    /// One winner per group per attempt.
    SinglePick,
    /// Every entry rolls independently against its probability.
    IndependentTrials,
}

/// What an entry grants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reward {
    /// Soft currency credited to the wallet.
    Currency,
    /// A catalog item granted to the inventory.
    Item {
        /// The catalog item.
        item_id: ItemId,
    },
    /// An opaque payload handed to the player as-is.
    Inline {
        /// Arbitrary JSON document.
        payload: serde_json::Value,
    },
}

impl Reward {
    /// The catalog item this reward refers to, if any.
    #[must_use]
    pub const fn item_id(&self) -> Option<ItemId> {
        match self {
            Self::Item { item_id } => Some(*item_id),
            Self::Currency | Self::Inline { .. } => None,
        }
    }
}

fn one() -> u32 {
    1
}

fn active_by_default() -> bool {
    true
}

/// A single entry in a loot table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Entry identifier, unique within the table.
    pub id: EntryId,
    /// What this entry grants.
    pub reward: Reward,
    /// Minimum quantity.
    #[serde(default = "one")]
    pub amount_min: u32,
    /// Maximum quantity (inclusive).
    #[serde(default = "one")]
    pub amount_max: u32,
    /// Proportional weight for single-pick groups.
    #[serde(default)]
    pub weight: Option<u32>,
    /// Independent chance in `[0, 1]` for independent-trials tables.
    #[serde(default)]
    pub probability: Option<f64>,
    /// Group key; entries without one form their own group.
    #[serde(default)]
    pub group: Option<String>,
    /// Fallback of last resort within its group and table.
    #[serde(default)]
    pub guaranteed: bool,
    /// Rarity tier, required by rarity-tiered tables.
    #[serde(default)]
    pub rarity: Option<Rarity>,
}

impl Entry {
    /// Creates an entry granting one unit of `reward`.
    #[must_use]
    pub const fn new(id: EntryId, reward: Reward) -> Self {
        Self {
            id,
            reward,
            amount_min: 1,
            amount_max: 1,
            weight: None,
            probability: None,
            group: None,
            guaranteed: false,
            rarity: None,
        }
    }

    /// Creates an entry granting one unit of a catalog item.
    #[must_use]
    pub const fn item(id: EntryId, item_id: ItemId) -> Self {
        Self::new(id, Reward::Item { item_id })
    }

    /// Sets the quantity range.
    #[must_use]
    pub const fn with_amount(mut self, min: u32, max: u32) -> Self {
        self.amount_min = min;
        self.amount_max = max;
        self
    }

    /// Sets the single-pick weight.
    #[must_use]
    pub const fn with_weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Sets the independent-trials probability.
    #[must_use]
    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = Some(probability);
        self
    }

    /// Places the entry in a group.
    #[must_use]
    pub fn in_group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    /// Marks the entry as a guaranteed fallback.
    #[must_use]
    pub const fn guaranteed(mut self) -> Self {
        self.guaranteed = true;
        self
    }

    /// Sets the rarity tier.
    #[must_use]
    pub const fn with_rarity(mut self, rarity: Rarity) -> Self {
        self.rarity = Some(rarity);
        self
    }
}

/// Probability of drawing a rarity in a rarity-tiered table.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RarityRate {
    /// The tier.
    pub rarity: Rarity,
    /// Probability in `[0, 1]`.
    pub rate: f64,
}

/// Rate-up multiplier for one reward inside its rarity tier.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeaturedBoost {
    /// The featured catalog item.
    pub item_id: ItemId,
    /// Relative weight; non-featured rewards weigh 1.
    pub multiplier: f64,
}

/// Pity rule: a rarity is forced once enough pulls passed without it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuaranteeThreshold {
    /// The guaranteed rarity.
    pub rarity: Rarity,
    /// Pull number (counting the current one) at which the guarantee fires.
    pub pulls_required: u32,
    /// Also reset the counter when the rarity is reached without pity.
    #[serde(default)]
    pub reset_on_natural: bool,
}

impl GuaranteeThreshold {
    /// Creates a threshold that only resets when it fires.
    #[must_use]
    pub const fn new(rarity: Rarity, pulls_required: u32) -> Self {
        Self {
            rarity,
            pulls_required,
            reset_on_natural: false,
        }
    }
}

/// Ticket half of a pull cost.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketCost {
    /// The ticket item.
    pub item_id: ItemId,
    /// Tickets consumed per pull.
    pub quantity: u32,
}

/// Per-pull price of a table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cost {
    /// Currency per pull; 0 with a ticket set means ticket-only.
    #[serde(default)]
    pub currency_amount: u64,
    /// Optional ticket alternative, consumed first.
    #[serde(default)]
    pub ticket: Option<TicketCost>,
}

impl Cost {
    /// Currency-only price.
    #[must_use]
    pub const fn currency(amount: u64) -> Self {
        Self {
            currency_amount: amount,
            ticket: None,
        }
    }

    /// Ticket-only price.
    #[must_use]
    pub const fn tickets(item_id: ItemId, quantity: u32) -> Self {
        Self {
            currency_amount: 0,
            ticket: Some(TicketCost { item_id, quantity }),
        }
    }

    /// Tickets first, currency for the remainder.
    #[must_use]
    pub const fn tickets_or_currency(item_id: ItemId, quantity: u32, amount: u64) -> Self {
        Self {
            currency_amount: amount,
            ticket: Some(TicketCost { item_id, quantity }),
        }
    }

    /// True when the table takes tickets and nothing else.
    #[must_use]
    pub const fn is_ticket_only(&self) -> bool {
        self.currency_amount == 0 && self.ticket.is_some()
    }
}

/// A complete loot table (box or banner).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LootTable {
    /// Table identity.
    pub id: TableId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Disabled tables reject pulls.
    #[serde(default = "active_by_default")]
    pub active: bool,
    /// Selection mode.
    pub mode: SelectionMode,
    /// Ordered entries.
    #[serde(default)]
    pub entries: Vec<Entry>,
    /// Rarity probabilities; non-empty makes the table rarity-tiered.
    #[serde(default)]
    pub rarity_drop_rates: Vec<RarityRate>,
    /// Rate-up multipliers.
    #[serde(default)]
    pub featured_boost: Vec<FeaturedBoost>,
    /// Pity thresholds, ascending by rarity.
    #[serde(default)]
    pub guarantee_thresholds: Vec<GuaranteeThreshold>,
    /// Per-pull price.
    #[serde(default)]
    pub cost: Cost,
    /// Largest batch this table accepts; the engine default applies when unset.
    #[serde(default)]
    pub max_pulls_per_batch: Option<u32>,
}

impl LootTable {
    /// Creates an empty, active table.
    #[must_use]
    pub fn new(id: TableId, mode: SelectionMode) -> Self {
        Self {
            id,
            name: String::new(),
            active: true,
            mode,
            entries: Vec::new(),
            rarity_drop_rates: Vec::new(),
            featured_boost: Vec::new(),
            guarantee_thresholds: Vec::new(),
            cost: Cost::default(),
            max_pulls_per_batch: None,
        }
    }

    /// Parses and validates a table from a TOML document.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the document does not parse, `InvalidTable` if it
    /// parses but breaks a table invariant.
    pub fn from_toml_str(source: &str) -> GachaResult<Self> {
        let table: Self = toml::from_str(source)
            .map_err(|e| GachaError::InvalidConfig(format!("Failed to parse loot table: {e}")))?;
        table.validate()?;
        Ok(table)
    }

    /// True when rewards are chosen by drawing a rarity first.
    #[inline]
    #[must_use]
    pub fn is_rarity_tiered(&self) -> bool {
        !self.rarity_drop_rates.is_empty()
    }

    /// Looks up an entry by id.
    #[must_use]
    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Rate-up multiplier for an item (1.0 when not featured).
    #[must_use]
    pub fn boost_for(&self, item_id: Option<ItemId>) -> f64 {
        item_id
            .and_then(|id| self.featured_boost.iter().find(|b| b.item_id == id))
            .map_or(1.0, |b| b.multiplier)
    }

    /// True when the item carries a rate-up.
    #[must_use]
    pub fn is_featured(&self, item_id: Option<ItemId>) -> bool {
        item_id.is_some_and(|id| self.featured_boost.iter().any(|b| b.item_id == id))
    }

    /// Entries partitioned into groups, in order of first appearance.
    ///
    /// Entries without a group key each form a singleton group.
    #[must_use]
    pub fn groups(&self) -> Vec<Vec<&Entry>> {
        let mut groups: Vec<(Option<&str>, Vec<&Entry>)> = Vec::new();
        for entry in &self.entries {
            match entry.group.as_deref() {
                Some(key) => {
                    if let Some((_, members)) =
                        groups.iter_mut().find(|(k, _)| *k == Some(key))
                    {
                        members.push(entry);
                    } else {
                        groups.push((Some(key), vec![entry]));
                    }
                }
                None => groups.push((None, vec![entry])),
            }
        }
        groups.into_iter().map(|(_, members)| members).collect()
    }

    /// Entries of one rarity, in table order.
    #[must_use]
    pub fn pool(&self, rarity: Rarity) -> Vec<&Entry> {
        self.entries
            .iter()
            .filter(|e| e.rarity == Some(rarity))
            .collect()
    }

    /// Validates every table invariant.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTable` describing the first violation found.
    pub fn validate(&self) -> GachaResult<()> {
        let fail = |reason: String| Err(GachaError::invalid_table(self.id, reason));

        let mut seen = HashSet::new();
        for entry in &self.entries {
            if !seen.insert(entry.id) {
                return fail(format!("duplicate entry id {}", entry.id));
            }
            if entry.reward.item_id() == Some(0) {
                return fail(format!("entry {} grants the reserved item id 0", entry.id));
            }
            if entry.amount_min > entry.amount_max {
                return fail(format!(
                    "entry {} has amount_min {} > amount_max {}",
                    entry.id, entry.amount_min, entry.amount_max
                ));
            }
            match self.mode {
                SelectionMode::SinglePick if entry.probability.is_some() => {
                    return fail(format!(
                        "entry {} sets a probability in a single-pick table",
                        entry.id
                    ));
                }
                SelectionMode::IndependentTrials if entry.weight.is_some() => {
                    return fail(format!(
                        "entry {} sets a weight in an independent-trials table",
                        entry.id
                    ));
                }
                _ => {}
            }
            if let Some(p) = entry.probability {
                if !(0.0..=1.0).contains(&p) {
                    return fail(format!("entry {} has probability {p} outside [0, 1]", entry.id));
                }
            }
        }

        if self.mode == SelectionMode::SinglePick {
            for group in self.groups() {
                let weighted = group.iter().any(|e| e.weight.is_some());
                let total: u64 = group.iter().filter_map(|e| e.weight).map(u64::from).sum();
                if weighted && total == 0 {
                    return fail(format!("group of entry {} has zero total weight", group[0].id));
                }
            }
        }

        self.validate_rarity_tiers()?;
        self.validate_cost()
    }

    fn validate_rarity_tiers(&self) -> GachaResult<()> {
        let fail = |reason: String| Err(GachaError::invalid_table(self.id, reason));

        if !self.is_rarity_tiered() {
            if !self.guarantee_thresholds.is_empty() {
                return fail("guarantee thresholds require rarity_drop_rates".to_string());
            }
            if !self.featured_boost.is_empty() {
                return fail("featured boosts require rarity_drop_rates".to_string());
            }
            return Ok(());
        }

        if self.mode != SelectionMode::SinglePick {
            return fail("rarity-tiered tables must use single-pick mode".to_string());
        }

        let mut rarities = BTreeSet::new();
        let mut sum = 0.0;
        for rate in &self.rarity_drop_rates {
            if !rarities.insert(rate.rarity) {
                return fail(format!("duplicate drop rate for {}", rate.rarity));
            }
            if !(0.0..=1.0).contains(&rate.rate) {
                return fail(format!("drop rate {} for {} outside [0, 1]", rate.rate, rate.rarity));
            }
            sum += rate.rate;
        }
        if (sum - 1.0).abs() > DROP_RATE_TOLERANCE {
            return fail(format!("drop rates sum to {sum}, expected 1.0"));
        }

        if let Some(entry) = self.entries.iter().find(|e| e.rarity.is_none()) {
            return fail(format!("entry {} has no rarity in a rarity-tiered table", entry.id));
        }

        let mut previous: Option<Rarity> = None;
        for threshold in &self.guarantee_thresholds {
            if threshold.pulls_required == 0 {
                return fail(format!("threshold for {} requires 0 pulls", threshold.rarity));
            }
            if previous.is_some_and(|p| p >= threshold.rarity) {
                return fail("guarantee thresholds must be strictly ascending by rarity".to_string());
            }
            previous = Some(threshold.rarity);
        }

        for boost in &self.featured_boost {
            if !boost.multiplier.is_finite() || boost.multiplier <= 0.0 {
                return fail(format!(
                    "featured multiplier {} for item {} must be positive",
                    boost.multiplier, boost.item_id
                ));
            }
            if !self.entries.iter().any(|e| e.reward.item_id() == Some(boost.item_id)) {
                return fail(format!("featured item {} is not in the table", boost.item_id));
            }
        }

        Ok(())
    }

    fn validate_cost(&self) -> GachaResult<()> {
        if let Some(ticket) = self.cost.ticket {
            if ticket.item_id == 0 {
                return Err(GachaError::invalid_table(
                    self.id,
                    "ticket cost uses the reserved item id 0",
                ));
            }
            if ticket.quantity == 0 {
                return Err(GachaError::invalid_table(
                    self.id,
                    "ticket cost must consume at least one ticket",
                ));
            }
        }
        if self.max_pulls_per_batch == Some(0) {
            return Err(GachaError::invalid_table(self.id, "max_pulls_per_batch must be >= 1"));
        }
        Ok(())
    }
}
