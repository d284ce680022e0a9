//! # Tiered Periodic Work
//!
//! Entities are sorted into tiers by a relevance score (lower is more
//! relevant, e.g. graph distance from the player). Each tier has its own
//! processing interval in ticks.
//!
//! ## Staggering
//!
//! ```text
//! interval = 4, assigned at tick t:
//!
//!   id % 4 == 0 -> last = t     -> due t+4, t+8, ...
//!   id % 4 == 1 -> last = t - 1 -> due t+3, t+7, ...
//!   id % 4 == 2 -> last = t - 2 -> due t+2, t+6, ...
//!   id % 4 == 3 -> last = t - 3 -> due t+1, t+5, ...
//! ```
//!
//! A tier of N entities therefore costs about N / interval per tick instead
//! of N every interval-th tick. Entities live in one bucket per phase
//! (`last mod interval`), so collecting the due set touches only one bucket
//! per tier.

use std::collections::HashMap;

use rayon::prelude::*;
use regnum_core::EntityId;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One tier: entities with relevance up to `max_relevance` run every `interval` ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierConfig {
    /// Inclusive upper bound of relevance for this tier.
    pub max_relevance: u32,
    /// Ticks between runs.
    pub interval: u32,
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    tier: usize,
    last_processed: i64,
}

/// Tier membership and staggered due times.
#[derive(Clone, Debug)]
pub struct TierSchedule {
    tiers: Vec<TierConfig>,
    entries: HashMap<EntityId, Entry>,
    /// `buckets[tier][phase]`, each sorted by ID.
    buckets: Vec<Vec<Vec<EntityId>>>,
}

impl TierSchedule {
    /// Creates a schedule. The last tier catches every relevance above the others.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if there are no tiers, an interval is zero,
    /// or bounds are not strictly increasing.
    pub fn new(tiers: Vec<TierConfig>) -> Result<Self, ConfigError> {
        validate_tiers(&tiers)?;
        let buckets = tiers
            .iter()
            .map(|tier| vec![Vec::new(); tier.interval as usize])
            .collect();
        Ok(Self {
            tiers,
            entries: HashMap::new(),
            buckets,
        })
    }

    /// Tier definitions.
    #[must_use]
    pub fn tiers(&self) -> &[TierConfig] {
        &self.tiers
    }

    /// Number of scheduled entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tier index for a relevance score.
    #[must_use]
    pub fn tier_for(&self, relevance: u32) -> usize {
        self.tiers
            .iter()
            .position(|tier| relevance <= tier.max_relevance)
            .unwrap_or(self.tiers.len() - 1)
    }

    /// Current tier of `id`.
    #[must_use]
    pub fn tier_of(&self, id: EntityId) -> Option<usize> {
        self.entries.get(&id).map(|entry| entry.tier)
    }

    /// Tick `id` was last processed (or its staggered start).
    #[must_use]
    pub fn last_processed(&self, id: EntityId) -> Option<i64> {
        self.entries.get(&id).map(|entry| entry.last_processed)
    }

    /// Entities in each tier.
    #[must_use]
    pub fn tier_sizes(&self) -> Vec<usize> {
        self.buckets
            .iter()
            .map(|phases| phases.iter().map(Vec::len).sum())
            .collect()
    }

    /// Schedules `id` by relevance at `tick`, or moves it if its tier changed.
    ///
    /// Returns true if the tier changed or the entity was new.
    pub fn assign(&mut self, id: EntityId, relevance: u32, tick: u64) -> bool {
        let tier = self.tier_for(relevance);
        self.place(id, tier, tick)
    }

    /// Stops scheduling `id`.
    pub fn remove(&mut self, id: EntityId) -> bool {
        match self.entries.remove(&id) {
            Some(entry) => {
                self.unlink(id, entry);
                true
            }
            None => false,
        }
    }

    /// Recomputes every listed entity's tier from `relevance`.
    ///
    /// Scores are computed on the rayon pool; the order-preserving collect
    /// and the sequential merge make the result independent of thread count.
    /// Returns the number of entities whose tier changed.
    pub fn recompute<F>(&mut self, ids: &[EntityId], tick: u64, relevance: F) -> usize
    where
        F: Fn(EntityId) -> u32 + Sync,
    {
        let tiers = &self.tiers;
        let assignments: Vec<(EntityId, usize)> = ids
            .par_iter()
            .map(|&id| {
                let score = relevance(id);
                let tier = tiers
                    .iter()
                    .position(|tier| score <= tier.max_relevance)
                    .unwrap_or(tiers.len() - 1);
                (id, tier)
            })
            .collect();

        let changed = assignments
            .into_iter()
            .filter(|&(id, tier)| self.place(id, tier, tick))
            .count();
        tracing::debug!(
            "Tier recompute at tick {}: {} of {} entities moved",
            tick,
            changed,
            ids.len()
        );
        changed
    }

    /// Fills `out` with the entities due at `tick` and marks them processed.
    ///
    /// Order: tier by tier, ascending ID within a tier.
    pub fn collect_due(&mut self, tick: u64, out: &mut Vec<EntityId>) {
        out.clear();
        let now = tick as i64;
        for (tier, config) in self.tiers.iter().enumerate() {
            let interval = i64::from(config.interval);
            let phase = now.rem_euclid(interval) as usize;
            for &id in &self.buckets[tier][phase] {
                if let Some(entry) = self.entries.get_mut(&id) {
                    if now - entry.last_processed >= interval {
                        entry.last_processed = now;
                        out.push(id);
                    }
                }
            }
        }
    }

    fn place(&mut self, id: EntityId, tier: usize, tick: u64) -> bool {
        if let Some(entry) = self.entries.get(&id).copied() {
            if entry.tier == tier {
                return false;
            }
            self.unlink(id, entry);
        }

        let interval = i64::from(self.tiers[tier].interval);
        let last_processed = tick as i64 - i64::from(id.raw()) % interval;
        let phase = last_processed.rem_euclid(interval) as usize;
        let bucket = &mut self.buckets[tier][phase];
        if let Err(position) = bucket.binary_search(&id) {
            bucket.insert(position, id);
        }
        self.entries.insert(id, Entry { tier, last_processed });
        true
    }

    fn unlink(&mut self, id: EntityId, entry: Entry) {
        let interval = i64::from(self.tiers[entry.tier].interval);
        let phase = entry.last_processed.rem_euclid(interval) as usize;
        let bucket = &mut self.buckets[entry.tier][phase];
        if let Ok(position) = bucket.binary_search(&id) {
            bucket.remove(position);
        }
    }
}

/// Checks tier definitions.
///
/// # Errors
///
/// [`ConfigError::Invalid`] describing the first problem found.
pub fn validate_tiers(tiers: &[TierConfig]) -> Result<(), ConfigError> {
    if tiers.is_empty() {
        return Err(ConfigError::Invalid("at least one tier is required".into()));
    }
    for (i, tier) in tiers.iter().enumerate() {
        if tier.interval == 0 {
            return Err(ConfigError::Invalid(format!("tier {i} has interval 0")));
        }
        if i > 0 && tier.max_relevance <= tiers[i - 1].max_relevance {
            return Err(ConfigError::Invalid(format!(
                "tier {i} max_relevance {} is not above tier {}",
                tier.max_relevance,
                i - 1
            )));
        }
    }
    Ok(())
}
