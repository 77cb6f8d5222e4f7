//! Capacity ledger snapshot and aggregation arithmetic.
//!
//! A [`CapacityLedger`] is an immutable copy of ledger rows read in one
//! go. Aggregating a scope sums every enabled row underneath it, so a
//! cluster's capacity is the sum of its hosts (plus any cluster-level
//! rows such as shared storage). Each physical resource is expected to
//! appear once in the ledger, either as host rows or as a row at the
//! level that owns it.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::warn;

use corral_core::{OvercommitPolicy, ResourceType, ScopeId, ScopeLevel, ScopeRef};
use corral_state::{CapacityLedgerReader, CapacityRecord, StateResult};

use crate::error::CapacityResult;

/// Immutable snapshot of capacity rows.
#[derive(Debug, Clone, Default)]
pub struct CapacityLedger {
    records: Vec<CapacityRecord>,
}

/// Aggregated capacity of one resource type at one scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeCapacity {
    pub scope: ScopeRef,
    pub resource: ResourceType,
    pub used: u64,
    pub reserved: u64,
    /// Physical total.
    pub total: u64,
    /// Total after overcommit, summed row by row.
    pub allocatable: f64,
}

impl ScopeCapacity {
    /// Allocatable capacity not yet used or reserved. Negative when overcommitted.
    pub fn free(&self) -> f64 {
        self.allocatable - self.committed(0)
    }

    /// Projected consumption fraction after adding `requested`.
    ///
    /// A scope with no allocatable capacity is fully consumed as soon as
    /// anything is committed to it.
    pub fn consumption(&self, requested: u64) -> f64 {
        let committed = self.committed(requested);
        if self.allocatable > 0.0 {
            committed / self.allocatable
        } else if committed > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }

    /// Current used fraction (no projection).
    pub fn used_fraction(&self) -> f64 {
        self.consumption(0)
    }

    fn committed(&self, requested: u64) -> f64 {
        self.used as f64 + self.reserved as f64 + requested as f64
    }
}

impl CapacityLedger {
    pub fn new(records: Vec<CapacityRecord>) -> Self {
        Self { records }
    }

    /// Read a snapshot of every row inside `within` (or the whole fleet).
    pub fn load<R: CapacityLedgerReader + ?Sized>(
        reader: &R,
        within: Option<ScopeRef>,
    ) -> CapacityResult<Self> {
        Ok(Self::new(reader.records_within(within)?))
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Enabled rows of `resource` counted in `scope`.
    pub fn rows<'a>(
        &'a self,
        scope: ScopeRef,
        resource: ResourceType,
    ) -> impl Iterator<Item = &'a CapacityRecord> + 'a {
        self.records
            .iter()
            .filter(move |r| r.is_enabled() && r.resource_type == resource && r.belongs_to(scope))
    }

    /// Ids at `level` that have enabled rows of `resource`, ascending.
    pub fn scope_ids(&self, level: ScopeLevel, resource: ResourceType) -> BTreeSet<ScopeId> {
        self.records
            .iter()
            .filter(|r| r.is_enabled() && r.resource_type == resource)
            .filter_map(|r| r.id_at(level))
            .collect()
    }

    /// Sum every enabled row of `resource` under `scope`.
    ///
    /// Returns `None` when the scope has no such rows; callers decide
    /// whether that is an error, it is never zero capacity.
    pub fn aggregate(
        &self,
        scope: ScopeRef,
        resource: ResourceType,
        overcommit: &OvercommitPolicy,
    ) -> Option<ScopeCapacity> {
        let mut found = false;
        let mut summed = ScopeCapacity {
            scope,
            resource,
            used: 0,
            reserved: 0,
            total: 0,
            allocatable: 0.0,
        };

        for row in self.rows(scope, resource) {
            found = true;
            let ratio = overcommit.ratio(resource, row.cluster_id);
            let allocatable = row.total_amount as f64 * ratio;
            let committed = row.used_amount as f64 + row.reserved_amount as f64;
            if committed > allocatable {
                warn!(
                    scope = %row.scope(),
                    %resource,
                    used = row.used_amount,
                    reserved = row.reserved_amount,
                    allocatable,
                    "capacity row is over its allocatable total"
                );
            }
            summed.used = summed.used.saturating_add(row.used_amount);
            summed.reserved = summed.reserved.saturating_add(row.reserved_amount);
            summed.total = summed.total.saturating_add(row.total_amount);
            summed.allocatable += allocatable;
        }

        found.then_some(summed)
    }
}

impl CapacityLedgerReader for CapacityLedger {
    fn records_within(&self, within: Option<ScopeRef>) -> StateResult<Vec<CapacityRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| within.is_none_or(|scope| r.belongs_to(scope)))
            .cloned()
            .collect())
    }
}
