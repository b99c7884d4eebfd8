//! Constraint and load container.
//!
//! [`ConstraintContainer`] owns every constraint of the model together with
//! the load patterns and node lockers that may own single-freedom
//! constraints themselves. Single-freedom constraint tags are unique across
//! all owners; the container keeps an index from tag to owner so lookups and
//! removals never scan every pattern.

use std::collections::BTreeMap;

use hashbrown::HashMap;

use fem_constraint::{ConstraintOwner, FreedomCoupling, MultiFreedom, SingleFreedomConstraint};
use fem_types::{
    ConstraintTag, ElementTag, FemError, LockerTag, NodeTag, PatternTag, Registry,
};

use crate::element::ElementKind;
use crate::load::{ElementalLoad, LoadPattern, NodalLoad, NodeLocker};
use crate::node::Node;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Owner of every constraint, load pattern and node locker.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConstraintContainer {
    single: BTreeMap<ConstraintTag, SingleFreedomConstraint>,
    multi: BTreeMap<ConstraintTag, MultiFreedom>,
    patterns: BTreeMap<PatternTag, LoadPattern>,
    lockers: BTreeMap<LockerTag, NodeLocker>,
    owners: HashMap<ConstraintTag, ConstraintOwner>,
}

impl ConstraintContainer {
    /// Create an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Every single-freedom constraint, whatever its owner.
    pub fn sp_constraints(&self) -> impl Iterator<Item = &SingleFreedomConstraint> {
        self.single
            .values()
            .chain(self.patterns.values().flat_map(LoadPattern::constraints))
            .chain(self.lockers.values().flat_map(NodeLocker::constraints))
    }

    /// Multi-freedom constraints in tag order.
    pub fn mp_constraints(&self) -> impl Iterator<Item = &MultiFreedom> {
        self.multi.values()
    }

    /// Load patterns in tag order.
    pub fn load_patterns(&self) -> impl Iterator<Item = &LoadPattern> {
        self.patterns.values()
    }

    /// Node lockers in tag order.
    pub fn node_lockers(&self) -> impl Iterator<Item = &NodeLocker> {
        self.lockers.values()
    }

    /// Total number of single-freedom constraints.
    #[must_use]
    pub fn num_sp(&self) -> usize {
        self.owners.len()
    }

    /// Number of multi-freedom constraints.
    #[must_use]
    pub fn num_mp(&self) -> usize {
        self.multi.len()
    }

    /// Number of load patterns.
    #[must_use]
    pub fn num_patterns(&self) -> usize {
        self.patterns.len()
    }

    /// Number of node lockers.
    #[must_use]
    pub fn num_lockers(&self) -> usize {
        self.lockers.len()
    }

    /// Look up a single-freedom constraint.
    #[must_use]
    pub fn sp(&self, tag: ConstraintTag) -> Option<&SingleFreedomConstraint> {
        match self.owners.get(&tag)? {
            ConstraintOwner::Standalone => self.single.get(&tag),
            ConstraintOwner::Pattern(p) => self
                .patterns
                .get(p)?
                .constraints()
                .find(|sp| sp.tag() == tag),
            ConstraintOwner::Locker(l) => {
                self.lockers.get(l)?.constraints().find(|sp| sp.tag() == tag)
            }
        }
    }

    /// Look up a multi-freedom constraint.
    #[must_use]
    pub fn mp(&self, tag: ConstraintTag) -> Option<&MultiFreedom> {
        self.multi.get(&tag)
    }

    /// Look up a load pattern.
    #[must_use]
    pub fn pattern(&self, tag: PatternTag) -> Option<&LoadPattern> {
        self.patterns.get(&tag)
    }

    /// Look up a node locker.
    #[must_use]
    pub fn locker(&self, tag: LockerTag) -> Option<&NodeLocker> {
        self.lockers.get(&tag)
    }

    /// Whether any single-freedom constraint acts on `node`.
    #[must_use]
    pub fn is_sp_constrained(&self, node: NodeTag) -> bool {
        self.sp_constraints().any(|sp| sp.node() == node)
    }

    // ========================================================================
    // Additions
    // ========================================================================

    fn check_sp_tag(&self, tag: ConstraintTag) -> fem_types::Result<()> {
        if self.owners.contains_key(&tag) {
            return Err(FemError::duplicate(Registry::SingleFreedom, tag.raw()));
        }
        Ok(())
    }

    /// Add a standalone single-freedom constraint.
    pub fn add_sp(&mut self, mut sp: SingleFreedomConstraint) -> fem_types::Result<()> {
        self.check_sp_tag(sp.tag())?;
        sp.set_owner(ConstraintOwner::Standalone);
        self.owners.insert(sp.tag(), ConstraintOwner::Standalone);
        self.single.insert(sp.tag(), sp);
        Ok(())
    }

    /// Add a single-freedom constraint owned by a load pattern.
    pub fn add_sp_to_pattern(
        &mut self,
        pattern: PatternTag,
        sp: SingleFreedomConstraint,
    ) -> fem_types::Result<()> {
        self.check_sp_tag(sp.tag())?;
        let owner = self
            .patterns
            .get_mut(&pattern)
            .ok_or_else(|| FemError::not_found(Registry::LoadPattern, pattern.raw()))?;
        self.owners.insert(sp.tag(), ConstraintOwner::Pattern(pattern));
        owner.add_constraint(sp);
        Ok(())
    }

    /// Add a single-freedom constraint owned by a node locker.
    pub fn add_sp_to_locker(
        &mut self,
        locker: LockerTag,
        sp: SingleFreedomConstraint,
    ) -> fem_types::Result<()> {
        self.check_sp_tag(sp.tag())?;
        let owner = self
            .lockers
            .get_mut(&locker)
            .ok_or_else(|| FemError::not_found(Registry::NodeLocker, locker.raw()))?;
        self.owners.insert(sp.tag(), ConstraintOwner::Locker(locker));
        owner.add_constraint(sp);
        Ok(())
    }

    /// Add a multi-freedom constraint.
    pub fn add_mp(&mut self, mp: MultiFreedom) -> fem_types::Result<()> {
        if self.multi.contains_key(&mp.tag()) {
            return Err(FemError::duplicate(Registry::MultiFreedom, mp.tag().raw()));
        }
        self.multi.insert(mp.tag(), mp);
        Ok(())
    }

    /// Add a load pattern together with the constraints it already owns.
    pub fn add_pattern(&mut self, mut pattern: LoadPattern) -> fem_types::Result<()> {
        if self.patterns.contains_key(&pattern.tag()) {
            return Err(FemError::duplicate(Registry::LoadPattern, pattern.tag().raw()));
        }
        self.check_owned_tags(pattern.constraints())?;
        let tag = pattern.tag();
        for sp in pattern.constraints_mut().values_mut() {
            sp.set_owner(ConstraintOwner::Pattern(tag));
            self.owners.insert(sp.tag(), ConstraintOwner::Pattern(tag));
        }
        self.patterns.insert(tag, pattern);
        Ok(())
    }

    /// Add a node locker together with the constraints it already owns.
    pub fn add_locker(&mut self, mut locker: NodeLocker) -> fem_types::Result<()> {
        if self.lockers.contains_key(&locker.tag()) {
            return Err(FemError::duplicate(Registry::NodeLocker, locker.tag().raw()));
        }
        self.check_owned_tags(locker.constraints())?;
        let tag = locker.tag();
        for sp in locker.constraints_mut().values_mut() {
            sp.set_owner(ConstraintOwner::Locker(tag));
            self.owners.insert(sp.tag(), ConstraintOwner::Locker(tag));
        }
        self.lockers.insert(tag, locker);
        Ok(())
    }

    fn check_owned_tags<'a>(
        &self,
        sps: impl Iterator<Item = &'a SingleFreedomConstraint>,
    ) -> fem_types::Result<()> {
        for sp in sps {
            self.check_sp_tag(sp.tag())?;
        }
        Ok(())
    }

    /// Add a nodal load to a pattern.
    pub fn add_nodal_load(
        &mut self,
        pattern: PatternTag,
        load: NodalLoad,
    ) -> fem_types::Result<()> {
        self.patterns
            .get_mut(&pattern)
            .ok_or_else(|| FemError::not_found(Registry::LoadPattern, pattern.raw()))?
            .add_nodal_load(load)
    }

    /// Add an elemental load to a pattern.
    pub fn add_elemental_load(
        &mut self,
        pattern: PatternTag,
        load: ElementalLoad,
    ) -> fem_types::Result<()> {
        self.patterns
            .get_mut(&pattern)
            .ok_or_else(|| FemError::not_found(Registry::LoadPattern, pattern.raw()))?
            .add_elemental_load(load)
    }

    // ========================================================================
    // Removals
    // ========================================================================

    /// Remove a single-freedom constraint from whichever owner holds it.
    pub fn remove_sp(&mut self, tag: ConstraintTag) -> Option<SingleFreedomConstraint> {
        let owner = self.owners.remove(&tag)?;
        match owner {
            ConstraintOwner::Standalone => self.single.remove(&tag),
            ConstraintOwner::Pattern(p) => self.patterns.get_mut(&p)?.constraints_mut().remove(&tag),
            ConstraintOwner::Locker(l) => self.lockers.get_mut(&l)?.constraints_mut().remove(&tag),
        }
    }

    /// Remove a multi-freedom constraint.
    pub fn remove_mp(&mut self, tag: ConstraintTag) -> Option<MultiFreedom> {
        self.multi.remove(&tag)
    }

    /// Remove a load pattern. Returns the pattern and the number of
    /// single-freedom constraints removed with it.
    pub fn remove_pattern(&mut self, tag: PatternTag) -> Option<(LoadPattern, usize)> {
        let pattern = self.patterns.remove(&tag)?;
        for sp in pattern.constraints() {
            self.owners.remove(&sp.tag());
        }
        let purged = pattern.num_constraints();
        Some((pattern, purged))
    }

    /// Remove a node locker. Returns the locker and the number of
    /// single-freedom constraints removed with it.
    pub fn remove_locker(&mut self, tag: LockerTag) -> Option<(NodeLocker, usize)> {
        let locker = self.lockers.remove(&tag)?;
        for sp in locker.constraints() {
            self.owners.remove(&sp.tag());
        }
        let purged = locker.num_constraints();
        Some((locker, purged))
    }

    /// Remove every constraint and nodal load referencing `node`. Returns
    /// the number of constraints purged.
    pub fn purge_node(&mut self, node: NodeTag) -> usize {
        let mut purged = 0;

        let before = self.single.len();
        self.single.retain(|_, sp| sp.node() != node);
        purged += before - self.single.len();

        for pattern in self.patterns.values_mut() {
            purged += pattern.purge_node(node);
        }
        for locker in self.lockers.values_mut() {
            purged += locker.purge_node(node);
        }

        let before = self.multi.len();
        self.multi
            .retain(|_, mp| mp.constrained_node() != node && mp.retained_node() != node);
        purged += before - self.multi.len();

        self.rebuild_owner_index();
        purged
    }

    /// Drop elemental-load references to `element`.
    pub fn purge_element(&mut self, element: ElementTag) {
        for pattern in self.patterns.values_mut() {
            pattern.purge_element(element);
        }
    }

    fn rebuild_owner_index(&mut self) {
        let mut owners = HashMap::with_capacity(self.owners.len());
        for sp in self.sp_constraints() {
            owners.insert(sp.tag(), sp.owner());
        }
        self.owners = owners;
    }

    // ========================================================================
    // State protocol
    // ========================================================================

    /// Scale and reapply every pattern at pseudo-time `t`, then refresh the
    /// values of constraints without a time series.
    pub fn apply_loads(
        &mut self,
        t: f64,
        nodes: &mut HashMap<NodeTag, Node>,
        elements: &mut HashMap<ElementTag, ElementKind>,
    ) -> fem_types::Result<()> {
        for pattern in self.patterns.values_mut() {
            pattern.apply_load(t, nodes, elements)?;
        }
        for sp in self.single.values_mut() {
            sp.apply_constraint(1.0);
        }
        for locker in self.lockers.values_mut() {
            for sp in locker.constraints_mut().values_mut() {
                sp.apply_constraint(1.0);
            }
        }
        for mp in self.multi.values_mut() {
            mp.apply_constraint(t);
        }
        Ok(())
    }

    /// Accept the current pattern factors.
    pub fn commit(&mut self) {
        self.patterns.values_mut().for_each(LoadPattern::commit);
    }

    /// Restore the last committed pattern factors.
    pub fn revert_to_last_commit(&mut self) {
        self.patterns
            .values_mut()
            .for_each(LoadPattern::revert_to_last_commit);
    }

    /// Reset pattern factors.
    pub fn revert_to_start(&mut self) {
        self.patterns
            .values_mut()
            .for_each(LoadPattern::revert_to_start);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::load::TimeSeries;
    use fem_constraint::MultiFreedomConstraint;

    fn sp(tag: i32, node: i32) -> SingleFreedomConstraint {
        SingleFreedomConstraint::fixed(ConstraintTag(tag), NodeTag(node), 0)
    }

    #[test]
    fn test_sp_tags_unique_across_owners() {
        let mut c = ConstraintContainer::new();
        c.add_sp(sp(1, 1)).unwrap();
        c.add_pattern(LoadPattern::new(PatternTag(1), TimeSeries::default()))
            .unwrap();
        c.add_locker(NodeLocker::new(LockerTag(1))).unwrap();

        assert!(matches!(
            c.add_sp_to_pattern(PatternTag(1), sp(1, 2)),
            Err(FemError::DuplicateTag { .. })
        ));
        c.add_sp_to_pattern(PatternTag(1), sp(2, 2)).unwrap();
        assert!(c.add_sp_to_locker(LockerTag(1), sp(2, 3)).is_err());
        c.add_sp_to_locker(LockerTag(1), sp(3, 3)).unwrap();
        assert!(c.add_sp_to_locker(LockerTag(9), sp(4, 3)).is_err());

        assert_eq!(c.num_sp(), 3);
        assert_eq!(c.sp_constraints().count(), 3);
        assert_eq!(
            c.sp(ConstraintTag(2)).unwrap().owner(),
            ConstraintOwner::Pattern(PatternTag(1))
        );
    }

    #[test]
    fn test_pattern_with_preloaded_constraints() {
        let mut c = ConstraintContainer::new();
        c.add_sp(sp(1, 1)).unwrap();

        let mut clashing = LoadPattern::new(PatternTag(2), TimeSeries::default());
        clashing.add_constraint(sp(1, 4));
        assert!(c.add_pattern(clashing).is_err());
        assert_eq!(c.num_patterns(), 0);

        let mut pattern = LoadPattern::new(PatternTag(2), TimeSeries::default());
        pattern.add_constraint(sp(5, 4));
        c.add_pattern(pattern).unwrap();
        assert!(c.sp(ConstraintTag(5)).is_some());
    }

    #[test]
    fn test_remove_pattern_counts_purged() {
        let mut c = ConstraintContainer::new();
        c.add_pattern(LoadPattern::new(PatternTag(1), TimeSeries::default()))
            .unwrap();
        c.add_sp_to_pattern(PatternTag(1), sp(7, 2)).unwrap();

        let (pattern, purged) = c.remove_pattern(PatternTag(1)).unwrap();
        assert_eq!(pattern.tag(), PatternTag(1));
        assert_eq!(purged, 1);
        assert_eq!(c.num_sp(), 0);
        assert!(c.remove_pattern(PatternTag(1)).is_none());

        // Tag is free again
        c.add_sp(sp(7, 2)).unwrap();
        assert!(c.remove_sp(ConstraintTag(7)).is_some());
        assert!(c.remove_sp(ConstraintTag(7)).is_none());
    }

    #[test]
    fn test_purge_node() {
        let mut c = ConstraintContainer::new();
        c.add_sp(sp(1, 1)).unwrap();
        c.add_sp(sp(2, 2)).unwrap();
        c.add_locker(NodeLocker::new(LockerTag(1))).unwrap();
        c.add_sp_to_locker(LockerTag(1), sp(3, 1)).unwrap();
        c.add_mp(
            MultiFreedomConstraint::equal_dof(ConstraintTag(1), NodeTag(1), NodeTag(3), vec![0])
                .unwrap()
                .into(),
        )
        .unwrap();

        assert_eq!(c.purge_node(NodeTag(1)), 3);
        assert_eq!(c.num_sp(), 1);
        assert_eq!(c.num_mp(), 0);
        assert!(c.sp(ConstraintTag(3)).is_none());
        assert!(c.is_sp_constrained(NodeTag(2)));
    }

    #[test]
    fn test_duplicate_mp() {
        let mut c = ConstraintContainer::new();
        let mp: MultiFreedom =
            MultiFreedomConstraint::equal_dof(ConstraintTag(1), NodeTag(1), NodeTag(2), vec![0])
                .unwrap()
                .into();
        c.add_mp(mp.clone()).unwrap();
        assert!(matches!(
            c.add_mp(mp),
            Err(FemError::DuplicateTag {
                registry: Registry::MultiFreedom,
                ..
            })
        ));
    }
}
