//! Fixed-end bar reaction and load pattern removal.

use fem_analysis::{LoadControl, StaticAnalysis};
use fem_constraint::SingleFreedomConstraint;
use fem_domain::{LoadPattern, TimeSeries};
use fem_types::{
    AnalysisConfig, ConstraintTag, ConvergenceConfig, FemError, LoadControlConfig, NodeTag,
    PatternTag,
};

use crate::common::fixed_end_bar;

fn one_step_analysis(config: ConvergenceConfig) -> StaticAnalysis<LoadControl> {
    let integrator = LoadControl::new(LoadControlConfig::fixed(1.0)).unwrap();
    StaticAnalysis::new(AnalysisConfig::default().with_convergence(config), integrator).unwrap()
}

#[test]
fn fixed_end_reaction_balances_applied_load() {
    let mut domain = fixed_end_bar(100.0);
    let mut analysis = one_step_analysis(ConvergenceConfig::displacement(1e-10, 10));

    let report = analysis.step(&mut domain).unwrap();
    assert_eq!(report.load_factor, 1.0);
    assert_eq!(domain.commit_tag(), 1);
    assert_eq!(domain.node(NodeTag(2)).unwrap().committed_disp()[0], 25.0);

    domain.calculate_nodal_reactions(false, 1e-10).unwrap();
    let reaction = domain.node(NodeTag(1)).unwrap().reaction();
    assert_eq!(reaction[0], -100.0);
    assert_eq!(reaction[1], 0.0);
}

#[test]
fn fixed_end_reaction_with_unbalance_test() {
    let mut domain = fixed_end_bar(100.0);
    let mut analysis = one_step_analysis(ConvergenceConfig::unbalance(1e-10, 10));
    let report = analysis.step(&mut domain).unwrap();
    assert_eq!(report.iterations, 1);

    domain.calculate_nodal_reactions(false, 1e-10).unwrap();
    assert_eq!(domain.node(NodeTag(1)).unwrap().reaction()[0], -100.0);
}

#[test]
fn unloaded_mesh_passes_equilibrium_check() {
    let mut domain = fixed_end_bar(0.0);
    domain.calculate_nodal_reactions(false, 1e-12).unwrap();
    for tag in [1, 2] {
        assert!(domain.node(NodeTag(tag)).unwrap().reaction().iter().all(|r| *r == 0.0));
    }
}

#[test]
fn removing_pattern_purges_its_constraint() {
    let mut domain = fixed_end_bar(100.0);
    let mut pattern = LoadPattern::new(PatternTag(7), TimeSeries::default());
    pattern = pattern.with_scale(2.0);
    domain.add_load_pattern(pattern).unwrap();
    domain
        .add_sp_to_pattern(
            PatternTag(7),
            SingleFreedomConstraint::fixed(ConstraintTag(70), NodeTag(2), 0),
        )
        .unwrap();

    let mut analysis = one_step_analysis(ConvergenceConfig::displacement(1e-10, 10));
    analysis.step(&mut domain).unwrap();
    // the pattern constraint holds node 2 in place
    assert_eq!(analysis.model().unwrap().num_eqn(), 0);
    let before = domain.stamp();
    assert!(!domain.is_change_pending());

    let removed = domain.remove_load_pattern(PatternTag(7)).unwrap();
    assert_eq!(removed.purged_constraints, 1);
    assert_eq!(removed.item.num_constraints(), 1);
    assert!(domain.has_domain_changed() > before);
    assert_eq!(domain.constraints().num_sp(), 3);

    // the next step renumbers with the DOF released
    analysis.step(&mut domain).unwrap();
    assert_eq!(analysis.model().unwrap().num_eqn(), 1);
}

#[test]
fn removing_unknown_pattern_is_a_config_error() {
    let mut domain = fixed_end_bar(1.0);
    domain.has_domain_changed();
    let stamp = domain.stamp();
    let err = domain.remove_load_pattern(PatternTag(99)).unwrap_err();
    assert!(err.is_config_error());
    assert!(matches!(err, FemError::NotFound { .. }));
    assert_eq!(domain.has_domain_changed(), stamp);
}
