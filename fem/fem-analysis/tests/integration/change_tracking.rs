//! Change stamps seen from the analysis side: renumbering, graph caches and
//! reference load refresh.

use approx::assert_relative_eq;
use fem_analysis::{ArcLength, LoadControl, StaticAnalysis};
use fem_domain::{Node, Truss};
use fem_types::{
    AnalysisConfig, ArcLengthConfig, ArcLengthStrategy, ConstraintTag, ConvergenceConfig,
    ElementTag, LoadControlConfig, NodeTag, Numberer,
};

use crate::common::{fix, fixed_end_bar, von_mises_load, von_mises_truss};

#[test]
fn steps_do_not_move_the_stamp() {
    let mut domain = fixed_end_bar(10.0);
    let integrator = LoadControl::new(LoadControlConfig::fixed(0.5)).unwrap();
    let mut analysis = StaticAnalysis::new(AnalysisConfig::default(), integrator).unwrap();

    analysis.step(&mut domain).unwrap();
    let stamp = domain.stamp();
    assert_eq!(domain.has_domain_changed(), stamp);
    assert_eq!(domain.has_domain_changed(), stamp);

    analysis.analyze(&mut domain, 3).unwrap();
    assert_eq!(domain.has_domain_changed(), stamp);
    assert_eq!(analysis.model().unwrap().stamp(), stamp);
}

#[test]
fn added_bay_is_renumbered_and_graph_rebuilt() {
    let mut domain = fixed_end_bar(10.0);
    let integrator = LoadControl::new(LoadControlConfig::fixed(0.5)).unwrap();
    let config = AnalysisConfig::default().with_numberer(Numberer::ReverseCuthillMcKee);
    let mut analysis = StaticAnalysis::new(config, integrator).unwrap();

    analysis.step(&mut domain).unwrap();
    let first = domain.stamp();
    assert_eq!(analysis.model().unwrap().num_eqn(), 1);
    assert!(domain.mesh().graphs_built().1);
    assert_eq!(domain.node_graph().num_vertices(), 2);

    domain.add_node(Node::new(NodeTag(3), &[4.0, 0.0], 2).unwrap()).unwrap();
    domain
        .add_element(Truss::new(ElementTag(2), [NodeTag(2), NodeTag(3)], 1.0, 8.0).unwrap())
        .unwrap();
    fix(&mut domain, 10, &[(3, 1)]);
    assert!(domain.is_change_pending());

    analysis.step(&mut domain).unwrap();
    assert!(domain.stamp() > first);
    let model = analysis.model().unwrap();
    assert_eq!(model.stamp(), domain.stamp());
    assert_eq!(model.num_eqn(), 2);
    assert!(model.equation(NodeTag(3), 0).is_some());
    assert!(model.equation(NodeTag(3), 1).is_none());

    let graph = domain.node_graph();
    assert_eq!(graph.num_vertices(), 3);
    assert_eq!(graph.num_edges(), 2);
}

#[test]
fn released_support_refreshes_arc_length_reference_load() {
    const RISE: f64 = 0.1;
    const RIGIDITY: f64 = 1000.0;
    let mut domain = von_mises_truss(RISE, RIGIDITY);
    let integrator =
        ArcLength::new(ArcLengthConfig::new(0.01, ArcLengthStrategy::Cylindrical)).unwrap();
    let config =
        AnalysisConfig::default().with_convergence(ConvergenceConfig::displacement(1e-10, 30));
    let mut analysis = StaticAnalysis::new(config, integrator).unwrap();

    analysis.analyze(&mut domain, 5).unwrap();
    assert_eq!(analysis.integrator().reference_load().len(), 1);

    // release the horizontal guide at the apex
    domain.remove_sp(ConstraintTag(5)).unwrap();
    let reports = analysis.analyze(&mut domain, 5).unwrap();
    assert_eq!(analysis.model().unwrap().num_eqn(), 2);
    assert_eq!(analysis.integrator().reference_load().len(), 2);

    let apex = domain.node(NodeTag(2)).unwrap().committed_disp().clone();
    // the symmetric load keeps the apex on the axis
    assert_relative_eq!(apex[0], 0.0, epsilon = 1e-12);
    assert_relative_eq!(
        reports[4].load_factor,
        von_mises_load(RISE, RIGIDITY, -apex[1]),
        epsilon = 1e-6
    );
}
