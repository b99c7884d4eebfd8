//! Checkpointing an analysed domain and restoring it elsewhere.

use approx::assert_relative_eq;
use fem_analysis::{AnalysisModel, ArcLength, StaticAnalysis};
use fem_constraint::MultiFreedomConstraint;
use fem_domain::{Domain, Node, Truss};
use fem_types::channel::MemoryChannel;
use fem_types::{
    AnalysisConfig, ArcLengthConfig, ArcLengthStrategy, ConstraintTag, ConvergenceConfig,
    ElementTag, NodeTag, Numberer,
};

use crate::common::{fix, load, von_mises_truss};

fn assert_same_nodes(a: &Domain, b: &Domain) {
    assert_eq!(a.mesh().node_tags(), b.mesh().node_tags());
    for tag in a.mesh().node_tags() {
        let (x, y) = (a.node(tag).unwrap(), b.node(tag).unwrap());
        assert_relative_eq!(x.trial_disp(), y.trial_disp());
        assert_relative_eq!(x.committed_disp(), y.committed_disp());
    }
    assert_eq!(a.commit_tag(), b.commit_tag());
    assert_eq!(a.committed_time(), b.committed_time());
    assert_eq!(a.current_time(), b.current_time());
}

fn support_reactions(domain: &mut Domain) -> Vec<f64> {
    // applied nodal loads are rebuilt by the next apply_load, so only the
    // unloaded supports are compared
    domain.calculate_nodal_reactions(false, f64::INFINITY).unwrap();
    [1, 3]
        .into_iter()
        .flat_map(|t| domain.node(NodeTag(t)).unwrap().reaction().as_slice().to_vec())
        .collect()
}

#[test]
fn checkpoint_restores_arc_length_state() {
    let mut sender = von_mises_truss(0.1, 1000.0);
    let integrator =
        ArcLength::new(ArcLengthConfig::new(0.01, ArcLengthStrategy::Cylindrical)).unwrap();
    let config =
        AnalysisConfig::default().with_convergence(ConvergenceConfig::displacement(1e-10, 30));
    let mut analysis = StaticAnalysis::new(config, integrator).unwrap();
    analysis.analyze(&mut sender, 10).unwrap();

    let mut channel = MemoryChannel::new();
    let mut receiver = Domain::new();
    sender.send_self(3, sender.commit_tag(), &mut channel).unwrap();
    receiver.recv_self(3, sender.commit_tag(), &mut channel).unwrap();
    assert_eq!(channel.pending(), 0);
    assert_same_nodes(&sender, &receiver);
    assert_eq!(receiver.constraints().num_sp(), 5);
    assert_eq!(receiver.constraints().load_patterns().count(), 1);

    // element state follows the restored displacements
    let expected = support_reactions(&mut sender);
    let restored = support_reactions(&mut receiver);
    for (a, b) in expected.iter().zip(&restored) {
        assert_relative_eq!(a, b, epsilon = 1e-10);
    }

    // both sides number the restored topology the same way
    let numbered = AnalysisModel::build(&mut receiver, Numberer::Plain).unwrap();
    assert_eq!(numbered.num_eqn(), analysis.model().unwrap().num_eqn());
    assert_eq!(numbered.equation(NodeTag(2), 1), Some(0));

    // later checkpoints of the same topology carry state only
    analysis.analyze(&mut sender, 5).unwrap();
    let tag = sender.commit_tag();
    sender.send_self(3, tag, &mut channel).unwrap();
    assert_eq!(channel.pending(), 3);
    receiver.recv_self(3, tag, &mut channel).unwrap();
    assert_same_nodes(&sender, &receiver);
    assert_eq!(receiver.commit_tag(), 15);
}

#[test]
fn checkpoint_keeps_multi_freedom_constraints() {
    let mut sender = Domain::new();
    for (tag, x) in [(1, 0.0), (2, 1.0), (3, 1.0), (4, 2.0)] {
        sender.add_node(Node::new(NodeTag(tag), &[x, 0.0], 2).unwrap()).unwrap();
    }
    for (tag, a, b) in [(1, 1, 2), (2, 3, 4)] {
        sender
            .add_element(Truss::new(ElementTag(tag), [NodeTag(a), NodeTag(b)], 1.0, 10.0).unwrap())
            .unwrap();
    }
    fix(&mut sender, 1, &[(1, 0), (1, 1), (2, 1), (4, 1)]);
    sender
        .add_mp(
            MultiFreedomConstraint::equal_dof(ConstraintTag(1), NodeTag(2), NodeTag(3), vec![0, 1])
                .unwrap(),
        )
        .unwrap();
    load(&mut sender, 4, vec![5.0, 0.0]);

    let integrator =
        ArcLength::new(ArcLengthConfig::new(0.1, ArcLengthStrategy::NormalPlane)).unwrap();
    let mut analysis = StaticAnalysis::new(AnalysisConfig::default(), integrator).unwrap();
    analysis.analyze(&mut sender, 2).unwrap();
    // the tied node follows its retained node
    let retained = sender.node(NodeTag(2)).unwrap().committed_disp()[0];
    assert_relative_eq!(sender.node(NodeTag(3)).unwrap().committed_disp()[0], retained);

    let mut channel = MemoryChannel::new();
    let mut receiver = Domain::new();
    sender.send_self(1, 0, &mut channel).unwrap();
    receiver.recv_self(1, 0, &mut channel).unwrap();
    assert_same_nodes(&sender, &receiver);
    assert_eq!(receiver.constraints(), sender.constraints());
    assert_eq!(receiver.constraints().num_mp(), 1);
}
