//! Arc-length tracing of the von Mises truss through its limit point.

use approx::assert_relative_eq;
use fem_analysis::{ArcLength, StaticAnalysis};
use fem_types::{
    AnalysisConfig, ArcLengthConfig, ArcLengthStrategy, ConvergenceConfig, LocalControl, NodeTag,
};

use crate::common::{von_mises_load, von_mises_truss};

const RISE: f64 = 0.1;
const RIGIDITY: f64 = 1000.0;

fn analysis(strategy: ArcLengthStrategy, arc_length: f64) -> StaticAnalysis<ArcLength> {
    let integrator = ArcLength::new(ArcLengthConfig::new(arc_length, strategy)).unwrap();
    let config =
        AnalysisConfig::default().with_convergence(ConvergenceConfig::displacement(1e-10, 30));
    StaticAnalysis::new(config, integrator).unwrap()
}

fn apex_deflection(domain: &fem_domain::Domain) -> f64 {
    -domain.node(NodeTag(2)).unwrap().committed_disp()[1]
}

#[test]
fn cylindrical_rule_passes_limit_point() {
    let mut domain = von_mises_truss(RISE, RIGIDITY);
    let mut analysis = analysis(ArcLengthStrategy::Cylindrical, 0.01);

    let mut peak: f64 = 0.0;
    for _ in 0..60 {
        let report = analysis.step(&mut domain).unwrap();
        // every converged step covers exactly the configured arc length
        assert_relative_eq!(analysis.integrator().step_norm(), 0.01, epsilon = 1e-8);
        // and lies on the analytical equilibrium path
        let w = apex_deflection(&domain);
        assert_relative_eq!(
            report.load_factor,
            von_mises_load(RISE, RIGIDITY, w),
            epsilon = 1e-6
        );
        peak = peak.max(report.load_factor);
    }

    let w = apex_deflection(&domain);
    assert!(w > RISE * (1.0 - 1.0 / 3.0_f64.sqrt()), "apex stopped before the limit point");
    assert!(domain.committed_time() < peak - 0.05, "load factor did not descend");
}

#[test]
fn modified_updated_normal_plane_keeps_radius() {
    let mut domain = von_mises_truss(RISE, RIGIDITY);
    let mut analysis = analysis(ArcLengthStrategy::ModifiedUpdatedNormalPlane, 0.01);
    let mut peak: f64 = 0.0;
    for _ in 0..60 {
        let report = analysis.step(&mut domain).unwrap();
        assert_relative_eq!(analysis.integrator().step_norm(), 0.01, epsilon = 1e-6);
        peak = peak.max(report.load_factor);
    }
    assert!(domain.committed_time() < peak - 0.05);
}

#[test]
fn every_rule_follows_the_rising_branch() {
    for strategy in ArcLengthStrategy::ALL {
        if strategy == ArcLengthStrategy::Local {
            continue;
        }
        let mut domain = von_mises_truss(RISE, RIGIDITY);
        let mut analysis = analysis(strategy, 0.01);
        let reports = analysis.analyze(&mut domain, 5).unwrap();
        let mut previous = 0.0;
        for report in reports {
            assert!(report.load_factor > previous, "{} did not load up", strategy.name());
            previous = report.load_factor;
        }
        let w = apex_deflection(&domain);
        assert_relative_eq!(
            domain.committed_time(),
            von_mises_load(RISE, RIGIDITY, w),
            epsilon = 1e-6
        );
    }
}

#[test]
fn local_rule_measures_control_dofs() {
    let config = ArcLengthConfig::new(0.01, ArcLengthStrategy::Local)
        .with_local_control(LocalControl::Dofs(vec![(NodeTag(2), 1)]));
    let integrator = ArcLength::new(config).unwrap();
    let convergence = ConvergenceConfig::displacement(1e-10, 30);
    let mut analysis =
        StaticAnalysis::new(AnalysisConfig::default().with_convergence(convergence), integrator)
            .unwrap();
    let mut domain = von_mises_truss(RISE, RIGIDITY);
    for _ in 0..5 {
        analysis.step(&mut domain).unwrap();
        // the apex is the only equation, so the control norm is the full norm
        let (du, dl) = analysis.integrator().step_increment();
        assert_relative_eq!(
            analysis.integrator().step_norm(),
            (du[0] * du[0] + dl * dl).sqrt(),
            epsilon = 1e-14
        );
        // the corrector stays on the predictor's normal plane, so the
        // converged step sits on or just outside the sphere
        assert!(analysis.integrator().step_norm() >= 0.01 - 1e-12);
        assert_relative_eq!(analysis.integrator().step_norm(), 0.01, epsilon = 1e-8);
    }
    let w = apex_deflection(&domain);
    assert_relative_eq!(domain.committed_time(), von_mises_load(RISE, RIGIDITY, w), epsilon = 1e-6);
}

#[test]
fn generalized_displacement_control_stays_on_path() {
    let mut domain = von_mises_truss(RISE, RIGIDITY);
    let mut analysis = analysis(ArcLengthStrategy::GeneralizedDisplacementControl, 0.01);
    let first = analysis.step(&mut domain).unwrap();
    let second = analysis.step(&mut domain).unwrap();
    // the path softens, so equal arcs buy less load
    assert!(second.load_factor - first.load_factor < first.load_factor);
    assert!(second.load_factor > first.load_factor);
    for _ in 0..8 {
        analysis.step(&mut domain).unwrap();
    }
    let w = apex_deflection(&domain);
    assert_relative_eq!(domain.committed_time(), von_mises_load(RISE, RIGIDITY, w), epsilon = 1e-6);
}
