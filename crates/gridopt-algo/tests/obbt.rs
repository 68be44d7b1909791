//! Bound tightening, mostly driven by a scripted oracle.

mod common;

use common::ShrinkingOracle;
use gridopt_algo::{
    run_obbt, ClarabelOracle, Formulation, ObbtTermination, Settings, TerminationCriterion,
};
use gridopt_core::GridError;

fn settings() -> Settings {
    common::init_tracing();
    let mut settings = Settings::default();
    settings.obbt.max_iter = 3;
    settings
}

#[test]
fn invalid_settings_fail_before_any_solve() {
    let data = common::three_bus();
    let oracle = ShrinkingOracle::new(0.1);
    let mut settings = settings();
    settings.obbt.upper_bound_constraint = true;
    settings.obbt.upper_bound = None;

    let err = run_obbt(&data, &oracle, &settings).unwrap_err();
    assert!(matches!(err, GridError::Config(_)));
    assert_eq!(oracle.calls(), 0);
}

#[test]
fn relaxation_without_targets_is_unsupported() {
    let data = common::three_bus();
    let mut settings = settings();
    settings.obbt.model = Formulation::dcp();
    let err = run_obbt(&data, &ShrinkingOracle::new(0.1), &settings).unwrap_err();
    assert!(matches!(err, GridError::UnsupportedFormulation { .. }));
}

#[test]
fn bounds_shrink_monotonically_until_max_iter() {
    let data = common::three_bus();
    let out = run_obbt(&data, &ShrinkingOracle::new(0.1), &settings()).unwrap();
    let stats = &out.stats;

    assert_eq!(stats.termination, ObbtTermination::MaxIter);
    assert_eq!(stats.iteration_count, 3);
    assert_eq!(stats.pass_times.len(), 3);
    assert_eq!(stats.failed_solves, 0);
    assert_eq!(stats.initial_relaxation_objective, 100.0);

    // 3 buses and 2 bus pairs
    assert_eq!(stats.widths.len(), 5);
    for w in &stats.widths {
        assert!(w.final_.0 >= w.initial.0 && w.final_.1 <= w.initial.1, "{w:?}");
        assert!(w.final_.0 <= w.final_.1);
    }
    assert!(stats.vm_range_final < stats.vm_range_init);
    assert!(stats.td_range_final < stats.td_range_init);
    assert!((stats.vm_range_init - 0.6).abs() < 1e-9);
    assert!((stats.avg_vm_range_init - 0.2).abs() < 1e-9);

    for bus in out.data.bus.values() {
        assert!(bus.vmin > 0.9 && bus.vmax < 1.1);
    }
    for branch in out.data.branch.values() {
        assert!(branch.angmin > -std::f64::consts::FRAC_PI_3);
        assert!(branch.angmax < std::f64::consts::FRAC_PI_3);
    }
    // input data is left untouched
    assert_eq!(data.bus["2"].vmin, 0.9);
}

#[test]
fn tightened_bounds_are_rounded_outward() {
    let data = common::three_bus();
    let mut settings = settings();
    settings.obbt.max_iter = 1;
    settings.obbt.precision = 2;
    let out = run_obbt(&data, &ShrinkingOracle::new(0.1), &settings).unwrap();
    // 0.9 + 0.02 and 1.1 - 0.02 survive two-digit rounding
    let bus = &out.data.bus["1"];
    assert!((bus.vmin - 0.92).abs() < 1e-9);
    assert!((bus.vmax - 1.08).abs() < 1e-9);
    // pi/3 - 0.2094 = 0.8378 widens to 0.84
    let branch = &out.data.branch["1"];
    assert!((branch.angmax - 0.84).abs() < 1e-9);
    assert!((branch.angmin + 0.84).abs() < 1e-9);
}

#[test]
fn loose_improvement_tolerance_converges_after_one_pass() {
    let data = common::three_bus();
    let mut settings = settings();
    settings.obbt.improvement_tol = 1.0;
    settings.obbt.termination = TerminationCriterion::Max;
    let out = run_obbt(&data, &ShrinkingOracle::new(0.1), &settings).unwrap();
    assert_eq!(out.stats.termination, ObbtTermination::Converged);
    assert_eq!(out.stats.iteration_count, 1);
}

#[test]
fn failed_sub_solves_keep_bounds_and_are_counted() {
    let data = common::three_bus();
    let out = run_obbt(&data, &ShrinkingOracle::failing(), &settings()).unwrap();
    assert_eq!(out.stats.failed_solves, 10);
    assert_eq!(out.stats.termination, ObbtTermination::Converged);
    assert_eq!(out.stats.vm_range_final, out.stats.vm_range_init);
    assert_eq!(out.data.bus["3"].vmin, 0.9);
}

#[test]
fn relative_gap_to_upper_bound_stops_first() {
    let data = common::three_bus();
    let mut settings = settings();
    settings.obbt.upper_bound = Some(100.5);
    settings.obbt.rel_gap_tol = 0.01;
    let out = run_obbt(&data, &ShrinkingOracle::new(0.1), &settings).unwrap();
    assert_eq!(out.stats.termination, ObbtTermination::RelGap);
    assert_eq!(out.stats.iteration_count, 1);
    let gap = out.stats.final_rel_gap_from_ub.unwrap();
    assert!((gap - 0.5 / 100.5).abs() < 1e-12);
}

#[test]
fn narrow_targets_are_skipped() {
    let mut data = common::three_bus();
    for bus in data.bus.values_mut() {
        bus.vmin = 0.999;
        bus.vmax = 1.001;
    }
    let mut settings = settings();
    settings.obbt.max_iter = 1;
    let oracle = ShrinkingOracle::new(0.1);
    let out = run_obbt(&data, &oracle, &settings).unwrap();
    // two relaxation solves plus min/max for the two bus pairs only
    assert_eq!(oracle.calls(), 2 + 4);
    assert_eq!(out.data.bus["1"].vmin, 0.999);
}

#[test]
fn stats_serialize_with_termination_name() {
    let data = common::three_bus();
    let mut settings = settings();
    settings.obbt.max_iter = 1;
    let out = run_obbt(&data, &ShrinkingOracle::new(0.1), &settings).unwrap();
    let json: serde_json::Value = serde_json::from_str(&out.stats.to_json_string().unwrap()).unwrap();
    assert_eq!(json["termination"], "MAX_ITER");
    assert_eq!(json["widths"][0]["target"], "vm[1]");
    assert!(json["widths"][0].get("final").is_some());
}

#[test]
fn upper_bound_alone_does_not_stop_the_loop() {
    let data = common::three_bus();
    let mut settings = settings();
    settings.obbt.upper_bound = Some(1000.0);
    settings.obbt.upper_bound_constraint = true;
    let out = run_obbt(&data, &ShrinkingOracle::new(0.1), &settings).unwrap();
    assert_eq!(out.stats.termination, ObbtTermination::MaxIter);
    assert_eq!(out.stats.iteration_count, 3);
    let gap = out.stats.final_rel_gap_from_ub.unwrap();
    assert!((gap - 0.9).abs() < 1e-12);
}

#[test]
fn qcwr_tightening_with_clarabel() {
    let data = common::three_bus();
    let out = run_obbt(&data, &ClarabelOracle::new(), &settings()).unwrap();
    let stats = &out.stats;

    assert!(
        matches!(
            stats.termination,
            ObbtTermination::MaxIter | ObbtTermination::Converged
        ),
        "{}",
        stats.termination
    );
    assert!(stats.initial_relaxation_objective.is_finite());
    // a smaller feasible set cannot lower the relaxation bound
    let slack = 1e-4 * stats.initial_relaxation_objective.abs();
    assert!(stats.final_relaxation_objective >= stats.initial_relaxation_objective - slack);
    for w in &stats.widths {
        assert!(w.final_.0 >= w.initial.0 && w.final_.1 <= w.initial.1, "{w:?}");
        assert!(w.final_.0 <= w.final_.1, "{w:?}");
    }
    assert!(stats.td_range_final < stats.td_range_init);
    let pair = stats.widths.iter().find(|w| w.target == "td[1,2]").unwrap();
    assert!(pair.final_.1 - pair.final_.0 < pair.initial.1 - pair.initial.0);

    // both branches carry power away from the generator bus
    assert_eq!(stats.vad_sign_determined, 2);
    for branch in out.data.branch.values() {
        assert!(branch.angmin > 0.0, "{branch:?}");
    }
}
