//! Problem specifications.
//!
//! Each `build_*` function loops over the reference model and calls the
//! formulation-agnostic [`templates`](crate::templates); it never branches on
//! the formulation itself. [`run_model`] ties a specification, a
//! formulation and an oracle together.

use gridopt_core::{BusType, GridError, GridResult, NetworkData};
use tracing::{debug, info};
use web_time::Instant;

use crate::formulation::{Family, Formulation};
use crate::model::GenericModel;
use crate::oracle::SolveOracle;
use crate::result::SolveResult;
use crate::settings::Settings;
use crate::templates as t;

/// A problem specification.
pub type ProblemBuilder = fn(&mut GenericModel) -> GridResult<()>;

/// Optimal power flow.
pub fn build_opf(model: &mut GenericModel) -> GridResult<()> {
    t::variable_voltage(model)?;
    t::variable_generation(model)?;
    t::variable_branch_flow(model)?;
    t::variable_dcline_flow(model)?;

    t::objective_min_fuel_cost(model)?;

    t::constraint_voltage(model)?;
    let reference = model.shared_reference();
    for i in &reference.ref_buses {
        t::constraint_theta_ref(model, *i)?;
    }
    for i in reference.bus.keys() {
        t::constraint_kcl_shunt(model, *i)?;
    }
    for l in reference.branch.keys() {
        t::constraint_ohms_yt_from(model, *l)?;
        t::constraint_ohms_yt_to(model, *l)?;
        t::constraint_voltage_angle_difference(model, *l)?;
        t::constraint_thermal_limits(model, *l)?;
    }
    for l in reference.dcline.keys() {
        t::constraint_dcline(model, *l)?;
    }
    Ok(())
}

/// Optimal power flow in branch-flow form.
pub fn build_opf_bf(model: &mut GenericModel) -> GridResult<()> {
    if model.family() != Family::BranchFlow {
        return Err(GridError::unsupported("opf_bf", model.formulation().name()));
    }
    t::variable_voltage(model)?;
    t::variable_generation(model)?;
    t::variable_branch_flow(model)?;
    t::variable_branch_current(model)?;
    t::variable_dcline_flow(model)?;

    t::objective_min_fuel_cost(model)?;

    t::constraint_voltage(model)?;
    let reference = model.shared_reference();
    for i in &reference.ref_buses {
        t::constraint_theta_ref(model, *i)?;
    }
    for i in reference.bus.keys() {
        t::constraint_kcl_shunt(model, *i)?;
    }
    for l in reference.branch.keys() {
        t::constraint_flow_losses(model, *l)?;
        t::constraint_voltage_magnitude_difference(model, *l)?;
        t::constraint_branch_current(model, *l)?;
        t::constraint_voltage_angle_difference(model, *l)?;
        t::constraint_thermal_limits(model, *l)?;
    }
    for l in reference.dcline.keys() {
        t::constraint_dcline(model, *l)?;
    }
    Ok(())
}

/// Power flow: operating limits are dropped and the degrees of freedom are
/// fixed by setpoints.
///
/// - reference buses: angle and magnitude;
/// - PV buses: magnitude plus the active output of their generators;
/// - generators on PQ buses: active and reactive output.
pub fn build_pf(model: &mut GenericModel) -> GridResult<()> {
    model.set_bounded(false);
    t::variable_voltage(model)?;
    t::variable_generation(model)?;
    t::variable_branch_flow(model)?;
    t::variable_dcline_flow(model)?;

    t::constraint_voltage(model)?;
    let reference = model.shared_reference();
    for i in &reference.ref_buses {
        t::constraint_theta_ref(model, *i)?;
        t::constraint_voltage_magnitude_setpoint(model, *i)?;
    }
    for (i, bus) in &reference.bus {
        t::constraint_kcl_shunt(model, *i)?;
        let gens = reference.bus_gens.get(i).map(Vec::as_slice).unwrap_or_default();
        if gens.is_empty() || bus.bus_type == BusType::Reference {
            continue;
        }
        if bus.bus_type == BusType::Pv {
            t::constraint_voltage_magnitude_setpoint(model, *i)?;
            for g in gens {
                t::constraint_active_gen_setpoint(model, *g)?;
            }
        } else {
            for g in gens {
                t::constraint_active_gen_setpoint(model, *g)?;
                t::constraint_reactive_gen_setpoint(model, *g)?;
            }
        }
    }
    for l in reference.branch.keys() {
        t::constraint_ohms_yt_from(model, *l)?;
        t::constraint_ohms_yt_to(model, *l)?;
    }
    for l in reference.dcline.keys() {
        t::constraint_active_dcline_setpoint(model, *l)?;
        t::constraint_dcline(model, *l)?;
    }
    Ok(())
}

/// Optimal transmission switching.
pub fn build_ots(model: &mut GenericModel) -> GridResult<()> {
    t::variable_branch_indicator(model)?;
    t::variable_voltage_on_off(model)?;
    t::variable_generation(model)?;
    t::variable_branch_flow(model)?;
    t::variable_dcline_flow(model)?;

    t::objective_min_fuel_cost(model)?;

    t::constraint_voltage_on_off(model)?;
    let reference = model.shared_reference();
    for i in &reference.ref_buses {
        t::constraint_theta_ref(model, *i)?;
    }
    for i in reference.bus.keys() {
        t::constraint_kcl_shunt(model, *i)?;
    }
    for l in reference.branch.keys() {
        t::constraint_ohms_yt_from_on_off(model, *l)?;
        t::constraint_ohms_yt_to_on_off(model, *l)?;
        t::constraint_voltage_angle_difference_on_off(model, *l)?;
        t::constraint_thermal_limits_on_off(model, *l)?;
    }
    for l in reference.dcline.keys() {
        t::constraint_dcline(model, *l)?;
    }
    Ok(())
}

/// Transmission network expansion planning over the `ne_branch` candidates.
pub fn build_tnep(model: &mut GenericModel) -> GridResult<()> {
    let reference = model.shared_reference();
    let Some(ne) = reference.ne.as_ref() else {
        return Err(GridError::data(
            "network",
            &reference.name,
            "expansion planning needs ne_branch records",
        ));
    };

    t::variable_branch_ne(model)?;
    t::variable_voltage(model)?;
    t::variable_voltage_ne(model)?;
    t::variable_generation(model)?;
    t::variable_branch_flow(model)?;
    t::variable_branch_flow_ne(model)?;
    t::variable_dcline_flow(model)?;

    t::objective_tnep_cost(model)?;

    t::constraint_voltage(model)?;
    for i in &reference.ref_buses {
        t::constraint_theta_ref(model, *i)?;
    }
    for i in reference.bus.keys() {
        t::constraint_kcl_shunt_ne(model, *i)?;
    }
    for l in reference.branch.keys() {
        t::constraint_ohms_yt_from(model, *l)?;
        t::constraint_ohms_yt_to(model, *l)?;
        t::constraint_voltage_angle_difference(model, *l)?;
        t::constraint_thermal_limits(model, *l)?;
    }
    for l in ne.branch.keys() {
        t::constraint_ohms_yt_from_ne(model, *l)?;
        t::constraint_ohms_yt_to_ne(model, *l)?;
        t::constraint_voltage_angle_difference_ne(model, *l)?;
        t::constraint_thermal_limits_ne(model, *l)?;
    }
    for l in reference.dcline.keys() {
        t::constraint_dcline(model, *l)?;
    }
    Ok(())
}

/// Build the reference model and apply `builder` under `formulation`.
pub fn instantiate_model(
    data: &NetworkData,
    formulation: Formulation,
    builder: ProblemBuilder,
) -> GridResult<GenericModel> {
    let start = Instant::now();
    let mut model = GenericModel::from_data(data, formulation)?;
    builder(&mut model)?;
    debug!(
        formulation = %model.formulation(),
        variables = model.program().num_variables(),
        constraints = model.program().num_constraints(),
        class = %model.program().problem_class(),
        build_time = start.elapsed().as_secs_f64(),
        "model instantiated"
    );
    Ok(model)
}

/// Build `builder` under `formulation` and solve it with `oracle`.
///
/// Construction errors and an oracle that cannot attempt the program are
/// `Err`; any solve outcome, including infeasibility, is an `Ok` result
/// whose status tells what happened.
pub fn run_model(
    data: &NetworkData,
    formulation: Formulation,
    builder: ProblemBuilder,
    oracle: &dyn SolveOracle,
    settings: &Settings,
) -> GridResult<SolveResult> {
    let model = instantiate_model(data, formulation, builder)?;
    let output = oracle.solve(model.program(), &settings.solver)?;
    let result = SolveResult::from_output(oracle.id(), &model, &output, &settings.output);
    info!(
        case = %result.case_summary.name,
        formulation = %model.formulation(),
        solver = oracle.id(),
        status = %result.status,
        objective = result.objective,
        solve_time = result.solve_time,
        "solve finished"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::names;
    use crate::model::Extension;
    use gridopt_core::{Branch, Bus, Gen, Load};

    fn case() -> NetworkData {
        NetworkData::new("pf")
            .with_bus(Bus {
                index: 1,
                bus_type: BusType::Reference,
                ..Bus::default()
            })
            .with_bus(Bus {
                index: 2,
                bus_type: BusType::Pv,
                vm: 1.02,
                ..Bus::default()
            })
            .with_bus(Bus {
                index: 3,
                ..Bus::default()
            })
            .with_gen(Gen {
                index: 1,
                gen_bus: 1,
                pmax: 2.0,
                ..Gen::default()
            })
            .with_gen(Gen {
                index: 2,
                gen_bus: 2,
                pg: 0.3,
                pmax: 1.0,
                ..Gen::default()
            })
            .with_gen(Gen {
                index: 3,
                gen_bus: 3,
                pg: 0.1,
                qg: 0.05,
                pmax: 1.0,
                ..Gen::default()
            })
            .with_load(Load {
                index: 1,
                load_bus: 3,
                pd: 0.6,
                ..Load::default()
            })
            .with_branch(Branch {
                index: 1,
                f_bus: 1,
                t_bus: 2,
                rate_a: Some(1.0),
                ..Branch::default()
            })
            .with_branch(Branch {
                index: 2,
                f_bus: 2,
                t_bus: 3,
                rate_a: Some(1.0),
                ..Branch::default()
            })
    }

    fn applied(model: &GenericModel, name: &str) -> usize {
        model
            .applied()
            .iter()
            .filter(|a| a.extension == Extension::Constraint && a.name == name)
            .count()
    }

    #[test]
    fn test_pf_setpoints_follow_bus_types() {
        let model = instantiate_model(&case(), Formulation::acp(), build_pf).unwrap();
        assert!(!model.bounded());
        // reference bus and the PV bus
        assert_eq!(applied(&model, names::VOLTAGE_MAGNITUDE_SETPOINT), 2);
        // PV gen 2 and PQ gen 3
        assert_eq!(applied(&model, names::ACTIVE_GEN_SETPOINT), 2);
        assert_eq!(applied(&model, names::REACTIVE_GEN_SETPOINT), 1);
        let pg = model.var("pg", crate::model::VarIndex::Gen(1)).unwrap();
        assert_eq!(model.program().bounds(pg), (f64::NEG_INFINITY, f64::INFINITY));
    }

    #[test]
    fn test_dc_pf_reactive_setpoint_is_noop() {
        let model = instantiate_model(&case(), Formulation::dcp(), build_pf).unwrap();
        let entry = model
            .applied()
            .iter()
            .find(|a| a.name == names::REACTIVE_GEN_SETPOINT)
            .unwrap();
        assert!(entry.noop.is_some());
        assert!(!model.has_var_group("qg"));
    }

    #[test]
    fn test_opf_bf_requires_branch_flow_family() {
        let err = instantiate_model(&case(), Formulation::socwr(), build_opf_bf).unwrap_err();
        assert!(matches!(err, GridError::UnsupportedFormulation { .. }));
        assert!(instantiate_model(&case(), Formulation::socbf(), build_opf_bf).is_ok());
    }

    #[test]
    fn test_tnep_without_candidates_is_data_error() {
        let err = instantiate_model(&case(), Formulation::dcp(), build_tnep).unwrap_err();
        assert!(matches!(err, GridError::DataInconsistency { .. }));
    }

    #[test]
    fn test_ots_under_wr_is_unsupported() {
        let err = instantiate_model(&case(), Formulation::socwr(), build_ots).unwrap_err();
        assert!(matches!(err, GridError::UnsupportedFormulation { .. }));
    }

    #[test]
    fn test_opf_builds_under_every_bus_injection_builtin() {
        for f in Formulation::builtin() {
            if f.family() == Family::BranchFlow {
                let err = instantiate_model(&case(), f, build_opf).unwrap_err();
                assert!(matches!(err, GridError::UnsupportedFormulation { .. }));
                continue;
            }
            let model = instantiate_model(&case(), f.clone(), build_opf)
                .unwrap_or_else(|e| panic!("{f}: {e}"));
            assert!(model.program().num_constraints() > 0, "{f}");
        }
    }
}
