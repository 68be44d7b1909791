//! Canonical network data dictionary.
//!
//! Every component class is a map from a string id to a typed record whose
//! field names follow the Matpower-derived per-unit schema:
//!
//! | Class       | Key fields                                              |
//! |-------------|---------------------------------------------------------|
//! | `bus`       | `bus_type`, `vmin`, `vmax`, `vm`, `va`, `base_kv`       |
//! | `gen`       | `gen_bus`, `pmin..pmax`, `qmin..qmax`, `cost`, `gen_status` |
//! | `branch`    | `f_bus`, `t_bus`, `br_r`, `br_x`, shunts, `rate_a`, `tap`, `shift`, `angmin`, `angmax` |
//! | `load`      | `load_bus`, `pd`, `qd`, `status`                        |
//! | `shunt`     | `shunt_bus`, `gs`, `bs`, `status`                       |
//! | `dcline`    | `f_bus`, `t_bus`, flow limits, `loss0`, `loss1`         |
//! | `ne_branch` | as `branch`, plus `construction_cost`                   |
//!
//! Parsers for Matpower/PSS/E files live outside this crate; anything that
//! can emit this schema as JSON can feed [`NetworkData::from_json_str`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cost::CostModel;
use crate::error::{GridError, GridResult};
use crate::solution::SolutionData;

/// Default angle-difference bound (60 degrees) used when a branch has none.
pub const DEFAULT_ANGLE_DIFF: f64 = std::f64::consts::FRAC_PI_3;

/// String-keyed component table.
pub type ComponentMap<T> = BTreeMap<String, T>;

fn default_one() -> f64 {
    1.0
}

fn default_status() -> u8 {
    1
}

fn default_vmin() -> f64 {
    0.9
}

fn default_vmax() -> f64 {
    1.1
}

fn default_base_mva() -> f64 {
    100.0
}

fn default_angmin() -> f64 {
    -DEFAULT_ANGLE_DIFF
}

fn default_angmax() -> f64 {
    DEFAULT_ANGLE_DIFF
}

fn default_inf() -> f64 {
    f64::INFINITY
}

fn default_neg_inf() -> f64 {
    f64::NEG_INFINITY
}

/// Bus classification, serialized as the Matpower integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum BusType {
    #[default]
    Pq,
    Pv,
    Reference,
    Inactive,
}

impl TryFrom<u8> for BusType {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(BusType::Pq),
            2 => Ok(BusType::Pv),
            3 => Ok(BusType::Reference),
            4 => Ok(BusType::Inactive),
            other => Err(format!("invalid bus_type {other}, expected 1..=4")),
        }
    }
}

impl From<BusType> for u8 {
    fn from(kind: BusType) -> u8 {
        match kind {
            BusType::Pq => 1,
            BusType::Pv => 2,
            BusType::Reference => 3,
            BusType::Inactive => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bus {
    pub index: usize,
    #[serde(default)]
    pub bus_type: BusType,
    #[serde(default = "default_vmin")]
    pub vmin: f64,
    #[serde(default = "default_vmax")]
    pub vmax: f64,
    #[serde(default = "default_one")]
    pub vm: f64,
    #[serde(default)]
    pub va: f64,
    #[serde(default)]
    pub base_kv: f64,
}

impl Default for Bus {
    fn default() -> Self {
        Self {
            index: 0,
            bus_type: BusType::Pq,
            vmin: default_vmin(),
            vmax: default_vmax(),
            vm: 1.0,
            va: 0.0,
            base_kv: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gen {
    pub index: usize,
    pub gen_bus: usize,
    #[serde(default)]
    pub pg: f64,
    #[serde(default)]
    pub qg: f64,
    #[serde(default)]
    pub pmin: f64,
    #[serde(default = "default_inf")]
    pub pmax: f64,
    #[serde(default = "default_neg_inf")]
    pub qmin: f64,
    #[serde(default = "default_inf")]
    pub qmax: f64,
    #[serde(default = "default_one")]
    pub vg: f64,
    #[serde(default = "default_status")]
    pub gen_status: u8,
    /// 1 = piecewise linear, 2 = polynomial, 0 = no cost data.
    #[serde(default)]
    pub model: u8,
    #[serde(default)]
    pub ncost: usize,
    #[serde(default)]
    pub cost: Vec<f64>,
}

impl Default for Gen {
    fn default() -> Self {
        Self {
            index: 0,
            gen_bus: 0,
            pg: 0.0,
            qg: 0.0,
            pmin: 0.0,
            pmax: f64::INFINITY,
            qmin: f64::NEG_INFINITY,
            qmax: f64::INFINITY,
            vg: 1.0,
            gen_status: 1,
            model: 0,
            ncost: 0,
            cost: Vec::new(),
        }
    }
}

impl Gen {
    /// Convenience for tests and programmatic construction: polynomial cost
    /// given in ascending order `c0, c1, c2, ...`.
    pub fn with_polynomial_cost(mut self, ascending: &[f64]) -> Self {
        self.model = 2;
        self.ncost = ascending.len();
        self.cost = ascending.iter().rev().copied().collect();
        self
    }

    /// Decode `model`/`ncost`/`cost` into a [`CostModel`].
    pub fn cost_model(&self) -> GridResult<CostModel> {
        match self.model {
            0 => Ok(CostModel::NoCost),
            2 => {
                if self.cost.is_empty() {
                    return Ok(CostModel::NoCost);
                }
                Ok(CostModel::Polynomial(self.cost.iter().rev().copied().collect()))
            }
            1 => {
                if self.cost.len() % 2 != 0 || self.cost.len() < 4 {
                    return Err(GridError::data(
                        "gen",
                        self.index,
                        format!(
                            "piecewise cost needs at least two (p, cost) pairs, got {} values",
                            self.cost.len()
                        ),
                    ));
                }
                let points: Vec<(f64, f64)> =
                    self.cost.chunks(2).map(|c| (c[0], c[1])).collect();
                if points.windows(2).any(|w| w[1].0 < w[0].0) {
                    return Err(GridError::data(
                        "gen",
                        self.index,
                        "piecewise cost breakpoints must be non-decreasing",
                    ));
                }
                Ok(CostModel::PiecewiseLinear(points))
            }
            other => Err(GridError::data(
                "gen",
                self.index,
                format!("unknown cost model {other}"),
            )),
        }
    }

    pub fn is_active(&self) -> bool {
        self.gen_status != 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub index: usize,
    pub f_bus: usize,
    pub t_bus: usize,
    #[serde(default)]
    pub br_r: f64,
    pub br_x: f64,
    #[serde(default)]
    pub g_fr: f64,
    #[serde(default)]
    pub b_fr: f64,
    #[serde(default)]
    pub g_to: f64,
    #[serde(default)]
    pub b_to: f64,
    /// Long-term thermal rating; `None` means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_a: Option<f64>,
    #[serde(default = "default_one")]
    pub tap: f64,
    #[serde(default)]
    pub shift: f64,
    #[serde(default = "default_angmin")]
    pub angmin: f64,
    #[serde(default = "default_angmax")]
    pub angmax: f64,
    #[serde(default = "default_status")]
    pub br_status: u8,
    #[serde(default)]
    pub transformer: bool,
    /// Only meaningful for network-expansion candidates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub construction_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pf: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qf: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qt: Option<f64>,
    /// Expansion decision written back after a TNEP solve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built: Option<f64>,
}

impl Default for Branch {
    fn default() -> Self {
        Self {
            index: 0,
            f_bus: 0,
            t_bus: 0,
            br_r: 0.0,
            br_x: 0.1,
            g_fr: 0.0,
            b_fr: 0.0,
            g_to: 0.0,
            b_to: 0.0,
            rate_a: None,
            tap: 1.0,
            shift: 0.0,
            angmin: -DEFAULT_ANGLE_DIFF,
            angmax: DEFAULT_ANGLE_DIFF,
            br_status: 1,
            transformer: false,
            construction_cost: None,
            pf: None,
            qf: None,
            pt: None,
            qt: None,
            built: None,
        }
    }
}

impl Branch {
    pub fn is_active(&self) -> bool {
        self.br_status != 0
    }

    /// Series admittance `(g, b)` from `br_r + j br_x`.
    pub fn series_admittance(&self) -> (f64, f64) {
        let denom = self.br_r * self.br_r + self.br_x * self.br_x;
        if denom == 0.0 {
            return (0.0, 0.0);
        }
        (self.br_r / denom, -self.br_x / denom)
    }

    /// Complex tap ratio split into `(tr, ti)`.
    pub fn tap_components(&self) -> (f64, f64) {
        (self.tap * self.shift.cos(), self.tap * self.shift.sin())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Load {
    pub index: usize,
    pub load_bus: usize,
    #[serde(default)]
    pub pd: f64,
    #[serde(default)]
    pub qd: f64,
    #[serde(default = "default_status")]
    pub status: u8,
}

impl Default for Load {
    fn default() -> Self {
        Self {
            index: 0,
            load_bus: 0,
            pd: 0.0,
            qd: 0.0,
            status: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shunt {
    pub index: usize,
    pub shunt_bus: usize,
    #[serde(default)]
    pub gs: f64,
    #[serde(default)]
    pub bs: f64,
    #[serde(default = "default_status")]
    pub status: u8,
}

impl Default for Shunt {
    fn default() -> Self {
        Self {
            index: 0,
            shunt_bus: 0,
            gs: 0.0,
            bs: 0.0,
            status: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcLine {
    pub index: usize,
    pub f_bus: usize,
    pub t_bus: usize,
    #[serde(default = "default_status")]
    pub br_status: u8,
    #[serde(default)]
    pub pf: f64,
    #[serde(default)]
    pub pt: f64,
    #[serde(default)]
    pub qf: f64,
    #[serde(default)]
    pub qt: f64,
    #[serde(default = "default_one")]
    pub vf: f64,
    #[serde(default = "default_one")]
    pub vt: f64,
    #[serde(default = "default_neg_inf")]
    pub pminf: f64,
    #[serde(default = "default_inf")]
    pub pmaxf: f64,
    #[serde(default = "default_neg_inf")]
    pub pmint: f64,
    #[serde(default = "default_inf")]
    pub pmaxt: f64,
    #[serde(default = "default_neg_inf")]
    pub qminf: f64,
    #[serde(default = "default_inf")]
    pub qmaxf: f64,
    #[serde(default = "default_neg_inf")]
    pub qmint: f64,
    #[serde(default = "default_inf")]
    pub qmaxt: f64,
    #[serde(default)]
    pub loss0: f64,
    #[serde(default)]
    pub loss1: f64,
}

impl Default for DcLine {
    fn default() -> Self {
        Self {
            index: 0,
            f_bus: 0,
            t_bus: 0,
            br_status: 1,
            pf: 0.0,
            pt: 0.0,
            qf: 0.0,
            qt: 0.0,
            vf: 1.0,
            vt: 1.0,
            pminf: f64::NEG_INFINITY,
            pmaxf: f64::INFINITY,
            pmint: f64::NEG_INFINITY,
            pmaxt: f64::INFINITY,
            qminf: f64::NEG_INFINITY,
            qmaxf: f64::INFINITY,
            qmint: f64::NEG_INFINITY,
            qmaxt: f64::INFINITY,
            loss0: 0.0,
            loss1: 0.0,
        }
    }
}

impl DcLine {
    pub fn is_active(&self) -> bool {
        self.br_status != 0
    }
}

/// The canonical data dictionary for one network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkData {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "baseMVA", default = "default_base_mva")]
    pub base_mva: f64,
    #[serde(default)]
    pub bus: ComponentMap<Bus>,
    #[serde(default)]
    pub gen: ComponentMap<Gen>,
    #[serde(default)]
    pub branch: ComponentMap<Branch>,
    #[serde(default)]
    pub load: ComponentMap<Load>,
    #[serde(default)]
    pub shunt: ComponentMap<Shunt>,
    #[serde(default)]
    pub dcline: ComponentMap<DcLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ne_branch: Option<ComponentMap<Branch>>,
}

impl Default for NetworkData {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_mva: default_base_mva(),
            bus: ComponentMap::new(),
            gen: ComponentMap::new(),
            branch: ComponentMap::new(),
            load: ComponentMap::new(),
            shunt: ComponentMap::new(),
            dcline: ComponentMap::new(),
            ne_branch: None,
        }
    }
}

impl NetworkData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> GridResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> GridResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    // Builder-style insertion keyed by `index`.

    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus.insert(bus.index.to_string(), bus);
        self
    }

    pub fn with_gen(mut self, gen: Gen) -> Self {
        self.gen.insert(gen.index.to_string(), gen);
        self
    }

    pub fn with_branch(mut self, branch: Branch) -> Self {
        self.branch.insert(branch.index.to_string(), branch);
        self
    }

    pub fn with_load(mut self, load: Load) -> Self {
        self.load.insert(load.index.to_string(), load);
        self
    }

    pub fn with_shunt(mut self, shunt: Shunt) -> Self {
        self.shunt.insert(shunt.index.to_string(), shunt);
        self
    }

    pub fn with_dcline(mut self, dcline: DcLine) -> Self {
        self.dcline.insert(dcline.index.to_string(), dcline);
        self
    }

    pub fn with_ne_branch(mut self, branch: Branch) -> Self {
        self.ne_branch
            .get_or_insert_with(ComponentMap::new)
            .insert(branch.index.to_string(), branch);
        self
    }

    /// Look up a bus record by its numeric index.
    pub fn bus_by_index_mut(&mut self, index: usize) -> Option<&mut Bus> {
        self.bus.values_mut().find(|b| b.index == index)
    }

    /// Look up a branch record by its numeric index.
    pub fn branch_by_index_mut(&mut self, index: usize) -> Option<&mut Branch> {
        self.branch.values_mut().find(|b| b.index == index)
    }
}

/// Record types that accept solution values by field name.
trait ApplyField {
    /// Returns false when the field is not part of the record.
    fn apply_field(&mut self, field: &str, value: f64) -> bool;
}

fn as_status(value: f64) -> u8 {
    if value.round() >= 1.0 {
        1
    } else {
        0
    }
}

impl ApplyField for Bus {
    fn apply_field(&mut self, field: &str, value: f64) -> bool {
        match field {
            "vm" => self.vm = value,
            "va" => self.va = value,
            "vmin" => self.vmin = value,
            "vmax" => self.vmax = value,
            _ => return false,
        }
        true
    }
}

impl ApplyField for Gen {
    fn apply_field(&mut self, field: &str, value: f64) -> bool {
        match field {
            "pg" => self.pg = value,
            "qg" => self.qg = value,
            "vg" => self.vg = value,
            "gen_status" => self.gen_status = as_status(value),
            _ => return false,
        }
        true
    }
}

impl ApplyField for Branch {
    fn apply_field(&mut self, field: &str, value: f64) -> bool {
        match field {
            "pf" => self.pf = Some(value),
            "qf" => self.qf = Some(value),
            "pt" => self.pt = Some(value),
            "qt" => self.qt = Some(value),
            "br_status" => self.br_status = as_status(value),
            "built" => self.built = Some(value),
            "angmin" => self.angmin = value,
            "angmax" => self.angmax = value,
            _ => return false,
        }
        true
    }
}

impl ApplyField for DcLine {
    fn apply_field(&mut self, field: &str, value: f64) -> bool {
        match field {
            "pf" => self.pf = value,
            "pt" => self.pt = value,
            "qf" => self.qf = value,
            "qt" => self.qt = value,
            "br_status" => self.br_status = as_status(value),
            _ => return false,
        }
        true
    }
}

impl ApplyField for Load {
    fn apply_field(&mut self, field: &str, value: f64) -> bool {
        match field {
            "pd" => self.pd = value,
            "qd" => self.qd = value,
            "status" => self.status = as_status(value),
            _ => return false,
        }
        true
    }
}

impl ApplyField for Shunt {
    fn apply_field(&mut self, field: &str, value: f64) -> bool {
        match field {
            "gs" => self.gs = value,
            "bs" => self.bs = value,
            "status" => self.status = as_status(value),
            _ => return false,
        }
        true
    }
}

fn apply_component<T: ApplyField>(
    class: &str,
    records: &mut ComponentMap<T>,
    solution: &SolutionData,
) {
    let Some(values) = solution.component(class) else {
        return;
    };
    for (id, fields) in values {
        let Some(record) = records.get_mut(id) else {
            debug!(class, id = %id, "solution entry has no matching record");
            continue;
        };
        for (field, value) in fields {
            if !record.apply_field(field, *value) {
                debug!(class, id = %id, field = %field, "ignoring unknown solution field");
            }
        }
    }
}

/// Merge a solution into a copy of `data`.
///
/// The input is left untouched; unknown ids and fields are skipped.
pub fn update_data(data: &NetworkData, solution: &SolutionData) -> NetworkData {
    let mut updated = data.clone();
    apply_component("bus", &mut updated.bus, solution);
    apply_component("gen", &mut updated.gen, solution);
    apply_component("branch", &mut updated.branch, solution);
    apply_component("load", &mut updated.load, solution);
    apply_component("shunt", &mut updated.shunt, solution);
    apply_component("dcline", &mut updated.dcline, solution);
    if let Some(ne) = updated.ne_branch.as_mut() {
        apply_component("ne_branch", ne, solution);
    }
    updated
}

#[cfg(test)]
mod tests {
    use super::*;

    const CASE: &str = r#"{
        "name": "tiny",
        "baseMVA": 100.0,
        "bus": {
            "1": {"index": 1, "bus_type": 3, "vmin": 0.95, "vmax": 1.05},
            "2": {"index": 2, "bus_type": 1}
        },
        "gen": {
            "1": {"index": 1, "gen_bus": 1, "pmax": 2.0, "model": 2, "ncost": 3, "cost": [0.0, 2000.0, 0.0]}
        },
        "branch": {
            "1": {"index": 1, "f_bus": 1, "t_bus": 2, "br_x": 0.1, "rate_a": 1.5}
        },
        "load": {
            "1": {"index": 1, "load_bus": 2, "pd": 1.0}
        }
    }"#;

    #[test]
    fn test_parse_applies_defaults() {
        let data = NetworkData::from_json_str(CASE).unwrap();
        assert_eq!(data.name, "tiny");
        assert_eq!(data.bus["1"].bus_type, BusType::Reference);
        assert_eq!(data.bus["2"].vmin, 0.9);
        let branch = &data.branch["1"];
        assert_eq!(branch.tap, 1.0);
        assert_eq!(branch.br_status, 1);
        assert!((branch.angmax - DEFAULT_ANGLE_DIFF).abs() < 1e-12);
        assert!(data.ne_branch.is_none());
    }

    #[test]
    fn test_invalid_bus_type_is_parse_error() {
        let json = r#"{"bus": {"1": {"index": 1, "bus_type": 9}}}"#;
        assert!(matches!(
            NetworkData::from_json_str(json),
            Err(GridError::Parse(_))
        ));
    }

    #[test]
    fn test_cost_model_reverses_order() {
        let data = NetworkData::from_json_str(CASE).unwrap();
        let cost = data.gen["1"].cost_model().unwrap();
        assert_eq!(cost, CostModel::Polynomial(vec![0.0, 2000.0, 0.0]));
    }

    #[test]
    fn test_piecewise_cost_validation() {
        let gen = Gen {
            index: 4,
            model: 1,
            cost: vec![0.0, 0.0, 1.0],
            ..Gen::default()
        };
        assert!(matches!(
            gen.cost_model(),
            Err(GridError::DataInconsistency { .. })
        ));

        let gen = Gen {
            model: 1,
            cost: vec![0.0, 0.0, 1.0, 10.0, 2.0, 30.0],
            ..Gen::default()
        };
        assert!(matches!(
            gen.cost_model().unwrap(),
            CostModel::PiecewiseLinear(points) if points.len() == 3
        ));
    }

    #[test]
    fn test_update_data_is_pure() {
        let data = NetworkData::from_json_str(CASE).unwrap();
        let mut solution = SolutionData::default();
        solution.set("bus", "2", "va", -0.1);
        solution.set("gen", "1", "pg", 1.0);
        solution.set("branch", "1", "pf", 1.0);
        solution.set("gen", "99", "pg", 5.0);

        let updated = update_data(&data, &solution);
        assert_eq!(updated.bus["2"].va, -0.1);
        assert_eq!(updated.gen["1"].pg, 1.0);
        assert_eq!(updated.branch["1"].pf, Some(1.0));
        assert_eq!(data.gen["1"].pg, 0.0, "input must not change");
        assert_eq!(data.branch["1"].pf, None);
    }

    #[test]
    fn test_series_admittance() {
        let branch = Branch {
            br_r: 0.0,
            br_x: 0.1,
            ..Branch::default()
        };
        let (g, b) = branch.series_admittance();
        assert_eq!(g, 0.0);
        assert!((b + 10.0).abs() < 1e-12);
    }
}
