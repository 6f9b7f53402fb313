//! Models shared by tests.
use super::{
    Cpf, Expr, FluentDecl, FluentKind, InitValue, Model, ObjectType, ValueRange,
};
use std::collections::BTreeMap;

const NON_FLUENT: FluentKind = FluentKind::NonFluent;

/// Real-valued scalar non-fluent.
fn constant(name: &str, value: f64) -> FluentDecl {
    FluentDecl::new(name, NON_FLUENT, &[], ValueRange::Real).with_default(value)
}

pub const TEMP_ZONE_MIN: f64 = 20.0;
pub const TEMP_ZONE_MAX: f64 = 25.0;
pub const TEMP_OUT: f64 = 5.0;
pub const TEMP_AIR: f64 = 30.0;
pub const K_HEATER: f64 = 1.0;
pub const K_ZONES: f64 = 0.1;
pub const K_OUT: f64 = 0.05;
pub const K_AIR: f64 = 0.2;
pub const PENALTY: f64 = 1.0;
pub const HEAT_COST: f64 = 0.1;
pub const AIR_COST: f64 = 0.5;
pub const INITIAL_TEMP: f64 = 15.0;

/// Heating of `zones` rooms by `heaters` heaters.
///
/// Heater `i` heats zone `i % zones`; zones `i` and `i + 1` exchange heat.
/// The reward penalizes the distance to the comfort band center of uncomfortable zones
/// plus the heating and air costs.
pub fn hvac(zones: usize, heaters: usize) -> Model {
    let zone_names: Vec<String> = (1..=zones).map(|i| format!("z{}", i)).collect();
    let heater_names: Vec<String> = (1..=heaters).map(|i| format!("h{}", i)).collect();

    let fluents = vec![
        constant("TEMP-ZONE-MIN", TEMP_ZONE_MIN),
        constant("TEMP-ZONE-MAX", TEMP_ZONE_MAX),
        constant("TEMP-OUT", TEMP_OUT),
        constant("TEMP-AIR", TEMP_AIR),
        constant("K-HEATER", K_HEATER),
        constant("K-ZONES", K_ZONES),
        constant("K-OUT", K_OUT),
        constant("K-AIR", K_AIR),
        constant("PENALTY", PENALTY),
        constant("HEAT-COST", HEAT_COST),
        constant("AIR-COST", AIR_COST),
        FluentDecl::new("adj-heater", NON_FLUENT, &["heater", "zone"], ValueRange::Bool),
        FluentDecl::new("adj-zones", NON_FLUENT, &["zone", "zone"], ValueRange::Bool),
        FluentDecl::new("temp-zone", FluentKind::State, &["zone"], ValueRange::Real)
            .with_default(INITIAL_TEMP),
        FluentDecl::new("in-comfort", FluentKind::Interm, &["zone"], ValueRange::Bool),
        FluentDecl::new("heat-input", FluentKind::Action, &["heater"], ValueRange::Real),
        FluentDecl::new("air-on", FluentKind::Action, &["zone"], ValueRange::Bool),
    ];

    let temp = || Expr::fluent("temp-zone", ["?z"]);
    let heating = Expr::sum(
        &[("?h", "heater")],
        Expr::fluent("adj-heater", ["?h", "?z"]) * Expr::fluent("heat-input", ["?h"]),
    );
    let exchange = Expr::sum(
        &[("?y", "zone")],
        Expr::fluent("adj-zones", ["?z", "?y"]) * (Expr::fluent("temp-zone", ["?y"]) - temp()),
    );
    let next_temp = temp()
        + Expr::scalar("K-HEATER") * heating
        + Expr::scalar("K-ZONES") * exchange
        + Expr::scalar("K-OUT") * (Expr::scalar("TEMP-OUT") - temp())
        + Expr::scalar("K-AIR")
            * Expr::fluent("air-on", ["?z"])
            * (Expr::scalar("TEMP-AIR") - temp());
    let comfort = temp()
        .ge(Expr::scalar("TEMP-ZONE-MIN"))
        .and(temp().le(Expr::scalar("TEMP-ZONE-MAX")));

    let center = (Expr::scalar("TEMP-ZONE-MIN") + Expr::scalar("TEMP-ZONE-MAX")) / Expr::real(2.0);
    let discomfort = Expr::sum(
        &[("?z", "zone")],
        Expr::if_then_else(
            Expr::fluent("in-comfort", ["?z"]),
            Expr::real(0.0),
            Expr::scalar("PENALTY") * (temp() - center).abs(),
        ),
    );
    let heat_cost = Expr::scalar("HEAT-COST")
        * Expr::sum(&[("?h", "heater")], Expr::fluent("heat-input", ["?h"]));
    let air_cost =
        Expr::scalar("AIR-COST") * Expr::sum(&[("?z", "zone")], Expr::fluent("air-on", ["?z"]));
    let reward = -(discomfort + heat_cost + air_cost);

    let adj_heater = (0..heaters).flat_map(|h| (0..zones).map(move |z| h % zones == z));
    let adj_zones = (0..zones).flat_map(|a| (0..zones).map(move |b| a + 1 == b || b + 1 == a));
    let mut non_fluents = BTreeMap::new();
    non_fluents.insert("adj-heater".into(), InitValue::list(adj_heater));
    non_fluents.insert("adj-zones".into(), InitValue::list(adj_zones));

    let mut action_bounds = BTreeMap::new();
    action_bounds.insert("heat-input".into(), (Some(0.0), Some(10.0)));

    Model {
        name: "hvac".into(),
        types: vec![
            ObjectType::new("zone", zone_names),
            ObjectType::new("heater", heater_names),
        ],
        fluents,
        cpfs: vec![
            Cpf::new("in-comfort", &["?z"], comfort),
            Cpf::new("temp-zone", &["?z"], next_temp),
        ],
        reward,
        preconditions: vec![Expr::fluent("heat-input", ["h1"]).le(Expr::real(10.0))],
        non_fluents,
        init_state: BTreeMap::new(),
        action_bounds,
        max_nondef_actions: Some(1),
        horizon: 20,
    }
}

/// [`hvac`] with additive Gaussian noise of the given variance on the zone temperatures.
pub fn noisy_hvac(zones: usize, heaters: usize, variance: f64) -> Model {
    let mut model = hvac(zones, heaters);
    model.fluents.push(constant("VAR-TEMP", variance));
    for cpf in &mut model.cpfs {
        if cpf.fluent == "temp-zone" {
            let mean = std::mem::replace(&mut cpf.expr, Expr::real(0.0));
            cpf.expr = Expr::normal(mean, Expr::scalar("VAR-TEMP"));
        }
    }
    model
}

/// A model with one real state `x`, one real action `u` and the given update and reward.
///
/// Also declares a boolean state `flag`, kept constant, and a boolean action `go`.
pub fn scalar_model(next_x: Expr, reward: Expr) -> Model {
    Model {
        name: "scalar".into(),
        types: Vec::new(),
        fluents: vec![
            FluentDecl::new("x", FluentKind::State, &[], ValueRange::Real).with_default(1.0),
            FluentDecl::new("flag", FluentKind::State, &[], ValueRange::Bool),
            FluentDecl::new("u", FluentKind::Action, &[], ValueRange::Real),
            FluentDecl::new("go", FluentKind::Action, &[], ValueRange::Bool),
        ],
        cpfs: vec![
            Cpf::new("x", &[], next_x),
            Cpf::new("flag", &[], Expr::scalar("flag")),
        ],
        reward,
        preconditions: Vec::new(),
        non_fluents: BTreeMap::new(),
        init_state: BTreeMap::new(),
        action_bounds: BTreeMap::new(),
        max_nondef_actions: None,
        horizon: 5,
    }
}

/// Objects `o1, o2, o3` with weights `w = [1, 2, 3]`, membership `on = [true, false, true]`
/// and a real state `y(?o)` initialized to `[0.5, -1, 4]`.
///
/// The reward is the given expression; `y` keeps its value.
pub fn objects_model(reward: Expr) -> Model {
    let mut non_fluents = BTreeMap::new();
    non_fluents.insert("w".into(), InitValue::list([1.0, 2.0, 3.0]));
    non_fluents.insert("on".into(), InitValue::list([true, false, true]));
    let mut init_state = BTreeMap::new();
    init_state.insert("y".into(), InitValue::list([0.5, -1.0, 4.0]));
    Model {
        name: "objects".into(),
        types: vec![ObjectType::new("obj", ["o1", "o2", "o3"])],
        fluents: vec![
            FluentDecl::new("w", NON_FLUENT, &["obj"], ValueRange::Real),
            FluentDecl::new("on", NON_FLUENT, &["obj"], ValueRange::Bool),
            FluentDecl::new("pick", NON_FLUENT, &[], ValueRange::Object("obj".into())),
            FluentDecl::new("y", FluentKind::State, &["obj"], ValueRange::Real),
            FluentDecl::new("pair", NON_FLUENT, &["obj", "obj"], ValueRange::Real),
        ],
        cpfs: vec![Cpf::new("y", &["?o"], Expr::fluent("y", ["?o"]))],
        reward,
        preconditions: Vec::new(),
        non_fluents,
        init_state,
        action_bounds: BTreeMap::new(),
        max_nondef_actions: None,
        horizon: 1,
    }
}

/// Interm fluents `a`, `b`, `c` declared in that order where `a` reads `b` and `b` reads `c`.
pub fn interm_chain() -> Model {
    let real = ValueRange::Real;
    Model {
        name: "chain".into(),
        types: Vec::new(),
        fluents: vec![
            FluentDecl::new("a", FluentKind::Interm, &[], real.clone()),
            FluentDecl::new("b", FluentKind::Interm, &[], real.clone()),
            FluentDecl::new("c", FluentKind::Interm, &[], real.clone()),
            FluentDecl::new("s", FluentKind::State, &[], real).with_default(1.0),
        ],
        cpfs: vec![
            Cpf::new("a", &[], Expr::scalar("b") + Expr::real(1.0)),
            Cpf::new("b", &[], Expr::scalar("c") * Expr::real(2.0)),
            Cpf::new("c", &[], Expr::scalar("s") + Expr::real(1.0)),
            Cpf::new("s", &[], Expr::scalar("a")),
        ],
        reward: Expr::scalar("s"),
        preconditions: Vec::new(),
        non_fluents: BTreeMap::new(),
        init_state: BTreeMap::new(),
        action_bounds: BTreeMap::new(),
        max_nondef_actions: None,
        horizon: 3,
    }
}

/// Interm fluents `a` and `b` that read each other.
pub fn interm_cycle() -> Model {
    let mut model = interm_chain();
    model.cpfs[1] = Cpf::new("b", &[], Expr::scalar("a") * Expr::real(2.0));
    model
}
