//! Model-predictive control of a noisy reservoir.
//!
//! Plans a release schedule, applies its first action to an exactly simulated reservoir and
//! re-plans from the observed state with the previous plan shifted by one step.
use rand::SeedableRng;
use relaxplan::logging::{CLILogger, Event, Logger};
use relaxplan::model::{Cpf, Expr, FluentDecl, FluentKind, Model, ValueRange};
use relaxplan::optimizers::{AdamConfig, OptimizerConfig};
use relaxplan::planner::PlanInit;
use relaxplan::{compile, Evaluator, Fluents, Planner, PlannerConfig, Prng};
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

const TARGET: f64 = 50.0;
const STEPS: usize = 30;
const HORIZON: usize = 10;

fn reservoir() -> Model {
    let level = || Expr::scalar("level");
    let inflow = Expr::normal(Expr::scalar("INFLOW"), Expr::real(4.0));
    let next_level = level() + inflow - Expr::scalar("release");
    let reward =
        -((level() - Expr::scalar("TARGET")).abs() + Expr::real(0.1) * Expr::scalar("release"));

    let mut action_bounds = BTreeMap::new();
    action_bounds.insert("release".into(), (Some(0.0), Some(10.0)));
    Model {
        name: "reservoir".into(),
        types: Vec::new(),
        fluents: vec![
            FluentDecl::new("INFLOW", FluentKind::NonFluent, &[], ValueRange::Real)
                .with_default(3.0),
            FluentDecl::new("TARGET", FluentKind::NonFluent, &[], ValueRange::Real)
                .with_default(TARGET),
            FluentDecl::new("level", FluentKind::State, &[], ValueRange::Real)
                .with_default(70.0),
            FluentDecl::new("release", FluentKind::Action, &[], ValueRange::Real),
        ],
        cpfs: vec![Cpf::new("level", &[], next_level)],
        reward,
        preconditions: Vec::new(),
        non_fluents: BTreeMap::new(),
        init_state: BTreeMap::new(),
        action_bounds,
        max_nondef_actions: None,
        horizon: HORIZON,
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let model = Arc::new(compile(&reservoir())?);
    let config = PlannerConfig {
        optimizer: OptimizerConfig::Adam(AdamConfig {
            learning_rate: 0.5,
            ..AdamConfig::default()
        }),
        init: PlanInit::Constant(5.0),
        ..PlannerConfig::default()
    };
    let mut planner = Planner::new(Arc::clone(&model), config)?;
    let environment = Evaluator::exact(Arc::clone(&model));
    let mut rng = Prng::seed_from_u64(1);
    let mut logger = CLILogger::new(Duration::from_secs(1));

    let mut state: Fluents = model.initial_state();
    for step in 0..STEPS {
        let progress = planner.run(step as u64, 100, 16, 25, &mut ())?;
        if let Some(progress) = progress {
            logger.log(Event::Replan, "train_return", progress.train_return.into())?;
            if let Some(value) = progress.best_return {
                logger.log(Event::Replan, "best_return", value.into())?;
            }
            logger.log(Event::Replan, "status", format!("{:?}", progress.status).into())?;
        }

        let action = planner.get_action(None, 0)?;
        let transition = environment.step(&state, &action, &mut rng)?;
        logger.log(Event::Replan, "reward", f64::from(&transition.reward).into())?;
        logger.log(Event::Replan, "release", f64::from(&action["release"]).into())?;
        logger.log(Event::Replan, "level", f64::from(&transition.next_state["level"]).into())?;
        logger.done(Event::Replan);

        state = transition.next_state;
        planner.replan(&state, HORIZON, 1)?;
    }
    logger.display();
    Ok(())
}
