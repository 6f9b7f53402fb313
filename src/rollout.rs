//! Multi-step roll-outs of a policy through an evaluator.
use crate::eval::{EvalError, Evaluator};
use crate::logic::Logic;
use crate::utils::tensor::{shallow_copy, OPTIONS};
use crate::{Fluents, Prng};
use tch::Tensor;

/// Source of the actions of each step.
pub trait Policy {
    /// Actions at `step` given the current state.
    fn act(&mut self, step: usize, state: &Fluents) -> Result<Fluents, EvalError>;
}

/// A fixed action sequence.
impl Policy for [Fluents] {
    fn act(&mut self, step: usize, _: &Fluents) -> Result<Fluents, EvalError> {
        self.get(step)
            .map(shallow_copy)
            .ok_or(EvalError::PlanExhausted { step })
    }
}

impl Policy for Vec<Fluents> {
    fn act(&mut self, step: usize, state: &Fluents) -> Result<Fluents, EvalError> {
        self.as_mut_slice().act(step, state)
    }
}

impl<P: Policy + ?Sized> Policy for &mut P {
    fn act(&mut self, step: usize, state: &Fluents) -> Result<Fluents, EvalError> {
        P::act(self, step, state)
    }
}

/// Policy defined by a closure of the step index and current state.
#[derive(Debug, Clone, Copy)]
pub struct FnPolicy<F>(pub F);

impl<F> Policy for FnPolicy<F>
where
    F: FnMut(usize, &Fluents) -> Result<Fluents, EvalError>,
{
    fn act(&mut self, step: usize, state: &Fluents) -> Result<Fluents, EvalError> {
        (self.0)(step, state)
    }
}

/// One step of a trajectory.
#[derive(Debug)]
pub struct TrajectoryStep {
    /// State at the start of the step.
    pub state: Fluents,
    pub actions: Fluents,
    pub interms: Fluents,
    /// Shape `[batch]`.
    pub reward: Tensor,
}

/// Result of a roll-out.
#[derive(Debug)]
pub struct Rollout {
    /// Accumulated reward of each batch element. Shape `[batch]`.
    pub returns: Tensor,
    pub trajectory: Vec<TrajectoryStep>,
    /// State after the last step.
    pub final_state: Fluents,
}

/// Run a policy for `horizon` steps from an initial state.
pub fn rollout<L, P>(
    evaluator: &Evaluator<L>,
    initial_state: &Fluents,
    policy: &mut P,
    horizon: usize,
    rng: &mut Prng,
) -> Result<Rollout, EvalError>
where
    L: Logic,
    P: Policy + ?Sized,
{
    rollout_until(evaluator, initial_state, policy, horizon, rng, |_, _| false)
}

/// Run a policy for at most `horizon` steps, stopping early once `done(step, state)` holds.
///
/// `done` is checked before each step.
pub fn rollout_until<L, P, D>(
    evaluator: &Evaluator<L>,
    initial_state: &Fluents,
    policy: &mut P,
    horizon: usize,
    rng: &mut Prng,
    mut done: D,
) -> Result<Rollout, EvalError>
where
    L: Logic,
    P: Policy + ?Sized,
    D: FnMut(usize, &Fluents) -> bool,
{
    let mut state = shallow_copy(initial_state);
    let mut returns: Option<Tensor> = None;
    let mut trajectory = Vec::with_capacity(horizon);
    for step in 0..horizon {
        if done(step, &state) {
            break;
        }
        let actions = policy.act(step, &state)?;
        let transition = evaluator.step(&state, &actions, rng)?;
        returns = Some(match returns {
            None => transition.reward.shallow_clone(),
            Some(total) => total + &transition.reward,
        });
        trajectory.push(TrajectoryStep {
            state,
            actions,
            interms: transition.interms,
            reward: transition.reward,
        });
        state = transition.next_state;
    }
    Ok(Rollout {
        returns: returns.unwrap_or_else(|| Tensor::zeros(&[1], OPTIONS)),
        trajectory,
        final_state: state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::logic::ProductLogic;
    use crate::model::testing::{self, *};
    use crate::model::{Expr, InitValue, UnaryOp};
    use crate::utils::tensor::to_vec;
    use rand::SeedableRng;
    use std::sync::Arc;
    use tch::Kind;

    fn hvac_plan(heat: f64, horizon: usize) -> Vec<Fluents> {
        (0..horizon)
            .map(|_| {
                let mut actions = Fluents::new();
                actions.insert("heat-input".into(), Tensor::of_slice(&[heat]));
                actions.insert("air-on".into(), Tensor::of_slice(&[0.0, 0.0]));
                actions
            })
            .collect()
    }

    #[test]
    fn hvac_reference_trajectory() {
        let mut model = testing::hvac(2, 1);
        model.non_fluents.insert("HEAT-COST".into(), InitValue::from(0.0));
        model.non_fluents.insert("AIR-COST".into(), InitValue::from(0.0));
        let evaluator = Evaluator::exact(Arc::new(compile(&model).unwrap()));
        let initial = [10.0, 12.0];
        let mut state = Fluents::new();
        state.insert("temp-zone".into(), Tensor::of_slice(&initial));

        let heat = 0.01;
        let horizon = 10;
        let mut plan = hvac_plan(heat, horizon);
        let result = rollout(
            &evaluator,
            &state,
            &mut plan,
            horizon,
            &mut Prng::seed_from_u64(0),
        )
        .unwrap();

        let center = (TEMP_ZONE_MIN + TEMP_ZONE_MAX) / 2.0;
        let mut temp = initial;
        let mut expected_return = 0.0;
        assert_eq!(result.trajectory.len(), horizon);
        for step in &result.trajectory {
            let actual = to_vec(&step.state["temp-zone"]);
            assert!((actual[0] - temp[0]).abs() < 1e-9 && (actual[1] - temp[1]).abs() < 1e-9);

            let reward: f64 = -temp
                .iter()
                .filter(|t| !(TEMP_ZONE_MIN..=TEMP_ZONE_MAX).contains(*t))
                .map(|t| PENALTY * (t - center).abs())
                .sum::<f64>();
            assert!((f64::from(step.reward.get(0)) - reward).abs() < 1e-9);
            expected_return += reward;

            let [a, b] = temp;
            temp = [
                a + K_HEATER * heat + K_ZONES * (b - a) + K_OUT * (TEMP_OUT - a),
                b + K_ZONES * (a - b) + K_OUT * (TEMP_OUT - b),
            ];
        }
        let returns = f64::from(result.returns.get(0));
        assert!((returns - expected_return).abs() < 1e-9);
        assert!(returns < 0.0);
        let final_temp = to_vec(&result.final_state["temp-zone"]);
        assert!((final_temp[0] - temp[0]).abs() < 1e-9);
    }

    #[test]
    fn exhausted_plan() {
        let evaluator = Evaluator::exact(Arc::new(compile(&testing::hvac(2, 1)).unwrap()));
        let mut plan = hvac_plan(1.0, 3);
        let result = rollout(
            &evaluator,
            &Fluents::new(),
            &mut plan,
            5,
            &mut Prng::seed_from_u64(0),
        );
        assert_eq!(
            result.unwrap_err(),
            EvalError::PlanExhausted { step: 3 }
        );
    }

    #[test]
    fn stops_when_done() {
        let model = testing::scalar_model(Expr::scalar("x") + Expr::real(1.0), Expr::scalar("x"));
        let evaluator = Evaluator::exact(Arc::new(compile(&model).unwrap()));
        let mut policy = FnPolicy(|_: usize, _: &Fluents| Ok::<_, EvalError>(Fluents::new()));
        let result = rollout_until(
            &evaluator,
            &evaluator.model().initial_state(),
            &mut policy,
            10,
            &mut Prng::seed_from_u64(0),
            |_, state| f64::from(state["x"].sum(Kind::Double)) >= 4.0,
        )
        .unwrap();
        // x = 1, 2, 3 then stop at x = 4
        assert_eq!(result.trajectory.len(), 3);
        assert_eq!(f64::from(result.returns.get(0)), 6.0);
    }

    #[test]
    fn policy_sees_current_state() {
        let model = testing::scalar_model(
            Expr::scalar("x") + Expr::scalar("u"),
            Expr::scalar("x"),
        );
        let evaluator = Evaluator::exact(Arc::new(compile(&model).unwrap()));
        // Double x each step
        let mut policy = FnPolicy(|_: usize, state: &Fluents| {
            let mut actions = Fluents::new();
            actions.insert("u".into(), state["x"].shallow_clone());
            Ok::<_, EvalError>(actions)
        });
        let result = rollout(
            &evaluator,
            &evaluator.model().initial_state(),
            &mut policy,
            4,
            &mut Prng::seed_from_u64(0),
        )
        .unwrap();
        assert_eq!(f64::from(result.returns.get(0)), 1.0 + 2.0 + 4.0 + 8.0);
    }

    /// Return of a 3-step relaxed roll-out applying `plan[t]` as the real action at step `t`.
    fn smooth_return(evaluator: &Evaluator<ProductLogic>, plan: &Tensor) -> Tensor {
        let mut policy = FnPolicy(|step: usize, _: &Fluents| {
            let mut actions = Fluents::new();
            actions.insert("u".into(), plan.get(step as i64));
            Ok::<_, EvalError>(actions)
        });
        rollout(
            evaluator,
            &Fluents::new(),
            &mut policy,
            3,
            &mut Prng::seed_from_u64(0),
        )
        .unwrap()
        .returns
        .sum(Kind::Double)
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let x = || Expr::scalar("x");
        let u = || Expr::scalar("u");
        let next_x = x() + u() - Expr::real(0.1) * x() * x();
        let reward = Expr::if_then_else(
            x().gt(u()),
            x() * u(),
            Expr::unary(UnaryOp::Sin, u()),
        );
        let model = testing::scalar_model(next_x, reward);
        let evaluator =
            Evaluator::new(Arc::new(compile(&model).unwrap()), ProductLogic::new(2.0)).unwrap();

        let values = [0.3, 0.8, -0.2];
        let plan = Tensor::of_slice(&values).set_requires_grad(true);
        smooth_return(&evaluator, &plan).backward();
        let gradient = to_vec(&plan.grad());

        let eps = 1e-6;
        for i in 0..values.len() {
            let shifted = |delta: f64| {
                let mut v = values;
                v[i] += delta;
                f64::from(smooth_return(&evaluator, &Tensor::of_slice(&v)))
            };
            let numeric = (shifted(eps) - shifted(-eps)) / (2.0 * eps);
            assert!(
                (numeric - gradient[i]).abs() < 1e-6,
                "step {}: {} vs {}",
                i,
                numeric,
                gradient[i]
            );
        }
    }
}
