//! Projections of relaxed actions onto their feasible sets.
use crate::model::Bounds;
use crate::utils::tensor::{any, OPTIONS};
use tch::{Kind, Tensor};

/// Bisection iterations of the cardinality projection.
const BISECTION_STEPS: usize = 64;

/// Clip to box bounds. Either bound may be absent.
pub fn clip(x: &Tensor, bounds: Bounds) -> Tensor {
    match bounds {
        (Some(low), Some(high)) => x.clamp(low, high),
        (Some(low), None) => x.clamp_min(low),
        (None, Some(high)) => x.clamp_max(high),
        (None, None) => x.shallow_clone(),
    }
}

/// Euclidean projection of each row of `s` onto `{y ∈ [0, 1]ⁿ : Σ y ≤ k}`.
///
/// `s` has shape `[rows, n]`. Rows already in the set are returned unchanged. Otherwise the
/// result is `clip(s - τ, 0, 1)` where the shift `τ > 0` is found by bisection so that the row
/// sum is at most `k`.
pub fn project_cardinality(s: &Tensor, k: f64) -> Tensor {
    let s = s.clamp(0.0, 1.0);
    let sum_after = |shift: &Tensor| {
        (&s - shift)
            .clamp(0.0, 1.0)
            .sum_dim_intlist(&[1], true, Kind::Double)
    };
    let violated = s.sum_dim_intlist(&[1], true, Kind::Double).gt(k);
    if !any(&violated) {
        return s;
    }

    // Invariant: sum_after(low) > k >= sum_after(high)
    let mut low = Tensor::zeros(&[s.size()[0], 1], OPTIONS);
    let mut high = s.amax(&[1], true);
    for _ in 0..BISECTION_STEPS {
        let mid = (&low + &high) / 2.0;
        let above = sum_after(&mid).gt(k);
        low = mid.where_self(&above, &low);
        high = high.where_self(&above, &mid);
    }
    let shift = high.where_self(&violated, &Tensor::from(0.0));
    (&s - shift).clamp(0.0, 1.0)
}

/// Hard selection of at most `k` entries per row of `s`: those above ½ with the largest values.
///
/// Returns a 0 / 1 tensor of the same shape.
pub fn select_top(s: &Tensor, k: Option<usize>) -> Tensor {
    let above = s.gt(0.5);
    let selected = match k {
        Some(k) if (k as i64) < s.size()[1] => {
            let ranks = s.argsort(1, true).argsort(1, false);
            above.logical_and(&ranks.lt(k as i64))
        }
        _ => above,
    };
    selected.to_kind(Kind::Double)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::tensor::{from_vec, to_vec};
    use rstest::rstest;

    fn assert_close(actual: &Tensor, expected: &[f64]) {
        let actual = to_vec(actual);
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn clip_bounds() {
        let x = Tensor::of_slice(&[-2.0, 0.5, 3.0]);
        assert_close(&clip(&x, (Some(0.0), Some(1.0))), &[0.0, 0.5, 1.0]);
        assert_close(&clip(&x, (None, Some(1.0))), &[-2.0, 0.5, 1.0]);
        assert_close(&clip(&x, (Some(0.0), None)), &[0.0, 0.5, 3.0]);
        assert_close(&clip(&x, (None, None)), &[-2.0, 0.5, 3.0]);
    }

    #[test]
    fn projection_of_two_entries() {
        // 0.9 - τ + 0.8 - τ = 1
        let s = from_vec(&[0.9, 0.8], &[1, 2]);
        assert_close(&project_cardinality(&s, 1.0), &[0.55, 0.45]);
    }

    #[test]
    fn projection_keeps_feasible_rows() {
        let s = from_vec(&[0.2, 0.3, 0.9, 0.9, 0.0, 1.0], &[2, 3]);
        // Only the second row violates k = 1.5
        let projected = project_cardinality(&s, 1.5);
        let rows = to_vec(&projected);
        assert_close(&projected.get(0), &[0.2, 0.3, 0.9]);
        assert!((rows[3..].iter().sum::<f64>() - 1.5).abs() < 1e-9);
        assert_eq!(rows[4], 0.0);
    }

    #[rstest]
    #[case(&[0.9, 0.8, 0.7, 0.1], 1.0)]
    #[case(&[1.0, 1.0, 1.0, 1.0], 2.0)]
    #[case(&[0.3, -0.5, 1.7, 0.6], 1.0)]
    #[case(&[0.0, 0.0, 0.0, 0.0], 0.0)]
    fn projection_is_idempotent(#[case] values: &[f64], #[case] k: f64) {
        let s = from_vec(values, &[1, 4]);
        let once = project_cardinality(&s, k);
        let sum = f64::from(once.sum(Kind::Double));
        assert!(sum <= k + 1e-9);
        assert!(f64::from(once.min()) >= 0.0 && f64::from(once.max()) <= 1.0);
        let twice = project_cardinality(&once, k);
        assert_eq!(once, twice);
    }

    #[test]
    fn select_at_most_k() {
        let s = from_vec(&[0.6, 0.9, 0.7, 0.2, 0.4, 0.3], &[2, 3]);
        assert_close(&select_top(&s, Some(1)), &[0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        assert_close(&select_top(&s, Some(2)), &[0.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
        assert_close(&select_top(&s, None), &[1.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
    }
}
