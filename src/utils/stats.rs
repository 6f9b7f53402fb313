use num_traits::{real::Real, Zero};
use std::iter::{Extend, FromIterator};

/// Running mean and variance of a stream of values (Welford's algorithm).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct OnlineMeanVariance<T> {
    mean: T,
    squared_residual_sum: T,
    count: u64,
}

impl<T: Zero> Default for OnlineMeanVariance<T> {
    fn default() -> Self {
        Self {
            mean: T::zero(),
            squared_residual_sum: T::zero(),
            count: 0,
        }
    }
}

impl<T: Copy> OnlineMeanVariance<T> {
    /// The mean of all accumulated values. Zero if there are none.
    pub const fn mean(&self) -> T {
        self.mean
    }

    pub const fn count(&self) -> u64 {
        self.count
    }
}

impl<T: Real> OnlineMeanVariance<T> {
    fn count_as_real(&self) -> T {
        T::from(self.count).unwrap_or_else(T::max_value)
    }

    /// Population variance of the accumulated values. `NaN` if there are none.
    pub fn variance(&self) -> T {
        self.squared_residual_sum / self.count_as_real()
    }

    /// Population standard deviation.
    pub fn stddev(&self) -> T {
        self.variance().sqrt()
    }

    pub fn push(&mut self, value: T) {
        let residual_pre = value - self.mean;
        self.count += 1;
        self.mean = self.mean + residual_pre / self.count_as_real();
        let residual_post = value - self.mean;
        self.squared_residual_sum = self.squared_residual_sum + residual_pre * residual_post;
    }
}

impl<T: Real> Extend<T> for OnlineMeanVariance<T> {
    fn extend<I>(&mut self, iter: I)
    where
        I: IntoIterator<Item = T>,
    {
        for value in iter {
            self.push(value)
        }
    }
}

impl<T: Real> FromIterator<T> for OnlineMeanVariance<T> {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let mut s = Self::default();
        s.extend(iter);
        s
    }
}
