//! The numeric contract every observation and every cluster mean must satisfy.

use std::cmp::Ordering;
use std::fmt::{Debug, Display};

use num_traits::float::FloatCore;
use num_traits::{Float, NumCast, One, Zero};
use ordered_float::OrderedFloat;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A point in the tree's metric space.
///
/// Means are built by summing values with [`VectorValue::add`] onto a
/// [`VectorValue::zero`] accumulator and dividing by the count with
/// [`VectorValue::scale_down`]. [`VectorValue::distance`] is only ever used to
/// rank candidates, so a squared distance works as well as a true metric.
pub trait VectorValue: Clone + Debug + Display + Serialize + DeserializeOwned {
    /// The additive identity with the same shape as `self`.
    fn zero(&self) -> Self;

    /// Component-wise sum.
    fn add(&self, other: &Self) -> Self;

    /// Divides an accumulated sum by `n`. Callers never pass 0.
    fn scale_down(&self, n: usize) -> Self;

    fn distance(&self, other: &Self) -> f64;

    /// Total order used to break ties deterministically.
    fn compare(&self, other: &Self) -> Ordering;
}

/// Plain floats are one-dimensional observations.
impl<F> VectorValue for F
where
    F: Float + FloatCore + Debug + Display + Serialize + DeserializeOwned,
{
    fn zero(&self) -> Self {
        <F as Zero>::zero()
    }

    fn add(&self, other: &Self) -> Self {
        *self + *other
    }

    fn scale_down(&self, n: usize) -> Self {
        let n_as_f = <F as NumCast>::from(n).unwrap_or_else(<F as One>::one); // usize -> F
        *self / n_as_f
    }

    fn distance(&self, other: &Self) -> f64 {
        let diff = *self - *other;
        (diff * diff).to_f64().unwrap_or(f64::NAN)
    }

    fn compare(&self, other: &Self) -> Ordering {
        OrderedFloat(*self).cmp(&OrderedFloat(*other))
    }
}

/// Mean of `values`: zero, add every value in order, divide by the count.
///
/// Returns `None` for an empty input instead of dividing by zero.
pub fn mean_of<'a, T, I>(values: I) -> Option<T>
where
    T: VectorValue + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut iter = values.into_iter();
    let first = iter.next()?;
    let mut sum = first.zero().add(first);
    let mut count = 1usize;
    for value in iter {
        sum = sum.add(value);
        count += 1;
    }
    Some(sum.scale_down(count))
}
