//! Distribution samples with linear, exponential, or explicit buckets.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, TollgateError};

/// How a distribution partitions the real line into buckets.
///
/// Each scheme defines `num_finite_buckets + 2` buckets: an underflow
/// bucket, the finite buckets, and an overflow bucket. Two distributions
/// can only be merged when their options compare equal by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BucketOptions {
    /// Finite buckets of equal `width` starting at `offset`.
    Linear {
        num_finite_buckets: i32,
        width: f64,
        offset: f64,
    },
    /// Finite buckets with exponentially growing boundaries
    /// `scale * growth_factor^i`.
    Exponential {
        num_finite_buckets: i32,
        growth_factor: f64,
        scale: f64,
    },
    /// Explicit ascending bucket boundaries.
    Explicit { bounds: Vec<f64> },
}

impl BucketOptions {
    fn bucket_count(&self) -> usize {
        match self {
            BucketOptions::Linear {
                num_finite_buckets, ..
            }
            | BucketOptions::Exponential {
                num_finite_buckets, ..
            } => *num_finite_buckets as usize + 2,
            BucketOptions::Explicit { bounds } => bounds.len() + 1,
        }
    }

    /// Index of the bucket that `value` falls into.
    fn bucket_index(&self, value: f64) -> usize {
        match self {
            BucketOptions::Linear {
                num_finite_buckets,
                width,
                offset,
            } => {
                if value < *offset {
                    0
                } else {
                    let index = ((value - offset) / width) as usize + 1;
                    index.min(*num_finite_buckets as usize + 1)
                }
            }
            BucketOptions::Exponential {
                num_finite_buckets,
                growth_factor,
                scale,
            } => {
                if value < *scale {
                    0
                } else {
                    let mut index = 1usize;
                    let mut bound = scale * growth_factor;
                    while index <= *num_finite_buckets as usize && value >= bound {
                        index += 1;
                        bound *= growth_factor;
                    }
                    index
                }
            }
            BucketOptions::Explicit { bounds } => {
                bounds.iter().take_while(|bound| value >= **bound).count()
            }
        }
    }
}

/// A summarised set of `f64` samples.
///
/// Carries bucket counts plus running summary statistics. Merging two
/// distributions combines both exactly (Chan et al. parallel variance
/// for the sum of squared deviations).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub bucket_options: BucketOptions,
    pub bucket_counts: Vec<i64>,
    pub count: i64,
    pub mean: f64,
    pub sum_of_squared_deviation: f64,
    pub minimum: f64,
    pub maximum: f64,
}

impl Distribution {
    /// Create an empty distribution with linear buckets.
    pub fn new_linear(num_finite_buckets: i32, width: f64, offset: f64) -> Result<Self> {
        if num_finite_buckets <= 0 {
            return Err(TollgateError::InvalidArgument(
                "number of finite buckets must be positive".into(),
            ));
        }
        if width <= 0.0 {
            return Err(TollgateError::InvalidArgument(
                "linear bucket width must be positive".into(),
            ));
        }
        Ok(Self::empty(BucketOptions::Linear {
            num_finite_buckets,
            width,
            offset,
        }))
    }

    /// Create an empty distribution with exponential buckets.
    pub fn new_exponential(num_finite_buckets: i32, growth_factor: f64, scale: f64) -> Result<Self> {
        if num_finite_buckets <= 0 {
            return Err(TollgateError::InvalidArgument(
                "number of finite buckets must be positive".into(),
            ));
        }
        if growth_factor <= 1.0 {
            return Err(TollgateError::InvalidArgument(
                "exponential growth factor must be greater than 1".into(),
            ));
        }
        if scale <= 0.0 {
            return Err(TollgateError::InvalidArgument(
                "exponential scale must be positive".into(),
            ));
        }
        Ok(Self::empty(BucketOptions::Exponential {
            num_finite_buckets,
            growth_factor,
            scale,
        }))
    }

    /// Create an empty distribution with explicit bucket bounds.
    ///
    /// Bounds must be sorted ascending with no duplicates.
    pub fn new_explicit(bounds: Vec<f64>) -> Result<Self> {
        if bounds.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(TollgateError::InvalidArgument(
                "explicit bucket bounds must be strictly ascending".into(),
            ));
        }
        Ok(Self::empty(BucketOptions::Explicit { bounds }))
    }

    fn empty(bucket_options: BucketOptions) -> Self {
        let buckets = bucket_options.bucket_count();
        Self {
            bucket_options,
            bucket_counts: vec![0; buckets],
            count: 0,
            mean: 0.0,
            sum_of_squared_deviation: 0.0,
            minimum: 0.0,
            maximum: 0.0,
        }
    }

    /// Add a single sample.
    pub fn add_sample(&mut self, value: f64) {
        if self.count == 0 {
            self.minimum = value;
            self.maximum = value;
        } else {
            self.minimum = self.minimum.min(value);
            self.maximum = self.maximum.max(value);
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.sum_of_squared_deviation += delta * (value - self.mean);

        let index = self.bucket_options.bucket_index(value);
        self.bucket_counts[index] += 1;
    }

    /// Merge `from` into this distribution.
    ///
    /// Bucket options must match by value. A mismatch indicates a caller
    /// bug; the merge is skipped with a warning rather than failing the
    /// surrounding operation.
    pub fn merge(&mut self, from: &Distribution) {
        if self.bucket_options != from.bucket_options {
            warn!("dropping distribution merge: bucket options do not match");
            return;
        }
        if from.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = from.clone();
            return;
        }

        for (target, source) in self.bucket_counts.iter_mut().zip(&from.bucket_counts) {
            *target += source;
        }

        let total = self.count + from.count;
        let delta = from.mean - self.mean;
        let merged_mean = self.mean + delta * from.count as f64 / total as f64;
        self.sum_of_squared_deviation += from.sum_of_squared_deviation
            + delta * delta * (self.count as f64 * from.count as f64) / total as f64;
        self.mean = merged_mean;
        self.count = total;
        self.minimum = self.minimum.min(from.minimum);
        self.maximum = self.maximum.max(from.maximum);
    }
}
