//! Distance functions used by the native engines.
//!
//! All float distances follow the "smaller is nearer" convention so results
//! from every metric can be sorted ascending:
//! - L2 reports the squared Euclidean distance
//! - Inner product reports the negated dot product

use crate::descriptor::MetricType;
use crate::simd::{dot_product_simd, hamming_simd, squared_euclidean_simd};

/// Squared Euclidean distance.
#[inline]
pub fn squared_l2_distance(a: &[f32], b: &[f32]) -> f32 {
    squared_euclidean_simd(a, b)
}

/// Plain inner product.
#[inline]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    dot_product_simd(a, b)
}

/// Negated inner product, usable as a distance.
#[inline]
pub fn negative_inner_product(a: &[f32], b: &[f32]) -> f32 {
    -dot_product_simd(a, b)
}

/// Hamming distance between two packed binary codes.
#[inline]
pub fn hamming_distance(a: &[u8], b: &[u8]) -> u32 {
    hamming_simd(a, b)
}

/// Distance function for a metric.
pub fn distance_fn(metric: MetricType) -> fn(&[f32], &[f32]) -> f32 {
    match metric {
        MetricType::L2 => squared_l2_distance,
        MetricType::InnerProduct => negative_inner_product,
    }
}

/// Pack a float vector into bits, one bit per component (`x > 0` is set).
///
/// Bit `i` lands in byte `i / 8` at position `i % 8`.
pub fn binarize(vector: &[f32]) -> Vec<u8> {
    let mut code = vec![0u8; vector.len().div_ceil(8)];
    for (i, &x) in vector.iter().enumerate() {
        if x > 0.0 {
            code[i / 8] |= 1 << (i % 8);
        }
    }
    code
}

/// Unpack a binary code into 0.0 / 1.0 components.
pub fn unpack_bits(code: &[u8], bits: usize) -> Vec<f32> {
    (0..bits)
        .map(|i| if code[i / 8] & (1 << (i % 8)) != 0 { 1.0 } else { 0.0 })
        .collect()
}
