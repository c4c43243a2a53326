//! SIMD kernels shared by the native engines.
//!
//! Float kernels run 8 lanes at a time through the portable `wide` crate,
//! which lowers to AVX2/SSE on x86_64 and NEON on aarch64. The Hamming
//! kernel works on packed bit codes, 64 bits per step, and relies on the
//! hardware popcount the compiler emits for `u64::count_ones`.

use wide::f32x8;

/// Lanes per float SIMD step.
pub const SIMD_WIDTH: usize = 8;

#[inline]
fn lanes(a: &[f32], offset: usize) -> f32x8 {
    let mut buf = [0.0f32; SIMD_WIDTH];
    buf.copy_from_slice(&a[offset..offset + SIMD_WIDTH]);
    f32x8::from(buf)
}

/// Dot product of two f32 slices.
///
/// # Panics
/// Panics if slices have different lengths.
#[inline]
pub fn dot_product_simd(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vectors must have same length");

    let chunks = a.len() / SIMD_WIDTH;
    let mut sum = f32x8::ZERO;

    for i in 0..chunks {
        let offset = i * SIMD_WIDTH;
        sum += lanes(a, offset) * lanes(b, offset);
    }

    let mut result = sum.reduce_add();
    for i in chunks * SIMD_WIDTH..a.len() {
        result += a[i] * b[i];
    }
    result
}

/// Squared L2 norm.
#[inline]
pub fn squared_norm_simd(a: &[f32]) -> f32 {
    dot_product_simd(a, a)
}

/// Squared Euclidean distance between two vectors.
///
/// # Panics
/// Panics if slices have different lengths.
#[inline]
pub fn squared_euclidean_simd(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vectors must have same length");

    let chunks = a.len() / SIMD_WIDTH;
    let mut sum = f32x8::ZERO;

    for i in 0..chunks {
        let offset = i * SIMD_WIDTH;
        let diff = lanes(a, offset) - lanes(b, offset);
        sum += diff * diff;
    }

    let mut result = sum.reduce_add();
    for i in chunks * SIMD_WIDTH..a.len() {
        let diff = a[i] - b[i];
        result += diff * diff;
    }
    result
}

/// Element-wise `a - b` into `out`.
#[inline]
pub fn sub_simd(a: &[f32], b: &[f32], out: &mut [f32]) {
    assert_eq!(a.len(), b.len());
    assert_eq!(a.len(), out.len());

    let chunks = a.len() / SIMD_WIDTH;
    for i in 0..chunks {
        let offset = i * SIMD_WIDTH;
        let arr: [f32; SIMD_WIDTH] = (lanes(a, offset) - lanes(b, offset)).into();
        out[offset..offset + SIMD_WIDTH].copy_from_slice(&arr);
    }
    for i in chunks * SIMD_WIDTH..a.len() {
        out[i] = a[i] - b[i];
    }
}

/// Number of differing bits between two packed codes.
///
/// # Panics
/// Panics if codes have different lengths.
#[inline]
pub fn hamming_simd(a: &[u8], b: &[u8]) -> u32 {
    assert_eq!(a.len(), b.len(), "Codes must have same length");

    let mut words_a = a.chunks_exact(8);
    let mut words_b = b.chunks_exact(8);
    let mut bits = 0u32;

    for (wa, wb) in (&mut words_a).zip(&mut words_b) {
        let mut xa = [0u8; 8];
        let mut xb = [0u8; 8];
        xa.copy_from_slice(wa);
        xb.copy_from_slice(wb);
        bits += (u64::from_le_bytes(xa) ^ u64::from_le_bytes(xb)).count_ones();
    }

    for (x, y) in words_a.remainder().iter().zip(words_b.remainder()) {
        bits += (x ^ y).count_ones();
    }
    bits
}
