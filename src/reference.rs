//! Scalar reference implementations.
//!
//! Plain f32 formulas for every transform, used as ground truth by the
//! tests and the benchmarks. They define the per-lane numeric policies the
//! generated code follows (sqrt of non-positive is 0, soft_relu is the
//! identity above 88).

use crate::types::{DType, EltwiseAlg, EltwiseDesc};

/// Inputs above this make soft_relu return the input itself.
pub const SOFT_RELU_IDENTITY: f32 = 88.0;

/// `f(x)` for one element.
pub fn eltwise_fwd(alg: EltwiseAlg, x: f32, alpha: f32, beta: f32) -> f32 {
    match alg {
        EltwiseAlg::Abs => x.abs(),
        EltwiseAlg::Square => x * x,
        EltwiseAlg::Sqrt => {
            if x > 0.0 {
                x.sqrt()
            } else {
                0.0
            }
        }
        EltwiseAlg::Linear => alpha.mul_add(x, beta),
        // max with +0: negative lanes and NaN become +0
        EltwiseAlg::Relu if alpha == 0.0 => {
            if x > 0.0 {
                x
            } else {
                0.0
            }
        }
        EltwiseAlg::Relu => {
            if x > 0.0 {
                x
            } else {
                x * alpha
            }
        }
        EltwiseAlg::BoundedRelu => {
            let y = if x > 0.0 { x } else { 0.0 };
            if y < alpha {
                y
            } else {
                alpha
            }
        }
        EltwiseAlg::Elu => {
            if x > 0.0 {
                x
            } else {
                alpha * x.exp_m1()
            }
        }
        EltwiseAlg::Exp => x.exp(),
        EltwiseAlg::Logistic => {
            let e = (-x.abs()).exp();
            let s = e / (1.0 + e);
            if x < 0.0 {
                s
            } else {
                1.0 - s
            }
        }
        EltwiseAlg::Tanh => x.tanh(),
        EltwiseAlg::SoftRelu => {
            if x > SOFT_RELU_IDENTITY {
                x
            } else {
                x.exp().ln_1p()
            }
        }
    }
}

/// Derivative applied to an incoming gradient: `cmp > 0 ? dy : alpha * dy`.
pub fn relu_bwd(dy: f32, cmp: f32, alpha: f32) -> f32 {
    if cmp > 0.0 {
        dy
    } else {
        dy * alpha
    }
}

/// Apply `desc` to a whole f32 buffer, rounding through bf16 when the
/// descriptor says so.
pub fn eltwise_ref(desc: &EltwiseDesc, src: &[f32], cmp: Option<&[f32]>) -> Vec<f32> {
    let round = |v: f32| match desc.dtype {
        DType::F32 => v,
        DType::BF16 => half::bf16::from_f32(v).to_f32(),
    };
    src.iter()
        .enumerate()
        .map(|(i, &x)| {
            let x = round(x);
            let y = match cmp {
                Some(c) if desc.is_backward() => relu_bwd(x, round(c[i]), desc.alpha),
                _ => eltwise_fwd(desc.alg, x, desc.alpha, desc.beta),
            };
            round(y)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policies() {
        assert_eq!(eltwise_fwd(EltwiseAlg::Sqrt, -4.0, 0.0, 0.0), 0.0);
        assert_eq!(eltwise_fwd(EltwiseAlg::Sqrt, 4.0, 0.0, 0.0), 2.0);
        assert_eq!(eltwise_fwd(EltwiseAlg::Relu, -2.0, 0.1, 0.0), -2.0 * 0.1);
        assert_eq!(eltwise_fwd(EltwiseAlg::BoundedRelu, 9.0, 6.0, 0.0), 6.0);
        assert_eq!(eltwise_fwd(EltwiseAlg::Relu, -3.0, 0.0, 0.0).to_bits(), 0.0f32.to_bits());
        assert_eq!(eltwise_fwd(EltwiseAlg::SoftRelu, 100.0, 0.0, 0.0), 100.0);
        assert_eq!(eltwise_fwd(EltwiseAlg::Linear, 2.0, 3.0, -1.0), 5.0);
    }

    #[test]
    fn test_logistic_is_stable_for_large_inputs() {
        assert_eq!(eltwise_fwd(EltwiseAlg::Logistic, 200.0, 0.0, 0.0), 1.0);
        assert_eq!(eltwise_fwd(EltwiseAlg::Logistic, -200.0, 0.0, 0.0), 0.0);
        assert!((eltwise_fwd(EltwiseAlg::Logistic, 0.0, 0.0, 0.0) - 0.5).abs() < 1e-7);
    }

    #[test]
    fn test_relu_bwd() {
        assert_eq!(relu_bwd(3.0, 1.0, 0.5), 3.0);
        assert_eq!(relu_bwd(3.0, -1.0, 0.5), 1.5);
        assert_eq!(relu_bwd(3.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn test_bf16_rounding_in_ref() {
        let desc = EltwiseDesc::new(EltwiseAlg::Abs, 0.0, 0.0).with_dtype(DType::BF16);
        let out = eltwise_ref(&desc, &[-1.00390625], None);
        // 1 + 2^-8 is a tie between 1.0 and 1 + 2^-7; even mantissa wins
        assert_eq!(out, vec![1.0]);
    }
}
