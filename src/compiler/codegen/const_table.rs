//! Constant tables for the transform formulas.
//!
//! Each transform reads its coefficients, thresholds and bit masks from a
//! table of 32-bit words. Every word is replicated across all lanes of the
//! target vector class, so a formula addresses entry `i` as one full vector
//! at byte offset `i * vlen`. The index layout below is shared between the
//! table builder and the formulas and must not be reordered.
//!
//! The exponential needs entries 0..=11 of the exp-family table, so Elu,
//! Logistic and Tanh all use that table and Exp is simply its prefix.

use crate::types::EltwiseAlg;

/// Shared table of Exp, Elu, Logistic and Tanh.
pub mod exp_idx {
    pub const ONE: usize = 0;
    pub const HALF: usize = 1;
    pub const LOG2E: usize = 2;
    pub const LN2: usize = 3;
    /// IEEE-754 exponent bias (integer 0x7f).
    pub const EXP_BIAS: usize = 4;
    /// Horner coefficients of `e^r`, constant term first. The linear term is
    /// `ONE`.
    pub const P0: usize = 5;
    pub const P2: usize = 6;
    pub const P3: usize = 7;
    pub const P4: usize = 8;
    pub const P5: usize = 9;
    /// Just past ln(FLT_MAX): clamped lanes overflow to +inf.
    pub const EXP_HI: usize = 10;
    /// ln(FLT_MIN): lanes below are forced to zero.
    pub const EXP_LO: usize = 11;
    pub const SIGN_MASK: usize = 12;
    /// Below this |x|, tanh(x) == x in f32.
    pub const TANH_LINEAR: usize = 13;
    /// Below this |x| the odd polynomial is accurate (ln(3)/2).
    pub const TANH_POLY: usize = 14;
    /// Above this |x|, tanh(x) rounds to 1.0.
    pub const TANH_SAT: usize = 15;
    pub const NEG_TWO: usize = 16;
    pub const ABS_MASK: usize = 17;
    pub const TANH_P0: usize = 18;
    pub const TANH_P1: usize = 19;
    pub const TANH_P2: usize = 20;
    pub const TANH_P3: usize = 21;
    pub const TANH_P4: usize = 22;
    pub const ALPHA: usize = 23;
    pub const ZERO: usize = 24;
    pub const LEN: usize = 25;
}

/// SoftRelu table.
pub mod soft_relu_idx {
    pub const ONE: usize = 0;
    pub const HALF: usize = 1;
    pub const LOG2E: usize = 2;
    pub const LN2: usize = 3;
    pub const EXP_BIAS: usize = 4;
    /// 126.0: exponent bias minus one (mantissa normalized to [0.5, 1)).
    pub const EXPONENT_BIAS_M1: usize = 5;
    pub const MANTISSA_MASK: usize = 6;
    pub const HALF_EXPONENT: usize = 7;
    /// ln(1 + y) Horner coefficients, constant term first.
    pub const LN_P0: usize = 8;
    pub const LN_P8: usize = 16;
    /// e^r Horner coefficients, constant term first.
    pub const EXP_P0: usize = 17;
    pub const EXP_P1: usize = 18;
    pub const EXP_P2: usize = 19;
    pub const EXP_P3: usize = 20;
    pub const EXP_P4: usize = 21;
    pub const EXP_P5: usize = 22;
    pub const NEG_ONE: usize = 23;
    /// Above this the result is the input itself.
    pub const CLAMP_HI: usize = 24;
    /// Inputs are clamped from below here before the exponential.
    pub const CLAMP_LO: usize = 25;
    pub const LEN: usize = 26;
}

/// Relu and BoundedRelu.
pub mod relu_idx {
    pub const ALPHA: usize = 0;
    pub const ZERO: usize = 1;
}

pub mod linear_idx {
    pub const ALPHA: usize = 0;
    pub const BETA: usize = 1;
}

pub mod abs_idx {
    pub const ABS_MASK: usize = 0;
}

pub mod sqrt_idx {
    pub const ZERO: usize = 0;
}

const EXP_FAMILY: [u32; 23] = [
    0x3f80_0000, // 1.0
    0x3f00_0000, // 0.5
    0x3fb8_aa3b, // log2(e)
    0x3f31_7218, // ln(2)
    0x0000_007f, // exponent bias
    0x3f80_0000, // p0 = 1.0 (exp(0) == 1 exactly)
    0x3eff_fe85, // p2 = 0.4999887
    0x3e2a_aa3e, // p3 = 0.16666505
    0x3d2b_b1b1, // p4 = 0.041917507
    0x3c09_1ec1, // p5 = 0.008369149
    0x42b2_0000, // 89.0
    0xc2ae_ac50, // ln(FLT_MIN)
    0x8000_0000, // sign mask
    0x39dd_b3d7, // sqrt(3) * 2^-12
    0x3f0c_9f54, // ln(3) / 2
    0x4110_2cb4, // atanh(1 - 2^-25)
    0xc000_0000, // -2.0
    0x7fff_ffff, // abs mask
    0x3f7f_ffff, // tanh p0
    0xbeaa_a9cf, // tanh p1
    0x3e08_5f1f, // tanh p2
    0xbd57_2bda, // tanh p3
    0x3c84_fd08, // tanh p4
];

const SOFT_RELU: [u32; 26] = [
    0x3f80_0000, // 1.0
    0x3f00_0000, // 0.5
    0x3fb8_aa3b, // log2(e)
    0x3f31_7218, // ln(2)
    0x0000_007f, // exponent bias
    0x42fc_0000, // 126.0
    0x807f_ffff, // keeps sign and mantissa
    0x3f00_0000, // exponent of 0.5
    0xb2b4_637d, // ln p0 = 0.0000000244
    0x3f7f_ff8e, // ln p1 = 0.9999976971
    0xbf00_1759, // ln p2 = -0.5002478215
    0x3ea7_0608, // ln p3 = 0.3272714505
    0xbea3_d7bf, // ln p4 = -0.3153830071
    0xbe36_1d04, // ln p5 = -0.1701777461
    0xbfa8_f1e6, // ln p6 = -1.3254635147
    0xbfe1_e812, // ln p7 = -1.7971917960
    0xbfc4_d30e, // ln p8 = -1.5652673123
    0x3f80_0000, // exp p0 = 1.0
    0x3f80_0000, // exp p1 = 1.0
    0x3eff_fe85, // exp p2
    0x3e2a_aa3e, // exp p3
    0x3d2b_b1b1, // exp p4
    0x3c09_1ec1, // exp p5
    0xbf80_0000, // -1.0
    0x42b0_0000, // 88.0, keeps 2^-n representable
    // -15.4. Between here and -10 the logarithm sees 1 + a few ulp, so the
    // result keeps only a few bits and reaches 0 near -15; absolute error
    // stays near 1e-6.
    0xc176_6666,
];

/// Ordered lane-replicated constants consumed by one kernel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConstTable {
    words: Vec<u32>,
}

impl ConstTable {
    /// Table layout the formula of `alg` expects.
    pub fn for_alg(alg: EltwiseAlg, alpha: f32, beta: f32) -> Self {
        let words = match alg {
            EltwiseAlg::Relu | EltwiseAlg::BoundedRelu => vec![alpha.to_bits(), 0],
            EltwiseAlg::Linear => vec![alpha.to_bits(), beta.to_bits()],
            EltwiseAlg::Abs => vec![0x7fff_ffff],
            EltwiseAlg::Sqrt => vec![0],
            EltwiseAlg::Square => Vec::new(),
            EltwiseAlg::Exp | EltwiseAlg::Elu | EltwiseAlg::Logistic | EltwiseAlg::Tanh => {
                let mut w = EXP_FAMILY.to_vec();
                w.push(alpha.to_bits());
                w.push(0);
                w
            }
            EltwiseAlg::SoftRelu => SOFT_RELU.to_vec(),
        };
        ConstTable { words }
    }

    /// Append a word and return its index.
    pub fn push(&mut self, word: u32) -> usize {
        self.words.push(word);
        self.words.len() - 1
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Serialize with every word repeated `lanes` times (little endian).
    pub fn to_bytes(&self, lanes: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.words.len() * lanes * 4);
        for &w in &self.words {
            for _ in 0..lanes {
                out.extend_from_slice(&w.to_le_bytes());
            }
        }
        out
    }
}
