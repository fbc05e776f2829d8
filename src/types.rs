//! Core types shared by the code generator, the executable wrapper and the
//! dispatch layer: transform kinds, data types, kernel descriptors, errors.

use std::fmt;

use thiserror::Error;

/// Elementwise transform implemented by a generated kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EltwiseAlg {
    /// `|x|`
    Abs,
    /// `x * x`
    Square,
    /// `x > 0 ? sqrt(x) : 0`
    Sqrt,
    /// `alpha * x + beta`
    Linear,
    /// `x > 0 ? x : alpha * x` (plain max-with-zero when `alpha == 0`)
    Relu,
    /// `min(max(x, 0), alpha)`
    BoundedRelu,
    /// `x > 0 ? x : alpha * (exp(x) - 1)`
    Elu,
    /// `exp(x)`
    Exp,
    /// `1 / (1 + exp(-x))`
    Logistic,
    /// `tanh(x)`
    Tanh,
    /// `ln(1 + exp(x))`
    SoftRelu,
}

impl EltwiseAlg {
    pub const ALL: [EltwiseAlg; 11] = [
        EltwiseAlg::Abs,
        EltwiseAlg::Square,
        EltwiseAlg::Sqrt,
        EltwiseAlg::Linear,
        EltwiseAlg::Relu,
        EltwiseAlg::BoundedRelu,
        EltwiseAlg::Elu,
        EltwiseAlg::Exp,
        EltwiseAlg::Logistic,
        EltwiseAlg::Tanh,
        EltwiseAlg::SoftRelu,
    ];

    /// Short lowercase name, used in logs and dump file names.
    pub fn name(self) -> &'static str {
        match self {
            EltwiseAlg::Abs => "abs",
            EltwiseAlg::Square => "square",
            EltwiseAlg::Sqrt => "sqrt",
            EltwiseAlg::Linear => "linear",
            EltwiseAlg::Relu => "relu",
            EltwiseAlg::BoundedRelu => "bounded_relu",
            EltwiseAlg::Elu => "elu",
            EltwiseAlg::Exp => "exp",
            EltwiseAlg::Logistic => "logistic",
            EltwiseAlg::Tanh => "tanh",
            EltwiseAlg::SoftRelu => "soft_relu",
        }
    }

    /// Whether a backward (derivative) kernel exists for this transform.
    pub fn has_backward(self) -> bool {
        matches!(self, EltwiseAlg::Relu)
    }
}

impl fmt::Display for EltwiseAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Storage type of the source, comparison and destination buffers.
///
/// Arithmetic always happens in f32; bf16 buffers are widened on load and
/// rounded to nearest-even on store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    BF16,
}

impl DType {
    /// Size of one element in bytes.
    #[inline]
    pub const fn size_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::BF16 => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::BF16 => "bf16",
        }
    }
}

/// Forward kernels compute `f(x)`; backward kernels compute `f'(x) * dy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Propagation {
    #[default]
    Forward,
    Backward,
}

/// Everything that determines the generated code of one kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EltwiseDesc {
    pub alg: EltwiseAlg,
    pub alpha: f32,
    pub beta: f32,
    pub dtype: DType,
    pub prop: Propagation,
}

impl EltwiseDesc {
    /// Forward f32 descriptor.
    pub fn new(alg: EltwiseAlg, alpha: f32, beta: f32) -> Self {
        EltwiseDesc {
            alg,
            alpha,
            beta,
            dtype: DType::F32,
            prop: Propagation::Forward,
        }
    }

    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn backward(mut self) -> Self {
        self.prop = Propagation::Backward;
        self
    }

    #[inline]
    pub fn is_backward(&self) -> bool {
        self.prop == Propagation::Backward
    }

    /// Reject combinations that have no formula variant.
    pub fn validate(&self) -> EltwiseResult<()> {
        if self.is_backward() && !self.alg.has_backward() {
            return Err(EltwiseError::Unsupported(format!(
                "backward kernel for {}",
                self.alg
            )));
        }
        Ok(())
    }
}

/// Scalar element types accepted by the safe dispatch entry points.
pub trait Element: Copy + Send + Sync + 'static {
    const DTYPE: DType;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;
}

impl Element for half::bf16 {
    const DTYPE: DType = DType::BF16;
}

#[derive(Debug, Error)]
pub enum EltwiseError {
    #[error("unsupported eltwise configuration: {0}")]
    Unsupported(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("code generation failed: {0}")]
    Codegen(String),
    #[error("executable memory: {0}")]
    Executable(String),
}

pub type EltwiseResult<T> = Result<T, EltwiseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backward_only_for_relu() {
        for alg in EltwiseAlg::ALL {
            let desc = EltwiseDesc::new(alg, 0.0, 0.0).backward();
            assert_eq!(desc.validate().is_ok(), alg == EltwiseAlg::Relu, "{alg}");
        }
    }

    #[test]
    fn test_dtype_sizes() {
        assert_eq!(DType::F32.size_bytes(), 4);
        assert_eq!(DType::BF16.size_bytes(), 2);
        assert_eq!(<half::bf16 as Element>::DTYPE, DType::BF16);
    }

    #[test]
    fn test_error_display() {
        let err = EltwiseDesc::new(EltwiseAlg::Tanh, 0.0, 0.0)
            .backward()
            .validate()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported eltwise configuration: backward kernel for tanh"
        );
    }
}
