//! Host ISA feature detection.
//!
//! Collects the x86 features that decide which vector width classes a kernel
//! can target and whether bf16 stores can use the native conversion
//! instruction.

use std::fmt;

/// ISA feature set relevant to kernel generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IsaFeatures {
    pub sse41: bool,
    pub avx2: bool,
    pub fma: bool,
    pub avx512f: bool,
    pub avx512bw: bool,
    pub avx512vl: bool,
    /// `vcvtneps2bf16` (CPUID.(EAX=7,ECX=1):EAX[5]).
    pub avx512_bf16: bool,
}

impl IsaFeatures {
    /// Detect features of the current machine.
    pub fn detect() -> Self {
        detect_isa_features()
    }

    /// Native f32 -> bf16 rounding is usable for both full vectors and
    /// single-lane tails.
    pub fn native_bf16(&self) -> bool {
        self.avx512f && self.avx512vl && self.avx512_bf16
    }
}

impl fmt::Display for IsaFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut feats = Vec::new();
        if self.avx512f {
            feats.push("AVX-512");
        }
        if self.avx512_bf16 {
            feats.push("BF16");
        }
        if self.avx2 {
            feats.push("AVX2");
        }
        if self.fma {
            feats.push("FMA");
        }
        if self.sse41 {
            feats.push("SSE4.1");
        }
        if feats.is_empty() {
            feats.push("Scalar");
        }
        write!(f, "{}", feats.join("+"))
    }
}

// ── ISA feature detection ───────────────────────────────────────────────

fn detect_isa_features() -> IsaFeatures {
    #[cfg(target_arch = "x86_64")]
    {
        let avx512f = is_x86_feature_detected!("avx512f");
        return IsaFeatures {
            sse41: is_x86_feature_detected!("sse4.1"),
            avx2: is_x86_feature_detected!("avx2"),
            fma: is_x86_feature_detected!("fma"),
            avx512f,
            avx512bw: is_x86_feature_detected!("avx512bw"),
            avx512vl: is_x86_feature_detected!("avx512vl"),
            // OS support for the zmm state is already implied by avx512f.
            avx512_bf16: avx512f && detect_avx512_bf16(),
        };
    }
    #[allow(unreachable_code)]
    IsaFeatures::default()
}

#[cfg(target_arch = "x86_64")]
#[allow(unused_unsafe)]
fn detect_avx512_bf16() -> bool {
    use std::arch::x86_64::{__cpuid, __cpuid_count};

    let max_leaf = unsafe { __cpuid(0) }.eax;
    if max_leaf < 7 {
        return false;
    }
    let max_subleaf = unsafe { __cpuid_count(7, 0) }.eax;
    if max_subleaf < 1 {
        return false;
    }
    let leaf7_1 = unsafe { __cpuid_count(7, 1) };
    leaf7_1.eax & (1 << 5) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isa_detect() {
        let isa = IsaFeatures::detect();
        #[cfg(target_arch = "x86_64")]
        {
            if isa.avx2 {
                assert!(isa.sse41);
            }
        }
        if isa.native_bf16() {
            assert!(isa.avx512_bf16 && isa.avx512vl);
        }
        eprintln!("IsaFeatures: {isa}");
    }

    #[test]
    fn test_display_scalar() {
        assert_eq!(IsaFeatures::default().to_string(), "Scalar");
    }
}
