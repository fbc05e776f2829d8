//! Device profile: which vector width classes the host can run.

use std::fmt;
use std::str::FromStr;

use super::hw_info::IsaFeatures;

/// Vector width class a kernel is generated for.
///
/// One kernel targets exactly one class; the class is fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VectorWidth {
    /// 4 f32 lanes, SSE4.1 (`xmm`). Blends need the mask in `xmm0`.
    Narrow,
    /// 8 f32 lanes, AVX2 + FMA (`ymm`).
    Medium,
    /// 16 f32 lanes, AVX-512F (`zmm`) with opmask predicates.
    Wide,
}

impl VectorWidth {
    pub const ALL: [VectorWidth; 3] = [VectorWidth::Narrow, VectorWidth::Medium, VectorWidth::Wide];

    /// f32 lanes per register.
    #[inline]
    pub const fn lanes(self) -> usize {
        match self {
            VectorWidth::Narrow => 4,
            VectorWidth::Medium => 8,
            VectorWidth::Wide => 16,
        }
    }

    /// Register size in bytes.
    #[inline]
    pub const fn vlen_bytes(self) -> usize {
        self.lanes() * 4
    }

    /// Architectural vector registers addressable by generated code.
    #[inline]
    pub const fn num_vregs(self) -> u8 {
        match self {
            VectorWidth::Narrow | VectorWidth::Medium => 16,
            VectorWidth::Wide => 32,
        }
    }

    /// Fused multiply-add is available (Horner steps are single-rounded).
    #[inline]
    pub const fn has_fma(self) -> bool {
        !matches!(self, VectorWidth::Narrow)
    }

    pub fn name(self) -> &'static str {
        match self {
            VectorWidth::Narrow => "sse41",
            VectorWidth::Medium => "avx2",
            VectorWidth::Wide => "avx512",
        }
    }
}

impl fmt::Display for VectorWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VectorWidth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sse41" | "sse4.1" | "narrow" => Ok(VectorWidth::Narrow),
            "avx2" | "medium" => Ok(VectorWidth::Medium),
            "avx512" | "avx512f" | "wide" => Ok(VectorWidth::Wide),
            other => Err(format!("unknown vector width '{other}'")),
        }
    }
}

/// Host capabilities relevant to eltwise kernel generation.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub isa: IsaFeatures,
}

impl DeviceProfile {
    /// Detect the current hardware.
    pub fn detect() -> Self {
        let isa = IsaFeatures::detect();
        log::debug!("eltwise-jit: host ISA {isa}");
        DeviceProfile { isa }
    }

    /// Build a profile from explicit features (tests, cross generation).
    pub fn from_features(isa: IsaFeatures) -> Self {
        DeviceProfile { isa }
    }

    /// Whether kernels of this class can run on the host.
    pub fn supports(&self, width: VectorWidth) -> bool {
        cfg!(target_arch = "x86_64")
            && match width {
                VectorWidth::Narrow => self.isa.sse41,
                VectorWidth::Medium => self.isa.avx2 && self.isa.fma,
                VectorWidth::Wide => self.isa.avx512f,
            }
    }

    /// Supported classes, narrowest first.
    pub fn supported_widths(&self) -> Vec<VectorWidth> {
        VectorWidth::ALL
            .into_iter()
            .filter(|&w| self.supports(w))
            .collect()
    }

    /// Widest supported class not above `cap`.
    pub fn best_width(&self, cap: Option<VectorWidth>) -> Option<VectorWidth> {
        VectorWidth::ALL
            .into_iter()
            .rev()
            .filter(|&w| cap.map_or(true, |c| w <= c))
            .find(|&w| self.supports(w))
    }

    /// Native bf16 rounding is used for wide kernels when available.
    pub fn native_bf16(&self, width: VectorWidth) -> bool {
        width == VectorWidth::Wide && self.isa.native_bf16()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avx2_host() -> DeviceProfile {
        DeviceProfile::from_features(IsaFeatures {
            sse41: true,
            avx2: true,
            fma: true,
            ..IsaFeatures::default()
        })
    }

    #[test]
    fn test_width_geometry() {
        assert_eq!(VectorWidth::Narrow.vlen_bytes(), 16);
        assert_eq!(VectorWidth::Medium.vlen_bytes(), 32);
        assert_eq!(VectorWidth::Wide.vlen_bytes(), 64);
        assert_eq!(VectorWidth::Wide.num_vregs(), 32);
        assert!(!VectorWidth::Narrow.has_fma());
    }

    #[test]
    fn test_parse_width() {
        assert_eq!("AVX2".parse::<VectorWidth>(), Ok(VectorWidth::Medium));
        assert_eq!("sse4.1".parse::<VectorWidth>(), Ok(VectorWidth::Narrow));
        assert_eq!(" avx512 ".parse::<VectorWidth>(), Ok(VectorWidth::Wide));
        assert!("neon".parse::<VectorWidth>().is_err());
    }

    #[test]
    #[cfg(target_arch = "x86_64")]
    fn test_best_width_respects_cap() {
        let p = avx2_host();
        assert_eq!(p.best_width(None), Some(VectorWidth::Medium));
        assert_eq!(p.best_width(Some(VectorWidth::Narrow)), Some(VectorWidth::Narrow));
        assert_eq!(p.best_width(Some(VectorWidth::Wide)), Some(VectorWidth::Medium));
        assert_eq!(p.supported_widths(), vec![VectorWidth::Narrow, VectorWidth::Medium]);
        assert!(!p.native_bf16(VectorWidth::Medium));
    }

    #[test]
    fn test_no_features_no_width() {
        let p = DeviceProfile::from_features(IsaFeatures::default());
        assert_eq!(p.best_width(None), None);
    }
}
