//! Parallel dispatch — thread assignment for one kernel invocation.
//!
//! The element range is cut into cache-line blocks (64 bytes of elements),
//! the blocks are balanced over the threads with `balance211`, and every
//! thread runs the kernel once on its contiguous range. Threads never share
//! a cache line of the destination except around a partial trailing block,
//! which belongs entirely to the last thread that owns blocks.

use std::ops::Range;

use rayon::prelude::*;

use crate::compiler::executable::EltwiseKernel;
use crate::config::jit_config;
use crate::types::{DType, EltwiseError, EltwiseResult, Element};

/// Bytes per partition block.
pub const BLOCK_BYTES: usize = 64;

/// Split `n` work items over `nthr` threads; thread `ithr` gets
/// `[start, end)`. The first `n % nthr` threads take `ceil(n / nthr)` items,
/// the others one less.
pub fn balance211(n: usize, nthr: usize, ithr: usize) -> (usize, usize) {
    if nthr <= 1 || n == 0 {
        return if ithr == 0 { (0, n) } else { (n, n) };
    }
    let big = n.div_ceil(nthr);
    let small = big - 1;
    let n_big = n - small * nthr;
    let start = if ithr <= n_big {
        ithr * big
    } else {
        n_big * big + (ithr - n_big) * small
    };
    let len = if ithr < n_big { big } else { small };
    let start = start.min(n);
    (start, (start + len).min(n))
}

/// Elements per partition block.
pub fn block_elems(dtype: DType) -> usize {
    BLOCK_BYTES / dtype.size_bytes()
}

/// Element range of thread `ithr` out of `nthr` for `total` elements.
pub fn thread_range(total: usize, dtype: DType, nthr: usize, ithr: usize) -> Range<usize> {
    let block = block_elems(dtype);
    let blocks = total.div_ceil(block);
    let (b_start, b_end) = balance211(blocks, nthr, ithr);
    let start = (b_start * block).min(total);
    let end = (b_end * block).min(total);
    start..end
}

/// Threads to use for `total` elements.
fn thread_count(total: usize) -> usize {
    if total < jit_config().parallel_threshold {
        1
    } else {
        rayon::current_num_threads().max(1)
    }
}

/// `dst[i] = f(src[i])` (or `f'(cmp[i]) * src[i]` for backward kernels).
pub fn run_parallel<T: Element>(
    kernel: &EltwiseKernel,
    src: &[T],
    cmp: Option<&[T]>,
    dst: &mut [T],
) -> EltwiseResult<()> {
    check_args::<T>(kernel, src.len(), cmp)?;
    if dst.len() != src.len() {
        return Err(EltwiseError::InvalidArgument(format!(
            "destination holds {} elements, source {}",
            dst.len(),
            src.len()
        )));
    }
    let cmp_ptr = cmp.map_or(std::ptr::null(), |c| c.as_ptr() as *const u8);
    // SAFETY: lengths and comparison presence were checked above; `dst` is
    // a distinct mutable borrow.
    unsafe {
        dispatch(
            kernel,
            src.as_ptr() as *const u8,
            cmp_ptr,
            dst.as_mut_ptr() as *mut u8,
            src.len(),
        );
    }
    Ok(())
}

/// `data[i] = f(data[i])`.
pub fn run_parallel_inplace<T: Element>(
    kernel: &EltwiseKernel,
    data: &mut [T],
    cmp: Option<&[T]>,
) -> EltwiseResult<()> {
    check_args::<T>(kernel, data.len(), cmp)?;
    let cmp_ptr = cmp.map_or(std::ptr::null(), |c| c.as_ptr() as *const u8);
    let ptr = data.as_mut_ptr() as *mut u8;
    // SAFETY: the kernel reads each chunk before storing it, so exact
    // aliasing of source and destination is allowed.
    unsafe {
        dispatch(kernel, ptr as *const u8, cmp_ptr, ptr, data.len());
    }
    Ok(())
}

fn check_args<T: Element>(kernel: &EltwiseKernel, len: usize, cmp: Option<&[T]>) -> EltwiseResult<()> {
    let desc = kernel.desc();
    if T::DTYPE != desc.dtype {
        return Err(EltwiseError::InvalidArgument(format!(
            "{} buffers passed to a {} kernel",
            T::DTYPE.name(),
            desc.dtype.name()
        )));
    }
    match (desc.is_backward(), cmp) {
        (true, None) => Err(EltwiseError::InvalidArgument(
            "backward kernels need a comparison buffer".into(),
        )),
        (false, Some(_)) => Err(EltwiseError::InvalidArgument(
            "comparison buffer passed to a forward kernel".into(),
        )),
        (true, Some(c)) if c.len() != len => Err(EltwiseError::InvalidArgument(format!(
            "comparison holds {} elements, source {len}",
            c.len()
        ))),
        _ => Ok(()),
    }
}

/// Fork one task per thread and run the kernel on each non-empty range.
///
/// # Safety
/// Pointers must be valid for `total` elements of the kernel's dtype.
unsafe fn dispatch(kernel: &EltwiseKernel, src: *const u8, cmp: *const u8, dst: *mut u8, total: usize) {
    if total == 0 {
        return;
    }
    let nthr = thread_count(total);
    if nthr == 1 {
        kernel.invoke(src, cmp, dst, total);
        return;
    }

    let dtype = kernel.desc().dtype;
    let esz = dtype.size_bytes();
    let (src_addr, cmp_addr, dst_addr) = (src as usize, cmp as usize, dst as usize);

    (0..nthr).into_par_iter().for_each(|ithr| {
        let range = thread_range(total, dtype, nthr, ithr);
        if range.is_empty() {
            return;
        }
        let off = range.start * esz;
        let cmp_ptr = if cmp_addr == 0 {
            std::ptr::null()
        } else {
            (cmp_addr + off) as *const u8
        };
        unsafe {
            kernel.invoke(
                (src_addr + off) as *const u8,
                cmp_ptr,
                (dst_addr + off) as *mut u8,
                range.len(),
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance211_even_and_uneven() {
        assert_eq!(balance211(8, 4, 0), (0, 2));
        assert_eq!(balance211(8, 4, 3), (6, 8));
        // 10 over 4: 3, 3, 2, 2
        let parts: Vec<_> = (0..4).map(|i| balance211(10, 4, i)).collect();
        assert_eq!(parts, vec![(0, 3), (3, 6), (6, 8), (8, 10)]);
    }

    #[test]
    fn test_balance211_more_threads_than_work() {
        let parts: Vec<_> = (0..5).map(|i| balance211(2, 5, i)).collect();
        assert_eq!(parts, vec![(0, 1), (1, 2), (2, 2), (2, 2), (2, 2)]);
        assert_eq!(balance211(7, 1, 0), (0, 7));
        assert_eq!(balance211(0, 3, 1), (0, 0));
    }

    #[test]
    fn test_thread_range_blocks() {
        assert_eq!(block_elems(DType::F32), 16);
        assert_eq!(block_elems(DType::BF16), 32);
        // 100 f32 = 7 blocks (last partial) over 3 threads: 3, 2, 2 blocks
        assert_eq!(thread_range(100, DType::F32, 3, 0), 0..48);
        assert_eq!(thread_range(100, DType::F32, 3, 1), 48..80);
        assert_eq!(thread_range(100, DType::F32, 3, 2), 80..100);
    }

    #[test]
    fn test_trailing_block_single_owner() {
        // 2 blocks over 4 threads: the partial block goes to thread 1 only
        let ranges: Vec<_> = (0..4).map(|i| thread_range(20, DType::F32, 4, i)).collect();
        assert_eq!(ranges[0], 0..16);
        assert_eq!(ranges[1], 16..20);
        assert!(ranges[2].is_empty() && ranges[3].is_empty());
    }
}
