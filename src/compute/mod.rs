//! The data-parallel compute model all passes of the tessellation run on.
//!
//! Every pass is a kernel, a function of the invocation index, launched for a number of
//! invocations. Kernels communicate only through atomics or through disjoint output
//! elements, exactly like accelerator kernels writing to storage buffers.
//! A dispatch returns once every invocation has finished, which acts as the barrier
//! between two consecutive passes.
//!
//! The invocations are executed on the `rayon` thread pool.

use rayon::prelude::*;

pub mod dispatcher;
pub mod rebuild;

pub use dispatcher::{
    workgroup_count, DispatchIndirectArgs, Dispatcher, DrawIndirectArgs, IndirectBuffer,
};
pub use rebuild::SumReductionRebuildPipeline;

/// The default number of invocations per workgroup of kernels launched per leaf.
pub const DEFAULT_WORKGROUP_SIZE: u32 = 64;

/// Launches `kernel` once for every invocation index in `0..invocation_count`.
pub fn dispatch<K>(invocation_count: u32, kernel: K)
where
    K: Fn(u32) + Send + Sync,
{
    (0..invocation_count).into_par_iter().for_each(kernel);
}

/// Launches `workgroup_count` workgroups of `workgroup_size` invocations.
///
/// As on an accelerator, the last workgroup may contain invocations past the end of the
/// work, which the kernel has to discard itself.
pub fn dispatch_workgroups<K>(workgroup_count: u32, workgroup_size: u32, kernel: K)
where
    K: Fn(u32) + Send + Sync,
{
    dispatch(workgroup_count * workgroup_size, kernel);
}

/// Launches a workgroup grid whose size is read from the indirect buffer.
pub fn dispatch_indirect<K>(buffer: &IndirectBuffer, workgroup_size: u32, kernel: K)
where
    K: Fn(u32) + Send + Sync,
{
    let args = buffer.dispatch_args();
    dispatch_workgroups(args.x * args.y * args.z, workgroup_size, kernel);
}

/// Launches one invocation per element of `output`, each owning its element exclusively.
pub fn dispatch_over<T, K>(output: &mut [T], kernel: K)
where
    T: Send,
    K: Fn(usize, &mut T) + Send + Sync,
{
    output
        .par_iter_mut()
        .enumerate()
        .for_each(|(index, element)| kernel(index, element));
}

/// Launches one invocation per chunk of `chunk_size` consecutive elements of `output`.
pub fn dispatch_chunks<T, K>(output: &mut [T], chunk_size: usize, kernel: K)
where
    T: Send,
    K: Fn(usize, &mut [T]) + Send + Sync,
{
    output
        .par_chunks_mut(chunk_size)
        .enumerate()
        .for_each(|(index, chunk)| kernel(index, chunk));
}
