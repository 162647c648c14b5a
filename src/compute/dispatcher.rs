use crate::{cbt::sum_reduction::SumReductionTree, compute::dispatch};
use bytemuck::{Pod, Zeroable};
use std::sync::atomic::{AtomicU32, Ordering};

/// The argument layout of an indirect compute dispatch.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
pub struct DispatchIndirectArgs {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

/// The argument layout of an indirect non-indexed draw.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
pub struct DrawIndirectArgs {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

const DISPATCH_WORDS: usize = 3;
const DRAW_WORDS: usize = 4;

/// The side buffer the [`Dispatcher`] writes the launch sizes into.
///
/// Launches read their size directly from it, so no value ever has to return to the
/// host to size the following work.
pub struct IndirectBuffer {
    words: [AtomicU32; DISPATCH_WORDS + DRAW_WORDS],
}

impl Default for IndirectBuffer {
    fn default() -> Self {
        let buffer = Self {
            words: Default::default(),
        };

        buffer.write_dispatch(DispatchIndirectArgs { x: 1, y: 1, z: 1 });
        buffer.write_draw(DrawIndirectArgs {
            instance_count: 1,
            ..Default::default()
        });

        buffer
    }
}

impl IndirectBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<const N: usize>(&self, offset: usize) -> [u32; N] {
        std::array::from_fn(|index| self.words[offset + index].load(Ordering::Relaxed))
    }

    fn write(&self, offset: usize, values: &[u32]) {
        for (word, &value) in self.words[offset..].iter().zip(values) {
            word.store(value, Ordering::Relaxed);
        }
    }

    pub fn dispatch_args(&self) -> DispatchIndirectArgs {
        bytemuck::cast(self.read::<DISPATCH_WORDS>(0))
    }

    pub fn draw_args(&self) -> DrawIndirectArgs {
        bytemuck::cast(self.read::<DRAW_WORDS>(DISPATCH_WORDS))
    }

    pub(crate) fn write_dispatch(&self, args: DispatchIndirectArgs) {
        self.write(0, &bytemuck::cast::<_, [u32; DISPATCH_WORDS]>(args));
    }

    pub(crate) fn write_draw(&self, args: DrawIndirectArgs) {
        self.write(DISPATCH_WORDS, &bytemuck::cast::<_, [u32; DRAW_WORDS]>(args));
    }

    /// The raw bytes of the buffer, in the layout expected by indirect commands.
    pub fn to_bytes(&self) -> Vec<u8> {
        let words = self.read::<{ DISPATCH_WORDS + DRAW_WORDS }>(0);
        bytemuck::cast_slice::<u32, u8>(&words[..]).to_vec()
    }
}

/// Returns the number of workgroups needed to cover `invocation_count` invocations.
/// At least one workgroup is always launched.
#[inline]
pub fn workgroup_count(invocation_count: u32, workgroup_size: u32) -> u32 {
    invocation_count.div_ceil(workgroup_size).max(1)
}

/// The single invocation kernel that sizes the next launches from the current leaf count.
#[derive(Clone, Copy, Debug)]
pub struct Dispatcher {
    pub workgroup_size: u32,
}

impl Dispatcher {
    pub fn new(workgroup_size: u32) -> Self {
        Self { workgroup_size }
    }

    /// Writes the workgroup count of the next per leaf pass and the vertex count of the
    /// draw (three vertices per leaf) into the indirect buffer.
    pub fn run(&self, tree: &SumReductionTree, buffer: &IndirectBuffer) {
        dispatch(1, |_| {
            let leaf_count = tree.leaf_count();

            buffer.write_dispatch(DispatchIndirectArgs {
                x: workgroup_count(leaf_count, self.workgroup_size),
                y: 1,
                z: 1,
            });
            buffer.write_draw(DrawIndirectArgs {
                vertex_count: 3 * leaf_count,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0,
            });
        });
    }
}
