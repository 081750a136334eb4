//! Teams: strided subsets of the world PE set.

/// Team handle. Non-negative values index the per-PE team pool.
pub type TeamId = i32;

pub const TEAM_INVALID: TeamId = -1;
pub const TEAM_WORLD: TeamId = 0;
pub const TEAM_SHARED: TeamId = 1;
pub const TEAM_NODE: TeamId = 2;

/// A (start, stride, size) slice of the world team, plus the calling PE's
/// rank within it (negative when the caller is not a member).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Team {
    start: i32,
    stride: i32,
    size: i32,
    my_pe: i32,
}

impl Team {
    pub(crate) fn new(start: i32, stride: i32, size: i32, world_pe: i32) -> Self {
        let my_pe = Self::rank_of(start, stride, size, world_pe);
        Self {
            start,
            stride,
            size,
            my_pe,
        }
    }

    fn rank_of(start: i32, stride: i32, size: i32, world_pe: i32) -> i32 {
        let offset = world_pe - start;
        if stride > 0 && offset >= 0 && offset % stride == 0 && offset / stride < size {
            offset / stride
        } else {
            -1
        }
    }

    /// Number of PEs in the team.
    #[inline]
    pub fn size(&self) -> i32 {
        self.size
    }

    /// Calling PE's rank within the team, or -1 if not a member.
    #[inline]
    pub fn my_pe(&self) -> i32 {
        self.my_pe
    }

    #[inline]
    pub(crate) fn start(&self) -> i32 {
        self.start
    }

    #[inline]
    pub(crate) fn stride(&self) -> i32 {
        self.stride
    }

    /// World rank of team rank `pe`, or -1 if out of range.
    pub fn world_pe(&self, pe: i32) -> i32 {
        if pe < 0 || pe >= self.size {
            return -1;
        }
        self.start + pe * self.stride
    }

    /// Translate `src_pe` in this team to the corresponding rank in
    /// `dest`, or -1 when the PE is not a member of `dest`.
    pub fn translate(&self, src_pe: i32, dest: &Team) -> i32 {
        let world = self.world_pe(src_pe);
        if world < 0 {
            return -1;
        }
        Team::rank_of(dest.start, dest.stride, dest.size, world)
    }
}
