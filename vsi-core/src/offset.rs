use bytemuck::{Pod, Zeroable};

/// A byte offset from the base of its owning region. Offsets are stable
/// across processes; raw addresses built from them are not and must never
/// leak past [`crate::region::Region::to_address`]/[`crate::region::Region::to_offset`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct Offset(pub u64);

impl Offset {
    /// Sentinel for "no offset" — used for list/tree terminators (`END` in
    /// the data model) and free-list tails.
    pub const NULL: Offset = Offset(u64::MAX);

    #[inline]
    pub fn is_null(self) -> bool {
        self == Offset::NULL
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn checked_add(self, delta: u64) -> Option<Offset> {
        self.0.checked_add(delta).map(Offset)
    }
}

impl std::fmt::Debug for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "Offset(NULL)")
        } else {
            write!(f, "Offset({:#x})", self.0)
        }
    }
}

impl From<u64> for Offset {
    fn from(v: u64) -> Self {
        Offset(v)
    }
}
