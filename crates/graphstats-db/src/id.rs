//! Resource ids carry their owner in the top 16 bits.

pub const OWNER_SHIFT: u32 = 48;
pub const LOCAL_ID_MASK: u64 = (1 << OWNER_SHIFT) - 1;

/// Owner encoded in `id`; `0` means unassigned.
pub fn owner_of(id: u64) -> u16 {
    (id >> OWNER_SHIFT) as u16
}

pub fn local_id(id: u64) -> u64 {
    id & LOCAL_ID_MASK
}

pub fn with_owner(id: u64, owner: u16) -> u64 {
    (u64::from(owner) << OWNER_SHIFT) | local_id(id)
}
