//! Fixed-capacity pool of tagged message slots.
//!
//! Slots go through a two-phase `allocate` / `commit` handshake so a producer can fill a
//! message before readers ([`MsgPool::oldest`], [`MsgPool::by_uid`], [`MsgPool::sent_by_tag`])
//! can observe it. Every allocated slot ages on [`MsgPool::tick`] and is force-freed when its
//! time-to-live runs out, which reclaims transmit slots whose completion never arrives.
//!
//! A [`MsgHandle`] carries the slot's allocation `uid`, so a handle to a slot that has since
//! been freed (or freed and reused) no longer resolves. Freeing twice is therefore a no-op
//! rather than a corruption of an unrelated message.

use core::fmt;

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

use crate::message::{RawPtpMessage, Tag};
use crate::result::PoolError;

/// Time-to-live value that exempts a slot from aging.
pub const DONT_AGE: u32 = u32::MAX;

pub const RX_POOL_CAPACITY: usize = 32;
pub const TX_POOL_CAPACITY: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MsgHandle {
    index: usize,
    uid: u32,
}

impl MsgHandle {
    pub fn uid(&self) -> u32 {
        self.uid
    }
}

#[derive(Clone, Copy)]
struct Slot {
    allocated: bool,
    committed: bool,
    sent: bool,
    tag: Tag,
    uid: u32,
    ttl: u32,
    msg: RawPtpMessage,
}

impl Slot {
    const EMPTY: Slot = Slot {
        allocated: false,
        committed: false,
        sent: false,
        tag: Tag::RANDOM,
        uid: 0,
        ttl: 0,
        msg: RawPtpMessage::empty(),
    };
}

pub struct MsgPool<const N: usize> {
    slots: [Slot; N],
    used: usize,
    last_uid: u32,
    rng: SmallRng,
}

impl<const N: usize> MsgPool<N> {
    pub fn new(seed: u64) -> Self {
        Self {
            slots: [Slot::EMPTY; N],
            used: 0,
            last_uid: 0,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = SmallRng::seed_from_u64(seed);
    }

    pub fn capacity(&self) -> usize {
        N
    }

    pub fn used(&self) -> usize {
        self.used
    }

    fn tag_in_use(&self, tag: Tag) -> bool {
        self.slots.iter().any(|s| s.allocated && s.tag == tag)
    }

    /// Claim a free slot with `ttl` ticks to live.
    ///
    /// [`Tag::RANDOM`] is replaced with a fresh value outside the reserved range that no
    /// allocated slot carries; an explicit tag already held by an allocated slot is refused.
    pub fn allocate(&mut self, tag: Tag, ttl: u32) -> Result<MsgHandle, PoolError> {
        if self.used >= N {
            return Err(PoolError::Full);
        }

        let tag = if tag == Tag::RANDOM {
            loop {
                let candidate = Tag(self.rng.next_u32());
                if !candidate.is_reserved() && !self.tag_in_use(candidate) {
                    break candidate;
                }
            }
        } else if self.tag_in_use(tag) {
            return Err(PoolError::DuplicateTag);
        } else {
            tag
        };

        let index = self
            .slots
            .iter()
            .position(|s| !s.allocated)
            .ok_or(PoolError::Full)?;

        self.last_uid = self.last_uid.wrapping_add(1);
        if self.last_uid == 0 {
            self.last_uid = 1;
        }

        let mut msg = RawPtpMessage::empty();
        msg.tag = tag;
        self.slots[index] = Slot {
            allocated: true,
            committed: false,
            sent: false,
            tag,
            uid: self.last_uid,
            ttl,
            msg,
        };
        self.used += 1;

        Ok(MsgHandle {
            index,
            uid: self.last_uid,
        })
    }

    fn slot(&self, handle: MsgHandle) -> Option<&Slot> {
        self.slots
            .get(handle.index)
            .filter(|s| s.allocated && s.uid == handle.uid)
    }

    fn slot_mut(&mut self, handle: MsgHandle) -> Option<&mut Slot> {
        self.slots
            .get_mut(handle.index)
            .filter(|s| s.allocated && s.uid == handle.uid)
    }

    /// Make a populated slot visible to lookups. Returns `false` for a stale handle.
    pub fn commit(&mut self, handle: MsgHandle) -> bool {
        match self.slot_mut(handle) {
            Some(slot) => {
                slot.committed = true;
                true
            }
            None => false,
        }
    }

    pub fn free(&mut self, handle: MsgHandle) {
        if let Some(slot) = self.slot_mut(handle) {
            slot.allocated = false;
            slot.committed = false;
            slot.sent = false;
            self.used -= 1;
        }
    }

    pub fn mark_sent(&mut self, handle: MsgHandle) {
        if let Some(slot) = self.slot_mut(handle) {
            slot.sent = true;
        }
    }

    fn handle_of(&self, index: usize) -> MsgHandle {
        MsgHandle {
            index,
            uid: self.slots[index].uid,
        }
    }

    /// Committed slot allocated longest ago. Age is counted back from the last uid handed out,
    /// so the order holds across uid wrap-around.
    pub fn oldest(&self) -> Option<MsgHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.allocated && s.committed)
            .max_by_key(|(_, s)| self.last_uid.wrapping_sub(s.uid))
            .map(|(i, _)| self.handle_of(i))
    }

    pub fn by_uid(&self, uid: u32) -> Option<MsgHandle> {
        self.slots
            .iter()
            .position(|s| s.allocated && s.committed && s.uid == uid)
            .map(|i| self.handle_of(i))
    }

    /// Committed slot carrying `tag` whose transmission has completed.
    pub fn sent_by_tag(&self, tag: Tag) -> Option<MsgHandle> {
        self.slots
            .iter()
            .position(|s| s.allocated && s.committed && s.sent && s.tag == tag)
            .map(|i| self.handle_of(i))
    }

    pub fn get(&self, handle: MsgHandle) -> Option<&RawPtpMessage> {
        self.slot(handle).map(|s| &s.msg)
    }

    pub fn get_mut(&mut self, handle: MsgHandle) -> Option<&mut RawPtpMessage> {
        self.slot_mut(handle).map(|s| &mut s.msg)
    }

    /// Age every allocated slot by one tick; slots reaching zero are freed.
    pub fn tick(&mut self) {
        for slot in self.slots.iter_mut().filter(|s| s.allocated) {
            if slot.ttl == DONT_AGE {
                continue;
            }
            slot.ttl = slot.ttl.saturating_sub(1);
            if slot.ttl == 0 {
                slot.allocated = false;
                slot.committed = false;
                slot.sent = false;
                self.used -= 1;
            }
        }
    }

    /// Free every slot.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.allocated = false;
            slot.committed = false;
            slot.sent = false;
        }
        self.used = 0;
    }
}

impl<const N: usize> fmt::Display for MsgPool<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pool: {}/{} used, last uid {}", self.used, N, self.last_uid)?;
        for (i, slot) in self.slots.iter().enumerate().filter(|(_, s)| s.allocated) {
            let ttl = if slot.ttl == DONT_AGE {
                -1
            } else {
                slot.ttl as i64
            };
            writeln!(
                f,
                " #{:02} uid {:>6} tag {:>10} ttl {:>4} {}{} len {}",
                i,
                slot.uid,
                slot.tag.0,
                ttl,
                if slot.committed { 'C' } else { '-' },
                if slot.sent { 'S' } else { '-' },
                slot.msg.len()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn pool<const N: usize>() -> MsgPool<N> {
        MsgPool::new(0x5EED)
    }

    #[test]
    fn allocation_fails_when_full() {
        let mut p = pool::<2>();
        p.allocate(Tag::RANDOM, 16).unwrap();
        p.allocate(Tag::RANDOM, 16).unwrap();

        assert_eq!(p.allocate(Tag::RANDOM, 16), Err(PoolError::Full));
        assert_eq!(p.used(), 2);
    }

    #[test]
    fn random_tags_are_unique_and_not_reserved() {
        let mut p = pool::<8>();
        let mut tags = std::vec::Vec::new();
        for _ in 0..8 {
            let h = p.allocate(Tag::RANDOM, 16).unwrap();
            let tag = p.get(h).unwrap().tag;
            assert!(!tag.is_reserved());
            assert!(!tags.contains(&tag));
            tags.push(tag);
        }
    }

    #[test]
    fn explicit_tag_collision_is_rejected() {
        let mut p = pool::<4>();
        let first = p.allocate(Tag::SYNC, 16).unwrap();
        assert_eq!(p.allocate(Tag::SYNC, 16), Err(PoolError::DuplicateTag));

        p.free(first);
        assert!(p.allocate(Tag::SYNC, 16).is_ok());
    }

    #[test]
    fn uncommitted_slots_are_invisible_to_lookups() {
        let mut p = pool::<4>();
        let h = p.allocate(Tag::RANDOM, 16).unwrap();
        assert_eq!(p.oldest(), None);
        assert_eq!(p.by_uid(h.uid()), None);

        p.commit(h);
        assert_eq!(p.oldest(), Some(h));
        assert_eq!(p.by_uid(h.uid()), Some(h));
    }

    #[test]
    fn oldest_follows_allocation_order_across_reused_slots() {
        let mut p = pool::<3>();
        let a = p.allocate(Tag::RANDOM, 16).unwrap();
        let b = p.allocate(Tag::RANDOM, 16).unwrap();
        p.free(a);
        let c = p.allocate(Tag::RANDOM, 16).unwrap();
        p.commit(c);
        p.commit(b);

        // c reuses a's slot index but was allocated after b
        assert_eq!(p.oldest(), Some(b));
        p.free(b);
        assert_eq!(p.oldest(), Some(c));
    }

    #[test]
    fn sent_by_tag_requires_completed_transmission() {
        let mut p = pool::<4>();
        let h = p.allocate(Tag::DELAY_REQ, 16).unwrap();
        p.commit(h);
        assert_eq!(p.sent_by_tag(Tag::DELAY_REQ), None);

        p.mark_sent(h);
        assert_eq!(p.sent_by_tag(Tag::DELAY_REQ), Some(h));
    }

    #[test]
    fn stale_handle_free_is_harmless() {
        let mut p = pool::<2>();
        let a = p.allocate(Tag::RANDOM, 16).unwrap();
        p.free(a);
        let b = p.allocate(Tag::RANDOM, 16).unwrap();

        p.free(a);
        assert_eq!(p.used(), 1);
        assert!(p.get(b).is_some());
        assert!(p.get(a).is_none());
    }

    #[test]
    fn expired_slots_are_reclaimed() {
        let mut p = pool::<2>();
        p.allocate(Tag::RANDOM, 2).unwrap();
        let keep = p.allocate(Tag::RANDOM, DONT_AGE).unwrap();
        assert_eq!(p.allocate(Tag::RANDOM, 2), Err(PoolError::Full));

        p.tick();
        assert_eq!(p.used(), 2);
        p.tick();
        assert_eq!(p.used(), 1);

        assert!(p.allocate(Tag::RANDOM, 2).is_ok());
        assert!(p.get(keep).is_some());
    }

    #[test]
    fn report_lists_allocated_slots() {
        let mut p = pool::<4>();
        let h = p.allocate(Tag::SYNC, 16).unwrap();
        p.commit(h);
        let report = std::format!("{}", p);
        assert!(report.starts_with("pool: 1/4 used"));
        assert!(report.contains("tag          1"));
        assert!(report.contains(" C-"));
    }

    #[test]
    fn oldest_survives_uid_wrap() {
        let mut p = pool::<3>();
        p.last_uid = u32::MAX - 1;
        let a = p.allocate(Tag::RANDOM, 16).unwrap();
        let b = p.allocate(Tag::RANDOM, 16).unwrap();
        p.commit(b);
        p.commit(a);

        assert_eq!(a.uid(), u32::MAX);
        assert_eq!(b.uid(), 1);
        assert_eq!(p.oldest(), Some(a));
    }

    #[derive(Clone, Debug)]
    enum Op {
        Allocate(Tag, u32),
        Commit(usize),
        Free(usize),
        FreeStale(usize),
        Tick,
    }

    fn op() -> impl Strategy<Value = Op> {
        let tag = prop_oneof![
            Just(Tag::RANDOM),
            Just(Tag::SYNC),
            Just(Tag::DELAY_REQ),
            (3u32..6).prop_map(Tag),
        ];
        let ttl = prop_oneof![1u32..6, Just(DONT_AGE)];
        prop_oneof![
            3 => (tag, ttl).prop_map(|(tag, ttl)| Op::Allocate(tag, ttl)),
            2 => any::<usize>().prop_map(Op::Commit),
            1 => any::<usize>().prop_map(Op::Free),
            1 => any::<usize>().prop_map(Op::FreeStale),
            2 => Just(Op::Tick),
        ]
    }

    /// A live slot as the model sees it, kept in allocation order.
    struct Live {
        handle: MsgHandle,
        tag: Tag,
        ttl: u32,
        committed: bool,
    }

    proptest! {
        #[test]
        fn pool_matches_model(
            start_uid in prop_oneof![Just(0u32), Just(u32::MAX - 4)],
            ops in prop::collection::vec(op(), 1..200),
        ) {
            let mut p = pool::<4>();
            p.last_uid = start_uid;
            let mut live: std::vec::Vec<Live> = std::vec::Vec::new();
            let mut freed: std::vec::Vec<MsgHandle> = std::vec::Vec::new();

            for op in ops {
                match op {
                    Op::Allocate(tag, ttl) => {
                        let result = p.allocate(tag, ttl);
                        if live.len() == 4 {
                            prop_assert_eq!(result, Err(PoolError::Full));
                        } else if tag != Tag::RANDOM && live.iter().any(|l| l.tag == tag) {
                            prop_assert_eq!(result, Err(PoolError::DuplicateTag));
                        } else {
                            let handle = result.expect("allocation with room and a free tag");
                            let assigned = p.get(handle).expect("fresh handle resolves").tag;
                            if tag == Tag::RANDOM {
                                prop_assert!(!assigned.is_reserved());
                            } else {
                                prop_assert_eq!(assigned, tag);
                            }
                            live.push(Live { handle, tag: assigned, ttl, committed: false });
                        }
                    }
                    Op::Commit(i) => {
                        if !live.is_empty() {
                            let n = live.len();
                            let entry = &mut live[i % n];
                            prop_assert!(p.commit(entry.handle));
                            entry.committed = true;
                        }
                    }
                    Op::Free(i) => {
                        if !live.is_empty() {
                            let entry = live.remove(i % live.len());
                            p.free(entry.handle);
                            freed.push(entry.handle);
                        }
                    }
                    Op::FreeStale(i) => {
                        if !freed.is_empty() {
                            p.free(freed[i % freed.len()]);
                        }
                    }
                    Op::Tick => {
                        p.tick();
                        for entry in live.iter_mut().filter(|l| l.ttl != DONT_AGE) {
                            entry.ttl -= 1;
                        }
                        let (expired, kept): (std::vec::Vec<_>, std::vec::Vec<_>) =
                            live.into_iter().partition(|l| l.ttl == 0);
                        freed.extend(expired.iter().map(|l| l.handle));
                        live = kept;
                    }
                }

                prop_assert_eq!(p.used(), live.len());
                prop_assert!(p.used() <= p.capacity());
                for (i, a) in live.iter().enumerate() {
                    prop_assert!(p.get(a.handle).is_some());
                    prop_assert!(live[i + 1..].iter().all(|b| b.tag != a.tag));
                    if a.committed {
                        prop_assert_eq!(p.by_uid(a.handle.uid()), Some(a.handle));
                    }
                }
                for handle in &freed {
                    prop_assert!(p.get(*handle).is_none());
                }
                let expected = live.iter().find(|l| l.committed).map(|l| l.handle);
                prop_assert_eq!(p.oldest(), expected);
            }
        }
    }
}
