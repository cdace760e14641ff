// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The Thread Interrupt Management Context: the per-CPU register bank behind
//! the TIMA MMIO region, and the four mirror pages that expose it.

use std::sync::Arc;

use bit_field::bitfield;
use serde::Deserialize;
use serde::Serialize;
use sync::Mutex;

use crate::bus::BusAccessInfo;
use crate::bus::BusDevice;
use crate::bus::DeviceId;
use crate::bus::Suspendable;
use crate::xive::error::guest_error;
use crate::xive::fabric::IrqLine;

/// Lowest-numeric priority wins; 8 priority levels, 0..=7.
pub const MAX_PRIORITY: u8 = 7;
/// `NSR` exception-output flag.
pub const NSR_EO: u8 = 0x80;

/// `priority` is a guest-controlled byte (`SET_OS_PENDING`'s store data, an
/// EQ's `w7` priority field, ...); anything past `MAX_PRIORITY` is a no-op
/// rather than an underflowing shift, matching the original's
/// `xive_priority_to_ipb` (`priority > XIVE_PRIORITY_MAX ? 0 : 1 << (...)`).
pub(crate) fn bit_for_priority(priority: u8) -> u8 {
    if priority > MAX_PRIORITY {
        return 0;
    }
    1u8 << (MAX_PRIORITY - priority)
}

/// `PIPR = ipb_to_pipr(IPB)`: the priority of the most-favored set bit in
/// `IPB`, or `0xFF` if none is set.
pub fn ipb_to_pipr(ipb: u8) -> u8 {
    if ipb == 0 {
        0xFF
    } else {
        ipb.leading_zeros() as u8
    }
}

/// The CAM line carried in a ring's `WORD2`: a valid bit plus the 23-bit
/// `(block << 19) | index` value the Presenter compares against.
#[bitfield]
#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Word2 {
    pub cam: BitField23,
    pub reserved: BitField8,
    pub valid: bool,
}

impl Word2 {
    pub fn with_cam(block: u8, index: u32) -> Self {
        let mut w = Word2::default();
        w.set_valid(true);
        w.set_cam((u32::from(block) << 19) | (index & 0x7ffff));
        w
    }
}

/// Ring identifiers, ordered by ascending privilege: this ordering is load
/// bearing for the TIMA access-privilege check in `Tima::read`/`write`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Ring {
    User = 0,
    Os = 1,
    HvPool = 2,
    HvPhys = 3,
}

pub const NUM_RINGS: usize = 4;
const RING_BYTES: usize = 16;

impl Ring {
    fn from_index(i: usize) -> Ring {
        match i {
            0 => Ring::User,
            1 => Ring::Os,
            2 => Ring::HvPool,
            3 => Ring::HvPhys,
            _ => unreachable!("ring index out of range"),
        }
    }
}

/// One 16-byte ring: `NSR, CPPR, IPB, LSMFB, ACK_CNT, INC, AGE, PIPR` as
/// single bytes, followed by the 4-byte `WORD2` CAM line and 4 reserved bytes.
#[derive(Clone, Copy, Default, Serialize, Deserialize)]
pub struct RingState {
    pub nsr: u8,
    pub cppr: u8,
    pub ipb: u8,
    pub lsmfb: u8,
    pub ack_cnt: u8,
    pub inc: u8,
    pub age: u8,
    pub pipr: u8,
    pub word2: Word2,
    /// `QW0_USER` only: the `VU` bit and EBB logical-server field. Kept
    /// separate from `word2` rather than overlaid onto `QW1_OS`'s bytes, a
    /// simplification documented in `DESIGN.md`.
    pub user_valid: bool,
    pub logical_server: u32,
}

impl RingState {
    fn recompute_pipr(&mut self) {
        self.pipr = ipb_to_pipr(self.ipb);
    }

    fn wants_exception(&self) -> bool {
        self.pipr < self.cppr
    }

    fn resync_nsr(&mut self) {
        if self.wants_exception() {
            self.nsr |= NSR_EO;
        } else {
            self.nsr &= !NSR_EO;
        }
    }
}

/// A CPU's register bank. Owned by the surrounding CPU model behind an
/// `Arc<sync::Mutex<ThreadContext>>`, registered into a `ThreadContextRegistry`
/// so the Presenter can scan it without owning it.
pub struct ThreadContext {
    rings: [RingState; NUM_RINGS],
    irq_line: Arc<dyn IrqLine>,
    asserted: bool,
}

impl ThreadContext {
    pub fn new(irq_line: Arc<dyn IrqLine>) -> Self {
        ThreadContext {
            rings: Default::default(),
            irq_line,
            asserted: false,
        }
    }

    fn recompute_line(&mut self) {
        let want = self.rings.iter().any(|r| r.nsr & NSR_EO != 0);
        if want != self.asserted {
            self.asserted = want;
            self.irq_line.set_level(want);
        }
    }

    pub fn ring(&self, ring: Ring) -> &RingState {
        &self.rings[ring as usize]
    }

    pub fn line_asserted(&self) -> bool {
        self.asserted
    }

    /// Reset to the post-guest-reset state: registers zeroed except
    /// `LSMFB`/`ACK_CNT`/`AGE = 0xFF`, PIPR seeded from (zero) IPB, and the
    /// OS ring's CAM line pushed for non-hypervisor-mode dispatch.
    pub fn reset(&mut self, os_vp_block: u8, os_vp_index: u32) {
        for ring in &mut self.rings {
            *ring = RingState {
                lsmfb: 0xFF,
                ack_cnt: 0xFF,
                age: 0xFF,
                ..Default::default()
            };
            ring.recompute_pipr();
        }
        let os = &mut self.rings[Ring::Os as usize];
        os.word2 = Word2::with_cam(os_vp_block, os_vp_index);
        self.asserted = false;
    }

    /// `ACK_OS_REG`: accept the OS ring's pending exception.
    pub fn ack_os_reg(&mut self) -> u16 {
        let ring = &mut self.rings[Ring::Os as usize];
        let old_nsr = ring.nsr;
        if old_nsr & NSR_EO != 0 {
            let priority = ring.pipr;
            ring.cppr = priority;
            ring.ipb &= !bit_for_priority(priority);
            ring.recompute_pipr();
            ring.nsr &= !NSR_EO;
        }
        let new_cppr = ring.cppr;
        self.recompute_line();
        (u16::from(old_nsr) << 8) | u16::from(new_cppr)
    }

    /// `SET_OS_CPPR`: set CPPR and re-check notification.
    pub fn set_os_cppr(&mut self, value: u8) {
        let ring = &mut self.rings[Ring::Os as usize];
        ring.cppr = value;
        ring.resync_nsr();
        self.recompute_line();
    }

    /// `SET_OS_PENDING`: OR a priority bit into IPB and re-check notification.
    pub fn set_os_pending(&mut self, priority: u8) {
        let ring = &mut self.rings[Ring::Os as usize];
        ring.ipb |= bit_for_priority(priority);
        ring.recompute_pipr();
        ring.resync_nsr();
        self.recompute_line();
    }

    /// Called by the Presenter when it matches this context's ring and
    /// delivers `priority`.
    pub fn post_priority(&mut self, ring: Ring, priority: u8) {
        let r = &mut self.rings[ring as usize];
        r.ipb |= bit_for_priority(priority);
        r.recompute_pipr();
        r.resync_nsr();
        self.recompute_line();
    }

    /// `hw_cam` must be the hardwired chip-id/thread-id CAM line the
    /// hypervisor-privilege ring matches against (not the OS-ring
    /// `(block << 19) | index` CAM `os_cam` builds) -- this model has no
    /// chip/thread topology to derive it from, so no caller currently
    /// constructs one; see the Presenter's handling of a valid-but-unmatched
    /// HV_PHYS ring.
    pub fn match_hv_phys(&self, hw_cam: u32) -> bool {
        let r = &self.rings[Ring::HvPhys as usize];
        r.word2.get_valid() && r.word2.get_cam() == hw_cam
    }

    /// See `match_hv_phys`: `hw_cam` is the same hardwired CAM line, not the
    /// OS-ring CAM.
    pub fn match_hv_pool(&self, hw_cam: u32) -> bool {
        let r = &self.rings[Ring::HvPool as usize];
        r.word2.get_valid() && r.word2.get_cam() == hw_cam
    }

    pub fn match_os(&self, cam: u32) -> bool {
        let r = &self.rings[Ring::Os as usize];
        r.word2.get_valid() && r.word2.get_cam() == cam
    }

    pub fn match_user(&self, os_cam: u32, logical_server: u32) -> bool {
        let os = &self.rings[Ring::Os as usize];
        let user = &self.rings[Ring::User as usize];
        os.word2.get_valid()
            && user.user_valid
            && os.word2.get_cam() == os_cam
            && user.logical_server == logical_server
    }
}

// ---- TIMA MMIO surface -----------------------------------------------------

const TM_SPC_ACK_OS_REG: u64 = 0x810;
const TM_SPC_SET_OS_PENDING: u64 = 0x830;
const TM_QW1_OS_CPPR: u64 = 0x11; // TM_QW1_OS (0x10) + TM_CPPR (0x01)

enum Op {
    AckOsReg,
    SetOsCppr,
    SetOsPending,
}

fn lookup_op(offset: u64, size: usize, is_write: bool) -> Option<Op> {
    match (offset, size, is_write) {
        (TM_SPC_ACK_OS_REG, 2, false) => Some(Op::AckOsReg),
        (TM_QW1_OS_CPPR, 1, true) => Some(Op::SetOsCppr),
        (TM_SPC_SET_OS_PENDING, 1, true) => Some(Op::SetOsPending),
        _ => None,
    }
}

/// Byte-level permission a raw TIMA access is filtered through.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Perm {
    No,
    ReadOnly,
    ReadWrite,
}

/// One of the four mirror pages (`QW0_USER`, `QW1_OS`, `QW2_HV_POOL`,
/// `QW3_HV_PHYS`), sharing the underlying `ThreadContext`. Which page this is
/// comes from `BusAccessInfo::id`, since all four are registered against the
/// same `Arc<sync::Mutex<ThreadContext>>` at four different base addresses.
pub struct Tima {
    tctx: Arc<Mutex<ThreadContext>>,
}

impl Tima {
    pub fn new(tctx: Arc<Mutex<ThreadContext>>) -> Self {
        Tima { tctx }
    }

    fn page_of(info: &BusAccessInfo) -> Ring {
        Ring::from_index(info.id % NUM_RINGS)
    }

    /// A page may raw-access its own ring read-write; it may read (but never
    /// write) a ring of strictly lower privilege; anything else is invalid.
    /// `QW0_USER` is never raw-writable from any page.
    fn raw_perm(accessing: Ring, target: Ring) -> Perm {
        if target == Ring::User && accessing != target {
            return if accessing > target { Perm::ReadOnly } else { Perm::No };
        }
        if accessing == target {
            if target == Ring::User {
                Perm::ReadOnly
            } else {
                Perm::ReadWrite
            }
        } else if accessing > target {
            Perm::ReadOnly
        } else {
            Perm::No
        }
    }

    fn raw_read(&self, page: Ring, offset: u64, data: &mut [u8]) {
        if offset as usize + data.len() > NUM_RINGS * RING_BYTES {
            guest_error!("tima raw read out of range: offset={:#x} len={}", offset, data.len());
            return;
        }
        let ring_idx = offset as usize / RING_BYTES;
        let target = Ring::from_index(ring_idx);
        let perm = Self::raw_perm(page, target);
        if perm == Perm::No {
            return; // zero-filled: caller's buffer is already zeroed.
        }
        let bank = self.tctx.lock();
        let bytes = ring_bytes(bank.ring(target));
        let byte_off = offset as usize % RING_BYTES;
        data.copy_from_slice(&bytes[byte_off..byte_off + data.len()]);
    }

    fn raw_write(&self, page: Ring, offset: u64, data: &[u8]) {
        if data.len() != 4 && data.len() != 8 {
            guest_error!("tima raw write unsupported size {}", data.len());
            return;
        }
        if offset as usize + data.len() > NUM_RINGS * RING_BYTES {
            guest_error!("tima raw write out of range: offset={:#x} len={}", offset, data.len());
            return;
        }
        let ring_idx = offset as usize / RING_BYTES;
        let target = Ring::from_index(ring_idx);
        if Self::raw_perm(page, target) != Perm::ReadWrite {
            guest_error!("tima raw write denied: page={:?} target={:?}", page, target);
            return;
        }
        // Raw writes never touch QW0_USER (enforced by raw_perm never
        // returning ReadWrite for it), and the byte-level writer below never
        // invokes side effects, matching "no side effects" in SPEC_FULL.md.
        let mut bank = self.tctx.lock();
        let ring_mut = &mut bank.rings[ring_idx];
        let mut bytes = ring_bytes(ring_mut);
        let byte_off = offset as usize % RING_BYTES;
        bytes[byte_off..byte_off + data.len()].copy_from_slice(data);
        *ring_mut = ring_from_bytes(&bytes);
    }
}

fn ring_bytes(r: &RingState) -> [u8; RING_BYTES] {
    let mut b = [0u8; RING_BYTES];
    b[0] = r.nsr;
    b[1] = r.cppr;
    b[2] = r.ipb;
    b[3] = r.lsmfb;
    b[4] = r.ack_cnt;
    b[5] = r.inc;
    b[6] = r.age;
    b[7] = r.pipr;
    b[8..12].copy_from_slice(&u32::from(r.word2).to_be_bytes());
    b
}

fn ring_from_bytes(b: &[u8; RING_BYTES]) -> RingState {
    RingState {
        nsr: b[0],
        cppr: b[1],
        ipb: b[2],
        lsmfb: b[3],
        ack_cnt: b[4],
        inc: b[5],
        age: b[6],
        pipr: b[7],
        word2: Word2::from(u32::from_be_bytes([b[8], b[9], b[10], b[11]])),
        user_valid: false,
        logical_server: 0,
    }
}

impl BusDevice for Tima {
    fn debug_label(&self) -> String {
        "XIVE TIMA".to_owned()
    }

    fn device_id(&self) -> DeviceId {
        DeviceId(0x5849_5645) // "XIVE" in ASCII
    }

    fn read(&mut self, info: BusAccessInfo, data: &mut [u8]) {
        for b in data.iter_mut() {
            *b = 0;
        }
        if !matches!(data.len(), 1 | 2 | 4 | 8) {
            guest_error!("tima read unsupported size {}", data.len());
            return;
        }
        let page = Self::page_of(&info);
        if info.offset & 0x800 != 0 {
            match lookup_op(info.offset, data.len(), false) {
                Some(Op::AckOsReg) if page >= Ring::Os => {
                    let v = self.tctx.lock().ack_os_reg();
                    data.copy_from_slice(&v.to_be_bytes());
                }
                _ => guest_error!("tima: no load handler at {:#x} (page {:?})", info.offset, page),
            }
            return;
        }
        self.raw_read(page, info.offset, data);
    }

    fn write(&mut self, info: BusAccessInfo, data: &[u8]) {
        if !matches!(data.len(), 1 | 2 | 4 | 8) {
            guest_error!("tima write unsupported size {}", data.len());
            return;
        }
        let page = Self::page_of(&info);
        if info.offset & 0x800 != 0 || info.offset == TM_QW1_OS_CPPR {
            match lookup_op(info.offset, data.len(), true) {
                Some(Op::SetOsCppr) if page >= Ring::Os => {
                    self.tctx.lock().set_os_cppr(data[0]);
                }
                Some(Op::SetOsPending) if page >= Ring::Os => {
                    self.tctx.lock().set_os_pending(data[0]);
                }
                _ => guest_error!("tima: no store handler at {:#x} (page {:?})", info.offset, page),
            }
            return;
        }
        self.raw_write(page, info.offset, data);
    }
}

impl Suspendable for Tima {
    fn snapshot(&mut self) -> anyhow::Result<serde_json::Value> {
        let bank = self.tctx.lock();
        Ok(serde_json::to_value(bank.rings)?)
    }

    fn restore(&mut self, data: serde_json::Value) -> anyhow::Result<()> {
        let rings: [RingState; NUM_RINGS] = serde_json::from_value(data)?;
        self.tctx.lock().rings = rings;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestLine(std::sync::atomic::AtomicBool);
    impl IrqLine for TestLine {
        fn set_level(&self, asserted: bool) {
            self.0.store(asserted, std::sync::atomic::Ordering::SeqCst);
        }
    }

    fn new_ctx() -> (Arc<TestLine>, ThreadContext) {
        let line = Arc::new(TestLine(std::sync::atomic::AtomicBool::new(false)));
        let ctx = ThreadContext::new(line.clone());
        (line, ctx)
    }

    #[test]
    fn bit_for_priority_clamps_out_of_range() {
        assert_eq!(bit_for_priority(0), 0x80);
        assert_eq!(bit_for_priority(MAX_PRIORITY), 0x01);
        assert_eq!(bit_for_priority(MAX_PRIORITY + 1), 0);
        assert_eq!(bit_for_priority(0xFF), 0);
    }

    #[test]
    fn ipb_to_pipr_matches_scenarios() {
        assert_eq!(ipb_to_pipr(0), 0xFF);
        assert_eq!(ipb_to_pipr(0x08), 4);
        assert_eq!(ipb_to_pipr(0x40), 1);
    }

    #[test]
    fn cppr_gating_scenario() {
        let (line, mut ctx) = new_ctx();
        ctx.reset(0, 5);
        ctx.post_priority(Ring::Os, 1); // IPB = 0x40
        assert_eq!(ctx.ring(Ring::Os).ipb, 0x40);
        assert_eq!(ctx.ring(Ring::Os).pipr, 1);
        assert_eq!(ctx.ring(Ring::Os).cppr, 0);
        assert!(!line.0.load(std::sync::atomic::Ordering::SeqCst));

        let ack = ctx.ack_os_reg();
        assert_eq!(ack & 0xff, 0); // CPPR unchanged, still 0
        assert_eq!(ctx.ring(Ring::Os).ipb, 0x40); // untouched: EO wasn't set

        ctx.set_os_cppr(2);
        assert_eq!(ctx.ring(Ring::Os).nsr & NSR_EO, NSR_EO);
        assert!(line.0.load(std::sync::atomic::Ordering::SeqCst));

        let ack = ctx.ack_os_reg();
        assert_eq!(ack, (0x80 << 8) | 1);
        assert_eq!(ctx.ring(Ring::Os).ipb, 0);
        assert_eq!(ctx.ring(Ring::Os).pipr, 0xFF);
        assert!(!line.0.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn reset_pushes_os_cam() {
        let (_line, mut ctx) = new_ctx();
        ctx.reset(0, 5);
        assert!(ctx.match_os((0u32 << 19) | 5));
        assert_eq!(ctx.ring(Ring::Os).lsmfb, 0xFF);
        assert_eq!(ctx.ring(Ring::Os).ack_cnt, 0xFF);
        assert_eq!(ctx.ring(Ring::Os).age, 0xFF);
        assert_eq!(ctx.ring(Ring::Os).pipr, 0xFF);
    }
}
