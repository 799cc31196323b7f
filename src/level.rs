// Levels.
//
// A level is the per-call record of the stackless evaluator: which
// executor drives it, its state byte, its out/spare/scratch cells, the
// feed it consumes, and a baseline snapshot of every thread-global
// position that must balance by the time the level drops. Levels form
// the only legitimate storage for "currently running" state.

use std::cell::RefCell;
use std::rc::Rc;

use enumflags2::BitFlags;

use crate::action::ActionState;
use crate::api::{ApiHandle, Interp};
use crate::error::{ErrorId, ErrorValue, Raised};
use crate::feed::Feed;
use crate::symbol::Symbol;
use crate::value::Cell;


#[derive(BitFlags, Copy, Clone, Debug, PartialEq)]
#[repr(u16)]
pub enum LevelFlag {
    RootLevel             = 0x0001,
    TrampolineKeepalive   = 0x0002,
    Uninterruptible       = 0x0004,
    AfraidOfGhosts        = 0x0008,
    DispatchingIntrinsic  = 0x0010,
    MetaResult            = 0x0020,
    ForceHeavyNulls       = 0x0040,
    ForceSurprising       = 0x0080,
    Branch                = 0x0100,
    AbruptFailure         = 0x0200,
    NotifyOnAbruptFailure = 0x0400,
    DidntLeftQuotePath    = 0x0800,
}

pub type LevelFlags = BitFlags<LevelFlag>;


// Where a level's result lands when the trampoline drops it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum OutDest {
    // The trampoline's caller reads the out cell itself.
    Root,
    Discard,
    ParentOut,
    ParentSpare,
}


// Snapshot of the mutable thread-global positions at Push time.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Baseline {
    pub data_stack: usize,
    pub mold: usize,
    pub guarded: usize,
    pub manual: usize,
}


pub enum LevelKind {
    // Bottom-of-stack sentinel; never executed.
    Sentinel,
    // Transparent passthrough: the out cell is already the answer.
    JustUseOut,
    Stepper,
    Evaluator,
    Action(Box<ActionState>),
}


pub struct Level {
    pub serial: u64,
    pub kind: LevelKind,
    pub state: u8,
    pub flags: LevelFlags,
    pub dest: OutDest,
    pub out: Cell,
    pub spare: Cell,
    pub scratch: Cell,
    pub feed: Rc<Feed>,
    pub baseline: Baseline,
    pub handles: Vec<ApiHandle>,
    pub label: Option<Symbol>,
}


impl Level {
    fn raw(kind: LevelKind, feed: Rc<Feed>, dest: OutDest) -> Level {
        Level {
            serial: 0,
            kind,
            state: 0,
            flags: BitFlags::empty(),
            dest,
            out: Cell::erased(),
            spare: Cell::erased(),
            scratch: Cell::erased(),
            feed,
            baseline: Baseline { data_stack: 0, mold: 0, guarded: 0, manual: 0 },
            handles: Vec::new(),
            label: None,
        }
    }

    pub fn stepper(feed: Rc<Feed>, dest: OutDest) -> Level {
        Level::raw(LevelKind::Stepper, feed, dest)
    }

    pub fn evaluator(feed: Rc<Feed>, dest: OutDest) -> Level {
        Level::raw(LevelKind::Evaluator, feed, dest)
    }

    pub fn action(state: ActionState, feed: Rc<Feed>, dest: OutDest) -> Level {
        Level::raw(LevelKind::Action(Box::new(state)), feed, dest)
    }

    pub fn sentinel(feed: Rc<Feed>) -> Level {
        Level::raw(LevelKind::Sentinel, feed, OutDest::Root)
    }

    // Delegation: this level's remaining job is to pass its sublevel's
    // result along untouched.
    pub fn become_just_use_out(&mut self) {
        self.kind = LevelKind::JustUseOut;
        self.state = u8::MAX;
    }

    pub fn is_just_use_out(&self) -> bool {
        matches!(self.kind, LevelKind::JustUseOut)
    }

    pub fn action_state(&mut self) -> &mut ActionState {
        match &mut self.kind {
            LevelKind::Action(state) => state,
            _ => panic!("level is not an action level"),
        }
    }
}


impl Interp {
    pub fn top(&self) -> Rc<RefCell<Level>> {
        self.levels.last().expect("level stack underflow").clone()
    }

    pub fn level_depth(&self) -> usize {
        self.levels.len()
    }

    // The level to treat as current for throw and drop purposes: some
    // dispatcher layouts leave transparent passthrough levels standing
    // in for a technically-higher one. A passthrough tagged as the
    // trampoline root still counts as current.
    pub fn adjust_for_downshift(&self) -> Rc<RefCell<Level>> {
        for level in self.levels.iter().rev() {
            let current = {
                let level = level.borrow();
                !level.is_just_use_out()
                    || level.flags.contains(LevelFlag::RootLevel)
            };
            if current {
                return level.clone();
            }
        }
        self.top()
    }

    pub fn push_level(&mut self, mut level: Level) -> Rc<RefCell<Level>> {
        if level.state == 0 {
            debug_assert!(level.out.is_erased());
        }
        // Uninterruptibility covers everything running beneath it.
        let shielded = self
            .levels
            .last()
            .map_or(false, |l| l.borrow().flags.contains(LevelFlag::Uninterruptible));
        if shielded {
            level.flags.insert(LevelFlag::Uninterruptible);
        }
        self.serial_gen += 1;
        level.serial = self.serial_gen;
        level.baseline = Baseline {
            data_stack: self.data_stack.len(),
            mold: self.mold.len(),
            guarded: self.guarded.len(),
            manual: self.manual.len(),
        };
        let rc = Rc::new(RefCell::new(level));
        self.levels.push(rc.clone());
        rc
    }

    // Clean drop: the level ran to completion and every thread-global
    // position must already be back at its baseline.
    pub fn drop_level(&mut self) -> Raised<()> {
        let rc = self.levels.pop().expect("drop with no level");
        let mut level = rc.borrow_mut();
        let baseline = level.baseline;
        if self.data_stack.len() != baseline.data_stack
            || self.mold.len() != baseline.mold
            || self.guarded.len() != baseline.guarded
            || self.manual.len() != baseline.manual
        {
            return Err(ErrorValue::new(
                ErrorId::Internal,
                "level dropped out of balance",
            ));
        }
        for handle in level.handles.drain(..) {
            handle.release();
        }
        Ok(())
    }

    // Abort path: restore every baseline position, free manual
    // allocations made above it, and release the level's API handles.
    pub fn rollback_top_level(&mut self) {
        let rc = self.levels.pop().expect("rollback with no level");
        let mut level = rc.borrow_mut();
        let baseline = level.baseline;
        self.data_stack.truncate(baseline.data_stack);
        self.mold.truncate(baseline.mold);
        self.guarded.truncate(baseline.guarded);
        while self.manual.len() > baseline.manual {
            let entry = self.manual.pop();
            if let Some(index) = entry.and_then(|e| e.raw_index()) {
                self.free_registry_entry(index);
            }
        }
        for handle in level.handles.drain(..) {
            handle.release();
        }
    }

    // -- data stack

    pub fn ds_push(&mut self, cell: Cell) -> Raised<()> {
        if self.data_stack.len() >= self.tunables.data_stack_limit {
            return Err(ErrorValue::bare(ErrorId::StackOverflow));
        }
        self.data_stack.push(cell);
        Ok(())
    }

    pub fn ds_pop(&mut self) -> Option<Cell> {
        self.data_stack.pop()
    }

    pub fn ds_depth(&self) -> usize {
        self.data_stack.len()
    }

    // -- guarded stubs

    pub fn guard(&mut self, array: Rc<crate::flex::Array>) {
        self.guarded.push(array);
    }

    pub fn unguard(&mut self) {
        self.guarded.pop();
    }
}
