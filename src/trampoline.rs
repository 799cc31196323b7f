// The trampoline.
//
// All evaluation is driven by one loop: invoke the top level's
// executor, interpret the bounce it returns, and reshape the level
// stack. No executor ever calls back into this loop; a would-be
// recursion is expressed by pushing a sublevel and returning Continue
// or Delegate.
//
// The loop also owns the single rescue boundary in the whole core: a
// host panic raised anywhere below (allocator, typecheck, a native
// body) is caught here once, converted into a thrown panic against the
// current level, and propagation resumes cooperatively.

use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use enumflags2::BitFlags;

use crate::action;
use crate::api::Interp;
use crate::error::{ErrorId, ErrorValue};
use crate::eval;
use crate::level::{Level, LevelFlag, LevelKind, OutDest};
use crate::value::{Cell, CellFlag};


// What an executor tells the trampoline to do next.
#[derive(Clone, Debug, PartialEq)]
pub enum Bounce {
    // Final result is in this level's out cell.
    Out,
    // A sublevel was pushed (or this level rewound its own state);
    // call back when it completes.
    Continue,
    // A sublevel was pushed whose result is final for this level.
    Delegate,
    // A throw is in flight; honor it.
    Thrown,
    // Re-enter the current action with type checking.
    RedoChecked,
    // Re-enter the current action without type checking.
    RedoUnchecked,
    // Yield all the way to the trampoline's caller.
    Suspend,
    // Cooperative panic: identical to throwing a panic.
    Panic(ErrorValue),
}


// A non-local transfer in flight.
#[derive(Clone, Debug, PartialEq)]
pub enum ThrowLabel {
    Halt,
    Panic,
    Unwind { target: u64 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Thrown {
    pub label: ThrowLabel,
    pub arg: Cell,
}

impl Thrown {
    pub fn halt() -> Thrown {
        Thrown { label: ThrowLabel::Halt, arg: Cell::null() }
    }

    pub fn panic(err: ErrorValue) -> Thrown {
        Thrown { label: ThrowLabel::Panic, arg: Cell::error(err) }
    }

    pub fn unwind(target: u64, arg: Cell) -> Thrown {
        Thrown { label: ThrowLabel::Unwind { target }, arg }
    }

    pub fn error(&self) -> ErrorValue {
        match (&self.label, self.arg.decay()) {
            (ThrowLabel::Halt, _) => ErrorValue::bare(ErrorId::Halted),
            (_, Err(err)) => err,
            (_, Ok(_)) => ErrorValue::bare(ErrorId::Internal),
        }
    }
}


#[derive(Clone, Debug, PartialEq)]
pub enum TrampolineOut {
    // The root level's out cell holds the result.
    Completed,
    // A throw reached the root; it is left in Interp::thrown.
    Thrown,
    // An executor yielded to the host.
    Suspended,
}


#[derive(BitFlags, Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum SigFlag {
    Halt    = 0b01,
    Recycle = 0b10,
}

pub type SigFlags = BitFlags<SigFlag>;


enum ThrowOutcome {
    Caught,
    AtRoot,
}


impl Interp {
    // Tag the current top as the root, run the loop until that level
    // completes or a throw reaches it, then untag.
    pub fn trampoline_with_top_as_root(&mut self) -> TrampolineOut {
        let root_rc = self.top();
        let root_serial = root_rc.borrow().serial;
        root_rc.borrow_mut().flags.insert(LevelFlag::RootLevel);
        let out = self.trampoline_core(root_serial);
        if let Some(level) = self.levels.iter().find(|l| l.borrow().serial == root_serial) {
            level.borrow_mut().flags.remove(LevelFlag::RootLevel);
        }
        out
    }

    fn trampoline_core(&mut self, root_serial: u64) -> TrampolineOut {
        loop {
            self.tick += 1;
            {
                let top = self.top();
                let top = top.borrow();
                debug_assert!(top.state != 0 || top.out.is_erased());
                debug_assert!(!matches!(top.kind, LevelKind::Sentinel));
            }
            log::trace!("tick {}: depth {}", self.tick, self.level_depth());

            // The rescue boundary. This is the only place in the core
            // that catches host-language panics.
            let caught = {
                let this = &mut *self;
                panic::catch_unwind(AssertUnwindSafe(move || this.run_executor()))
            };
            let mut bounce = match caught {
                Ok(bounce) => bounce,
                Err(payload) => {
                    let message = payload_text(payload);
                    log::debug!("abrupt panic rescued: {}", message);
                    self.thrown = Some(Thrown::panic(ErrorValue::new(
                        ErrorId::AbruptPanic,
                        message,
                    )));
                    Bounce::Thrown
                }
            };

            if let Bounce::Panic(err) = bounce {
                self.thrown = Some(Thrown::panic(err));
                bounce = Bounce::Thrown;
            }

            // Signals run after the executor, so the level still
            // guards whatever it just wrote to its out cell.
            bounce = self.consume_signals(bounce);

            match bounce {
                Bounce::Thrown => match self.throw_path(root_serial) {
                    ThrowOutcome::AtRoot => return TrampolineOut::Thrown,
                    ThrowOutcome::Caught => {
                        if let Some(done) = self.complete_top(root_serial) {
                            return done;
                        }
                    }
                },
                Bounce::Out => {
                    if let Some(done) = self.complete_top(root_serial) {
                        return done;
                    }
                }
                Bounce::Continue
                | Bounce::Delegate
                | Bounce::RedoChecked
                | Bounce::RedoUnchecked => {}
                Bounce::Suspend => return TrampolineOut::Suspended,
                Bounce::Panic(_) => unreachable!("panic normalized above"),
            }
        }
    }

    fn run_executor(&mut self) -> Bounce {
        let top = self.top();
        let kind_probe = {
            let level = top.borrow();
            match level.kind {
                LevelKind::Sentinel => 0u8,
                LevelKind::JustUseOut => 1,
                LevelKind::Stepper => 2,
                LevelKind::Evaluator => 3,
                LevelKind::Action(_) => 4,
            }
        };
        match kind_probe {
            0 => Bounce::Panic(ErrorValue::new(
                ErrorId::Internal,
                "sentinel level executed",
            )),
            1 => Bounce::Out,
            2 => eval::stepper_executor(self),
            3 => eval::evaluator_executor(self),
            _ => action::action_executor(self),
        }
    }

    // Result handling: coerce per level flags, then either hand the
    // root result to the caller or drop the level and forward the out
    // cell to its destination.
    fn complete_top(&mut self, root_serial: u64) -> Option<TrampolineOut> {
        let top = self.top();
        {
            let mut level = top.borrow_mut();
            if level.flags.contains(LevelFlag::MetaResult) {
                level.out = level.out.lifted();
            }
            if level.flags.contains(LevelFlag::ForceHeavyNulls) {
                if level.out.is_ghost() {
                    level.out = Cell::void();
                } else if level.out.is_null() {
                    level.out = Cell::pack(vec![Cell::null()]);
                }
            }
            if level.flags.contains(LevelFlag::ForceSurprising) {
                level.out.flags.remove(CellFlag::OutHintUnsurprising);
            }
            if level.serial == root_serial {
                return Some(TrampolineOut::Completed);
            }
        }

        let (dest, out, keepalive) = {
            let level = top.borrow();
            (
                level.dest,
                level.out.clone(),
                level.flags.contains(LevelFlag::TrampolineKeepalive),
            )
        };
        if keepalive {
            // The pushing executor owns this level's eventual drop.
            let rc = self.levels.pop().expect("keepalive with no level");
            self.kept.push(rc);
        } else if let Err(err) = self.drop_level() {
            self.thrown = Some(Thrown::panic(err));
            match self.throw_path(root_serial) {
                ThrowOutcome::AtRoot => return Some(TrampolineOut::Thrown),
                ThrowOutcome::Caught => return self.complete_top(root_serial),
            }
        }
        let parent = self.top();
        let mut parent = parent.borrow_mut();
        match dest {
            OutDest::ParentOut => parent.out = out,
            OutDest::ParentSpare => parent.spare = out,
            OutDest::Discard | OutDest::Root => {}
        }
        None
    }

    // Walk the throw toward its catcher, rolling back every level in
    // between. Action levels interrupted mid-dispatch get one cleanup
    // call before the unwinding passes them.
    fn throw_path(&mut self, _root_serial: u64) -> ThrowOutcome {
        loop {
            // Transparent passthroughs cannot catch; unwind past them
            // so the adjusted level is the one consulted.
            let adjusted = self.adjust_for_downshift();
            while !Rc::ptr_eq(&self.top(), &adjusted) {
                self.rollback_top_level();
            }

            let top = adjusted;
            let (serial, flags) = {
                let level = top.borrow();
                (level.serial, level.flags)
            };

            let wants_notice = flags.contains(LevelFlag::NotifyOnAbruptFailure)
                || action::dispatching_mid_throw(&top);
            if wants_notice && !flags.contains(LevelFlag::AbruptFailure) {
                top.borrow_mut().flags.insert(LevelFlag::AbruptFailure);
                action::note_abrupt_failure(&top);
                let bounce = self.run_executor();
                if bounce == Bounce::Out {
                    // The executor absorbed the throw into a result.
                    self.thrown = None;
                    return ThrowOutcome::Caught;
                }
            }

            if let Some(thrown) = &self.thrown {
                if let ThrowLabel::Unwind { target } = thrown.label {
                    if target == serial {
                        let arg = self.thrown.take().expect("thrown vanished").arg;
                        let mut level = top.borrow_mut();
                        level.out = arg;
                        if level.state == 0 {
                            level.state = u8::MAX;
                        }
                        return ThrowOutcome::Caught;
                    }
                }
            }

            if flags.contains(LevelFlag::RootLevel) {
                return ThrowOutcome::AtRoot;
            }

            self.rollback_top_level();
        }
    }

    // -- signals

    fn consume_signals(&mut self, bounce: Bounce) -> Bounce {
        self.countdown -= 1;
        if self.countdown > 0 {
            return bounce;
        }
        self.countdown = self.tunables.eval_period as i64;

        if self.signals.contains(SigFlag::Recycle) {
            self.signals.remove(SigFlag::Recycle);
            self.recycles += 1;
            log::debug!("recycle pass {} triggered", self.recycles);
        }

        if self.signals.contains(SigFlag::Halt) && bounce != Bounce::Thrown {
            let uninterruptible = self
                .top()
                .borrow()
                .flags
                .contains(LevelFlag::Uninterruptible);
            if !uninterruptible {
                self.signals.remove(SigFlag::Halt);
                self.thrown = Some(Thrown::halt());
                log::debug!("halt request honored");
                return Bounce::Thrown;
            }
        }
        bounce
    }

    pub fn request_halt(&mut self) {
        self.signals.insert(SigFlag::Halt);
    }

    // Peek the halt flag without letting it become a throw.
    pub fn take_halt_request(&mut self) -> bool {
        let was = self.signals.contains(SigFlag::Halt);
        self.signals.remove(SigFlag::Halt);
        was
    }

    pub fn request_recycle(&mut self) {
        self.signals.insert(SigFlag::Recycle);
    }

    // -- root driving helpers

    // Push a level, run it as the trampoline root, and hand back its
    // result (or the throw, converted to an error value).
    pub fn run_root(&mut self, level: Level) -> Result<Cell, ErrorValue> {
        let rc = self.push_level(level);
        match self.trampoline_with_top_as_root() {
            TrampolineOut::Completed => {
                let out = rc.borrow().out.clone();
                self.drop_level()?;
                Ok(out)
            }
            TrampolineOut::Thrown => {
                let thrown = self.thrown.take().expect("thrown missing at root");
                self.rollback_top_level();
                Err(thrown.error())
            }
            TrampolineOut::Suspended => {
                self.rollback_top_level();
                Err(ErrorValue::new(ErrorId::Internal, "unexpected suspend"))
            }
        }
    }
}


fn payload_text(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        String::from(*text)
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        String::from("host panic")
    }
}
