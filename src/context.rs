//! This module implements the transaction controller: the
//! begin/suspend/resume/end/abort state machine, together with the fused
//! verification runs that drive register loads from a set of owned buffers.

use crate::arch::{Park, TxPrimitives};
use crate::error::Error;
use crate::regset::RegisterClass;

/// Identifies one of the three value buffers a scenario seeds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BufferId {
    /// The values establishing the checkpoint, loaded before entry.
    Checkpoint,
    /// The baseline values from before the transaction.
    PreTransaction,
    /// The values representing in-transaction work.
    InTransaction,
}

/// One owned value buffer per image, sized for a single register class and
/// reused per test run.
#[derive(Clone, Debug)]
pub struct BufferSet {
    class: RegisterClass,
    checkpoint: Vec<u64>,
    pre: Vec<u64>,
    tx: Vec<u64>,
}

impl BufferSet {
    /// Creates zero-filled buffers for the given class, sized to its loader
    /// width.
    pub fn new(class: RegisterClass) -> Result<Self, Error> {
        let slots = class.load_slots().ok_or(Error::UnsupportedClass {
            class,
            plane: crate::regset::Plane::Live,
        })?;

        Ok(Self {
            class,
            checkpoint: vec![0; slots],
            pre: vec![0; slots],
            tx: vec![0; slots],
        })
    }

    /// Returns the register class the buffers are sized for.
    pub fn class(&self) -> RegisterClass {
        self.class
    }

    /// Returns the values of the named buffer.
    pub fn get(&self, id: BufferId) -> &[u64] {
        match id {
            BufferId::Checkpoint => &self.checkpoint,
            BufferId::PreTransaction => &self.pre,
            BufferId::InTransaction => &self.tx,
        }
    }

    /// Returns the values of the named buffer for seeding.
    pub fn get_mut(&mut self, id: BufferId) -> &mut [u64] {
        match id {
            BufferId::Checkpoint => &mut self.checkpoint,
            BufferId::PreTransaction => &mut self.pre,
            BufferId::InTransaction => &mut self.tx,
        }
    }
}

/// The completion indicator of a transaction operation. An abort is an
/// expected, first-class outcome, not an error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// Transactional execution was entered.
    Entered,
    /// The transaction committed; all register writes made inside it persist.
    Committed,
    /// The hardware discarded the transaction and restored all registers to
    /// the checkpoint image.
    Aborted {
        /// The abort-status register value.
        texasr: u64,
        /// The failure-instruction address.
        tfiar: u64,
    },
}

/// The state of a transaction context.
///
/// `Committed` and `Aborted` are terminal; a fresh context must be
/// constructed for each attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxState {
    /// No transaction has been entered yet.
    Idle,
    /// A transaction is open and executing transactionally.
    Active,
    /// A transaction is open but execution is ordinary.
    Suspended,
    /// The transaction committed.
    Committed,
    /// The transaction was discarded by the hardware.
    Aborted {
        /// The abort-status register value.
        texasr: u64,
        /// The failure-instruction address.
        tfiar: u64,
    },
}

impl TxState {
    fn name(&self) -> &'static str {
        match self {
            TxState::Idle => "idle",
            TxState::Active => "active",
            TxState::Suspended => "suspended",
            TxState::Committed => "committed",
            TxState::Aborted { .. } => "aborted",
        }
    }
}

/// An ephemeral, process-local transaction context over a set of primitives.
#[derive(Debug)]
pub struct TxContext<P: TxPrimitives> {
    prim: P,
    buffers: BufferSet,
    state: TxState,
}

impl<P: TxPrimitives> TxContext<P> {
    /// Creates an idle context over the given primitives and buffers.
    pub fn new(prim: P, buffers: BufferSet) -> Self {
        Self {
            prim,
            buffers,
            state: TxState::Idle,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Returns the value buffers for seeding.
    pub fn buffers_mut(&mut self) -> &mut BufferSet {
        &mut self.buffers
    }

    fn require(&self, op: &'static str, ok: bool) -> Result<(), Error> {
        if ok {
            Ok(())
        } else {
            Err(Error::BadState {
                op,
                state: self.state.name(),
            })
        }
    }

    /// Enters transactional execution.
    ///
    /// Returns [`Outcome::Entered`], or [`Outcome::Aborted`] on the abort
    /// path. Because the hardware rolls back to the entry point, a later
    /// abort surfaces as a second completion of this very call, this time
    /// with the `Aborted` outcome; callers branch on the result exactly once
    /// and the abort arm covers both cases.
    pub fn begin(&mut self) -> Result<Outcome, Error> {
        self.require("begin", matches!(self.state, TxState::Idle))?;

        if self.prim.begin() {
            self.state = TxState::Active;
            Ok(Outcome::Entered)
        } else {
            Ok(self.record_abort())
        }
    }

    /// Suspends the open transaction. Permitted only while Active.
    ///
    /// Stack writes made while suspended persist through a later rollback,
    /// so anything run in this state must not rely on being unwound; the
    /// register verification runs below keep their suspended work inside
    /// one fused sequence for this reason.
    pub fn suspend(&mut self) -> Result<(), Error> {
        self.require("suspend", matches!(self.state, TxState::Active))?;
        self.prim.suspend();
        self.state = TxState::Suspended;

        Ok(())
    }

    /// Resumes a suspended transaction. Permitted only while Suspended.
    pub fn resume(&mut self) -> Result<(), Error> {
        self.require("resume", matches!(self.state, TxState::Suspended))?;
        self.prim.resume();
        self.state = TxState::Active;

        Ok(())
    }

    /// Attempts to commit the transaction. Permitted only while Active.
    ///
    /// On hardware a doomed transaction does not complete this call; the
    /// rollback resumes at the [`TxContext::begin`] site instead. The
    /// `Aborted` return covers primitives that report the failure inline.
    pub fn end(&mut self) -> Result<Outcome, Error> {
        self.require("end", matches!(self.state, TxState::Active))?;

        if self.prim.end() {
            self.state = TxState::Committed;
            Ok(Outcome::Committed)
        } else {
            Ok(self.record_abort())
        }
    }

    /// Deliberately aborts the transaction. Permitted while Active or
    /// Suspended.
    ///
    /// On hardware this call does not complete; the rollback resumes at the
    /// [`TxContext::begin`] site with the `Aborted` outcome.
    pub fn force_abort(&mut self) -> Result<Outcome, Error> {
        self.require(
            "force_abort",
            matches!(self.state, TxState::Active | TxState::Suspended),
        )?;

        self.prim.force_abort();

        Ok(self.record_abort())
    }

    fn record_abort(&mut self) -> Outcome {
        let texasr = self.prim.abort_status();
        let tfiar = self.prim.failure_address();

        self.state = TxState::Aborted { texasr, tfiar };

        Outcome::Aborted { texasr, tfiar }
    }

    /// Runs the suspended-abort verification sequence as one fused unit:
    /// checkpoint load, entry, in-transaction load, suspension at the park
    /// point, resumption, deliberate abort, capture. Valid while Idle; the
    /// context ends up Aborted and the restored live values are returned.
    pub fn run_suspended_abort(&mut self, park: Park<'_>) -> Result<(Outcome, Vec<u64>), Error> {
        self.require("run_suspended_abort", matches!(self.state, TxState::Idle))?;

        let mut live = vec![0; self.buffers.get(BufferId::Checkpoint).len()];
        let (texasr, tfiar) = self.prim.abort_while_suspended(
            self.buffers.class(),
            self.buffers.get(BufferId::Checkpoint),
            self.buffers.get(BufferId::InTransaction),
            park,
            &mut live,
        )?;

        self.state = TxState::Aborted { texasr, tfiar };

        Ok((Outcome::Aborted { texasr, tfiar }, live))
    }

    /// Runs the commit verification sequence as one fused unit: checkpoint
    /// load, entry, in-transaction load, a pre-transaction load while
    /// suspended, resumption, commit, capture. Valid while Idle; the live
    /// values captured right after the transaction finished are returned.
    pub fn run_commit(&mut self) -> Result<(Outcome, Vec<u64>), Error> {
        self.require("run_commit", matches!(self.state, TxState::Idle))?;

        let mut live = vec![0; self.buffers.get(BufferId::Checkpoint).len()];
        let status = self.prim.commit_with_suspended_load(
            self.buffers.class(),
            self.buffers.get(BufferId::Checkpoint),
            self.buffers.get(BufferId::InTransaction),
            self.buffers.get(BufferId::PreTransaction),
            &mut live,
        )?;

        let outcome = match status {
            None => {
                self.state = TxState::Committed;
                Outcome::Committed
            }
            Some((texasr, tfiar)) => {
                self.state = TxState::Aborted { texasr, tfiar };
                Outcome::Aborted { texasr, tfiar }
            }
        };

        Ok((outcome, live))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regset::Plane;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Simulates the primitives with configurable failures. Unlike hardware,
    /// aborts fall through to the caller instead of rewinding to the entry
    /// point.
    #[derive(Debug, Default)]
    struct Mock {
        fail_begin: bool,
        fail_end: bool,
        texasr: u64,
        tfiar: u64,
    }

    impl TxPrimitives for Mock {
        fn begin(&mut self) -> bool {
            !self.fail_begin
        }

        fn suspend(&mut self) {}

        fn resume(&mut self) {}

        fn end(&mut self) -> bool {
            !self.fail_end
        }

        fn force_abort(&mut self) {}

        fn abort_status(&self) -> u64 {
            self.texasr
        }

        fn failure_address(&self) -> u64 {
            self.tfiar
        }

        fn abort_while_suspended(
            &mut self,
            class: RegisterClass,
            checkpoint: &[u64],
            transactional: &[u64],
            park: Park<'_>,
            live: &mut [u64],
        ) -> Result<(u64, u64), Error> {
            assert_eq!(Some(checkpoint.len()), class.load_slots());
            assert_eq!(transactional.len(), checkpoint.len());

            park.reach();

            // The hardware restores the live state to the checkpoint image.
            live.copy_from_slice(checkpoint);

            Ok((self.texasr, self.tfiar))
        }

        fn commit_with_suspended_load(
            &mut self,
            class: RegisterClass,
            checkpoint: &[u64],
            transactional: &[u64],
            suspended: &[u64],
            live: &mut [u64],
        ) -> Result<Option<(u64, u64)>, Error> {
            assert_eq!(Some(checkpoint.len()), class.load_slots());
            assert_eq!(transactional.len(), checkpoint.len());

            if self.fail_end {
                live.copy_from_slice(checkpoint);
                Ok(Some((self.texasr, self.tfiar)))
            } else {
                // On commit the last-loaded values are the live state.
                live.copy_from_slice(suspended);
                Ok(None)
            }
        }
    }

    fn context(mock: Mock) -> TxContext<Mock> {
        TxContext::new(mock, BufferSet::new(RegisterClass::Gpr).unwrap())
    }

    fn seed(ctx: &mut TxContext<Mock>, id: BufferId, factor: u64) {
        for (i, slot) in ctx.buffers_mut().get_mut(id).iter_mut().enumerate() {
            *slot = factor * (i as u64 + 1);
        }
    }

    #[test]
    fn commit_flow_walks_the_states() {
        let mut ctx = context(Mock::default());

        assert_eq!(ctx.begin().unwrap(), Outcome::Entered);
        assert_eq!(ctx.state(), TxState::Active);

        ctx.suspend().unwrap();
        assert_eq!(ctx.state(), TxState::Suspended);
        ctx.resume().unwrap();
        assert_eq!(ctx.state(), TxState::Active);

        assert_eq!(ctx.end().unwrap(), Outcome::Committed);
        assert_eq!(ctx.state(), TxState::Committed);
    }

    #[test]
    fn failed_entry_reports_the_abort_status() {
        let mut ctx = context(Mock {
            fail_begin: true,
            texasr: 0x1234,
            tfiar: 0xdead,
            ..Mock::default()
        });

        assert_eq!(
            ctx.begin().unwrap(),
            Outcome::Aborted {
                texasr: 0x1234,
                tfiar: 0xdead,
            }
        );
        assert_eq!(
            ctx.state(),
            TxState::Aborted {
                texasr: 0x1234,
                tfiar: 0xdead,
            }
        );
    }

    #[test]
    fn doomed_commit_reports_the_abort_status() {
        let mut ctx = context(Mock {
            fail_end: true,
            texasr: 0xff,
            ..Mock::default()
        });

        ctx.begin().unwrap();
        assert!(matches!(
            ctx.end().unwrap(),
            Outcome::Aborted { texasr: 0xff, .. }
        ));
    }

    #[test]
    fn force_abort_is_permitted_while_suspended() {
        let mut ctx = context(Mock::default());

        ctx.begin().unwrap();
        ctx.suspend().unwrap();
        assert!(matches!(
            ctx.force_abort().unwrap(),
            Outcome::Aborted { .. }
        ));
    }

    #[test]
    fn transitions_outside_the_machine_are_rejected() {
        let mut ctx = context(Mock::default());

        assert!(matches!(ctx.suspend(), Err(Error::BadState { .. })));
        assert!(matches!(ctx.resume(), Err(Error::BadState { .. })));
        assert!(matches!(ctx.end(), Err(Error::BadState { .. })));
        assert!(matches!(ctx.force_abort(), Err(Error::BadState { .. })));

        ctx.begin().unwrap();
        assert!(matches!(ctx.begin(), Err(Error::BadState { .. })));
        assert!(matches!(ctx.resume(), Err(Error::BadState { .. })));
    }

    #[test]
    fn terminal_states_stay_terminal() {
        let mut ctx = context(Mock::default());

        ctx.begin().unwrap();
        ctx.end().unwrap();

        assert!(matches!(ctx.begin(), Err(Error::BadState { .. })));
        assert!(matches!(ctx.run_commit(), Err(Error::BadState { .. })));

        let mut ctx = context(Mock {
            fail_begin: true,
            ..Mock::default()
        });
        ctx.begin().unwrap();
        assert!(matches!(ctx.begin(), Err(Error::BadState { .. })));
    }

    #[test]
    fn fused_abort_parks_and_restores_the_checkpoint() {
        let mut ctx = context(Mock {
            texasr: 0x1234,
            tfiar: 0xbeef,
            ..Mock::default()
        });
        seed(&mut ctx, BufferId::Checkpoint, 1);
        seed(&mut ctx, BufferId::InTransaction, 2);

        let arrived = AtomicU32::new(0);
        // Pre-released so the park does not spin.
        let released = AtomicU32::new(1);
        let (outcome, live) = ctx
            .run_suspended_abort(Park::new(&arrived, &released))
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::Aborted {
                texasr: 0x1234,
                tfiar: 0xbeef,
            }
        );
        assert_eq!(arrived.load(Ordering::Acquire), 1);
        assert_eq!(live[0], 1);
        assert_eq!(live[17], 18);
        assert_eq!(
            ctx.state(),
            TxState::Aborted {
                texasr: 0x1234,
                tfiar: 0xbeef,
            }
        );
    }

    #[test]
    fn fused_commit_keeps_the_suspended_values() {
        let mut ctx = context(Mock::default());
        seed(&mut ctx, BufferId::PreTransaction, 3);

        let (outcome, live) = ctx.run_commit().unwrap();

        assert_eq!(outcome, Outcome::Committed);
        assert_eq!(ctx.state(), TxState::Committed);
        assert_eq!(live[0], 3);
        assert_eq!(live[17], 54);
    }

    #[test]
    fn fused_commit_reports_a_discarded_transaction() {
        let mut ctx = context(Mock {
            fail_end: true,
            texasr: 0xff,
            ..Mock::default()
        });
        seed(&mut ctx, BufferId::Checkpoint, 1);

        let (outcome, live) = ctx.run_commit().unwrap();

        assert!(matches!(outcome, Outcome::Aborted { texasr: 0xff, .. }));
        // Restored to the checkpoint image.
        assert_eq!(live[17], 18);
    }

    #[test]
    fn fused_runs_are_rejected_outside_idle() {
        let mut ctx = context(Mock::default());
        ctx.begin().unwrap();

        let arrived = AtomicU32::new(0);
        let released = AtomicU32::new(1);
        assert!(matches!(
            ctx.run_suspended_abort(Park::new(&arrived, &released)),
            Err(Error::BadState { .. })
        ));
        assert!(matches!(ctx.run_commit(), Err(Error::BadState { .. })));
    }

    #[test]
    fn buffers_reject_classes_without_loaders() {
        for class in [
            RegisterClass::Vmx,
            RegisterClass::Ebb,
            RegisterClass::Spr,
            RegisterClass::TmSpr,
        ] {
            assert!(matches!(
                BufferSet::new(class),
                Err(Error::UnsupportedClass {
                    plane: Plane::Live,
                    ..
                })
            ));
        }
    }
}
