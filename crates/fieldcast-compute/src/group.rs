//! Process groups and the collectives the producer needs.
//!
//! A [`ProcessGroup`] is one member's view of a fixed set of ranks that
//! step through the same sequence of collectives. Rank [`ROOT`] is the
//! source of broadcasts and the destination of gathers.
//!
//! [`ThreadGroup`] runs every rank on its own OS thread inside the current
//! process. Each collective is a write phase, a barrier, a read phase and a
//! second barrier, so no member can overwrite shared state that another
//! member has not read yet.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use crate::error::GroupError;

/// Rank that broadcasts and gathers.
pub const ROOT: usize = 0;

/// One member of a process group.
///
/// Every member must call the same collectives in the same order.
pub trait ProcessGroup {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn is_root(&self) -> bool {
        self.rank() == ROOT
    }

    /// Block until every member has arrived.
    fn barrier(&self) -> Result<(), GroupError>;

    /// Every member returns the root's `value`; other members' values are
    /// ignored.
    fn broadcast_f64(&self, value: f64) -> Result<f64, GroupError>;

    /// Collect every member's `part` into `out` on the root, in rank order.
    /// `out` is ignored on the other members.
    fn gather_i16(&self, part: &[i16], out: Option<&mut [i16]>) -> Result<(), GroupError>;

    /// Fail every pending and future collective of the group.
    fn abort(&self, reason: &str);
}

#[derive(Debug)]
struct State {
    generation: u64,
    arrived: usize,
    scalar: f64,
    parts: Vec<Vec<i16>>,
    aborted: Option<(usize, String)>,
}

#[derive(Debug)]
struct Shared {
    size: usize,
    state: Mutex<State>,
    turn: Condvar,
}

impl Shared {
    fn new(size: usize) -> Self {
        Self {
            size,
            state: Mutex::new(State {
                generation: 0,
                arrived: 0,
                scalar: 0.0,
                parts: vec![Vec::new(); size],
                aborted: None,
            }),
            turn: Condvar::new(),
        }
    }

    fn check(state: &State) -> Result<(), GroupError> {
        match &state.aborted {
            Some((rank, reason)) => Err(GroupError::Aborted {
                rank: *rank,
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn wait_all<'a>(
        &'a self,
        mut state: MutexGuard<'a, State>,
    ) -> Result<MutexGuard<'a, State>, GroupError> {
        Self::check(&state)?;
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.size {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.turn.notify_all();
            return Ok(state);
        }
        while state.generation == generation {
            state = self.turn.wait(state).map_err(|_| GroupError::Poisoned)?;
            Self::check(&state)?;
        }
        Ok(state)
    }

    fn abort(&self, rank: usize, reason: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.aborted.is_none() {
            state.aborted = Some((rank, reason.to_string()));
        }
        self.turn.notify_all();
    }
}

/// A rank running on its own thread.
#[derive(Debug, Clone)]
pub struct ThreadGroup {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

struct AbortOnPanic(ThreadGroup);

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort("rank panicked");
        }
    }
}

impl ThreadGroup {
    /// Run `body` once per rank, each on its own thread, and collect the
    /// results in rank order.
    ///
    /// A rank that panics aborts the group so the others do not wait on it
    /// forever.
    pub fn run<T, F>(size: usize, body: F) -> Result<Vec<T>, GroupError>
    where
        T: Send,
        F: Fn(ThreadGroup) -> T + Sync,
    {
        let shared = Arc::new(Shared::new(size));

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(size);
            let mut spawn_error = None;

            for rank in 0..size {
                let member = ThreadGroup {
                    rank,
                    size,
                    shared: Arc::clone(&shared),
                };
                let body = &body;
                let spawned = thread::Builder::new()
                    .name(format!("rank-{rank}"))
                    .spawn_scoped(scope, move || {
                        let _guard = AbortOnPanic(member.clone());
                        body(member)
                    });
                match spawned {
                    Ok(handle) => handles.push((rank, handle)),
                    Err(source) => {
                        shared.abort(rank, "rank could not be started");
                        spawn_error = Some(GroupError::Spawn { rank, source });
                        break;
                    }
                }
            }

            // Join everything before reporting, a panicked scoped thread
            // that is never joined would re-panic here.
            let joined: Vec<Result<T, GroupError>> = handles
                .into_iter()
                .map(|(rank, handle)| handle.join().map_err(|_| GroupError::RankPanicked(rank)))
                .collect();

            if let Some(err) = spawn_error {
                return Err(err);
            }
            joined.into_iter().collect()
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, GroupError> {
        self.shared.state.lock().map_err(|_| GroupError::Poisoned)
    }
}

impl ProcessGroup for ThreadGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> Result<(), GroupError> {
        let state = self.lock()?;
        drop(self.shared.wait_all(state)?);
        Ok(())
    }

    fn broadcast_f64(&self, value: f64) -> Result<f64, GroupError> {
        let mut state = self.lock()?;
        if self.is_root() {
            state.scalar = value;
        }
        let state = self.shared.wait_all(state)?;
        let value = state.scalar;
        drop(self.shared.wait_all(state)?);
        Ok(value)
    }

    fn gather_i16(&self, part: &[i16], out: Option<&mut [i16]>) -> Result<(), GroupError> {
        let mut state = self.lock()?;
        let slot = &mut state.parts[self.rank];
        slot.clear();
        slot.extend_from_slice(part);

        let state = self.shared.wait_all(state)?;
        let copied = match out {
            Some(out) if self.is_root() => copy_parts(&state.parts, out),
            _ => Ok(()),
        };
        drop(self.shared.wait_all(state)?);
        copied
    }

    fn abort(&self, reason: &str) {
        tracing::error!(rank = self.rank, reason, "aborting process group");
        self.shared.abort(self.rank, reason);
    }
}

fn copy_parts(parts: &[Vec<i16>], out: &mut [i16]) -> Result<(), GroupError> {
    let total: usize = parts.iter().map(Vec::len).sum();
    if total != out.len() {
        return Err(GroupError::BufferSize {
            expected: out.len(),
            actual: total,
        });
    }
    let mut offset = 0;
    for part in parts {
        out[offset..offset + part.len()].copy_from_slice(part);
        offset += part.len();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_are_assigned_in_order() {
        let ranks = ThreadGroup::run(3, |g| (g.rank(), g.size(), g.is_root())).unwrap();
        assert_eq!(ranks, vec![(0, 3, true), (1, 3, false), (2, 3, false)]);
    }

    #[test]
    fn broadcast_takes_root_value() {
        let values = ThreadGroup::run(2, |g| {
            let mine = if g.is_root() { 3.5 } else { -1.0 };
            g.broadcast_f64(mine).unwrap()
        })
        .unwrap();
        assert_eq!(values, vec![3.5, 3.5]);
    }

    #[test]
    fn repeated_broadcasts_never_mix_rounds() {
        let seen = ThreadGroup::run(2, |g| {
            (0..500)
                .map(|i| g.broadcast_f64(f64::from(i)).unwrap())
                .collect::<Vec<_>>()
        })
        .unwrap();
        let expected: Vec<f64> = (0..500).map(f64::from).collect();
        assert_eq!(seen[0], expected);
        assert_eq!(seen[1], expected);
    }

    #[test]
    fn gather_concatenates_in_rank_order() {
        let frames = ThreadGroup::run(2, |g| {
            let part = vec![g.rank() as i16 + 1; 3];
            if g.is_root() {
                let mut out = vec![0i16; 6];
                g.gather_i16(&part, Some(&mut out)).unwrap();
                Some(out)
            } else {
                g.gather_i16(&part, None).unwrap();
                None
            }
        })
        .unwrap();
        assert_eq!(frames[0].as_deref(), Some(&[1, 1, 1, 2, 2, 2][..]));
        assert_eq!(frames[1], None);
    }

    #[test]
    fn gather_rejects_wrong_output_size() {
        let results = ThreadGroup::run(2, |g| {
            let mut out = vec![0i16; 5];
            g.gather_i16(&[7, 7], g.is_root().then_some(&mut out[..]))
        })
        .unwrap();
        assert!(matches!(
            results[0],
            Err(GroupError::BufferSize {
                expected: 5,
                actual: 4
            })
        ));
        assert!(results[1].is_ok());
    }

    #[test]
    fn abort_releases_waiting_members() {
        let results = ThreadGroup::run(2, |g| {
            if g.is_root() {
                g.abort("rendezvous failed");
                Ok(())
            } else {
                g.barrier()
            }
        })
        .unwrap();
        assert!(results[0].is_ok());
        match &results[1] {
            Err(GroupError::Aborted { rank, reason }) => {
                assert_eq!(*rank, 0);
                assert_eq!(reason, "rendezvous failed");
            }
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[test]
    fn panicking_rank_aborts_the_group() {
        let result = ThreadGroup::run(2, |g| {
            if g.rank() == 1 {
                panic!("worker failed");
            }
            g.barrier()
        });
        assert!(matches!(result, Err(GroupError::RankPanicked(1))));
    }

    #[test]
    fn single_member_group_never_blocks() {
        let values = ThreadGroup::run(1, |g| {
            g.barrier().unwrap();
            let mut out = vec![0i16; 2];
            g.gather_i16(&[4, 5], Some(&mut out)).unwrap();
            (g.broadcast_f64(2.0).unwrap(), out)
        })
        .unwrap();
        assert_eq!(values, vec![(2.0, vec![4, 5])]);
    }
}
