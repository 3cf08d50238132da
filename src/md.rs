// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! MD session (component E, §4.5): the Notify/Request/Reply/ReplyQuery/
//! Confirm state machines, keyed by a 128-bit session UUID generated at
//! the originator.

use crate::constant::{MsgType, UserRef};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Originator-side state (§4.5's "state machine (originator of an
/// `Mr`)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginatorState {
    AwaitReply,
    SendConfirm,
    Done,
    TimedOut,
}

/// Replier-side state (§4.5's "state machine (replier of an `Mr`)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplierState {
    ListenerAdded,
    RequestObserved,
    AwaitConfirm,
    Done,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Originator,
    Replier,
}

/// One in-flight MD transaction (§3.2's `MdSession`).
#[derive(Debug, Clone)]
pub struct MdSession {
    pub session_id: Uuid,
    pub com_id: u32,
    pub role: SessionRole,
    pub originator_state: Option<OriginatorState>,
    pub replier_state: Option<ReplierState>,
    pub peer_ip: u32,
    /// `0` means "unknown; take all within `reply_timeout`".
    pub expected_replies: u32,
    pub received_replies: u32,
    pub received_reply_queries: u32,
    pub deadline: Instant,
    pub user_ref: UserRef,
}

/// Derives a default `UserRef` from a session id's leading 8 bytes, for
/// the replier side (`observe_request`) where no application-supplied
/// reference exists yet — the first `RecvConfCb` invocation hands this
/// value back to the application as `sessionRef`.
pub fn session_ref_from_uuid(id: Uuid) -> UserRef {
    u64::from_be_bytes(id.as_bytes()[0..8].try_into().expect("uuid has 16 bytes"))
}

impl MdSession {
    /// True once the fan-out is satisfied: `expected_replies` reached
    /// (when nonzero), or an explicit terminal reply/confirm landed.
    fn fan_out_satisfied(&self) -> bool {
        self.expected_replies != 0 && self.received_replies >= self.expected_replies
    }
}

/// Holds every live `MdSession` plus the three parallel waiting tables
/// of §3.1/§4.5: `WaitingReceiveReply` (originator, keyed by its own
/// `callerRef`), `WaitingSendReply` (replier, keyed by `sessionRef`),
/// `WaitingReceiveConfirm` (originator, after emitting `Mc`'s
/// counterpart wait — here: replier awaiting the caller's `Mc`).
#[derive(Default)]
pub struct MdSessionTable {
    sessions: HashMap<Uuid, MdSession>,
    waiting_receive_reply: HashMap<UserRef, Uuid>,
    waiting_send_reply: HashMap<UserRef, Uuid>,
    waiting_receive_confirm: HashMap<UserRef, Uuid>,
    max_num_sessions: usize,
}

/// Outcome surfaced to `MdReceiver`/`CallConfCb` (§6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdResult {
    Ok,
    ReplyTimeout,
    ConfirmTimeout,
}

pub trait MdReceiver: Send {
    /// Inbound `Mn`/`Mr` for a local replier (`RecvConfCb`).
    fn on_request(&mut self, session_id: Uuid, com_id: u32, user_ref: UserRef);
    /// Inbound `Mp`/`Mq` for a local caller, plus `TIMEOUT` surfacing
    /// (`CallConfCb`).
    fn on_reply(&mut self, session_id: Uuid, com_id: u32, user_ref: UserRef, result: MdResult);
}

impl MdSessionTable {
    pub fn new(max_num_sessions: usize) -> MdSessionTable {
        MdSessionTable {
            max_num_sessions,
            ..Default::default()
        }
    }

    fn insert(&mut self, session: MdSession) -> Result<()> {
        if self.max_num_sessions != 0 && self.sessions.len() >= self.max_num_sessions {
            return Err(Error::NoSessionErr);
        }
        self.sessions.insert(session.session_id, session);
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<&MdSession> {
        self.sessions.get(&id)
    }

    /// `Mn` is fire-and-forget: no session is opened (§4.5).
    pub fn notify(&self) {}

    /// Originator sends `Mr`: opens a session in `AwaitReply`, keyed by
    /// a fresh UUID, and records `caller_ref` in `WaitingReceiveReply`.
    pub fn send_request(
        &mut self,
        com_id: u32,
        peer_ip: u32,
        expected_replies: u32,
        reply_timeout: Duration,
        caller_ref: UserRef,
        now: Instant,
    ) -> Result<Uuid> {
        let session_id = Uuid::new_v4();
        self.insert(MdSession {
            session_id,
            com_id,
            role: SessionRole::Originator,
            originator_state: Some(OriginatorState::AwaitReply),
            replier_state: None,
            peer_ip,
            expected_replies,
            received_replies: 0,
            received_reply_queries: 0,
            deadline: now + reply_timeout,
            user_ref: caller_ref,
        })?;
        self.waiting_receive_reply.insert(caller_ref, session_id);
        Ok(session_id)
    }

    /// Replier observes an inbound `Mr`: opens a session in
    /// `RequestObserved`.
    pub fn observe_request(
        &mut self,
        session_id: Uuid,
        com_id: u32,
        peer_ip: u32,
        reply_timeout: Duration,
        session_ref: UserRef,
        now: Instant,
    ) -> Result<()> {
        self.insert(MdSession {
            session_id,
            com_id,
            role: SessionRole::Replier,
            originator_state: None,
            replier_state: Some(ReplierState::RequestObserved),
            peer_ip,
            expected_replies: 0,
            received_replies: 0,
            received_reply_queries: 0,
            deadline: now + reply_timeout,
            user_ref: session_ref,
        })?;
        self.waiting_send_reply.insert(session_ref, session_id);
        Ok(())
    }

    /// Application calls `reply()`: terminal `Mp` when the schema
    /// expects no confirm, or `Mq` (moving to `AwaitConfirm`) otherwise.
    pub fn application_reply(
        &mut self,
        session_id: Uuid,
        expects_confirm: bool,
        confirm_timeout: Duration,
        now: Instant,
    ) -> Result<MsgType> {
        let session = self.sessions.get_mut(&session_id).ok_or(Error::NoSessionErr)?;
        if session.role != SessionRole::Replier {
            return Err(Error::ParamErr("reply() on a non-replier session".into()));
        }
        if expects_confirm {
            session.replier_state = Some(ReplierState::AwaitConfirm);
            session.deadline = now + confirm_timeout;
            self.waiting_receive_confirm
                .insert(session.user_ref, session_id);
            Ok(MsgType::Mq)
        } else {
            session.replier_state = Some(ReplierState::Done);
            self.waiting_send_reply.remove(&session.user_ref);
            Ok(MsgType::Mp)
        }
    }

    /// Inbound `Mp` (terminal reply) for an originator session.
    /// Returns `true` once the session is fully satisfied and should be
    /// retired.
    pub fn receive_reply(&mut self, session_id: Uuid) -> Result<bool> {
        let session = self.sessions.get_mut(&session_id).ok_or(Error::NoSessionErr)?;
        if session.role != SessionRole::Originator {
            return Err(Error::ParamErr("Mp received for a non-originator session".into()));
        }
        session.received_replies += 1;
        let done = session.expected_replies == 1 || session.fan_out_satisfied();
        if done {
            session.originator_state = Some(OriginatorState::Done);
            self.waiting_receive_reply.remove(&session.user_ref);
        }
        Ok(done)
    }

    /// Inbound `Mq` for an originator session: move to `SendConfirm` so
    /// the scheduler auto-emits `Mc` (§4.5: "Caller must auto-emit `Mc`
    /// on receipt of `Mq`").
    pub fn receive_reply_query(&mut self, session_id: Uuid, confirm_timeout: Duration, now: Instant) -> Result<()> {
        let session = self.sessions.get_mut(&session_id).ok_or(Error::NoSessionErr)?;
        if session.role != SessionRole::Originator {
            return Err(Error::ParamErr("Mq received for a non-originator session".into()));
        }
        session.received_reply_queries += 1;
        session.originator_state = Some(OriginatorState::SendConfirm);
        session.deadline = now + confirm_timeout;
        Ok(())
    }

    /// Originator has emitted `Mc`: transaction is complete unless more
    /// replies are still expected.
    pub fn confirm_sent(&mut self, session_id: Uuid) -> Result<()> {
        let session = self.sessions.get_mut(&session_id).ok_or(Error::NoSessionErr)?;
        if session.fan_out_satisfied() || session.expected_replies <= 1 {
            session.originator_state = Some(OriginatorState::Done);
            self.waiting_receive_reply.remove(&session.user_ref);
        } else {
            session.originator_state = Some(OriginatorState::AwaitReply);
        }
        Ok(())
    }

    /// Replier receives `Mc`: session complete.
    pub fn receive_confirm(&mut self, session_id: Uuid) -> Result<()> {
        let session = self.sessions.get_mut(&session_id).ok_or(Error::NoSessionErr)?;
        if session.role != SessionRole::Replier {
            return Err(Error::ParamErr("Mc received for a non-replier session".into()));
        }
        session.replier_state = Some(ReplierState::Done);
        self.waiting_receive_confirm.remove(&session.user_ref);
        Ok(())
    }

    /// Sessions whose deadline has passed and aren't already `Done`,
    /// transitioned to `TimedOut` and returned for one-shot callback
    /// surfacing (P6).
    pub fn retire_timed_out(&mut self, now: Instant) -> Vec<(Uuid, UserRef, u32)> {
        let mut fired = Vec::new();
        for session in self.sessions.values_mut() {
            if session.deadline > now {
                continue;
            }
            let already_done = matches!(session.originator_state, Some(OriginatorState::Done) | Some(OriginatorState::TimedOut))
                || matches!(session.replier_state, Some(ReplierState::Done) | Some(ReplierState::TimedOut));
            if already_done {
                continue;
            }
            match session.role {
                SessionRole::Originator => session.originator_state = Some(OriginatorState::TimedOut),
                SessionRole::Replier => session.replier_state = Some(ReplierState::TimedOut),
            }
            fired.push((session.session_id, session.user_ref, session.com_id));
        }
        for (id, user_ref, _) in &fired {
            self.waiting_receive_reply.remove(user_ref);
            self.waiting_send_reply.remove(user_ref);
            self.waiting_receive_confirm.remove(user_ref);
            let _ = id;
        }
        fired
    }

    /// Drop sessions that reached a terminal state, freeing their slot.
    /// Called once per scheduler iteration after callbacks have fired.
    pub fn sweep_done(&mut self) {
        self.sessions.retain(|_, s| {
            !matches!(s.originator_state, Some(OriginatorState::Done) | Some(OriginatorState::TimedOut))
                && !matches!(s.replier_state, Some(ReplierState::Done) | Some(ReplierState::TimedOut))
        });
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // S3: Mr -> Mq -> auto Mc, both sides close with no error.
    #[test]
    fn s3_request_reply_with_confirm() {
        let now = Instant::now();
        let mut caller = MdSessionTable::new(0);
        let mut replier = MdSessionTable::new(0);

        let session_id = caller
            .send_request(200003, 0x0A00_0111, 1, Duration::from_secs(5), 1, now)
            .unwrap();
        replier
            .observe_request(session_id, 200003, 0x0A00_0111, Duration::from_secs(5), 2, now)
            .unwrap();

        let msg = replier
            .application_reply(session_id, true, Duration::from_secs(1), now)
            .unwrap();
        assert_eq!(msg, MsgType::Mq);

        caller
            .receive_reply_query(session_id, Duration::from_secs(1), now)
            .unwrap();
        assert_eq!(
            caller.get(session_id).unwrap().originator_state,
            Some(OriginatorState::SendConfirm)
        );

        caller.confirm_sent(session_id).unwrap();
        assert_eq!(
            caller.get(session_id).unwrap().originator_state,
            Some(OriginatorState::Done)
        );

        replier.receive_confirm(session_id).unwrap();
        assert_eq!(
            replier.get(session_id).unwrap().replier_state,
            Some(ReplierState::Done)
        );
    }

    // S4: no replier listening, reply timeout fires once.
    #[test]
    fn s4_reply_timeout_fires_once() {
        let start = Instant::now();
        let mut caller = MdSessionTable::new(0);
        let session_id = caller
            .send_request(200003, 0x0A00_0111, 1, Duration::from_millis(10), 7, start)
            .unwrap();

        let after = start + Duration::from_millis(20);
        let fired = caller.retire_timed_out(after);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, session_id);
        assert_eq!(
            caller.get(session_id).unwrap().originator_state,
            Some(OriginatorState::TimedOut)
        );

        let fired_again = caller.retire_timed_out(after + Duration::from_millis(5));
        assert!(fired_again.is_empty());
    }

    // P6: expectedReplies = N receives min(N, actual) terminal replies.
    #[test]
    fn p6_reply_fan_out_caps_at_expected() {
        let now = Instant::now();
        let mut caller = MdSessionTable::new(0);
        let session_id = caller
            .send_request(1, 0, 3, Duration::from_secs(1), 1, now)
            .unwrap();

        assert!(!caller.receive_reply(session_id).unwrap());
        assert!(!caller.receive_reply(session_id).unwrap());
        assert!(caller.receive_reply(session_id).unwrap());
        assert_eq!(caller.get(session_id).unwrap().received_replies, 3);
        assert_eq!(
            caller.get(session_id).unwrap().originator_state,
            Some(OriginatorState::Done)
        );
    }

    #[test]
    fn session_table_rejects_past_max_sessions() {
        let now = Instant::now();
        let mut table = MdSessionTable::new(1);
        table
            .send_request(1, 0, 1, Duration::from_secs(1), 1, now)
            .unwrap();
        let err = table
            .send_request(2, 0, 1, Duration::from_secs(1), 2, now)
            .unwrap_err();
        assert_eq!(err, Error::NoSessionErr);
    }

    #[test]
    fn sweep_done_frees_terminal_sessions() {
        let now = Instant::now();
        let mut table = MdSessionTable::new(0);
        let session_id = table
            .send_request(1, 0, 1, Duration::from_secs(1), 1, now)
            .unwrap();
        table.receive_reply(session_id).unwrap();
        assert_eq!(table.len(), 1);
        table.sweep_done();
        assert_eq!(table.len(), 0);
    }
}
