//! The call session manager.
//!
//! State machine: `ringing -> active | rejected | missed`, then
//! `active -> ended`. All transitions are checked and applied while holding
//! the database lock, so concurrent settlers of the same session serialize
//! and exactly one of them wins; the loser sees a terminal state.
//!
//! The ring timeout is a detached timer spawned at `initiate` and aborted
//! on early accept/reject. A timer that fires after the session settled
//! treats the `InvalidState` answer as "already handled".

use chrono::Utc;
use serde_json::json;

use palabre_shared::events::{CallEvent, HubEvent};
use palabre_shared::types::{CallId, CallKind, CallState, NotificationKind, UserId};
use palabre_store::CallSession;

use crate::delivery::Topic;
use crate::error::{HubError, Result};
use crate::hub::Hub;

impl Hub {
    /// Start ringing a receiver. Fails with `Conflict` while a non-terminal
    /// session for the same ordered (caller, receiver) pair exists.
    pub async fn initiate_call(
        &self,
        caller_id: UserId,
        receiver_id: UserId,
        kind: CallKind,
    ) -> Result<CallSession> {
        if caller_id == receiver_id {
            return Err(HubError::InvalidOperation("cannot call yourself".into()));
        }

        let session = {
            let db = self.db.lock().await;

            if let Some(open) = db.find_open_call_for_pair(caller_id, receiver_id)? {
                return Err(HubError::Conflict(format!(
                    "call {} between this pair is still {}",
                    open.id,
                    open.state.as_str()
                )));
            }

            let session = CallSession {
                id: CallId::new(),
                caller_id,
                receiver_id,
                kind,
                state: CallState::Ringing,
                created_at: Utc::now(),
                started_at: None,
                ended_at: None,
                duration_secs: None,
            };
            db.insert_call(&session)?;
            session
        };

        tracing::info!(call = %session.id, kind = kind.as_str(), "call ringing");

        self.push_call_event(&session, None).await;
        self.notify(
            receiver_id,
            NotificationKind::CallIncoming,
            "Incoming call".to_string(),
            format!("Incoming {} call", kind.as_str()),
            Some(json!({ "call_id": session.id })),
        )
        .await?;

        self.schedule_ring_timeout(session.id).await;

        Ok(session)
    }

    /// Accept a ringing call. Only the receiver may accept. Accepting an
    /// already-active session is a no-op returning the session unchanged.
    pub async fn accept_call(&self, actor: UserId, call_id: CallId) -> Result<CallSession> {
        let (session, changed) = {
            let db = self.db.lock().await;
            let mut session = db.get_call(call_id)?;

            if actor != session.receiver_id {
                return Err(HubError::Forbidden("only the receiver may accept".into()));
            }

            match session.state {
                CallState::Ringing => {
                    session.state = CallState::Active;
                    if session.started_at.is_none() {
                        session.started_at = Some(Utc::now());
                    }
                    db.update_call(&session)?;
                    (session, true)
                }
                CallState::Active => (session, false),
                from => {
                    return Err(HubError::InvalidState {
                        from,
                        action: "accept",
                    })
                }
            }
        };

        if changed {
            self.cancel_ring_timer(call_id).await;
            tracing::info!(call = %call_id, "call accepted");
            self.push_call_event(&session, Some(CallState::Ringing)).await;
        }
        Ok(session)
    }

    /// Reject a ringing call. Only the receiver may reject. A duplicate
    /// reject is a no-op.
    pub async fn reject_call(&self, actor: UserId, call_id: CallId) -> Result<CallSession> {
        let (session, changed) = {
            let db = self.db.lock().await;
            let mut session = db.get_call(call_id)?;

            if actor != session.receiver_id {
                return Err(HubError::Forbidden("only the receiver may reject".into()));
            }

            match session.state {
                CallState::Ringing => {
                    session.state = CallState::Rejected;
                    session.ended_at = Some(Utc::now());
                    db.update_call(&session)?;
                    (session, true)
                }
                CallState::Rejected => (session, false),
                from => {
                    return Err(HubError::InvalidState {
                        from,
                        action: "reject",
                    })
                }
            }
        };

        if changed {
            self.cancel_ring_timer(call_id).await;
            tracing::info!(call = %call_id, "call rejected");
            self.push_call_event(&session, Some(CallState::Ringing)).await;
        }
        Ok(session)
    }

    /// Settle a still-ringing call as missed. Driven by the ring timer;
    /// callable directly for clients that implement their own ring UI.
    pub async fn time_out_call(&self, call_id: CallId) -> Result<CallSession> {
        let (session, changed) = {
            let db = self.db.lock().await;
            let mut session = db.get_call(call_id)?;

            match session.state {
                CallState::Ringing => {
                    session.state = CallState::Missed;
                    session.ended_at = Some(Utc::now());
                    db.update_call(&session)?;
                    (session, true)
                }
                CallState::Missed => (session, false),
                from => {
                    return Err(HubError::InvalidState {
                        from,
                        action: "time out",
                    })
                }
            }
        };

        if changed {
            // The ring timer is usually the caller here. Aborting would
            // cancel our own task before the event push and notification
            // below run, so the entry is dropped without abort; a timer
            // that is still pending settles as a no-op when it fires.
            self.ring_timers.lock().await.remove(&call_id);
            tracing::info!(call = %call_id, "call missed");
            self.push_call_event(&session, Some(CallState::Ringing)).await;
            self.notify(
                session.receiver_id,
                NotificationKind::MissedCall,
                "Missed call".to_string(),
                format!("Missed {} call", session.kind.as_str()),
                Some(json!({ "call_id": session.id })),
            )
            .await?;
        }
        Ok(session)
    }

    /// End an active call. Either party may hang up.
    ///
    /// The stored duration is authoritative and server-computed from
    /// `started_at`; the client-supplied value is an advisory hint clamped
    /// so it can never exceed the wall-clock difference. A second `end` is
    /// a no-op with no duplicate side effects.
    pub async fn end_call(
        &self,
        actor: UserId,
        call_id: CallId,
        advisory_duration_secs: Option<u64>,
    ) -> Result<CallSession> {
        let (session, changed) = {
            let db = self.db.lock().await;
            let mut session = db.get_call(call_id)?;

            if actor != session.caller_id && actor != session.receiver_id {
                return Err(HubError::Forbidden("not a party to this call".into()));
            }

            match session.state {
                CallState::Active => {
                    let now = Utc::now();
                    let elapsed = session
                        .started_at
                        .map(|started| (now - started).num_seconds().max(0) as u64)
                        .unwrap_or(0);
                    let duration = match advisory_duration_secs {
                        Some(advisory) => advisory.min(elapsed),
                        None => elapsed,
                    };

                    session.state = CallState::Ended;
                    session.ended_at = Some(now);
                    session.duration_secs = Some(duration);
                    db.update_call(&session)?;
                    (session, true)
                }
                CallState::Ended => (session, false),
                from => {
                    return Err(HubError::InvalidState {
                        from,
                        action: "end",
                    })
                }
            }
        };

        if changed {
            tracing::info!(
                call = %call_id,
                duration_secs = session.duration_secs.unwrap_or(0),
                "call ended"
            );
            self.push_call_event(&session, Some(CallState::Active)).await;
        }
        Ok(session)
    }

    /// Settled (terminal) call sessions involving a user, newest first.
    pub async fn calls_for_user(&self, user_id: UserId, limit: u32) -> Result<Vec<CallSession>> {
        let db = self.db.lock().await;
        Ok(db.list_settled_calls_for_user(user_id, limit)?)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn schedule_ring_timeout(&self, call_id: CallId) {
        let hub = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(hub.config.ring_timeout).await;
            match hub.time_out_call(call_id).await {
                Ok(_) => {}
                // The session settled before the timer fired.
                Err(HubError::InvalidState { .. }) => {
                    tracing::debug!(call = %call_id, "ring timer found call already settled");
                }
                Err(e) => {
                    tracing::warn!(call = %call_id, error = %e, "ring timer failed");
                }
            }
            hub.ring_timers.lock().await.remove(&call_id);
        });

        self.ring_timers
            .lock()
            .await
            .insert(call_id, handle.abort_handle());
    }

    async fn cancel_ring_timer(&self, call_id: CallId) {
        if let Some(handle) = self.ring_timers.lock().await.remove(&call_id) {
            handle.abort();
        }
    }

    /// Push a state-change event to both parties' personal streams.
    async fn push_call_event(&self, session: &CallSession, previous: Option<CallState>) {
        let event = HubEvent::CallStateChanged(CallEvent {
            id: session.id,
            caller_id: session.caller_id,
            receiver_id: session.receiver_id,
            kind: session.kind,
            state: session.state,
            previous_state: previous,
        });

        self.delivery
            .publish(Topic::Notifications(session.caller_id), &event)
            .await;
        self.delivery
            .publish(Topic::Notifications(session.receiver_id), &event)
            .await;
    }
}
