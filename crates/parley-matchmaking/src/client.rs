//! The matchmaking client.
//!
//! One call to [`Dialer::dial`] runs one full matchmaking attempt:
//!
//! ```text
//!            ┌──────────── Reacquire ─────────────┐
//!            ↓                                    │
//!   ┌─→ AcquireTicket ──→ SubmitTicket ──Reject───┤
//!   │        │               ↑   │  ↑             │ Resubmit
//!   │     recoverable        │   │  └── Promise ──┘ (poll)
//!   │        │               │ Match
//!   └────────┘               │   ↓
//!                            └ Traverse ──→ Established
//!                          failure
//! ```
//!
//! Recoverable failures back off and retry; terminal ones end the dial with
//! [`TransportError::Terminal`] so the owning supervisor stops redialing.

use std::time::Duration;

use parley_protocol::{MatchTicket, ParticipantId, PeerCandidate, RendezvousReply, SessionId};
use parley_transport::{Dialer, TransportError};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::{MatchmakingConfig, MatchmakingError, RendezvousService, Traversal};

/// Progress reports for whoever is waiting on the dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchmakingEvent {
    AcquiringTicket,
    TicketAcquired,
    Submitting,
    /// We arrived first; polling until a partner shows up.
    Promised,
    Matched { peer: ParticipantId },
    Traversing { peer: ParticipantId },
    /// A recoverable failure; the next step starts after `delay`.
    Retrying { reason: String, delay: Duration },
    /// Sustained failure. Fired at most once per dial.
    StillTrying { elapsed: Duration },
    /// Terminal failure. Fired at most once per dial.
    GaveUp { reason: String },
    Established { peer: ParticipantId },
}

enum Stage {
    Acquire,
    Submit(MatchTicket),
    Traverse(MatchTicket, PeerCandidate),
}

/// What a single step decided.
enum Outcome<C> {
    Next(Stage),
    /// Wait for the promise poll interval, then continue with the stage.
    Poll(Stage),
    Recoverable(Stage, String),
    Terminal(String),
    Established(C),
}

/// Brokers a direct transport with a peer through a rendezvous service.
pub struct MatchmakingClient<R, T> {
    session: SessionId,
    participant: ParticipantId,
    service: R,
    traversal: T,
    config: MatchmakingConfig,
    events: broadcast::Sender<MatchmakingEvent>,
}

impl<R: RendezvousService, T: Traversal> MatchmakingClient<R, T> {
    pub fn new(
        session: SessionId,
        participant: ParticipantId,
        service: R,
        traversal: T,
        config: MatchmakingConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            session,
            participant,
            service,
            traversal,
            config: config.validated(),
            events,
        }
    }

    /// Subscribes to progress events. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<MatchmakingEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    fn emit(&self, event: MatchmakingEvent) {
        tracing::debug!(session = %self.session, ?event, "matchmaking progress");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn run(&self) -> Result<T::Connection, TransportError> {
        let started = Instant::now();
        let mut failures: u32 = 0;
        let mut still_trying_sent = false;
        let mut stage = Stage::Acquire;

        tracing::info!(session = %self.session, participant = %self.participant, "matchmaking started");

        loop {
            stage = match self.step(stage).await {
                Outcome::Next(next) => next,
                Outcome::Established(conn) => return Ok(conn),
                Outcome::Poll(next) => {
                    self.check_still_trying(started, &mut still_trying_sent);
                    tokio::time::sleep(self.config.promise_poll).await;
                    next
                }
                Outcome::Recoverable(next, reason) => {
                    failures = failures.saturating_add(1);
                    let delay = self.config.retry.delay(failures);
                    tracing::warn!(session = %self.session, %reason, ?delay, "matchmaking step failed, retrying");
                    self.emit(MatchmakingEvent::Retrying { reason, delay });
                    self.check_still_trying(started, &mut still_trying_sent);
                    tokio::time::sleep(delay).await;
                    next
                }
                Outcome::Terminal(reason) => {
                    tracing::warn!(session = %self.session, %reason, "matchmaking gave up");
                    self.emit(MatchmakingEvent::GaveUp {
                        reason: reason.clone(),
                    });
                    return Err(TransportError::Terminal(reason));
                }
            };
        }
    }

    fn check_still_trying(&self, started: Instant, sent: &mut bool) {
        let elapsed = started.elapsed();
        if !*sent && elapsed >= self.config.still_trying_after {
            *sent = true;
            tracing::info!(session = %self.session, ?elapsed, "matchmaking still trying");
            self.emit(MatchmakingEvent::StillTrying { elapsed });
        }
    }

    async fn step(&self, stage: Stage) -> Outcome<T::Connection> {
        match stage {
            Stage::Acquire => self.acquire().await,
            Stage::Submit(ticket) => self.submit(ticket).await,
            Stage::Traverse(ticket, peer) => self.traverse(ticket, peer).await,
        }
    }

    async fn acquire(&self) -> Outcome<T::Connection> {
        self.emit(MatchmakingEvent::AcquiringTicket);
        let reply = tokio::time::timeout(
            self.config.request_timeout,
            self.service.request_ticket(self.session, self.participant),
        )
        .await;

        match flatten(reply, self.config.request_timeout) {
            Err(e) if e.is_terminal() => Outcome::Terminal(e.to_string()),
            Err(e) => Outcome::Recoverable(Stage::Acquire, e.to_string()),
            Ok(RendezvousReply::Ticket { ticket }) if ticket.is_blank() => {
                Outcome::Recoverable(Stage::Acquire, "blank ticket".into())
            }
            Ok(RendezvousReply::Ticket { ticket }) if ticket.session != self.session => {
                Outcome::Recoverable(
                    Stage::Acquire,
                    format!("ticket issued for {} instead of {}", ticket.session, self.session),
                )
            }
            Ok(RendezvousReply::Ticket { ticket }) => {
                self.emit(MatchmakingEvent::TicketAcquired);
                Outcome::Next(Stage::Submit(ticket))
            }
            Ok(RendezvousReply::Error { code, reason }) => {
                let e = MatchmakingError::Ticket { code, reason };
                if e.is_terminal() {
                    Outcome::Terminal(e.to_string())
                } else {
                    Outcome::Recoverable(Stage::Acquire, e.to_string())
                }
            }
            Ok(other) => Outcome::Recoverable(
                Stage::Acquire,
                MatchmakingError::UnexpectedReply(format!("{other:?}")).to_string(),
            ),
        }
    }

    async fn submit(&self, ticket: MatchTicket) -> Outcome<T::Connection> {
        self.emit(MatchmakingEvent::Submitting);
        let reply = tokio::time::timeout(
            self.config.request_timeout,
            self.service.submit_ticket(&ticket),
        )
        .await;

        match flatten(reply, self.config.request_timeout) {
            Err(e) if e.is_terminal() => Outcome::Terminal(e.to_string()),
            Err(e) => Outcome::Recoverable(Stage::Submit(ticket), e.to_string()),
            Ok(RendezvousReply::Promise) => {
                self.emit(MatchmakingEvent::Promised);
                Outcome::Poll(Stage::Submit(ticket))
            }
            Ok(RendezvousReply::Match { peer }) => {
                self.emit(MatchmakingEvent::Matched {
                    peer: peer.participant,
                });
                Outcome::Next(Stage::Traverse(ticket, peer))
            }
            Ok(RendezvousReply::Reject { reason }) => {
                use parley_protocol::Recovery;
                let message = MatchmakingError::Rejected(reason).to_string();
                match reason.recovery() {
                    Recovery::Resubmit => Outcome::Recoverable(Stage::Submit(ticket), message),
                    Recovery::Reacquire => Outcome::Recoverable(Stage::Acquire, message),
                    Recovery::Terminal => Outcome::Terminal(message),
                }
            }
            Ok(other) => Outcome::Recoverable(
                Stage::Submit(ticket),
                MatchmakingError::UnexpectedReply(format!("{other:?}")).to_string(),
            ),
        }
    }

    async fn traverse(&self, ticket: MatchTicket, peer: PeerCandidate) -> Outcome<T::Connection> {
        self.emit(MatchmakingEvent::Traversing {
            peer: peer.participant,
        });
        let result =
            tokio::time::timeout(self.config.traversal_timeout, self.traversal.traverse(&peer))
                .await;

        match flatten(result, self.config.traversal_timeout) {
            Ok(conn) => {
                tracing::info!(session = %self.session, peer = %peer.participant, "matchmaking established a transport");
                self.emit(MatchmakingEvent::Established {
                    peer: peer.participant,
                });
                Outcome::Established(conn)
            }
            // Traversal failure is never terminal.
            Err(e) => Outcome::Recoverable(Stage::Submit(ticket), e.to_string()),
        }
    }

}

fn flatten<V>(
    result: Result<Result<V, MatchmakingError>, tokio::time::error::Elapsed>,
    limit: Duration,
) -> Result<V, MatchmakingError> {
    result.map_err(|_| MatchmakingError::Timeout(limit))?
}

impl<R: RendezvousService, T: Traversal> Dialer for MatchmakingClient<R, T> {
    type Connection = T::Connection;

    async fn dial(&self) -> Result<T::Connection, TransportError> {
        self.run().await
    }
}
