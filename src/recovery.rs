//! Recovery orchestrator
//!
//! Collects the shares trustees return for one recovery request, and runs
//! `combine` exactly once when the quorum is first reached.
//!
//! The orchestrator is safe to share between tasks or threads. Every state
//! transition (including the single `combine` call) happens under one short
//! lock that is never held across I/O, so two submissions that reach the
//! quorum at the same moment cannot both complete the request.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::domain::{PeerId, Threshold};
use crate::error::RecoveryError;
use crate::sharing::{self, Secret, Share, SplitId};

/// What happened to a submitted share
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Stored; more shares are needed.
    Pending { received: usize, needed: usize },
    /// This share completed the quorum and the secret was recovered.
    /// `participants` are the trustees asked for this request.
    Recovered { participants: Vec<PeerId> },
    /// This share completed the quorum but combining failed. The request is
    /// finished; a new one may be started.
    Failed { error: RecoveryError },
    /// The sender already submitted for this request.
    Duplicate,
    /// The sender was not asked for a share.
    Unsolicited,
    /// The share belongs to a different split.
    Foreign,
    /// The share is not the one bound to the sender.
    Misassigned,
    /// No request is collecting shares (none started, or already finished).
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Collecting,
    Completed,
    Failed,
}

struct RecoveryRequest {
    participants: Vec<PeerId>,
    received: Vec<(PeerId, Share)>,
    /// Participants that went away before answering
    withdrawn: Vec<PeerId>,
    status: Status,
    reply: Option<oneshot::Sender<Result<Secret, RecoveryError>>>,
}

#[derive(Default)]
struct Inner {
    request: Option<RecoveryRequest>,
    recovered: bool,
}

/// Awaitable outcome of one recovery request, resolved exactly once
#[derive(Debug)]
pub struct RecoveryTicket {
    participants: Vec<PeerId>,
    outcome: oneshot::Receiver<Result<Secret, RecoveryError>>,
}

impl RecoveryTicket {
    /// Trustees the request was sent to
    #[must_use]
    pub fn participants(&self) -> &[PeerId] {
        &self.participants
    }

    /// Waits for the quorum
    ///
    /// # Errors
    /// The combine failure, or [`RecoveryError::Abandoned`] if the request
    /// was superseded or its session dropped
    pub async fn outcome(self) -> Result<Secret, RecoveryError> {
        self.outcome.await.unwrap_or(Err(RecoveryError::Abandoned))
    }

    /// Blocking variant of [`RecoveryTicket::outcome`] for non-async callers
    ///
    /// # Errors
    /// Same as [`RecoveryTicket::outcome`]
    pub fn blocking_outcome(self) -> Result<Secret, RecoveryError> {
        self.outcome
            .blocking_recv()
            .unwrap_or(Err(RecoveryError::Abandoned))
    }
}

/// Quorum detection for the shares of one split
pub struct RecoveryOrchestrator {
    split_id: SplitId,
    threshold: Threshold,
    inner: Mutex<Inner>,
}

impl RecoveryOrchestrator {
    pub fn new(split_id: SplitId, threshold: Threshold) -> Self {
        Self {
            split_id,
            threshold,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic elsewhere cannot leave Inner half-updated; keep serving.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_recovered(&self) -> bool {
        self.lock().recovered
    }

    /// Starts a request addressed to the `reachable` trustees
    ///
    /// Nothing changes when it fails, so the caller must not send any
    /// request message either. A pending request is superseded and its
    /// ticket resolves to [`RecoveryError::Abandoned`].
    ///
    /// # Errors
    /// - [`RecoveryError::AlreadyRecovered`] once the secret was recovered
    /// - [`RecoveryError::InsufficientConnectedTrustees`] with fewer than `k`
    ///   reachable trustees
    pub fn begin(&self, reachable: Vec<PeerId>) -> Result<RecoveryTicket, RecoveryError> {
        let mut inner = self.lock();
        if inner.recovered {
            return Err(RecoveryError::AlreadyRecovered);
        }

        let needed = self.threshold.as_usize();
        if reachable.len() < needed {
            return Err(RecoveryError::InsufficientConnectedTrustees {
                needed,
                connected: reachable.len(),
            });
        }

        let (reply, outcome) = oneshot::channel();
        if let Some(previous) = inner.request.replace(RecoveryRequest {
            participants: reachable.clone(),
            received: Vec::with_capacity(needed),
            withdrawn: Vec::new(),
            status: Status::Collecting,
            reply: Some(reply),
        }) {
            if previous.status == Status::Collecting {
                warn!(
                    received = previous.received.len(),
                    "superseding unfinished recovery request"
                );
            }
        }

        info!(trustees = reachable.len(), needed, "recovery requested");
        Ok(RecoveryTicket {
            participants: reachable,
            outcome,
        })
    }

    /// Records the share returned by `from`
    ///
    /// The submission that first brings the pending set to `k` combines
    /// exactly `k` shares, resolves the ticket and finishes the request.
    /// Everything arriving afterwards is [`Submission::Closed`].
    pub fn submit(&self, from: &PeerId, share: Share) -> Submission {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let Some(request) = inner.request.as_mut() else {
            return Submission::Closed;
        };
        if request.status != Status::Collecting {
            return Submission::Closed;
        }
        if share.split_id() != self.split_id {
            warn!(peer = %from, "share from a different split ignored");
            return Submission::Foreign;
        }
        if !request.participants.contains(from) || request.withdrawn.contains(from) {
            warn!(peer = %from, "unsolicited share ignored");
            return Submission::Unsolicited;
        }
        if request.received.iter().any(|(peer, _)| peer == from) {
            return Submission::Duplicate;
        }

        request.received.push((from.clone(), share));
        let needed = self.threshold.as_usize();
        if request.received.len() < needed {
            info!(peer = %from, received = request.received.len(), needed, "share received");
            return Submission::Pending {
                received: request.received.len(),
                needed,
            };
        }

        let shares: Vec<Share> = request
            .received
            .iter()
            .take(needed)
            .map(|(_, share)| share.clone())
            .collect();
        let result = sharing::combine(&shares).map_err(RecoveryError::from);
        request.received.clear();

        let reply = request.reply.take();
        let participants = request.participants.clone();
        let submission = match &result {
            Ok(_) => {
                request.status = Status::Completed;
                inner.recovered = true;
                info!(trustees = participants.len(), "secret recovered");
                Submission::Recovered { participants }
            }
            Err(error) => {
                request.status = Status::Failed;
                warn!(%error, "recovery failed");
                Submission::Failed {
                    error: error.clone(),
                }
            }
        };

        if let Some(reply) = reply {
            // The owner may have stopped waiting
            let _ = reply.send(result);
        }
        submission
    }

    /// Notes that `peer` can no longer answer the pending request
    ///
    /// Once the shares already received plus the participants still
    /// reachable drop below `k`, the request fails and its ticket resolves
    /// to [`RecoveryError::InsufficientConnectedTrustees`]. Returns whether
    /// that happened.
    pub fn withdraw(&self, peer: &PeerId) -> bool {
        let mut inner = self.lock();
        let Some(request) = inner.request.as_mut() else {
            return false;
        };
        if request.status != Status::Collecting
            || !request.participants.contains(peer)
            || request.withdrawn.contains(peer)
            || request.received.iter().any(|(from, _)| from == peer)
        {
            return false;
        }

        request.withdrawn.push(peer.clone());
        let needed = self.threshold.as_usize();
        let reachable = request.participants.len() - request.withdrawn.len();
        if reachable >= needed {
            info!(peer = %peer, reachable, needed, "participant left recovery");
            return false;
        }

        request.status = Status::Failed;
        request.received.clear();
        let error = RecoveryError::InsufficientConnectedTrustees {
            needed,
            connected: reachable,
        };
        warn!(peer = %peer, %error, "recovery request can no longer complete");
        if let Some(reply) = request.reply.take() {
            let _ = reply.send(Err(error));
        }
        true
    }
}
