//! Property tests for quorum detection

use quickcheck_macros::quickcheck;
use sharekeeper::domain::PeerId;
use sharekeeper::recovery::Submission;
use sharekeeper::session::Session;
use sharekeeper::sharing::Secret;

use crate::split_combine::{SecretBytes, ValidShamirParams, shuffled_indices};

fn trustees(n: u8) -> Vec<PeerId> {
    (0..n).map(|i| PeerId::new(format!("trustee-{i}"))).collect()
}

/// Whatever order the shares arrive in, the k-th one completes recovery and
/// nothing after it does
#[quickcheck]
fn prop_kth_arrival_completes_exactly_once(
    secret: SecretBytes,
    params: ValidShamirParams,
    arrival_seed: u64,
) -> bool {
    let secret = Secret::new(secret.0);
    let trustees = trustees(params.num_shares);
    let Ok(session) = Session::create(&secret, params.config(), &trustees) else {
        return false;
    };
    let Ok(ticket) = session.request_shares(&trustees) else {
        return false;
    };

    let outcomes: Vec<Submission> = shuffled_indices(trustees.len(), arrival_seed)
        .into_iter()
        .map(|idx| {
            let trustee = &trustees[idx];
            let share = session.share_for(trustee).unwrap().clone();
            session.submit_share(trustee, share)
        })
        .collect();

    let k = params.threshold as usize;
    let completions = outcomes
        .iter()
        .filter(|o| matches!(o, Submission::Recovered { .. }))
        .count();

    completions == 1
        && matches!(outcomes[k - 1], Submission::Recovered { .. })
        && outcomes[k..].iter().all(|o| *o == Submission::Closed)
        && ticket.blocking_outcome().is_ok_and(|recovered| recovered == secret)
}

/// Recovery never starts with fewer than k reachable trustees
#[quickcheck]
fn prop_request_needs_quorum(params: ValidShamirParams, reachable: u8) -> bool {
    let secret = Secret::new(vec![7; 16]);
    let trustees = trustees(params.num_shares);
    let Ok(session) = Session::create(&secret, params.config(), &trustees) else {
        return false;
    };

    let reachable = usize::from(reachable) % (trustees.len() + 1);
    let started = session.request_shares(&trustees[..reachable]).is_ok();
    started == (reachable >= params.threshold as usize)
}
