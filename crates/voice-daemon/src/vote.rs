//! Listener votes on skip and shuffle.
//!
//! A session holds at most one [`Ballot`].  It is tied to the play that was
//! current when it opened and closes on its own once that play is gone or
//! the vote window has passed.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;
use voice_proto::protocol::{UserId, VoteAction};

use crate::error::CommandError;

/// Votes needed among `listeners` people for `ratio_percent`, rounded up.
/// Never less than one.
pub fn required_votes(listeners: usize, ratio_percent: u8) -> usize {
    (listeners * usize::from(ratio_percent)).div_ceil(100).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tally {
    Pending { votes: usize, required: usize },
    Passed { votes: usize, required: usize },
}

#[derive(Debug)]
pub struct Ballot {
    action: VoteAction,
    /// Play handle of the track current at opening.
    subject: Option<u64>,
    voters: HashSet<UserId>,
    required: usize,
    closes_at: Instant,
}

impl Ballot {
    pub fn open(
        action: VoteAction,
        subject: Option<u64>,
        required: usize,
        window: Duration,
    ) -> Self {
        Self {
            action,
            subject,
            voters: HashSet::new(),
            required: required.max(1),
            closes_at: Instant::now() + window,
        }
    }

    pub fn action(&self) -> VoteAction {
        self.action
    }

    /// Still running for the play identified by `subject`.
    pub fn is_open(&self, subject: Option<u64>) -> bool {
        self.subject == subject && Instant::now() < self.closes_at
    }

    pub fn cast(&mut self, voter: UserId) -> Result<Tally, CommandError> {
        if !self.voters.insert(voter) {
            return Err(CommandError::AlreadyVoted);
        }
        let votes = self.voters.len();
        let required = self.required;
        Ok(if votes >= required {
            Tally::Passed { votes, required }
        } else {
            Tally::Pending { votes, required }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_votes_rounds_up() {
        assert_eq!(required_votes(0, 50), 1);
        assert_eq!(required_votes(1, 50), 1);
        assert_eq!(required_votes(3, 50), 2);
        assert_eq!(required_votes(4, 50), 2);
        assert_eq!(required_votes(5, 100), 5);
        assert_eq!(required_votes(10, 1), 1);
    }

    #[tokio::test]
    async fn test_ballot_counts_each_voter_once() {
        let mut ballot = Ballot::open(VoteAction::Skip, Some(7), 2, Duration::from_secs(60));
        assert_eq!(
            ballot.cast(UserId(1)),
            Ok(Tally::Pending {
                votes: 1,
                required: 2
            })
        );
        assert_eq!(ballot.cast(UserId(1)), Err(CommandError::AlreadyVoted));
        assert_eq!(
            ballot.cast(UserId(2)),
            Ok(Tally::Passed {
                votes: 2,
                required: 2
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ballot_closes_on_timeout_or_new_play() {
        let ballot = Ballot::open(VoteAction::Shuffle, Some(7), 3, Duration::from_secs(60));
        assert!(ballot.is_open(Some(7)));
        assert!(!ballot.is_open(Some(8)));
        assert!(!ballot.is_open(None));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!ballot.is_open(Some(7)));
    }
}
