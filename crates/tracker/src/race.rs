//! Single-assignment result slot for racing two delivery channels.
//!
//! While a tracker is polling it may reopen a push channel alongside the
//! poll loop. Whichever channel produces the first snapshot claims the
//! slot; the other channel is released and its late results are ignored.

/// The two channels a tracker can race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contender {
    Push,
    Poll,
}

/// Outcome of a [`RaceSlot::claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The caller wrote the slot first.
    Won,
    /// The slot already holds another winner.
    Lost { winner: Contender },
}

/// First writer wins; later writes are rejected.
#[derive(Debug, Default)]
pub struct RaceSlot {
    winner: Option<Contender>,
}

impl RaceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to claim the slot for `contender`.
    ///
    /// Claiming again as the current winner reports `Won`.
    pub fn claim(&mut self, contender: Contender) -> Claim {
        match self.winner {
            None => {
                self.winner = Some(contender);
                Claim::Won
            }
            Some(winner) if winner == contender => Claim::Won,
            Some(winner) => Claim::Lost { winner },
        }
    }

    pub fn winner(&self) -> Option<Contender> {
        self.winner
    }

    pub fn is_decided(&self) -> bool {
        self.winner.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claim_wins() {
        let mut slot = RaceSlot::new();
        assert!(!slot.is_decided());

        assert_eq!(slot.claim(Contender::Poll), Claim::Won);
        assert_eq!(
            slot.claim(Contender::Push),
            Claim::Lost {
                winner: Contender::Poll
            }
        );
        assert_eq!(slot.winner(), Some(Contender::Poll));
    }

    #[test]
    fn winner_may_claim_again() {
        let mut slot = RaceSlot::new();
        slot.claim(Contender::Push);
        assert_eq!(slot.claim(Contender::Push), Claim::Won);
    }
}
