use crate::core::transaction::PollPayload;
use serde::{Deserialize, Serialize};

/// A ticket held by an account, identified by its issuing transaction
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub signature: String,
    pub poll: String,
}

/// Per-account projection of the chain.
///
/// Only the ledger engine writes balances; everyone else sees clones.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub owner: String,
    pub coins: u64,
    /// Highest nonce applied for this sender
    pub nonce: i64,
    /// Signatures of the polls this account created
    pub polls: Vec<String>,
    pub unused_tickets: Vec<Ticket>,
    pub used_tickets: Vec<Ticket>,
}

impl Balance {
    pub fn new(owner: &str) -> Balance {
        Balance {
            owner: owner.to_string(),
            coins: 0,
            nonce: 0,
            polls: vec![],
            unused_tickets: vec![],
            used_tickets: vec![],
        }
    }

    /// Deep copy for speculative validation
    pub fn snapshot(&self) -> Balance {
        self.clone()
    }

    pub fn unused_ticket_position(&self, poll: &str) -> Option<usize> {
        self.unused_tickets.iter().position(|ticket| ticket.poll == poll)
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "camelCase")]
pub struct OptionTally {
    pub index: i32,
    pub votes: u64,
}

/// Final vote counts for one poll
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "camelCase")]
pub struct PollTally {
    pub poll: String,
    pub options: Vec<OptionTally>,
}

impl PollTally {
    pub fn new(poll: &str, payload: &PollPayload) -> PollTally {
        PollTally {
            poll: poll.to_string(),
            options: payload
                .options
                .iter()
                .map(|option| OptionTally {
                    index: option.index,
                    votes: 0,
                })
                .collect(),
        }
    }

    /// Adds one vote; false if the option does not exist
    pub fn record_vote(&mut self, index: i32) -> bool {
        match self.options.iter_mut().find(|option| option.index == index) {
            Some(option) => {
                option.votes += 1;
                true
            }
            None => false,
        }
    }

    pub fn votes(&self, index: i32) -> Option<u64> {
        self.options
            .iter()
            .find(|option| option.index == index)
            .map(|option| option.votes)
    }
}
