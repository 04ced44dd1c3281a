// Transactions are the only way state changes on the ledger.
// There are three kinds: creating a poll, issuing a voting ticket for one of
// my polls, and spending a ticket to vote. All three share the signed header
// (nonce, timestamp, sender) and differ only in their payload.

use crate::core::monetary::{POLL_COST, TICKET_COST};
use crate::utils::{base64_decode, ecdsa_p256_sha256_verify};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub index: i32,
    pub title: String,
    pub description: String,
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "camelCase")]
pub struct PollPayload {
    pub title: String,
    pub description: String,
    pub options: Vec<PollOption>,
}

impl PollPayload {
    pub fn has_option(&self, index: i32) -> bool {
        self.options.iter().any(|option| option.index == index)
    }
}

/// A right for `owner` to cast one vote on `poll`
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "camelCase")]
pub struct TicketPayload {
    pub owner: String,
    /// Signature of the poll transaction
    pub poll: String,
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "camelCase")]
pub struct VotePayload {
    pub poll: String,
    pub option: i32,
}

/// Variant-specific content, tagged on the wire by `"type"`
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
    Poll(PollPayload),
    Ticket(TicketPayload),
    Vote(VotePayload),
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(flatten)]
    pub payload: Payload,
    /// base64 DER signature; empty until signed. Doubles as the transaction id.
    pub signature: String,
    pub nonce: i64,
    pub timestamp: i64,
    /// base64 SubjectPublicKeyInfo of the signer
    pub sender: String,
    /// Local bookkeeping only, never signed or sent
    #[serde(skip)]
    pub pending: bool,
}

impl Transaction {
    fn unsigned(nonce: i64, timestamp: i64, payload: Payload) -> Transaction {
        Transaction {
            payload,
            signature: String::new(),
            nonce,
            timestamp,
            sender: String::new(),
            pending: true,
        }
    }

    pub fn new_poll(
        nonce: i64,
        timestamp: i64,
        title: &str,
        description: &str,
        options: Vec<PollOption>,
    ) -> Transaction {
        Self::unsigned(
            nonce,
            timestamp,
            Payload::Poll(PollPayload {
                title: title.to_string(),
                description: description.to_string(),
                options,
            }),
        )
    }

    pub fn new_ticket(nonce: i64, timestamp: i64, owner: &str, poll: &str) -> Transaction {
        Self::unsigned(
            nonce,
            timestamp,
            Payload::Ticket(TicketPayload {
                owner: owner.to_string(),
                poll: poll.to_string(),
            }),
        )
    }

    pub fn new_vote(nonce: i64, timestamp: i64, poll: &str, option: i32) -> Transaction {
        Self::unsigned(
            nonce,
            timestamp,
            Payload::Vote(VotePayload {
                poll: poll.to_string(),
                option,
            }),
        )
    }

    pub fn kind(&self) -> &'static str {
        match self.payload {
            Payload::Poll(_) => "poll",
            Payload::Ticket(_) => "ticket",
            Payload::Vote(_) => "vote",
        }
    }

    /// Coins charged to the sender when the transaction is applied
    pub fn cost(&self) -> u64 {
        match self.payload {
            Payload::Poll(_) => POLL_COST,
            Payload::Ticket(_) => TICKET_COST,
            Payload::Vote(_) => 0,
        }
    }

    /// The bytes that get signed and hashed into blocks.
    ///
    /// Fixed-width integers are little-endian and every string is prefixed
    /// with its UTF-8 length as a `u32`, so no two distinct transactions
    /// share an encoding.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend(self.nonce.to_le_bytes());
        bytes.extend(self.timestamp.to_le_bytes());
        write_str(&mut bytes, &self.sender);

        match &self.payload {
            Payload::Poll(poll) => {
                write_str(&mut bytes, &poll.title);
                write_str(&mut bytes, &poll.description);
                for option in &poll.options {
                    bytes.extend(option.index.to_le_bytes());
                    write_str(&mut bytes, &option.title);
                    write_str(&mut bytes, &option.description);
                }
            }
            Payload::Ticket(ticket) => {
                write_str(&mut bytes, &ticket.owner);
                write_str(&mut bytes, &ticket.poll);
            }
            Payload::Vote(vote) => {
                write_str(&mut bytes, &vote.poll);
                bytes.extend(vote.option.to_le_bytes());
            }
        }
        bytes
    }

    /// True only if `signature` is a valid signature by `sender` over the
    /// canonical bytes. Malformed base64 counts as unsigned.
    pub fn verify(&self) -> bool {
        let public_key = match base64_decode(&self.sender) {
            Ok(key) => key,
            Err(_) => return false,
        };
        let signature = match base64_decode(&self.signature) {
            Ok(signature) if !signature.is_empty() => signature,
            _ => return false,
        };
        ecdsa_p256_sha256_verify(&public_key, &signature, &self.canonical_bytes())
    }
}

fn write_str(bytes: &mut Vec<u8>, value: &str) {
    bytes.extend((value.len() as u32).to_le_bytes());
    bytes.extend(value.as_bytes());
}
