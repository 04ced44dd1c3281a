//! Wire messages
//!
//! Every frame is one JSON object whose `"type"` field names the concrete
//! message; the variant's own fields sit next to it in the same object.

use crate::core::{Balance, Block, Transaction};
use crate::error::{BlockchainError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    #[serde(rename = "GetBlockRequest", rename_all = "camelCase")]
    GetBlock { block_id: String },
    #[serde(rename = "GetNextBlockRequest", rename_all = "camelCase")]
    GetNextBlock { block_id: String },
    #[serde(rename = "GetLastBlockRequest")]
    GetLastBlock,
    #[serde(rename = "GetGenesisRequest")]
    GetGenesis,
    #[serde(rename = "GetAllBlocksRequest")]
    GetAllBlocks,
    #[serde(rename = "PostBlockRequest")]
    PostBlock { block: Block },
    #[serde(rename = "PostTransactionRequest")]
    PostTransaction { transaction: Transaction },
    #[serde(rename = "GetPendingTransactionsRequest")]
    GetPendingTransactions,
    #[serde(rename = "GetServersRequest")]
    GetServers,
    #[serde(rename = "PostServersRequest")]
    PostServers { servers: Vec<String> },
    #[serde(rename = "GetNodeTypeRequest")]
    GetNodeType,
    #[serde(rename = "GetDifficultyRequest")]
    GetDifficulty,
    #[serde(rename = "GetBalanceRequest")]
    GetBalance { owner: String },
    #[serde(rename = "GetServerAddressRequest")]
    GetServerAddress,
    #[serde(rename = "GetTransactionRequest", rename_all = "camelCase")]
    GetTransaction {
        transaction_signature: String,
        #[serde(default)]
        pending: bool,
    },
}

impl Request {
    /// The response kind a peer must answer this request with
    pub fn expected_response(&self) -> ResponseKind {
        match self {
            Request::GetBlock { .. }
            | Request::GetNextBlock { .. }
            | Request::GetLastBlock
            | Request::GetGenesis => ResponseKind::Block,
            Request::GetAllBlocks => ResponseKind::Blocks,
            Request::PostBlock { .. }
            | Request::PostTransaction { .. }
            | Request::PostServers { .. } => ResponseKind::Ack,
            Request::GetPendingTransactions => ResponseKind::PendingTransactions,
            Request::GetServers => ResponseKind::Servers,
            Request::GetNodeType => ResponseKind::NodeType,
            Request::GetDifficulty => ResponseKind::Difficulty,
            Request::GetBalance { .. } => ResponseKind::Balance,
            Request::GetServerAddress => ResponseKind::ServerAddress,
            Request::GetTransaction { .. } => ResponseKind::Transaction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Ack,
    Block,
    Blocks,
    Servers,
    NodeType,
    ServerAddress,
    PendingTransactions,
    Difficulty,
    Balance,
    Transaction,
}

/// Payload half of a response, tagged by `"type"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseBody {
    #[serde(rename = "Response")]
    Ack,
    #[serde(rename = "BlockResponse")]
    Block {
        #[serde(default)]
        block: Option<Block>,
    },
    #[serde(rename = "BlocksResponse")]
    Blocks {
        #[serde(default)]
        blocks: Vec<Block>,
    },
    #[serde(rename = "ServersResponse")]
    Servers {
        #[serde(default)]
        servers: Vec<String>,
    },
    #[serde(rename = "NodeTypeResponse", rename_all = "camelCase")]
    NodeType {
        #[serde(default)]
        is_full_node: bool,
    },
    #[serde(rename = "ServerAddressResponse")]
    ServerAddress {
        #[serde(default)]
        uri: String,
    },
    #[serde(rename = "PendingTransactionsResponse")]
    PendingTransactions {
        #[serde(default)]
        transactions: Vec<Transaction>,
    },
    #[serde(rename = "DifficultyResponse")]
    Difficulty {
        #[serde(default)]
        difficulty: u32,
    },
    #[serde(rename = "BalanceResponse")]
    Balance {
        #[serde(default)]
        balance: Option<Balance>,
    },
    #[serde(rename = "TransactionResponse")]
    Transaction {
        #[serde(default)]
        transaction: Option<Transaction>,
    },
}

impl ResponseBody {
    pub fn kind(&self) -> ResponseKind {
        match self {
            ResponseBody::Ack => ResponseKind::Ack,
            ResponseBody::Block { .. } => ResponseKind::Block,
            ResponseBody::Blocks { .. } => ResponseKind::Blocks,
            ResponseBody::Servers { .. } => ResponseKind::Servers,
            ResponseBody::NodeType { .. } => ResponseKind::NodeType,
            ResponseBody::ServerAddress { .. } => ResponseKind::ServerAddress,
            ResponseBody::PendingTransactions { .. } => ResponseKind::PendingTransactions,
            ResponseBody::Difficulty { .. } => ResponseKind::Difficulty,
            ResponseBody::Balance { .. } => ResponseKind::Balance,
            ResponseBody::Transaction { .. } => ResponseKind::Transaction,
        }
    }

    /// A body of `kind` carrying no data
    pub fn empty(kind: ResponseKind) -> ResponseBody {
        match kind {
            ResponseKind::Ack => ResponseBody::Ack,
            ResponseKind::Block => ResponseBody::Block { block: None },
            ResponseKind::Blocks => ResponseBody::Blocks { blocks: vec![] },
            ResponseKind::Servers => ResponseBody::Servers { servers: vec![] },
            ResponseKind::NodeType => ResponseBody::NodeType {
                is_full_node: false,
            },
            ResponseKind::ServerAddress => ResponseBody::ServerAddress { uri: String::new() },
            ResponseKind::PendingTransactions => {
                ResponseBody::PendingTransactions { transactions: vec![] }
            }
            ResponseKind::Difficulty => ResponseBody::Difficulty { difficulty: 0 },
            ResponseKind::Balance => ResponseBody::Balance { balance: None },
            ResponseKind::Transaction => ResponseBody::Transaction { transaction: None },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default = "default_ok")]
    pub ok: bool,
    #[serde(default)]
    pub message: String,
    #[serde(flatten)]
    pub body: ResponseBody,
}

fn default_ok() -> bool {
    true
}

impl Response {
    pub fn ok(body: ResponseBody) -> Response {
        Response {
            ok: true,
            message: String::new(),
            body,
        }
    }

    pub fn ack() -> Response {
        Self::ok(ResponseBody::Ack)
    }

    /// A failed response of `kind`; it never carries payload data
    pub fn error(kind: ResponseKind, message: impl Into<String>) -> Response {
        Response {
            ok: false,
            message: message.into(),
            body: ResponseBody::empty(kind),
        }
    }

    pub fn kind(&self) -> ResponseKind {
        self.body.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(frame: &str) -> Result<Message> {
        serde_json::from_str(frame)
            .map_err(|e| BlockchainError::Protocol(format!("Undecodable frame: {e}")))
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PollOption, Ticket};
    use crate::wallet::Account;
    use serde_json::json;

    fn signed_poll() -> Transaction {
        let account = Account::new().unwrap();
        let mut tx = Transaction::new_poll(
            1,
            1_700_000_000,
            "Title",
            "Description",
            vec![PollOption {
                index: 0,
                title: "Only".to_string(),
                description: "choice".to_string(),
            }],
        );
        account.sign(&mut tx).unwrap();
        tx.pending = false;
        tx
    }

    fn samples() -> Vec<Message> {
        let tx = signed_poll();
        let mut block = Block::new(Some(Block::genesis().hash), vec![tx.clone()], "v", 0).unwrap();
        block.hash = block.calculate_hash();
        let mut balance = Balance::new("owner");
        balance.coins = 12;
        balance.unused_tickets.push(Ticket {
            signature: "t".to_string(),
            poll: "p".to_string(),
        });

        let requests = vec![
            Request::GetBlock {
                block_id: block.hash.clone(),
            },
            Request::GetNextBlock {
                block_id: block.hash.clone(),
            },
            Request::GetLastBlock,
            Request::GetGenesis,
            Request::GetAllBlocks,
            Request::PostBlock {
                block: block.clone(),
            },
            Request::PostTransaction {
                transaction: tx.clone(),
            },
            Request::GetPendingTransactions,
            Request::GetServers,
            Request::PostServers {
                servers: vec!["127.0.0.1:2002".to_string()],
            },
            Request::GetNodeType,
            Request::GetDifficulty,
            Request::GetBalance {
                owner: "owner".to_string(),
            },
            Request::GetServerAddress,
            Request::GetTransaction {
                transaction_signature: tx.signature.clone(),
                pending: true,
            },
        ];
        let responses = vec![
            Response::ack(),
            Response::ok(ResponseBody::Block {
                block: Some(block.clone()),
            }),
            Response::ok(ResponseBody::Blocks {
                blocks: vec![Block::genesis(), block],
            }),
            Response::ok(ResponseBody::Servers {
                servers: vec!["a:1".to_string()],
            }),
            Response::ok(ResponseBody::NodeType { is_full_node: true }),
            Response::ok(ResponseBody::ServerAddress {
                uri: "127.0.0.1:2001".to_string(),
            }),
            Response::ok(ResponseBody::PendingTransactions {
                transactions: vec![tx.clone()],
            }),
            Response::ok(ResponseBody::Difficulty { difficulty: 3 }),
            Response::ok(ResponseBody::Balance {
                balance: Some(balance),
            }),
            Response::ok(ResponseBody::Transaction {
                transaction: Some(tx),
            }),
            Response::error(ResponseKind::Block, "Not found: block x"),
        ];

        requests
            .into_iter()
            .map(Message::from)
            .chain(responses.into_iter().map(Message::from))
            .collect()
    }

    #[test]
    fn test_every_message_decodes_to_itself() {
        for message in samples() {
            let frame = message.encode().unwrap();
            assert_eq!(Message::decode(&frame).unwrap(), message, "frame: {frame}");
        }
    }

    #[test]
    fn test_request_wire_shape() {
        let frame = Message::from(Request::GetTransaction {
            transaction_signature: "sig".to_string(),
            pending: false,
        })
        .encode()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({"type": "GetTransactionRequest", "transactionSignature": "sig", "pending": false})
        );
    }

    #[test]
    fn test_response_wire_shape() {
        let value = serde_json::to_value(Response::ok(ResponseBody::NodeType {
            is_full_node: true,
        }))
        .unwrap();
        assert_eq!(
            value,
            json!({"type": "NodeTypeResponse", "ok": true, "message": "", "isFullNode": true})
        );
    }

    #[test]
    fn test_error_response_has_no_payload() {
        let response = Response::error(ResponseKind::Balance, "nope");
        assert!(!response.ok);
        assert_eq!(response.kind(), ResponseKind::Balance);
        assert_eq!(response.body, ResponseBody::Balance { balance: None });
    }

    #[test]
    fn test_unknown_type_is_protocol_error() {
        let err = Message::decode(r#"{"type":"SelfDestructRequest"}"#).unwrap_err();
        assert!(matches!(err, BlockchainError::Protocol(_)));
        assert!(Message::decode("not json").is_err());
    }

    #[test]
    fn test_expected_response_kinds() {
        assert_eq!(Request::GetGenesis.expected_response(), ResponseKind::Block);
        assert_eq!(
            Request::PostServers { servers: vec![] }.expected_response(),
            ResponseKind::Ack
        );
        assert_eq!(
            Request::GetPendingTransactions.expected_response(),
            ResponseKind::PendingTransactions
        );
    }
}
