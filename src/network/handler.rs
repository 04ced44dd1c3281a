use crate::core::Blockchain;
use crate::error::{BlockchainError, Result};
use crate::network::client::{run_blocking, Client, ClientInner};
use crate::network::message::{Request, Response, ResponseBody};
use crate::network::peer::RequestHandler;
use async_trait::async_trait;
use log::info;
use std::sync::Weak;

const NOT_SUPPORTED: &str = "Not supported.";

/// Answers requests arriving on any session of a node. Light clients
/// only answer the discovery requests; full nodes serve their ledger.
pub struct NodeHandler {
    client: Weak<ClientInner>,
}

impl NodeHandler {
    pub(crate) fn new(client: Weak<ClientInner>) -> NodeHandler {
        NodeHandler { client }
    }
}

#[async_trait]
impl RequestHandler for NodeHandler {
    async fn handle(&self, request: Request) -> Response {
        match self.client.upgrade() {
            Some(inner) => serve(&Client::from_inner(inner), request).await,
            None => Response::error(request.expected_response(), "Node is shutting down"),
        }
    }
}

async fn serve(client: &Client, request: Request) -> Response {
    let kind = request.expected_response();
    let result = match request {
        Request::GetNodeType => Ok(ResponseBody::NodeType {
            is_full_node: client.is_full_node(),
        }),
        Request::GetServers => Ok(ResponseBody::Servers {
            servers: client.servers(),
        }),
        Request::GetServerAddress => Ok(ResponseBody::ServerAddress {
            uri: client.address().to_string(),
        }),
        Request::PostServers { servers } => {
            client.learn_servers(servers);
            Ok(ResponseBody::Ack)
        }
        ledger_request => match client.ledger() {
            Some(ledger) => serve_ledger(ledger, ledger_request).await,
            None => return Response::error(kind, NOT_SUPPORTED),
        },
    };

    match result {
        Ok(body) => Response::ok(body),
        Err(e) => {
            info!("Refused {kind:?} request: {e}");
            Response::error(kind, e.to_string())
        }
    }
}

async fn serve_ledger(ledger: &Blockchain, request: Request) -> Result<ResponseBody> {
    let body = match request {
        Request::GetBlock { block_id } => ResponseBody::Block {
            block: Some(run_blocking(ledger, move |l| l.get_block(&block_id)).await?),
        },
        Request::GetNextBlock { block_id } => ResponseBody::Block {
            block: Some(run_blocking(ledger, move |l| l.get_next_block(&block_id)).await?),
        },
        Request::GetLastBlock => ResponseBody::Block {
            block: Some(run_blocking(ledger, |l| l.get_last_block()).await?),
        },
        Request::GetGenesis => ResponseBody::Block {
            block: Some(ledger.get_genesis()?),
        },
        Request::GetAllBlocks => ResponseBody::Blocks {
            blocks: run_blocking(ledger, |l| l.get_all_blocks()).await?,
        },
        Request::PostBlock { block } => {
            run_blocking(ledger, move |l| l.post_block(&block)).await?;
            ResponseBody::Ack
        }
        Request::PostTransaction { transaction } => {
            run_blocking(ledger, move |l| l.post_transaction(&transaction)).await?;
            ResponseBody::Ack
        }
        Request::GetPendingTransactions => ResponseBody::PendingTransactions {
            transactions: run_blocking(ledger, |l| l.get_pending_transactions()).await?,
        },
        Request::GetDifficulty => ResponseBody::Difficulty {
            difficulty: ledger.difficulty(),
        },
        Request::GetBalance { owner } => ResponseBody::Balance {
            balance: Some(run_blocking(ledger, move |l| l.get_balance(&owner)).await?),
        },
        Request::GetTransaction {
            transaction_signature,
            pending,
        } => ResponseBody::Transaction {
            transaction: Some(
                run_blocking(ledger, move |l| {
                    l.get_transaction(&transaction_signature, pending)
                })
                .await?,
            ),
        },
        other => {
            return Err(BlockchainError::Protocol(format!(
                "{:?} is not a ledger request",
                other.expected_response()
            )))
        }
    };
    Ok(body)
}
