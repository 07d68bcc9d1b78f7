use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bytes::Bytes;

use super::error::DhtError;
use super::node::{Node, NodeId};
use crate::bencode::{decode, encode, Value};

/// KRPC transaction ids are short byte strings; ours are always 2 bytes.
pub type TransactionId = Bytes;

/// A query we can send or receive.
#[derive(Debug, Clone)]
pub enum KrpcQuery {
    Ping,
    FindNode {
        target: NodeId,
    },
    GetPeers {
        info_hash: [u8; 20],
    },
    /// Received only; we are read-only and never announce.
    AnnouncePeer {
        info_hash: [u8; 20],
        port: u16,
        token: Bytes,
        implied_port: bool,
    },
}

impl KrpcQuery {
    pub fn method(&self) -> &'static str {
        match self {
            KrpcQuery::Ping => "ping",
            KrpcQuery::FindNode { .. } => "find_node",
            KrpcQuery::GetPeers { .. } => "get_peers",
            KrpcQuery::AnnouncePeer { .. } => "announce_peer",
        }
    }
}

/// Response values. KRPC responses are not tagged with their method, so one
/// shape with optional parts covers every reply.
#[derive(Debug, Clone, Default)]
pub struct KrpcResponse {
    pub id: Option<NodeId>,
    pub token: Option<Bytes>,
    pub nodes: Vec<Node>,
    pub peers: Vec<SocketAddr>,
}

#[derive(Debug, Clone)]
pub enum KrpcBody {
    Query { id: NodeId, query: KrpcQuery },
    Response(KrpcResponse),
    Error { code: i64, message: String },
}

/// One KRPC datagram: transaction id plus query, response, or error.
#[derive(Debug, Clone)]
pub struct KrpcMessage {
    pub transaction_id: TransactionId,
    pub body: KrpcBody,
}

impl KrpcMessage {
    pub fn query(transaction_id: TransactionId, id: NodeId, query: KrpcQuery) -> Self {
        Self {
            transaction_id,
            body: KrpcBody::Query { id, query },
        }
    }

    pub fn response(transaction_id: TransactionId, response: KrpcResponse) -> Self {
        Self {
            transaction_id,
            body: KrpcBody::Response(response),
        }
    }

    pub fn error(transaction_id: TransactionId, code: i64, message: &str) -> Self {
        Self {
            transaction_id,
            body: KrpcBody::Error {
                code,
                message: message.to_string(),
            },
        }
    }

    /// The sender's node id, wherever the message carries one.
    pub fn sender_id(&self) -> Option<NodeId> {
        match &self.body {
            KrpcBody::Query { id, .. } => Some(*id),
            KrpcBody::Response(response) => response.id,
            KrpcBody::Error { .. } => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dict = BTreeMap::new();
        dict.insert(
            Bytes::from_static(b"t"),
            Value::Bytes(self.transaction_id.clone()),
        );

        match &self.body {
            KrpcBody::Query { id, query } => {
                dict.insert(Bytes::from_static(b"y"), Value::string("q"));
                dict.insert(Bytes::from_static(b"q"), Value::string(query.method()));

                let mut args = BTreeMap::new();
                args.insert(
                    Bytes::from_static(b"id"),
                    Value::Bytes(Bytes::copy_from_slice(id.as_bytes())),
                );
                match query {
                    KrpcQuery::Ping => {}
                    KrpcQuery::FindNode { target } => {
                        args.insert(
                            Bytes::from_static(b"target"),
                            Value::Bytes(Bytes::copy_from_slice(target.as_bytes())),
                        );
                    }
                    KrpcQuery::GetPeers { info_hash } => {
                        args.insert(
                            Bytes::from_static(b"info_hash"),
                            Value::Bytes(Bytes::copy_from_slice(info_hash)),
                        );
                    }
                    KrpcQuery::AnnouncePeer {
                        info_hash,
                        port,
                        token,
                        implied_port,
                    } => {
                        args.insert(
                            Bytes::from_static(b"info_hash"),
                            Value::Bytes(Bytes::copy_from_slice(info_hash)),
                        );
                        args.insert(Bytes::from_static(b"port"), Value::Integer(*port as i64));
                        args.insert(Bytes::from_static(b"token"), Value::Bytes(token.clone()));
                        if *implied_port {
                            args.insert(Bytes::from_static(b"implied_port"), Value::Integer(1));
                        }
                    }
                }
                dict.insert(Bytes::from_static(b"a"), Value::Dict(args));
            }
            KrpcBody::Response(response) => {
                dict.insert(Bytes::from_static(b"y"), Value::string("r"));

                let mut values = BTreeMap::new();
                if let Some(id) = &response.id {
                    values.insert(
                        Bytes::from_static(b"id"),
                        Value::Bytes(Bytes::copy_from_slice(id.as_bytes())),
                    );
                }
                if let Some(token) = &response.token {
                    values.insert(Bytes::from_static(b"token"), Value::Bytes(token.clone()));
                }
                if !response.nodes.is_empty() {
                    let compact: Vec<u8> = response
                        .nodes
                        .iter()
                        .filter(|n| n.is_ipv4())
                        .flat_map(|n| n.to_compact())
                        .collect();
                    values.insert(Bytes::from_static(b"nodes"), Value::Bytes(Bytes::from(compact)));
                }
                if !response.peers.is_empty() {
                    let list = response
                        .peers
                        .iter()
                        .filter_map(encode_compact_peer)
                        .map(|compact| Value::Bytes(Bytes::copy_from_slice(&compact)))
                        .collect();
                    values.insert(Bytes::from_static(b"values"), Value::List(list));
                }
                dict.insert(Bytes::from_static(b"r"), Value::Dict(values));
            }
            KrpcBody::Error { code, message } => {
                dict.insert(Bytes::from_static(b"y"), Value::string("e"));
                dict.insert(
                    Bytes::from_static(b"e"),
                    Value::List(vec![Value::Integer(*code), Value::string(message)]),
                );
            }
        }

        encode(&Value::Dict(dict))
    }

    pub fn parse(data: &[u8]) -> Result<Self, DhtError> {
        let value = decode(data)?;
        let dict = value
            .as_dict()
            .ok_or_else(|| DhtError::InvalidMessage("not a dictionary".into()))?;

        let transaction_id = dict
            .get(b"t".as_slice())
            .and_then(|v| v.as_bytes())
            .cloned()
            .ok_or_else(|| DhtError::InvalidMessage("missing transaction id".into()))?;

        let body = match dict.get(b"y".as_slice()).and_then(|v| v.as_str()) {
            Some("q") => parse_query(dict)?,
            Some("r") => parse_response(dict)?,
            Some("e") => parse_error(dict)?,
            Some(other) => {
                return Err(DhtError::InvalidMessage(format!(
                    "unknown message type {:?}",
                    other
                )))
            }
            None => return Err(DhtError::InvalidMessage("missing message type".into())),
        };

        Ok(Self {
            transaction_id,
            body,
        })
    }
}

fn parse_query(dict: &BTreeMap<Bytes, Value>) -> Result<KrpcBody, DhtError> {
    let method = dict
        .get(b"q".as_slice())
        .and_then(|v| v.as_str())
        .ok_or_else(|| DhtError::InvalidMessage("missing query name".into()))?;

    let args = dict
        .get(b"a".as_slice())
        .and_then(|v| v.as_dict())
        .ok_or_else(|| DhtError::InvalidMessage("missing query args".into()))?;

    let id = args
        .get(b"id".as_slice())
        .and_then(|v| v.as_bytes())
        .and_then(|b| NodeId::from_bytes(b).ok())
        .ok_or_else(|| DhtError::InvalidMessage("missing sender id".into()))?;

    let hash20 = |key: &[u8]| -> Option<[u8; 20]> {
        let bytes = args.get(key).and_then(|v| v.as_bytes())?;
        if bytes.len() != 20 {
            return None;
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(bytes);
        Some(out)
    };

    let query = match method {
        "ping" => KrpcQuery::Ping,
        "find_node" => {
            let target = args
                .get(b"target".as_slice())
                .and_then(|v| v.as_bytes())
                .and_then(|b| NodeId::from_bytes(b).ok())
                .ok_or_else(|| DhtError::InvalidMessage("missing target".into()))?;
            KrpcQuery::FindNode { target }
        }
        "get_peers" => {
            let info_hash = hash20(b"info_hash")
                .ok_or_else(|| DhtError::InvalidMessage("missing info_hash".into()))?;
            KrpcQuery::GetPeers { info_hash }
        }
        "announce_peer" => {
            let info_hash = hash20(b"info_hash")
                .ok_or_else(|| DhtError::InvalidMessage("missing info_hash".into()))?;
            let port = args
                .get(b"port".as_slice())
                .and_then(|v| v.as_int())
                .ok_or_else(|| DhtError::InvalidMessage("missing port".into()))?
                as u16;
            let token = args
                .get(b"token".as_slice())
                .and_then(|v| v.as_bytes())
                .cloned()
                .unwrap_or_default();
            let implied_port = args
                .get(b"implied_port".as_slice())
                .and_then(|v| v.as_int())
                .map(|v| v == 1)
                .unwrap_or(false);
            KrpcQuery::AnnouncePeer {
                info_hash,
                port,
                token,
                implied_port,
            }
        }
        other => {
            return Err(DhtError::InvalidMessage(format!(
                "unknown query {:?}",
                other
            )))
        }
    };

    Ok(KrpcBody::Query { id, query })
}

fn parse_response(dict: &BTreeMap<Bytes, Value>) -> Result<KrpcBody, DhtError> {
    let values = dict
        .get(b"r".as_slice())
        .and_then(|v| v.as_dict())
        .ok_or_else(|| DhtError::InvalidMessage("missing response dict".into()))?;

    let id = values
        .get(b"id".as_slice())
        .and_then(|v| v.as_bytes())
        .and_then(|b| NodeId::from_bytes(b).ok());

    let token = values
        .get(b"token".as_slice())
        .and_then(|v| v.as_bytes())
        .cloned();

    let mut nodes = Vec::new();
    if let Some(compact) = values.get(b"nodes".as_slice()).and_then(|v| v.as_bytes()) {
        nodes.extend(compact.chunks_exact(26).filter_map(Node::from_compact));
    }
    if let Some(compact) = values.get(b"nodes6".as_slice()).and_then(|v| v.as_bytes()) {
        nodes.extend(compact.chunks_exact(38).filter_map(Node::from_compact));
    }

    let peers = values
        .get(b"values".as_slice())
        .and_then(|v| v.as_list())
        .map(|list| {
            list.iter()
                .filter_map(|v| v.as_bytes())
                .filter_map(|b| parse_compact_peer(b))
                .collect()
        })
        .unwrap_or_default();

    Ok(KrpcBody::Response(KrpcResponse {
        id,
        token,
        nodes,
        peers,
    }))
}

fn parse_error(dict: &BTreeMap<Bytes, Value>) -> Result<KrpcBody, DhtError> {
    let list = dict
        .get(b"e".as_slice())
        .and_then(|v| v.as_list())
        .ok_or_else(|| DhtError::InvalidMessage("missing error list".into()))?;

    let code = list.first().and_then(|v| v.as_int()).unwrap_or(0);
    let message = list
        .get(1)
        .and_then(|v| v.as_str())
        .unwrap_or("unknown error")
        .to_string();

    Ok(KrpcBody::Error { code, message })
}

/// Compact peer info: 4-byte IPv4 address plus 2-byte port.
pub fn parse_compact_peer(data: &[u8]) -> Option<SocketAddr> {
    if data.len() != 6 {
        return None;
    }
    let ip = Ipv4Addr::new(data[0], data[1], data[2], data[3]);
    let port = u16::from_be_bytes([data[4], data[5]]);
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

pub fn encode_compact_peer(addr: &SocketAddr) -> Option<[u8; 6]> {
    match addr {
        SocketAddr::V4(v4) => {
            let mut out = [0u8; 6];
            out[..4].copy_from_slice(&v4.ip().octets());
            out[4..].copy_from_slice(&v4.port().to_be_bytes());
            Some(out)
        }
        SocketAddr::V6(_) => None,
    }
}
