// =============================================================================
// EMBERLINK v0.4 - Admin RPC (newline-delimited JSON)
// =============================================================================
//
// The admin surface over the routing engine: inject edges, inspect the
// graph, flip debug toggles. Channel packets never travel this path.
//
// Framing is one JSON object per line, both directions; a connection
// stays open for any number of commands. Requests carry {method, params,
// id}, replies echo the id with either a result or an error object.
//
// =============================================================================

use log::{debug, warn};
use secp256k1::PublicKey;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::routing::Router;

// =============================================================================
// Failure Codes
// =============================================================================

/// Request line was not valid JSON.
pub const RPC_PARSE: i32 = 1;
/// Parameters missing or of the wrong shape.
pub const RPC_BAD_PARAMS: i32 = 2;
/// No such method.
pub const RPC_UNKNOWN_METHOD: i32 = 3;
/// The node itself is in trouble.
pub const RPC_INTERNAL: i32 = 4;

/// A failed command: code plus the human reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    fn bad_params(message: impl Into<String>) -> Self {
        RpcError {
            code: RPC_BAD_PARAMS,
            message: message.into(),
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// One decoded command line.
#[derive(Deserialize)]
struct Request {
    method: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    id: Value,
}

/// Serves the admin API over TCP, one JSON object per line.
pub struct RpcServer {
    router: Arc<Mutex<Router>>,
}

impl RpcServer {
    pub fn new(router: Arc<Mutex<Router>>) -> Self {
        RpcServer { router }
    }

    pub async fn serve(self, port: u16) {
        let listener = match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(l) => l,
            Err(e) => {
                warn!("RPC bind failed on port {}: {}", port, e);
                return;
            }
        };
        debug!("Admin RPC listening on port {}", port);

        let server = Arc::new(self);
        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    debug!("RPC client connected from {}", addr);
                    let server = Arc::clone(&server);
                    tokio::spawn(async move { server.client_loop(socket).await });
                }
                Err(e) => warn!("RPC accept failed: {}", e),
            }
        }
    }

    /// Answer commands on one connection until it closes.
    async fn client_loop(&self, socket: TcpStream) {
        let (reader, mut writer) = socket.into_split();
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            let mut reply = self.dispatch(&line);
            reply.push('\n');
            if writer.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }
    }

    /// Decode one request line and run it against the router.
    fn dispatch(&self, line: &str) -> String {
        let request: Request = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                let err = RpcError {
                    code: RPC_PARSE,
                    message: format!("Parse error: {}", e),
                };
                return reply_failure(Value::Null, &err);
            }
        };

        let outcome = match self.router.lock() {
            Ok(mut router) => execute_method(&mut router, &request.method, request.params),
            Err(_) => Err(RpcError {
                code: RPC_INTERNAL,
                message: "Router lock poisoned".to_string(),
            }),
        };

        match outcome {
            Ok(result) => reply_success(request.id, result),
            Err(e) => reply_failure(request.id, &e),
        }
    }
}

fn reply_success(id: Value, result: Value) -> String {
    json!({ "id": id, "result": result }).to_string()
}

fn reply_failure(id: Value, e: &RpcError) -> String {
    json!({ "id": id, "error": { "code": e.code, "message": e.message } }).to_string()
}

// =============================================================================
// Method Dispatch
// =============================================================================

fn parse_pubkey(params: &Value, field: &str) -> Result<PublicKey, RpcError> {
    let hex_str = params
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::bad_params(format!("Need {}", field)))?;
    let bytes = hex::decode(hex_str)
        .map_err(|_| RpcError::bad_params(format!("{} {} not valid", field, hex_str)))?;
    PublicKey::from_slice(&bytes)
        .map_err(|_| RpcError::bad_params(format!("{} {} not valid", field, hex_str)))
}

fn parse_u32(params: &Value, field: &str) -> Result<u32, RpcError> {
    params
        .get(field)
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| RpcError::bad_params("base, var, delay and minblocks must be numbers"))
}

/// Execute one admin method against the routing engine.
pub fn execute_method(
    router: &mut Router,
    method: &str,
    params: Value,
) -> Result<Value, RpcError> {
    match method {
        // === Routing graph ===
        "dev-add-route" => {
            let src = parse_pubkey(&params, "src")?;
            let dst = parse_pubkey(&params, "dst")?;
            let base = parse_u32(&params, "base")?;
            let var = parse_u32(&params, "var")?;
            let delay = parse_u32(&params, "delay")?;
            let minblocks = parse_u32(&params, "minblocks")?;

            router.add_connection(&src, &dst, base, var as i32, delay, minblocks);
            Ok(json!({}))
        }

        "dev-remove-route" => {
            let src = parse_pubkey(&params, "src")?;
            let dst = parse_pubkey(&params, "dst")?;
            router.remove_connection(&src, &dst);
            Ok(json!({}))
        }

        "getchannels" => {
            let channels: Vec<Value> = router
                .list_channels()
                .iter()
                .map(|c| {
                    json!({
                        "from": hex::encode(c.from.serialize()),
                        "to": hex::encode(c.to.serialize()),
                        "base_fee": c.base_fee,
                        "proportional_fee": c.proportional_fee,
                    })
                })
                .collect();
            Ok(json!({ "channels": channels }))
        }

        "getnodes" => {
            let nodes: Vec<Value> = router
                .nodes()
                .iter()
                .map(|n| {
                    json!({
                        "nodeid": hex::encode(n.id.serialize()),
                        "port": n.port,
                        "hostname": if n.port == 0 { Value::Null } else { json!(n.hostname) },
                    })
                })
                .collect();
            Ok(json!({ "nodes": nodes }))
        }

        // === Debug toggles ===
        "dev-routefail" => {
            let enable = params
                .get("enable")
                .and_then(|v| v.as_bool())
                .ok_or_else(|| RpcError::bad_params("enable must be true or false"))?;
            debug!(
                "dev-routefail: routefail {}",
                if enable { "enabled" } else { "disabled" }
            );
            router.route_fail_disabled = !enable;
            Ok(json!({}))
        }

        // === Utilities ===
        "getinfo" => Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "nodeid": hex::encode(router.local_id().serialize()),
            "nodes": router.nodes().len(),
            "channels": router.connection_count(),
        })),

        "help" => Ok(json!({
            "methods": [
                "dev-add-route {src, dst, base, var, delay, minblocks} - Add or update a route",
                "dev-remove-route {src, dst} - Remove a route",
                "getchannels - List all known channels",
                "getnodes - List all known nodes",
                "dev-routefail {enable} - FAIL htlcs that we can't route if enabled",
                "getinfo - Returns node info",
                "help - Shows this help",
            ]
        })),

        _ => Err(RpcError {
            code: RPC_UNKNOWN_METHOD,
            message: format!("Unknown method: {}", method),
        }),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::{Secp256k1, SecretKey};

    fn key(byte: u8) -> PublicKey {
        let secp = Secp256k1::new();
        PublicKey::from_secret_key(&secp, &SecretKey::from_slice(&[byte; 32]).unwrap())
    }

    fn hex_key(byte: u8) -> String {
        hex::encode(key(byte).serialize())
    }

    fn test_server() -> RpcServer {
        RpcServer::new(Arc::new(Mutex::new(Router::new(key(1)))))
    }

    #[test]
    fn test_dev_add_route_and_getchannels() {
        let mut router = Router::new(key(1));
        let params = json!({
            "src": hex_key(1),
            "dst": hex_key(2),
            "base": 10,
            "var": 1000,
            "delay": 6,
            "minblocks": 0,
        });
        assert_eq!(
            execute_method(&mut router, "dev-add-route", params).unwrap(),
            json!({})
        );

        let out = execute_method(&mut router, "getchannels", json!({})).unwrap();
        let channels = out["channels"].as_array().unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0]["from"], json!(hex_key(1)));
        assert_eq!(channels[0]["to"], json!(hex_key(2)));
        assert_eq!(channels[0]["base_fee"], json!(10));
        assert_eq!(channels[0]["proportional_fee"], json!(1000));
    }

    #[test]
    fn test_dev_add_route_rejects_bad_pubkey() {
        let mut router = Router::new(key(1));
        let params = json!({
            "src": "zz-not-hex",
            "dst": hex_key(2),
            "base": 10, "var": 1000, "delay": 6, "minblocks": 0,
        });
        let err = execute_method(&mut router, "dev-add-route", params).unwrap_err();
        assert_eq!(err.code, RPC_BAD_PARAMS);
        assert!(err.message.contains("not valid"));
    }

    #[test]
    fn test_getnodes_null_hostname() {
        let mut router = Router::new(key(1));
        router.add_node(&key(2), Some("ember.example"), 9735);

        let out = execute_method(&mut router, "getnodes", json!({})).unwrap();
        let nodes = out["nodes"].as_array().unwrap();
        assert_eq!(nodes.len(), 2);

        // Our own node has no address yet: hostname reported as null.
        let local = nodes
            .iter()
            .find(|n| n["nodeid"] == json!(hex_key(1)))
            .unwrap();
        assert_eq!(local["hostname"], Value::Null);

        let other = nodes
            .iter()
            .find(|n| n["nodeid"] == json!(hex_key(2)))
            .unwrap();
        assert_eq!(other["hostname"], json!("ember.example"));
        assert_eq!(other["port"], json!(9735));
    }

    #[test]
    fn test_dev_routefail_toggles() {
        let mut router = Router::new(key(1));
        assert!(!router.route_fail_disabled);

        execute_method(&mut router, "dev-routefail", json!({"enable": false})).unwrap();
        assert!(router.route_fail_disabled);
        execute_method(&mut router, "dev-routefail", json!({"enable": true})).unwrap();
        assert!(!router.route_fail_disabled);

        let err = execute_method(&mut router, "dev-routefail", json!({})).unwrap_err();
        assert!(err.message.contains("true or false"));
    }

    #[test]
    fn test_unknown_method() {
        let mut router = Router::new(key(1));
        let err = execute_method(&mut router, "mineblock", json!({})).unwrap_err();
        assert_eq!(err.code, RPC_UNKNOWN_METHOD);
    }

    #[test]
    fn test_remove_route_roundtrip() {
        let mut router = Router::new(key(1));
        let add = json!({
            "src": hex_key(1), "dst": hex_key(2),
            "base": 10, "var": 1000, "delay": 6, "minblocks": 0,
        });
        execute_method(&mut router, "dev-add-route", add).unwrap();
        execute_method(
            &mut router,
            "dev-remove-route",
            json!({"src": hex_key(1), "dst": hex_key(2)}),
        )
        .unwrap();

        let out = execute_method(&mut router, "getchannels", json!({})).unwrap();
        assert!(out["channels"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_dispatch_line_roundtrip() {
        let server = test_server();
        let reply = server.dispatch(r#"{"method": "getinfo", "id": 7}"#);
        let v: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(v["id"], json!(7));
        assert_eq!(v["result"]["nodeid"], json!(hex_key(1)));
        assert!(v.get("error").is_none());
    }

    #[test]
    fn test_dispatch_rejects_garbage() {
        let server = test_server();
        let reply = server.dispatch("{this is not json");
        let v: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(v["error"]["code"], json!(RPC_PARSE));
        assert_eq!(v["id"], Value::Null);
    }

    #[test]
    fn test_dispatch_reports_method_errors() {
        let server = test_server();
        let reply = server.dispatch(r#"{"method": "dev-routefail", "params": {}, "id": 1}"#);
        let v: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(v["error"]["code"], json!(RPC_BAD_PARAMS));
        assert_eq!(v["id"], json!(1));
    }
}
