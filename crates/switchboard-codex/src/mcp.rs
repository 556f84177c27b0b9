//! MCP server management scripts.
//!
//! Each browser command is a short sequence of backend requests:
//! status/config reads, config writes, and a reload. Failures surface as
//! browser `error` events; a reload rejected for an invalid transport
//! falls back to removing the just-written entries before refreshing.

use serde_json::{Value, json};
use tracing::warn;

use switchboard_protocol::browser::BrowserEvent;
use switchboard_protocol::codex::{
    CONFIG_BATCH_WRITE, CONFIG_READ, CONFIG_VALUE_WRITE, MCP_RELOAD, MCP_STATUS_LIST,
};
use switchboard_rpc::{RpcError, RpcPeer};

/// `mcp_get_status`: read server status and config, merged into one
/// `mcp_status` event.
pub async fn get_status(peer: &RpcPeer) -> BrowserEvent {
    match refresh(peer).await {
        Ok(servers) => BrowserEvent::McpStatus { servers },
        Err(e) => error_event("mcp status read failed", &e),
    }
}

/// `mcp_toggle`: flip one server's `enabled` flag, reload, refresh.
pub async fn toggle(peer: &RpcPeer, server: &str, enabled: bool) -> BrowserEvent {
    let write = peer
        .request(
            CONFIG_VALUE_WRITE,
            json!({
                "keyPath": format!("mcpServers.{server}.enabled"),
                "value": enabled,
            }),
        )
        .await;
    if let Err(e) = write {
        return error_event("mcp config write failed", &e);
    }
    if let Err(e) = reload(peer).await {
        if is_invalid_transport(&e) {
            remove_entry(peer, server).await;
        } else {
            return error_event("mcp reload failed", &e);
        }
    }
    match refresh(peer).await {
        Ok(servers) => BrowserEvent::McpStatus { servers },
        Err(e) => error_event("mcp status read failed", &e),
    }
}

/// `mcp_reconnect`: reload one server, refresh.
pub async fn reconnect(peer: &RpcPeer, server: &str) -> BrowserEvent {
    if let Err(e) = peer.request(MCP_RELOAD, json!({"server": server})).await {
        return error_event("mcp reload failed", &e);
    }
    match refresh(peer).await {
        Ok(servers) => BrowserEvent::McpStatus { servers },
        Err(e) => error_event("mcp status read failed", &e),
    }
}

/// `mcp_set_servers`: replace the server map, reload, refresh. An
/// invalid-transport reload removes the entries just written.
pub async fn set_servers(peer: &RpcPeer, servers: &Value) -> BrowserEvent {
    let write = peer
        .request(CONFIG_BATCH_WRITE, json!({"values": {"mcpServers": servers}}))
        .await;
    if let Err(e) = write {
        return error_event("mcp config write failed", &e);
    }
    if let Err(e) = reload(peer).await {
        if is_invalid_transport(&e) {
            if let Some(map) = servers.as_object() {
                for name in map.keys() {
                    remove_entry(peer, name).await;
                }
            }
        } else {
            return error_event("mcp reload failed", &e);
        }
    }
    match refresh(peer).await {
        Ok(servers) => BrowserEvent::McpStatus { servers },
        Err(e) => error_event("mcp status read failed", &e),
    }
}

async fn reload(peer: &RpcPeer) -> Result<Value, RpcError> {
    peer.request(MCP_RELOAD, json!({})).await
}

/// Status + config merged the way the browser renders them.
async fn refresh(peer: &RpcPeer) -> Result<Value, RpcError> {
    let status = peer.request(MCP_STATUS_LIST, json!({})).await?;
    let config = peer.request(CONFIG_READ, json!({})).await?;
    let servers = status.get("servers").cloned().unwrap_or(status);
    Ok(json!({
        "servers": servers,
        "config": config.get("mcpServers").cloned().unwrap_or(Value::Null),
    }))
}

/// Remove a server entry outright: `value: null` with a replace merge.
async fn remove_entry(peer: &RpcPeer, server: &str) {
    let result = peer
        .request(
            CONFIG_VALUE_WRITE,
            json!({
                "keyPath": format!("mcpServers.{server}"),
                "value": null,
                "mergeStrategy": "replace",
            }),
        )
        .await;
    if let Err(e) = result {
        warn!(server, error = %e, "failed to remove mcp server entry");
    }
}

fn is_invalid_transport(error: &RpcError) -> bool {
    matches!(error, RpcError::Remote { message, .. } if message.contains("invalid transport"))
}

fn error_event(context: &str, error: &RpcError) -> BrowserEvent {
    warn!(error = %error, "{context}");
    BrowserEvent::Error {
        message: format!("{context}: {error}"),
    }
}
