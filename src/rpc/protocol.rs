//! Request/response envelopes and the command dispatch table (spec.md §6).

use serde_json::{json, Value};

use crate::codec;
use crate::error::{Result, TorrentFsError};
use crate::manager::Manager;
use crate::read_scheduler::ReadMode;

#[derive(Debug, serde::Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Option<Value>,
    pub cmd: String,
    #[serde(flatten)]
    pub fields: Value,
}

/// Outcome of dispatching one request: a JSON header, plus optional raw
/// bytes that ride after it outside the length prefix (only `read` uses this).
pub struct Dispatched {
    pub header: Value,
    pub tail: Option<Vec<u8>>,
}

fn field_str(fields: &Value, key: &str) -> Result<String> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| TorrentFsError::BadRequest(format!("missing field: {key}")))
}

fn field_str_opt(fields: &Value, key: &str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).map(str::to_string)
}

fn field_u64(fields: &Value, key: &str) -> Result<u64> {
    fields
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| TorrentFsError::BadRequest(format!("missing field: {key}")))
}

fn field_f64_opt(fields: &Value, key: &str) -> Option<f64> {
    fields.get(key).and_then(Value::as_f64)
}

fn field_bool_opt(fields: &Value, key: &str, default: bool) -> bool {
    fields.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn field_u64_opt(fields: &Value, key: &str) -> Option<u64> {
    fields.get(key).and_then(Value::as_u64)
}

fn torrent_field(fields: &Value) -> Result<String> {
    field_str_opt(fields, "torrent").ok_or(TorrentFsError::TorrentRequired)
}

/// Dispatch one decoded request against the manager, returning the response
/// envelope (and, for `read`, the raw tail bytes).
pub async fn dispatch(manager: &Manager, req: Request, torrent_dir: Option<&std::path::Path>) -> Dispatched {
    let result = dispatch_inner(manager, &req, torrent_dir).await;
    match result {
        Ok((mut body, tail)) => {
            body["id"] = req.id.clone().unwrap_or(Value::Null);
            body["ok"] = Value::Bool(true);
            Dispatched { header: body, tail }
        }
        Err(err) => Dispatched {
            header: json!({"id": req.id.clone().unwrap_or(Value::Null), "ok": false, "error": err.to_token()}),
            tail: None,
        },
    }
}

async fn dispatch_inner(manager: &Manager, req: &Request, torrent_dir: Option<&std::path::Path>) -> Result<(Value, Option<Vec<u8>>)> {
    match req.cmd.as_str() {
        "hello" | "torrents" => Ok((json!({"torrents": manager.list()}), None)),

        "config" => Ok((json!({"config": manager.config()}), None)),

        "status" => {
            let engine = manager.resolve(&torrent_field(&req.fields)?)?;
            Ok((json!({"status": engine.status()}), None))
        }

        "status-all" => {
            let statuses: Vec<_> = manager.engines().iter().map(|e| e.status()).collect();
            let total_down: u64 = statuses.iter().map(|s| s.download_rate_bps).sum();
            let total_up: u64 = statuses.iter().map(|s| s.upload_rate_bps).sum();
            Ok((
                json!({
                    "totals": {"download_rate_bps": total_down, "upload_rate_bps": total_up},
                    "torrents": statuses,
                }),
                None,
            ))
        }

        "reannounce" => {
            let engine = manager.resolve(&torrent_field(&req.fields)?)?;
            engine.reannounce();
            Ok((json!({}), None))
        }

        "reannounce-all" => {
            for engine in manager.engines() {
                engine.reannounce();
            }
            Ok((json!({}), None))
        }

        "cache-size" => {
            let size = manager.cache_size().await?;
            Ok((json!({"logical_bytes": size.logical_bytes, "disk_bytes": size.disk_bytes}), None))
        }

        "prune-cache" => {
            let dry_run = field_bool_opt(&req.fields, "dry_run", false);
            let result = manager.prune_cache(dry_run).await?;
            Ok((json!({"removed": result.removed, "skipped": result.skipped}), None))
        }

        "downloads" => {
            let max_files = field_u64_opt(&req.fields, "max_files").unwrap_or(u64::MAX) as usize;
            let torrents: Vec<_> = manager
                .engines()
                .iter()
                .map(|e| {
                    let status = e.status();
                    json!({
                        "id": status.id,
                        "name": status.name,
                        "files": status.files.into_iter().take(max_files).collect::<Vec<_>>(),
                    })
                })
                .collect();
            Ok((json!({"torrents": torrents}), None))
        }

        "peers" => {
            let _engine = manager.resolve(&torrent_field(&req.fields)?)?;
            Ok((json!({"peers": Vec::<Value>::new()}), None))
        }

        "peers-all" => {
            let torrents: Vec<_> = manager
                .engines()
                .iter()
                .map(|e| json!({"id": e.id, "peers": Vec::<Value>::new()}))
                .collect();
            Ok((json!({"torrents": torrents}), None))
        }

        "list" => {
            let engine = manager.resolve(&torrent_field(&req.fields)?)?;
            let path = field_str(&req.fields, "path")?;
            let entries: Vec<_> = engine
                .list(&path)?
                .into_iter()
                .map(|c| {
                    json!({
                        "name": c.name,
                        "type": match c.kind {
                            crate::path_index::EntryKind::Dir => "dir",
                            crate::path_index::EntryKind::File => "file",
                        },
                        "size": c.size,
                    })
                })
                .collect();
            Ok((json!({"entries": entries}), None))
        }

        "stat" => {
            let engine = manager.resolve(&torrent_field(&req.fields)?)?;
            let path = field_str(&req.fields, "path")?;
            let entry = engine.stat(&path)?;
            Ok((
                json!({"stat": {
                    "type": match entry.kind {
                        crate::path_index::EntryKind::Dir => "dir",
                        crate::path_index::EntryKind::File => "file",
                    },
                    "size": entry.size,
                }}),
                None,
            ))
        }

        "file-info" => {
            let engine = manager.resolve(&torrent_field(&req.fields)?)?;
            let path = field_str(&req.fields, "path")?;
            Ok((json!({"info": engine.file_info(&path)?}), None))
        }

        "prefetch-info" => {
            let engine = manager.resolve(&torrent_field(&req.fields)?)?;
            let path = field_str(&req.fields, "path")?;
            let info = engine.prefetch_info(&path)?;
            Ok((json!({"info": info}), None))
        }

        "read" => {
            let engine = manager.resolve(&torrent_field(&req.fields)?)?;
            let path = field_str(&req.fields, "path")?;
            let offset = field_u64(&req.fields, "offset")?;
            let size = field_u64(&req.fields, "size")?;
            let mode = match field_str_opt(&req.fields, "mode") {
                Some(raw) => ReadMode::parse(&raw)?,
                None => ReadMode::Auto,
            };
            let timeout_s = field_f64_opt(&req.fields, "timeout_s");
            let data = engine.read(&path, offset, size, mode, timeout_s).await?;
            Ok((json!({"data_len": data.len()}), Some(data)))
        }

        "pin" => {
            let engine = manager.resolve(&torrent_field(&req.fields)?)?;
            let path = field_str(&req.fields, "path")?;
            engine.pin(&path).await?;
            Ok((json!({}), None))
        }

        "unpin" => {
            let engine = manager.resolve(&torrent_field(&req.fields)?)?;
            let path = field_str(&req.fields, "path")?;
            engine.unpin(&path).await?;
            Ok((json!({}), None))
        }

        "pinned" => {
            let engine = manager.resolve(&torrent_field(&req.fields)?)?;
            Ok((json!({"pins": engine.pinned().await}), None))
        }

        "pin-dir" => {
            let engine = manager.resolve(&torrent_field(&req.fields)?)?;
            let path = field_str(&req.fields, "path")?;
            let count = engine.pin_dir(&path).await?;
            Ok((json!({"pinned": count}), None))
        }

        "unpin-dir" => {
            let engine = manager.resolve(&torrent_field(&req.fields)?)?;
            let path = field_str(&req.fields, "path")?;
            let count = engine.unpin_dir(&path).await?;
            Ok((json!({"unpinned": count}), None))
        }

        "prefetch" => {
            let engine = manager.resolve(&torrent_field(&req.fields)?)?;
            let path = field_str(&req.fields, "path")?;
            engine.prefetch(&path).await?;
            Ok((json!({}), None))
        }

        "source-add" => {
            let source = field_str(&req.fields, "source")?;
            let dir = torrent_dir.ok_or_else(|| TorrentFsError::BadRequest("no torrent-dir configured".into()))?;
            if source.starts_with("magnet:") {
                let id = manager.add_magnet(&source, dir).await?;
                Ok((json!({"id": id}), None))
            } else if source.starts_with("archive:") || source.starts_with("http://") || source.starts_with("https://") {
                let id = manager.add_source(&source, dir).await?;
                Ok((json!({"id": id}), None))
            } else {
                Err(TorrentFsError::BadRequest(format!("unsupported source: {source}")))
            }
        }

        "add-magnet" => {
            let magnet = field_str(&req.fields, "magnet")?;
            let dir = torrent_dir.ok_or_else(|| TorrentFsError::BadRequest("no torrent-dir configured".into()))?;
            let id = manager.add_magnet(&magnet, dir).await?;
            Ok((json!({"id": id}), None))
        }

        other => Err(TorrentFsError::UnknownCommand(other.to_string())),
    }
}

pub async fn write_response<W>(writer: &mut W, dispatched: Dispatched) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    match dispatched.tail {
        Some(tail) => codec::write_header_and_tail(writer, &dispatched.header, &tail).await,
        None => codec::write_frame(writer, &dispatched.header).await,
    }
}
