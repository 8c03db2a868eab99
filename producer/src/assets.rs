//! Best-effort out-of-band replication of staged asset files.
//!
//! Renderables stage textures/meshes into the session asset directory while
//! serializing; every network frame, files a connection has not yet received
//! are shipped as `file` messages. The ledger is strictly additive and keyed
//! by absolute source path: a viewer that reconnects gets a fresh connection
//! id, an empty sent-set, and therefore everything again.

use std::{fs, path::Path};

use limn_shared::ConnectionId;
use log::{info, warn};
use serde_json::json;

use crate::{context::Context, paths::ASSET_DIR_NAME};

/// Send every not-yet-transferred asset file to `conn_id`.
pub(crate) fn replicate_assets(ctx: &mut Context, conn_id: ConnectionId, asset_dir: &Path) {
    if !asset_dir.is_dir() {
        return;
    }
    let entries = match fs::read_dir(asset_dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("Could not scan asset dir {}: {err}", asset_dir.display());
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if ctx.transferred_mut(conn_id).contains(&path) {
            continue;
        }

        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                // A single unreadable asset should not take the frame down.
                warn!("Skipping unreadable asset {}: {err}", path.display());
                continue;
            }
        };

        info!(
            "Transferring asset {} ({} bytes) to connection {conn_id}",
            path.display(),
            bytes.len()
        );
        let header = json!({
            "type": "file",
            "name": format!("{ASSET_DIR_NAME}/{file_name}"),
        });
        ctx.net.send_to(conn_id, header, vec![bytes]);
        ctx.transferred_mut(conn_id).insert(path);
    }
}

/// Mirror the staged asset directory into a recording root, replacing any
/// previous copy.
pub(crate) fn mirror_assets(asset_dir: &Path, record_root: &Path) {
    if !asset_dir.is_dir() {
        return;
    }
    let dest = record_root.join(ASSET_DIR_NAME);
    if dest.exists() {
        if let Err(err) = fs::remove_dir_all(&dest) {
            warn!("Could not clear mirrored assets {}: {err}", dest.display());
            return;
        }
    }
    if let Err(err) = fs::create_dir_all(&dest) {
        warn!("Could not create mirrored asset dir {}: {err}", dest.display());
        return;
    }

    let entries = match fs::read_dir(asset_dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("Could not scan asset dir {}: {err}", asset_dir.display());
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if let Err(err) = fs::copy(&path, dest.join(file_name)) {
            warn!("Could not mirror asset {}: {err}", path.display());
        }
    }
}
