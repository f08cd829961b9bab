// ── /api/embedding/search|reindex|status ─────────────────────────────────
// Hybrid search admin (C11): search runs the RRF+MMR pipeline from
// `memory/embedding.rs`/`memory/hybrid.rs`; reindex recomputes embeddings
// for every unified-memory entry's current value; status reports whether
// embeddings are enabled and how many vectors are stored.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::http::error::ApiResult;
use crate::memory::{embedding, unified, EmbeddingClient};
use crate::server::Server;

#[derive(Deserialize)]
pub struct SearchBody {
    pub query: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    10
}

pub async fn post_embedding_search(State(server): State<Arc<Server>>, Json(body): Json<SearchBody>) -> ApiResult<Json<Value>> {
    let cfg = server.current_config();
    let query_vec = if cfg.embedding.enabled {
        let client = EmbeddingClient::new(server.http_client.clone(), &cfg.embedding, None);
        client.embed(&body.query).await.ok()
    } else {
        None
    };

    let conn = server.db.lock();
    let hits = embedding::hybrid_search(&conn, &cfg.embedding, &body.query, query_vec.as_deref(), body.source.as_deref(), body.top_k)?;
    Ok(Json(json!({ "hits": hits })))
}

/// Recomputes and stores an embedding for every active unified-memory
/// entry, skipping ones whose content hash hasn't changed (`store_embedding`
/// already dedups on that, so this is safe to call repeatedly).
pub async fn post_embedding_reindex(State(server): State<Arc<Server>>) -> ApiResult<Json<Value>> {
    let cfg = server.current_config();
    if !cfg.embedding.enabled {
        return Ok(Json(json!({ "reindexed": 0, "skipped": "embedding disabled" })));
    }
    let client = EmbeddingClient::new(server.http_client.clone(), &cfg.embedding, None);

    let entries = { let conn = server.db.lock(); unified::list(&conn, None, None, 10_000)? };

    let mut reindexed = 0usize;
    for entry in &entries {
        let Ok(vector) = client.embed(&entry.value).await else { continue };
        let conn = server.db.lock();
        if embedding::store_embedding(&conn, "memory", &entry.id, &entry.value, &vector)? {
            reindexed += 1;
        }
    }
    Ok(Json(json!({ "reindexed": reindexed, "total_entries": entries.len() })))
}

pub async fn get_embedding_status(State(server): State<Arc<Server>>) -> ApiResult<Json<Value>> {
    let cfg = server.current_config();
    let conn = server.db.lock();
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM embeddings", [], |r| r.get(0))?;
    Ok(Json(json!({
        "enabled": cfg.embedding.enabled,
        "model": cfg.embedding.model,
        "baseUrl": cfg.embedding.base_url,
        "vectorCount": count,
    })))
}
