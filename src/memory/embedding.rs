//! Embedding retrieval storage + client (C11). Vector math and fusion
//! algorithms live in `hybrid.rs`; this module owns persistence and the
//! Ollama/OpenAI-compatible embedding HTTP client, grounded on the
//! teacher's `engine/memory.rs::EmbeddingClient`.

use chrono::Utc;
use log::info;
use reqwest::Client;
use rusqlite::{params, Connection};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::atoms::error::TetoraResult;
use crate::atoms::types::{EmbeddingConfig, SearchHit};

/// Little-endian 4-byte-float serialization, matching spec §4.10's
/// `serializeVec`/`deserializeVec` round-trip contract.
pub fn serialize_vec(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn deserialize_vec(bytes: &[u8]) -> Vec<f32> {
    bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

/// 32 hex chars (16 bytes) truncation of a SHA-256 digest of `content`.
pub fn content_hash_sha256(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(16).map(|b| format!("{:02x}", b)).collect()
}

/// UPSERTs an embedding by `(source, source_id)`. Returns `false` (no
/// write performed) when the content is unchanged from what's stored.
pub fn store_embedding(conn: &Connection, source: &str, source_id: &str, content: &str, vector: &[f32]) -> TetoraResult<bool> {
    let hash = content_hash_sha256(content);

    let existing_hash: Option<String> = conn
        .query_row("SELECT content_hash FROM embeddings WHERE source = ?1 AND source_id = ?2", params![source, source_id], |row| row.get(0))
        .ok();
    if existing_hash.as_deref() == Some(hash.as_str()) {
        return Ok(false);
    }

    let now = Utc::now().to_rfc3339();
    let blob = serialize_vec(vector);
    conn.execute(
        "INSERT INTO embeddings (source, source_id, content, embedding, content_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(source, source_id) DO UPDATE SET content = excluded.content, embedding = excluded.embedding, content_hash = excluded.content_hash, created_at = excluded.created_at",
        params![source, source_id, content, blob, hash, now],
    )?;
    Ok(true)
}

struct Candidate {
    source: String,
    source_id: String,
    content: String,
    embedding: Vec<f32>,
    created_at: String,
}

fn all_candidates(conn: &Connection, source: Option<&str>) -> TetoraResult<Vec<Candidate>> {
    let mut stmt = if source.is_some() {
        conn.prepare("SELECT source, source_id, content, embedding, created_at FROM embeddings WHERE source = ?1")?
    } else {
        conn.prepare("SELECT source, source_id, content, embedding, created_at FROM embeddings")?
    };
    let map_row = |row: &rusqlite::Row| -> rusqlite::Result<Candidate> {
        let blob: Vec<u8> = row.get(3)?;
        Ok(Candidate { source: row.get(0)?, source_id: row.get(1)?, content: row.get(2)?, embedding: deserialize_vec(&blob), created_at: row.get(4)? })
    };
    let rows = if let Some(s) = source { stmt.query_map(params![s], map_row)?.collect::<Result<Vec<_>, _>>() } else { stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>() };
    rows.map_err(crate::atoms::error::TetoraError::from)
}

/// Ranks every candidate by cosine similarity to `query_vec`, returning the
/// top `top_k`.
pub fn vector_search(conn: &Connection, query_vec: &[f32], source: Option<&str>, top_k: usize) -> TetoraResult<Vec<SearchHit>> {
    let candidates = all_candidates(conn, source)?;
    let mut scored: Vec<SearchHit> = candidates
        .into_iter()
        .map(|c| {
            let score = crate::memory::hybrid::cosine_similarity(query_vec, &c.embedding);
            SearchHit { source_id: c.source_id, source: c.source, content: c.content, score, created_at: c.created_at }
        })
        .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    Ok(scored)
}

/// Sparse TF-IDF-style lexical fallback: scores each candidate by the
/// fraction of query terms it contains, weighted by inverse document
/// frequency across the corpus of candidates. Simpler than a full inverted
/// index, adequate for the knowledge-directory corpus sizes spec targets.
pub fn tfidf_search(conn: &Connection, query: &str, source: Option<&str>, top_k: usize) -> TetoraResult<Vec<SearchHit>> {
    let candidates = all_candidates(conn, source)?;
    let terms: Vec<String> = query.to_lowercase().split_whitespace().map(|s| s.to_string()).collect();
    if terms.is_empty() || candidates.is_empty() {
        return Ok(vec![]);
    }

    let doc_count = candidates.len() as f64;
    let idf = |term: &str| -> f64 {
        let containing = candidates.iter().filter(|c| c.content.to_lowercase().contains(term)).count().max(1) as f64;
        (doc_count / containing).ln().max(0.0) + 1.0
    };

    let mut scored: Vec<SearchHit> = candidates
        .iter()
        .filter_map(|c| {
            let lower = c.content.to_lowercase();
            let score: f64 = terms
                .iter()
                .map(|t| {
                    let tf = lower.matches(t.as_str()).count() as f64;
                    tf * idf(t)
                })
                .sum();
            if score <= 0.0 {
                None
            } else {
                Some(SearchHit { source_id: c.source_id.clone(), source: c.source.clone(), content: c.content.clone(), score, created_at: c.created_at.clone() })
            }
        })
        .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    Ok(scored)
}

/// `hybridSearch` (§4.10): TF-IDF only when embeddings are disabled,
/// otherwise RRF-merge vector + TF-IDF, decay, then MMR rerank.
pub fn hybrid_search(conn: &Connection, cfg: &EmbeddingConfig, query: &str, query_vec: Option<&[f32]>, source: Option<&str>, top_k: usize) -> TetoraResult<Vec<SearchHit>> {
    let lexical = tfidf_search(conn, query, source, top_k.max(20))?;
    if !cfg.enabled || query_vec.is_none() {
        let mut out = lexical;
        out.truncate(top_k);
        return Ok(out);
    }

    let vector = vector_search(conn, query_vec.unwrap(), source, top_k.max(20))?;
    let merged = crate::memory::hybrid::rrf_merge(&vector, &lexical, 60.0);
    let decayed: Vec<SearchHit> = merged
        .into_iter()
        .map(|mut hit| {
            hit.score = crate::memory::hybrid::temporal_decay(hit.score, &hit.created_at, cfg.temporal_decay.half_life_days);
            hit
        })
        .collect();

    let reranked = crate::memory::hybrid::mmr_rerank(&decayed, query_vec.unwrap(), None, cfg.mmr.lambda, top_k);
    Ok(reranked)
}

/// HTTP client for an Ollama (or OpenAI-compatible) embeddings endpoint.
/// Grounded on the teacher's `engine/memory.rs::EmbeddingClient` —
/// tries Ollama's current `/api/embed`, falls back to the legacy
/// `/api/embeddings`, then an OpenAI-compatible `/embeddings` endpoint.
pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl EmbeddingClient {
    pub fn new(http_client: Client, cfg: &EmbeddingConfig, api_key: Option<String>) -> Self {
        Self { client: http_client, base_url: cfg.base_url.clone(), model: cfg.model.clone(), api_key }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        match self.embed_ollama(text).await {
            Ok(v) => return Ok(v),
            Err(e) => info!("[embedding] ollama embed failed, trying OpenAI-compatible: {}", e),
        }
        self.embed_openai(text).await
    }

    async fn embed_ollama(&self, text: &str) -> Result<Vec<f32>, String> {
        let url = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let body = json!({"model": self.model, "input": text});
        let resp = self.client.post(&url).json(&body).timeout(std::time::Duration::from_secs(60)).send().await.map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("ollama embed returned {}", resp.status()));
        }
        let v: Value = resp.json().await.map_err(|e| e.to_string())?;
        if let Some(first) = v["embeddings"].as_array().and_then(|a| a.first()).and_then(|e| e.as_array()) {
            return Ok(first.iter().filter_map(|x| x.as_f64()).map(|x| x as f32).collect());
        }
        if let Some(embedding) = v["embedding"].as_array() {
            return Ok(embedding.iter().filter_map(|x| x.as_f64()).map(|x| x as f32).collect());
        }
        Err("no embedding field in ollama response".into())
    }

    async fn embed_openai(&self, text: &str) -> Result<Vec<f32>, String> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let body = json!({"model": self.model, "input": text});
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }
        let resp = req.send().await.map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("openai-compatible embed returned {}", resp.status()));
        }
        let v: Value = resp.json().await.map_err(|e| e.to_string())?;
        v["data"][0]["embedding"]
            .as_array()
            .map(|a| a.iter().filter_map(|x| x.as_f64()).map(|x| x as f32).collect())
            .ok_or_else(|| "no data[0].embedding in response".to_string())
    }
}

/// Splits `text` into chunks of at most `max` characters with `overlap`
/// characters shared between consecutive chunks. `overlap` is capped to
/// `max - 1` so chunks always advance; chunks are always non-empty.
pub fn chunk_text(text: &str, max: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() || max == 0 {
        return vec![];
    }
    let chars: Vec<char> = text.chars().collect();
    let overlap = overlap.min(max.saturating_sub(1));
    let stride = max - overlap;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + max).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
        if end == chars.len() {
            break;
        }
        start += stride;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_in_memory;

    #[test]
    fn serialize_deserialize_roundtrips_within_tolerance() {
        let v = vec![0.1f32, -0.5, 1.0, 0.0];
        let bytes = serialize_vec(&v);
        let back = deserialize_vec(&bytes);
        for (a, b) in v.iter().zip(back.iter()) {
            assert!((a - b).abs() <= 1e-4);
        }
    }

    #[test]
    fn content_hash_is_32_hex_chars() {
        let h = content_hash_sha256("hello world");
        assert_eq!(h.len(), 32);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn store_embedding_dedups_unchanged_content() {
        let conn = open_in_memory().unwrap();
        assert!(store_embedding(&conn, "doc", "1", "hello", &[0.1, 0.2]).unwrap());
        assert!(!store_embedding(&conn, "doc", "1", "hello", &[0.1, 0.2]).unwrap());
        assert!(store_embedding(&conn, "doc", "1", "hello world", &[0.3, 0.4]).unwrap());
    }

    #[test]
    fn vector_search_ranks_by_cosine() {
        let conn = open_in_memory().unwrap();
        store_embedding(&conn, "doc", "a", "alpha", &[1.0, 0.0]).unwrap();
        store_embedding(&conn, "doc", "b", "beta", &[0.0, 1.0]).unwrap();
        let hits = vector_search(&conn, &[1.0, 0.0], None, 2).unwrap();
        assert_eq!(hits[0].source_id, "a");
    }

    #[test]
    fn chunk_text_respects_overlap_cap_and_nonempty() {
        let text = "a".repeat(10);
        let chunks = chunk_text(&text, 4, 10);
        assert!(chunks.iter().all(|c| !c.is_empty()));
        assert!(chunks.len() > 1);
    }
}
