// ── fetch tool: outbound HTTP requests ────────────────────────────────────
// Grounded on `engine/tool_executor.rs::execute_fetch`.

use std::time::Duration;

const MAX_BODY: usize = 50_000;

pub async fn run(args: &serde_json::Value) -> Result<String, String> {
    let url = args["url"].as_str().ok_or("fetch: missing 'url' argument")?;
    let method = args["method"].as_str().unwrap_or("GET");

    let client = reqwest::Client::builder().timeout(Duration::from_secs(30)).build().map_err(|e| format!("failed to create HTTP client: {}", e))?;

    let mut request = match method.to_uppercase().as_str() {
        "POST" => client.post(url),
        "PUT" => client.put(url),
        "PATCH" => client.patch(url),
        "DELETE" => client.delete(url),
        "HEAD" => client.head(url),
        _ => client.get(url),
    };

    if let Some(headers) = args["headers"].as_object() {
        for (key, value) in headers {
            if let Some(v) = value.as_str() {
                request = request.header(key.as_str(), v);
            }
        }
    }

    if let Some(body) = args["body"].as_str() {
        request = request.body(body.to_string());
    }

    let response = request.send().await.map_err(|e| format!("HTTP request failed: {}", e))?;
    let status = response.status().as_u16();
    let body = response.text().await.map_err(|e| format!("failed to read response body: {}", e))?;

    let truncated = if body.len() > MAX_BODY {
        format!("{}...\n[truncated, {} total bytes]", &body[..MAX_BODY], body.len())
    } else {
        body
    };

    Ok(format!("HTTP {} {}\n\n{}", status, if status < 400 { "OK" } else { "Error" }, truncated))
}
