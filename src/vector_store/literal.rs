//! pgvector's text representation: `[v1,v2,...,vn]`.

use super::VectorStoreError;

/// Serialize a vector as a pgvector literal (no spaces).
pub fn encode(vector: &[f64]) -> String {
    let mut out = String::with_capacity(vector.len() * 10 + 2);
    out.push('[');
    for (i, v) in vector.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&v.to_string());
    }
    out.push(']');
    out
}

/// Parse a pgvector literal as returned by `embedding::text`.
pub fn decode(text: &str) -> Result<Vec<f64>, VectorStoreError> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| VectorStoreError::VectorLiteral(format!("not bracketed: {text:?}")))?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|component| {
            component.trim().parse::<f64>().map_err(|e| {
                VectorStoreError::VectorLiteral(format!("bad component {component:?}: {e}"))
            })
        })
        .collect()
}
