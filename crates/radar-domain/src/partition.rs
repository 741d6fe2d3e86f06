//! Partition and identifier utilities shared by the resolver, the
//! reconciler, and the onboarding service.

use crate::error::DomainError;

/// The tenancy prefix of a compound device id: the substring before the
/// first `:`, defaulting to `"default"` when the id has no partition.
pub fn partition_of(device_id: &str) -> &str {
    match device_id.split_once(':') {
        Some((partition, _)) if !partition.is_empty() => partition,
        _ => "default",
    }
}

/// Compound device id for a sweep-origin device: `partition:ip`.
pub fn device_id_for(partition: &str, ip: &str) -> String {
    let partition = if partition.is_empty() { "default" } else { partition };
    format!("{}:{}", partition, ip)
}

/// Sanitize a human label into a component slug: lowercase `[a-z0-9]+`
/// tokens joined by `-`, optional prefix, capped at 63 characters with no
/// trailing dash. Errors when nothing survives.
pub fn sanitize_slug(label: &str, prefix: Option<&str>) -> Result<String, DomainError> {
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    for c in label.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            current.push(c);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    if tokens.is_empty() {
        return Err(DomainError::InvalidLabel(label.to_string()));
    }

    let mut slug = match prefix {
        Some(p) if !p.is_empty() => format!("{}-{}", p, tokens.join("-")),
        _ => tokens.join("-"),
    };
    slug.truncate(63);
    let trimmed = slug.trim_end_matches('-');
    Ok(trimmed.to_string())
}

/// Quote a string as a SQL literal for the streaming query engine:
/// single-quoted with embedded quotes doubled. Callers still prefer bound
/// parameters; this exists for the metadata-predicate paths that cannot
/// use them.
pub fn quote_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}
