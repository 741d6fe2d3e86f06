use serde_json::Value;

/// Render a backfill report as human-readable text.
pub fn render_backfill_report(report: &Value) -> String {
    let mut out = String::new();
    let mode = if report["dry_run"].as_bool().unwrap_or(false) {
        "dry run"
    } else if report["seed_kv_only"].as_bool().unwrap_or(false) {
        "kv seed"
    } else {
        "live"
    };
    out.push_str(&format!("Backfill ({})\n", mode));
    out.push_str(&format!(
        "  scanned:          {}\n",
        report["scanned"].as_u64().unwrap_or(0)
    ));
    out.push_str(&format!(
        "  duplicate groups: {}\n",
        report["duplicate_groups"].as_u64().unwrap_or(0)
    ));
    out.push_str(&format!(
        "  tombstones:       {} emitted / {} planned\n",
        report["tombstones_emitted"].as_u64().unwrap_or(0),
        report["tombstones_would_emit"].as_u64().unwrap_or(0)
    ));
    out.push_str(&format!(
        "  kv seeded:        {}\n",
        report["kv_seeded"].as_u64().unwrap_or(0)
    ));
    if report["cancelled"].as_bool().unwrap_or(false) {
        out.push_str("  cancelled before completion\n");
    }
    if let Some(errors) = report["errors"].as_array() {
        for e in errors {
            out.push_str(&format!("  error: {}\n", e.as_str().unwrap_or("?")));
        }
    }
    out
}

/// Render the /status document.
pub fn render_status(status: &Value) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Allowed pollers: {}\n",
        status["allowed_pollers"].as_u64().unwrap_or(0)
    ));
    let buffers = &status["buffers"];
    out.push_str(&format!(
        "Buffered rows:   {} metrics, {} statuses, {} services, {} sysmon\n",
        buffers["metrics"].as_u64().unwrap_or(0),
        buffers["statuses"].as_u64().unwrap_or(0),
        buffers["services"].as_u64().unwrap_or(0),
        buffers["sysmon"].as_u64().unwrap_or(0)
    ));
    let cache = &status["activation_cache"];
    out.push_str(&format!(
        "Activation cache: {} lookups ({} hits, {} negative, {} misses, {} stale)\n",
        cache["lookups"].as_u64().unwrap_or(0),
        cache["hits"].as_u64().unwrap_or(0),
        cache["negative_hits"].as_u64().unwrap_or(0),
        cache["misses"].as_u64().unwrap_or(0),
        cache["stale_evicted"].as_u64().unwrap_or(0)
    ));
    out
}

/// Render a package list as fixed-width rows.
pub fn render_packages(packages: &Value) -> String {
    let Some(rows) = packages.as_array() else {
        return format!("{}\n", packages);
    };
    if rows.is_empty() {
        return "No packages.\n".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<38} {:<9} {:<24} {:<10} {}\n",
        "PACKAGE", "TYPE", "COMPONENT", "STATUS", "POLLER"
    ));
    for pkg in rows {
        out.push_str(&format!(
            "{:<38} {:<9} {:<24} {:<10} {}\n",
            pkg["package_id"].as_str().unwrap_or("?"),
            pkg["component_type"].as_str().unwrap_or("?"),
            pkg["component_id"].as_str().unwrap_or("?"),
            pkg["status"].as_str().unwrap_or("?"),
            pkg["poller_id"].as_str().unwrap_or("-")
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn backfill_report_renders_counts() {
        let report = json!({
            "dry_run": true,
            "scanned": 10,
            "duplicate_groups": 2,
            "tombstones_emitted": 0,
            "tombstones_would_emit": 3,
            "kv_seeded": 0,
            "cancelled": false,
            "errors": [],
        });
        let text = render_backfill_report(&report);
        assert!(text.contains("dry run"));
        assert!(text.contains("duplicate groups: 2"));
        assert!(text.contains("0 emitted / 3 planned"));
    }

    #[test]
    fn package_table_has_header_and_rows() {
        let packages = json!([{
            "package_id": "5b0f7f60-0000-0000-0000-000000000000",
            "component_type": "poller",
            "component_id": "edge-poller",
            "status": "issued",
            "poller_id": "edge-poller",
        }]);
        let text = render_packages(&packages);
        assert!(text.starts_with("PACKAGE"));
        assert!(text.contains("edge-poller"));
    }

    #[test]
    fn empty_package_list() {
        assert_eq!(render_packages(&json!([])), "No packages.\n");
    }
}
