use replica_core::types::OpAction;
use replica_engine::{RunMode, RunReport};
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let render = |cells: Vec<String>| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{c:w$}")
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    println!(
        "{}",
        render(headers.iter().map(|h| h.to_string()).collect())
    );
    println!(
        "{}",
        widths
            .iter()
            .map(|&w| "-".repeat(w))
            .collect::<Vec<_>>()
            .join("  ")
    );
    for row in rows {
        println!("{}", render(row));
    }
}

/// First 12 hex digits of a `sha256:` hash.
pub fn short_hash(hash: &str) -> &str {
    let hex = hash.strip_prefix("sha256:").unwrap_or(hash);
    &hex[..hex.len().min(12)]
}

// ---------------------------------------------------------------------------
// Run reports
// ---------------------------------------------------------------------------

pub fn print_run_report(report: &RunReport, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(report);
    }

    println!(
        "{} {} ({}) against {} tenant(s), state from {}",
        report.mode,
        report.bundle.split('#').next().unwrap_or(&report.bundle),
        short_hash(&report.digest),
        report.tenants.len(),
        report.source,
    );
    println!();

    match report.mode {
        RunMode::Plan => print_plans(report),
        RunMode::Apply => print_outcomes(report),
    }

    let t = report.totals();
    println!();
    match report.mode {
        RunMode::Plan => println!(
            "{} tenant(s), {} orphan(s), {} planning error(s)",
            t.tenants, t.orphans, t.errored
        ),
        RunMode::Apply => println!(
            "applied {}, skipped {}, failed {}, orphans {}, tenant errors {}",
            t.applied, t.skipped, t.failed, t.orphans, t.errored
        ),
    }
    if report.cancelled {
        println!("run was cancelled; remaining operations were not dispatched");
    }
    Ok(())
}

fn print_plans(report: &RunReport) {
    for tenant in &report.tenants {
        if let Some(err) = &tenant.error {
            println!("{}: error: {err}", tenant.tenant_id);
            continue;
        }
        let p = tenant.planned;
        println!(
            "{}: create {}, update {}, skip {}, orphan {}",
            tenant.tenant_id, p.create, p.update, p.skip, p.orphan
        );
        let Some(plan) = &tenant.plan else { continue };
        for op in plan.operations.iter().filter(|o| o.action != OpAction::Skip) {
            println!("  {:<7} {}  ({})", op.action.as_str(), op.key(), op.reason);
        }
        for orphan in &plan.orphans {
            println!("  {:<7} {}  (tracked, not in bundle)", "orphan", orphan.key());
        }
    }
}

fn print_outcomes(report: &RunReport) {
    let rows = report
        .tenants
        .iter()
        .map(|t| {
            let status = if let Some(e) = &t.error {
                format!("error: {e}")
            } else if t.cancelled {
                format!("cancelled ({} not started)", t.not_started)
            } else if t.failed > 0 {
                "failed".to_string()
            } else {
                "ok".to_string()
            };
            vec![
                t.tenant_id.clone(),
                t.applied.to_string(),
                t.skipped.to_string(),
                t.failed.to_string(),
                t.orphans.to_string(),
                status,
            ]
        })
        .collect();
    print_table(
        &["TENANT", "APPLIED", "SKIPPED", "FAILED", "ORPHANS", "STATUS"],
        rows,
    );

    for t in report.tenants.iter().filter(|t| !t.failures.is_empty()) {
        println!();
        println!("{} failures:", t.tenant_id);
        for f in &t.failures {
            println!(
                "  {} {}/{} after {} attempt(s): {}",
                f.action, f.kind, f.logical_key, f.attempts, f.error
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_hash_strips_prefix() {
        assert_eq!(short_hash("sha256:0123456789abcdef"), "0123456789ab");
        assert_eq!(short_hash("abc"), "abc");
    }
}
