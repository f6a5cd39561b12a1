// src/cli/costs.rs — `billwise costs`

use crate::audit::SqliteAuditTrail;
use crate::core::cost::TierCostEntry;
use crate::infra::paths;

/// Print cumulative spend per tier from the persisted ledger.
pub async fn run_costs() -> anyhow::Result<()> {
    let db_path = paths::audit_db_path();
    if !db_path.exists() {
        println!("No documents processed yet.");
        return Ok(());
    }
    let trail = SqliteAuditTrail::open(&db_path)?;
    let breakdown = trail.cost_by_tier()?;
    let total = trail.cumulative_cost()?;
    print!(
        "{}",
        format_costs(&breakdown, total, trail.record_count()?)
    );
    Ok(())
}

fn format_costs(breakdown: &[TierCostEntry], total: f64, records: u64) -> String {
    let mut out = String::new();
    out.push_str(&format!("Documents audited: {records}\n"));
    out.push_str(&format!("Cumulative cost:   ${total:.4}\n"));
    if !breakdown.is_empty() {
        out.push('\n');
        for entry in breakdown {
            let pct = if total > 0.0 {
                entry.cost / total * 100.0
            } else {
                0.0
            };
            out.push_str(&format!(
                "  {:<16} ${:.4} ({} calls, {} skipped, {:.1}%)\n",
                entry.tier.as_str(),
                entry.cost,
                entry.invocations,
                entry.skipped,
                pct
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Tier;

    #[test]
    fn test_format_costs() {
        let breakdown = vec![
            TierCostEntry {
                tier: Tier::StructuredText,
                cost: 0.0002,
                invocations: 2,
                skipped: 0,
            },
            TierCostEntry {
                tier: Tier::HostedVision,
                cost: 0.0198,
                invocations: 1,
                skipped: 1,
            },
        ];
        let text = format_costs(&breakdown, 0.02, 2);
        assert!(text.contains("Documents audited: 2"));
        assert!(text.contains("$0.0200"));
        assert!(text.contains("hosted_vision"));
        assert!(text.contains("99.0%"));
    }

    #[test]
    fn test_format_costs_empty() {
        let text = format_costs(&[], 0.0, 0);
        assert!(text.contains("$0.0000"));
        assert!(!text.contains("calls"));
    }
}
