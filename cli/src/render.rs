// Report text on stdout

use std::io::{self, Write};
use std::path::Path;

use bcdfix_core::bcd::{Finding, Found, Scan, Staged, UnresolvedReason, Verdict};
use bcdfix_core::{Inventory, RunOutcome, Tally};

pub fn findings<W: Write>(out: &mut W, hive: &Path, scan: &Scan, inventory: &Inventory) -> io::Result<()> {
    writeln!(out, "{}", hive.display())?;

    let mut current: Option<&str> = None;
    for finding in scan.findings() {
        let entry = &finding.discovery.entry;
        if current != Some(entry.id.as_str()) {
            writeln!(out, "Entry {}: {}", entry.id, entry.title())?;
            current = Some(entry.id.as_str());
        }
        writeln!(out, "  {:<5} {}", finding.discovery.element.label(), describe(finding, inventory))?;
    }

    if scan.findings().is_empty() {
        writeln!(out, "  no boot entries with device elements")?;
    }
    Ok(())
}

fn describe(finding: &Finding, inventory: &Inventory) -> String {
    let locator = match &finding.discovery.found {
        Found::Locator(locator) => locator,
        Found::Legacy {
            signature,
            partition_offset,
        } => {
            return format!("MBR disk {signature:#010x} offset {partition_offset}, left as is");
        }
        Found::NoIdentifier => return "no partition identifier".to_string(),
        Found::Malformed(e) => return format!("unreadable: {e}"),
    };

    let ids = format!("{},{}", locator.partition_uuid, locator.disk_uuid);
    match finding.verdict {
        Some(Verdict::Consistent) => match inventory.by_partition(&locator.partition_uuid) {
            Some(part) => format!("{ids} ok ({})", part.device_path.display()),
            None => format!("{ids} ok"),
        },
        Some(Verdict::WrongDisk(disk)) => format!("{ids} wrong disk, should be {disk}"),
        Some(Verdict::Unresolvable) => format!("{ids} needs a partition"),
        None => ids,
    }
}

pub fn outcome<W: Write>(out: &mut W, outcome: &RunOutcome) -> io::Result<()> {
    match outcome {
        RunOutcome::Committed(report) => {
            writeln!(out, "Backup written to {}", report.backup.display())?;
            for value in &report.applied {
                writeln!(out, "  wrote {value}")?;
            }
        }
        RunOutcome::DryRunReport { would_write } => {
            writeln!(out, "Dry run, nothing written. Would write:")?;
            for write in would_write {
                writeln!(out, "  {}\\{}", write.key_path, write.value_name)?;
            }
        }
        RunOutcome::AbortedNoChanges => writeln!(out, "Nothing to change")?,
    }
    Ok(())
}

pub fn tally<W: Write>(out: &mut W, tally: &Tally, staged: &Staged) -> io::Result<()> {
    for unresolved in &staged.unresolved {
        let why = match &unresolved.reason {
            UnresolvedReason::Skipped => "skipped".to_string(),
            UnresolvedReason::NoChoice => "no partition chosen".to_string(),
            UnresolvedReason::RewriteFailed(e) => e.to_string(),
        };
        writeln!(out, "  left {} {}: {why}", unresolved.entry_id, unresolved.element)?;
    }

    writeln!(
        out,
        "{} ok, {} disk fixed, {} reselected, {} unresolved, {} MBR, {} unreadable",
        tally.consistent, tally.corrected, tally.reselected, tally.unresolved, tally.legacy, tally.malformed
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcdfix_core::hive::Hive;
    use bcdfix_core::value::{encode_uuid, RegValue};
    use bcdfix_core::{ForceInvalid, Partition};
    use uguid::{guid, Guid};

    const P1: Guid = guid!("c3a1e2f4-9b8d-4c7e-a6f5-d4e3c2b1a098");
    const D1: Guid = guid!("2b3c4d5e-6f70-4182-93a4-b5c6d7e8f901");
    const D2: Guid = guid!("f1e2d3c4-b5a6-4978-8a9b-acbdcedfe0f1");

    #[test]
    fn test_findings_show_verdicts() {
        let mut blob = vec![0u8; 0x58];
        blob[0x20..0x30].copy_from_slice(&encode_uuid(P1));
        blob[0x40..0x50].copy_from_slice(&encode_uuid(D1));

        let mut hive = Hive::new();
        hive.set_value("Objects\\{a}\\Elements\\11000001", "Element", RegValue::Binary(blob));
        hive.set_value(
            "Objects\\{a}\\Elements\\12000004",
            "Element",
            RegValue::Text("Windows Boot Manager".into()),
        );
        let inventory = Inventory::from_partitions(vec![Partition::new(D2, P1, "/dev/sda1")]);
        let scan = Scan::new(&hive, &inventory, &ForceInvalid::Off);

        let mut out = Vec::new();
        findings(&mut out, Path::new("BCD"), &scan, &inventory).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("Entry {a}: Windows Boot Manager"), "{text}");
        assert!(text.contains(&format!("Disk  {P1},{D1} wrong disk, should be {D2}")), "{text}");
    }
}
