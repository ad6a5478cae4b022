// Interactive partition selection for unresolvable entries

use std::io::{self, BufRead, Write};

use bcdfix_core::bcd::{Choice, Choices, PendingChoices};
use bcdfix_core::Inventory;

/// Ask on the terminal.
pub fn collect(pending: &PendingChoices, inventory: &Inventory) -> io::Result<Choices> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    collect_from(pending, inventory, &mut stdin.lock(), &mut stdout.lock())
}

/// Ask once per pending entry. End of input skips the remaining entries.
pub fn collect_from<R: BufRead, W: Write>(
    pending: &PendingChoices,
    inventory: &Inventory,
    input: &mut R,
    out: &mut W,
) -> io::Result<Choices> {
    let mut choices = Choices::new();

    writeln!(out)?;
    writeln!(out, "Disks:")?;
    for disk in inventory.disks() {
        writeln!(out, "  {:<12} {}", disk.device, disk.disk_uuid)?;
    }
    writeln!(out, "Partitions:")?;
    for (i, part) in inventory.partitions().iter().enumerate() {
        writeln!(out, "  {:>2}) {part}", i + 1)?;
    }

    let mut line = String::new();
    'entries: for pending in pending.entries() {
        writeln!(out)?;
        writeln!(out, "Entry {}: {}", pending.entry.id, pending.entry.title())?;
        for locator in &pending.locators {
            writeln!(
                out,
                "  {:<5} {},{}",
                locator.element.label(),
                locator.partition_uuid,
                locator.disk_uuid
            )?;
        }

        loop {
            write!(out, "Partition number, device, PartUUID[,DiskUUID] or empty to skip: ")?;
            out.flush()?;

            line.clear();
            if input.read_line(&mut line)? == 0 {
                writeln!(out)?;
                break 'entries;
            }

            match Choice::from_answer(&line, inventory) {
                Ok(Choice::Skip) => break,
                Ok(choice) => {
                    choices.insert(pending.entry.id.clone(), choice);
                    break;
                }
                Err(e) => writeln!(out, "  {e}")?,
            }
        }
    }

    Ok(choices)
}
