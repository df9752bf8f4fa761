use std::fs::File;
use std::io::{Read, stdin};
use std::path::Path;

use anyhow::Context;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use unicode_width::UnicodeWidthStr;

use soundcat::audit::AuditReport;
use soundcat::demux::DemuxReport;
use soundcat::format::crc_hex;

/// Pad a &str to a target display width (columns) using unicode-width so
/// fullwidth characters in tags keep the columns aligned.
fn pad_to_width(s: &str, width: usize) -> String {
    let w = UnicodeWidthStr::width(s);
    if w >= width {
        s.to_string()
    } else {
        format!("{}{}", s, " ".repeat(width - w))
    }
}

/// Read a whole file, or stdin when `path` is `-`.
pub fn read_input(path: &Path) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    if path == Path::new("-") {
        stdin()
            .read_to_end(&mut out)
            .context("failed to read from stdin")?;
    } else {
        File::open(path)
            .with_context(|| format!("failed to open input file: {}", path.display()))?
            .read_to_end(&mut out)
            .with_context(|| format!("failed to read input file: {}", path.display()))?;
    }
    Ok(out)
}

/// Print `(label, value)` rows as two left-aligned columns.
///
/// Multi-line values (PSF tags may repeat) continue on their own rows.
pub fn print_rows(rows: &[(String, String)]) {
    let mut col0 = UnicodeWidthStr::width("Field");
    for (k, _) in rows {
        col0 = col0.max(UnicodeWidthStr::width(k.as_str()));
    }

    println!("{}  Value", pad_to_width("Field", col0));
    for (k, v) in rows {
        for (i, line) in v.split('\n').enumerate() {
            let key = if i == 0 { k.as_str() } else { "" };
            println!("{}  {}", pad_to_width(key, col0), line);
        }
    }
}

pub fn print_audit(report: &AuditReport) {
    for set in &report.sets {
        println!("[{}]", set.name);

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("File"),
            Cell::new("Size"),
            Cell::new("CRC32"),
            Cell::new("Format"),
        ]);
        for file in &set.files {
            table.add_row(vec![
                Cell::new(&file.name),
                Cell::new(file.size).set_alignment(CellAlignment::Right),
                Cell::new(file.crc_hex()),
                Cell::new(file.format.unwrap_or("-")),
            ]);
        }
        println!("{}", table);

        for message in &set.messages {
            println!("  ! {}", message);
        }
        println!();
    }
    if report.cancelled {
        println!("(cancelled)");
    }
}

pub fn print_demux(report: &DemuxReport) {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Key"),
        Cell::new("Class"),
        Cell::new("Bytes"),
        Cell::new("Output"),
    ]);
    for output in &report.outputs {
        table.add_row(vec![
            Cell::new(crc_hex(output.key)),
            Cell::new(output.class),
            Cell::new(output.bytes).set_alignment(CellAlignment::Right),
            Cell::new(output.path.display()),
        ]);
    }
    println!("{}", table);
    println!("{} streams, {} bytes", report.outputs.len(), report.total_bytes());
}
