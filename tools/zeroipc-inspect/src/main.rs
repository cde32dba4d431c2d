// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! zeroipc-inspect - read-only inspector for zeroipc shared memory segments
//!
//! Opens a named segment, reads its table, and prints a summary, the
//! table contents, a best-effort guess at each entry's structure kind,
//! and optional hex dumps. Never mutates segment contents; opening a
//! segment does transiently adjust its attach reference counter the
//! same way any other attacher would (see `zeroipc::Segment::open`),
//! which is restored on exit.

use clap::Parser;
use colored::*;
use std::process::ExitCode;
use zeroipc::{Error, NamedEntry, Segment};

/// Read-only inspector for zeroipc shared memory segments.
#[derive(Parser, Debug)]
#[command(name = "zeroipc-inspect")]
#[command(version)]
#[command(about = "Inspect a zeroipc shared-memory segment without modifying it")]
struct Args {
    /// Segment name, e.g. "/sensors" (leading slash optional)
    segment: String,

    /// Print a one-line segment summary (default if no other flag is given)
    #[arg(short = 's', long)]
    summary: bool,

    /// Print the table of named entries
    #[arg(short = 't', long)]
    table: bool,

    /// Include extra detail (header words, per-entry byte ranges) with -t/-i/-a
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Hex-dump the named entry's raw bytes
    #[arg(short = 'd', long, value_name = "NAME")]
    dump: Option<String>,

    /// Print detailed info for one named entry
    #[arg(short = 'i', long, value_name = "NAME")]
    info: Option<String>,

    /// List entry names only, one per line
    #[arg(short = 'l', long)]
    list: bool,

    /// Print everything: summary, table, and per-entry info
    #[arg(short = 'a', long)]
    all: bool,
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match Args::try_parse() {
        Ok(a) => a,
        Err(e) => {
            // clap prints its own message (including for --help); exit 0
            // for a requested --help/--version, 1 for an actual CLI error.
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            ExitCode::from(1)
        }
    }
}

fn run(args: &Args) -> Result<(), Error> {
    log::debug!("opening segment {}", args.segment);
    let segment = Segment::open(&args.segment)?;
    let table = segment.table();

    let nothing_selected = !args.summary
        && !args.table
        && !args.list
        && !args.all
        && args.dump.is_none()
        && args.info.is_none();

    if args.summary || args.all || nothing_selected {
        print_summary(&segment, args.verbose);
    }

    if args.list {
        for entry in table.list() {
            println!("{}", entry.name);
        }
    }

    if args.table || args.all {
        print_table(&table.list(), &segment, args.verbose);
    }

    if args.all {
        for entry in table.list() {
            println!();
            print_info(&entry, &segment, args.verbose);
        }
    }

    if let Some(name) = &args.info {
        let entry = find_entry(&table.list(), name)?;
        print_info(&entry, &segment, args.verbose);
    }

    if let Some(name) = &args.dump {
        let entry = find_entry(&table.list(), name)?;
        print_dump(&entry, &segment, args.verbose);
    }

    Ok(())
}

fn find_entry(entries: &[NamedEntry], name: &str) -> Result<NamedEntry, Error> {
    entries
        .iter()
        .find(|e| e.name == name)
        .cloned()
        .ok_or_else(|| Error::NotFound(name.to_string()))
}

fn print_summary(segment: &Segment, verbose: bool) {
    let table = segment.table();
    println!("{}", "segment".bold());
    println!("  name:        {}", segment.name().cyan());
    println!("  size:        {}", format_size(segment.size() as u64));
    println!(
        "  entries:     {} / {} (table capacity)",
        table.entry_count(),
        table.max_entries()
    );
    println!("  attached:    {} process(es)", table.ref_count());
    if verbose {
        println!("  next offset: {} bytes", table.next_offset());
        println!("  total size:  {} bytes", table.total_size());
    }
}

fn print_table(entries: &[NamedEntry], segment: &Segment, verbose: bool) {
    println!();
    println!("{}", "table".bold());
    if entries.is_empty() {
        println!("  (no active entries)");
        return;
    }
    println!(
        "  {:<24} {:>10} {:>10} {:>9} {:>9}  {}",
        "name".underline(),
        "offset".underline(),
        "size".underline(),
        "elem_sz".underline(),
        "elem_ct".underline(),
        "kind".underline()
    );
    for entry in entries {
        let kind = guess_kind(entry);
        println!(
            "  {:<24} {:>10} {:>10} {:>9} {:>9}  {}",
            entry.name, entry.offset, entry.size, entry.elem_size, entry.elem_count, kind
        );
        if verbose {
            println!(
                "      range: [{}, {})",
                entry.offset,
                entry.offset + entry.size
            );
            print_header_words(entry, segment);
        }
    }
}

fn print_info(entry: &NamedEntry, segment: &Segment, verbose: bool) {
    println!("{} {}", "entry".bold(), entry.name.cyan());
    println!("  offset:     {}", entry.offset);
    println!("  size:       {} ({})", entry.size, format_size(entry.size));
    println!("  elem_size:  {}", entry.elem_size);
    println!("  elem_count: {}", entry.elem_count);
    println!("  kind:       {}", guess_kind(entry));
    print_header_words(entry, segment);
    if verbose {
        print_hex(entry, segment, 256);
    }
}

fn print_dump(entry: &NamedEntry, segment: &Segment, verbose: bool) {
    println!("{} {} ({} bytes)", "dump".bold(), entry.name.cyan(), entry.size);
    let limit = if verbose { entry.size } else { entry.size.min(512) };
    print_hex(entry, segment, limit);
    if limit < entry.size {
        println!(
            "  ... {} more bytes not shown (pass -v to dump the whole entry)",
            entry.size - limit
        );
    }
}

/// Reads up to the first four 64-bit words of an entry's header region,
/// since most of this crate's container headers are laid out as a short
/// run of `u64`/`u32` fields at offset 0. Purely diagnostic: never written.
fn print_header_words(entry: &NamedEntry, segment: &Segment) {
    let word_count = (entry.size / 8).min(4);
    if word_count == 0 {
        return;
    }
    print!("  header:");
    for i in 0..word_count {
        let Ok(ptr) = segment.at(entry.offset + i * 8) else {
            break;
        };
        // SAFETY: entry.offset + i*8 is within the entry's own byte
        // range, which is within the segment by the table's invariant
        // that no active entry's range exceeds segment bounds.
        let word = unsafe { ptr.cast::<u64>().read_unaligned() };
        print!(" {word:#018x}");
    }
    println!();
}

fn print_hex(entry: &NamedEntry, segment: &Segment, limit: u64) {
    let len = limit.min(entry.size) as usize;
    const ROW: usize = 16;
    let mut row = [0u8; ROW];
    for start in (0..len).step_by(ROW) {
        let n = ROW.min(len - start);
        for i in 0..n {
            let Ok(ptr) = segment.at(entry.offset + (start + i) as u64) else {
                row[i] = 0;
                continue;
            };
            // SAFETY: start + i < entry.size <= the entry's byte range,
            // which lies within the segment.
            row[i] = unsafe { ptr.read() };
        }
        let hex: String = row[..n].iter().map(|b| format!("{b:02x} ")).collect();
        let ascii: String = row[..n]
            .iter()
            .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
            .collect();
        println!("  {start:08x}  {hex:<48} {ascii}");
    }
}

/// Structure-kind guess grounded in the table's recorded `elem_size` and
/// `elem_count` (see `zeroipc::Table::add`), not total byte size alone.
/// `elem_size == 0 && elem_count == 0` marks a sync primitive, which
/// carries no element metadata; those are still distinguished by total
/// size, since their tiny fixed headers are unambiguous at that width.
/// For element-bearing structures, subtracting `elem_size * elem_count`
/// from the entry's total size recovers the exact header/per-slot
/// overhead for Array (8B header, no per-slot tag) and Ring (24B header,
/// no per-slot tag); Queue/Stack/Pool add an 8-byte sequence or free-list
/// tag per slot and Map's bucket width and count differ from the
/// recorded element metadata, so those remain grouped rather than
/// individually named.
fn guess_kind(entry: &NamedEntry) -> String {
    const LATCH: u64 = 4;
    const BARRIER: u64 = 12;
    const SEMAPHORE: u64 = 16;
    const ARRAY_HEADER: u64 = 8;
    const RING_HEADER: u64 = 24;

    if entry.elem_size == 0 && entry.elem_count == 0 {
        return match entry.size {
            LATCH => "latch".to_string(),
            BARRIER => "barrier".to_string(),
            SEMAPHORE => "semaphore".to_string(),
            other => format!("sync primitive (unrecognized size {other}B)"),
        };
    }

    let records = entry.elem_size * entry.elem_count;
    let remainder = entry.size.saturating_sub(records);
    match remainder {
        ARRAY_HEADER => "array (8B header, elements fit exactly)".to_string(),
        RING_HEADER => "ring (24B header, elements fit exactly)".to_string(),
        other => format!(
            "queue/stack/pool/map (record width leaves {other}B remainder: \
             per-slot tag or bucket overhead not reflected in elem_size)"
        ),
    }
}

fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;
    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}
