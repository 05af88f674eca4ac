use bcache_rescue::bkey::Key;
use bcache_rescue::checksum::probe_lengths;
use bcache_rescue::layout::{BCACHE_MAGIC, SB_SECTOR};
use bcache_rescue::recovery::{live_entries, replay_keys, Found, JournalScanner, ScanOptions};
use bcache_rescue::superblock::{Superblock, Version};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bcache-rescue", about = "Recover metadata from damaged bcache cache devices")]
struct Cli {
    /// More log output on stderr (-v info, -vv debug).  RUST_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode and check the superblock
    Info {
        device: PathBuf,
        /// Print the superblock as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search the whole device for journal sets
    Scan {
        device: PathBuf,
        /// Stop after this many journal sets
        #[arg(short, long)]
        max: Option<usize>,
        /// Bytes read per chunk
        #[arg(long, default_value_t = bcache_rescue::recovery::scanner::DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
        /// Byte offset to start scanning at
        #[arg(long, default_value_t = 0)]
        start: u64,
        /// Print one JSON document per journal set
        #[arg(long)]
        json: bool,
        /// Print only the live journal, in replay order
        #[arg(long)]
        live: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { device, json } => {
            let mut f = File::open(&device)?;
            let sb = Superblock::read_raw(&mut f)?;
            let verdict = sb.validate();

            if json {
                println!("{}", serde_json::to_string_pretty(&sb)?);
            } else {
                print_superblock(&sb);
                if let Err(bcache_rescue::Error::BadChecksum { stored, .. }) = &verdict {
                    let lengths = probe_lengths(*stored, &sb.to_bytes());
                    if lengths.is_empty() {
                        println!("sb.csum probe\t\tno record length matches");
                    }
                    for len in lengths {
                        println!("sb.csum probe\t\tmatches at length {len}");
                    }
                }
            }
            verdict?;
        }

        // ── Scan ─────────────────────────────────────────────────────────────
        Commands::Scan { device, max, chunk_size, start, json, live } => {
            let mut f = File::open(&device)?;
            let sb = Superblock::decode(&mut f)?;
            let pattern = sb.journal_pattern();
            eprintln!("journal magic {:016x} (set magic {:016x})", sb.jset_magic(), sb.set_magic);

            let opts = ScanOptions {
                chunk_size,
                max_results: max.unwrap_or(usize::MAX),
                start_offset: start,
                ..ScanOptions::default()
            };
            let mut scanner = JournalScanner::new(&mut f, &pattern, opts)?;

            let mut found = Vec::new();
            for hit in scanner.by_ref() {
                let hit = hit?;
                if live {
                    found.push(hit);
                } else {
                    print_found(&hit, json)?;
                }
            }
            let stats = scanner.stats().clone();
            drop(scanner);

            if live {
                let sets = live_entries(found.into_iter().map(|hit| hit.set).collect());
                eprintln!("live journal: {} set(s), {} key(s) to replay", sets.len(), replay_keys(&sets).count());
                for set in &sets {
                    if json {
                        println!("{}", serde_json::to_string(set)?);
                    } else {
                        print_set(set);
                    }
                }
            }
            eprintln!(
                "{} journal set(s), {} match(es), {} rejected, {} chunk(s), {} bytes scanned",
                stats.yielded, stats.matches, stats.failed, stats.chunks_read, stats.bytes_scanned,
            );
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

fn print_superblock(sb: &Superblock) {
    println!("sb.magic\t\t{}", if sb.magic == BCACHE_MAGIC { "ok" } else { "bad magic" });

    print!("sb.first_sector\t\t{}", sb.offset);
    if sb.offset == SB_SECTOR {
        println!(" [match]");
    } else {
        println!(" [expected {SB_SECTOR}]");
    }

    let expected = sb.compute_checksum();
    print!("sb.csum\t\t\t{:x}", sb.checksum);
    if sb.checksum == expected {
        println!(" [match]");
    } else {
        println!(" [expected {expected:x}]");
    }

    let kind = match sb.version_kind() {
        Some(Version::CacheDevice | Version::CacheDeviceWithUuid) => "cache device",
        Some(Version::BackingDevice | Version::BackingDeviceWithOffset) => "backing device",
        None => "unknown",
    };
    println!("sb.version\t\t{} [{kind}]", sb.version);
    println!();

    let label = sb.label_str();
    println!("dev.label\t\t{}", if label.is_empty() { "(empty)" } else { label.as_str() });
    println!("dev.uuid\t\t{}", sb.uuid);
    println!("dev.sectors_per_block\t{}", sb.block_size);
    println!("dev.sectors_per_bucket\t{}", sb.bucket_size);
    if let Some(t) = sb.last_mount_time().filter(|_| sb.last_mount != 0) {
        println!("dev.last_mount\t\t{}", t.to_rfc3339());
    }

    if !sb.is_backing_device() {
        println!("dev.cache.first_sector\t{}", sb.first_sector());
        println!("dev.cache.cache_sectors\t{}", sb.cache_sectors());
        println!("dev.cache.total_sectors\t{}", sb.total_sectors());
        println!("dev.cache.pos\t\t{}", sb.nr_this_dev);
        println!("dev.cache.journal\t{} bucket(s) {:?}", sb.nr_journal_buckets, sb.journal_buckets());
    }
    println!();

    println!("cset.jset_magic\t\t{:016x}", sb.jset_magic());
    println!("cset.bset_magic\t\t{:016x}", sb.bset_magic());
    println!("cset.pset_magic\t\t{:016x}", sb.pset_magic());
}

fn print_found(found: &Found, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string(found)?);
    } else {
        println!("@ {:#x}", found.offset);
        print_set(&found.set);
    }
    Ok(())
}

fn print_set(set: &bcache_rescue::JournalSet) {
    println!(
        "jset seq={} last_seq={} version={} keys={} btree_level={}",
        set.seq, set.last_seq, set.version, set.key_count, set.btree_level,
    );
    println!("  btree_root  {}", format_key(&set.btree_root_key()));
    println!("  uuid_bucket {}", format_key(&set.uuid_bucket_key()));
    for (i, key) in set.keys.iter().enumerate() {
        println!("  key[{i}] {}", format_key(key));
    }
}

fn format_key(key: &Key) -> String {
    let ptrs: Vec<String> = key
        .ptrs
        .iter()
        .map(|p| format!("{}:{}:{}", p.dev(), p.offset(), p.gen()))
        .collect();
    format!(
        "inode={} {}..{} size={}{}{} ptrs=[{}]",
        key.inode(),
        key.start(),
        key.offset(),
        key.size(),
        if key.dirty() { " dirty" } else { "" },
        if key.pinned() { " pinned" } else { "" },
        ptrs.join(" "),
    )
}
