use clap::{Args, Parser, Subcommand};
use pstkit::named::NAMED_ID_BASE;
use pstkit::{DecodeOptions, IndexMode, NamedPropertyMap, Nid, PropertyValue, PstFile};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pst", about = "Inspect PST/OST mail archives")]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalOpts {
    /// Skip header, page and block CRC checks
    #[arg(long, global = true)]
    no_crc: bool,
    /// Reject heaps with bad or unknown signatures
    #[arg(long, global = true)]
    strict: bool,
    /// Walk index pages from disk on every lookup instead of loading them
    #[arg(long, global = true)]
    on_demand: bool,
    /// JSON file with decoder options; flags override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log more (repeat for trace output)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header fields
    Info {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List Block Index leaves
    Blocks {
        input: PathBuf,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// List Node Index leaves
    Nodes {
        input: PathBuf,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Decode a node's property bag
    Props {
        input: PathBuf,
        #[arg(value_parser = parse_nid)]
        nid: Nid,
        /// Read values stored in subnodes instead of printing a placeholder
        #[arg(short, long)]
        resolve: bool,
        #[arg(long)]
        json: bool,
    },
    /// Decode a node's row table
    Table {
        input: PathBuf,
        #[arg(value_parser = parse_nid)]
        nid: Nid,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Show the named-property map
    Named {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Try to decode every node and report what each one holds
    Scan {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);
    let opts = decode_options(&cli.global)?;

    match cli.command {
        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, json } => {
            let pst = PstFile::open(&input, opts)?;
            let h = pst.header();
            if json {
                println!("{}", serde_json::to_string_pretty(h)?);
                return Ok(());
            }
            println!("── PST file ─────────────────────────────────────────────");
            println!("  Path            {}", input.display());
            println!("  Kind            {}", if h.is_ost() { "OST" } else { "PST" });
            println!("  Format          {} (wVer {})", h.variant, h.version);
            println!("  Client version  {}", h.client_version);
            println!("  Encryption      {}", h.encryption);
            println!("  File size       {} B", h.file_eof);
            println!("  Partial CRC     {:#010x}", h.crc_partial);
            if let Some(full) = h.crc_full {
                println!("  Full CRC        {full:#010x}");
            }
            println!("  Node index      {}", h.nbt_root);
            println!("  Block index     {}", h.bbt_root);
            println!("  Next block id   {}", h.next_block_bid);
        }

        // ── Blocks ───────────────────────────────────────────────────────────
        Commands::Blocks { input, limit } => {
            let pst = PstFile::open(&input, opts)?;
            println!("{:<20} {:>14} {:>7} {:>9} {:>5}", "BID", "Offset", "Size", "Inflated", "Refs");
            for entry in pst.ndb().block_index().entries().take(limit.unwrap_or(usize::MAX)) {
                let e = entry?;
                let kind = if e.bid().is_internal() { " internal" } else { "" };
                println!(
                    "{:<20} {:>#14x} {:>7} {:>9} {:>5}{}",
                    e.bid().to_string(),
                    e.bref.ib.0,
                    e.size,
                    e.inflated_size,
                    e.ref_count,
                    kind
                );
            }
        }

        // ── Nodes ────────────────────────────────────────────────────────────
        Commands::Nodes { input, limit } => {
            let pst = PstFile::open(&input, opts)?;
            println!("{:<12} {:<22} {:<20} {:<20} {:<12}", "NID", "Type", "Data", "Subnodes", "Parent");
            for entry in pst.nodes().take(limit.unwrap_or(usize::MAX)) {
                let e = entry?;
                println!(
                    "{:<12} {:<22} {:<20} {:<20} {:<12}",
                    e.nid.to_string(),
                    format!("{:?}", e.nid.nid_type()),
                    e.data.to_string(),
                    e.subnode.to_string(),
                    e.parent.to_string()
                );
            }
        }

        // ── Props ────────────────────────────────────────────────────────────
        Commands::Props { input, nid, resolve, json } => {
            let pst = PstFile::open(&input, opts)?;
            let bag = pst.property_bag(nid)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&bag)?);
                return Ok(());
            }
            let named = pst.named_properties().unwrap_or_default();
            println!("Node {} ({} properties)", nid, bag.len());
            for (tag, value) in bag.iter() {
                let shown = if resolve && value.is_deferred() {
                    value.resolve()?
                } else {
                    value.clone()
                };
                println!(
                    "  {} {:<14} {:<28} {}",
                    tag,
                    format!("{:?}", tag.ptype()),
                    named_label(&named, tag.id()),
                    render(&shown)
                );
            }
        }

        // ── Table ────────────────────────────────────────────────────────────
        Commands::Table { input, nid, limit, json } => {
            let pst = PstFile::open(&input, opts)?;
            let table = pst.row_table(nid)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&table)?);
                return Ok(());
            }
            println!("Table {} ({} columns, {} rows)", nid, table.columns().len(), table.row_count());
            for c in table.columns() {
                println!("  column {} at {:>3} width {} bit {}", c.tag, c.offset, c.width, c.cell_bit);
            }
            let rows = table.rows().iter().zip(table.row_ids());
            for (i, (row, id)) in rows.take(limit.unwrap_or(usize::MAX)).enumerate() {
                println!("── row {i} (id {id:#x})");
                for (column, cell) in table.columns().iter().zip(row.cells()) {
                    if let Some(value) = cell {
                        println!("  {} {}", column.tag, render(value));
                    }
                }
            }
        }

        // ── Named ────────────────────────────────────────────────────────────
        Commands::Named { input, json } => {
            let pst = PstFile::open(&input, opts)?;
            let named = pst.named_properties()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&named)?);
                return Ok(());
            }
            println!("{} named properties", named.len());
            for p in named.iter() {
                println!("  {:#06x}  {}  {}", p.id, p.guid, p.name);
            }
        }

        // ── Scan ─────────────────────────────────────────────────────────────
        Commands::Scan { input, json } => {
            let pst = PstFile::open(&input, opts)?;
            let report = pst.scan()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            println!("Scan of {}", input.display());
            println!("  {}", report.summary());
            for node in report.failures() {
                println!("  FAILED {} ({:?}): {:?}", node.nid, node.nid_type, node.health);
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn decode_options(global: &GlobalOpts) -> Result<DecodeOptions, Box<dyn std::error::Error>> {
    let mut opts = match &global.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => DecodeOptions::default(),
    };
    if global.no_crc {
        opts = opts.with_crc(false);
    }
    if global.strict {
        opts = opts.strict(true);
    }
    if global.on_demand {
        opts = opts.with_index_mode(IndexMode::OnDemand);
    }
    Ok(opts)
}

fn parse_nid(s: &str) -> Result<Nid, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map(Nid::from_raw).map_err(|e| format!("bad node id {s:?}: {e}"))
}

fn named_label(named: &NamedPropertyMap, id: u16) -> String {
    if id < NAMED_ID_BASE {
        return String::new();
    }
    named.name(id).map(|n| n.to_string()).unwrap_or_default()
}

fn render(value: &PropertyValue) -> String {
    match value {
        PropertyValue::Binary(bytes) | PropertyValue::Object(bytes) if bytes.len() > 32 => {
            format!("{}… ({} bytes)", hex::encode(&bytes[..32]), bytes.len())
        }
        PropertyValue::Deferred(r) => format!("<subnode {}>", r.location().nid),
        other => other.to_string(),
    }
}
