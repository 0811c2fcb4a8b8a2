use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use blendcodec::{BlendSource, Body, Document, Error, StructValue, Value};
use blendcodec::source::FileSource;
use clap::{Parser, Subcommand};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "blendcodec", about = "Inspect and verify BLENDER block-stream files")]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header, block counts and anomalies
    Info {
        input: PathBuf,
    },
    /// List block headers
    Blocks {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Show the structure catalog
    Catalog {
        input: PathBuf,
        #[arg(long)]
        json: bool,
        /// Only this struct
        #[arg(short, long = "struct")]
        name: Option<String>,
    },
    /// Decode one block and print its body
    Dump {
        input: PathBuf,
        index: usize,
        #[arg(long)]
        json: bool,
        /// Maximum raw bytes to print
        #[arg(short, long, default_value = "256")]
        limit: usize,
    },
    /// Re-encode the document and compare it with the input
    Verify {
        input: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let source = BlendSource::open(&input)?;
            let compression = source.compression();
            let mut doc = Document::decode(source)?;
            let catalog = doc.load_catalog().ok();

            let mut codes: BTreeMap<String, usize> = BTreeMap::new();
            for block in doc.blocks() {
                *codes.entry(block.code().to_string()).or_default() += 1;
            }

            let header = doc.header();
            println!("── Blend document ───────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Compression    {compression:?}");
            println!("  Version        {}", header.version);
            println!("  Pointer width  {} B", header.pointer_width.bytes());
            println!("  Byte order     {:?}", header.endian);
            println!("  Layout         {}", doc.strategy().name());
            println!("  Blocks         {}", doc.blocks().len());
            println!("  Addresses      {}", doc.addresses().len());
            match &catalog {
                Some(c) => println!("  Structs        {}", c.structs().len()),
                None    => println!("  Structs        (no catalog)"),
            }
            println!("  Block codes:");
            for (code, n) in &codes {
                println!("    {code:<6} {n:>8}");
            }
            println!("  Anomalies ({}):", doc.anomalies().len());
            for anomaly in doc.anomalies() {
                println!("    {anomaly}");
            }
        }

        // ── Blocks ───────────────────────────────────────────────────────────
        Commands::Blocks { input, json } => {
            let mut doc = Document::open(&input)?;
            let catalog = doc.load_catalog().ok();
            let rows: Vec<BlockRow> = doc
                .blocks()
                .iter()
                .enumerate()
                .map(|(index, block)| {
                    let h = block.header();
                    BlockRow {
                        index,
                        code:          h.code.to_string(),
                        size:          h.size,
                        address:       format!("{:#x}", h.old_address),
                        catalog_index: h.catalog_index,
                        type_name:     catalog
                            .as_ref()
                            .filter(|_| h.catalog_index != 0)
                            .and_then(|c| c.struct_name(h.catalog_index))
                            .map(str::to_owned),
                        count:         h.count,
                    }
                })
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!("{:>6}  {:<6} {:>10} {:>20} {:>6}  {:<24} {:>6}",
                         "#", "Code", "Size", "Address", "SDNA", "Type", "Count");
                for r in &rows {
                    println!("{:>6}  {:<6} {:>10} {:>20} {:>6}  {:<24} {:>6}",
                        r.index, r.code, r.size, r.address, r.catalog_index,
                        r.type_name.as_deref().unwrap_or("-"), r.count);
                }
            }
        }

        // ── Catalog ──────────────────────────────────────────────────────────
        Commands::Catalog { input, json, name } => {
            let mut doc = Document::open(&input)?;
            let catalog = doc.load_catalog()?;

            if json && name.is_none() {
                println!("{}", serde_json::to_string_pretty(&*catalog)?);
                return Ok(());
            }

            let indices: Vec<u32> = match &name {
                Some(n) => vec![doc.find_struct(n)?],
                None    => (0..catalog.structs().len() as u32).collect(),
            };

            let mut layouts = Vec::with_capacity(indices.len());
            for index in indices {
                let Some(def) = catalog.get_struct(index) else { continue };
                let fields = def
                    .fields
                    .iter()
                    .map(|f| FieldRow {
                        type_name: catalog.type_def(f.type_index).name.clone(),
                        name:      catalog.field_name(f.name_index).raw.clone(),
                    })
                    .collect();
                layouts.push(StructRow {
                    index,
                    name:   catalog.struct_name(index).unwrap_or("?").to_owned(),
                    size:   catalog.struct_size(index).unwrap_or(0),
                    fields,
                });
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&layouts)?);
            } else {
                for s in &layouts {
                    println!("[{}] {} ({} B)", s.index, s.name, s.size);
                    for f in &s.fields {
                        println!("    {:<16} {}", f.type_name, f.name);
                    }
                }
            }
        }

        // ── Dump ─────────────────────────────────────────────────────────────
        Commands::Dump { input, index, json, limit } => {
            let mut doc = Document::open(&input)?;
            if doc.block(index).is_some_and(|b| b.header().catalog_index != 0) {
                doc.load_catalog()?;
            }
            let header = *doc.block(index).ok_or(Error::NoSuchBlock(index))?.header();
            let body = doc.decode_block(index)?;

            if json {
                let out = match body {
                    Body::Raw(bytes) => serde_json::json!({ "raw": hex::encode(&bytes[..bytes.len().min(limit)]) }),
                    Body::Catalog(c) => serde_json::to_value(&**c)?,
                    Body::Struct(v) => serde_json::to_value(v)?,
                    Body::Sequence(vs) => serde_json::to_value(vs)?,
                    Body::Unparsed => serde_json::Value::Null,
                };
                println!("{}", serde_json::to_string_pretty(&out)?);
                return Ok(());
            }

            println!("Block {index}: {} size={} address={:#x} sdna={} count={}",
                header.code, header.size, header.old_address, header.catalog_index, header.count);
            match body {
                Body::Raw(bytes) => print_hex(bytes, limit),
                Body::Catalog(c) => println!("  catalog: {} names, {} types, {} structs",
                    c.names().len(), c.types().len(), c.structs().len()),
                Body::Struct(v) => print_struct(v, 1),
                Body::Sequence(vs) => {
                    for (i, v) in vs.iter().enumerate() {
                        println!("  [{i}]");
                        print_struct(v, 2);
                    }
                }
                Body::Unparsed => println!("  (not decoded)"),
            }
        }

        // ── Verify ───────────────────────────────────────────────────────────
        Commands::Verify { input } => {
            let original = read_decompressed(&input)?;
            let mut doc = Document::decode(Cursor::new(original.as_slice()))?;
            let encoded = doc.to_bytes()?;

            let want = crc32fast::hash(&original);
            let got  = crc32fast::hash(&encoded);
            println!("  input    {:>10} B  crc32 {want:08x}", original.len());
            println!("  encoded  {:>10} B  crc32 {got:08x}", encoded.len());
            if want != got || original != encoded {
                return Err(format!("{}: re-encoded stream differs from input", input.display()).into());
            }
            println!("OK: {} blocks round-trip", doc.blocks().len());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn read_decompressed(path: &Path) -> Result<Vec<u8>, Error> {
    let mut source: FileSource = BlendSource::open(path)?;
    let mut bytes = Vec::new();
    source.read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn print_hex(bytes: &[u8], limit: usize) {
    let shown = &bytes[..bytes.len().min(limit)];
    for (i, row) in shown.chunks(16).enumerate() {
        println!("  {:08x}  {}", i * 16, hex::encode(row));
    }
    if shown.len() < bytes.len() {
        println!("  … {} more bytes", bytes.len() - shown.len());
    }
}

fn print_struct(value: &StructValue, depth: usize) {
    let pad = "  ".repeat(depth);
    println!("{pad}{} {{", value.type_name);
    for field in &value.fields {
        match &field.value {
            Value::Struct(inner) => {
                print!("{pad}  {}: ", field.name);
                print_struct(inner, depth + 1);
            }
            other => println!("{pad}  {}: {}", field.name, render(other)),
        }
    }
    println!("{pad}}}");
}

fn render(value: &Value) -> String {
    match value {
        Value::Pointer(p) if p.is_null() => "null".into(),
        Value::Pointer(p) => format!("-> {:#x}", p.address()),
        Value::Bytes(b) => {
            let end = b.iter().position(|&c| c == 0).unwrap_or(b.len());
            let text = &b[..end];
            if !text.is_empty() && text.iter().all(|c| c.is_ascii_graphic() || *c == b' ') {
                format!("{:?}", String::from_utf8_lossy(text))
            } else {
                hex::encode(b)
            }
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(render).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Struct(s) => format!("{} {{ .. }}", s.type_name),
        Value::I8(v)  => v.to_string(),
        Value::U8(v)  => v.to_string(),
        Value::I16(v) => v.to_string(),
        Value::U16(v) => v.to_string(),
        Value::I32(v) => v.to_string(),
        Value::U32(v) => v.to_string(),
        Value::I64(v) => v.to_string(),
        Value::U64(v) => v.to_string(),
        Value::F32(v) => v.to_string(),
        Value::F64(v) => v.to_string(),
    }
}

#[derive(Serialize)]
struct BlockRow {
    index:         usize,
    code:          String,
    size:          u32,
    address:       String,
    catalog_index: u32,
    type_name:     Option<String>,
    count:         u32,
}

#[derive(Serialize)]
struct StructRow {
    index:  u32,
    name:   String,
    size:   usize,
    fields: Vec<FieldRow>,
}

#[derive(Serialize)]
struct FieldRow {
    type_name: String,
    name:      String,
}
