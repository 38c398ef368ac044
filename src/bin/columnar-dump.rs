use clap::{Arg, ArgAction, ArgMatches, Command};
use lightning_columnar::format::{StreamKind, StripeFooter};
use lightning_columnar::logging::{init_logging, parse_level};
use lightning_columnar::statistics::StatsDisplay;
use lightning_columnar::{
    Datum, Filter, LocalFileSystem, MicroPartitionReader, ReaderOptions, StorageFormat,
};
use prost::Message;
use serde_json::{json, Value};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

/// Micro-partition inspection tool
///
/// Prints the metadata, per-stripe statistics and rows of a micro-partition
/// file.

fn main() {
    let matches = create_cli().get_matches();

    if let Some(level) = matches.get_one::<String>("log-level") {
        if let Err(e) = init_logging(parse_level(level), false) {
            eprintln!("Error: {}", e);
        }
    }

    if let Err(e) = run_command(matches) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn path_arg() -> Arg {
    Arg::new("path")
        .help("Micro-partition file")
        .required(true)
        .index(1)
}

fn json_arg() -> Arg {
    Arg::new("json")
        .help("Print JSON instead of text")
        .long("json")
        .action(ArgAction::SetTrue)
}

fn create_cli() -> Command {
    Command::new("columnar-dump")
        .about("Inspect micro-partition files")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(Arg::new("log-level")
            .help("Enable logging at this level")
            .long("log-level")
            .global(true))
        .subcommand(
            Command::new("info")
                .about("Print footer and stripe table")
                .arg(path_arg())
                .arg(json_arg())
                .arg(Arg::new("streams")
                    .help("Also list the streams of every stripe")
                    .long("streams")
                    .action(ArgAction::SetTrue))
        )
        .subcommand(
            Command::new("stats")
                .about("Print per-stripe column statistics")
                .arg(path_arg())
        )
        .subcommand(
            Command::new("rows")
                .about("Print rows")
                .arg(path_arg())
                .arg(json_arg())
                .arg(Arg::new("stripe")
                    .help("Only rows of this stripe")
                    .long("stripe")
                    .value_parser(clap::value_parser!(usize)))
                .arg(Arg::new("columns")
                    .help("Comma separated column numbers to read, starting at 0")
                    .long("columns"))
                .arg(Arg::new("limit")
                    .help("Maximum number of rows")
                    .long("limit")
                    .value_parser(clap::value_parser!(usize))
                    .default_value("100"))
        )
}

fn run_command(matches: ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    match matches.subcommand() {
        Some(("info", sub_matches)) => cmd_info(sub_matches),
        Some(("stats", sub_matches)) => cmd_stats(sub_matches),
        Some(("rows", sub_matches)) => cmd_rows(sub_matches),
        _ => unreachable!(),
    }
}

fn open(path: &str, options: ReaderOptions) -> Result<MicroPartitionReader, Box<dyn std::error::Error>> {
    Ok(MicroPartitionReader::open(&LocalFileSystem::new(), path, options)?)
}

fn format_name(format: StorageFormat) -> &'static str {
    match format {
        StorageFormat::RowMajor => "row-major",
        StorageFormat::Columnar => "columnar",
    }
}

fn read_stripe_footer(
    path: &str,
    offset: u64,
    len: u64,
) -> Result<StripeFooter, Box<dyn std::error::Error>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)?;
    Ok(StripeFooter::decode(buf.as_slice())?)
}

fn stream_kind(kind: i32) -> String {
    StreamKind::try_from(kind)
        .map(|k| format!("{:?}", k).to_uppercase())
        .unwrap_or_else(|_| format!("UNKNOWN({})", kind))
}

fn cmd_info(matches: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let path = matches.get_one::<String>("path").unwrap();
    let with_streams = matches.get_flag("streams");
    let reader = open(path, ReaderOptions::default())?;
    let footer = reader.footer();

    let mut stripe_footers = Vec::with_capacity(footer.stripes.len());
    for stripe in &footer.stripes {
        let stripe_footer = if with_streams && stripe.footer_length > 0 {
            Some(read_stripe_footer(
                path,
                stripe.offset + stripe.data_length,
                stripe.stripe_footer_length(),
            )?)
        } else {
            None
        };
        stripe_footers.push(stripe_footer);
    }

    if matches.get_flag("json") {
        let columns: Vec<Value> = reader
            .column_types()
            .iter()
            .zip(&footer.col_info)
            .map(|(ty, info)| {
                json!({
                    "type": format!("{:?}", ty),
                    "type_oid": info.typid,
                    "collation": info.collation,
                })
            })
            .collect();
        let stripes: Vec<Value> = footer
            .stripes
            .iter()
            .zip(&stripe_footers)
            .enumerate()
            .map(|(i, (stripe, stripe_footer))| {
                let mut entry = json!({
                    "index": i,
                    "offset": stripe.offset,
                    "data_length": stripe.data_length,
                    "footer_length": stripe.footer_length,
                    "rows": stripe.number_of_rows,
                });
                if let Some(stripe_footer) = stripe_footer {
                    entry["streams"] = stripe_footer
                        .streams
                        .iter()
                        .map(|s| {
                            json!({
                                "kind": stream_kind(s.kind),
                                "rows": s.rows,
                                "length": s.length,
                                "padding": s.padding,
                            })
                        })
                        .collect();
                }
                entry
            })
            .collect();
        let out = json!({
            "format": format_name(reader.storage_format()),
            "rows": footer.number_of_rows,
            "content_length": footer.content_length,
            "columns": columns,
            "stripes": stripes,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("File: {}", path);
    println!("Format: {}", format_name(reader.storage_format()));
    println!("Rows: {}", footer.number_of_rows);
    println!("Content length: {} bytes", footer.content_length);
    println!("Columns:");
    for (i, (ty, info)) in reader.column_types().iter().zip(&footer.col_info).enumerate() {
        println!("  {:>3}  {:?}  oid={} collation={}", i, ty, info.typid, info.collation);
    }
    println!("Stripes: {}", footer.stripes.len());
    println!("  {:>5}  {:>12}  {:>10}  {:>10}  {:>8}", "index", "offset", "data", "total", "rows");
    for (i, (stripe, stripe_footer)) in footer.stripes.iter().zip(&stripe_footers).enumerate() {
        println!(
            "  {:>5}  {:>12}  {:>10}  {:>10}  {:>8}",
            i, stripe.offset, stripe.data_length, stripe.footer_length, stripe.number_of_rows
        );
        for s in stripe_footer.iter().flat_map(|f| &f.streams) {
            println!(
                "         {:<8} rows={:<8} length={:<8} padding={}",
                stream_kind(s.kind),
                s.rows,
                s.length,
                s.padding
            );
        }
    }
    Ok(())
}

fn cmd_stats(matches: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let path = matches.get_one::<String>("path").unwrap();
    let reader = open(path, ReaderOptions::default())?;
    let types = reader.column_types();
    for (i, stripe) in reader.footer().stripes.iter().enumerate() {
        let info = lightning_columnar::format::MicroPartitionStatisticsInfo {
            column_stats: stripe.col_stats.clone(),
        };
        println!("stripe {:>4}: {}", i, StatsDisplay::new(&info, types));
    }
    Ok(())
}

fn datum_to_json(datum: &Datum) -> Value {
    match datum {
        Datum::Null => Value::Null,
        Datum::Bool(v) => json!(v),
        Datum::Int8(v) => json!(v),
        Datum::Int16(v) => json!(v),
        Datum::Int32(v) => json!(v),
        Datum::Int64(v) => json!(v),
        Datum::Float32(v) => json!(v),
        Datum::Float64(v) => json!(v),
        Datum::Decimal(v) => json!(v.to_string()),
        Datum::Bytes(v) => json!(String::from_utf8_lossy(v)),
    }
}

fn cmd_rows(matches: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let path = matches.get_one::<String>("path").unwrap();
    let limit = *matches.get_one::<usize>("limit").unwrap();
    let as_json = matches.get_flag("json");

    let mut options = ReaderOptions::default();
    if let Some(columns) = matches.get_one::<String>("columns") {
        let probe = open(path, ReaderOptions::default())?;
        let mut projection = vec![false; probe.column_types().len()];
        for column in columns.split(',') {
            let index: usize = column.trim().parse()?;
            let slot = projection
                .get_mut(index)
                .ok_or_else(|| format!("column {} does not exist", index))?;
            *slot = true;
        }
        let mut filter = Filter::default();
        filter.set_column_projection(projection);
        options = options.with_filter(filter);
    }
    let mut reader = open(path, options)?;

    let stripes: Vec<usize> = match matches.get_one::<usize>("stripe") {
        Some(&stripe) => vec![stripe],
        None => (0..reader.group_count()).collect(),
    };

    let mut printed = 0;
    'stripes: for index in stripes {
        let group = reader.read_group(index)?;
        for row in 0..group.rows() {
            if printed >= limit {
                break 'stripes;
            }
            let tuple = group.get_tuple(row)?;
            let number = group.row_offset() + row as u64;
            if as_json {
                let values: Vec<Value> = tuple.iter().map(datum_to_json).collect();
                println!("{}", json!({ "row": number, "values": values }));
            } else {
                let values: Vec<String> = tuple.iter().map(|d| d.to_string()).collect();
                println!("{:>8}: {}", number, values.join(" | "));
            }
            printed += 1;
        }
    }
    Ok(())
}
