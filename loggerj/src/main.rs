use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use loggerj_core::log::log_config::ConfigProperties;
use loggerj_core::log::{Config, IndexSlot, OffsetIndex};
use tracing::Level;
use tracing::{debug, error, info};
use tracing_subscriber::FmtSubscriber;

fn main() {
    match main_processor() {
        Ok(()) => info!("Exiting successfully."),
        Err(err) => {
            error!("Exiting with error: {:?}", err);
            std::process::exit(1);
        },
    }
}

fn index_file_arg() -> Arg<'static> {
    Arg::new("INDEX").help("The offset index file").required(true).index(1)
}

fn main_processor() -> Result<()> {
    let matches = Command::new("loggerj")
        .version("0.0")
        .author("Seb Ospina <kraige@gmail.com>")
        .about("Inspect and append to segment offset index files")
        .arg(
            Arg::new("verbosity_level")
                .short('v')
                .takes_value(true)
                .default_value("info")
                .help("Sets the level of verbosity"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .takes_value(true)
                .help("Sets the properties config file to use"),
        )
        .arg(
            Arg::new("override")
                .short('o')
                .takes_value(true)
                .multiple_occurrences(true)
                .help("Override properties defined in the config file, as key=value"),
        )
        .subcommand_required(true)
        .subcommand(Command::new("config").about("Prints the resolved configuration properties"))
        .subcommand(Command::new("dump").about("Prints every entry").arg(index_file_arg()))
        .subcommand(Command::new("last").about("Prints the last entry").arg(index_file_arg()))
        .subcommand(
            Command::new("append")
                .about("Appends one entry")
                .arg(index_file_arg())
                .arg(Arg::new("OFFSET").help("Relative offset").required(true).index(2))
                .arg(Arg::new("POSITION").help("Store position").required(true).index(3)),
        )
        .get_matches();
    let verbosity = matches.value_of("verbosity_level").unwrap_or("info");
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than the verbosity will be written to stdout.
        .with_max_level(verbosity.parse::<Level>()?)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let mut config_properties = read_config_properties(&matches)?;
    let config = config_properties.build()?;
    match matches.subcommand() {
        Some(("config", _)) => {
            for property in config_properties.describe() {
                println!("{}", property);
            }
            Ok(())
        },
        Some(("dump", sub)) => dump(sub, &config),
        Some(("last", sub)) => last(sub, &config),
        Some(("append", sub)) => append(sub, &config),
        _ => anyhow::bail!("A subcommand is required"),
    }
}

fn read_config_properties(matches: &ArgMatches) -> Result<ConfigProperties> {
    let mut config_properties = match matches.value_of("config") {
        Some(config_file) => {
            debug!("Using input file: {}", config_file);
            ConfigProperties::read_config_file(config_file)
                .with_context(|| format!("Unable to use config file {}", config_file))?
        },
        None => ConfigProperties::default(),
    };
    if let Some(property_overrides) = matches.values_of("override") {
        for override_property in property_overrides {
            let (property_name, property_value) = override_property
                .split_once('=')
                .with_context(|| format!("Override {} is not key=value", override_property))?;
            config_properties.try_set_property(property_name, property_value).with_context(
                || format!("Known properties: {}", ConfigProperties::config_names().join(", ")),
            )?;
        }
    }
    Ok(config_properties)
}

fn open_index(matches: &ArgMatches, config: &Config) -> Result<OffsetIndex> {
    let path = matches.value_of("INDEX").context("missing index file")?;
    OffsetIndex::open(path, config).with_context(|| format!("Unable to open index {}", path))
}

/// Inspection never creates the file, a mistyped path is an error.
fn open_existing_index(matches: &ArgMatches, config: &Config) -> Result<OffsetIndex> {
    let path = matches.value_of("INDEX").context("missing index file")?;
    OffsetIndex::open_existing(path, config)
        .with_context(|| format!("Unable to open existing index {}", path))
}

fn dump(matches: &ArgMatches, config: &Config) -> Result<()> {
    let index = open_existing_index(matches, config)?;
    println!("# {} ({} entries)", index.name().display(), index.entries());
    for slot in 0..index.entries() {
        let entry = index.read(IndexSlot::Absolute(slot))?;
        println!("{} {} {}", slot, entry.offset, entry.position);
    }
    index.close()?;
    Ok(())
}

fn last(matches: &ArgMatches, config: &Config) -> Result<()> {
    let index = open_existing_index(matches, config)?;
    match index.read(IndexSlot::Last) {
        Ok(entry) => println!("{} {} {}", index.entries() - 1, entry.offset, entry.position),
        Err(err) if err.is_end_of_index() => println!("{} is empty", index.name().display()),
        Err(err) => return Err(err.into()),
    }
    index.close()?;
    Ok(())
}

fn append(matches: &ArgMatches, config: &Config) -> Result<()> {
    let offset: u32 = matches.value_of("OFFSET").context("missing offset")?.parse()?;
    let position: u64 = matches.value_of("POSITION").context("missing position")?.parse()?;
    let mut index = open_index(matches, config)?;
    index.write(offset, position)?;
    info!("Appended ({}, {}) to {}", offset, position, index.name().display());
    index.close()?;
    Ok(())
}
