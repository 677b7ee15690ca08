use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use property_broker::logging::{init_logging, init_logging_from_env, LoggingMode};
use property_broker::{
    AreaId, BrokerBuilder, BrokerConfig, ChannelListener, FaultCode, PropertyBroker,
    PropertyCatalog, PropertyConfig, PropertyId, PropertyValue, RawValue, ValueType,
};

const SAMPLE_CATALOG: &str = include_str!("../catalogs/sample.json");

/// Vehicle Property Broker
///
/// Loads a property catalog into an in-process broker and drives it from the
/// command line: list and read properties, write values, or watch a rate
/// limited subscription while a simulated sensor writes.
#[derive(Parser, Debug)]
#[command(name = "vpb")]
#[command(about = "Vehicle property broker command line driver")]
#[command(version)]
pub struct Args {
    /// Property catalog (JSON); the built-in sample catalog when omitted
    #[arg(short, long, global = true)]
    pub catalog: Option<PathBuf>,

    /// Logging mode (silent, development, debug, json); read from
    /// VPB_LOG_MODE when omitted
    #[arg(long, global = true)]
    pub log_mode: Option<String>,

    /// Use short delivery timeouts and quick disconnect detection
    #[arg(long, global = true)]
    pub low_latency: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List property configs
    List {
        /// Only show this property (id or name)
        #[arg(short, long)]
        property: Option<String>,
    },
    /// Read the current value of a property
    Get {
        /// Property id (decimal or 0x-hex) or name
        property: String,
        #[arg(short, long, default_value = "0")]
        area: i32,
    },
    /// Write a value and show the notification it produces
    Set {
        property: String,
        value: String,
        #[arg(short, long, default_value = "0")]
        area: i32,
    },
    /// Subscribe at a sample rate while a simulated sensor writes values
    Watch {
        #[arg(default_value = "PERF_VEHICLE_SPEED")]
        property: String,
        /// Subscription sample rate in Hz
        #[arg(short, long, default_value = "5")]
        rate: f32,
        /// Simulated sensor writes per second
        #[arg(short, long, default_value = "20")]
        writes: u32,
        /// How long to watch, in seconds
        #[arg(short, long, default_value = "3")]
        duration: u64,
    },
    /// Validate the catalog and print broker statistics
    Check,
}

impl Args {
    /// Validate command line arguments
    pub fn validate(&self) -> Result<()> {
        if let Some(mode) = &self.log_mode {
            mode.parse::<LoggingMode>()?;
        }

        if let Command::Watch {
            rate,
            writes,
            duration,
            ..
        } = &self.command
        {
            if !rate.is_finite() || *rate < 0.0 {
                bail!("Sample rate must be a non-negative number, got {}", rate);
            }
            if *writes == 0 {
                bail!("Simulated sensor must write at least once per second");
            }
            if *duration == 0 {
                bail!("Watch duration must be positive");
            }
        }

        Ok(())
    }

    fn broker_config(&self) -> BrokerConfig {
        if self.low_latency {
            BrokerConfig::low_latency()
        } else {
            BrokerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.validate()?;

    match &args.log_mode {
        Some(mode) => init_logging(mode.parse()?),
        None => init_logging_from_env(),
    }
    .context("Failed to initialize logging")?;

    let catalog = load_catalog(args.catalog.as_ref())?;
    let registry = catalog
        .into_registry()
        .context("Catalog does not describe a valid registry")?;

    let broker = BrokerBuilder::new()
        .with_registry(registry)
        .with_config(args.broker_config())
        .build()
        .context("Failed to start property broker")?;

    match args.command.clone() {
        Command::List { property } => list(&broker, property.as_deref()),
        Command::Get { property, area } => get(&broker, &property, AreaId::new(area)),
        Command::Set {
            property,
            value,
            area,
        } => set(&broker, &property, &value, AreaId::new(area)).await,
        Command::Watch {
            property,
            rate,
            writes,
            duration,
        } => watch(&broker, &property, rate, writes, Duration::from_secs(duration)).await,
        Command::Check => {
            println!("{}", broker.stats());
            Ok(())
        }
    }
}

fn load_catalog(path: Option<&PathBuf>) -> Result<PropertyCatalog> {
    match path {
        Some(path) => PropertyCatalog::from_file(path)
            .with_context(|| format!("Failed to load catalog {}", path.display())),
        None => {
            info!("Using built-in sample catalog");
            PropertyCatalog::from_json(SAMPLE_CATALOG).context("Built-in catalog is invalid")
        }
    }
}

/// Resolve a property given as decimal id, 0x-prefixed hex id or name
fn resolve_property(broker: &PropertyBroker, arg: &str) -> Result<PropertyConfig> {
    let parsed = match arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        Some(hex) => i32::from_str_radix(hex, 16).ok(),
        None => arg.parse::<i32>().ok(),
    };

    let found = match parsed {
        Some(id) => broker.list_properties(PropertyId::new(id)).into_iter().next(),
        None => broker
            .list_properties(PropertyId::WILDCARD)
            .into_iter()
            .find(|config| config.name.eq_ignore_ascii_case(arg)),
    };

    found.ok_or_else(|| anyhow!("No property '{}' in the catalog", arg))
}

/// Parse a command line value into the payload type a property expects
fn parse_value(value_type: ValueType, input: &str) -> Result<RawValue> {
    let list = || input.split(',').map(str::trim).filter(|s| !s.is_empty());

    let value = match value_type {
        ValueType::Bool => RawValue::Bool(input.parse().context("expected true or false")?),
        ValueType::Int32 => RawValue::Int32(input.parse().context("expected a 32-bit integer")?),
        ValueType::Int64 => RawValue::Int64(input.parse().context("expected a 64-bit integer")?),
        ValueType::Float => RawValue::Float(input.parse().context("expected a number")?),
        ValueType::Int32Vec => RawValue::Int32Vec(
            list()
                .map(str::parse::<i32>)
                .collect::<Result<Vec<_>, _>>()
                .context("expected comma separated integers")?,
        ),
        ValueType::FloatVec => RawValue::FloatVec(
            list()
                .map(str::parse::<f32>)
                .collect::<Result<Vec<_>, _>>()
                .context("expected comma separated numbers")?,
        ),
        ValueType::String => RawValue::String(input.to_string()),
        ValueType::Bytes => RawValue::Bytes(input.as_bytes().to_vec()),
    };
    Ok(value)
}

fn describe(value: &PropertyValue) -> String {
    serde_json::to_string(&value.value).unwrap_or_else(|_| format!("{:?}", value.value))
}

fn list(broker: &PropertyBroker, property: Option<&str>) -> Result<()> {
    let configs = match property {
        Some(arg) => vec![resolve_property(broker, arg)?],
        None => broker.list_properties(PropertyId::WILDCARD),
    };

    println!(
        "{:<12} {:<24} {:<8} {:<11} {:<10} {:<12} {}",
        "ID", "NAME", "TYPE", "CHANGE", "ACCESS", "RATE (Hz)", "AREAS"
    );
    for config in configs {
        let areas: Vec<String> = config.area_ids.iter().map(|a| a.to_string()).collect();
        println!(
            "{:<12} {:<24} {:<8} {:<11} {:<10} {:<12} {}",
            config.id.to_string(),
            config.name,
            config.value_type.to_string(),
            format!("{:?}", config.change_mode),
            format!("{:?}", config.access),
            format!("{}-{}", config.min_sample_rate, config.max_sample_rate),
            areas.join(",")
        );
    }
    Ok(())
}

fn get(broker: &PropertyBroker, property: &str, area: AreaId) -> Result<()> {
    let config = resolve_property(broker, property)?;

    match broker.get_property(config.id, area) {
        Ok(value) => {
            println!("{} [area {}] = {}", config.label(), area, describe(&value));
            Ok(())
        }
        Err(e) => Err(anyhow!(
            "get {} failed with fault {}: {}",
            config.label(),
            FaultCode::from(&e).as_i32(),
            e
        )),
    }
}

async fn set(broker: &PropertyBroker, property: &str, input: &str, area: AreaId) -> Result<()> {
    let config = resolve_property(broker, property)?;
    let raw = parse_value(config.value_type, input)
        .with_context(|| format!("Invalid value for {}", config.label()))?;

    let (listener, mut events) = ChannelListener::new();
    let handle = broker.connect(listener);
    if config.access.is_readable() {
        broker
            .subscribe(&handle, config.id, config.min_sample_rate)
            .context("Failed to subscribe to change notifications")?;
        // Skip the current values delivered on subscribe
        tokio::time::sleep(Duration::from_millis(100)).await;
        events.drain();
    }

    if let Err(e) = broker.set_property(PropertyValue::for_area(config.id, area, raw)) {
        bail!(
            "set {} failed with fault {}: {}",
            config.label(),
            FaultCode::from(&e).as_i32(),
            e
        );
    }
    println!("{} [area {}] accepted", config.label(), area);

    match events.recv_timeout(Duration::from_millis(500)).await {
        Some(event) => println!("  notification: {}", describe(&event)),
        None if config.access.is_readable() => println!("  no notification (value unchanged)"),
        None => {}
    }

    broker.disconnect(handle.id());
    Ok(())
}

async fn watch(
    broker: &PropertyBroker,
    property: &str,
    rate: f32,
    writes: u32,
    duration: Duration,
) -> Result<()> {
    let config = resolve_property(broker, property)?;
    if config.value_type != ValueType::Float {
        bail!("watch simulates a numeric sensor; {} is {}", config.label(), config.value_type);
    }

    let (listener, mut events) = ChannelListener::new();
    let handle = broker.connect(listener);
    broker
        .subscribe(&handle, config.id, rate)
        .with_context(|| format!("Failed to subscribe to {} at {} Hz", config.label(), rate))?;
    info!("Watching {} at {} Hz for {:?}", config.label(), rate, duration);

    let (min, max) = config.value_range.unwrap_or((0.0, 100.0));
    let period = Duration::from_secs_f64(1.0 / f64::from(writes));
    let mut ticker = tokio::time::interval(period);
    let deadline = tokio::time::Instant::now() + duration;
    let mut step: u64 = 0;
    let mut written = 0u64;
    let mut received = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                let span = (max - min).max(1.0);
                let sample = min + (step as f64 * 1.5) % span;
                step += 1;

                let value = PropertyValue::new(config.id, RawValue::Float(sample as f32));
                match broker.set_property(value) {
                    Ok(()) => written += 1,
                    Err(e) => warn!("Simulated write rejected: {}", e),
                }
            }
            event = events.recv() => {
                match event {
                    Some(event) => {
                        received += 1;
                        println!("{:>6} {} = {}", received, config.label(), describe(&event));
                    }
                    None => break,
                }
            }
        }
    }

    broker.unsubscribe(handle.id(), config.id)?;
    for event in events.drain() {
        received += 1;
        println!("{:>6} {} = {}", received, config.label(), describe(&event));
    }

    println!();
    println!(
        "Wrote {} values, received {} notifications ({:.1}/s, limit {} Hz)",
        written,
        received,
        received as f64 / duration.as_secs_f64(),
        rate
    );
    println!("{}", broker.stats());

    broker.disconnect(handle.id());
    Ok(())
}
