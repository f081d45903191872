#![forbid(unsafe_code)]

//! `ipa-pmctl`: drive the IPA power gate against simulated hardware.
//!
//! Each positional argument is one step. After every step the hardware calls it caused are
//! printed, and the holder table (plus, optionally, the text log) is printed at the end.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use ipa_pm::sim::SimHardware;
use ipa_pm::{ClientId, ClientType, EndpointId, HwMode, IpaPower, PowerConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Normal,
    Virtual,
    Emulation,
}

impl From<Mode> for HwMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Normal => HwMode::Normal,
            Mode::Virtual => HwMode::Virtual,
            Mode::Emulation => HwMode::Emulation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Hold(String),
    TryHold(String),
    Release(String),
    Profile { floor: u32, bandwidth_mbps: u32 },
    ArmTag,
    Request,
    ReleaseTransport,
    Suspend(u32),
    Eot,
    ApSuspend,
    ProxyRelease,
    Wake,
    Unwake,
    Sleep(Duration),
    Flush,
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let verb = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();
        let num = |idx: usize| -> std::result::Result<u32, String> {
            let raw = args
                .get(idx)
                .ok_or_else(|| format!("step `{s}` is missing argument {}", idx + 1))?;
            parse_u32(raw).map_err(|err| format!("step `{s}`: {err}"))
        };
        let name = || -> std::result::Result<String, String> {
            match args.first() {
                Some(name) if !name.is_empty() => Ok(name.to_string()),
                _ => Err(format!("step `{s}` needs a client name")),
            }
        };

        Ok(match verb {
            "inc" => Step::Hold(name()?),
            "inc-nb" => Step::TryHold(name()?),
            "dec" => Step::Release(name()?),
            "perf" => Step::Profile {
                floor: num(0)?,
                bandwidth_mbps: num(1)?,
            },
            "tag" => Step::ArmTag,
            "req" => Step::Request,
            "rel" => Step::ReleaseTransport,
            "suspend" => Step::Suspend(num(0)?),
            "eot" => Step::Eot,
            "ap-suspend" => Step::ApSuspend,
            "proxy-release" => Step::ProxyRelease,
            "wake" => Step::Wake,
            "unwake" => Step::Unwake,
            "sleep" => Step::Sleep(Duration::from_millis(u64::from(num(0)?))),
            "flush" => Step::Flush,
            other => return Err(format!("unknown step `{other}`")),
        })
    }
}

fn parse_u32(raw: &str) -> std::result::Result<u32, String> {
    let parsed = match raw.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|err| format!("invalid number `{raw}`: {err}"))
}

fn parse_endpoint(s: &str) -> std::result::Result<(EndpointId, ClientType), String> {
    let (ep, client) = s
        .split_once('=')
        .ok_or_else(|| format!("expected EP=CLIENT, got `{s}`"))?;
    let ep = parse_u32(ep)?;
    let client =
        ClientType::from_name(client).ok_or_else(|| format!("unknown client `{client}`"))?;
    Ok((EndpointId(ep), client))
}

#[derive(Debug, Parser)]
#[command(
    name = "ipa-pmctl",
    about = "Run a sequence of IPA power gate operations against simulated hardware",
    after_help = "Steps: inc:NAME inc-nb:NAME dec:NAME perf:FLOOR:MBPS tag req rel suspend:MASK \
                  eot ap-suspend proxy-release wake unwake sleep:MS flush"
)]
struct Args {
    /// Hardware mode. Virtual platforms never vote on the bus.
    #[arg(long, value_enum, env = "IPA_PM_HW_MODE", default_value = "normal")]
    hw_mode: Mode,

    /// Resolve every profile request to the nominal tier before applying the floor.
    #[arg(long, env = "IPA_PM_NO_CLOCK_SCALING")]
    no_clock_scaling: bool,

    /// Number of entries in the bus scaling table.
    #[arg(long, env = "IPA_PM_BUS_USECASES", default_value_t = ipa_pm::config::DEFAULT_BUS_USECASES)]
    bus_usecases: u32,

    /// Debounce applied to transport and SPS releases, in milliseconds.
    #[arg(long, env = "IPA_PM_RELEASE_DEBOUNCE_MS", default_value_t = 100)]
    release_debounce_ms: u64,

    /// Lines kept in the active-clients text log.
    #[arg(long, env = "IPA_PM_LOG_LINES", default_value_t = ipa_pm::config::DEFAULT_LOG_LINES)]
    log_lines: usize,

    /// Simulate an SMMU clock gated together with the core clock.
    #[arg(long, env = "IPA_PM_AUX_CLOCK")]
    aux_clock: bool,

    /// Connect an endpoint before running, e.g. `--endpoint 2=APPS_LAN_CONS`. Repeatable.
    #[arg(long = "endpoint", value_name = "EP=CLIENT", value_parser = parse_endpoint)]
    endpoints: Vec<(EndpointId, ClientType)>,

    /// Also print the active-clients text log at the end.
    #[arg(long)]
    log_buffer: bool,

    /// Default tracing filter when `RUST_LOG` is not set.
    #[arg(long, env = "IPA_PM_LOG", default_value = "warn")]
    log_level: String,

    /// Operations to run, in order.
    #[arg(value_name = "STEP")]
    steps: Vec<Step>,
}

impl Args {
    fn config(&self) -> PowerConfig {
        PowerConfig {
            hw_mode: self.hw_mode.into(),
            enable_clock_scaling: !self.no_clock_scaling,
            bus_usecases: self.bus_usecases,
            release_debounce: Duration::from_millis(self.release_debounce_ms),
            log_lines: self.log_lines,
            ..PowerConfig::default()
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&args.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let sim = SimHardware::new();
    let platform = if args.aux_clock {
        sim.platform_with_aux_clock()
    } else {
        sim.platform()
    };
    let power = IpaPower::new(args.config(), platform).context("failed to initialize power gate")?;
    power.install_panic_dump();

    for (ep, client) in &args.endpoints {
        power
            .endpoints()
            .connect(*ep, *client)
            .with_context(|| format!("failed to connect {ep}"))?;
    }

    println!("> init");
    print_events(&sim);

    let mut holds: HashMap<String, u32> = HashMap::new();
    for step in &args.steps {
        println!("> {step:?}");
        run_step(&power, step, &mut holds)?;
        print_events(&sim);
    }

    power.flush_deferred_work();
    println!("> settled");
    print_events(&sim);

    print!("{}", power.dump_table());
    if args.log_buffer {
        println!("\n---- Active Clients Log ----");
        print!("{}", power.dump_log_buffer());
    }
    Ok(())
}

fn run_step(power: &IpaPower, step: &Step, holds: &mut HashMap<String, u32>) -> Result<()> {
    match step {
        Step::Hold(name) => {
            power.inc_client(&ClientId::resource(name.clone()), true)?;
            *holds.entry(name.clone()).or_default() += 1;
        }
        Step::TryHold(name) => match power.inc_client(&ClientId::resource(name.clone()), false) {
            Ok(()) => *holds.entry(name.clone()).or_default() += 1,
            Err(err) => println!("  refused: {err}"),
        },
        Step::Release(name) => {
            let Some(count) = holds.get_mut(name).filter(|count| **count > 0) else {
                bail!("`{name}` holds nothing to release");
            };
            *count -= 1;
            power.dec_client(&ClientId::resource(name.clone()));
        }
        Step::Profile {
            floor,
            bandwidth_mbps,
        } => power
            .set_performance_profile(*floor, *bandwidth_mbps)
            .with_context(|| format!("perf:{floor}:{bandwidth_mbps}"))?,
        Step::ArmTag => power.set_tag_process_before_gating(true),
        Step::Request => println!("  {:?}", power.request_transport_resource()),
        Step::ReleaseTransport => power.release_transport_resource(),
        Step::Suspend(mask) => power.suspend_handler(*mask),
        Step::Eot => power.note_transfer_activity(),
        Step::ApSuspend => match power.ap_suspend() {
            Ok(()) => println!("  suspended"),
            Err(err) => println!("  refused: {err}"),
        },
        Step::ProxyRelease => power.release_proxy_vote(),
        Step::Wake => power.acquire_wakelock(),
        Step::Unwake => {
            if power.wakelock_count() == 0 {
                bail!("wakelock is not held");
            }
            power.release_wakelock();
        }
        Step::Sleep(duration) => std::thread::sleep(*duration),
        Step::Flush => power.flush_deferred_work(),
    }
    Ok(())
}

fn print_events(sim: &SimHardware) {
    for event in sim.take_events() {
        println!("  {event:?}");
    }
}
