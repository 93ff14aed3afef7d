use std::{
    env,
    io::{self, Write},
    path::PathBuf,
    process,
    str::FromStr,
    sync::atomic::AtomicBool,
    thread, time,
};

use bitcoin::Txid;

use unjoin::{
    analysis::{AnalysisResult, RssSampler, Termination},
    config::Config,
    explorer::{esplora::EsploraClient, parse_txid},
    report::ReportWriter,
    solver::microlp::Microlp,
    AnalysisError, VERSION,
};

// Exit codes of the `analyze` command.
const EXIT_SUCCESS: i32 = 0;
const EXIT_NO_SOLUTIONS: i32 = 1;
const EXIT_CANCELLED: i32 = 2;
const EXIT_INPUT_ERROR: i32 = 3;
const EXIT_SOLVER_ERROR: i32 = 4;
const EXIT_MEMORY_LIMIT: i32 = 5;

// Set from the signal handler, polled by the enumeration loop.
static CANCEL: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Help,
    Version,
    Analyze(AnalyzeOptions),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct AnalyzeOptions {
    txid: Option<String>,
    conf: Option<PathBuf>,
    output: Option<PathBuf>,
    max_fee_rel: Option<String>,
    max_solutions: Option<String>,
    dust_threshold: Option<String>,
    timeout_per_solve: Option<String>,
    memory_limit_gb: Option<String>,
    esplora_url: Option<String>,
    log_level: Option<String>,
}

fn usage() {
    eprintln!(
        "unjoin {}: enumerate the participant structures of a JoinMarket CoinJoin.

USAGE:
    unjoin analyze <txid> [OPTIONS]

OPTIONS:
    --max-fee-rel <F>          Fee tolerance per maker, fraction of the denomination (default 0.05)
    --max-solutions <K>        Stop after K solutions (default 1000)
    --dust-threshold <SAT>     Minimum change output value (default 546)
    --timeout-per-solve <SEC>  Wall-clock budget per solver call (default 60)
    --memory-limit-gb <G>      Resident memory ceiling (default 10)
    --output <PATH>            Report file (default solutions_<first8(txid)>.json)
    --esplora-url <URL>        Esplora instance to fetch from
    --log-level <LEVEL>        error, warn, info, debug or trace
    --conf <PATH>              TOML configuration file with the defaults",
        VERSION
    );
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut iter = args.iter();
    match iter.next().map(|s| s.as_str()) {
        None | Some("--help") | Some("-h") => return Ok(Command::Help),
        Some("--version") => return Ok(Command::Version),
        Some("analyze") => {}
        Some(other) => return Err(format!("Unknown command '{}'.", other)),
    }
    let mut options = AnalyzeOptions::default();

    while let Some(arg) = iter.next() {
        let mut flag_value = |flag: &str| -> Result<String, String> {
            iter.next()
                .map(|value| value.to_string())
                .ok_or_else(|| format!("'{}' requires a value.", flag))
        };
        match arg.as_str() {
            "--conf" => options.conf = Some(PathBuf::from(flag_value(arg)?)),
            "--output" => options.output = Some(PathBuf::from(flag_value(arg)?)),
            "--max-fee-rel" => options.max_fee_rel = Some(flag_value(arg)?),
            "--max-solutions" => options.max_solutions = Some(flag_value(arg)?),
            "--dust-threshold" => options.dust_threshold = Some(flag_value(arg)?),
            "--timeout-per-solve" => options.timeout_per_solve = Some(flag_value(arg)?),
            "--memory-limit-gb" => options.memory_limit_gb = Some(flag_value(arg)?),
            "--esplora-url" => options.esplora_url = Some(flag_value(arg)?),
            "--log-level" => options.log_level = Some(flag_value(arg)?),
            other => {
                if other.starts_with('-') {
                    return Err(format!("Unknown argument '{}'.", other));
                }
                if options.txid.is_some() {
                    return Err(format!("Unexpected extra argument '{}'.", other));
                }
                options.txid = Some(other.to_string());
            }
        }
    }
    if options.txid.is_none() {
        return Err("Missing the transaction id to analyze.".to_string());
    }

    Ok(Command::Analyze(options))
}

fn parse_setting<T: FromStr>(value: &str, flag: &str) -> Result<T, String>
where
    <T as FromStr>::Err: std::fmt::Display,
{
    T::from_str(value).map_err(|e| format!("Invalid value '{}' for {}: {}.", value, flag, e))
}

// Resolve the configuration: file (or defaults), then command-line
// overrides on top.
fn resolve_config(options: &AnalyzeOptions) -> Result<Config, String> {
    let mut config = match options.conf.as_ref() {
        Some(path) => Config::from_file(path).map_err(|e| e.to_string())?,
        None => Config::default(),
    };
    if let Some(value) = options.max_fee_rel.as_ref() {
        config.max_fee_rel = parse_setting(value, "--max-fee-rel")?;
    }
    if let Some(value) = options.max_solutions.as_ref() {
        config.max_solutions = parse_setting(value, "--max-solutions")?;
    }
    if let Some(value) = options.dust_threshold.as_ref() {
        config.dust_threshold = parse_setting(value, "--dust-threshold")?;
    }
    if let Some(value) = options.timeout_per_solve.as_ref() {
        config.per_solve_timeout =
            time::Duration::from_secs(parse_setting(value, "--timeout-per-solve")?);
    }
    if let Some(value) = options.memory_limit_gb.as_ref() {
        let gigabytes: u64 = parse_setting(value, "--memory-limit-gb")?;
        config.memory_limit_bytes = gigabytes * 1024 * 1024 * 1024;
    }
    if let Some(value) = options.esplora_url.as_ref() {
        config.esplora_url = value.clone();
    }
    if let Some(value) = options.log_level.as_ref() {
        config.log_level = parse_setting(value, "--log-level")?;
    }
    config.check().map_err(|e| e.to_string())?;
    Ok(config)
}

fn setup_logger(log_level: log::LevelFilter) -> Result<(), fern::InitError> {
    let dispatcher = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}][thread {}] {}",
                time::SystemTime::now()
                    .duration_since(time::UNIX_EPOCH)
                    .unwrap_or_else(|e| {
                        println!("Can't get time since epoch: '{}'. Using a dummy value.", e);
                        time::Duration::from_secs(0)
                    })
                    .as_secs(),
                record.target(),
                record.level(),
                thread::current().name().unwrap_or("unnamed"),
                message
            ))
        })
        .level(log_level);

    dispatcher.chain(std::io::stdout()).apply()?;

    Ok(())
}

#[cfg(unix)]
fn install_signal_handlers() {
    extern "C" fn handle_signal(_: libc::c_int) {
        CANCEL.store(true, std::sync::atomic::Ordering::Release);
    }
    unsafe {
        libc::signal(libc::SIGINT, handle_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_signal as libc::sighandler_t);
    }
}

#[cfg(not(unix))]
fn install_signal_handlers() {}

fn default_output_path(txid: &Txid) -> PathBuf {
    let txid = txid.to_string();
    PathBuf::from(format!("solutions_{}.json", &txid[..8]))
}

fn exit_code(
    outcome: &Result<AnalysisResult, AnalysisError>,
) -> i32 {
    match outcome {
        Ok(result) => match result.termination {
            Termination::Cancelled => EXIT_CANCELLED,
            _ => {
                if result.solutions.is_empty() {
                    EXIT_NO_SOLUTIONS
                } else {
                    EXIT_SUCCESS
                }
            }
        },
        Err(AnalysisError::Fetch(..))
        | Err(AnalysisError::CoinJoin(..))
        | Err(AnalysisError::Report(..)) => EXIT_INPUT_ERROR,
        Err(AnalysisError::Solver(..)) => EXIT_SOLVER_ERROR,
        Err(AnalysisError::MemoryLimit { .. }) => EXIT_MEMORY_LIMIT,
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let options = match parse_args(&args[1..]) {
        Ok(Command::Help) => {
            usage();
            return;
        }
        Ok(Command::Version) => {
            println!("unjoin {}", VERSION);
            return;
        }
        Ok(Command::Analyze(options)) => options,
        Err(e) => {
            eprintln!("{}", e);
            usage();
            process::exit(EXIT_INPUT_ERROR);
        }
    };

    let txid_str = options.txid.as_ref().expect("Enforced by the parser");
    let txid = parse_txid(txid_str).unwrap_or_else(|e| {
        eprintln!("{}", e);
        process::exit(EXIT_INPUT_ERROR);
    });
    let config = resolve_config(&options).unwrap_or_else(|e| {
        eprintln!("Error resolving configuration: {}", e);
        process::exit(EXIT_INPUT_ERROR);
    });
    setup_logger(config.log_level).unwrap_or_else(|e| {
        eprintln!("Error setting up logger: {}", e);
        process::exit(EXIT_INPUT_ERROR);
    });
    unjoin::setup_panic_hook();
    install_signal_handlers();

    let source = EsploraClient::new(&config.esplora_url).unwrap_or_else(|e| {
        log::error!("Error setting up the explorer client: {}", e);
        process::exit(EXIT_INPUT_ERROR);
    });
    let output_path = options
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&txid));
    let mut writer = ReportWriter::create(output_path).unwrap_or_else(|e| {
        log::error!("Error creating the report file: {}", e);
        process::exit(EXIT_INPUT_ERROR);
    });

    let outcome = unjoin::analyze(
        &config,
        &txid,
        &source,
        &Microlp,
        &mut writer,
        &CANCEL,
        &RssSampler,
    )
    .map(|(_, result)| result);
    match &outcome {
        Ok(result) => {
            log::info!(
                "{} solution(s) written to '{}' ({})",
                result.solutions.len(),
                writer.path().display(),
                result.termination
            );
        }
        Err(e) => {
            log::error!("{}", e);
        }
    }

    // We are always logging to stdout, so try to get all messages actually
    // written out. A flush failure must not mask the run's verdict: note it
    // on stderr and exit with the outcome's code regardless.
    if let Err(e) = io::stdout().flush() {
        eprintln!("Error flushing stdout: {}", e);
    }
    process::exit(exit_code(&outcome));
}
