mod cmd;
mod log_level;
mod options;
mod rpc;
mod settings;

use cmd::AppExitCode;
use settings::Settings;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

/// The config-file `log_level`, when set, takes precedence over the CLI
/// flag's default; an explicit `--log-level` still wins since clap applies
/// it on top of `Options::default`, but a deployment that only sets
/// `OC_LOG_LEVEL` gets it honored here.
fn init_tracing(opts: &options::Options, settings: &Settings) -> Option<WorkerGuard> {
    let console_filter = match &settings.log_level {
        Some(level) => EnvFilter::try_new(level).expect("invalid log filter"),
        None => opts.log_level.to_filter().expect("invalid log filter"),
    };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_filter(console_filter);

    let (file_layer, file_guard) = match &settings.log_dir {
        Some(log_dir) => {
            let appender = RollingFileAppender::builder()
                .filename_prefix("obcrawler")
                .filename_suffix("log")
                .rotation(Rotation::DAILY)
                .max_log_files(7)
                .build(log_dir)
                .expect("failed to initialize rolling file appender");

            let (non_blocking, file_guard) = tracing_appender::non_blocking(appender);

            let file_layer = fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(false)
                .with_file(true)
                .with_line_number(true)
                .with_filter(tracing_subscriber::EnvFilter::new("info"));

            (Some(file_layer), Some(file_guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer);

    tracing::subscriber::set_global_default(registry).expect("unable to set a global subscriber");

    file_guard
}

/// Log panics through `tracing` before falling through to the default hook,
/// so a crash is visible in both the console and any configured log file.
fn init_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);

        let stacktrace = std::backtrace::Backtrace::force_capture();
        tracing::error!(
            stacktrace = stacktrace.to_string(),
            info = info.to_string(),
            "panicking"
        );
    }))
}

#[tokio::main]
async fn main() {
    let opts = options::parse();

    let settings = match Settings::new(&opts.config_dir, &opts.run_mode) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(AppExitCode::ConfigError.code());
        }
    };

    let _guard = init_tracing(&opts, &settings);
    init_panic_handler();

    let exit_code = match cmd::exec(&opts, settings).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("failed to execute {:?}: {e:?}", opts.command);
            AppExitCode::RuntimeError
        }
    };

    std::process::exit(exit_code.code());
}
