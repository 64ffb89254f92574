use clap::Parser;

/// Command-line entry point (spec §2). Config-file values are overridden by
/// these flags where both are present; `--port` always wins over the config
/// document's own `port` key.
#[derive(Parser)]
#[command(name = "gproxy")]
pub(crate) struct Cli {
    #[arg(long, default_value_t = 8080)]
    pub(crate) port: u16,
    #[arg(long, default_value = "INFO")]
    pub(crate) log_level: String,
    #[arg(long, default_value = "")]
    pub(crate) config: String,
    #[arg(long, default_value = "")]
    pub(crate) data_dir: String,
}
