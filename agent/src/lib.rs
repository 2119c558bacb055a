use env_logger::Env;

pub mod config;
pub mod server;
pub mod sink;

/// Initializes the global logger.
///
/// Call this first! The level is `info`, or `debug` if `verbose` is true.
/// In both cases, it can be overridden with the `RUST_LOG` environment variable.
///
/// # Example
///
/// ```
/// use machinestats_agent::init_logger;
///
/// fn main() {
///     init_logger(false);
///     log::info!("I can log now!");
/// }
/// ```
pub fn init_logger(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    // Print a warning if we are running in debug mode.
    #[cfg(debug_assertions)]
    {
        log::warn!("DEBUG assertions are enabled, this build of machinestatsd is fine for debugging, but not for production.");
    }
}
