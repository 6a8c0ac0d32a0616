use clap::Parser;

use app::cli::Cli;

fn main() {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    let env = env_logger::Env::default()
        .filter_or("SIP_LOG_LEVEL", level)
        .write_style_or("SIP_LOG_STYLE", "auto");
    env_logger::init_from_env(env);

    if let Err(err) = app::run(cli) {
        log::error!("app error: {err}");
        std::process::exit(1);
    }
}
