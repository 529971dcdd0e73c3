// src/main.rs

use lightflow::config::load_or_default;
use lightflow::{cli, logging, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();

    let cfg = match load_or_default(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("lightflow error: {err}");
            std::process::exit(err.exit_code());
        }
    };

    if let Err(err) = logging::init_logging(args.log_level, &cfg.logging.level) {
        eprintln!("lightflow error: failed to initialise logging: {err:?}");
        std::process::exit(1);
    }

    match run(args, cfg).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("lightflow error: {err}");
            std::process::exit(err.exit_code());
        }
    }
}
