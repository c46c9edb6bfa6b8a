use clap::Parser;
use hookchain::cli::{self, Opts};

fn main() {
    let opts = Opts::parse();

    hookchain::init_logger(Some(opts.verbosity.log_level_filter()));

    match cli::run(&opts) {
        Ok(_) => std::process::exit(0),
        Err(e) => {
            hookchain::utils::report_error(&e);
            std::process::exit(1);
        }
    }
}
