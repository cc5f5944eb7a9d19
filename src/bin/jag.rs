use std::process::ExitCode;

use jag::cancel::CancelToken;
use jag::deploy::DeployError;
use tracing_subscriber::EnvFilter;

mod cli;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if matches!(args.as_slice(), [help] if help == "help" || help == "--help" || help == "-h") {
        println!("{}", cli::usage());
        return ExitCode::SUCCESS;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Compiler and device failures have already printed their own output.
            let reported = err
                .downcast_ref::<DeployError>()
                .is_some_and(DeployError::already_reported);
            if !reported {
                eprintln!("Error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: &[String]) -> anyhow::Result<()> {
    let cancel = CancelToken::new();
    cancel.cancel_on_ctrlc()?;
    cli::dispatch(args, &cancel)
}
