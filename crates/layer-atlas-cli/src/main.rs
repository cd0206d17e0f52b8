mod app;
mod logging;
mod settings;
mod snapshot;

use settings::Settings;
use std::process::ExitCode;

fn main() -> ExitCode {
    let settings = Settings::from_cli();
    let _guard = logging::setup_logging();

    match app::run(settings) {
        Ok(output) => {
            println!("{:#}", output.value);
            if output.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
