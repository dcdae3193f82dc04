mod app;

use app::{Finished, GeocachePipelineApp, Settings};
use std::process::ExitCode;

fn main() -> ExitCode {
    app::setup_logging();
    let settings = Settings::from_cli();

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to start the async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = rt.block_on(async {
        let app = GeocachePipelineApp::new(settings)?;
        app.run().await
    });

    match result {
        Ok(Finished::Done) => ExitCode::SUCCESS,
        Ok(Finished::Cancelled) => {
            tracing::warn!("Cancelled, nothing was published");
            ExitCode::from(130)
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
