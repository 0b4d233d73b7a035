//! Headless capture harness: runs the full guided flow against the real
//! camera and model, printing feedback as it streams.
//!
//!   capture [config.json]
//!   capture --set-height <cm>

use std::env;
use std::process::ExitCode;

use log::error;
use stature::{storage, CaptureConfig, CaptureEngine, CaptureEvent};

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();

    if args.first().map(String::as_str) == Some("--set-height") {
        let Some(value) = args.get(1).and_then(|v| v.parse::<f64>().ok()) else {
            eprintln!("Usage: capture --set-height <cm>");
            return ExitCode::FAILURE;
        };
        return match storage::save_height(value) {
            Ok(()) => {
                println!("Height set to {} cm", value);
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("{}", err);
                ExitCode::FAILURE
            }
        };
    }

    let config_path = args
        .first()
        .map(Into::into)
        .unwrap_or_else(CaptureConfig::default_path);
    let config = match CaptureConfig::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            error!("Failed to load config {:?}: {}", config_path, err);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Failed to start runtime: {}", err);
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        let (engine, handle, mut events) = match CaptureEngine::new(config) {
            Ok(parts) => parts,
            Err(err) => {
                error!("{:#}", err);
                return ExitCode::FAILURE;
            }
        };

        let listener = async {
            let mut status = ExitCode::SUCCESS;
            while let Some(event) = events.recv().await {
                match event {
                    CaptureEvent::Feedback(message) => println!("* {}", message),
                    CaptureEvent::StageChanged(stage) => println!("-- stage: {}", stage),
                    CaptureEvent::Countdown(Some(n)) => println!("   {}", n),
                    CaptureEvent::Countdown(None) => {}
                    CaptureEvent::Complete(record) => {
                        match serde_json::to_string_pretty(&record) {
                            Ok(json) => println!("{}", json),
                            Err(err) => eprintln!("Failed to render record: {}", err),
                        }
                        handle.shutdown();
                    }
                    CaptureEvent::NeedHeight => {
                        eprintln!("No stored height. Run `capture --set-height <cm>` first.");
                        status = ExitCode::FAILURE;
                        handle.shutdown();
                    }
                    CaptureEvent::Failed(err) => {
                        eprintln!("Capture failed: {}", err);
                        status = ExitCode::FAILURE;
                        handle.shutdown();
                    }
                }
            }
            status
        };

        let (_, status) = tokio::join!(engine.run(), listener);
        status
    })
}
