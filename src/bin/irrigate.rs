use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::sync::broadcast::error::RecvError;

use irrigation_pn::net::io;
use irrigation_pn::options::{Command, Options, OutputFormat};
use irrigation_pn::{Controller, Engine, EngineConfig, Session, StateUpdate};

const DEFAULT_CONFIG: &str = "irrigate.toml";

#[tokio::main]
async fn main() -> Result<()> {
    irrigation_pn::init_logger();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let env_flags = std::env::var("IRRIGATE_FLAGS").unwrap_or_default();
    let options = match Options::parse_with_env(&env_flags, &args) {
        Ok(options) => options,
        Err(err) => match err.downcast_ref::<clap::Error>() {
            Some(clap_err) => clap_err.exit(),
            None => return Err(anyhow!("{err}")),
        },
    };
    log::debug!("irrigate options: {:?}", options);

    let mut config = EngineConfig::load_from_file(
        options
            .config
            .clone()
            .unwrap_or_else(|| DEFAULT_CONFIG.into()),
    )?;
    if let Some(zones) = options.zones {
        config.zones = zones;
    }

    match options.command {
        Command::Export { output, controller } => {
            let document = if controller {
                Controller::new(config.controller_tank)?.export_document()
            } else {
                Engine::new(config)?.export_document()
            };
            match output {
                Some(path) => {
                    io::write_string(&path, &document)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    log::info!("PNML written to {}", path.display());
                }
                None => println!("{document}"),
            }
        }
        Command::Marking { format } => {
            let marking = Engine::new(config)?.marking_snapshot();
            let rendered = match format {
                OutputFormat::Json => io::to_json_string(&marking)?,
                OutputFormat::Ron => io::to_ron_string(&marking)?,
            };
            println!("{rendered}");
        }
        Command::Simulate {
            duration,
            time_unit_ms,
            auto_mode,
        } => {
            if let Some(unit) = time_unit_ms {
                config.timing.time_unit_ms = unit;
            }
            config.validate()?;
            simulate(config, duration, auto_mode).await?;
        }
        Command::Controller { transitions, steps } => {
            run_controller(config.controller_tank, &transitions, steps)?;
        }
        _ => return Err(anyhow!("unsupported command")),
    }
    Ok(())
}

async fn simulate(config: EngineConfig, duration: u64, auto_mode: bool) -> Result<()> {
    let run_for = Duration::from_millis(config.timing.time_unit_ms.saturating_mul(duration));
    let (handle, task) = Session::spawn(Engine::new(config)?);
    let mut events = handle.subscribe();

    if auto_mode {
        handle.update_state(StateUpdate::auto_mode(true)).await?;
    }
    let started = handle.start_all_pumps().await?;
    println!("started {started} pumps");

    let stop = tokio::time::sleep(run_for);
    tokio::pin!(stop);
    loop {
        tokio::select! {
            _ = &mut stop => break,
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(missed)) => log::warn!("missed {} events", missed),
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.shutdown().await?;
    let engine = task.await.context("session task failed")?;
    println!("{}", io::to_json_string(&engine.marking_snapshot())?);
    Ok(())
}

fn run_controller(tank: u64, transitions: &[String], steps: Option<usize>) -> Result<()> {
    let mut controller = Controller::new(tank)?;
    match steps {
        Some(steps) => {
            for _ in 0..steps {
                match controller.step() {
                    Ok(Some((transition, marking))) => {
                        println!("{transition}: {}", serde_json::to_string(&marking)?)
                    }
                    Ok(None) => {
                        println!("nothing left to do");
                        break;
                    }
                    Err(err) => {
                        println!("refused: {err}");
                        break;
                    }
                }
            }
        }
        None => {
            for name in transitions {
                match controller.apply_transition(name) {
                    Ok(marking) => println!("{name}: {}", serde_json::to_string(&marking)?),
                    Err(err) => println!("{name}: refused: {err}"),
                }
            }
        }
    }
    println!("{}", io::to_json_string(&controller.marking())?);
    Ok(())
}
