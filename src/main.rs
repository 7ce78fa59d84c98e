use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use dockyard::build::{BuildState, Command};
use dockyard::config::{self, Config};
use dockyard::docker::DockerCli;
use dockyard::service::{BuildService, ServiceSettings};

const USAGE: &str = "usage: dockyard submit <image> <project-id> [task ...]";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(error) = run(std::env::args().skip(1).collect()) {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run(args: Vec<String>) -> Result<()> {
    let (image, project_id, tasks) = match args.as_slice() {
        [cmd, image, project_id, tasks @ ..] if cmd == "submit" => (image, project_id, tasks),
        _ => bail!(USAGE),
    };

    let cfg = load_config()?;
    let engine = DockerCli::from_config(&cfg);
    engine.ensure_available()?;

    let service = BuildService::new(Arc::new(engine), ServiceSettings::from_config(&cfg));
    let tasks = tasks
        .iter()
        .map(|cmd| Command { cmd: cmd.clone() })
        .collect();

    let pending = service.submit(image, project_id, tasks)?;
    println!("{}", serde_json::to_string_pretty(&pending)?);

    let finished = service
        .wait_until_finished(&pending.id, Duration::from_secs(cfg.wait_timeout))
        .context("build did not complete")?;
    println!("{}", serde_json::to_string_pretty(&finished)?);

    service.shutdown();
    if finished.state == BuildState::Failed {
        bail!("build {} failed", finished.id);
    }
    Ok(())
}

fn load_config() -> Result<Config> {
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let explicit = std::env::var_os(config::CONFIG_ENV).map(PathBuf::from);
    config::resolve(&cwd, explicit)
}
